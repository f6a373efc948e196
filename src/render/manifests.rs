//! Kubernetes manifest renderers: CoreDNS and the smoke-test workload

use crate::config::ClusterConfig;

/// Render the CoreDNS deployment manifest
///
/// ServiceAccount, ClusterRole and binding, a two-replica Deployment, the
/// Corefile ConfigMap, and the kube-dns Service pinned to the cluster DNS
/// address.
pub fn coredns_manifest(config: &ClusterConfig) -> String {
    format!(
        r#"apiVersion: v1
kind: ServiceAccount
metadata:
  name: coredns
  namespace: kube-system
---
apiVersion: rbac.authorization.k8s.io/v1
kind: ClusterRole
metadata:
  name: coredns
rules:
- apiGroups: [""]
  resources: ["endpoints", "services", "pods", "namespaces"]
  verbs: ["list", "watch"]
---
apiVersion: rbac.authorization.k8s.io/v1
kind: ClusterRoleBinding
metadata:
  name: coredns
roleRef:
  apiGroup: rbac.authorization.k8s.io
  kind: ClusterRole
  name: coredns
subjects:
- kind: ServiceAccount
  name: coredns
  namespace: kube-system
---
apiVersion: apps/v1
kind: Deployment
metadata:
  name: coredns
  namespace: kube-system
  labels:
    k8s-app: kube-dns
spec:
  replicas: 2
  selector:
    matchLabels:
      k8s-app: kube-dns
  template:
    metadata:
      labels:
        k8s-app: kube-dns
    spec:
      serviceAccountName: coredns
      containers:
      - name: coredns
        image: coredns/coredns:{version}
        args:
        - -conf
        - /etc/coredns/Corefile
        volumeMounts:
        - name: config-volume
          mountPath: /etc/coredns
      volumes:
      - name: config-volume
        configMap:
          name: coredns
---
apiVersion: v1
kind: ConfigMap
metadata:
  name: coredns
  namespace: kube-system
data:
  Corefile: |
    .:53 {{
        errors
        health
        kubernetes cluster.local in-addr.arpa ip6.arpa {{
          pods insecure
          fallthrough in-addr.arpa ip6.arpa
        }}
        prometheus :9153
        forward . /etc/resolv.conf
        cache 30
        loop
        reload
        loadbalance
    }}
---
apiVersion: v1
kind: Service
metadata:
  name: kube-dns
  namespace: kube-system
  labels:
    k8s-app: kube-dns
  annotations:
    prometheus.io/port: "9153"
    prometheus.io/scrape: "true"
spec:
  clusterIP: {cluster_dns}
  ports:
  - name: dns
    port: 53
    protocol: UDP
  - name: dns-tcp
    port: 53
    protocol: TCP
  - name: metrics
    port: 9153
    protocol: TCP
  selector:
    k8s-app: kube-dns
"#,
        version = config.coredns_version,
        cluster_dns = config.cluster_dns
    )
}

/// Render the smoke-test workload: a two-replica nginx Deployment plus a
/// ClusterIP Service
pub fn test_app_manifest() -> String {
    r#"apiVersion: apps/v1
kind: Deployment
metadata:
  name: test-deployment
spec:
  replicas: 2
  selector:
    matchLabels:
      app: test-app
  template:
    metadata:
      labels:
        app: test-app
    spec:
      containers:
      - name: nginx
        image: nginx:1.14.2
        ports:
        - containerPort: 80
---
apiVersion: v1
kind: Service
metadata:
  name: test-service
spec:
  ports:
  - port: 80
    targetPort: 80
    protocol: TCP
  selector:
    app: test-app
"#
    .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn coredns_manifest_pins_image_and_cluster_ip() {
        let rendered = coredns_manifest(&ClusterConfig::default_config());
        assert!(rendered.contains("image: coredns/coredns:1.10.1"));
        assert!(rendered.contains("clusterIP: 10.32.0.10"));
        assert!(rendered.contains("replicas: 2"));
        assert!(rendered.contains("kubernetes cluster.local in-addr.arpa ip6.arpa"));
    }

    #[test]
    fn coredns_service_exposes_dns_and_metrics_ports() {
        let rendered = coredns_manifest(&ClusterConfig::default_config());
        assert!(rendered.contains("protocol: UDP"));
        assert_eq!(rendered.matches("port: 53").count(), 2);
        assert!(rendered.contains("port: 9153"));
    }

    #[test]
    fn test_app_is_two_nginx_replicas_behind_a_service() {
        let rendered = test_app_manifest();
        assert!(rendered.contains("name: test-deployment"));
        assert!(rendered.contains("replicas: 2"));
        assert!(rendered.contains("image: nginx:1.14.2"));
        assert!(rendered.contains("name: test-service"));
    }
}
