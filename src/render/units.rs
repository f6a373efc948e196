//! Systemd unit renderers
//!
//! One renderer per unit the cluster runs. Every unit restarts on failure
//! after 5 seconds and is wanted by `multi-user.target`; the flag sets are
//! parameterised by the cluster config.

use crate::config::{ClusterConfig, Node};

/// Render the etcd unit for the controller
pub fn etcd_unit(controller: &Node) -> String {
    format!(
        r#"[Unit]
Description=etcd
Documentation=https://github.com/etcd-io/etcd
After=network.target

[Service]
User=etcd
Group=etcd
Type=notify
ExecStart=/usr/local/bin/etcd \
  --name {name} \
  --cert-file=/etc/etcd/kubernetes.pem \
  --key-file=/etc/etcd/kubernetes-key.pem \
  --peer-cert-file=/etc/etcd/kubernetes.pem \
  --peer-key-file=/etc/etcd/kubernetes-key.pem \
  --trusted-ca-file=/etc/etcd/ca.pem \
  --peer-trusted-ca-file=/etc/etcd/ca.pem \
  --client-cert-auth \
  --data-dir=/var/lib/etcd
Restart=on-failure
RestartSec=5

[Install]
WantedBy=multi-user.target
"#,
        name = controller.name
    )
}

/// Render the kube-apiserver unit
pub fn kube_apiserver_unit(config: &ClusterConfig) -> String {
    format!(
        r#"[Unit]
Description=Kubernetes API Server
Documentation=https://kubernetes.io/docs/reference/command-line-tools-reference/kube-apiserver/
After=network.target

[Service]
ExecStart=/usr/local/bin/kube-apiserver \
  --advertise-address={controller_ip} \
  --allow-privileged=true \
  --apiserver-count=1 \
  --authorization-mode=Node,RBAC \
  --bind-address=0.0.0.0 \
  --client-ca-file=/var/lib/kubernetes/ca.pem \
  --enable-admission-plugins=NodeRestriction \
  --etcd-cafile=/var/lib/kubernetes/ca.pem \
  --etcd-certfile=/var/lib/kubernetes/kubernetes.pem \
  --etcd-keyfile=/var/lib/kubernetes/kubernetes-key.pem \
  --etcd-servers=https://{controller_ip}:2379 \
  --encryption-provider-config=/var/lib/kubernetes/encryption-config.yaml \
  --kubelet-certificate-authority=/var/lib/kubernetes/ca.pem \
  --kubelet-client-certificate=/var/lib/kubernetes/kubernetes.pem \
  --kubelet-client-key=/var/lib/kubernetes/kubernetes-key.pem \
  --service-account-key-file=/var/lib/kubernetes/service-account.pem \
  --service-cluster-ip-range={service_cidr} \
  --service-node-port-range=30000-32767 \
  --tls-cert-file=/var/lib/kubernetes/kubernetes.pem \
  --tls-private-key-file=/var/lib/kubernetes/kubernetes-key.pem
Restart=on-failure
RestartSec=5

[Install]
WantedBy=multi-user.target
"#,
        controller_ip = config.controller.ip_address,
        service_cidr = config.service_cidr
    )
}

/// Render the kube-controller-manager unit
pub fn kube_controller_manager_unit(config: &ClusterConfig) -> String {
    format!(
        r#"[Unit]
Description=Kubernetes Controller Manager
Documentation=https://kubernetes.io/docs/reference/command-line-tools-reference/kube-controller-manager/
After=network.target

[Service]
ExecStart=/usr/local/bin/kube-controller-manager \
  --bind-address=0.0.0.0 \
  --cluster-cidr={pod_cidr} \
  --leader-elect=true \
  --service-account-private-key-file=/var/lib/kubernetes/service-account-key.pem \
  --service-cluster-ip-range={service_cidr} \
  --use-service-account-credentials=true \
  --v=2 \
  --kubeconfig=/var/lib/kubernetes/kube-controller-manager.kubeconfig
Restart=on-failure
RestartSec=5

[Install]
WantedBy=multi-user.target
"#,
        pod_cidr = config.pod_cidr,
        service_cidr = config.service_cidr
    )
}

/// Render the kube-scheduler unit
pub fn kube_scheduler_unit() -> String {
    r#"[Unit]
Description=Kubernetes Scheduler
Documentation=https://kubernetes.io/docs/reference/command-line-tools-reference/kube-scheduler/
After=network.target

[Service]
ExecStart=/usr/local/bin/kube-scheduler \
  --bind-address=0.0.0.0 \
  --leader-elect=true \
  --v=2 \
  --kubeconfig=/var/lib/kubernetes/kube-scheduler.kubeconfig
Restart=on-failure
RestartSec=5

[Install]
WantedBy=multi-user.target
"#
    .to_string()
}

/// Render the containerd unit
pub fn containerd_unit() -> String {
    r#"[Unit]
Description=containerd container runtime
Documentation=https://containerd.io
After=network.target

[Service]
ExecStart=/bin/containerd
Restart=on-failure
RestartSec=5
Delegate=yes
KillMode=process
OOMScoreAdjust=-999
LimitNOFILE=1048576
LimitNPROC=infinity
LimitCORE=infinity

[Install]
WantedBy=multi-user.target
"#
    .to_string()
}

/// Render the kubelet unit for one worker
///
/// The kubeconfig path embeds the worker name, so each worker gets its own
/// rendering.
pub fn kubelet_unit(worker: &Node) -> String {
    format!(
        r#"[Unit]
Description=Kubernetes Kubelet
Documentation=https://kubernetes.io/docs/reference/command-line-tools-reference/kubelet/
After=containerd.service
Requires=containerd.service

[Service]
ExecStart=/usr/local/bin/kubelet \
  --config=/var/lib/kubelet/kubelet-config.yaml \
  --container-runtime-endpoint=unix:///var/run/containerd/containerd.sock \
  --kubeconfig=/var/lib/kubelet/{name}.kubeconfig \
  --register-node=true \
  --v=2
Restart=on-failure
RestartSec=5

[Install]
WantedBy=multi-user.target
"#,
        name = worker.name
    )
}

/// Render the kube-proxy unit
pub fn kube_proxy_unit() -> String {
    r#"[Unit]
Description=Kubernetes Kube Proxy
Documentation=https://kubernetes.io/docs/reference/command-line-tools-reference/kube-proxy/
After=network.target

[Service]
ExecStart=/usr/local/bin/kube-proxy \
  --config=/var/lib/kube-proxy/kube-proxy-config.yaml
Restart=on-failure
RestartSec=5

[Install]
WantedBy=multi-user.target
"#
    .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ClusterConfig;

    fn config() -> ClusterConfig {
        ClusterConfig::default_config()
    }

    #[test]
    fn etcd_unit_carries_node_name_and_cert_paths() {
        let unit = etcd_unit(&config().controller);
        assert!(unit.contains("--name controller-0 \\"));
        assert!(unit.contains("--cert-file=/etc/etcd/kubernetes.pem"));
        assert!(unit.contains("--data-dir=/var/lib/etcd"));
        assert!(unit.contains("User=etcd"));
    }

    #[test]
    fn apiserver_unit_points_at_local_etcd_and_service_range() {
        let unit = kube_apiserver_unit(&config());
        assert!(unit.contains("--advertise-address=10.240.0.10 \\"));
        assert!(unit.contains("--etcd-servers=https://10.240.0.10:2379 \\"));
        assert!(unit.contains("--service-cluster-ip-range=10.32.0.0/24 \\"));
        assert!(unit.contains(
            "--encryption-provider-config=/var/lib/kubernetes/encryption-config.yaml"
        ));
    }

    #[test]
    fn controller_manager_unit_carries_both_cidrs() {
        let unit = kube_controller_manager_unit(&config());
        assert!(unit.contains("--cluster-cidr=10.200.0.0/16 \\"));
        assert!(unit.contains("--service-cluster-ip-range=10.32.0.0/24 \\"));
        assert!(unit.contains("kube-controller-manager.kubeconfig"));
    }

    #[test]
    fn kubelet_unit_embeds_worker_kubeconfig() {
        let unit = kubelet_unit(&config().workers[0]);
        assert!(unit.contains("--kubeconfig=/var/lib/kubelet/worker-0.kubeconfig \\"));
        assert!(unit.contains(
            "--container-runtime-endpoint=unix:///var/run/containerd/containerd.sock"
        ));
        assert!(unit.contains("Requires=containerd.service"));
    }

    #[test]
    fn every_unit_has_restart_policy_and_install_section() {
        let cfg = config();
        let units = [
            etcd_unit(&cfg.controller),
            kube_apiserver_unit(&cfg),
            kube_controller_manager_unit(&cfg),
            kube_scheduler_unit(),
            containerd_unit(),
            kubelet_unit(&cfg.workers[0]),
            kube_proxy_unit(),
        ];
        for unit in units {
            assert!(unit.contains("Restart=on-failure"), "missing restart: {unit}");
            assert!(unit.contains("RestartSec=5"), "missing restart delay: {unit}");
            assert!(
                unit.contains("WantedBy=multi-user.target"),
                "missing install target: {unit}"
            );
        }
    }

    #[test]
    fn rendering_is_deterministic() {
        let cfg = config();
        assert_eq!(kube_apiserver_unit(&cfg), kube_apiserver_unit(&cfg));
        assert_eq!(kubelet_unit(&cfg.workers[1]), kubelet_unit(&cfg.workers[1]));
    }
}
