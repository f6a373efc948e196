//! Kubeconfig, encryption, CNI, and component config renderers

use std::path::Path;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;

use crate::config::{ClusterConfig, Node};

/// Render a kubeconfig for one principal
///
/// The credential paths point into the local work directory; the server is
/// `https://<server_ip>:6443`. Control-plane principals pass the
/// controller's address; the worker flow passes the worker's own address.
pub fn kubeconfig(config: &ClusterConfig, work_dir: &Path, name: &str, server_ip: &str) -> String {
    let work_dir = work_dir.display();
    format!(
        r#"apiVersion: v1
clusters:
- cluster:
    certificate-authority: {work_dir}/ca.pem
    server: https://{server_ip}:6443
  name: {cluster}
contexts:
- context:
    cluster: {cluster}
    user: {name}
  name: {name}
current-context: {name}
kind: Config
preferences: {{}}
users:
- name: {name}
  user:
    client-certificate: {work_dir}/{name}.pem
    client-key: {work_dir}/{name}-key.pem
"#,
        cluster = config.cluster_name,
    )
}

/// Render the secrets encryption config for the API server
///
/// Exactly one `aescbc` key (the caller-provided 32-byte secret) followed
/// by the `identity` provider.
pub fn encryption_config(key: &[u8; 32]) -> String {
    format!(
        r#"kind: EncryptionConfig
apiVersion: v1
resources:
  - resources:
      - secrets
    providers:
      - aescbc:
          keys:
            - name: key1
              secret: {secret}
      - identity: {{}}
"#,
        secret = BASE64.encode(key)
    )
}

/// Render the CNI bridge config for one worker's pod subnet
pub fn bridge_conf(pod_cidr: &str) -> String {
    format!(
        r#"{{
  "cniVersion": "0.4.0",
  "name": "bridge",
  "type": "bridge",
  "bridge": "cni0",
  "isGateway": true,
  "ipMasq": true,
  "ipam": {{
    "type": "host-local",
    "ranges": [
      [{{"subnet": "{pod_cidr}"}}]
    ],
    "routes": [{{"dst": "0.0.0.0/0"}}]
  }}
}}
"#
    )
}

/// Render the CNI loopback config
pub fn loopback_conf() -> String {
    r#"{
  "cniVersion": "0.4.0",
  "name": "loopback",
  "type": "loopback"
}
"#
    .to_string()
}

/// Render the kubelet configuration for one worker
pub fn kubelet_config(config: &ClusterConfig, worker: &Node) -> String {
    format!(
        r#"apiVersion: kubelet.config.k8s.io/v1beta1
kind: KubeletConfiguration
address: {address}
authentication:
  anonymous:
    enabled: false
  webhook:
    enabled: true
authorization:
  mode: Webhook
clusterDNS:
- {cluster_dns}
clusterDomain: cluster.local
podCIDR: {pod_cidr}
resolvConf: /etc/resolv.conf
"#,
        address = worker.ip_address,
        cluster_dns = config.cluster_dns,
        pod_cidr = worker.pod_cidr
    )
}

/// Render the kube-proxy configuration
pub fn kube_proxy_config(config: &ClusterConfig) -> String {
    format!(
        r#"apiVersion: kubeproxy.config.k8s.io/v1alpha1
kind: KubeProxyConfiguration
clientConnection:
  kubeconfig: /var/lib/kube-proxy/kube-proxy.kubeconfig
mode: iptables
clusterCIDR: {pod_cidr}
"#,
        pod_cidr = config.pod_cidr
    )
}

/// Render the containerd config (runc v2 runtime, systemd cgroups)
pub fn containerd_config() -> String {
    r#"version = 2
[plugins]
  [plugins."io.containerd.grpc.v1.cri"]
    [plugins."io.containerd.grpc.v1.cri".containerd]
      [plugins."io.containerd.grpc.v1.cri".containerd.runtimes]
        [plugins."io.containerd.grpc.v1.cri".containerd.runtimes.runc]
          runtime_type = "io.containerd.runc.v2"
          [plugins."io.containerd.grpc.v1.cri".containerd.runtimes.runc.options]
            SystemdCgroup = true
"#
    .to_string()
}
