//! Worker provisioning flow
//!
//! Installs the container runtime, CNI plugins, and node agents on one
//! worker, places its credentials and configs, and starts the three units
//! together.

use std::path::Path;

use tracing::info;

use crate::config::{ClusterConfig, Node};
use crate::error::{Error, ErrorContext};
use crate::render::{self, DownloadSources};
use crate::transport::Transport;

/// Provision a single worker node
pub(crate) async fn provision(
    transport: &dyn Transport,
    config: &ClusterConfig,
    sources: &DownloadSources,
    work_dir: &Path,
    worker: &Node,
) -> Result<(), Error> {
    let host = worker.ip_address.as_str();
    info!(node = %worker.name, "setting up worker node");

    // OS dependencies and the directory tree
    let dep_commands = [
        "sudo apt-get update".to_string(),
        "sudo apt-get -y install socat conntrack ipset".to_string(),
        "sudo mkdir -p /etc/cni/net.d /opt/cni/bin /var/lib/kubelet /var/lib/kube-proxy /var/lib/kubernetes /var/run/kubernetes"
            .to_string(),
    ];
    for command in &dep_commands {
        transport.execute(host, command).await.with_context(|| {
            format!(
                "failed to execute dependency command '{command}' on {}",
                worker.name
            )
        })?;
    }

    // CNI plugins
    let cni_version = &config.cni_version;
    let cni_commands = [
        format!(
            "wget -q --show-progress --https-only --timestamping '{}'",
            sources.cni_tarball(cni_version)
        ),
        format!("sudo tar -xzf cni-plugins-linux-amd64-{cni_version}.tgz -C /opt/cni/bin/"),
        format!("rm -f cni-plugins-linux-amd64-{cni_version}.tgz"),
    ];
    for command in &cni_commands {
        transport.execute(host, command).await.with_context(|| {
            format!("failed to execute CNI command '{command}' on {}", worker.name)
        })?;
    }

    // containerd and runc
    let containerd_version = &config.containerd_version;
    let containerd_commands = [
        format!(
            "wget -q --show-progress --https-only --timestamping '{}'",
            sources.containerd_tarball(containerd_version)
        ),
        format!(
            "wget -q --show-progress --https-only --timestamping '{}'",
            sources.runc_binary()
        ),
        format!("sudo tar -xzf containerd-{containerd_version}-linux-amd64.tar.gz -C /"),
        "sudo mv runc.amd64 runc".to_string(),
        "chmod +x runc".to_string(),
        "sudo mv runc /usr/local/bin/".to_string(),
        format!("rm -f containerd-{containerd_version}-linux-amd64.tar.gz"),
    ];
    for command in &containerd_commands {
        transport.execute(host, command).await.with_context(|| {
            format!(
                "failed to execute containerd command '{command}' on {}",
                worker.name
            )
        })?;
    }

    // Node agent binaries
    let version = &config.kubernetes_version;
    let k8s_commands = [
        format!(
            "wget -q --show-progress --https-only --timestamping '{}' '{}' '{}'",
            sources.kube_binary(version, "kubectl"),
            sources.kube_binary(version, "kube-proxy"),
            sources.kube_binary(version, "kubelet"),
        ),
        "chmod +x kubectl kube-proxy kubelet".to_string(),
        "sudo mv kubectl kube-proxy kubelet /usr/local/bin/".to_string(),
    ];
    for command in &k8s_commands {
        transport.execute(host, command).await.with_context(|| {
            format!(
                "failed to execute kubernetes command '{command}' on {}",
                worker.name
            )
        })?;
    }

    // Credentials: the CA, this worker's client pair, and the kubeconfigs
    let kubelet_files = [
        "ca.pem".to_string(),
        format!("{}-key.pem", worker.name),
        format!("{}.pem", worker.name),
        format!("{}.kubeconfig", worker.name),
    ];
    for file in &kubelet_files {
        transport
            .copy_file(host, &work_dir.join(file), &format!("/var/lib/kubelet/{file}"))
            .await
            .with_context(|| format!("failed to copy {file} to {}", worker.name))?;
    }
    transport
        .copy_file(
            host,
            &work_dir.join("kube-proxy.kubeconfig"),
            "/var/lib/kube-proxy/kube-proxy.kubeconfig",
        )
        .await
        .with_context(|| format!("failed to copy kube-proxy.kubeconfig to {}", worker.name))?;

    // Rendered configuration files
    let configs = [
        ("/etc/containerd/config.toml", render::containerd_config()),
        (
            "/etc/cni/net.d/10-bridge.conf",
            render::bridge_conf(&worker.pod_cidr),
        ),
        ("/etc/cni/net.d/99-loopback.conf", render::loopback_conf()),
        (
            "/var/lib/kubelet/kubelet-config.yaml",
            render::kubelet_config(config, worker),
        ),
        (
            "/var/lib/kube-proxy/kube-proxy-config.yaml",
            render::kube_proxy_config(config),
        ),
    ];
    for (path, content) in &configs {
        transport
            .copy_content(host, content.as_bytes(), path)
            .await
            .with_context(|| format!("failed to upload config {path} to {}", worker.name))?;
    }

    // Units for the runtime and both node agents
    let units = [
        ("containerd", render::containerd_unit()),
        ("kubelet", render::kubelet_unit(worker)),
        ("kube-proxy", render::kube_proxy_unit()),
    ];
    for (name, content) in &units {
        transport
            .copy_content(
                host,
                content.as_bytes(),
                &format!("/etc/systemd/system/{name}.service"),
            )
            .await
            .with_context(|| format!("failed to upload {name} service to {}", worker.name))?;
    }

    let start_commands = [
        "sudo systemctl daemon-reload",
        "sudo systemctl enable containerd kubelet kube-proxy",
        "sudo systemctl start containerd kubelet kube-proxy",
    ];
    for command in start_commands {
        transport.execute(host, command).await.with_context(|| {
            format!("failed to execute start command '{command}' on {}", worker.name)
        })?;
    }

    info!(node = %worker.name, "worker node setup completed");
    Ok(())
}
