//! Control-plane provisioning flow
//!
//! Brings up the controller node in dependency order: etcd first, then the
//! API server, then controller manager and scheduler, with a health gate
//! between each start.

use std::path::Path;
use std::time::Duration;

use tracing::info;

use crate::config::ClusterConfig;
use crate::error::{Error, ErrorContext};
use crate::render::{self, DownloadSources};
use crate::transport::Transport;

use super::health::wait_for_service;

const ETCD_GATE: Duration = Duration::from_secs(30);
const APISERVER_GATE: Duration = Duration::from_secs(60);
const COMPONENT_GATE: Duration = Duration::from_secs(30);

/// Provision the control plane on the controller node
pub(crate) async fn provision(
    transport: &dyn Transport,
    config: &ClusterConfig,
    sources: &DownloadSources,
    work_dir: &Path,
) -> Result<(), Error> {
    let controller = &config.controller;
    let host = controller.ip_address.as_str();
    info!(node = %controller.name, "setting up control plane");

    // etcd: directories, system user, release binaries
    let etcd_version = &config.etcd_version;
    let etcd_commands = [
        "sudo mkdir -p /etc/etcd /var/lib/etcd".to_string(),
        "sudo groupadd -f etcd".to_string(),
        "sudo useradd -g etcd -d /var/lib/etcd -s /sbin/nologin -c 'etcd user' etcd || true"
            .to_string(),
        "sudo chown -R etcd:etcd /var/lib/etcd".to_string(),
        format!(
            "wget -q --show-progress --https-only --timestamping '{}'",
            sources.etcd_tarball(etcd_version)
        ),
        format!("tar -xzf etcd-{etcd_version}-linux-amd64.tar.gz"),
        format!("sudo mv etcd-{etcd_version}-linux-amd64/etcd* /usr/local/bin/"),
        format!("rm -f etcd-{etcd_version}-linux-amd64.tar.gz"),
    ];
    for command in &etcd_commands {
        transport.execute(host, command).await.with_context(|| {
            format!("failed to execute etcd setup command '{command}' on controller")
        })?;
    }

    // etcd serving certificates, owned by the etcd user
    for file in ["ca.pem", "kubernetes-key.pem", "kubernetes.pem"] {
        let remote = format!("/etc/etcd/{file}");
        transport
            .copy_file(host, &work_dir.join(file), &remote)
            .await
            .with_context(|| format!("failed to copy {file} to controller"))?;
        transport
            .execute(host, &format!("sudo chown etcd:etcd {remote}"))
            .await
            .with_context(|| format!("failed to set ownership for {remote}"))?;
    }

    transport
        .copy_content(
            host,
            render::etcd_unit(controller).as_bytes(),
            "/etc/systemd/system/etcd.service",
        )
        .await
        .context("failed to upload etcd service")?;

    // Kubernetes control-plane binaries
    let version = &config.kubernetes_version;
    let k8s_commands = [
        "sudo mkdir -p /etc/kubernetes/config /var/lib/kubernetes".to_string(),
        format!(
            "wget -q --show-progress --https-only --timestamping '{}' '{}' '{}' '{}'",
            sources.kube_binary(version, "kube-apiserver"),
            sources.kube_binary(version, "kube-controller-manager"),
            sources.kube_binary(version, "kube-scheduler"),
            sources.kube_binary(version, "kubectl"),
        ),
        "chmod +x kube-apiserver kube-controller-manager kube-scheduler kubectl".to_string(),
        "sudo mv kube-apiserver kube-controller-manager kube-scheduler kubectl /usr/local/bin/"
            .to_string(),
    ];
    for command in &k8s_commands {
        transport.execute(host, command).await.with_context(|| {
            format!("failed to execute kubernetes setup command '{command}' on controller")
        })?;
    }

    // Certificates, encryption config, and kubeconfigs for the control plane.
    // admin.kubeconfig rides along so kubectl works on the controller during
    // the network and validation phases.
    let control_plane_files = [
        "ca.pem",
        "ca-key.pem",
        "kubernetes.pem",
        "kubernetes-key.pem",
        "service-account.pem",
        "service-account-key.pem",
        "encryption-config.yaml",
        "kube-controller-manager.kubeconfig",
        "kube-scheduler.kubeconfig",
        "admin.kubeconfig",
    ];
    for file in control_plane_files {
        transport
            .copy_file(
                host,
                &work_dir.join(file),
                &format!("/var/lib/kubernetes/{file}"),
            )
            .await
            .with_context(|| format!("failed to copy {file} to controller"))?;
    }

    let units = [
        ("kube-apiserver", render::kube_apiserver_unit(config)),
        (
            "kube-controller-manager",
            render::kube_controller_manager_unit(config),
        ),
        ("kube-scheduler", render::kube_scheduler_unit()),
    ];
    for (name, content) in &units {
        transport
            .copy_content(
                host,
                content.as_bytes(),
                &format!("/etc/systemd/system/{name}.service"),
            )
            .await
            .with_context(|| format!("failed to upload {name} service"))?;
    }

    // Start order matters: etcd, then the API server, then the rest, each
    // gated on health before the next start.
    transport
        .execute(
            host,
            "sudo systemctl daemon-reload && sudo systemctl enable etcd && sudo systemctl start etcd",
        )
        .await
        .context("failed to start etcd")?;
    wait_for_service(transport, host, "etcd", ETCD_GATE)
        .await
        .context("etcd failed to become healthy")?;

    transport
        .execute(
            host,
            "sudo systemctl enable kube-apiserver && sudo systemctl start kube-apiserver",
        )
        .await
        .context("failed to start kube-apiserver")?;
    wait_for_service(transport, host, "kube-apiserver", APISERVER_GATE)
        .await
        .context("kube-apiserver failed to become healthy")?;

    for service in ["kube-controller-manager", "kube-scheduler"] {
        transport
            .execute(
                host,
                &format!("sudo systemctl enable {service} && sudo systemctl start {service}"),
            )
            .await
            .with_context(|| format!("failed to start {service}"))?;
        wait_for_service(transport, host, service, COMPONENT_GATE)
            .await
            .with_context(|| format!("{service} failed to become healthy"))?;
    }

    info!("control plane setup completed");
    Ok(())
}
