//! Setup orchestrator
//!
//! [`ClusterManager`] drives the phased pipeline that turns empty Linux
//! hosts into a Kubernetes cluster:
//!
//! ```text
//! Start → Prereq → PKI → Config → Controller → Workers → Network → Validate → Done
//!                                                                  ↘ failure (any step)
//! ```
//!
//! Phases are strictly sequential on a single driver task. On error the
//! orchestrator stops where it is: the cluster is left in whatever state
//! the last successful action produced, and the wrapped error is returned.
//! [`ClusterManager::destroy_cluster`] is the best-effort inverse.

mod control_plane;
mod health;
mod worker;

use std::fmt;
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use crate::config::ClusterConfig;
use crate::error::{Error, ErrorContext};
use crate::pki::CertificateIssuer;
use crate::progress::ProgressReporter;
use crate::render::{self, DownloadSources};
use crate::transport::{Transport, TransportError};

/// Total steps reported at phase boundaries
///
/// Seven logical phases exist but Validate shares step 6 with Network, so
/// the reported denominator stays at 6.
pub const TOTAL_STEPS: usize = 6;

/// Path of the admin kubeconfig on the controller, used for kubectl calls
const ADMIN_KUBECONFIG: &str = "/var/lib/kubernetes/admin.kubeconfig";

/// Client certificate principals issued for the control plane
const CONTROL_PLANE_PRINCIPALS: [&str; 5] = [
    "admin",
    "kube-controller-manager",
    "kube-proxy",
    "kube-scheduler",
    "service-account",
];

/// Units stopped and removed during teardown, in stop order
const MANAGED_UNITS: &str =
    "etcd kube-apiserver kube-controller-manager kube-scheduler containerd kubelet kube-proxy";

/// The orchestrator's phases, in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// SSH connectivity check and work directory creation
    Prereq,
    /// CA and leaf certificate generation
    Pki,
    /// Encryption config and kubeconfig rendering
    Config,
    /// Control-plane provisioning
    Controller,
    /// Worker provisioning
    Workers,
    /// Pod routing mesh and cluster DNS
    Network,
    /// kubectl smoke checks and the test workload
    Validate,
}

impl Phase {
    /// All phases in execution order
    pub const ALL: [Phase; 7] = [
        Phase::Prereq,
        Phase::Pki,
        Phase::Config,
        Phase::Controller,
        Phase::Workers,
        Phase::Network,
        Phase::Validate,
    ];

    /// The step index reported for this phase (Validate shares Network's)
    pub fn step(self) -> usize {
        match self {
            Phase::Prereq => 1,
            Phase::Pki => 2,
            Phase::Config => 3,
            Phase::Controller => 4,
            Phase::Workers => 5,
            Phase::Network | Phase::Validate => 6,
        }
    }

    /// Human-readable phase name used in progress events
    pub fn name(self) -> &'static str {
        match self {
            Phase::Prereq => "Checking Prerequisites",
            Phase::Pki => "Generating Certificates",
            Phase::Config => "Creating Configurations",
            Phase::Controller => "Setting Up Control Plane",
            Phase::Workers => "Setting Up Worker Nodes",
            Phase::Network => "Setting Up Networking",
            Phase::Validate => "Validating Cluster",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Raw kubectl captures describing the cluster
#[derive(Debug, Clone, Default)]
pub struct ClusterStatus {
    /// `kubectl get nodes` output
    pub nodes: String,
    /// `kubectl get pods -n kube-system` output
    pub pod_status: String,
    /// `kubectl get deployment test-deployment` output
    pub test_status: String,
}

/// Orchestrates cluster setup, teardown, and status queries
pub struct ClusterManager {
    config: ClusterConfig,
    transport: Arc<dyn Transport>,
    issuer: Arc<dyn CertificateIssuer>,
    progress: Arc<dyn ProgressReporter>,
    sources: DownloadSources,
    settle_delay: Duration,
}

impl ClusterManager {
    /// Create a manager over the given collaborators
    pub fn new(
        config: ClusterConfig,
        transport: Arc<dyn Transport>,
        issuer: Arc<dyn CertificateIssuer>,
        progress: Arc<dyn ProgressReporter>,
    ) -> Self {
        Self {
            config,
            transport,
            issuer,
            progress,
            sources: DownloadSources::default(),
            settle_delay: Duration::from_secs(30),
        }
    }

    /// Override the download locations (e.g. an internal mirror)
    pub fn with_sources(mut self, sources: DownloadSources) -> Self {
        self.sources = sources;
        self
    }

    fn enter(&self, phase: Phase) {
        info!(phase = %phase, "entering phase");
        self.progress.report(phase.step(), TOTAL_STEPS, phase.name());
    }

    /// Run the full setup pipeline
    pub async fn setup_cluster(&self) -> Result<(), Error> {
        self.enter(Phase::Prereq);
        self.check_prerequisites()
            .await
            .context("prerequisites check failed")?;

        self.enter(Phase::Pki);
        self.generate_certificates()
            .context("failed to generate certificates")?;

        self.enter(Phase::Config);
        self.create_configurations()
            .context("failed to create configurations")?;

        self.enter(Phase::Controller);
        control_plane::provision(
            self.transport.as_ref(),
            &self.config,
            &self.sources,
            &self.config.work_dir,
        )
        .await
        .context("failed to setup control plane")?;

        self.enter(Phase::Workers);
        self.setup_workers()
            .await
            .context("failed to setup worker nodes")?;

        self.enter(Phase::Network);
        self.setup_networking()
            .await
            .context("failed to setup networking")?;

        self.enter(Phase::Validate);
        self.validate_cluster()
            .await
            .context("failed to validate cluster")?;

        info!("cluster setup completed");
        Ok(())
    }

    /// Verify SSH reachability of every node and create the work directory
    async fn check_prerequisites(&self) -> Result<(), Error> {
        for node in self.config.nodes() {
            self.transport
                .execute(&node.ip_address, "echo 'SSH test'")
                .await
                .with_context(|| format!("SSH connection to {} failed", node.name))?;
            info!(node = %node.name, "SSH connection verified");
        }

        fs::create_dir_all(&self.config.work_dir)?;
        fs::set_permissions(&self.config.work_dir, fs::Permissions::from_mode(0o755))?;
        Ok(())
    }

    /// Issue the CA, the client certificates, and the API server cert
    fn generate_certificates(&self) -> Result<(), Error> {
        let dir = &self.config.work_dir;
        let profile = &self.config.certificates;

        self.issuer
            .generate_ca(dir, profile)
            .context("failed to generate CA")?;

        let mut clients: Vec<String> = CONTROL_PLANE_PRINCIPALS
            .iter()
            .map(|s| s.to_string())
            .collect();
        clients.extend(self.config.workers.iter().map(|w| w.name.clone()));
        for name in &clients {
            self.issuer
                .generate_client_cert(dir, name, profile)
                .with_context(|| format!("failed to generate client certificate for {name}"))?;
        }

        // Loopback, the first service IP, the controller itself, and the
        // in-cluster service names.
        let server_hosts = vec![
            "127.0.0.1".to_string(),
            "10.32.0.1".to_string(),
            self.config.controller.ip_address.clone(),
            self.config.controller.hostname.clone(),
            "kubernetes".to_string(),
            "kubernetes.default".to_string(),
            "kubernetes.default.svc".to_string(),
            "kubernetes.default.svc.cluster".to_string(),
            "kubernetes.default.svc.cluster.local".to_string(),
        ];
        self.issuer
            .generate_server_cert(dir, "kubernetes", &server_hosts, profile)
            .context("failed to generate server certificate")?;

        info!("all certificates generated");
        Ok(())
    }

    /// Render the encryption config and every kubeconfig into the work dir
    fn create_configurations(&self) -> Result<(), Error> {
        let dir = &self.config.work_dir;

        let key = render::encryption_key();
        fs::write(
            dir.join("encryption-config.yaml"),
            render::encryption_config(&key),
        )
        .context("failed to create encryption config")?;

        // Workers point at their own address (see DESIGN.md); control-plane
        // principals point at the controller.
        for worker in &self.config.workers {
            self.write_kubeconfig(&worker.name, &worker.ip_address)?;
        }
        for name in ["kube-proxy", "kube-controller-manager", "kube-scheduler", "admin"] {
            self.write_kubeconfig(name, &self.config.controller.ip_address)?;
        }

        info!("all configurations created");
        Ok(())
    }

    fn write_kubeconfig(&self, name: &str, server_ip: &str) -> Result<(), Error> {
        let dir = &self.config.work_dir;
        let rendered = render::kubeconfig(&self.config, dir, name, server_ip);
        fs::write(dir.join(format!("{name}.kubeconfig")), rendered)
            .with_context(|| format!("failed to generate kubeconfig for {name}"))
    }

    /// Provision every worker, in fleet order
    async fn setup_workers(&self) -> Result<(), Error> {
        for node in &self.config.workers {
            worker::provision(
                self.transport.as_ref(),
                &self.config,
                &self.sources,
                &self.config.work_dir,
                node,
            )
            .await
            .with_context(|| format!("failed to setup worker {}", node.name))?;
        }
        info!("all worker nodes setup completed");
        Ok(())
    }

    /// Wire the static pod-route mesh and deploy CoreDNS
    async fn setup_networking(&self) -> Result<(), Error> {
        // Full mesh of static routes: every worker learns every other
        // worker's pod subnet. The controller gets no routes.
        for node in &self.config.workers {
            for other in &self.config.workers {
                if node.name == other.name {
                    continue;
                }
                let command = format!(
                    "sudo ip route add {} via {} || true",
                    other.pod_cidr, other.ip_address
                );
                self.transport
                    .execute(&node.ip_address, &command)
                    .await
                    .with_context(|| format!("failed to add route on {}", node.name))?;
            }
        }

        let controller = &self.config.controller.ip_address;
        let manifest = render::coredns_manifest(&self.config);
        self.transport
            .copy_content(controller, manifest.as_bytes(), "/tmp/coredns.yaml")
            .await
            .context("failed to upload CoreDNS manifest")?;
        self.transport
            .execute(
                controller,
                &format!("kubectl apply -f /tmp/coredns.yaml --kubeconfig {ADMIN_KUBECONFIG}"),
            )
            .await
            .context("failed to apply CoreDNS manifest")?;

        info!("networking setup completed");
        Ok(())
    }

    /// Smoke-check the cluster and deploy the test workload
    async fn validate_cluster(&self) -> Result<(), Error> {
        let controller = &self.config.controller.ip_address;

        let nodes = self
            .transport
            .execute(
                controller,
                &format!("kubectl get nodes --kubeconfig {ADMIN_KUBECONFIG}"),
            )
            .await
            .context("failed to get node status")?;
        info!(status = %nodes.trim(), "node status");

        let pods = self
            .transport
            .execute(
                controller,
                &format!("kubectl get pods -n kube-system --kubeconfig {ADMIN_KUBECONFIG}"),
            )
            .await
            .context("failed to get system pods")?;
        info!(status = %pods.trim(), "system pods");

        self.transport
            .copy_content(
                controller,
                render::test_app_manifest().as_bytes(),
                "/tmp/test-app.yaml",
            )
            .await
            .context("failed to upload test app")?;
        self.transport
            .execute(
                controller,
                &format!("kubectl apply -f /tmp/test-app.yaml --kubeconfig {ADMIN_KUBECONFIG}"),
            )
            .await
            .context("failed to apply test app")?;

        // Give the scheduler a chance to place the replicas before asking.
        tokio::time::sleep(self.settle_delay).await;

        let test = self
            .transport
            .execute(
                controller,
                &format!("kubectl get deployment test-deployment --kubeconfig {ADMIN_KUBECONFIG}"),
            )
            .await
            .context("failed to get test app status")?;
        info!(status = %test.trim(), "test application status");

        info!("cluster validation completed");
        Ok(())
    }

    /// Tear the cluster down, best effort
    ///
    /// Every cleanup command is suffixed `|| true`; command failures are
    /// logged and skipped, and an unreachable node is skipped entirely.
    /// Finishes by removing the local work directory.
    pub async fn destroy_cluster(&self) -> Result<(), Error> {
        info!("destroying cluster");

        for node in self.config.nodes() {
            info!(node = %node.name, "cleaning up node");
            for command in teardown_commands() {
                match self.transport.execute(&node.ip_address, &command).await {
                    Ok(_) => {}
                    Err(e @ (TransportError::Unreachable { .. } | TransportError::Auth { .. })) => {
                        warn!(node = %node.name, error = %e, "node unreachable during teardown, skipping");
                        break;
                    }
                    Err(e) => {
                        warn!(node = %node.name, command = %command, error = %e, "cleanup command failed, continuing");
                    }
                }
            }
        }

        if self.config.work_dir.exists() {
            fs::remove_dir_all(&self.config.work_dir)
                .context("failed to remove work directory")?;
        }

        info!("cluster destroyed");
        Ok(())
    }

    /// Capture the cluster state with kubectl on the controller
    pub async fn cluster_status(&self) -> Result<ClusterStatus, Error> {
        let controller = &self.config.controller.ip_address;

        let nodes = self
            .transport
            .execute(
                controller,
                &format!("kubectl get nodes --kubeconfig {ADMIN_KUBECONFIG}"),
            )
            .await
            .context("failed to get node status")?;
        let pod_status = self
            .transport
            .execute(
                controller,
                &format!("kubectl get pods -n kube-system --kubeconfig {ADMIN_KUBECONFIG}"),
            )
            .await
            .context("failed to get system pods")?;
        let test_status = self
            .transport
            .execute(
                controller,
                &format!("kubectl get deployment test-deployment --kubeconfig {ADMIN_KUBECONFIG}"),
            )
            .await
            .context("failed to get test app status")?;

        Ok(ClusterStatus {
            nodes,
            pod_status,
            test_status,
        })
    }
}

/// The best-effort cleanup sequence run on every node during teardown
fn teardown_commands() -> Vec<String> {
    vec![
        format!("sudo systemctl stop {MANAGED_UNITS} || true"),
        format!("sudo systemctl disable {MANAGED_UNITS} || true"),
        "sudo rm -rf /etc/etcd /var/lib/etcd /etc/kubernetes /var/lib/kubernetes /var/lib/kubelet /var/lib/kube-proxy /etc/cni /opt/cni /var/run/kubernetes || true"
            .to_string(),
        "sudo rm -f /usr/local/bin/etcd* /usr/local/bin/kube* /usr/local/bin/runc /bin/containerd* || true"
            .to_string(),
        "sudo rm -f /etc/systemd/system/etcd.service /etc/systemd/system/kube*.service /etc/systemd/system/containerd.service || true"
            .to_string(),
        "sudo systemctl daemon-reload || true".to_string(),
        "sudo systemctl reset-failed || true".to_string(),
    ]
}
