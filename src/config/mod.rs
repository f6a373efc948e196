//! Cluster configuration: loading, validation, and defaults
//!
//! The configuration is a YAML document describing the target fleet (one
//! controller, one or more workers), the component version pins, the
//! cluster networks, SSH credentials, and the certificate profile. It is
//! loaded once at startup, validated, and then shared immutably.

use std::fs;
use std::net::Ipv4Addr;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors surfaced while loading or validating the configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Reading the config file failed
    #[error("failed to read config file {path}: {source}")]
    Io {
        /// Path that could not be read or written
        path: PathBuf,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// The YAML did not parse into a cluster config
    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_yaml::Error),

    /// The parsed config violates an invariant
    #[error("{0}")]
    Validation(String),
}

/// A node in the fleet
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Node {
    /// Node name, unique within the cluster
    pub name: String,
    /// IP address the node is reachable at over SSH
    pub ip_address: String,
    /// Hostname, used in certificate SANs
    pub hostname: String,
    /// Pod subnet assigned to this worker; empty for the controller
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub pod_cidr: String,
}

/// Subject and validity parameters for issued certificates
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CertificateProfile {
    /// Subject country (C)
    pub country: String,
    /// Subject state or province (ST)
    pub state: String,
    /// Subject locality (L)
    pub city: String,
    /// Subject organization (O); also the CA common name
    pub organization: String,
    /// Subject organizational unit (OU)
    pub organizational_unit: String,
    /// CA validity in days
    pub validity_days: u32,
}

/// Declarative description of the cluster to bootstrap
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterConfig {
    /// Cluster name, embedded in kubeconfigs
    pub cluster_name: String,
    /// Kubernetes release tag (e.g. `v1.26.0`)
    pub kubernetes_version: String,
    /// etcd release tag (e.g. `v3.5.9`)
    pub etcd_version: String,
    /// containerd release tag (e.g. `1.7.2`)
    pub containerd_version: String,
    /// CNI plugins release tag (e.g. `v1.3.0`)
    pub cni_version: String,
    /// CoreDNS image tag (e.g. `1.10.1`)
    pub coredns_version: String,
    /// Aggregate pod CIDR; every per-worker subnet must lie inside it
    pub pod_cidr: String,
    /// Service CIDR for cluster-wide virtual IPs
    pub service_cidr: String,
    /// Cluster DNS service IP; must lie inside the service CIDR
    pub cluster_dns: String,
    /// Local scratch directory for PKI output and rendered artifacts
    pub work_dir: PathBuf,
    /// Path to the SSH private key used for all nodes
    pub ssh_key: PathBuf,
    /// SSH user with passwordless sudo on all nodes
    pub ssh_user: String,
    /// The control-plane node
    pub controller: Node,
    /// Worker nodes, in provisioning order
    pub workers: Vec<Node>,
    /// Certificate subject profile
    pub certificates: CertificateProfile,
}

impl ClusterConfig {
    /// Load a cluster configuration from a YAML file
    ///
    /// Validates every invariant and creates the work directory (0755)
    /// if it does not exist yet.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let data = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config: ClusterConfig = serde_yaml::from_str(&data)?;
        config.validate()?;
        config.ensure_work_dir()?;
        Ok(config)
    }

    /// Serialize the configuration back to a YAML file
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let path = path.as_ref();
        let data = serde_yaml::to_string(self)?;
        fs::write(path, data).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })
    }

    /// All nodes in fleet order: the controller first, then workers
    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        std::iter::once(&self.controller).chain(self.workers.iter())
    }

    /// Create the work directory with mode 0755 if absent
    pub fn ensure_work_dir(&self) -> Result<(), ConfigError> {
        fs::create_dir_all(&self.work_dir).map_err(|source| ConfigError::Io {
            path: self.work_dir.clone(),
            source,
        })?;
        fs::set_permissions(&self.work_dir, fs::Permissions::from_mode(0o755)).map_err(
            |source| ConfigError::Io {
                path: self.work_dir.clone(),
                source,
            },
        )
    }

    /// Validate every configuration invariant
    pub fn validate(&self) -> Result<(), ConfigError> {
        let required = [
            (self.cluster_name.as_str(), "cluster_name"),
            (self.kubernetes_version.as_str(), "kubernetes_version"),
            (self.etcd_version.as_str(), "etcd_version"),
            (self.containerd_version.as_str(), "containerd_version"),
            (self.cni_version.as_str(), "cni_version"),
            (self.coredns_version.as_str(), "coredns_version"),
            (self.pod_cidr.as_str(), "pod_cidr"),
            (self.service_cidr.as_str(), "service_cidr"),
            (self.cluster_dns.as_str(), "cluster_dns"),
            (self.ssh_user.as_str(), "ssh_user"),
        ];
        for (value, field) in required {
            if value.is_empty() {
                return Err(invalid(format!("{field} is required")));
            }
        }
        if self.work_dir.as_os_str().is_empty() {
            return Err(invalid("work_dir is required"));
        }
        if self.ssh_key.as_os_str().is_empty() {
            return Err(invalid("ssh_key is required"));
        }

        if self.controller.name.is_empty() || self.controller.ip_address.is_empty() {
            return Err(invalid("controller configuration is incomplete"));
        }
        if self.workers.is_empty() {
            return Err(invalid("at least one worker node is required"));
        }
        for worker in &self.workers {
            if worker.name.is_empty() || worker.ip_address.is_empty() || worker.pod_cidr.is_empty()
            {
                return Err(invalid(format!(
                    "worker {} configuration is incomplete",
                    worker.name
                )));
            }
        }

        let certs = &self.certificates;
        let cert_required = [
            (certs.country.as_str(), "certificates.country"),
            (certs.state.as_str(), "certificates.state"),
            (certs.city.as_str(), "certificates.city"),
            (certs.organization.as_str(), "certificates.organization"),
            (
                certs.organizational_unit.as_str(),
                "certificates.organizational_unit",
            ),
        ];
        for (value, field) in cert_required {
            if value.is_empty() {
                return Err(invalid(format!("{field} is required")));
            }
        }
        if certs.validity_days == 0 {
            return Err(invalid("certificates.validity_days must be positive"));
        }

        self.validate_fleet()?;
        self.validate_networks()
    }

    fn validate_fleet(&self) -> Result<(), ConfigError> {
        let mut names = std::collections::HashSet::new();
        for worker in &self.workers {
            if !names.insert(worker.name.as_str()) {
                return Err(invalid(format!(
                    "worker name {} is not unique",
                    worker.name
                )));
            }
            if worker.ip_address == self.controller.ip_address {
                return Err(invalid(format!(
                    "worker {} shares the controller address {}",
                    worker.name, self.controller.ip_address
                )));
            }
        }
        Ok(())
    }

    fn validate_networks(&self) -> Result<(), ConfigError> {
        let pod_cidr = Ipv4Cidr::parse(&self.pod_cidr)
            .map_err(|e| invalid(format!("pod_cidr: {e}")))?;
        let service_cidr = Ipv4Cidr::parse(&self.service_cidr)
            .map_err(|e| invalid(format!("service_cidr: {e}")))?;
        let dns: Ipv4Addr = self
            .cluster_dns
            .parse()
            .map_err(|_| invalid(format!("cluster_dns {} is not an IPv4 address", self.cluster_dns)))?;

        if !service_cidr.contains_ip(dns) {
            return Err(invalid(format!(
                "cluster_dns {} is outside the service CIDR {}",
                self.cluster_dns, self.service_cidr
            )));
        }

        let mut subnets: Vec<(&str, Ipv4Cidr)> = Vec::with_capacity(self.workers.len());
        for worker in &self.workers {
            let subnet = Ipv4Cidr::parse(&worker.pod_cidr)
                .map_err(|e| invalid(format!("worker {} pod_cidr: {e}", worker.name)))?;
            if !pod_cidr.contains(subnet) {
                return Err(invalid(format!(
                    "worker {} pod subnet {} is outside the aggregate pod CIDR {}",
                    worker.name, worker.pod_cidr, self.pod_cidr
                )));
            }
            for (other_name, other) in &subnets {
                if subnet.overlaps(*other) {
                    return Err(invalid(format!(
                        "worker pod subnets for {} and {} overlap",
                        worker.name, other_name
                    )));
                }
            }
            subnets.push((&worker.name, subnet));
        }
        Ok(())
    }

    /// A complete example configuration with sane defaults
    ///
    /// Intended as a starting point written out by `init-config`; the
    /// addresses match a three-worker lab on 10.240.0.0/24.
    pub fn default_config() -> Self {
        ClusterConfig {
            cluster_name: "my-cluster".into(),
            kubernetes_version: "v1.26.0".into(),
            etcd_version: "v3.5.9".into(),
            containerd_version: "1.7.2".into(),
            cni_version: "v1.3.0".into(),
            coredns_version: "1.10.1".into(),
            pod_cidr: "10.200.0.0/16".into(),
            service_cidr: "10.32.0.0/24".into(),
            cluster_dns: "10.32.0.10".into(),
            work_dir: PathBuf::from("/tmp/k8s-hard-way"),
            ssh_key: PathBuf::from("~/.ssh/id_rsa"),
            ssh_user: "ubuntu".into(),
            controller: Node {
                name: "controller-0".into(),
                ip_address: "10.240.0.10".into(),
                hostname: "controller-0".into(),
                pod_cidr: String::new(),
            },
            workers: vec![
                Node {
                    name: "worker-0".into(),
                    ip_address: "10.240.0.20".into(),
                    hostname: "worker-0".into(),
                    pod_cidr: "10.200.0.0/24".into(),
                },
                Node {
                    name: "worker-1".into(),
                    ip_address: "10.240.0.21".into(),
                    hostname: "worker-1".into(),
                    pod_cidr: "10.200.1.0/24".into(),
                },
                Node {
                    name: "worker-2".into(),
                    ip_address: "10.240.0.22".into(),
                    hostname: "worker-2".into(),
                    pod_cidr: "10.200.2.0/24".into(),
                },
            ],
            certificates: CertificateProfile {
                country: "US".into(),
                state: "California".into(),
                city: "San Francisco".into(),
                organization: "ExampleOrg".into(),
                organizational_unit: "IT".into(),
                validity_days: 365,
            },
        }
    }
}

fn invalid(msg: impl Into<String>) -> ConfigError {
    ConfigError::Validation(msg.into())
}

/// An IPv4 network in CIDR notation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Ipv4Cidr {
    network: u32,
    prefix: u8,
}

impl Ipv4Cidr {
    fn parse(s: &str) -> Result<Self, String> {
        let (addr, prefix) = s
            .split_once('/')
            .ok_or_else(|| format!("{s} is not in CIDR notation"))?;
        let addr: Ipv4Addr = addr
            .parse()
            .map_err(|_| format!("{addr} is not an IPv4 address"))?;
        let prefix: u8 = prefix
            .parse()
            .map_err(|_| format!("{prefix} is not a prefix length"))?;
        if prefix > 32 {
            return Err(format!("prefix length {prefix} exceeds 32"));
        }
        Ok(Ipv4Cidr {
            network: u32::from(addr) & Self::mask(prefix),
            prefix,
        })
    }

    fn mask(prefix: u8) -> u32 {
        if prefix == 0 {
            0
        } else {
            u32::MAX << (32 - prefix)
        }
    }

    fn contains_ip(self, ip: Ipv4Addr) -> bool {
        u32::from(ip) & Self::mask(self.prefix) == self.network
    }

    /// True when `other` is a subnet of (or equal to) this network
    fn contains(self, other: Ipv4Cidr) -> bool {
        self.prefix <= other.prefix && other.network & Self::mask(self.prefix) == self.network
    }

    fn overlaps(self, other: Ipv4Cidr) -> bool {
        self.contains(other) || other.contains(self)
    }
}
