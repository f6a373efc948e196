//! hardway - bare-metal Kubernetes cluster bootstrapper
//!
//! Given a declarative description of a fleet (one controller and N
//! workers reachable over SSH) and version pins for the control-plane
//! components, hardway provisions a working multi-node Kubernetes cluster
//! on otherwise empty Linux hosts: it generates a private PKI, renders
//! systemd units and component configs, installs binaries, starts services
//! in dependency order behind health gates, wires pod networking, deploys
//! cluster DNS, and validates the result.
//!
//! # Modules
//!
//! - [`config`] - Cluster configuration: YAML loading, validation, defaults
//! - [`transport`] - SSH command and file transport to the fleet
//! - [`pki`] - CA and leaf certificate issuance (ECDSA P-256, PEM)
//! - [`render`] - Pure renderers for units, kubeconfigs, and manifests
//! - [`cluster`] - The phased setup orchestrator, teardown, and status
//! - [`progress`] - Progress reporting seam for the orchestrator
//! - [`error`] - Error types
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use hardway::cluster::ClusterManager;
//! use hardway::config::ClusterConfig;
//! use hardway::pki::RcgenIssuer;
//! use hardway::progress::ConsoleReporter;
//! use hardway::transport::SshTransport;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let config = ClusterConfig::load("cluster.yaml")?;
//! let transport = SshTransport::new(config.ssh_user.as_str(), &config.ssh_key)?;
//! let manager = ClusterManager::new(
//!     config,
//!     Arc::new(transport),
//!     Arc::new(RcgenIssuer::new()),
//!     Arc::new(ConsoleReporter::new()),
//! );
//! manager.setup_cluster().await?;
//! # Ok(())
//! # }
//! ```

#![deny(missing_docs)]

pub mod cluster;
pub mod config;
pub mod error;
pub mod pki;
pub mod progress;
pub mod render;
pub mod transport;

pub use error::Error;

/// Result type alias using the crate error type
pub type Result<T> = std::result::Result<T, Error>;
