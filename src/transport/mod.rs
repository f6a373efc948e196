//! Remote execution fabric
//!
//! Every higher layer talks to remote hosts through the [`Transport`]
//! contract: run a command, or stream bytes into a remote file. The
//! production implementation ([`SshTransport`]) drives the OpenSSH client;
//! tests substitute recording fakes or mocks.
//!
//! # Semantics
//!
//! - `execute` runs the command through the remote login shell and returns
//!   stdout. A non-zero exit surfaces as [`TransportError::Exec`] carrying
//!   the exit status and stderr.
//! - `copy_file` / `copy_content` write the destination with root
//!   privileges (the remote account must have passwordless sudo) and leave
//!   it at mode 0644. Writing and mode fix-up use two independent remote
//!   sessions, since a session runs exactly one command.
//! - The transport never retries; retry policy belongs to callers.

mod ssh;

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use thiserror::Error;

pub use ssh::SshTransport;

/// Errors surfaced by transport operations
#[derive(Debug, Error)]
pub enum TransportError {
    /// TCP connect or SSH handshake failed
    #[error("host {host} unreachable: {detail}")]
    Unreachable {
        /// The host that could not be reached
        host: String,
        /// Client diagnostics (stderr of the ssh client)
        detail: String,
    },

    /// The host rejected the offered key
    #[error("authentication to {host} failed: {detail}")]
    Auth {
        /// The host that rejected the credential
        host: String,
        /// Client diagnostics
        detail: String,
    },

    /// The remote command exited non-zero
    #[error("command '{command}' exited with status {status}: {stderr}")]
    Exec {
        /// The command that failed
        command: String,
        /// Remote exit status
        status: i32,
        /// Captured stderr
        stderr: String,
    },

    /// The per-call soft timeout elapsed
    #[error("command '{command}' on {host} timed out after {timeout:?}")]
    Timeout {
        /// Target host
        host: String,
        /// The command that was cut off
        command: String,
        /// The deadline that elapsed
        timeout: Duration,
    },

    /// Local read or pipe failure
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Command and file transport to a remote host
///
/// Implementations are safe for concurrent use; two concurrent calls
/// against the same host share no session state.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait Transport: Send + Sync {
    /// Run `command` on `host` and return its stdout
    ///
    /// A host string without a port defaults to port 22.
    async fn execute(&self, host: &str, command: &str) -> Result<String, TransportError>;

    /// Stream a local file to `remote_path` on `host` (mode 0644, root-owned)
    async fn copy_file(
        &self,
        host: &str,
        local_path: &Path,
        remote_path: &str,
    ) -> Result<(), TransportError>;

    /// Stream in-memory bytes to `remote_path` on `host` (mode 0644, root-owned)
    async fn copy_content(
        &self,
        host: &str,
        content: &[u8],
        remote_path: &str,
    ) -> Result<(), TransportError>;
}
