//! SSH transport over the OpenSSH client
//!
//! Each call spawns one `ssh` invocation: one dial per call, no pooling.
//! Public-key authentication only (`BatchMode=yes` forbids prompts). The
//! child is spawned with `kill_on_drop`, so cancelling the in-flight
//! future kills the local client and with it the channel carrying the
//! remote command.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

use super::{Transport, TransportError};

/// Default SSH port used when the host string carries none
const DEFAULT_PORT: u16 = 22;

/// TCP connect / handshake deadline passed to the client
const DIAL_TIMEOUT: Duration = Duration::from_secs(30);

/// Default soft timeout for `execute` calls
const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(30);

/// [`Transport`] implementation driving the OpenSSH client binary
#[derive(Debug, Clone)]
pub struct SshTransport {
    user: String,
    key_path: PathBuf,
    verify_host_keys: bool,
    command_timeout: Option<Duration>,
}

impl SshTransport {
    /// Create a transport authenticating as `user` with the given private key
    ///
    /// Host-key verification is off by default (lab mode); enable it with
    /// [`SshTransport::with_host_key_verification`].
    pub fn new(user: impl Into<String>, key_path: impl Into<PathBuf>) -> Result<Self, TransportError> {
        let key_path = key_path.into();
        if !key_path.exists() {
            return Err(TransportError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("SSH key file {} does not exist", key_path.display()),
            )));
        }
        Ok(Self {
            user: user.into(),
            key_path,
            verify_host_keys: false,
            command_timeout: Some(DEFAULT_COMMAND_TIMEOUT),
        })
    }

    /// Enable or disable host-key verification (`accept-new` vs `no`)
    pub fn with_host_key_verification(mut self, verify: bool) -> Self {
        self.verify_host_keys = verify;
        self
    }

    /// Override the soft timeout applied to `execute` calls
    ///
    /// `None` disables the timeout; long-running remote steps (package
    /// installs, large downloads) need more than the 30 s default.
    pub fn with_command_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.command_timeout = timeout;
        self
    }

    fn ssh_command(&self, host: &str) -> Command {
        let (host, port) = split_host_port(host);
        let strict = if self.verify_host_keys {
            "StrictHostKeyChecking=accept-new"
        } else {
            "StrictHostKeyChecking=no"
        };
        let mut cmd = Command::new("ssh");
        cmd.arg("-i")
            .arg(&self.key_path)
            .arg("-o")
            .arg("BatchMode=yes")
            .arg("-o")
            .arg(format!("ConnectTimeout={}", DIAL_TIMEOUT.as_secs()))
            .arg("-o")
            .arg(strict)
            .arg("-p")
            .arg(port.to_string())
            .arg(format!("{}@{}", self.user, host))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }

    /// Spawn one ssh session running `remote_command`, optionally feeding
    /// `stdin` to it, and classify the outcome.
    async fn run_session(
        &self,
        host: &str,
        remote_command: &str,
        stdin: Option<&[u8]>,
        timeout: Option<Duration>,
    ) -> Result<String, TransportError> {
        debug!(host, command = remote_command, "running remote command");
        let mut cmd = self.ssh_command(host);
        cmd.arg(remote_command);
        if stdin.is_some() {
            cmd.stdin(Stdio::piped());
        }

        let mut child = cmd.spawn()?;
        if let Some(bytes) = stdin {
            // Take the pipe out so it closes (EOF) once the write finishes.
            let mut pipe = child.stdin.take().ok_or_else(|| {
                TransportError::Io(std::io::Error::other("child stdin not captured"))
            })?;
            pipe.write_all(bytes).await?;
            pipe.shutdown().await?;
            drop(pipe);
        }

        let output = match timeout {
            Some(limit) => tokio::time::timeout(limit, child.wait_with_output())
                .await
                .map_err(|_| TransportError::Timeout {
                    host: host.to_string(),
                    command: remote_command.to_string(),
                    timeout: limit,
                })??,
            None => child.wait_with_output().await?,
        };

        classify(host, remote_command, output)
    }
}

#[async_trait]
impl Transport for SshTransport {
    async fn execute(&self, host: &str, command: &str) -> Result<String, TransportError> {
        self.run_session(host, command, None, self.command_timeout)
            .await
    }

    async fn copy_file(
        &self,
        host: &str,
        local_path: &Path,
        remote_path: &str,
    ) -> Result<(), TransportError> {
        let content = tokio::fs::read(local_path).await?;
        self.copy_content(host, &content, remote_path).await
    }

    async fn copy_content(
        &self,
        host: &str,
        content: &[u8],
        remote_path: &str,
    ) -> Result<(), TransportError> {
        // Two sessions: one writes the bytes, one fixes the mode. A session
        // runs exactly one remote command.
        self.run_session(
            host,
            &format!("sudo tee {remote_path} > /dev/null"),
            Some(content),
            None,
        )
        .await?;
        self.run_session(
            host,
            &format!("sudo chmod 644 {remote_path}"),
            None,
            self.command_timeout,
        )
        .await?;
        Ok(())
    }
}

/// Split an optional `:port` suffix off a host string
fn split_host_port(host: &str) -> (&str, u16) {
    match host.rsplit_once(':') {
        Some((name, port)) => match port.parse() {
            Ok(port) => (name, port),
            Err(_) => (host, DEFAULT_PORT),
        },
        None => (host, DEFAULT_PORT),
    }
}

/// Map an ssh client outcome onto the transport error taxonomy
///
/// The OpenSSH client reserves exit status 255 for its own failures
/// (connect, handshake, authentication); everything else is the remote
/// command's status.
fn classify(
    host: &str,
    command: &str,
    output: std::process::Output,
) -> Result<String, TransportError> {
    if output.status.success() {
        return Ok(String::from_utf8_lossy(&output.stdout).into_owned());
    }
    let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
    let status = output.status.code().unwrap_or(-1);
    if status == 255 {
        if stderr.contains("Permission denied") {
            return Err(TransportError::Auth {
                host: host.to_string(),
                detail: stderr,
            });
        }
        return Err(TransportError::Unreachable {
            host: host.to_string(),
            detail: stderr,
        });
    }
    Err(TransportError::Exec {
        command: command.to_string(),
        status,
        stderr,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::process::ExitStatusExt;
    use std::process::{ExitStatus, Output};

    fn output(code: i32, stdout: &str, stderr: &str) -> Output {
        Output {
            status: ExitStatus::from_raw(code << 8),
            stdout: stdout.as_bytes().to_vec(),
            stderr: stderr.as_bytes().to_vec(),
        }
    }

    #[test]
    fn host_without_port_defaults_to_22() {
        assert_eq!(split_host_port("10.240.0.10"), ("10.240.0.10", 22));
    }

    #[test]
    fn host_with_port_is_split() {
        assert_eq!(split_host_port("10.240.0.10:2222"), ("10.240.0.10", 2222));
    }

    #[test]
    fn malformed_port_falls_back_to_default() {
        assert_eq!(split_host_port("host:with:junk"), ("host:with:junk", 22));
    }

    #[test]
    fn success_returns_stdout() {
        let result = classify("h", "echo hi", output(0, "hi\n", ""));
        assert_eq!(result.unwrap(), "hi\n");
    }

    #[test]
    fn nonzero_exit_is_exec_error_with_stderr() {
        let err = classify("h", "systemctl start etcd", output(1, "", "unit not found"))
            .unwrap_err();
        match err {
            TransportError::Exec {
                command,
                status,
                stderr,
            } => {
                assert_eq!(command, "systemctl start etcd");
                assert_eq!(status, 1);
                assert_eq!(stderr, "unit not found");
            }
            other => panic!("expected Exec, got {other:?}"),
        }
    }

    #[test]
    fn status_255_with_permission_denied_is_auth() {
        let err = classify(
            "h",
            "true",
            output(255, "", "ubuntu@h: Permission denied (publickey)."),
        )
        .unwrap_err();
        assert!(matches!(err, TransportError::Auth { .. }));
    }

    #[test]
    fn status_255_otherwise_is_unreachable() {
        let err = classify(
            "h",
            "true",
            output(255, "", "ssh: connect to host h port 22: Connection refused"),
        )
        .unwrap_err();
        assert!(matches!(err, TransportError::Unreachable { .. }));
    }

    #[test]
    fn missing_key_file_rejected_at_construction() {
        let err = SshTransport::new("ubuntu", "/nonexistent/key.pem").unwrap_err();
        assert!(err.to_string().contains("does not exist"));
    }

    #[test]
    fn builder_options_are_applied() {
        let dir = tempfile::tempdir().unwrap();
        let key = dir.path().join("id_ed25519");
        std::fs::write(&key, "fake key material").unwrap();

        let transport = SshTransport::new("ubuntu", &key)
            .unwrap()
            .with_host_key_verification(true)
            .with_command_timeout(None);
        assert!(transport.verify_host_keys);
        assert!(transport.command_timeout.is_none());
    }
}
