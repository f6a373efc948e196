//! Error types for the bootstrapper

use std::time::Duration;

use thiserror::Error;

use crate::pki::PkiError;
use crate::transport::TransportError;

/// Main error type for cluster operations
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Configuration or input validation error
    #[error("validation error: {0}")]
    Validation(String),

    /// Remote execution or file transfer error
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// Certificate issuance error
    #[error(transparent)]
    Pki(#[from] PkiError),

    /// A systemd unit failed its health gate
    #[error("service {unit} did not become healthy within {timeout:?}")]
    Unhealthy {
        /// The unit that never reported `active`
        unit: String,
        /// The deadline that elapsed
        timeout: Duration,
    },

    /// Local filesystem error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// A lower-level error wrapped with phase or step context
    #[error("{context}: {source}")]
    Context {
        /// What the caller was doing when the inner error surfaced
        context: String,
        /// The wrapped error
        #[source]
        source: Box<Error>,
    },
}

impl Error {
    /// Create a validation error with the given message
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Create a health-gate error for the given unit and deadline
    pub fn unhealthy(unit: impl Into<String>, timeout: Duration) -> Self {
        Self::Unhealthy {
            unit: unit.into(),
            timeout,
        }
    }

    /// Wrap this error with caller context
    pub fn context(self, context: impl Into<String>) -> Self {
        Self::Context {
            context: context.into(),
            source: Box::new(self),
        }
    }

    /// Walk the context chain down to the root cause
    pub fn root_cause(&self) -> &Error {
        match self {
            Error::Context { source, .. } => source.root_cause(),
            other => other,
        }
    }
}

/// Extension trait for wrapping errors with context while propagating with `?`
pub(crate) trait ErrorContext<T> {
    /// Wrap the error value with a fixed context string
    fn context(self, context: &str) -> Result<T, Error>;

    /// Wrap the error value with a lazily built context string
    fn with_context<F: FnOnce() -> String>(self, f: F) -> Result<T, Error>;
}

impl<T, E: Into<Error>> ErrorContext<T> for Result<T, E> {
    fn context(self, context: &str) -> Result<T, Error> {
        self.map_err(|e| e.into().context(context))
    }

    fn with_context<F: FnOnce() -> String>(self, f: F) -> Result<T, Error> {
        self.map_err(|e| e.into().context(f()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_error_carries_message() {
        let err = Error::validation("cluster_name is required");
        assert!(err.to_string().contains("validation error"));
        assert!(err.to_string().contains("cluster_name is required"));
    }

    #[test]
    fn context_wraps_and_preserves_root_cause() {
        let err = Error::unhealthy("etcd", Duration::from_secs(30))
            .context("failed to setup control plane");

        let msg = err.to_string();
        assert!(msg.starts_with("failed to setup control plane: "));
        assert!(msg.contains("etcd"));

        match err.root_cause() {
            Error::Unhealthy { unit, timeout } => {
                assert_eq!(unit, "etcd");
                assert_eq!(*timeout, Duration::from_secs(30));
            }
            other => panic!("expected Unhealthy root cause, got {other:?}"),
        }
    }

    #[test]
    fn nested_context_reads_outside_in() {
        let err = Error::validation("bad")
            .context("inner step")
            .context("outer phase");
        assert_eq!(
            err.to_string(),
            "outer phase: inner step: validation error: bad"
        );
    }

    #[test]
    fn transport_errors_convert() {
        let inner = TransportError::Unreachable {
            host: "10.240.0.10".into(),
            detail: "connection refused".into(),
        };
        let err: Error = inner.into();
        assert!(matches!(err, Error::Transport(_)));
        assert!(err.to_string().contains("10.240.0.10"));
    }

    // ==========================================================================
    // Story Tests: Error Propagation in Cluster Operations
    // ==========================================================================
    //
    // These tests demonstrate how errors flow through the pipeline. Each
    // error kind implies a different handling policy: validation and PKI
    // errors are fatal, transport errors are fatal for setup but tolerated
    // during teardown.

    /// Story: Errors are categorized for proper handling in the orchestrator
    ///
    /// Setup treats every failure as fatal, but teardown must distinguish
    /// an unreachable node (skip it) from a failed cleanup command
    /// (continue), even after phase context has been wrapped around the
    /// original error.
    #[test]
    fn story_error_categorization_for_teardown_handling() {
        fn is_transport(err: &Error) -> bool {
            matches!(err.root_cause(), Error::Transport(_))
        }

        // Scenario: a unit fails to start during control-plane setup
        let wrapped = Error::from(TransportError::Exec {
            command: "systemctl start etcd".into(),
            status: 1,
            stderr: "unit not found".into(),
        })
        .context("failed to setup control plane");

        // The transport origin stays visible through the wrapping
        assert!(is_transport(&wrapped));

        // Scenario: a bad config is a user error, not a transport problem
        assert!(!is_transport(&Error::validation("nope")));
    }
}
