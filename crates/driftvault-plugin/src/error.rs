//! Plugin error types.
//!
//! Defines [`PluginError`], the unified error type for plugin dispatch,
//! process supervision, and forwarded capability calls. The supervision
//! layer never retries on its own: every variant is surfaced to the caller,
//! and retry/backoff policy belongs to the orchestration layer above.

use thiserror::Error;

use crate::kind::PluginKey;

/// Errors produced by plugin operations.
#[derive(Debug, Error)]
pub enum PluginError {
    /// The plugin child process failed to start or complete its handshake.
    /// Fatal to that restart attempt; retried on the next `ensure_live`.
    #[error("plugin launch failed: {0}")]
    Launch(String),

    /// Dispensing a client stub for a key failed (unknown kind on the
    /// plugin side, or the dispense RPC itself failed).
    #[error("dispense failed for {key}: {reason}")]
    Dispense {
        /// Key being dispensed.
        key: PluginKey,
        /// Failure detail from the transport or the plugin.
        reason: String,
    },

    /// No proxy ever registered this key with the supervisor.
    #[error("unknown plugin key: {0}")]
    UnknownKey(PluginKey),

    /// The key is registered but has not been dispensed for the current
    /// process generation.
    #[error("plugin {0} not dispensed for the current generation")]
    NotDispensed(PluginKey),

    /// The restart protocol failed partway. The supervisor remains
    /// retryable: the next `ensure_live` picks up from a safe state.
    #[error("plugin process restart failed: {0}")]
    Restart(String),

    /// `init` was called more than once on the same proxy instance.
    #[error("plugin {0} is already initialized")]
    AlreadyInitialized(PluginKey),

    /// A restart tried to replay configuration for a key that was
    /// registered but never initialized.
    #[error("plugin {0} has no stored configuration to replay")]
    Reinitialize(PluginKey),

    /// A second proxy tried to register an already-registered key.
    #[error("plugin key already registered: {0}")]
    DuplicateKey(PluginKey),

    /// The supervisor was shut down; no further calls are possible.
    #[error("plugin process supervisor is stopped")]
    Stopped,

    /// A context-aware call was cancelled by its caller.
    #[error("plugin call cancelled")]
    Cancelled,

    /// RPC transport failure (broken pipe, timeout, dead process).
    #[error("plugin transport error: {0}")]
    Transport(String),

    /// The plugin returned an RPC-level error or a malformed response.
    #[error("plugin protocol error: {0}")]
    Protocol(String),

    /// Underlying I/O error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization / deserialization error.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Convenience alias for results in the plugin crates.
pub type Result<T> = std::result::Result<T, PluginError>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kind::PluginKind;

    fn key() -> PluginKey {
        PluginKey::new(PluginKind::ObjectStore, "aws")
    }

    #[test]
    fn error_display() {
        let err = PluginError::Launch("exec not found".into());
        assert_eq!(err.to_string(), "plugin launch failed: exec not found");

        let err = PluginError::Dispense {
            key: key(),
            reason: "unknown kind".into(),
        };
        assert_eq!(
            err.to_string(),
            "dispense failed for object_store/aws: unknown kind"
        );

        let err = PluginError::UnknownKey(key());
        assert_eq!(err.to_string(), "unknown plugin key: object_store/aws");

        let err = PluginError::AlreadyInitialized(key());
        assert_eq!(
            err.to_string(),
            "plugin object_store/aws is already initialized"
        );

        let err = PluginError::Reinitialize(key());
        assert_eq!(
            err.to_string(),
            "plugin object_store/aws has no stored configuration to replay"
        );

        let err = PluginError::Stopped;
        assert_eq!(err.to_string(), "plugin process supervisor is stopped");
    }

    #[test]
    fn error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "pipe closed");
        let err: PluginError = io_err.into();
        assert!(matches!(err, PluginError::Io(_)));
    }

    #[test]
    fn error_from_json() {
        let json_err = serde_json::from_str::<serde_json::Value>("{bad").unwrap_err();
        let err: PluginError = json_err.into();
        assert!(matches!(err, PluginError::Json(_)));
    }
}
