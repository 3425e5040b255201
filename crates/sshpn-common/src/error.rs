//! Error types for tunnel orchestration.
//!
//! Every layer of sshpn (CLI validation, fact queries, the state store and
//! shell execution) reports failures through [`TunnelError`]. Nothing is
//! retried: an error aborts the current lifecycle phase and the process
//! exits non-zero.

use std::io;
use thiserror::Error;

/// Result type alias for tunnel operations.
pub type TunnelResult<T> = Result<T, TunnelError>;

/// Errors that can occur while validating, orchestrating or applying a tunnel.
#[derive(Debug, Error)]
pub enum TunnelError {
    /// Failed to execute a shell command (spawn error).
    #[error("Failed to execute shell command '{command}': {source}")]
    ShellExec {
        /// The command that failed to execute.
        command: String,
        /// The underlying IO error.
        #[source]
        source: io::Error,
    },

    /// Shell command returned non-zero exit code.
    #[error("Shell command failed: '{command}' (exit code {exit_code}): {output}")]
    ShellCommandFailed {
        /// The command that failed.
        command: String,
        /// The exit code.
        exit_code: i32,
        /// Combined stdout/stderr output.
        output: String,
    },

    /// User supplied value failed validation.
    #[error("Invalid {field}: {message}")]
    InvalidInput {
        /// The field that failed validation.
        field: String,
        /// Error message.
        message: String,
    },

    /// Configuration file validation error.
    #[error("Invalid configuration for {field}: {message}")]
    InvalidConfig {
        /// The field that failed validation.
        field: String,
        /// Error message.
        message: String,
    },

    /// A remote or local fact could not be determined.
    #[error("Could not determine {fact}: {message}")]
    FactQuery {
        /// The fact being queried (e.g. "remote default device").
        fact: String,
        /// Error message.
        message: String,
    },

    /// Persisted tunnel state is absent.
    #[error("No persisted state for '{key}'; the tunnel cannot be cleaned up safely")]
    StateMissing {
        /// The state key.
        key: String,
    },

    /// Persisted tunnel state could not be read, written or removed.
    #[error("State store operation failed for '{key}': {source}")]
    State {
        /// The state key.
        key: String,
        /// The underlying IO error.
        #[source]
        source: io::Error,
    },

    /// The requested mode or option is an unimplemented extension point.
    #[error("{feature} is not yet supported")]
    NotSupported {
        /// Description of the unsupported feature.
        feature: String,
    },

    /// Internal error (unexpected state).
    #[error("Internal error: {message}")]
    Internal {
        /// Error message.
        message: String,
    },
}

impl TunnelError {
    /// Creates an invalid input error.
    pub fn invalid_input(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidInput {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Creates an invalid configuration error.
    pub fn invalid_config(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidConfig {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Creates a fact query error.
    pub fn fact_query(fact: impl Into<String>, message: impl Into<String>) -> Self {
        Self::FactQuery {
            fact: fact.into(),
            message: message.into(),
        }
    }

    /// Creates a missing state error.
    pub fn state_missing(key: impl Into<String>) -> Self {
        Self::StateMissing { key: key.into() }
    }

    /// Creates a not supported error.
    pub fn not_supported(feature: impl Into<String>) -> Self {
        Self::NotSupported {
            feature: feature.into(),
        }
    }

    /// Creates an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Returns true if this error was caused by operator input rather than
    /// by the environment.
    pub fn is_usage_error(&self) -> bool {
        matches!(
            self,
            TunnelError::InvalidInput { .. }
                | TunnelError::InvalidConfig { .. }
                | TunnelError::NotSupported { .. }
        )
    }

    /// Process exit code for this error. Usage errors exit with 2,
    /// everything else with 1.
    pub fn exit_code(&self) -> u8 {
        if self.is_usage_error() {
            2
        } else {
            1
        }
    }
}
