//! Error handling module for archgamer
//!
//! Provides centralized error handling with proper error types using thiserror.
//! Steps decide locally whether an error aborts the run or is downgraded to a
//! warning; this type only carries what went wrong and how the process should exit.

use thiserror::Error;

/// Main error type for archgamer
#[derive(Error, Debug)]
pub enum SetupError {
    /// A required external tool is not installed
    #[error("Missing required tool '{tool}' (install: pacman -S {package})")]
    MissingPrerequisite { tool: String, package: String },

    /// Operation needs elevated privileges that are not available
    #[error("Privilege error: {0}")]
    Privilege(String),

    /// User aborted a prompt (Esc, EOF, Ctrl+C inside a dialog)
    #[error("Cancelled by user")]
    Cancelled,

    /// User explicitly answered "no" to a confirmation the run depends on
    #[error("Declined: {0}")]
    Declined(String),

    /// External command exited non-zero
    #[error("Command `{command}` failed (exit code {code}): {stderr}")]
    CommandFailed {
        command: String,
        code: i32,
        stderr: String,
    },

    /// A step ran before the state it depends on was established
    #[error("Contract violation: {0}")]
    Contract(String),

    /// Validation errors (user input, config values)
    #[error("Validation error: {0}")]
    Validation(String),

    /// Terminal/UI errors
    #[error("Terminal error: {0}")]
    Terminal(String),

    /// IO errors (file operations, terminal, process spawn)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// General errors (catch-all for edge cases)
    #[error("{0}")]
    General(String),
}

/// Result type alias for archgamer operations
pub type Result<T> = std::result::Result<T, SetupError>;

impl SetupError {
    /// Create a missing prerequisite error
    pub fn missing(tool: impl Into<String>, package: impl Into<String>) -> Self {
        Self::MissingPrerequisite {
            tool: tool.into(),
            package: package.into(),
        }
    }

    /// Create a privilege error
    pub fn privilege(msg: impl Into<String>) -> Self {
        Self::Privilege(msg.into())
    }

    /// Create a declined error
    pub fn declined(msg: impl Into<String>) -> Self {
        Self::Declined(msg.into())
    }

    /// Create a contract violation error
    pub fn contract(msg: impl Into<String>) -> Self {
        Self::Contract(msg.into())
    }

    /// Create a validation error
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Create a terminal error
    pub fn terminal(msg: impl Into<String>) -> Self {
        Self::Terminal(msg.into())
    }

    /// Create a general error
    pub fn general(msg: impl Into<String>) -> Self {
        Self::General(msg.into())
    }

    /// Errors that end the run no matter which failure policy the step declared.
    pub fn always_aborts(&self) -> bool {
        matches!(
            self,
            Self::Cancelled | Self::Declined(_) | Self::Contract(_) | Self::Privilege(_)
        )
    }

    /// Process exit code for this error.
    ///
    /// | Error | Code |
    /// |-------|------|
    /// | MissingPrerequisite | 2 |
    /// | Privilege | 3 |
    /// | Declined | 4 |
    /// | Cancelled | 130 |
    /// | everything else | 1 |
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::MissingPrerequisite { .. } => 2,
            Self::Privilege(_) => 3,
            Self::Declined(_) => 4,
            Self::Cancelled => 130,
            _ => 1,
        }
    }
}
