//! Error types for depcache
//!
//! All modules use `DepcacheResult<T>` as their return type.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for depcache operations
pub type DepcacheResult<T> = Result<T, DepcacheError>;

/// All errors that can occur in depcache
#[derive(Error, Debug)]
pub enum DepcacheError {
    // Remote errors (surfaced to the caller unchanged)
    #[error("Remote unavailable: {remote}: {reason}")]
    RemoteUnavailable { remote: String, reason: String },

    #[error("Not found upstream: {0}")]
    NotFound(String),

    #[error("Authentication failed for {remote}: {reason}")]
    AuthError { remote: String, reason: String },

    // Integrity errors
    #[error("Integrity check failed for {subject}: {reason}")]
    IntegrityError { subject: String, reason: String },

    // Cache layer errors (recovered locally by bypassing the cache)
    #[error("Cache unavailable at {path}: {reason}")]
    CacheUnavailable { path: PathBuf, reason: String },

    #[error("Cache entry is malformed at {path}: {reason}")]
    CacheEntryMalformed { path: PathBuf, reason: String },

    // Identifier and materialization errors
    #[error("Invalid identifier: {0}")]
    InvalidIdentifier(String),

    #[error("Invalid descriptor {path}: {reason}")]
    DescriptorInvalid { path: PathBuf, reason: String },

    #[error("Archive extraction failed for {path}: {reason}")]
    Extract { path: PathBuf, reason: String },

    #[error("Destination is not empty: {0}")]
    DestinationNotEmpty(PathBuf),

    // Configuration errors
    #[error("Invalid configuration at {path}: {reason}")]
    ConfigInvalid { path: PathBuf, reason: String },

    #[error("Failed to create config directory {path}: {source}")]
    ConfigDirCreate {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // IO errors
    #[error("IO error: {context}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    // Process errors
    #[error("Command failed: {command}")]
    CommandFailed {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Command execution error: {command}, stderr: {stderr}")]
    CommandExecution { command: String, stderr: String },

    // Serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    // General errors
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("{0}")]
    User(String),
}

impl DepcacheError {
    /// Create an IO error with context
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    /// Create a command failed error
    pub fn command_failed(command: impl Into<String>, source: std::io::Error) -> Self {
        Self::CommandFailed {
            command: command.into(),
            source,
        }
    }

    /// Create a command execution error
    pub fn command_exec(command: impl Into<String>, stderr: impl Into<String>) -> Self {
        Self::CommandExecution {
            command: command.into(),
            stderr: stderr.into(),
        }
    }

    /// Create a cache-unavailable error
    pub fn cache_unavailable(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        Self::CacheUnavailable {
            path: path.into(),
            reason: reason.to_string(),
        }
    }

    /// Whether the failure belongs to the cache layer and can be recovered by
    /// falling back to the uncached path
    pub fn is_cache_layer(&self) -> bool {
        matches!(
            self,
            Self::CacheUnavailable { .. } | Self::CacheEntryMalformed { .. }
        )
    }

    /// Whether the failure came from the remote side of a fetch
    pub fn is_remote(&self) -> bool {
        matches!(
            self,
            Self::RemoteUnavailable { .. } | Self::NotFound(_) | Self::AuthError { .. }
        )
    }

    /// Get actionable hint for the error
    pub fn hint(&self) -> Option<&'static str> {
        match self {
            Self::AuthError { .. } => {
                Some("Check your git credential helper or feed credentials")
            }
            Self::RemoteUnavailable { .. } => Some("Check network access to the remote and retry"),
            Self::DestinationNotEmpty(_) => Some("Use --force to replace the destination"),
            Self::IntegrityError { .. } => {
                Some("Run: depcache cache verify --fix, or check the declared sha256")
            }
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        let err = DepcacheError::NotFound("ToolX 2.0.0".to_string());
        assert!(err.to_string().contains("Not found upstream"));
    }

    #[test]
    fn error_hint() {
        let err = DepcacheError::DestinationNotEmpty(PathBuf::from("/tmp/x"));
        assert_eq!(err.hint(), Some("Use --force to replace the destination"));
    }

    #[test]
    fn cache_layer_classification() {
        assert!(DepcacheError::cache_unavailable("/cache", "read-only").is_cache_layer());
        assert!(!DepcacheError::NotFound("x".to_string()).is_cache_layer());
        assert!(DepcacheError::AuthError {
            remote: "r".to_string(),
            reason: "denied".to_string()
        }
        .is_remote());
    }
}
