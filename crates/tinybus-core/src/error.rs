//! Error types for tinybus.
//!
//! Errors come in two tiers. Leaf variants describe what went wrong
//! (validation, marshaling, transport, a remote error reply). Public client
//! operations wrap leaf errors once in [`BusError::Operation`], which prefixes
//! the operation name and appends the transport diagnostic when one is known:
//!
//! ```text
//! call: Invalid service name: "noDotHere"
//! receive: Remote error: unknown method
//! call: Send failed: connection closed (bus error: broken pipe)
//! ```

use thiserror::Error;

/// Main error type for tinybus.
#[derive(Debug, Error)]
pub enum BusError {
    // Bus-level errors
    #[error("Connection error: {message}")]
    Connection { message: String },

    #[error("Could not own name {name}: {message}")]
    NameOwnership { name: String, message: String },

    #[error("Send failed: {message}")]
    Send { message: String },

    // Local input errors
    #[error("Invalid {field}: {value:?}")]
    Validation { field: String, value: String },

    #[error("Marshal error: {message}")]
    Marshal { message: String },

    #[error("Protocol violation: {message}")]
    ProtocolViolation { message: String },

    // Peer errors
    #[error("Remote error: {reason}")]
    Remote { reason: String },

    // Transport plumbing
    #[error("IO error: {message}")]
    Io {
        message: String,
        #[source]
        source: Option<std::io::Error>,
    },

    #[error("JSON error: {message}")]
    Json {
        message: String,
        #[source]
        source: Option<serde_json::Error>,
    },

    /// Boundary wrapper added by public client operations.
    #[error("{operation}: {source}{}", diagnostic_suffix(.diagnostic))]
    Operation {
        operation: &'static str,
        #[source]
        source: Box<BusError>,
        diagnostic: Option<String>,
    },
}

fn diagnostic_suffix(diagnostic: &Option<String>) -> String {
    match diagnostic {
        Some(d) if !d.is_empty() => format!(" (bus error: {})", d),
        _ => String::new(),
    }
}

/// Coarse classification of a [`BusError`], looking through operation wrappers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Connection,
    NameOwnership,
    Send,
    Validation,
    Marshal,
    ProtocolViolation,
    Remote,
    Transport,
}

/// Result type alias for tinybus operations.
pub type Result<T> = std::result::Result<T, BusError>;

// Conversion implementations for common error types

impl From<std::io::Error> for BusError {
    fn from(err: std::io::Error) -> Self {
        BusError::Io {
            message: err.to_string(),
            source: Some(err),
        }
    }
}

impl From<serde_json::Error> for BusError {
    fn from(err: serde_json::Error) -> Self {
        BusError::Json {
            message: err.to_string(),
            source: Some(err),
        }
    }
}

impl BusError {
    pub fn connection(message: impl Into<String>) -> Self {
        BusError::Connection {
            message: message.into(),
        }
    }

    pub fn send(message: impl Into<String>) -> Self {
        BusError::Send {
            message: message.into(),
        }
    }

    pub fn validation(field: impl Into<String>, value: impl Into<String>) -> Self {
        BusError::Validation {
            field: field.into(),
            value: value.into(),
        }
    }

    pub fn marshal(message: impl Into<String>) -> Self {
        BusError::Marshal {
            message: message.into(),
        }
    }

    pub fn protocol(message: impl Into<String>) -> Self {
        BusError::ProtocolViolation {
            message: message.into(),
        }
    }

    /// Wrap this error at a public operation boundary.
    ///
    /// Errors that are already wrapped are returned unchanged so an operation
    /// never reports itself twice.
    pub fn within(self, operation: &'static str, diagnostic: Option<String>) -> Self {
        match self {
            wrapped @ BusError::Operation { .. } => wrapped,
            other => BusError::Operation {
                operation,
                source: Box::new(other),
                diagnostic,
            },
        }
    }

    /// The innermost error, with operation wrappers removed.
    pub fn root(&self) -> &BusError {
        match self {
            BusError::Operation { source, .. } => source.root(),
            other => other,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self.root() {
            BusError::Connection { .. } => ErrorKind::Connection,
            BusError::NameOwnership { .. } => ErrorKind::NameOwnership,
            BusError::Send { .. } => ErrorKind::Send,
            BusError::Validation { .. } => ErrorKind::Validation,
            BusError::Marshal { .. } => ErrorKind::Marshal,
            BusError::ProtocolViolation { .. } => ErrorKind::ProtocolViolation,
            BusError::Remote { .. } => ErrorKind::Remote,
            BusError::Io { .. } | BusError::Json { .. } => ErrorKind::Transport,
            // root() never yields a wrapper
            BusError::Operation { .. } => ErrorKind::Transport,
        }
    }

    /// The peer-supplied reason if this is a remote error reply.
    pub fn remote_reason(&self) -> Option<&str> {
        match self.root() {
            BusError::Remote { reason } => Some(reason),
            _ => None,
        }
    }

    /// Whether a server loop should stop after seeing this error.
    ///
    /// Anything that means the bus itself is gone is fatal; local or
    /// per-message problems are not.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::Connection | ErrorKind::Send | ErrorKind::Transport
        )
    }

    /// Process exit code for command-line front-ends.
    pub fn exit_code(&self) -> i32 {
        match self.kind() {
            ErrorKind::Validation => 2,
            ErrorKind::Remote => 3,
            _ => 1,
        }
    }
}
