//! Client error types.

use std::fmt;

use thiserror::Error;

use redwire_proto::Command;

/// Result type for client operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Client errors.
#[derive(Debug, Clone, Error)]
pub enum Error {
    /// The target endpoint was not connected when the command was dispatched.
    #[error("no connection is available to service {command} on {endpoint}{}", snapshot_suffix(.snapshot))]
    NoConnectionAvailable {
        command: Command,
        endpoint: String,
        snapshot: Option<String>,
    },

    /// A reply did not have the shape the result processor expects.
    #[error(transparent)]
    Protocol(#[from] ProtocolParseFailure),

    /// The command was refused before any traffic was generated.
    #[error(transparent)]
    Policy(#[from] PolicyViolation),

    /// Cursor resume was requested against a server without cursor support.
    #[error("{command} cursor resume is not supported by this server")]
    NoCursorSupport { command: Command },

    /// Malformed arguments.
    #[error("usage error: {0}")]
    Usage(String),

    /// The link failed while the command was in flight.
    #[error("{kind} on {endpoint} while executing {command}")]
    ConnectionFailure {
        command: Command,
        endpoint: String,
        kind: ConnectionFailureKind,
    },

    /// The server answered with an error reply.
    #[error("server error: {0}")]
    Server(String),

    /// Invalid configuration.
    #[error("configuration error: {0}")]
    Config(String),

    /// An external timeout completed the command.
    #[error("timeout while executing {command}")]
    Timeout { command: Command },

    /// Protocol error.
    #[error("protocol error: {0}")]
    Proto(#[from] redwire_proto::Error),
}

fn snapshot_suffix(snapshot: &Option<String>) -> String {
    match snapshot {
        Some(snapshot) => format!("; servers: {}", snapshot),
        None => String::new(),
    }
}

impl Error {
    /// Whether this error came from the link rather than the command.
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self,
            Error::NoConnectionAvailable { .. } | Error::ConnectionFailure { .. }
        )
    }
}

/// A reply that a result processor could not interpret.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unexpected reply to {command}: expected {expected}, got {actual}")]
pub struct ProtocolParseFailure {
    pub command: Command,
    pub expected: &'static str,
    pub actual: String,
}

/// Commands refused by client-side policy.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PolicyViolation {
    #[error("this operation is not available unless admin mode is enabled: {0}")]
    AdminModeRequired(Command),

    #[error("{command} is a write and {endpoint} is a replica; enable replica writes to allow it")]
    ReplicaWrite { command: Command, endpoint: String },

    #[error("{0} cannot replicate to itself")]
    SelfReplication(String),

    #[error("{0} has been disabled in the command map")]
    CommandDisabled(Command),
}

/// Why an in-flight command lost its connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionFailureKind {
    SocketClosed,
    SocketFailure,
    ProtocolFailure,
    InternalFailure,
    Unknown,
}

impl fmt::Display for ConnectionFailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            ConnectionFailureKind::SocketClosed => "socket closed",
            ConnectionFailureKind::SocketFailure => "socket failure",
            ConnectionFailureKind::ProtocolFailure => "protocol failure",
            ConnectionFailureKind::InternalFailure => "internal failure",
            ConnectionFailureKind::Unknown => "unknown failure",
        };
        f.write_str(text)
    }
}
