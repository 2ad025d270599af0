//! Protocol error types.

use thiserror::Error;

use crate::command::Command;

/// Protocol-level errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    /// A command was built with an argument count its verb does not accept.
    #[error("wrong number of arguments for {command}: expected {expected}, got {actual}")]
    Arity {
        command: Command,
        expected: String,
        actual: usize,
    },

    /// A server version string could not be parsed.
    #[error("invalid server version: {0}")]
    InvalidVersion(String),

    /// Unknown command verb.
    #[error("unknown command: {0}")]
    UnknownCommand(String),

    /// A request could not be encoded for the wire.
    #[error("encoding error: {0}")]
    Encoding(String),

    /// Invalid message format.
    #[error("invalid message: {0}")]
    InvalidMessage(String),
}
