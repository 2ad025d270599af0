//! Redwire protocol vocabulary.
//!
//! This crate defines what a client says to a RESP server and how replies look
//! once parsed. It does no I/O.
//!
//! # Modules
//!
//! - [`value`] - Reply tree and command argument types
//! - [`command`] - The closed set of wire verbs
//! - [`message`] - Outbound messages and routing flags
//! - [`framing`] - RESP request encoding
//! - [`features`] - Server version and derived capabilities
//! - [`error`] - Protocol error types
//!
//! # Example
//!
//! ```
//! use redwire_proto::{framing, Command, CommandFlags, Message};
//!
//! let msg = Message::new(0, CommandFlags::NONE, Command::Scan, vec![0i64.into()]).unwrap();
//! let bytes = framing::encode_to_bytes(&msg).unwrap();
//! assert_eq!(&bytes[..], b"*2\r\n$4\r\nSCAN\r\n$1\r\n0\r\n");
//! ```

pub mod command;
pub mod error;
pub mod features;
pub mod framing;
pub mod message;
pub mod value;

pub use error::Error;

// Re-export commonly used types at crate root
pub use command::{Arity, Command};
pub use features::{Features, ServerVersion};
pub use message::{CommandFlags, CompletionPolicy, Message, RolePreference, NO_DATABASE};
pub use value::{Arg, RawReply, ReplyKind};

/// Page size the server uses for `SCAN` when no `COUNT` is given.
pub const DEFAULT_PAGE_SIZE: usize = 10;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_page_size() {
        assert_eq!(DEFAULT_PAGE_SIZE, 10);
    }

    #[test]
    fn test_scan_message_on_the_wire() {
        let msg = Message::new(
            2,
            CommandFlags::PREFER_REPLICA,
            Command::Scan,
            vec![17u64.into(), "MATCH".into(), "user:*".into()],
        )
        .unwrap();

        let bytes = framing::encode_to_bytes(&msg).unwrap();
        assert!(bytes.starts_with(b"*4\r\n$4\r\nSCAN\r\n$2\r\n17\r\n"));
        assert_eq!(msg.role_preference(), RolePreference::PreferReplica);
    }
}
