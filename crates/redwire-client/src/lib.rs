//! Redwire Client - command dispatch and cursor scanning for RESP servers.
//!
//! This crate routes commands to master or replica endpoints, pairs replies
//! with callers through an in-flight registry, parses replies into typed
//! results and exposes key enumeration as a lazy, resumable sequence. The
//! socket layer is supplied by the application through [`Transport`].
//!
//! # Quick Start
//!
//! ```ignore
//! use std::sync::Arc;
//! use redwire_client::{Client, ClientConfig, ScanOptions, ServerRole};
//!
//! let client = Client::new(ClientConfig::default(), Arc::new(my_transport))?;
//! client.add_endpoint("127.0.0.1:6379", ServerRole::Master);
//!
//! let server = client.server("127.0.0.1:6379").unwrap();
//! let mut keys = server.keys_with(ScanOptions::new(0).with_pattern("user:*"))?;
//! for key in keys.by_ref().take(100) {
//!     println!("{:?}", key?);
//! }
//! // Pick up where we left off later.
//! let position = keys.position();
//! ```

pub mod client;
pub mod config;
pub mod cursor;
pub mod dispatch;
pub mod endpoint;
pub mod error;
pub mod metrics;
pub mod processor;
pub mod routing;
pub mod server;

pub use client::Client;
pub use config::ClientConfig;
pub use cursor::{KeySequence, ScanCursor, ScanOptions, ScanPosition};
pub use dispatch::{Completion, Dispatcher, Outcome, ReplySlot, Transport};
pub use endpoint::{ConnectionStatus, Endpoint, ServerRole};
pub use error::{ConnectionFailureKind, Error, PolicyViolation, ProtocolParseFailure, Result};
pub use metrics::{DispatchMetrics, DispatchMetricsSnapshot};
pub use processor::{InfoSection, ResultProcessor, ScanPage};
pub use routing::{Router, Topology};
pub use server::{SaveType, Server, ShutdownMode};

/// Re-export protocol types.
pub use redwire_proto as proto;
