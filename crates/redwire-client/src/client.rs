//! Redwire client API.
//!
//! This module provides the [`Client`] multiplexer: one dispatcher shared by
//! every known server, with routing by role preference.

use std::sync::Arc;

use redwire_proto::{Arg, Command, CommandFlags, Message, RawReply};

use crate::config::ClientConfig;
use crate::dispatch::{Completion, Dispatcher, Transport};
use crate::endpoint::{Endpoint, ServerRole};
use crate::error::{ConnectionFailureKind, Result};
use crate::metrics::DispatchMetrics;
use crate::processor::Raw;
use crate::routing::{Router, Topology};
use crate::server::Server;

/// A client multiplexing commands over a set of servers.
///
/// # Example
///
/// ```ignore
/// use std::sync::Arc;
/// use redwire_client::{Client, ClientConfig, ServerRole};
/// use redwire_client::proto::CommandFlags;
///
/// let client = Client::new(ClientConfig::default(), Arc::new(my_transport))?;
/// let master = client.add_endpoint("10.0.0.1:6379", ServerRole::Master);
/// // ... once the transport has connected the endpoint:
/// let latency = client.server("10.0.0.1:6379").unwrap().ping(CommandFlags::NONE)?;
/// ```
#[derive(Debug, Clone)]
pub struct Client {
    dispatcher: Dispatcher,
    topology: Arc<Topology>,
}

impl Client {
    /// Create a client over `transport`. Fails if `config` does not validate.
    pub fn new(config: ClientConfig, transport: Arc<dyn Transport>) -> Result<Self> {
        let topology = Arc::new(Topology::new());
        let dispatcher = Dispatcher::new(config, topology.clone(), transport)?;
        Ok(Self {
            dispatcher,
            topology,
        })
    }

    /// Load the configuration from JSON and create a client.
    pub fn from_json(json: &str, transport: Arc<dyn Transport>) -> Result<Self> {
        Self::new(ClientConfig::from_json(json)?, transport)
    }

    pub fn config(&self) -> &ClientConfig {
        self.dispatcher.config()
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    pub fn topology(&self) -> &Arc<Topology> {
        &self.topology
    }

    pub fn metrics(&self) -> &DispatchMetrics {
        self.dispatcher.metrics()
    }

    /// Register a server, replacing any endpoint at the same address.
    ///
    /// The endpoint starts disconnected; the transport marks it connected.
    pub fn add_endpoint(&self, addr: impl Into<String>, role: ServerRole) -> Arc<Endpoint> {
        let endpoint = Arc::new(Endpoint::new(addr, role));
        self.topology.add(Arc::clone(&endpoint));
        tracing::info!(endpoint = %endpoint, role = %role, "endpoint added");
        endpoint
    }

    /// Forget a server, failing anything still in flight on it.
    pub fn remove_endpoint(&self, addr: &str) -> Option<Arc<Endpoint>> {
        let endpoint = self.topology.remove(addr)?;
        self.dispatcher
            .fail_endpoint(&endpoint, ConnectionFailureKind::SocketClosed);
        Some(endpoint)
    }

    /// Node-scoped operations for the server at `addr`.
    pub fn server(&self, addr: &str) -> Option<Server> {
        self.topology
            .get(addr)
            .map(|endpoint| Server::new(self.dispatcher.clone(), endpoint))
    }

    /// Every known server.
    pub fn servers(&self) -> Vec<Server> {
        self.topology
            .endpoints()
            .into_iter()
            .map(|endpoint| Server::new(self.dispatcher.clone(), endpoint))
            .collect()
    }

    /// Run `command` on whichever server the flags select.
    pub fn execute(
        &self,
        database: i32,
        command: &str,
        args: Vec<Arg>,
        flags: CommandFlags,
    ) -> Result<RawReply> {
        self.execute_async(database, command, args, flags).wait()
    }

    pub fn execute_async(
        &self,
        database: i32,
        command: &str,
        args: Vec<Arg>,
        flags: CommandFlags,
    ) -> Completion<RawReply> {
        let message = command
            .parse::<Command>()
            .and_then(|command| Message::new(database, flags, command, args));
        match message {
            Ok(message) => self.dispatcher.execute_async(message, &Raw, None),
            Err(e) => Completion::failed(e.into()),
        }
    }
}
