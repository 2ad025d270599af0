//! Endpoint selection by role preference.

use std::sync::Arc;

use parking_lot::RwLock;

use redwire_proto::{Message, RolePreference};

use crate::endpoint::{Endpoint, ServerRole};

/// Chooses the endpoint a message is sent to when the caller did not pin one.
pub trait Router: Send + Sync + 'static {
    /// Pick an endpoint for `message`.
    ///
    /// When an advisory preference cannot be met the opposite role is used and
    /// the message's flags are rewritten to match. A demanded role that is not
    /// present yields `None`.
    fn select(&self, message: &Message) -> Option<Arc<Endpoint>>;

    /// Every known endpoint.
    fn endpoints(&self) -> Vec<Arc<Endpoint>>;

    /// Diagnostic summary of every known endpoint.
    fn snapshot(&self) -> String {
        let endpoints = self.endpoints();
        if endpoints.is_empty() {
            return "(none)".to_string();
        }
        endpoints
            .iter()
            .map(|ep| ep.describe())
            .collect::<Vec<_>>()
            .join(", ")
    }
}

/// A flat master/replica topology.
#[derive(Debug, Default)]
pub struct Topology {
    endpoints: RwLock<Vec<Arc<Endpoint>>>,
}

impl Topology {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an endpoint, replacing one with the same address.
    pub fn add(&self, endpoint: Arc<Endpoint>) {
        let mut endpoints = self.endpoints.write();
        endpoints.retain(|ep| ep.addr() != endpoint.addr());
        endpoints.push(endpoint);
    }

    /// Remove an endpoint by address.
    pub fn remove(&self, addr: &str) -> Option<Arc<Endpoint>> {
        let mut endpoints = self.endpoints.write();
        let index = endpoints.iter().position(|ep| ep.addr() == addr)?;
        Some(endpoints.remove(index))
    }

    pub fn get(&self, addr: &str) -> Option<Arc<Endpoint>> {
        self.endpoints
            .read()
            .iter()
            .find(|ep| ep.addr() == addr)
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.endpoints.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.endpoints.read().is_empty()
    }

    fn find(&self, role: ServerRole, connected_only: bool) -> Option<Arc<Endpoint>> {
        self.endpoints
            .read()
            .iter()
            .find(|ep| ep.role() == role && (!connected_only || ep.is_connected()))
            .cloned()
    }
}

impl Router for Topology {
    fn select(&self, message: &Message) -> Option<Arc<Endpoint>> {
        let preference = message.role_preference();
        let wanted = if preference.wants_replica() {
            ServerRole::Replica
        } else {
            ServerRole::Master
        };

        if let Some(ep) = self.find(wanted, true) {
            return Some(ep);
        }

        if preference.is_advisory() {
            let other = match wanted {
                ServerRole::Master => ServerRole::Replica,
                ServerRole::Replica => ServerRole::Master,
            };
            if let Some(ep) = self.find(other, true) {
                let substitute = match other {
                    ServerRole::Master => RolePreference::PreferMaster,
                    ServerRole::Replica => RolePreference::PreferReplica,
                };
                message.set_role_preference(substitute);
                tracing::debug!(
                    command = %message.command(),
                    endpoint = %ep,
                    "preferred role unavailable, using {}",
                    other
                );
                return Some(ep);
            }
        }

        // Nothing connected; hand back the right role so the caller can report it.
        self.find(wanted, false)
    }

    fn endpoints(&self) -> Vec<Arc<Endpoint>> {
        self.endpoints.read().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::endpoint::ConnectionStatus;
    use redwire_proto::{Command, CommandFlags};

    fn endpoint(addr: &str, role: ServerRole, connected: bool) -> Arc<Endpoint> {
        let ep = Arc::new(Endpoint::new(addr, role));
        if connected {
            ep.set_status(ConnectionStatus::Connected);
        }
        ep
    }

    fn ping(flags: CommandFlags) -> Message {
        Message::node(flags, Command::Ping, vec![]).unwrap()
    }

    #[test]
    fn test_prefers_requested_role() {
        let topology = Topology::new();
        topology.add(endpoint("m:1", ServerRole::Master, true));
        topology.add(endpoint("r:1", ServerRole::Replica, true));

        let msg = ping(CommandFlags::PREFER_REPLICA);
        assert_eq!(topology.select(&msg).unwrap().addr(), "r:1");
        assert_eq!(msg.role_preference(), RolePreference::PreferReplica);

        let msg = ping(CommandFlags::NONE);
        assert_eq!(topology.select(&msg).unwrap().addr(), "m:1");
    }

    #[test]
    fn test_substitutes_and_rewrites() {
        let topology = Topology::new();
        topology.add(endpoint("m:1", ServerRole::Master, true));

        let msg = ping(CommandFlags::PREFER_REPLICA);
        assert_eq!(topology.select(&msg).unwrap().addr(), "m:1");
        assert_eq!(msg.role_preference(), RolePreference::PreferMaster);
    }

    #[test]
    fn test_demand_does_not_substitute() {
        let topology = Topology::new();
        topology.add(endpoint("m:1", ServerRole::Master, true));

        let msg = ping(CommandFlags::DEMAND_REPLICA);
        assert!(topology.select(&msg).is_none());
        assert_eq!(msg.role_preference(), RolePreference::DemandReplica);
    }

    #[test]
    fn test_disconnected_endpoint_returned_for_diagnostics() {
        let topology = Topology::new();
        topology.add(endpoint("m:1", ServerRole::Master, false));

        let msg = ping(CommandFlags::NONE);
        let ep = topology.select(&msg).unwrap();
        assert!(!ep.is_connected());
    }

    #[test]
    fn test_snapshot_and_membership() {
        let topology = Topology::new();
        assert_eq!(topology.snapshot(), "(none)");

        topology.add(endpoint("m:1", ServerRole::Master, true));
        topology.add(endpoint("r:1", ServerRole::Replica, false));
        assert_eq!(
            topology.snapshot(),
            "m:1/master/connected, r:1/replica/disconnected"
        );

        topology.add(endpoint("m:1", ServerRole::Master, false));
        assert_eq!(topology.len(), 2);
        assert!(topology.remove("r:1").is_some());
        assert!(topology.get("r:1").is_none());
    }
}
