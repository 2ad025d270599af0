//! Per-node connection, role and feature state.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicI32, AtomicU8, Ordering};

use chrono::{DateTime, Utc};
use parking_lot::RwLock;

use redwire_proto::{Features, Message, RolePreference, ServerVersion};

/// Server role as seen by the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ServerRole {
    Master,
    Replica,
}

impl ServerRole {
    fn to_u8(self) -> u8 {
        match self {
            ServerRole::Master => 0,
            ServerRole::Replica => 1,
        }
    }

    fn from_u8(value: u8) -> Self {
        match value {
            1 => ServerRole::Replica,
            _ => ServerRole::Master,
        }
    }

    /// The preference flag that matches this role.
    pub fn preference(self) -> RolePreference {
        match self {
            ServerRole::Master => RolePreference::PreferMaster,
            ServerRole::Replica => RolePreference::PreferReplica,
        }
    }

    /// Parse the `role` field of `INFO replication`.
    pub fn from_info(value: &str) -> Option<Self> {
        match value.trim() {
            "master" => Some(ServerRole::Master),
            "slave" | "replica" => Some(ServerRole::Replica),
            _ => None,
        }
    }
}

impl fmt::Display for ServerRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServerRole::Master => f.write_str("master"),
            ServerRole::Replica => f.write_str("replica"),
        }
    }
}

/// Connection state of an endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionStatus {
    /// No connection has been established.
    Disconnected,
    /// A connection attempt is in progress.
    Connecting,
    /// Ready for commands.
    Connected,
    /// The last connection attempt failed.
    Failed,
}

impl ConnectionStatus {
    fn to_u8(self) -> u8 {
        match self {
            ConnectionStatus::Disconnected => 0,
            ConnectionStatus::Connecting => 1,
            ConnectionStatus::Connected => 2,
            ConnectionStatus::Failed => 3,
        }
    }

    fn from_u8(value: u8) -> Self {
        match value {
            1 => ConnectionStatus::Connecting,
            2 => ConnectionStatus::Connected,
            3 => ConnectionStatus::Failed,
            _ => ConnectionStatus::Disconnected,
        }
    }
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            ConnectionStatus::Disconnected => "disconnected",
            ConnectionStatus::Connecting => "connecting",
            ConnectionStatus::Connected => "connected",
            ConnectionStatus::Failed => "failed",
        };
        f.write_str(text)
    }
}

/// One server node as seen by the client.
///
/// Every field is independently readable from any thread. Updates come from
/// the reconnect/probe path or from explicit caller opt-in, and each one is a
/// single atomic store.
pub struct Endpoint {
    addr: String,
    role: AtomicU8,
    status: AtomicU8,
    features: RwLock<Features>,
    features_updated_at: RwLock<Option<DateTime<Utc>>>,
    allow_replica_writes: AtomicBool,
    replica_read_only: AtomicBool,
    databases: AtomicI32,
}

impl Endpoint {
    /// Create a disconnected endpoint with default features.
    pub fn new(addr: impl Into<String>, role: ServerRole) -> Self {
        Self {
            addr: addr.into(),
            role: AtomicU8::new(role.to_u8()),
            status: AtomicU8::new(ConnectionStatus::Disconnected.to_u8()),
            features: RwLock::new(Features::default()),
            features_updated_at: RwLock::new(None),
            allow_replica_writes: AtomicBool::new(false),
            replica_read_only: AtomicBool::new(true),
            databases: AtomicI32::new(16),
        }
    }

    /// Address, as given at topology discovery.
    pub fn addr(&self) -> &str {
        &self.addr
    }

    pub fn role(&self) -> ServerRole {
        ServerRole::from_u8(self.role.load(Ordering::Acquire))
    }

    pub fn set_role(&self, role: ServerRole) {
        let previous = ServerRole::from_u8(self.role.swap(role.to_u8(), Ordering::AcqRel));
        if previous != role {
            tracing::info!(endpoint = %self.addr, from = %previous, to = %role, "endpoint role changed");
        }
    }

    pub fn status(&self) -> ConnectionStatus {
        ConnectionStatus::from_u8(self.status.load(Ordering::Acquire))
    }

    pub fn set_status(&self, status: ConnectionStatus) {
        self.status.store(status.to_u8(), Ordering::Release);
    }

    pub fn is_connected(&self) -> bool {
        self.status() == ConnectionStatus::Connected
    }

    /// Current capability flags.
    pub fn features(&self) -> Features {
        *self.features.read()
    }

    /// When the feature set was last changed, if ever.
    pub fn features_updated_at(&self) -> Option<DateTime<Utc>> {
        *self.features_updated_at.read()
    }

    /// Record a version reported by the server.
    ///
    /// Features only move forward here; a lower version is ignored until the
    /// next [`reconnect`](Self::reconnect). Returns `true` if the set changed.
    pub fn update_version(&self, version: ServerVersion) -> bool {
        let mut features = self.features.write();
        if version <= features.version() {
            if version < features.version() {
                tracing::debug!(
                    endpoint = %self.addr,
                    current = %features.version(),
                    reported = %version,
                    "ignoring lower server version until reconnect"
                );
            }
            return false;
        }
        *features = Features::new(version);
        drop(features);

        *self.features_updated_at.write() = Some(Utc::now());
        tracing::info!(endpoint = %self.addr, version = %version, "server features updated");
        true
    }

    /// Reset state for a fresh connection negotiated at `version`.
    pub fn reconnect(&self, version: ServerVersion) {
        *self.features.write() = Features::new(version);
        *self.features_updated_at.write() = Some(Utc::now());
        self.set_status(ConnectionStatus::Connected);
        tracing::info!(endpoint = %self.addr, version = %version, "endpoint reconnected");
    }

    pub fn allow_replica_writes(&self) -> bool {
        self.allow_replica_writes.load(Ordering::Acquire)
    }

    /// Opt in to sending write commands to this endpoint while it is a replica.
    pub fn set_allow_replica_writes(&self, allow: bool) {
        self.allow_replica_writes.store(allow, Ordering::Release);
    }

    pub fn replica_read_only(&self) -> bool {
        self.replica_read_only.load(Ordering::Acquire)
    }

    pub fn set_replica_read_only(&self, read_only: bool) {
        self.replica_read_only.store(read_only, Ordering::Release);
    }

    /// Number of logical databases the server exposes.
    pub fn databases(&self) -> i32 {
        self.databases.load(Ordering::Acquire)
    }

    pub fn set_databases(&self, count: i32) {
        self.databases.store(count, Ordering::Release);
    }

    /// Whether a write-shaped command may be sent here. A replica accepts
    /// writes when the caller opted in or the server reported
    /// `replica-read-only no`.
    pub fn accepts_writes(&self) -> bool {
        self.role() == ServerRole::Master
            || self.allow_replica_writes()
            || !self.replica_read_only()
    }

    /// Whether `database` exists on this server. Node-level messages always
    /// pass.
    pub fn has_database(&self, database: i32) -> bool {
        database < 0 || database < self.databases()
    }

    /// Align an advisory role preference on `message` with this endpoint's
    /// actual role. Demand flags are left alone. Returns `true` if the flags
    /// were rewritten.
    pub fn fix_flags(&self, message: &Message) -> bool {
        if !message.role_preference().is_advisory() {
            return false;
        }
        message.set_role_preference(self.role().preference())
    }

    /// `addr/role/status`, used in diagnostics.
    pub fn describe(&self) -> String {
        format!("{}/{}/{}", self.addr, self.role(), self.status())
    }
}

impl fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Endpoint")
            .field("addr", &self.addr)
            .field("role", &self.role())
            .field("status", &self.status())
            .field("features", &self.features())
            .field("allow_replica_writes", &self.allow_replica_writes())
            .finish()
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.addr)
    }
}
