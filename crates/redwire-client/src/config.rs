//! Client configuration.

use serde::{Deserialize, Serialize};

use redwire_proto::{Command, DEFAULT_PAGE_SIZE};

use crate::error::{Error, Result};

/// Default key deleted before a replication change so racing clients can
/// detect the new master.
pub const DEFAULT_TIE_BREAKER: &str = "__Booksleeve_TieBreak";

/// Default channel on which master changes are broadcast.
pub const DEFAULT_CONFIGURATION_CHANNEL: &str = "__Booksleeve_MasterChanged";

/// Client configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Permit administrative commands (`CONFIG`, `FLUSHALL`, `KEYS`, ...).
    pub allow_admin: bool,

    /// Include the known server snapshot in connection errors.
    pub include_detail_in_errors: bool,

    /// Page size used by key scans when the caller does not pick one.
    pub default_page_size: usize,

    /// Key deleted ahead of a `REPLICAOF`; `None` disables it.
    pub tie_breaker: Option<String>,

    /// Channel used to announce master changes; `None` disables it.
    pub configuration_channel: Option<String>,

    /// Verbs that must never be sent.
    pub disabled_commands: Vec<String>,

    /// Name registered with `CLIENT SETNAME` when an endpoint is probed.
    pub client_name: Option<String>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            allow_admin: false,
            include_detail_in_errors: true,
            default_page_size: DEFAULT_PAGE_SIZE,
            tie_breaker: Some(DEFAULT_TIE_BREAKER.to_string()),
            configuration_channel: Some(DEFAULT_CONFIGURATION_CHANNEL.to_string()),
            disabled_commands: Vec::new(),
            client_name: None,
        }
    }
}

impl ClientConfig {
    /// Create a configuration with defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a configuration from JSON. Missing fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: ClientConfig = serde_json::from_str(json)
            .map_err(|e| Error::Config(format!("invalid client configuration: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Check the configuration for values the engine cannot work with.
    pub fn validate(&self) -> Result<()> {
        if self.default_page_size == 0 {
            return Err(Error::Usage(
                "default_page_size must be greater than zero".to_string(),
            ));
        }
        if let Some(name) = &self.client_name {
            if name.is_empty() || name.chars().any(|c| c.is_whitespace()) {
                return Err(Error::Config(format!(
                    "client_name must be a non-empty word, got {:?}",
                    name
                )));
            }
        }
        for name in &self.disabled_commands {
            name.parse::<Command>().map_err(|_| {
                Error::Config(format!("unknown command in disabled_commands: {}", name))
            })?;
        }
        Ok(())
    }

    /// Check whether `command` may be sent at all.
    pub fn is_available(&self, command: Command) -> bool {
        !self
            .disabled_commands
            .iter()
            .any(|name| name.eq_ignore_ascii_case(command.as_str()))
    }

    /// Enable or disable admin mode.
    pub fn with_allow_admin(mut self, allow: bool) -> Self {
        self.allow_admin = allow;
        self
    }

    /// Include or omit diagnostics in connection errors.
    pub fn with_include_detail_in_errors(mut self, include: bool) -> Self {
        self.include_detail_in_errors = include;
        self
    }

    /// Set the default scan page size.
    pub fn with_default_page_size(mut self, page_size: usize) -> Self {
        self.default_page_size = page_size;
        self
    }

    /// Set the tie-breaker key.
    pub fn with_tie_breaker(mut self, key: Option<impl Into<String>>) -> Self {
        self.tie_breaker = key.map(Into::into);
        self
    }

    /// Set the configuration-change channel.
    pub fn with_configuration_channel(mut self, channel: Option<impl Into<String>>) -> Self {
        self.configuration_channel = channel.map(Into::into);
        self
    }

    /// Disable a verb.
    pub fn with_disabled_command(mut self, command: Command) -> Self {
        self.disabled_commands.push(command.as_str().to_string());
        self
    }

    /// Set the client name.
    pub fn with_client_name(mut self, name: impl Into<String>) -> Self {
        self.client_name = Some(name.into());
        self
    }
}
