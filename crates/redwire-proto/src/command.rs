//! The closed set of wire verbs the engine knows how to send.

use std::fmt;
use std::str::FromStr;

use crate::Error;

/// A wire verb.
///
/// The set is fixed at build time. Verbs that carry a sub-command (`CONFIG GET`,
/// `CLIENT KILL`) take the sub-command as their first argument.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Command {
    BgRewriteAof,
    BgSave,
    Client,
    Config,
    DbSize,
    Debug,
    Del,
    Echo,
    FlushAll,
    FlushDb,
    Get,
    Info,
    Keys,
    LastSave,
    Ping,
    Publish,
    ReplicaOf,
    Role,
    Save,
    Scan,
    Set,
    Shutdown,
    SlaveOf,
    SlowLog,
    SwapDb,
    Time,
    Unlink,
}

/// Accepted argument counts for a verb, excluding the verb itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Arity {
    /// Minimum number of arguments.
    pub min: usize,
    /// Maximum number of arguments, `None` when unbounded.
    pub max: Option<usize>,
}

impl Arity {
    const fn exactly(n: usize) -> Self {
        Self {
            min: n,
            max: Some(n),
        }
    }

    const fn between(min: usize, max: usize) -> Self {
        Self {
            min,
            max: Some(max),
        }
    }

    const fn at_least(min: usize) -> Self {
        Self { min, max: None }
    }

    /// Check whether `count` arguments are accepted.
    pub fn accepts(&self, count: usize) -> bool {
        count >= self.min && self.max.map_or(true, |max| count <= max)
    }
}

impl fmt::Display for Arity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.max {
            Some(max) if max == self.min => write!(f, "{}", self.min),
            Some(max) => write!(f, "{}..={}", self.min, max),
            None => write!(f, "at least {}", self.min),
        }
    }
}

impl Command {
    /// All verbs, in declaration order.
    pub const ALL: [Command; 27] = [
        Command::BgRewriteAof,
        Command::BgSave,
        Command::Client,
        Command::Config,
        Command::DbSize,
        Command::Debug,
        Command::Del,
        Command::Echo,
        Command::FlushAll,
        Command::FlushDb,
        Command::Get,
        Command::Info,
        Command::Keys,
        Command::LastSave,
        Command::Ping,
        Command::Publish,
        Command::ReplicaOf,
        Command::Role,
        Command::Save,
        Command::Scan,
        Command::Set,
        Command::Shutdown,
        Command::SlaveOf,
        Command::SlowLog,
        Command::SwapDb,
        Command::Time,
        Command::Unlink,
    ];

    /// The verb as sent on the wire.
    pub const fn as_str(&self) -> &'static str {
        match self {
            Command::BgRewriteAof => "BGREWRITEAOF",
            Command::BgSave => "BGSAVE",
            Command::Client => "CLIENT",
            Command::Config => "CONFIG",
            Command::DbSize => "DBSIZE",
            Command::Debug => "DEBUG",
            Command::Del => "DEL",
            Command::Echo => "ECHO",
            Command::FlushAll => "FLUSHALL",
            Command::FlushDb => "FLUSHDB",
            Command::Get => "GET",
            Command::Info => "INFO",
            Command::Keys => "KEYS",
            Command::LastSave => "LASTSAVE",
            Command::Ping => "PING",
            Command::Publish => "PUBLISH",
            Command::ReplicaOf => "REPLICAOF",
            Command::Role => "ROLE",
            Command::Save => "SAVE",
            Command::Scan => "SCAN",
            Command::Set => "SET",
            Command::Shutdown => "SHUTDOWN",
            Command::SlaveOf => "SLAVEOF",
            Command::SlowLog => "SLOWLOG",
            Command::SwapDb => "SWAPDB",
            Command::Time => "TIME",
            Command::Unlink => "UNLINK",
        }
    }

    /// Accepted argument counts.
    pub const fn arity(&self) -> Arity {
        match self {
            Command::BgRewriteAof
            | Command::BgSave
            | Command::DbSize
            | Command::LastSave
            | Command::Role
            | Command::Save
            | Command::Time => Arity::exactly(0),
            Command::Echo | Command::Get | Command::Keys => Arity::exactly(1),
            Command::Publish | Command::ReplicaOf | Command::SlaveOf | Command::SwapDb => {
                Arity::exactly(2)
            }
            Command::Ping
            | Command::FlushAll
            | Command::FlushDb
            | Command::Info
            | Command::Shutdown => Arity::between(0, 1),
            Command::SlowLog => Arity::between(1, 2),
            // cursor [MATCH pattern] [COUNT count] [TYPE type]
            Command::Scan => Arity::between(1, 7),
            Command::Client | Command::Config | Command::Debug => Arity::at_least(1),
            Command::Del | Command::Unlink => Arity::at_least(1),
            Command::Set => Arity::at_least(2),
        }
    }

    /// Administrative verbs; these require admin mode on the client.
    pub const fn is_admin(&self) -> bool {
        matches!(
            self,
            Command::BgRewriteAof
                | Command::BgSave
                | Command::Client
                | Command::Config
                | Command::Debug
                | Command::FlushAll
                | Command::FlushDb
                | Command::Info
                | Command::Keys
                | Command::ReplicaOf
                | Command::SlaveOf
                | Command::Save
                | Command::Shutdown
                | Command::SlowLog
                | Command::SwapDb
        )
    }

    /// Write-shaped verbs; these may not be sent to a replica without opt-in.
    pub const fn is_write(&self) -> bool {
        matches!(
            self,
            Command::Del
                | Command::Unlink
                | Command::Set
                | Command::FlushDb
                | Command::FlushAll
                | Command::SwapDb
        )
    }

    /// Check that `count` arguments are accepted by this verb.
    pub fn check_arity(&self, count: usize) -> Result<(), Error> {
        let arity = self.arity();
        if arity.accepts(count) {
            Ok(())
        } else {
            Err(Error::Arity {
                command: *self,
                expected: arity.to_string(),
                actual: count,
            })
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Command {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Command::ALL
            .iter()
            .copied()
            .find(|command| command.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| Error::UnknownCommand(s.to_string()))
    }
}
