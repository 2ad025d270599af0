//! Server version and the capabilities derived from it.

use std::fmt;
use std::str::FromStr;

use crate::Error;

/// A `major.minor.patch` server version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ServerVersion {
    pub major: u16,
    pub minor: u16,
    pub patch: u16,
}

impl ServerVersion {
    /// Version assumed before the server has been probed.
    pub const DEFAULT: ServerVersion = ServerVersion::new(2, 0, 0);

    pub const fn new(major: u16, minor: u16, patch: u16) -> Self {
        Self {
            major,
            minor,
            patch,
        }
    }
}

impl Default for ServerVersion {
    fn default() -> Self {
        Self::DEFAULT
    }
}

impl fmt::Display for ServerVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

impl FromStr for ServerVersion {
    type Err = Error;

    /// Parse `7.2.4`, `2.8` or `6`; missing components are zero.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || Error::InvalidVersion(s.to_string());
        let trimmed = s.trim();
        if trimmed.is_empty() {
            return Err(invalid());
        }

        let mut parts = [0u16; 3];
        for (i, part) in trimmed.split('.').enumerate() {
            if i >= parts.len() {
                return Err(invalid());
            }
            parts[i] = part.parse().map_err(|_| invalid())?;
        }
        Ok(ServerVersion::new(parts[0], parts[1], parts[2]))
    }
}

/// Capability flags, a pure function of the server version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Features {
    version: ServerVersion,
}

impl Features {
    pub const fn new(version: ServerVersion) -> Self {
        Self { version }
    }

    pub fn version(&self) -> ServerVersion {
        self.version
    }

    fn at_least(&self, major: u16, minor: u16, patch: u16) -> bool {
        self.version >= ServerVersion::new(major, minor, patch)
    }

    /// Incremental `SCAN` cursors.
    pub fn scan(&self) -> bool {
        self.at_least(2, 8, 0)
    }

    /// `SWAPDB`.
    pub fn swap_db(&self) -> bool {
        self.at_least(4, 0, 0)
    }

    /// `REPLICAOF` in place of `SLAVEOF`.
    pub fn replica_commands(&self) -> bool {
        self.at_least(5, 0, 0)
    }

    /// `MEMORY` subcommands.
    pub fn memory_command(&self) -> bool {
        self.at_least(4, 0, 0)
    }

    /// `CLIENT ID`.
    pub fn client_id(&self) -> bool {
        self.at_least(5, 0, 0)
    }

    /// `SET` with `EX`/`PX`/`NX`/`XX`.
    pub fn set_conditional(&self) -> bool {
        self.at_least(2, 6, 12)
    }

    /// `TIME`.
    pub fn time(&self) -> bool {
        self.at_least(2, 6, 0)
    }

    /// `UNLINK`.
    pub fn unlink(&self) -> bool {
        self.at_least(4, 0, 0)
    }
}

impl fmt::Display for Features {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}", self.version)
    }
}
