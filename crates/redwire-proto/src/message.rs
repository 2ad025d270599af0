//! Outbound command messages and their routing flags.

use std::fmt;
use std::ops::{BitAnd, BitOr, BitOrAssign};
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::time::Instant;

use crate::command::Command;
use crate::value::Arg;
use crate::Error;

/// Database index used by node-scoped commands that do not select a database.
pub const NO_DATABASE: i32 = -1;

static NEXT_MESSAGE_ID: AtomicU64 = AtomicU64::new(1);

/// Routing and completion flags attached to a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct CommandFlags(u32);

impl CommandFlags {
    /// No flags; routing defaults to the master.
    pub const NONE: CommandFlags = CommandFlags(0);
    /// Hint to the transport that this message may jump its queue.
    pub const HIGH_PRIORITY: CommandFlags = CommandFlags(0x01);
    /// The caller does not want a result and will not wait for one.
    pub const FIRE_AND_FORGET: CommandFlags = CommandFlags(0x02);
    /// Prefer a master; a replica is used when no master is available.
    pub const PREFER_MASTER: CommandFlags = CommandFlags(0x04);
    /// Only a master may serve this message.
    pub const DEMAND_MASTER: CommandFlags = CommandFlags(0x08);
    /// Prefer a replica; the master is used when no replica is available.
    pub const PREFER_REPLICA: CommandFlags = CommandFlags(0x10);
    /// Only a replica may serve this message.
    pub const DEMAND_REPLICA: CommandFlags = CommandFlags(0x20);
    /// Do not follow server redirections.
    pub const NO_REDIRECT: CommandFlags = CommandFlags(0x40);
    /// Issued by the engine itself; bypasses admin gating and metrics.
    pub const INTERNAL_CALL: CommandFlags = CommandFlags(0x80);

    /// All role-preference bits.
    pub const ROLE_MASK: CommandFlags = CommandFlags(0x04 | 0x08 | 0x10 | 0x20);

    /// Raw bit representation.
    pub const fn bits(self) -> u32 {
        self.0
    }

    /// Build flags from raw bits, dropping unknown bits.
    pub const fn from_bits_truncate(bits: u32) -> Self {
        CommandFlags(bits & 0xFF)
    }

    /// Check if every bit of `other` is set.
    pub const fn contains(self, other: CommandFlags) -> bool {
        self.0 & other.0 == other.0
    }

    /// Return a copy with the bits of `other` cleared.
    pub const fn without(self, other: CommandFlags) -> Self {
        CommandFlags(self.0 & !other.0)
    }

    /// Role preference encoded in these flags.
    pub fn role_preference(self) -> RolePreference {
        if self.contains(Self::DEMAND_REPLICA) {
            RolePreference::DemandReplica
        } else if self.contains(Self::PREFER_REPLICA) {
            RolePreference::PreferReplica
        } else if self.contains(Self::DEMAND_MASTER) {
            RolePreference::DemandMaster
        } else {
            RolePreference::PreferMaster
        }
    }

    /// Return a copy with the role bits replaced by `preference`.
    pub fn with_role_preference(self, preference: RolePreference) -> Self {
        self.without(Self::ROLE_MASK) | preference.flag()
    }
}

impl BitOr for CommandFlags {
    type Output = CommandFlags;

    fn bitor(self, rhs: Self) -> Self::Output {
        CommandFlags(self.0 | rhs.0)
    }
}

impl BitOrAssign for CommandFlags {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

impl BitAnd for CommandFlags {
    type Output = CommandFlags;

    fn bitand(self, rhs: Self) -> Self::Output {
        CommandFlags(self.0 & rhs.0)
    }
}

impl fmt::Display for CommandFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        const NAMES: [(CommandFlags, &str); 8] = [
            (CommandFlags::HIGH_PRIORITY, "HighPriority"),
            (CommandFlags::FIRE_AND_FORGET, "FireAndForget"),
            (CommandFlags::PREFER_MASTER, "PreferMaster"),
            (CommandFlags::DEMAND_MASTER, "DemandMaster"),
            (CommandFlags::PREFER_REPLICA, "PreferReplica"),
            (CommandFlags::DEMAND_REPLICA, "DemandReplica"),
            (CommandFlags::NO_REDIRECT, "NoRedirect"),
            (CommandFlags::INTERNAL_CALL, "InternalCall"),
        ];

        let mut first = true;
        for (flag, name) in NAMES {
            if self.contains(flag) {
                if !first {
                    f.write_str("|")?;
                }
                f.write_str(name)?;
                first = false;
            }
        }
        if first {
            f.write_str("None")?;
        }
        Ok(())
    }
}

/// Which server role a message should be routed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RolePreference {
    PreferMaster,
    DemandMaster,
    PreferReplica,
    DemandReplica,
}

impl RolePreference {
    /// The flag bit for this preference.
    pub const fn flag(self) -> CommandFlags {
        match self {
            RolePreference::PreferMaster => CommandFlags::PREFER_MASTER,
            RolePreference::DemandMaster => CommandFlags::DEMAND_MASTER,
            RolePreference::PreferReplica => CommandFlags::PREFER_REPLICA,
            RolePreference::DemandReplica => CommandFlags::DEMAND_REPLICA,
        }
    }

    /// Whether the preference may be satisfied by the opposite role.
    pub const fn is_advisory(self) -> bool {
        matches!(
            self,
            RolePreference::PreferMaster | RolePreference::PreferReplica
        )
    }

    /// Whether this preference targets a replica.
    pub const fn wants_replica(self) -> bool {
        matches!(
            self,
            RolePreference::PreferReplica | RolePreference::DemandReplica
        )
    }
}

/// What the dispatcher does with a message's result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletionPolicy {
    /// The caller observes the result or the error.
    AwaitResult,
    /// Results and errors are dropped; the caller gets the zero value.
    DiscardResult,
}

/// One logical request.
///
/// Verb and arguments are fixed at construction. Only the flags may change
/// afterwards, when the dispatcher aligns role preference with the endpoint it
/// actually resolved.
#[derive(Debug)]
pub struct Message {
    id: u64,
    database: i32,
    flags: AtomicU32,
    command: Command,
    args: Vec<Arg>,
    created_at: Instant,
}

impl Message {
    /// Build a message, checking the argument count against the verb.
    pub fn new(
        database: i32,
        flags: CommandFlags,
        command: Command,
        args: Vec<Arg>,
    ) -> Result<Self, Error> {
        if database < NO_DATABASE {
            return Err(Error::InvalidMessage(format!(
                "invalid database index {}",
                database
            )));
        }
        command.check_arity(args.len())?;

        Ok(Self {
            id: NEXT_MESSAGE_ID.fetch_add(1, Ordering::Relaxed),
            database,
            flags: AtomicU32::new(flags.bits()),
            command,
            args,
            created_at: Instant::now(),
        })
    }

    /// Build a node-scoped message that does not select a database.
    pub fn node(flags: CommandFlags, command: Command, args: Vec<Arg>) -> Result<Self, Error> {
        Self::new(NO_DATABASE, flags, command, args)
    }

    /// Process-unique identifier, used to correlate the reply.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Target database, or [`NO_DATABASE`].
    pub fn database(&self) -> i32 {
        self.database
    }

    pub fn command(&self) -> Command {
        self.command
    }

    pub fn args(&self) -> &[Arg] {
        &self.args
    }

    /// Current flags.
    pub fn flags(&self) -> CommandFlags {
        CommandFlags::from_bits_truncate(self.flags.load(Ordering::Acquire))
    }

    /// Time since the message was built.
    pub fn age(&self) -> std::time::Duration {
        self.created_at.elapsed()
    }

    pub fn is_fire_and_forget(&self) -> bool {
        self.flags().contains(CommandFlags::FIRE_AND_FORGET)
    }

    /// Issued by the engine itself rather than a caller.
    pub fn is_internal(&self) -> bool {
        self.flags().contains(CommandFlags::INTERNAL_CALL)
    }

    pub fn completion_policy(&self) -> CompletionPolicy {
        if self.is_fire_and_forget() {
            CompletionPolicy::DiscardResult
        } else {
            CompletionPolicy::AwaitResult
        }
    }

    pub fn role_preference(&self) -> RolePreference {
        self.flags().role_preference()
    }

    /// Mark the message as engine-issued.
    pub fn set_internal_call(&self) {
        self.flags
            .fetch_or(CommandFlags::INTERNAL_CALL.bits(), Ordering::AcqRel);
    }

    /// Rewrite the role bits. Returns `true` if the flags changed.
    pub fn set_role_preference(&self, preference: RolePreference) -> bool {
        let mut current = self.flags.load(Ordering::Acquire);
        loop {
            let next = CommandFlags::from_bits_truncate(current)
                .with_role_preference(preference)
                .bits();
            if next == current {
                return false;
            }
            match self.flags.compare_exchange_weak(
                current,
                next,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return true,
                Err(observed) => current = observed,
            }
        }
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.database != NO_DATABASE {
            write!(f, "[{}]:", self.database)?;
        }
        write!(f, "{}", self.command)?;
        // Key-bearing commands stay readable; other arguments may be large.
        if let Some(first) = self.args.first() {
            write!(f, " {}", first)?;
            if self.args.len() > 1 {
                write!(f, " (+{} args)", self.args.len() - 1)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_preference_defaults_to_master() {
        assert_eq!(
            CommandFlags::NONE.role_preference(),
            RolePreference::PreferMaster
        );
        assert_eq!(
            CommandFlags::FIRE_AND_FORGET.role_preference(),
            RolePreference::PreferMaster
        );
        assert_eq!(
            (CommandFlags::PREFER_REPLICA | CommandFlags::NO_REDIRECT).role_preference(),
            RolePreference::PreferReplica
        );
    }

    #[test]
    fn test_with_role_preference_clears_other_roles() {
        let flags = CommandFlags::PREFER_REPLICA | CommandFlags::FIRE_AND_FORGET;
        let rewritten = flags.with_role_preference(RolePreference::PreferMaster);

        assert!(rewritten.contains(CommandFlags::PREFER_MASTER));
        assert!(!rewritten.contains(CommandFlags::PREFER_REPLICA));
        assert!(rewritten.contains(CommandFlags::FIRE_AND_FORGET));
    }

    #[test]
    fn test_new_checks_arity() {
        let err = Message::node(CommandFlags::NONE, Command::Time, vec!["x".into()]).unwrap_err();
        assert!(matches!(err, Error::Arity { actual: 1, .. }));

        let err = Message::new(-2, CommandFlags::NONE, Command::DbSize, vec![]).unwrap_err();
        assert!(matches!(err, Error::InvalidMessage(_)));
    }

    #[test]
    fn test_ids_are_unique() {
        let a = Message::node(CommandFlags::NONE, Command::Ping, vec![]).unwrap();
        let b = Message::node(CommandFlags::NONE, Command::Ping, vec![]).unwrap();
        assert_ne!(a.id(), b.id());
    }

    #[test]
    fn test_set_role_preference_reports_change() {
        let msg = Message::node(CommandFlags::PREFER_REPLICA, Command::Ping, vec![]).unwrap();

        assert!(msg.set_role_preference(RolePreference::PreferMaster));
        assert!(!msg.set_role_preference(RolePreference::PreferMaster));
        assert_eq!(msg.role_preference(), RolePreference::PreferMaster);
    }

    #[test]
    fn test_internal_and_policy() {
        let msg = Message::node(CommandFlags::FIRE_AND_FORGET, Command::Ping, vec![]).unwrap();
        assert!(!msg.is_internal());
        assert_eq!(msg.completion_policy(), CompletionPolicy::DiscardResult);

        msg.set_internal_call();
        assert!(msg.is_internal());
    }

    #[test]
    fn test_flags_display() {
        assert_eq!(CommandFlags::NONE.to_string(), "None");
        assert_eq!(
            (CommandFlags::FIRE_AND_FORGET | CommandFlags::PREFER_REPLICA).to_string(),
            "FireAndForget|PreferReplica"
        );
    }

    #[test]
    fn test_message_display() {
        let msg = Message::new(
            3,
            CommandFlags::NONE,
            Command::Scan,
            vec![0i64.into(), "MATCH".into(), "user:*".into()],
        )
        .unwrap();
        assert_eq!(msg.to_string(), "[3]:SCAN 0 (+2 args)");
    }
}
