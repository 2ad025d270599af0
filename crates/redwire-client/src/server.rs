//! Node-scoped operations against one endpoint.
//!
//! Every operation comes in two shapes over the same dispatch path: a
//! blocking method and an `_async` method returning a [`Completion`].

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use chrono::{DateTime, Utc};

use redwire_proto::{Arg, Command, CommandFlags, Features, Message, RawReply, NO_DATABASE};

use crate::cursor::{KeySequence, ScanCursor, ScanOptions};
use crate::dispatch::{Completion, Dispatcher};
use crate::endpoint::Endpoint;
use crate::error::{Error, PolicyViolation, Result};
use crate::processor::{
    BackgroundRewriteStarted, BackgroundSaveStarted, ByteString, ConfigSetAck, DemandOk, Info,
    InfoSection, Int64, KeyArray, Raw, ReplicaOfAck, ResponseTimer, ResultProcessor, ServerProbe,
    ShutdownAck, StringPairInterleaved, Timestamp, Utf8String,
};

/// How the server should persist its dataset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveType {
    /// `BGREWRITEAOF`.
    BackgroundRewriteAppendOnlyFile,
    /// `BGSAVE`.
    BackgroundSave,
    /// `SAVE`; blocks the server until done.
    ForegroundSave,
}

/// Whether `SHUTDOWN` saves first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ShutdownMode {
    /// Use the server's configured behaviour.
    #[default]
    Default,
    /// `SHUTDOWN NOSAVE`.
    Never,
    /// `SHUTDOWN SAVE`.
    Always,
}

/// Operations addressed to a single server node.
#[derive(Debug, Clone)]
pub struct Server {
    dispatcher: Dispatcher,
    endpoint: Arc<Endpoint>,
}

impl Server {
    pub fn new(dispatcher: Dispatcher, endpoint: Arc<Endpoint>) -> Self {
        Self {
            dispatcher,
            endpoint,
        }
    }

    pub fn endpoint(&self) -> &Arc<Endpoint> {
        &self.endpoint
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    pub fn is_connected(&self) -> bool {
        self.endpoint.is_connected()
    }

    pub fn features(&self) -> Features {
        self.endpoint.features()
    }

    /// Allow write commands while this node is a replica.
    pub fn set_allow_replica_writes(&self, allow: bool) {
        self.endpoint.set_allow_replica_writes(allow);
    }

    fn send<T>(
        &self,
        database: i32,
        flags: CommandFlags,
        command: Command,
        args: Vec<Arg>,
        processor: &'static dyn ResultProcessor<T>,
    ) -> Completion<T>
    where
        T: Default + Send + 'static,
    {
        match Message::new(database, flags, command, args) {
            Ok(message) => self
                .dispatcher
                .execute_async(message, processor, Some(&self.endpoint)),
            Err(e) => Completion::failed(e.into()),
        }
    }

    fn send_internal<T>(
        &self,
        database: i32,
        flags: CommandFlags,
        command: Command,
        args: Vec<Arg>,
        processor: &'static dyn ResultProcessor<T>,
    ) -> Completion<T>
    where
        T: Default + Send + 'static,
    {
        match Message::new(database, flags, command, args) {
            Ok(message) => {
                message.set_internal_call();
                self.dispatcher
                    .execute_async(message, processor, Some(&self.endpoint))
            }
            Err(e) => Completion::failed(e.into()),
        }
    }

    /// Round-trip time of a `PING`.
    pub fn ping(&self, flags: CommandFlags) -> Result<Duration> {
        self.ping_async(flags).wait()
    }

    pub fn ping_async(&self, flags: CommandFlags) -> Completion<Duration> {
        self.send(NO_DATABASE, flags, Command::Ping, vec![], &ResponseTimer)
    }

    pub fn echo(&self, message: impl Into<Bytes>, flags: CommandFlags) -> Result<Bytes> {
        self.echo_async(message, flags).wait()
    }

    pub fn echo_async(&self, message: impl Into<Bytes>, flags: CommandFlags) -> Completion<Bytes> {
        let args = vec![Arg::from(message.into())];
        self.send(NO_DATABASE, flags, Command::Echo, args, &ByteString)
    }

    /// `CONFIG GET`; `None` reads every setting.
    pub fn config_get(
        &self,
        pattern: Option<&str>,
        flags: CommandFlags,
    ) -> Result<Vec<(String, String)>> {
        self.config_get_async(pattern, flags).wait()
    }

    pub fn config_get_async(
        &self,
        pattern: Option<&str>,
        flags: CommandFlags,
    ) -> Completion<Vec<(String, String)>> {
        let args = vec!["GET".into(), pattern.unwrap_or("*").into()];
        self.send(NO_DATABASE, flags, Command::Config, args, &StringPairInterleaved)
    }

    /// `CONFIG SET`, then re-read the setting in the background.
    pub fn config_set(&self, setting: &str, value: &str, flags: CommandFlags) -> Result<()> {
        self.config_set_async(setting, value, flags).wait()
    }

    pub fn config_set_async(
        &self,
        setting: &str,
        value: &str,
        flags: CommandFlags,
    ) -> Completion<()> {
        let args = vec!["SET".into(), setting.into(), value.into()];
        self.send(NO_DATABASE, flags, Command::Config, args, &ConfigSetAck)
    }

    pub fn config_reset_statistics(&self, flags: CommandFlags) -> Result<()> {
        self.config_reset_statistics_async(flags).wait()
    }

    pub fn config_reset_statistics_async(&self, flags: CommandFlags) -> Completion<()> {
        self.send(NO_DATABASE, flags, Command::Config, vec!["RESETSTAT".into()], &DemandOk)
    }

    pub fn config_rewrite(&self, flags: CommandFlags) -> Result<()> {
        self.config_rewrite_async(flags).wait()
    }

    pub fn config_rewrite_async(&self, flags: CommandFlags) -> Completion<()> {
        self.send(NO_DATABASE, flags, Command::Config, vec!["REWRITE".into()], &DemandOk)
    }

    /// Number of keys in `database`.
    pub fn database_size(&self, database: i32, flags: CommandFlags) -> Result<i64> {
        self.database_size_async(database, flags).wait()
    }

    pub fn database_size_async(&self, database: i32, flags: CommandFlags) -> Completion<i64> {
        self.send(database, flags, Command::DbSize, vec![], &Int64)
    }

    pub fn flush_database(&self, database: i32, flags: CommandFlags) -> Result<()> {
        self.flush_database_async(database, flags).wait()
    }

    pub fn flush_database_async(&self, database: i32, flags: CommandFlags) -> Completion<()> {
        self.send(database, flags, Command::FlushDb, vec![], &DemandOk)
    }

    pub fn flush_all_databases(&self, flags: CommandFlags) -> Result<()> {
        self.flush_all_databases_async(flags).wait()
    }

    pub fn flush_all_databases_async(&self, flags: CommandFlags) -> Completion<()> {
        self.send(NO_DATABASE, flags, Command::FlushAll, vec![], &DemandOk)
    }

    /// `INFO`, grouped by section.
    pub fn info(&self, section: Option<&str>, flags: CommandFlags) -> Result<Vec<InfoSection>> {
        self.info_async(section, flags).wait()
    }

    pub fn info_async(
        &self,
        section: Option<&str>,
        flags: CommandFlags,
    ) -> Completion<Vec<InfoSection>> {
        self.send(NO_DATABASE, flags, Command::Info, info_args(section), &Info)
    }

    /// `INFO` text as sent by the server.
    pub fn info_raw(&self, section: Option<&str>, flags: CommandFlags) -> Result<String> {
        self.info_raw_async(section, flags).wait()
    }

    pub fn info_raw_async(&self, section: Option<&str>, flags: CommandFlags) -> Completion<String> {
        self.send(NO_DATABASE, flags, Command::Info, info_args(section), &Utf8String)
    }

    /// Time of the last successful save.
    pub fn last_save(&self, flags: CommandFlags) -> Result<DateTime<Utc>> {
        self.last_save_async(flags).wait()
    }

    pub fn last_save_async(&self, flags: CommandFlags) -> Completion<DateTime<Utc>> {
        self.send(NO_DATABASE, flags, Command::LastSave, vec![], &Timestamp)
    }

    /// The server's clock.
    pub fn time(&self, flags: CommandFlags) -> Result<DateTime<Utc>> {
        self.time_async(flags).wait()
    }

    pub fn time_async(&self, flags: CommandFlags) -> Completion<DateTime<Utc>> {
        self.send(NO_DATABASE, flags, Command::Time, vec![], &Timestamp)
    }

    pub fn save(&self, save_type: SaveType, flags: CommandFlags) -> Result<()> {
        self.save_async(save_type, flags).wait()
    }

    pub fn save_async(&self, save_type: SaveType, flags: CommandFlags) -> Completion<()> {
        match save_type {
            SaveType::BackgroundRewriteAppendOnlyFile => self.send(
                NO_DATABASE,
                flags,
                Command::BgRewriteAof,
                vec![],
                &BackgroundRewriteStarted,
            ),
            SaveType::BackgroundSave => {
                self.send(NO_DATABASE, flags, Command::BgSave, vec![], &BackgroundSaveStarted)
            }
            SaveType::ForegroundSave => {
                self.send(NO_DATABASE, flags, Command::Save, vec![], &DemandOk)
            }
        }
    }

    /// Stop the server. The connection closing counts as success.
    pub fn shutdown(&self, mode: ShutdownMode, flags: CommandFlags) -> Result<()> {
        self.shutdown_async(mode, flags).wait()
    }

    pub fn shutdown_async(&self, mode: ShutdownMode, flags: CommandFlags) -> Completion<()> {
        let args = match mode {
            ShutdownMode::Default => vec![],
            ShutdownMode::Never => vec!["NOSAVE".into()],
            ShutdownMode::Always => vec!["SAVE".into()],
        };
        self.send(NO_DATABASE, flags, Command::Shutdown, args, &ShutdownAck)
    }

    pub fn swap_databases(&self, first: i32, second: i32, flags: CommandFlags) -> Result<()> {
        self.swap_databases_async(first, second, flags).wait()
    }

    pub fn swap_databases_async(
        &self,
        first: i32,
        second: i32,
        flags: CommandFlags,
    ) -> Completion<()> {
        let args = vec![first.into(), second.into()];
        self.send(NO_DATABASE, flags, Command::SwapDb, args, &DemandOk)
    }

    /// Make this node a replica of `master` (`host:port`), or a master when
    /// `None`.
    pub fn replica_of(&self, master: Option<&str>, flags: CommandFlags) -> Result<()> {
        self.replica_of_async(master, flags).wait()
    }

    /// Sends, in order on this node's connection: a tie-breaker `DEL`, the
    /// `REPLICAOF` itself, and, once the server has accepted it, a
    /// configuration-change `PUBLISH`. Only the `REPLICAOF` result is
    /// reported.
    ///
    /// Nothing is sent when the replication command is refused by policy.
    pub fn replica_of_async(&self, master: Option<&str>, flags: CommandFlags) -> Completion<()> {
        let args = match master {
            Some(master) if master == self.endpoint.addr() => {
                return Completion::failed(
                    PolicyViolation::SelfReplication(master.to_string()).into(),
                );
            }
            Some(master) => match master.rsplit_once(':') {
                Some((host, port)) if !host.is_empty() && port.parse::<u16>().is_ok() => {
                    vec![Arg::from(host), Arg::from(port)]
                }
                _ => {
                    return Completion::failed(Error::Usage(format!(
                        "replication master must be host:port, got {:?}",
                        master
                    )));
                }
            },
            None => vec!["NO".into(), "ONE".into()],
        };
        let command = if self.features().replica_commands() {
            Command::ReplicaOf
        } else {
            Command::SlaveOf
        };

        // Refusals still go through dispatch so they are counted.
        if self.dispatcher.check_policy(command, false).is_ok() {
            let config = self.dispatcher.config();
            if let Some(key) = config.tie_breaker.as_deref().filter(|k| !k.trim().is_empty()) {
                let side_flags = CommandFlags::FIRE_AND_FORGET | CommandFlags::NO_REDIRECT;
                let args = vec![Arg::key(key.to_string())];
                let _ = self.send_internal(0, side_flags, Command::Del, args, &Int64);
            }
        }

        self.send(NO_DATABASE, flags, command, args, &ReplicaOfAck)
    }

    /// `CLIENT KILL addr`.
    pub fn client_kill(&self, client_addr: &str, flags: CommandFlags) -> Result<()> {
        self.client_kill_async(client_addr, flags).wait()
    }

    pub fn client_kill_async(&self, client_addr: &str, flags: CommandFlags) -> Completion<()> {
        let args = vec!["KILL".into(), client_addr.into()];
        self.send(NO_DATABASE, flags, Command::Client, args, &DemandOk)
    }

    /// `CLIENT LIST` text.
    pub fn client_list_raw(&self, flags: CommandFlags) -> Result<String> {
        self.client_list_raw_async(flags).wait()
    }

    pub fn client_list_raw_async(&self, flags: CommandFlags) -> Completion<String> {
        self.send(NO_DATABASE, flags, Command::Client, vec!["LIST".into()], &Utf8String)
    }

    /// Any verb with arguments; the reply tree comes back unparsed.
    pub fn execute(&self, command: &str, args: Vec<Arg>, flags: CommandFlags) -> Result<RawReply> {
        self.execute_async(command, args, flags).wait()
    }

    pub fn execute_async(
        &self,
        command: &str,
        args: Vec<Arg>,
        flags: CommandFlags,
    ) -> Completion<RawReply> {
        match command.parse::<Command>() {
            Ok(command) => self.send(NO_DATABASE, flags, command, args, &Raw),
            Err(e) => Completion::failed(e.into()),
        }
    }

    /// Read version and role from `INFO` and apply them to the endpoint.
    ///
    /// When a client name is configured it is registered first with
    /// `CLIENT SETNAME`.
    pub fn probe(&self) -> Result<()> {
        self.probe_async().wait()
    }

    pub fn probe_async(&self) -> Completion<()> {
        if let Some(name) = self.dispatcher.config().client_name.as_deref() {
            let args = vec![Arg::from("SETNAME"), Arg::from(name)];
            let flags = CommandFlags::FIRE_AND_FORGET | CommandFlags::NO_REDIRECT;
            let _ = self.send_internal(NO_DATABASE, flags, Command::Client, args, &DemandOk);
        }
        self.send_internal(NO_DATABASE, CommandFlags::NONE, Command::Info, vec![], &ServerProbe)
    }

    /// Every key in `database` matching `pattern`, using the configured page
    /// size.
    pub fn keys(
        &self,
        database: i32,
        pattern: Option<&str>,
        flags: CommandFlags,
    ) -> Result<KeySequence> {
        let mut options = ScanOptions::new(database)
            .with_page_size(self.dispatcher.config().default_page_size)
            .with_flags(flags);
        if let Some(pattern) = pattern {
            options = options.with_pattern(Bytes::copy_from_slice(pattern.as_bytes()));
        }
        self.keys_with(options)
    }

    /// Enumerate keys with `SCAN` when the server supports it, else with a
    /// single `KEYS`.
    ///
    /// Resume options need `SCAN`; asking for them on a server without it is
    /// [`Error::NoCursorSupport`]. The `KEYS` fallback blocks until the whole
    /// reply has arrived.
    pub fn keys_with(&self, options: ScanOptions) -> Result<KeySequence> {
        match self.plan_keys(options)? {
            KeysPlan::Scan(cursor) => Ok(KeySequence::Scan(cursor)),
            KeysPlan::Keys(completion) => {
                Ok(KeySequence::Materialized(completion.wait()?.into_iter()))
            }
        }
    }

    /// [`keys_with`](Self::keys_with) for async callers.
    pub async fn keys_with_async(&self, options: ScanOptions) -> Result<KeySequence> {
        match self.plan_keys(options)? {
            KeysPlan::Scan(cursor) => Ok(KeySequence::Scan(cursor)),
            KeysPlan::Keys(completion) => {
                Ok(KeySequence::Materialized(completion.await?.into_iter()))
            }
        }
    }

    fn plan_keys(&self, options: ScanOptions) -> Result<KeysPlan> {
        options.validate()?;

        let use_scan =
            self.features().scan() && self.dispatcher.config().is_available(Command::Scan);
        if use_scan {
            return Ok(KeysPlan::Scan(ScanCursor::new(
                self.dispatcher.clone(),
                Arc::clone(&self.endpoint),
                options,
            )));
        }
        if options.is_resume() {
            return Err(Error::NoCursorSupport {
                command: Command::Scan,
            });
        }

        let pattern = options
            .pattern
            .unwrap_or_else(|| Bytes::from_static(b"*"));
        tracing::debug!(endpoint = %self.endpoint, "cursor scan unavailable, using KEYS");
        Ok(KeysPlan::Keys(self.send(
            options.database,
            options.flags,
            Command::Keys,
            vec![Arg::from(pattern)],
            &KeyArray,
        )))
    }
}

enum KeysPlan {
    Scan(ScanCursor),
    Keys(Completion<Vec<Bytes>>),
}

fn info_args(section: Option<&str>) -> Vec<Arg> {
    section.map(|s| vec![Arg::from(s)]).unwrap_or_default()
}
