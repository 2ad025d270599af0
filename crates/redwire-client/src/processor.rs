//! Result processors: typed interpreters over the reply tree.
//!
//! Each processor is a stateless unit struct, shared by every message that
//! uses it. A processor accepts the reply shapes it was written for and
//! returns a [`ProtocolParseFailure`] for anything else; it never guesses.
//! Error replies never reach a processor, the dispatcher turns them into
//! [`Error::Server`](crate::Error::Server) first.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use chrono::{DateTime, TimeZone, Utc};

use redwire_proto::{Arg, Command, CommandFlags, Message, RawReply, ServerVersion};

use crate::endpoint::{Endpoint, ServerRole};
use crate::error::{ConnectionFailureKind, ProtocolParseFailure};

/// A fire-and-forget message a processor wants sent once the primary result
/// has been delivered.
pub struct FollowUp {
    pub message: Message,
    pub processor: &'static dyn ResultProcessor<()>,
}

/// What a processor can see while interpreting a reply.
pub struct ReplyContext<'a> {
    message: &'a Message,
    endpoint: &'a Arc<Endpoint>,
    configuration_channel: Option<&'a str>,
    follow_ups: Vec<FollowUp>,
}

impl<'a> ReplyContext<'a> {
    pub fn new(message: &'a Message, endpoint: &'a Arc<Endpoint>) -> Self {
        Self {
            message,
            endpoint,
            configuration_channel: None,
            follow_ups: Vec::new(),
        }
    }

    /// Set the channel used to announce configuration changes. Blank names
    /// count as unset.
    pub fn with_configuration_channel(mut self, channel: Option<&'a str>) -> Self {
        self.configuration_channel = channel.filter(|c| !c.trim().is_empty());
        self
    }

    pub fn configuration_channel(&self) -> Option<&'a str> {
        self.configuration_channel
    }

    /// The message being answered.
    pub fn message(&self) -> &Message {
        self.message
    }

    pub fn command(&self) -> Command {
        self.message.command()
    }

    /// The endpoint that produced the reply.
    pub fn endpoint(&self) -> &Arc<Endpoint> {
        self.endpoint
    }

    /// Queue a fire-and-forget, engine-internal message to the same endpoint.
    pub fn follow_up(
        &mut self,
        command: Command,
        args: Vec<Arg>,
        processor: &'static dyn ResultProcessor<()>,
    ) {
        let flags = CommandFlags::FIRE_AND_FORGET | CommandFlags::INTERNAL_CALL;
        match Message::node(flags, command, args) {
            Ok(message) => self.follow_ups.push(FollowUp { message, processor }),
            Err(e) => tracing::debug!(command = %command, error = %e, "dropping follow-up"),
        }
    }

    /// Take the queued follow-ups.
    pub fn take_follow_ups(&mut self) -> Vec<FollowUp> {
        std::mem::take(&mut self.follow_ups)
    }

    /// Build a parse failure for `reply`.
    pub fn unexpected(&self, expected: &'static str, reply: &RawReply) -> ProtocolParseFailure {
        ProtocolParseFailure {
            command: self.command(),
            expected,
            actual: reply.describe(),
        }
    }
}

/// Interprets a reply as a `T`.
pub trait ResultProcessor<T>: Send + Sync + 'static {
    /// Parse a non-error reply.
    fn parse(&self, ctx: &mut ReplyContext<'_>, reply: RawReply) -> Result<T, ProtocolParseFailure>;

    /// Value to complete with when the link fails in flight, for commands whose
    /// success shows up as the connection dropping. `None` reports the failure.
    fn accept_failure(&self, _kind: ConnectionFailureKind) -> Option<T> {
        None
    }
}

/// Succeeds only on the status `OK`.
pub struct DemandOk;

impl ResultProcessor<()> for DemandOk {
    fn parse(
        &self,
        ctx: &mut ReplyContext<'_>,
        reply: RawReply,
    ) -> Result<(), ProtocolParseFailure> {
        if reply.is_ok() {
            Ok(())
        } else {
            Err(ctx.unexpected("status OK", &reply))
        }
    }
}

/// An integer reply.
pub struct Int64;

impl ResultProcessor<i64> for Int64 {
    fn parse(
        &self,
        ctx: &mut ReplyContext<'_>,
        reply: RawReply,
    ) -> Result<i64, ProtocolParseFailure> {
        match reply {
            RawReply::Integer(value) => Ok(value),
            other => Err(ctx.unexpected("integer", &other)),
        }
    }
}

/// An integer reply mapped to `true` when nonzero.
pub struct Boolean;

impl ResultProcessor<bool> for Boolean {
    fn parse(
        &self,
        ctx: &mut ReplyContext<'_>,
        reply: RawReply,
    ) -> Result<bool, ProtocolParseFailure> {
        match reply {
            RawReply::Integer(value) => Ok(value != 0),
            other => Err(ctx.unexpected("integer", &other)),
        }
    }
}

/// A flat `key, value, key, value` array as ordered pairs.
///
/// Duplicate keys are kept in server order.
pub struct StringPairInterleaved;

impl ResultProcessor<Vec<(String, String)>> for StringPairInterleaved {
    fn parse(
        &self,
        ctx: &mut ReplyContext<'_>,
        reply: RawReply,
    ) -> Result<Vec<(String, String)>, ProtocolParseFailure> {
        const EXPECTED: &str = "array of alternating keys and values";
        let items = match reply.as_items() {
            Some(items) if items.len() % 2 == 0 => items,
            _ => return Err(ctx.unexpected(EXPECTED, &reply)),
        };

        let mut pairs = Vec::with_capacity(items.len() / 2);
        for pair in items.chunks_exact(2) {
            match (pair[0].as_bytes(), pair[1].as_bytes()) {
                (Some(key), Some(value)) => pairs.push((
                    String::from_utf8_lossy(key).into_owned(),
                    String::from_utf8_lossy(value).into_owned(),
                )),
                _ => return Err(ctx.unexpected(EXPECTED, &reply)),
            }
        }
        Ok(pairs)
    }
}

/// One page of a cursor enumeration.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanPage {
    /// Cursor for the next page; `0` when enumeration is complete.
    pub cursor: u64,
    pub items: Vec<Bytes>,
}

/// `[cursor, [item, ...]]`.
pub struct ScanPageProcessor;

impl ResultProcessor<ScanPage> for ScanPageProcessor {
    fn parse(
        &self,
        ctx: &mut ReplyContext<'_>,
        reply: RawReply,
    ) -> Result<ScanPage, ProtocolParseFailure> {
        const EXPECTED: &str = "two-element array of cursor and items";
        let (cursor, items) = match reply.as_items() {
            Some([cursor, items]) => (cursor, items),
            _ => return Err(ctx.unexpected(EXPECTED, &reply)),
        };

        let cursor = match cursor.as_u64() {
            Some(cursor) => cursor,
            None => return Err(ctx.unexpected(EXPECTED, &reply)),
        };
        let items = match items {
            RawReply::Array(Some(items)) => bulk_items(items),
            _ => None,
        };
        match items {
            Some(items) => Ok(ScanPage { cursor, items }),
            None => Err(ctx.unexpected(EXPECTED, &reply)),
        }
    }
}

fn bulk_items(items: &[RawReply]) -> Option<Vec<Bytes>> {
    items
        .iter()
        .map(|item| match item {
            RawReply::Bulk(Some(data)) => Some(data.clone()),
            _ => None,
        })
        .collect()
}

/// An array of non-nil bulk strings.
pub struct KeyArray;

impl ResultProcessor<Vec<Bytes>> for KeyArray {
    fn parse(
        &self,
        ctx: &mut ReplyContext<'_>,
        reply: RawReply,
    ) -> Result<Vec<Bytes>, ProtocolParseFailure> {
        match reply.as_items().and_then(bulk_items) {
            Some(keys) => Ok(keys),
            None => Err(ctx.unexpected("array of bulk strings", &reply)),
        }
    }
}

/// A non-nil bulk or status payload.
pub struct ByteString;

impl ResultProcessor<Bytes> for ByteString {
    fn parse(
        &self,
        ctx: &mut ReplyContext<'_>,
        reply: RawReply,
    ) -> Result<Bytes, ProtocolParseFailure> {
        match reply {
            RawReply::Bulk(Some(data)) | RawReply::Status(data) => Ok(data),
            other => Err(ctx.unexpected("bulk string", &other)),
        }
    }
}

/// A bulk reply that may be nil.
pub struct NullableBulk;

impl ResultProcessor<Option<Bytes>> for NullableBulk {
    fn parse(
        &self,
        ctx: &mut ReplyContext<'_>,
        reply: RawReply,
    ) -> Result<Option<Bytes>, ProtocolParseFailure> {
        match reply {
            RawReply::Bulk(data) => Ok(data),
            other => Err(ctx.unexpected("bulk string", &other)),
        }
    }
}

/// Bulk or status text, lossily decoded.
pub struct Utf8String;

impl ResultProcessor<String> for Utf8String {
    fn parse(
        &self,
        ctx: &mut ReplyContext<'_>,
        reply: RawReply,
    ) -> Result<String, ProtocolParseFailure> {
        match reply {
            RawReply::Bulk(Some(data)) | RawReply::Status(data) => {
                Ok(String::from_utf8_lossy(&data).into_owned())
            }
            other => Err(ctx.unexpected("text", &other)),
        }
    }
}

/// The reply tree, untouched.
pub struct Raw;

impl ResultProcessor<RawReply> for Raw {
    fn parse(
        &self,
        _ctx: &mut ReplyContext<'_>,
        reply: RawReply,
    ) -> Result<RawReply, ProtocolParseFailure> {
        Ok(reply)
    }
}

/// Accepts any non-error reply.
pub struct Discard;

impl ResultProcessor<()> for Discard {
    fn parse(
        &self,
        _ctx: &mut ReplyContext<'_>,
        _reply: RawReply,
    ) -> Result<(), ProtocolParseFailure> {
        Ok(())
    }
}

/// Round-trip time of a `PING` or `ECHO`.
pub struct ResponseTimer;

impl ResultProcessor<Duration> for ResponseTimer {
    fn parse(
        &self,
        ctx: &mut ReplyContext<'_>,
        reply: RawReply,
    ) -> Result<Duration, ProtocolParseFailure> {
        match reply {
            RawReply::Status(_) | RawReply::Bulk(Some(_)) => Ok(ctx.message().age()),
            other => Err(ctx.unexpected("status or bulk string", &other)),
        }
    }
}

/// A named section of `INFO` output.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InfoSection {
    pub name: String,
    pub entries: Vec<(String, String)>,
}

impl InfoSection {
    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}

/// Split `INFO` text into sections.
///
/// Entries before the first `# Header` land in a section with an empty name.
pub fn parse_info(text: &str) -> Vec<InfoSection> {
    let mut sections: Vec<InfoSection> = Vec::new();
    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if let Some(name) = line.strip_prefix('#') {
            sections.push(InfoSection {
                name: name.trim().to_string(),
                entries: Vec::new(),
            });
            continue;
        }
        if let Some((key, value)) = line.split_once(':') {
            if sections.is_empty() {
                sections.push(InfoSection::default());
            }
            if let Some(section) = sections.last_mut() {
                section.entries.push((key.to_string(), value.to_string()));
            }
        }
    }
    sections
}

/// `INFO` output grouped by section.
pub struct Info;

impl ResultProcessor<Vec<InfoSection>> for Info {
    fn parse(
        &self,
        ctx: &mut ReplyContext<'_>,
        reply: RawReply,
    ) -> Result<Vec<InfoSection>, ProtocolParseFailure> {
        match reply {
            RawReply::Bulk(Some(data)) => Ok(parse_info(&String::from_utf8_lossy(&data))),
            other => Err(ctx.unexpected("bulk string", &other)),
        }
    }
}

/// `TIME` (`[seconds, microseconds]`) or `LASTSAVE` (unix seconds).
pub struct Timestamp;

impl ResultProcessor<DateTime<Utc>> for Timestamp {
    fn parse(
        &self,
        ctx: &mut ReplyContext<'_>,
        reply: RawReply,
    ) -> Result<DateTime<Utc>, ProtocolParseFailure> {
        const EXPECTED: &str = "unix time";
        let (secs, micros) = match &reply {
            RawReply::Integer(secs) => (Some(*secs), Some(0)),
            RawReply::Array(Some(items)) if items.len() == 1 => (items[0].as_i64(), Some(0)),
            RawReply::Array(Some(items)) if items.len() == 2 => {
                (items[0].as_i64(), items[1].as_i64())
            }
            _ => (None, None),
        };
        let time = match (secs, micros) {
            (Some(secs), Some(micros)) if (0..1_000_000).contains(&micros) => {
                Utc.timestamp_opt(secs, (micros * 1_000) as u32).single()
            }
            _ => None,
        };
        time.ok_or_else(|| ctx.unexpected(EXPECTED, &reply))
    }
}

fn status_starts_with(reply: &RawReply, prefixes: &[&str]) -> bool {
    match reply {
        RawReply::Status(text) => prefixes
            .iter()
            .any(|prefix| text.starts_with(prefix.as_bytes())),
        _ => false,
    }
}

/// `BGSAVE` acknowledgement.
pub struct BackgroundSaveStarted;

impl ResultProcessor<()> for BackgroundSaveStarted {
    fn parse(
        &self,
        ctx: &mut ReplyContext<'_>,
        reply: RawReply,
    ) -> Result<(), ProtocolParseFailure> {
        let started = ["Background saving started", "Background saving scheduled"];
        if status_starts_with(&reply, &started) {
            Ok(())
        } else {
            Err(ctx.unexpected("background save started", &reply))
        }
    }
}

/// `BGREWRITEAOF` acknowledgement.
pub struct BackgroundRewriteStarted;

impl ResultProcessor<()> for BackgroundRewriteStarted {
    fn parse(
        &self,
        ctx: &mut ReplyContext<'_>,
        reply: RawReply,
    ) -> Result<(), ProtocolParseFailure> {
        if status_starts_with(
            &reply,
            &[
                "Background append only file rewriting started",
                "Background append only file rewriting scheduled",
            ],
        ) {
            Ok(())
        } else {
            Err(ctx.unexpected("background rewrite started", &reply))
        }
    }
}

/// `SHUTDOWN`: the connection closing is the success signal.
pub struct ShutdownAck;

impl ResultProcessor<()> for ShutdownAck {
    fn parse(
        &self,
        _ctx: &mut ReplyContext<'_>,
        _reply: RawReply,
    ) -> Result<(), ProtocolParseFailure> {
        Ok(())
    }

    fn accept_failure(&self, kind: ConnectionFailureKind) -> Option<()> {
        match kind {
            ConnectionFailureKind::SocketClosed | ConnectionFailureKind::SocketFailure => Some(()),
            _ => None,
        }
    }
}

/// Applies a `CONFIG GET` reply to the endpoint.
pub struct AutoConfigure;

impl ResultProcessor<()> for AutoConfigure {
    fn parse(
        &self,
        ctx: &mut ReplyContext<'_>,
        reply: RawReply,
    ) -> Result<(), ProtocolParseFailure> {
        let pairs = StringPairInterleaved.parse(ctx, reply)?;
        let endpoint = ctx.endpoint();
        for (key, value) in pairs {
            match key.as_str() {
                "databases" => {
                    if let Ok(count) = value.trim().parse::<i32>() {
                        if count > 0 && count != endpoint.databases() {
                            tracing::info!(endpoint = %endpoint, databases = count, "auto-configured databases");
                            endpoint.set_databases(count);
                        }
                    }
                }
                "slave-read-only" | "replica-read-only" => match value.trim() {
                    "yes" => endpoint.set_replica_read_only(true),
                    "no" => endpoint.set_replica_read_only(false),
                    _ => {}
                },
                _ => {}
            }
        }
        Ok(())
    }
}

/// `CONFIG SET` acknowledgement; re-reads the changed setting afterwards.
pub struct ConfigSetAck;

impl ResultProcessor<()> for ConfigSetAck {
    fn parse(
        &self,
        ctx: &mut ReplyContext<'_>,
        reply: RawReply,
    ) -> Result<(), ProtocolParseFailure> {
        DemandOk.parse(ctx, reply)?;
        if let Some(setting) = ctx.message().args().get(1).cloned() {
            ctx.follow_up(
                Command::Config,
                vec![Arg::from("GET"), setting],
                &AutoConfigure,
            );
        }
        Ok(())
    }
}

/// `REPLICAOF`/`SLAVEOF` acknowledgement; announces the change on the
/// configuration channel once the server has accepted it.
pub struct ReplicaOfAck;

impl ResultProcessor<()> for ReplicaOfAck {
    fn parse(
        &self,
        ctx: &mut ReplyContext<'_>,
        reply: RawReply,
    ) -> Result<(), ProtocolParseFailure> {
        DemandOk.parse(ctx, reply)?;
        if let Some(channel) = ctx.configuration_channel() {
            ctx.follow_up(
                Command::Publish,
                vec![Arg::from(channel), Arg::from("*")],
                &Discard,
            );
        }
        Ok(())
    }
}

/// Applies `INFO` version and role to the endpoint.
pub struct ServerProbe;

impl ResultProcessor<()> for ServerProbe {
    fn parse(
        &self,
        ctx: &mut ReplyContext<'_>,
        reply: RawReply,
    ) -> Result<(), ProtocolParseFailure> {
        let sections = Info.parse(ctx, reply)?;
        let endpoint = ctx.endpoint();
        for (key, value) in sections.iter().flat_map(|s| s.entries.iter()) {
            match key.as_str() {
                "redis_version" => match value.parse::<ServerVersion>() {
                    Ok(version) => {
                        endpoint.update_version(version);
                    }
                    Err(e) => tracing::warn!(endpoint = %endpoint, error = %e, "unparseable server version"),
                },
                "role" => {
                    if let Some(role) = ServerRole::from_info(value) {
                        endpoint.set_role(role);
                    }
                }
                _ => {}
            }
        }
        Ok(())
    }
}
