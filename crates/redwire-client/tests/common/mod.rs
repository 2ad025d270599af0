//! In-memory server used by the integration tests.
//!
//! `FakeServer` implements [`Transport`] by answering each message from a
//! small keyspace model, so the whole engine runs without sockets.

#![allow(dead_code)]

use std::collections::{BTreeMap, VecDeque};
use std::sync::mpsc;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use bytes::Bytes;
use parking_lot::Mutex;

use redwire_client::proto::{Arg, Command, CommandFlags, Message, RawReply, ServerVersion};
use redwire_client::{
    Client, ClientConfig, ConnectionFailureKind, Endpoint, ReplySlot, ServerRole, Transport,
};

/// Unix time reported by `TIME` and `LASTSAVE`.
pub const SERVER_TIME: i64 = 1_700_000_000;

pub fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// When replies reach the dispatcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Inside `submit`, on the caller's thread.
    Immediate,
    /// In submission order from one reader thread.
    Threaded,
    /// Only when the test calls [`FakeServer::release`].
    Held,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    Reply(RawReply),
    Fail(ConnectionFailureKind),
}

/// One message as seen by the server.
#[derive(Debug, Clone)]
pub struct Sent {
    pub id: u64,
    pub endpoint: String,
    pub database: i32,
    pub command: Command,
    pub args: Vec<String>,
    pub flags: CommandFlags,
}

impl Sent {
    pub fn line(&self) -> String {
        let mut line = self.command.to_string();
        for arg in &self.args {
            line.push(' ');
            line.push_str(arg);
        }
        line
    }
}

type Job = (Response, ReplySlot);

pub struct FakeServer {
    delivery: Delivery,
    keyspace: Mutex<BTreeMap<i32, BTreeMap<Bytes, Bytes>>>,
    settings: Mutex<Vec<(String, String)>>,
    info: Mutex<(String, String)>,
    scripted: Mutex<VecDeque<(Command, Response)>>,
    log: Mutex<Vec<Sent>>,
    held: Mutex<Vec<Job>>,
    worker: Mutex<Option<mpsc::Sender<Job>>>,
}

impl FakeServer {
    pub fn new(delivery: Delivery) -> Arc<Self> {
        let worker = match delivery {
            Delivery::Threaded => {
                let (tx, rx) = mpsc::channel::<Job>();
                thread::spawn(move || {
                    for (response, slot) in rx {
                        complete(response, &slot);
                    }
                });
                Some(tx)
            }
            _ => None,
        };
        Arc::new(Self {
            delivery,
            keyspace: Mutex::new(BTreeMap::new()),
            settings: Mutex::new(vec![
                ("databases".to_string(), "16".to_string()),
                ("maxmemory".to_string(), "0".to_string()),
                ("replica-read-only".to_string(), "yes".to_string()),
            ]),
            info: Mutex::new(("7.2.4".to_string(), "master".to_string())),
            scripted: Mutex::new(VecDeque::new()),
            log: Mutex::new(Vec::new()),
            held: Mutex::new(Vec::new()),
            worker: Mutex::new(worker),
        })
    }

    /// Store `keys` in `database`, each with its own name as value.
    pub fn seed(&self, database: i32, keys: &[&str]) {
        let mut keyspace = self.keyspace.lock();
        let db = keyspace.entry(database).or_default();
        for key in keys {
            let key = Bytes::copy_from_slice(key.as_bytes());
            db.insert(key.clone(), key);
        }
    }

    pub fn key_count(&self, database: i32) -> usize {
        self.keyspace.lock().get(&database).map_or(0, |db| db.len())
    }

    /// What `INFO` reports.
    pub fn set_info(&self, version: &str, role: &str) {
        *self.info.lock() = (version.to_string(), role.to_string());
    }

    /// Answer the next `command` with `response` instead of the model.
    pub fn script(&self, command: Command, response: Response) {
        self.scripted.lock().push_back((command, response));
    }

    pub fn sent(&self) -> Vec<Sent> {
        self.log.lock().clone()
    }

    pub fn sent_lines(&self) -> Vec<String> {
        self.log.lock().iter().map(Sent::line).collect()
    }

    pub fn sent_commands(&self) -> Vec<Command> {
        self.log.lock().iter().map(|s| s.command).collect()
    }

    pub fn clear_log(&self) {
        self.log.lock().clear();
    }

    pub fn held_count(&self) -> usize {
        self.held.lock().len()
    }

    /// Deliver every held reply in submission order.
    pub fn release(&self) -> usize {
        let jobs = std::mem::take(&mut *self.held.lock());
        let count = jobs.len();
        for (response, slot) in jobs {
            complete(response, &slot);
        }
        count
    }

    /// Held slots, without delivering them.
    pub fn take_held(&self) -> Vec<(Response, ReplySlot)> {
        std::mem::take(&mut *self.held.lock())
    }

    fn respond(&self, message: &Message) -> Response {
        let command = message.command();
        {
            let mut scripted = self.scripted.lock();
            if let Some(index) = scripted.iter().position(|(c, _)| *c == command) {
                if let Some((_, response)) = scripted.remove(index) {
                    return response;
                }
            }
        }

        let args: Vec<Bytes> = message.args().iter().map(Arg::to_bytes).collect();
        let db = message.database().max(0);
        match command {
            Command::Ping => match args.first() {
                Some(text) => ok_bulk(text.clone()),
                None => Response::Reply(RawReply::status("PONG")),
            },
            Command::Echo => ok_bulk(args[0].clone()),
            Command::Get => {
                let value = self.keyspace.lock().get(&db).and_then(|d| d.get(&args[0]).cloned());
                Response::Reply(RawReply::Bulk(value))
            }
            Command::Set => {
                self.keyspace
                    .lock()
                    .entry(db)
                    .or_default()
                    .insert(args[0].clone(), args[1].clone());
                ok()
            }
            Command::Del | Command::Unlink => {
                let mut keyspace = self.keyspace.lock();
                let removed = match keyspace.get_mut(&db) {
                    Some(d) => args.iter().filter(|k| d.remove(*k).is_some()).count(),
                    None => 0,
                };
                Response::Reply(RawReply::Integer(removed as i64))
            }
            Command::DbSize => Response::Reply(RawReply::Integer(self.key_count(db) as i64)),
            Command::FlushDb => {
                self.keyspace.lock().remove(&db);
                ok()
            }
            Command::FlushAll => {
                self.keyspace.lock().clear();
                ok()
            }
            Command::SwapDb => {
                let (a, b) = match (parse_i32(&args[0]), parse_i32(&args[1])) {
                    (Some(a), Some(b)) => (a, b),
                    _ => return err("ERR invalid first DB index"),
                };
                let mut keyspace = self.keyspace.lock();
                let first = keyspace.remove(&a).unwrap_or_default();
                let second = keyspace.remove(&b).unwrap_or_default();
                keyspace.insert(a, second);
                keyspace.insert(b, first);
                ok()
            }
            Command::Keys => {
                let keys = self.matching(db, &args[0], 0, usize::MAX).0;
                Response::Reply(RawReply::array(keys.into_iter().map(RawReply::bulk).collect()))
            }
            Command::Scan => self.scan(db, &args),
            Command::Config => self.config(&args),
            Command::Info => {
                let (version, role) = self.info.lock().clone();
                ok_bulk(Bytes::from(format!(
                    "# Server\r\nredis_version:{}\r\nredis_mode:standalone\r\n\r\n# Replication\r\nrole:{}\r\nconnected_slaves:0\r\n",
                    version, role
                )))
            }
            Command::Time => Response::Reply(RawReply::array(vec![
                RawReply::bulk(SERVER_TIME.to_string()),
                RawReply::bulk("250000"),
            ])),
            Command::LastSave => Response::Reply(RawReply::Integer(SERVER_TIME)),
            Command::Save => ok(),
            Command::BgSave => Response::Reply(RawReply::status("Background saving started")),
            Command::BgRewriteAof => Response::Reply(RawReply::status(
                "Background append only file rewriting started",
            )),
            Command::Shutdown => Response::Fail(ConnectionFailureKind::SocketClosed),
            Command::ReplicaOf | Command::SlaveOf => ok(),
            Command::Publish => Response::Reply(RawReply::Integer(0)),
            Command::Client => {
                if args[0].eq_ignore_ascii_case(b"LIST") {
                    let line = b"id=3 addr=127.0.0.1:50412 name= db=0 cmd=client\n";
                    ok_bulk(Bytes::from_static(line))
                } else if args[0].eq_ignore_ascii_case(b"KILL")
                    || args[0].eq_ignore_ascii_case(b"SETNAME")
                {
                    ok()
                } else {
                    err("ERR unknown subcommand")
                }
            }
            Command::Role | Command::Debug | Command::SlowLog => {
                err("ERR unsupported in test server")
            }
        }
    }

    /// Keys in `db` from index `start`, at most `count` of them, filtered by
    /// `pattern` after slicing. Returns the keys and the index after the slice.
    fn matching(&self, db: i32, pattern: &[u8], start: usize, count: usize) -> (Vec<Bytes>, usize) {
        let keyspace = self.keyspace.lock();
        let Some(d) = keyspace.get(&db) else {
            return (Vec::new(), 0);
        };
        let end = start.saturating_add(count).min(d.len());
        let keys = d
            .keys()
            .skip(start)
            .take(end.saturating_sub(start))
            .filter(|key| glob_match(pattern, key))
            .cloned()
            .collect();
        (keys, if end >= d.len() { 0 } else { end })
    }

    fn scan(&self, db: i32, args: &[Bytes]) -> Response {
        let Some(cursor) = std::str::from_utf8(&args[0]).ok().and_then(|s| s.parse::<usize>().ok())
        else {
            return err("ERR invalid cursor");
        };
        let mut pattern: &[u8] = b"*";
        let mut count = 10usize;
        let mut rest = args[1..].iter();
        while let Some(option) = rest.next() {
            let Some(value) = rest.next() else {
                return err("ERR syntax error");
            };
            if option.eq_ignore_ascii_case(b"MATCH") {
                pattern = &value[..];
            } else if option.eq_ignore_ascii_case(b"COUNT") {
                match std::str::from_utf8(value).ok().and_then(|s| s.parse().ok()) {
                    Some(n) if n > 0 => count = n,
                    _ => return err("ERR syntax error"),
                }
            } else {
                return err("ERR syntax error");
            }
        }
        let (keys, next) = self.matching(db, pattern, cursor, count);
        Response::Reply(RawReply::array(vec![
            RawReply::bulk(next.to_string()),
            RawReply::array(keys.into_iter().map(RawReply::bulk).collect()),
        ]))
    }

    fn config(&self, args: &[Bytes]) -> Response {
        let sub = String::from_utf8_lossy(&args[0]).to_ascii_uppercase();
        match sub.as_str() {
            "GET" if args.len() == 2 => {
                let settings = self.settings.lock();
                let mut items = Vec::new();
                for (key, value) in settings.iter() {
                    if glob_match(&args[1], key.as_bytes()) {
                        items.push(RawReply::bulk(key.clone()));
                        items.push(RawReply::bulk(value.clone()));
                    }
                }
                Response::Reply(RawReply::array(items))
            }
            "SET" if args.len() == 3 => {
                let key = String::from_utf8_lossy(&args[1]).into_owned();
                let value = String::from_utf8_lossy(&args[2]).into_owned();
                let mut settings = self.settings.lock();
                match settings.iter_mut().find(|(k, _)| *k == key) {
                    Some(entry) => entry.1 = value,
                    None => settings.push((key, value)),
                }
                ok()
            }
            "RESETSTAT" | "REWRITE" => ok(),
            _ => err("ERR unknown CONFIG subcommand"),
        }
    }
}

impl Transport for FakeServer {
    fn submit(
        &self,
        endpoint: &Arc<Endpoint>,
        message: Arc<Message>,
        slot: ReplySlot,
    ) -> Result<(), ConnectionFailureKind> {
        self.log.lock().push(Sent {
            id: message.id(),
            endpoint: endpoint.addr().to_string(),
            database: message.database(),
            command: message.command(),
            args: message.args().iter().map(|a| a.to_string()).collect(),
            flags: message.flags(),
        });

        let response = self.respond(&message);
        match self.delivery {
            Delivery::Immediate => complete(response, &slot),
            Delivery::Held => self.held.lock().push((response, slot)),
            Delivery::Threaded => {
                let sent = match self.worker.lock().as_ref() {
                    Some(tx) => tx.send((response, slot)).is_ok(),
                    None => false,
                };
                if !sent {
                    return Err(ConnectionFailureKind::SocketClosed);
                }
            }
        }
        Ok(())
    }
}

fn complete(response: Response, slot: &ReplySlot) {
    match response {
        Response::Reply(reply) => {
            slot.deliver(reply);
        }
        Response::Fail(kind) => {
            slot.fail(kind);
        }
    }
}

fn ok() -> Response {
    Response::Reply(RawReply::status("OK"))
}

fn ok_bulk(data: Bytes) -> Response {
    Response::Reply(RawReply::bulk(data))
}

fn err(text: &str) -> Response {
    Response::Reply(RawReply::error(text))
}

fn parse_i32(data: &[u8]) -> Option<i32> {
    std::str::from_utf8(data).ok()?.parse().ok()
}

/// Glob match supporting `*` and `?`.
pub fn glob_match(pattern: &[u8], text: &[u8]) -> bool {
    match (pattern.first(), text.first()) {
        (None, None) => true,
        (Some(b'*'), _) => {
            glob_match(&pattern[1..], text) || (!text.is_empty() && glob_match(pattern, &text[1..]))
        }
        (Some(b'?'), Some(_)) => glob_match(&pattern[1..], &text[1..]),
        (Some(p), Some(t)) if p == t => glob_match(&pattern[1..], &text[1..]),
        _ => false,
    }
}

/// A client wired to one fake server with a connected master.
pub struct TestContext {
    pub server: Arc<FakeServer>,
    pub client: Client,
    pub master: Arc<Endpoint>,
}

pub const MASTER: &str = "127.0.0.1:6379";
pub const REPLICA: &str = "127.0.0.1:6380";

impl TestContext {
    pub fn new(delivery: Delivery) -> Self {
        Self::with_config(ClientConfig::default(), delivery)
    }

    pub fn admin(delivery: Delivery) -> Self {
        Self::with_config(ClientConfig::default().with_allow_admin(true), delivery)
    }

    pub fn with_config(config: ClientConfig, delivery: Delivery) -> Self {
        init_logging();
        let server = FakeServer::new(delivery);
        let client = Client::new(config, server.clone()).expect("valid config");
        let master = client.add_endpoint(MASTER, ServerRole::Master);
        master.reconnect(ServerVersion::new(7, 2, 4));
        Self {
            server,
            client,
            master,
        }
    }

    /// Add a connected replica.
    pub fn add_replica(&self) -> Arc<Endpoint> {
        let replica = self.client.add_endpoint(REPLICA, ServerRole::Replica);
        replica.reconnect(ServerVersion::new(7, 2, 4));
        replica
    }

    pub fn master_server(&self) -> redwire_client::Server {
        self.client.server(MASTER).expect("master registered")
    }
}

/// Poll `condition` for up to two seconds.
pub fn eventually(condition: impl Fn() -> bool) -> bool {
    for _ in 0..200 {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(10));
    }
    condition()
}

pub fn keys_to_strings(keys: &[Bytes]) -> Vec<String> {
    keys.iter()
        .map(|k| String::from_utf8_lossy(k).into_owned())
        .collect()
}
