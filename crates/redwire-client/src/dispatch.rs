//! The dispatch core.
//!
//! A [`Dispatcher`] routes a [`Message`] to an [`Endpoint`], hands it to the
//! [`Transport`], and pairs the eventual reply with the caller through an
//! in-flight registry. The algorithm is written once against [`Completion`];
//! the synchronous shape is `execute_async(..).wait()`.
//!
//! # Completion
//!
//! Every registered message is completed exactly once, by whichever of reply
//! delivery, connection failure or external timeout reaches the registry
//! first. Later attempts are no-ops and report `false`.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::{Duration, Instant};

use dashmap::DashMap;
use tokio::sync::oneshot;

use redwire_proto::{Command, Message, RawReply};

use crate::config::ClientConfig;
use crate::endpoint::Endpoint;
use crate::error::{ConnectionFailureKind, Error, PolicyViolation, Result};
use crate::metrics::DispatchMetrics;
use crate::processor::{FollowUp, ReplyContext, ResultProcessor};
use crate::routing::Router;

/// The physical link, supplied by the embedding application.
///
/// Implementations serialize the message (see
/// [`redwire_proto::framing::encode_message`]), queue it on the endpoint's
/// connection and later complete `slot` with the reply or a failure.
///
/// Messages submitted for one endpoint must reach the wire and be completed
/// in submission order. Slots must not be completed while holding a lock that
/// `submit` also takes: completing a slot can dispatch follow-up messages.
pub trait Transport: Send + Sync + 'static {
    /// Queue `message` on `endpoint`'s connection.
    ///
    /// An `Err` means the message was never written; the dispatcher then fails
    /// the slot itself.
    fn submit(
        &self,
        endpoint: &Arc<Endpoint>,
        message: Arc<Message>,
        slot: ReplySlot,
    ) -> std::result::Result<(), ConnectionFailureKind>;
}

/// How an in-flight message ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Reply(RawReply),
    Failed(ConnectionFailureKind),
    TimedOut,
}

type Completer = Box<dyn FnOnce(Outcome) + Send + Sync>;

struct InFlight {
    command: Command,
    endpoint: String,
    submitted_at: Instant,
    completer: Completer,
}

/// In-flight messages keyed by message id.
#[derive(Default)]
struct Registry {
    pending: DashMap<u64, InFlight>,
}

impl Registry {
    fn register(&self, id: u64, entry: InFlight) {
        self.pending.insert(id, entry);
    }

    /// Remove and run the completer. `remove` is the single-completion guard.
    fn complete(&self, id: u64, outcome: Outcome) -> bool {
        match self.pending.remove(&id) {
            Some((_, entry)) => {
                tracing::trace!(
                    command = %entry.command,
                    endpoint = %entry.endpoint,
                    elapsed_us = entry.submitted_at.elapsed().as_micros() as u64,
                    "completing message"
                );
                (entry.completer)(outcome);
                true
            }
            None => false,
        }
    }

    fn ids_where(&self, predicate: impl Fn(&InFlight) -> bool) -> Vec<u64> {
        self.pending
            .iter()
            .filter(|entry| predicate(entry.value()))
            .map(|entry| *entry.key())
            .collect()
    }
}

/// The transport's handle for completing one in-flight message.
#[derive(Clone)]
pub struct ReplySlot {
    id: u64,
    registry: Arc<Registry>,
}

impl ReplySlot {
    /// Id of the message this slot completes.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Deliver the raw reply. Returns `false` if already completed.
    pub fn deliver(&self, reply: RawReply) -> bool {
        self.registry.complete(self.id, Outcome::Reply(reply))
    }

    /// Report a connection failure. Returns `false` if already completed.
    pub fn fail(&self, kind: ConnectionFailureKind) -> bool {
        self.registry.complete(self.id, Outcome::Failed(kind))
    }

    /// Report an external timeout. Returns `false` if already completed.
    pub fn time_out(&self) -> bool {
        self.registry.complete(self.id, Outcome::TimedOut)
    }

    /// Whether the message is still waiting for completion.
    pub fn is_pending(&self) -> bool {
        self.registry.pending.contains_key(&self.id)
    }
}

impl fmt::Debug for ReplySlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReplySlot")
            .field("id", &self.id)
            .field("pending", &self.is_pending())
            .finish()
    }
}

/// A result that is available now or will be later.
///
/// Await it from async code, or call [`wait`](Self::wait) from a thread that
/// is not driving a Tokio runtime.
#[must_use = "a completion does nothing unless awaited or waited on"]
pub struct Completion<T> {
    state: CompletionState<T>,
}

enum CompletionState<T> {
    Ready(Option<Result<T>>),
    Pending {
        rx: oneshot::Receiver<Result<T>>,
        command: Command,
        endpoint: String,
    },
}

impl<T> Completion<T> {
    /// A completion that already holds `value`.
    pub fn ready(value: T) -> Self {
        Self {
            state: CompletionState::Ready(Some(Ok(value))),
        }
    }

    /// A completion that already holds `error`.
    pub fn failed(error: Error) -> Self {
        Self {
            state: CompletionState::Ready(Some(Err(error))),
        }
    }

    fn pending(rx: oneshot::Receiver<Result<T>>, command: Command, endpoint: String) -> Self {
        Self {
            state: CompletionState::Pending {
                rx,
                command,
                endpoint,
            },
        }
    }

    /// Whether the result was known when the completion was created.
    pub fn is_ready(&self) -> bool {
        matches!(self.state, CompletionState::Ready(_))
    }

    /// Block the current thread until the result is available.
    ///
    /// # Panics
    ///
    /// Panics if called from within an asynchronous execution context; await
    /// the completion there instead.
    pub fn wait(self) -> Result<T> {
        match self.state {
            CompletionState::Ready(result) => result.unwrap_or_else(|| Err(polled_twice())),
            CompletionState::Pending {
                rx,
                command,
                endpoint,
            } => rx
                .blocking_recv()
                .unwrap_or_else(|_| Err(abandoned(command, endpoint))),
        }
    }
}

fn polled_twice() -> Error {
    Error::Usage("completion polled after it returned a result".to_string())
}

fn abandoned(command: Command, endpoint: String) -> Error {
    Error::ConnectionFailure {
        command,
        endpoint,
        kind: ConnectionFailureKind::InternalFailure,
    }
}

impl<T> Unpin for Completion<T> {}

impl<T> Future for Completion<T> {
    type Output = Result<T>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        match &mut this.state {
            CompletionState::Ready(result) => {
                Poll::Ready(result.take().unwrap_or_else(|| Err(polled_twice())))
            }
            CompletionState::Pending {
                rx,
                command,
                endpoint,
            } => match Pin::new(rx).poll(cx) {
                Poll::Ready(Ok(result)) => Poll::Ready(result),
                Poll::Ready(Err(_)) => Poll::Ready(Err(abandoned(*command, endpoint.clone()))),
                Poll::Pending => Poll::Pending,
            },
        }
    }
}

impl<T> fmt::Debug for Completion<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.state {
            CompletionState::Ready(_) => f.write_str("Completion::Ready"),
            CompletionState::Pending {
                command, endpoint, ..
            } => write!(f, "Completion::Pending({} on {})", command, endpoint),
        }
    }
}

struct Inner {
    config: ClientConfig,
    router: Arc<dyn Router>,
    transport: Arc<dyn Transport>,
    registry: Arc<Registry>,
    metrics: DispatchMetrics,
}

/// Routes messages to endpoints and pairs replies with callers.
///
/// Cheap to clone; clones share the registry, metrics and transport.
#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<Inner>,
}

impl Dispatcher {
    /// Create a dispatcher. Fails if `config` does not validate.
    pub fn new(
        config: ClientConfig,
        router: Arc<dyn Router>,
        transport: Arc<dyn Transport>,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            inner: Arc::new(Inner {
                config,
                router,
                transport,
                registry: Arc::new(Registry::default()),
                metrics: DispatchMetrics::new(),
            }),
        })
    }

    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    pub fn router(&self) -> &Arc<dyn Router> {
        &self.inner.router
    }

    pub fn metrics(&self) -> &DispatchMetrics {
        &self.inner.metrics
    }

    /// Number of messages waiting for completion.
    pub fn inflight_count(&self) -> usize {
        self.inner.registry.pending.len()
    }

    /// Execute `message` and block until its result is available.
    ///
    /// Must not be called from within an asynchronous execution context.
    pub fn execute_sync<T>(
        &self,
        message: Message,
        processor: &'static dyn ResultProcessor<T>,
        endpoint: Option<&Arc<Endpoint>>,
    ) -> Result<T>
    where
        T: Default + Send + 'static,
    {
        self.execute_async(message, processor, endpoint).wait()
    }

    /// Execute `message`, returning a completion immediately.
    ///
    /// Policy checks happen before any traffic. Fire-and-forget messages
    /// resolve to `T::default()` at once and never report an error after
    /// those checks.
    pub fn execute_async<T>(
        &self,
        message: Message,
        processor: &'static dyn ResultProcessor<T>,
        endpoint: Option<&Arc<Endpoint>>,
    ) -> Completion<T>
    where
        T: Default + Send + 'static,
    {
        match self.dispatch(message, processor, endpoint) {
            Ok(completion) => completion,
            Err(e) => Completion::failed(e),
        }
    }

    /// Check the command map and the admin gate for `command`, as the
    /// dispatcher does before sending. Internal calls skip the admin gate.
    pub fn check_policy(&self, command: Command, internal: bool) -> Result<()> {
        let config = &self.inner.config;
        if !config.is_available(command) {
            return Err(PolicyViolation::CommandDisabled(command).into());
        }
        if command.is_admin() && !internal && !config.allow_admin {
            return Err(PolicyViolation::AdminModeRequired(command).into());
        }
        Ok(())
    }

    fn dispatch<T>(
        &self,
        message: Message,
        processor: &'static dyn ResultProcessor<T>,
        explicit: Option<&Arc<Endpoint>>,
    ) -> Result<Completion<T>>
    where
        T: Default + Send + 'static,
    {
        let inner = &self.inner;
        let command = message.command();
        let internal = message.is_internal();
        let fire_and_forget = message.is_fire_and_forget();

        let refuse = |e: Error| {
            if !internal {
                inner.metrics.record_failed();
            }
            Err(e)
        };

        if let Err(e) = self.check_policy(command, internal) {
            return refuse(e);
        }

        let endpoint = match explicit {
            Some(ep) => Some(Arc::clone(ep)),
            None => {
                let requested = message.role_preference();
                let selected = inner.router.select(&message);
                if selected.is_some() && message.role_preference() != requested && !internal {
                    inner.metrics.record_non_preferred();
                }
                selected
            }
        };

        let endpoint = match endpoint {
            Some(ep) => ep,
            None => {
                if fire_and_forget {
                    return Ok(self.drop_fire_and_forget(&message, "no endpoint"));
                }
                return refuse(self.no_connection(command, "(none)"));
            }
        };

        endpoint.fix_flags(&message);

        if !endpoint.has_database(message.database()) {
            return refuse(Error::Usage(format!(
                "database {} does not exist on {} ({} databases)",
                message.database(),
                endpoint.addr(),
                endpoint.databases()
            )));
        }

        if command.is_write() && !internal && !endpoint.accepts_writes() {
            return refuse(
                PolicyViolation::ReplicaWrite {
                    command,
                    endpoint: endpoint.addr().to_string(),
                }
                .into(),
            );
        }

        if !endpoint.is_connected() {
            if fire_and_forget {
                return Ok(self.drop_fire_and_forget(&message, "endpoint not connected"));
            }
            return refuse(self.no_connection(command, endpoint.addr()));
        }

        let message = Arc::new(message);
        let (tx, completion) = if fire_and_forget {
            if !internal {
                inner.metrics.record_fire_and_forget();
            }
            (None, Completion::ready(T::default()))
        } else {
            let (tx, rx) = oneshot::channel();
            (
                Some(tx),
                Completion::pending(rx, command, endpoint.addr().to_string()),
            )
        };

        let completer = self.completer(Arc::clone(&message), Arc::clone(&endpoint), processor, tx);
        inner.registry.register(
            message.id(),
            InFlight {
                command,
                endpoint: endpoint.addr().to_string(),
                submitted_at: Instant::now(),
                completer,
            },
        );
        if !internal {
            inner.metrics.record_submitted();
        }

        let slot = ReplySlot {
            id: message.id(),
            registry: Arc::clone(&inner.registry),
        };
        tracing::debug!(
            command = %command,
            endpoint = %endpoint,
            id = message.id(),
            flags = %message.flags(),
            "submitting message"
        );
        if let Err(kind) = inner
            .transport
            .submit(&endpoint, Arc::clone(&message), slot.clone())
        {
            slot.fail(kind);
        }

        Ok(completion)
    }

    fn drop_fire_and_forget<T: Default>(&self, message: &Message, reason: &str) -> Completion<T> {
        if !message.is_internal() {
            self.inner.metrics.record_fire_and_forget();
        }
        tracing::debug!(command = %message.command(), reason, "dropping fire-and-forget message");
        Completion::ready(T::default())
    }

    fn no_connection(&self, command: Command, endpoint: &str) -> Error {
        let snapshot = if self.inner.config.include_detail_in_errors {
            Some(self.inner.router.snapshot())
        } else {
            None
        };
        Error::NoConnectionAvailable {
            command,
            endpoint: endpoint.to_string(),
            snapshot,
        }
    }

    fn completer<T>(
        &self,
        message: Arc<Message>,
        endpoint: Arc<Endpoint>,
        processor: &'static dyn ResultProcessor<T>,
        tx: Option<oneshot::Sender<Result<T>>>,
    ) -> Completer
    where
        T: Send + 'static,
    {
        let dispatcher = Arc::downgrade(&self.inner);
        Box::new(move |outcome| {
            let command = message.command();
            let mut follow_ups = Vec::new();
            let inner = dispatcher.upgrade();

            let result = match outcome {
                Outcome::Reply(RawReply::Error(text)) => {
                    Err(Error::Server(String::from_utf8_lossy(&text).into_owned()))
                }
                Outcome::Reply(reply) => {
                    let channel = inner
                        .as_ref()
                        .and_then(|inner| inner.config.configuration_channel.as_deref());
                    let mut ctx = ReplyContext::new(&message, &endpoint)
                        .with_configuration_channel(channel);
                    let parsed = processor.parse(&mut ctx, reply).map_err(Error::from);
                    follow_ups = ctx.take_follow_ups();
                    parsed
                }
                Outcome::Failed(kind) => match processor.accept_failure(kind) {
                    Some(value) => Ok(value),
                    None => {
                        tracing::warn!(command = %command, endpoint = %endpoint, kind = %kind, "connection failed in flight");
                        Err(Error::ConnectionFailure {
                            command,
                            endpoint: endpoint.addr().to_string(),
                            kind,
                        })
                    }
                },
                Outcome::TimedOut => Err(Error::Timeout { command }),
            };

            if let Some(inner) = &inner {
                if !message.is_internal() {
                    match &result {
                        Ok(_) => inner.metrics.record_completed(),
                        Err(_) => inner.metrics.record_failed(),
                    }
                }
            }

            match tx {
                Some(tx) => {
                    // The caller may have dropped the completion.
                    let _ = tx.send(result);
                }
                None => {
                    if let Err(e) = result {
                        tracing::warn!(command = %command, endpoint = %endpoint, error = %e, "discarding fire-and-forget failure");
                    }
                }
            }

            if let Some(inner) = inner {
                let dispatcher = Dispatcher { inner };
                for follow_up in follow_ups {
                    dispatcher.send_follow_up(follow_up, &endpoint);
                }
            }
        })
    }

    fn send_follow_up(&self, follow_up: FollowUp, endpoint: &Arc<Endpoint>) {
        let FollowUp { message, processor } = follow_up;
        // Fire-and-forget: the completion is already resolved.
        let _ = self.execute_async(message, processor, Some(endpoint));
    }

    /// Fail every message in flight on `endpoint` and mark it failed.
    ///
    /// Returns the number of messages completed by this call.
    pub fn fail_endpoint(&self, endpoint: &Endpoint, kind: ConnectionFailureKind) -> usize {
        endpoint.set_status(crate::endpoint::ConnectionStatus::Failed);
        let ids = self
            .inner
            .registry
            .ids_where(|entry| entry.endpoint == endpoint.addr());
        let failed = ids
            .into_iter()
            .filter(|id| self.inner.registry.complete(*id, Outcome::Failed(kind)))
            .count();
        if failed > 0 {
            tracing::warn!(endpoint = %endpoint, kind = %kind, failed, "failed in-flight messages");
        }
        failed
    }

    /// Time out every message that has been in flight longer than `age`.
    ///
    /// Returns the number of messages completed by this call.
    pub fn time_out_older_than(&self, age: Duration) -> usize {
        let ids = self
            .inner
            .registry
            .ids_where(|entry| entry.submitted_at.elapsed() >= age);
        ids.into_iter()
            .filter(|id| self.inner.registry.complete(*id, Outcome::TimedOut))
            .count()
    }
}

impl fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dispatcher")
            .field("inflight", &self.inflight_count())
            .field("allow_admin", &self.inner.config.allow_admin)
            .finish()
    }
}
