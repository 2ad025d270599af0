//! Resumable key enumeration over `SCAN`.
//!
//! A [`ScanCursor`] turns the server's cursor protocol into one lazy sequence.
//! It keeps at most one page request in flight and only asks for the next page
//! once the current one has been drained. Its [`position`](ScanCursor::position)
//! can be fed back through [`ScanOptions::resume_from`] to continue the same
//! enumeration later, from a live or an exhausted cursor.

use std::sync::Arc;

use bytes::Bytes;

use redwire_proto::{Arg, Command, CommandFlags, Message, DEFAULT_PAGE_SIZE};

use crate::dispatch::{Completion, Dispatcher};
use crate::endpoint::Endpoint;
use crate::error::{Error, Result};
use crate::processor::{ScanPage, ScanPageProcessor};

/// Where an enumeration stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ScanPosition {
    /// Cursor that fetched the current page; `0` for the first page.
    pub cursor: u64,
    pub page_size: usize,
    /// Items of the current page already consumed or skipped.
    pub page_offset: usize,
}

/// Parameters of a key enumeration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanOptions {
    pub database: i32,
    /// Server-side glob filter; `None` matches everything.
    pub pattern: Option<Bytes>,
    pub page_size: usize,
    /// Cursor to start from; `0` begins a fresh enumeration.
    pub cursor: u64,
    /// Items to skip from the first page only.
    pub page_offset: usize,
    pub flags: CommandFlags,
}

impl ScanOptions {
    pub fn new(database: i32) -> Self {
        Self {
            database,
            pattern: None,
            page_size: DEFAULT_PAGE_SIZE,
            cursor: 0,
            page_offset: 0,
            flags: CommandFlags::NONE,
        }
    }

    pub fn with_pattern(mut self, pattern: impl Into<Bytes>) -> Self {
        self.pattern = Some(pattern.into());
        self
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size;
        self
    }

    pub fn with_cursor(mut self, cursor: u64) -> Self {
        self.cursor = cursor;
        self
    }

    pub fn with_page_offset(mut self, page_offset: usize) -> Self {
        self.page_offset = page_offset;
        self
    }

    pub fn with_flags(mut self, flags: CommandFlags) -> Self {
        self.flags = flags;
        self
    }

    /// Continue from a position taken from an earlier cursor.
    pub fn resume_from(mut self, position: ScanPosition) -> Self {
        self.cursor = position.cursor;
        self.page_size = position.page_size;
        self.page_offset = position.page_offset;
        self
    }

    /// Whether the caller asked for resume semantics.
    pub fn is_resume(&self) -> bool {
        self.cursor != 0 || self.page_offset != 0
    }

    pub(crate) fn validate(&self) -> Result<()> {
        if self.page_size == 0 {
            return Err(Error::Usage("page size must be greater than zero".to_string()));
        }
        Ok(())
    }
}

enum State {
    /// Next page to request is the one at `cursor`.
    Fetch { cursor: u64 },
    Draining {
        items: Vec<Bytes>,
        index: usize,
        next_cursor: u64,
    },
    Failed(Error),
    Done,
}

enum Step {
    Item(Bytes),
    Fetch(u64),
    Fail(Error),
    End,
}

/// A lazy, resumable `SCAN` enumeration.
///
/// Single consumer: pull it from one place at a time. Failures surface once,
/// on the pull that would have needed the failed page, and end the sequence.
pub struct ScanCursor {
    dispatcher: Dispatcher,
    endpoint: Arc<Endpoint>,
    database: i32,
    pattern: Option<Bytes>,
    page_size: usize,
    flags: CommandFlags,
    /// Cursor that fetched the page being drained.
    page_cursor: u64,
    page_index: usize,
    /// Skip still owed to the first page.
    pending_skip: usize,
    state: State,
}

impl ScanCursor {
    pub(crate) fn new(
        dispatcher: Dispatcher,
        endpoint: Arc<Endpoint>,
        options: ScanOptions,
    ) -> Self {
        Self {
            dispatcher,
            endpoint,
            database: options.database,
            pattern: options.pattern,
            page_size: options.page_size,
            flags: options.flags,
            page_cursor: options.cursor,
            page_index: options.page_offset,
            pending_skip: options.page_offset,
            state: State::Fetch {
                cursor: options.cursor,
            },
        }
    }

    /// Current position, suitable for [`ScanOptions::resume_from`].
    pub fn position(&self) -> ScanPosition {
        ScanPosition {
            cursor: self.page_cursor,
            page_size: self.page_size,
            page_offset: self.page_index,
        }
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    pub fn pattern(&self) -> Option<&Bytes> {
        self.pattern.as_ref()
    }

    /// Whether the sequence has ended.
    pub fn is_done(&self) -> bool {
        matches!(self.state, State::Done)
    }

    /// Pull the next key without blocking a thread.
    pub async fn next_async(&mut self) -> Option<Result<Bytes>> {
        loop {
            match self.step() {
                Step::Item(key) => return Some(Ok(key)),
                Step::Fail(e) => return Some(Err(e)),
                Step::End => return None,
                Step::Fetch(cursor) => {
                    let page = self.request_page(cursor).await;
                    self.accept_page(cursor, page);
                }
            }
        }
    }

    /// Drain the rest of the sequence asynchronously.
    pub async fn collect_async(mut self) -> Result<Vec<Bytes>> {
        let mut keys = Vec::new();
        while let Some(key) = self.next_async().await {
            keys.push(key?);
        }
        Ok(keys)
    }

    fn step(&mut self) -> Step {
        match &mut self.state {
            State::Fetch { cursor } => Step::Fetch(*cursor),
            State::Draining {
                items,
                index,
                next_cursor,
            } => {
                if let Some(item) = items.get(*index) {
                    let item = item.clone();
                    *index += 1;
                    self.page_index = *index;
                    Step::Item(item)
                } else if *next_cursor == 0 {
                    self.state = State::Done;
                    Step::End
                } else {
                    let cursor = *next_cursor;
                    self.state = State::Fetch { cursor };
                    Step::Fetch(cursor)
                }
            }
            State::Failed(_) => match std::mem::replace(&mut self.state, State::Done) {
                State::Failed(e) => Step::Fail(e),
                _ => Step::End,
            },
            State::Done => Step::End,
        }
    }

    fn request_page(&self, cursor: u64) -> Completion<ScanPage> {
        let mut args: Vec<Arg> = vec![cursor.into()];
        if let Some(pattern) = &self.pattern {
            args.push("MATCH".into());
            args.push(Arg::from(pattern.clone()));
        }
        if self.page_size != DEFAULT_PAGE_SIZE {
            args.push("COUNT".into());
            args.push(self.page_size.into());
        }

        match Message::new(self.database, self.flags, Command::Scan, args) {
            Ok(message) => {
                self.dispatcher
                    .execute_async(message, &ScanPageProcessor, Some(&self.endpoint))
            }
            Err(e) => Completion::failed(e.into()),
        }
    }

    fn accept_page(&mut self, cursor: u64, page: Result<ScanPage>) {
        match page {
            Ok(page) => {
                let skip = std::mem::take(&mut self.pending_skip).min(page.items.len());
                tracing::trace!(
                    cursor,
                    next = page.cursor,
                    items = page.items.len(),
                    skip,
                    "scan page"
                );
                self.page_cursor = cursor;
                self.page_index = skip;
                self.state = State::Draining {
                    items: page.items,
                    index: skip,
                    next_cursor: page.cursor,
                };
            }
            Err(e) => {
                tracing::debug!(cursor, error = %e, "scan page failed");
                self.state = State::Failed(e);
            }
        }
    }
}

impl Iterator for ScanCursor {
    type Item = Result<Bytes>;

    /// Blocks the calling thread while a page is fetched; use
    /// [`next_async`](ScanCursor::next_async) from async code.
    fn next(&mut self) -> Option<Self::Item> {
        loop {
            match self.step() {
                Step::Item(key) => return Some(Ok(key)),
                Step::Fail(e) => return Some(Err(e)),
                Step::End => return None,
                Step::Fetch(cursor) => {
                    let page = self.request_page(cursor).wait();
                    self.accept_page(cursor, page);
                }
            }
        }
    }
}

impl std::fmt::Debug for ScanCursor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScanCursor")
            .field("endpoint", &self.endpoint.addr())
            .field("database", &self.database)
            .field("position", &self.position())
            .field("done", &self.is_done())
            .finish()
    }
}

/// Keys from either a live cursor or a one-shot `KEYS` reply.
#[derive(Debug)]
pub enum KeySequence {
    Scan(ScanCursor),
    Materialized(std::vec::IntoIter<Bytes>),
}

impl KeySequence {
    /// Resume position, when backed by a cursor.
    pub fn position(&self) -> Option<ScanPosition> {
        match self {
            KeySequence::Scan(cursor) => Some(cursor.position()),
            KeySequence::Materialized(_) => None,
        }
    }

    pub fn is_cursor(&self) -> bool {
        matches!(self, KeySequence::Scan(_))
    }

    pub async fn next_async(&mut self) -> Option<Result<Bytes>> {
        match self {
            KeySequence::Scan(cursor) => cursor.next_async().await,
            KeySequence::Materialized(keys) => keys.next().map(Ok),
        }
    }

    pub async fn collect_async(mut self) -> Result<Vec<Bytes>> {
        let mut keys = Vec::new();
        while let Some(key) = self.next_async().await {
            keys.push(key?);
        }
        Ok(keys)
    }
}

impl Iterator for KeySequence {
    type Item = Result<Bytes>;

    fn next(&mut self) -> Option<Self::Item> {
        match self {
            KeySequence::Scan(cursor) => cursor.next(),
            KeySequence::Materialized(keys) => keys.next().map(Ok),
        }
    }
}
