//! Deferred-operation queue shared by every node of a tree.
//!
//! Mutations never apply at call time: they are pushed here and run when the
//! test flushes. A flush drains the list as it was when the flush started;
//! anything queued by the callbacks it runs waits for the next flush.
//!
//! Delayed flushes become timers measured against the tree's [`Clock`]. They
//! fire only when a driver calls [`FlushQueue::run_due_timers`], so a test
//! that never advances time never sees them run.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;

use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::error::{Error, Result};
use crate::ids::EntryId;
use crate::ops::Provenance;
use crate::traits::Clock;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EntryState {
    Pending,
    Canceled,
    Ran,
}

/// When pushes flush on their own.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AutoFlush {
    #[default]
    Off,
    /// Flush synchronously right after every push.
    Immediate,
    /// Schedule a delayed flush (milliseconds) after every push.
    Delay(u64),
}

/// A queued operation.
pub struct QueueEntry {
    id: EntryId,
    provenance: Provenance,
    state: Cell<EntryState>,
    callback: RefCell<Option<Box<dyn FnOnce()>>>,
}

pub type EntryHandle = Rc<QueueEntry>;

impl QueueEntry {
    pub fn id(&self) -> EntryId {
        self.id
    }

    pub fn provenance(&self) -> &Provenance {
        &self.provenance
    }

    pub fn state(&self) -> EntryState {
        self.state.get()
    }

    /// Flag this entry so flushes skip it. Fails with [`Error::AlreadyRun`]
    /// once it has run.
    pub fn cancel(&self) -> Result<()> {
        match self.state.get() {
            EntryState::Ran => Err(Error::AlreadyRun),
            EntryState::Canceled => Ok(()),
            EntryState::Pending => {
                self.state.set(EntryState::Canceled);
                self.callback.borrow_mut().take();
                debug!(entry = %self.id, "canceled queued operation");
                Ok(())
            }
        }
    }

    /// Run the callback. The entry is marked as run before the callback is
    /// invoked, so a second call fails with [`Error::AlreadyRun`].
    pub fn run(&self) -> Result<()> {
        match self.state.get() {
            EntryState::Ran => return Err(Error::AlreadyRun),
            EntryState::Canceled => return Err(Error::Canceled),
            EntryState::Pending => {}
        }
        self.state.set(EntryState::Ran);
        let callback = self.callback.borrow_mut().take();
        if let Some(callback) = callback {
            trace!(entry = %self.id, op = %self.provenance.operation, path = %self.provenance.path, "running queued operation");
            callback();
        }
        Ok(())
    }
}

impl fmt::Debug for QueueEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueueEntry")
            .field("id", &self.id)
            .field("provenance", &self.provenance)
            .field("state", &self.state.get())
            .finish()
    }
}

/// Read-only view of a queued entry for introspection.
#[derive(Clone, Debug, PartialEq)]
pub struct EntryInfo {
    pub id: EntryId,
    pub provenance: Provenance,
    pub state: EntryState,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct Timer {
    due_millis: u64,
    seq: u64,
}

#[derive(Default)]
struct QueueState {
    entries: Vec<EntryHandle>,
    timers: Vec<Timer>,
    next_entry: u64,
    next_timer: u64,
    auto_flush: AutoFlush,
    flushing: bool,
}

/// Shared handle to one tree's queue. Clones refer to the same queue.
#[derive(Clone)]
pub struct FlushQueue {
    state: Rc<RefCell<QueueState>>,
    clock: Rc<dyn Clock>,
}

impl FlushQueue {
    pub fn new(clock: Rc<dyn Clock>) -> Self {
        Self {
            state: Rc::new(RefCell::new(QueueState::default())),
            clock,
        }
    }

    /// Append an operation. It does not run until a flush.
    pub fn push(&self, provenance: Provenance, callback: impl FnOnce() + 'static) -> EntryHandle {
        let (entry, auto_flush, flushing) = {
            let mut state = self.state.borrow_mut();
            state.next_entry += 1;
            let entry = Rc::new(QueueEntry {
                id: EntryId(state.next_entry),
                provenance,
                state: Cell::new(EntryState::Pending),
                callback: RefCell::new(Some(Box::new(callback))),
            });
            state.entries.push(entry.clone());
            (entry, state.auto_flush, state.flushing)
        };
        debug!(entry = %entry.id, op = %entry.provenance.operation, path = %entry.provenance.path, "queued operation");

        match auto_flush {
            AutoFlush::Off => {}
            // A flush in progress picks this up once its current batch is done.
            AutoFlush::Immediate if flushing => {}
            AutoFlush::Immediate => self.drain(),
            AutoFlush::Delay(millis) => self.schedule(millis),
        }
        entry
    }

    /// Run everything queued so far, or schedule that for `delay_millis`
    /// later. Fails with [`Error::EmptyQueue`] when nothing is queued.
    pub fn flush(&self, delay_millis: Option<u64>) -> Result<()> {
        if self.state.borrow().entries.is_empty() {
            return Err(Error::EmptyQueue);
        }
        match delay_millis {
            Some(millis) => self.schedule(millis),
            None => self.drain(),
        }
        Ok(())
    }

    /// Flag a pending entry so flushes skip it.
    pub fn cancel(&self, entry: &QueueEntry) -> Result<()> {
        entry.cancel()
    }

    /// Copy of the queued entries, without draining them.
    pub fn pending(&self) -> Vec<EntryInfo> {
        self.state
            .borrow()
            .entries
            .iter()
            .map(|entry| EntryInfo {
                id: entry.id,
                provenance: entry.provenance.clone(),
                state: entry.state.get(),
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.state.borrow().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.borrow().entries.is_empty()
    }

    pub fn is_flushing(&self) -> bool {
        self.state.borrow().flushing
    }

    pub fn auto_flush(&self) -> AutoFlush {
        self.state.borrow().auto_flush
    }

    pub fn set_auto_flush(&self, mode: AutoFlush) {
        self.state.borrow_mut().auto_flush = mode;
        debug!(?mode, "auto flush changed");
    }

    /// Deadlines of the delayed flushes that have not fired yet.
    pub fn pending_timers(&self) -> Vec<u64> {
        self.state.borrow().timers.iter().map(|t| t.due_millis).collect()
    }

    pub fn now_millis(&self) -> u64 {
        self.clock.now_millis()
    }

    /// Fire every delayed flush whose deadline has passed, earliest first.
    /// Returns how many timers fired.
    pub fn run_due_timers(&self) -> usize {
        let mut fired = 0;
        while let Some(timer) = self.pop_due_timer() {
            fired += 1;
            if self.is_empty() {
                trace!(due = timer.due_millis, "delayed flush found nothing to run");
                continue;
            }
            debug!(due = timer.due_millis, "delayed flush firing");
            self.drain();
        }
        fired
    }

    fn pop_due_timer(&self) -> Option<Timer> {
        let now = self.clock.now_millis();
        let mut state = self.state.borrow_mut();
        let idx = state
            .timers
            .iter()
            .enumerate()
            .filter(|(_, t)| t.due_millis <= now)
            .min_by_key(|(_, t)| (t.due_millis, t.seq))
            .map(|(i, _)| i)?;
        Some(state.timers.remove(idx))
    }

    fn schedule(&self, delay_millis: u64) {
        let due_millis = self.clock.now_millis().saturating_add(delay_millis);
        let mut state = self.state.borrow_mut();
        state.next_timer += 1;
        let seq = state.next_timer;
        state.timers.push(Timer { due_millis, seq });
        debug!(due_millis, "scheduled delayed flush");
    }

    fn drain(&self) {
        let outer = std::mem::replace(&mut self.state.borrow_mut().flushing, true);
        loop {
            self.process_batch();
            let again = {
                let state = self.state.borrow();
                !outer && state.auto_flush == AutoFlush::Immediate && !state.entries.is_empty()
            };
            if !again {
                break;
            }
        }
        self.state.borrow_mut().flushing = outer;
    }

    fn process_batch(&self) {
        let batch = std::mem::take(&mut self.state.borrow_mut().entries);
        debug!(count = batch.len(), "flushing queued operations");
        for entry in batch {
            if entry.state.get() == EntryState::Canceled {
                trace!(entry = %entry.id, "skipping canceled operation");
                continue;
            }
            if let Err(err) = entry.run() {
                trace!(entry = %entry.id, %err, "skipping operation");
            }
        }
    }
}

impl fmt::Debug for FlushQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.borrow();
        f.debug_struct("FlushQueue")
            .field("entries", &state.entries.len())
            .field("timers", &state.timers.len())
            .field("auto_flush", &state.auto_flush)
            .finish()
    }
}
