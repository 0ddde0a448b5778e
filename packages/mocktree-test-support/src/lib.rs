//! Helpers shared by the mocktree integration suites: tree builders and an
//! event recorder.

use std::cell::RefCell;
use std::rc::Rc;

use mocktree_core::{EventKind, ListenerId, Reference, TreeConfig};
use serde_json::Value;
use tracing_subscriber::EnvFilter;

/// Route `tracing` output to the test harness. Honors `RUST_LOG`; safe to
/// call from every test.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Empty tree with default config.
pub fn tree() -> Reference {
    init_tracing();
    Reference::new(&TreeConfig::default())
}

/// Tree whose root already holds `data`.
pub fn seeded(data: Value) -> Reference {
    init_tracing();
    match Reference::with_data(&TreeConfig::default(), data) {
        Ok(tree) => tree,
        Err(err) => panic!("invalid seed data: {err}"),
    }
}

/// Flush, ignoring an empty queue.
pub fn settle(reference: &Reference) {
    let _ = reference.flush();
}

#[derive(Clone, Debug, PartialEq)]
pub struct Recorded {
    /// Path of the node the listener was registered on.
    pub at: String,
    pub kind: EventKind,
    /// Key of the snapshot's node.
    pub key: Option<String>,
    pub value: Value,
    pub prev: Option<String>,
}

/// Records every event delivered to the listeners it registers.
#[derive(Clone, Default)]
pub struct EventLog {
    entries: Rc<RefCell<Vec<Recorded>>>,
}

impl EventLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn listen(&self, reference: &Reference, kind: EventKind) -> ListenerId {
        let entries = self.entries.clone();
        let at = reference.path().to_string();
        reference.on(kind, move |snapshot, prev| {
            entries.borrow_mut().push(Recorded {
                at: at.clone(),
                kind,
                key: snapshot.key().map(str::to_string),
                value: snapshot.val(),
                prev: prev.map(str::to_string),
            });
        })
    }

    pub fn listen_all(&self, reference: &Reference) -> Vec<ListenerId> {
        EventKind::ALL
            .into_iter()
            .map(|kind| self.listen(reference, kind))
            .collect()
    }

    pub fn entries(&self) -> Vec<Recorded> {
        self.entries.borrow().clone()
    }

    pub fn take(&self) -> Vec<Recorded> {
        std::mem::take(&mut *self.entries.borrow_mut())
    }

    pub fn clear(&self) {
        self.entries.borrow_mut().clear();
    }

    pub fn kinds(&self) -> Vec<EventKind> {
        self.entries.borrow().iter().map(|e| e.kind).collect()
    }

    pub fn of_kind(&self, kind: EventKind) -> Vec<Recorded> {
        self.entries
            .borrow()
            .iter()
            .filter(|e| e.kind == kind)
            .cloned()
            .collect()
    }

    pub fn count(&self, kind: EventKind) -> usize {
        self.entries.borrow().iter().filter(|e| e.kind == kind).count()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.borrow().is_empty()
    }
}
