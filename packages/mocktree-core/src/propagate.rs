//! Change propagation.
//!
//! A mutation applies new data at one node: the node diffs it against what it
//! holds, pushes sub-values down into its children, re-sorts, fires its child
//! events and one `value` event, then tells its parent which key changed. The
//! parent re-derives only that key and repeats the process up to the root.
//!
//! Children updated from their parent's side fire their own events but never
//! notify upward; the parent records what they report instead. That keeps
//! every ancestor at one `value` event per applied mutation.

use std::rc::Rc;

use serde_json::{Map, Value};
use tracing::{debug, trace};

use crate::events::EventKind;
use crate::ids::ListenerId;
use crate::priority::{compare_children, Priority};
use crate::snapshot::Snapshot;
use crate::tree::{Node, Reference};
use crate::value::{self, PRIORITY_KEY};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Origin {
    /// The mutation targets this node.
    Direct,
    /// The parent is pushing a sub-value down.
    FromParent,
}

/// What changed at a node after applying data to it.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub(crate) struct Applied {
    pub(crate) priority_changed: bool,
    pub(crate) data_changed: bool,
}

impl Applied {
    fn is_noop(self) -> bool {
        !self.priority_changed && !self.data_changed
    }
}

struct PendingEvent {
    kind: EventKind,
    key: String,
    snapshot: Snapshot,
}

/// Child events of one node, kept per kind so they fire removals first,
/// then additions and changes, then moves.
#[derive(Default)]
struct ChildEvents {
    removed: Vec<PendingEvent>,
    touched: Vec<PendingEvent>,
    moved: Vec<PendingEvent>,
}

impl ChildEvents {
    fn record(&mut self, kind: EventKind, key: &str, snapshot: Snapshot) {
        let event = PendingEvent {
            kind,
            key: key.to_string(),
            snapshot,
        };
        match kind {
            EventKind::ChildRemoved => self.removed.push(event),
            EventKind::ChildMoved => self.moved.push(event),
            _ => self.touched.push(event),
        }
    }

    fn into_ordered(self) -> impl Iterator<Item = PendingEvent> {
        self.removed
            .into_iter()
            .chain(self.touched)
            .chain(self.moved)
    }
}

impl Node {
    /// Apply prepared (validated, metadata-bearing) data to this node.
    pub(crate) fn apply(self: &Rc<Self>, raw: Value, origin: Origin) -> Applied {
        let (incoming_priority, body) = value::split_priority(raw);
        let data = value::canonical(&body);

        let mut applied = Applied::default();
        let old_data = {
            let mut state = self.state.borrow_mut();
            // Data without `.priority` keeps the current priority.
            if let Some(priority) = incoming_priority {
                if priority != state.priority {
                    state.priority = priority;
                    applied.priority_changed = true;
                }
            }
            applied.data_changed = state.data != data;
            std::mem::replace(&mut state.data, data.clone())
        };

        let old_keys = value::keys(&old_data);
        let new_keys = value::keys(&data);
        let mut events = ChildEvents::default();
        // Children's own listeners fire below and must see this node sorted.
        self.resort_with(&body);

        if applied.data_changed {
            for key in old_keys.iter().filter(|k| new_keys.binary_search(k).is_err()) {
                let child = self.child_node(key);
                let before = Snapshot::new(
                    Reference::from_node(child.clone()),
                    value::child_of(&old_data, key),
                    child.priority(),
                );
                child.apply(Value::Null, Origin::FromParent);
                events.record(EventKind::ChildRemoved, key, before);
            }
        }

        // Runs even when the data is equal so nested priorities stay in sync.
        for key in &new_keys {
            let child = self.child_node(key);
            let existed = old_keys.binary_search(key).is_ok();
            let child_applied = child.apply(value::child_of(&body, key), Origin::FromParent);
            if !existed {
                events.record(EventKind::ChildAdded, key, child.snapshot());
                continue;
            }
            if child_applied.data_changed {
                events.record(EventKind::ChildChanged, key, child.snapshot());
            }
            if child_applied.priority_changed {
                events.record(EventKind::ChildMoved, key, child.snapshot());
            }
        }

        if origin == Origin::Direct && !applied.is_noop() {
            debug!(path = %self.path, ?applied, "applied data");
        }
        self.fire(events);
        if applied.data_changed {
            self.dispatch(EventKind::Value, &self.snapshot(), None);
        }
        if origin == Origin::Direct {
            self.notify_parent(applied);
        }
        applied
    }

    /// Change only the priority; the parent re-sorts and reports a move.
    pub(crate) fn change_priority(self: &Rc<Self>, priority: Priority) {
        {
            let mut state = self.state.borrow_mut();
            if state.priority == priority {
                return;
            }
            state.priority = priority;
        }
        debug!(path = %self.path, "priority changed");
        self.notify_parent(Applied {
            priority_changed: true,
            data_changed: false,
        });
    }

    fn notify_parent(&self, applied: Applied) {
        if applied.is_noop() {
            return;
        }
        let (Some(parent), Some(key)) = (self.parent(), self.key.as_deref()) else {
            return;
        };
        parent.child_updated(key, applied);
    }

    /// Re-derive the single child `key` after it changed on its own.
    fn child_updated(self: &Rc<Self>, key: &str, child_applied: Applied) {
        let child = self.child_node(key);
        let old_data = self.data();
        let existed = old_data.get(key).is_some();
        let mut events = ChildEvents::default();
        let mut applied = Applied::default();

        if child_applied.data_changed {
            let child_data = child.data();
            let mut data = old_data.clone();
            if child_data.is_null() {
                if let Value::Object(map) = &mut data {
                    map.remove(key);
                }
                // The last key going away leaves no data at all.
                if data.as_object().is_some_and(Map::is_empty) {
                    data = Value::Null;
                }
                if existed {
                    let before = Snapshot::new(
                        Reference::from_node(child.clone()),
                        value::child_of(&old_data, key),
                        child.priority(),
                    );
                    events.record(EventKind::ChildRemoved, key, before);
                }
            } else {
                if !data.is_object() {
                    data = Value::Object(Map::new());
                }
                if let Value::Object(map) = &mut data {
                    map.insert(key.to_string(), child_data);
                }
                let kind = if existed {
                    EventKind::ChildChanged
                } else {
                    EventKind::ChildAdded
                };
                events.record(kind, key, child.snapshot());
            }
            applied.data_changed = data != old_data;
            self.state.borrow_mut().data = data;
        }

        if child_applied.priority_changed && existed && self.has_key(key) {
            events.record(EventKind::ChildMoved, key, child.snapshot());
        }

        self.resort();
        self.fire(events);
        if applied.data_changed {
            self.dispatch(EventKind::Value, &self.snapshot(), None);
        }
        self.notify_parent(applied);
    }

    /// Rebuild `sorted_keys` from the current data and child priorities.
    pub(crate) fn resort(&self) {
        self.resort_with(&Value::Null);
    }

    /// Like [`Node::resort`], but a `.priority` carried for a child in the
    /// incoming `body` wins over the child's current priority.
    fn resort_with(&self, body: &Value) {
        let keys = value::keys(&self.state.borrow().data);
        let mut ranked = keys
            .into_iter()
            .map(|key| {
                let priority = body
                    .get(&key)
                    .and_then(|child| child.get(PRIORITY_KEY))
                    .and_then(|p| Priority::from_json(p).ok())
                    .unwrap_or_else(|| self.child_priority(&key));
                (priority, key)
            })
            .collect::<Vec<_>>();
        ranked.sort_by(|(a_pri, a_key), (b_pri, b_key)| compare_children(a_pri, a_key, b_pri, b_key));
        self.state.borrow_mut().sorted_keys = ranked.into_iter().map(|(_, key)| key).collect();
    }

    /// Key sorted immediately before `key`, `None` when it sorts first.
    pub(crate) fn previous_key(&self, key: &str) -> Option<String> {
        let state = self.state.borrow();
        let idx = state.sorted_keys.iter().position(|k| k == key)?;
        idx.checked_sub(1).map(|prev| state.sorted_keys[prev].clone())
    }

    fn fire(&self, events: ChildEvents) {
        for event in events.into_ordered() {
            let prev = if event.kind.is_ordered() {
                self.previous_key(&event.key)
            } else {
                None
            };
            self.dispatch(event.kind, &event.snapshot, prev.as_deref());
        }
    }

    /// Invoke the listeners registered for `kind` when dispatch starts.
    /// Listeners removed by an earlier callback of the same dispatch are
    /// skipped.
    pub(crate) fn dispatch(&self, kind: EventKind, snapshot: &Snapshot, prev: Option<&str>) {
        let registrations = self.state.borrow().listeners.registered(kind);
        for registration in registrations {
            if !self.state.borrow().listeners.contains(kind, registration.id) {
                continue;
            }
            trace!(path = %self.path, %kind, listener = registration.id.0, key = ?snapshot.key(), ?prev, "dispatching event");
            (registration.callback)(snapshot, prev);
        }
    }

    /// Initial event for a new `value` or `child_added` listener.
    pub(crate) fn catch_up(self: &Rc<Self>, kind: EventKind, id: ListenerId) {
        let registration = self
            .state
            .borrow()
            .listeners
            .registered(kind)
            .into_iter()
            .find(|registration| registration.id == id);
        let Some(registration) = registration else {
            trace!(path = %self.path, %kind, listener = id.0, "listener gone before catch-up");
            return;
        };
        match kind {
            EventKind::Value => (registration.callback)(&self.snapshot(), None),
            EventKind::ChildAdded => {
                let keys = self.state.borrow().sorted_keys.clone();
                let mut prev: Option<String> = None;
                for key in keys {
                    let snapshot = self.child_node(&key).snapshot();
                    (registration.callback)(&snapshot, prev.as_deref());
                    prev = Some(key);
                }
            }
            _ => {}
        }
    }
}
