//! Windowed, read-only views over a node's ordered children.

use std::cell::RefCell;
use std::cmp::Ordering;

use serde_json::{Map, Value};

use crate::events::EventKind;
use crate::ids::ListenerId;
use crate::priority::{compare_children, compare_priorities, Priority};
use crate::snapshot::Snapshot;
use crate::tree::Reference;

#[derive(Clone, Debug, PartialEq)]
struct Bound {
    priority: Priority,
    key: Option<String>,
}

impl Bound {
    fn compare(&self, priority: &Priority, key: &str) -> Ordering {
        match &self.key {
            Some(bound_key) => compare_children(priority, key, &self.priority, bound_key),
            None => compare_priorities(priority, &self.priority),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Limit {
    First(usize),
    Last(usize),
}

#[derive(Clone, Debug, Default, PartialEq)]
struct Window {
    start: Option<Bound>,
    end: Option<Bound>,
    limit: Option<Limit>,
}

impl Window {
    fn keys(&self, reference: &Reference) -> Vec<String> {
        let mut keys = reference
            .get_ordered_child_keys()
            .into_iter()
            .filter(|key| {
                let priority = reference.priority_of(key);
                let after_start = self
                    .start
                    .as_ref()
                    .map_or(true, |b| b.compare(&priority, key) != Ordering::Less);
                let before_end = self
                    .end
                    .as_ref()
                    .map_or(true, |b| b.compare(&priority, key) != Ordering::Greater);
                after_start && before_end
            })
            .collect::<Vec<_>>();
        match self.limit {
            Some(Limit::First(n)) => keys.truncate(n),
            Some(Limit::Last(n)) => {
                let skip = keys.len().saturating_sub(n);
                keys.drain(..skip);
            }
            None => {}
        }
        keys
    }

    fn snapshot(&self, reference: &Reference) -> Snapshot {
        let data = reference.get_data();
        let map = self
            .keys(reference)
            .into_iter()
            .filter_map(|key| data.get(&key).cloned().map(|value| (key, value)))
            .collect::<Map<_, _>>();
        let value = if map.is_empty() {
            Value::Null
        } else {
            Value::Object(map)
        };
        Snapshot::new(reference.clone(), value, reference.get_priority())
    }
}

/// Children of a node ordered by priority then key, optionally bounded and
/// limited. Queries only read; mutations still go through the reference.
#[derive(Clone, Debug)]
pub struct Query {
    reference: Reference,
    window: Window,
}

impl Query {
    pub(crate) fn new(reference: Reference) -> Self {
        Self {
            reference,
            window: Window::default(),
        }
    }

    /// Keep children sorting at or after `priority` (and `key`, when given).
    pub fn start_at(mut self, priority: impl Into<Priority>, key: Option<&str>) -> Self {
        self.window.start = Some(Bound {
            priority: priority.into(),
            key: key.map(str::to_string),
        });
        self
    }

    /// Keep children sorting at or before `priority` (and `key`, when given).
    pub fn end_at(mut self, priority: impl Into<Priority>, key: Option<&str>) -> Self {
        self.window.end = Some(Bound {
            priority: priority.into(),
            key: key.map(str::to_string),
        });
        self
    }

    pub fn limit_to_first(mut self, limit: usize) -> Self {
        self.window.limit = Some(Limit::First(limit));
        self
    }

    pub fn limit_to_last(mut self, limit: usize) -> Self {
        self.window.limit = Some(Limit::Last(limit));
        self
    }

    pub fn reference(&self) -> &Reference {
        &self.reference
    }

    /// Keys currently inside the window, in order.
    pub fn keys(&self) -> Vec<String> {
        self.window.keys(&self.reference)
    }

    /// Snapshot holding only the children inside the window.
    pub fn snapshot(&self) -> Snapshot {
        self.window.snapshot(&self.reference)
    }

    /// Listen for changes of the windowed data. The callback gets the
    /// windowed snapshot once the listener is caught up, then whenever a
    /// `value` event at the node changes what the window holds.
    pub fn on_value(&self, callback: impl Fn(&Snapshot) + 'static) -> ListenerId {
        let window = self.window.clone();
        let last: RefCell<Option<Value>> = RefCell::new(None);
        self.reference.on(EventKind::Value, move |snapshot, _| {
            let windowed = window.snapshot(snapshot.reference());
            if last.borrow().as_ref() == Some(windowed.value()) {
                return;
            }
            *last.borrow_mut() = Some(windowed.val());
            callback(&windowed);
        })
    }

    pub fn off(&self, listener: ListenerId) -> usize {
        self.reference.off(Some(EventKind::Value), Some(listener))
    }
}
