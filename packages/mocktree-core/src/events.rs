use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::Error;
use crate::ids::ListenerId;
use crate::snapshot::Snapshot;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Value,
    ChildAdded,
    ChildRemoved,
    ChildChanged,
    ChildMoved,
}

impl EventKind {
    pub const ALL: [EventKind; 5] = [
        EventKind::Value,
        EventKind::ChildAdded,
        EventKind::ChildRemoved,
        EventKind::ChildChanged,
        EventKind::ChildMoved,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            EventKind::Value => "value",
            EventKind::ChildAdded => "child_added",
            EventKind::ChildRemoved => "child_removed",
            EventKind::ChildChanged => "child_changed",
            EventKind::ChildMoved => "child_moved",
        }
    }

    /// Whether listeners of this kind receive the previous sibling key.
    pub fn is_ordered(self) -> bool {
        matches!(self, EventKind::ChildAdded | EventKind::ChildMoved)
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| Error::InvalidEvent(s.to_string()))
    }
}

/// Listener callback: the snapshot and, for `child_added` / `child_moved`,
/// the key of the previous sibling (`None` when the child sorts first).
pub type Callback = Rc<dyn Fn(&Snapshot, Option<&str>)>;

/// Invoked with the error when a listener is force-canceled.
pub type CancelCallback = Rc<dyn Fn(&Error)>;

#[derive(Clone)]
pub(crate) struct Registration {
    pub(crate) id: ListenerId,
    pub(crate) callback: Callback,
    pub(crate) cancel: Option<CancelCallback>,
}

/// Listener registrations of one node, in registration order per kind.
#[derive(Clone, Default)]
pub(crate) struct Listeners {
    by_kind: BTreeMap<EventKind, Vec<Registration>>,
}

impl Listeners {
    pub(crate) fn add(&mut self, kind: EventKind, registration: Registration) {
        self.by_kind.entry(kind).or_default().push(registration);
    }

    pub(crate) fn contains(&self, kind: EventKind, id: ListenerId) -> bool {
        self.by_kind
            .get(&kind)
            .is_some_and(|regs| regs.iter().any(|r| r.id == id))
    }

    /// Registrations for `kind` at this moment; later changes do not affect
    /// the returned list.
    pub(crate) fn registered(&self, kind: EventKind) -> Vec<Registration> {
        self.by_kind.get(&kind).cloned().unwrap_or_default()
    }

    pub(crate) fn count(&self, kind: EventKind) -> usize {
        self.by_kind.get(&kind).map_or(0, Vec::len)
    }

    /// Remove matching registrations: every kind when `kind` is `None`, every
    /// registration of the kind when `id` is `None`.
    pub(crate) fn remove(
        &mut self,
        kind: Option<EventKind>,
        id: Option<ListenerId>,
    ) -> Vec<(EventKind, Registration)> {
        let kinds = match kind {
            Some(kind) => vec![kind],
            None => EventKind::ALL.to_vec(),
        };
        let mut removed = Vec::new();
        for kind in kinds {
            let Some(regs) = self.by_kind.get_mut(&kind) else {
                continue;
            };
            let (gone, kept): (Vec<_>, Vec<_>) = std::mem::take(regs)
                .into_iter()
                .partition(|r| id.map_or(true, |id| r.id == id));
            *regs = kept;
            removed.extend(gone.into_iter().map(|r| (kind, r)));
        }
        self.by_kind.retain(|_, regs| !regs.is_empty());
        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registration(id: u64) -> Registration {
        Registration {
            id: ListenerId(id),
            callback: Rc::new(|_, _| {}),
            cancel: None,
        }
    }

    #[test]
    fn parses_known_kinds_only() {
        assert_eq!("child_moved".parse::<EventKind>().unwrap(), EventKind::ChildMoved);
        assert_eq!(
            "child_wiggled".parse::<EventKind>().unwrap_err(),
            Error::InvalidEvent("child_wiggled".into())
        );
    }

    #[test]
    fn remove_by_kind_and_id() {
        let mut listeners = Listeners::default();
        listeners.add(EventKind::Value, registration(1));
        listeners.add(EventKind::Value, registration(2));
        listeners.add(EventKind::ChildAdded, registration(3));

        let removed = listeners.remove(Some(EventKind::Value), Some(ListenerId(2)));
        assert_eq!(removed.len(), 1);
        assert!(listeners.contains(EventKind::Value, ListenerId(1)));
        assert!(!listeners.contains(EventKind::Value, ListenerId(2)));

        let removed = listeners.remove(None, None);
        assert_eq!(removed.len(), 2);
        assert_eq!(listeners.count(EventKind::ChildAdded), 0);
    }
}
