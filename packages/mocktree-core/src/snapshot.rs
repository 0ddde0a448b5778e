use std::fmt;

use serde_json::Value;

use crate::error::Result;
use crate::priority::{compare_children, Priority};
use crate::tree::Reference;
use crate::value;

static NULL: Value = Value::Null;

/// Immutable view of a node's data and priority at the moment it was taken.
#[derive(Clone)]
pub struct Snapshot {
    reference: Reference,
    value: Value,
    priority: Priority,
}

impl Snapshot {
    pub(crate) fn new(reference: Reference, value: Value, priority: Priority) -> Self {
        Self {
            reference,
            value,
            priority,
        }
    }

    /// Fresh copy of the captured data.
    pub fn val(&self) -> Value {
        self.value.clone()
    }

    /// Borrow of the captured data.
    pub fn value(&self) -> &Value {
        &self.value
    }

    /// Captured data with `.priority` metadata for this node and the current
    /// priorities of its descendants.
    pub fn export_val(&self) -> Value {
        self.reference.node.export(&self.value, &self.priority)
    }

    pub fn priority(&self) -> &Priority {
        &self.priority
    }

    pub fn key(&self) -> Option<&str> {
        self.reference.key()
    }

    pub fn reference(&self) -> &Reference {
        &self.reference
    }

    pub fn exists(&self) -> bool {
        !self.value.is_null()
    }

    /// Snapshot of the captured sub-value at `path`; a `null` snapshot when
    /// there is nothing there.
    pub fn child(&self, path: &str) -> Result<Snapshot> {
        let reference = self.reference.child(path)?;
        let value = path
            .trim_matches('/')
            .split('/')
            .try_fold(&self.value, |value, segment| value.get(segment))
            .unwrap_or(&NULL)
            .clone();
        let priority = reference.get_priority();
        Ok(Snapshot::new(reference, value, priority))
    }

    pub fn has_child(&self, path: &str) -> bool {
        self.child(path).is_ok_and(|child| child.exists())
    }

    pub fn has_children(&self) -> bool {
        self.num_children() > 0
    }

    pub fn num_children(&self) -> usize {
        self.value.as_object().map_or(0, |map| map.len())
    }

    /// Visit the captured children in the tree's current order. Returning
    /// `true` from `visit` stops the iteration; the result says whether it
    /// stopped early.
    pub fn for_each(&self, mut visit: impl FnMut(&Snapshot) -> bool) -> bool {
        for key in self.ordered_keys() {
            let reference = self.reference.child_of_key(&key);
            let priority = reference.get_priority();
            let child = Snapshot::new(reference, value::child_of(&self.value, &key), priority);
            if visit(&child) {
                return true;
            }
        }
        false
    }

    fn ordered_keys(&self) -> Vec<String> {
        let node = &self.reference.node;
        let mut ranked = value::keys(&self.value)
            .into_iter()
            .map(|key| (node.child_priority(&key), key))
            .collect::<Vec<_>>();
        ranked.sort_by(|(a_pri, a_key), (b_pri, b_key)| compare_children(a_pri, a_key, b_pri, b_key));
        ranked.into_iter().map(|(_, key)| key).collect()
    }
}

impl fmt::Debug for Snapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Snapshot")
            .field("path", &self.reference.path())
            .field("value", &self.value)
            .field("priority", &self.priority)
            .finish()
    }
}
