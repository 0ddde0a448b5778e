use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::Error;

/// Operations that go through the deferred queue.
///
/// Also the key under which `fail_next` stores an injected error.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum OperationKind {
    Set,
    Update,
    SetPriority,
    Remove,
    Transaction,
    Push,
    On,
    ChangeAuthState,
}

impl OperationKind {
    pub const ALL: [OperationKind; 8] = [
        OperationKind::Set,
        OperationKind::Update,
        OperationKind::SetPriority,
        OperationKind::Remove,
        OperationKind::Transaction,
        OperationKind::Push,
        OperationKind::On,
        OperationKind::ChangeAuthState,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            OperationKind::Set => "set",
            OperationKind::Update => "update",
            OperationKind::SetPriority => "setPriority",
            OperationKind::Remove => "remove",
            OperationKind::Transaction => "transaction",
            OperationKind::Push => "push",
            OperationKind::On => "on",
            OperationKind::ChangeAuthState => "changeAuthState",
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OperationKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|op| op.as_str() == s)
            .ok_or_else(|| Error::Validation(format!("unknown operation: {s}")))
    }
}

/// Where a queued entry came from: the operation, the node path it targets,
/// and the arguments it was called with. Kept for test introspection only.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Provenance {
    pub operation: OperationKind,
    pub path: String,
    pub args: Vec<Value>,
}

impl Provenance {
    pub fn new(operation: OperationKind, path: impl Into<String>, args: Vec<Value>) -> Self {
        Self {
            operation,
            path: path.into(),
            args,
        }
    }
}
