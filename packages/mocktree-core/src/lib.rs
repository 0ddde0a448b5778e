#![forbid(unsafe_code)]
//! In-memory mock of a hierarchical, event-driven database reference API.
//! Every mutation is deferred until the test flushes the tree's queue, and
//! each applied change fires the child and value events a real client would
//! see, with children kept sorted by priority then key.

pub mod auth;
pub mod completion;
pub mod config;
pub mod error;
pub mod events;
pub mod ids;
pub mod ops;
pub mod priority;
mod propagate;
pub mod query;
pub mod queue;
pub mod snapshot;
pub mod traits;
pub mod tree;
pub mod value;

pub use auth::{AuthCallback, AuthController};
pub use completion::Completion;
pub use config::TreeConfig;
pub use error::{Error, InjectedError, Result};
pub use events::{Callback, CancelCallback, EventKind};
pub use ids::{EntryId, IdGenerator, ListenerId};
pub use ops::{OperationKind, Provenance};
pub use priority::{compare_children, compare_priorities, Priority};
pub use query::Query;
pub use queue::{AutoFlush, EntryHandle, EntryInfo, EntryState, FlushQueue, QueueEntry};
pub use snapshot::Snapshot;
#[cfg(feature = "system-clock")]
pub use traits::SystemClock;
pub use traits::{Clock, ManualClock};
pub use tree::{Reference, TransactionOutcome};
