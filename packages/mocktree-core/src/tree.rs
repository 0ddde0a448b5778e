use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;
use std::fmt;
use std::rc::{Rc, Weak};

use serde_json::{json, Map, Value};
use tracing::debug;

use crate::auth::AuthController;
use crate::completion::Completion;
use crate::config::TreeConfig;
use crate::error::{Error, InjectedError, Result};
use crate::events::{Callback, CancelCallback, EventKind, Listeners, Registration};
use crate::ids::{IdGenerator, ListenerId};
use crate::ops::{OperationKind, Provenance};
use crate::priority::Priority;
use crate::propagate::Origin;
use crate::query::Query;
use crate::queue::{AutoFlush, FlushQueue};
use crate::snapshot::Snapshot;
use crate::traits::{Clock, ManualClock};
use crate::value::{self, PRIORITY_KEY, VALUE_KEY};

/// Services shared by every node under one root.
pub(crate) struct Services {
    pub(crate) queue: FlushQueue,
    pub(crate) ids: Rc<RefCell<IdGenerator>>,
    pub(crate) auth: AuthController,
    next_listener: Cell<u64>,
}

impl Services {
    fn new(config: &TreeConfig, clock: Rc<dyn Clock>, ids: Rc<RefCell<IdGenerator>>) -> Rc<Self> {
        let queue = FlushQueue::new(clock);
        queue.set_auto_flush(config.auto_flush);
        Rc::new(Self {
            auth: AuthController::new(queue.clone()),
            queue,
            ids,
            next_listener: Cell::new(0),
        })
    }

    pub(crate) fn next_listener_id(&self) -> ListenerId {
        let next = self.next_listener.get() + 1;
        self.next_listener.set(next);
        ListenerId(next)
    }
}

#[derive(Default)]
pub(crate) struct NodeState {
    /// Canonical data of the whole subtree.
    pub(crate) data: Value,
    pub(crate) priority: Priority,
    pub(crate) sorted_keys: Vec<String>,
    /// Every child node ever created under this one, present in the data
    /// or not.
    pub(crate) children: BTreeMap<String, Rc<Node>>,
    pub(crate) listeners: Listeners,
    pub(crate) pending_errors: BTreeMap<OperationKind, InjectedError>,
}

pub(crate) struct Node {
    pub(crate) key: Option<String>,
    pub(crate) path: String,
    pub(crate) parent: Weak<Node>,
    pub(crate) services: Rc<Services>,
    pub(crate) state: RefCell<NodeState>,
}

impl Node {
    fn new_root(path: String, services: Rc<Services>) -> Rc<Self> {
        Rc::new(Self {
            key: None,
            path,
            parent: Weak::new(),
            services,
            state: RefCell::new(NodeState::default()),
        })
    }

    /// Cached child for `key`, created on first use.
    pub(crate) fn child_node(self: &Rc<Self>, key: &str) -> Rc<Node> {
        if let Some(child) = self.state.borrow().children.get(key) {
            return child.clone();
        }
        let path = if self.path.ends_with('/') {
            format!("{}{key}", self.path)
        } else {
            format!("{}/{key}", self.path)
        };
        let child = Rc::new(Node {
            key: Some(key.to_string()),
            path,
            parent: Rc::downgrade(self),
            services: self.services.clone(),
            state: RefCell::new(NodeState::default()),
        });
        self.state
            .borrow_mut()
            .children
            .insert(key.to_string(), child.clone());
        child
    }

    pub(crate) fn parent(&self) -> Option<Rc<Node>> {
        self.parent.upgrade()
    }

    pub(crate) fn data(&self) -> Value {
        self.state.borrow().data.clone()
    }

    pub(crate) fn priority(&self) -> Priority {
        self.state.borrow().priority.clone()
    }

    /// Priority of the cached child node, `Null` when it was never created.
    pub(crate) fn child_priority(&self, key: &str) -> Priority {
        self.state
            .borrow()
            .children
            .get(key)
            .map(|child| child.priority())
            .unwrap_or_default()
    }

    pub(crate) fn has_key(&self, key: &str) -> bool {
        self.state.borrow().data.get(key).is_some()
    }

    fn take_error(&self, op: OperationKind) -> Option<InjectedError> {
        self.state.borrow_mut().pending_errors.remove(&op)
    }

    /// Snapshot of the node as it is now.
    pub(crate) fn snapshot(self: &Rc<Self>) -> Snapshot {
        let (data, priority) = {
            let state = self.state.borrow();
            (state.data.clone(), state.priority.clone())
        };
        Snapshot::new(Reference::from_node(self.clone()), data, priority)
    }

    /// `value` with `.priority` metadata for this node and its descendants.
    pub(crate) fn export(self: &Rc<Self>, value: &Value, priority: &Priority) -> Value {
        let body = match value {
            Value::Object(map) => Value::Object(
                map.iter()
                    .map(|(key, child_value)| {
                        let child = self.child_node(key);
                        let child_priority = child.priority();
                        (key.clone(), child.export(child_value, &child_priority))
                    })
                    .collect(),
            ),
            other => other.clone(),
        };
        if priority.is_null() {
            return body;
        }
        let mut map = match body {
            Value::Object(map) => map,
            other => {
                let mut map = Map::new();
                map.insert(VALUE_KEY.to_string(), other);
                map
            }
        };
        map.insert(PRIORITY_KEY.to_string(), priority.to_json());
        Value::Object(map)
    }
}

/// Result of a committed or aborted transaction.
#[derive(Clone, Debug)]
pub struct TransactionOutcome {
    pub committed: bool,
    pub snapshot: Snapshot,
}

/// Handle to one location in a mock tree.
///
/// Clones and repeated `child` lookups of the same path refer to the same
/// node, and compare equal. Every mutation is deferred until the tree's
/// queue is flushed.
#[derive(Clone)]
pub struct Reference {
    pub(crate) node: Rc<Node>,
    root: Rc<Node>,
}

impl Reference {
    /// New empty tree driven by a [`ManualClock`] starting at
    /// `config.clock_start_millis`.
    pub fn new(config: &TreeConfig) -> Self {
        Self::with_clock(config, Rc::new(ManualClock::new(config.clock_start_millis)))
    }

    pub fn with_clock(config: &TreeConfig, clock: Rc<dyn Clock>) -> Self {
        let ids = IdGenerator::new(clock.clone(), config.push_seed);
        Self::with_services(config, clock, Rc::new(RefCell::new(ids)))
    }

    /// New tree using explicitly shared services. Trees handed the same id
    /// generator draw push keys from one sequence.
    pub fn with_services(
        config: &TreeConfig,
        clock: Rc<dyn Clock>,
        ids: Rc<RefCell<IdGenerator>>,
    ) -> Self {
        let services = Services::new(config, clock, ids);
        let root = Node::new_root(config.root_path.clone(), services);
        Self {
            node: root.clone(),
            root,
        }
    }

    /// New tree whose root starts out holding `data`. Nothing is queued.
    pub fn with_data(config: &TreeConfig, data: Value) -> Result<Self> {
        value::validate(&data)?;
        let tree = Self::new(config);
        tree.node.apply(value::prepare(data), Origin::Direct);
        Ok(tree)
    }

    pub(crate) fn from_node(node: Rc<Node>) -> Self {
        let mut root = node.clone();
        while let Some(parent) = root.parent() {
            root = parent;
        }
        Self { node, root }
    }

    pub(crate) fn child_of_key(&self, key: &str) -> Reference {
        Self {
            node: self.node.child_node(key),
            root: self.root.clone(),
        }
    }

    // ---- navigation -------------------------------------------------------

    /// Descendant at a slash-separated `path`. Leading and trailing slashes
    /// are ignored; empty paths, empty segments and invalid keys fail with
    /// [`Error::InvalidPath`].
    pub fn child(&self, path: &str) -> Result<Reference> {
        let trimmed = path.trim_matches('/');
        if trimmed.is_empty() {
            return Err(Error::InvalidPath(path.to_string()));
        }
        let mut node = self.node.clone();
        for segment in trimmed.split('/') {
            if value::validate_key(segment).is_err() {
                return Err(Error::InvalidPath(path.to_string()));
            }
            node = node.child_node(segment);
        }
        Ok(Self {
            node,
            root: self.root.clone(),
        })
    }

    pub fn parent(&self) -> Option<Reference> {
        self.node.parent().map(|node| Self {
            node,
            root: self.root.clone(),
        })
    }

    pub fn root(&self) -> Reference {
        Self {
            node: self.root.clone(),
            root: self.root.clone(),
        }
    }

    pub fn key(&self) -> Option<&str> {
        self.node.key.as_deref()
    }

    pub fn path(&self) -> &str {
        &self.node.path
    }

    // ---- reads ------------------------------------------------------------

    pub fn get_data(&self) -> Value {
        self.node.data()
    }

    pub fn get_priority(&self) -> Priority {
        self.node.priority()
    }

    /// Data with `.priority` metadata wherever a priority is set.
    pub fn export_val(&self) -> Value {
        let priority = self.node.priority();
        self.node.export(&self.node.data(), &priority)
    }

    /// Child keys in priority-then-key order.
    pub fn get_ordered_child_keys(&self) -> Vec<String> {
        self.node.state.borrow().sorted_keys.clone()
    }

    /// Priority of the child at `key`; `Null` when there is no such child.
    pub fn priority_of(&self, key: &str) -> Priority {
        if self.node.has_key(key) {
            self.node.child_priority(key)
        } else {
            Priority::Null
        }
    }

    pub fn snapshot(&self) -> Snapshot {
        self.node.snapshot()
    }

    pub fn query(&self) -> Query {
        Query::new(self.clone())
    }

    // ---- mutations --------------------------------------------------------

    /// Replace the data here. Resolves with the written data.
    pub fn set(&self, data: Value) -> Result<Completion<Value>> {
        value::validate(&data)?;
        let err = self.node.take_error(OperationKind::Set);
        let args = vec![data.clone()];
        Ok(self.enqueue_write(OperationKind::Set, value::prepare(data), args, err))
    }

    pub fn set_with_priority(
        &self,
        data: Value,
        priority: impl Into<Priority>,
    ) -> Result<Completion<Value>> {
        let priority = priority.into();
        value::validate(&data)?;
        let err = self.node.take_error(OperationKind::Set);
        let args = vec![data.clone(), priority.to_json()];
        let mut prepared = match value::prepare(data) {
            Value::Object(map) => map,
            other => {
                let mut map = Map::new();
                map.insert(VALUE_KEY.to_string(), other);
                map
            }
        };
        prepared.insert(PRIORITY_KEY.to_string(), priority.to_json());
        Ok(self.enqueue_write(OperationKind::Set, Value::Object(prepared), args, err))
    }

    /// Merge path-keyed changes (`{"a/b": 1}`) into the data as it is when
    /// the queue flushes. Non-object arguments fail synchronously.
    pub fn update(&self, changes: Value) -> Result<Completion<Value>> {
        let changes = value::validate_update(&changes)?.clone();
        let err = self.node.take_error(OperationKind::Update);
        let args = vec![Value::Object(changes.clone())];
        let node = self.node.clone();
        let (completion, resolver) = Completion::pending();
        let entry = self.queue().push(
            Provenance::new(OperationKind::Update, self.path(), args),
            move || {
                if let Some(err) = err {
                    debug!(path = %node.path, %err, "update failed with injected error");
                    resolver.settle(Err(err.into()));
                    return;
                }
                let merged = value::prepare(value::merge_update(&node.data(), &changes));
                let written = value::canonical(&merged);
                node.apply(merged, Origin::Direct);
                resolver.settle(Ok(written));
            },
        );
        completion.attach(&entry);
        Ok(completion)
    }

    /// Change this node's priority. The parent re-sorts; the data is untouched.
    pub fn set_priority(&self, priority: impl Into<Priority>) -> Completion<()> {
        let priority = priority.into();
        let err = self.node.take_error(OperationKind::SetPriority);
        let args = vec![priority.to_json()];
        let node = self.node.clone();
        let (completion, resolver) = Completion::pending();
        let entry = self.queue().push(
            Provenance::new(OperationKind::SetPriority, self.path(), args),
            move || match err {
                Some(err) => resolver.settle(Err(err.into())),
                None => {
                    node.change_priority(priority);
                    resolver.settle(Ok(()));
                }
            },
        );
        completion.attach(&entry);
        completion
    }

    /// Same as `set(Value::Null)`.
    pub fn remove(&self) -> Completion<Value> {
        let err = self.node.take_error(OperationKind::Remove);
        self.enqueue_write(OperationKind::Remove, Value::Null, Vec::new(), err)
    }

    /// New child under a fresh time-ordered key. Nothing is queued.
    pub fn push_child(&self) -> Reference {
        let key = self.node.services.ids.borrow_mut().next_key();
        self.child_of_key(&key)
    }

    /// New child under a fresh time-ordered key, holding `data` once the
    /// queue flushes.
    pub fn push(&self, data: Value) -> Result<(Reference, Completion<Value>)> {
        value::validate(&data)?;
        let err = self.node.take_error(OperationKind::Push);
        let child = self.push_child();
        let args = vec![data.clone()];
        let completion = child.enqueue_write(OperationKind::Push, value::prepare(data), args, err);
        Ok((child, completion))
    }

    /// Run `update_fn` against the current data now, and again at flush time
    /// against the data as it is then; the flush-time result commits.
    /// Returning `None` aborts without touching the data.
    ///
    /// `on_complete(error, committed, snapshot)` fires when the transaction
    /// settles.
    pub fn transaction<F, C>(
        &self,
        mut update_fn: F,
        on_complete: C,
    ) -> Result<Completion<TransactionOutcome>>
    where
        F: FnMut(Value) -> Option<Value> + 'static,
        C: FnOnce(Option<&Error>, bool, &Snapshot) + 'static,
    {
        if let Some(optimistic) = update_fn(self.get_data()) {
            value::validate(&optimistic)?;
        }
        let err = self.node.take_error(OperationKind::Transaction);
        let node = self.node.clone();
        let (completion, resolver) = Completion::pending();
        let entry = self.queue().push(
            Provenance::new(OperationKind::Transaction, self.path(), Vec::new()),
            move || {
                let outcome = match err {
                    Some(err) => Err(Error::from(err)),
                    None => match update_fn(node.data()) {
                        None => Ok(false),
                        Some(next) => value::validate(&next).map(|()| {
                            node.apply(value::prepare(next), Origin::Direct);
                            true
                        }),
                    },
                };
                let snapshot = node.snapshot();
                debug!(path = %node.path, ?outcome, "transaction settled");
                match outcome {
                    Ok(committed) => {
                        on_complete(None, committed, &snapshot);
                        resolver.settle(Ok(TransactionOutcome {
                            committed,
                            snapshot,
                        }));
                    }
                    Err(err) => {
                        on_complete(Some(&err), false, &snapshot);
                        resolver.settle(Err(err));
                    }
                }
            },
        );
        completion.attach(&entry);
        Ok(completion)
    }

    fn enqueue_write(
        &self,
        op: OperationKind,
        prepared: Value,
        args: Vec<Value>,
        err: Option<InjectedError>,
    ) -> Completion<Value> {
        let node = self.node.clone();
        let (completion, resolver) = Completion::pending();
        let entry = self
            .queue()
            .push(Provenance::new(op, self.path(), args), move || {
                if let Some(err) = err {
                    debug!(path = %node.path, %op, %err, "write failed with injected error");
                    resolver.settle(Err(err.into()));
                    return;
                }
                let written = value::canonical(&prepared);
                node.apply(prepared, Origin::Direct);
                resolver.settle(Ok(written));
            });
        completion.attach(&entry);
        completion
    }

    // ---- listeners --------------------------------------------------------

    /// Register a listener. `value` and `child_added` listeners are caught up
    /// with the current state on the next flush.
    pub fn on(
        &self,
        kind: EventKind,
        callback: impl Fn(&Snapshot, Option<&str>) + 'static,
    ) -> ListenerId {
        self.register(kind, Rc::new(callback), None)
    }

    /// Like [`Reference::on`], with a callback invoked if the listener is
    /// canceled.
    pub fn on_with_cancel(
        &self,
        kind: EventKind,
        callback: impl Fn(&Snapshot, Option<&str>) + 'static,
        cancel: impl Fn(&Error) + 'static,
    ) -> ListenerId {
        self.register(kind, Rc::new(callback), Some(Rc::new(cancel)))
    }

    /// Listener that unregisters itself after its first event.
    pub fn once(
        &self,
        kind: EventKind,
        callback: impl Fn(&Snapshot, Option<&str>) + 'static,
    ) -> ListenerId {
        let id = self.node.services.next_listener_id();
        let node = Rc::downgrade(&self.node);
        let fired = Cell::new(false);
        let wrapper: Callback = Rc::new(move |snapshot, prev| {
            if fired.replace(true) {
                return;
            }
            if let Some(node) = node.upgrade() {
                node.state.borrow_mut().listeners.remove(Some(kind), Some(id));
            }
            callback(snapshot, prev);
        });
        self.register_with_id(id, kind, wrapper, None);
        id
    }

    fn register(
        &self,
        kind: EventKind,
        callback: Callback,
        cancel: Option<CancelCallback>,
    ) -> ListenerId {
        let id = self.node.services.next_listener_id();
        self.register_with_id(id, kind, callback, cancel);
        id
    }

    fn register_with_id(
        &self,
        id: ListenerId,
        kind: EventKind,
        callback: Callback,
        cancel: Option<CancelCallback>,
    ) {
        let provenance = Provenance::new(OperationKind::On, self.path(), vec![json!(kind.as_str())]);
        if let Some(err) = self.node.take_error(OperationKind::On) {
            debug!(path = %self.path(), %kind, %err, "listener refused with injected error");
            self.queue().push(provenance, move || {
                if let Some(cancel) = cancel {
                    cancel(&Error::Injected(err));
                }
            });
            return;
        }
        self.node.state.borrow_mut().listeners.add(
            kind,
            Registration {
                id,
                callback,
                cancel,
            },
        );
        debug!(path = %self.path(), %kind, listener = id.0, "registered listener");
        if matches!(kind, EventKind::Value | EventKind::ChildAdded) {
            let node = self.node.clone();
            self.queue().push(provenance, move || node.catch_up(kind, id));
        }
    }

    /// Unregister listeners: every kind when `kind` is `None`, every listener
    /// of the kind when `listener` is `None`. Returns how many were removed.
    pub fn off(&self, kind: Option<EventKind>, listener: Option<ListenerId>) -> usize {
        let removed = self.node.state.borrow_mut().listeners.remove(kind, listener);
        debug!(path = %self.path(), count = removed.len(), "unregistered listeners");
        removed.len()
    }

    /// Synchronously cancel matching listeners: their cancel callbacks get
    /// `error` and the registrations are removed.
    pub fn force_cancel(
        &self,
        error: impl Into<Error>,
        kind: Option<EventKind>,
        listener: Option<ListenerId>,
    ) -> usize {
        let error = error.into();
        let removed = self.node.state.borrow_mut().listeners.remove(kind, listener);
        debug!(path = %self.path(), count = removed.len(), %error, "force canceling listeners");
        for (_, registration) in &removed {
            if let Some(cancel) = &registration.cancel {
                cancel(&error);
            }
        }
        removed.len()
    }

    /// Number of listeners registered here for `kind`.
    pub fn listener_count(&self, kind: EventKind) -> usize {
        self.node.state.borrow().listeners.count(kind)
    }

    /// Fire a synthetic event at this node's listeners right away, without
    /// touching any data.
    pub fn fake_event(
        &self,
        kind: EventKind,
        key: Option<&str>,
        data: Value,
        prev: Option<&str>,
        priority: impl Into<Priority>,
    ) -> Result<()> {
        value::validate(&data)?;
        let target = match key {
            Some(key) => self.child(key)?,
            None => self.clone(),
        };
        let snapshot = Snapshot::new(
            target,
            value::canonical(&value::prepare(data)),
            priority.into(),
        );
        self.node.dispatch(kind, &snapshot, prev);
        Ok(())
    }

    // ---- test controls ----------------------------------------------------

    /// Make the next `op` issued on this node fail with `error`. Consumed by
    /// that one call.
    pub fn fail_next(&self, op: OperationKind, error: InjectedError) {
        debug!(path = %self.path(), %op, %error, "injecting error");
        self.node.state.borrow_mut().pending_errors.insert(op, error);
    }

    pub fn flush(&self) -> Result<()> {
        self.queue().flush(None)
    }

    pub fn flush_after(&self, delay_millis: u64) -> Result<()> {
        self.queue().flush(Some(delay_millis))
    }

    pub fn auto_flush(&self, mode: AutoFlush) {
        self.queue().set_auto_flush(mode);
    }

    pub fn queue(&self) -> &FlushQueue {
        &self.node.services.queue
    }

    pub fn auth(&self) -> &AuthController {
        &self.node.services.auth
    }
}

impl PartialEq for Reference {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.node, &other.node)
    }
}

impl Eq for Reference {}

impl fmt::Debug for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Reference").field(&self.node.path).finish()
    }
}

impl fmt::Display for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.node.path)
    }
}
