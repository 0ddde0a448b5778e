use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use serde_json::Value;
use tracing::debug;

use crate::completion::Completion;
use crate::error::{Error, InjectedError};
use crate::ids::ListenerId;
use crate::ops::{OperationKind, Provenance};
use crate::queue::FlushQueue;

pub type AuthCallback = Rc<dyn Fn(Option<&Value>)>;

#[derive(Default)]
struct AuthState {
    user: Option<Value>,
    listeners: Vec<(ListenerId, AuthCallback)>,
    next_listener: u64,
    pending_error: Option<InjectedError>,
}

/// Authentication state of a mock tree.
///
/// State changes go through the tree's queue, so they are ordered with data
/// mutations and only become visible on flush.
#[derive(Clone)]
pub struct AuthController {
    queue: FlushQueue,
    state: Rc<RefCell<AuthState>>,
}

impl AuthController {
    pub(crate) fn new(queue: FlushQueue) -> Self {
        Self {
            queue,
            state: Rc::new(RefCell::new(AuthState::default())),
        }
    }

    pub fn get_auth(&self) -> Option<Value> {
        self.state.borrow().user.clone()
    }

    /// Register a callback. It is invoked right away with the current state
    /// and again after every change.
    pub fn on_auth(&self, callback: impl Fn(Option<&Value>) + 'static) -> ListenerId {
        let callback: AuthCallback = Rc::new(callback);
        let (id, user) = {
            let mut state = self.state.borrow_mut();
            state.next_listener += 1;
            let id = ListenerId(state.next_listener);
            state.listeners.push((id, callback.clone()));
            (id, state.user.clone())
        };
        callback(user.as_ref());
        id
    }

    /// Returns whether the listener was registered.
    pub fn off_auth(&self, id: ListenerId) -> bool {
        let mut state = self.state.borrow_mut();
        let before = state.listeners.len();
        state.listeners.retain(|(listener, _)| *listener != id);
        state.listeners.len() != before
    }

    /// Make the next `change_auth_state` fail with `error`.
    pub fn fail_next(&self, error: InjectedError) {
        self.state.borrow_mut().pending_error = Some(error);
    }

    /// Queue a change of the signed-in user (`None` signs out). Listeners fire
    /// on flush if the state actually changed.
    pub fn change_auth_state(&self, user: Option<Value>) -> Completion<()> {
        let err = self.state.borrow_mut().pending_error.take();
        let args = vec![user.clone().unwrap_or(Value::Null)];
        let state = self.state.clone();
        let (completion, resolver) = Completion::pending();
        let entry = self.queue.push(
            Provenance::new(OperationKind::ChangeAuthState, "auth", args),
            move || {
                if let Some(err) = err {
                    resolver.settle(Err(Error::Injected(err)));
                    return;
                }
                let listeners = {
                    let mut state = state.borrow_mut();
                    if state.user == user {
                        None
                    } else {
                        state.user = user.clone();
                        Some(state.listeners.clone())
                    }
                };
                if let Some(listeners) = listeners {
                    debug!(signed_in = user.is_some(), count = listeners.len(), "auth state changed");
                    for (_, callback) in listeners {
                        callback(user.as_ref());
                    }
                }
                resolver.settle(Ok(()));
            },
        );
        completion.attach(&entry);
        completion
    }
}

impl fmt::Debug for AuthController {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.borrow();
        f.debug_struct("AuthController")
            .field("user", &state.user)
            .field("listeners", &state.listeners.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traits::ManualClock;
    use serde_json::json;
    use std::cell::Cell;

    fn controller() -> AuthController {
        AuthController::new(FlushQueue::new(Rc::new(ManualClock::default())))
    }

    #[test]
    fn on_auth_fires_immediately_and_on_change() {
        let auth = controller();
        let calls = Rc::new(RefCell::new(Vec::new()));
        let log = calls.clone();
        auth.on_auth(move |user| log.borrow_mut().push(user.cloned()));
        assert_eq!(*calls.borrow(), vec![None]);

        auth.change_auth_state(Some(json!({"uid": "kato"})));
        assert_eq!(auth.get_auth(), None);
        auth.queue.flush(None).unwrap();
        assert_eq!(auth.get_auth(), Some(json!({"uid": "kato"})));
        assert_eq!(calls.borrow().len(), 2);

        auth.change_auth_state(Some(json!({"uid": "kato"})));
        auth.queue.flush(None).unwrap();
        assert_eq!(calls.borrow().len(), 2);
    }

    #[test]
    fn off_auth_stops_notifications() {
        let auth = controller();
        let count = Rc::new(Cell::new(0));
        let counter = count.clone();
        let id = auth.on_auth(move |_| counter.set(counter.get() + 1));
        assert!(auth.off_auth(id));
        assert!(!auth.off_auth(id));
        auth.change_auth_state(Some(json!("user")));
        auth.queue.flush(None).unwrap();
        assert_eq!(count.get(), 1);
    }

    #[test]
    fn injected_error_leaves_state_alone() {
        let auth = controller();
        auth.fail_next(InjectedError::permission_denied());
        let done = auth.change_auth_state(Some(json!("user")));
        auth.queue.flush(None).unwrap();
        assert_eq!(
            done.outcome(),
            Some(Err(Error::Injected(InjectedError::permission_denied())))
        );
        assert_eq!(auth.get_auth(), None);
    }
}
