use std::cell::RefCell;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::rc::{Rc, Weak};
use std::task::{Context, Poll, Waker};

use crate::error::{Error, Result};
use crate::queue::{EntryHandle, QueueEntry};

type SettleCallback<T> = Box<dyn FnOnce(&Result<T>)>;

struct Shared<T> {
    outcome: Option<Result<T>>,
    waker: Option<Waker>,
    callbacks: Vec<SettleCallback<T>>,
    entry: Option<Weak<QueueEntry>>,
}

/// Result of a deferred operation.
///
/// Settles when the queued operation runs, not when it was called. It can be
/// awaited, inspected with [`Completion::outcome`], or observed with
/// [`Completion::on_settled`]. Clones observe the same outcome.
pub struct Completion<T> {
    shared: Rc<RefCell<Shared<T>>>,
}

/// Settles a [`Completion`] from inside the queued operation.
pub(crate) struct Resolver<T> {
    shared: Rc<RefCell<Shared<T>>>,
}

impl<T: Clone + 'static> Completion<T> {
    pub(crate) fn pending() -> (Self, Resolver<T>) {
        let shared = Rc::new(RefCell::new(Shared {
            outcome: None,
            waker: None,
            callbacks: Vec::new(),
            entry: None,
        }));
        (
            Self {
                shared: shared.clone(),
            },
            Resolver { shared },
        )
    }

    pub(crate) fn attach(&self, entry: &EntryHandle) {
        self.shared.borrow_mut().entry = Some(Rc::downgrade(entry));
    }

    pub fn is_pending(&self) -> bool {
        self.shared.borrow().outcome.is_none()
    }

    pub fn outcome(&self) -> Option<Result<T>> {
        self.shared.borrow().outcome.clone()
    }

    /// Invoke `callback` once the operation settles (immediately if it
    /// already has).
    pub fn on_settled(&self, callback: impl FnOnce(&Result<T>) + 'static) {
        let settled = self.shared.borrow().outcome.clone();
        match settled {
            Some(outcome) => callback(&outcome),
            None => self.shared.borrow_mut().callbacks.push(Box::new(callback)),
        }
    }

    /// Cancel the underlying queued operation. Fails with
    /// [`Error::AlreadyRun`] once it has run.
    pub fn cancel(&self) -> Result<()> {
        if !self.is_pending() {
            return Err(Error::AlreadyRun);
        }
        let entry = self.shared.borrow().entry.as_ref().and_then(Weak::upgrade);
        if let Some(entry) = entry {
            entry.cancel()?;
        }
        Resolver {
            shared: self.shared.clone(),
        }
        .settle(Err(Error::Canceled));
        Ok(())
    }
}

impl<T: Clone + 'static> Resolver<T> {
    pub(crate) fn settle(self, outcome: Result<T>) {
        let (waker, callbacks) = {
            let mut shared = self.shared.borrow_mut();
            if shared.outcome.is_some() {
                return;
            }
            shared.outcome = Some(outcome.clone());
            shared.entry = None;
            (shared.waker.take(), std::mem::take(&mut shared.callbacks))
        };
        if let Some(waker) = waker {
            waker.wake();
        }
        for callback in callbacks {
            callback(&outcome);
        }
    }
}

impl<T> Clone for Completion<T> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
        }
    }
}

impl<T: Clone + 'static> Future for Completion<T> {
    type Output = Result<T>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let mut shared = self.shared.borrow_mut();
        match &shared.outcome {
            Some(outcome) => Poll::Ready(outcome.clone()),
            None => {
                shared.waker = Some(cx.waker().clone());
                Poll::Pending
            }
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for Completion<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Completion")
            .field("outcome", &self.shared.borrow().outcome)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ops::{OperationKind, Provenance};
    use crate::queue::FlushQueue;
    use crate::traits::ManualClock;
    use futures_util::FutureExt;
    use std::cell::Cell;

    #[test]
    fn settles_once() {
        let (completion, resolver) = Completion::<u8>::pending();
        assert!(completion.clone().now_or_never().is_none());
        resolver.settle(Ok(3));
        assert_eq!(completion.outcome(), Some(Ok(3)));
        assert_eq!(completion.now_or_never(), Some(Ok(3)));
    }

    #[test]
    fn callbacks_fire_on_settle_or_immediately() {
        let (completion, resolver) = Completion::<u8>::pending();
        let seen = Rc::new(Cell::new(0));
        let early = seen.clone();
        completion.on_settled(move |r| early.set(early.get() + *r.as_ref().unwrap()));
        resolver.settle(Ok(2));
        let late = seen.clone();
        completion.on_settled(move |r| late.set(late.get() + *r.as_ref().unwrap()));
        assert_eq!(seen.get(), 4);
    }

    #[test]
    fn cancel_cancels_the_queue_entry() {
        let queue = FlushQueue::new(Rc::new(ManualClock::default()));
        let (completion, resolver) = Completion::<()>::pending();
        let entry = queue.push(Provenance::new(OperationKind::Set, "/", vec![]), move || {
            resolver.settle(Ok(()))
        });
        completion.attach(&entry);
        completion.cancel().unwrap();
        assert_eq!(completion.outcome(), Some(Err(Error::Canceled)));
        queue.flush(None).unwrap();
        assert_eq!(completion.outcome(), Some(Err(Error::Canceled)));
        assert_eq!(completion.cancel(), Err(Error::AlreadyRun));
    }
}
