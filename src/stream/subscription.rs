//! Subscription handles and dispose bags

use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

type Teardown = Box<dyn FnOnce() + Send>;

struct Inner {
    closed: AtomicBool,
    teardowns: Mutex<Vec<Teardown>>,
}

/// Handle to an active subscription
///
/// Clones refer to the same subscription. [`Subscription::unsubscribe`] runs
/// every registered teardown exactly once, no matter how often or from how
/// many clones it is called.
#[derive(Clone)]
pub struct Subscription {
    inner: Arc<Inner>,
}

impl Subscription {
    pub fn new(teardown: impl FnOnce() + Send + 'static) -> Self {
        let subscription = Self::empty();
        subscription.add_teardown(teardown);
        subscription
    }

    pub fn empty() -> Self {
        Self {
            inner: Arc::new(Inner {
                closed: AtomicBool::new(false),
                teardowns: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Register a teardown; runs immediately if already closed
    pub fn add_teardown(&self, teardown: impl FnOnce() + Send + 'static) {
        {
            let mut teardowns = self.inner.teardowns.lock();
            if !self.is_closed() {
                teardowns.push(Box::new(teardown));
                return;
            }
        }
        teardown();
    }

    /// Tie a child subscription to this one
    pub fn add(&self, child: Subscription) {
        if Arc::ptr_eq(&self.inner, &child.inner) {
            return;
        }
        self.add_teardown(move || child.unsubscribe());
    }

    pub fn unsubscribe(&self) {
        let teardowns = {
            let mut teardowns = self.inner.teardowns.lock();
            if self.inner.closed.swap(true, Ordering::AcqRel) {
                return;
            }
            std::mem::take(&mut *teardowns)
        };
        for teardown in teardowns {
            teardown();
        }
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Owns subscriptions and disposes them all when dropped
#[derive(Default)]
pub struct SubscriptionBag {
    subscriptions: Vec<Subscription>,
}

impl SubscriptionBag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, subscription: Subscription) {
        self.subscriptions.retain(|s| !s.is_closed());
        self.subscriptions.push(subscription);
    }

    pub fn len(&self) -> usize {
        self.subscriptions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.subscriptions.is_empty()
    }

    pub fn dispose(&mut self) {
        for subscription in self.subscriptions.drain(..) {
            subscription.unsubscribe();
        }
    }
}

impl Drop for SubscriptionBag {
    fn drop(&mut self) {
        self.dispose();
    }
}
