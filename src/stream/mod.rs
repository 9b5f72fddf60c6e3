//! Push-based observable streams
//!
//! A minimal reactive layer: cold [`Observable`]s, hot subjects, and the
//! handful of operators the routing pipeline is built from. Delivery is
//! synchronous; an event is fully processed downstream before `next` returns.
//!
//! Subjects, `merge` and `combine_latest_all` serialise delivery behind a
//! reentrant gate: pushes from different threads reach downstream one at a
//! time, while a callback may still feed back into the same pipeline.

mod combine;
mod operators;
mod subject;
mod subscription;

pub use combine::{combine_latest, combine_latest3, combine_latest_all};
pub use operators::merge;
pub use subject::{LatestValue, PublishSubject};
pub use subscription::{Subscription, SubscriptionBag};

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::error::MidiError;

/// Signal delivered to an observer
#[derive(Debug, Clone, PartialEq)]
pub enum Event<T> {
    Next(T),
    Error(MidiError),
    Completed,
}

impl<T> Event<T> {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Event::Next(_))
    }
}

/// Callback type behind every observer
pub type EventCallback<T> = Arc<dyn Fn(Event<T>) + Send + Sync>;

/// Receiving end of a subscription
///
/// Clones share the same stop flag: once any clone has delivered `Error` or
/// `Completed`, every clone goes quiet.
pub struct Observer<T> {
    callback: EventCallback<T>,
    stopped: Arc<AtomicBool>,
}

impl<T> Clone for Observer<T> {
    fn clone(&self) -> Self {
        Self {
            callback: self.callback.clone(),
            stopped: self.stopped.clone(),
        }
    }
}

impl<T> Observer<T> {
    pub fn new(callback: impl Fn(Event<T>) + Send + Sync + 'static) -> Self {
        Self {
            callback: Arc::new(callback),
            stopped: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn on(&self, event: Event<T>) {
        match event {
            Event::Next(_) => {
                if self.stopped.load(Ordering::Acquire) {
                    return;
                }
            }
            Event::Error(_) | Event::Completed => {
                if self.stopped.swap(true, Ordering::AcqRel) {
                    return;
                }
            }
        }
        (self.callback)(event);
    }

    pub fn next(&self, value: T) {
        self.on(Event::Next(value));
    }

    pub fn error(&self, error: MidiError) {
        self.on(Event::Error(error));
    }

    pub fn completed(&self) {
        self.on(Event::Completed);
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }
}

type SubscribeFn<T> = Arc<dyn Fn(Observer<T>) -> Subscription + Send + Sync>;

/// Cold, push-based sequence of `T`
///
/// Nothing happens until [`Observable::subscribe`]; each subscription runs the
/// producer afresh.
pub struct Observable<T> {
    subscribe_fn: SubscribeFn<T>,
}

impl<T> Clone for Observable<T> {
    fn clone(&self) -> Self {
        Self {
            subscribe_fn: self.subscribe_fn.clone(),
        }
    }
}

impl<T: Send + 'static> Observable<T> {
    /// Build an observable from a producer
    ///
    /// The producer receives the observer and returns the subscription that
    /// releases whatever it acquired.
    pub fn create<F>(producer: F) -> Self
    where
        F: Fn(Observer<T>) -> Subscription + Send + Sync + 'static,
    {
        Self {
            subscribe_fn: Arc::new(producer),
        }
    }

    /// Build a fresh observable for every subscription
    pub fn defer<F>(factory: F) -> Self
    where
        F: Fn() -> Observable<T> + Send + Sync + 'static,
    {
        Self::create(move |observer| factory().subscribe(observer))
    }

    pub fn empty() -> Self {
        Self::create(|observer| {
            observer.completed();
            Subscription::empty()
        })
    }

    pub fn error(error: MidiError) -> Self {
        Self::create(move |observer| {
            observer.error(error.clone());
            Subscription::empty()
        })
    }

    /// Attach an observer
    ///
    /// The returned subscription is disposed automatically after a terminal
    /// event, and no event reaches `observer` once it is closed.
    pub fn subscribe(&self, observer: Observer<T>) -> Subscription {
        let subscription = Subscription::empty();
        let guard = subscription.clone();
        let downstream = Observer::new(move |event: Event<T>| {
            if guard.is_closed() {
                return;
            }
            let terminal = event.is_terminal();
            observer.on(event);
            if terminal {
                guard.unsubscribe();
            }
        });

        let upstream = (self.subscribe_fn)(downstream);
        subscription.add(upstream);
        subscription
    }

    pub fn subscribe_with<N, E, C>(&self, on_next: N, on_error: E, on_completed: C) -> Subscription
    where
        N: Fn(T) + Send + Sync + 'static,
        E: Fn(MidiError) + Send + Sync + 'static,
        C: Fn() + Send + Sync + 'static,
    {
        self.subscribe(Observer::new(move |event| match event {
            Event::Next(value) => on_next(value),
            Event::Error(error) => on_error(error),
            Event::Completed => on_completed(),
        }))
    }

    /// Subscribe to values only; errors are logged
    pub fn subscribe_next<N>(&self, on_next: N) -> Subscription
    where
        N: Fn(T) + Send + Sync + 'static,
    {
        self.subscribe_with(
            on_next,
            |error| tracing::warn!("Unhandled stream error: {}", error),
            || {},
        )
    }
}

impl<T: Clone + Send + Sync + 'static> Observable<T> {
    pub fn just(value: T) -> Self {
        Self::from_iter(vec![value])
    }

    pub fn from_iter(values: impl IntoIterator<Item = T>) -> Self {
        let values: Vec<T> = values.into_iter().collect();
        Self::create(move |observer| {
            for value in &values {
                if observer.is_stopped() {
                    break;
                }
                observer.next(value.clone());
            }
            observer.completed();
            Subscription::empty()
        })
    }
}
