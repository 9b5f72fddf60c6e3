//! Single-source operators and fan-in
//!
//! `merge`, `merge_all` and `switch_latest` serialize deliveries from their
//! sources through a reentrant gate, so sources pushing from different threads
//! (e.g. one transport callback thread per device) reach downstream one event
//! at a time.

use parking_lot::{Mutex, ReentrantMutex};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use super::{Event, Observable, Observer, Subscription};
use crate::error::MidiError;

impl<T: Send + 'static> Observable<T> {
    pub fn map<U, F>(&self, f: F) -> Observable<U>
    where
        U: Send + 'static,
        F: Fn(T) -> U + Send + Sync + 'static,
    {
        let source = self.clone();
        let f = Arc::new(f);
        Observable::create(move |observer: Observer<U>| {
            let f = f.clone();
            source.subscribe(Observer::new(move |event| match event {
                Event::Next(value) => observer.next(f(value)),
                Event::Error(error) => observer.error(error),
                Event::Completed => observer.completed(),
            }))
        })
    }

    pub fn filter<P>(&self, predicate: P) -> Observable<T>
    where
        P: Fn(&T) -> bool + Send + Sync + 'static,
    {
        self.filter_map(move |value| if predicate(&value) { Some(value) } else { None })
    }

    pub fn filter_map<U, F>(&self, f: F) -> Observable<U>
    where
        U: Send + 'static,
        F: Fn(T) -> Option<U> + Send + Sync + 'static,
    {
        let source = self.clone();
        let f = Arc::new(f);
        Observable::create(move |observer: Observer<U>| {
            let f = f.clone();
            source.subscribe(Observer::new(move |event| match event {
                Event::Next(value) => {
                    if let Some(mapped) = f(value) {
                        observer.next(mapped);
                    }
                }
                Event::Error(error) => observer.error(error),
                Event::Completed => observer.completed(),
            }))
        })
    }

    /// Run a side effect for every value without changing the stream
    pub fn inspect<F>(&self, f: F) -> Observable<T>
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        self.map(move |value| {
            f(&value);
            value
        })
    }

    /// Replace an error with a fallback stream
    pub fn catch_error<F>(&self, handler: F) -> Observable<T>
    where
        F: Fn(MidiError) -> Observable<T> + Send + Sync + 'static,
    {
        let source = self.clone();
        let handler = Arc::new(handler);
        Observable::create(move |observer: Observer<T>| {
            let composite = Subscription::empty();
            let handler = handler.clone();
            let fallback_slot = composite.clone();
            composite.add(source.subscribe(Observer::new(move |event| match event {
                Event::Next(value) => observer.next(value),
                Event::Error(error) => {
                    let forward = observer.clone();
                    fallback_slot.add(handler(error).subscribe(Observer::new(move |event| {
                        forward.on(event)
                    })));
                }
                Event::Completed => observer.completed(),
            })));
            composite
        })
    }
}

impl<T: Clone + Send + Sync + 'static> Observable<T> {
    /// Emit `value` before anything from the source
    pub fn start_with(&self, value: T) -> Observable<T> {
        let source = self.clone();
        Observable::create(move |observer: Observer<T>| {
            observer.next(value.clone());
            if observer.is_stopped() {
                return Subscription::empty();
            }
            source.subscribe(Observer::new(move |event| observer.on(event)))
        })
    }
}

impl<T: Clone + PartialEq + Send + 'static> Observable<T> {
    /// Suppress values equal to the immediately preceding one
    pub fn distinct_until_changed(&self) -> Observable<T> {
        let source = self.clone();
        Observable::create(move |observer: Observer<T>| {
            let last: Mutex<Option<T>> = Mutex::new(None);
            source.subscribe(Observer::new(move |event| match event {
                Event::Next(value) => {
                    let changed = {
                        let mut last = last.lock();
                        if last.as_ref() == Some(&value) {
                            false
                        } else {
                            *last = Some(value.clone());
                            true
                        }
                    };
                    if changed {
                        observer.next(value);
                    }
                }
                Event::Error(error) => observer.error(error),
                Event::Completed => observer.completed(),
            }))
        })
    }
}

/// Fan-in: every value from every source, in arrival order
///
/// Completes once all sources have completed; the first error from any source
/// terminates the merged stream.
pub fn merge<T: Send + 'static>(sources: Vec<Observable<T>>) -> Observable<T> {
    Observable::create(move |observer: Observer<T>| {
        if sources.is_empty() {
            observer.completed();
            return Subscription::empty();
        }

        let remaining = Arc::new(AtomicUsize::new(sources.len()));
        let gate = Arc::new(ReentrantMutex::new(()));
        let composite = Subscription::empty();

        for source in &sources {
            let sink = observer.clone();
            let remaining = remaining.clone();
            let gate = gate.clone();
            composite.add(source.subscribe(Observer::new(move |event| {
                let _serial = gate.lock();
                match event {
                    Event::Next(value) => sink.next(value),
                    Event::Error(error) => sink.error(error),
                    Event::Completed => {
                        if remaining.fetch_sub(1, Ordering::AcqRel) == 1 {
                            sink.completed();
                        }
                    }
                }
            })));
            if observer.is_stopped() {
                break;
            }
        }
        composite
    })
}

impl<T: Send + 'static> Observable<Observable<T>> {
    /// Flatten a stream of streams, subscribing to every inner stream
    ///
    /// Completes when the outer stream and every inner stream have completed.
    pub fn merge_all(&self) -> Observable<T> {
        let outer = self.clone();
        Observable::create(move |observer: Observer<T>| {
            // The outer stream counts as one active source
            let active = Arc::new(AtomicUsize::new(1));
            let gate = Arc::new(ReentrantMutex::new(()));
            let composite = Subscription::empty();

            let inner_composite = composite.clone();
            let outer_observer = observer.clone();
            let outer_active = active.clone();
            let outer_gate = gate.clone();
            composite.add(outer.subscribe(Observer::new(move |event: Event<Observable<T>>| {
                match event {
                    Event::Next(inner) => {
                        outer_active.fetch_add(1, Ordering::AcqRel);
                        let observer = outer_observer.clone();
                        let active = outer_active.clone();
                        let gate = outer_gate.clone();
                        inner_composite.add(inner.subscribe(Observer::new(move |event| {
                            let _serial = gate.lock();
                            match event {
                                Event::Next(value) => observer.next(value),
                                Event::Error(error) => observer.error(error),
                                Event::Completed => {
                                    if active.fetch_sub(1, Ordering::AcqRel) == 1 {
                                        observer.completed();
                                    }
                                }
                            }
                        })));
                    }
                    Event::Error(error) => {
                        let _serial = outer_gate.lock();
                        outer_observer.error(error);
                    }
                    Event::Completed => {
                        let _serial = outer_gate.lock();
                        if outer_active.fetch_sub(1, Ordering::AcqRel) == 1 {
                            outer_observer.completed();
                        }
                    }
                }
            })));
            composite
        })
    }

    /// Forward only the most recent inner stream
    ///
    /// Each new inner stream unsubscribes the previous one before being
    /// subscribed. Completes when the outer stream has completed and the
    /// current inner stream (if any) has completed.
    pub fn switch_latest(&self) -> Observable<T> {
        let outer = self.clone();
        Observable::create(move |observer: Observer<T>| {
            let state = Arc::new(SwitchState {
                current: Mutex::new(None),
                generation: AtomicU64::new(0),
                inner_active: Mutex::new(false),
                outer_done: Mutex::new(false),
                gate: ReentrantMutex::new(()),
            });

            let composite = Subscription::empty();
            let teardown_state = state.clone();
            composite.add_teardown(move || {
                let current = teardown_state.current.lock().take();
                if let Some(current) = current {
                    current.unsubscribe();
                }
            });

            let outer_state = state.clone();
            composite.add(outer.subscribe(Observer::new(move |event: Event<Observable<T>>| {
                let state = outer_state.clone();
                match event {
                    Event::Next(inner) => {
                        let generation = state.generation.fetch_add(1, Ordering::AcqRel) + 1;
                        let previous = state.current.lock().take();
                        if let Some(previous) = previous {
                            previous.unsubscribe();
                        }
                        *state.inner_active.lock() = true;

                        let observer = observer.clone();
                        let inner_state = state.clone();
                        let subscription = inner.subscribe(Observer::new(move |event| {
                            if inner_state.generation.load(Ordering::Acquire) != generation {
                                return;
                            }
                            let _serial = inner_state.gate.lock();
                            match event {
                                Event::Next(value) => observer.next(value),
                                Event::Error(error) => observer.error(error),
                                Event::Completed => {
                                    *inner_state.inner_active.lock() = false;
                                    if *inner_state.outer_done.lock() {
                                        observer.completed();
                                    }
                                }
                            }
                        }));

                        if state.generation.load(Ordering::Acquire) == generation {
                            *state.current.lock() = Some(subscription);
                        } else {
                            subscription.unsubscribe();
                        }
                    }
                    Event::Error(error) => {
                        let _serial = state.gate.lock();
                        observer.error(error);
                    }
                    Event::Completed => {
                        let _serial = state.gate.lock();
                        *state.outer_done.lock() = true;
                        if !*state.inner_active.lock() {
                            observer.completed();
                        }
                    }
                }
            })));
            composite
        })
    }
}

struct SwitchState {
    current: Mutex<Option<Subscription>>,
    generation: AtomicU64,
    inner_active: Mutex<bool>,
    outer_done: Mutex<bool>,
    gate: ReentrantMutex<()>,
}
