//! Hot subjects: multicast without replay, and the single-slot latest value

use parking_lot::{Mutex, ReentrantMutex};
use std::sync::Arc;

use super::{Event, Observable, Observer, Subscription};
use crate::error::MidiError;

#[derive(Clone)]
enum Terminal {
    Error(MidiError),
    Completed,
}

struct SubjectState<T> {
    observers: Vec<(u64, Observer<T>)>,
    next_id: u64,
    latest: Option<T>,
    terminal: Option<Terminal>,
}

/// Shared core of both subject flavours
///
/// `gate` is held for the whole of an emission and of a subscriber's replay,
/// so every observer sees pushes in the order they were made and a replayed
/// value always arrives before any later push.
struct Subject<T> {
    state: Arc<Mutex<SubjectState<T>>>,
    gate: Arc<ReentrantMutex<()>>,
    replay_latest: bool,
}

impl<T> Clone for Subject<T> {
    fn clone(&self) -> Self {
        Self {
            state: self.state.clone(),
            gate: self.gate.clone(),
            replay_latest: self.replay_latest,
        }
    }
}

impl<T: Clone + Send + Sync + 'static> Subject<T> {
    fn new(replay_latest: bool) -> Self {
        Self {
            state: Arc::new(Mutex::new(SubjectState {
                observers: Vec::new(),
                next_id: 0,
                latest: None,
                terminal: None,
            })),
            gate: Arc::new(ReentrantMutex::new(())),
            replay_latest,
        }
    }

    fn emit(&self, event: Event<T>) {
        let _gate = self.gate.lock();
        let observers: Vec<Observer<T>> = {
            let mut state = self.state.lock();
            if state.terminal.is_some() {
                return;
            }
            match &event {
                Event::Next(value) => {
                    if self.replay_latest {
                        state.latest = Some(value.clone());
                    }
                }
                Event::Error(error) => state.terminal = Some(Terminal::Error(error.clone())),
                Event::Completed => state.terminal = Some(Terminal::Completed),
            }
            let observers = state.observers.iter().map(|(_, o)| o.clone()).collect();
            if event.is_terminal() {
                state.observers.clear();
            }
            observers
        };

        for observer in observers {
            observer.on(event.clone());
        }
    }

    fn observable(&self) -> Observable<T> {
        let subject = self.clone();
        Observable::create(move |observer| {
            let _gate = subject.gate.lock();
            let (id, replay, terminal) = {
                let mut state = subject.state.lock();
                let replay = state.latest.clone();
                if let Some(terminal) = state.terminal.clone() {
                    (None, replay, Some(terminal))
                } else {
                    let id = state.next_id;
                    state.next_id += 1;
                    state.observers.push((id, observer.clone()));
                    (Some(id), replay, None)
                }
            };

            if let Some(value) = replay {
                observer.next(value);
            }
            match terminal {
                Some(Terminal::Error(error)) => observer.error(error),
                Some(Terminal::Completed) => observer.completed(),
                None => {}
            }

            match id {
                Some(id) => {
                    let state = subject.state.clone();
                    Subscription::new(move || {
                        state.lock().observers.retain(|(other, _)| *other != id);
                    })
                }
                None => Subscription::empty(),
            }
        })
    }

    fn observer_count(&self) -> usize {
        self.state.lock().observers.len()
    }
}

/// Hot multicast stream without replay
///
/// Subscribers only see values pushed after they subscribed.
#[derive(Clone)]
pub struct PublishSubject<T> {
    subject: Subject<T>,
}

impl<T: Clone + Send + Sync + 'static> PublishSubject<T> {
    pub fn new() -> Self {
        Self {
            subject: Subject::new(false),
        }
    }

    pub fn next(&self, value: T) {
        self.subject.emit(Event::Next(value));
    }

    pub fn error(&self, error: MidiError) {
        self.subject.emit(Event::Error(error));
    }

    pub fn completed(&self) {
        self.subject.emit(Event::Completed);
    }

    pub fn observable(&self) -> Observable<T> {
        self.subject.observable()
    }

    pub fn observer_count(&self) -> usize {
        self.subject.observer_count()
    }
}

impl<T: Clone + Send + Sync + 'static> Default for PublishSubject<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Hot stream with a replay buffer of one
///
/// Holds at most one value. New subscribers immediately receive the latest
/// value if one was ever pushed. Used for parameters that are reconfigured
/// while a pipeline is running, such as routing channels.
#[derive(Clone)]
pub struct LatestValue<T> {
    subject: Subject<T>,
}

impl<T: Clone + Send + Sync + 'static> LatestValue<T> {
    pub fn new() -> Self {
        Self {
            subject: Subject::new(true),
        }
    }

    pub fn with_value(value: T) -> Self {
        let latest = Self::new();
        latest.set(value);
        latest
    }

    pub fn set(&self, value: T) {
        self.subject.emit(Event::Next(value));
    }

    pub fn get(&self) -> Option<T> {
        self.subject.state.lock().latest.clone()
    }

    pub fn completed(&self) {
        self.subject.emit(Event::Completed);
    }

    pub fn observable(&self) -> Observable<T> {
        self.subject.observable()
    }

    pub fn observer_count(&self) -> usize {
        self.subject.observer_count()
    }
}

impl<T: Clone + Send + Sync + 'static> Default for LatestValue<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::testing::Recorder;

    #[test]
    fn test_publish_subject_has_no_replay() {
        let subject = PublishSubject::new();
        subject.next(1);

        let recorder = Recorder::attach(&subject.observable());
        subject.next(2);
        subject.next(3);

        assert_eq!(recorder.values(), vec![2, 3]);
    }

    #[test]
    fn test_latest_value_replays_one() {
        let latest = LatestValue::new();
        latest.set(1);
        latest.set(2);

        let recorder = Recorder::attach(&latest.observable());
        assert_eq!(recorder.values(), vec![2]);

        latest.set(3);
        assert_eq!(recorder.values(), vec![2, 3]);
        assert_eq!(latest.get(), Some(3));
    }

    #[test]
    fn test_latest_value_empty_until_set() {
        let latest: LatestValue<u8> = LatestValue::new();
        let recorder = Recorder::attach(&latest.observable());

        assert!(recorder.events().is_empty());
        assert_eq!(latest.get(), None);
    }

    #[test]
    fn test_unsubscribe_detaches_observer() {
        let subject = PublishSubject::new();
        let recorder = Recorder::attach(&subject.observable());
        assert_eq!(subject.observer_count(), 1);

        recorder.subscription.unsubscribe();
        subject.next(1);

        assert_eq!(subject.observer_count(), 0);
        assert!(recorder.values().is_empty());
    }

    #[test]
    fn test_late_subscriber_sees_terminal() {
        let subject: PublishSubject<u8> = PublishSubject::new();
        subject.error(MidiError::Transport("gone".into()));

        let recorder = Recorder::attach(&subject.observable());
        assert_eq!(recorder.error(), Some(MidiError::Transport("gone".into())));
    }

    #[test]
    fn test_replay_never_overtakes_concurrent_pushes() {
        let latest = LatestValue::with_value(0u32);
        let setter = {
            let latest = latest.clone();
            std::thread::spawn(move || {
                for value in 1..=20_000 {
                    latest.set(value);
                }
            })
        };

        while !setter.is_finished() {
            let recorder = Recorder::attach(&latest.observable());
            let values = recorder.values();
            recorder.subscription.unsubscribe();
            assert!(
                values.windows(2).all(|pair| pair[0] < pair[1]),
                "out of order: {:?}",
                values
            );
        }
        setter.join().unwrap();
    }

    #[test]
    fn test_concurrent_pushes_reach_every_observer_in_order() {
        let latest = LatestValue::with_value(0u32);
        let first = Recorder::attach(&latest.observable());
        let second = Recorder::attach(&latest.observable());

        let setters: Vec<_> = (0..4)
            .map(|_| {
                let latest = latest.clone();
                std::thread::spawn(move || {
                    for _ in 0..1_000 {
                        let next = latest.get().unwrap_or_default() + 1;
                        latest.set(next);
                    }
                })
            })
            .collect();
        for setter in setters {
            setter.join().unwrap();
        }

        assert_eq!(first.values(), second.values());
        assert_eq!(first.values().len(), 4_001);
    }
}
