//! Operators that combine the latest values of several streams

use parking_lot::{Mutex, ReentrantMutex};
use std::sync::Arc;

use super::{Event, Observable, Observer, Subscription};

struct CombineSlots<T> {
    latest: Vec<Option<T>>,
    completed: Vec<bool>,
}

impl<T: Clone> CombineSlots<T> {
    fn new(len: usize) -> Self {
        Self {
            latest: vec![None; len],
            completed: vec![false; len],
        }
    }

    fn snapshot(&self) -> Option<Vec<T>> {
        self.latest.iter().cloned().collect()
    }
}

/// Combine N streams of the same type
///
/// Emits once every source has emitted at least once, then again on every
/// emission from any source, using the most recent value of each other source.
/// Completes when all sources have completed, or as soon as a source completes
/// without ever emitting. Any error terminates the combined stream.
///
/// Updates arriving from different threads are delivered one at a time, each
/// with the snapshot it produced, so downstream sees one ordered timeline.
pub fn combine_latest_all<T>(sources: Vec<Observable<T>>) -> Observable<Vec<T>>
where
    T: Clone + Send + 'static,
{
    Observable::create(move |observer: Observer<Vec<T>>| {
        if sources.is_empty() {
            observer.completed();
            return Subscription::empty();
        }

        let slots = Arc::new(Mutex::new(CombineSlots::new(sources.len())));
        let gate = Arc::new(ReentrantMutex::new(()));
        let composite = Subscription::empty();

        for (index, source) in sources.iter().enumerate() {
            let sink = observer.clone();
            let slots = slots.clone();
            let gate = gate.clone();
            composite.add(source.subscribe(Observer::new(move |event: Event<T>| {
                let _gate = gate.lock();
                match event {
                    Event::Next(value) => {
                        let combined = {
                            let mut slots = slots.lock();
                            slots.latest[index] = Some(value);
                            slots.snapshot()
                        };
                        if let Some(values) = combined {
                            sink.next(values);
                        }
                    }
                    Event::Error(error) => sink.error(error),
                    Event::Completed => {
                        let finished = {
                            let mut slots = slots.lock();
                            slots.completed[index] = true;
                            let all_done = slots.completed.iter().all(|done| *done);
                            slots.latest[index].is_none() || all_done
                        };
                        if finished {
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

#[derive(Clone)]
enum Either<A, B> {
    Left(A),
    Right(B),
}

/// Combine two streams into a stream of pairs
///
/// Same emission rules as [`combine_latest_all`].
pub fn combine_latest<A, B>(a: &Observable<A>, b: &Observable<B>) -> Observable<(A, B)>
where
    A: Clone + Send + 'static,
    B: Clone + Send + 'static,
{
    let left = a.map(Either::Left);
    let right = b.map(Either::Right);
    combine_latest_all(vec![left, right]).filter_map(|values| {
        let mut values = values.into_iter();
        match (values.next()?, values.next()?) {
            (Either::Left(a), Either::Right(b)) => Some((a, b)),
            _ => None,
        }
    })
}

/// Combine three streams into a stream of triples
pub fn combine_latest3<A, B, C>(
    a: &Observable<A>,
    b: &Observable<B>,
    c: &Observable<C>,
) -> Observable<(A, B, C)>
where
    A: Clone + Send + 'static,
    B: Clone + Send + 'static,
    C: Clone + Send + 'static,
{
    combine_latest(&combine_latest(a, b), c).map(|((a, b), c)| (a, b, c))
}

impl<T: Send + 'static> Observable<T> {
    /// Pair each value with the latest value of `other`
    ///
    /// Only emissions of `self` produce output; values arriving before `other`
    /// has emitted are dropped. Completion follows `self`.
    pub fn with_latest_from<U>(&self, other: &Observable<U>) -> Observable<(T, U)>
    where
        U: Clone + Send + 'static,
    {
        let source = self.clone();
        let other = other.clone();
        Observable::create(move |observer: Observer<(T, U)>| {
            let latest: Arc<Mutex<Option<U>>> = Arc::new(Mutex::new(None));
            let composite = Subscription::empty();

            let slot = latest.clone();
            let other_sink = observer.clone();
            composite.add(other.subscribe(Observer::new(move |event| match event {
                Event::Next(value) => *slot.lock() = Some(value),
                Event::Error(error) => other_sink.error(error),
                Event::Completed => {}
            })));

            composite.add(source.subscribe(Observer::new(move |event| match event {
                Event::Next(value) => {
                    let current = latest.lock().clone();
                    if let Some(current) = current {
                        observer.next((value, current));
                    }
                }
                Event::Error(error) => observer.error(error),
                Event::Completed => observer.completed(),
            })));
            composite
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::MidiError;
    use crate::stream::testing::Recorder;
    use crate::stream::{LatestValue, PublishSubject};

    #[test]
    fn test_waits_for_every_source() {
        let a = PublishSubject::new();
        let b = PublishSubject::new();
        let recorder = Recorder::attach(&combine_latest(&a.observable(), &b.observable()));

        a.next(1);
        a.next(2);
        assert!(recorder.values().is_empty());

        b.next("x");
        a.next(3);
        b.next("y");

        assert_eq!(recorder.values(), vec![(2, "x"), (3, "x"), (3, "y")]);
    }

    #[test]
    fn test_combine_latest3_uses_latest_of_others() {
        let a = LatestValue::with_value(0u8);
        let b = LatestValue::with_value(1u8);
        let c = PublishSubject::new();
        let recorder = Recorder::attach(&combine_latest3(
            &a.observable(),
            &b.observable(),
            &c.observable(),
        ));

        c.next('p');
        b.set(2);
        c.next('q');

        assert_eq!(recorder.values(), vec![(0, 1, 'p'), (0, 2, 'p'), (0, 2, 'q')]);
    }

    #[test]
    fn test_combine_latest_all_completion() {
        let a = PublishSubject::new();
        let b = PublishSubject::new();
        let recorder = Recorder::attach(&combine_latest_all(vec![a.observable(), b.observable()]));

        a.next(1);
        b.next(2);
        a.completed();
        assert!(!recorder.is_completed());
        b.next(3);
        b.completed();

        assert_eq!(recorder.values(), vec![vec![1, 2], vec![1, 3]]);
        assert!(recorder.is_completed());
    }

    #[test]
    fn test_source_completing_empty_completes_combined() {
        let a: PublishSubject<u8> = PublishSubject::new();
        let b: PublishSubject<u8> = PublishSubject::new();
        let recorder = Recorder::attach(&combine_latest(&a.observable(), &b.observable()));

        a.completed();
        assert!(recorder.is_completed());
        assert_eq!(b.observer_count(), 0);
    }

    #[test]
    fn test_error_terminates() {
        let a = PublishSubject::new();
        let b: PublishSubject<u8> = PublishSubject::new();
        let recorder = Recorder::attach(&combine_latest(&a.observable(), &b.observable()));

        a.next(1);
        b.error(MidiError::Transport("x".into()));
        a.next(2);

        assert!(recorder.values().is_empty());
        assert!(recorder.error().is_some());
    }

    #[test]
    fn test_with_latest_from_only_emits_on_source() {
        let source = PublishSubject::new();
        let other = LatestValue::new();
        let recorder = Recorder::attach(&source.observable().with_latest_from(&other.observable()));

        source.next(1);
        other.set('a');
        other.set('b');
        source.next(2);

        assert_eq!(recorder.values(), vec![(2, 'b')]);
    }

    #[test]
    fn test_updates_from_two_threads_form_one_timeline() {
        let a = LatestValue::with_value(0u32);
        let b = LatestValue::with_value(0u32);
        let recorder = Recorder::attach(&combine_latest(&a.observable(), &b.observable()));

        let writers: Vec<_> = [a.clone(), b.clone()]
            .into_iter()
            .map(|latest| {
                std::thread::spawn(move || {
                    for value in 1..=5_000 {
                        latest.set(value);
                    }
                })
            })
            .collect();
        for writer in writers {
            writer.join().unwrap();
        }

        let values = recorder.values();
        assert_eq!(values.len(), 10_001);
        assert_eq!(values.last(), Some(&(5_000, 5_000)));
        assert!(values
            .windows(2)
            .all(|pair| pair[0].0 <= pair[1].0 && pair[0].1 <= pair[1].1));
    }
}
