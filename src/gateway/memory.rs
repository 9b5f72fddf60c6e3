//! In-memory gateway for testing without hardware

use parking_lot::Mutex;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, trace};

use super::{DestinationEndpoint, MidiGateway, SourceEndpoint};
use crate::error::MidiError;
use crate::midi::Command;
use crate::stream::{LatestValue, Observable, Observer, Subscription};

#[derive(Default)]
struct VirtualState {
    listeners: HashMap<SourceEndpoint, Vec<(u64, Observer<Command>)>>,
    next_listener: u64,
    failing_sources: HashSet<SourceEndpoint>,
    failing_destinations: HashSet<DestinationEndpoint>,
    sent: Vec<(DestinationEndpoint, Command)>,
    opened: usize,
    closed: usize,
}

/// Gateway whose devices exist only in memory
///
/// Clones share the same devices, so a test can keep one handle for driving
/// the gateway while the pipeline owns another.
#[derive(Clone)]
pub struct VirtualGateway {
    sources: LatestValue<BTreeSet<SourceEndpoint>>,
    destinations: LatestValue<BTreeSet<DestinationEndpoint>>,
    state: Arc<Mutex<VirtualState>>,
}

impl VirtualGateway {
    pub fn new() -> Self {
        Self {
            sources: LatestValue::with_value(BTreeSet::new()),
            destinations: LatestValue::with_value(BTreeSet::new()),
            state: Arc::new(Mutex::new(VirtualState::default())),
        }
    }

    pub fn add_source(&self, name: &str) {
        let mut sources = self.sources.get().unwrap_or_default();
        if sources.insert(SourceEndpoint::new(name)) {
            debug!("Virtual source added: {}", name);
            self.sources.set(sources);
        }
    }

    pub fn remove_source(&self, name: &str) {
        let mut sources = self.sources.get().unwrap_or_default();
        if sources.remove(&SourceEndpoint::new(name)) {
            debug!("Virtual source removed: {}", name);
            self.sources.set(sources);
        }
    }

    pub fn add_destination(&self, name: &str) {
        let mut destinations = self.destinations.get().unwrap_or_default();
        if destinations.insert(DestinationEndpoint::new(name)) {
            debug!("Virtual destination added: {}", name);
            self.destinations.set(destinations);
        }
    }

    pub fn remove_destination(&self, name: &str) {
        let mut destinations = self.destinations.get().unwrap_or_default();
        if destinations.remove(&DestinationEndpoint::new(name)) {
            debug!("Virtual destination removed: {}", name);
            self.destinations.set(destinations);
        }
    }

    /// Deliver a command to every open connection of `source`
    pub fn inject(&self, source: &str, command: Command) {
        let listeners: Vec<Observer<Command>> = {
            let state = self.state.lock();
            state
                .listeners
                .get(&SourceEndpoint::new(source))
                .map(|list| list.iter().map(|(_, o)| o.clone()).collect())
                .unwrap_or_default()
        };
        trace!("Virtual RX <- {}: {}", source, command);
        for listener in listeners {
            listener.next(command.clone());
        }
    }

    /// Make future connections to `source` fail
    pub fn fail_connections_to(&self, source: &str) {
        self.state
            .lock()
            .failing_sources
            .insert(SourceEndpoint::new(source));
    }

    /// Make future sends to `destination` fail
    pub fn fail_sends_to(&self, destination: &str) {
        self.state
            .lock()
            .failing_destinations
            .insert(DestinationEndpoint::new(destination));
    }

    /// Every command submitted so far, in order
    pub fn sent(&self) -> Vec<(DestinationEndpoint, Command)> {
        self.state.lock().sent.clone()
    }

    pub fn sent_to(&self, destination: &str) -> Vec<Command> {
        self.state
            .lock()
            .sent
            .iter()
            .filter(|(d, _)| d.name() == destination)
            .map(|(_, c)| c.clone())
            .collect()
    }

    pub fn open_connections(&self) -> usize {
        let state = self.state.lock();
        state.opened - state.closed
    }

    pub fn connections_opened(&self) -> usize {
        self.state.lock().opened
    }

    pub fn connections_closed(&self) -> usize {
        self.state.lock().closed
    }
}

impl Default for VirtualGateway {
    fn default() -> Self {
        Self::new()
    }
}

impl MidiGateway for VirtualGateway {
    fn available_sources(&self) -> Observable<BTreeSet<SourceEndpoint>> {
        self.sources.observable()
    }

    fn available_destinations(&self) -> Observable<BTreeSet<DestinationEndpoint>> {
        self.destinations.observable()
    }

    fn commands_for_source(&self, endpoint: &SourceEndpoint) -> Observable<Command> {
        let endpoint = endpoint.clone();
        let sources = self.sources.clone();
        let state = self.state.clone();
        Observable::create(move |observer: Observer<Command>| {
            let known = sources.get().is_some_and(|set| set.contains(&endpoint));
            let id = {
                let mut state = state.lock();
                if !known || state.failing_sources.contains(&endpoint) {
                    None
                } else {
                    let id = state.next_listener;
                    state.next_listener += 1;
                    state.opened += 1;
                    state
                        .listeners
                        .entry(endpoint.clone())
                        .or_default()
                        .push((id, observer.clone()));
                    Some(id)
                }
            };

            let Some(id) = id else {
                let reason = if known { "connection refused" } else { "no such source" };
                observer.error(MidiError::connection(endpoint.name(), reason));
                return Subscription::empty();
            };

            debug!("Virtual source opened: {}", endpoint);
            let state = state.clone();
            let endpoint = endpoint.clone();
            Subscription::new(move || {
                let mut state = state.lock();
                if let Some(list) = state.listeners.get_mut(&endpoint) {
                    list.retain(|(other, _)| *other != id);
                }
                state.closed += 1;
                debug!("Virtual source closed: {}", endpoint);
            })
        })
    }

    fn send(&self, commands: Vec<Command>, destination: &DestinationEndpoint) -> Observable<()> {
        let destination = destination.clone();
        let destinations = self.destinations.clone();
        let state = self.state.clone();
        Observable::create(move |observer: Observer<()>| {
            let known = destinations.get().is_some_and(|set| set.contains(&destination));
            let outcome = {
                let mut state = state.lock();
                if !known {
                    Err(MidiError::send(destination.name(), "no such destination"))
                } else if state.failing_destinations.contains(&destination) {
                    Err(MidiError::send(destination.name(), "device rejected data"))
                } else {
                    for command in &commands {
                        trace!("Virtual TX -> {}: {}", destination, command);
                        state.sent.push((destination.clone(), command.clone()));
                    }
                    Ok(())
                }
            };
            match outcome {
                Ok(()) => observer.completed(),
                Err(error) => observer.error(error),
            }
            Subscription::empty()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::midi::Channel;
    use crate::stream::testing::Recorder;

    fn cmd(note: u8) -> Command {
        Command::note_on(Channel::ALL, note, 64, 0)
    }

    #[test]
    fn test_subscription_opens_and_closes_connection() {
        let gateway = VirtualGateway::new();
        gateway.add_source("keys");

        let recorder = Recorder::attach(&gateway.commands_for_source(&SourceEndpoint::new("keys")));
        assert_eq!(gateway.open_connections(), 1);

        gateway.inject("keys", cmd(60));
        recorder.subscription.unsubscribe();
        recorder.subscription.unsubscribe();
        gateway.inject("keys", cmd(61));

        assert_eq!(recorder.values(), vec![cmd(60)]);
        assert_eq!(gateway.connections_opened(), 1);
        assert_eq!(gateway.connections_closed(), 1);
    }

    #[test]
    fn test_each_subscription_has_its_own_connection() {
        let gateway = VirtualGateway::new();
        gateway.add_source("keys");
        let stream = gateway.commands_for_source(&SourceEndpoint::new("keys"));

        let first = Recorder::attach(&stream);
        let second = Recorder::attach(&stream);
        gateway.inject("keys", cmd(1));
        first.subscription.unsubscribe();
        gateway.inject("keys", cmd(2));

        assert_eq!(first.values(), vec![cmd(1)]);
        assert_eq!(second.values(), vec![cmd(1), cmd(2)]);
        assert_eq!(gateway.open_connections(), 1);
    }

    #[test]
    fn test_unknown_source_fails_to_connect() {
        let gateway = VirtualGateway::new();
        let ghost = SourceEndpoint::new("ghost");
        let recorder = Recorder::attach(&gateway.commands_for_source(&ghost));

        assert_eq!(
            recorder.error(),
            Some(MidiError::connection("ghost", "no such source"))
        );
        assert_eq!(gateway.open_connections(), 0);
    }

    #[test]
    fn test_send_completes_and_records() {
        let gateway = VirtualGateway::new();
        gateway.add_destination("synth");

        let recorder = Recorder::attach(
            &gateway.send(vec![cmd(1), cmd(2)], &DestinationEndpoint::new("synth")),
        );

        assert!(recorder.is_completed());
        assert_eq!(gateway.sent_to("synth"), vec![cmd(1), cmd(2)]);
    }

    #[test]
    fn test_send_failure_is_an_error_without_completion() {
        let gateway = VirtualGateway::new();
        gateway.add_destination("synth");
        gateway.fail_sends_to("synth");

        let synth = DestinationEndpoint::new("synth");
        let recorder = Recorder::attach(&gateway.send(vec![cmd(1)], &synth));

        assert!(matches!(recorder.error(), Some(MidiError::Send { .. })));
        assert!(!recorder.is_completed());
        assert!(gateway.sent().is_empty());
    }

    #[test]
    fn test_send_is_lazy() {
        let gateway = VirtualGateway::new();
        gateway.add_destination("synth");

        let pending = gateway.send(vec![cmd(1)], &DestinationEndpoint::new("synth"));
        assert!(gateway.sent().is_empty());

        pending.subscribe_next(|_| {});
        assert_eq!(gateway.sent().len(), 1);
    }

    #[test]
    fn test_endpoint_sets_replay_to_new_subscribers() {
        let gateway = VirtualGateway::new();
        gateway.add_destination("a");
        gateway.add_destination("b");
        gateway.add_destination("a");

        let recorder = Recorder::attach(&gateway.available_destinations());
        gateway.remove_destination("a");

        let names: Vec<Vec<String>> = recorder
            .values()
            .into_iter()
            .map(|set| set.iter().map(|d| d.name().to_string()).collect())
            .collect();
        assert_eq!(names, vec![vec!["a".to_string(), "b".to_string()], vec!["b".to_string()]]);
    }
}
