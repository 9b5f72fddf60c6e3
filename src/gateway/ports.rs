//! Hardware gateway over the platform MIDI API

use midir::{MidiInput, MidiInputConnection, MidiOutput, MidiOutputConnection};
use parking_lot::Mutex;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, trace, warn};

use super::{DestinationEndpoint, MidiGateway, SourceEndpoint};
use crate::error::{MidiError, Result};
use crate::midi::Command;
use crate::stream::{LatestValue, Observable, Observer, Subscription};

/// Open input port; closed when dropped
struct InputConnection(MidiInputConnection<()>);

/// Open output port
struct OutputConnection(MidiOutputConnection);

// SAFETY: midir connections are only touched behind a mutex or from the
// teardown that owns them, never from two threads at once.
unsafe impl Send for InputConnection {}
unsafe impl Send for OutputConnection {}

/// Gateway backed by `midir`
///
/// Port sets are refreshed on demand with [`MidirGateway::refresh`] or
/// periodically with [`MidirGateway::spawn_discovery`]. Output connections are
/// opened on first send and reused afterwards.
pub struct MidirGateway {
    client_name: String,
    sources: LatestValue<BTreeSet<SourceEndpoint>>,
    destinations: LatestValue<BTreeSet<DestinationEndpoint>>,
    outputs: Arc<Mutex<HashMap<DestinationEndpoint, OutputConnection>>>,
}

impl MidirGateway {
    pub fn new(client_name: impl Into<String>) -> Result<Self> {
        let gateway = Self {
            client_name: client_name.into(),
            sources: LatestValue::new(),
            destinations: LatestValue::new(),
            outputs: Arc::new(Mutex::new(HashMap::new())),
        };
        gateway.refresh()?;
        Ok(gateway)
    }

    /// Rescan ports, publishing a new set only when it changed
    pub fn refresh(&self) -> Result<()> {
        let scanner = format!("{}-scanner", self.client_name);

        let midi_in = MidiInput::new(&scanner).map_err(|e| MidiError::Transport(e.to_string()))?;
        let sources: BTreeSet<SourceEndpoint> = midi_in
            .ports()
            .iter()
            .filter_map(|port| midi_in.port_name(port).ok())
            .map(SourceEndpoint::new)
            .collect();

        let midi_out = MidiOutput::new(&scanner).map_err(|e| MidiError::Transport(e.to_string()))?;
        let destinations: BTreeSet<DestinationEndpoint> = midi_out
            .ports()
            .iter()
            .filter_map(|port| midi_out.port_name(port).ok())
            .map(DestinationEndpoint::new)
            .collect();

        if self.sources.get().as_ref() != Some(&sources) {
            info!("MIDI sources: {}", join_names(sources.iter().map(|s| s.name())));
            self.sources.set(sources);
        }
        if self.destinations.get().as_ref() != Some(&destinations) {
            info!(
                "MIDI destinations: {}",
                join_names(destinations.iter().map(|d| d.name()))
            );
            self.outputs
                .lock()
                .retain(|endpoint, _| destinations.contains(endpoint));
            self.destinations.set(destinations);
        }
        Ok(())
    }

    /// Poll for device changes on the tokio runtime
    pub fn spawn_discovery(self: &Arc<Self>, interval: Duration) -> tokio::task::JoinHandle<()> {
        let gateway = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                if let Err(e) = gateway.refresh() {
                    warn!("MIDI port scan failed: {}", e);
                }
            }
        })
    }

    pub fn current_sources(&self) -> Vec<SourceEndpoint> {
        self.sources.get().unwrap_or_default().into_iter().collect()
    }

    pub fn current_destinations(&self) -> Vec<DestinationEndpoint> {
        self.destinations.get().unwrap_or_default().into_iter().collect()
    }
}

fn join_names<'a>(names: impl Iterator<Item = &'a str>) -> String {
    let names: Vec<&str> = names.collect();
    if names.is_empty() {
        "(none)".to_string()
    } else {
        names.join(", ")
    }
}

fn open_input(
    client_name: &str,
    endpoint: &SourceEndpoint,
    observer: Observer<Command>,
) -> Result<InputConnection> {
    let midi_in =
        MidiInput::new(client_name).map_err(|e| MidiError::connection(endpoint.name(), e))?;
    let port = midi_in
        .ports()
        .into_iter()
        .find(|port| midi_in.port_name(port).ok().as_deref() == Some(endpoint.name()))
        .ok_or_else(|| MidiError::connection(endpoint.name(), "port not found"))?;

    let name = endpoint.name().to_string();
    let connection = midi_in
        .connect(
            &port,
            &format!("{}-in", client_name),
            move |timestamp, data, _| {
                trace!("RX <- {}: {:02X?}", name, data);
                if let Some(command) = Command::parse(data, timestamp) {
                    observer.next(command);
                }
            },
            (),
        )
        .map_err(|e| MidiError::connection(endpoint.name(), e))?;

    Ok(InputConnection(connection))
}

fn open_output(client_name: &str, endpoint: &DestinationEndpoint) -> Result<OutputConnection> {
    let midi_out = MidiOutput::new(client_name).map_err(|e| MidiError::send(endpoint.name(), e))?;
    let port = midi_out
        .ports()
        .into_iter()
        .find(|port| midi_out.port_name(port).ok().as_deref() == Some(endpoint.name()))
        .ok_or_else(|| MidiError::send(endpoint.name(), "port not found"))?;

    let connection = midi_out
        .connect(&port, &format!("{}-out", client_name))
        .map_err(|e| MidiError::send(endpoint.name(), e))?;

    debug!("MIDI output opened: {}", endpoint);
    Ok(OutputConnection(connection))
}

fn transmit(
    client_name: &str,
    outputs: &Mutex<HashMap<DestinationEndpoint, OutputConnection>>,
    destination: &DestinationEndpoint,
    commands: &[Command],
) -> Result<()> {
    let mut outputs = outputs.lock();
    if !outputs.contains_key(destination) {
        let connection = open_output(client_name, destination)?;
        outputs.insert(destination.clone(), connection);
    }
    let Some(connection) = outputs.get_mut(destination) else {
        return Err(MidiError::send(destination.name(), "not connected"));
    };

    for command in commands {
        let bytes = command.encode();
        trace!("TX -> {}: {:02X?}", destination, bytes);
        if let Err(e) = connection.0.send(&bytes) {
            // Drop the broken connection so the next send reopens it
            outputs.remove(destination);
            return Err(MidiError::send(destination.name(), e));
        }
    }
    Ok(())
}

impl MidiGateway for MidirGateway {
    fn available_sources(&self) -> Observable<BTreeSet<SourceEndpoint>> {
        self.sources.observable()
    }

    fn available_destinations(&self) -> Observable<BTreeSet<DestinationEndpoint>> {
        self.destinations.observable()
    }

    fn commands_for_source(&self, endpoint: &SourceEndpoint) -> Observable<Command> {
        let client_name = self.client_name.clone();
        let endpoint = endpoint.clone();
        Observable::create(move |observer: Observer<Command>| {
            match open_input(&client_name, &endpoint, observer.clone()) {
                Ok(connection) => {
                    debug!("MIDI input opened: {}", endpoint);
                    let endpoint = endpoint.clone();
                    Subscription::new(move || {
                        connection.0.close();
                        debug!("MIDI input closed: {}", endpoint);
                    })
                }
                Err(e) => {
                    observer.error(e);
                    Subscription::empty()
                }
            }
        })
    }

    fn send(&self, commands: Vec<Command>, destination: &DestinationEndpoint) -> Observable<()> {
        let client_name = self.client_name.clone();
        let outputs = self.outputs.clone();
        let destination = destination.clone();
        Observable::create(move |observer: Observer<()>| {
            match transmit(&client_name, &outputs, &destination, &commands) {
                Ok(()) => observer.completed(),
                Err(e) => observer.error(e),
            }
            Subscription::empty()
        })
    }
}
