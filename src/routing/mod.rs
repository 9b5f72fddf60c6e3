//! Routing pipeline: sources, voice split, fan-out to destinations
//!
//! The [`VoiceRouter`] owns the live routing channels and assembles
//!
//! ```text
//! matching sources -> merge -> voice 1 >> voice 2 >> ... -> every destination
//! ```
//!
//! Channel changes reach the running pipeline without resubscribing. Changing
//! the number of voices rebuilds the voice chain.

use anyhow::Result;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::config::{MidiConfig, RoutingConfig};
use crate::error::MidiError;
use crate::filter::{compose_filters, CommandStream, Filter};
use crate::gateway::{
    commands_for_matching_sources, DestinationEndpoint, EndpointPatterns, MidiGateway,
};
use crate::midi::{Channel, Command};
use crate::stream::{combine_latest, Event, LatestValue, Observable, Observer, Subscription};
use crate::voice::monophonic_voice_map;

/// Split one channel into monophonic voices
///
/// Voices are tried in declared order: the first free voice takes a new note.
pub fn polyphonic_split(source: Observable<Channel>, voices: &[Observable<Channel>]) -> Filter {
    compose_filters(
        voices
            .iter()
            .map(|voice| monophonic_voice_map(source.clone(), voice.clone())),
    )
}

/// Result of sending one command to one destination
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub destination: DestinationEndpoint,
    pub command: Command,
    pub outcome: Result<(), MidiError>,
}

impl Delivery {
    pub fn is_ok(&self) -> bool {
        self.outcome.is_ok()
    }
}

/// Send every command to every destination
///
/// Pairs the latest command with the latest destination set, so a change of
/// destinations sends the most recent command to the new set as well. One
/// [`Delivery`] is emitted per send; failed sends are logged and never end
/// the stream.
pub fn fan_out(
    gateway: Arc<dyn MidiGateway>,
    commands: CommandStream,
    destinations: Observable<BTreeSet<DestinationEndpoint>>,
) -> Observable<Delivery> {
    let pairs = combine_latest(&commands, &destinations);
    Observable::create(move |observer: Observer<Delivery>| {
        let gateway = gateway.clone();
        let pending = Subscription::empty();
        let composite = Subscription::empty();
        composite.add(pending.clone());

        let on_pair = move |event: Event<(Command, BTreeSet<DestinationEndpoint>)>| match event {
            Event::Next((command, destinations)) => {
                for destination in destinations {
                    let sent = observer.clone();
                    let failed = observer.clone();
                    let ok_destination = destination.clone();
                    let err_destination = destination.clone();
                    let (ok_command, err_command) = (command.clone(), command.clone());

                    let send = gateway.send(vec![command.clone()], &destination).subscribe_with(
                        |_| {},
                        move |error| {
                            warn!("Send to '{}' failed: {}", err_destination, error);
                            failed.next(Delivery {
                                destination: err_destination.clone(),
                                command: err_command.clone(),
                                outcome: Err(error),
                            });
                        },
                        move || {
                            sent.next(Delivery {
                                destination: ok_destination.clone(),
                                command: ok_command.clone(),
                                outcome: Ok(()),
                            });
                        },
                    );
                    if !send.is_closed() {
                        pending.add(send);
                    }
                }
            }
            Event::Error(error) => observer.error(error),
            Event::Completed => observer.completed(),
        };
        composite.add(pairs.subscribe(Observer::new(on_pair)));
        composite
    })
}

/// Live voice routing over a gateway
pub struct VoiceRouter {
    gateway: Arc<dyn MidiGateway>,
    source_channel: LatestValue<Channel>,
    voices: LatestValue<Vec<Channel>>,
    sources: EndpointPatterns,
    destinations: EndpointPatterns,
}

impl VoiceRouter {
    pub fn new(gateway: Arc<dyn MidiGateway>, routing: &RoutingConfig) -> Self {
        Self {
            gateway,
            source_channel: LatestValue::with_value(routing.source_channel),
            voices: LatestValue::with_value(routing.voices.clone()),
            sources: EndpointPatterns::default(),
            destinations: EndpointPatterns::default(),
        }
    }

    /// Limit which endpoints are used; applies to pipelines subscribed afterwards
    pub fn with_endpoints(mut self, midi: &MidiConfig) -> Self {
        self.sources = midi.sources.clone();
        self.destinations = midi.destinations.clone();
        self
    }

    pub fn source_channel(&self) -> Option<Channel> {
        self.source_channel.get()
    }

    pub fn voice_channels(&self) -> Vec<Channel> {
        self.voices.get().unwrap_or_default()
    }

    pub fn set_source_channel(&self, channel: Channel) {
        info!("Source channel -> {}", channel);
        self.source_channel.set(channel);
    }

    pub fn set_voice_channel(&self, index: usize, channel: Channel) -> Result<()> {
        let mut voices = self.voice_channels();
        let Some(slot) = voices.get_mut(index) else {
            anyhow::bail!("No voice {} (router has {} voices)", index, voices.len());
        };
        *slot = channel;
        info!("Voice {} channel -> {}", index, channel);
        self.voices.set(voices);
        Ok(())
    }

    /// Take over a reloaded routing configuration
    pub fn apply(&self, routing: &RoutingConfig) -> Result<()> {
        routing.validate()?;

        if self.source_channel.get() != Some(routing.source_channel) {
            self.set_source_channel(routing.source_channel);
        }
        if self.voices.get().as_deref() != Some(routing.voices.as_slice()) {
            info!(
                "Voice channels -> [{}]",
                routing
                    .voices
                    .iter()
                    .map(|c| c.to_string())
                    .collect::<Vec<_>>()
                    .join(", ")
            );
            self.voices.set(routing.voices.clone());
        }
        Ok(())
    }

    /// Commands after the voice split, before fan-out
    pub fn processed_commands(&self) -> CommandStream {
        let input = commands_for_matching_sources(self.gateway.clone(), &self.sources);
        let source = self.source_channel.observable();
        let voices = self.voices.observable();
        let layout = voices.map(|channels| channels.len());

        layout
            .distinct_until_changed()
            .map(move |count| {
                debug!("Building voice chain with {} voice(s)", count);
                let lanes: Vec<Observable<Channel>> = (0..count)
                    .map(|index| voices.filter_map(move |channels| channels.get(index).copied()))
                    .collect();
                input.through(&polyphonic_split(source.clone(), &lanes))
            })
            .switch_latest()
    }

    /// Processed commands sent to every matching destination
    pub fn deliveries(&self) -> Observable<Delivery> {
        let destinations = self
            .destinations
            .select_destinations(&self.gateway.available_destinations());
        fan_out(self.gateway.clone(), self.processed_commands(), destinations)
    }
}

#[cfg(test)]
mod tests;
