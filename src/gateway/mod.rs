//! Device endpoint gateway
//!
//! Wraps the platform's MIDI ports as streams. Connections are tied to
//! subscriptions: subscribing to [`MidiGateway::commands_for_source`] opens the
//! port, disposing the subscription closes it.
//!
//! Two implementations ship with the crate: [`MidirGateway`] for real
//! hardware and [`VirtualGateway`] for testing without hardware.

mod memory;
mod ports;

pub use memory::VirtualGateway;
pub use ports::MidirGateway;

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::midi::Command;
use crate::stream::{merge, Observable};

macro_rules! endpoint {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
        pub struct $name(String);

        impl $name {
            pub fn new(name: impl Into<String>) -> Self {
                Self(name.into())
            }

            pub fn name(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }
    };
}

endpoint!(
    /// Port that produces MIDI data
    SourceEndpoint
);
endpoint!(
    /// Port that accepts MIDI data
    DestinationEndpoint
);

/// Access to the MIDI endpoints of a platform
pub trait MidiGateway: Send + Sync {
    /// Current set of sources; replays the latest set to new subscribers and
    /// emits again whenever a device appears or disappears
    fn available_sources(&self) -> Observable<BTreeSet<SourceEndpoint>>;

    fn available_destinations(&self) -> Observable<BTreeSet<DestinationEndpoint>>;

    /// Commands arriving on one source
    ///
    /// Fails with `MidiError::Connection` if the port cannot be opened. Each
    /// subscription holds its own connection.
    fn commands_for_source(&self, endpoint: &SourceEndpoint) -> Observable<Command>;

    /// Submit commands to a destination
    ///
    /// Completes once the data is handed to the platform, or fails with
    /// `MidiError::Send`.
    fn send(&self, commands: Vec<Command>, destination: &DestinationEndpoint) -> Observable<()>;
}

/// Merged commands of several sources
///
/// An error from any source terminates the merged stream.
pub fn commands_for_sources(
    gateway: &Arc<dyn MidiGateway>,
    endpoints: impl IntoIterator<Item = SourceEndpoint>,
) -> Observable<Command> {
    merge(
        endpoints
            .into_iter()
            .map(|endpoint| gateway.commands_for_source(&endpoint))
            .collect(),
    )
}

/// Merged commands of every source currently available
///
/// Reconnects to the whole source set each time it changes. A source that
/// fails to connect is logged and skipped; the others keep delivering.
pub fn commands_for_all_available_sources(gateway: Arc<dyn MidiGateway>) -> Observable<Command> {
    commands_for_matching_sources(gateway, &EndpointPatterns::default())
}

/// Like [`commands_for_all_available_sources`], limited to sources whose name
/// matches `patterns`
pub fn commands_for_matching_sources(
    gateway: Arc<dyn MidiGateway>,
    patterns: &EndpointPatterns,
) -> Observable<Command> {
    patterns
        .select_sources(&gateway.available_sources())
        .map(move |sources| {
            debug!("Listening to {} source(s)", sources.len());
            merge(
                sources
                    .into_iter()
                    .map(|endpoint| {
                        let name = endpoint.name().to_string();
                        gateway.commands_for_source(&endpoint).catch_error(move |e| {
                            warn!("Skipping source '{}': {}", name, e);
                            Observable::empty()
                        })
                    })
                    .collect(),
            )
        })
        .switch_latest()
}

/// Selects endpoints by name
///
/// A pattern matches any port whose name contains it, ignoring case, so
/// "x-touch" picks "X-Touch MIDI 1" as well as "2- X-TOUCH". No patterns
/// selects everything.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EndpointPatterns(Vec<String>);

impl EndpointPatterns {
    pub fn new(patterns: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self(patterns.into_iter().map(Into::into).collect())
    }

    pub fn matches(&self, name: &str) -> bool {
        if self.0.is_empty() {
            return true;
        }
        let name = name.to_lowercase();
        self.0
            .iter()
            .any(|pattern| name.contains(&pattern.to_lowercase()))
    }

    pub fn select_sources(
        &self,
        sources: &Observable<BTreeSet<SourceEndpoint>>,
    ) -> Observable<BTreeSet<SourceEndpoint>> {
        let patterns = self.clone();
        sources
            .map(move |set| set.into_iter().filter(|e| patterns.matches(e.name())).collect())
            .distinct_until_changed()
    }

    pub fn select_destinations(
        &self,
        destinations: &Observable<BTreeSet<DestinationEndpoint>>,
    ) -> Observable<BTreeSet<DestinationEndpoint>> {
        let patterns = self.clone();
        destinations
            .map(move |set| set.into_iter().filter(|e| patterns.matches(e.name())).collect())
            .distinct_until_changed()
    }
}
