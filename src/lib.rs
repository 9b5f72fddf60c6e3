//! rx-midi - reactive MIDI routing
//!
//! MIDI traffic as push-based streams, filters that compose left to right,
//! and a monophonic voice mapper that splits one polyphonic channel across
//! several destination channels.

pub mod config;
pub mod error;
pub mod filter;
pub mod gateway;
pub mod midi;
pub mod monitor;
pub mod routing;
pub mod stream;
pub mod voice;

pub use error::{MidiError, Result};
pub use filter::{compose_filters, CommandStream, Filter};
pub use gateway::{DestinationEndpoint, MidiGateway, SourceEndpoint};
pub use midi::{Channel, Command};
pub use routing::{Delivery, VoiceRouter};
pub use stream::{LatestValue, Observable, PublishSubject, Subscription};
pub use voice::{monophonic_voice_map, VoiceMapper};
