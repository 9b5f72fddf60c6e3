//! Error type shared by streams, gateways and filters
//!
//! Errors travel through observables and may reach several subscribers, so
//! every variant is cheap to clone and carries plain strings.

/// Result type for rx-midi operations
pub type Result<T> = std::result::Result<T, MidiError>;

/// Errors that can occur while routing MIDI commands
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MidiError {
    /// A source endpoint could not be opened
    #[error("Failed to connect to MIDI source '{endpoint}': {reason}")]
    Connection { endpoint: String, reason: String },

    /// Commands could not be transmitted to a destination
    #[error("Failed to send commands to MIDI destination '{endpoint}': {reason}")]
    Send { endpoint: String, reason: String },

    /// Channel number outside 0-16
    #[error("Invalid MIDI channel: {0} (expected 0-16)")]
    InvalidChannel(u8),

    /// The underlying MIDI transport could not be initialised or queried
    #[error("MIDI transport error: {0}")]
    Transport(String),
}

impl MidiError {
    pub fn connection(endpoint: impl Into<String>, reason: impl ToString) -> Self {
        MidiError::Connection {
            endpoint: endpoint.into(),
            reason: reason.to_string(),
        }
    }

    pub fn send(endpoint: impl Into<String>, reason: impl ToString) -> Self {
        MidiError::Send {
            endpoint: endpoint.into(),
            reason: reason.to_string(),
        }
    }
}
