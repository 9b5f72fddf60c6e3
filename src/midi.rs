//! MIDI command model
//!
//! Channel-voice commands as immutable values, plus parsing from and encoding
//! to raw transport bytes.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::MidiError;

/// MIDI channel number in `0..=16`
///
/// `0` doubles as the "all channels" selector for predicate filters. Parsed
/// commands carry the raw status nibble, so routing compares channels by
/// plain equality.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct Channel(u8);

impl Channel {
    /// Selector matching every channel
    pub const ALL: Channel = Channel(0);
    pub const MAX: u8 = 16;

    pub fn new(number: u8) -> Result<Self, MidiError> {
        if number > Self::MAX {
            return Err(MidiError::InvalidChannel(number));
        }
        Ok(Channel(number))
    }

    pub fn get(self) -> u8 {
        self.0
    }

    pub fn is_all(self) -> bool {
        self == Self::ALL
    }

    /// Channel as it appears in a status byte; 16 and 0 share nibble 0
    pub fn nibble(self) -> u8 {
        self.0 & 0x0F
    }
}

impl TryFrom<u8> for Channel {
    type Error = MidiError;

    fn try_from(number: u8) -> Result<Self, Self::Error> {
        Channel::new(number)
    }
}

impl From<Channel> for u8 {
    fn from(channel: Channel) -> u8 {
        channel.0
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Note On / Note Off payload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NoteEvent {
    pub channel: Channel,
    pub note: u8,
    pub velocity: u8,
    /// Transport timestamp in microseconds
    pub timestamp: u64,
}

/// Control Change payload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ControlEvent {
    pub channel: Channel,
    pub controller: u8,
    pub value: u8,
    pub timestamp: u64,
}

/// Any message the router does not interpret
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RawMessage {
    pub bytes: Vec<u8>,
    pub timestamp: u64,
}

/// A MIDI command flowing through a pipeline
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Command {
    NoteOn(NoteEvent),
    NoteOff(NoteEvent),
    ControlChange(ControlEvent),
    Other(RawMessage),
}

impl NoteEvent {
    pub fn new(channel: Channel, note: u8, velocity: u8, timestamp: u64) -> Self {
        Self {
            channel,
            note: note & 0x7F,
            velocity: velocity & 0x7F,
            timestamp,
        }
    }

    pub fn with_channel(self, channel: Channel) -> Self {
        Self { channel, ..self }
    }
}

impl Command {
    pub fn note_on(channel: Channel, note: u8, velocity: u8, timestamp: u64) -> Self {
        Command::NoteOn(NoteEvent::new(channel, note, velocity, timestamp))
    }

    pub fn note_off(channel: Channel, note: u8, velocity: u8, timestamp: u64) -> Self {
        Command::NoteOff(NoteEvent::new(channel, note, velocity, timestamp))
    }

    pub fn control_change(channel: Channel, controller: u8, value: u8, timestamp: u64) -> Self {
        Command::ControlChange(ControlEvent {
            channel,
            controller: controller & 0x7F,
            value: value & 0x7F,
            timestamp,
        })
    }

    /// Parse a command from raw transport bytes
    ///
    /// Note On with velocity 0 is reported as Note Off. Channel messages other
    /// than notes and control changes, and all system messages, become
    /// [`Command::Other`]. Returns `None` for empty input or running status.
    pub fn parse(data: &[u8], timestamp: u64) -> Option<Self> {
        let status = *data.first()?;
        if status < 0x80 {
            // Running status needs state the transport already resolves for us
            return None;
        }

        if status < 0xF0 {
            let channel = Channel(status & 0x0F);
            match status & 0xF0 {
                0x80 | 0x90 | 0xB0 if data.len() < 3 => return None,
                0x80 => return Some(Command::note_off(channel, data[1], data[2], timestamp)),
                0x90 => {
                    let (note, velocity) = (data[1], data[2] & 0x7F);
                    return Some(if velocity == 0 {
                        Command::note_off(channel, note, 0, timestamp)
                    } else {
                        Command::note_on(channel, note, velocity, timestamp)
                    });
                }
                0xB0 => return Some(Command::control_change(channel, data[1], data[2], timestamp)),
                _ => {}
            }
        }

        Some(Command::Other(RawMessage {
            bytes: data.to_vec(),
            timestamp,
        }))
    }

    /// Encode the command to MIDI bytes
    pub fn encode(&self) -> Vec<u8> {
        match self {
            Command::NoteOff(n) => {
                vec![0x80 | n.channel.nibble(), n.note & 0x7F, n.velocity & 0x7F]
            }
            Command::NoteOn(n) => {
                vec![0x90 | n.channel.nibble(), n.note & 0x7F, n.velocity & 0x7F]
            }
            Command::ControlChange(c) => {
                vec![0xB0 | c.channel.nibble(), c.controller & 0x7F, c.value & 0x7F]
            }
            Command::Other(raw) => raw.bytes.clone(),
        }
    }

    /// Channel of a channel-voice command, `None` for [`Command::Other`]
    pub fn channel(&self) -> Option<Channel> {
        match self {
            Command::NoteOn(n) | Command::NoteOff(n) => Some(n.channel),
            Command::ControlChange(c) => Some(c.channel),
            Command::Other(_) => None,
        }
    }

    pub fn timestamp(&self) -> u64 {
        match self {
            Command::NoteOn(n) | Command::NoteOff(n) => n.timestamp,
            Command::ControlChange(c) => c.timestamp,
            Command::Other(raw) => raw.timestamp,
        }
    }

    pub fn is_channel_voice(&self) -> bool {
        self.channel().is_some()
    }

    /// Copy of this command on another channel
    ///
    /// [`Command::Other`] has no channel and is returned unchanged.
    pub fn with_channel(&self, channel: Channel) -> Self {
        match self {
            Command::NoteOn(n) => Command::NoteOn(n.with_channel(channel)),
            Command::NoteOff(n) => Command::NoteOff(n.with_channel(channel)),
            Command::ControlChange(c) => Command::ControlChange(ControlEvent { channel, ..*c }),
            Command::Other(raw) => Command::Other(raw.clone()),
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::NoteOn(n) => {
                write!(f, "NoteOn ch:{} n:{} v:{}", n.channel, n.note, n.velocity)
            }
            Command::NoteOff(n) => {
                write!(f, "NoteOff ch:{} n:{} v:{}", n.channel, n.note, n.velocity)
            }
            Command::ControlChange(c) => {
                write!(f, "CC ch:{} cc:{} v:{}", c.channel, c.controller, c.value)
            }
            Command::Other(raw) => write!(f, "Other [{}]", format_hex(&raw.bytes)),
        }
    }
}

/// Format MIDI bytes as hex string for debugging
pub fn format_hex(data: &[u8]) -> String {
    data.iter()
        .map(|b| format!("{:02X}", b))
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ch(n: u8) -> Channel {
        Channel::new(n).unwrap()
    }

    #[test]
    fn test_note_on_parsing() {
        let data = vec![0x90, 60, 100]; // Note On, ch 0, Middle C, velocity 100
        let cmd = Command::parse(&data, 42).unwrap();

        assert_eq!(cmd, Command::note_on(ch(0), 60, 100, 42));
    }

    #[test]
    fn test_note_on_velocity_zero() {
        let data = vec![0x93, 60, 0];
        let cmd = Command::parse(&data, 7).unwrap();

        assert_eq!(cmd, Command::note_off(ch(3), 60, 0, 7));
    }

    #[test]
    fn test_control_change() {
        let data = vec![0xB2, 7, 100]; // CC ch 2, volume, value 100
        let cmd = Command::parse(&data, 0).unwrap();

        assert_eq!(cmd, Command::control_change(ch(2), 7, 100, 0));
        assert_eq!(cmd.channel(), Some(ch(2)));
    }

    #[test]
    fn test_uninterpreted_messages_are_other() {
        let pitch_bend = Command::parse(&[0xE0, 0x00, 0x40], 5).unwrap();
        assert_eq!(
            pitch_bend,
            Command::Other(RawMessage { bytes: vec![0xE0, 0x00, 0x40], timestamp: 5 })
        );
        assert!(!pitch_bend.is_channel_voice());

        let clock = Command::parse(&[0xF8], 9).unwrap();
        assert_eq!(clock.encode(), vec![0xF8]);
        assert_eq!(clock.timestamp(), 9);
    }

    #[test]
    fn test_parse_rejects_truncated_and_running_status() {
        assert!(Command::parse(&[], 0).is_none());
        assert!(Command::parse(&[60, 100], 0).is_none());
        assert!(Command::parse(&[0x90, 60], 0).is_none());
    }

    #[test]
    fn test_encode_note_on() {
        let cmd = Command::note_on(ch(0), 60, 100, 0);
        assert_eq!(cmd.encode(), vec![0x90, 60, 100]);

        let cmd = Command::note_off(ch(5), 61, 3, 0);
        assert_eq!(cmd.encode(), vec![0x85, 61, 3]);
    }

    #[test]
    fn test_with_channel_preserves_payload() {
        let original = Command::note_on(ch(0), 64, 90, 1234);
        let remapped = original.with_channel(ch(2));

        assert_eq!(remapped, Command::note_on(ch(2), 64, 90, 1234));
        assert_eq!(original.channel(), Some(ch(0)));
    }

    #[test]
    fn test_channel_range() {
        assert!(Channel::new(0).unwrap().is_all());
        assert_eq!(Channel::new(16).unwrap().get(), 16);
        assert_eq!(Channel::new(17), Err(MidiError::InvalidChannel(17)));
        assert!(Channel::try_from(200u8).is_err());
    }

    #[test]
    fn test_channel_deserialization_validates() {
        let ok: Channel = serde_yaml::from_str("12").unwrap();
        assert_eq!(ok.get(), 12);
        assert!(serde_yaml::from_str::<Channel>("17").is_err());
    }

    #[test]
    fn test_display() {
        assert_eq!(Command::note_on(ch(1), 60, 100, 0).to_string(), "NoteOn ch:1 n:60 v:100");
        assert_eq!(format_hex(&[0x90, 0x3C, 0x64]), "90 3C 64");
    }
}
