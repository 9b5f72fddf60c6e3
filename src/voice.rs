//! Monophonic voice mapping
//!
//! A voice mapper captures one note at a time from a source channel and moves
//! it to a destination channel. Chaining several mappers over the same source
//! splits a polyphonic part into monophonic voices: a busy mapper passes
//! further note-ons downstream untouched, where the next free mapper captures
//! them.

use parking_lot::Mutex;
use tracing::trace;

use crate::filter::{CommandStream, Filter};
use crate::midi::{Channel, Command};
use crate::stream::{combine_latest3, Event, Observable, Observer};

/// Note currently held by a voice
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActiveNote {
    pub channel: Channel,
    pub note: u8,
}

/// One monophonic voice
///
/// Holds at most one active note. Only a matching Note On turns the voice on,
/// and only the Note Off for exactly that channel and note turns it off.
#[derive(Debug, Default)]
pub struct VoiceMapper {
    active_note: Option<ActiveNote>,
}

impl VoiceMapper {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn active_note(&self) -> Option<ActiveNote> {
        self.active_note
    }

    /// Map one command given the current routing
    ///
    /// - Holding a note: the matching Note Off is released on `destination`;
    ///   everything else passes through unchanged, including further Note Ons
    ///   on `source`.
    /// - Free: a Note On on `source` is captured and emitted on `destination`.
    /// - Anything else is returned as-is.
    ///
    /// Remapped commands keep note, velocity and timestamp.
    pub fn process(&mut self, source: Channel, destination: Channel, command: &Command) -> Command {
        if let Some(active) = self.active_note {
            if let Command::NoteOff(off) = command {
                if off.channel == active.channel && off.note == active.note {
                    self.active_note = None;
                    trace!("Voice released note {} -> ch {}", off.note, destination);
                    return Command::NoteOff(off.with_channel(destination));
                }
            }
            return command.clone();
        }

        if let Command::NoteOn(on) = command {
            if on.channel == source {
                self.active_note = Some(ActiveNote {
                    channel: source,
                    note: on.note,
                });
                trace!("Voice captured note {} ch {} -> ch {}", on.note, source, destination);
                return Command::NoteOn(on.with_channel(destination));
            }
        }

        command.clone()
    }
}

/// Voice mapper filter over live source and destination channels
///
/// Repeated equal channel values are ignored. Every other update of the
/// source channel, destination channel or command stream re-evaluates the
/// mapper against the latest command, so the destination used for a release
/// is whatever the destination stream holds at that moment. Nothing is emitted
/// until both channels and at least one command are known.
///
/// Each subscription to the mapped stream gets its own [`VoiceMapper`]. Channel
/// updates and commands arriving on different threads pass through the mapper
/// one at a time, in the order `combine_latest3` delivers them.
pub fn monophonic_voice_map(
    source: Observable<Channel>,
    destination: Observable<Channel>,
) -> Filter {
    Filter::new("monophonic_voice_map", move |commands: CommandStream| {
        let routed = combine_latest3(
            &source.distinct_until_changed(),
            &destination.distinct_until_changed(),
            &commands,
        );
        Observable::create(move |observer: Observer<Command>| {
            let mapper = Mutex::new(VoiceMapper::new());
            routed.subscribe(Observer::new(move |event| match event {
                Event::Next((source, destination, command)) => {
                    let mapped = mapper.lock().process(source, destination, &command);
                    observer.next(mapped);
                }
                Event::Error(error) => observer.error(error),
                Event::Completed => observer.completed(),
            }))
        })
    })
}
