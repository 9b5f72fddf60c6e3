//! Filter composition
//!
//! A [`Filter`] turns one command stream into another. Filters chain left to
//! right: `a >> b` feeds every command through `a` first, then `b`. Composition
//! adds no buffering of its own, so command order is whatever the individual
//! filters produce.

use std::fmt;
use std::ops::Shr;
use std::sync::Arc;

use crate::midi::{Channel, Command};
use crate::stream::Observable;

/// Stream of MIDI commands
pub type CommandStream = Observable<Command>;

type Transform = Arc<dyn Fn(CommandStream) -> CommandStream + Send + Sync>;

/// Named transformation from one command stream to another
#[derive(Clone)]
pub struct Filter {
    name: String,
    transform: Transform,
}

impl Filter {
    pub fn new<F>(name: impl Into<String>, transform: F) -> Self
    where
        F: Fn(CommandStream) -> CommandStream + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            transform: Arc::new(transform),
        }
    }

    /// Filter that returns its input untouched
    pub fn identity() -> Self {
        Self::new("identity", |commands| commands)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn apply(&self, commands: CommandStream) -> CommandStream {
        (self.transform)(commands)
    }

    /// `self` first, then `next`
    pub fn then(&self, next: &Filter) -> Filter {
        let (first, second) = (self.transform.clone(), next.transform.clone());
        Filter {
            name: format!("{} >> {}", self.name, next.name),
            transform: Arc::new(move |commands: CommandStream| second(first(commands))),
        }
    }
}

impl fmt::Debug for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Filter").field("name", &self.name).finish()
    }
}

impl Shr for Filter {
    type Output = Filter;

    fn shr(self, next: Filter) -> Filter {
        self.then(&next)
    }
}

/// Chain filters in declared order; no filters gives the identity
pub fn compose_filters(filters: impl IntoIterator<Item = Filter>) -> Filter {
    let mut filters = filters.into_iter();
    match filters.next() {
        Some(first) => filters.fold(first, |chain, next| chain.then(&next)),
        None => Filter::identity(),
    }
}

impl Observable<Command> {
    pub fn through(&self, filter: &Filter) -> CommandStream {
        filter.apply(self.clone())
    }
}

/// Keep channel-voice commands on the live `channel`
///
/// [`Channel::ALL`] keeps every channel-voice command. Commands arriving before
/// the channel stream has a value are dropped; changing the channel never
/// replays earlier commands.
pub fn channel_voice_commands(channel: Observable<Channel>) -> Filter {
    Filter::new("channel_voice_commands", move |commands: CommandStream| {
        commands
            .with_latest_from(&channel.distinct_until_changed())
            .filter_map(|(command, selected)| match command.channel() {
                Some(ch) if selected.is_all() || ch == selected => Some(command),
                _ => None,
            })
    })
}

/// Keep control changes for one controller number
pub fn controller(number: u8) -> Filter {
    Filter::new(format!("controller({})", number), move |commands: CommandStream| {
        commands.filter(move |command| {
            matches!(command, Command::ControlChange(cc) if cc.controller == number)
        })
    })
}
