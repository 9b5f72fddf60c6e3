//! Console monitor for ports and routed traffic

use colored::*;
use std::time::Instant;

use crate::gateway::{DestinationEndpoint, SourceEndpoint};
use crate::midi::{format_hex, Command};
use crate::routing::Delivery;

/// Loopback drivers that show up as ordinary ports
fn is_virtual(name: &str) -> bool {
    name.contains("Virtual") || name.contains("loopMIDI") || name.contains("IAC")
}

/// Print the port lists shown by `--list-ports`
pub fn print_ports(sources: &[SourceEndpoint], destinations: &[DestinationEndpoint]) {
    println!("\n{}", "=== MIDI Sources ===".bold().cyan());
    for (i, source) in sources.iter().enumerate() {
        let virtual_tag = if is_virtual(source.name()) { " [VIRTUAL]" } else { "" };
        println!("  {}: {}{}", i, source, virtual_tag.dimmed());
    }

    println!("\n{}", "=== MIDI Destinations ===".bold().cyan());
    for (i, destination) in destinations.iter().enumerate() {
        let virtual_tag = if is_virtual(destination.name()) { " [VIRTUAL]" } else { "" };
        println!("  {}: {}{}", i, destination, virtual_tag.dimmed());
    }
    println!();
}

/// One monitor line for a command sent to `port`: `[timestamp] OUT PORT | HEX => PARSED`
pub fn format_command_line(elapsed_ms: u64, port: &str, command: &Command) -> String {
    let port = if port.chars().count() > 20 {
        format!("{}...", port.chars().take(17).collect::<String>())
    } else {
        port.to_string()
    };

    let hex = format_hex(&command.encode());
    let hex = match command {
        Command::NoteOn(_) => hex.bright_green(),
        Command::NoteOff(_) => hex.bright_red(),
        Command::ControlChange(_) => hex.bright_yellow(),
        Command::Other(_) => hex.bright_black(),
    };

    format!(
        "[{}ms] {} {:20} | {} => {}",
        format!("{:08}", elapsed_ms).dimmed(),
        "OUT".red(),
        port.white(),
        hex,
        command.to_string().bright_blue()
    )
}

/// Prints routed traffic relative to when monitoring started
pub struct Monitor {
    start_time: Instant,
}

impl Monitor {
    pub fn new() -> Self {
        println!("{}", "Format: [timestamp] OUT PORT | HEX => PARSED".dimmed());
        println!("{}", "─".repeat(80).dimmed());
        Self {
            start_time: Instant::now(),
        }
    }

    fn elapsed_ms(&self) -> u64 {
        self.start_time.elapsed().as_millis() as u64
    }

    pub fn print_delivery(&self, delivery: &Delivery) {
        let line =
            format_command_line(self.elapsed_ms(), delivery.destination.name(), &delivery.command);
        match &delivery.outcome {
            Ok(()) => println!("{}", line),
            Err(e) => println!("{} {}", line, format!("({})", e).red()),
        }
    }
}

impl Default for Monitor {
    fn default() -> Self {
        Self::new()
    }
}
