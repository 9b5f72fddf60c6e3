//! Configuration management for rx-midi
//!
//! Handles loading, parsing, and hot-reloading of YAML configuration files.

pub mod watcher;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tokio::fs;

use crate::gateway::EndpointPatterns;
use crate::midi::Channel;

pub use watcher::ConfigWatcher;

/// Root configuration structure
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct AppConfig {
    #[serde(default)]
    pub routing: RoutingConfig,
    #[serde(default)]
    pub midi: MidiConfig,
}

/// Voice routing: which channel to split and where each voice goes
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct RoutingConfig {
    #[serde(default = "default_source_channel")]
    pub source_channel: Channel,
    /// Destination channel per voice, in priority order
    #[serde(default = "default_voices")]
    pub voices: Vec<Channel>,
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            source_channel: default_source_channel(),
            voices: default_voices(),
        }
    }
}

/// MIDI port configuration
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct MidiConfig {
    #[serde(default = "default_client_name")]
    pub client_name: String,
    /// Source name patterns; empty listens to every source
    #[serde(default)]
    pub sources: EndpointPatterns,
    /// Destination name patterns; empty sends to every destination
    #[serde(default)]
    pub destinations: EndpointPatterns,
    #[serde(default = "default_discovery_interval_ms")]
    pub discovery_interval_ms: u64,
}

impl Default for MidiConfig {
    fn default() -> Self {
        Self {
            client_name: default_client_name(),
            sources: EndpointPatterns::default(),
            destinations: EndpointPatterns::default(),
            discovery_interval_ms: default_discovery_interval_ms(),
        }
    }
}

impl AppConfig {
    /// Load configuration from file with validation
    pub async fn load(path: &str) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read config file: {}", path))?;

        let config = Self::from_yaml(&contents)
            .with_context(|| format!("Invalid config file: {}", path))?;

        Ok(config)
    }

    /// Parse and validate a YAML document
    pub fn from_yaml(contents: &str) -> Result<Self> {
        let config: AppConfig =
            serde_yaml::from_str(contents).context("Failed to parse YAML config")?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to file
    pub async fn save(&self, path: &str) -> Result<()> {
        let yaml = serde_yaml::to_string(self).context("Failed to serialize config to YAML")?;

        fs::write(path, yaml)
            .await
            .with_context(|| format!("Failed to write config file: {}", path))?;

        Ok(())
    }

    /// Validate configuration for correctness and consistency
    pub fn validate(&self) -> Result<()> {
        self.routing.validate()?;

        if self.midi.client_name.trim().is_empty() {
            anyhow::bail!("MIDI client_name cannot be empty");
        }
        if self.midi.discovery_interval_ms == 0 {
            anyhow::bail!("MIDI discovery_interval_ms must be greater than 0");
        }

        Ok(())
    }
}

impl RoutingConfig {
    pub fn validate(&self) -> Result<()> {
        if self.voices.is_empty() {
            anyhow::bail!("At least one voice channel must be defined");
        }

        for (idx, voice) in self.voices.iter().enumerate() {
            if voice.nibble() == self.source_channel.nibble() {
                anyhow::bail!(
                    "Voice {} uses channel {}, which is the source channel on the wire",
                    idx,
                    voice
                );
            }
        }

        Ok(())
    }
}

fn default_source_channel() -> Channel { Channel::ALL }
fn default_voices() -> Vec<Channel> {
    [1, 2, 3].into_iter().filter_map(|n| Channel::new(n).ok()).collect()
}
fn default_client_name() -> String { "rx-midi".to_string() }
fn default_discovery_interval_ms() -> u64 { 1000 }
