//! Adapter configuration

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

/// Tunables for one adapter instance
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdapterConfig {
    /// Number of audio packets batched into one isochronous buffer
    #[serde(default = "AdapterConfig::default_audio_packet_count")]
    pub audio_packet_count: usize,

    /// Accept chunk terminators whose reported total disagrees with the
    /// declared transfer length; some peripherals get this wrong
    #[serde(default)]
    pub lenient_chunk_totals: bool,
}

impl Default for AdapterConfig {
    fn default() -> Self {
        Self {
            audio_packet_count: Self::default_audio_packet_count(),
            lenient_chunk_totals: false,
        }
    }
}

impl AdapterConfig {
    fn default_audio_packet_count() -> usize {
        8
    }

    /// Load the configuration from a TOML file, falling back to defaults
    /// when the file does not exist.
    pub fn load_or_default(path: &Path) -> common::Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(path)?;
        toml::from_str(&contents)
            .map_err(|e| common::Error::Config(format!("Invalid config file: {}", e)))
    }
}
