// Copyright (C) 2026 Michael Wilson <mike@mdwn.dev>
//
// This program is free software: you can redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free Software
// Foundation, version 3.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with
// this program. If not, see <https://www.gnu.org/licenses/>.
//
use std::{path::Path, time::Duration};

use config::{Config, Environment, File, FileFormat};
use duration_string::DurationString;
use serde::Deserialize;

use super::ConfigError;

const DEFAULT_SAMPLE_RATE: u32 = 44100;
const DEFAULT_BUFFER_SIZE: usize = 192;
const DEFAULT_CHANNELS: u16 = 2;
const DEFAULT_MAX_VOICES: usize = 20;
const DEFAULT_COMMAND_CAPACITY: usize = 256;
const MAX_DEFAULT_LOADER_THREADS: usize = 4;
const DEFAULT_DEVICE: &str = "default";
const DEFAULT_TICK_INTERVAL: Duration = Duration::from_millis(10);

/// Engine configuration. Every field is optional in the source document and
/// falls back to a default through its accessor.
#[derive(Deserialize, Clone, Debug, Default)]
pub struct EngineConfig {
    /// Output and internal sample rate in Hz (default: 44100).
    sample_rate: Option<u32>,

    /// Frames per render callback (default: 192).
    buffer_size: Option<usize>,

    /// Output and internal channel count, 1 or 2 (default: 2).
    channels: Option<u16>,

    /// Size of the voice pool (default: 20).
    max_voices: Option<usize>,

    /// Width of the decode pool (default: number of CPUs, at most 4).
    loader_threads: Option<usize>,

    /// Capacity of the control to render command queue (default: 256).
    command_capacity: Option<usize>,

    /// Assets larger than this many bytes are rejected before decoding.
    max_sample_bytes: Option<u64>,

    /// Output device name. Names starting with "mock" select the mock device.
    device: Option<String>,

    /// How often hosts without their own frame loop should call tick (default: 10ms).
    tick_interval: Option<String>,
}

impl EngineConfig {
    /// Creates a configuration with the given rate and buffer size and defaults elsewhere.
    pub fn new(sample_rate: u32, buffer_size: usize) -> EngineConfig {
        EngineConfig {
            sample_rate: Some(sample_rate),
            buffer_size: Some(buffer_size),
            ..Default::default()
        }
    }

    /// Loads the configuration from an optional YAML file, then applies
    /// `PCMBANK_*` environment overrides.
    pub fn load(path: Option<&Path>) -> Result<EngineConfig, ConfigError> {
        let mut builder = Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(File::from(path).format(FileFormat::Yaml));
        }
        builder = builder.add_source(Environment::with_prefix("PCMBANK").try_parsing(true));

        let config: EngineConfig = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Parses a YAML document.
    pub fn from_yaml(yaml: &str) -> Result<EngineConfig, ConfigError> {
        let config: EngineConfig = Config::builder()
            .add_source(File::from_str(yaml, FileFormat::Yaml))
            .build()?
            .try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    pub fn with_channels(mut self, channels: u16) -> Self {
        self.channels = Some(channels);
        self
    }

    pub fn with_max_voices(mut self, max_voices: usize) -> Self {
        self.max_voices = Some(max_voices);
        self
    }

    pub fn with_loader_threads(mut self, loader_threads: usize) -> Self {
        self.loader_threads = Some(loader_threads);
        self
    }

    pub fn with_command_capacity(mut self, command_capacity: usize) -> Self {
        self.command_capacity = Some(command_capacity);
        self
    }

    pub fn with_max_sample_bytes(mut self, max_sample_bytes: u64) -> Self {
        self.max_sample_bytes = Some(max_sample_bytes);
        self
    }

    pub fn with_device(mut self, device: &str) -> Self {
        self.device = Some(device.to_string());
        self
    }

    /// Checks that the configuration describes a stream that can exist.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.sample_rate() == 0 {
            return Err(ConfigError::Invalid(
                "sample_rate must be greater than 0".to_string(),
            ));
        }
        if self.buffer_size() == 0 {
            return Err(ConfigError::Invalid(
                "buffer_size must be greater than 0".to_string(),
            ));
        }
        if !(1..=2).contains(&self.channels()) {
            return Err(ConfigError::Invalid(format!(
                "channels must be 1 or 2 (got {})",
                self.channels()
            )));
        }
        if self.max_voices() == 0 {
            return Err(ConfigError::Invalid(
                "max_voices must be greater than 0".to_string(),
            ));
        }
        if self.command_capacity() == 0 {
            return Err(ConfigError::Invalid(
                "command_capacity must be greater than 0".to_string(),
            ));
        }
        self.tick_interval()?;
        Ok(())
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate.unwrap_or(DEFAULT_SAMPLE_RATE)
    }

    pub fn buffer_size(&self) -> usize {
        self.buffer_size.unwrap_or(DEFAULT_BUFFER_SIZE)
    }

    pub fn channels(&self) -> u16 {
        self.channels.unwrap_or(DEFAULT_CHANNELS)
    }

    pub fn max_voices(&self) -> usize {
        self.max_voices.unwrap_or(DEFAULT_MAX_VOICES)
    }

    /// Returns the decode pool width. Always at least 1.
    pub fn loader_threads(&self) -> usize {
        self.loader_threads
            .unwrap_or_else(|| num_cpus::get().min(MAX_DEFAULT_LOADER_THREADS))
            .max(1)
    }

    pub fn command_capacity(&self) -> usize {
        self.command_capacity.unwrap_or(DEFAULT_COMMAND_CAPACITY)
    }

    pub fn max_sample_bytes(&self) -> Option<u64> {
        self.max_sample_bytes
    }

    pub fn device(&self) -> &str {
        self.device.as_deref().unwrap_or(DEFAULT_DEVICE)
    }

    pub fn tick_interval(&self) -> Result<Duration, ConfigError> {
        match &self.tick_interval {
            Some(value) => Ok(DurationString::from_string(value.clone())
                .map_err(|e| ConfigError::Duration {
                    value: value.clone(),
                    reason: e.to_string(),
                })?
                .into()),
            None => Ok(DEFAULT_TICK_INTERVAL),
        }
    }

    /// The deadline of a single render callback: buffer_size / sample_rate.
    pub fn callback_period(&self) -> Duration {
        Duration::from_secs_f64(self.buffer_size() as f64 / self.sample_rate() as f64)
    }
}
