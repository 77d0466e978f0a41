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

//! Output devices. A device opens streams that periodically call back into a
//! `RenderCell` for the next buffer of audio.

use std::fmt;
use std::sync::Arc;

use crate::config::EngineConfig;
use crate::render::RenderCell;

pub mod cpal;
pub mod mock;
mod thread_priority;

#[derive(Debug, thiserror::Error)]
pub enum OutputError {
    #[error("no output device available")]
    NoDevice,

    #[error("unable to open output stream: {0}")]
    Open(String),

    #[error("unable to start output stream: {0}")]
    Play(String),

    #[error("unable to pause output stream: {0}")]
    Pause(String),

    #[error("output stream is closed")]
    Closed,
}

pub trait OutputDevice: fmt::Display + Send + Sync {
    /// Opens a stream with the configured rate, buffer size and channel count.
    /// The stream starts paused. Every callback renders through `cell`.
    fn open(
        &self,
        config: &EngineConfig,
        cell: Arc<RenderCell>,
    ) -> Result<Box<dyn OutputStream>, OutputError>;
}

/// An open output stream. Dropping it closes the stream; once drop returns the
/// stream makes no further callbacks.
pub trait OutputStream: Send {
    fn play(&mut self) -> Result<(), OutputError>;

    fn pause(&mut self) -> Result<(), OutputError>;
}

/// A device as reported by `list_devices`.
#[derive(Clone, Debug)]
pub struct DeviceInfo {
    pub name: String,
    pub host: String,
    pub max_channels: u16,
}

impl fmt::Display for DeviceInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} (Channels={}) ({})",
            self.name, self.max_channels, self.host
        )
    }
}

/// Lists output devices known to cpal.
pub fn list_devices() -> Result<Vec<DeviceInfo>, OutputError> {
    cpal::Device::list()
}

/// Gets the configured device. Names starting with "mock" select a mock device.
pub fn get_device(config: &EngineConfig) -> Result<Arc<dyn OutputDevice>, OutputError> {
    let device = config.device();
    if device.starts_with("mock") {
        return Ok(Arc::new(mock::Device::get(device)));
    }

    Ok(Arc::new(cpal::Device::get(device)?))
}
