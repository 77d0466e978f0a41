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

//! Error types shared by the engine's control surface.

use std::fmt;

use crate::config::ConfigError;
use crate::engine::EngineState;
use crate::output::OutputError;

/// Errors returned synchronously by engine control calls.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("failed to open output stream: {0}")]
    DeviceOpenFailed(#[source] OutputError),

    #[error("failed to restart output stream: {0}")]
    DeviceRestartFailed(#[source] OutputError),

    #[error("{} sample(s) failed to load", .0.len())]
    LoadFailed(Vec<SampleFailure>),

    #[error("unknown sample '{0}'")]
    UnknownSample(String),

    #[error("sample '{0}' is not loaded")]
    SampleNotLoaded(String),

    #[error("no free voice available")]
    NoFreeVoice,

    #[error("{operation} is not valid while the engine is {state}")]
    InvalidState {
        operation: &'static str,
        state: EngineState,
    },

    #[error("an engine instance already exists in this process")]
    AlreadyCreated,

    #[error("render command queue is full")]
    CommandQueueFull,

    #[error("loader pool error: {0}")]
    LoaderPool(String),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl EngineError {
    /// Returns a stable numeric code for hosts that can only carry integers.
    pub fn code(&self) -> i32 {
        match self {
            EngineError::DeviceOpenFailed(_) => 1001,
            EngineError::DeviceRestartFailed(_) => 1002,
            EngineError::LoadFailed(_) => 1003,
            EngineError::UnknownSample(_) => 1004,
            EngineError::SampleNotLoaded(_) => 1005,
            EngineError::NoFreeVoice => 1006,
            EngineError::InvalidState { .. } => 1007,
            EngineError::AlreadyCreated => 1008,
            EngineError::CommandQueueFull => 1009,
            EngineError::LoaderPool(_) => 1010,
            EngineError::Config(_) => 1011,
        }
    }
}

/// Why a single sample failed to load.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SampleError {
    #[error("asset not found: {0}")]
    NotFound(String),

    #[error("I/O error reading {path}: {reason}")]
    Io { path: String, reason: String },

    #[error("failed to decode {path}: {reason}")]
    Decode { path: String, reason: String },

    #[error("asset {path} is {size} bytes, limit is {limit}")]
    TooLarge { path: String, size: u64, limit: u64 },

    #[error("asset {0} contains no audio frames")]
    Empty(String),
}

/// A failed descriptor from a batch load.
#[derive(Debug, Clone, PartialEq)]
pub struct SampleFailure {
    pub id: String,
    pub error: SampleError,
}

impl fmt::Display for SampleFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.id, self.error)
    }
}
