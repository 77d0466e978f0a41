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

//! A low-latency sample bank and playback engine.
//!
//! Short clips are decoded from an [`assets::AssetSource`] on a bounded loader
//! pool into an in-memory [`bank::SampleBank`], then triggered onto a fixed
//! pool of voices that a real-time render callback mixes into the output
//! stream.

pub mod assets;
pub mod bank;
pub mod config;
pub mod decoder;
pub mod engine;
pub mod error;
pub mod host;
pub mod output;
pub mod render;
pub mod voice;
#[cfg(test)]
mod testutil;

pub use bank::{SampleDescriptor, SampleStatus};
pub use config::EngineConfig;
pub use engine::{Engine, EngineState, EngineStats, PlayOptions, PlayState, TickReport};
pub use error::{EngineError, SampleError};
