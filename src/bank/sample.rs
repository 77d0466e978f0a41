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
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::error::SampleError;

/// A decoded sample ready for playback. The payload is immutable once built;
/// voices share it through an `Arc`.
pub struct LoadedSample {
    id: String,
    /// Interleaved samples at the engine's rate and channel count.
    data: Box<[f32]>,
    channels: u16,
    sample_rate: u32,
}

impl LoadedSample {
    pub fn new(id: &str, data: Vec<f32>, channels: u16, sample_rate: u32) -> LoadedSample {
        LoadedSample {
            id: id.to_string(),
            data: data.into_boxed_slice(),
            channels: channels.max(1),
            sample_rate,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn data(&self) -> &[f32] {
        &self.data
    }

    pub fn channels(&self) -> u16 {
        self.channels
    }

    pub fn frames(&self) -> usize {
        self.data.len() / self.channels as usize
    }

    pub fn duration(&self) -> Duration {
        Duration::from_secs_f64(self.frames() as f64 / self.sample_rate as f64)
    }

    /// Returns the memory size in bytes.
    pub fn memory_size(&self) -> usize {
        self.data.len() * std::mem::size_of::<f32>()
    }
}

impl fmt::Debug for LoadedSample {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoadedSample")
            .field("id", &self.id)
            .field("frames", &self.frames())
            .field("channels", &self.channels)
            .field("sample_rate", &self.sample_rate)
            .finish()
    }
}

/// The load status of a bank entry.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SampleStatus {
    Pending,
    Loaded,
    Failed,
}

/// A sample to load: a stable identifier plus the asset path to read it from.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SampleDescriptor {
    pub id: String,
    pub path: String,
}

impl SampleDescriptor {
    pub fn new(id: &str, path: &str) -> SampleDescriptor {
        SampleDescriptor {
            id: id.to_string(),
            path: path.to_string(),
        }
    }
}

impl<I: Into<String>, P: Into<String>> From<(I, P)> for SampleDescriptor {
    fn from((id, path): (I, P)) -> Self {
        SampleDescriptor {
            id: id.into(),
            path: path.into(),
        }
    }
}

/// One entry in the bank. A payload, once present, is only ever replaced by a
/// newer successful load or removed by an unload.
#[derive(Default)]
pub(crate) struct BankEntry {
    pub(crate) payload: Option<Arc<LoadedSample>>,
    /// Sequence number of the descriptor that produced the payload.
    pub(crate) payload_seq: u64,
    pub(crate) last_error: Option<SampleError>,
    /// Sequence number of the descriptor that produced the error.
    pub(crate) error_seq: u64,
    /// Descriptors issued for this entry that have not completed.
    pub(crate) in_flight: usize,
}

impl BankEntry {
    pub(crate) fn status(&self) -> SampleStatus {
        if self.payload.is_some() {
            SampleStatus::Loaded
        } else if self.in_flight > 0 || self.last_error.is_none() {
            SampleStatus::Pending
        } else {
            SampleStatus::Failed
        }
    }
}
