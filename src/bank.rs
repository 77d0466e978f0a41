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

//! The sample bank: decoded payloads indexed by sample identifier.
//!
//! The bank is only ever touched from control and loader threads. The render
//! thread receives payloads through `Start` commands as `Arc` clones and never
//! looks anything up here. Payloads that leave the bank while a voice may
//! still hold them are parked in a retired list, so the last reference is
//! always dropped on the control thread.

mod loader;
mod sample;

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tracing::debug;

use crate::error::{EngineError, SampleError};

pub use loader::{LoadSummary, LoaderPool};
pub use sample::{LoadedSample, SampleDescriptor, SampleStatus};

use sample::BankEntry;

/// Counts describing the bank's contents.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BankStats {
    pub loaded: usize,
    pub failed: usize,
    pub pending: usize,
    pub memory_bytes: usize,
    pub retired: usize,
}

pub struct SampleBank {
    entries: RwLock<HashMap<String, BankEntry>>,
    retired: Mutex<Vec<Arc<LoadedSample>>>,
    next_seq: AtomicU64,
}

impl Default for SampleBank {
    fn default() -> Self {
        SampleBank::new()
    }
}

impl SampleBank {
    pub fn new() -> SampleBank {
        SampleBank {
            entries: RwLock::new(HashMap::new()),
            retired: Mutex::new(Vec::new()),
            next_seq: AtomicU64::new(1),
        }
    }

    /// Registers a batch of descriptors before any decoding starts and returns
    /// one sequence number per descriptor, in input order. Later descriptors
    /// always get larger numbers, which is what makes duplicate identifiers
    /// resolve to the last one regardless of completion order.
    pub(crate) fn issue(&self, descriptors: &[SampleDescriptor]) -> Vec<u64> {
        let mut entries = self.entries.write();
        descriptors
            .iter()
            .map(|descriptor| {
                let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
                entries.entry(descriptor.id.clone()).or_default().in_flight += 1;
                seq
            })
            .collect()
    }

    /// Publishes the result of one descriptor. A successful load replaces the
    /// payload only if it is newer than the current one. A failure is recorded
    /// but never removes an existing payload.
    pub(crate) fn publish(&self, id: &str, seq: u64, result: Result<LoadedSample, SampleError>) {
        let displaced = {
            let mut entries = self.entries.write();
            let entry = entries.entry(id.to_string()).or_default();
            entry.in_flight = entry.in_flight.saturating_sub(1);

            match result {
                Ok(sample) if seq > entry.payload_seq => {
                    entry.payload_seq = seq;
                    if seq > entry.error_seq {
                        entry.last_error = None;
                    }
                    entry.payload.replace(Arc::new(sample))
                }
                Ok(_) => {
                    debug!(id, seq, "Discarding superseded sample");
                    None
                }
                Err(error) => {
                    if seq > entry.error_seq && seq > entry.payload_seq {
                        entry.error_seq = seq;
                        entry.last_error = Some(error);
                    }
                    None
                }
            }
        };

        if let Some(displaced) = displaced {
            self.retire(displaced);
        }
    }

    /// Returns the payload for a sample that is ready to play.
    pub fn payload(&self, id: &str) -> Result<Arc<LoadedSample>, EngineError> {
        let entries = self.entries.read();
        let entry = entries
            .get(id)
            .ok_or_else(|| EngineError::UnknownSample(id.to_string()))?;
        entry
            .payload
            .clone()
            .ok_or_else(|| EngineError::SampleNotLoaded(id.to_string()))
    }

    pub fn status(&self, id: &str) -> Option<SampleStatus> {
        self.entries.read().get(id).map(|entry| entry.status())
    }

    /// The most recent load error for a sample, if it has one that has not
    /// been superseded by a newer successful load.
    pub fn last_error(&self, id: &str) -> Option<SampleError> {
        self.entries
            .read()
            .get(id)
            .and_then(|entry| entry.last_error.clone())
    }

    /// Checks that a sample can be played without taking a reference to it.
    pub fn check_playable(&self, id: &str) -> Result<(), EngineError> {
        self.payload(id).map(|_| ())
    }

    /// Removes a sample. Its payload is retired rather than dropped.
    pub fn unload(&self, id: &str) -> Result<(), EngineError> {
        let removed = self
            .entries
            .write()
            .remove(id)
            .ok_or_else(|| EngineError::UnknownSample(id.to_string()))?;
        if let Some(payload) = removed.payload {
            self.retire(payload);
        }
        Ok(())
    }

    fn retire(&self, payload: Arc<LoadedSample>) {
        debug!(id = payload.id(), "Retiring sample payload");
        self.retired.lock().push(payload);
    }

    /// Drops retired payloads nobody else references. Returns how many were freed.
    pub fn collect_retired(&self) -> usize {
        let mut retired = self.retired.lock();
        let before = retired.len();
        retired.retain(|payload| Arc::strong_count(payload) > 1);
        before - retired.len()
    }

    /// Releases every payload. Only called once the render thread is quiesced.
    pub fn clear(&self) {
        self.entries.write().clear();
        self.retired.lock().clear();
    }

    pub fn stats(&self) -> BankStats {
        let entries = self.entries.read();
        let mut stats = BankStats {
            retired: self.retired.lock().len(),
            ..Default::default()
        };
        for entry in entries.values() {
            match entry.status() {
                SampleStatus::Loaded => stats.loaded += 1,
                SampleStatus::Failed => stats.failed += 1,
                SampleStatus::Pending => stats.pending += 1,
            }
            if let Some(payload) = &entry.payload {
                stats.memory_bytes += payload.memory_size();
            }
        }
        stats
    }
}

impl std::fmt::Debug for SampleBank {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let stats = self.stats();
        f.debug_struct("SampleBank")
            .field("loaded", &stats.loaded)
            .field("failed", &stats.failed)
            .field("pending", &stats.pending)
            .field("memory_kb", &(stats.memory_bytes / 1024))
            .finish()
    }
}
