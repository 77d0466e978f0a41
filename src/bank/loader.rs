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

//! Bounded, parallel sample loading.
//!
//! Each descriptor is read, size-checked, decoded and published on its own,
//! so one failing file never blocks or invalidates its siblings.

use std::time::{Duration, Instant};

use rayon::prelude::*;
use rayon::ThreadPoolBuilder;
use tracing::{debug, info, warn};

use super::{LoadedSample, SampleBank, SampleDescriptor};
use crate::assets::{AssetError, AssetSource};
use crate::decoder::{self, PcmFormat};
use crate::error::{EngineError, SampleError, SampleFailure};

/// The outcome of a batch load in which every descriptor succeeded.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LoadSummary {
    pub loaded: usize,
    pub frames: usize,
    pub memory_bytes: usize,
    pub elapsed: Duration,
}

/// Decode pool backed by a dedicated Rayon thread pool. The pool width bounds
/// how many samples are read and decoded at once.
pub struct LoaderPool {
    pool: rayon::ThreadPool,
    format: PcmFormat,
    max_sample_bytes: Option<u64>,
}

impl LoaderPool {
    /// Creates a new pool with the given number of worker threads.
    pub fn new(
        num_threads: usize,
        format: PcmFormat,
        max_sample_bytes: Option<u64>,
    ) -> Result<LoaderPool, EngineError> {
        let threads = num_threads.max(1);
        let pool = ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(|i| format!("pcmbank-loader-{i}"))
            .build()
            .map_err(|e| EngineError::LoaderPool(e.to_string()))?;
        Ok(LoaderPool {
            pool,
            format,
            max_sample_bytes,
        })
    }

    pub fn threads(&self) -> usize {
        self.pool.current_num_threads()
    }

    /// Loads a batch into the bank and blocks until every descriptor has
    /// completed. Succeeds only if all of them loaded; otherwise returns every
    /// failure, while the successful ones stay published.
    pub fn load(
        &self,
        bank: &SampleBank,
        assets: &dyn AssetSource,
        descriptors: &[SampleDescriptor],
    ) -> Result<LoadSummary, EngineError> {
        let start = Instant::now();
        let seqs = bank.issue(descriptors);

        let results: Vec<Result<(usize, usize), SampleFailure>> = self.pool.install(|| {
            descriptors
                .par_iter()
                .zip(seqs.par_iter())
                .map(|(descriptor, &seq)| {
                    let result = self.load_one(assets, descriptor);
                    let outcome = match &result {
                        Ok(sample) => Ok((sample.frames(), sample.memory_size())),
                        Err(error) => {
                            warn!(
                                id = descriptor.id,
                                path = descriptor.path,
                                error = %error,
                                "Failed to load sample"
                            );
                            Err(SampleFailure {
                                id: descriptor.id.clone(),
                                error: error.clone(),
                            })
                        }
                    };
                    bank.publish(&descriptor.id, seq, result);
                    outcome
                })
                .collect()
        });

        let mut summary = LoadSummary::default();
        let mut failures = Vec::new();
        for result in results {
            match result {
                Ok((frames, memory_bytes)) => {
                    summary.loaded += 1;
                    summary.frames += frames;
                    summary.memory_bytes += memory_bytes;
                }
                Err(failure) => failures.push(failure),
            }
        }
        summary.elapsed = start.elapsed();

        info!(
            requested = descriptors.len(),
            loaded = summary.loaded,
            failed = failures.len(),
            memory_kb = summary.memory_bytes / 1024,
            elapsed_ms = summary.elapsed.as_millis(),
            "Sample batch loaded"
        );

        if failures.is_empty() {
            Ok(summary)
        } else {
            Err(EngineError::LoadFailed(failures))
        }
    }

    fn load_one(
        &self,
        assets: &dyn AssetSource,
        descriptor: &SampleDescriptor,
    ) -> Result<LoadedSample, SampleError> {
        let path = descriptor.path.as_str();
        if let Some(limit) = self.max_sample_bytes {
            let size = assets.size(path).map_err(|e| asset_error(path, e))?;
            if size > limit {
                return Err(SampleError::TooLarge {
                    path: path.to_string(),
                    size,
                    limit,
                });
            }
        }

        let bytes = assets.read(path).map_err(|e| asset_error(path, e))?;
        let decoded = decoder::decode(path, bytes, self.format)?;
        let sample = LoadedSample::new(
            &descriptor.id,
            decoded.samples,
            self.format.channels,
            self.format.sample_rate,
        );

        debug!(
            id = descriptor.id,
            path,
            source_rate = decoded.source.sample_rate,
            source_channels = decoded.source.channels,
            frames = sample.frames(),
            duration_ms = sample.duration().as_millis(),
            "Sample decoded"
        );
        Ok(sample)
    }
}

fn asset_error(path: &str, error: AssetError) -> SampleError {
    match error {
        AssetError::NotFound(_) => SampleError::NotFound(path.to_string()),
        AssetError::Io { source, .. } => SampleError::Io {
            path: path.to_string(),
            reason: source.to_string(),
        },
    }
}

impl std::fmt::Debug for LoaderPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoaderPool")
            .field("threads", &self.threads())
            .field("format", &self.format)
            .field("max_sample_bytes", &self.max_sample_bytes)
            .finish()
    }
}
