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

//! A process-wide control surface for embedding hosts. Every call returns a
//! plain success flag; the code of the most recent failure is kept for
//! `last_error_code`.

#[cfg(target_os = "android")]
mod jni;

use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::{Arc, Once};

use parking_lot::{const_mutex, const_rwlock, Mutex, RwLock};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::assets::AssetSource;
use crate::bank::SampleDescriptor;
use crate::config::EngineConfig;
use crate::engine::{Engine, EngineState, PlayState};
use crate::error::EngineError;
use crate::output;

static ENGINE: RwLock<Option<Arc<Engine>>> = const_rwlock(None);

/// Sample ids of the most recent batch, in load order, for hosts that refer to
/// samples by index.
static BATCH: Mutex<Vec<String>> = const_mutex(Vec::new());

static LAST_ERROR: AtomicI32 = AtomicI32::new(0);

static LOGGING: Once = Once::new();

/// Installs a `tracing` subscriber filtered by `RUST_LOG` (default `info`).
/// Later calls do nothing.
pub fn init_logging() {
    LOGGING.call_once(|| {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
        // Another subscriber may already be installed by the embedder.
        let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
    });
}

/// The code of the most recent failed call, or 0 if none has failed.
pub fn last_error_code() -> i32 {
    LAST_ERROR.load(Ordering::Relaxed)
}

/// Creates the engine with the given rate and buffer size on the default
/// output device.
pub fn create(sample_rate: u32, buffer_size: usize, assets: Arc<dyn AssetSource>) -> bool {
    create_with_config(EngineConfig::new(sample_rate, buffer_size), assets)
}

pub fn create_with_config(config: EngineConfig, assets: Arc<dyn AssetSource>) -> bool {
    let mut slot = ENGINE.write();
    if slot.is_some() {
        return record("create", Err(EngineError::AlreadyCreated));
    }

    let result = output::get_device(&config)
        .map_err(EngineError::DeviceOpenFailed)
        .and_then(|device| Engine::create(config, device, assets));
    match result {
        Ok(engine) => {
            *slot = Some(Arc::new(engine));
            LAST_ERROR.store(0, Ordering::Relaxed);
            true
        }
        Err(e) => record("create", Err(e)),
    }
}

/// Shuts the engine down and releases it. Succeeds if there is no engine.
pub fn shutdown() -> bool {
    let Some(engine) = ENGINE.write().take() else {
        return true;
    };
    BATCH.lock().clear();
    let result = engine.shutdown();
    info!(
        references = Arc::strong_count(&engine),
        "Host released engine"
    );
    record("shutdown", result)
}

pub fn on_pause() -> bool {
    with_engine("pause", |engine| engine.pause())
}

pub fn on_resume() -> bool {
    with_engine("resume", |engine| engine.resume())
}

/// Periodic housekeeping. Hosts call this from their frame or timer loop.
pub fn on_update() -> bool {
    with_engine("tick", |engine| engine.tick().map(|_| ()))
}

/// Loads `(id, path)` pairs. Fails if any of them failed to load.
pub fn load_samples<I, P>(samples: &[(I, P)]) -> bool
where
    I: AsRef<str>,
    P: AsRef<str>,
{
    let descriptors: Vec<SampleDescriptor> = samples
        .iter()
        .map(|(id, path)| SampleDescriptor::new(id.as_ref(), path.as_ref()))
        .collect();
    with_engine("load_samples", |engine| {
        // Indices follow the batch even when part of it fails to load.
        *BATCH.lock() = descriptors.iter().map(|d| d.id.clone()).collect();
        engine.load_samples(&descriptors).map(|_| ())
    })
}

/// Loads asset paths, using each path as its sample id.
pub fn load_paths<P: AsRef<str>>(paths: &[P]) -> bool {
    let samples: Vec<(&str, &str)> = paths
        .iter()
        .map(|path| (path.as_ref(), path.as_ref()))
        .collect();
    load_samples(&samples)
}

pub fn play_sample(id: &str, start: bool) -> bool {
    with_engine("play_sample", |engine| {
        engine.play_sample(id, PlayState::from(start))
    })
}

/// Plays the sample at `index` in the most recent batch.
pub fn play_sample_at(index: usize, start: bool) -> bool {
    let id = BATCH.lock().get(index).cloned();
    match id {
        Some(id) => play_sample(&id, start),
        None => record(
            "play_sample",
            Err(EngineError::UnknownSample(format!("#{index}"))),
        ),
    }
}

/// Runs `op` against the current engine without holding the registry lock, so
/// a long load never blocks other calls.
fn with_engine<F>(operation: &'static str, op: F) -> bool
where
    F: FnOnce(&Engine) -> Result<(), EngineError>,
{
    let engine = ENGINE.read().clone();
    match engine {
        Some(engine) => record(operation, op(&engine)),
        None => record(
            operation,
            Err(EngineError::InvalidState {
                operation,
                state: EngineState::Uninitialized,
            }),
        ),
    }
}

fn record(operation: &'static str, result: Result<(), EngineError>) -> bool {
    match result {
        Ok(()) => true,
        Err(e) => {
            warn!(operation, code = e.code(), error = %e, "Host call failed");
            LAST_ERROR.store(e.code(), Ordering::Relaxed);
            false
        }
    }
}
