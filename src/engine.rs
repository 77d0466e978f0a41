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

//! The engine handle: lifecycle control, sample loading and voice triggering.
//!
//! Every control call takes `&self`; the mutable control state lives behind a
//! single mutex that the render thread never touches.

mod lifecycle;
#[cfg(test)]
mod tests;

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, info, span, warn, Level};

use crate::assets::AssetSource;
use crate::bank::{LoadSummary, LoaderPool, SampleBank, SampleDescriptor, SampleStatus};
use crate::config::EngineConfig;
use crate::decoder::PcmFormat;
use crate::error::{EngineError, SampleError};
use crate::output::{OutputDevice, OutputStream};
use crate::render::{Command, CommandSender, RenderCell};
use crate::voice::{voice_slots, VoiceManager};

pub use lifecycle::EngineState;
use lifecycle::{transition, InstanceGuard};

/// Whether a play request starts or stops a sample.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PlayState {
    Start,
    Stop,
}

impl From<bool> for PlayState {
    fn from(start: bool) -> Self {
        if start {
            PlayState::Start
        } else {
            PlayState::Stop
        }
    }
}

/// Per-trigger playback options.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PlayOptions {
    /// Linear gain, clamped to 0.0..=1.0.
    pub volume: f32,
    /// Loop until stopped instead of finishing at the end of the sample.
    pub looping: bool,
}

impl Default for PlayOptions {
    fn default() -> Self {
        PlayOptions {
            volume: 1.0,
            looping: false,
        }
    }
}

impl PlayOptions {
    pub fn with_volume(mut self, volume: f32) -> Self {
        self.volume = volume;
        self
    }

    pub fn with_looping(mut self, looping: bool) -> Self {
        self.looping = looping;
        self
    }

    fn gain(&self) -> f32 {
        if self.volume.is_nan() {
            1.0
        } else {
            self.volume.clamp(0.0, 1.0)
        }
    }
}

/// Housekeeping performed by one `tick`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TickReport {
    pub reclaimed_voices: usize,
    pub freed_payloads: usize,
    pub new_underruns: u64,
}

/// A snapshot of engine diagnostics.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EngineStats {
    pub state: EngineState,
    pub callbacks: u64,
    pub underruns: u64,
    pub playing_voices: usize,
    pub bound_voices: usize,
    pub free_voices: usize,
    pub loaded_samples: usize,
    pub failed_samples: usize,
    pub pending_samples: usize,
    pub memory_bytes: usize,
    pub retired_payloads: usize,
    pub open_streams: usize,
}

/// Control state. Only ever touched by control threads.
struct Control {
    state: EngineState,
    stream: Option<Box<dyn OutputStream>>,
    voices: VoiceManager,
    commands: CommandSender,
    loader: Option<Arc<LoaderPool>>,
    reported_underruns: u64,
    instance: Option<InstanceGuard>,
}

pub struct Engine {
    config: EngineConfig,
    device: Arc<dyn OutputDevice>,
    assets: Arc<dyn AssetSource>,
    bank: Arc<SampleBank>,
    cell: Arc<RenderCell>,
    control: Mutex<Control>,
}

impl Engine {
    /// Creates the engine and starts its output stream. At most one engine
    /// may exist per process; a second `create` fails with `AlreadyCreated`
    /// until the first has been shut down.
    pub fn create(
        config: EngineConfig,
        device: Arc<dyn OutputDevice>,
        assets: Arc<dyn AssetSource>,
    ) -> Result<Engine, EngineError> {
        let span = span!(Level::INFO, "create engine");
        let _enter = span.enter();

        config.validate()?;
        let instance = InstanceGuard::acquire()?;

        let mut state = EngineState::Uninitialized;
        let slots = voice_slots(config.max_voices());
        let (cell, commands) = RenderCell::new(
            slots.clone(),
            config.channels(),
            config.sample_rate(),
            config.command_capacity(),
        );
        let loader = LoaderPool::new(
            config.loader_threads(),
            PcmFormat {
                sample_rate: config.sample_rate(),
                channels: config.channels(),
            },
            config.max_sample_bytes(),
        )?;
        transition(&mut state, EngineState::Created);

        let mut stream = device
            .open(&config, cell.clone())
            .map_err(EngineError::DeviceOpenFailed)?;
        stream.play().map_err(EngineError::DeviceOpenFailed)?;
        transition(&mut state, EngineState::Running);

        info!(
            device = %device,
            sample_rate = config.sample_rate(),
            buffer_size = config.buffer_size(),
            channels = config.channels(),
            max_voices = config.max_voices(),
            loader_threads = loader.threads(),
            callback_period_us = config.callback_period().as_micros(),
            "Engine created"
        );

        Ok(Engine {
            config,
            device,
            assets,
            bank: Arc::new(SampleBank::new()),
            cell,
            control: Mutex::new(Control {
                state,
                stream: Some(stream),
                voices: VoiceManager::new(slots),
                commands,
                loader: Some(Arc::new(loader)),
                reported_underruns: 0,
                instance: Some(instance),
            }),
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn state(&self) -> EngineState {
        self.control.lock().state
    }

    /// Stops render callbacks. The bank and voices are kept; voices resume
    /// where they left off.
    pub fn pause(&self) -> Result<(), EngineError> {
        let mut control = self.control.lock();
        match control.state {
            EngineState::Paused => return Ok(()),
            EngineState::Running => {}
            state => {
                return Err(EngineError::InvalidState {
                    operation: "pause",
                    state,
                })
            }
        }

        if let Some(stream) = control.stream.as_mut() {
            if let Err(e) = stream.pause() {
                // A stream that cannot be paused is closed instead, which
                // stops callbacks all the same. Resume reopens it.
                warn!(error = %e, "Failed to pause stream, closing it");
                control.stream = None;
            }
        }
        transition(&mut control.state, EngineState::Paused);
        Ok(())
    }

    /// Restarts render callbacks. Tries to restart the existing stream first
    /// and reopens one with the original configuration if that fails.
    pub fn resume(&self) -> Result<(), EngineError> {
        let mut control = self.control.lock();
        match control.state {
            EngineState::Running => return Ok(()),
            EngineState::Paused => {}
            state => {
                return Err(EngineError::InvalidState {
                    operation: "resume",
                    state,
                })
            }
        }

        if let Some(stream) = control.stream.as_mut() {
            match stream.play() {
                Ok(()) => {
                    transition(&mut control.state, EngineState::Running);
                    return Ok(());
                }
                Err(e) => {
                    warn!(error = %e, "Failed to restart stream, reopening");
                    control.stream = None;
                }
            }
        }

        let mut stream = self
            .device
            .open(&self.config, self.cell.clone())
            .map_err(EngineError::DeviceRestartFailed)?;
        stream.play().map_err(EngineError::DeviceRestartFailed)?;
        control.stream = Some(stream);
        transition(&mut control.state, EngineState::Running);
        Ok(())
    }

    /// Shuts the engine down from any state. Callbacks are stopped and drained
    /// before any sample memory is released. Calling this again is a no-op.
    pub fn shutdown(&self) -> Result<(), EngineError> {
        let mut control = self.control.lock();
        if control.state == EngineState::Shutdown {
            return Ok(());
        }
        let span = span!(Level::INFO, "shutdown engine");
        let _enter = span.enter();
        transition(&mut control.state, EngineState::ShuttingDown);

        if let Some(mut stream) = control.stream.take() {
            if let Err(e) = stream.pause() {
                warn!(error = %e, "Failed to pause stream during shutdown");
            }
            // Dropping the stream closes it.
            drop(stream);
        }
        let discarded = self.cell.quiesce();
        control.voices.clear();
        self.bank.clear();
        control.loader = None;
        control.instance = None;

        transition(&mut control.state, EngineState::Shutdown);
        info!(
            discarded_commands = discarded,
            callbacks = self.cell.stats().callbacks(),
            underruns = self.cell.stats().underruns(),
            "Engine shut down"
        );
        Ok(())
    }

    /// Non-real-time housekeeping: reclaims finished voices, frees retired
    /// payloads and reports new underruns.
    pub fn tick(&self) -> Result<TickReport, EngineError> {
        let mut control = self.control.lock();
        control.state.require("tick", EngineState::ACTIVE)?;

        let reclaimed_voices = control.voices.reclaim_finished();
        let freed_payloads = self.bank.collect_retired();
        let underruns = self.cell.stats().underruns();
        let new_underruns = underruns.saturating_sub(control.reported_underruns);
        control.reported_underruns = underruns;

        let report = TickReport {
            reclaimed_voices,
            freed_payloads,
            new_underruns,
        };
        if new_underruns > 0 {
            warn!(new_underruns, total = underruns, "Render underruns");
        }
        if reclaimed_voices > 0 || freed_payloads > 0 {
            debug!(reclaimed_voices, freed_payloads, "Tick");
        }
        Ok(report)
    }

    /// Loads a batch of samples. Succeeds only if every descriptor loaded;
    /// the ones that did load stay usable either way.
    pub fn load_samples<D>(&self, descriptors: &[D]) -> Result<LoadSummary, EngineError>
    where
        D: Clone + Into<SampleDescriptor>,
    {
        let loader = {
            let control = self.control.lock();
            control
                .state
                .require("load_samples", EngineState::LOADABLE)?;
            control
                .loader
                .clone()
                .ok_or(EngineError::LoaderPool("loader pool is closed".to_string()))?
        };
        let descriptors: Vec<SampleDescriptor> =
            descriptors.iter().cloned().map(Into::into).collect();
        loader.load(&self.bank, self.assets.as_ref(), &descriptors)
    }

    /// Starts or stops a sample with default options.
    pub fn play_sample(&self, id: &str, state: PlayState) -> Result<(), EngineError> {
        match state {
            PlayState::Start => self.play_sample_with(id, PlayOptions::default()),
            PlayState::Stop => self.stop_sample(id),
        }
    }

    /// Starts a sample, restarting it from zero on the same voice if it is
    /// already playing.
    pub fn play_sample_with(&self, id: &str, options: PlayOptions) -> Result<(), EngineError> {
        let mut control = self.control.lock();
        control.state.require("play_sample", EngineState::ACTIVE)?;
        self.drain_if_paused(&control);

        let sample = self.bank.payload(id)?;
        let assignment = control.voices.plan_start(id)?;
        if !control.commands.has_capacity() {
            return Err(EngineError::CommandQueueFull);
        }

        control.voices.commit_start(id, assignment);
        let command = Command::Start {
            voice: assignment.voice,
            generation: assignment.generation,
            sample,
            gain: options.gain(),
            looping: options.looping,
        };
        if let Err(e) = control.commands.send(command) {
            // Unreachable with a single producer, but never leave a voice
            // bound that the render thread does not know about.
            control.voices.stop(id);
            return Err(e);
        }
        Ok(())
    }

    /// Stops the voice playing `id`. Stopping a loaded sample that is not
    /// playing is a no-op.
    pub fn stop_sample(&self, id: &str) -> Result<(), EngineError> {
        let mut control = self.control.lock();
        control.state.require("stop_sample", EngineState::ACTIVE)?;
        self.drain_if_paused(&control);

        match control.voices.stop(id) {
            Some((voice, generation)) => {
                // The slot is already finished; the command only releases the
                // render side's reference early.
                if control
                    .commands
                    .send(Command::Stop { voice, generation })
                    .is_err()
                {
                    debug!(voice, "Render queue full, stop will apply on next cycle");
                }
                Ok(())
            }
            None => self.bank.check_playable(id),
        }
    }

    /// Stops every playing voice. Returns how many were playing.
    pub fn stop_all(&self) -> Result<usize, EngineError> {
        let mut control = self.control.lock();
        control.state.require("stop_all", EngineState::ACTIVE)?;
        self.drain_if_paused(&control);

        let stopped = control.voices.stop_all();
        if control.commands.send(Command::StopAll).is_err() {
            debug!("Render queue full, stop all will apply on next cycle");
        }
        info!(stopped, "Stopped all voices");
        Ok(stopped)
    }

    /// Removes a sample from the bank. A voice already playing it keeps its
    /// payload and plays to the end; the payload is freed by a later `tick`.
    pub fn unload_sample(&self, id: &str) -> Result<(), EngineError> {
        let control = self.control.lock();
        control
            .state
            .require("unload_sample", EngineState::LOADABLE)?;

        self.bank.unload(id)?;
        info!(id, "Sample unloaded");
        Ok(())
    }

    /// No callback drains the command queue while the stream is paused, so
    /// the control thread applies pending commands itself before queueing
    /// more.
    fn drain_if_paused(&self, control: &Control) {
        if control.state == EngineState::Paused {
            let applied = self.cell.apply_pending();
            if applied > 0 {
                debug!(applied, "Applied render commands while paused");
            }
        }
    }

    pub fn sample_status(&self, id: &str) -> Option<SampleStatus> {
        self.bank.status(id)
    }

    /// The error from the most recent failed load of `id`, if any.
    pub fn sample_error(&self, id: &str) -> Option<SampleError> {
        self.bank.last_error(id)
    }

    /// Playback position in frames of the voice bound to `id`.
    pub fn sample_position(&self, id: &str) -> Option<u64> {
        self.control.lock().voices.position(id)
    }

    pub fn stats(&self) -> EngineStats {
        let control = self.control.lock();
        let bank = self.bank.stats();
        let render = self.cell.stats();
        EngineStats {
            state: control.state,
            callbacks: render.callbacks(),
            underruns: render.underruns(),
            playing_voices: control.voices.playing_count(),
            bound_voices: control.voices.bound_count(),
            free_voices: control.voices.free_count(),
            loaded_samples: bank.loaded,
            failed_samples: bank.failed,
            pending_samples: bank.pending,
            memory_bytes: bank.memory_bytes,
            retired_payloads: bank.retired,
            open_streams: usize::from(control.stream.is_some()),
        }
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        let _ = self.shutdown();
    }
}

impl fmt::Debug for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let control = self.control.lock();
        f.debug_struct("Engine")
            .field("state", &control.state)
            .field("device", &self.device.to_string())
            .field("voices", &control.voices)
            .field("bank", &self.bank)
            .finish()
    }
}
