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
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::info;

use super::{OutputError, OutputStream};
use crate::config::EngineConfig;
use crate::render::RenderCell;

/// A mock device. Nothing is played: callbacks happen only when
/// `render_cycle` is called, which makes playback deterministic.
#[derive(Clone)]
pub struct Device {
    name: String,
    inner: Arc<Inner>,
}

#[derive(Default)]
struct Inner {
    current: Mutex<Option<Arc<StreamShared>>>,
    opened: AtomicUsize,
    live: AtomicUsize,
    fail_open: AtomicBool,
    fail_restart: AtomicBool,
}

struct StreamShared {
    cell: Arc<RenderCell>,
    playing: AtomicBool,
    samples_per_callback: usize,
}

impl Device {
    /// Gets the given mock device.
    pub fn get(name: &str) -> Device {
        Device {
            name: name.to_string(),
            inner: Arc::new(Inner::default()),
        }
    }

    /// Makes the next opens fail.
    pub fn set_fail_open(&self, fail: bool) {
        self.inner.fail_open.store(fail, Ordering::Relaxed);
    }

    /// Makes restarting a paused stream fail.
    pub fn set_fail_restart(&self, fail: bool) {
        self.inner.fail_restart.store(fail, Ordering::Relaxed);
    }

    /// Number of streams ever opened on this device.
    pub fn open_count(&self) -> usize {
        self.inner.opened.load(Ordering::Relaxed)
    }

    /// Number of streams currently open.
    pub fn live_streams(&self) -> usize {
        self.inner.live.load(Ordering::Relaxed)
    }

    /// Returns true if the current stream is playing.
    pub fn is_playing(&self) -> bool {
        self.inner
            .current
            .lock()
            .as_ref()
            .is_some_and(|stream| stream.playing.load(Ordering::Relaxed))
    }

    /// Delivers one callback to the playing stream and returns what it
    /// rendered, or `None` if no stream is playing.
    pub fn render_cycle(&self) -> Option<Vec<f32>> {
        let stream = self.inner.current.lock().clone()?;
        if !stream.playing.load(Ordering::Relaxed) {
            return None;
        }
        let mut output = vec![0.0; stream.samples_per_callback];
        stream.cell.render(&mut output);
        Some(output)
    }

    /// Delivers `count` callbacks. Returns how many were delivered.
    pub fn render_cycles(&self, count: usize) -> usize {
        (0..count)
            .take_while(|_| self.render_cycle().is_some())
            .count()
    }
}

impl super::OutputDevice for Device {
    fn open(
        &self,
        config: &EngineConfig,
        cell: Arc<RenderCell>,
    ) -> Result<Box<dyn OutputStream>, OutputError> {
        if self.inner.fail_open.load(Ordering::Relaxed) {
            return Err(OutputError::Open(format!("{} refused to open", self.name)));
        }

        let shared = Arc::new(StreamShared {
            cell,
            playing: AtomicBool::new(false),
            samples_per_callback: config.buffer_size() * config.channels() as usize,
        });
        *self.inner.current.lock() = Some(shared.clone());
        self.inner.opened.fetch_add(1, Ordering::Relaxed);
        self.inner.live.fetch_add(1, Ordering::Relaxed);

        info!(
            device = self.name,
            sample_rate = config.sample_rate(),
            buffer_size = config.buffer_size(),
            "Opened mock output stream"
        );
        Ok(Box::new(Stream {
            inner: self.inner.clone(),
            shared,
            started: false,
        }))
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (Mock)", self.name)
    }
}

struct Stream {
    inner: Arc<Inner>,
    shared: Arc<StreamShared>,
    started: bool,
}

impl OutputStream for Stream {
    fn play(&mut self) -> Result<(), OutputError> {
        if self.started && self.inner.fail_restart.load(Ordering::Relaxed) {
            return Err(OutputError::Play("mock restart failure".to_string()));
        }
        self.started = true;
        self.shared.playing.store(true, Ordering::Relaxed);
        Ok(())
    }

    fn pause(&mut self) -> Result<(), OutputError> {
        self.shared.playing.store(false, Ordering::Relaxed);
        Ok(())
    }
}

impl Drop for Stream {
    fn drop(&mut self) {
        self.shared.playing.store(false, Ordering::Relaxed);
        let mut current = self.inner.current.lock();
        if current
            .as_ref()
            .is_some_and(|stream| Arc::ptr_eq(stream, &self.shared))
        {
            *current = None;
        }
        self.inner.live.fetch_sub(1, Ordering::Relaxed);
    }
}
