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

//! The real-time render path.
//!
//! The render callback mixes every playing voice into the output buffer. It
//! never allocates, never frees a payload, never logs and never waits on a
//! lock: commands arrive through a bounded channel that is drained with
//! `try_recv`, and the renderer itself sits behind a mutex that the callback
//! only ever `try_lock`s. The control thread takes that mutex exclusively
//! once the stream is stopped, which is how shutdown knows no callback is in
//! flight.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, Sender, TrySendError};
use parking_lot::Mutex;

use crate::bank::LoadedSample;
use crate::error::EngineError;
use crate::voice::{VoiceSlot, VoiceState};

/// A control to render message.
pub enum Command {
    /// Starts (or restarts from zero) a voice on the given generation.
    Start {
        voice: usize,
        generation: u32,
        sample: Arc<LoadedSample>,
        gain: f32,
        looping: bool,
    },
    /// Silences a voice if it is still on the given generation.
    Stop { voice: usize, generation: u32 },
    /// Silences every voice.
    StopAll,
}

/// Sending half of the render command queue.
#[derive(Clone)]
pub struct CommandSender {
    sender: Sender<Command>,
}

impl CommandSender {
    /// Queues a command without blocking. A full queue leaves no side effect.
    pub fn send(&self, command: Command) -> Result<(), EngineError> {
        self.sender.try_send(command).map_err(|e| match e {
            TrySendError::Full(_) => EngineError::CommandQueueFull,
            TrySendError::Disconnected(_) => EngineError::CommandQueueFull,
        })
    }

    /// True if the next `send` will not fail for lack of space. Only
    /// meaningful with a single producer.
    pub fn has_capacity(&self) -> bool {
        !self.sender.is_full()
    }

    pub fn queued(&self) -> usize {
        self.sender.len()
    }
}

/// Counters written by the render thread and read by the control thread.
#[derive(Debug, Default)]
pub struct RenderStats {
    callbacks: AtomicU64,
    underruns: AtomicU64,
    frames: AtomicU64,
}

impl RenderStats {
    pub fn callbacks(&self) -> u64 {
        self.callbacks.load(Ordering::Relaxed)
    }

    pub fn underruns(&self) -> u64 {
        self.underruns.load(Ordering::Relaxed)
    }

    pub fn frames(&self) -> u64 {
        self.frames.load(Ordering::Relaxed)
    }

    pub fn record_underrun(&self) {
        self.underruns.fetch_add(1, Ordering::Relaxed);
    }
}

/// Render-side state of one voice.
struct ActiveVoice {
    sample: Option<Arc<LoadedSample>>,
    generation: u32,
    cursor: usize,
    gain: f32,
    looping: bool,
}

impl ActiveVoice {
    fn idle() -> ActiveVoice {
        ActiveVoice {
            sample: None,
            generation: 0,
            cursor: 0,
            gain: 1.0,
            looping: false,
        }
    }
}

/// The mixer. Owned by the render thread while the stream runs.
pub struct Renderer {
    commands: Receiver<Command>,
    voices: Vec<ActiveVoice>,
    slots: Arc<[VoiceSlot]>,
    channels: usize,
    sample_rate: u32,
    stats: Arc<RenderStats>,
}

impl Renderer {
    fn apply_commands(&mut self) -> usize {
        let mut applied = 0;
        while let Ok(command) = self.commands.try_recv() {
            applied += 1;
            match command {
                Command::Start {
                    voice,
                    generation,
                    sample,
                    gain,
                    looping,
                } => {
                    if let Some(active) = self.voices.get_mut(voice) {
                        // The previous payload is still referenced by the control side.
                        active.sample = Some(sample);
                        active.generation = generation;
                        active.cursor = 0;
                        active.gain = gain;
                        active.looping = looping;
                    }
                }
                Command::Stop { voice, generation } => {
                    if let Some(active) = self.voices.get_mut(voice) {
                        if active.generation == generation {
                            active.sample = None;
                            self.slots[voice].finish_if_current(generation);
                        }
                    }
                }
                Command::StopAll => {
                    for (voice, active) in self.voices.iter_mut().enumerate() {
                        if active.sample.take().is_some() {
                            self.slots[voice].finish_if_current(active.generation);
                        }
                    }
                }
            }
        }
        applied
    }

    /// Mixes one buffer of interleaved output.
    pub fn render(&mut self, output: &mut [f32]) {
        let start = Instant::now();
        self.apply_commands();

        output.fill(0.0);
        let channels = self.channels;
        let frames = output.len() / channels;

        for (voice, active) in self.voices.iter_mut().enumerate() {
            let Some(sample) = &active.sample else {
                continue;
            };
            // The control thread may have stopped or retriggered this voice
            // since the command was applied.
            if self.slots[voice].load() != (active.generation, VoiceState::Playing) {
                active.sample = None;
                continue;
            }

            let data = sample.data();
            let total = sample.frames();
            let source_channels = sample.channels() as usize;
            let mut written = 0;
            while written < frames {
                if active.cursor >= total {
                    if active.looping && total > 0 {
                        active.cursor = 0;
                    } else {
                        break;
                    }
                }
                let count = (total - active.cursor).min(frames - written);
                for i in 0..count {
                    let source = (active.cursor + i) * source_channels;
                    let target = (written + i) * channels;
                    for channel in 0..channels {
                        output[target + channel] +=
                            data[source + channel.min(source_channels - 1)] * active.gain;
                    }
                }
                active.cursor += count;
                written += count;
            }

            self.slots[voice].set_cursor(active.generation, active.cursor as u64);
            if !active.looping && active.cursor >= total {
                self.slots[voice].finish_if_current(active.generation);
                active.sample = None;
            }
        }

        for sample in output.iter_mut() {
            *sample = sample.clamp(-1.0, 1.0);
        }

        self.stats.callbacks.fetch_add(1, Ordering::Relaxed);
        self.stats
            .frames
            .fetch_add(frames as u64, Ordering::Relaxed);
        // The deadline follows the buffer actually delivered, which differs
        // from the configured size when the backend picks its own.
        let deadline = Duration::from_secs_f64(frames as f64 / self.sample_rate as f64);
        if start.elapsed() > deadline {
            self.stats.record_underrun();
        }
    }

    /// Drops every payload reference held by the render side, including those
    /// in queued commands. Returns the number of commands discarded.
    fn release(&mut self) -> usize {
        let discarded = self.commands.try_iter().count();
        for active in self.voices.iter_mut() {
            *active = ActiveVoice::idle();
        }
        discarded
    }
}

/// Shared handle to the renderer, given to output streams.
pub struct RenderCell {
    renderer: Mutex<Renderer>,
    stats: Arc<RenderStats>,
}

impl RenderCell {
    /// Creates the render state and the command queue feeding it.
    pub fn new(
        slots: Arc<[VoiceSlot]>,
        channels: u16,
        sample_rate: u32,
        command_capacity: usize,
    ) -> (Arc<RenderCell>, CommandSender) {
        let (sender, receiver) = crossbeam_channel::bounded(command_capacity.max(1));
        let stats = Arc::new(RenderStats::default());
        let voices = (0..slots.len()).map(|_| ActiveVoice::idle()).collect();
        let renderer = Renderer {
            commands: receiver,
            voices,
            slots,
            channels: channels.max(1) as usize,
            sample_rate: sample_rate.max(1),
            stats: stats.clone(),
        };
        (
            Arc::new(RenderCell {
                renderer: Mutex::new(renderer),
                stats,
            }),
            CommandSender { sender },
        )
    }

    /// The render callback body. Outputs silence and counts an underrun if the
    /// renderer is held by the control thread.
    pub fn render(&self, output: &mut [f32]) {
        match self.renderer.try_lock() {
            Some(mut renderer) => renderer.render(output),
            None => {
                output.fill(0.0);
                self.stats.record_underrun();
            }
        }
    }

    pub fn stats(&self) -> &Arc<RenderStats> {
        &self.stats
    }

    /// Applies queued commands from the control thread. Only for use while the
    /// stream is stopped, when no callback drains the queue. Returns the
    /// number of commands applied.
    pub fn apply_pending(&self) -> usize {
        self.renderer.lock().apply_commands()
    }

    /// Waits for any in-flight callback to return, then drops every payload
    /// reference the render side holds. Only call once the stream is stopped.
    pub fn quiesce(&self) -> usize {
        self.renderer.lock().release()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::voice::{voice_slots, VoiceManager};

    struct Harness {
        cell: Arc<RenderCell>,
        sender: CommandSender,
        manager: VoiceManager,
        slots: Arc<[VoiceSlot]>,
    }

    impl Harness {
        fn new(voices: usize, channels: u16) -> Harness {
            let slots = voice_slots(voices);
            let (cell, sender) =
                RenderCell::new(slots.clone(), channels, 44100, 16);
            Harness {
                cell,
                sender,
                manager: VoiceManager::new(slots.clone()),
                slots,
            }
        }

        fn start(&mut self, sample: &Arc<LoadedSample>, gain: f32, looping: bool) -> usize {
            let assignment = self.manager.plan_start(sample.id()).unwrap();
            self.manager.commit_start(sample.id(), assignment);
            self.sender
                .send(Command::Start {
                    voice: assignment.voice,
                    generation: assignment.generation,
                    sample: sample.clone(),
                    gain,
                    looping,
                })
                .unwrap();
            assignment.voice
        }

        fn cycle(&self, frames: usize) -> Vec<f32> {
            let mut output = vec![0.0; frames * 2];
            self.cell.render(&mut output);
            output
        }
    }

    fn mono(id: &str, values: Vec<f32>) -> Arc<LoadedSample> {
        Arc::new(LoadedSample::new(id, values, 1, 44100))
    }

    #[test]
    fn test_silence_without_voices() {
        let harness = Harness::new(2, 2);
        let output = harness.cycle(4);
        assert!(output.iter().all(|&s| s == 0.0));
        assert_eq!(harness.cell.stats().callbacks(), 1);
    }

    #[test]
    fn test_voice_finishes_after_exhaustion() {
        let mut harness = Harness::new(2, 2);
        let sample = mono("kick", vec![0.5; 10]);
        let voice = harness.start(&sample, 1.0, false);

        let output = harness.cycle(4);
        assert_eq!(output, vec![0.5; 8]);
        assert_eq!(harness.slots[voice].cursor(), 4);

        harness.cycle(4);
        assert_eq!(harness.slots[voice].load().1, VoiceState::Playing);

        // Third cycle has two frames left, then silence.
        let output = harness.cycle(4);
        assert_eq!(output, vec![0.5, 0.5, 0.5, 0.5, 0.0, 0.0, 0.0, 0.0]);
        assert_eq!(harness.slots[voice].load().1, VoiceState::Finished);
        assert_eq!(harness.manager.reclaim_finished(), 1);
    }

    #[test]
    fn test_mix_saturates() {
        let mut harness = Harness::new(2, 2);
        harness.start(&mono("a", vec![0.75; 4]), 1.0, false);
        harness.start(&mono("b", vec![0.75; 4]), 1.0, false);

        let output = harness.cycle(4);
        assert!(output.iter().all(|&s| s == 1.0));
    }

    #[test]
    fn test_gain_and_loop() {
        let mut harness = Harness::new(1, 2);
        let voice = harness.start(&mono("pad", vec![1.0, 0.0, -1.0]), 0.5, true);

        let output = harness.cycle(4);
        assert_eq!(output, vec![0.5, 0.5, 0.0, 0.0, -0.5, -0.5, 0.5, 0.5]);
        assert_eq!(harness.slots[voice].load().1, VoiceState::Playing);
        assert_eq!(harness.slots[voice].cursor(), 1);
    }

    #[test]
    fn test_stop_silences_on_next_cycle() {
        let mut harness = Harness::new(1, 2);
        let sample = mono("kick", vec![0.5; 100]);
        harness.start(&sample, 1.0, false);
        harness.cycle(4);

        let (voice, generation) = harness.manager.stop("kick").unwrap();
        harness
            .sender
            .send(Command::Stop { voice, generation })
            .unwrap();

        let output = harness.cycle(4);
        assert!(output.iter().all(|&s| s == 0.0));
        assert_eq!(harness.manager.reclaim_finished(), 1);
    }

    #[test]
    fn test_retrigger_restarts_from_zero() {
        let mut harness = Harness::new(1, 2);
        let sample = mono("kick", (0..8).map(|i| i as f32 / 10.0).collect());
        let voice = harness.start(&sample, 1.0, false);
        harness.cycle(4);
        assert_eq!(harness.slots[voice].cursor(), 4);

        harness.start(&sample, 1.0, false);
        let output = harness.cycle(2);
        assert_eq!(output[0], 0.0);
        assert!((output[2] - 0.1).abs() < 1e-6);
        assert_eq!(harness.slots[voice].cursor(), 2);
    }

    #[test]
    fn test_stop_all() {
        let mut harness = Harness::new(2, 2);
        harness.start(&mono("a", vec![0.5; 100]), 1.0, false);
        harness.start(&mono("b", vec![0.5; 100]), 1.0, true);
        harness.cycle(4);

        harness.manager.stop_all();
        harness.sender.send(Command::StopAll).unwrap();
        let output = harness.cycle(4);
        assert!(output.iter().all(|&s| s == 0.0));
        assert_eq!(harness.manager.reclaim_finished(), 2);
    }

    #[test]
    fn test_busy_renderer_outputs_silence() {
        let harness = Harness::new(1, 2);
        let guard = harness.cell.renderer.lock();
        let mut output = vec![1.0; 8];
        harness.cell.render(&mut output);
        drop(guard);

        assert!(output.iter().all(|&s| s == 0.0));
        assert_eq!(harness.cell.stats().underruns(), 1);
    }

    #[test]
    fn test_quiesce_releases_payloads() {
        let mut harness = Harness::new(2, 2);
        let sample = mono("kick", vec![0.5; 100]);
        harness.start(&sample, 1.0, false);
        harness.cycle(4);
        harness.start(&mono("snare", vec![0.5; 100]), 1.0, false);

        assert_eq!(harness.cell.quiesce(), 1);
        assert_eq!(Arc::strong_count(&sample), 1);
    }

    #[test]
    fn test_apply_pending_drains_queue() {
        let mut harness = Harness::new(1, 2);
        let first = mono("kick", vec![0.5; 100]);
        let second = mono("kick", vec![0.25; 100]);
        harness.start(&first, 1.0, false);
        harness.start(&second, 1.0, false);

        assert_eq!(harness.sender.queued(), 2);
        assert_eq!(harness.cell.apply_pending(), 2);
        assert_eq!(harness.sender.queued(), 0);
        assert_eq!(harness.cell.stats().callbacks(), 0);
        // The superseded start no longer holds its payload.
        assert_eq!(Arc::strong_count(&first), 1);

        let output = harness.cycle(4);
        assert!(output.iter().all(|&s| s == 0.25));
    }

    #[test]
    fn test_restart_resets_position() {
        let mut harness = Harness::new(1, 2);
        let sample = mono("kick", vec![0.5; 100]);
        harness.start(&sample, 1.0, false);
        harness.cycle(4);
        assert_eq!(harness.manager.position("kick"), Some(4));

        // Restart lands after the Start command was applied but before the
        // next callback sees the new generation.
        harness.start(&sample, 1.0, false);
        assert_eq!(harness.manager.position("kick"), Some(0));
        harness.cycle(4);
        assert_eq!(harness.manager.position("kick"), Some(4));
    }

    #[test]
    fn test_underrun_deadline_follows_delivered_buffer() {
        // At one frame per second a four frame buffer has four seconds.
        let (slow, _sender) = RenderCell::new(voice_slots(1), 1, 1, 1);
        slow.render(&mut [0.0; 4]);
        assert_eq!(slow.stats().underruns(), 0);

        // A buffer far larger than configured, at a rate where it only has
        // about a millisecond.
        let (fast, _sender) = RenderCell::new(voice_slots(1), 1, u32::MAX, 1);
        let mut output = vec![0.0; 1 << 22];
        fast.render(&mut output);
        assert_eq!(fast.stats().underruns(), 1);
        assert_eq!(fast.stats().frames(), 1 << 22);
    }

    #[test]
    fn test_full_queue() {
        let slots = voice_slots(1);
        let (_cell, sender) = RenderCell::new(slots, 2, 44100, 1);
        sender.send(Command::StopAll).unwrap();
        assert!(matches!(
            sender.send(Command::StopAll),
            Err(EngineError::CommandQueueFull)
        ));
        assert_eq!(sender.queued(), 1);
        assert!(!sender.has_capacity());
    }
}
