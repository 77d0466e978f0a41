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

//! Voice allocation for one-shot sample playback.
//!
//! A voice has two halves. The control thread owns the `VoiceManager`, which
//! tracks which sample each voice is bound to and keeps the free list. The
//! render thread owns the mixing state. The two share one `VoiceSlot` per
//! voice: a packed generation and state word plus the playback cursor, both
//! atomics, so either side can observe the other without locking.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tracing::debug;

use crate::error::EngineError;

/// The lifecycle of a single voice.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum VoiceState {
    Idle,
    Playing,
    Finished,
}

impl VoiceState {
    fn to_bits(self) -> u64 {
        match self {
            VoiceState::Idle => 0,
            VoiceState::Playing => 1,
            VoiceState::Finished => 2,
        }
    }

    fn from_bits(bits: u64) -> VoiceState {
        match bits {
            1 => VoiceState::Playing,
            2 => VoiceState::Finished,
            _ => VoiceState::Idle,
        }
    }
}

fn pack(generation: u32, state: VoiceState) -> u64 {
    ((generation as u64) << 32) | state.to_bits()
}

fn unpack(word: u64) -> (u32, VoiceState) {
    ((word >> 32) as u32, VoiceState::from_bits(word & 0xffff_ffff))
}

/// State of one voice shared between the control and render threads.
#[derive(Default)]
pub struct VoiceSlot {
    word: AtomicU64,
    cursor: AtomicU64,
}

impl VoiceSlot {
    pub fn load(&self) -> (u32, VoiceState) {
        unpack(self.word.load(Ordering::Acquire))
    }

    pub fn store(&self, generation: u32, state: VoiceState) {
        self.word.store(pack(generation, state), Ordering::Release);
    }

    /// Moves the voice from `Playing` to `Finished` only if it is still on the
    /// given generation. Used by the render thread so it never finishes a voice
    /// that the control thread has already retriggered.
    pub fn finish_if_current(&self, generation: u32) -> bool {
        self.word
            .compare_exchange(
                pack(generation, VoiceState::Playing),
                pack(generation, VoiceState::Finished),
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }

    /// Frame cursor as last published, whatever generation wrote it.
    pub fn cursor(&self) -> u64 {
        self.cursor.load(Ordering::Acquire) & 0xffff_ffff
    }

    /// Frame cursor if it was last published for `generation`. A render
    /// callback that raced a retrigger may publish its old cursor after the
    /// reset; the generation tag keeps that value from being reported.
    pub fn cursor_for(&self, generation: u32) -> Option<u64> {
        let word = self.cursor.load(Ordering::Acquire);
        ((word >> 32) as u32 == generation).then_some(word & 0xffff_ffff)
    }

    pub fn set_cursor(&self, generation: u32, frames: u64) {
        let frames = frames.min(u32::MAX as u64);
        self.cursor
            .store(((generation as u64) << 32) | frames, Ordering::Release);
    }
}

/// Creates the shared slots for a pool of `count` voices.
pub fn voice_slots(count: usize) -> Arc<[VoiceSlot]> {
    (0..count).map(|_| VoiceSlot::default()).collect()
}

/// What the control thread remembers about a bound voice.
#[derive(Clone, Debug)]
struct Binding {
    sample_id: String,
    generation: u32,
}

/// A voice that was allocated or retriggered for a start request.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct VoiceAssignment {
    pub voice: usize,
    pub generation: u32,
    /// True if the sample already owned this voice and it was restarted.
    pub restarted: bool,
}

/// Control-side voice pool. Voices are handed out from a free list and only
/// return to it through `reclaim_finished`.
pub struct VoiceManager {
    slots: Arc<[VoiceSlot]>,
    bindings: Vec<Option<Binding>>,
    /// Voice index by sample id. At most one voice per sample.
    by_sample: HashMap<String, usize>,
    free_list: Vec<usize>,
    generations: Vec<u32>,
}

impl VoiceManager {
    pub fn new(slots: Arc<[VoiceSlot]>) -> VoiceManager {
        let count = slots.len();
        VoiceManager {
            slots,
            bindings: vec![None; count],
            by_sample: HashMap::new(),
            // Reversed so voice 0 is handed out first.
            free_list: (0..count).rev().collect(),
            generations: vec![0; count],
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn free_count(&self) -> usize {
        self.free_list.len()
    }

    /// Number of voices bound to a sample, whether still playing or waiting to
    /// be reclaimed.
    pub fn bound_count(&self) -> usize {
        self.capacity() - self.free_count()
    }

    /// Number of voices whose shared state is `Playing`.
    pub fn playing_count(&self) -> usize {
        self.slots
            .iter()
            .filter(|slot| slot.load().1 == VoiceState::Playing)
            .count()
    }

    /// The voice currently bound to `sample_id`, if any.
    pub fn voice_for(&self, sample_id: &str) -> Option<usize> {
        self.by_sample.get(sample_id).copied()
    }

    /// Playback position in frames of the voice bound to `sample_id`.
    pub fn position(&self, sample_id: &str) -> Option<u64> {
        let voice = self.voice_for(sample_id)?;
        // A cursor from an older generation means the restart has not been
        // rendered yet.
        Some(
            self.slots[voice]
                .cursor_for(self.generations[voice])
                .unwrap_or(0),
        )
    }

    /// Chooses a voice for a start request without changing anything. A
    /// sample that already owns a voice gets the same voice back with the next
    /// generation; otherwise the next free voice is used.
    pub fn plan_start(&self, sample_id: &str) -> Result<VoiceAssignment, EngineError> {
        if let Some(voice) = self.voice_for(sample_id) {
            return Ok(VoiceAssignment {
                voice,
                generation: self.generations[voice].wrapping_add(1),
                restarted: true,
            });
        }
        let voice = *self.free_list.last().ok_or(EngineError::NoFreeVoice)?;
        Ok(VoiceAssignment {
            voice,
            generation: self.generations[voice].wrapping_add(1),
            restarted: false,
        })
    }

    /// Applies a planned start. Called before the `Start` command is queued,
    /// so the render thread finds the slot already `Playing` on the new
    /// generation when the command arrives.
    pub fn commit_start(&mut self, sample_id: &str, assignment: VoiceAssignment) {
        let VoiceAssignment {
            voice, generation, ..
        } = assignment;
        if !assignment.restarted {
            self.free_list.retain(|&v| v != voice);
            self.by_sample.insert(sample_id.to_string(), voice);
        }
        self.generations[voice] = generation;
        self.bindings[voice] = Some(Binding {
            sample_id: sample_id.to_string(),
            generation,
        });
        self.slots[voice].set_cursor(generation, 0);
        self.slots[voice].store(generation, VoiceState::Playing);
        debug!(
            voice,
            generation,
            sample = sample_id,
            restarted = assignment.restarted,
            "Voice started"
        );
    }

    /// Marks the voice bound to `sample_id` finished. Returns the voice and its
    /// generation so the caller can tell the render thread.
    pub fn stop(&mut self, sample_id: &str) -> Option<(usize, u32)> {
        let voice = self.voice_for(sample_id)?;
        let generation = self.generations[voice];
        if self.slots[voice].load().1 == VoiceState::Playing {
            self.slots[voice].store(generation, VoiceState::Finished);
            debug!(voice, generation, sample = sample_id, "Voice stopped");
        }
        Some((voice, generation))
    }

    /// Marks every bound voice finished. Returns how many were playing.
    pub fn stop_all(&mut self) -> usize {
        let mut stopped = 0;
        for (voice, binding) in self.bindings.iter().enumerate() {
            if let Some(binding) = binding {
                if self.slots[voice].load() == (binding.generation, VoiceState::Playing) {
                    self.slots[voice].store(binding.generation, VoiceState::Finished);
                    stopped += 1;
                }
            }
        }
        stopped
    }

    /// Returns finished voices to the free list. A voice is only reclaimed
    /// when its shared state is `Finished` on the generation the control side
    /// last issued, so a voice that was just retriggered is left alone.
    pub fn reclaim_finished(&mut self) -> usize {
        let mut reclaimed = 0;
        for voice in 0..self.bindings.len() {
            let Some(binding) = &self.bindings[voice] else {
                continue;
            };
            if self.slots[voice].load() != (binding.generation, VoiceState::Finished) {
                continue;
            }

            debug!(
                voice,
                generation = binding.generation,
                sample = binding.sample_id,
                "Voice reclaimed"
            );
            self.by_sample.remove(&binding.sample_id);
            self.bindings[voice] = None;
            self.slots[voice].store(self.generations[voice], VoiceState::Idle);
            self.free_list.push(voice);
            reclaimed += 1;
        }
        reclaimed
    }

    /// Unbinds every voice and resets the shared state.
    pub fn clear(&mut self) {
        for (voice, slot) in self.slots.iter().enumerate() {
            slot.store(self.generations[voice], VoiceState::Idle);
            slot.set_cursor(self.generations[voice], 0);
        }
        self.bindings.iter_mut().for_each(|binding| *binding = None);
        self.by_sample.clear();
        self.free_list = (0..self.slots.len()).rev().collect();
    }
}

impl fmt::Debug for VoiceManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VoiceManager")
            .field("capacity", &self.capacity())
            .field("free", &self.free_count())
            .field("playing", &self.playing_count())
            .finish()
    }
}
