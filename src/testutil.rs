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
use std::io::Cursor;

use hound::{SampleFormat, WavSpec, WavWriter};

/// Encodes planar 16 bit channels as an in-memory WAV file.
pub fn wav_bytes(channels: &[Vec<i16>], sample_rate: u32) -> Vec<u8> {
    let mut bytes = Vec::new();
    {
        let mut writer = WavWriter::new(
            Cursor::new(&mut bytes),
            WavSpec {
                channels: channels.len() as u16,
                sample_rate,
                bits_per_sample: 16,
                sample_format: SampleFormat::Int,
            },
        )
        .unwrap();

        let frames = channels.first().map(|c| c.len()).unwrap_or(0);
        for frame in 0..frames {
            for channel in channels {
                writer.write_sample(channel[frame]).unwrap();
            }
        }
        writer.finalize().unwrap();
    }
    bytes
}

/// A mono WAV with the given number of frames, every sample at `value`.
pub fn constant_wav(frames: usize, value: i16, sample_rate: u32) -> Vec<u8> {
    wav_bytes(&[vec![value; frames]], sample_rate)
}

/// Encodes interleaved 32 bit float samples as an in-memory WAV file.
pub fn float_wav_bytes(samples: &[f32], channels: u16, sample_rate: u32) -> Vec<u8> {
    let mut bytes = Vec::new();
    {
        let mut writer = WavWriter::new(
            Cursor::new(&mut bytes),
            WavSpec {
                channels,
                sample_rate,
                bits_per_sample: 32,
                sample_format: SampleFormat::Float,
            },
        )
        .unwrap();
        for sample in samples {
            writer.write_sample(*sample).unwrap();
        }
        writer.finalize().unwrap();
    }
    bytes
}
