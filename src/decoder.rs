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

//! Decoding of packaged audio containers into the engine's internal PCM format.
//!
//! Every decoded sample is interleaved f32 at the engine's sample rate and
//! channel count, so the render thread never converts anything.

use std::io::Cursor;
use std::path::Path;

use symphonia::core::audio::{AudioBuffer, AudioBufferRef, Signal};
use symphonia::core::codecs::{Decoder, DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::{FormatOptions, FormatReader, Packet};
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use symphonia::core::sample::Sample;
use symphonia::default::{get_codecs, get_probe};
use tracing::debug;

use crate::error::SampleError;

/// The PCM format every sample is converted to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PcmFormat {
    pub sample_rate: u32,
    pub channels: u16,
}

/// Decoded, converted audio.
#[derive(Debug)]
pub struct DecodedAudio {
    /// Interleaved samples in the target format.
    pub samples: Vec<f32>,
    /// Format of the source container before conversion.
    pub source: PcmFormat,
}

impl DecodedAudio {
    pub fn frames(&self, channels: u16) -> usize {
        self.samples.len() / channels.max(1) as usize
    }
}

/// Decodes a complete container held in memory and converts it to `target`.
/// The path is used for format hints and error reporting only.
pub fn decode(path: &str, bytes: Vec<u8>, target: PcmFormat) -> Result<DecodedAudio, SampleError> {
    let decode_error = |reason: String| SampleError::Decode {
        path: path.to_string(),
        reason,
    };

    let mss = MediaSourceStream::new(Box::new(Cursor::new(bytes)), Default::default());

    let mut hint = Hint::new();
    if let Some(extension) = Path::new(path).extension().and_then(|ext| ext.to_str()) {
        hint.with_extension(extension);
    }

    let probed = get_probe()
        .format(
            &hint,
            mss,
            &FormatOptions::default(),
            &MetadataOptions::default(),
        )
        .map_err(|e| decode_error(e.to_string()))?;
    let mut format_reader = probed.format;

    let track = format_reader
        .tracks()
        .iter()
        .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
        .ok_or_else(|| decode_error("no audio track found".to_string()))?;
    let track_id = track.id;
    let params = track.codec_params.clone();

    let sample_rate = params
        .sample_rate
        .ok_or_else(|| decode_error("sample rate not specified".to_string()))?;

    let mut decoder = get_codecs()
        .make(&params, &DecoderOptions::default())
        .map_err(|e| decode_error(e.to_string()))?;

    let mut channels = params.channels.map(|c| c.count()).unwrap_or(0);
    let mut interleaved = Vec::new();
    while let Some((samples, decoded_channels)) =
        next_packet_samples(format_reader.as_mut(), decoder.as_mut(), track_id)
            .map_err(|e| decode_error(e.to_string()))?
    {
        // Containers without channel metadata report it on the first buffer.
        if channels == 0 {
            channels = decoded_channels;
        }
        interleaved.extend_from_slice(&samples);
    }

    if channels == 0 || interleaved.is_empty() {
        return Err(SampleError::Empty(path.to_string()));
    }

    let source = PcmFormat {
        sample_rate,
        channels: channels as u16,
    };
    let mixed = convert_channels(&interleaved, source.channels, target.channels);
    let samples = if source.sample_rate != target.sample_rate {
        debug!(
            path,
            source_rate = source.sample_rate,
            target_rate = target.sample_rate,
            "Resampling sample"
        );
        resample_linear(&mixed, target.channels, source.sample_rate, target.sample_rate)
    } else {
        mixed
    };

    Ok(DecodedAudio { samples, source })
}

/// Reads the next packet for the track and decodes it. Returns `Ok(None)` at
/// end of stream. Some decoders signal the end with a decode error rather than
/// an EOF, so both are treated as the end.
fn next_packet_samples(
    format_reader: &mut dyn FormatReader,
    decoder: &mut dyn Decoder,
    track_id: u32,
) -> Result<Option<(Vec<f32>, usize)>, SymphoniaError> {
    loop {
        let packet: Packet = match format_reader.next_packet() {
            Ok(packet) => packet,
            Err(SymphoniaError::ResetRequired) => {
                decoder.reset();
                continue;
            }
            Err(SymphoniaError::IoError(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                return Ok(None)
            }
            Err(SymphoniaError::DecodeError(_)) => return Ok(None),
            Err(e) => return Err(e),
        };
        if packet.track_id() != track_id {
            continue;
        }

        let decoded = match decoder.decode(&packet) {
            Ok(decoded) => decoded,
            Err(SymphoniaError::ResetRequired) => {
                decoder.reset();
                decoder.decode(&packet)?
            }
            Err(SymphoniaError::DecodeError(reason)) => {
                debug!(reason, "Skipping undecodable packet");
                continue;
            }
            Err(e) => return Err(e),
        };

        let (samples, channels) = buffer_to_f32(decoded);
        // Header packets can decode to zero frames.
        if channels > 0 && !samples.is_empty() {
            return Ok(Some((samples, channels)));
        }
    }
}

fn buffer_to_f32(decoded: AudioBufferRef) -> (Vec<f32>, usize) {
    match decoded {
        AudioBufferRef::F32(buf) => interleave(&buf),
        AudioBufferRef::F64(buf) => interleave(&buf),
        AudioBufferRef::S8(buf) => interleave(&buf),
        AudioBufferRef::S16(buf) => interleave(&buf),
        AudioBufferRef::S24(buf) => interleave(&buf),
        AudioBufferRef::S32(buf) => interleave(&buf),
        AudioBufferRef::U8(buf) => interleave(&buf),
        AudioBufferRef::U16(buf) => interleave(&buf),
        AudioBufferRef::U24(buf) => interleave(&buf),
        AudioBufferRef::U32(buf) => interleave(&buf),
    }
}

/// Interleaves a planar buffer, scaling every sample into -1.0..1.0.
fn interleave<T>(buf: &AudioBuffer<T>) -> (Vec<f32>, usize)
where
    T: Sample + symphonia::core::conv::IntoSample<f32>,
{
    let frames = buf.frames();
    let channels = buf.spec().channels.count();
    let planes = buf.planes();
    let planes = planes.planes();
    let mut samples = Vec::with_capacity(frames * channels);
    for frame in 0..frames {
        for plane in planes.iter().take(channels) {
            samples.push(plane[frame].into_sample());
        }
    }
    (samples, channels)
}

/// Converts interleaved audio between channel counts. Downmixing to mono
/// averages all source channels; upmixing duplicates mono into every output
/// channel; otherwise extra source channels are dropped.
pub fn convert_channels(samples: &[f32], from: u16, to: u16) -> Vec<f32> {
    let from = from.max(1) as usize;
    let to = to.max(1) as usize;
    if from == to {
        return samples.to_vec();
    }

    let frames = samples.len() / from;
    let mut output = Vec::with_capacity(frames * to);
    for frame in samples.chunks_exact(from) {
        if to == 1 {
            output.push(frame.iter().sum::<f32>() / from as f32);
        } else if from == 1 {
            output.extend(std::iter::repeat(frame[0]).take(to));
        } else {
            for channel in 0..to {
                output.push(frame.get(channel).copied().unwrap_or(0.0));
            }
        }
    }
    output
}

/// Resamples interleaved audio using linear interpolation. Good enough for
/// one-shots, and cheap enough to run during loading.
pub fn resample_linear(samples: &[f32], channels: u16, source_rate: u32, target_rate: u32) -> Vec<f32> {
    let channels = channels.max(1) as usize;
    let ratio = target_rate as f64 / source_rate as f64;
    let source_frames = samples.len() / channels;
    let target_frames = (source_frames as f64 * ratio).ceil() as usize;

    let mut output = Vec::with_capacity(target_frames * channels);
    for target_frame in 0..target_frames {
        let source_pos = target_frame as f64 / ratio;
        let source_frame = source_pos.floor() as usize;
        let frac = source_pos.fract() as f32;

        for channel in 0..channels {
            let s0 = samples
                .get(source_frame * channels + channel)
                .copied()
                .unwrap_or(0.0);
            let s1 = samples
                .get((source_frame + 1) * channels + channel)
                .copied()
                .unwrap_or(s0);
            output.push(s0 + (s1 - s0) * frac);
        }
    }
    output
}
