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
use std::thread;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use crossbeam_channel::{Receiver, Sender};
use tracing::{error, info, span, warn, Level};

use super::thread_priority::{
    callback_thread_priority, configure_audio_thread_priority, rt_audio_enabled,
};
use super::{DeviceInfo, OutputError, OutputStream};
use crate::config::EngineConfig;
use crate::render::{RenderCell, RenderStats};

/// A small wrapper around a cpal::Device.
pub struct Device {
    /// The name of the device.
    name: String,
    /// The host ID of the device.
    host_id: cpal::HostId,
    /// The underlying cpal device.
    device: cpal::Device,
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name, self.host_id.name())
    }
}

impl Device {
    /// Lists cpal output devices.
    pub fn list() -> Result<Vec<DeviceInfo>, OutputError> {
        // Suppress noisy output here.
        let _shh_stdout = shh::stdout().map_err(|e| OutputError::Open(e.to_string()))?;
        let _shh_stderr = shh::stderr().map_err(|e| OutputError::Open(e.to_string()))?;

        let mut devices = Vec::new();
        for host_id in cpal::available_hosts() {
            let host = match cpal::host_from_id(host_id) {
                Ok(host) => host,
                Err(e) => {
                    error!(err = e.to_string(), host = host_id.name(), "Unable to open host");
                    continue;
                }
            };
            let host_devices = match host.output_devices() {
                Ok(host_devices) => host_devices,
                Err(e) => {
                    error!(
                        err = e.to_string(),
                        host = host_id.name(),
                        "Unable to list devices for host"
                    );
                    continue;
                }
            };

            for device in host_devices {
                let Ok(configs) = device.supported_output_configs() else {
                    continue;
                };
                let max_channels = configs.map(|c| c.channels()).max().unwrap_or(0);
                if max_channels == 0 {
                    continue;
                }
                let Ok(name) = device.name() else {
                    continue;
                };
                devices.push(DeviceInfo {
                    name,
                    host: host_id.name().to_string(),
                    max_channels,
                });
            }
        }

        devices.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(devices)
    }

    /// Gets the given cpal device. "default" selects the default output
    /// device of the default host.
    pub fn get(name: &str) -> Result<Device, OutputError> {
        let host = cpal::default_host();
        let device = if name == "default" {
            host.default_output_device()
        } else {
            host.output_devices()
                .map_err(|e| OutputError::Open(e.to_string()))?
                .find(|device| device.name().is_ok_and(|n| n.trim() == name))
        }
        .ok_or(OutputError::NoDevice)?;

        Ok(Device {
            name: device.name().unwrap_or_else(|_| name.to_string()),
            host_id: host.id(),
            device,
        })
    }
}

impl super::OutputDevice for Device {
    fn open(
        &self,
        config: &EngineConfig,
        cell: Arc<RenderCell>,
    ) -> Result<Box<dyn OutputStream>, OutputError> {
        let span = span!(Level::INFO, "open stream (cpal)");
        let _enter = span.enter();

        let sample_format = self
            .device
            .default_output_config()
            .map_err(|e| OutputError::Open(e.to_string()))?
            .sample_format();
        let stream_config = cpal::StreamConfig {
            channels: config.channels(),
            sample_rate: cpal::SampleRate(config.sample_rate()),
            buffer_size: cpal::BufferSize::Fixed(config.buffer_size() as u32),
        };
        let scratch_len = config.buffer_size() * config.channels() as usize;

        let (control_tx, control_rx) = crossbeam_channel::unbounded::<Control>();
        let (ready_tx, ready_rx) = crossbeam_channel::bounded::<Result<(), OutputError>>(1);
        let device = self.device.clone();
        let name = self.name.clone();

        // cpal streams are not Send, so the stream lives on its own thread.
        let output_thread = thread::Builder::new()
            .name("pcmbank-output".to_string())
            .spawn(move || {
                let stream = match build_stream(
                    &device,
                    &stream_config,
                    sample_format,
                    cell,
                    scratch_len,
                ) {
                    Ok(stream) => stream,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                let _ = ready_tx.send(Ok(()));
                run_stream(stream, control_rx);
            })
            .map_err(|e| OutputError::Open(e.to_string()))?;

        match ready_rx.recv() {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                let _ = output_thread.join();
                return Err(e);
            }
            Err(_) => {
                let _ = output_thread.join();
                return Err(OutputError::Closed);
            }
        }

        info!(
            device = name,
            sample_rate = config.sample_rate(),
            buffer_size = config.buffer_size(),
            channels = config.channels(),
            format = ?sample_format,
            "Opened cpal output stream"
        );
        Ok(Box::new(Stream {
            control: control_tx,
            output_thread: Some(output_thread),
        }))
    }
}

enum Control {
    Play(Sender<Result<(), OutputError>>),
    Pause(Sender<Result<(), OutputError>>),
    Close,
}

fn run_stream(stream: cpal::Stream, control: Receiver<Control>) {
    while let Ok(message) = control.recv() {
        match message {
            Control::Play(reply) => {
                let _ = reply.send(
                    stream
                        .play()
                        .map_err(|e| OutputError::Play(e.to_string())),
                );
            }
            Control::Pause(reply) => {
                let _ = reply.send(
                    stream
                        .pause()
                        .map_err(|e| OutputError::Pause(e.to_string())),
                );
            }
            Control::Close => break,
        }
    }
    // Dropping the stream joins the backend's callback thread.
    let _ = stream.pause();
    drop(stream);
}

fn build_stream(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    sample_format: cpal::SampleFormat,
    cell: Arc<RenderCell>,
    scratch_len: usize,
) -> Result<cpal::Stream, OutputError> {
    match build_stream_with(device, config, sample_format, cell.clone(), scratch_len) {
        Ok(stream) => Ok(stream),
        Err(e) if matches!(config.buffer_size, cpal::BufferSize::Fixed(_)) => {
            warn!(
                error = %e,
                "Fixed buffer size rejected, falling back to the device default"
            );
            let config = cpal::StreamConfig {
                buffer_size: cpal::BufferSize::Default,
                ..config.clone()
            };
            build_stream_with(device, &config, sample_format, cell, scratch_len)
        }
        Err(e) => Err(e),
    }
}

fn build_stream_with(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    sample_format: cpal::SampleFormat,
    cell: Arc<RenderCell>,
    scratch_len: usize,
) -> Result<cpal::Stream, OutputError> {
    let stats = cell.stats().clone();
    let stream = match sample_format {
        cpal::SampleFormat::F32 => {
            let mut callback = f32_callback(cell);
            device.build_output_stream(
                config,
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| callback(data),
                error_callback(stats),
                None,
            )
        }
        cpal::SampleFormat::I16 => device.build_output_stream(
            config,
            converting_callback::<i16>(cell, scratch_len),
            error_callback(stats),
            None,
        ),
        cpal::SampleFormat::I32 => device.build_output_stream(
            config,
            converting_callback::<i32>(cell, scratch_len),
            error_callback(stats),
            None,
        ),
        cpal::SampleFormat::U16 => device.build_output_stream(
            config,
            converting_callback::<u16>(cell, scratch_len),
            error_callback(stats),
            None,
        ),
        other => {
            return Err(OutputError::Open(format!(
                "unsupported sample format {other:?}"
            )))
        }
    };
    stream.map_err(|e| OutputError::Open(e.to_string()))
}

fn error_callback(stats: Arc<RenderStats>) -> impl FnMut(cpal::StreamError) + Send + 'static {
    move |err| {
        stats.record_underrun();
        error!("CPAL output stream error: {}", err);
    }
}

/// f32 callback: render directly into the cpal buffer.
fn f32_callback(cell: Arc<RenderCell>) -> impl FnMut(&mut [f32]) + Send + 'static {
    let priority = callback_thread_priority();
    let rt_audio = rt_audio_enabled();
    let mut priority_set = false;
    move |data: &mut [f32]| {
        configure_audio_thread_priority(priority, rt_audio, &mut priority_set);
        cell.render(data);
    }
}

/// Integer callback: render into a preallocated scratch buffer and convert.
fn converting_callback<T>(
    cell: Arc<RenderCell>,
    scratch_len: usize,
) -> impl FnMut(&mut [T], &cpal::OutputCallbackInfo) + Send + 'static
where
    T: cpal::SizedSample + cpal::FromSample<f32>,
{
    let priority = callback_thread_priority();
    let rt_audio = rt_audio_enabled();
    let mut priority_set = false;
    let mut scratch = vec![0.0f32; scratch_len.max(1)];
    move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
        configure_audio_thread_priority(priority, rt_audio, &mut priority_set);
        for chunk in data.chunks_mut(scratch.len()) {
            let rendered = &mut scratch[..chunk.len()];
            cell.render(rendered);
            for (dst, &src) in chunk.iter_mut().zip(rendered.iter()) {
                *dst = T::from_sample(src);
            }
        }
    }
}

/// Handle to a stream living on the output thread.
struct Stream {
    control: Sender<Control>,
    output_thread: Option<thread::JoinHandle<()>>,
}

impl Stream {
    fn request(
        &self,
        message: impl FnOnce(Sender<Result<(), OutputError>>) -> Control,
    ) -> Result<(), OutputError> {
        let (reply_tx, reply_rx) = crossbeam_channel::bounded(1);
        self.control
            .send(message(reply_tx))
            .map_err(|_| OutputError::Closed)?;
        reply_rx.recv().map_err(|_| OutputError::Closed)?
    }
}

impl OutputStream for Stream {
    fn play(&mut self) -> Result<(), OutputError> {
        self.request(Control::Play)
    }

    fn pause(&mut self) -> Result<(), OutputError> {
        self.request(Control::Pause)
    }
}

impl Drop for Stream {
    fn drop(&mut self) {
        let _ = self.control.send(Control::Close);
        if let Some(thread) = self.output_thread.take() {
            let _ = thread.join();
        }
    }
}
