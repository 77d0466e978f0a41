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
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use serial_test::serial;

use super::*;
use crate::assets::MemoryAssetSource;
use crate::error::SampleError;
use crate::output::mock;
use crate::testutil::constant_wav;

const RATE: u32 = 44100;
const BUFFER: usize = 192;

struct Fixture {
    engine: Engine,
    device: mock::Device,
    assets: MemoryAssetSource,
}

fn fixture_with(config: EngineConfig) -> Fixture {
    let device = mock::Device::get("mock-output");
    let assets = MemoryAssetSource::new();
    let engine = Engine::create(
        config,
        Arc::new(device.clone()),
        Arc::new(assets.clone()),
    )
    .expect("engine should start");
    Fixture {
        engine,
        device,
        assets,
    }
}

fn fixture() -> Fixture {
    fixture_with(EngineConfig::new(RATE, BUFFER).with_loader_threads(2))
}

#[test]
#[serial]
fn test_create_and_shutdown() {
    let Fixture { engine, device, .. } = fixture();
    assert_eq!(engine.state(), EngineState::Running);
    assert_eq!(device.live_streams(), 1);
    assert!(device.is_playing());

    engine.shutdown().unwrap();
    assert_eq!(engine.state(), EngineState::Shutdown);
    assert_eq!(device.live_streams(), 0);
    assert!(device.render_cycle().is_none());

    let stats = engine.stats();
    assert_eq!(stats.free_voices, 20);
    assert_eq!(stats.loaded_samples, 0);
    assert_eq!(stats.open_streams, 0);
}

#[test]
#[serial]
fn test_shutdown_twice() {
    let Fixture { engine, device, .. } = fixture();
    engine.shutdown().unwrap();
    engine.shutdown().unwrap();
    assert_eq!(engine.state(), EngineState::Shutdown);
    assert_eq!(device.open_count(), 1);
}

#[test]
#[serial]
fn test_single_engine_per_process() {
    let Fixture { engine, .. } = fixture();

    let second = Engine::create(
        EngineConfig::new(RATE, BUFFER),
        Arc::new(mock::Device::get("mock-other")),
        Arc::new(MemoryAssetSource::new()),
    );
    assert!(matches!(second, Err(EngineError::AlreadyCreated)));

    engine.shutdown().unwrap();
    let third = Engine::create(
        EngineConfig::new(RATE, BUFFER),
        Arc::new(mock::Device::get("mock-other")),
        Arc::new(MemoryAssetSource::new()),
    );
    assert!(third.is_ok());
}

#[test]
#[serial]
fn test_create_failure_releases_instance() {
    let device = mock::Device::get("mock-output");
    device.set_fail_open(true);
    let result = Engine::create(
        EngineConfig::new(RATE, BUFFER),
        Arc::new(device.clone()),
        Arc::new(MemoryAssetSource::new()),
    );
    assert!(matches!(result, Err(EngineError::DeviceOpenFailed(_))));

    device.set_fail_open(false);
    assert!(Engine::create(
        EngineConfig::new(RATE, BUFFER),
        Arc::new(device),
        Arc::new(MemoryAssetSource::new()),
    )
    .is_ok());
}

#[test]
#[serial]
fn test_invalid_config_rejected() {
    let result = Engine::create(
        EngineConfig::new(0, BUFFER),
        Arc::new(mock::Device::get("mock-output")),
        Arc::new(MemoryAssetSource::new()),
    );
    assert!(matches!(result, Err(EngineError::Config(_))));
}

#[test]
#[serial]
fn test_play_unknown_and_unloaded() {
    let Fixture { engine, .. } = fixture();

    let err = engine.play_sample("nope", PlayState::Start).unwrap_err();
    assert!(matches!(err, EngineError::UnknownSample(_)));

    let err = engine
        .load_samples(&[("bad", "missing.wav")])
        .unwrap_err();
    assert!(matches!(err, EngineError::LoadFailed(_)));
    assert_eq!(engine.sample_status("bad"), Some(SampleStatus::Failed));
    assert!(matches!(
        engine.sample_error("bad"),
        Some(SampleError::NotFound(_))
    ));

    let err = engine.play_sample("bad", PlayState::Start).unwrap_err();
    assert!(matches!(err, EngineError::SampleNotLoaded(_)));

    assert_eq!(engine.stats().free_voices, 20);
}

#[test]
#[serial]
fn test_kick_plays_to_completion() {
    let Fixture {
        engine,
        device,
        assets,
    } = fixture();
    assets.insert("kick.wav", constant_wav(1000, 16384, RATE));

    let summary = engine.load_samples(&[("kick", "kick.wav")]).unwrap();
    assert_eq!(summary.loaded, 1);
    assert_eq!(engine.sample_status("kick"), Some(SampleStatus::Loaded));

    engine.play_sample("kick", PlayState::Start).unwrap();
    assert_eq!(engine.stats().playing_voices, 1);

    let first = device.render_cycle().unwrap();
    assert_eq!(first.len(), BUFFER * 2);
    assert!(first.iter().all(|s| (s - 0.5).abs() < 1e-3));

    // 1000 frames at 192 frames per callback.
    assert_eq!(device.render_cycles(4), 4);
    assert_eq!(engine.stats().playing_voices, 1);
    assert_eq!(engine.sample_position("kick"), Some(960));

    let last = device.render_cycle().unwrap();
    let tail = (1000 - 960) * 2;
    assert!(last[..tail].iter().all(|s| (s - 0.5).abs() < 1e-3));
    assert!(last[tail..].iter().all(|&s| s == 0.0));
    assert_eq!(engine.stats().playing_voices, 0);

    let report = engine.tick().unwrap();
    assert_eq!(report.reclaimed_voices, 1);
    assert_eq!(engine.stats().free_voices, 20);
}

#[test]
#[serial]
fn test_double_start_restarts_same_voice() {
    let Fixture {
        engine,
        device,
        assets,
    } = fixture();
    assets.insert("snare.wav", constant_wav(4000, 8192, RATE));
    engine.load_samples(&[("snare", "snare.wav")]).unwrap();

    engine.play_sample("snare", PlayState::Start).unwrap();
    device.render_cycles(3);
    assert_eq!(engine.sample_position("snare"), Some(3 * BUFFER as u64));

    engine.play_sample("snare", PlayState::Start).unwrap();
    assert_eq!(engine.sample_position("snare"), Some(0));
    let stats = engine.stats();
    assert_eq!(stats.bound_voices, 1);
    assert_eq!(stats.playing_voices, 1);

    device.render_cycle().unwrap();
    assert_eq!(engine.sample_position("snare"), Some(BUFFER as u64));
}

#[test]
#[serial]
fn test_voice_exhaustion() {
    let Fixture {
        engine, assets, ..
    } = fixture_with(EngineConfig::new(RATE, BUFFER).with_max_voices(2));
    for id in ["a", "b", "c"] {
        assets.insert(&format!("{id}.wav"), constant_wav(500, 1000, RATE));
    }
    engine
        .load_samples(&[("a", "a.wav"), ("b", "b.wav"), ("c", "c.wav")])
        .unwrap();

    engine.play_sample("a", PlayState::Start).unwrap();
    engine.play_sample("b", PlayState::Start).unwrap();
    assert!(matches!(
        engine.play_sample("c", PlayState::Start),
        Err(EngineError::NoFreeVoice)
    ));

    engine.play_sample("a", PlayState::Stop).unwrap();
    engine.tick().unwrap();
    engine.play_sample("c", PlayState::Start).unwrap();
}

#[test]
#[serial]
fn test_stop_sample() {
    let Fixture {
        engine,
        device,
        assets,
    } = fixture();
    assets.insert("hat.wav", constant_wav(4000, 8192, RATE));
    engine.load_samples(&[("hat", "hat.wav")]).unwrap();

    // Stopping a loaded sample that is not playing is fine.
    engine.play_sample("hat", PlayState::Stop).unwrap();
    assert!(matches!(
        engine.play_sample("other", PlayState::Stop),
        Err(EngineError::UnknownSample(_))
    ));

    engine.play_sample("hat", PlayState::Start).unwrap();
    device.render_cycle().unwrap();
    engine.play_sample("hat", PlayState::Stop).unwrap();

    let output = device.render_cycle().unwrap();
    assert!(output.iter().all(|&s| s == 0.0));
    assert_eq!(engine.tick().unwrap().reclaimed_voices, 1);
}

#[test]
#[serial]
fn test_stop_all() {
    let Fixture {
        engine,
        device,
        assets,
    } = fixture();
    assets.insert("a.wav", constant_wav(4000, 1000, RATE));
    assets.insert("b.wav", constant_wav(4000, 1000, RATE));
    engine
        .load_samples(&[("a", "a.wav"), ("b", "b.wav")])
        .unwrap();
    engine.play_sample("a", PlayState::Start).unwrap();
    engine.play_sample("b", PlayState::Start).unwrap();
    device.render_cycle().unwrap();

    assert_eq!(engine.stop_all().unwrap(), 2);
    assert!(device.render_cycle().unwrap().iter().all(|&s| s == 0.0));
    assert_eq!(engine.tick().unwrap().reclaimed_voices, 2);
}

#[test]
#[serial]
fn test_pause_resume_keeps_position() {
    let Fixture {
        engine,
        device,
        assets,
    } = fixture();
    assets.insert("pad.wav", constant_wav(10_000, 8192, RATE));
    engine.load_samples(&[("pad", "pad.wav")]).unwrap();
    engine.play_sample("pad", PlayState::Start).unwrap();
    device.render_cycles(2);

    engine.pause().unwrap();
    engine.pause().unwrap();
    assert_eq!(engine.state(), EngineState::Paused);
    assert_eq!(device.render_cycles(5), 0);
    assert_eq!(engine.sample_position("pad"), Some(2 * BUFFER as u64));

    engine.resume().unwrap();
    engine.resume().unwrap();
    assert_eq!(engine.state(), EngineState::Running);
    assert_eq!(device.live_streams(), 1);
    assert_eq!(device.open_count(), 1);

    let before = engine.stats().callbacks;
    device.render_cycle().unwrap();
    assert_eq!(engine.stats().callbacks, before + 1);
    assert_eq!(engine.sample_position("pad"), Some(3 * BUFFER as u64));
}

#[test]
#[serial]
fn test_resume_reopens_stream() {
    let Fixture {
        engine,
        device,
        assets,
    } = fixture();
    assets.insert("pad.wav", constant_wav(10_000, 8192, RATE));
    engine.load_samples(&[("pad", "pad.wav")]).unwrap();
    engine.play_sample("pad", PlayState::Start).unwrap();
    device.render_cycle().unwrap();

    engine.pause().unwrap();
    device.set_fail_restart(true);
    engine.resume().unwrap();

    assert_eq!(device.open_count(), 2);
    assert_eq!(device.live_streams(), 1);
    device.render_cycle().unwrap();
    assert_eq!(engine.sample_position("pad"), Some(2 * BUFFER as u64));
}

#[test]
#[serial]
fn test_resume_failure_stays_paused() {
    let Fixture { engine, device, .. } = fixture();
    engine.pause().unwrap();
    device.set_fail_restart(true);
    device.set_fail_open(true);

    assert!(matches!(
        engine.resume(),
        Err(EngineError::DeviceRestartFailed(_))
    ));
    assert_eq!(engine.state(), EngineState::Paused);
    assert_eq!(device.live_streams(), 0);

    device.set_fail_open(false);
    engine.resume().unwrap();
    assert_eq!(engine.state(), EngineState::Running);
    assert_eq!(device.live_streams(), 1);
}

#[test]
#[serial]
fn test_partial_batch_failure() {
    let Fixture {
        engine,
        device,
        assets,
    } = fixture();
    assets.insert("b.wav", constant_wav(500, 8192, RATE));

    match engine.load_samples(&[("a", "missing.wav"), ("b", "b.wav")]) {
        Err(EngineError::LoadFailed(failures)) => {
            assert_eq!(failures.len(), 1);
            assert_eq!(failures[0].id, "a");
        }
        other => panic!("expected LoadFailed, got {other:?}"),
    }

    assert_eq!(engine.sample_status("a"), Some(SampleStatus::Failed));
    assert_eq!(engine.sample_status("b"), Some(SampleStatus::Loaded));
    engine.play_sample("b", PlayState::Start).unwrap();
    assert!(device.render_cycle().unwrap().iter().any(|&s| s != 0.0));
}

#[test]
#[serial]
fn test_duplicate_id_last_wins() {
    let Fixture {
        engine,
        device,
        assets,
    } = fixture();
    assets.insert("one.wav", constant_wav(500, 8192, RATE));
    assets.insert("two.wav", constant_wav(500, 16384, RATE));

    engine
        .load_samples(&[("x", "one.wav"), ("x", "two.wav")])
        .unwrap();
    engine.play_sample("x", PlayState::Start).unwrap();
    let output = device.render_cycle().unwrap();
    assert!((output[0] - 0.5).abs() < 1e-3);
}

#[test]
#[serial]
fn test_load_before_running_and_while_paused() {
    let Fixture {
        engine, assets, ..
    } = fixture();
    assets.insert("a.wav", constant_wav(100, 100, RATE));
    engine.pause().unwrap();
    engine.load_samples(&[("a", "a.wav")]).unwrap();
    engine.play_sample("a", PlayState::Start).unwrap();
    assert_eq!(engine.stats().playing_voices, 1);
}

#[test]
#[serial]
fn test_calls_after_shutdown_fail() {
    let Fixture {
        engine, assets, ..
    } = fixture();
    assets.insert("a.wav", constant_wav(100, 100, RATE));
    engine.load_samples(&[("a", "a.wav")]).unwrap();
    engine.shutdown().unwrap();

    for result in [
        engine.play_sample("a", PlayState::Start),
        engine.pause(),
        engine.resume(),
        engine.load_samples(&[("a", "a.wav")]).map(|_| ()),
        engine.tick().map(|_| ()),
    ] {
        assert!(matches!(
            result,
            Err(EngineError::InvalidState {
                state: EngineState::Shutdown,
                ..
            })
        ));
    }
    assert_eq!(engine.sample_status("a"), None);
}

#[test]
#[serial]
fn test_unload_lets_playing_voice_finish() {
    let Fixture {
        engine,
        device,
        assets,
    } = fixture();
    // Three callbacks long.
    assets.insert("a.wav", constant_wav(500, 8192, RATE));
    engine.load_samples(&[("a", "a.wav")]).unwrap();
    engine.play_sample("a", PlayState::Start).unwrap();
    device.render_cycle().unwrap();

    engine.unload_sample("a").unwrap();
    assert_eq!(engine.sample_status("a"), None);
    assert_eq!(engine.stats().retired_payloads, 1);
    assert!(matches!(
        engine.play_sample("a", PlayState::Start),
        Err(EngineError::UnknownSample(_))
    ));

    // The voice keeps playing from its own reference to the payload.
    let output = device.render_cycle().unwrap();
    assert!(output.iter().all(|s| (s - 0.25).abs() < 1e-3));
    assert_eq!(engine.stats().playing_voices, 1);
    assert_eq!(engine.tick().unwrap().freed_payloads, 0);

    device.render_cycle().unwrap();
    assert_eq!(engine.stats().playing_voices, 0);
    let report = engine.tick().unwrap();
    assert_eq!(report.reclaimed_voices, 1);
    assert_eq!(report.freed_payloads, 1);
    assert_eq!(engine.stats().retired_payloads, 0);

    assert!(matches!(
        engine.unload_sample("a"),
        Err(EngineError::UnknownSample(_))
    ));
}

#[test]
#[serial]
fn test_retrigger_while_paused_beyond_queue_capacity() {
    let Fixture {
        engine,
        device,
        assets,
    } = fixture_with(EngineConfig::new(RATE, BUFFER).with_command_capacity(8));
    assets.insert("kick.wav", constant_wav(1000, 16384, RATE));
    engine.load_samples(&[("kick", "kick.wav")]).unwrap();

    engine.pause().unwrap();
    for _ in 0..20 {
        engine.play_sample("kick", PlayState::Start).unwrap();
    }
    for _ in 0..20 {
        engine.play_sample("kick", PlayState::Stop).unwrap();
        engine.play_sample("kick", PlayState::Start).unwrap();
    }
    assert_eq!(engine.stats().bound_voices, 1);

    engine.resume().unwrap();
    let output = device.render_cycle().unwrap();
    assert!(output.iter().all(|s| (s - 0.5).abs() < 1e-3));
    assert_eq!(engine.sample_position("kick"), Some(BUFFER as u64));
    assert_eq!(engine.stats().playing_voices, 1);
}

#[test]
#[serial]
fn test_shutdown_waits_for_in_flight_callbacks() {
    let Fixture {
        engine, assets, ..
    } = fixture();
    assets.insert("pad.wav", constant_wav(1000, 16384, RATE));
    engine.load_samples(&[("pad", "pad.wav")]).unwrap();
    engine
        .play_sample_with("pad", PlayOptions::default().with_looping(true))
        .unwrap();
    let payload = engine.bank.payload("pad").unwrap();

    // Stands in for a backend thread that keeps calling back regardless of
    // the stream state.
    let cell = engine.cell.clone();
    let shut_down = Arc::new(AtomicBool::new(false));
    let render_thread = {
        let shut_down = shut_down.clone();
        thread::spawn(move || {
            let mut heard = false;
            let mut after_shutdown = Vec::new();
            loop {
                let done = shut_down.load(Ordering::Acquire);
                let mut output = vec![0.0; BUFFER * 2];
                cell.render(&mut output);
                if done {
                    after_shutdown.push(output);
                    if after_shutdown.len() == 10 {
                        return (heard, after_shutdown);
                    }
                } else if output.iter().any(|&s| s != 0.0) {
                    heard = true;
                }
            }
        })
    };

    let start = Instant::now();
    while engine.stats().callbacks < 50 {
        assert!(start.elapsed() < Duration::from_secs(5), "render thread stalled");
        thread::sleep(Duration::from_millis(1));
    }

    engine.shutdown().unwrap();
    shut_down.store(true, Ordering::Release);
    let (heard, after_shutdown) = render_thread.join().unwrap();

    assert!(heard);
    assert_eq!(Arc::strong_count(&payload), 1);
    for output in after_shutdown {
        assert!(output.iter().all(|&s| s == 0.0));
    }
}

#[test]
#[serial]
fn test_volume_and_looping() {
    let Fixture {
        engine,
        device,
        assets,
    } = fixture();
    assets.insert("loop.wav", constant_wav(100, 16384, RATE));
    engine.load_samples(&[("loop", "loop.wav")]).unwrap();

    engine
        .play_sample_with(
            "loop",
            PlayOptions::default().with_volume(0.5).with_looping(true),
        )
        .unwrap();
    assert_eq!(device.render_cycles(10), 10);
    let output = device.render_cycle().unwrap();
    assert!(output.iter().all(|s| (s - 0.25).abs() < 1e-3));
    assert_eq!(engine.stats().playing_voices, 1);

    engine.play_sample("loop", PlayState::Stop).unwrap();
    assert_eq!(engine.tick().unwrap().reclaimed_voices, 1);
}

#[test]
fn test_play_options_gain() {
    assert_eq!(PlayOptions::default().gain(), 1.0);
    assert_eq!(PlayOptions::default().with_volume(2.0).gain(), 1.0);
    assert_eq!(PlayOptions::default().with_volume(-1.0).gain(), 0.0);
    assert_eq!(PlayOptions::default().with_volume(f32::NAN).gain(), 1.0);
    assert_eq!(PlayState::from(true), PlayState::Start);
    assert_eq!(PlayState::from(false), PlayState::Stop);
}
