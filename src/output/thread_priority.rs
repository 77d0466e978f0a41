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
use thread_priority::{set_current_thread_priority, ThreadPriority, ThreadPriorityValue};
use tracing::{info, warn};

/// Default priority for the render callback thread when PCMBANK_THREAD_PRIORITY is unset.
const DEFAULT_CALLBACK_THREAD_PRIORITY: u8 = 70;

/// Reads PCMBANK_THREAD_PRIORITY (0-99). Called when the stream is built so
/// the callback never touches the environment.
pub(crate) fn callback_thread_priority() -> Option<ThreadPriorityValue> {
    parse_priority(std::env::var("PCMBANK_THREAD_PRIORITY").ok().as_deref())
}

fn parse_priority(value: Option<&str>) -> Option<ThreadPriorityValue> {
    let priority = value
        .and_then(|v| v.trim().parse::<u8>().ok())
        .filter(|n| *n < 100)
        .unwrap_or(DEFAULT_CALLBACK_THREAD_PRIORITY);
    ThreadPriorityValue::try_from(priority).ok()
}

fn parse_flag(value: Option<&str>) -> bool {
    value
        .map(|v| {
            v == "1"
                || v.eq_ignore_ascii_case("true")
                || v.eq_ignore_ascii_case("yes")
                || v.eq_ignore_ascii_case("on")
        })
        .unwrap_or(false)
}

/// Whether to attempt realtime (SCHED_FIFO) scheduling for the callback
/// thread. Enabled unless PCMBANK_DISABLE_RT_AUDIO is set.
pub(crate) fn rt_audio_enabled() -> bool {
    !parse_flag(std::env::var("PCMBANK_DISABLE_RT_AUDIO").ok().as_deref())
}

/// Raises the priority of the calling thread once. Meant to be called from
/// inside the first render callback; later calls return immediately.
pub(crate) fn configure_audio_thread_priority(
    priority: Option<ThreadPriorityValue>,
    rt_audio: bool,
    priority_set: &mut bool,
) {
    if *priority_set {
        return;
    }
    *priority_set = true;
    let Some(priority) = priority else {
        return;
    };

    let tp = ThreadPriority::Crossplatform(priority);
    if let Err(e) = set_current_thread_priority(tp) {
        warn!(error = ?e, "Failed to raise render thread priority");
    }

    #[cfg(unix)]
    if rt_audio {
        use thread_priority::unix::{
            set_thread_priority_and_policy, thread_native_id, RealtimeThreadSchedulePolicy,
            ThreadSchedulePolicy,
        };
        match set_thread_priority_and_policy(
            thread_native_id(),
            tp,
            ThreadSchedulePolicy::Realtime(RealtimeThreadSchedulePolicy::Fifo),
        ) {
            Ok(()) => info!("Enabled RT SCHED_FIFO for render thread"),
            Err(e) => warn!(error = %e, "Failed to set RT SCHED_FIFO for render thread"),
        }
    }

    #[cfg(not(unix))]
    let _ = rt_audio;
}
