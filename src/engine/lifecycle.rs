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
use std::sync::atomic::{AtomicBool, Ordering};

use tracing::info;

use crate::error::EngineError;

/// Set while an engine instance exists in this process.
static INSTANCE_LIVE: AtomicBool = AtomicBool::new(false);

/// The engine lifecycle.
///
/// `Uninitialized -> Created -> Running <-> Paused`, and from anywhere
/// `-> ShuttingDown -> Shutdown`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EngineState {
    Uninitialized,
    Created,
    Running,
    Paused,
    ShuttingDown,
    Shutdown,
}

impl EngineState {
    /// States in which samples may be loaded.
    pub const LOADABLE: &'static [EngineState] = &[
        EngineState::Created,
        EngineState::Running,
        EngineState::Paused,
    ];

    /// States in which voices may be started and stopped.
    pub const ACTIVE: &'static [EngineState] = &[EngineState::Running, EngineState::Paused];

    /// Fails with `InvalidState` unless the current state is one of `allowed`.
    pub fn require(
        self,
        operation: &'static str,
        allowed: &[EngineState],
    ) -> Result<(), EngineError> {
        if allowed.contains(&self) {
            Ok(())
        } else {
            Err(EngineError::InvalidState {
                operation,
                state: self,
            })
        }
    }
}

impl fmt::Display for EngineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EngineState::Uninitialized => "uninitialized",
            EngineState::Created => "created",
            EngineState::Running => "running",
            EngineState::Paused => "paused",
            EngineState::ShuttingDown => "shutting down",
            EngineState::Shutdown => "shut down",
        };
        f.write_str(name)
    }
}

/// Moves `state` to `next` and logs the transition.
pub(crate) fn transition(state: &mut EngineState, next: EngineState) {
    info!(from = %state, to = %next, "Engine state change");
    *state = next;
}

/// Proof that this is the only engine in the process. Dropping it lets
/// another engine be created.
#[derive(Debug)]
pub(crate) struct InstanceGuard(());

impl InstanceGuard {
    pub(crate) fn acquire() -> Result<InstanceGuard, EngineError> {
        INSTANCE_LIVE
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map(|_| InstanceGuard(()))
            .map_err(|_| EngineError::AlreadyCreated)
    }
}

impl Drop for InstanceGuard {
    fn drop(&mut self) {
        INSTANCE_LIVE.store(false, Ordering::Release);
    }
}
