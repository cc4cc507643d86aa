//! Start/stop state machine shared by the engine and the transport manager.
//!
//! ```text
//! Idle ──begin_start──► Starting ──mark_running──► Running
//!   │                      │                          │
//!   └──────────────────────┴───────begin_stop─────────┴──► Stopped
//! ```
//!
//! `begin_start` only succeeds from `Idle`, and `begin_stop` only succeeds
//! once, so repeated `start()`/`stop()` calls on the owner are harmless.

use std::fmt;

/// Lifecycle phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LifecycleState {
    #[default]
    Idle,
    Starting,
    Running,
    Stopped,
}

impl LifecycleState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Starting => "starting",
            Self::Running => "running",
            Self::Stopped => "stopped",
        }
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Guard for start/stop transitions.
#[derive(Debug, Default)]
pub struct Lifecycle {
    state: LifecycleState,
}

impl Lifecycle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> LifecycleState {
        self.state
    }

    pub fn is_running(&self) -> bool {
        self.state == LifecycleState::Running
    }

    /// `Idle → Starting`. Returns `false` in any other state.
    pub fn begin_start(&mut self) -> bool {
        if self.state != LifecycleState::Idle {
            return false;
        }
        self.state = LifecycleState::Starting;
        true
    }

    /// `Starting → Running`. Returns `false` in any other state.
    pub fn mark_running(&mut self) -> bool {
        if self.state != LifecycleState::Starting {
            return false;
        }
        self.state = LifecycleState::Running;
        true
    }

    /// Any state `→ Stopped`. Returns `false` if already stopped.
    pub fn begin_stop(&mut self) -> bool {
        if self.state == LifecycleState::Stopped {
            return false;
        }
        self.state = LifecycleState::Stopped;
        true
    }
}
