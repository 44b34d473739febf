//! Run-state and connectivity status shared by both connection managers.
//!
//! The run-state follows `NotStarted → Running → Stopped → Finished` within
//! one activation cycle; a new cycle may only begin from `NotStarted` or
//! `Finished`. The status is orthogonal and reflects connectivity at a point
//! in time. Both are atomics so any thread can read them without blocking.

use crate::error::Error;
use parking_lot::{Condvar, Mutex};
use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};
use std::time::{Duration, Instant};

/// Worker activity of a client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum RunState {
    /// Never started
    NotStarted = 0,
    /// Worker running
    Running = 1,
    /// Stop requested, worker still releasing resources
    Stopped = 2,
    /// Worker done; a new cycle may begin
    Finished = 3,
}

impl RunState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::NotStarted,
            1 => Self::Running,
            2 => Self::Stopped,
            _ => Self::Finished,
        }
    }

    /// Whether a new activation cycle may begin from this state.
    #[must_use]
    pub fn can_start(self) -> bool {
        matches!(self, Self::NotStarted | Self::Finished)
    }
}

/// Protocol-level connectivity of a client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ClientStatus {
    /// No session
    Disconnected = 0,
    /// Session established
    Connected = 1,
    /// Session failed; see `last_error`
    Error = 2,
}

impl ClientStatus {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::Connected,
            2 => Self::Error,
            _ => Self::Disconnected,
        }
    }
}

impl fmt::Display for ClientStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Disconnected => "disconnected",
            Self::Connected => "connected",
            Self::Error => "error",
        })
    }
}

/// Run-state, status and last failure of one client.
#[derive(Debug)]
pub struct LifecycleState {
    name: &'static str,
    run_state: AtomicU8,
    status: AtomicU8,
    last_error: Mutex<Option<Error>>,
    gate: Mutex<()>,
    changed: Condvar,
}

impl LifecycleState {
    /// Fresh state: `(NotStarted, Disconnected)`.
    #[must_use]
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            run_state: AtomicU8::new(RunState::NotStarted as u8),
            status: AtomicU8::new(ClientStatus::Disconnected as u8),
            last_error: Mutex::new(None),
            gate: Mutex::new(()),
            changed: Condvar::new(),
        }
    }

    /// Client name used in log lines.
    #[must_use]
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Current run-state.
    #[must_use]
    pub fn run_state(&self) -> RunState {
        RunState::from_u8(self.run_state.load(Ordering::Acquire))
    }

    /// Current status.
    #[must_use]
    pub fn status(&self) -> ClientStatus {
        ClientStatus::from_u8(self.status.load(Ordering::Acquire))
    }

    /// Whether the worker should keep going.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.run_state() == RunState::Running
    }

    /// Begin a new activation cycle.
    ///
    /// Returns `false` (and changes nothing) unless the run-state is
    /// `NotStarted` or `Finished`.
    pub fn begin(&self) -> bool {
        let begun = [RunState::NotStarted, RunState::Finished]
            .into_iter()
            .any(|from| {
                self.run_state
                    .compare_exchange(
                        from as u8,
                        RunState::Running as u8,
                        Ordering::AcqRel,
                        Ordering::Acquire,
                    )
                    .is_ok()
            });
        if begun {
            tracing::debug!(client = self.name, "Worker started");
            self.notify();
        }
        begun
    }

    /// Ask the worker to stop; it observes this at its next polling point.
    ///
    /// Returns `false` if the worker was not running.
    pub fn request_stop(&self) -> bool {
        let stopped = self
            .run_state
            .compare_exchange(
                RunState::Running as u8,
                RunState::Stopped as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok();
        if stopped {
            tracing::debug!(client = self.name, "Stop requested");
            self.notify();
        }
        stopped
    }

    /// Mark the worker done. Called by the worker after releasing resources.
    pub fn finish(&self) {
        self.run_state
            .store(RunState::Finished as u8, Ordering::Release);
        tracing::debug!(client = self.name, "Worker finished");
        self.notify();
    }

    /// Publish a new status.
    pub fn set_status(&self, status: ClientStatus) {
        let previous = self.status.swap(status as u8, Ordering::AcqRel);
        if previous != status as u8 {
            tracing::info!(client = self.name, %status, "Status changed");
        }
        self.notify();
    }

    /// Remember a failure as the most recent error.
    pub fn record_failure(&self, error: impl Into<Error>) {
        let error = error.into();
        tracing::error!(client = self.name, error = %error, "Client failure");
        *self.last_error.lock() = Some(error);
    }

    /// Most recent recorded failure.
    #[must_use]
    pub fn last_error(&self) -> Option<Error> {
        self.last_error.lock().clone()
    }

    /// Forget the recorded failure.
    pub fn clear_failure(&self) {
        self.last_error.lock().take();
    }

    fn notify(&self) {
        let _gate = self.gate.lock();
        self.changed.notify_all();
    }

    /// Block until `done(run_state, status)` holds or `timeout` elapses.
    ///
    /// Returns the state observed last.
    pub fn wait_for(
        &self,
        timeout: Duration,
        mut done: impl FnMut(RunState, ClientStatus) -> bool,
    ) -> (RunState, ClientStatus) {
        let deadline = Instant::now() + timeout;
        let mut gate = self.gate.lock();
        loop {
            let observed = (self.run_state(), self.status());
            if done(observed.0, observed.1) {
                return observed;
            }
            if self.changed.wait_until(&mut gate, deadline).timed_out() {
                return (self.run_state(), self.status());
            }
        }
    }

    /// Sleep for at most `slice`, waking early on a stop request.
    ///
    /// Returns whether the worker is still running.
    pub fn idle(&self, slice: Duration) -> bool {
        let (state, _) = self.wait_for(slice, |state, _| state != RunState::Running);
        state == RunState::Running
    }

    /// Block until the worker reports `Finished`, logging progress every
    /// `progress_every` so a hung worker is visible.
    pub fn wait_finished(&self, progress_every: Duration) {
        let mut waited = Duration::ZERO;
        loop {
            let (state, _) = self.wait_for(progress_every, |state, _| {
                matches!(state, RunState::Finished | RunState::NotStarted)
            });
            if matches!(state, RunState::Finished | RunState::NotStarted) {
                return;
            }
            waited += progress_every;
            tracing::info!(
                client = self.name,
                waited_ms = u64::try_from(waited.as_millis()).unwrap_or(u64::MAX),
                "Waiting for worker to finish"
            );
        }
    }
}
