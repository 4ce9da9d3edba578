//! Run-loop state machine and worker thread.
//!
//! # State machine
//!
//! ```text
//! Idle ──start_loop()──▶ Running ──request_stop()──▶ StopRequested ──▶ Stopped
//! ```
//!
//! - `Idle` — handle created, loop never started.
//! - `Running` — worker thread iterating.
//! - `StopRequested` — stop signalled; the worker exits at the next
//!   top-of-iteration checkpoint.
//! - `Stopped` — worker exited. A stopped-and-joined handle may be
//!   started again.
//!
//! The worker checks the stop flag once per iteration, before the
//! begin callback, and sleeps between iterations on a condvar so a
//! stop request wakes it immediately instead of waiting out the
//! iteration interval. Worst-case stop latency is one iteration's
//! work plus wake-up overhead.
//!
//! A panic anywhere inside an iteration (engine or callbacks) is
//! caught at the worker boundary, converted into `InternalFailure`,
//! and surfaced through `join_loop` — never swallowed. The state still
//! reaches `Stopped` on that path, so the handle remains inspectable.

use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use peerwave_types::{PeerwaveError, Result};

use crate::node::NodeShared;

// ---------------------------------------------------------------------------
// LoopState
// ---------------------------------------------------------------------------

/// Lifecycle state of a node's run loop.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum LoopState {
    /// Loop never started (or handle reconstructed).
    Idle,
    /// Worker thread is iterating.
    Running,
    /// Stop signalled; worker exits at the next checkpoint.
    StopRequested,
    /// Worker thread has exited.
    Stopped,
}

impl fmt::Display for LoopState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Running => write!(f, "running"),
            Self::StopRequested => write!(f, "stop_requested"),
            Self::Stopped => write!(f, "stopped"),
        }
    }
}

// ---------------------------------------------------------------------------
// LoopControl
// ---------------------------------------------------------------------------

/// State-machine cell shared between the worker and caller threads.
///
/// Deliberately separate from the node state mutex: stop requests and
/// state queries never touch the Lifecycle Lock, so they cannot block
/// behind an in-flight iteration.
#[derive(Debug)]
pub(crate) struct LoopControl {
    state: Mutex<LoopState>,
    wake: Condvar,
}

impl LoopControl {
    pub(crate) fn new() -> Self {
        Self {
            state: Mutex::new(LoopState::Idle),
            wake: Condvar::new(),
        }
    }

    /// Current state, for inspection.
    pub(crate) fn state(&self) -> LoopState {
        *self.state.lock()
    }

    /// `Idle`/`Stopped` → `Running`.
    ///
    /// # Errors
    ///
    /// `PeerwaveError::AlreadyRunning` when the loop is `Running` or
    /// `StopRequested`.
    pub(crate) fn begin_run(&self) -> Result<()> {
        let mut state = self.state.lock();
        match *state {
            LoopState::Idle | LoopState::Stopped => {
                *state = LoopState::Running;
                Ok(())
            }
            current => Err(PeerwaveError::AlreadyRunning {
                reason: format!("start requested in state '{current}'"),
            }),
        }
    }

    /// Reverts a `begin_run` whose worker failed to spawn.
    pub(crate) fn abort_run(&self) {
        let mut state = self.state.lock();
        if *state == LoopState::Running {
            *state = LoopState::Idle;
        }
    }

    /// Signals the worker to stop. Idempotent, non-blocking, callable
    /// from any thread including the worker itself. A no-op in every
    /// state but `Running`.
    pub(crate) fn request_stop(&self) {
        let mut state = self.state.lock();
        if *state == LoopState::Running {
            *state = LoopState::StopRequested;
            self.wake.notify_all();
        }
    }

    /// The worker's top-of-iteration checkpoint.
    pub(crate) fn stop_pending(&self) -> bool {
        *self.state.lock() == LoopState::StopRequested
    }

    /// Terminal transition, set by the worker just before it exits.
    pub(crate) fn mark_stopped(&self) {
        *self.state.lock() = LoopState::Stopped;
    }

    /// Sleeps up to `dur`, waking immediately if a stop is requested.
    pub(crate) fn sleep_interruptible(&self, dur: Duration) {
        if dur.is_zero() {
            return;
        }
        let deadline = Instant::now() + dur;
        let mut state = self.state.lock();
        while *state == LoopState::Running {
            if self.wake.wait_until(&mut state, deadline).timed_out() {
                break;
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Worker
// ---------------------------------------------------------------------------

/// Entry point of the dedicated worker thread.
pub(crate) fn worker_main(shared: Arc<NodeShared>) -> Result<()> {
    tracing::debug!("loop worker started");

    let outcome = panic::catch_unwind(AssertUnwindSafe(|| run_iterations(&shared)));
    shared.control.mark_stopped();

    match outcome {
        Ok(()) => {
            tracing::debug!("loop worker exiting cleanly");
            Ok(())
        }
        Err(payload) => {
            let reason = panic_message(payload.as_ref());
            tracing::error!(reason, "loop worker panicked");
            Err(PeerwaveError::InternalFailure {
                reason: format!("loop worker panicked: {reason}"),
            })
        }
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&str>() {
        *s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.as_str()
    } else {
        "non-string panic payload"
    }
}

/// Iterates until a stop is observed at the checkpoint.
fn run_iterations(shared: &NodeShared) {
    while !shared.control.stop_pending() {
        let wait = if shared.thread_safe {
            iterate_bracketed(shared)
        } else {
            iterate_minimal(shared)
        };
        shared.control.sleep_interruptible(wait);
    }
}

/// One iteration with the state lock held across the whole bracket:
/// begin callback, engine advance, event delivery, end callback are
/// atomic with respect to external lock holders.
fn iterate_bracketed(shared: &NodeShared) -> Duration {
    let mut network = shared.network.lock();
    let mut hooks = shared.hooks.lock();

    if let Some(f) = hooks.on_begin.as_mut() {
        f();
    }
    let wait = network.advance();
    let events = network.drain_events();
    if let Some(f) = hooks.on_event.as_mut() {
        for event in events {
            f(event);
        }
    }
    if let Some(f) = hooks.on_end.as_mut() {
        f();
    }
    wait
}

/// One iteration for a handle created without thread safety: the
/// state lock is held only around the engine call, callbacks run
/// outside it.
fn iterate_minimal(shared: &NodeShared) -> Duration {
    if let Some(f) = shared.hooks.lock().on_begin.as_mut() {
        f();
    }

    let (wait, events) = {
        let mut network = shared.network.lock();
        let wait = network.advance();
        (wait, network.drain_events())
    };

    let mut hooks = shared.hooks.lock();
    if let Some(f) = hooks.on_event.as_mut() {
        for event in events {
            f(event);
        }
    }
    if let Some(f) = hooks.on_end.as_mut() {
        f();
    }
    wait
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
