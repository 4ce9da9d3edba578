//! Node handle: construction, lifecycle, lock discipline and the
//! bootstrap surface.
//!
//! A [`Node`] owns one network identity and everything attached to it:
//! the UDP socket, the DHT liveness table, the relay registry and the
//! run-loop state machine. The loop runs on a dedicated worker thread
//! spawned by [`Node::start_loop`]; other threads interact with the
//! node between iterations by taking the external lock
//! ([`Node::lock`]) or through the convenience wrappers that take it
//! internally.
//!
//! # Locking
//!
//! Two mutexes, two jobs:
//!
//! - the **state lock** guards the network core; it is the Lifecycle
//!   Lock the loop takes around each iteration and `lock()` hands to
//!   external threads;
//! - the **hooks lock** guards callback registration, so replacing a
//!   callback is atomic and never torn mid-iteration.
//!
//! Lock order is state before hooks; no code path takes them the other
//! way round. Callbacks run with the hooks lock held (and, for a
//! thread-safe handle, the state lock too) — they must not call
//! locking node APIs and must not block indefinitely. To stop the loop
//! from inside a callback, capture a [`StopSignal`] at registration
//! time: it touches only the state-machine cell, never the locks.

use std::sync::Arc;
use std::thread::{self, JoinHandle};

use parking_lot::{Mutex, MutexGuard};

use peerwave_network::{NetworkCore, NetworkEvent};
use peerwave_types::config::NodeConfig;
use peerwave_types::{PeerwaveError, PublicKey, Result};

use crate::run_loop::{self, LoopControl, LoopState};

// ---------------------------------------------------------------------------
// LifecycleHooks
// ---------------------------------------------------------------------------

/// User-registered callbacks, invoked on the worker thread.
#[derive(Default)]
pub(crate) struct LifecycleHooks {
    /// Runs immediately before each network advance.
    pub(crate) on_begin: Option<Box<dyn FnMut() + Send>>,
    /// Runs immediately after each network advance. Paired with
    /// `on_begin`: per loop run the two are invoked the same number of
    /// times and never interleave across iterations.
    pub(crate) on_end: Option<Box<dyn FnMut() + Send>>,
    /// Receives events produced by the iteration that just ran.
    pub(crate) on_event: Option<Box<dyn FnMut(NetworkEvent) + Send>>,
}

// ---------------------------------------------------------------------------
// NodeShared
// ---------------------------------------------------------------------------

/// State shared between the handle and the worker thread.
pub(crate) struct NodeShared {
    pub(crate) control: LoopControl,
    pub(crate) network: Mutex<NetworkCore>,
    pub(crate) hooks: Mutex<LifecycleHooks>,
    pub(crate) thread_safe: bool,
}

// ---------------------------------------------------------------------------
// Node
// ---------------------------------------------------------------------------

/// One Peerwave network participant.
///
/// ```no_run
/// use peerwave_node::Node;
/// use peerwave_types::config::NodeConfig;
///
/// # fn main() -> peerwave_types::Result<()> {
/// let node = Node::new(NodeConfig {
///     thread_safe: true,
///     ..NodeConfig::default()
/// })?;
/// node.start_loop()?;
/// node.lock().bootstrap("198.51.100.7", 33445, "ab".repeat(32).parse()?)?;
/// node.request_stop();
/// node.join_loop()?;
/// # Ok(())
/// # }
/// ```
pub struct Node {
    shared: Arc<NodeShared>,
    /// Handle to the worker of the current (or last unjoined) run.
    worker: Mutex<Option<JoinHandle<Result<()>>>>,
}

impl Node {
    /// Creates a node: binds its UDP socket, generates its DHT
    /// identity and leaves the loop `Idle`.
    ///
    /// # Errors
    ///
    /// - `PeerwaveError::ConfigError` if the configuration is invalid.
    /// - `PeerwaveError::NetworkError` if the socket cannot be bound.
    pub fn new(config: NodeConfig) -> Result<Self> {
        config.validate()?;
        let network = NetworkCore::new(&config)?;

        tracing::info!(
            key = %network.dht_key(),
            udp_port = network.udp_port(),
            thread_safe = config.thread_safe,
            "node created"
        );

        Ok(Self {
            shared: Arc::new(NodeShared {
                control: LoopControl::new(),
                network: Mutex::new(network),
                hooks: Mutex::new(LifecycleHooks::default()),
                thread_safe: config.thread_safe,
            }),
            worker: Mutex::new(None),
        })
    }

    /// Current state of the run loop.
    pub fn state(&self) -> LoopState {
        self.shared.control.state()
    }

    /// Whether the handle was created with thread safety enabled.
    pub fn thread_safe(&self) -> bool {
        self.shared.thread_safe
    }

    // -----------------------------------------------------------------------
    // Callback registration
    // -----------------------------------------------------------------------

    /// Registers the callback invoked at the start of every iteration.
    ///
    /// Register before starting the loop; replacing the callback later
    /// is atomic (a running iteration sees either the old or the new
    /// one, never a torn pair).
    pub fn on_loop_begin<F>(&self, f: F)
    where
        F: FnMut() + Send + 'static,
    {
        self.shared.hooks.lock().on_begin = Some(Box::new(f));
    }

    /// Registers the callback invoked at the end of every iteration.
    pub fn on_loop_end<F>(&self, f: F)
    where
        F: FnMut() + Send + 'static,
    {
        self.shared.hooks.lock().on_end = Some(Box::new(f));
    }

    /// Registers the callback receiving network events.
    pub fn on_event<F>(&self, f: F)
    where
        F: FnMut(NetworkEvent) + Send + 'static,
    {
        self.shared.hooks.lock().on_event = Some(Box::new(f));
    }

    // -----------------------------------------------------------------------
    // Lifecycle
    // -----------------------------------------------------------------------

    /// Spawns the worker thread and returns immediately.
    ///
    /// # Errors
    ///
    /// - `PeerwaveError::AlreadyRunning` if the loop is `Running` or
    ///   `StopRequested`, or if a previous run has not been joined.
    /// - `PeerwaveError::InternalFailure` if the OS refuses to spawn
    ///   the thread (the state machine reverts to `Idle`).
    pub fn start_loop(&self) -> Result<()> {
        let mut worker = self.worker.lock();
        if worker.is_some() {
            return Err(PeerwaveError::AlreadyRunning {
                reason: "previous run has not been joined".into(),
            });
        }

        self.shared.control.begin_run()?;

        let shared = Arc::clone(&self.shared);
        let handle = thread::Builder::new()
            .name("peerwave-loop".into())
            .spawn(move || run_loop::worker_main(shared))
            .map_err(|e| {
                self.shared.control.abort_run();
                PeerwaveError::InternalFailure {
                    reason: format!("failed to spawn loop worker: {e}"),
                }
            })?;
        *worker = Some(handle);

        tracing::debug!("loop worker spawned");
        Ok(())
    }

    /// Signals the loop to stop at its next checkpoint.
    ///
    /// Idempotent and non-blocking; callable from any thread,
    /// including the worker itself (via [`StopSignal`]). Calling it
    /// before the loop ever started, or after it stopped, is a benign
    /// no-op.
    pub fn request_stop(&self) {
        self.shared.control.request_stop();
    }

    /// A cloneable handle that can request a stop without holding any
    /// node lock. Safe to capture in lifecycle callbacks.
    pub fn stop_signal(&self) -> StopSignal {
        StopSignal {
            shared: Arc::clone(&self.shared),
        }
    }

    /// Blocks until the worker thread has exited.
    ///
    /// Returning `Ok` is the authoritative signal that the node's
    /// background activity is quiescent. Call after [`request_stop`]
    /// (or after something else signalled a stop); joining a loop that
    /// was never started, or was already joined, is a benign no-op.
    ///
    /// # Errors
    ///
    /// `PeerwaveError::InternalFailure` if the worker terminated
    /// abnormally. The handle stays valid for inspection, but the loop
    /// must not be restarted after an abnormal exit.
    ///
    /// [`request_stop`]: Self::request_stop
    pub fn join_loop(&self) -> Result<()> {
        let handle = {
            let mut worker = self.worker.lock();
            worker.take()
        };
        let Some(handle) = handle else {
            return Ok(());
        };

        match handle.join() {
            Ok(result) => result,
            // worker_main catches panics itself; reaching this means
            // the unwind escaped the catch (e.g. a foreign exception).
            Err(_) => Err(PeerwaveError::InternalFailure {
                reason: "loop worker terminated without reporting an exit status".into(),
            }),
        }
    }

    // -----------------------------------------------------------------------
    // External lock
    // -----------------------------------------------------------------------

    /// Acquires the Lifecycle Lock, blocking until any in-flight
    /// iteration completes.
    ///
    /// While the guard is held the loop cannot enter its next
    /// iteration, so the observed state is exactly what the most
    /// recently completed iteration left behind. All state-touching
    /// APIs live on the guard; release is dropping it.
    ///
    /// Do not call from a lifecycle callback — the lock is not
    /// reentrant.
    pub fn lock(&self) -> NodeGuard<'_> {
        NodeGuard {
            network: self.shared.network.lock(),
        }
    }

    // -----------------------------------------------------------------------
    // Convenience wrappers
    // -----------------------------------------------------------------------

    /// [`NodeGuard::bootstrap`] under a self-acquired lock.
    pub fn bootstrap(&self, address: &str, port: u16, key: PublicKey) -> Result<()> {
        self.lock().bootstrap(address, port, key)
    }

    /// [`NodeGuard::add_relay`] under a self-acquired lock.
    pub fn add_relay(&self, address: &str, port: u16, key: PublicKey) -> Result<()> {
        self.lock().add_relay(address, port, key)
    }

    /// This node's DHT public key.
    pub fn dht_key(&self) -> PublicKey {
        self.lock().dht_key()
    }

    /// The UDP port the node is reachable on.
    pub fn udp_port(&self) -> u16 {
        self.lock().udp_port()
    }
}

impl Drop for Node {
    /// Best-effort teardown: a handle dropped while its loop runs
    /// stops and joins the worker so the thread cannot outlive the
    /// state it borrows. Errors are logged, not propagated — use
    /// [`Node::join_loop`] to observe them.
    fn drop(&mut self) {
        self.request_stop();
        let handle = self.worker.lock().take();
        if let Some(handle) = handle {
            match handle.join() {
                Ok(Ok(())) => {}
                Ok(Err(e)) => tracing::error!(%e, "loop worker failed during teardown"),
                Err(_) => tracing::error!("loop worker panicked during teardown"),
            }
        }
    }
}

// ---------------------------------------------------------------------------
// StopSignal
// ---------------------------------------------------------------------------

/// Lock-free stop handle for a node's run loop.
///
/// Holds only the state-machine cell, so it can be used from anywhere
/// — another thread, or a lifecycle callback running on the worker
/// itself — without touching the Lifecycle Lock.
#[derive(Clone)]
pub struct StopSignal {
    shared: Arc<NodeShared>,
}

impl StopSignal {
    /// Same semantics as [`Node::request_stop`].
    pub fn request_stop(&self) {
        self.shared.control.request_stop();
    }

    /// Current state of the run loop.
    pub fn state(&self) -> LoopState {
        self.shared.control.state()
    }
}

// ---------------------------------------------------------------------------
// NodeGuard
// ---------------------------------------------------------------------------

/// RAII holder of the Lifecycle Lock.
///
/// Obtained from [`Node::lock`]. Dropping the guard releases the lock
/// and lets the loop resume.
pub struct NodeGuard<'a> {
    network: MutexGuard<'a, NetworkCore>,
}

impl NodeGuard<'_> {
    /// Asks a remote node for DHT entry. See
    /// [`NetworkCore::bootstrap`](peerwave_network::NetworkCore::bootstrap).
    pub fn bootstrap(&mut self, address: &str, port: u16, key: PublicKey) -> Result<()> {
        self.network.bootstrap(address, port, key)
    }

    /// Registers a TCP relay. See
    /// [`NetworkCore::add_relay`](peerwave_network::NetworkCore::add_relay).
    pub fn add_relay(&mut self, address: &str, port: u16, key: PublicKey) -> Result<()> {
        self.network.add_relay(address, port, key)
    }

    /// This node's DHT public key.
    pub fn dht_key(&self) -> PublicKey {
        self.network.dht_key()
    }

    /// The UDP port the node is reachable on.
    pub fn udp_port(&self) -> u16 {
        self.network.udp_port()
    }

    /// Number of peers currently tracked in the DHT table.
    pub fn dht_node_count(&self) -> usize {
        self.network.dht_node_count()
    }

    /// Number of registered TCP relays.
    pub fn relay_count(&self) -> usize {
        self.network.relay_count()
    }

    /// Number of loop iterations completed so far.
    pub fn iteration_count(&self) -> u64 {
        self.network.iteration_count()
    }
}
