//! Peerwave node runtime.
//!
//! The run-loop core of a Peerwave participant: the [`Node`] handle,
//! the lifecycle state machine driving a dedicated worker thread, and
//! the lock discipline that lets other threads call node APIs between
//! iterations.
//!
//! - [`node`] — the [`Node`] handle, external lock and bootstrap
//!   surface
//! - [`run_loop`] — [`LoopState`] machine and the worker thread
//!
//! The network collaborators live in `peerwave-network`; shared types
//! and configuration in `peerwave-types`.

pub mod node;
pub mod run_loop;

pub use crate::node::{Node, NodeGuard, StopSignal};
pub use crate::run_loop::LoopState;

pub use peerwave_network::NetworkEvent;
pub use peerwave_types::config::NodeConfig;
pub use peerwave_types::{PeerwaveError, PublicKey, Result};
