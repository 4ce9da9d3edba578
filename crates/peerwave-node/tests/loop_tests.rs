//! Integration tests for the run-loop lifecycle.
//!
//! Everything here drives a real node on the loopback interface with
//! short maintenance timers, so tests complete in well under a second
//! of loop time each.

use std::net::{IpAddr, Ipv4Addr};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use peerwave_node::{LoopState, Node, NodeConfig, PeerwaveError};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Loopback config with short timers and thread safety on.
fn test_config() -> NodeConfig {
    NodeConfig {
        bind_ip: IpAddr::V4(Ipv4Addr::LOCALHOST),
        thread_safe: true,
        max_iteration_interval_ms: 20,
        dht_ping_interval_ms: 100,
        dht_node_timeout_ms: 2_000,
        ..NodeConfig::default()
    }
}

fn test_node() -> Node {
    Node::new(test_config()).expect("create test node")
}

/// Installs begin/end counters updated inside the iteration bracket.
fn install_counters(node: &Node) -> (Arc<AtomicU64>, Arc<AtomicU64>) {
    let begin = Arc::new(AtomicU64::new(0));
    let end = Arc::new(AtomicU64::new(0));

    let b = Arc::clone(&begin);
    node.on_loop_begin(move || {
        b.fetch_add(1, Ordering::SeqCst);
    });
    let e = Arc::clone(&end);
    node.on_loop_end(move || {
        e.fetch_add(1, Ordering::SeqCst);
    });

    (begin, end)
}

// ---------------------------------------------------------------------------
// Lifecycle basics
// ---------------------------------------------------------------------------

#[test]
fn loop_runs_and_counters_match() {
    let node = test_node();
    let (begin, end) = install_counters(&node);

    assert_eq!(node.state(), LoopState::Idle);
    node.start_loop().expect("start");
    assert_eq!(node.state(), LoopState::Running);

    thread::sleep(Duration::from_millis(200));

    node.request_stop();
    node.join_loop().expect("join");

    assert_eq!(node.state(), LoopState::Stopped);
    let begins = begin.load(Ordering::SeqCst);
    let ends = end.load(Ordering::SeqCst);
    assert!(begins > 0, "loop never iterated");
    assert_eq!(begins, ends, "begin/end counts diverged");
}

#[test]
fn start_while_running_rejected() {
    let node = test_node();
    node.start_loop().expect("start");

    let err = node.start_loop().unwrap_err();
    assert!(matches!(err, PeerwaveError::AlreadyRunning { .. }));

    node.request_stop();
    node.join_loop().expect("join");
}

#[test]
fn start_while_stop_requested_rejected() {
    let node = test_node();
    // Hold the lock so the worker cannot reach its checkpoint and
    // flip to Stopped before the second start attempt.
    let guard = node.lock();
    node.start_loop().expect("start");
    node.request_stop();

    let err = node.start_loop().unwrap_err();
    assert!(matches!(err, PeerwaveError::AlreadyRunning { .. }));

    drop(guard);
    node.join_loop().expect("join");
}

#[test]
fn stop_before_start_is_noop() {
    let node = test_node();
    node.request_stop();
    assert_eq!(node.state(), LoopState::Idle);

    // The handle is still perfectly usable afterwards.
    node.start_loop().expect("start");
    node.request_stop();
    node.join_loop().expect("join");
}

#[test]
fn join_without_start_is_noop() {
    let node = test_node();
    node.join_loop().expect("join of never-started loop");
    assert_eq!(node.state(), LoopState::Idle);
}

#[test]
fn redundant_stop_and_join_are_safe() {
    let node = test_node();
    node.start_loop().expect("start");

    node.request_stop();
    node.request_stop();
    node.join_loop().expect("first join");
    node.join_loop().expect("second join");
    node.request_stop();

    assert_eq!(node.state(), LoopState::Stopped);
}

#[test]
fn restart_after_clean_stop() {
    let node = test_node();
    let (begin, end) = install_counters(&node);

    for _ in 0..2 {
        node.start_loop().expect("start");
        thread::sleep(Duration::from_millis(100));
        node.request_stop();
        node.join_loop().expect("join");
    }

    assert_eq!(node.state(), LoopState::Stopped);
    let begins = begin.load(Ordering::SeqCst);
    assert!(begins > 1, "second run never iterated");
    assert_eq!(begins, end.load(Ordering::SeqCst));
}

#[test]
fn stop_signal_usable_from_callback() {
    let node = test_node();
    let stop = node.stop_signal();

    // The loop stops itself from inside its own begin callback.
    node.on_loop_begin(move || stop.request_stop());

    node.start_loop().expect("start");
    node.join_loop().expect("join");
    assert_eq!(node.state(), LoopState::Stopped);
}

// ---------------------------------------------------------------------------
// Stop latency
// ---------------------------------------------------------------------------

#[test]
fn stop_interrupts_long_sleep() {
    // A 5-second iteration interval: without an interruptible sleep
    // the join below would take that long.
    let node = Node::new(NodeConfig {
        max_iteration_interval_ms: 5_000,
        ..test_config()
    })
    .expect("create node");

    node.start_loop().expect("start");
    thread::sleep(Duration::from_millis(100));

    let started = Instant::now();
    node.request_stop();
    node.join_loop().expect("join");

    assert!(
        started.elapsed() < Duration::from_secs(2),
        "stop took {:?}, sleep was not interrupted",
        started.elapsed()
    );
}

// ---------------------------------------------------------------------------
// Abnormal termination
// ---------------------------------------------------------------------------

#[test]
fn callback_panic_surfaces_as_internal_failure() {
    let node = test_node();
    node.on_loop_begin(|| panic!("deliberate test panic"));

    node.start_loop().expect("start");
    let err = node.join_loop().unwrap_err();
    assert!(matches!(err, PeerwaveError::InternalFailure { .. }));

    // The handle survives for inspection even after the bad run.
    assert_eq!(node.state(), LoopState::Stopped);
    assert_eq!(node.lock().dht_node_count(), 0);
}

// ---------------------------------------------------------------------------
// External lock discipline
// ---------------------------------------------------------------------------

#[test]
fn lock_holder_observes_quiescent_bracket() {
    let node = test_node();
    let (begin, end) = install_counters(&node);

    node.start_loop().expect("start");
    thread::sleep(Duration::from_millis(100));

    {
        let guard = node.lock();

        // No iteration is mid-bracket while we hold the lock.
        let b1 = begin.load(Ordering::SeqCst);
        let e1 = end.load(Ordering::SeqCst);
        assert_eq!(b1, e1, "observed a torn iteration under the lock");

        // And none can start: counters must stay frozen.
        thread::sleep(Duration::from_millis(150));
        assert_eq!(begin.load(Ordering::SeqCst), b1);
        assert_eq!(end.load(Ordering::SeqCst), e1);

        drop(guard);
    }

    // Released: the loop picks up again.
    thread::sleep(Duration::from_millis(150));
    assert!(begin.load(Ordering::SeqCst) > 0);

    node.request_stop();
    node.join_loop().expect("join");
    assert_eq!(begin.load(Ordering::SeqCst), end.load(Ordering::SeqCst));
}

#[test]
fn concurrent_bootstrap_stress() {
    // A live target to bootstrap against.
    let target = test_node();
    target.start_loop().expect("start target");
    let target_key = target.dht_key();
    let target_port = target.udp_port();

    let node = Arc::new(test_node());
    let (begin, end) = install_counters(&node);
    node.start_loop().expect("start");

    let mut workers = Vec::new();
    for _ in 0..4 {
        let node = Arc::clone(&node);
        workers.push(thread::spawn(move || {
            for _ in 0..25 {
                let mut guard = node.lock();
                guard
                    .bootstrap("127.0.0.1", target_port, target_key)
                    .expect("bootstrap under lock");
            }
        }));
    }
    for worker in workers {
        worker.join().expect("stress thread");
    }

    // One hundred registrations of the same peer: exactly one entry.
    assert_eq!(node.lock().dht_node_count(), 1);

    node.request_stop();
    node.join_loop().expect("join");
    target.request_stop();
    target.join_loop().expect("join target");

    let begins = begin.load(Ordering::SeqCst);
    assert!(begins > 0);
    assert_eq!(begins, end.load(Ordering::SeqCst));
}
