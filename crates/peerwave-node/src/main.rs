//! Peerwave daemon -- headless node for servers and VPS.
//!
//! Runs one node with its loop on the foreground process, suitable as
//! a bootstrap target or relay anchor for other nodes. The daemon runs
//! until interrupted with Ctrl+C, then stops the loop cooperatively
//! and exits once the worker has joined.
//!
//! Bootstrap and relay targets are given as `host:port:keyhex` specs,
//! e.g. `--bootstrap node.example.org:33445:ab12...ef`.

use std::net::IpAddr;
use std::process::ExitCode;

use clap::Parser;

use peerwave_node::{Node, NodeConfig, PublicKey};
use peerwave_types::{PeerwaveError, Result};

// ---------------------------------------------------------------------------
// CLI
// ---------------------------------------------------------------------------

#[derive(Debug, Parser)]
#[command(name = "peerwaved", about = "Peerwave headless node daemon")]
struct Cli {
    /// IP address to bind the UDP socket to.
    #[arg(long, default_value = "0.0.0.0")]
    bind: IpAddr,

    /// UDP port to listen on (0 = OS-assigned).
    #[arg(long, default_value_t = 9000)]
    port: u16,

    /// Bootstrap target, `host:port:keyhex` (repeatable).
    #[arg(long = "bootstrap", value_name = "TARGET")]
    bootstrap: Vec<String>,

    /// TCP relay target, `host:port:keyhex` (repeatable).
    #[arg(long = "relay", value_name = "TARGET")]
    relay: Vec<String>,
}

/// A parsed `host:port:keyhex` spec.
struct Target {
    host: String,
    port: u16,
    key: PublicKey,
}

/// Splits from the right so IPv6 hosts containing `:` survive.
fn parse_target(spec: &str) -> Result<Target> {
    let mut parts = spec.rsplitn(3, ':');
    let (key, port, host) = match (parts.next(), parts.next(), parts.next()) {
        (Some(key), Some(port), Some(host)) if !host.is_empty() => (key, port, host),
        _ => {
            return Err(PeerwaveError::InvalidAddress {
                reason: format!("expected host:port:keyhex, got '{spec}'"),
            })
        }
    };

    let port: u16 = port.parse().map_err(|_| PeerwaveError::InvalidAddress {
        reason: format!("invalid port in '{spec}'"),
    })?;

    Ok(Target {
        host: host.to_string(),
        port,
        key: key.parse()?,
    })
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let cli = Cli::parse();
    match run_daemon(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("daemon error: {e}");
            ExitCode::FAILURE
        }
    }
}

// ---------------------------------------------------------------------------
// Daemon main logic
// ---------------------------------------------------------------------------

fn run_daemon(cli: Cli) -> Result<()> {
    let config = NodeConfig {
        bind_ip: cli.bind,
        udp_port: cli.port,
        thread_safe: true,
        ..NodeConfig::default()
    };

    let node = Node::new(config)?;
    tracing::info!(
        key = %node.dht_key(),
        udp_port = node.udp_port(),
        "daemon node ready"
    );

    node.on_event(|event| {
        tracing::info!(?event, "network event");
    });

    // Registration failures are logged but not fatal: a daemon with a
    // dead bootstrap target is still useful as a listener.
    for spec in &cli.bootstrap {
        register_target(&node, spec, false);
    }
    for spec in &cli.relay {
        register_target(&node, spec, true);
    }

    node.start_loop()?;

    let stop = node.stop_signal();
    ctrlc::set_handler(move || {
        tracing::info!("interrupt received -- stopping loop");
        stop.request_stop();
    })
    .map_err(|e| PeerwaveError::InternalFailure {
        reason: format!("failed to install interrupt handler: {e}"),
    })?;

    // Blocks until Ctrl+C triggers the stop request and the worker
    // observes it at its next checkpoint.
    node.join_loop()?;

    let iterations = node.lock().iteration_count();
    tracing::info!(iterations, "daemon shut down cleanly");
    Ok(())
}

/// Parses and registers one bootstrap or relay spec, logging failures.
fn register_target(node: &Node, spec: &str, is_relay: bool) {
    match parse_target(spec) {
        Ok(target) => {
            let mut guard = node.lock();
            let outcome = if is_relay {
                guard.add_relay(&target.host, target.port, target.key)
            } else {
                guard.bootstrap(&target.host, target.port, target.key)
            };
            if let Err(e) = outcome {
                tracing::warn!(%spec, %e, "target registration failed");
            }
        }
        Err(e) => tracing::warn!(%spec, %e, "unparseable target spec"),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_target_accepts_ipv4_spec() {
        let spec = format!("198.51.100.7:33445:{}", "ab".repeat(32));
        let target = parse_target(&spec).expect("valid spec");
        assert_eq!(target.host, "198.51.100.7");
        assert_eq!(target.port, 33445);
    }

    #[test]
    fn parse_target_accepts_ipv6_host() {
        let spec = format!("2001:db8::1:9000:{}", "cd".repeat(32));
        let target = parse_target(&spec).expect("valid spec");
        assert_eq!(target.host, "2001:db8::1");
        assert_eq!(target.port, 9000);
    }

    #[test]
    fn parse_target_rejects_missing_fields() {
        assert!(parse_target("example.org:9000").is_err());
        assert!(parse_target("").is_err());
    }

    #[test]
    fn parse_target_rejects_bad_port() {
        let spec = format!("example.org:notaport:{}", "ab".repeat(32));
        assert!(parse_target(&spec).is_err());
    }

    #[test]
    fn parse_target_rejects_bad_key() {
        assert!(parse_target("example.org:9000:zzzz").is_err());
    }
}
