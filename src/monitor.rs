//! Indefinite connectivity monitoring, the terminal state of a running
//! node.

use std::time::Duration;

use tracing::{debug, info};

use crate::overlay::Overlay;

/// Polls the overlay every `tick_interval`, reporting the current peer
/// set and per-connection transport details: one observation per
/// (peer, connection) pair.
///
/// Nothing inside the loop is fatal; an empty peer set or a peer with
/// zero connections is a valid, reportable state. The loop has no
/// natural termination and runs until the `shutdown` channel fires or
/// its sender is dropped; waiting on that channel doubles as the tick
/// sleep.
pub fn run(overlay: &impl Overlay, tick_interval: Duration, shutdown: &flume::Receiver<()>) {
    loop {
        tick(overlay);

        match shutdown.recv_timeout(tick_interval) {
            Err(flume::RecvTimeoutError::Timeout) => {}
            Ok(()) | Err(flume::RecvTimeoutError::Disconnected) => {
                info!("Connectivity monitor shutting down");
                return;
            }
        }
    }
}

/// A single monitoring observation.
fn tick(overlay: &impl Overlay) {
    let snapshot = overlay.peers();

    info!(peers = snapshot.len(), "Connectivity report");

    for peer in &snapshot {
        let connections = overlay.connections_to(peer);

        if connections.is_empty() {
            debug!(%peer, "No active connections");
            continue;
        }

        for connection in connections {
            info!(peer = %connection.peer, remote = %connection.remote_addr, "Active connection");
        }
    }
}
