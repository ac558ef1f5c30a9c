//! Waiting for the overlay to reach a minimum peer count.

use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, info};

use crate::overlay::Overlay;

/// Timed out before the routing table reached the minimum peer count.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("timed out waiting for at least {min} peers ({last_observed} connected)")]
pub struct WaitTimeout {
    pub min: usize,
    pub last_observed: usize,
}

/// Polls the overlay's peer snapshot until at least `min` peers are known
/// or `max_wait` elapses.
///
/// Returns the observed peer count as soon as the threshold is crossed,
/// without waiting out the deadline. `min == 0` short-circuits to
/// immediate success without sleeping. The deadline is wall-clock, so it
/// stays accurate regardless of `poll_interval`.
///
/// A timeout carries the last observed count; callers typically treat it
/// as a warning and proceed with whatever peers are available.
pub fn wait_for_min_peers(
    overlay: &impl Overlay,
    min: usize,
    max_wait: Duration,
    poll_interval: Duration,
) -> Result<usize, WaitTimeout> {
    if min == 0 {
        return Ok(overlay.peers().len());
    }

    info!(min, "Waiting for minimum peer count");

    let deadline = Instant::now() + max_wait;
    let mut last_observed = 0;

    while Instant::now() < deadline {
        let snapshot = overlay.peers();
        last_observed = snapshot.len();

        if last_observed >= min {
            info!(peers = last_observed, "Reached minimum peer count");
            return Ok(last_observed);
        }

        debug!(peers = last_observed, min, "Still below minimum peer count");
        for peer in &snapshot {
            debug!(%peer, "Connected peer");
        }

        thread::sleep(poll_interval);
    }

    Err(WaitTimeout { min, last_observed })
}
