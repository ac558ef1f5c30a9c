//! Bootstrap target parsing and the initial connection handshake.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use tracing::debug;

use crate::config::ConfigError;
use crate::overlay::{ConnectAck, ConnectError, Overlay, PeerId};

/// A parsed bootstrap peer: a dialable address plus the peer's identity.
///
/// Absent when the node itself is a bootstrap node; required otherwise.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BootstrapTarget {
    pub addr: String,
    pub peer: PeerId,
}

impl BootstrapTarget {
    /// Parses a `<addr>/p2p/<peer-id>` address string.
    ///
    /// Malformed input is a configuration error, rejected before any
    /// network operation is attempted.
    pub fn parse(addr: &str) -> Result<BootstrapTarget, ConfigError> {
        let invalid = |reason: &str| ConfigError::InvalidBootstrapAddr {
            addr: addr.to_string(),
            reason: reason.to_string(),
        };

        let (transport, peer) = addr
            .rsplit_once("/p2p/")
            .ok_or_else(|| invalid("missing /p2p/<peer-id> suffix"))?;

        if transport.is_empty() {
            return Err(invalid("missing transport address"));
        }
        if peer.is_empty() || peer.contains('/') {
            return Err(invalid("malformed peer id"));
        }

        Ok(BootstrapTarget {
            addr: transport.to_string(),
            peer: PeerId::new(peer),
        })
    }
}

/// Establishes the initial connection to a known bootstrap peer.
#[derive(Debug, Clone)]
pub struct BootstrapConnector<O> {
    overlay: Arc<O>,
}

impl<O: Overlay> BootstrapConnector<O> {
    pub fn new(overlay: Arc<O>) -> BootstrapConnector<O> {
        BootstrapConnector { overlay }
    }

    /// Issues exactly one connection attempt to the target peer.
    ///
    /// The attempt runs on a short-lived worker thread and is awaited
    /// before returning, isolating its blocking I/O without sharing any
    /// mutable state. Retry policy, if any, belongs to the caller.
    pub fn connect(
        &self,
        target: &BootstrapTarget,
        timeout: Duration,
    ) -> Result<ConnectAck, ConnectError> {
        let (sender, receiver) = flume::bounded::<Result<ConnectAck, ConnectError>>(1);

        let overlay = Arc::clone(&self.overlay);
        let target = target.clone();

        debug!(addr = %target.addr, peer = %target.peer, "Connecting to bootstrap node");

        thread::spawn(move || {
            let _ = sender.send(overlay.connect(&target.addr, &target.peer, timeout));
        });

        receiver
            .recv()
            .unwrap_or_else(|_| Err(ConnectError::Unreachable("connect task died".to_string())))
    }
}
