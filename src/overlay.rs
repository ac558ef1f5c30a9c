//! The overlay network collaborator contract.
//!
//! The DHT overlay (routing table maintenance, iterative lookups, record
//! replication, NAT traversal) lives outside this crate. Everything the
//! orchestration layer needs from it is captured by the [Overlay] trait:
//! identity, a bootstrap operation, a peer snapshot, a connect operation,
//! and put/get for key/value records.

use std::fmt::{self, Display, Formatter};
use std::time::Duration;

use bytes::Bytes;

/// Opaque identifier of a peer in the overlay.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PeerId(String);

impl PeerId {
    pub fn new(id: impl Into<String>) -> PeerId {
        PeerId(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for PeerId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PeerId {
    fn from(id: &str) -> PeerId {
        PeerId(id.to_string())
    }
}

/// A node's identity: its peer id and the addresses it listens on.
///
/// Owned by the overlay and immutable after node creation; this crate only
/// reads it to render display strings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeIdentity {
    pub peer_id: PeerId,
    pub listen_addrs: Vec<String>,
}

/// Acknowledgment of a successful bootstrap connection, carrying the
/// remote peer's identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectAck {
    pub remote: PeerId,
}

/// A (peer, remote address) pair observed during a monitoring tick.
/// Not retained between ticks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionDetail {
    pub peer: PeerId,
    pub remote_addr: String,
}

/// Point-in-time view of the peers known to the overlay's routing table.
/// Re-queried on every poll; never a subscription.
pub type PeerSnapshot = Vec<PeerId>;

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ConnectError {
    #[error("connection attempt timed out after {0:?}")]
    Timeout(Duration),
    #[error("connection refused by {0}")]
    Refused(String),
    #[error("peer unreachable: {0}")]
    Unreachable(String),
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum BootstrapError {
    #[error("no known peers to bootstrap from")]
    NoKnownPeers,
    #[error("bootstrap query failed: {0}")]
    QueryFailed(String),
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum PutError {
    /// The overlay could not place enough replicas for the record.
    #[error("not enough peers to replicate the record ({peers} connected)")]
    InsufficientPeers { peers: usize },
    #[error("record rejected by validator: {0}")]
    Rejected(String),
    #[error("put query failed: {0}")]
    QueryFailed(String),
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum GetError {
    #[error("no record found for key {0:?}")]
    NotFound(String),
    #[error("get query failed: {0}")]
    QueryFailed(String),
}

/// The overlay network collaborator, treated as a black box.
///
/// Implementations own and internally synchronize their routing and
/// connection tables; this crate never mutates them directly.
pub trait Overlay: Send + Sync + 'static {
    /// This node's identity. Immutable after node creation.
    fn identity(&self) -> NodeIdentity;

    /// Issue a single connection attempt to a peer at `addr`.
    ///
    /// On success the overlay's connection table is updated and an
    /// acknowledgment carrying the remote identity is returned. No retry
    /// happens inside this operation.
    fn connect(
        &self,
        addr: &str,
        peer: &PeerId,
        timeout: Duration,
    ) -> Result<ConnectAck, ConnectError>;

    /// Trigger the overlay's bootstrap procedure.
    fn bootstrap(&self) -> Result<(), BootstrapError>;

    /// Snapshot of the peers currently known to the routing table.
    fn peers(&self) -> PeerSnapshot;

    /// Store a key/value record in the overlay.
    fn put(&self, key: &str, value: Bytes) -> Result<(), PutError>;

    /// Look up the value stored under `key`.
    fn get(&self, key: &str) -> Result<Bytes, GetError>;

    /// Active connections to a given peer. Empty when none exist, which
    /// is a valid state, not an error.
    fn connections_to(&self, peer: &PeerId) -> Vec<ConnectionDetail>;
}

/// Record validation/selection policy handed to the overlay.
///
/// Injectable so stricter validation can be substituted without touching
/// the orchestrator.
pub trait RecordPolicy: Send + Sync {
    /// Decide whether a record may be stored under `key`.
    fn validate(&self, key: &str, value: &[u8]) -> Result<(), RecordRejected>;

    /// Pick the index of the winning candidate among conflicting values.
    ///
    /// `candidates` is never empty when this is called.
    fn select(&self, key: &str, candidates: &[Bytes]) -> usize;
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("{reason}")]
pub struct RecordRejected {
    pub reason: String,
}

/// Accepts every record and always selects the first candidate.
#[derive(Debug, Default, Clone, Copy)]
pub struct PassthroughPolicy;

impl RecordPolicy for PassthroughPolicy {
    fn validate(&self, _key: &str, _value: &[u8]) -> Result<(), RecordRejected> {
        Ok(())
    }

    fn select(&self, _key: &str, _candidates: &[Bytes]) -> usize {
        0
    }
}

#[cfg(test)]
pub(crate) mod scripted {
    //! A scripted overlay double for unit tests: peer snapshots and put
    //! results are played back in order, and call counts are recorded.

    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    use super::*;

    pub(crate) struct ScriptedOverlay {
        identity: NodeIdentity,
        /// Peer counts to report, one per `peers()` call; the last entry
        /// repeats once the script runs out.
        peer_counts: Mutex<Vec<usize>>,
        put_results: Mutex<Vec<Result<(), PutError>>>,
        get_result: Mutex<Option<Result<Bytes, GetError>>>,
        pub(crate) put_calls: AtomicUsize,
        pub(crate) peers_calls: AtomicUsize,
        pub(crate) connect_result: Mutex<Result<ConnectAck, ConnectError>>,
        pub(crate) bootstrap_result: Mutex<Result<(), BootstrapError>>,
    }

    impl ScriptedOverlay {
        pub(crate) fn new() -> ScriptedOverlay {
            ScriptedOverlay {
                identity: NodeIdentity {
                    peer_id: PeerId::new("scripted-node"),
                    listen_addrs: vec!["/ip4/127.0.0.1/tcp/4001".to_string()],
                },
                peer_counts: Mutex::new(vec![0]),
                put_results: Mutex::new(Vec::new()),
                get_result: Mutex::new(None),
                put_calls: AtomicUsize::new(0),
                peers_calls: AtomicUsize::new(0),
                connect_result: Mutex::new(Ok(ConnectAck {
                    remote: PeerId::new("remote"),
                })),
                bootstrap_result: Mutex::new(Ok(())),
            }
        }

        pub(crate) fn with_peer_counts(self, counts: &[usize]) -> Self {
            *self.peer_counts.lock().expect("poisoned") = counts.to_vec();
            self
        }

        pub(crate) fn with_put_results(self, results: Vec<Result<(), PutError>>) -> Self {
            *self.put_results.lock().expect("poisoned") = results;
            self
        }

        pub(crate) fn with_get_result(self, result: Result<Bytes, GetError>) -> Self {
            *self.get_result.lock().expect("poisoned") = Some(result);
            self
        }
    }

    impl Overlay for ScriptedOverlay {
        fn identity(&self) -> NodeIdentity {
            self.identity.clone()
        }

        fn connect(
            &self,
            _addr: &str,
            _peer: &PeerId,
            _timeout: Duration,
        ) -> Result<ConnectAck, ConnectError> {
            self.connect_result.lock().expect("poisoned").clone()
        }

        fn bootstrap(&self) -> Result<(), BootstrapError> {
            self.bootstrap_result.lock().expect("poisoned").clone()
        }

        fn peers(&self) -> PeerSnapshot {
            let call = self.peers_calls.fetch_add(1, Ordering::SeqCst);
            let counts = self.peer_counts.lock().expect("poisoned");
            let count = *counts.get(call).or(counts.last()).unwrap_or(&0);
            (0..count)
                .map(|i| PeerId::new(format!("peer-{i}")))
                .collect()
        }

        fn put(&self, _key: &str, _value: Bytes) -> Result<(), PutError> {
            let call = self.put_calls.fetch_add(1, Ordering::SeqCst);
            let results = self.put_results.lock().expect("poisoned");
            results
                .get(call)
                .or(results.last())
                .cloned()
                .unwrap_or(Ok(()))
        }

        fn get(&self, key: &str) -> Result<Bytes, GetError> {
            self.get_result
                .lock()
                .expect("poisoned")
                .clone()
                .unwrap_or_else(|| Err(GetError::NotFound(key.to_string())))
        }

        fn connections_to(&self, peer: &PeerId) -> Vec<ConnectionDetail> {
            vec![ConnectionDetail {
                peer: peer.clone(),
                remote_addr: "/ip4/127.0.0.1/tcp/4002".to_string(),
            }]
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn passthrough_policy_accepts_and_selects_first() {
        let policy = PassthroughPolicy;

        policy
            .validate("/myapp/test", b"anything")
            .expect("passthrough never rejects");

        let candidates = vec![Bytes::from_static(b"a"), Bytes::from_static(b"b")];
        assert_eq!(policy.select("/myapp/test", &candidates), 0);
    }

    #[test]
    fn peer_id_display_roundtrip() {
        let id = PeerId::new("12D3KooWExample");
        assert_eq!(id.to_string(), "12D3KooWExample");
        assert_eq!(id.as_str(), "12D3KooWExample");
    }
}
