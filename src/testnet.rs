//! An in-process overlay network for local testing and demos.
//!
//! Implements [Overlay] over a shared fabric of nodes, links, and record
//! candidates. There is no routing logic here; the fabric is just enough
//! collaborator for the lifecycle orchestration to run end to end, with
//! the [crate::overlay::RecordPolicy] hook honored on put and get.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use bytes::Bytes;
use rand::Rng;

use crate::config::OverlayOptions;
use crate::overlay::{
    BootstrapError, ConnectAck, ConnectError, ConnectionDetail, GetError, NodeIdentity, Overlay,
    PeerId, PeerSnapshot, PutError, RecordPolicy,
};

const FIRST_PORT: u16 = 4001;

/// A fabric of in-process overlay nodes.
#[derive(Debug, Clone)]
pub struct Testnet {
    fabric: Arc<Mutex<Fabric>>,
}

#[derive(Debug)]
struct Fabric {
    /// Listen addresses per registered node.
    nodes: HashMap<PeerId, Vec<String>>,
    links: HashMap<PeerId, HashSet<PeerId>>,
    /// Conflicting candidates per key, resolved by the record policy.
    records: HashMap<String, Vec<Bytes>>,
    next_port: u16,
}

impl Testnet {
    pub fn new() -> Testnet {
        Testnet {
            fabric: Arc::new(Mutex::new(Fabric {
                nodes: HashMap::new(),
                links: HashMap::new(),
                records: HashMap::new(),
                next_port: FIRST_PORT,
            })),
        }
    }

    /// Registers a new node on the fabric with default options.
    pub fn node(&self) -> TestnetNode {
        self.node_with_options(OverlayOptions::default())
    }

    /// Registers a new node, keeping the record policy from `options`.
    pub fn node_with_options(&self, options: OverlayOptions) -> TestnetNode {
        let id = random_peer_id();

        let mut fabric = lock(&self.fabric);
        let port = fabric.next_port;
        fabric.next_port += 1;

        fabric
            .nodes
            .insert(id.clone(), vec![format!("/ip4/127.0.0.1/tcp/{port}")]);
        fabric.links.entry(id.clone()).or_default();

        TestnetNode {
            id,
            fabric: Arc::clone(&self.fabric),
            policy: options.record_policy,
        }
    }
}

impl Default for Testnet {
    fn default() -> Self {
        Testnet::new()
    }
}

/// A node registered on a [Testnet] fabric.
#[derive(Clone)]
pub struct TestnetNode {
    id: PeerId,
    fabric: Arc<Mutex<Fabric>>,
    policy: Arc<dyn RecordPolicy>,
}

impl TestnetNode {
    pub fn id(&self) -> &PeerId {
        &self.id
    }

    /// The node's first dialable address, for handing to other nodes.
    pub fn dial_addr(&self) -> String {
        let fabric = lock(&self.fabric);
        let addr = fabric
            .nodes
            .get(&self.id)
            .and_then(|addrs| addrs.first())
            .cloned()
            .unwrap_or_default();

        format!("{}/p2p/{}", addr, self.id)
    }
}

impl std::fmt::Debug for TestnetNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TestnetNode").field("id", &self.id).finish()
    }
}

impl Overlay for TestnetNode {
    fn identity(&self) -> NodeIdentity {
        let fabric = lock(&self.fabric);

        NodeIdentity {
            peer_id: self.id.clone(),
            listen_addrs: fabric.nodes.get(&self.id).cloned().unwrap_or_default(),
        }
    }

    fn connect(
        &self,
        addr: &str,
        peer: &PeerId,
        _timeout: Duration,
    ) -> Result<ConnectAck, ConnectError> {
        let mut fabric = lock(&self.fabric);

        if !fabric.nodes.contains_key(peer) {
            return Err(ConnectError::Unreachable(addr.to_string()));
        }

        fabric
            .links
            .entry(self.id.clone())
            .or_default()
            .insert(peer.clone());
        fabric
            .links
            .entry(peer.clone())
            .or_default()
            .insert(self.id.clone());

        Ok(ConnectAck {
            remote: peer.clone(),
        })
    }

    /// One-hop peer exchange: adopt the peers of every directly linked
    /// peer. The first node on an empty fabric bootstraps trivially.
    fn bootstrap(&self) -> Result<(), BootstrapError> {
        let mut fabric = lock(&self.fabric);

        let neighbors: Vec<PeerId> = fabric
            .links
            .get(&self.id)
            .map(|links| links.iter().cloned().collect())
            .unwrap_or_default();

        let mut discovered: HashSet<PeerId> = HashSet::new();
        for neighbor in &neighbors {
            if let Some(links) = fabric.links.get(neighbor) {
                discovered.extend(links.iter().cloned());
            }
        }
        discovered.remove(&self.id);

        for peer in discovered {
            fabric
                .links
                .entry(self.id.clone())
                .or_default()
                .insert(peer.clone());
            fabric
                .links
                .entry(peer)
                .or_default()
                .insert(self.id.clone());
        }

        Ok(())
    }

    fn peers(&self) -> PeerSnapshot {
        let fabric = lock(&self.fabric);

        let mut snapshot: Vec<PeerId> = fabric
            .links
            .get(&self.id)
            .map(|links| links.iter().cloned().collect())
            .unwrap_or_default();
        snapshot.sort();

        snapshot
    }

    fn put(&self, key: &str, value: Bytes) -> Result<(), PutError> {
        self.policy
            .validate(key, &value)
            .map_err(|rejected| PutError::Rejected(rejected.reason))?;

        let mut fabric = lock(&self.fabric);

        // Replication needs at least one peer to place a replica on.
        let peers = fabric.links.get(&self.id).map_or(0, HashSet::len);
        if peers == 0 {
            return Err(PutError::InsufficientPeers { peers });
        }

        let candidates = fabric.records.entry(key.to_string()).or_default();
        if !candidates.contains(&value) {
            candidates.push(value);
        }

        Ok(())
    }

    fn get(&self, key: &str) -> Result<Bytes, GetError> {
        let fabric = lock(&self.fabric);

        let candidates = match fabric.records.get(key) {
            Some(candidates) if !candidates.is_empty() => candidates,
            _ => return Err(GetError::NotFound(key.to_string())),
        };

        let winner = self.policy.select(key, candidates);

        candidates
            .get(winner)
            .cloned()
            .ok_or_else(|| GetError::QueryFailed(format!("selector index {winner} out of range")))
    }

    fn connections_to(&self, peer: &PeerId) -> Vec<ConnectionDetail> {
        let fabric = lock(&self.fabric);

        let linked = fabric
            .links
            .get(&self.id)
            .is_some_and(|links| links.contains(peer));
        if !linked {
            return Vec::new();
        }

        fabric
            .nodes
            .get(peer)
            .map(|addrs| {
                addrs
                    .iter()
                    .map(|addr| ConnectionDetail {
                        peer: peer.clone(),
                        remote_addr: addr.clone(),
                    })
                    .collect()
            })
            .unwrap_or_default()
    }
}

fn lock(fabric: &Mutex<Fabric>) -> MutexGuard<'_, Fabric> {
    fabric.lock().unwrap_or_else(PoisonError::into_inner)
}

fn random_peer_id() -> PeerId {
    let bytes = rand::thread_rng().gen::<[u8; 20]>();

    let mut id = String::with_capacity(40);
    for byte in bytes {
        id.push_str(&format!("{byte:02x}"));
    }

    PeerId::new(id)
}
