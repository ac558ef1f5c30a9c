//! Rendering of a node's listen addresses into dialable address strings.

use crate::overlay::NodeIdentity;

/// Returns one fully qualified address string per listen address, each
/// suffixed with the node's own peer id (`<addr>/p2p/<peer-id>`).
///
/// Lazy and pure; an identity with zero listen addresses yields an empty
/// iterator.
pub fn dialable_addrs(identity: &NodeIdentity) -> impl Iterator<Item = String> + '_ {
    identity
        .listen_addrs
        .iter()
        .map(move |addr| format!("{}/p2p/{}", addr, identity.peer_id))
}
