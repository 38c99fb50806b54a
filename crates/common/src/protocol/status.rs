use serde::{Deserialize, Serialize};

use crate::models::{NodeStatus, PeerSnapshot};
use crate::utils::format_timestamp;

/// Connection status of one overlay peer, as served by the status endpoint
///
/// Every key is always present: optional values are emitted as empty strings,
/// empty arrays or zero, never omitted or null.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerStatus {
    pub name: String,

    #[serde(rename = "hostname")]
    pub host_name: String,

    pub tailscale_ips: Vec<String>,

    pub online: bool,

    /// True only when traffic flows over a direct endpoint and no relay
    pub direct: bool,

    /// Relay region carrying the traffic, empty when not relayed
    pub relayed_via: String,

    #[serde(rename = "current_address")]
    pub cur_addr: String,

    pub rx_bytes: u64,
    pub tx_bytes: u64,

    /// RFC3339, empty when never seen
    pub last_seen: String,

    /// RFC3339, empty when no handshake happened yet
    pub last_handshake: String,
}

/// Full status response: this node, its peers and the overlay backend state
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusDocument {
    #[serde(rename = "self")]
    pub self_status: PeerStatus,

    pub peers: Vec<PeerStatus>,

    pub backend_state: String,
}

/// Classify a peer link
///
/// A link is direct only with a current endpoint and no relay. Both set at once
/// is an ambiguous signal and counts as relayed.
pub fn is_direct(cur_addr: &str, relay: &str) -> bool {
    !cur_addr.is_empty() && relay.is_empty()
}

fn render_ips(peer: &PeerSnapshot) -> Vec<String> {
    peer.tailscale_ips.iter().map(|ip| ip.to_string()).collect()
}

impl PeerStatus {
    /// Project a remote peer, including link quality, counters and timestamps
    pub fn from_peer(peer: &PeerSnapshot) -> Self {
        Self {
            name: peer.dns_name.clone(),
            host_name: peer.host_name.clone(),
            tailscale_ips: render_ips(peer),
            online: peer.online,
            direct: is_direct(&peer.cur_addr, &peer.relay),
            relayed_via: peer.relay.clone(),
            cur_addr: peer.cur_addr.clone(),
            rx_bytes: peer.rx_bytes,
            tx_bytes: peer.tx_bytes,
            last_seen: format_timestamp(peer.last_seen.as_ref()),
            last_handshake: format_timestamp(peer.last_handshake.as_ref()),
        }
    }

    /// Project the local node's own record
    ///
    /// Only identity, addressing and reachability apply to the node itself;
    /// link fields stay zero-valued.
    pub fn from_self(peer: &PeerSnapshot) -> Self {
        Self {
            name: peer.dns_name.clone(),
            host_name: peer.host_name.clone(),
            tailscale_ips: render_ips(peer),
            online: peer.online,
            ..Default::default()
        }
    }
}

impl StatusDocument {
    /// Build a fresh document from a node snapshot
    ///
    /// A missing self record becomes a zero-valued `self`; peers keep the
    /// order the node reported them in.
    pub fn project(status: &NodeStatus) -> Self {
        Self {
            self_status: status
                .self_peer
                .as_ref()
                .map(PeerStatus::from_self)
                .unwrap_or_default(),
            peers: status.peers.iter().map(PeerStatus::from_peer).collect(),
            backend_state: status.backend_state.clone(),
        }
    }
}
