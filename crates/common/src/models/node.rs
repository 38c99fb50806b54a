use chrono::{DateTime, Utc};
use std::net::IpAddr;

/// Point-in-time snapshot of the overlay node, as reported by its status client
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NodeStatus {
    /// State of the node's own state machine ("Running", "Stopped", "NeedsLogin", ...)
    pub backend_state: String,

    /// Interactive login URL, present while the node waits for authentication
    pub auth_url: Option<String>,

    /// Overlay addresses assigned to this node
    pub tailscale_ips: Vec<IpAddr>,

    /// This node's own record, if the node reported one
    pub self_peer: Option<PeerSnapshot>,

    /// Known peers in the order the node reported them
    pub peers: Vec<PeerSnapshot>,
}

impl NodeStatus {
    /// Create an empty snapshot with the given backend state
    pub fn new(backend_state: impl Into<String>) -> Self {
        Self {
            backend_state: backend_state.into(),
            ..Default::default()
        }
    }

    /// Attach this node's own record
    pub fn with_self(mut self, peer: PeerSnapshot) -> Self {
        self.tailscale_ips = peer.tailscale_ips.clone();
        self.self_peer = Some(peer);
        self
    }

    /// Append a peer, keeping report order
    pub fn with_peer(mut self, peer: PeerSnapshot) -> Self {
        self.peers.push(peer);
        self
    }

    /// Check whether the node has reached the given backend state
    pub fn is_state(&self, state: &str) -> bool {
        self.backend_state == state
    }
}

/// One overlay peer as seen by the local node
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PeerSnapshot {
    /// Fully qualified overlay DNS name
    pub dns_name: String,

    /// Short host name the peer registered with
    pub host_name: String,

    pub tailscale_ips: Vec<IpAddr>,

    pub online: bool,

    /// Endpoint currently used for direct traffic, empty if none
    pub cur_addr: String,

    /// Relay region carrying the traffic, empty if none
    pub relay: String,

    pub rx_bytes: u64,
    pub tx_bytes: u64,

    /// None or the zero instant when never seen
    pub last_seen: Option<DateTime<Utc>>,

    /// None or the zero instant when no handshake happened yet
    pub last_handshake: Option<DateTime<Utc>>,
}

impl PeerSnapshot {
    /// Create a peer record with identity fields only
    pub fn new(dns_name: impl Into<String>, host_name: impl Into<String>) -> Self {
        Self {
            dns_name: dns_name.into(),
            host_name: host_name.into(),
            ..Default::default()
        }
    }
}
