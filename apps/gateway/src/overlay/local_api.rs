use async_trait::async_trait;
use chrono::{DateTime, Utc};
use http::header::{CONTENT_TYPE, HOST};
use http::{Method, Request, StatusCode};
use http_body_util::BodyExt;
use mesh_sidecar_common::{NodeStatus, PeerSnapshot, Result, SidecarError, is_zero_time};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::net::IpAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::UnixStream;
use tracing::{debug, info};

use super::{StatusClient, StatusSource};
use crate::transport::send_request;
use crate::{ProxyBody, empty_body, full_body};

const LOCAL_API_HOST: &str = "local-tailscaled.sock";
const STATUS_PATH: &str = "/localapi/v0/status";
const START_PATH: &str = "/localapi/v0/start";

/// Overlay node reached through its local HTTP API on a Unix socket
#[derive(Debug, Clone)]
pub struct LocalApiNode {
    socket: PathBuf,
}

/// Parameters for bringing the node up with a pre-authorized key
#[derive(Debug, Clone, Default)]
pub struct StartOptions {
    pub auth_key: String,
    pub hostname: String,
    /// Empty keeps the node's default coordination server
    pub control_url: String,
}

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct StartRequest<'a> {
    auth_key: &'a str,
    update_prefs: StartPrefs<'a>,
}

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct StartPrefs<'a> {
    #[serde(rename = "ControlURL", skip_serializing_if = "str::is_empty")]
    control_url: &'a str,
    hostname: &'a str,
    want_running: bool,
}

/// Status document as served by the local API
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct WireStatus {
    #[serde(default)]
    backend_state: String,
    #[serde(rename = "AuthURL", default)]
    auth_url: String,
    #[serde(rename = "TailscaleIPs", default)]
    tailscale_ips: Option<Vec<IpAddr>>,
    #[serde(rename = "Self", default)]
    self_peer: Option<WirePeer>,
    /// Keyed by node public key; iteration order is the report order
    #[serde(default)]
    peer: Option<BTreeMap<String, WirePeer>>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct WirePeer {
    #[serde(rename = "DNSName", default)]
    dns_name: String,
    #[serde(default)]
    host_name: String,
    #[serde(rename = "TailscaleIPs", default)]
    tailscale_ips: Option<Vec<IpAddr>>,
    #[serde(default)]
    online: bool,
    #[serde(default)]
    cur_addr: String,
    #[serde(default)]
    relay: String,
    #[serde(default)]
    rx_bytes: u64,
    #[serde(default)]
    tx_bytes: u64,
    #[serde(default)]
    last_seen: Option<DateTime<Utc>>,
    #[serde(default)]
    last_handshake: Option<DateTime<Utc>>,
}

fn non_zero(ts: Option<DateTime<Utc>>) -> Option<DateTime<Utc>> {
    ts.filter(|t| !is_zero_time(t))
}

impl From<WirePeer> for PeerSnapshot {
    fn from(peer: WirePeer) -> Self {
        PeerSnapshot {
            dns_name: peer.dns_name,
            host_name: peer.host_name,
            tailscale_ips: peer.tailscale_ips.unwrap_or_default(),
            online: peer.online,
            cur_addr: peer.cur_addr,
            relay: peer.relay,
            rx_bytes: peer.rx_bytes,
            tx_bytes: peer.tx_bytes,
            last_seen: non_zero(peer.last_seen),
            last_handshake: non_zero(peer.last_handshake),
        }
    }
}

impl From<WireStatus> for NodeStatus {
    fn from(wire: WireStatus) -> Self {
        let mut status = NodeStatus::new(wire.backend_state);
        status.auth_url = Some(wire.auth_url).filter(|url| !url.is_empty());

        if let Some(me) = wire.self_peer {
            status = status.with_self(me.into());
        }
        // the top-level list is authoritative when present
        if let Some(ips) = wire.tailscale_ips.filter(|ips| !ips.is_empty()) {
            status.tailscale_ips = ips;
        }

        status.peers = wire
            .peer
            .unwrap_or_default()
            .into_values()
            .map(PeerSnapshot::from)
            .collect();
        status
    }
}

/// Parse a local API status body
pub(crate) fn parse_status(body: &[u8]) -> Result<NodeStatus> {
    let wire: WireStatus = serde_json::from_slice(body)?;
    Ok(wire.into())
}

impl LocalApiNode {
    pub fn new(socket: impl Into<PathBuf>) -> Self {
        Self {
            socket: socket.into(),
        }
    }

    async fn call(&self, method: Method, path: &str, body: ProxyBody) -> Result<Vec<u8>> {
        let stream = UnixStream::connect(&self.socket).await?;

        let req = Request::builder()
            .method(method)
            .uri(path)
            .header(HOST, LOCAL_API_HOST)
            .header("Sec-Tailscale", "localapi")
            .header(CONTENT_TYPE, "application/json")
            .body(body)
            .map_err(|e| SidecarError::InvalidRequest(e.to_string()))?;

        let resp = send_request(stream, req).await?;
        let status = resp.status();
        let bytes = resp
            .into_body()
            .collect()
            .await
            .map_err(|e| SidecarError::Transport(e.to_string()))?
            .to_bytes();

        if status != StatusCode::OK {
            let detail = String::from_utf8_lossy(&bytes);
            return Err(SidecarError::Transport(format!(
                "local API {} returned {}: {}",
                path,
                status,
                detail.trim()
            )));
        }

        Ok(bytes.to_vec())
    }

    /// Ask the node to log in with a pre-authorized key and start running
    pub async fn start(&self, options: &StartOptions) -> Result<()> {
        let payload = serde_json::to_vec(&StartRequest {
            auth_key: &options.auth_key,
            update_prefs: StartPrefs {
                control_url: &options.control_url,
                hostname: &options.hostname,
                want_running: true,
            },
        })?;

        info!("Starting overlay node '{}'", options.hostname);
        self.call(Method::POST, START_PATH, full_body(payload)).await?;
        Ok(())
    }
}

impl StatusSource for LocalApiNode {
    fn status_client(&self) -> Result<Arc<dyn StatusClient>> {
        if !self.socket.exists() {
            return Err(SidecarError::StatusClient(format!(
                "local API socket {} does not exist",
                self.socket.display()
            )));
        }
        Ok(Arc::new(self.clone()))
    }
}

#[async_trait]
impl StatusClient for LocalApiNode {
    async fn status(&self) -> Result<NodeStatus> {
        let body = self.call(Method::GET, STATUS_PATH, empty_body()).await?;
        let status = parse_status(&body)?;
        debug!(
            "Overlay status: {} with {} peers",
            status.backend_state,
            status.peers.len()
        );
        Ok(status)
    }
}
