//! TunnelHandler - Handles CONNECT requests
//!
//! The handler owns the raw client connection. It dials the requested
//! `host:port`, answers with the literal status line and then relays bytes in
//! both directions until both sides are done. Both connections are closed when
//! the handler returns, on every path.

use mesh_sidecar_common::constants::{CONNECT_BAD_GATEWAY, CONNECT_ESTABLISHED, RAW_BAD_REQUEST};
use mesh_sidecar_common::{Result, SidecarError, parse_target};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tracing::{debug, info, warn};

use crate::dialer::{Dialer, Network, dial_with_timeout};
use crate::io::pipe;

/// Byte counts of a finished tunnel
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TunnelStats {
    pub client_to_target: u64,
    pub target_to_client: u64,
}

/// Handler for a CONNECT request whose head has already been consumed
///
/// `client` must yield the bytes that followed the request head, if any.
pub async fn handle_connect<S>(
    mut client: S,
    target: &str,
    dialer: &dyn Dialer,
    dial_timeout: Option<Duration>,
    session: &str,
) -> Result<TunnelStats>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let target = match parse_target(target) {
        Ok(target) => target,
        Err(e) => {
            client.write_all(RAW_BAD_REQUEST).await?;
            let _ = client.shutdown().await;
            return Err(SidecarError::InvalidTarget(format!("{}: {}", target, e)));
        }
    };
    let address = target.to_string();

    let upstream = match dial_with_timeout(dialer, Network::Tcp, &address, dial_timeout).await {
        Ok(conn) => conn,
        Err(e) => {
            warn!("[{}] Dial failed: {}", session, e);
            client.write_all(CONNECT_BAD_GATEWAY).await?;
            let _ = client.shutdown().await;
            return Err(SidecarError::DialFailed(e.to_string()));
        }
    };

    client.write_all(CONNECT_ESTABLISHED).await?;
    client.flush().await?;
    info!("[{}] Tunnel established to {}", session, address);

    let (up, down) = pipe(client, upstream).await;
    let stats = TunnelStats {
        client_to_target: settle(session, "client -> target", up),
        target_to_client: settle(session, "target -> client", down),
    };

    debug!(
        "[{}] Tunnel to {} closed ({} bytes up, {} bytes down)",
        session, address, stats.client_to_target, stats.target_to_client
    );
    Ok(stats)
}

fn settle(session: &str, direction: &str, result: std::io::Result<u64>) -> u64 {
    match result {
        Ok(bytes) => bytes,
        Err(e) => {
            debug!("[{}] {} ended with error: {}", session, direction, e);
            0
        }
    }
}
