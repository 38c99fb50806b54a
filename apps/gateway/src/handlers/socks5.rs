//! Socks5Handler - Serves one SOCKS5 client session (RFC 1928)
//!
//! Only the anonymous method and the CONNECT command are offered. The target
//! is handed to the shared dialer unresolved, so overlay names are resolved on
//! the overlay side.

use mesh_sidecar_common::{Result, SidecarError};
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, info, warn};

use super::tunnel::TunnelStats;
use crate::dialer::{Dialer, Network, dial_with_timeout};
use crate::io::pipe;

const SOCKS_VERSION: u8 = 0x05;
const METHOD_NO_AUTH: u8 = 0x00;
const METHOD_NONE_ACCEPTABLE: u8 = 0xFF;

const CMD_CONNECT: u8 = 0x01;

const ATYP_IPV4: u8 = 0x01;
const ATYP_DOMAIN: u8 = 0x03;
const ATYP_IPV6: u8 = 0x04;

pub const REPLY_SUCCEEDED: u8 = 0x00;
pub const REPLY_GENERAL_FAILURE: u8 = 0x01;
pub const REPLY_COMMAND_NOT_SUPPORTED: u8 = 0x07;
pub const REPLY_ADDRESS_TYPE_NOT_SUPPORTED: u8 = 0x08;

/// Reply with `BND.ADDR` 0.0.0.0:0; the overlay connection exposes no local address
fn reply(code: u8) -> [u8; 10] {
    [SOCKS_VERSION, code, 0x00, ATYP_IPV4, 0, 0, 0, 0, 0, 0]
}

async fn send_reply<S>(client: &mut S, code: u8) -> Result<()>
where
    S: AsyncWrite + Unpin,
{
    client.write_all(&reply(code)).await?;
    client.flush().await?;
    Ok(())
}

/// Negotiate the authentication method; only "no authentication" is accepted
async fn negotiate<S>(client: &mut S) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut header = [0u8; 2];
    client.read_exact(&mut header).await?;
    if header[0] != SOCKS_VERSION {
        return Err(SidecarError::Socks5(format!(
            "unsupported version {:#04x}",
            header[0]
        )));
    }

    let mut methods = vec![0u8; header[1] as usize];
    client.read_exact(&mut methods).await?;

    if !methods.contains(&METHOD_NO_AUTH) {
        client
            .write_all(&[SOCKS_VERSION, METHOD_NONE_ACCEPTABLE])
            .await?;
        return Err(SidecarError::Socks5(
            "client offered no acceptable authentication method".to_string(),
        ));
    }

    client.write_all(&[SOCKS_VERSION, METHOD_NO_AUTH]).await?;
    Ok(())
}

/// Read the destination of a request as a dialable `host:port`
///
/// Returns `Ok(None)` after replying 0x08 to an unknown address type.
async fn read_destination<S>(client: &mut S, atyp: u8) -> Result<Option<String>>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let host = match atyp {
        ATYP_IPV4 => {
            let mut octets = [0u8; 4];
            client.read_exact(&mut octets).await?;
            Ipv4Addr::from(octets).to_string()
        }
        ATYP_IPV6 => {
            let mut octets = [0u8; 16];
            client.read_exact(&mut octets).await?;
            let port = client.read_u16().await?;
            return Ok(Some(
                SocketAddr::from((Ipv6Addr::from(octets), port)).to_string(),
            ));
        }
        ATYP_DOMAIN => {
            let len = client.read_u8().await? as usize;
            let mut name = vec![0u8; len];
            client.read_exact(&mut name).await?;
            match String::from_utf8(name) {
                Ok(name) if !name.is_empty() => name,
                _ => {
                    send_reply(client, REPLY_GENERAL_FAILURE).await?;
                    return Err(SidecarError::Socks5("invalid domain name".to_string()));
                }
            }
        }
        other => {
            send_reply(client, REPLY_ADDRESS_TYPE_NOT_SUPPORTED).await?;
            debug!("Unsupported SOCKS5 address type {:#04x}", other);
            return Ok(None);
        }
    };

    let port = client.read_u16().await?;
    Ok(Some(format!("{}:{}", host, port)))
}

/// Handler for one accepted SOCKS5 connection
pub async fn handle_socks5<S>(
    mut client: S,
    dialer: &dyn Dialer,
    dial_timeout: Option<Duration>,
    session: &str,
) -> Result<TunnelStats>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    negotiate(&mut client).await?;

    let mut request = [0u8; 4];
    client.read_exact(&mut request).await?;
    let [version, command, _reserved, atyp] = request;
    if version != SOCKS_VERSION {
        return Err(SidecarError::Socks5(format!(
            "unsupported version {:#04x} in request",
            version
        )));
    }

    let Some(target) = read_destination(&mut client, atyp).await? else {
        return Err(SidecarError::Socks5(format!(
            "unsupported address type {:#04x}",
            atyp
        )));
    };

    if command != CMD_CONNECT {
        send_reply(&mut client, REPLY_COMMAND_NOT_SUPPORTED).await?;
        return Err(SidecarError::Socks5(format!(
            "unsupported command {:#04x} for {}",
            command, target
        )));
    }

    info!("[{}] SOCKS5 dialing {} via overlay", session, target);

    let upstream = match dial_with_timeout(dialer, Network::Tcp, &target, dial_timeout).await {
        Ok(conn) => conn,
        Err(e) => {
            warn!("[{}] SOCKS5 dial to {} failed: {}", session, target, e);
            send_reply(&mut client, e.socks5_reply_code()).await?;
            return Err(SidecarError::DialFailed(e.to_string()));
        }
    };

    send_reply(&mut client, REPLY_SUCCEEDED).await?;

    let (up, down) = pipe(client, upstream).await;
    let stats = TunnelStats {
        client_to_target: up.unwrap_or(0),
        target_to_client: down.unwrap_or(0),
    };
    debug!(
        "[{}] SOCKS5 session to {} closed ({} bytes up, {} bytes down)",
        session, target, stats.client_to_target, stats.target_to_client
    );
    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reply_layout() {
        assert_eq!(
            reply(REPLY_SUCCEEDED),
            [0x05, 0x00, 0x00, 0x01, 0, 0, 0, 0, 0, 0]
        );
        assert_eq!(reply(0x05)[1], 0x05);
    }

    #[tokio::test]
    async fn test_read_destination_variants() {
        let (mut client, mut server) = tokio::io::duplex(128);

        client.write_all(&[100, 64, 0, 10, 0x1F, 0x90]).await.unwrap();
        let target = read_destination(&mut server, ATYP_IPV4).await.unwrap();
        assert_eq!(target.as_deref(), Some("100.64.0.10:8080"));

        let mut domain = vec![9u8];
        domain.extend_from_slice(b"peer.ts.n");
        domain.extend_from_slice(&443u16.to_be_bytes());
        client.write_all(&domain).await.unwrap();
        let target = read_destination(&mut server, ATYP_DOMAIN).await.unwrap();
        assert_eq!(target.as_deref(), Some("peer.ts.n:443"));

        let ip: Ipv6Addr = "fd7a:115c:a1e0::a".parse().unwrap();
        let mut v6 = ip.octets().to_vec();
        v6.extend_from_slice(&22u16.to_be_bytes());
        client.write_all(&v6).await.unwrap();
        let target = read_destination(&mut server, ATYP_IPV6).await.unwrap();
        assert_eq!(target.as_deref(), Some("[fd7a:115c:a1e0::a]:22"));
    }

    #[tokio::test]
    async fn test_unknown_address_type_replies_0x08() {
        let (mut client, mut server) = tokio::io::duplex(128);

        let target = read_destination(&mut server, 0x09).await.unwrap();
        assert!(target.is_none());

        let mut buf = [0u8; 10];
        client.read_exact(&mut buf).await.unwrap();
        assert_eq!(buf[1], REPLY_ADDRESS_TYPE_NOT_SUPPORTED);
    }
}
