//! Outbound dialing
//!
//! Every byte the gateway relays leaves through a [`Dialer`]. The HTTP forward
//! proxy, the CONNECT tunnel and the SOCKS5 gateway all share one instance, so
//! swapping the dialer swaps the network all three modes reach.

use async_trait::async_trait;
use std::fmt;
use std::io;
use std::net::SocketAddr;
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio_socks::tcp::Socks5Stream;
use tracing::debug;

/// Transport family requested from a dialer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Network {
    Tcp,
    Udp,
}

impl fmt::Display for Network {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Network::Tcp => write!(f, "tcp"),
            Network::Udp => write!(f, "udp"),
        }
    }
}

/// A bidirectional byte stream returned by a dialer
pub trait Connection: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T> Connection for T where T: AsyncRead + AsyncWrite + Send + Unpin {}

/// Failure to open an outbound connection
#[derive(Debug, Error)]
pub enum DialError {
    #[error("connection refused by {0}")]
    Refused(String),

    #[error("{0} is unreachable")]
    Unreachable(String),

    #[error("dial to {0} timed out")]
    Timeout(String),

    #[error("unsupported network: {0}")]
    Unsupported(Network),

    #[error("dial failed: {0}")]
    Io(#[from] io::Error),
}

impl DialError {
    /// Classify an I/O failure raised while connecting to `address`
    pub fn from_io(address: &str, err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::ConnectionRefused => DialError::Refused(address.to_string()),
            io::ErrorKind::HostUnreachable | io::ErrorKind::NetworkUnreachable => {
                DialError::Unreachable(address.to_string())
            }
            io::ErrorKind::TimedOut => DialError::Timeout(address.to_string()),
            _ => DialError::Io(err),
        }
    }

    /// RFC 1928 reply code reported to a SOCKS5 client for this failure
    pub fn socks5_reply_code(&self) -> u8 {
        match self {
            DialError::Unreachable(_) => 0x04,
            DialError::Refused(_) => 0x05,
            DialError::Timeout(_) => 0x06,
            DialError::Unsupported(_) | DialError::Io(_) => 0x01,
        }
    }
}

/// Opens outbound connections on behalf of proxy clients
///
/// Dropping the returned future cancels the attempt.
#[async_trait]
pub trait Dialer: Send + Sync {
    async fn dial(&self, network: Network, address: &str)
    -> Result<Box<dyn Connection>, DialError>;
}

/// Dial with an optional deadline, mapping expiry to [`DialError::Timeout`]
pub async fn dial_with_timeout(
    dialer: &dyn Dialer,
    network: Network,
    address: &str,
    deadline: Option<Duration>,
) -> Result<Box<dyn Connection>, DialError> {
    match deadline {
        Some(limit) => tokio::time::timeout(limit, dialer.dial(network, address))
            .await
            .map_err(|_| DialError::Timeout(address.to_string()))?,
        None => dialer.dial(network, address).await,
    }
}

/// Plain TCP through the host network stack
///
/// Correct when the overlay node routes its address space through a kernel
/// TUN device, so overlay addresses are reachable like any other route.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemDialer;

#[async_trait]
impl Dialer for SystemDialer {
    async fn dial(
        &self,
        network: Network,
        address: &str,
    ) -> Result<Box<dyn Connection>, DialError> {
        if network != Network::Tcp {
            return Err(DialError::Unsupported(network));
        }

        let stream = TcpStream::connect(address)
            .await
            .map_err(|e| DialError::from_io(address, e))?;
        stream.set_nodelay(true)?;

        debug!("Dialed {} directly", address);
        Ok(Box::new(stream))
    }
}

/// Connects through the overlay node's local SOCKS5 endpoint
///
/// Used when the overlay runs in userspace-networking mode and its addresses
/// are not routable from the host stack.
#[derive(Debug, Clone)]
pub struct Socks5Dialer {
    proxy: SocketAddr,
}

impl Socks5Dialer {
    pub fn new(proxy: SocketAddr) -> Self {
        Self { proxy }
    }
}

fn classify_socks_error(address: &str, err: tokio_socks::Error) -> DialError {
    use tokio_socks::Error as SocksError;

    match err {
        SocksError::Io(e) => DialError::from_io(address, e),
        SocksError::ConnectionRefused => DialError::Refused(address.to_string()),
        SocksError::HostUnreachable | SocksError::NetworkUnreachable => {
            DialError::Unreachable(address.to_string())
        }
        SocksError::TtlExpired => DialError::Timeout(address.to_string()),
        other => DialError::Io(io::Error::other(other.to_string())),
    }
}

#[async_trait]
impl Dialer for Socks5Dialer {
    async fn dial(
        &self,
        network: Network,
        address: &str,
    ) -> Result<Box<dyn Connection>, DialError> {
        if network != Network::Tcp {
            return Err(DialError::Unsupported(network));
        }

        let stream = Socks5Stream::connect(self.proxy, address)
            .await
            .map_err(|e| classify_socks_error(address, e))?;

        debug!("Dialed {} via overlay SOCKS5 at {}", address, self.proxy);
        Ok(Box::new(stream))
    }
}
