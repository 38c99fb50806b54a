//! Listeners and the HTTP front door
//!
//! One proxy listener per process, speaking either HTTP forward-proxy or
//! SOCKS5, plus an optional status listener. Each accepted connection runs in
//! its own task; a failing session never touches another.

use bytes::{Bytes, BytesMut};
use http::{Method, Request, Response, StatusCode};
use http_body_util::BodyExt;
use hyper::body::{Body, Incoming};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use mesh_sidecar_common::constants::{
    ACCEPT_ERROR_BACKOFF_MS, MAX_REQUEST_HEAD_BYTES, RAW_BAD_REQUEST,
};
use mesh_sidecar_common::{Result, SidecarError, generate_session_id};
use std::convert::Infallible;
use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpListener;
use tracing::{debug, info, warn};

use crate::dialer::Dialer;
use crate::error_handling::log_session_error;
use crate::handlers::{handle_connect, handle_forward, handle_socks5, handle_status_request};
use crate::io::Rewind;
use crate::overlay::StatusSource;
use crate::transport::{OverlayTransport, RoundTripper};
use crate::{ProxyBody, text_response};

/// Protocol spoken on the proxy listener, fixed for the process lifetime
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProxyMode {
    Http,
    Socks5,
}

impl ProxyMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProxyMode::Http => "http",
            ProxyMode::Socks5 => "socks5",
        }
    }

    /// Proxy URL clients should be configured with
    pub fn proxy_url(&self, addr: SocketAddr) -> String {
        format!("{}://{}", self.as_str(), addr)
    }
}

impl fmt::Display for ProxyMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-session timing limits
#[derive(Debug, Clone, Copy, Default)]
pub struct GatewayConfig {
    /// Deadline for forward-proxy and SOCKS5 dials
    pub dial_timeout: Option<Duration>,
    /// Deadline for CONNECT dials
    pub tunnel_dial_timeout: Option<Duration>,
}

/// The proxy gateway: one dialer shared by every mode
pub struct Gateway {
    mode: ProxyMode,
    dialer: Arc<dyn Dialer>,
    transport: Arc<dyn RoundTripper>,
    config: GatewayConfig,
}

impl Gateway {
    pub fn new(mode: ProxyMode, dialer: Arc<dyn Dialer>, config: GatewayConfig) -> Self {
        let transport = Arc::new(OverlayTransport::new(dialer.clone(), config.dial_timeout));
        Self {
            mode,
            dialer,
            transport,
            config,
        }
    }

    /// Replace the forward-proxy transport
    pub fn with_transport(mut self, transport: Arc<dyn RoundTripper>) -> Self {
        self.transport = transport;
        self
    }

    pub fn mode(&self) -> ProxyMode {
        self.mode
    }

    /// Accept loop for the proxy listener; runs until the task is dropped
    pub async fn serve(self: Arc<Self>, listener: TcpListener) -> Result<()> {
        info!(
            "{} proxy listening on {}",
            self.mode.as_str().to_uppercase(),
            listener.local_addr()?
        );

        loop {
            let (stream, remote) = accept_with_backoff(|| listener.accept(), "proxy").await;
            let _ = stream.set_nodelay(true);
            let gateway = self.clone();
            tokio::spawn(async move {
                gateway.serve_connection(stream, remote).await;
            });
        }
    }

    /// Serve one accepted connection in the configured mode
    pub async fn serve_connection<S>(self: Arc<Self>, stream: S, remote: SocketAddr)
    where
        S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    {
        let session = generate_session_id();
        debug!("[{}] Accepted connection from {}", session, remote);

        let result = match self.mode {
            ProxyMode::Http => self.clone().front_door(stream, remote, &session).await,
            ProxyMode::Socks5 => handle_socks5(
                stream,
                self.dialer.as_ref(),
                self.config.dial_timeout,
                &session,
            )
            .await
            .map(|_| ()),
        };

        if let Err(e) = result {
            log_session_error(&session, self.mode.as_str(), &e);
        }
    }

    /// Route one HTTP-mode connection: CONNECT to the tunnel, everything else
    /// to the forward proxy
    async fn front_door<S>(
        self: Arc<Self>,
        mut stream: S,
        remote: SocketAddr,
        session: &str,
    ) -> Result<()>
    where
        S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    {
        let head = match read_request_head(&mut stream).await {
            Ok(Some(head)) => head,
            Ok(None) => return Ok(()),
            Err(e) => {
                if !e.is_disconnect() {
                    let _ = stream.write_all(RAW_BAD_REQUEST).await;
                    let _ = stream.shutdown().await;
                }
                return Err(e);
            }
        };

        if head.method == Method::CONNECT.as_str() {
            info!("[{}] CONNECT {}", remote, head.target);
            let leftover = head.buffered.slice(head.head_len..);
            let client = Rewind::new(stream, leftover);
            handle_connect(
                client,
                &head.target,
                self.dialer.as_ref(),
                self.config.tunnel_dial_timeout,
                session,
            )
            .await?;
            return Ok(());
        }

        // replay the head so the HTTP/1.1 server parses exactly what the client sent
        let io = TokioIo::new(Rewind::new(stream, head.buffered));
        let gateway = self.clone();
        let session = session.to_string();
        let service = service_fn(move |req: Request<Incoming>| {
            let gateway = gateway.clone();
            let session = session.clone();
            async move { Ok::<_, Infallible>(gateway.route(req, remote, &session).await) }
        });

        http1::Builder::new()
            .keep_alive(false)
            .serve_connection(io, service)
            .await
            .map_err(|e| SidecarError::Transport(e.to_string()))
    }

    /// Single routing decision for a request parsed by the HTTP/1.1 server
    pub async fn route<B>(
        &self,
        req: Request<B>,
        remote: SocketAddr,
        session: &str,
    ) -> Response<ProxyBody>
    where
        B: Body<Data = Bytes, Error = hyper::Error> + Send + Sync + 'static,
    {
        info!("[{}] {} {}", remote, req.method(), req.uri());

        if req.method() == Method::CONNECT {
            // this path cannot take over the raw transport
            return text_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Hijacking not supported\n",
            );
        }

        handle_forward(
            req.map(|body| body.boxed()),
            self.transport.as_ref(),
            session,
        )
        .await
    }
}

/// A request head read off the wire before routing
#[derive(Debug)]
pub struct RequestHead {
    pub method: String,
    pub target: String,
    /// Everything read so far, head included
    pub buffered: Bytes,
    /// Length of the head within `buffered`, terminator included
    pub head_len: usize,
}

fn find_head_end(buf: &[u8]) -> Option<usize> {
    buf.windows(4).position(|w| w == b"\r\n\r\n").map(|pos| pos + 4)
}

/// Split a request line into method and target
pub fn parse_request_line(line: &str) -> Option<(&str, &str)> {
    let mut parts = line.split(' ');
    let method = parts.next().filter(|m| !m.is_empty())?;
    let target = parts.next().filter(|t| !t.is_empty())?;
    let version = parts.next()?;
    if parts.next().is_some() || !version.starts_with("HTTP/1.") {
        return None;
    }
    if !method.bytes().all(|b| b.is_ascii_alphabetic()) {
        return None;
    }
    Some((method, target))
}

/// Read up to the end of the request head
///
/// Returns `Ok(None)` when the client closes before sending anything.
pub async fn read_request_head<S>(stream: &mut S) -> Result<Option<RequestHead>>
where
    S: AsyncRead + Unpin,
{
    let mut buf = BytesMut::with_capacity(4096);

    let head_len = loop {
        if let Some(end) = find_head_end(&buf) {
            break end;
        }
        if buf.len() >= MAX_REQUEST_HEAD_BYTES {
            return Err(SidecarError::InvalidRequest(format!(
                "request head exceeds {} bytes",
                MAX_REQUEST_HEAD_BYTES
            )));
        }

        buf.reserve(4096);
        if stream.read_buf(&mut buf).await? == 0 {
            if buf.is_empty() {
                return Ok(None);
            }
            return Err(SidecarError::InvalidRequest(
                "connection closed inside request head".to_string(),
            ));
        }
    };

    let buffered = buf.freeze();
    let line_end = buffered
        .windows(2)
        .position(|w| w == b"\r\n")
        .unwrap_or(head_len);
    let line = std::str::from_utf8(&buffered[..line_end])
        .map_err(|_| SidecarError::InvalidRequest("request line is not UTF-8".to_string()))?;

    let (method, target) = parse_request_line(line).ok_or_else(|| {
        SidecarError::InvalidRequest(format!("malformed request line: {:.64}", line))
    })?;

    Ok(Some(RequestHead {
        method: method.to_string(),
        target: target.to_string(),
        head_len,
        buffered,
    }))
}

/// Retry `accept` until it yields a connection
///
/// Failures such as descriptor exhaustion tend to persist, so each one is
/// followed by a short pause before the next attempt.
async fn accept_with_backoff<T, F, Fut>(mut accept: F, listener_name: &str) -> T
where
    F: FnMut() -> Fut,
    Fut: Future<Output = std::io::Result<T>>,
{
    loop {
        match accept().await {
            Ok(accepted) => return accepted,
            Err(e) => {
                warn!("Failed to accept {} connection: {}", listener_name, e);
                tokio::time::sleep(Duration::from_millis(ACCEPT_ERROR_BACKOFF_MS)).await;
            }
        }
    }
}

/// Bind a loopback listener on the given port
pub async fn bind_loopback(port: u16) -> Result<TcpListener> {
    let listener = TcpListener::bind(("127.0.0.1", port)).await?;
    Ok(listener)
}

/// Accept loop for the status listener
pub async fn serve_status(listener: TcpListener, source: Arc<dyn StatusSource>) -> Result<()> {
    info!("Status API listening on http://{}/status", listener.local_addr()?);

    loop {
        let (stream, remote) = accept_with_backoff(|| listener.accept(), "status").await;

        let source = source.clone();
        tokio::spawn(async move {
            let service = service_fn(move |req: Request<Incoming>| {
                let source = source.clone();
                async move { Ok::<_, Infallible>(handle_status_request(req, source.as_ref()).await) }
            });

            if let Err(e) = http1::Builder::new()
                .serve_connection(TokioIo::new(stream), service)
                .await
            {
                debug!("Status connection from {} ended: {}", remote, e);
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_request_line() {
        assert_eq!(
            parse_request_line("GET http://peer/ HTTP/1.1"),
            Some(("GET", "http://peer/"))
        );
        assert_eq!(
            parse_request_line("CONNECT peer:443 HTTP/1.0"),
            Some(("CONNECT", "peer:443"))
        );
        assert_eq!(parse_request_line("GET /"), None);
        assert_eq!(parse_request_line("GET / HTTP/2"), None);
        assert_eq!(parse_request_line("G3T / HTTP/1.1"), None);
        assert_eq!(parse_request_line(""), None);
    }

    #[test]
    fn test_proxy_mode_urls() {
        let addr: SocketAddr = "127.0.0.1:8080".parse().unwrap();
        assert_eq!(ProxyMode::Http.proxy_url(addr), "http://127.0.0.1:8080");
        assert_eq!(ProxyMode::Socks5.proxy_url(addr), "socks5://127.0.0.1:8080");
        assert_eq!(ProxyMode::Socks5.to_string(), "socks5");
    }

    #[tokio::test]
    async fn test_read_request_head_keeps_pipelined_bytes() {
        let (mut client, mut server) = tokio::io::duplex(1024);
        client
            .write_all(b"CONNECT peer:443 HTTP/1.1\r\nHost: peer:443\r\n\r\n\x16\x03\x01")
            .await
            .unwrap();

        let head = read_request_head(&mut server).await.unwrap().unwrap();
        assert_eq!(head.method, "CONNECT");
        assert_eq!(head.target, "peer:443");
        assert_eq!(&head.buffered[head.head_len..], b"\x16\x03\x01");
    }

    #[tokio::test]
    async fn test_read_request_head_clean_eof() {
        let (client, mut server) = tokio::io::duplex(64);
        drop(client);
        assert!(read_request_head(&mut server).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_accept_pauses_after_failures() {
        let attempts = std::sync::atomic::AtomicUsize::new(0);
        let started = std::time::Instant::now();

        let accepted = accept_with_backoff(
            || {
                let attempt = attempts.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                async move {
                    if attempt < 2 {
                        Err(std::io::Error::other("too many open files"))
                    } else {
                        Ok(attempt)
                    }
                }
            },
            "test",
        )
        .await;

        assert_eq!(accepted, 2);
        assert_eq!(attempts.load(std::sync::atomic::Ordering::SeqCst), 3);
        assert!(started.elapsed() >= Duration::from_millis(2 * ACCEPT_ERROR_BACKOFF_MS));
    }

    #[tokio::test]
    async fn test_read_request_head_rejects_oversized() {
        let (mut client, mut server) = tokio::io::duplex(64 * 1024);
        let mut junk = b"GET http://peer/ HTTP/1.1\r\nX-Fill: ".to_vec();
        junk.extend(std::iter::repeat_n(b'a', MAX_REQUEST_HEAD_BYTES + 10));
        tokio::spawn(async move {
            let _ = client.write_all(&junk).await;
            // hold the connection open until the reader gives up
            tokio::time::sleep(Duration::from_secs(1)).await;
        });

        let err = read_request_head(&mut server).await.unwrap_err();
        assert!(matches!(err, SidecarError::InvalidRequest(_)));
    }
}
