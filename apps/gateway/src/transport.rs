//! HTTP round trips over dialed connections

use async_trait::async_trait;
use http::header::HOST;
use http::{HeaderValue, Request, Response, Uri};
use http_body_util::BodyExt;
use hyper::body::Incoming;
use hyper::client::conn::http1;
use hyper_util::rt::TokioIo;
use mesh_sidecar_common::{Result, SidecarError};
use once_cell::sync::OnceCell;
use rustls::ClientConfig;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_rustls::TlsConnector;
use tracing::debug;

use crate::ProxyBody;
use crate::dialer::{Dialer, Network, dial_with_timeout};
use crate::tls::{native_client_config, server_name};

/// Executes a single HTTP exchange for the forward proxy
#[async_trait]
pub trait RoundTripper: Send + Sync {
    async fn round_trip(&self, req: Request<ProxyBody>) -> Result<Response<ProxyBody>>;
}

/// Send one request over an already-open stream with an HTTP/1.1 handshake
///
/// The connection driver runs in its own task and ends once the response body
/// has been consumed and the sender is dropped.
pub async fn send_request<S>(stream: S, req: Request<ProxyBody>) -> Result<Response<Incoming>>
where
    S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
{
    let (mut sender, conn) = http1::Builder::new()
        .handshake(TokioIo::new(stream))
        .await
        .map_err(|e| SidecarError::Transport(e.to_string()))?;

    tokio::spawn(async move {
        if let Err(e) = conn.await {
            debug!("Upstream connection ended: {}", e);
        }
    });

    sender
        .send_request(req)
        .await
        .map_err(|e| SidecarError::Transport(e.to_string()))
}

/// Where an absolute-form request target is sent
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpstreamTarget {
    /// Host as written in the URI, IPv6 literals bracketed
    pub host: String,
    /// `host:port` handed to the dialer
    pub address: String,
    /// Whether the origin is spoken to over TLS
    pub tls: bool,
}

/// Derive the dial target from an absolute-form request URI
pub fn upstream_target(uri: &Uri) -> Result<UpstreamTarget> {
    let (default_port, tls) = match uri.scheme_str() {
        Some("http") => (80, false),
        Some("https") => (443, true),
        Some(other) => {
            return Err(SidecarError::InvalidRequest(format!(
                "unsupported protocol scheme \"{}\"",
                other
            )));
        }
        None => {
            return Err(SidecarError::InvalidRequest(format!(
                "request target is not absolute: {}",
                uri
            )));
        }
    };

    let host = uri
        .host()
        .filter(|h| !h.is_empty())
        .ok_or_else(|| SidecarError::InvalidRequest(format!("no host in request target: {}", uri)))?;
    let port = uri.port_u16().unwrap_or(default_port);

    Ok(UpstreamTarget {
        host: host.to_string(),
        address: format!("{}:{}", host, port),
        tls,
    })
}

/// Rewrite an absolute-form request into the origin-form an origin server expects
///
/// Fills `Host` from the authority when the client did not send one; every
/// other header is left untouched.
pub fn to_origin_form<B>(req: &mut Request<B>) -> Result<()> {
    let authority = req.uri().authority().cloned();

    let origin: Uri = req
        .uri()
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or("/")
        .parse()
        .map_err(|e: http::uri::InvalidUri| SidecarError::InvalidRequest(e.to_string()))?;
    *req.uri_mut() = origin;

    if !req.headers().contains_key(HOST) {
        if let Some(authority) = authority {
            let value = HeaderValue::from_str(authority.as_str())
                .map_err(|e| SidecarError::InvalidRequest(e.to_string()))?;
            req.headers_mut().insert(HOST, value);
        }
    }

    Ok(())
}

/// HTTP transport whose every connection is opened by a [`Dialer`]
///
/// One connection per request, no pooling. `https` origins get a TLS client
/// session on top of the dialed stream; system roots are loaded on first use.
pub struct OverlayTransport {
    dialer: Arc<dyn Dialer>,
    dial_timeout: Option<Duration>,
    tls: OnceCell<TlsConnector>,
}

impl OverlayTransport {
    pub fn new(dialer: Arc<dyn Dialer>, dial_timeout: Option<Duration>) -> Self {
        Self {
            dialer,
            dial_timeout,
            tls: OnceCell::new(),
        }
    }

    /// Use this TLS client configuration instead of the system roots
    pub fn with_tls_config(mut self, config: Arc<ClientConfig>) -> Self {
        self.tls = OnceCell::with_value(TlsConnector::from(config));
        self
    }

    fn tls_connector(&self) -> Result<&TlsConnector> {
        self.tls
            .get_or_try_init(|| native_client_config().map(TlsConnector::from))
    }
}

#[async_trait]
impl RoundTripper for OverlayTransport {
    async fn round_trip(&self, mut req: Request<ProxyBody>) -> Result<Response<ProxyBody>> {
        let target = upstream_target(req.uri())?;
        to_origin_form(&mut req)?;

        let conn = dial_with_timeout(
            self.dialer.as_ref(),
            Network::Tcp,
            &target.address,
            self.dial_timeout,
        )
        .await
        .map_err(|e| SidecarError::DialFailed(e.to_string()))?;

        let resp = if target.tls {
            let name = server_name(&target.host)?;
            let stream = self.tls_connector()?.connect(name, conn).await.map_err(|e| {
                SidecarError::Transport(format!(
                    "TLS handshake with {} failed: {}",
                    target.address, e
                ))
            })?;
            debug!("TLS session established with {}", target.address);
            send_request(stream, req).await?
        } else {
            send_request(conn, req).await?
        };
        Ok(resp.map(|body| body.boxed()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::empty_body;

    #[test]
    fn test_upstream_target_default_ports() {
        let uri: Uri = "http://peer.tailnet.ts.net/api".parse().unwrap();
        let target = upstream_target(&uri).unwrap();
        assert_eq!(target.address, "peer.tailnet.ts.net:80");
        assert!(!target.tls);

        let uri: Uri = "https://peer.tailnet.ts.net/secure".parse().unwrap();
        let target = upstream_target(&uri).unwrap();
        assert_eq!(target.address, "peer.tailnet.ts.net:443");
        assert_eq!(target.host, "peer.tailnet.ts.net");
        assert!(target.tls);
    }

    #[test]
    fn test_upstream_target_explicit_port() {
        let uri: Uri = "http://100.64.0.10:8000/x?y=1".parse().unwrap();
        assert_eq!(upstream_target(&uri).unwrap().address, "100.64.0.10:8000");

        let uri: Uri = "https://[fd7a:115c:a1e0::a]:9443/".parse().unwrap();
        let target = upstream_target(&uri).unwrap();
        assert_eq!(target.address, "[fd7a:115c:a1e0::a]:9443");
        assert!(target.tls);
    }

    #[test]
    fn test_upstream_target_rejects_other_schemes_and_relative() {
        let ftp: Uri = "ftp://peer/file".parse().unwrap();
        let err = upstream_target(&ftp).unwrap_err();
        assert!(err.to_string().contains("unsupported protocol scheme"));

        let relative: Uri = "/just/a/path".parse().unwrap();
        let err = upstream_target(&relative).unwrap_err();
        assert!(matches!(err, SidecarError::InvalidRequest(_)));
    }

    #[test]
    fn test_origin_form_rewrite_fills_host() {
        let mut req = Request::get("http://peer:8080/api/items?page=2")
            .body(empty_body())
            .unwrap();
        to_origin_form(&mut req).unwrap();

        assert_eq!(req.uri().to_string(), "/api/items?page=2");
        assert_eq!(req.headers()[HOST], "peer:8080");
    }

    #[test]
    fn test_origin_form_keeps_client_host() {
        let mut req = Request::get("http://peer/")
            .header(HOST, "virtual.example")
            .header("x-custom", "kept")
            .body(empty_body())
            .unwrap();
        to_origin_form(&mut req).unwrap();

        assert_eq!(req.uri().to_string(), "/");
        assert_eq!(req.headers()[HOST], "virtual.example");
        assert_eq!(req.headers()["x-custom"], "kept");
    }
}
