//! Proxy gateway for the mesh sidecar
//!
//! This crate provides the outbound [`dialer::Dialer`] abstraction, the HTTP
//! forward proxy with CONNECT tunneling, the SOCKS5 gateway and the status
//! reporter that describes the overlay network's peers.

use bytes::Bytes;
use http::header::CONTENT_TYPE;
use http::{HeaderValue, Response, StatusCode};
use http_body_util::combinators::BoxBody;
use http_body_util::{BodyExt, Empty, Full};

pub mod dialer;
pub mod error_handling;
pub mod handlers;
pub mod io;
pub mod overlay;
pub mod server;
pub mod tls;
pub mod transport;

pub use dialer::{Connection, DialError, Dialer, Network, Socks5Dialer, SystemDialer};
pub use overlay::{LocalApiNode, StartOptions, StatusClient, StatusSource, wait_until_running};
pub use server::{Gateway, GatewayConfig, ProxyMode};
pub use transport::{OverlayTransport, RoundTripper};

/// Body type for every response the gateway produces or relays
pub type ProxyBody = BoxBody<Bytes, hyper::Error>;

pub fn empty_body() -> ProxyBody {
    Empty::<Bytes>::new()
        .map_err(|never| match never {})
        .boxed()
}

pub fn full_body<T: Into<Bytes>>(chunk: T) -> ProxyBody {
    Full::new(chunk.into())
        .map_err(|never| match never {})
        .boxed()
}

/// Build a `text/plain` response with the given status
pub fn text_response(status: StatusCode, body: impl Into<Bytes>) -> Response<ProxyBody> {
    let mut response = Response::new(full_body(body));
    *response.status_mut() = status;
    response.headers_mut().insert(
        CONTENT_TYPE,
        HeaderValue::from_static("text/plain; charset=utf-8"),
    );
    response
}
