//! ForwardHandler - Relays plain HTTP forward-proxy requests
//!
//! Requests arrive in absolute form (`GET http://peer/path HTTP/1.1`). The
//! round tripper dials the target through the overlay and the upstream
//! response is relayed back unchanged. Any failure becomes a 502 for this
//! client only.

use http::{Request, Response, StatusCode};
use tracing::warn;

use crate::error_handling::proxy_error_body;
use crate::transport::RoundTripper;
use crate::{ProxyBody, text_response};

/// Handler for every non-CONNECT request reaching the HTTP front door
pub async fn handle_forward(
    req: Request<ProxyBody>,
    transport: &dyn RoundTripper,
    session: &str,
) -> Response<ProxyBody> {
    let target = req.uri().to_string();

    match transport.round_trip(req).await {
        Ok(resp) => resp,
        Err(e) => {
            warn!("[{}] Proxy error for {}: {}", session, target, e);
            text_response(StatusCode::BAD_GATEWAY, proxy_error_body(&e))
        }
    }
}
