//! StatusHandler - Serves the local status API
//!
//! `/health` answers as soon as the listener is up, independent of the
//! overlay. `/status` queries the overlay node on every request and projects
//! a fresh [`StatusDocument`]; nothing is cached.

use http::header::CONTENT_TYPE;
use http::{HeaderValue, Request, Response, StatusCode};
use mesh_sidecar_common::{Result, SidecarError, StatusDocument};
use tracing::{debug, warn};

use crate::error_handling::error_body;
use crate::overlay::StatusSource;
use crate::{ProxyBody, full_body, text_response};

pub const HEALTH_PATH: &str = "/health";
pub const STATUS_PATH: &str = "/status";

/// Query the node and project its status
pub async fn status_document(source: &dyn StatusSource) -> Result<StatusDocument> {
    let client = source.status_client()?;
    let status = client.status().await.map_err(|e| match e {
        SidecarError::StatusQuery(_) => e,
        other => SidecarError::StatusQuery(other.to_string()),
    })?;
    Ok(StatusDocument::project(&status))
}

fn json_response(doc: &StatusDocument) -> Result<Response<ProxyBody>> {
    let mut body = serde_json::to_vec(doc)?;
    body.push(b'\n');

    let mut response = Response::new(full_body(body));
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    Ok(response)
}

/// Handler for every request reaching the status listener
pub async fn handle_status_request<B>(
    req: Request<B>,
    source: &dyn StatusSource,
) -> Response<ProxyBody> {
    let path = req.uri().path().to_string();
    match path.as_str() {
        HEALTH_PATH => text_response(StatusCode::OK, "OK"),
        STATUS_PATH => {
            match status_document(source)
                .await
                .and_then(|doc| json_response(&doc))
            {
                Ok(response) => {
                    debug!("Served status document");
                    response
                }
                Err(e) => {
                    warn!("Status query failed: {}", e);
                    text_response(StatusCode::INTERNAL_SERVER_ERROR, error_body(&e))
                }
            }
        }
        _ => text_response(StatusCode::NOT_FOUND, "404 page not found\n"),
    }
}
