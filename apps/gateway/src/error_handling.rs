//! Session error reporting
//!
//! Failures stop at the session boundary. These helpers decide how loudly a
//! session failure is logged and what the offending client gets to see.

use mesh_sidecar_common::SidecarError;
use std::fmt::Display;
use tracing::{debug, warn};

/// Log a failed session
///
/// Resets and broken pipes are routine client behaviour and stay at DEBUG;
/// everything else is a WARN.
pub fn log_session_error(session: &str, context: &str, err: &SidecarError) {
    if err.is_disconnect() {
        debug!("[{}] {} ended by peer: {}", session, context, err);
    } else {
        warn!("[{}] {} failed: {}", session, context, err);
    }
}

/// Body for a Bad Gateway reply to a forward-proxy client
///
/// # Examples
///
/// ```
/// use mesh_sidecar_gateway::error_handling::proxy_error_body;
/// assert_eq!(proxy_error_body(&"dial tcp: refused"), "Proxy Error: dial tcp: refused\n");
/// ```
pub fn proxy_error_body(err: &dyn Display) -> String {
    format!("Proxy Error: {}\n", err)
}

/// Body for a plain-text error reply, newline terminated
pub fn error_body(err: &dyn Display) -> String {
    format!("{}\n", err)
}
