/// Deadline for the overlay node to reach the Running state at startup (1 minute)
pub const STARTUP_TIMEOUT_SECS: u64 = 60;

/// Interval between status polls while waiting for the overlay node to come up
pub const STARTUP_POLL_INTERVAL_MS: u64 = 500;

/// Default deadline for forward-proxy and SOCKS5 dials
pub const DIAL_TIMEOUT_SECS: u64 = 30;

/// Default deadline for CONNECT tunnel dials (0 on the command line disables it)
pub const TUNNEL_DIAL_TIMEOUT_SECS: u64 = 30;

/// Largest request head the front door buffers before routing (16 KiB)
pub const MAX_REQUEST_HEAD_BYTES: usize = 16 * 1024;

/// Copy buffer used per tunnel direction
pub const PIPE_BUFFER_BYTES: usize = 16 * 1024;

/// Pause after a failed accept before the listener tries again
pub const ACCEPT_ERROR_BACKOFF_MS: u64 = 100;

/// Overlay backend state that means the node is up and routing
pub const BACKEND_STATE_RUNNING: &str = "Running";

/// Overlay backend state that means interactive login is required
pub const BACKEND_STATE_NEEDS_LOGIN: &str = "NeedsLogin";

/// Status line written to the raw client once a CONNECT tunnel is up
pub const CONNECT_ESTABLISHED: &[u8] = b"HTTP/1.1 200 Connection Established\r\n\r\n";

/// Status line written to the raw client when a CONNECT dial fails
pub const CONNECT_BAD_GATEWAY: &[u8] = b"HTTP/1.1 502 Bad Gateway\r\n\r\n";

/// Status line written to the raw client for a malformed request head
pub const RAW_BAD_REQUEST: &[u8] = b"HTTP/1.1 400 Bad Request\r\n\r\n";

/// Default path of the overlay node's local API socket
pub const DEFAULT_LOCAL_API_SOCKET: &str = "/var/run/tailscale/tailscaled.sock";

/// Default local SOCKS5 endpoint exposed by an overlay node in userspace mode
pub const DEFAULT_OVERLAY_SOCKS5: &str = "127.0.0.1:1055";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constants_values() {
        const _: () = assert!(STARTUP_POLL_INTERVAL_MS < STARTUP_TIMEOUT_SECS * 1000);
        const _: () = assert!(PIPE_BUFFER_BYTES > 0);
        const _: () = assert!(MAX_REQUEST_HEAD_BYTES >= 8 * 1024);

        assert!(CONNECT_ESTABLISHED.ends_with(b"\r\n\r\n"));
        assert!(CONNECT_BAD_GATEWAY.starts_with(b"HTTP/1.1 502"));
    }
}
