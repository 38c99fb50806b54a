//! Handler modules
//!
//! One module per kind of session the gateway serves: forward-proxy requests,
//! CONNECT tunnels, SOCKS5 sessions and status API requests.

pub mod forward;
pub mod socks5;
pub mod status;
pub mod tunnel;


pub use forward::handle_forward;
pub use socks5::handle_socks5;
pub use status::handle_status_request;
pub use tunnel::{TunnelStats, handle_connect};
