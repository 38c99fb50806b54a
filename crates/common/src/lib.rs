//! Common types for the mesh sidecar
//!
//! Shared by the gateway library (dialers, proxies, status reporting) and the
//! sidecar binary (configuration, bring-up, lifecycle events).

pub mod constants;
pub mod error;
pub mod models;
pub mod protocol;
pub mod utils;
pub mod validation;

// Re-export commonly used types for convenience
pub use error::{Result, SidecarError};
pub use models::{NodeStatus, PeerSnapshot};
pub use protocol::{PeerStatus, SidecarEvent, StatusDocument, is_direct};
pub use utils::{format_timestamp, generate_session_id, is_zero_time};
pub use validation::{HostPort, ValidationError, parse_target, validate_hostname};
