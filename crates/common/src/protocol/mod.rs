mod event;
mod status;

pub use event::SidecarEvent;
pub use status::{PeerStatus, StatusDocument, is_direct};
