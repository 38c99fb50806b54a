mod node;

pub use node::{NodeStatus, PeerSnapshot};
