mod id;
mod time;

pub use id::generate_session_id;
pub use time::{format_timestamp, is_zero_time};
