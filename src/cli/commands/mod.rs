mod serve;
mod tail;

pub use serve::{execute_serve, resolve_config};
pub use tail::{execute_tail, viewer_url};
