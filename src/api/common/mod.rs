//! Shared API helpers reused across the chat handlers.

mod io;
mod streaming;

pub(crate) use io::open_upstream_stream;
pub(crate) use streaming::{cors_preflight_response, sse_ok_response};
