//! SOCKS5 request parsing and replies

mod parser;
mod reply;

pub use parser::parse_command;
pub use reply::{build_reply, send_io_error, send_reply, send_success};
