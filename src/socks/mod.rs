//! SOCKS5 module for Tlssocks
//!
//! This module implements the server side of SOCKS5 (RFC 1928) with
//! username/password authentication (RFC 1929). Only CONNECT is served;
//! every destination passes through the injected [`DestinationRules`]
//! before the target is dialed.
//!
//! [`DestinationRules`]: crate::auth::DestinationRules

mod auth;
mod command;
mod consts;
mod handler;
mod types;

pub use auth::{authenticate, AuthMethod};
pub use command::{build_reply, parse_command, send_io_error, send_reply, send_success};
pub use consts::*;
pub use handler::Socks5Handler;
pub use types::{SocksCommand, TargetAddr};
