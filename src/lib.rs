//! RSS/Atom to JSON conversion service.
//!
//! A feed is fetched once over a bounded, deadline-limited transfer (directly,
//! through an HTTP proxy, or through a SOCKS5 tunnel), parsed with feed-rs,
//! scanned a second time for per-entry thumbnails, and returned as JSON.

pub mod config;
pub mod feed;
pub mod net;
pub mod server;
pub mod util;
