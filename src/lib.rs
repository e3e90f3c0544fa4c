//! Uplink - a control-plane daemon for a shared satellite link.
//!
//! Uplink brokers access to a single high-latency transport link (a
//! satellite radio, or a TCP stand-in for it) on behalf of multiple local
//! client programs. Tools talk to the `uplinkd` daemon over a Unix control
//! socket using the binary protocol in `uplink-proto`; the daemon
//! multiplexes their logical connections onto one shared backend link.

pub mod backend;
pub mod config;
pub mod daemon;
pub mod error;

pub use error::{Result, UplinkError};
