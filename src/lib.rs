//! dhcp6c - DHCPv6 client engine
//!
//! A per-interface DHCPv6 client (RFC 3315): wire codec, lease management,
//! and the Solicit/Request/Bound/Renew/Rebind state machine, driven by an
//! event loop in `service`.

pub mod client;
pub mod config;
pub mod error;
pub mod protocol;
pub mod service;
pub mod telemetry;

pub use error::{Error, Result};
