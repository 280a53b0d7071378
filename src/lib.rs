//! Mail poller — supervised per-account mail polling.
//!
//! The supervisor owns one long-lived polling worker per enabled account,
//! launches them together, watches their liveness, and coordinates orderly
//! shutdown. Protocol access and message handling are consumed through the
//! [`mail`] traits; the hosting process drives the fleet through
//! [`poller::PollerSupervisor`].

pub mod config;
pub mod error;
pub mod mail;
pub mod poller;
