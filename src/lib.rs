//! upwatch - service-check scheduling and execution engine.
//!
//! Monitors a user-defined set of endpoints (HTTP(S) URLs or raw TCP+TLS
//! handshake targets) on individually configurable intervals, records
//! pass/fail history and raises notifications on failure. The UI, push
//! delivery and OS integration live elsewhere; they talk to this crate
//! through [`db::Store`], [`notify::Notifier`] and [`transfer`].

pub mod checker;
pub mod config;
pub mod connectivity;
pub mod db;
pub mod notify;
pub mod scheduler;
pub mod transfer;
