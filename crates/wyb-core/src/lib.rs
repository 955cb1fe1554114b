//! # wyb-core
//!
//! Foundation types shared by every WatchYourBack dashboard crate.
//!
//! - **Protocol**: [`protocol::Command`] and [`protocol::Reply`] tagged unions
//!   for the JSON text frames exchanged with a display server
//! - **Errors**: [`errors::ClientError`] covering the connection, routing and
//!   request failure modes
//! - **Backoff**: [`backoff::BackoffPolicy`] for the reconnection schedule
//! - **Logging**: [`logging::init_subscriber`] for the `tracing` stderr output

#![deny(unsafe_code)]

pub mod backoff;
pub mod constants;
pub mod errors;
pub mod logging;
pub mod protocol;
