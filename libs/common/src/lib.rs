//! Gateway basic library
//!
//! Provides functions shared by all gateway services:
//! - logging bootstrap with runtime level changes
//! - shutdown signal handling

pub mod logging;
pub mod shutdown;

pub use shutdown::{cancel_on_shutdown, wait_for_shutdown};
