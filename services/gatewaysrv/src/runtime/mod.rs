//! Runtime support shared by pollers and the controller

pub mod reconnect;

pub use reconnect::{ConnectionState, ReconnectError, ReconnectHelper, ReconnectPolicy};
