//! Protocol gateway engine
//!
//! Polls Modbus TCP/RTU and BACnet/IP devices, normalises every reading
//! into a BACnet-flavoured object model and delivers verified batches to
//! the upstream server and the MQTT broker. Writes go through a
//! write-with-readback path that takes priority over polling.

pub mod api;
pub mod bootstrap;
pub mod config;
pub mod controller;
pub mod error;
pub mod model;
pub mod poller;
pub mod protocols;
pub mod runtime;
pub mod serialiser;
pub mod store;
pub mod transport;
pub mod upstream;
pub mod verifier;
pub mod write_check;

pub use controller::{Gateway, GatewaySettings};
pub use error::{GatewaySrvError, Result};
