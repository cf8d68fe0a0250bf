//! Modbus TCP / RTU / RTU-over-TCP
//!
//! The connection-owning client over `tokio-modbus`, point value
//! decode/encode and a TCP simulator used by integration tests.

pub mod client;
pub mod payload;
pub mod serial;
pub mod simulator;

pub use client::{ByteStream, Framing, ModbusClient, ModbusEndpoint, ModbusResponse, WritePayload};
pub use simulator::ModbusSimulator;
