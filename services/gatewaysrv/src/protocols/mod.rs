//! Field-bus protocol implementations

pub mod bacnet;
pub mod modbus;
