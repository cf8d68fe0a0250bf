//! Object model
//!
//! Value types shared by every layer: object types, properties, status
//! flags, Modbus encoding parameters, device descriptors and polled objects.

pub mod device;
pub mod modbus;
pub mod object;
pub mod object_type;
pub mod property;
pub mod status_flags;
pub mod value;

pub use device::{DeviceDescriptor, DeviceTransport, Parity, Protocol, SerialSettings};
pub use modbus::{DataType, Endian, FunctionCode, ModbusPoint};
pub use object::{
    ObjectAddressing, ObjectKey, ObjectSnapshot, ObjectSpec, ObjectState, PolledObject,
    RawReading, ReadFailure, ReadOutcome, DEFAULT_RESOLUTION,
};
pub use object_type::ObjectType;
pub use property::PropertyId;
pub use status_flags::{StatusFlag, StatusFlags};
pub use value::{PresentValue, PriorityArray, RawValue, PRIORITY_LEVELS};
