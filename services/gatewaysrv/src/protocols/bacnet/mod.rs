//! BACnet/IP client
//!
//! A minimal confirmed-service client (ReadProperty / WriteProperty) over
//! UDP. Devices reachable through the same local interface share one
//! [`BacnetEndpoint`].

pub mod apdu;
pub mod endpoint;
pub mod interface;

pub use apdu::{BacnetValue, ObjectId, ServiceError};
pub use endpoint::{BacnetEndpoint, ServiceResult};
pub use interface::select_interface;
