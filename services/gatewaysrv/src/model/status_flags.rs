//! Four-bit status flag set

use serde::{Deserialize, Serialize};
use std::fmt;

/// A single status flag bit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum StatusFlag {
    InAlarm = 0b0001,
    Fault = 0b0010,
    Overriden = 0b0100,
    OutOfService = 0b1000,
}

impl StatusFlag {
    /// Flags in BACnet bit-string order
    pub const BACNET_ORDER: [StatusFlag; 4] = [
        Self::InAlarm,
        Self::Fault,
        Self::Overriden,
        Self::OutOfService,
    ];

    #[inline]
    pub fn bit(self) -> u8 {
        self as u8
    }
}

/// {IN_ALARM, FAULT, OVERRIDEN, OUT_OF_SERVICE}; serialised as the decimal
/// value of the 4-bit integer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StatusFlags(u8);

impl StatusFlags {
    const MASK: u8 = 0b1111;

    pub fn new(flags: u8) -> Self {
        Self(flags & Self::MASK)
    }

    #[inline]
    pub fn flags(self) -> u8 {
        self.0
    }

    #[must_use]
    pub fn enable(self, flag: StatusFlag) -> Self {
        Self(self.0 | flag.bit())
    }

    #[must_use]
    pub fn disable(self, flag: StatusFlag) -> Self {
        Self(self.0 & !flag.bit())
    }

    pub fn set(&mut self, flag: StatusFlag, on: bool) {
        *self = if on {
            self.enable(flag)
        } else {
            self.disable(flag)
        };
    }

    #[inline]
    pub fn check(self, flag: StatusFlag) -> bool {
        self.0 & flag.bit() != 0
    }

    pub fn is_clear(self) -> bool {
        self.0 == 0
    }

    /// Build from a BACnet bit string (in-alarm first)
    pub fn from_bits(bits: &[bool]) -> Self {
        StatusFlag::BACNET_ORDER
            .iter()
            .zip(bits.iter())
            .filter(|(_, on)| **on)
            .fold(Self::default(), |acc, (flag, _)| acc.enable(*flag))
    }
}

impl PartialEq<u8> for StatusFlags {
    fn eq(&self, other: &u8) -> bool {
        self.0 == *other
    }
}

impl From<u8> for StatusFlags {
    fn from(flags: u8) -> Self {
        Self::new(flags)
    }
}

impl fmt::Display for StatusFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
