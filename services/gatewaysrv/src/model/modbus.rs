//! Modbus addressing and encoding parameters of a polled object

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{GatewaySrvError, Result};

/// Modbus function codes used by the gateway
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum FunctionCode {
    ReadCoils = 0x01,
    ReadDiscreteInputs = 0x02,
    ReadHoldingRegisters = 0x03,
    ReadInputRegisters = 0x04,
    WriteCoil = 0x05,
    WriteRegister = 0x06,
    WriteCoils = 0x0F,
    WriteRegisters = 0x10,
}

impl FunctionCode {
    #[inline]
    pub fn code(self) -> u8 {
        self as u8
    }

    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0x01 => Some(Self::ReadCoils),
            0x02 => Some(Self::ReadDiscreteInputs),
            0x03 => Some(Self::ReadHoldingRegisters),
            0x04 => Some(Self::ReadInputRegisters),
            0x05 => Some(Self::WriteCoil),
            0x06 => Some(Self::WriteRegister),
            0x0F => Some(Self::WriteCoils),
            0x10 => Some(Self::WriteRegisters),
            _ => None,
        }
    }

    pub fn is_read(self) -> bool {
        self.code() <= 0x04
    }

    pub fn is_write(self) -> bool {
        !self.is_read()
    }

    /// Coil / discrete-input family (bit payloads)
    pub fn is_bit_access(self) -> bool {
        matches!(
            self,
            Self::ReadCoils | Self::ReadDiscreteInputs | Self::WriteCoil | Self::WriteCoils
        )
    }
}

impl FromStr for FunctionCode {
    type Err = GatewaySrvError;

    /// Accepts `"0x03"`, `"0X10"` or plain decimal `"3"`
    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        let code = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
            Some(hex) => u8::from_str_radix(hex, 16),
            None => s.parse::<u8>(),
        }
        .map_err(|e| GatewaySrvError::config(format!("Invalid function code '{}': {}", s, e)))?;

        Self::from_code(code)
            .ok_or_else(|| GatewaySrvError::config(format!("Unsupported function code: {}", s)))
    }
}

impl TryFrom<String> for FunctionCode {
    type Error = GatewaySrvError;

    fn try_from(s: String) -> Result<Self> {
        s.parse()
    }
}

impl From<FunctionCode> for String {
    fn from(fc: FunctionCode) -> Self {
        fc.to_string()
    }
}

impl fmt::Display for FunctionCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:02X}", self.code())
    }
}

/// Declared data type of a Modbus point
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataType {
    Bool,
    Int,
    Uint,
    Float,
    Bits,
}

impl FromStr for DataType {
    type Err = GatewaySrvError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "bool" | "boolean" => Ok(Self::Bool),
            "int" | "signed" => Ok(Self::Int),
            "uint" | "unsigned" => Ok(Self::Uint),
            "float" | "real" => Ok(Self::Float),
            "bits" => Ok(Self::Bits),
            other => Err(GatewaySrvError::config(format!(
                "Unknown data type: {}",
                other
            ))),
        }
    }
}

/// Byte or word order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Endian {
    #[default]
    Big,
    Little,
}

impl FromStr for Endian {
    type Err = GatewaySrvError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "big" | ">" => Ok(Self::Big),
            "little" | "<" => Ok(Self::Little),
            other => Err(GatewaySrvError::config(format!(
                "Unknown byte/word order: {}",
                other
            ))),
        }
    }
}

const VALID_LENGTHS: [u8; 5] = [1, 8, 16, 32, 64];

/// Addressing and decode parameters of a Modbus-backed object
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModbusPoint {
    pub address: u16,
    pub quantity: u16,
    pub function_read: FunctionCode,
    pub function_write: Option<FunctionCode>,
    pub data_type: DataType,
    pub data_length: u8,
    pub byte_order: Endian,
    pub word_order: Endian,
    pub scale: f64,
    pub offset: f64,
    pub bit: Option<u8>,
}

impl ModbusPoint {
    /// Holding-register point with default scaling and big-endian orders
    pub fn holding(address: u16, quantity: u16, data_type: DataType, data_length: u8) -> Self {
        Self {
            address,
            quantity,
            function_read: FunctionCode::ReadHoldingRegisters,
            function_write: Some(if quantity > 1 {
                FunctionCode::WriteRegisters
            } else {
                FunctionCode::WriteRegister
            }),
            data_type,
            data_length,
            byte_order: Endian::Big,
            word_order: Endian::Big,
            scale: 1.0,
            offset: 0.0,
            bit: None,
        }
    }

    /// Coil point (single bit)
    pub fn coil(address: u16) -> Self {
        Self {
            address,
            quantity: 1,
            function_read: FunctionCode::ReadCoils,
            function_write: Some(FunctionCode::WriteCoil),
            data_type: DataType::Bool,
            data_length: 1,
            byte_order: Endian::Big,
            word_order: Endian::Big,
            scale: 1.0,
            offset: 0.0,
            bit: None,
        }
    }

    pub fn is_bit_access(&self) -> bool {
        self.function_read.is_bit_access()
    }

    /// Reject inconsistent parameter sets
    pub fn validate(&self) -> Result<()> {
        if !self.function_read.is_read() {
            return Err(GatewaySrvError::config(format!(
                "functionRead {} is not a read function",
                self.function_read
            )));
        }

        if let Some(write) = self.function_write {
            if !write.is_write() {
                return Err(GatewaySrvError::config(format!(
                    "functionWrite {} is not a write function",
                    write
                )));
            }
            if write.is_bit_access() != self.function_read.is_bit_access() {
                return Err(GatewaySrvError::config(format!(
                    "functionWrite {} does not match functionRead {} (coil vs register)",
                    write, self.function_read
                )));
            }
        }

        if self.quantity == 0 {
            return Err(GatewaySrvError::config("quantity must be greater than zero"));
        }

        if !VALID_LENGTHS.contains(&self.data_length) {
            return Err(GatewaySrvError::config(format!(
                "dataLength must be one of {:?}, got {}",
                VALID_LENGTHS, self.data_length
            )));
        }

        if self.data_type == DataType::Float && !matches!(self.data_length, 32 | 64) {
            return Err(GatewaySrvError::config(format!(
                "FLOAT requires dataLength 32 or 64, got {}",
                self.data_length
            )));
        }

        if !self.is_bit_access() && u32::from(self.quantity) * 16 < u32::from(self.data_length) {
            return Err(GatewaySrvError::config(format!(
                "{} registers cannot hold {} bits",
                self.quantity, self.data_length
            )));
        }

        if let Some(bit) = self.bit {
            if bit > 15 {
                return Err(GatewaySrvError::config(format!(
                    "bit selector must be 0..=15, got {}",
                    bit
                )));
            }
            if self.data_type == DataType::Float {
                return Err(GatewaySrvError::config(
                    "bit selector cannot be combined with FLOAT",
                ));
            }
        }

        if self.scale == 0.0 || !self.scale.is_finite() {
            return Err(GatewaySrvError::config("scale must be a non-zero number"));
        }

        Ok(())
    }
}
