//! Value decode / encode for Modbus points
//!
//! Multi-register values are composed as follows: take the registers as
//! words, reverse them when the word order is little, serialise every word
//! with the byte order, then read the byte string with the byte order.
//! Encoding runs the same steps backwards. All functions here are pure.

use super::client::{ModbusResponse, WritePayload};
use crate::error::{GatewaySrvError, Result};
use crate::model::{DataType, Endian, FunctionCode, ModbusPoint, PresentValue, RawValue};

/// Decode a read response into a raw value (scale and offset applied)
pub fn decode(point: &ModbusPoint, response: &ModbusResponse) -> Result<RawValue> {
    let raw = match response {
        ModbusResponse::Bits(bits) => Raw::Unsigned(compose_bits(bits, point.quantity)?),
        ModbusResponse::Registers(registers) => decode_registers(point, registers)?,
    };

    let raw = match (point.bit, raw) {
        (Some(bit), Raw::Unsigned(v)) => Raw::Unsigned((v >> bit) & 1),
        (Some(bit), Raw::Signed(v)) => Raw::Unsigned(((v as u64) >> bit) & 1),
        (_, raw) => raw,
    };

    Ok(apply_scaling(point, raw))
}

/// Encode a value for the point's write function
pub fn encode(point: &ModbusPoint, value: &PresentValue) -> Result<WritePayload> {
    let fc = point.function_write.ok_or_else(|| {
        GatewaySrvError::validation(format!(
            "Point at address {} has no write function",
            point.address
        ))
    })?;

    let number = value
        .as_f64()
        .filter(|v| v.is_finite())
        .ok_or_else(|| GatewaySrvError::data(format!("Cannot write {} to Modbus", value)))?;

    match fc {
        FunctionCode::WriteCoil => Ok(WritePayload::Coil(unscaled_bits(point, number)? & 1 != 0)),
        FunctionCode::WriteCoils => {
            let bits = unscaled_bits(point, number)?;
            let quantity = point.quantity.min(64) as usize;
            Ok(WritePayload::Coils(
                (0..quantity).map(|i| (bits >> i) & 1 != 0).collect(),
            ))
        },
        FunctionCode::WriteRegister | FunctionCode::WriteRegisters => {
            let registers = encode_registers(point, number)?;
            if fc == FunctionCode::WriteRegister {
                match registers.as_slice() {
                    [single] => Ok(WritePayload::Register(*single)),
                    _ => Err(GatewaySrvError::data(format!(
                        "WRITE_REGISTER cannot carry {} registers",
                        registers.len()
                    ))),
                }
            } else {
                Ok(WritePayload::Registers(registers))
            }
        },
        other => Err(GatewaySrvError::validation(format!(
            "{} is not a write function",
            other
        ))),
    }
}

// ============================================================================
// Decode helpers
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq)]
enum Raw {
    Signed(i64),
    Unsigned(u64),
    Float(f64),
}

/// LSB-first integer from coil bits
fn compose_bits(bits: &[bool], quantity: u16) -> Result<u64> {
    let wanted = (quantity as usize).clamp(1, 64);
    if bits.len() < wanted {
        return Err(GatewaySrvError::data(format!(
            "Expected {} bits, got {}",
            wanted,
            bits.len()
        )));
    }
    Ok(bits
        .iter()
        .take(wanted)
        .enumerate()
        .filter(|(_, on)| **on)
        .fold(0u64, |acc, (i, _)| acc | (1 << i)))
}

fn word_bytes(word: u16, order: Endian) -> [u8; 2] {
    match order {
        Endian::Big => word.to_be_bytes(),
        Endian::Little => word.to_le_bytes(),
    }
}

/// Byte string of `count` words after word and byte ordering
fn ordered_bytes(point: &ModbusPoint, registers: &[u16], count: usize) -> Result<Vec<u8>> {
    let words = registers.get(..count).ok_or_else(|| {
        GatewaySrvError::data(format!(
            "Expected {} registers, got {}",
            count,
            registers.len()
        ))
    })?;

    let mut words = words.to_vec();
    if point.word_order == Endian::Little {
        words.reverse();
    }
    Ok(words
        .iter()
        .flat_map(|w| word_bytes(*w, point.byte_order))
        .collect())
}

fn decode_registers(point: &ModbusPoint, registers: &[u16]) -> Result<Raw> {
    let first = *registers
        .first()
        .ok_or_else(|| GatewaySrvError::data("Empty register payload"))?;

    let raw = match (point.data_length, point.data_type) {
        // Bit selector (applied by the caller) or bit 0
        (1, _) if point.bit.is_some() => Raw::Unsigned(u64::from(first)),
        (1, _) => Raw::Unsigned(u64::from(first & 1)),
        (8, data_type) => {
            let byte = word_bytes(first, point.byte_order)[0];
            if data_type == DataType::Int {
                Raw::Signed(i64::from(byte as i8))
            } else {
                Raw::Unsigned(u64::from(byte))
            }
        },
        (16, DataType::Int) => Raw::Signed(i64::from(first as i16)),
        (16, _) => Raw::Unsigned(u64::from(first)),
        (32, data_type) => {
            let bytes: [u8; 4] = ordered_bytes(point, registers, 2)?
                .try_into()
                .map_err(|_| GatewaySrvError::data("Bad 32-bit payload"))?;
            match (data_type, point.byte_order) {
                (DataType::Float, Endian::Big) => Raw::Float(f64::from(f32::from_be_bytes(bytes))),
                (DataType::Float, Endian::Little) => {
                    Raw::Float(f64::from(f32::from_le_bytes(bytes)))
                },
                (DataType::Int, Endian::Big) => Raw::Signed(i64::from(i32::from_be_bytes(bytes))),
                (DataType::Int, Endian::Little) => {
                    Raw::Signed(i64::from(i32::from_le_bytes(bytes)))
                },
                (_, Endian::Big) => Raw::Unsigned(u64::from(u32::from_be_bytes(bytes))),
                (_, Endian::Little) => Raw::Unsigned(u64::from(u32::from_le_bytes(bytes))),
            }
        },
        (64, data_type) => {
            let bytes: [u8; 8] = ordered_bytes(point, registers, 4)?
                .try_into()
                .map_err(|_| GatewaySrvError::data("Bad 64-bit payload"))?;
            match (data_type, point.byte_order) {
                (DataType::Float, Endian::Big) => Raw::Float(f64::from_be_bytes(bytes)),
                (DataType::Float, Endian::Little) => Raw::Float(f64::from_le_bytes(bytes)),
                (DataType::Int, Endian::Big) => Raw::Signed(i64::from_be_bytes(bytes)),
                (DataType::Int, Endian::Little) => Raw::Signed(i64::from_le_bytes(bytes)),
                (_, Endian::Big) => Raw::Unsigned(u64::from_be_bytes(bytes)),
                (_, Endian::Little) => Raw::Unsigned(u64::from_le_bytes(bytes)),
            }
        },
        (length, data_type) => {
            return Err(GatewaySrvError::data(format!(
                "Unsupported data length {} for {:?}",
                length, data_type
            )))
        },
    };

    if point.data_type == DataType::Float && !matches!(raw, Raw::Float(_)) {
        return Err(GatewaySrvError::data(format!(
            "FLOAT cannot be decoded from {} bits",
            point.data_length
        )));
    }
    Ok(raw)
}

fn apply_scaling(point: &ModbusPoint, raw: Raw) -> RawValue {
    if point.data_type == DataType::Bool {
        let on = match raw {
            Raw::Signed(v) => v != 0,
            Raw::Unsigned(v) => v != 0,
            Raw::Float(v) => v != 0.0,
        };
        return RawValue::Bool(on);
    }

    let identity = point.scale == 1.0 && point.offset == 0.0;
    match raw {
        Raw::Signed(v) if identity => RawValue::Int(v),
        Raw::Unsigned(v) if identity && i64::try_from(v).is_ok() => RawValue::Int(v as i64),
        Raw::Signed(v) => RawValue::Real(v as f64 * point.scale + point.offset),
        Raw::Unsigned(v) => RawValue::Real(v as f64 * point.scale + point.offset),
        Raw::Float(v) => RawValue::Real(v * point.scale + point.offset),
    }
}

// ============================================================================
// Encode helpers
// ============================================================================

/// Inverse of scale/offset; integer types are rounded
fn unscale(point: &ModbusPoint, value: f64) -> f64 {
    let v = (value - point.offset) / point.scale;
    if point.data_type == DataType::Float {
        v
    } else {
        v.round()
    }
}

/// Unsigned integer to put on coils (or under a bit selector)
fn unscaled_bits(point: &ModbusPoint, value: f64) -> Result<u64> {
    if point.data_type == DataType::Bool {
        return Ok(u64::from(value != 0.0));
    }
    let v = unscale(point, value);
    if v < 0.0 || v > u64::MAX as f64 {
        return Err(GatewaySrvError::data(format!(
            "Value {} out of range for coils",
            value
        )));
    }
    Ok(v as u64)
}

fn checked_integer(v: f64, min: f64, max: f64, what: &str) -> Result<f64> {
    if v < min || v > max {
        return Err(GatewaySrvError::data(format!(
            "Value {} out of range for {}",
            v, what
        )));
    }
    Ok(v)
}

/// Fold a byte string back into ordered words
fn words_from_bytes(point: &ModbusPoint, bytes: &[u8]) -> Vec<u16> {
    let mut words: Vec<u16> = bytes
        .chunks_exact(2)
        .map(|pair| match point.byte_order {
            Endian::Big => u16::from_be_bytes([pair[0], pair[1]]),
            Endian::Little => u16::from_le_bytes([pair[0], pair[1]]),
        })
        .collect();
    if point.word_order == Endian::Little {
        words.reverse();
    }
    words
}

fn encode_registers(point: &ModbusPoint, value: f64) -> Result<Vec<u16>> {
    if point.data_type == DataType::Bool {
        let on = u16::from(value != 0.0);
        return Ok(vec![on << point.bit.unwrap_or(0)]);
    }

    let v = unscale(point, value);
    if let Some(bit) = point.bit {
        let on = checked_integer(v, 0.0, 1.0, "a single bit")? as u16;
        return Ok(vec![on << bit]);
    }

    let words = match (point.data_length, point.data_type) {
        (1, _) => vec![checked_integer(v, 0.0, 1.0, "a single bit")? as u16],
        (8, data_type) => {
            let byte = if data_type == DataType::Int {
                checked_integer(v, f64::from(i8::MIN), f64::from(i8::MAX), "INT8")? as i8 as u8
            } else {
                checked_integer(v, 0.0, f64::from(u8::MAX), "UINT8")? as u8
            };
            let bytes = match point.byte_order {
                Endian::Big => [byte, 0],
                Endian::Little => [0, byte],
            };
            vec![u16::from_be_bytes(bytes)]
        },
        (16, DataType::Int) => {
            vec![checked_integer(v, f64::from(i16::MIN), f64::from(i16::MAX), "INT16")? as i16 as u16]
        },
        (16, _) => vec![checked_integer(v, 0.0, f64::from(u16::MAX), "UINT16")? as u16],
        (32, data_type) => {
            let bytes = match (data_type, point.byte_order) {
                (DataType::Float, Endian::Big) => (v as f32).to_be_bytes(),
                (DataType::Float, Endian::Little) => (v as f32).to_le_bytes(),
                (DataType::Int, order) => {
                    let i = checked_integer(v, f64::from(i32::MIN), f64::from(i32::MAX), "INT32")?
                        as i32;
                    if order == Endian::Big {
                        i.to_be_bytes()
                    } else {
                        i.to_le_bytes()
                    }
                },
                (_, order) => {
                    let u = checked_integer(v, 0.0, f64::from(u32::MAX), "UINT32")? as u32;
                    if order == Endian::Big {
                        u.to_be_bytes()
                    } else {
                        u.to_le_bytes()
                    }
                },
            };
            words_from_bytes(point, &bytes)
        },
        (64, data_type) => {
            let bytes = match (data_type, point.byte_order) {
                (DataType::Float, Endian::Big) => v.to_be_bytes(),
                (DataType::Float, Endian::Little) => v.to_le_bytes(),
                (DataType::Int, order) => {
                    let i = checked_integer(v, i64::MIN as f64, i64::MAX as f64, "INT64")? as i64;
                    if order == Endian::Big {
                        i.to_be_bytes()
                    } else {
                        i.to_le_bytes()
                    }
                },
                (_, order) => {
                    let u = checked_integer(v, 0.0, u64::MAX as f64, "UINT64")? as u64;
                    if order == Endian::Big {
                        u.to_be_bytes()
                    } else {
                        u.to_le_bytes()
                    }
                },
            };
            words_from_bytes(point, &bytes)
        },
        (length, data_type) => {
            return Err(GatewaySrvError::data(format!(
                "Unsupported data length {} for {:?}",
                length, data_type
            )))
        },
    };

    Ok(words)
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;

    fn float_point(byte_order: Endian, word_order: Endian) -> ModbusPoint {
        let mut point = ModbusPoint::holding(100, 2, DataType::Float, 32);
        point.byte_order = byte_order;
        point.word_order = word_order;
        point
    }

    fn registers(regs: &[u16]) -> ModbusResponse {
        ModbusResponse::Registers(regs.to_vec())
    }

    #[test]
    fn test_float_little_byte_big_word_scaled() {
        let mut point = float_point(Endian::Little, Endian::Big);
        point.scale = 10.0;
        let value = decode(&point, &registers(&[0x0000, 0x4120])).unwrap();
        assert_eq!(value, RawValue::Real(100.0));
    }

    #[test]
    fn test_float_orders() {
        let abcd = float_point(Endian::Big, Endian::Big);
        assert_eq!(
            decode(&abcd, &registers(&[0x4120, 0x0000])).unwrap(),
            RawValue::Real(10.0)
        );

        let cdab = float_point(Endian::Big, Endian::Little);
        assert_eq!(
            decode(&cdab, &registers(&[0x0000, 0x4120])).unwrap(),
            RawValue::Real(10.0)
        );
    }

    #[test]
    fn test_single_register_ignores_orders() {
        let mut point = ModbusPoint::holding(0, 1, DataType::Int, 16);
        point.byte_order = Endian::Little;
        point.word_order = Endian::Little;
        assert_eq!(
            decode(&point, &registers(&[0xFFFE])).unwrap(),
            RawValue::Int(-2)
        );

        point.data_type = DataType::Uint;
        assert_eq!(
            decode(&point, &registers(&[0xFFFE])).unwrap(),
            RawValue::Int(65534)
        );
    }

    #[test]
    fn test_eight_bit_takes_first_byte() {
        let point = ModbusPoint::holding(0, 1, DataType::Uint, 8);
        assert_eq!(
            decode(&point, &registers(&[0x1234])).unwrap(),
            RawValue::Int(0x12)
        );

        let mut point = ModbusPoint::holding(0, 1, DataType::Int, 8);
        point.byte_order = Endian::Little;
        assert_eq!(
            decode(&point, &registers(&[0x12F0])).unwrap(),
            RawValue::Int(-16)
        );
    }

    #[test]
    fn test_bool_and_bit_selector() {
        let point = ModbusPoint::holding(0, 1, DataType::Bool, 16);
        assert_eq!(
            decode(&point, &registers(&[0x0040])).unwrap(),
            RawValue::Bool(true)
        );

        let mut point = ModbusPoint::holding(0, 1, DataType::Bits, 16);
        point.bit = Some(6);
        assert_eq!(
            decode(&point, &registers(&[0x0040])).unwrap(),
            RawValue::Int(1)
        );
        point.bit = Some(5);
        assert_eq!(
            decode(&point, &registers(&[0x0040])).unwrap(),
            RawValue::Int(0)
        );
    }

    #[test]
    fn test_coils_compose_lsb_first() {
        let mut point = ModbusPoint::coil(0);
        assert_eq!(
            decode(&point, &ModbusResponse::Bits(vec![true])).unwrap(),
            RawValue::Bool(true)
        );

        point.data_type = DataType::Uint;
        point.quantity = 3;
        point.function_write = Some(FunctionCode::WriteCoils);
        let bits = ModbusResponse::Bits(vec![false, true, true]);
        assert_eq!(decode(&point, &bits).unwrap(), RawValue::Int(6));
        assert_eq!(
            encode(&point, &PresentValue::Int(6)).unwrap(),
            WritePayload::Coils(vec![false, true, true])
        );
    }

    #[test]
    fn test_short_payload_is_decode_error() {
        let point = float_point(Endian::Big, Endian::Big);
        let err = decode(&point, &registers(&[0x4120])).unwrap_err();
        assert!(matches!(err, GatewaySrvError::DataError(_)));
    }

    #[test]
    fn test_encode_inverts_decode() {
        let mut point = float_point(Endian::Little, Endian::Big);
        point.scale = 10.0;
        let payload = encode(&point, &PresentValue::Real(100.0)).unwrap();
        assert_eq!(payload, WritePayload::Registers(vec![0x0000, 0x4120]));

        let mut point = ModbusPoint::holding(0, 2, DataType::Int, 32);
        point.word_order = Endian::Little;
        point.offset = -40.0;
        point.scale = 0.5;
        let raw = [0xFFFF_u16, 0xFFF0];
        let decoded = decode(&point, &registers(&raw)).unwrap();
        let value = match decoded {
            RawValue::Real(v) => PresentValue::Real(v),
            other => panic!("unexpected {:?}", other),
        };
        assert_eq!(
            encode(&point, &value).unwrap(),
            WritePayload::Registers(raw.to_vec())
        );
    }

    #[test]
    fn test_write_register_emits_scalar() {
        let point = ModbusPoint::holding(10, 1, DataType::Uint, 16);
        assert_eq!(
            encode(&point, &PresentValue::Int(7)).unwrap(),
            WritePayload::Register(7)
        );

        let mut point = ModbusPoint::holding(10, 2, DataType::Uint, 32);
        point.function_write = Some(FunctionCode::WriteRegister);
        assert!(encode(&point, &PresentValue::Int(7)).is_err());
    }

    #[test]
    fn test_encode_rejects_bad_values() {
        let point = ModbusPoint::holding(0, 1, DataType::Uint, 16);
        assert!(encode(&point, &PresentValue::Int(70000)).is_err());
        assert!(encode(&point, &PresentValue::Int(-1)).is_err());
        assert!(encode(&point, &PresentValue::Null).is_err());
        assert!(encode(&point, &PresentValue::Text("abc".into())).is_err());

        let mut point = ModbusPoint::holding(0, 1, DataType::Uint, 16);
        point.function_write = None;
        assert!(matches!(
            encode(&point, &PresentValue::Int(1)),
            Err(GatewaySrvError::ValidationError(_))
        ));
    }
}
