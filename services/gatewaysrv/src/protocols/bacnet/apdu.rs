//! BACnet/IP packet encoding and decoding
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │ BVLC (4 bytes) │ NPDU (2+ bytes) │ APDU (variable)      │
//! └─────────────────────────────────────────────────────────┘
//! ```
//!
//! Only the confirmed services the gateway issues are covered:
//! ReadProperty and WriteProperty, with their acks, errors, rejects and
//! aborts.

use thiserror::Error;

use crate::error::{GatewaySrvError, Result};

// ============================================================================
// Constants
// ============================================================================

/// BVLC type for BACnet/IP
pub const BVLC_TYPE_BACNET_IP: u8 = 0x81;

pub mod bvlc_function {
    pub const FORWARDED_NPDU: u8 = 0x04;
    pub const ORIGINAL_UNICAST: u8 = 0x0A;
    pub const ORIGINAL_BROADCAST: u8 = 0x0B;
}

pub const NPDU_VERSION: u8 = 0x01;

mod npdu_control {
    pub const NETWORK_MESSAGE: u8 = 0x80;
    pub const DESTINATION: u8 = 0x20;
    pub const SOURCE: u8 = 0x08;
    pub const EXPECTING_REPLY: u8 = 0x04;
}

/// APDU PDU types (upper 4 bits)
pub mod pdu_type {
    pub const CONFIRMED_REQUEST: u8 = 0x00;
    pub const SIMPLE_ACK: u8 = 0x20;
    pub const COMPLEX_ACK: u8 = 0x30;
    pub const ERROR: u8 = 0x50;
    pub const REJECT: u8 = 0x60;
    pub const ABORT: u8 = 0x70;
}

pub mod confirmed_service {
    pub const READ_PROPERTY: u8 = 0x0C;
    pub const WRITE_PROPERTY: u8 = 0x0F;
}

/// Application tag numbers
pub mod app_tag {
    pub const NULL: u8 = 0;
    pub const BOOLEAN: u8 = 1;
    pub const UNSIGNED: u8 = 2;
    pub const SIGNED: u8 = 3;
    pub const REAL: u8 = 4;
    pub const DOUBLE: u8 = 5;
    pub const OCTET_STRING: u8 = 6;
    pub const CHARACTER_STRING: u8 = 7;
    pub const BIT_STRING: u8 = 8;
    pub const ENUMERATED: u8 = 9;
    pub const DATE: u8 = 10;
    pub const TIME: u8 = 11;
    pub const OBJECT_ID: u8 = 12;
}

pub const ERROR_CLASS_OBJECT: u32 = 1;
pub const ERROR_CLASS_PROPERTY: u32 = 2;
pub const ERROR_CODE_UNKNOWN_OBJECT: u32 = 31;
pub const ERROR_CODE_UNKNOWN_PROPERTY: u32 = 32;

/// Max segments 0, max APDU 1476
const MAX_APDU_ACCEPTED: u8 = 0x05;
const CHARSET_UTF8: u8 = 0x00;

// ============================================================================
// Values
// ============================================================================

/// BACnet object identifier (type + instance)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObjectId {
    pub object_type: u16,
    pub instance: u32,
}

impl ObjectId {
    pub fn new(object_type: u16, instance: u32) -> Self {
        Self {
            object_type,
            instance,
        }
    }

    pub fn to_u32(self) -> u32 {
        (u32::from(self.object_type & 0x3FF) << 22) | (self.instance & 0x3F_FFFF)
    }

    pub fn from_u32(raw: u32) -> Self {
        Self {
            object_type: ((raw >> 22) & 0x3FF) as u16,
            instance: raw & 0x3F_FFFF,
        }
    }
}

/// Application-tagged primitive value
#[derive(Debug, Clone, PartialEq)]
pub enum BacnetValue {
    Null,
    Boolean(bool),
    Unsigned(u64),
    Signed(i64),
    Real(f32),
    Double(f64),
    OctetString(Vec<u8>),
    CharacterString(String),
    BitString(Vec<bool>),
    Enumerated(u32),
    Date([u8; 4]),
    Time([u8; 4]),
    ObjectId(ObjectId),
}

/// Negative answer to a confirmed request
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ServiceError {
    #[error("BACnet error (class {class}, code {code})")]
    Error { class: u32, code: u32 },

    #[error("BACnet reject (reason {0})")]
    Reject(u8),

    #[error("BACnet abort (reason {0})")]
    Abort(u8),
}

impl ServiceError {
    pub fn is_unknown_object(&self) -> bool {
        matches!(
            self,
            Self::Error {
                code: ERROR_CODE_UNKNOWN_OBJECT,
                ..
            }
        )
    }

    pub fn is_unknown_property(&self) -> bool {
        matches!(
            self,
            Self::Error {
                code: ERROR_CODE_UNKNOWN_PROPERTY,
                ..
            }
        )
    }
}

/// Decoded confirmed-service answer
#[derive(Debug, Clone, PartialEq)]
pub enum ResponseBody {
    ReadAck {
        object: ObjectId,
        property: u32,
        values: Vec<BacnetValue>,
    },
    SimpleAck {
        service: u8,
    },
    Failed(ServiceError),
}

#[derive(Debug, Clone, PartialEq)]
pub struct BacnetResponse {
    pub invoke_id: u8,
    pub body: ResponseBody,
}

// ============================================================================
// Encoding
// ============================================================================

fn put_tag(buf: &mut Vec<u8>, number: u8, context: bool, len: usize) {
    let class = if context { 0x08 } else { 0x00 };
    let head = if number <= 14 { number << 4 } else { 0xF0 };
    let lvt = if len <= 4 { len as u8 } else { 5 };
    buf.push(head | class | lvt);
    if number > 14 {
        buf.push(number);
    }
    if len > 4 {
        if len <= 253 {
            buf.push(len as u8);
        } else if len <= usize::from(u16::MAX) {
            buf.push(254);
            buf.extend_from_slice(&(len as u16).to_be_bytes());
        } else {
            buf.push(255);
            buf.extend_from_slice(&(len as u32).to_be_bytes());
        }
    }
}

fn put_opening(buf: &mut Vec<u8>, number: u8) {
    buf.push((number << 4) | 0x0E);
}

fn put_closing(buf: &mut Vec<u8>, number: u8) {
    buf.push((number << 4) | 0x0F);
}

/// Minimal big-endian unsigned content (at least one byte)
fn unsigned_bytes(value: u64) -> Vec<u8> {
    let bytes = value.to_be_bytes();
    let skip = bytes.iter().take(7).take_while(|b| **b == 0).count();
    bytes[skip..].to_vec()
}

/// Minimal two's complement content
fn signed_bytes(value: i64) -> Vec<u8> {
    let bytes = value.to_be_bytes();
    let mut start = 0;
    while start < 7 {
        let redundant = (bytes[start] == 0x00 && bytes[start + 1] & 0x80 == 0)
            || (bytes[start] == 0xFF && bytes[start + 1] & 0x80 != 0);
        if !redundant {
            break;
        }
        start += 1;
    }
    bytes[start..].to_vec()
}

fn put_context_unsigned(buf: &mut Vec<u8>, number: u8, value: u64) {
    let content = unsigned_bytes(value);
    put_tag(buf, number, true, content.len());
    buf.extend_from_slice(&content);
}

fn put_context_object_id(buf: &mut Vec<u8>, number: u8, object: ObjectId) {
    put_tag(buf, number, true, 4);
    buf.extend_from_slice(&object.to_u32().to_be_bytes());
}

/// Append an application-tagged value
pub fn encode_application(buf: &mut Vec<u8>, value: &BacnetValue) {
    match value {
        BacnetValue::Null => put_tag(buf, app_tag::NULL, false, 0),
        BacnetValue::Boolean(b) => put_tag(buf, app_tag::BOOLEAN, false, usize::from(*b)),
        BacnetValue::Unsigned(v) => {
            let content = unsigned_bytes(*v);
            put_tag(buf, app_tag::UNSIGNED, false, content.len());
            buf.extend_from_slice(&content);
        },
        BacnetValue::Signed(v) => {
            let content = signed_bytes(*v);
            put_tag(buf, app_tag::SIGNED, false, content.len());
            buf.extend_from_slice(&content);
        },
        BacnetValue::Real(v) => {
            put_tag(buf, app_tag::REAL, false, 4);
            buf.extend_from_slice(&v.to_be_bytes());
        },
        BacnetValue::Double(v) => {
            put_tag(buf, app_tag::DOUBLE, false, 8);
            buf.extend_from_slice(&v.to_be_bytes());
        },
        BacnetValue::OctetString(bytes) => {
            put_tag(buf, app_tag::OCTET_STRING, false, bytes.len());
            buf.extend_from_slice(bytes);
        },
        BacnetValue::CharacterString(s) => {
            put_tag(buf, app_tag::CHARACTER_STRING, false, s.len() + 1);
            buf.push(CHARSET_UTF8);
            buf.extend_from_slice(s.as_bytes());
        },
        BacnetValue::BitString(bits) => {
            let byte_len = bits.len().div_ceil(8);
            let unused = (byte_len * 8 - bits.len()) as u8;
            let mut packed = vec![0u8; byte_len];
            for (i, _) in bits.iter().enumerate().filter(|(_, on)| **on) {
                packed[i / 8] |= 0x80 >> (i % 8);
            }
            put_tag(buf, app_tag::BIT_STRING, false, byte_len + 1);
            buf.push(unused);
            buf.extend_from_slice(&packed);
        },
        BacnetValue::Enumerated(v) => {
            let content = unsigned_bytes(u64::from(*v));
            put_tag(buf, app_tag::ENUMERATED, false, content.len());
            buf.extend_from_slice(&content);
        },
        BacnetValue::Date(d) => {
            put_tag(buf, app_tag::DATE, false, 4);
            buf.extend_from_slice(d);
        },
        BacnetValue::Time(t) => {
            put_tag(buf, app_tag::TIME, false, 4);
            buf.extend_from_slice(t);
        },
        BacnetValue::ObjectId(object) => {
            put_tag(buf, app_tag::OBJECT_ID, false, 4);
            buf.extend_from_slice(&object.to_u32().to_be_bytes());
        },
    }
}

/// Wrap an APDU into BVLC + NPDU
fn frame(apdu: &[u8], expecting_reply: bool) -> Vec<u8> {
    let control = if expecting_reply {
        npdu_control::EXPECTING_REPLY
    } else {
        0x00
    };
    let total = 6 + apdu.len();
    let mut out = Vec::with_capacity(total);
    out.push(BVLC_TYPE_BACNET_IP);
    out.push(bvlc_function::ORIGINAL_UNICAST);
    out.extend_from_slice(&(total as u16).to_be_bytes());
    out.push(NPDU_VERSION);
    out.push(control);
    out.extend_from_slice(apdu);
    out
}

fn confirmed_header(invoke_id: u8, service: u8) -> Vec<u8> {
    vec![
        pdu_type::CONFIRMED_REQUEST,
        MAX_APDU_ACCEPTED,
        invoke_id,
        service,
    ]
}

/// ReadProperty request packet
pub fn encode_read_property(invoke_id: u8, object: ObjectId, property: u32) -> Vec<u8> {
    let mut apdu = confirmed_header(invoke_id, confirmed_service::READ_PROPERTY);
    put_context_object_id(&mut apdu, 0, object);
    put_context_unsigned(&mut apdu, 1, u64::from(property));
    frame(&apdu, true)
}

/// WriteProperty request packet
pub fn encode_write_property(
    invoke_id: u8,
    object: ObjectId,
    property: u32,
    value: &BacnetValue,
    priority: Option<u8>,
) -> Vec<u8> {
    let mut apdu = confirmed_header(invoke_id, confirmed_service::WRITE_PROPERTY);
    put_context_object_id(&mut apdu, 0, object);
    put_context_unsigned(&mut apdu, 1, u64::from(property));
    put_opening(&mut apdu, 3);
    encode_application(&mut apdu, value);
    put_closing(&mut apdu, 3);
    if let Some(priority) = priority {
        put_context_unsigned(&mut apdu, 4, u64::from(priority));
    }
    frame(&apdu, true)
}

/// ReadProperty-ACK packet (device side)
pub fn encode_read_ack(
    invoke_id: u8,
    object: ObjectId,
    property: u32,
    values: &[BacnetValue],
) -> Vec<u8> {
    let mut apdu = vec![
        pdu_type::COMPLEX_ACK,
        invoke_id,
        confirmed_service::READ_PROPERTY,
    ];
    put_context_object_id(&mut apdu, 0, object);
    put_context_unsigned(&mut apdu, 1, u64::from(property));
    put_opening(&mut apdu, 3);
    for value in values {
        encode_application(&mut apdu, value);
    }
    put_closing(&mut apdu, 3);
    frame(&apdu, false)
}

/// SimpleACK packet (device side)
pub fn encode_simple_ack(invoke_id: u8, service: u8) -> Vec<u8> {
    frame(&[pdu_type::SIMPLE_ACK, invoke_id, service], false)
}

/// Error packet (device side)
pub fn encode_error(invoke_id: u8, service: u8, class: u32, code: u32) -> Vec<u8> {
    let mut apdu = vec![pdu_type::ERROR, invoke_id, service];
    encode_application(&mut apdu, &BacnetValue::Enumerated(class));
    encode_application(&mut apdu, &BacnetValue::Enumerated(code));
    frame(&apdu, false)
}

// ============================================================================
// Decoding
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Tag {
    Application { number: u8, len: usize },
    Context { number: u8, len: usize },
    Opening(u8),
    Closing(u8),
}

struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn is_empty(&self) -> bool {
        self.pos >= self.data.len()
    }

    fn u8(&mut self) -> Result<u8> {
        let b = *self
            .data
            .get(self.pos)
            .ok_or_else(|| GatewaySrvError::data("BACnet packet truncated"))?;
        self.pos += 1;
        Ok(b)
    }

    fn bytes(&mut self, n: usize) -> Result<&'a [u8]> {
        let slice = self
            .data
            .get(self.pos..self.pos + n)
            .ok_or_else(|| GatewaySrvError::data("BACnet packet truncated"))?;
        self.pos += n;
        Ok(slice)
    }

    fn skip(&mut self, n: usize) -> Result<()> {
        self.bytes(n).map(|_| ())
    }

    fn peek_tag(&self) -> Result<Tag> {
        let mut ahead = Reader {
            data: self.data,
            pos: self.pos,
        };
        ahead.tag()
    }

    fn tag(&mut self) -> Result<Tag> {
        let b = self.u8()?;
        let mut number = b >> 4;
        if number == 0x0F {
            number = self.u8()?;
        }
        let context = b & 0x08 != 0;
        let lvt = b & 0x07;

        if context && lvt == 6 {
            return Ok(Tag::Opening(number));
        }
        if context && lvt == 7 {
            return Ok(Tag::Closing(number));
        }

        let len = if lvt == 5 {
            match self.u8()? {
                254 => usize::from(u16::from_be_bytes([self.u8()?, self.u8()?])),
                255 => {
                    let b = self.bytes(4)?;
                    u32::from_be_bytes([b[0], b[1], b[2], b[3]]) as usize
                },
                n => usize::from(n),
            }
        } else {
            usize::from(lvt)
        };

        Ok(if context {
            Tag::Context { number, len }
        } else {
            Tag::Application { number, len }
        })
    }

    fn unsigned(&mut self, len: usize) -> Result<u64> {
        if len == 0 || len > 8 {
            return Err(GatewaySrvError::data(format!(
                "Invalid unsigned length {}",
                len
            )));
        }
        Ok(self
            .bytes(len)?
            .iter()
            .fold(0u64, |acc, b| (acc << 8) | u64::from(*b)))
    }

    fn signed(&mut self, len: usize) -> Result<i64> {
        let raw = self.unsigned(len)?;
        let shift = 64 - 8 * len as u32;
        Ok(((raw << shift) as i64) >> shift)
    }

    fn context_unsigned(&mut self, expected: u8) -> Result<u64> {
        match self.tag()? {
            Tag::Context { number, len } if number == expected => self.unsigned(len),
            other => Err(GatewaySrvError::data(format!(
                "Expected context tag {}, got {:?}",
                expected, other
            ))),
        }
    }

    fn application_value(&mut self, number: u8, len: usize) -> Result<BacnetValue> {
        let value = match number {
            app_tag::NULL => BacnetValue::Null,
            app_tag::BOOLEAN => BacnetValue::Boolean(len != 0),
            app_tag::UNSIGNED => BacnetValue::Unsigned(self.unsigned(len)?),
            app_tag::SIGNED => BacnetValue::Signed(self.signed(len)?),
            app_tag::REAL => {
                let b = self.bytes(4)?;
                BacnetValue::Real(f32::from_be_bytes([b[0], b[1], b[2], b[3]]))
            },
            app_tag::DOUBLE => {
                let b = self.bytes(8)?;
                let mut raw = [0u8; 8];
                raw.copy_from_slice(b);
                BacnetValue::Double(f64::from_be_bytes(raw))
            },
            app_tag::OCTET_STRING => BacnetValue::OctetString(self.bytes(len)?.to_vec()),
            app_tag::CHARACTER_STRING => {
                let content = self.bytes(len)?;
                let text = content.get(1..).unwrap_or_default();
                BacnetValue::CharacterString(String::from_utf8_lossy(text).into_owned())
            },
            app_tag::BIT_STRING => {
                let content = self.bytes(len)?;
                let (unused, packed) = content
                    .split_first()
                    .ok_or_else(|| GatewaySrvError::data("Empty bit string"))?;
                let count = (packed.len() * 8).saturating_sub(usize::from(*unused));
                BacnetValue::BitString(
                    (0..count)
                        .map(|i| packed[i / 8] & (0x80 >> (i % 8)) != 0)
                        .collect(),
                )
            },
            app_tag::ENUMERATED => BacnetValue::Enumerated(self.unsigned(len)? as u32),
            app_tag::DATE | app_tag::TIME => {
                let b = self.bytes(4)?;
                let raw = [b[0], b[1], b[2], b[3]];
                if number == app_tag::DATE {
                    BacnetValue::Date(raw)
                } else {
                    BacnetValue::Time(raw)
                }
            },
            app_tag::OBJECT_ID => {
                let b = self.bytes(4)?;
                BacnetValue::ObjectId(ObjectId::from_u32(u32::from_be_bytes([
                    b[0], b[1], b[2], b[3],
                ])))
            },
            other => {
                return Err(GatewaySrvError::data(format!(
                    "Unsupported application tag {}",
                    other
                )))
            },
        };
        Ok(value)
    }

    /// Values between an opening and closing tag of `number`
    ///
    /// Nested constructed values (vendor-specific priority value wrappers)
    /// collapse to their first primitive, or Null when they carry none.
    fn constructed_values(&mut self, number: u8) -> Result<Vec<BacnetValue>> {
        let mut values = Vec::new();
        loop {
            match self.tag()? {
                Tag::Closing(n) if n == number => return Ok(values),
                Tag::Application { number, len } => values.push(self.application_value(number, len)?),
                Tag::Opening(inner) => {
                    let nested = self.constructed_values(inner)?;
                    values.push(nested.into_iter().next().unwrap_or(BacnetValue::Null));
                },
                Tag::Context { len, .. } => self.skip(len)?,
                Tag::Closing(n) => {
                    return Err(GatewaySrvError::data(format!(
                        "Unbalanced closing tag {}",
                        n
                    )))
                },
            }
        }
    }

    fn enumerated(&mut self) -> Result<u32> {
        match self.tag()? {
            Tag::Application {
                number: app_tag::ENUMERATED,
                len,
            } => Ok(self.unsigned(len)? as u32),
            other => Err(GatewaySrvError::data(format!(
                "Expected enumerated, got {:?}",
                other
            ))),
        }
    }
}

/// Skip BVLC and NPDU; return the APDU
fn strip_headers(data: &[u8]) -> Result<&[u8]> {
    let mut r = Reader::new(data);
    if r.u8()? != BVLC_TYPE_BACNET_IP {
        return Err(GatewaySrvError::protocol("Not a BACnet/IP packet"));
    }
    let function = r.u8()?;
    let length = usize::from(u16::from_be_bytes([r.u8()?, r.u8()?]));
    if length != data.len() {
        return Err(GatewaySrvError::protocol(format!(
            "BVLC length {} does not match datagram size {}",
            length,
            data.len()
        )));
    }
    match function {
        bvlc_function::ORIGINAL_UNICAST | bvlc_function::ORIGINAL_BROADCAST => {},
        // Originating B/IP address
        bvlc_function::FORWARDED_NPDU => r.skip(6)?,
        other => {
            return Err(GatewaySrvError::protocol(format!(
                "Unsupported BVLC function 0x{:02X}",
                other
            )))
        },
    }

    if r.u8()? != NPDU_VERSION {
        return Err(GatewaySrvError::protocol("Unsupported NPDU version"));
    }
    let control = r.u8()?;
    if control & npdu_control::NETWORK_MESSAGE != 0 {
        return Err(GatewaySrvError::protocol("Network layer message"));
    }
    if control & npdu_control::DESTINATION != 0 {
        r.skip(2)?;
        let dlen = usize::from(r.u8()?);
        r.skip(dlen)?;
    }
    if control & npdu_control::SOURCE != 0 {
        r.skip(2)?;
        let slen = usize::from(r.u8()?);
        r.skip(slen)?;
    }
    if control & npdu_control::DESTINATION != 0 {
        // Hop count
        r.skip(1)?;
    }

    Ok(&data[r.pos..])
}

/// Decode a response to one of our confirmed requests
pub fn decode_response(data: &[u8]) -> Result<BacnetResponse> {
    let apdu = strip_headers(data)?;
    let mut r = Reader::new(apdu);
    let head = r.u8()?;
    let invoke_id = r.u8()?;

    let body = match head & 0xF0 {
        pdu_type::SIMPLE_ACK => ResponseBody::SimpleAck { service: r.u8()? },
        pdu_type::COMPLEX_ACK => {
            if head & 0x08 != 0 {
                return Err(GatewaySrvError::protocol(
                    "Segmented responses are not supported",
                ));
            }
            let service = r.u8()?;
            if service != confirmed_service::READ_PROPERTY {
                return Err(GatewaySrvError::protocol(format!(
                    "Unexpected ComplexACK service 0x{:02X}",
                    service
                )));
            }
            let object = ObjectId::from_u32(r.context_unsigned(0)? as u32);
            let property = r.context_unsigned(1)? as u32;
            if matches!(r.peek_tag()?, Tag::Context { number: 2, .. }) {
                r.context_unsigned(2)?;
            }
            match r.tag()? {
                Tag::Opening(3) => {},
                other => {
                    return Err(GatewaySrvError::data(format!(
                        "Expected property value, got {:?}",
                        other
                    )))
                },
            }
            let values = r.constructed_values(3)?;
            ResponseBody::ReadAck {
                object,
                property,
                values,
            }
        },
        pdu_type::ERROR => {
            let _service = r.u8()?;
            if matches!(r.peek_tag()?, Tag::Opening(0)) {
                r.tag()?;
            }
            let class = r.enumerated()?;
            let code = r.enumerated()?;
            ResponseBody::Failed(ServiceError::Error { class, code })
        },
        pdu_type::REJECT => ResponseBody::Failed(ServiceError::Reject(r.u8()?)),
        pdu_type::ABORT => ResponseBody::Failed(ServiceError::Abort(r.u8()?)),
        other => {
            return Err(GatewaySrvError::protocol(format!(
                "Unexpected PDU type 0x{:02X}",
                other
            )))
        },
    };

    Ok(BacnetResponse { invoke_id, body })
}

/// Decoded confirmed request (device side)
#[derive(Debug, Clone, PartialEq)]
pub struct ConfirmedRequest {
    pub invoke_id: u8,
    pub service: u8,
    pub object: ObjectId,
    pub property: u32,
    pub value: Option<BacnetValue>,
    pub priority: Option<u8>,
}

/// Decode a ReadProperty / WriteProperty request
pub fn decode_request(data: &[u8]) -> Result<ConfirmedRequest> {
    let apdu = strip_headers(data)?;
    let mut r = Reader::new(apdu);
    if r.u8()? & 0xF0 != pdu_type::CONFIRMED_REQUEST {
        return Err(GatewaySrvError::protocol("Not a confirmed request"));
    }
    let _max_apdu = r.u8()?;
    let invoke_id = r.u8()?;
    let service = r.u8()?;
    let object = ObjectId::from_u32(r.context_unsigned(0)? as u32);
    let property = r.context_unsigned(1)? as u32;

    let mut value = None;
    let mut priority = None;
    while !r.is_empty() {
        match r.tag()? {
            Tag::Opening(3) => value = r.constructed_values(3)?.into_iter().next(),
            Tag::Context { number: 4, len } => priority = Some(r.unsigned(len)? as u8),
            Tag::Context { len, .. } => r.skip(len)?,
            other => {
                return Err(GatewaySrvError::data(format!(
                    "Unexpected tag in request: {:?}",
                    other
                )))
            },
        }
    }

    Ok(ConfirmedRequest {
        invoke_id,
        service,
        object,
        property,
        value,
        priority,
    })
}
