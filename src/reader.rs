use bigdecimal::BigDecimal;
use bigdecimal::Num;
use chrono::{DateTime, FixedOffset};
use std::result;
use std::str;

use crate::error::QuartzError;
use crate::error::QuartzErrorCode::BadProtocolMessage;
use crate::error::QuartzErrorCode::IllegalArgument;
use crate::packed;
use crate::types::string_to_rfc3339;
use crate::types::FieldType;
use crate::types::FieldValue;
use crate::types::MapValue;

// Reader decodes tagged binary bytes into in-memory values. The tagged
// binary format is the data exchange format between the QuartzDB proxy
// and its drivers.
pub struct Reader {
    // The underlying byte buffer.
    pub buf: Vec<u8>,
    pub offset: usize,
}

impl Reader {
    pub fn new() -> Reader {
        Reader {
            buf: Vec::with_capacity(256),
            offset: 0,
        }
    }

    pub fn from_bytes(mut self, val: &[u8]) -> Self {
        self.buf.clear();
        self.buf.extend_from_slice(val);
        self
    }

    pub fn read_byte(&mut self) -> result::Result<u8, QuartzError> {
        if self.offset >= self.buf.len() {
            return Err(QuartzError::new(
                BadProtocolMessage,
                "read_byte reached end of byte buffer",
            ));
        }
        let val: u8 = self.buf[self.offset];
        self.offset += 1;
        Ok(val)
    }

    // peek at the next byte without consuming it
    pub fn peek_byte(&self) -> result::Result<u8, QuartzError> {
        if self.offset >= self.buf.len() {
            return Err(QuartzError::new(
                BadProtocolMessage,
                "peek_byte reached end of byte buffer",
            ));
        }
        Ok(self.buf[self.offset])
    }

    pub fn read_bool(&mut self) -> result::Result<bool, QuartzError> {
        let v = self.read_byte()?;
        Ok(v != 0)
    }

    pub fn read_i16(&mut self) -> result::Result<i16, QuartzError> {
        if (self.offset + 2) > self.buf.len() {
            return Err(QuartzError::new(
                BadProtocolMessage,
                "read_i16 reached end of byte buffer",
            ));
        }
        let val: [u8; 2] = [self.buf[self.offset], self.buf[self.offset + 1]];
        self.offset += 2;
        Ok(i16::from_be_bytes(val))
    }

    pub fn read_u16(&mut self) -> result::Result<u16, QuartzError> {
        if (self.offset + 2) > self.buf.len() {
            return Err(QuartzError::new(
                BadProtocolMessage,
                "read_u16 reached end of byte buffer",
            ));
        }
        let val: [u8; 2] = [self.buf[self.offset], self.buf[self.offset + 1]];
        self.offset += 2;
        Ok(u16::from_be_bytes(val))
    }

    pub fn read_i32(&mut self) -> result::Result<i32, QuartzError> {
        if (self.offset + 4) > self.buf.len() {
            return Err(QuartzError::new(
                BadProtocolMessage,
                "read_i32 reached end of byte buffer",
            ));
        }
        let val: [u8; 4] = [
            self.buf[self.offset],
            self.buf[self.offset + 1],
            self.buf[self.offset + 2],
            self.buf[self.offset + 3],
        ];
        self.offset += 4;
        Ok(i32::from_be_bytes(val))
    }

    pub fn read_i32_min(&mut self, min: i32) -> result::Result<i32, QuartzError> {
        let i = self.read_i32()?;
        if i >= min {
            return Ok(i);
        }
        Err(QuartzError::new(
            IllegalArgument,
            format!(
                "invalid integer value {}, must be greater than or equal to {}",
                i, min
            )
            .as_str(),
        ))
    }

    pub fn read_float64(&mut self) -> result::Result<f64, QuartzError> {
        if (self.offset + 8) > self.buf.len() {
            return Err(QuartzError::new(
                BadProtocolMessage,
                "read_float64 reached end of byte buffer",
            ));
        }
        let mut val = [0u8; 8];
        val.copy_from_slice(&self.buf[self.offset..(self.offset + 8)]);
        self.offset += 8;
        Ok(f64::from_be_bytes(val))
    }

    pub fn read_packed_i32(&mut self) -> Result<i32, QuartzError> {
        packed::read_packed_i32(&self.buf, &mut self.offset)
    }

    pub fn read_packed_i64(&mut self) -> Result<i64, QuartzError> {
        packed::read_packed_i64(&self.buf, &mut self.offset)
    }

    pub fn read_string(&mut self) -> Result<String, QuartzError> {
        let slen = self.read_packed_i32()?;
        if slen <= 0 {
            // length -1 denotes a null string; both map to empty
            return Ok("".to_string());
        }
        let ulen = slen as usize;
        if (self.offset + ulen) > self.buf.len() {
            return Err(QuartzError::new(
                BadProtocolMessage,
                "read_string reached end of byte buffer",
            ));
        }
        match str::from_utf8(&self.buf[self.offset..(self.offset + ulen)]) {
            Ok(s) => {
                self.offset += ulen;
                Ok(String::from(s))
            }
            Err(_) => Err(QuartzError::new(
                BadProtocolMessage,
                "invalid utf8 in read_string",
            )),
        }
    }

    pub fn read_timestamp(&mut self) -> Result<DateTime<FixedOffset>, QuartzError> {
        let s = self.read_string()?;
        if s.is_empty() {
            return Err(QuartzError::new(
                BadProtocolMessage,
                "empty read on timestamp value",
            ));
        }
        string_to_rfc3339(&s)
    }

    pub fn read_binary(&mut self) -> Result<Vec<u8>, QuartzError> {
        let slen = self.read_packed_i32()?;
        if slen <= 0 {
            return Ok(Vec::new());
        }
        let ulen = slen as usize;
        if (self.offset + ulen) > self.buf.len() {
            return Err(QuartzError::new(
                BadProtocolMessage,
                "read_binary reached end of byte buffer",
            ));
        }
        self.offset += ulen;
        Ok(Vec::from(&self.buf[(self.offset - ulen)..self.offset]))
    }

    pub(crate) fn read_field_value(&mut self) -> Result<FieldValue, QuartzError> {
        let u = self.read_byte()?;
        let ftype = FieldType::try_from_u8(u)?;
        match ftype {
            FieldType::Integer => Ok(FieldValue::Integer(self.read_packed_i32()?)),
            FieldType::Long => Ok(FieldValue::Long(self.read_packed_i64()?)),
            FieldType::Double => Ok(FieldValue::Double(self.read_float64()?)),
            FieldType::String => Ok(FieldValue::String(self.read_string()?)),
            FieldType::Array => Ok(FieldValue::Array(self.read_array()?)),
            FieldType::Map => Ok(FieldValue::Map(self.read_map()?)),
            FieldType::Record => Ok(FieldValue::Record(self.read_map()?)),
            FieldType::Boolean => Ok(FieldValue::Boolean(self.read_bool()?)),
            FieldType::Binary => Ok(FieldValue::Binary(self.read_binary()?)),
            FieldType::Timestamp => Ok(FieldValue::Timestamp(self.read_timestamp()?)),
            FieldType::Number => {
                let num = self.read_string()?;
                Ok(FieldValue::Number(
                    BigDecimal::from_str_radix(&num, 10).map_err(|_| {
                        QuartzError::new(
                            BadProtocolMessage,
                            format!("can't convert string '{}' to valid decimal", &num).as_str(),
                        )
                    })?,
                ))
            }
            FieldType::Null => Ok(FieldValue::Null),
            FieldType::JsonNull => Ok(FieldValue::JsonNull),
            FieldType::Empty => Ok(FieldValue::Empty),
        }
    }

    // Discard the next typed value without materializing it. Complex
    // values are skipped wholesale using their recorded byte size.
    pub(crate) fn skip_field_value(&mut self) -> Result<(), QuartzError> {
        let u = self.read_byte()?;
        let ftype = FieldType::try_from_u8(u)?;
        match ftype {
            FieldType::Integer => {
                let _ = self.read_packed_i32()?;
            }
            FieldType::Long => {
                let _ = self.read_packed_i64()?;
            }
            FieldType::Double => {
                let _ = self.read_float64()?;
            }
            FieldType::Boolean => {
                let _ = self.read_byte()?;
            }
            FieldType::String | FieldType::Number | FieldType::Timestamp | FieldType::Binary => {
                let slen = self.read_packed_i32()?;
                if slen > 0 {
                    let ulen = slen as usize;
                    if (self.offset + ulen) > self.buf.len() {
                        return Err(QuartzError::new(
                            BadProtocolMessage,
                            "skip_field_value reached end of byte buffer",
                        ));
                    }
                    self.offset += ulen;
                }
            }
            FieldType::Array | FieldType::Map | FieldType::Record => {
                // byte size covers the element count and all elements
                let num_bytes = self.read_i32()?;
                if num_bytes < 0 || (self.offset + num_bytes as usize) > self.buf.len() {
                    return Err(QuartzError::new(
                        BadProtocolMessage,
                        "invalid complex value size in skip_field_value",
                    ));
                }
                self.offset += num_bytes as usize;
            }
            FieldType::Null | FieldType::JsonNull | FieldType::Empty => (),
        }
        Ok(())
    }

    pub fn read_array(&mut self) -> Result<Vec<FieldValue>, QuartzError> {
        // number of bytes consumed by the array
        let _num_bytes = self.read_i32()?;
        // number of items in the array
        let num_items = self.read_i32()?;
        let mut arr = Vec::<FieldValue>::with_capacity(num_items as usize);
        for _i in 0..num_items {
            arr.push(self.read_field_value()?);
        }
        Ok(arr)
    }

    pub fn read_string_array(&mut self) -> Result<Vec<String>, QuartzError> {
        let len = self.read_packed_i32()?;
        if len < -1 {
            return Err(QuartzError::new(
                BadProtocolMessage,
                "invalid array length in read_string_array",
            ));
        }
        if len <= 0 {
            return Ok(Vec::new());
        }
        let mut arr: Vec<String> = Vec::with_capacity(len as usize);
        for _i in 0..len {
            arr.push(self.read_string()?);
        }
        Ok(arr)
    }

    pub fn read_i32_array(&mut self) -> Result<Vec<i32>, QuartzError> {
        let len = self.read_packed_i32()?;
        if len < -1 {
            return Err(QuartzError::new(
                BadProtocolMessage,
                "invalid array length in read_i32_array",
            ));
        }
        if len <= 0 {
            return Ok(Vec::new());
        }
        let mut arr: Vec<i32> = Vec::with_capacity(len as usize);
        for _i in 0..len {
            arr.push(self.read_packed_i32()?);
        }
        Ok(arr)
    }

    pub fn read_map(&mut self) -> Result<MapValue, QuartzError> {
        // number of bytes consumed by the map
        let _num_bytes = self.read_i32()?;
        // number of items in the map
        let num_items = self.read_i32()?;
        let mut mv = MapValue::new();
        for _i in 0..num_items {
            let key = self.read_string()?;
            let val = self.read_field_value()?;
            mv.put_field_value(&key, val);
        }
        Ok(mv)
    }

    pub(crate) fn reset(&mut self) {
        self.offset = 0;
    }
}
