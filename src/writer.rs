use chrono::{DateTime, FixedOffset};
use std::result::Result;

use crate::error::{ia_err, QuartzError};
use crate::packed;
use crate::types::FieldType;
use crate::types::FieldValue;
use crate::types::MapValue;

// Writer encodes values into the tagged binary wire format, appending to
// an internal byte buffer. Complex values (maps, arrays) reserve two
// unpacked i32 slots which are back-patched with the byte size and the
// element count when the value ends.
pub struct Writer {
    // The underlying byte buffer.
    pub buf: Vec<u8>,
}

impl Writer {
    pub fn new() -> Writer {
        Writer {
            buf: Vec::with_capacity(256),
        }
    }

    pub fn write_byte(&mut self, val: u8) {
        self.buf.push(val);
    }

    pub(crate) fn write_field_type(&mut self, ft: FieldType) {
        self.write_byte(ft as u8);
    }

    pub fn write_bool(&mut self, val: bool) {
        self.write_byte(val as u8);
    }

    pub fn write_bytes(&mut self, val: &[u8]) {
        self.write_packed_i32(val.len() as i32);
        self.buf.extend_from_slice(val);
    }

    pub fn write_i16(&mut self, val: i16) {
        self.buf.extend_from_slice(&val.to_be_bytes());
    }

    pub fn write_i32(&mut self, val: i32) {
        self.buf.extend_from_slice(&val.to_be_bytes());
    }

    pub fn write_float64(&mut self, val: f64) {
        self.buf.extend_from_slice(&val.to_be_bytes());
    }

    pub fn write_i32_at_offset(&mut self, val: i32, offset: usize) -> Result<(), QuartzError> {
        if (offset + 4) > self.buf.len() {
            return ia_err!(
                "invalid offset passed to write_i32_at_offset: len={} offset={}",
                self.buf.len(),
                offset
            );
        }
        self.buf[offset..(offset + 4)].copy_from_slice(&val.to_be_bytes());
        Ok(())
    }

    pub fn write_i16_at_offset(&mut self, val: i16, offset: usize) -> Result<(), QuartzError> {
        if (offset + 2) > self.buf.len() {
            return ia_err!(
                "invalid offset passed to write_i16_at_offset: len={} offset={}",
                self.buf.len(),
                offset
            );
        }
        self.buf[offset..(offset + 2)].copy_from_slice(&val.to_be_bytes());
        Ok(())
    }

    pub fn size(&self) -> usize {
        self.buf.len()
    }

    pub fn bytes(&self) -> &[u8] {
        self.buf.as_slice()
    }

    pub fn reset(&mut self) {
        self.buf.clear();
    }

    pub fn write_packed_i32(&mut self, val: i32) {
        packed::write_packed_i32(&mut self.buf, val);
    }

    pub fn write_packed_i64(&mut self, val: i64) {
        packed::write_packed_i64(&mut self.buf, val);
    }

    pub fn write_string(&mut self, val: &str) {
        packed::write_packed_i32(&mut self.buf, val.len() as i32);
        self.buf.extend_from_slice(val.as_bytes());
    }

    pub fn write_timestamp(&mut self, val: &DateTime<FixedOffset>) {
        self.write_string(&val.to_rfc3339());
    }

    pub fn write_binary(&mut self, val: &[u8]) {
        packed::write_packed_i32(&mut self.buf, val.len() as i32);
        self.buf.extend_from_slice(val);
    }

    pub fn write_field_value(&mut self, val: &FieldValue) {
        match val {
            FieldValue::Integer(i) => {
                self.write_field_type(FieldType::Integer);
                self.write_packed_i32(*i);
            }
            FieldValue::Long(i) => {
                self.write_field_type(FieldType::Long);
                self.write_packed_i64(*i);
            }
            FieldValue::String(s) => {
                self.write_field_type(FieldType::String);
                self.write_string(s);
            }
            FieldValue::Array(a) => {
                self.write_field_type(FieldType::Array);
                self.write_array(a);
            }
            FieldValue::Binary(b) => {
                self.write_field_type(FieldType::Binary);
                self.write_binary(b);
            }
            FieldValue::Map(m) => {
                self.write_field_type(FieldType::Map);
                self.write_map(m);
            }
            FieldValue::Record(m) => {
                self.write_field_type(FieldType::Record);
                self.write_map(m);
            }
            FieldValue::Boolean(b) => {
                self.write_field_type(FieldType::Boolean);
                self.write_bool(*b);
            }
            FieldValue::Double(d) => {
                self.write_field_type(FieldType::Double);
                self.write_float64(*d);
            }
            FieldValue::Timestamp(ts) => {
                self.write_field_type(FieldType::Timestamp);
                self.write_timestamp(ts);
            }
            FieldValue::Number(s) => {
                self.write_field_type(FieldType::Number);
                self.write_string(&s.to_string());
            }
            FieldValue::Null => {
                self.write_field_type(FieldType::Null);
            }
            FieldValue::JsonNull => {
                self.write_field_type(FieldType::JsonNull);
            }
            FieldValue::Empty => {
                self.write_field_type(FieldType::Empty);
            }
            FieldValue::Uninitialized => (),
        }
    }

    pub fn write_map_value(&mut self, val: &MapValue) {
        self.write_field_type(FieldType::Map);
        self.write_map(val);
    }

    pub fn write_array(&mut self, val: &Vec<FieldValue>) {
        // first 4 bytes are the overall byte size of this array, not
        // including these 4 bytes; patched after the elements are written
        let off = self.buf.len();
        self.write_i32(0);

        // next 4 bytes is the number of items in the array
        self.write_i32(val.len() as i32);

        for item in val.iter() {
            self.write_field_value(item);
        }

        let bsize = self.buf.len() - off - 4;
        self.write_i32_at_offset(bsize as i32, off).unwrap();
    }

    pub fn write_map(&mut self, val: &MapValue) {
        // same layout as arrays: byte size, then element count
        let off = self.buf.len();
        self.write_i32(0);

        self.write_i32(val.len() as i32);

        for (key, item) in val.iter() {
            self.write_string(key);
            self.write_field_value(item);
        }

        let bsize = self.buf.len() - off - 4;
        self.write_i32_at_offset(bsize as i32, off).unwrap();
    }
}

impl Default for Writer {
    fn default() -> Self {
        Self::new()
    }
}
