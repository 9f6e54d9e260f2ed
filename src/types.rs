use base64::prelude::{Engine as _, BASE64_STANDARD};
use bigdecimal::BigDecimal;
use bigdecimal::Num;
use chrono::{DateTime, FixedOffset, TimeZone, Utc};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::collections::HashMap;
use std::result::Result;
use std::str::FromStr;

use num_enum::TryFromPrimitive;

use crate::error::ia_err;
use crate::error::QuartzError;
use crate::error::QuartzErrorCode::BadProtocolMessage;
use crate::step_sort::SortSpec;

type QuartzDateTime = DateTime<FixedOffset>;

// Wire type codes for field values. Every value in the tagged binary
// format starts with one of these bytes.
#[derive(Debug, Eq, PartialEq, Clone, Copy, TryFromPrimitive)]
#[repr(u8)]
pub(crate) enum FieldType {
    // An ordered collection of zero or more elements.
    Array = 0,

    // An uninterpreted sequence of zero or more bytes.
    Binary, // 1

    // true or false.
    Boolean, // 2

    // IEEE-754 64-bit floating point.
    Double, // 3

    // Signed 32-bit integer.
    Integer, // 4

    // Signed 64-bit integer.
    Long, // 5

    // An unordered collection of zero or more string-keyed values.
    Map, // 6

    // UTF-8 string.
    String, // 7

    // A point in time, carried as an RFC3339 string on the wire.
    Timestamp, // 8

    // Arbitrary precision decimal, carried as a decimal string.
    Number, // 9

    // The JSON null value inside a JSON-typed column.
    JsonNull, // 10

    // SQL NULL: the value is unknown or inapplicable.
    Null, // 11

    // The result of a query expression that evaluated to nothing.
    Empty, // 12

    // A map whose iteration order is fixed by the table schema or query
    // projection. Servers return this variant for schema-known rows.
    Record, // 13
}

impl FieldType {
    pub(crate) fn try_from_u8(val: u8) -> Result<Self, QuartzError> {
        match FieldType::try_from(val) {
            Ok(ft) => Ok(ft),
            Err(_) => Err(QuartzError::new(
                BadProtocolMessage,
                &format!("unrecognized field type {}", val),
            )),
        }
    }
}

/// A wrapper distinguishing a contiguous byte sequence (Binary) from a
/// database ARRAY of byte values.
///
/// This exists so the [`ToFieldValue`] and [`FromFieldValue`] traits can
/// tell when a field holds binary data rather than an array of small
/// integers. The inner vector is public to allow direct setting and taking.
#[derive(Debug, Clone)]
pub struct BinaryValue {
    pub data: Vec<u8>,
}

/// The dynamic-typed value tree used for all data items exchanged with
/// the database.
///
/// Every data item is a `FieldValue`. The type system is a superset of
/// JSON: JSON-expressible values map directly, and Timestamp, Number,
/// Binary, and the SQL-specific Null/Empty variants extend it. Values
/// used for put operations are not validated against the target table
/// schema in the driver; validation happens in the server.
///
/// Complete rows returned by the driver are always materialized as the
/// [`Record`](FieldValue::Record) variant, which preserves the column
/// order of the table schema or query projection. `Record` and `Map`
/// compare as equal when they hold the same keys and values.
///
/// `FieldValue` instances are not internally synchronized. On input, they
/// should not be reused until the operation that uses them has returned.
// Note: do not derive Clone. Use clone_internal() when needed.
#[derive(Debug, Default)]
pub enum FieldValue {
    Array(Vec<FieldValue>),
    Binary(Vec<u8>),
    Boolean(bool),
    Double(f64),
    Integer(i32),
    Long(i64),
    Map(MapValue),
    Record(MapValue),
    String(String),
    Timestamp(DateTime<FixedOffset>),
    Number(BigDecimal),
    JsonNull,
    Null,
    Empty,
    #[default]
    Uninitialized,
}

impl Ord for FieldValue {
    fn cmp(&self, other: &Self) -> Ordering {
        compare_field_values(self, other)
    }
}

impl PartialEq for FieldValue {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for FieldValue {}

impl PartialOrd for FieldValue {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl FieldValue {
    pub fn new() -> Self {
        FieldValue::Uninitialized
    }
    pub fn get_map_value(self) -> Result<MapValue, QuartzError> {
        match self {
            FieldValue::Map(mv) | FieldValue::Record(mv) => Ok(mv),
            _ => ia_err!("get_map_value: not a Map: {:?}", self),
        }
    }
    pub fn get_map_value_ref(&self) -> Result<&MapValue, QuartzError> {
        match self {
            FieldValue::Map(mv) | FieldValue::Record(mv) => Ok(mv),
            _ => ia_err!("get_map_value_ref: not a Map: {:?}", self),
        }
    }
    pub fn get_array_value(self) -> Result<Vec<FieldValue>, QuartzError> {
        if let FieldValue::Array(av) = self {
            return Ok(av);
        }
        ia_err!("get_array_value: not an Array: {:?}", self)
    }
    pub fn get_array_value_ref(&self) -> Result<&Vec<FieldValue>, QuartzError> {
        if let FieldValue::Array(av) = self {
            return Ok(av);
        }
        ia_err!("get_array_value_ref: not an Array: {:?}", self)
    }
    pub fn is_atomic(&self) -> bool {
        !matches!(
            self,
            FieldValue::Array(_) | FieldValue::Map(_) | FieldValue::Record(_)
        )
    }
    pub(crate) fn get_type(&self) -> FieldType {
        match self {
            FieldValue::Array(_) => FieldType::Array,
            FieldValue::Map(_) => FieldType::Map,
            FieldValue::Record(_) => FieldType::Record,
            FieldValue::Integer(_) => FieldType::Integer,
            FieldValue::Long(_) => FieldType::Long,
            FieldValue::Number(_) => FieldType::Number,
            FieldValue::Double(_) => FieldType::Double,
            FieldValue::String(_) => FieldType::String,
            FieldValue::Boolean(_) => FieldType::Boolean,
            FieldValue::Binary(_) => FieldType::Binary,
            FieldValue::Timestamp(_) => FieldType::Timestamp,
            FieldValue::Empty => FieldType::Empty,
            FieldValue::JsonNull => FieldType::JsonNull,
            FieldValue::Null => FieldType::Null,
            FieldValue::Uninitialized => FieldType::Null,
        }
    }
    pub fn is_special(&self) -> bool {
        matches!(
            self,
            FieldValue::Empty | FieldValue::JsonNull | FieldValue::Null | FieldValue::Uninitialized
        )
    }
    pub fn is_null(&self) -> bool {
        self.is_special()
    }
    pub fn is_numeric(&self) -> bool {
        matches!(
            self,
            FieldValue::Integer(_)
                | FieldValue::Long(_)
                | FieldValue::Number(_)
                | FieldValue::Double(_)
        )
    }
    pub(crate) fn convert_empty_to_null(&mut self) {
        if let FieldValue::Empty = self {
            let _ = std::mem::replace(self, FieldValue::Null);
        }
    }
    // This exists because we want to be sure FieldValues never get cloned
    // without us doing it specifically.
    pub(crate) fn clone_internal(&self) -> FieldValue {
        match self {
            FieldValue::Array(a) => {
                let mut v: Vec<FieldValue> = Vec::with_capacity(a.len());
                for i in a {
                    v.push(i.clone_internal());
                }
                FieldValue::Array(v)
            }
            FieldValue::Map(m) => FieldValue::Map(m.clone_internal()),
            FieldValue::Record(m) => FieldValue::Record(m.clone_internal()),
            FieldValue::Integer(i) => FieldValue::Integer(*i),
            FieldValue::Long(l) => FieldValue::Long(*l),
            FieldValue::Number(n) => FieldValue::Number(n.clone()),
            FieldValue::Double(d) => FieldValue::Double(*d),
            FieldValue::String(s) => FieldValue::String(s.clone()),
            FieldValue::Boolean(b) => FieldValue::Boolean(*b),
            FieldValue::Binary(b) => FieldValue::Binary(b.clone()),
            FieldValue::Timestamp(t) => FieldValue::Timestamp(*t),
            FieldValue::Empty => FieldValue::Empty,
            FieldValue::JsonNull => FieldValue::JsonNull,
            FieldValue::Null => FieldValue::Null,
            FieldValue::Uninitialized => FieldValue::Uninitialized,
        }
    }
    // Rough in-memory footprint, used to enforce the client-side query
    // memory cap. Precision does not matter here, only proportionality.
    pub(crate) fn size_estimate(&self) -> i64 {
        const BASE: i64 = 16;
        match self {
            FieldValue::Array(a) => {
                let mut sz = BASE;
                for v in a {
                    sz += v.size_estimate();
                }
                sz
            }
            FieldValue::Map(m) | FieldValue::Record(m) => m.size_estimate(),
            FieldValue::String(s) => BASE + s.len() as i64,
            FieldValue::Binary(b) => BASE + b.len() as i64,
            FieldValue::Number(n) => BASE + n.to_string().len() as i64,
            _ => BASE,
        }
    }

    pub fn as_i32(&self) -> Result<i32, QuartzError> {
        if let FieldValue::Integer(i) = self {
            return Ok(*i);
        }
        ia_err!("as_i32 called for {:?}", self)
    }
    pub fn as_i64(&self) -> Result<i64, QuartzError> {
        match self {
            FieldValue::Integer(i) => Ok(*i as i64),
            FieldValue::Long(l) => Ok(*l),
            _ => ia_err!("as_i64 called for {:?}", self),
        }
    }
    pub fn as_f64(&self) -> Result<f64, QuartzError> {
        match self {
            FieldValue::Integer(i) => Ok(*i as f64),
            FieldValue::Long(l) => Ok(*l as f64),
            FieldValue::Double(d) => Ok(*d),
            _ => ia_err!("as_f64 called for {:?}", self),
        }
    }
    pub fn as_big_decimal(&self) -> Result<BigDecimal, QuartzError> {
        match self {
            FieldValue::Integer(i) => bd_from_i32(*i),
            FieldValue::Long(l) => bd_from_i64(*l),
            FieldValue::Double(d) => bd_from_f64(*d),
            FieldValue::Number(n) => Ok(n.clone()),
            FieldValue::String(s) => bd_from_str(s),
            _ => ia_err!("as_big_decimal called for {:?}", self),
        }
    }

    /// Convert this value to a [`serde_json::Value`].
    ///
    /// Timestamps become RFC3339 strings, Binary becomes a base64 string,
    /// and Null/JsonNull/Empty all become JSON `null`. Numbers keep full
    /// precision.
    pub fn to_json_value(&self) -> Result<serde_json::Value, QuartzError> {
        let v = match self {
            FieldValue::Integer(i) => serde_json::Value::from(*i),
            FieldValue::Long(l) => serde_json::Value::from(*l),
            FieldValue::Double(d) => serde_json::Value::from(*d),
            FieldValue::Boolean(b) => serde_json::Value::from(*b),
            FieldValue::String(s) => serde_json::Value::from(s.as_str()),
            FieldValue::Timestamp(t) => serde_json::Value::from(t.to_rfc3339()),
            FieldValue::Binary(b) => serde_json::Value::from(BASE64_STANDARD.encode(b)),
            FieldValue::Number(n) => {
                let s = n.to_string();
                match serde_json::Number::from_str(&s) {
                    Ok(num) => serde_json::Value::Number(num),
                    Err(e) => {
                        return ia_err!("cannot express Number '{}' as JSON: {}", s, e);
                    }
                }
            }
            FieldValue::Array(a) => {
                let mut arr: Vec<serde_json::Value> = Vec::with_capacity(a.len());
                for i in a {
                    arr.push(i.to_json_value()?);
                }
                serde_json::Value::Array(arr)
            }
            FieldValue::Map(m) | FieldValue::Record(m) => m.to_json_value()?,
            FieldValue::JsonNull | FieldValue::Null | FieldValue::Empty => serde_json::Value::Null,
            FieldValue::Uninitialized => {
                return ia_err!("cannot convert uninitialized value to JSON");
            }
        };
        Ok(v)
    }
}

pub(crate) fn bd_from_f64(val: f64) -> Result<BigDecimal, QuartzError> {
    match BigDecimal::try_from(val) {
        Ok(bd) => Ok(bd),
        Err(e) => ia_err!("error converting f64({}) to BigDecimal: {}", val, e),
    }
}

pub(crate) fn bd_from_i32(val: i32) -> Result<BigDecimal, QuartzError> {
    match BigDecimal::try_from(val) {
        Ok(bd) => Ok(bd),
        Err(e) => ia_err!("error converting i32({}) to BigDecimal: {}", val, e),
    }
}

pub(crate) fn bd_from_i64(val: i64) -> Result<BigDecimal, QuartzError> {
    match BigDecimal::try_from(val) {
        Ok(bd) => Ok(bd),
        Err(e) => ia_err!("error converting i64({}) to BigDecimal: {}", val, e),
    }
}

pub(crate) fn bd_from_str(val: &str) -> Result<BigDecimal, QuartzError> {
    match BigDecimal::from_str_radix(val, 10) {
        Ok(bd) => Ok(bd),
        Err(e) => ia_err!("error converting str({}) to BigDecimal: {}", val, e),
    }
}

/// Conversion from native values into [`FieldValue`].
///
/// This is the single point where user-supplied typed data enters the
/// driver. Implementations exist for the usual primitives, `Option`,
/// `Vec`, string-keyed maps, [`serde_json::Value`], and `FieldValue`
/// itself.
pub trait ToFieldValue {
    fn to_field_value(&self) -> FieldValue;
}

impl ToFieldValue for FieldValue {
    fn to_field_value(&self) -> FieldValue {
        self.clone_internal()
    }
}
impl ToFieldValue for f64 {
    fn to_field_value(&self) -> FieldValue {
        FieldValue::Double(*self)
    }
}
impl ToFieldValue for i64 {
    fn to_field_value(&self) -> FieldValue {
        FieldValue::Long(*self)
    }
}
impl ToFieldValue for i32 {
    fn to_field_value(&self) -> FieldValue {
        FieldValue::Integer(*self)
    }
}
impl ToFieldValue for i16 {
    fn to_field_value(&self) -> FieldValue {
        FieldValue::Integer(*self as i32)
    }
}
impl ToFieldValue for i8 {
    fn to_field_value(&self) -> FieldValue {
        FieldValue::Integer(*self as i32)
    }
}
impl ToFieldValue for String {
    fn to_field_value(&self) -> FieldValue {
        FieldValue::String(self.to_string())
    }
}
impl ToFieldValue for &str {
    fn to_field_value(&self) -> FieldValue {
        FieldValue::String(self.to_string())
    }
}
impl ToFieldValue for bool {
    fn to_field_value(&self) -> FieldValue {
        FieldValue::Boolean(*self)
    }
}
impl ToFieldValue for BigDecimal {
    fn to_field_value(&self) -> FieldValue {
        FieldValue::Number(self.clone())
    }
}
impl ToFieldValue for BinaryValue {
    fn to_field_value(&self) -> FieldValue {
        FieldValue::Binary(self.data.to_vec())
    }
}
impl ToFieldValue for MapValue {
    fn to_field_value(&self) -> FieldValue {
        FieldValue::Map(self.clone_internal())
    }
}
impl ToFieldValue for DateTime<FixedOffset> {
    fn to_field_value(&self) -> FieldValue {
        FieldValue::Timestamp(*self)
    }
}

impl ToFieldValue for serde_json::value::Value {
    fn to_field_value(&self) -> FieldValue {
        match self {
            serde_json::Value::Bool(b) => FieldValue::Boolean(*b),
            serde_json::Value::String(s) => FieldValue::String(s.clone()),
            serde_json::Value::Null => FieldValue::JsonNull,
            serde_json::Value::Number(n) => {
                if n.is_f64() {
                    FieldValue::Double(n.as_f64().unwrap())
                } else if n.is_i64() {
                    let nv64 = n.as_i64().unwrap();
                    if let Ok(nv32) = i32::try_from(nv64) {
                        FieldValue::Integer(nv32)
                    } else {
                        FieldValue::Long(nv64)
                    }
                } else {
                    // neither i64 nor f64: keep full precision as Number
                    if let Ok(bd) = BigDecimal::from_str_radix(&n.to_string(), 10) {
                        return FieldValue::Number(bd);
                    }
                    FieldValue::String(n.to_string())
                }
            }
            serde_json::Value::Array(a) => {
                let arr: Vec<FieldValue> = a.iter().map(|v| v.to_field_value()).collect();
                FieldValue::Array(arr)
            }
            serde_json::Value::Object(o) => match MapValue::from_json_map(o) {
                Ok(mv) => FieldValue::Map(mv),
                Err(_) => FieldValue::JsonNull,
            },
        }
    }
}

impl<T: ToFieldValue> ToFieldValue for Option<T> {
    fn to_field_value(&self) -> FieldValue {
        if let Some(v) = self {
            v.to_field_value()
        } else {
            FieldValue::Null
        }
    }
}

impl<T: ToFieldValue> ToFieldValue for &T {
    fn to_field_value(&self) -> FieldValue {
        (*self).to_field_value()
    }
}

impl<T: ToFieldValue> ToFieldValue for Vec<T> {
    fn to_field_value(&self) -> FieldValue {
        let v: Vec<FieldValue> = self.iter().map(|i| i.to_field_value()).collect();
        FieldValue::Array(v)
    }
}

impl<T: ToFieldValue> ToFieldValue for HashMap<String, T> {
    fn to_field_value(&self) -> FieldValue {
        let mut m = MapValue::new();
        for (k, v) in self {
            m.put(k, v);
        }
        FieldValue::Map(m)
    }
}
impl<T: ToFieldValue> ToFieldValue for BTreeMap<String, T> {
    fn to_field_value(&self) -> FieldValue {
        let mut m = MapValue::new();
        for (k, v) in self {
            m.put(k, v);
        }
        FieldValue::Map(m)
    }
}

/// Conversion from a [`FieldValue`] back into a native value.
pub trait FromFieldValue {
    fn from_field(fv: &FieldValue) -> Result<Self, QuartzError>
    where
        Self: Sized;
}

// a simple macro to make the following impls easier to read
macro_rules! ffv {
    ($f:expr, $a:path, $b:literal) => {{
        if let $a(v) = $f {
            return Ok(v.clone());
        }
        ia_err!(
            "wrong type for field: expected {}, actual: {:?}",
            $b,
            $f
        )
    }};
}

impl FromFieldValue for i32 {
    fn from_field(fv: &FieldValue) -> Result<Self, QuartzError> {
        ffv! {fv, FieldValue::Integer, "Integer"}
    }
}
impl FromFieldValue for i64 {
    fn from_field(fv: &FieldValue) -> Result<Self, QuartzError> {
        ffv! {fv, FieldValue::Long, "Long"}
    }
}
impl FromFieldValue for f64 {
    fn from_field(fv: &FieldValue) -> Result<Self, QuartzError> {
        ffv! {fv, FieldValue::Double, "Double"}
    }
}
impl FromFieldValue for String {
    fn from_field(fv: &FieldValue) -> Result<Self, QuartzError> {
        ffv! {fv, FieldValue::String, "String"}
    }
}
impl FromFieldValue for BigDecimal {
    fn from_field(fv: &FieldValue) -> Result<Self, QuartzError> {
        ffv! {fv, FieldValue::Number, "Number"}
    }
}
impl FromFieldValue for QuartzDateTime {
    fn from_field(fv: &FieldValue) -> Result<Self, QuartzError> {
        if let FieldValue::Timestamp(v) = fv {
            return Ok(*v);
        }
        // allow string-->Timestamp if it parses as RFC3339
        if let FieldValue::String(s) = fv {
            return string_to_rfc3339(s);
        }
        ia_err!(
            "wrong type for field: expected Timestamp, actual: {:?}",
            fv
        )
    }
}
impl FromFieldValue for bool {
    fn from_field(fv: &FieldValue) -> Result<Self, QuartzError> {
        ffv! {fv, FieldValue::Boolean, "Boolean"}
    }
}
impl FromFieldValue for BinaryValue {
    fn from_field(fv: &FieldValue) -> Result<Self, QuartzError> {
        if let FieldValue::Binary(v) = fv {
            return Ok(BinaryValue { data: v.clone() });
        }
        ia_err!("wrong type for field: expected Binary, actual: {:?}", fv)
    }
}
impl<T: FromFieldValue> FromFieldValue for Option<T> {
    fn from_field(fv: &FieldValue) -> Result<Self, QuartzError> {
        match fv {
            FieldValue::Null | FieldValue::JsonNull | FieldValue::Uninitialized => {
                return Ok(None)
            }
            _ => (),
        }
        Ok(Some(T::from_field(fv)?))
    }
}
impl<T: FromFieldValue> FromFieldValue for Vec<T> {
    fn from_field(fv: &FieldValue) -> Result<Self, QuartzError> {
        if let FieldValue::Array(v) = fv {
            let mut v1: Vec<T> = Vec::with_capacity(v.len());
            for i in v {
                v1.push(T::from_field(i)?);
            }
            return Ok(v1);
        }
        ia_err!("wrong type for field: expected Array, actual: {:?}", fv)
    }
}
impl<T: FromFieldValue> FromFieldValue for HashMap<String, T> {
    fn from_field(fv: &FieldValue) -> Result<Self, QuartzError> {
        if let FieldValue::Map(v) | FieldValue::Record(v) = fv {
            let mut m1: HashMap<String, T> = HashMap::new();
            for (s, v) in v.iter() {
                m1.insert(s.to_string(), T::from_field(v)?);
            }
            return Ok(m1);
        }
        ia_err!("wrong type for field: expected Map, actual: {:?}", fv)
    }
}

/// A string-keyed collection of [`FieldValue`]s that preserves insertion
/// order.
///
/// This is the primary struct for specifying the data in a single table
/// row, and the payload of both the `Map` and `Record` field variants.
/// Iteration yields entries in insertion order; `put` of an existing key
/// replaces the value in place without moving it.
// Note: do not derive Clone. Use clone_internal() when needed.
#[derive(Default, Debug)]
pub struct MapValue {
    entries: Vec<(String, FieldValue)>,
}

impl MapValue {
    pub fn new() -> Self {
        Default::default()
    }

    pub(crate) fn clone_internal(&self) -> MapValue {
        let mut entries = Vec::with_capacity(self.entries.len());
        for (k, v) in &self.entries {
            entries.push((k.clone(), v.clone_internal()));
        }
        MapValue { entries }
    }

    pub fn from_json_map(
        json: &serde_json::Map<String, serde_json::Value>,
    ) -> Result<Self, QuartzError> {
        let mut mv = MapValue::new();
        for (key, val) in json {
            if val.is_null() {
                mv.put_field_value(key, FieldValue::JsonNull);
            } else {
                mv.put(key, val);
            }
        }
        Ok(mv)
    }

    pub fn from_json_object(json: &serde_json::value::Value) -> Result<Self, QuartzError> {
        if let serde_json::Value::Object(o) = json {
            return Self::from_json_map(o);
        }
        ia_err!("from_json_object: json value is not an Object: {:#?}", json)
    }

    /// Parse a JSON document string into a MapValue. The document must be
    /// a JSON object at the top level.
    pub fn from_json_string(json: &str) -> Result<Self, QuartzError> {
        match serde_json::from_str::<serde_json::Value>(json) {
            Ok(v) => Self::from_json_object(&v),
            Err(e) => ia_err!("error parsing json into MapValue: {}", e),
        }
    }

    pub(crate) fn to_json_value(&self) -> Result<serde_json::Value, QuartzError> {
        let mut obj = serde_json::Map::new();
        for (k, v) in &self.entries {
            obj.insert(k.clone(), v.to_json_value()?);
        }
        Ok(serde_json::Value::Object(obj))
    }

    /// Serialize this map as a JSON document string. Fields appear in
    /// insertion order.
    pub fn to_json_string(&self) -> Result<String, QuartzError> {
        match serde_json::to_string(&self.to_json_value()?) {
            Ok(s) => Ok(s),
            Err(e) => ia_err!("error writing MapValue as json: {}", e),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &FieldValue)> {
        self.entries.iter().map(|(k, v)| (k, v))
    }

    fn index_of(&self, key: &str) -> Option<usize> {
        self.entries.iter().position(|(k, _)| k == key)
    }

    pub fn put(&mut self, key: &str, val: impl ToFieldValue) {
        self.put_field_value(key, val.to_field_value());
    }

    pub fn column(mut self, key: &str, val: impl ToFieldValue) -> MapValue {
        self.put(key, val);
        self
    }

    pub fn put_i32(&mut self, key: &str, val: i32) {
        self.put_field_value(key, FieldValue::Integer(val));
    }
    pub fn i32(mut self, key: &str, val: i32) -> MapValue {
        self.put_i32(key, val);
        self
    }
    pub fn get_i32(&self, key: &str) -> Option<i32> {
        if let FieldValue::Integer(i) = self.get_field_value(key)? {
            Some(*i)
        } else {
            None
        }
    }

    pub fn put_i64(&mut self, key: &str, val: i64) {
        self.put_field_value(key, FieldValue::Long(val));
    }
    pub fn i64(mut self, key: &str, val: i64) -> MapValue {
        self.put_i64(key, val);
        self
    }
    pub fn get_i64(&self, key: &str) -> Option<i64> {
        if let FieldValue::Long(i) = self.get_field_value(key)? {
            Some(*i)
        } else {
            None
        }
    }

    pub fn put_float64(&mut self, key: &str, val: f64) {
        self.put_field_value(key, FieldValue::Double(val));
    }
    pub fn get_float64(&self, key: &str) -> Option<f64> {
        if let FieldValue::Double(i) = self.get_field_value(key)? {
            Some(*i)
        } else {
            None
        }
    }

    pub fn put_str(&mut self, key: &str, val: &str) {
        self.put_string(key, val.to_string())
    }
    pub fn str(mut self, key: &str, val: &str) -> MapValue {
        self.put_str(key, val);
        self
    }
    pub fn put_string(&mut self, key: &str, val: String) {
        self.put_field_value(key, FieldValue::String(val));
    }
    pub fn string(mut self, key: &str, val: String) -> MapValue {
        self.put_string(key, val);
        self
    }
    pub fn get_string(&self, key: &str) -> Option<String> {
        if let FieldValue::String(s) = self.get_field_value(key)? {
            Some(s.clone())
        } else {
            None
        }
    }

    pub fn put_timestamp(&mut self, key: &str, val: &DateTime<FixedOffset>) {
        self.put_field_value(key, FieldValue::Timestamp(*val));
    }
    pub fn timestamp(mut self, key: &str, val: &DateTime<FixedOffset>) -> MapValue {
        self.put_timestamp(key, val);
        self
    }
    pub fn get_timestamp(&self, key: &str) -> Option<DateTime<FixedOffset>> {
        if let FieldValue::Timestamp(t) = self.get_field_value(key)? {
            Some(*t)
        } else {
            None
        }
    }

    pub fn put_bool(&mut self, key: &str, val: bool) {
        self.put_field_value(key, FieldValue::Boolean(val));
    }
    pub fn get_bool(&self, key: &str) -> Option<bool> {
        if let FieldValue::Boolean(b) = self.get_field_value(key)? {
            Some(*b)
        } else {
            None
        }
    }

    pub fn put_binary(&mut self, key: &str, val: Vec<u8>) {
        self.put_field_value(key, FieldValue::Binary(val));
    }
    pub fn get_binary(&self, key: &str) -> Option<&Vec<u8>> {
        if let FieldValue::Binary(b) = self.get_field_value(key)? {
            Some(b)
        } else {
            None
        }
    }

    pub fn put_array(&mut self, key: &str, val: Vec<FieldValue>) {
        self.put_field_value(key, FieldValue::Array(val));
    }
    pub fn get_array(&self, key: &str) -> Option<&Vec<FieldValue>> {
        if let FieldValue::Array(a) = self.get_field_value(key)? {
            Some(a)
        } else {
            None
        }
    }

    pub fn put_field_value(&mut self, key: &str, val: FieldValue) {
        match self.index_of(key) {
            Some(i) => self.entries[i].1 = val,
            None => self.entries.push((key.to_string(), val)),
        }
    }
    pub fn get_field_value(&self, key: &str) -> Option<&FieldValue> {
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v)
    }
    pub fn get_field_value_clone(&self, key: &str) -> Option<FieldValue> {
        Some(self.get_field_value(key)?.clone_internal())
    }
    pub fn take_field_value(&mut self, key: &str) -> Result<FieldValue, QuartzError> {
        if let Some(i) = self.index_of(key) {
            return Ok(self.entries.remove(i).1);
        }
        ia_err!("field '{}' does not exist in map", key)
    }

    pub fn get_map(&self, key: &str) -> Option<&MapValue> {
        match self.get_field_value(key)? {
            FieldValue::Map(m) | FieldValue::Record(m) => Some(m),
            _ => None,
        }
    }

    pub fn put_json_map_value(&mut self, key: &str, json: &str) -> Result<(), QuartzError> {
        let mv = MapValue::from_json_string(json)?;
        self.put_field_value(key, FieldValue::Map(mv));
        Ok(())
    }

    pub(crate) fn convert_empty_to_null(&mut self) {
        for (_k, v) in self.entries.iter_mut() {
            v.convert_empty_to_null();
        }
    }

    pub(crate) fn size_estimate(&self) -> i64 {
        let mut sz: i64 = 32;
        for (k, v) in &self.entries {
            sz += k.len() as i64 + v.size_estimate();
        }
        sz
    }

    // entries ordered by key, for order-insensitive comparison
    fn sorted_entries(&self) -> Vec<&(String, FieldValue)> {
        let mut v: Vec<&(String, FieldValue)> = self.entries.iter().collect();
        v.sort_by(|a, b| a.0.cmp(&b.0));
        v
    }
}

impl Ord for MapValue {
    fn cmp(&self, other: &Self) -> Ordering {
        compare_map_values_sortspec(self, other, &SortSpec::default())
    }
}

impl PartialEq for MapValue {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for MapValue {}

impl PartialOrd for MapValue {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl std::fmt::Display for MapValue {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{:#?}", self)
    }
}

/// Consistency guarantees for read operations.
///
/// Eventual consistency means the values read may be very slightly out of
/// date; this is the default. Absolute consistency guarantees current
/// values are read, at double the read-unit cost.
#[derive(Clone, Copy, Default, Debug, Eq, PartialEq)]
#[repr(u8)]
pub enum Consistency {
    // Absolute consistency.
    Absolute = 1,
    // Eventual consistency.
    #[default]
    Eventual = 2,
}

/// The synchronization policy applied at the master or at replicas when
/// a write commits.
#[derive(Clone, Copy, Default, Debug, Eq, PartialEq)]
#[repr(i32)]
pub enum SyncPolicy {
    /// Commit onto stable storage before returning.
    #[default]
    Sync = 1,
    /// Do not wait for the write to reach the file system.
    NoSync = 2,
    /// Write to the file system but do not force to stable storage.
    WriteNoSync = 3,
}

/// How many replicas must acknowledge a write before it is considered
/// committed.
#[derive(Clone, Copy, Default, Debug, Eq, PartialEq)]
#[repr(i32)]
pub enum ReplicaAckPolicy {
    /// All replicas must acknowledge.
    All = 1,
    /// No acknowledgements required.
    NoAck = 2,
    /// A simple majority of replicas must acknowledge.
    #[default]
    SimpleMajority = 3,
}

/// The durability of a write operation: the master sync policy, the
/// replica sync policy, and the replica acknowledgement policy.
///
/// Durability is only used by on-premise installations; the cloud service
/// manages durability itself.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Durability {
    pub master_sync: SyncPolicy,
    pub replica_sync: SyncPolicy,
    pub replica_ack: ReplicaAckPolicy,
}

impl Durability {
    /// Sync on master and replicas, simple majority of acks.
    pub fn commit_sync() -> Durability {
        Durability {
            master_sync: SyncPolicy::Sync,
            replica_sync: SyncPolicy::Sync,
            replica_ack: ReplicaAckPolicy::SimpleMajority,
        }
    }
    /// No syncing anywhere, simple majority of acks.
    pub fn commit_no_sync() -> Durability {
        Durability {
            master_sync: SyncPolicy::NoSync,
            replica_sync: SyncPolicy::NoSync,
            replica_ack: ReplicaAckPolicy::SimpleMajority,
        }
    }
    /// Write without forcing to stable storage, simple majority of acks.
    pub fn commit_write_no_sync() -> Durability {
        Durability {
            master_sync: SyncPolicy::WriteNoSync,
            replica_sync: SyncPolicy::WriteNoSync,
            replica_ack: ReplicaAckPolicy::SimpleMajority,
        }
    }
    // Wire form: three 2-bit groups packed into one integer.
    pub(crate) fn to_wire(&self) -> i32 {
        (self.master_sync as i32)
            | ((self.replica_sync as i32) << 2)
            | ((self.replica_ack as i32) << 4)
    }
}

/// The unit a [`TimeToLive`] duration is expressed in.
#[derive(Clone, Copy, Default, Debug, Eq, PartialEq)]
pub enum TtlUnit {
    Hours,
    #[default]
    Days,
}

/// A time-to-live duration for a table row.
///
/// TTL durations are whole numbers of hours or days. A value of zero
/// means the row does not expire. Expiration times are rounded up to the
/// next hour or day boundary in UTC.
#[derive(Clone, Copy, Default, Debug, Eq, PartialEq)]
pub struct TimeToLive {
    pub value: u64,
    pub unit: TtlUnit,
}

impl TimeToLive {
    pub fn of_days(days: u64) -> TimeToLive {
        TimeToLive {
            value: days,
            unit: TtlUnit::Days,
        }
    }
    pub fn of_hours(hours: u64) -> TimeToLive {
        TimeToLive {
            value: hours,
            unit: TtlUnit::Hours,
        }
    }
    /// The distinguished "never expires" value.
    pub fn do_not_expire() -> TimeToLive {
        TimeToLive {
            value: 0,
            unit: TtlUnit::Days,
        }
    }
    pub fn is_do_not_expire(&self) -> bool {
        self.value == 0
    }
    fn unit_millis(&self) -> i64 {
        match self.unit {
            TtlUnit::Hours => 3_600_000,
            TtlUnit::Days => 86_400_000,
        }
    }
    // Wire form: "N DAYS" or "N HOURS"
    pub(crate) fn to_wire_string(&self) -> String {
        match self.unit {
            TtlUnit::Hours => format!("{} HOURS", self.value),
            TtlUnit::Days => format!("{} DAYS", self.value),
        }
    }
    /// Compute the absolute expiration time for a row written at
    /// `reference`: reference plus the duration, rounded up to the next
    /// hour or day boundary in UTC.
    pub fn to_expiration_time(&self, reference: &DateTime<FixedOffset>) -> DateTime<FixedOffset> {
        let unit_ms = self.unit_millis();
        let expiry = reference.timestamp_millis() + (self.value as i64) * unit_ms;
        let rounded = ((expiry + unit_ms - 1) / unit_ms) * unit_ms;
        Utc.timestamp_millis_opt(rounded).unwrap().fixed_offset()
    }
}

// OpCode identifies a request kind on the wire.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[repr(u8)]
#[allow(dead_code)]
pub(crate) enum OpCode {
    // Delete a single row.
    Delete = 0,

    // Delete a single row if it matches a given row version.
    DeleteIfVersion = 1,

    // Retrieve a single row.
    Get = 2,

    // Unconditionally put a single row.
    Put = 3,

    // Put a row only if no row with the same key exists.
    PutIfAbsent = 4,

    // Put a row only if a row with the same key exists.
    PutIfPresent = 5,

    // Put a row only if it matches a given row version.
    PutIfVersion = 6,

    // Run one batch of a SQL query (select, insert, update or delete).
    Query = 7,

    // Compile a SQL statement without executing it.
    Prepare = 8,

    // Perform multiple write operations in a single transaction.
    WriteMultiple = 9,

    // Delete a range of rows in a single transaction.
    MultiDelete = 10,

    // Retrieve static information about a table.
    GetTable = 11,

    // Retrieve information about a table's indexes.
    GetIndexes = 12,

    // Retrieve usage information for a table. Cloud only.
    GetTableUsage = 13,

    // List available table names.
    ListTables = 14,

    // Manage table schema, limits or tags.
    TableRequest = 15,

    // Table-independent administrative DDL. On-premise only.
    SystemRequest = 23,

    // Retrieve the status of a SystemRequest.
    SystemStatusRequest = 24,

    // Add a remote replica to a table. Cloud only.
    AddReplica = 33,

    // Drop a remote replica from a table. Cloud only.
    DropReplica = 34,

    // Retrieve replica lag statistics. Cloud only.
    GetReplicaStats = 35,
}

// Capacity represents the read/write throughput consumed by an operation.
// Capacity is additive across the batches of a continued operation.
#[derive(Clone, Copy, Default, Debug)]
pub struct Capacity {
    // kilobytes consumed for reads.
    pub read_kb: i32,

    // kilobytes consumed for writes.
    pub write_kb: i32,

    // read units consumed. A read unit represents one eventually
    // consistent read per second for data up to 1 KB; an absolutely
    // consistent read consumes double that.
    pub read_units: i32,

    // write units consumed.
    pub write_units: i32,
}

impl Capacity {
    pub(crate) fn add(&mut self, c: &Capacity) {
        self.read_kb += c.read_kb;
        self.read_units += c.read_units;
        self.write_kb += c.write_kb;
        self.write_units += c.write_units;
    }
}

#[derive(Clone, Copy, Default, Debug, Eq, PartialEq)]
#[repr(i32)]
pub enum TableState {
    // The table is ready to be used. This is the steady state after
    // creation or modification.
    #[default]
    Active = 0,
    // The table is being created and cannot yet be used.
    Creating = 1,
    // The table has been dropped or does not exist.
    Dropped = 2,
    // The table is being dropped and cannot be used.
    Dropping = 3,
    // The table is being updated. It is available for normal use, but
    // additional modification operations are not permitted while the
    // table is in this state.
    Updating = 4,
}

impl TableState {
    pub fn from_int(icode: i32) -> Result<TableState, QuartzError> {
        match icode {
            0 => Ok(TableState::Active),
            1 => Ok(TableState::Creating),
            2 => Ok(TableState::Dropped),
            3 => Ok(TableState::Dropping),
            4 => Ok(TableState::Updating),
            _ => Err(QuartzError::new(
                BadProtocolMessage,
                format!("invalid TableState {} in result response", icode).as_str(),
            )),
        }
    }
}

#[derive(Clone, Copy, Default, Debug, Eq, PartialEq)]
#[repr(i32)]
pub enum OperationState {
    // The administrative operation has finished.
    #[default]
    Complete = 0,
    // The administrative operation is still running.
    Working = 1,
}

impl OperationState {
    pub fn from_int(icode: i32) -> Result<OperationState, QuartzError> {
        match icode {
            0 => Ok(OperationState::Complete),
            1 => Ok(OperationState::Working),
            _ => Err(QuartzError::new(
                BadProtocolMessage,
                "invalid OperationState in result response",
            )),
        }
    }
}

#[derive(Clone, Copy, Default, Debug, Eq, PartialEq)]
pub enum CapacityMode {
    // Throughput is provisioned up front.
    #[default]
    Provisioned = 1,
    // Throughput scales on demand, up to the service cap.
    OnDemand = 2,
}

/// Throughput and storage limits for a table. Cloud only; child tables
/// inherit the limits of their topmost ancestor.
#[derive(Default, Debug, Clone)]
pub struct TableLimits {
    pub read_units: i32,
    pub write_units: i32,
    pub storage_gb: i32,
    pub mode: CapacityMode,
}

impl TableLimits {
    // Create a new TableLimits with provisioned values
    pub fn provisioned(read_units: i32, write_units: i32, storage_gb: i32) -> TableLimits {
        TableLimits {
            read_units,
            write_units,
            storage_gb,
            mode: CapacityMode::Provisioned,
        }
    }

    // create a new TableLimits with on-demand values
    pub fn on_demand(storage_gb: i32) -> TableLimits {
        TableLimits {
            read_units: 0,
            write_units: 0,
            storage_gb,
            mode: CapacityMode::OnDemand,
        }
    }
}

pub(crate) fn string_to_rfc3339(s: &str) -> Result<DateTime<FixedOffset>, QuartzError> {
    // try as-is
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(dt);
    }
    // if that didn't work, try adding a "Z" to the end
    let mut ds = String::from(s);
    ds.push('Z');
    match DateTime::parse_from_rfc3339(&ds) {
        Ok(dt) => Ok(dt),
        Err(_) => ia_err!("error parsing string '{}' into RFC3339 timestamp", s),
    }
}

// TopologyInfo describes the current shard membership of the store, as
// required for query execution. It travels on responses; the stored copy
// only ever advances by sequence number.
#[derive(Default, Debug, Eq, PartialEq, Clone)]
pub(crate) struct TopologyInfo {
    // the sequence number of the topology.
    pub seq_num: i32,

    // the shard IDs currently in service.
    pub shard_ids: Vec<i32>,
}

impl TopologyInfo {
    pub(crate) fn is_valid(&self) -> bool {
        self.seq_num >= 0 && !self.shard_ids.is_empty()
    }
}

pub(crate) fn sort_results(
    r1: &MapValue,
    r2: &MapValue,
    sort_fields: &Vec<String>,
    sort_specs: &Vec<SortSpec>,
) -> Ordering {
    for i in 0..sort_fields.len() {
        let ov1 = r1.get_field_value(&sort_fields[i]);
        let ov2 = r2.get_field_value(&sort_fields[i]);
        if ov1.is_none() && ov2.is_none() {
            continue;
        }
        if ov1.is_none() {
            return Ordering::Less;
        }
        if ov2.is_none() {
            return Ordering::Greater;
        }
        let comp = compare_atomics_total_order_sortspec(ov2.unwrap(), ov1.unwrap(), &sort_specs[i]);
        if comp != Ordering::Equal {
            return comp;
        }
    }
    Ordering::Equal
}

// Implements a total order among atomic values. The following order is
// used among values that are not normally comparable with each other:
//
// numerics < timestamps < strings < booleans < binaries < empty < json null < null
pub(crate) fn compare_atomics_total_order(v0: &FieldValue, v1: &FieldValue) -> Ordering {
    let tc0 = v0.get_type();
    let tc1 = v1.get_type();

    match tc0 {
        FieldType::Array | FieldType::Map | FieldType::Record => {
            panic!("cannot compare atomics on complex type {:?}", tc0);
        }
        FieldType::Null => {
            if tc1 == FieldType::Null {
                return Ordering::Equal;
            }
            Ordering::Greater
        }
        FieldType::JsonNull => match tc1 {
            FieldType::Null => Ordering::Less,
            FieldType::JsonNull => Ordering::Equal,
            _ => Ordering::Greater,
        },
        FieldType::Empty => match tc1 {
            FieldType::Null | FieldType::JsonNull => Ordering::Less,
            FieldType::Empty => Ordering::Equal,
            _ => Ordering::Greater,
        },
        FieldType::Integer => {
            let iv0 = i32::from_field(v0).unwrap();
            match tc1 {
                FieldType::Integer => {
                    let iv1 = i32::from_field(v1).unwrap();
                    iv1.cmp(&iv0)
                }
                FieldType::Long => {
                    let iv1 = i64::from_field(v1).unwrap();
                    iv1.cmp(&(iv0 as i64))
                }
                FieldType::Double => {
                    let iv1 = f64::from_field(v1).unwrap();
                    compare_floats(&(iv0 as f64), &iv1)
                }
                FieldType::Number => {
                    let bd1 = BigDecimal::from_field(v1).unwrap();
                    let bd0 = BigDecimal::default() + iv0;
                    bd1.cmp(&bd0)
                }
                _ => Ordering::Less,
            }
        }
        FieldType::Long => {
            let iv0 = i64::from_field(v0).unwrap();
            match tc1 {
                FieldType::Integer => {
                    let iv1 = i32::from_field(v1).unwrap() as i64;
                    iv1.cmp(&iv0)
                }
                FieldType::Long => {
                    let iv1 = i64::from_field(v1).unwrap();
                    iv1.cmp(&iv0)
                }
                FieldType::Double => {
                    let iv1 = f64::from_field(v1).unwrap();
                    compare_floats(&(iv0 as f64), &iv1)
                }
                FieldType::Number => {
                    let bd1 = BigDecimal::from_field(v1).unwrap();
                    let bd0 = BigDecimal::default() + iv0;
                    bd1.cmp(&bd0)
                }
                _ => Ordering::Less,
            }
        }
        FieldType::Double => {
            let fv0 = f64::from_field(v0).unwrap();
            match tc1 {
                FieldType::Integer => {
                    let fv1 = i32::from_field(v1).unwrap() as f64;
                    compare_floats(&fv0, &fv1)
                }
                FieldType::Long => {
                    let fv1 = i64::from_field(v1).unwrap() as f64;
                    compare_floats(&fv0, &fv1)
                }
                FieldType::Double => {
                    let fv1 = f64::from_field(v1).unwrap();
                    compare_floats(&fv0, &fv1)
                }
                FieldType::Number => {
                    let bd1 = BigDecimal::from_field(v1).unwrap();
                    let bd0 = BigDecimal::try_from(fv0).unwrap();
                    bd1.cmp(&bd0)
                }
                _ => Ordering::Less,
            }
        }
        FieldType::Number => {
            let bd0 = BigDecimal::from_field(v0).unwrap();
            match tc1 {
                FieldType::Integer => {
                    let iv1 = i32::from_field(v1).unwrap();
                    let bd1 = BigDecimal::default() + iv1;
                    bd1.cmp(&bd0)
                }
                FieldType::Long => {
                    let iv1 = i64::from_field(v1).unwrap();
                    let bd1 = BigDecimal::default() + iv1;
                    bd1.cmp(&bd0)
                }
                FieldType::Double => {
                    let fv1 = f64::from_field(v1).unwrap();
                    let bd1 = BigDecimal::try_from(fv1).unwrap();
                    bd1.cmp(&bd0)
                }
                FieldType::Number => {
                    let bd1 = BigDecimal::from_field(v1).unwrap();
                    bd1.cmp(&bd0)
                }
                _ => Ordering::Less,
            }
        }
        FieldType::Timestamp => {
            let tv0 = QuartzDateTime::from_field(v0).unwrap();
            match tc1 {
                FieldType::Timestamp => {
                    let tv1 = QuartzDateTime::from_field(v1).unwrap();
                    tv1.cmp(&tv0)
                }
                FieldType::Integer
                | FieldType::Long
                | FieldType::Double
                | FieldType::Number => Ordering::Greater,
                _ => Ordering::Less,
            }
        }
        FieldType::String => {
            let sv0 = String::from_field(v0).unwrap();
            match tc1 {
                FieldType::String => {
                    let sv1 = String::from_field(v1).unwrap();
                    sv1.cmp(&sv0)
                }
                FieldType::Integer
                | FieldType::Long
                | FieldType::Double
                | FieldType::Number
                | FieldType::Timestamp => Ordering::Greater,
                _ => Ordering::Less,
            }
        }
        FieldType::Boolean => {
            let bv0 = bool::from_field(v0).unwrap();
            match tc1 {
                FieldType::Boolean => {
                    let bv1 = bool::from_field(v1).unwrap();
                    bv1.cmp(&bv0)
                }
                FieldType::Integer
                | FieldType::Long
                | FieldType::Double
                | FieldType::Number
                | FieldType::Timestamp
                | FieldType::String => Ordering::Greater,
                _ => Ordering::Less,
            }
        }
        FieldType::Binary => {
            let bv0 = BinaryValue::from_field(v0).unwrap();
            match tc1 {
                FieldType::Binary => {
                    let bv1 = BinaryValue::from_field(v1).unwrap();
                    bv1.data.cmp(&bv0.data)
                }
                FieldType::Integer
                | FieldType::Long
                | FieldType::Double
                | FieldType::Number
                | FieldType::Timestamp
                | FieldType::String
                | FieldType::Boolean => Ordering::Greater,
                _ => Ordering::Less,
            }
        }
    }
}

fn compare_atomics_total_order_sortspec(
    v1: &FieldValue,
    v2: &FieldValue,
    ss: &SortSpec,
) -> Ordering {
    let mut comp = compare_atomics_total_order(v1, v2);

    if ss.is_desc {
        comp = comp.reverse();
    }

    if !ss.is_desc && ss.nulls_first {
        if v1.is_special() && !v2.is_special() {
            comp = Ordering::Less;
        }
        if !v1.is_special() && v2.is_special() {
            comp = Ordering::Greater;
        }
    } else if ss.is_desc && !ss.nulls_first {
        if v1.is_special() && !v2.is_special() {
            comp = Ordering::Greater;
        }
        if !v1.is_special() && v2.is_special() {
            comp = Ordering::Less;
        }
    }
    comp
}

pub(crate) fn compare_field_values(v1: &FieldValue, v2: &FieldValue) -> Ordering {
    let ss = SortSpec::default();
    compare_total_order(v1, v2, &ss)
}

// Implements a total order among all kinds of values.
pub(crate) fn compare_total_order(v1: &FieldValue, v2: &FieldValue, ss: &SortSpec) -> Ordering {
    let complex1 = !v1.is_atomic();
    let complex2 = !v2.is_atomic();

    match (v1, v2) {
        (
            FieldValue::Map(m1) | FieldValue::Record(m1),
            FieldValue::Map(m2) | FieldValue::Record(m2),
        ) => compare_map_values_sortspec(m1, m2, ss),
        (FieldValue::Array(a1), FieldValue::Array(a2)) => compare_arrays(a1, a2, ss),
        (FieldValue::Map(_) | FieldValue::Record(_), FieldValue::Array(_)) => {
            modify_order(Ordering::Less, ss)
        }
        (FieldValue::Array(_), FieldValue::Map(_) | FieldValue::Record(_)) => {
            modify_order(Ordering::Greater, ss)
        }
        _ => {
            if complex1 {
                return modify_order(Ordering::Greater, ss);
            }
            if complex2 {
                return modify_order(Ordering::Less, ss);
            }
            compare_atomics_total_order_sortspec(v1, v2, ss)
        }
    }
}

pub(crate) fn compare_map_values_sortspec(
    mv1: &MapValue,
    mv2: &MapValue,
    ss: &SortSpec,
) -> Ordering {
    let inner_ss = SortSpec::default();

    // iterate through map keys in sorted order so insertion order does
    // not affect the comparison
    let sorted1 = mv1.sorted_entries();
    let sorted2 = mv2.sorted_entries();

    let mut it2 = sorted2.iter();
    for e1 in sorted1.iter() {
        let e2 = match it2.next() {
            Some(e) => e,
            None => break,
        };
        let ord = e1.0.cmp(&e2.0);
        if ord != Ordering::Equal {
            return modify_order(ord, ss);
        }
        let comp = compare_total_order(&e1.1, &e2.1, &inner_ss);
        if comp != Ordering::Equal {
            return modify_order(comp, ss);
        }
    }
    if sorted1.len() == sorted2.len() {
        return Ordering::Equal;
    }
    if sorted1.len() < sorted2.len() {
        return modify_order(Ordering::Less, ss);
    }
    modify_order(Ordering::Greater, ss)
}

fn modify_order(o: Ordering, ss: &SortSpec) -> Ordering {
    if !ss.is_desc {
        return o;
    }
    o.reverse()
}

fn compare_arrays(av1: &Vec<FieldValue>, av2: &Vec<FieldValue>, ss: &SortSpec) -> Ordering {
    let inner_ss = SortSpec::default();

    let min = std::cmp::min(av1.len(), av2.len());
    for i in 0..min {
        let comp = compare_total_order(&av1[i], &av2[i], &inner_ss);
        if comp != Ordering::Equal {
            return modify_order(comp, ss);
        }
    }
    if av1.len() == av2.len() {
        return Ordering::Equal;
    }
    if av2.len() > av1.len() {
        return modify_order(Ordering::Greater, ss);
    }
    modify_order(Ordering::Less, ss)
}

fn compare_floats(v0: &f64, v1: &f64) -> Ordering {
    v0.total_cmp(v1)
}
