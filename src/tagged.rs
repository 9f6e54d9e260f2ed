#![allow(dead_code)]

use std::result::Result;
use std::time::Duration;

use crate::error::QuartzError;
use crate::error::QuartzErrorCode::BadProtocolMessage;
use crate::error::QuartzErrorCode::UnknownError;
use crate::reader::Reader;
use crate::types::Capacity;
use crate::types::CapacityMode;
use crate::types::Consistency;
use crate::types::Durability;
use crate::types::FieldType;
use crate::types::FieldValue;
use crate::types::MapValue;
use crate::types::OpCode;
use crate::types::TableLimits;
use crate::types::TopologyInfo;
use crate::writer::Writer;

// Serial versions supported by this client. V4 is current; V3 is the
// downgrade target used when a pre-V4 server rejects a request.
pub const SERIAL_VERSION_4: i16 = 4;
pub const SERIAL_VERSION_3: i16 = 3;

// The version of the query protocol spoken inside Query payloads.
pub const QUERY_VERSION: i32 = 3;

// Pre-V4 servers reply to an unrecognized serial version with a bare
// status byte instead of a map. Either of these sentinel values at
// offset 0 of a response means "unsupported protocol": the numeric
// UnsupportedProtocol code, or the legacy unsupported-version marker.
pub const PREV4_SENTINEL_UNSUPPORTED: u8 = 24;
pub const PREV4_SENTINEL_LEGACY: u8 = 99;

// Cloud service limits, applied client-side to fail fast.
pub const REQUEST_SIZE_LIMIT: usize = 2 * 1024 * 1024;
pub const BATCH_OP_NUMBER_LIMIT: usize = 50;

// Math context for server-side decimal arithmetic, fixed to the
// capabilities of the client's decimal type.
pub const MATH_CONTEXT_PRECISION: i32 = 38;
pub const MATH_CONTEXT_ROUNDING_MODE_HALF_EVEN: i32 = 6;
pub const MATH_CONTEXT_CODE_CUSTOM: &str = "custom";

// Short field-name tokens. The registry is closed: every request and
// response map uses exactly these keys, and unknown keys in responses
// are skipped without failing.
pub const ABORT_ON_FAIL: &str = "a";
pub const BIND_VARIABLES: &str = "bv";
pub const COMPARTMENT_OCID: &str = "cc";
pub const CONSISTENCY: &str = "co";
pub const CONSUMED: &str = "c";
pub const CONTINUATION_KEY: &str = "ck";
pub const DEFINED_TAGS: &str = "dt";
pub const DRIVER_QUERY_PLAN: &str = "dq";
pub const DURABILITY: &str = "du";
pub const END: &str = "en";
pub const ERROR_CODE: &str = "e";
pub const ETAG: &str = "et";
pub const EXACT_MATCH: &str = "ec";
pub const EXCEPTION: &str = "x";
pub const EXISTING_MOD_TIME: &str = "em";
pub const EXISTING_VALUE: &str = "el";
pub const EXISTING_VERSION: &str = "ev";
pub const EXPIRATION: &str = "xp";
pub const FIELDS: &str = "f";
pub const FREE_FORM_TAGS: &str = "ff";
pub const GENERATED: &str = "gn";
pub const HEADER: &str = "h";
pub const IDENTITY_CACHE_SIZE: &str = "ic";
pub const INCLUSIVE: &str = "in";
pub const INDEX: &str = "i";
pub const INDEXES: &str = "ix";
pub const INITIALIZED: &str = "it";
pub const IS_PREPARED: &str = "is";
pub const IS_SIMPLE_QUERY: &str = "iq";
pub const KEY: &str = "k";
pub const LAST_INDEX: &str = "li";
pub const LIMITS: &str = "lm";
pub const LIMITS_MODE: &str = "mo";
pub const LIST_MAX_TO_READ: &str = "lx";
pub const LIST_START_INDEX: &str = "ls";
pub const MATH_CONTEXT_CODE: &str = "mc";
pub const MATH_CONTEXT_PRECISION_FIELD: &str = "cp";
pub const MATH_CONTEXT_ROUNDING_MODE: &str = "rm";
pub const MAX_READ_KB: &str = "mr";
pub const MAX_SHARD_USAGE_PERCENT: &str = "ms";
pub const MAX_WRITE_KB: &str = "mw";
pub const MODIFIED: &str = "md";
pub const NAME: &str = "m";
pub const NAMESPACE: &str = "ns";
pub const NEXT_START_TIME: &str = "ni";
pub const NOT_TARGET_TABLES: &str = "nt";
pub const NUMBER_LIMIT: &str = "nl";
pub const NUM_DELETIONS: &str = "nd";
pub const NUM_OPERATIONS: &str = "no";
pub const NUM_RESULTS: &str = "nr";
pub const OP_CODE: &str = "o";
pub const OPERATIONS: &str = "os";
pub const OPERATION_ID: &str = "od";
pub const PATH: &str = "pt";
pub const PAYLOAD: &str = "p";
pub const PREPARED_QUERY: &str = "pq";
pub const PREPARED_STATEMENT: &str = "ps";
pub const PROXY_TOPO_SEQNUM: &str = "pn";
pub const QUERY: &str = "q";
pub const QUERY_OPERATION: &str = "qo";
pub const QUERY_PLAN_STRING: &str = "qs";
pub const QUERY_RESULTS: &str = "qr";
pub const QUERY_RESULT_SCHEMA: &str = "qc";
pub const QUERY_VERSION_FIELD: &str = "qv";
pub const RANGE: &str = "rg";
pub const RANGE_PATH: &str = "rp";
pub const REACHED_LIMIT: &str = "re";
pub const READ_KB: &str = "rk";
pub const READ_THROTTLE_COUNT: &str = "rt";
pub const READ_UNITS: &str = "ru";
pub const REGION: &str = "rn";
pub const REPLICAS: &str = "rc";
pub const REPLICA_LAG: &str = "rl";
pub const REPLICA_STATS: &str = "ra";
pub const RETRY_HINT: &str = "rh";
pub const RETURN_INFO: &str = "ri";
pub const RETURN_ROW: &str = "rr";
pub const ROW: &str = "r";
pub const ROW_VERSION: &str = "rv";
pub const SCHEMA_FROZEN: &str = "sf";
pub const SHARD_ID: &str = "si";
pub const SHARD_IDS: &str = "sa";
pub const SORT_PHASE1_RESULTS: &str = "p1";
pub const START: &str = "sr";
pub const STATEMENT: &str = "st";
pub const STORAGE_GB: &str = "sg";
pub const STORAGE_THROTTLE_COUNT: &str = "sl";
pub const SUCCESS: &str = "ss";
pub const SYSOP_RESULT: &str = "rs";
pub const SYSOP_STATE: &str = "ta";
pub const TABLES: &str = "tb";
pub const TABLE_ACCESS_INFO: &str = "ai";
pub const TABLE_DDL: &str = "td";
pub const TABLE_NAME: &str = "n";
pub const TABLE_OCID: &str = "to";
pub const TABLE_SCHEMA: &str = "ac";
pub const TABLE_STATE: &str = "as";
pub const TABLE_USAGE: &str = "u";
pub const TABLE_USAGE_PERIOD: &str = "pd";
pub const TIME: &str = "tm";
pub const TIMEOUT: &str = "t";
pub const TOPOLOGY_INFO: &str = "tp";
pub const TOPO_SEQ_NUM: &str = "ts";
pub const TRACE_LEVEL: &str = "tl";
pub const TTL: &str = "tt";
pub const TYPE: &str = "y";
pub const UPDATE_TTL: &str = "ut";
pub const VALUE: &str = "l";
pub const VERSION: &str = "v";
pub const WM_FAILURE: &str = "wf";
pub const WM_FAIL_INDEX: &str = "wi";
pub const WM_FAIL_RESULT: &str = "wr";
pub const WM_SUCCESS: &str = "ws";
pub const WRITE_KB: &str = "wk";
pub const WRITE_MULTIPLE: &str = "wm";
pub const WRITE_THROTTLE_COUNT: &str = "wt";
pub const WRITE_UNITS: &str = "wu";

pub trait TaggedRequest {
    fn serialize(&self, w: &mut Writer, timeout: &Duration, topo_seq: i32);
}

pub trait TaggedSubRequest: std::fmt::Debug + Send + Sync {
    fn serialize(&self, w: &mut Writer, timeout: &Duration);
}

// The base struct used for all request serialization. All requests share
// a single top-level map with two entries, Header and Payload.
pub struct Serializer<'a> {
    // writer does the actual writing (to an internal byte array).
    writer: &'a mut Writer,
    // offsets of the reserved byte-size slots for open maps/arrays
    offset_stack: Vec<usize>,
    // the element counts of open maps/arrays
    size_stack: Vec<i32>,
}

// Maps and arrays start with their total byte size, allowing them to be
// skipped wholesale on deserialization:
//  1. start: reserve two 4-byte slots (byte size, element count) and
//     push the slot offset and a zero count.
//  2. entries are written; each finalized field increments the count on
//     top of the stack.
//  3. end: pop, patch the real byte size and element count into the
//     reserved slots.
// A full 4-byte integer is used for both slots so the patch never moves
// bytes that were already written.

impl<'a> Serializer<'a> {
    pub fn new(writer: &'a mut Writer) -> Serializer {
        Serializer {
            writer,
            offset_stack: Vec::new(),
            size_stack: Vec::new(),
        }
    }

    pub(crate) fn incr_size(&mut self, delta: i32) {
        if let Some(i) = self.size_stack.last_mut() {
            *i += delta;
        }
    }

    pub fn start_field(&mut self, key: &str) {
        self.writer.write_string(key);
    }

    pub fn end_field(&mut self, _key: &str) {
        self.incr_size(1);
    }

    fn start_map_or_array(&mut self, field: &str, ftype: FieldType) {
        if !field.is_empty() {
            self.start_field(field);
        }
        self.writer.write_field_type(ftype);
        let off = self.writer.size();
        self.writer.write_i32(0); // size in bytes
        self.writer.write_i32(0); // number of elements
        self.offset_stack.push(off);
        self.size_stack.push(0);
    }

    pub fn start_map(&mut self, field: &str) {
        self.start_map_or_array(field, FieldType::Map);
    }

    pub fn start_array(&mut self, field: &str) {
        self.start_map_or_array(field, FieldType::Array);
    }

    pub fn end_map(&mut self, field: &str) {
        let length_offset = self.offset_stack.pop().unwrap();
        let num_elems = self.size_stack.pop().unwrap();
        let start = length_offset + 4;
        // patch byte size, then element count, into the reserved slots
        self.writer
            .write_i32_at_offset((self.writer.size() - start) as i32, length_offset)
            .unwrap();
        self.writer
            .write_i32_at_offset(num_elems, length_offset + 4)
            .unwrap();
        if !field.is_empty() {
            self.end_field(field)
        }
    }

    pub fn end_array(&mut self, field: &str) {
        self.end_map(field);
    }

    pub fn end_array_field(&mut self, _idx: i32) {
        self.incr_size(1);
    }

    pub fn write_subrequest(&mut self, rq: &Box<dyn TaggedSubRequest>, timeout: &Duration) {
        rq.serialize(self.writer, timeout);
    }

    // Serialize a sub-operation through a scratch writer so its size can
    // be checked against the request limit before it lands in the batch.
    pub fn write_subrequest_checked(
        &mut self,
        rq: &Box<dyn TaggedSubRequest>,
        timeout: &Duration,
    ) -> Result<usize, QuartzError> {
        let mut sub = Writer::new();
        rq.serialize(&mut sub, timeout);
        if sub.size() > REQUEST_SIZE_LIMIT {
            return Err(QuartzError::new(
                crate::error::QuartzErrorCode::RequestSizeLimitExceeded,
                &format!(
                    "serialized size {} of a batch sub-operation exceeds the request limit of {}",
                    sub.size(),
                    REQUEST_SIZE_LIMIT
                ),
            ));
        }
        self.writer.buf.extend_from_slice(sub.bytes());
        Ok(sub.size())
    }

    // the serialized size so far; used for per-sub-op size checks
    pub fn size(&self) -> usize {
        self.writer.size()
    }

    pub fn write_field(&mut self, key: &str, val: &FieldValue) {
        self.start_field(key);
        self.writer.write_field_value(val);
        self.end_field(key);
    }

    pub fn write_i32_field(&mut self, key: &str, val: i32) {
        self.start_field(key);
        self.writer.write_field_type(FieldType::Integer);
        self.writer.write_packed_i32(val);
        self.end_field(key);
    }

    pub fn write_i64_field(&mut self, key: &str, val: i64) {
        self.start_field(key);
        self.writer.write_field_type(FieldType::Long);
        self.writer.write_packed_i64(val);
        self.end_field(key);
    }

    pub fn write_nonzero_i32_field(&mut self, key: &str, val: i32) {
        if val != 0 {
            self.write_i32_field(key, val);
        }
    }

    pub fn write_bool_field(&mut self, key: &str, val: bool) {
        self.start_field(key);
        self.writer.write_field_type(FieldType::Boolean);
        self.writer.write_bool(val);
        self.end_field(key);
    }

    // Write field only if the boolean is true
    pub fn write_true_bool_field(&mut self, key: &str, val: bool) {
        if val {
            self.write_bool_field(key, val);
        }
    }

    pub fn write_binary_field(&mut self, key: &str, val: &[u8]) {
        self.start_field(key);
        self.writer.write_field_type(FieldType::Binary);
        self.writer.write_bytes(val);
        self.end_field(key);
    }

    pub fn write_optional_binary_field(&mut self, key: &str, val: &Option<Vec<u8>>) {
        if let Some(v) = val {
            self.write_binary_field(key, v);
        }
    }

    pub fn write_map_field(&mut self, key: &str, val: &MapValue) {
        self.start_field(key);
        self.writer.write_map_value(val);
        self.end_field(key);
    }

    pub fn write_nz_field(&mut self, key: &str, val: i32) {
        if val > 0 {
            self.write_i32_field(key, val);
        }
    }

    pub fn write_string_field(&mut self, key: &str, val: &str) {
        self.start_field(key);
        self.writer.write_field_type(FieldType::String);
        self.writer.write_string(val);
        self.end_field(key);
    }

    pub fn write_nonempty_string_field(&mut self, key: &str, val: &str) {
        if !val.is_empty() {
            self.write_string_field(key, val);
        }
    }

    pub fn write_consistency(&mut self, c: Consistency) {
        self.start_map(CONSISTENCY);
        let t = (c as i32) - 1;
        self.write_i32_field(TYPE, t);
        self.end_map(CONSISTENCY);
    }

    pub fn write_durability(&mut self, d: &Option<Durability>) {
        if let Some(dur) = d {
            self.write_i32_field(DURABILITY, dur.to_wire());
        }
    }

    pub fn write_math_context(&mut self) {
        self.write_i32_field(MATH_CONTEXT_PRECISION_FIELD, MATH_CONTEXT_PRECISION);
        self.write_i32_field(
            MATH_CONTEXT_ROUNDING_MODE,
            MATH_CONTEXT_ROUNDING_MODE_HALF_EVEN,
        );
        self.write_string_field(MATH_CONTEXT_CODE, MATH_CONTEXT_CODE_CUSTOM);
    }

    pub(crate) fn write_header(
        &mut self,
        op_code: OpCode,
        timeout: &Duration,
        table_name: &str,
        topo_seq: i32,
    ) {
        self.write_i32_field(VERSION, SERIAL_VERSION_4 as i32);
        if !table_name.is_empty() {
            self.write_string_field(TABLE_NAME, table_name);
        }
        self.write_i32_field(OP_CODE, op_code as i32);
        self.write_i32_field(TIMEOUT, timeout.as_millis() as i32);
        if topo_seq >= 0 {
            self.write_i32_field(TOPO_SEQ_NUM, topo_seq);
        }
    }

    pub(crate) fn write_limits(&mut self, limits: &Option<TableLimits>) {
        if let Some(l) = limits {
            self.start_map(LIMITS);
            self.write_i32_field(READ_UNITS, l.read_units);
            self.write_i32_field(WRITE_UNITS, l.write_units);
            self.write_i32_field(STORAGE_GB, l.storage_gb);
            self.write_i32_field(LIMITS_MODE, l.mode as i32);
            self.end_map(LIMITS);
        }
    }

    pub fn start_header(&mut self) {
        self.start_map(HEADER);
    }

    pub fn end_header(&mut self) {
        self.end_map(HEADER);
    }

    pub fn start_payload(&mut self) {
        self.start_map(PAYLOAD);
    }

    pub fn end_payload(&mut self) {
        self.end_map(PAYLOAD);
    }

    pub fn start_request(writer: &'a mut Writer) -> Serializer {
        let mut ns = Serializer::new(writer);
        ns.start_map("");
        ns
    }

    pub fn end_request(&mut self) {
        self.end_map("");
    }
}

// Existing-row information shared by put, delete and write-multiple
// results when return_row was requested.
#[derive(Default, Debug)]
pub(crate) struct ReturnInfo {
    pub existing_modification_time: i64,
    pub existing_value: Option<MapValue>,
    pub existing_version: Option<Vec<u8>>,
}

pub(crate) fn read_return_info(r: &mut Reader) -> Result<ReturnInfo, QuartzError> {
    let mut walker = MapWalker::new(r)?;
    let mut ri: ReturnInfo = Default::default();
    while walker.has_next() {
        walker.next()?;
        let name = walker.current_name();
        match name.as_str() {
            EXISTING_MOD_TIME => {
                ri.existing_modification_time = walker.read_i64_field()?;
            }
            EXISTING_VERSION => {
                ri.existing_version = Some(walker.read_binary_field()?);
            }
            EXISTING_VALUE => {
                ri.existing_value = Some(walker.read_map_field()?);
            }
            _ => {
                walker.skip_field()?;
            }
        }
    }
    Ok(ri)
}

// MapWalker iterates the entries of a serialized map, letting callers
// dispatch on the short field names and skip anything they do not
// recognize.
pub struct MapWalker<'a> {
    pub(crate) r: &'a mut Reader,
    num_elements: i32,
    current_name: String,
    current_index: i32,
}

// To prevent infinite loops on corrupt length fields
const MAX_ELEMENTS: i32 = 100000000;

impl<'a> MapWalker<'a> {
    pub fn new(r: &'a mut Reader) -> Result<MapWalker, QuartzError> {
        Self::expect_type(r, FieldType::Map)?;
        let _ = r.read_i32()?; // skip map size in bytes
        let num_elements = r.read_i32()?;
        if !(0..=MAX_ELEMENTS).contains(&num_elements) {
            return Err(QuartzError::new(
                BadProtocolMessage,
                "invalid num_elements in message",
            ));
        }
        Ok(MapWalker {
            r,
            num_elements,
            current_name: "".to_string(),
            current_index: 0,
        })
    }

    pub(crate) fn expect_type(r: &mut Reader, ft: FieldType) -> Result<(), QuartzError> {
        let b = r.read_byte()?;
        let fb: u8 = ft as u8;
        if b != fb {
            return Err(QuartzError::new(
                BadProtocolMessage,
                format!("expected type {}, found {}", fb, b).as_str(),
            ));
        }
        Ok(())
    }

    // Record is a subtype of Map on the wire; either tag is acceptable
    // where a map is expected.
    pub(crate) fn expect_map_type(r: &mut Reader) -> Result<(), QuartzError> {
        let b = r.read_byte()?;
        if b == FieldType::Map as u8 || b == FieldType::Record as u8 {
            return Ok(());
        }
        Err(QuartzError::new(
            BadProtocolMessage,
            format!("expected map type, found {}", b).as_str(),
        ))
    }

    pub fn has_next(&self) -> bool {
        self.num_elements > self.current_index
    }

    pub fn next(&mut self) -> Result<(), QuartzError> {
        if !self.has_next() {
            return Err(QuartzError::new(
                BadProtocolMessage,
                "cannot call next with no elements remaining",
            ));
        }
        self.current_name = self.r.read_string()?;
        self.current_index += 1;
        Ok(())
    }

    pub fn current_name(&self) -> &String {
        &self.current_name
    }

    pub fn read_map_field(&mut self) -> Result<MapValue, QuartzError> {
        Self::expect_map_type(self.r)?;
        self.r.read_map()
    }

    pub fn read_i64_field(&mut self) -> Result<i64, QuartzError> {
        Self::expect_type(self.r, FieldType::Long)?;
        self.r.read_packed_i64()
    }

    pub fn read_i32_field(&mut self) -> Result<i32, QuartzError> {
        Self::expect_type(self.r, FieldType::Integer)?;
        self.r.read_packed_i32()
    }

    pub fn read_string_field(&mut self) -> Result<String, QuartzError> {
        Self::expect_type(self.r, FieldType::String)?;
        self.r.read_string()
    }

    pub fn read_string_array_field(&mut self) -> Result<Vec<String>, QuartzError> {
        Self::expect_type(self.r, FieldType::Array)?;
        let _ = self.r.read_i32()?; // skip array size in bytes
        let num_elements = self.r.read_i32()?;
        let mut v: Vec<String> = Vec::with_capacity(num_elements as usize);
        for _n in 1..=num_elements {
            v.push(self.read_string_field()?);
        }
        Ok(v)
    }

    pub fn read_i32_array_field(&mut self) -> Result<Vec<i32>, QuartzError> {
        Self::expect_type(self.r, FieldType::Array)?;
        let _ = self.r.read_i32()?; // skip array size in bytes
        let num_elements = self.r.read_i32()?;
        let mut v: Vec<i32> = Vec::with_capacity(num_elements as usize);
        for _n in 1..=num_elements {
            v.push(self.read_i32_field()?);
        }
        Ok(v)
    }

    pub fn read_binary_field(&mut self) -> Result<Vec<u8>, QuartzError> {
        Self::expect_type(self.r, FieldType::Binary)?;
        self.r.read_binary()
    }

    pub fn read_bool_field(&mut self) -> Result<bool, QuartzError> {
        Self::expect_type(self.r, FieldType::Boolean)?;
        self.r.read_bool()
    }

    pub fn read_field_value(&mut self) -> Result<FieldValue, QuartzError> {
        self.r.read_field_value()
    }

    pub fn read_consumed_capacity(&mut self) -> Result<Capacity, QuartzError> {
        // consumed capacity is in its own map
        let mut mw = MapWalker::new(self.r)?;
        let mut c: Capacity = Default::default();
        while mw.has_next() {
            mw.next()?;
            let name = mw.current_name();
            match name.as_str() {
                READ_KB => {
                    c.read_kb = mw.read_i32_field()?;
                }
                WRITE_KB => {
                    c.write_kb = mw.read_i32_field()?;
                }
                READ_UNITS => {
                    c.read_units = mw.read_i32_field()?;
                }
                WRITE_UNITS => {
                    c.write_units = mw.read_i32_field()?;
                }
                _ => mw.skip_field()?,
            }
        }
        // some servers omit write units; mirror write kb in that case
        if c.write_units == 0 && c.write_kb > 0 {
            c.write_units = c.write_kb;
        }
        Ok(c)
    }

    pub(crate) fn read_topology_info(&mut self) -> Result<TopologyInfo, QuartzError> {
        let mut mw = MapWalker::new(self.r)?;
        let mut ti = TopologyInfo {
            seq_num: -1,
            ..Default::default()
        };
        while mw.has_next() {
            mw.next()?;
            let name = mw.current_name();
            match name.as_str() {
                PROXY_TOPO_SEQNUM => {
                    ti.seq_num = mw.read_i32_field()?;
                }
                SHARD_IDS => {
                    ti.shard_ids = mw.read_i32_array_field()?;
                }
                _ => mw.skip_field()?,
            }
        }
        if !ti.is_valid() {
            return Err(QuartzError::new(
                BadProtocolMessage,
                "topology info missing field(s)",
            ));
        }
        Ok(ti)
    }

    pub fn read_limits(&mut self) -> Result<TableLimits, QuartzError> {
        let mut mw = MapWalker::new(self.r)?;
        let mut limits: TableLimits = Default::default();
        while mw.has_next() {
            mw.next()?;
            let name = mw.current_name();
            match name.as_str() {
                READ_UNITS => {
                    limits.read_units = mw.read_i32_field()?;
                }
                WRITE_UNITS => {
                    limits.write_units = mw.read_i32_field()?;
                }
                STORAGE_GB => {
                    limits.storage_gb = mw.read_i32_field()?;
                }
                LIMITS_MODE => {
                    let mode = mw.read_i32_field()?;
                    // default is Provisioned
                    if mode == (CapacityMode::OnDemand as i32) {
                        limits.mode = CapacityMode::OnDemand;
                    }
                }
                _ => mw.skip_field()?,
            }
        }
        Ok(limits)
    }

    pub fn handle_error_code(&mut self) -> Result<(), QuartzError> {
        let i = self.read_i32_field()?;
        if i == 0 {
            return Ok(());
        }
        // non-zero code: find the exception message, then fail
        while self.has_next() {
            self.next()?;
            let name = self.current_name();
            match name.as_str() {
                EXCEPTION => {
                    let msg = self.read_string_field()?;
                    return Err(QuartzError::from_int(i, &msg));
                }
                _ => {
                    self.skip_field()?;
                }
            }
        }
        Err(QuartzError::from_int(i, "no exception message in response"))
    }

    pub fn skip_field(&mut self) -> Result<(), QuartzError> {
        self.r.skip_field_value()
    }

    pub fn check_for_error(&mut self) -> Result<(), QuartzError> {
        while self.has_next() {
            self.next()?;
            let name = self.current_name();
            match name.as_str() {
                ERROR_CODE => {
                    self.handle_error_code()?;
                    // if we get here, the error code was zero
                    return Ok(());
                }
                _ => {
                    self.skip_field()?;
                }
            }
        }
        Ok(())
    }

    pub(crate) fn check_reader_for_error(reader: &mut Reader) -> Result<(), QuartzError> {
        let mut w = MapWalker::new(reader)?;
        w.check_for_error()?;
        reader.reset();
        Ok(())
    }
}

impl<'a> std::fmt::Debug for MapWalker<'a> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "MapWalker: elements={} index={} current='{}'",
            self.num_elements, self.current_index, self.current_name
        )
    }
}

// Used by response paths that got a non-map error indication.
pub(crate) fn unknown_wire_error() -> QuartzError {
    QuartzError::new(UnknownError, "unrecognized response from server")
}
