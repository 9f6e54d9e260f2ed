use crate::cancel::CancellationToken;
use crate::error::{ia_err, QuartzError};
use crate::handle::Handle;
use crate::handle::SendOptions;
use crate::reader::Reader;
use crate::tagged::*;
use crate::types::{Capacity, Durability, FieldValue, OpCode};
use crate::writer::Writer;
use std::result::Result;
use std::time::Duration;

/// A range of values to be used in a [`MultiDeleteRequest`] operation.
///
/// `FieldRange` is used as the least significant component in a
/// partially specified key value in order to create a value range for an
/// operation that affects multiple rows. The types usable in a
/// `FieldRange` are limited to the atomic types valid for primary keys.
///
/// The least significant component of a key is the first component not
/// fully specified: for a primary key `<a, b, c>`, a range can be given
/// for `a` when the supplied key is empty, or for `b` when the key pins
/// `a` but not `b` or `c`.
///
/// `start` and `end` must be of the same type, and that type must match
/// the named field. Validation happens when the range is used in an
/// operation.
#[derive(Default, Debug)]
pub struct FieldRange {
    // the path to the field used in the range.
    pub field_path: String,

    // the start value of the range, if any.
    pub start: Option<FieldValue>,

    // whether the start value itself is included in the range.
    pub start_inclusive: bool,

    // the end value of the range, if any.
    pub end: Option<FieldValue>,

    // whether the end value itself is included in the range.
    pub end_inclusive: bool,
}

/// Struct used for deleting a range of rows from a table in a single
/// atomic operation.
#[derive(Default, Debug)]
pub struct MultiDeleteRequest {
    pub(crate) table_name: String,
    pub(crate) compartment_id: String,
    pub(crate) key: FieldValue,
    pub(crate) continuation_key: Option<Vec<u8>>,
    pub(crate) field_range: Option<FieldRange>,
    pub(crate) max_write_kb: i32,
    pub(crate) durability: Option<Durability>,
    pub(crate) timeout: Option<Duration>,
    pub(crate) cancel: Option<CancellationToken>,
}

/// Struct representing the result of a [`MultiDeleteRequest`] operation.
#[derive(Default, Debug)]
pub struct MultiDeleteResult {
    pub(crate) num_deleted: i32,
    pub(crate) continuation_key: Option<Vec<u8>>,
    pub(crate) consumed: Option<Capacity>,
}

impl MultiDeleteResult {
    /// Get the number of records deleted by the operation.
    pub fn num_deleted(&self) -> i32 {
        self.num_deleted
    }
    /// Get a continuation key for a subsequent MultiDelete operation.
    /// Typically set when `max_write_kb` was given and more records
    /// remain to delete.
    pub fn continuation_key(&self) -> Option<Vec<u8>> {
        self.continuation_key.clone()
    }
    /// Get the consumed capacity of the operation. Cloud only.
    pub fn consumed(&self) -> Option<&Capacity> {
        self.consumed.as_ref()
    }
}

impl MultiDeleteRequest {
    /// Create a new `MultiDeleteRequest`.
    ///
    /// `table_name` must be non-empty. `partial_key` specifies the
    /// shard-key portion of the rows to delete; all affected rows share
    /// it, which is what makes the operation a single transaction.
    pub fn new(table_name: &str, partial_key: &FieldValue) -> MultiDeleteRequest {
        MultiDeleteRequest {
            table_name: table_name.to_string(),
            key: partial_key.clone_internal(),
            ..Default::default()
        }
    }

    /// Specify the timeout value for the request.
    ///
    /// This is optional. If not set, the default timeout configured for
    /// the [`Handle`](crate::HandleBuilder::timeout()) is used.
    pub fn timeout(mut self, t: &Duration) -> MultiDeleteRequest {
        self.timeout = Some(*t);
        self
    }

    /// Cloud only: set the compartment to use for this operation.
    pub fn compartment_id(mut self, compartment_id: &str) -> MultiDeleteRequest {
        self.compartment_id = compartment_id.to_string();
        self
    }

    /// Specify the [`FieldRange`] for the operation. Optional, but
    /// required to delete a specific range of rows.
    pub fn field_range(mut self, field_range: FieldRange) -> MultiDeleteRequest {
        self.field_range = Some(field_range);
        self
    }

    /// Continue a previous operation from its returned continuation key.
    pub fn continuation_key(mut self, key: Vec<u8>) -> MultiDeleteRequest {
        self.continuation_key = Some(key);
        self
    }

    /// Limit the total KB written during this operation. Cloud only;
    /// zero means no application-defined limit. This value can only
    /// reduce the system defined limit.
    pub fn max_write_kb(mut self, max_write_kb: i32) -> MultiDeleteRequest {
        self.max_write_kb = max_write_kb;
        self
    }

    /// On-premise only: set the durability for this write.
    pub fn durability(mut self, d: Durability) -> MultiDeleteRequest {
        self.durability = Some(d);
        self
    }

    /// Supply a token that can cancel the operation while it is waiting
    /// or in flight.
    pub fn cancellation_token(mut self, token: &CancellationToken) -> MultiDeleteRequest {
        self.cancel = Some(token.clone());
        self
    }

    pub async fn execute(&self, h: &Handle) -> Result<MultiDeleteResult, QuartzError> {
        if self.table_name.is_empty() {
            return ia_err!("table name must be non-empty");
        }
        if self.max_write_kb < 0 {
            return ia_err!("max_write_kb must not be negative");
        }
        let mut w: Writer = Writer::new();
        w.write_i16(h.serial_version());
        let timeout = h.get_timeout(&self.timeout);
        self.serialize_internal(&mut w, &timeout, h.topo_seq_num());
        let mut opts = SendOptions::new(OpCode::MultiDelete, timeout)
            .table(&self.table_name)
            .compartment(&self.compartment_id)
            .cancellation(&self.cancel);
        let mut r = h.send_and_receive(w, &mut opts).await?;
        let resp = MultiDeleteRequest::deserialize(&mut r)?;
        if let Some(c) = &resp.consumed {
            h.apply_rate_feedback(&opts, c);
        }
        Ok(resp)
    }

    fn serialize_internal(&self, w: &mut Writer, timeout: &Duration, topo_seq: i32) {
        let mut ns = Serializer::start_request(w);
        ns.start_header();
        ns.write_header(OpCode::MultiDelete, timeout, &self.table_name, topo_seq);
        ns.end_header();

        ns.start_payload();
        ns.write_durability(&self.durability);
        ns.write_nz_field(MAX_WRITE_KB, self.max_write_kb);

        ns.write_field(KEY, &self.key);

        if let Some(ckey) = &self.continuation_key {
            ns.write_binary_field(CONTINUATION_KEY, ckey);
        }

        if let Some(range) = &self.field_range {
            ns.start_map(RANGE);
            ns.write_string_field(RANGE_PATH, &range.field_path);
            if let Some(start) = &range.start {
                ns.start_map(START);
                ns.write_field(VALUE, start);
                ns.write_bool_field(INCLUSIVE, range.start_inclusive);
                ns.end_map(START);
            }
            if let Some(end) = &range.end {
                ns.start_map(END);
                ns.write_field(VALUE, end);
                ns.write_bool_field(INCLUSIVE, range.end_inclusive);
                ns.end_map(END);
            }
            ns.end_map(RANGE);
        }

        ns.end_payload();
        ns.end_request();
    }

    pub(crate) fn deserialize(r: &mut Reader) -> Result<MultiDeleteResult, QuartzError> {
        let mut walker = MapWalker::new(r)?;
        let mut res: MultiDeleteResult = Default::default();
        while walker.has_next() {
            walker.next()?;
            let name = walker.current_name();
            match name.as_str() {
                ERROR_CODE => {
                    walker.handle_error_code()?;
                }
                CONSUMED => {
                    res.consumed = Some(walker.read_consumed_capacity()?);
                }
                NUM_DELETIONS => {
                    res.num_deleted = walker.read_i32_field()?;
                }
                CONTINUATION_KEY => {
                    let ck = walker.read_binary_field()?;
                    if !ck.is_empty() {
                        res.continuation_key = Some(ck);
                    }
                }
                _ => {
                    walker.skip_field()?;
                }
            }
        }
        Ok(res)
    }
}

impl TaggedRequest for MultiDeleteRequest {
    fn serialize(&self, w: &mut Writer, timeout: &Duration, topo_seq: i32) {
        self.serialize_internal(w, timeout, topo_seq);
    }
}
