use crate::cancel::CancellationToken;
use crate::error::{ia_err, QuartzError};
use crate::handle::Handle;
use crate::handle::SendOptions;
use crate::reader::Reader;
use crate::tagged::*;
use crate::types::{Capacity, Durability, FieldValue, MapValue, OpCode, TimeToLive};
use crate::writer::Writer;
use crate::Version;
use std::result::Result;
use std::time::Duration;

/// Struct used for inserting a single row of data into a table.
///
/// This request can perform unconditional and conditional puts:
/// - Overwrite any existing row. This is the default.
/// - Succeed only if the row does not exist. Use
///   [`if_absent()`](PutRequest::if_absent) for this case.
/// - Succeed only if the row exists. Use
///   [`if_present()`](PutRequest::if_present) for this case.
/// - Succeed only if the row exists and its [`Version`] matches a given
///   version. Use [`if_version()`](PutRequest::if_version) for this case.
///
/// Information about the existing row can be returned from a put
/// operation using [`return_row(true)`](PutRequest::return_row).
/// Requesting this information incurs additional cost and may affect
/// operation latency.
///
/// On success, [`PutResult::version()`] is `Some`. That version may be
/// used in subsequent conditional operations.
#[derive(Default, Debug)]
pub struct PutRequest {
    pub(crate) table_name: String,
    pub(crate) compartment_id: String,
    pub(crate) value: MapValue,
    pub(crate) timeout: Option<Duration>,
    pub(crate) abort_on_fail: bool,
    pub(crate) return_row: bool,
    if_present: bool,
    if_absent: bool,
    pub(crate) durability: Option<Durability>,
    pub(crate) ttl: Option<TimeToLive>,
    pub(crate) use_table_ttl: bool,
    pub(crate) exact_match: bool,
    pub(crate) identity_cache_size: i32,
    match_version: Version,
    pub(crate) cancel: Option<CancellationToken>,
}

/// Struct representing the result of a [`PutRequest`] execution.
#[derive(Default, Debug)]
pub struct PutResult {
    pub(crate) version: Option<Version>,
    pub(crate) consumed: Option<Capacity>,
    pub(crate) generated_value: Option<FieldValue>,
    pub(crate) existing_modification_time: i64,
    pub(crate) existing_value: Option<MapValue>,
    pub(crate) existing_version: Option<Version>,
}

impl PutResult {
    /// Get the version of the now-current record. `Some` if the put
    /// succeeded; usable in subsequent [`PutRequest::if_version()`] calls.
    pub fn version(&self) -> Option<&Version> {
        self.version.as_ref()
    }
    /// Get the consumed capacity of the operation. Cloud only.
    pub fn consumed(&self) -> Option<&Capacity> {
        self.consumed.as_ref()
    }
    /// Get the value generated if the operation created a new value, as
    /// can happen with identity columns or generated UUID columns.
    pub fn generated_value(&self) -> Option<&FieldValue> {
        self.generated_value.as_ref()
    }
    /// Get the modification time of the previous row, in milliseconds
    /// since the epoch. Only valid if `return_row(true)` was set and a
    /// previous row existed.
    pub fn existing_modification_time(&self) -> i64 {
        self.existing_modification_time
    }
    /// Get the value of the previous row. Only valid if
    /// `return_row(true)` was set and a previous row existed.
    pub fn existing_value(&self) -> Option<&MapValue> {
        self.existing_value.as_ref()
    }
    /// Get the version of the previous row. Only valid if
    /// `return_row(true)` was set and a previous row existed.
    pub fn existing_version(&self) -> Option<&Version> {
        self.existing_version.as_ref()
    }
}

impl PutRequest {
    /// Create a new PutRequest.
    ///
    /// `table_name` is required and must be non-empty.
    pub fn new(table_name: &str) -> PutRequest {
        PutRequest {
            table_name: table_name.to_string(),
            ..Default::default()
        }
    }

    /// Set the row value for the put operation.
    ///
    /// The fields of the given value are mapped to their matching table
    /// columns on insertion. The driver does not validate the value
    /// against the table schema; the server does.
    pub fn value(mut self, val: MapValue) -> PutRequest {
        self.value = val;
        self
    }

    /// Specify the timeout value for the request.
    ///
    /// This is optional. If not set, the default timeout configured for
    /// the [`Handle`](crate::HandleBuilder::timeout()) is used.
    pub fn timeout(mut self, t: &Duration) -> PutRequest {
        self.timeout = Some(*t);
        self
    }

    /// Cloud only: set the compartment to use for this operation.
    pub fn compartment_id(mut self, compartment_id: &str) -> PutRequest {
        self.compartment_id = compartment_id.to_string();
        self
    }

    /// Return information about the existing row, if present. Incurs
    /// additional cost and may affect operation latency.
    pub fn return_row(mut self, val: bool) -> PutRequest {
        self.return_row = val;
        self
    }

    /// On-premise only: set the durability for this write.
    pub fn durability(mut self, d: Durability) -> PutRequest {
        self.durability = Some(d);
        self
    }

    /// Set the time to live for the row. Expiration rounds up to the
    /// next hour or day boundary in UTC; see [`TimeToLive`].
    pub fn ttl(mut self, val: &TimeToLive) -> PutRequest {
        self.ttl = Some(*val);
        self
    }

    /// If true and there is an existing row, update its time to live
    /// based on the table's default TTL, if the table has one. By
    /// default updating an existing row has no effect on its TTL.
    pub fn use_table_ttl(mut self, val: bool) -> PutRequest {
        self.use_table_ttl = val;
        self
    }

    /// If true, fail the operation when the value contains fields that
    /// do not exactly match the table schema.
    pub fn exact_match(mut self, val: bool) -> PutRequest {
        self.exact_match = val;
        self
    }

    /// Set the number of generated identity values the server should
    /// hand the client for caching.
    pub fn identity_cache_size(mut self, val: i32) -> PutRequest {
        self.identity_cache_size = val;
        self
    }

    /// Succeed only if the row exists and its version matches the given
    /// version.
    pub fn if_version(mut self, version: &Version) -> PutRequest {
        self.match_version = version.clone();
        self.if_present = false;
        self.if_absent = false;
        self
    }

    /// Succeed only if the given row does not already exist.
    pub fn if_absent(mut self) -> PutRequest {
        self.if_absent = true;
        self.if_present = false;
        self.match_version.clear();
        self
    }

    /// Succeed only if the given row already exists.
    pub fn if_present(mut self) -> PutRequest {
        self.if_present = true;
        self.if_absent = false;
        self.match_version.clear();
        self
    }

    /// Supply a token that can cancel the operation while it is waiting
    /// or in flight.
    pub fn cancellation_token(mut self, token: &CancellationToken) -> PutRequest {
        self.cancel = Some(token.clone());
        self
    }

    fn opcode(&self) -> OpCode {
        if !self.match_version.is_empty() {
            OpCode::PutIfVersion
        } else if self.if_present {
            OpCode::PutIfPresent
        } else if self.if_absent {
            OpCode::PutIfAbsent
        } else {
            OpCode::Put
        }
    }

    pub async fn execute(&self, h: &Handle) -> Result<PutResult, QuartzError> {
        if self.table_name.is_empty() {
            return ia_err!("table name must be non-empty");
        }
        if self.value.is_empty() {
            return ia_err!("put requires a non-empty value");
        }
        if self.use_table_ttl && self.ttl.is_some() {
            return ia_err!("put may set either a ttl or use_table_ttl, not both");
        }
        let mut w: Writer = Writer::new();
        w.write_i16(h.serial_version());
        let timeout = h.get_timeout(&self.timeout);
        self.serialize_internal(&mut w, false, &timeout, h.topo_seq_num());
        let mut opts = SendOptions::new(self.opcode(), timeout)
            .table(&self.table_name)
            .compartment(&self.compartment_id)
            .cancellation(&self.cancel);
        let mut r = h.send_and_receive(w, &mut opts).await?;
        let resp = PutRequest::deserialize(&mut r)?;
        if let Some(c) = &resp.consumed {
            h.apply_rate_feedback(&opts, c);
        }
        Ok(resp)
    }

    fn serialize_internal(
        &self,
        w: &mut Writer,
        is_sub_request: bool,
        timeout: &Duration,
        topo_seq: i32,
    ) {
        let mut ns = Serializer::start_request(w);
        let opcode = self.opcode();

        if is_sub_request {
            if !self.table_name.is_empty() {
                ns.write_string_field(TABLE_NAME, &self.table_name);
            }
            ns.write_i32_field(OP_CODE, opcode as i32);
            if self.abort_on_fail {
                ns.write_bool_field(ABORT_ON_FAIL, true);
            }
        } else {
            ns.start_header();
            ns.write_header(opcode, timeout, &self.table_name, topo_seq);
            ns.end_header();
            ns.start_payload();
            ns.write_durability(&self.durability);
        }

        ns.write_true_bool_field(RETURN_ROW, self.return_row);

        if !self.match_version.is_empty() {
            ns.write_binary_field(ROW_VERSION, &self.match_version);
        }

        if self.use_table_ttl {
            ns.write_bool_field(UPDATE_TTL, true);
        } else if let Some(ttl) = &self.ttl {
            if !ttl.is_do_not_expire() {
                ns.write_string_field(TTL, &ttl.to_wire_string());
                ns.write_bool_field(UPDATE_TTL, true);
            }
        }

        ns.write_true_bool_field(EXACT_MATCH, self.exact_match);
        ns.write_nz_field(IDENTITY_CACHE_SIZE, self.identity_cache_size);

        ns.write_map_field(VALUE, &self.value);

        if !is_sub_request {
            ns.end_payload();
        }
        ns.end_request();
    }

    pub(crate) fn deserialize(r: &mut Reader) -> Result<PutResult, QuartzError> {
        let mut walker = MapWalker::new(r)?;
        let mut res: PutResult = Default::default();
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
                ROW_VERSION => {
                    res.version = Some(walker.read_binary_field()?);
                }
                GENERATED => {
                    res.generated_value = Some(walker.read_field_value()?);
                }
                RETURN_INFO => {
                    let ri = read_return_info(walker.r)?;
                    res.existing_modification_time = ri.existing_modification_time;
                    res.existing_value = ri.existing_value;
                    res.existing_version = ri.existing_version;
                }
                _ => {
                    walker.skip_field()?;
                }
            }
        }
        Ok(res)
    }
}

impl TaggedRequest for PutRequest {
    fn serialize(&self, w: &mut Writer, timeout: &Duration, topo_seq: i32) {
        self.serialize_internal(w, false, timeout, topo_seq);
    }
}

impl TaggedSubRequest for PutRequest {
    fn serialize(&self, w: &mut Writer, timeout: &Duration) {
        self.serialize_internal(w, true, timeout, -1);
    }
}
