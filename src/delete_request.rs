use crate::cancel::CancellationToken;
use crate::error::{ia_err, QuartzError};
use crate::handle::Handle;
use crate::handle::SendOptions;
use crate::reader::Reader;
use crate::tagged::*;
use crate::types::{Capacity, Durability, MapValue, OpCode};
use crate::writer::Writer;
use crate::Version;
use std::result::Result;
use std::time::Duration;

/// Struct used for deleting a single row from a table.
///
/// This request can perform unconditional and conditional deletes:
///
/// - Delete any existing row. This is the default.
/// - Succeed only if the row exists and its version matches a specific
///   version. Use [`if_version()`](DeleteRequest::if_version) for this case.
///
/// Information about the existing row can be returned using
/// [`return_row(true)`](DeleteRequest::return_row). Requesting this
/// information incurs additional cost and may affect operation latency.
#[derive(Default, Debug)]
pub struct DeleteRequest {
    pub(crate) key: MapValue,
    pub(crate) table_name: String,
    pub(crate) timeout: Option<Duration>,
    pub(crate) compartment_id: String,
    pub(crate) abort_on_fail: bool,
    pub(crate) return_row: bool,
    pub(crate) durability: Option<Durability>,
    match_version: Version,
    pub(crate) cancel: Option<CancellationToken>,
}

/// Struct representing the result of a [`DeleteRequest`] execution.
#[derive(Default, Debug)]
pub struct DeleteResult {
    pub(crate) success: bool,
    pub(crate) consumed: Option<Capacity>,
    pub(crate) existing_modification_time: i64,
    pub(crate) existing_value: Option<MapValue>,
    pub(crate) existing_version: Option<Version>,
}

impl DeleteResult {
    /// Get the result of the operation: `true` if the row was deleted.
    pub fn success(&self) -> bool {
        self.success
    }
    /// Get the consumed capacity of the operation. Cloud only.
    pub fn consumed(&self) -> Option<&Capacity> {
        self.consumed.as_ref()
    }
    /// Get the modification time of the deleted row, or of the current
    /// row if the operation failed an `if_version()` check. Only valid
    /// if `return_row(true)` was set and a previous row existed. In
    /// milliseconds since the epoch.
    pub fn existing_modification_time(&self) -> i64 {
        self.existing_modification_time
    }
    /// Get the value of the deleted row, or of the current row if the
    /// operation failed an `if_version()` check. Only valid if
    /// `return_row(true)` was set and a previous row existed.
    pub fn existing_value(&self) -> Option<&MapValue> {
        self.existing_value.as_ref()
    }
    /// Get the version of the deleted row, or of the current row if the
    /// operation failed an `if_version()` check. Only valid if
    /// `return_row(true)` was set and a previous row existed.
    pub fn existing_version(&self) -> Option<&Version> {
        self.existing_version.as_ref()
    }
}

impl DeleteRequest {
    /// Create a new `DeleteRequest`.
    ///
    /// `table_name` and `key` are required and must be non-empty.
    /// `key` must contain all fields of the table's primary key.
    pub fn new(table_name: &str, key: MapValue) -> DeleteRequest {
        DeleteRequest {
            table_name: table_name.to_string(),
            key,
            ..Default::default()
        }
    }

    /// Specify the timeout value for the request.
    ///
    /// This is optional. If not set, the default timeout configured for
    /// the [`Handle`](crate::HandleBuilder::timeout()) is used.
    pub fn timeout(mut self, t: &Duration) -> Self {
        self.timeout = Some(*t);
        self
    }

    /// Cloud only: set the compartment to use for this operation.
    pub fn compartment_id(mut self, compartment_id: &str) -> Self {
        self.compartment_id = compartment_id.to_string();
        self
    }

    /// Succeed only if the row exists and its version matches the given
    /// version.
    pub fn if_version(mut self, version: &Version) -> DeleteRequest {
        self.match_version = version.clone();
        self
    }

    /// Return information about the existing row. Incurs additional cost
    /// and may affect operation latency.
    pub fn return_row(mut self, val: bool) -> DeleteRequest {
        self.return_row = val;
        self
    }

    /// On-premise only: set the durability for this write.
    pub fn durability(mut self, d: Durability) -> DeleteRequest {
        self.durability = Some(d);
        self
    }

    /// When used inside a WriteMultiple batch, abort the whole batch if
    /// this delete fails.
    pub fn abort_on_fail(mut self, val: bool) -> DeleteRequest {
        self.abort_on_fail = val;
        self
    }

    /// Supply a token that can cancel the operation while it is waiting
    /// or in flight.
    pub fn cancellation_token(mut self, token: &CancellationToken) -> DeleteRequest {
        self.cancel = Some(token.clone());
        self
    }

    fn opcode(&self) -> OpCode {
        if !self.match_version.is_empty() {
            OpCode::DeleteIfVersion
        } else {
            OpCode::Delete
        }
    }

    pub async fn execute(&self, h: &Handle) -> Result<DeleteResult, QuartzError> {
        if self.table_name.is_empty() {
            return ia_err!("table name must be non-empty");
        }
        if self.key.is_empty() {
            return ia_err!("delete requires a non-empty key");
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
        let resp = DeleteRequest::deserialize(&mut r)?;
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

        ns.write_map_field(KEY, &self.key);

        if !is_sub_request {
            ns.end_payload();
        }
        ns.end_request();
    }

    pub(crate) fn deserialize(r: &mut Reader) -> Result<DeleteResult, QuartzError> {
        let mut walker = MapWalker::new(r)?;
        let mut res: DeleteResult = Default::default();
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
                SUCCESS => {
                    res.success = walker.read_bool_field()?;
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

impl TaggedRequest for DeleteRequest {
    fn serialize(&self, w: &mut Writer, timeout: &Duration, topo_seq: i32) {
        self.serialize_internal(w, false, timeout, topo_seq);
    }
}

impl TaggedSubRequest for DeleteRequest {
    fn serialize(&self, w: &mut Writer, timeout: &Duration) {
        self.serialize_internal(w, true, timeout, -1);
    }
}
