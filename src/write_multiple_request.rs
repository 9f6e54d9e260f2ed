use crate::cancel::CancellationToken;
use crate::delete_request::DeleteRequest;
use crate::error::{ia_err, QuartzError};
use crate::handle::Handle;
use crate::handle::SendOptions;
use crate::handle_builder::ServiceMode;
use crate::put_request::PutRequest;
use crate::reader::Reader;
use crate::tagged::*;
use crate::types::{Capacity, Durability, FieldType, FieldValue, MapValue, OpCode};
use crate::writer::Writer;
use crate::Version;
use std::result::Result;
use std::time::Duration;

// For doc only
#[allow(unused_imports)]
use crate::{DeleteResult, PutResult};

/// Struct used to perform multiple [`PutRequest`]s and/or
/// [`DeleteRequest`]s in a single atomic operation.
///
/// All sub-operations must target rows sharing the same shard key; the
/// batch executes as a single transaction. Either every sub-operation is
/// applied, or none: a sub-operation added with abort-on-fail that does
/// not succeed aborts the whole batch, and the result then carries the
/// failed operation's index and result instead of the per-op results.
#[derive(Default, Debug)]
pub struct WriteMultipleRequest {
    pub(crate) table_name: String,
    pub(crate) compartment_id: String,
    pub(crate) timeout: Option<Duration>,
    pub(crate) durability: Option<Durability>,
    pub(crate) sub_requests: Vec<Box<dyn TaggedSubRequest>>,
    pub(crate) cancel: Option<CancellationToken>,
}

/// Struct representing the result of a single sub-operation of a
/// [`WriteMultipleRequest`].
#[derive(Default, Debug)]
pub struct SubOperationResult {
    pub(crate) success: bool,
    pub(crate) version: Option<Version>,
    pub(crate) consumed: Option<Capacity>,
    pub(crate) generated_value: Option<FieldValue>,
    pub(crate) existing_modification_time: i64,
    pub(crate) existing_value: Option<MapValue>,
    pub(crate) existing_version: Option<Version>,
}

impl SubOperationResult {
    /// Get the success result of the sub-operation.
    pub fn success(&self) -> bool {
        self.success
    }
    /// For `Put` sub-operations, get the version of the now-current
    /// record. `Some` if the put succeeded.
    pub fn version(&self) -> Option<&Version> {
        self.version.as_ref()
    }
    /// Get the consumed capacity of the sub-operation. Cloud only.
    pub fn consumed(&self) -> Option<&Capacity> {
        self.consumed.as_ref()
    }
    /// For `Put` sub-operations, get the value generated if the
    /// operation created a new value (identity or generated UUID
    /// columns).
    pub fn generated_value(&self) -> Option<&FieldValue> {
        self.generated_value.as_ref()
    }
    /// See [`PutResult::existing_modification_time()`] and
    /// [`DeleteResult::existing_modification_time()`].
    pub fn existing_modification_time(&self) -> i64 {
        self.existing_modification_time
    }
    /// See [`PutResult::existing_value()`] and
    /// [`DeleteResult::existing_value()`].
    pub fn existing_value(&self) -> Option<&MapValue> {
        self.existing_value.as_ref()
    }
    /// See [`PutResult::existing_version()`] and
    /// [`DeleteResult::existing_version()`].
    pub fn existing_version(&self) -> Option<&Version> {
        self.existing_version.as_ref()
    }
}

/// Struct representing the combined results of a
/// [`WriteMultipleRequest`] operation.
#[derive(Default, Debug)]
pub struct WriteMultipleResult {
    pub(crate) results: Vec<SubOperationResult>,
    pub(crate) failed_operation_index: i32,
    pub(crate) failed_operation_result: Option<SubOperationResult>,
    pub(crate) consumed: Option<Capacity>,
}

impl WriteMultipleResult {
    /// Whether every sub-operation was applied. When false, the batch
    /// was aborted and nothing was applied; see
    /// [`failed_operation_index()`](WriteMultipleResult::failed_operation_index).
    pub fn success(&self) -> bool {
        self.failed_operation_index < 0
    }
    /// Get the per-sub-operation results, in the order the operations
    /// were added. Empty when the batch was aborted.
    pub fn results(&self) -> &Vec<SubOperationResult> {
        &self.results
    }
    /// Get the index of the sub-operation that aborted the batch, or -1
    /// if the batch succeeded.
    pub fn failed_operation_index(&self) -> i32 {
        self.failed_operation_index
    }
    /// Get the result of the sub-operation that aborted the batch.
    pub fn failed_operation_result(&self) -> Option<&SubOperationResult> {
        self.failed_operation_result.as_ref()
    }
    /// Get the consumed capacity of the overall operation. Cloud only.
    pub fn consumed(&self) -> Option<&Capacity> {
        self.consumed.as_ref()
    }
}

impl WriteMultipleRequest {
    pub fn new(table_name: &str) -> WriteMultipleRequest {
        WriteMultipleRequest {
            table_name: table_name.to_string(),
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

    /// On-premise only: set the durability for the whole batch.
    pub fn durability(mut self, d: Durability) -> Self {
        self.durability = Some(d);
        self
    }

    /// Add a put sub-operation to the batch.
    pub fn put(mut self, r: PutRequest) -> WriteMultipleRequest {
        self.sub_requests.push(Box::new(r));
        self
    }

    /// Add a delete sub-operation to the batch.
    pub fn delete(mut self, r: DeleteRequest) -> WriteMultipleRequest {
        self.sub_requests.push(Box::new(r));
        self
    }

    /// Add any sub-operation to the batch.
    pub fn add(mut self, r: Box<dyn TaggedSubRequest>) -> WriteMultipleRequest {
        self.sub_requests.push(r);
        self
    }

    /// Supply a token that can cancel the operation while it is waiting
    /// or in flight.
    pub fn cancellation_token(mut self, token: &CancellationToken) -> WriteMultipleRequest {
        self.cancel = Some(token.clone());
        self
    }

    pub async fn execute(&self, h: &Handle) -> Result<WriteMultipleResult, QuartzError> {
        if self.table_name.is_empty() {
            return ia_err!("table name must be non-empty");
        }
        if self.sub_requests.is_empty() {
            return ia_err!("write multiple requires at least one sub-operation");
        }
        if h.inner.builder.mode != ServiceMode::KVStore
            && self.sub_requests.len() > BATCH_OP_NUMBER_LIMIT
        {
            return Err(QuartzError::new(
                crate::error::QuartzErrorCode::BatchOpNumberLimitExceeded,
                &format!(
                    "batch of {} operations exceeds the limit of {}",
                    self.sub_requests.len(),
                    BATCH_OP_NUMBER_LIMIT
                ),
            ));
        }
        let mut w: Writer = Writer::new();
        w.write_i16(h.serial_version());
        let timeout = h.get_timeout(&self.timeout);
        self.serialize_internal(&mut w, &timeout, h.topo_seq_num())?;
        let mut opts = SendOptions::new(OpCode::WriteMultiple, timeout)
            .table(&self.table_name)
            .compartment(&self.compartment_id)
            .cancellation(&self.cancel);
        let mut r = h.send_and_receive(w, &mut opts).await?;
        let resp = WriteMultipleRequest::deserialize(&mut r)?;
        if let Some(c) = &resp.consumed {
            h.apply_rate_feedback(&opts, c);
        }
        Ok(resp)
    }

    fn serialize_internal(
        &self,
        w: &mut Writer,
        timeout: &Duration,
        topo_seq: i32,
    ) -> Result<(), QuartzError> {
        let mut ns = Serializer::start_request(w);
        ns.start_header();
        ns.write_header(OpCode::WriteMultiple, timeout, &self.table_name, topo_seq);
        ns.end_header();

        ns.start_payload();
        ns.write_durability(&self.durability);
        ns.write_i32_field(NUM_OPERATIONS, self.sub_requests.len() as i32);

        // OPERATIONS: array of maps, one per sub-operation, each with its
        // own opcode and abort flag
        ns.start_array(OPERATIONS);
        for rq in self.sub_requests.as_slice() {
            ns.write_subrequest_checked(rq, timeout)?;
            ns.end_array_field(0);
        }
        ns.end_array(OPERATIONS);

        ns.end_payload();
        ns.end_request();
        Ok(())
    }

    pub(crate) fn deserialize(r: &mut Reader) -> Result<WriteMultipleResult, QuartzError> {
        let mut walker = MapWalker::new(r)?;
        let mut res = WriteMultipleResult {
            failed_operation_index: -1,
            ..Default::default()
        };
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
                WM_SUCCESS => {
                    // array of per-operation result maps
                    MapWalker::expect_type(walker.r, FieldType::Array)?;
                    let _ = walker.r.read_i32()?; // skip array size in bytes
                    let num_elements = walker.r.read_i32()?;
                    res.results = Vec::with_capacity(num_elements as usize);
                    for _n in 1..=num_elements {
                        res.results.push(Self::read_op_result(walker.r)?);
                    }
                }
                WM_FAILURE => {
                    Self::read_failed_result(walker.r, &mut res)?;
                }
                _ => {
                    walker.skip_field()?;
                }
            }
        }
        if !res.success() {
            // an aborted batch applies nothing; only the failure is
            // reported
            res.results = Vec::new();
        }
        Ok(res)
    }

    fn read_failed_result(
        r: &mut Reader,
        res: &mut WriteMultipleResult,
    ) -> Result<(), QuartzError> {
        let mut walker = MapWalker::new(r)?;
        while walker.has_next() {
            walker.next()?;
            let name = walker.current_name();
            match name.as_str() {
                WM_FAIL_INDEX => {
                    res.failed_operation_index = walker.read_i32_field()?;
                }
                WM_FAIL_RESULT => {
                    res.failed_operation_result = Some(Self::read_op_result(walker.r)?);
                }
                _ => {
                    walker.skip_field()?;
                }
            }
        }
        Ok(())
    }

    fn read_op_result(r: &mut Reader) -> Result<SubOperationResult, QuartzError> {
        let mut walker = MapWalker::new(r)?;
        let mut res: SubOperationResult = Default::default();
        while walker.has_next() {
            walker.next()?;
            let name = walker.current_name();
            match name.as_str() {
                SUCCESS => {
                    res.success = walker.read_bool_field()?;
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

impl TaggedRequest for WriteMultipleRequest {
    fn serialize(&self, w: &mut Writer, timeout: &Duration, topo_seq: i32) {
        let _ = self.serialize_internal(w, timeout, topo_seq);
    }
}
