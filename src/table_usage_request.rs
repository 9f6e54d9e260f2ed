use crate::cancel::CancellationToken;
use crate::error::{ia_err, QuartzError};
use crate::handle::Handle;
use crate::handle::SendOptions;
use crate::reader::Reader;
use crate::tagged::*;
use crate::types::{FieldType, OpCode};
use crate::writer::Writer;
use chrono::{DateTime, FixedOffset};
use std::result::Result;
use std::time::Duration;

/// Cloud only: struct used to retrieve dynamic throughput usage
/// information for a table.
///
/// Usage is reported in per-period records; the period length is chosen
/// by the service (typically one minute). Large time ranges page through
/// [`start_index()`](TableUsageRequest::start_index) and
/// [`limit()`](TableUsageRequest::limit).
#[derive(Default, Debug)]
pub struct TableUsageRequest {
    pub(crate) table_name: String,
    pub(crate) compartment_id: String,
    pub(crate) start_time: Option<DateTime<FixedOffset>>,
    pub(crate) end_time: Option<DateTime<FixedOffset>>,
    pub(crate) limit: i32,
    pub(crate) start_index: i32,
    pub(crate) timeout: Option<Duration>,
    pub(crate) cancel: Option<CancellationToken>,
}

/// One per-period usage record of a table.
#[derive(Default, Debug)]
pub struct TableUsage {
    pub start_time: Option<DateTime<FixedOffset>>,
    pub seconds_in_period: i32,
    pub read_units: i32,
    pub write_units: i32,
    pub storage_gb: i32,
    pub read_throttle_count: i32,
    pub write_throttle_count: i32,
    pub storage_throttle_count: i32,
    pub max_shard_usage_percent: i32,
}

/// Struct representing the result of a [`TableUsageRequest`].
#[derive(Default, Debug)]
pub struct TableUsageResult {
    pub(crate) table_name: String,
    pub(crate) usage_records: Vec<TableUsage>,
    pub(crate) last_index_returned: i32,
}

impl TableUsageResult {
    /// Get the table name.
    pub fn table_name(&self) -> String {
        self.table_name.clone()
    }
    /// Get a reference to the returned usage records.
    pub fn usage_records(&self) -> &Vec<TableUsage> {
        &self.usage_records
    }
    /// Take the usage records, leaving an empty vector behind.
    pub fn take_usage_records(&mut self) -> Vec<TableUsage> {
        std::mem::take(&mut self.usage_records)
    }
    /// Get the index of the last returned record, for paging.
    pub fn last_index_returned(&self) -> i32 {
        self.last_index_returned
    }
}

impl TableUsageRequest {
    /// Create a new TableUsageRequest. `table_name` must be non-empty.
    pub fn new(table_name: &str) -> TableUsageRequest {
        TableUsageRequest {
            table_name: table_name.to_string(),
            ..Default::default()
        }
    }

    /// Specify the timeout value for the request.
    pub fn timeout(mut self, t: &Duration) -> Self {
        self.timeout = Some(*t);
        self
    }

    /// Cloud only: set the compartment to use for this operation.
    pub fn compartment_id(mut self, compartment_id: &str) -> Self {
        self.compartment_id = compartment_id.to_string();
        self
    }

    /// Restrict the usage records to periods starting at or after the
    /// given time.
    pub fn start_time(mut self, t: DateTime<FixedOffset>) -> TableUsageRequest {
        self.start_time = Some(t);
        self
    }

    /// Restrict the usage records to periods starting before the given
    /// time.
    pub fn end_time(mut self, t: DateTime<FixedOffset>) -> TableUsageRequest {
        self.end_time = Some(t);
        self
    }

    /// Limit the number of usage records returned.
    pub fn limit(mut self, l: i32) -> TableUsageRequest {
        self.limit = l;
        self
    }

    /// Start the listing at the given record index, typically taken from
    /// a previous result's [`last_index_returned()`](TableUsageResult::last_index_returned).
    pub fn start_index(mut self, i: i32) -> TableUsageRequest {
        self.start_index = i;
        self
    }

    /// Supply a token that can cancel the operation while it is waiting
    /// or in flight.
    pub fn cancellation_token(mut self, token: &CancellationToken) -> TableUsageRequest {
        self.cancel = Some(token.clone());
        self
    }

    /// Execute the request, returning a [`TableUsageResult`].
    pub async fn execute(&self, h: &Handle) -> Result<TableUsageResult, QuartzError> {
        if self.table_name.is_empty() {
            return ia_err!("table name must be non-empty");
        }
        h.check_cloud_only("table usage reports")?;
        let mut w: Writer = Writer::new();
        w.write_i16(h.serial_version());
        let timeout = h.get_timeout(&self.timeout);
        self.serialize_internal(&mut w, &timeout, h.topo_seq_num());
        let mut opts = SendOptions::new(OpCode::GetTableUsage, timeout)
            .table(&self.table_name)
            .compartment(&self.compartment_id)
            .cancellation(&self.cancel);
        let mut r = h.send_and_receive(w, &mut opts).await?;
        let resp = TableUsageRequest::deserialize(&mut r)?;
        Ok(resp)
    }

    pub(crate) fn serialize_internal(&self, w: &mut Writer, timeout: &Duration, topo_seq: i32) {
        let mut ns = Serializer::start_request(w);
        ns.start_header();
        ns.write_header(OpCode::GetTableUsage, timeout, &self.table_name, topo_seq);
        ns.end_header();

        // payload
        ns.start_payload();
        if let Some(sval) = self.start_time {
            ns.write_string_field(START, &sval.to_rfc3339());
        }
        if let Some(eval) = self.end_time {
            ns.write_string_field(END, &eval.to_rfc3339());
        }
        ns.write_nonzero_i32_field(LIST_MAX_TO_READ, self.limit);
        ns.write_nonzero_i32_field(LIST_START_INDEX, self.start_index);
        ns.end_payload();

        ns.end_request();
    }

    pub(crate) fn deserialize(r: &mut Reader) -> Result<TableUsageResult, QuartzError> {
        let mut walker = MapWalker::new(r)?;
        let mut res: TableUsageResult = Default::default();
        while walker.has_next() {
            walker.next()?;
            let name = walker.current_name();
            match name.as_str() {
                ERROR_CODE => {
                    walker.handle_error_code()?;
                }
                TABLE_NAME => {
                    res.table_name = walker.read_string_field()?;
                }
                LAST_INDEX => {
                    res.last_index_returned = walker.read_i32_field()?;
                }
                TABLE_USAGE => {
                    // array of usage records
                    MapWalker::expect_type(walker.r, FieldType::Array)?;
                    let _ = walker.r.read_i32()?; // skip array size in bytes
                    let num_elements = walker.r.read_i32()?;
                    res.usage_records = Vec::with_capacity(num_elements as usize);
                    for _n in 1..=num_elements {
                        res.usage_records
                            .push(TableUsageRequest::read_usage_record(walker.r)?);
                    }
                }
                _ => {
                    walker.skip_field()?;
                }
            }
        }
        Ok(res)
    }

    fn read_usage_record(r: &mut Reader) -> Result<TableUsage, QuartzError> {
        let mut walker = MapWalker::new(r)?;
        let mut res: TableUsage = Default::default();
        while walker.has_next() {
            walker.next()?;
            let name = walker.current_name();
            match name.as_str() {
                START => {
                    let s = walker.read_string_field()?;
                    res.start_time = Some(DateTime::parse_from_rfc3339(&s)?);
                }
                TABLE_USAGE_PERIOD => {
                    res.seconds_in_period = walker.read_i32_field()?;
                }
                READ_UNITS => {
                    res.read_units = walker.read_i32_field()?;
                }
                WRITE_UNITS => {
                    res.write_units = walker.read_i32_field()?;
                }
                STORAGE_GB => {
                    res.storage_gb = walker.read_i32_field()?;
                }
                READ_THROTTLE_COUNT => {
                    res.read_throttle_count = walker.read_i32_field()?;
                }
                WRITE_THROTTLE_COUNT => {
                    res.write_throttle_count = walker.read_i32_field()?;
                }
                STORAGE_THROTTLE_COUNT => {
                    res.storage_throttle_count = walker.read_i32_field()?;
                }
                MAX_SHARD_USAGE_PERCENT => {
                    res.max_shard_usage_percent = walker.read_i32_field()?;
                }
                _ => {
                    walker.skip_field()?;
                }
            }
        }
        Ok(res)
    }
}

impl TaggedRequest for TableUsageRequest {
    fn serialize(&self, w: &mut Writer, timeout: &Duration, topo_seq: i32) {
        self.serialize_internal(w, timeout, topo_seq);
    }
}
