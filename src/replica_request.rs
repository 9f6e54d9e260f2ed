use crate::cancel::CancellationToken;
use crate::error::{ia_err, QuartzError};
use crate::handle::Handle;
use crate::handle::SendOptions;
use crate::reader::Reader;
use crate::table_request::{TableRequest, TableResult};
use crate::tagged::*;
use crate::types::{FieldType, OpCode};
use crate::writer::Writer;
use chrono::{DateTime, FixedOffset};
use std::collections::HashMap;
use std::result::Result;
use std::time::Duration;

/// Cloud only: add a remote replica to a table, making it a
/// multi-region table.
///
/// Like other table DDL this is asynchronous; wait on the returned
/// [`TableResult`] for the operation to complete. The replica table
/// inherits the source table's schema; its throughput can be overridden
/// per region.
#[derive(Default, Debug)]
pub struct AddReplicaRequest {
    pub(crate) table_name: String,
    pub(crate) region: String,
    pub(crate) compartment_id: String,
    pub(crate) read_units: i32,
    pub(crate) write_units: i32,
    pub(crate) match_etag: Option<String>,
    pub(crate) timeout: Option<Duration>,
    pub(crate) cancel: Option<CancellationToken>,
}

impl AddReplicaRequest {
    /// Create a new AddReplicaRequest. Both names are required:
    /// `table_name` is the local table, `region` the region to
    /// replicate into.
    pub fn new(table_name: &str, region: &str) -> AddReplicaRequest {
        AddReplicaRequest {
            table_name: table_name.to_string(),
            region: region.to_string(),
            ..Default::default()
        }
    }

    /// Specify the timeout value for the request.
    pub fn timeout(mut self, t: &Duration) -> Self {
        self.timeout = Some(*t);
        self
    }

    /// Set the compartment to use for this operation.
    pub fn compartment_id(mut self, compartment_id: &str) -> Self {
        self.compartment_id = compartment_id.to_string();
        self
    }

    /// Override the read throughput of the replica table.
    pub fn read_units(mut self, units: i32) -> Self {
        self.read_units = units;
        self
    }

    /// Override the write throughput of the replica table.
    pub fn write_units(mut self, units: i32) -> Self {
        self.write_units = units;
        self
    }

    /// Require a matching ETag for the operation to proceed. See
    /// [`TableRequest::match_etag()`](crate::TableRequest::match_etag).
    pub fn match_etag(mut self, match_etag: &str) -> Self {
        self.match_etag = Some(match_etag.to_string());
        self
    }

    /// Supply a token that can cancel the operation while it is waiting
    /// or in flight.
    pub fn cancellation_token(mut self, token: &CancellationToken) -> Self {
        self.cancel = Some(token.clone());
        self
    }

    pub async fn execute(&self, h: &Handle) -> Result<TableResult, QuartzError> {
        if self.table_name.is_empty() || self.region.is_empty() {
            return ia_err!("add replica requires a table name and a region");
        }
        h.check_cloud_only("table replicas")?;
        let mut w: Writer = Writer::new();
        w.write_i16(h.serial_version());
        let timeout = h.get_timeout(&self.timeout);
        self.serialize_internal(&mut w, &timeout, h.topo_seq_num());
        let mut opts = SendOptions::new(OpCode::AddReplica, timeout)
            .table(&self.table_name)
            .compartment(&self.compartment_id)
            .cancellation(&self.cancel);
        let mut r = h.send_and_receive(w, &mut opts).await?;
        TableRequest::deserialize(&mut r)
    }

    pub(crate) fn serialize_internal(&self, w: &mut Writer, timeout: &Duration, topo_seq: i32) {
        let mut ns = Serializer::start_request(w);
        ns.start_header();
        ns.write_header(OpCode::AddReplica, timeout, &self.table_name, topo_seq);
        ns.end_header();

        // payload
        ns.start_payload();
        ns.write_string_field(REGION, &self.region);
        ns.write_nz_field(READ_UNITS, self.read_units);
        ns.write_nz_field(WRITE_UNITS, self.write_units);
        if let Some(etag) = &self.match_etag {
            ns.write_string_field(ETAG, etag);
        }
        ns.end_payload();

        ns.end_request();
    }
}

impl TaggedRequest for AddReplicaRequest {
    fn serialize(&self, w: &mut Writer, timeout: &Duration, topo_seq: i32) {
        self.serialize_internal(w, timeout, topo_seq);
    }
}

/// Cloud only: drop a remote replica of a multi-region table.
#[derive(Default, Debug)]
pub struct DropReplicaRequest {
    pub(crate) table_name: String,
    pub(crate) region: String,
    pub(crate) compartment_id: String,
    pub(crate) match_etag: Option<String>,
    pub(crate) timeout: Option<Duration>,
    pub(crate) cancel: Option<CancellationToken>,
}

impl DropReplicaRequest {
    pub fn new(table_name: &str, region: &str) -> DropReplicaRequest {
        DropReplicaRequest {
            table_name: table_name.to_string(),
            region: region.to_string(),
            ..Default::default()
        }
    }

    /// Specify the timeout value for the request.
    pub fn timeout(mut self, t: &Duration) -> Self {
        self.timeout = Some(*t);
        self
    }

    /// Set the compartment to use for this operation.
    pub fn compartment_id(mut self, compartment_id: &str) -> Self {
        self.compartment_id = compartment_id.to_string();
        self
    }

    /// Require a matching ETag for the operation to proceed.
    pub fn match_etag(mut self, match_etag: &str) -> Self {
        self.match_etag = Some(match_etag.to_string());
        self
    }

    /// Supply a token that can cancel the operation while it is waiting
    /// or in flight.
    pub fn cancellation_token(mut self, token: &CancellationToken) -> Self {
        self.cancel = Some(token.clone());
        self
    }

    pub async fn execute(&self, h: &Handle) -> Result<TableResult, QuartzError> {
        if self.table_name.is_empty() || self.region.is_empty() {
            return ia_err!("drop replica requires a table name and a region");
        }
        h.check_cloud_only("table replicas")?;
        let mut w: Writer = Writer::new();
        w.write_i16(h.serial_version());
        let timeout = h.get_timeout(&self.timeout);
        self.serialize_internal(&mut w, &timeout, h.topo_seq_num());
        let mut opts = SendOptions::new(OpCode::DropReplica, timeout)
            .table(&self.table_name)
            .compartment(&self.compartment_id)
            .cancellation(&self.cancel);
        let mut r = h.send_and_receive(w, &mut opts).await?;
        TableRequest::deserialize(&mut r)
    }

    pub(crate) fn serialize_internal(&self, w: &mut Writer, timeout: &Duration, topo_seq: i32) {
        let mut ns = Serializer::start_request(w);
        ns.start_header();
        ns.write_header(OpCode::DropReplica, timeout, &self.table_name, topo_seq);
        ns.end_header();

        // payload
        ns.start_payload();
        ns.write_string_field(REGION, &self.region);
        if let Some(etag) = &self.match_etag {
            ns.write_string_field(ETAG, etag);
        }
        ns.end_payload();

        ns.end_request();
    }
}

impl TaggedRequest for DropReplicaRequest {
    fn serialize(&self, w: &mut Writer, timeout: &Duration, topo_seq: i32) {
        self.serialize_internal(w, timeout, topo_seq);
    }
}

/// One replication-lag sample for one replica.
#[derive(Default, Debug, Clone)]
pub struct ReplicaStats {
    /// When the sample was collected, in milliseconds since the epoch.
    pub collection_time: i64,
    /// The replication lag at collection time, in milliseconds. A value
    /// of -1 means the lag was unknown.
    pub replica_lag_ms: i32,
}

/// Struct representing the result of a [`ReplicaStatsRequest`].
#[derive(Default, Debug)]
pub struct ReplicaStatsResult {
    pub(crate) table_name: String,
    pub(crate) next_start_time: i64,
    pub(crate) stats: HashMap<String, Vec<ReplicaStats>>,
}

impl ReplicaStatsResult {
    /// Get the table name.
    pub fn table_name(&self) -> String {
        self.table_name.clone()
    }
    /// The start time to use for a subsequent paging request, in
    /// milliseconds since the epoch.
    pub fn next_start_time(&self) -> i64 {
        self.next_start_time
    }
    /// The returned samples, keyed by replica region.
    pub fn stats(&self) -> &HashMap<String, Vec<ReplicaStats>> {
        &self.stats
    }
}

/// Cloud only: retrieve replication-lag statistics for a multi-region
/// table, for one replica or all of them.
#[derive(Default, Debug)]
pub struct ReplicaStatsRequest {
    pub(crate) table_name: String,
    pub(crate) region: String,
    pub(crate) compartment_id: String,
    pub(crate) start_time: Option<DateTime<FixedOffset>>,
    pub(crate) limit: i32,
    pub(crate) timeout: Option<Duration>,
    pub(crate) cancel: Option<CancellationToken>,
}

impl ReplicaStatsRequest {
    pub fn new(table_name: &str) -> ReplicaStatsRequest {
        ReplicaStatsRequest {
            table_name: table_name.to_string(),
            ..Default::default()
        }
    }

    /// Restrict the statistics to one replica region. With no region,
    /// samples for all replicas are returned.
    pub fn region(mut self, region: &str) -> Self {
        self.region = region.to_string();
        self
    }

    /// Specify the timeout value for the request.
    pub fn timeout(mut self, t: &Duration) -> Self {
        self.timeout = Some(*t);
        self
    }

    /// Set the compartment to use for this operation.
    pub fn compartment_id(mut self, compartment_id: &str) -> Self {
        self.compartment_id = compartment_id.to_string();
        self
    }

    /// Only return samples collected at or after the given time.
    pub fn start_time(mut self, t: DateTime<FixedOffset>) -> Self {
        self.start_time = Some(t);
        self
    }

    /// Limit the number of samples returned per replica.
    pub fn limit(mut self, l: i32) -> Self {
        self.limit = l;
        self
    }

    /// Supply a token that can cancel the operation while it is waiting
    /// or in flight.
    pub fn cancellation_token(mut self, token: &CancellationToken) -> Self {
        self.cancel = Some(token.clone());
        self
    }

    pub async fn execute(&self, h: &Handle) -> Result<ReplicaStatsResult, QuartzError> {
        if self.table_name.is_empty() {
            return ia_err!("table name must be non-empty");
        }
        h.check_cloud_only("replica statistics")?;
        let mut w: Writer = Writer::new();
        w.write_i16(h.serial_version());
        let timeout = h.get_timeout(&self.timeout);
        self.serialize_internal(&mut w, &timeout, h.topo_seq_num());
        let mut opts = SendOptions::new(OpCode::GetReplicaStats, timeout)
            .table(&self.table_name)
            .compartment(&self.compartment_id)
            .cancellation(&self.cancel);
        let mut r = h.send_and_receive(w, &mut opts).await?;
        ReplicaStatsRequest::deserialize(&mut r)
    }

    pub(crate) fn serialize_internal(&self, w: &mut Writer, timeout: &Duration, topo_seq: i32) {
        let mut ns = Serializer::start_request(w);
        ns.start_header();
        ns.write_header(OpCode::GetReplicaStats, timeout, &self.table_name, topo_seq);
        ns.end_header();

        // payload
        ns.start_payload();
        ns.write_nonempty_string_field(REGION, &self.region);
        if let Some(sval) = self.start_time {
            ns.write_string_field(START, &sval.to_rfc3339());
        }
        ns.write_nonzero_i32_field(LIST_MAX_TO_READ, self.limit);
        ns.end_payload();

        ns.end_request();
    }

    pub(crate) fn deserialize(r: &mut Reader) -> Result<ReplicaStatsResult, QuartzError> {
        let mut walker = MapWalker::new(r)?;
        let mut res: ReplicaStatsResult = Default::default();
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
                NEXT_START_TIME => {
                    res.next_start_time = walker.read_i64_field()?;
                }
                REPLICA_STATS => {
                    // map of region -> array of samples
                    MapWalker::expect_map_type(walker.r)?;
                    let _ = walker.r.read_i32()?; // skip map size in bytes
                    let num_regions = walker.r.read_i32()?;
                    for _n in 1..=num_regions {
                        let region = walker.r.read_string()?;
                        let records = Self::read_stats_records(walker.r)?;
                        res.stats.insert(region, records);
                    }
                }
                _ => {
                    walker.skip_field()?;
                }
            }
        }
        Ok(res)
    }

    fn read_stats_records(r: &mut Reader) -> Result<Vec<ReplicaStats>, QuartzError> {
        MapWalker::expect_type(r, FieldType::Array)?;
        let _ = r.read_i32()?; // skip array size in bytes
        let num_elements = r.read_i32()?;
        let mut records: Vec<ReplicaStats> = Vec::with_capacity(num_elements as usize);
        for _n in 1..=num_elements {
            let mut walker = MapWalker::new(r)?;
            let mut rec = ReplicaStats {
                replica_lag_ms: -1,
                ..Default::default()
            };
            while walker.has_next() {
                walker.next()?;
                let name = walker.current_name();
                match name.as_str() {
                    TIME => {
                        rec.collection_time = walker.read_i64_field()?;
                    }
                    REPLICA_LAG => {
                        rec.replica_lag_ms = walker.read_i32_field()?;
                    }
                    _ => {
                        walker.skip_field()?;
                    }
                }
            }
            records.push(rec);
        }
        Ok(records)
    }
}

impl TaggedRequest for ReplicaStatsRequest {
    fn serialize(&self, w: &mut Writer, timeout: &Duration, topo_seq: i32) {
        self.serialize_internal(w, timeout, topo_seq);
    }
}
