use crate::cancel::CancellationToken;
use crate::error::{ia_err, QuartzError};
use crate::handle::Handle;
use crate::handle::SendOptions;
use crate::reader::Reader;
use crate::tagged::*;
use crate::types::{Capacity, Consistency, MapValue, OpCode};
use crate::writer::Writer;
use crate::Version;
use std::result::Result;
use std::time::Duration;

/// Struct used for getting a single row of data from a table.
#[derive(Default, Debug)]
pub struct GetRequest {
    pub(crate) table_name: String,
    pub(crate) compartment_id: String,
    pub(crate) timeout: Option<Duration>,
    pub(crate) key: MapValue,
    pub(crate) consistency: Consistency,
    pub(crate) cancel: Option<CancellationToken>,
}

/// Struct representing the result of a [`GetRequest`] operation.
#[derive(Default, Debug)]
pub struct GetResult {
    pub(crate) row: Option<MapValue>,
    pub(crate) consumed: Option<Capacity>,
    pub(crate) modification_time: i64,
    pub(crate) expiration_time: i64,
    pub(crate) version: Option<Version>,
}

impl GetResult {
    /// Get the returned row. If the row does not exist in the table,
    /// this value will be `None`. Returned rows preserve the column
    /// order of the table schema.
    pub fn row(&self) -> Option<&MapValue> {
        self.row.as_ref()
    }
    /// Get the consumed capacity (read/write units) of the operation.
    /// This is only valid in the cloud service.
    pub fn consumed(&self) -> Option<&Capacity> {
        self.consumed.as_ref()
    }
    /// Get the last modification time of the row, in milliseconds since
    /// the epoch. Only valid if the row exists.
    pub fn modification_time(&self) -> i64 {
        self.modification_time
    }
    /// Get the expiration time of the row, in milliseconds since the
    /// epoch. Zero if the row does not expire.
    pub fn expiration_time(&self) -> i64 {
        self.expiration_time
    }
    /// Get the version of the row, for use in conditional put/delete
    /// operations. Only valid if the row exists.
    pub fn version(&self) -> Option<&Version> {
        self.version.as_ref()
    }
}

impl GetRequest {
    /// Create a new `GetRequest`.
    ///
    /// `table_name` is required and must be non-empty.
    pub fn new(table_name: &str) -> GetRequest {
        GetRequest {
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
    ///
    /// If no compartment is given, the handle's default compartment is
    /// used, or the root compartment of the tenancy.
    pub fn compartment_id(mut self, compartment_id: &str) -> Self {
        self.compartment_id = compartment_id.to_string();
        self
    }

    /// Specify the primary key of the row to read.
    ///
    /// `key` must contain all fields required to construct the primary
    /// key for the table. Field order is irrelevant.
    pub fn key(mut self, key: MapValue) -> GetRequest {
        self.key = key;
        self
    }

    /// Specify the desired [`Consistency`] for the operation.
    pub fn consistency(mut self, c: Consistency) -> GetRequest {
        self.consistency = c;
        self
    }

    /// Supply a token that can cancel the operation while it is waiting
    /// or in flight.
    pub fn cancellation_token(mut self, token: &CancellationToken) -> GetRequest {
        self.cancel = Some(token.clone());
        self
    }

    /// Execute the request, returning a [`GetResult`].
    ///
    /// If the record exists in the table, [`GetResult::row`] will be
    /// `Some()`.
    pub async fn execute(&self, h: &Handle) -> Result<GetResult, QuartzError> {
        if self.table_name.is_empty() {
            return ia_err!("table name must be non-empty");
        }
        if self.key.is_empty() {
            return ia_err!("get requires a non-empty key");
        }
        let mut w: Writer = Writer::new();
        w.write_i16(h.serial_version());
        let timeout = h.get_timeout(&self.timeout);
        self.serialize_internal(&mut w, &timeout, h.topo_seq_num());
        let mut opts = SendOptions::new(OpCode::Get, timeout)
            .table(&self.table_name)
            .compartment(&self.compartment_id)
            .cancellation(&self.cancel);
        let mut r = h.send_and_receive(w, &mut opts).await?;
        let resp = GetRequest::deserialize(&mut r)?;
        if let Some(c) = &resp.consumed {
            h.apply_rate_feedback(&opts, c);
        }
        Ok(resp)
    }

    pub(crate) fn serialize_internal(&self, w: &mut Writer, timeout: &Duration, topo_seq: i32) {
        let mut ns = Serializer::start_request(w);
        ns.start_header();
        ns.write_header(OpCode::Get, timeout, &self.table_name, topo_seq);
        ns.end_header();

        // payload
        ns.start_payload();
        ns.write_consistency(self.consistency);
        ns.write_map_field(KEY, &self.key);
        ns.end_payload();

        ns.end_request();
    }

    pub(crate) fn deserialize(r: &mut Reader) -> Result<GetResult, QuartzError> {
        let mut walker = MapWalker::new(r)?;
        let mut res: GetResult = Default::default();
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
                ROW => {
                    read_row(walker.r, &mut res)?;
                }
                _ => {
                    walker.skip_field()?;
                }
            }
        }
        Ok(res)
    }
}

fn read_row(r: &mut Reader, res: &mut GetResult) -> Result<(), QuartzError> {
    let mut walker = MapWalker::new(r)?;
    while walker.has_next() {
        walker.next()?;
        let name = walker.current_name();
        match name.as_str() {
            MODIFIED => {
                res.modification_time = walker.read_i64_field()?;
            }
            EXPIRATION => {
                res.expiration_time = walker.read_i64_field()?;
            }
            ROW_VERSION => {
                res.version = Some(walker.read_binary_field()?);
            }
            VALUE => {
                res.row = Some(walker.read_map_field()?);
            }
            _ => {
                walker.skip_field()?;
            }
        }
    }
    Ok(())
}

impl TaggedRequest for GetRequest {
    fn serialize(&self, w: &mut Writer, timeout: &Duration, topo_seq: i32) {
        self.serialize_internal(w, timeout, topo_seq);
    }
}
