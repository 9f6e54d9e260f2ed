use crate::cancel::CancellationToken;
use crate::error::QuartzErrorCode::BadProtocolMessage;
use crate::error::{ia_err, QuartzError};
use crate::handle::Handle;
use crate::handle::SendOptions;
use crate::reader::Reader;
use crate::tagged::*;
use crate::types::{FieldType, OpCode};
use crate::writer::Writer;
use std::result::Result;
use std::time::Duration;

/// Struct used to retrieve information about the indexes of a table.
#[derive(Default, Debug)]
pub struct GetIndexesRequest {
    pub(crate) table_name: String,
    pub(crate) index_name: String,
    pub(crate) compartment_id: String,
    pub(crate) namespace: String,
    pub(crate) timeout: Option<Duration>,
    pub(crate) cancel: Option<CancellationToken>,
}

/// Information about one index of a table.
#[derive(Default, Debug)]
pub struct IndexInfo {
    pub index_name: String,
    pub field_names: Vec<String>,
    pub field_types: Vec<String>,
}

/// Struct representing the result of a [`GetIndexesRequest`].
#[derive(Default, Debug)]
pub struct GetIndexesResult {
    pub(crate) indexes: Vec<IndexInfo>,
}

impl GetIndexesResult {
    /// Get the returned index descriptions.
    pub fn indexes(&self) -> &Vec<IndexInfo> {
        &self.indexes
    }
}

impl GetIndexesRequest {
    /// Create a new GetIndexesRequest. `table_name` must be non-empty.
    pub fn new(table_name: &str) -> GetIndexesRequest {
        GetIndexesRequest {
            table_name: table_name.to_string(),
            ..Default::default()
        }
    }

    /// Restrict the result to a single named index. With no index name,
    /// all of the table's indexes are returned.
    pub fn index_name(mut self, index_name: &str) -> GetIndexesRequest {
        self.index_name = index_name.to_string();
        self
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

    /// On-premise only: set the namespace for the operation.
    pub fn namespace(mut self, namespace: &str) -> GetIndexesRequest {
        self.namespace = namespace.to_string();
        self
    }

    /// Supply a token that can cancel the operation while it is waiting
    /// or in flight.
    pub fn cancellation_token(mut self, token: &CancellationToken) -> GetIndexesRequest {
        self.cancel = Some(token.clone());
        self
    }

    pub async fn execute(&self, h: &Handle) -> Result<GetIndexesResult, QuartzError> {
        if self.table_name.is_empty() {
            return ia_err!("table name must be non-empty");
        }
        let mut w: Writer = Writer::new();
        w.write_i16(h.serial_version());
        let timeout = h.get_timeout(&self.timeout);
        self.serialize_internal(&mut w, &timeout, h.topo_seq_num());
        let mut opts = SendOptions::new(OpCode::GetIndexes, timeout)
            .table(&self.table_name)
            .compartment(&self.compartment_id)
            .namespace(&self.namespace)
            .cancellation(&self.cancel);
        let mut r = h.send_and_receive(w, &mut opts).await?;
        let resp = GetIndexesRequest::deserialize(&mut r)?;
        Ok(resp)
    }

    pub(crate) fn serialize_internal(&self, w: &mut Writer, timeout: &Duration, topo_seq: i32) {
        let mut ns = Serializer::start_request(w);
        ns.start_header();
        ns.write_header(OpCode::GetIndexes, timeout, &self.table_name, topo_seq);
        ns.end_header();

        // payload
        ns.start_payload();
        ns.write_nonempty_string_field(INDEX, &self.index_name);
        ns.end_payload();

        ns.end_request();
    }

    pub(crate) fn deserialize(r: &mut Reader) -> Result<GetIndexesResult, QuartzError> {
        let mut walker = MapWalker::new(r)?;
        let mut res: GetIndexesResult = Default::default();
        while walker.has_next() {
            walker.next()?;
            let name = walker.current_name();
            match name.as_str() {
                ERROR_CODE => {
                    walker.handle_error_code()?;
                }
                INDEXES => {
                    // array of index info
                    MapWalker::expect_type(walker.r, FieldType::Array)?;
                    let _ = walker.r.read_i32()?; // skip array size in bytes
                    let num_elements = walker.r.read_i32()?;
                    res.indexes = Vec::with_capacity(num_elements as usize);
                    for _n in 1..=num_elements {
                        res.indexes.push(GetIndexesRequest::read_index_info(walker.r)?);
                    }
                }
                _ => {
                    walker.skip_field()?;
                }
            }
        }
        Ok(res)
    }

    fn read_index_info(r: &mut Reader) -> Result<IndexInfo, QuartzError> {
        let mut walker = MapWalker::new(r)?;
        let mut res: IndexInfo = Default::default();
        while walker.has_next() {
            walker.next()?;
            let name = walker.current_name();
            match name.as_str() {
                NAME => {
                    res.index_name = walker.read_string_field()?;
                }
                FIELDS => {
                    // array of maps with PATH, TYPE elements each
                    MapWalker::expect_type(walker.r, FieldType::Array)?;
                    let _ = walker.r.read_i32()?; // skip array size in bytes
                    let num_elements = walker.r.read_i32()?;
                    res.field_names = Vec::with_capacity(num_elements as usize);
                    res.field_types = Vec::with_capacity(num_elements as usize);
                    for _n in 1..=num_elements {
                        GetIndexesRequest::read_index_field(walker.r, &mut res)?;
                    }
                }
                _ => {
                    walker.skip_field()?;
                }
            }
        }
        Ok(res)
    }

    fn read_index_field(r: &mut Reader, res: &mut IndexInfo) -> Result<(), QuartzError> {
        let mut walker = MapWalker::new(r)?;
        let mut got_path = false;
        let mut got_type = false;
        while walker.has_next() {
            walker.next()?;
            let name = walker.current_name();
            match name.as_str() {
                PATH => {
                    res.field_names.push(walker.read_string_field()?);
                    got_path = true;
                }
                TYPE => {
                    res.field_types.push(walker.read_string_field()?);
                    got_type = true;
                }
                _ => {
                    walker.skip_field()?;
                }
            }
        }
        if !got_path || !got_type {
            return Err(QuartzError::new(
                BadProtocolMessage,
                "index field missing path or type element",
            ));
        }
        Ok(())
    }
}

impl TaggedRequest for GetIndexesRequest {
    fn serialize(&self, w: &mut Writer, timeout: &Duration, topo_seq: i32) {
        self.serialize_internal(w, timeout, topo_seq);
    }
}
