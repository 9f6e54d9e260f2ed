use crate::cancel::CancellationToken;
use crate::error::QuartzError;
use crate::handle::Handle;
use crate::handle::SendOptions;
use crate::reader::Reader;
use crate::tagged::*;
use crate::types::OpCode;
use crate::writer::Writer;
use std::result::Result;
use std::time::Duration;

/// Struct used to list the tables visible to the caller.
///
/// Large listings page through [`start_index()`](ListTablesRequest::start_index)
/// and [`limit()`](ListTablesRequest::limit) together with
/// [`ListTablesResult::last_table_index()`].
#[derive(Default, Debug)]
pub struct ListTablesRequest {
    pub(crate) compartment_id: String,
    pub(crate) namespace: String,
    pub(crate) start_index: i32,
    pub(crate) limit: i32,
    pub(crate) timeout: Option<Duration>,
    pub(crate) cancel: Option<CancellationToken>,
}

/// Struct representing the result of a [`ListTablesRequest`].
#[derive(Default, Debug)]
pub struct ListTablesResult {
    pub(crate) table_names: Vec<String>,
    pub(crate) last_table_index: i32,
}

impl ListTablesResult {
    /// Get the returned table names.
    pub fn table_names(&self) -> &Vec<String> {
        &self.table_names
    }
    /// Get the index of the last returned table, for paging.
    pub fn last_table_index(&self) -> i32 {
        self.last_table_index
    }
}

impl ListTablesRequest {
    pub fn new() -> ListTablesRequest {
        Default::default()
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

    /// On-premise only: restrict the listing to a namespace.
    pub fn namespace(mut self, namespace: &str) -> ListTablesRequest {
        self.namespace = namespace.to_string();
        self
    }

    /// Limit the number of names returned.
    pub fn limit(mut self, limit: i32) -> ListTablesRequest {
        self.limit = limit;
        self
    }

    /// Start the listing at the given index, typically taken from a
    /// previous result's [`last_table_index()`](ListTablesResult::last_table_index).
    pub fn start_index(mut self, start_index: i32) -> ListTablesRequest {
        self.start_index = start_index;
        self
    }

    /// Supply a token that can cancel the operation while it is waiting
    /// or in flight.
    pub fn cancellation_token(mut self, token: &CancellationToken) -> ListTablesRequest {
        self.cancel = Some(token.clone());
        self
    }

    pub async fn execute(&self, h: &Handle) -> Result<ListTablesResult, QuartzError> {
        let mut w: Writer = Writer::new();
        w.write_i16(h.serial_version());
        let timeout = h.get_timeout(&self.timeout);
        self.serialize_internal(&mut w, &timeout, h.topo_seq_num());
        let mut opts = SendOptions::new(OpCode::ListTables, timeout)
            .compartment(&self.compartment_id)
            .namespace(&self.namespace)
            .cancellation(&self.cancel);
        let mut r = h.send_and_receive(w, &mut opts).await?;
        let resp = ListTablesRequest::deserialize(&mut r)?;
        Ok(resp)
    }

    pub(crate) fn serialize_internal(&self, w: &mut Writer, timeout: &Duration, topo_seq: i32) {
        let mut ns = Serializer::start_request(w);
        ns.start_header();
        ns.write_header(OpCode::ListTables, timeout, "", topo_seq);
        ns.end_header();

        // payload
        ns.start_payload();
        ns.write_nonempty_string_field(NAMESPACE, &self.namespace);
        ns.write_nonzero_i32_field(LIST_START_INDEX, self.start_index);
        ns.write_nonzero_i32_field(LIST_MAX_TO_READ, self.limit);
        ns.end_payload();

        ns.end_request();
    }

    pub(crate) fn deserialize(r: &mut Reader) -> Result<ListTablesResult, QuartzError> {
        let mut walker = MapWalker::new(r)?;
        let mut res: ListTablesResult = Default::default();
        while walker.has_next() {
            walker.next()?;
            let name = walker.current_name();
            match name.as_str() {
                ERROR_CODE => {
                    walker.handle_error_code()?;
                }
                TABLES => {
                    res.table_names = walker.read_string_array_field()?;
                }
                LAST_INDEX => {
                    res.last_table_index = walker.read_i32_field()?;
                }
                _ => {
                    walker.skip_field()?;
                }
            }
        }
        Ok(res)
    }
}

impl TaggedRequest for ListTablesRequest {
    fn serialize(&self, w: &mut Writer, timeout: &Duration, topo_seq: i32) {
        self.serialize_internal(w, timeout, topo_seq);
    }
}
