use crate::cancel::{sleep_honoring, CancellationToken};
use crate::error::QuartzErrorCode::{RequestTimeout, TableNotFound};
use crate::error::{ia_err, QuartzError};
use crate::handle::Handle;
use crate::handle::SendOptions;
use crate::reader::Reader;
use crate::tagged::*;
use crate::types::{FieldType, MapValue, OpCode, TableLimits, TableState};
use crate::writer::Writer;
use std::result::Result;
use std::time::{Duration, Instant};

/// Struct used for creating or modifying a table.
///
/// This is the main method for creating, altering, and dropping tables.
/// It can also be used to alter table limits or tags for cloud
/// operation.
///
/// Table DDL is asynchronous in the service: `execute()` starts the
/// operation and the returned [`TableResult`] is used to poll for
/// completion.
///
/// Example:
/// ```no_run
/// use quartzdb_rust_sdk::TableRequest;
/// use quartzdb_rust_sdk::types::*;
/// # use quartzdb_rust_sdk::Handle;
/// # #[tokio::main]
/// # pub async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// # let handle = Handle::builder().endpoint("http://localhost:8080")?.build().await?;
///     TableRequest::new("testusers")
///         .statement(
///             "create table if not exists testusers (id integer, name string,
///             created timestamp(3), primary key(id))",
///         )
///         // the following line is only needed for Cloud mode
///         .limits(&TableLimits::provisioned(1000, 1000, 10))
///         .execute(&handle)
///         .await?
///         // wait up to 15 seconds for the table to become Active
///         .wait_for_completion_ms(&handle, 15000, 500)
///         .await?;
/// # Ok(())
/// # }
///```
#[derive(Default, Debug)]
pub struct TableRequest {
    pub(crate) table_name: String,
    pub(crate) compartment_id: String,
    pub(crate) namespace: String,
    pub(crate) timeout: Option<Duration>,
    pub(crate) statement: String,
    pub(crate) limits: Option<TableLimits>,
    pub(crate) match_etag: Option<String>,
    pub(crate) free_form_tags: Option<MapValue>,
    pub(crate) defined_tags: Option<MapValue>,
    pub(crate) cancel: Option<CancellationToken>,
}

/// Struct used to get information about a table.
#[derive(Default, Debug)]
pub struct GetTableRequest {
    pub(crate) table_name: String,
    pub(crate) compartment_id: String,
    pub(crate) namespace: String,
    pub(crate) operation_id: String,
    pub(crate) timeout: Option<Duration>,
    pub(crate) cancel: Option<CancellationToken>,
}

/// Cloud only: one remote replica of a multi-region table.
#[derive(Default, Debug, Clone)]
pub struct ReplicaInfo {
    pub region: String,
    pub table_ocid: String,
    pub write_units: i32,
    pub state: TableState,
}

/// Struct representing the result of a [`TableRequest`] or a
/// [`GetTableRequest`].
#[derive(Default, Debug)]
pub struct TableResult {
    pub(crate) table_name: String,
    pub(crate) compartment_id: String,
    pub(crate) namespace: String,
    pub(crate) table_ocid: String,
    pub(crate) ddl: String,
    pub(crate) operation_id: String,
    pub(crate) schema: String,
    pub(crate) state: TableState,
    pub(crate) limits: Option<TableLimits>,
    pub(crate) match_etag: Option<String>,
    pub(crate) free_form_tags: Option<MapValue>,
    pub(crate) defined_tags: Option<MapValue>,
    pub(crate) schema_frozen: bool,
    pub(crate) replicas: Vec<ReplicaInfo>,
    pub(crate) local_replica_initialized: bool,
}

impl TableRequest {
    /// Create a new TableRequest.
    ///
    /// `table_name` is required and must be non-empty.
    pub fn new(table_name: &str) -> TableRequest {
        TableRequest {
            table_name: table_name.to_string(),
            ..Default::default()
        }
    }

    /// Specify the timeout value for the request.
    ///
    /// Note this is just the timeout for the initial request; the DDL
    /// operation itself may take significantly longer. Wait for it with
    /// [`TableResult::wait_for_completion()`].
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
    pub fn namespace(mut self, namespace: &str) -> TableRequest {
        self.namespace = namespace.to_string();
        self
    }

    /// Set the DDL statement for the table operation.
    ///
    /// Required, unless the operation only changes table limits or tags.
    pub fn statement(mut self, stmt: &str) -> TableRequest {
        self.statement = stmt.to_string();
        self
    }

    /// Cloud only: specify throughput and storage limits for the table,
    /// when creating it or to change the limits of an existing table.
    pub fn limits(mut self, limits: &TableLimits) -> TableRequest {
        self.limits = Some(limits.clone());
        self
    }

    /// Cloud only: require a matching ETag for the operation to proceed.
    ///
    /// The ETag must be non-empty and have been returned in a previous
    /// [`TableResult`]. This is a form of optimistic concurrency
    /// control, letting an application ensure no unexpected
    /// modifications were made to the table.
    pub fn match_etag(mut self, match_etag: &str) -> TableRequest {
        self.match_etag = Some(match_etag.to_string());
        self
    }

    /// Cloud only: replace the table's free-form tags.
    pub fn free_form_tags(mut self, tags: MapValue) -> TableRequest {
        self.free_form_tags = Some(tags);
        self
    }

    /// Cloud only: replace the table's defined tags.
    pub fn defined_tags(mut self, tags: MapValue) -> TableRequest {
        self.defined_tags = Some(tags);
        self
    }

    /// Supply a token that can cancel the operation while it is waiting
    /// or in flight.
    pub fn cancellation_token(mut self, token: &CancellationToken) -> TableRequest {
        self.cancel = Some(token.clone());
        self
    }

    /// Start the table request.
    ///
    /// This begins the asynchronous execution of the DDL in the system;
    /// use [`TableResult::wait_for_completion()`] on the returned result
    /// to wait for it to finish.
    pub async fn execute(&self, h: &Handle) -> Result<TableResult, QuartzError> {
        if self.table_name.is_empty() {
            return ia_err!("table name must be non-empty");
        }
        if self.statement.is_empty()
            && self.limits.is_none()
            && self.free_form_tags.is_none()
            && self.defined_tags.is_none()
        {
            return ia_err!("table request needs a statement, limits, or tags");
        }
        if self.limits.is_some() {
            h.check_cloud_only("table limits")?;
        }
        let mut w: Writer = Writer::new();
        w.write_i16(h.serial_version());
        let timeout = h.get_timeout(&self.timeout);
        self.serialize_internal(&mut w, &timeout, h.topo_seq_num());
        let mut opts = SendOptions::new(OpCode::TableRequest, timeout)
            .table(&self.table_name)
            .compartment(&self.compartment_id)
            .namespace(&self.namespace)
            .cancellation(&self.cancel);
        let mut r = h.send_and_receive(w, &mut opts).await?;
        let resp = TableRequest::deserialize(&mut r)?;
        h.update_limiters(&self.compartment_id, &self.table_name, &resp.limits);
        Ok(resp)
    }

    pub(crate) fn serialize_internal(&self, w: &mut Writer, timeout: &Duration, topo_seq: i32) {
        let mut ns = Serializer::start_request(w);
        ns.start_header();
        ns.write_header(OpCode::TableRequest, timeout, &self.table_name, topo_seq);
        ns.end_header();

        // payload
        ns.start_payload();
        ns.write_nonempty_string_field(STATEMENT, &self.statement);
        ns.write_limits(&self.limits);
        if let Some(tags) = &self.free_form_tags {
            ns.write_map_field(FREE_FORM_TAGS, tags);
        }
        if let Some(tags) = &self.defined_tags {
            ns.write_map_field(DEFINED_TAGS, tags);
        }
        if let Some(etag) = &self.match_etag {
            ns.write_string_field(ETAG, etag);
        }
        ns.end_payload();

        ns.end_request();
    }

    pub(crate) fn deserialize(r: &mut Reader) -> Result<TableResult, QuartzError> {
        let mut walker = MapWalker::new(r)?;
        let mut res: TableResult = Default::default();
        while walker.has_next() {
            walker.next()?;
            let name = walker.current_name();
            match name.as_str() {
                ERROR_CODE => {
                    walker.handle_error_code()?;
                }
                COMPARTMENT_OCID => {
                    res.compartment_id = walker.read_string_field()?;
                }
                NAMESPACE => {
                    res.namespace = walker.read_string_field()?;
                }
                TABLE_OCID => {
                    res.table_ocid = walker.read_string_field()?;
                }
                TABLE_NAME => {
                    res.table_name = walker.read_string_field()?;
                }
                TABLE_SCHEMA => {
                    res.schema = walker.read_string_field()?;
                }
                TABLE_DDL => {
                    res.ddl = walker.read_string_field()?;
                }
                OPERATION_ID => {
                    res.operation_id = walker.read_string_field()?;
                }
                LIMITS => {
                    res.limits = Some(walker.read_limits()?);
                }
                TABLE_STATE => {
                    let s = walker.read_i32_field()?;
                    res.state = TableState::from_int(s)?;
                }
                ETAG => {
                    res.match_etag = Some(walker.read_string_field()?);
                }
                FREE_FORM_TAGS => {
                    res.free_form_tags = Some(walker.read_map_field()?);
                }
                DEFINED_TAGS => {
                    res.defined_tags = Some(walker.read_map_field()?);
                }
                SCHEMA_FROZEN => {
                    res.schema_frozen = walker.read_bool_field()?;
                }
                INITIALIZED => {
                    res.local_replica_initialized = walker.read_bool_field()?;
                }
                REPLICAS => {
                    res.replicas = read_replicas(&mut walker)?;
                }
                _ => {
                    walker.skip_field()?;
                }
            }
        }
        Ok(res)
    }
}

fn read_replicas(walker: &mut MapWalker) -> Result<Vec<ReplicaInfo>, QuartzError> {
    MapWalker::expect_type(walker.r, FieldType::Array)?;
    let _ = walker.r.read_i32()?; // skip array size in bytes
    let num_elements = walker.r.read_i32()?;
    let mut replicas: Vec<ReplicaInfo> = Vec::with_capacity(num_elements as usize);
    for _n in 1..=num_elements {
        let mut mw = MapWalker::new(walker.r)?;
        let mut rep: ReplicaInfo = Default::default();
        while mw.has_next() {
            mw.next()?;
            let name = mw.current_name();
            match name.as_str() {
                REGION => {
                    rep.region = mw.read_string_field()?;
                }
                TABLE_OCID => {
                    rep.table_ocid = mw.read_string_field()?;
                }
                WRITE_UNITS => {
                    rep.write_units = mw.read_i32_field()?;
                }
                TABLE_STATE => {
                    let s = mw.read_i32_field()?;
                    rep.state = TableState::from_int(s)?;
                }
                _ => {
                    mw.skip_field()?;
                }
            }
        }
        replicas.push(rep);
    }
    Ok(replicas)
}

impl TaggedRequest for TableRequest {
    fn serialize(&self, w: &mut Writer, timeout: &Duration, topo_seq: i32) {
        self.serialize_internal(w, timeout, topo_seq);
    }
}

impl GetTableRequest {
    pub fn new(table_name: &str) -> GetTableRequest {
        GetTableRequest {
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

    /// Ask for the status of a specific in-progress DDL operation, as
    /// returned in [`TableResult::operation_id()`].
    pub fn operation_id(mut self, op_id: &str) -> GetTableRequest {
        self.operation_id = op_id.to_string();
        self
    }

    /// On-premise only: set the namespace for the operation.
    pub fn namespace(mut self, namespace: &str) -> GetTableRequest {
        self.namespace = namespace.to_string();
        self
    }

    /// Supply a token that can cancel the operation while it is waiting
    /// or in flight.
    pub fn cancellation_token(mut self, token: &CancellationToken) -> GetTableRequest {
        self.cancel = Some(token.clone());
        self
    }

    pub async fn execute(&self, h: &Handle) -> Result<TableResult, QuartzError> {
        if self.table_name.is_empty() {
            return ia_err!("table name must be non-empty");
        }
        let mut w: Writer = Writer::new();
        w.write_i16(h.serial_version());
        let timeout = h.get_timeout(&self.timeout);
        self.serialize_internal(&mut w, &timeout, h.topo_seq_num());
        let mut opts = SendOptions::new(OpCode::GetTable, timeout)
            .table(&self.table_name)
            .compartment(&self.compartment_id)
            .namespace(&self.namespace)
            .cancellation(&self.cancel);
        let mut r = h.send_and_receive(w, &mut opts).await?;
        let resp = TableRequest::deserialize(&mut r)?;
        // the most recent successful description feeds the limiters
        h.update_limiters(&self.compartment_id, &self.table_name, &resp.limits);
        Ok(resp)
    }

    pub(crate) fn serialize_internal(&self, w: &mut Writer, timeout: &Duration, topo_seq: i32) {
        let mut ns = Serializer::start_request(w);
        ns.start_header();
        ns.write_header(OpCode::GetTable, timeout, &self.table_name, topo_seq);
        ns.end_header();

        // payload
        ns.start_payload();
        ns.write_nonempty_string_field(OPERATION_ID, &self.operation_id);
        ns.end_payload();

        ns.end_request();
    }
}

impl TaggedRequest for GetTableRequest {
    fn serialize(&self, w: &mut Writer, timeout: &Duration, topo_seq: i32) {
        self.serialize_internal(w, timeout, topo_seq);
    }
}

impl TableResult {
    /// Wait for the table DDL behind this result to complete.
    ///
    /// Polls the system with [`GetTableRequest`]s until the table
    /// reaches its terminal state, an error occurs, or `wait` elapses.
    /// `delay` is slept between polls. The terminal state is `Dropped`
    /// for a drop operation and `Active` otherwise; a table that
    /// vanishes while waiting for `Active` is an error, while
    /// `TableNotFound` while waiting for `Dropped` is success.
    pub async fn wait_for_completion(
        &mut self,
        h: &Handle,
        wait: Duration,
        delay: Duration,
    ) -> Result<(), QuartzError> {
        if wait < delay {
            return ia_err!("wait duration must be greater than delay duration");
        }
        self.wait_internal(h, Some(wait), delay, None).await
    }

    /// Like [`wait_for_completion()`](TableResult::wait_for_completion),
    /// taking direct millisecond values.
    pub async fn wait_for_completion_ms(
        &mut self,
        h: &Handle,
        wait_ms: u64,
        delay_ms: u64,
    ) -> Result<(), QuartzError> {
        self.wait_for_completion(
            h,
            Duration::from_millis(wait_ms),
            Duration::from_millis(delay_ms),
        )
        .await
    }

    /// Wait for completion using the handle's configured table poll
    /// timeout and poll delay. A handle configured with no poll timeout
    /// waits indefinitely.
    pub async fn wait_for_default_completion(&mut self, h: &Handle) -> Result<(), QuartzError> {
        self.wait_internal(h, h.table_poll_timeout(), h.poll_delay(), None)
            .await
    }

    /// Like [`wait_for_completion()`](TableResult::wait_for_completion)
    /// with a cancellation token observed during the poll delays.
    pub async fn wait_for_completion_with_cancel(
        &mut self,
        h: &Handle,
        wait: Duration,
        delay: Duration,
        cancel: &CancellationToken,
    ) -> Result<(), QuartzError> {
        self.wait_internal(h, Some(wait), delay, Some(cancel.clone()))
            .await
    }

    async fn wait_internal(
        &mut self,
        h: &Handle,
        wait: Option<Duration>,
        delay: Duration,
        cancel: Option<CancellationToken>,
    ) -> Result<(), QuartzError> {
        if self.is_terminal() {
            return Ok(());
        }

        // a drop operation ends at Dropped, everything else at Active
        let target = if self.state == TableState::Dropping {
            TableState::Dropped
        } else {
            TableState::Active
        };

        let deadline = wait.map(|w| Instant::now() + w);
        let mut first_loop = true;

        while !self.is_terminal() {
            if let Some(d) = deadline {
                if Instant::now() >= d {
                    return Err(QuartzError::new(
                        RequestTimeout,
                        "table operation not completed in expected time",
                    ));
                }
            }

            if !first_loop {
                sleep_honoring(delay, cancel.as_ref()).await?;
            }
            first_loop = false;

            let mut get_request = GetTableRequest::new(self.table_name.as_str())
                .operation_id(self.operation_id.as_str())
                .compartment_id(self.compartment_id.as_str())
                .namespace(self.namespace.as_str());
            get_request.cancel = cancel.clone();

            let res = match get_request.execute(h).await {
                Ok(r) => r,
                Err(e) => {
                    // a vanished table is the success condition of a drop
                    if e.code == TableNotFound && target == TableState::Dropped {
                        self.state = TableState::Dropped;
                        return Ok(());
                    }
                    return Err(e);
                }
            };

            if target == TableState::Active && res.state == TableState::Dropped {
                return ia_err!(
                    "table '{}' was dropped while waiting for it to become active",
                    self.table_name
                );
            }

            self.state = res.state;
            self.limits = res.limits;
            self.schema = res.schema;
            self.ddl = res.ddl;
            self.match_etag = res.match_etag;
            self.free_form_tags = res.free_form_tags;
            self.defined_tags = res.defined_tags;
            self.schema_frozen = res.schema_frozen;
            self.replicas = res.replicas;
            self.local_replica_initialized = res.local_replica_initialized;
        }

        Ok(())
    }

    fn is_terminal(&self) -> bool {
        self.state == TableState::Active || self.state == TableState::Dropped
    }

    /// Get the table name.
    pub fn table_name(&self) -> String {
        self.table_name.clone()
    }
    /// Cloud only: get the compartment id of the table.
    pub fn compartment_id(&self) -> String {
        self.compartment_id.clone()
    }
    /// On-premise only: get the namespace of the table.
    pub fn namespace(&self) -> String {
        self.namespace.clone()
    }
    /// Cloud only: get the OCID of the table.
    pub fn table_ocid(&self) -> String {
        self.table_ocid.clone()
    }
    /// Get the DDL statement that created the table, reflecting any
    /// later `ALTER TABLE` operations.
    pub fn ddl(&self) -> String {
        self.ddl.clone()
    }
    /// Get the internal operation id of an in-progress table request.
    ///
    /// Typically not needed by applications; `wait_for_completion` uses
    /// it when polling the system.
    pub fn operation_id(&self) -> String {
        self.operation_id.clone()
    }
    /// Get the schema of the table.
    pub fn schema(&self) -> String {
        self.schema.clone()
    }
    /// Get the current state of the table.
    pub fn state(&self) -> TableState {
        self.state
    }
    /// Cloud only: get the table limits.
    pub fn limits(&self) -> Option<TableLimits> {
        self.limits.clone()
    }
    /// Cloud only: get the match ETag for the table. See
    /// [`TableRequest::match_etag()`].
    pub fn match_etag(&self) -> Option<String> {
        self.match_etag.clone()
    }
    /// Cloud only: get the table's free-form tags.
    pub fn free_form_tags(&self) -> Option<&MapValue> {
        self.free_form_tags.as_ref()
    }
    /// Cloud only: get the table's defined tags.
    pub fn defined_tags(&self) -> Option<&MapValue> {
        self.defined_tags.as_ref()
    }
    /// Cloud only: whether the table's schema is frozen.
    pub fn schema_frozen(&self) -> bool {
        self.schema_frozen
    }
    /// Cloud only: the remote replicas of a multi-region table.
    pub fn replicas(&self) -> &Vec<ReplicaInfo> {
        &self.replicas
    }
    /// Cloud only: whether the local replica has finished its
    /// initialization after being added to a multi-region table.
    pub fn local_replica_initialized(&self) -> bool {
        self.local_replica_initialized
    }
}
