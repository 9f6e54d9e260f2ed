use crate::cancel::CancellationToken;
use crate::error::QuartzErrorCode::PreparedStatementInvalid;
use crate::error::{ia_err, is_err, QuartzError};
use crate::handle::Handle;
use crate::handle::SendOptions;
use crate::plan::{deserialize_plan_step, StepKind, StepState};
use crate::prepared_statement::PreparedStatement;
use crate::reader::Reader;
use crate::step_receive::ReceiveStepData;
use crate::tagged::*;
use crate::types::ToFieldValue;
use crate::types::{Capacity, Consistency, Durability, FieldType, FieldValue, MapValue, OpCode};
use crate::types::TopologyInfo;
use crate::writer::Writer;

use std::result::Result;
use std::time::Duration;
use tracing::trace;

/// Encapsulates a SQL query over a table.
///
/// A query carries either a SQL statement string or a prepared query,
/// which may include bind variables. A request cannot have both, but
/// it must have one or the other.
///
/// While this struct is named `QueryRequest`, the SQL supplied to it is
/// not limited to `SELECT`; `INSERT`, `UPDATE` and `DELETE` statements
/// execute through the same request.
///
/// ## Simple example
/// Running a query that returns every row of a table named `users`:
///
/// ```no_run
/// # use quartzdb_rust_sdk::{Handle, QueryRequest};
/// # #[tokio::main]
/// # pub async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let handle = Handle::builder().endpoint("http://localhost:8080")?.build().await?;
/// let results = QueryRequest::new("select * from users", "users")
///               .execute(&handle).await?;
/// for row in results.rows() {
///     println!("Row = {}", row);
/// }
/// # Ok(())
/// # }
/// ```
///
/// For queries that may be reused, prepared queries are preferred: they
/// bypass compilation of the statement and allow parameterization
/// through bind variables.
#[derive(Default, Debug)]
pub struct QueryRequest {
    pub(crate) table_name: String,
    pub(crate) prepare_only: bool,
    pub(crate) limit: u32,
    pub(crate) max_read_kb: u32,
    pub(crate) max_write_kb: u32,
    pub(crate) consistency: Consistency,
    pub(crate) durability: Option<Durability>,
    pub(crate) trace_level: i32,
    pub(crate) timeout: Option<Duration>,
    pub(crate) compartment_id: String,
    pub(crate) cancel: Option<CancellationToken>,

    // the SQL statement for a not-yet-prepared query.
    statement: Option<String>,

    // the prepared form of the query.
    pub(crate) prepared_statement: PreparedStatement,

    // set once this request has been bound to a driver-side plan
    has_driver: bool,

    pub(crate) is_done: bool,

    // single-batch requests created internally by the receive step
    is_internal: bool,

    // whether this request already re-prepared after the server
    // invalidated its prepared statement
    reprepared: bool,

    // set when a batch stopped on a size- or count-based limit; the
    // next batch continues where it left off.
    pub(crate) reached_limit: bool,

    pub(crate) consumed_capacity: Capacity,

    // Client-side memory used by this query for sorting, grouping and
    // duplicate elimination, bounded by the handle's max_memory_mb.
    pub(crate) memory_consumption: i64,
    pub(crate) max_memory_bytes: i64,

    pub(crate) continuation_key: Option<Vec<u8>>,

    pub(crate) shard_id: i32,

    // total number of batches executed
    pub(crate) batch_counter: i32,

    // register array for driver-side plan execution
    pub(crate) num_registers: i32,
    pub(crate) registers: Vec<FieldValue>,

    pub(crate) topology_info: TopologyInfo,
}

/// Struct representing the result of a query operation.
#[derive(Default, Debug)]
pub struct QueryResult {
    pub(crate) rows: Vec<MapValue>,
    pub(crate) prepared_statement: PreparedStatement,
    pub(crate) consumed: Capacity,
}

impl QueryResult {
    /// Get the query result rows, if any, in the order produced by the
    /// query.
    pub fn rows(&self) -> &Vec<MapValue> {
        &self.rows
    }
    /// Take the query result rows, leaving an empty vector behind.
    pub fn take_rows(&mut self) -> Vec<MapValue> {
        std::mem::take(&mut self.rows)
    }
    /// Get the prepared statement after execution of a query.
    ///
    /// The statement can be used in subsequent
    /// [`QueryRequest::new_prepared()`] calls, saving the cost of
    /// preparing the query again.
    pub fn prepared_statement(&self) -> PreparedStatement {
        let mut ps = self.prepared_statement.clone();
        let _ = ps.reset();
        ps
    }
    /// Get the total capacity consumed across all batches of the query.
    /// Cloud only.
    pub fn consumed(&self) -> Capacity {
        self.consumed
    }
}

impl QueryRequest {
    /// Create a new QueryRequest from a SQL statement string.
    ///
    /// `table_name` names the table the query operates on and is
    /// required for the request to be authorized and routed correctly.
    ///
    /// Note: DDL statements (`CREATE TABLE` and friends) do not run
    /// through queries; use [`TableRequest`](crate::TableRequest) instead.
    pub fn new(statement: &str, table_name: &str) -> Self {
        QueryRequest {
            statement: Some(statement.to_string()),
            table_name: table_name.to_string(),
            shard_id: -1,
            ..Default::default()
        }
    }

    /// Create a new QueryRequest from a previously prepared statement.
    ///
    /// Recommended when executing the same query multiple times with
    /// different values for its bind variables: create the request with
    /// this method, call [`set_variable()`](QueryRequest::set_variable)
    /// for the variables, then [`execute()`](QueryRequest::execute).
    pub fn new_prepared(prepared_statement: &PreparedStatement) -> Result<Self, QuartzError> {
        let ti = match &prepared_statement.topology_info {
            Some(t) => t.clone(),
            None => {
                return ia_err!(
                    "prepared statement is missing topology info; it was not \
                     created by a query execution"
                );
            }
        };
        Ok(QueryRequest {
            table_name: prepared_statement.table_name.clone().unwrap_or_default(),
            prepared_statement: prepared_statement.clone(),
            shard_id: -1,
            topology_info: ti,
            ..Default::default()
        })
    }

    /// Only prepare the query; return no rows.
    ///
    /// After executing, retrieve the statement with
    /// [`QueryResult::prepared_statement()`] and reuse it through
    /// [`QueryRequest::new_prepared()`].
    pub fn prepare_only(mut self) -> Self {
        self.prepare_only = true;
        self
    }

    /// Specify the timeout value for the request.
    ///
    /// This applies to each batch individually. If not set, the default
    /// timeout configured for the
    /// [`Handle`](crate::HandleBuilder::timeout()) is used.
    pub fn timeout(mut self, t: &Duration) -> Self {
        self.timeout = Some(*t);
        self
    }

    /// Cloud only: set the compartment to use for this operation.
    pub fn compartment_id(mut self, compartment_id: &str) -> Self {
        self.compartment_id = compartment_id.to_string();
        self
    }

    /// Specify the desired consistency policy for the request. Defaults
    /// to [`Consistency::Eventual`].
    pub fn consistency(mut self, c: &Consistency) -> Self {
        self.consistency = *c;
        self
    }

    /// On-premise only: set the durability used when the query modifies
    /// rows. Ignored for read-only queries.
    pub fn durability(mut self, d: Durability) -> Self {
        self.durability = Some(d);
        self
    }

    /// Limit the number of rows returned by one batch.
    ///
    /// A batch may legitimately return fewer rows, or none at all, and
    /// still leave the query unfinished.
    pub fn limit(mut self, l: u32) -> Self {
        self.limit = l;
        self
    }

    /// Limit the data read by a single batch, in KB. Cloud only; this
    /// value can only reduce the system defined limit.
    pub fn max_read_kb(mut self, max: u32) -> Self {
        self.max_read_kb = max;
        self
    }

    /// Limit the data written by a single batch, in KB. Cloud only;
    /// this value can only reduce the system defined limit.
    pub fn max_write_kb(mut self, max: u32) -> Self {
        self.max_write_kb = max;
        self
    }

    /// Enable server-side query tracing at the given level.
    pub fn trace_level(mut self, level: i32) -> Self {
        self.trace_level = level;
        self
    }

    /// Supply a token that can cancel the query between and during
    /// batches.
    pub fn cancellation_token(mut self, token: &CancellationToken) -> Self {
        self.cancel = Some(token.clone());
        self
    }

    // used by the external-variable plan step
    pub(crate) fn get_external_var(&self, id: i32) -> Option<&FieldValue> {
        if self.prepared_statement.is_empty() {
            return None;
        }
        self.prepared_statement.get_variable_by_id(id)
    }

    pub(crate) fn add_memory(&mut self, bytes: i64) -> Result<(), QuartzError> {
        self.memory_consumption += bytes;
        if self.max_memory_bytes > 0 && self.memory_consumption > self.max_memory_bytes {
            return is_err!(
                "query exceeded the client-side memory limit of {} bytes; \
                 raise HandleBuilder::max_memory_mb or restrict the query",
                self.max_memory_bytes
            );
        }
        Ok(())
    }

    // Drive the driver-side plan until it is drained or a batch limit
    // is hit, appending produced rows.
    async fn get_results(
        &mut self,
        handle: &Handle,
        results: &mut Vec<MapValue>,
    ) -> Result<(), QuartzError> {
        if self.prepare_only || self.prepared_statement.is_simple() {
            // results were already collected in deserialize()
            return Ok(());
        }

        let mut driver_plan = std::mem::take(&mut self.prepared_statement.driver_query_plan);

        if driver_plan.get_state() == StepState::Uninitialized {
            self.reached_limit = false;
            self.consumed_capacity = Capacity::default();
            self.consumed_capacity.read_kb += 1; // prep cost
            self.consumed_capacity.read_units += 1; // prep cost
            let open_res = driver_plan.open(self, handle);
            if let Err(e) = open_res {
                self.prepared_statement.driver_query_plan = driver_plan;
                return Err(e);
            }
        }

        let mut more;
        loop {
            let next_res = driver_plan.next(self, handle).await;
            match next_res {
                Ok(m) => more = m,
                Err(e) => {
                    self.prepared_statement.driver_query_plan = driver_plan;
                    return Err(e);
                }
            }
            if !more {
                break;
            }
            results.push(driver_plan.get_result(self).get_map_value()?);
            if self.limit > 0 && results.len() >= self.limit as usize {
                self.reached_limit = true;
                break;
            }
        }

        self.prepared_statement.driver_query_plan = driver_plan;

        if more {
            // plain Some/None is enough here; the value is not used
            self.continuation_key = Some(Vec::new());
            self.is_done = false;
        } else if self.reached_limit {
            // there is more to do, but this batch hit a limit
            self.continuation_key = Some(Vec::new());
            self.reached_limit = false;
            self.is_done = false;
        } else {
            self.continuation_key = None;
            self.is_done = true;
        }

        Ok(())
    }

    pub(crate) fn copy_for_internal(&self) -> Self {
        QueryRequest {
            is_internal: true,
            prepared_statement: self.prepared_statement.copy_for_internal(),
            shard_id: self.shard_id,
            max_read_kb: self.max_read_kb,
            max_write_kb: self.max_write_kb,
            consistency: self.consistency,
            compartment_id: self.compartment_id.clone(),
            // registers are purposefully not copied
            num_registers: -1,
            max_memory_bytes: self.max_memory_bytes,
            timeout: self.timeout,
            cancel: self.cancel.clone(),
            ..Default::default()
        }
    }

    pub(crate) fn reset(&mut self) -> Result<(), QuartzError> {
        self.is_done = false;
        self.reached_limit = false;
        self.batch_counter = 0;
        self.memory_consumption = 0;
        self.consumed_capacity = Capacity::default();
        // clear prepared statement plan state
        self.prepared_statement.reset()
    }

    /// Set a named bind variable for execution of a prepared query.
    ///
    /// See [`PreparedStatement`] for the threading rules around bind
    /// variables.
    pub fn set_variable(
        &mut self,
        name: &str,
        value: &impl ToFieldValue,
    ) -> Result<(), QuartzError> {
        if self.prepared_statement.is_empty() {
            return ia_err!("cannot set bind variables: no prepared statement in QueryRequest");
        }
        if !name.starts_with('$') {
            return ia_err!("bind variable names start with '$': '{}'", name);
        }
        let fv = value.to_field_value();
        self.prepared_statement.set_variable(name, &fv)
    }

    /// Set a positional bind variable for execution of a prepared query.
    ///
    /// Position 1 is the first variable; a position beyond the
    /// statement's variable count is an error.
    pub fn set_variable_by_position(
        &mut self,
        position: i32,
        value: &impl ToFieldValue,
    ) -> Result<(), QuartzError> {
        if self.prepared_statement.is_empty() {
            return ia_err!("cannot set bind variables: no prepared statement in QueryRequest");
        }
        let fv = value.to_field_value();
        self.prepared_statement
            .set_variable_by_position(position, &fv)
    }

    /// Execute the query to full completion.
    ///
    /// This is the preferred method for executing a query: it loops
    /// internally until every batch has been fetched and all driver-side
    /// post-processing (sorting, grouping, aggregation) is complete.
    pub async fn execute(&mut self, h: &Handle) -> Result<QueryResult, QuartzError> {
        let mut iter_data = ReceiveStepData::default();
        let mut results: Vec<MapValue> = Vec::new();
        self.reset()?;
        while !self.is_done {
            let res = self
                .execute_batch_internal(h, &mut results, &mut iter_data)
                .await;
            if let Err(e) = res {
                // a server may invalidate a prepared statement it no
                // longer knows; re-prepare once, then retry
                if e.code == PreparedStatementInvalid && !self.reprepared {
                    self.reprepare(h).await?;
                    self.reprepared = true;
                    results.clear();
                    iter_data = ReceiveStepData::default();
                    self.reset()?;
                    continue;
                }
                return Err(e);
            }
            self.batch_counter += 1;
            if self.batch_counter > 100000 {
                return is_err!("query batch loop failed to terminate");
            }
        }

        if self.prepared_statement.is_empty() {
            return is_err!("no prepared statement after query execution");
        }

        let mut qres = QueryResult {
            prepared_statement: self.prepared_statement.clone(),
            consumed: self.consumed_capacity,
            rows: results,
        };
        let _ = qres.prepared_statement.reset();
        Ok(qres)
    }

    /// Execute one batch of a query: at most one round trip to the
    /// server. Call in a loop until [`is_done()`](QueryRequest::is_done)
    /// returns true. Any one batch may legitimately produce zero rows
    /// while the query is still unfinished, for example when the read
    /// quota was exhausted before a row matched.
    pub async fn execute_batch(
        &mut self,
        handle: &Handle,
        results: &mut Vec<MapValue>,
    ) -> Result<(), QuartzError> {
        let mut _data = ReceiveStepData::default();
        self.execute_batch_internal(handle, results, &mut _data)
            .await
    }

    /// Whether the query has returned all of its results.
    pub fn is_done(&self) -> bool {
        self.is_done
    }

    // re-prepare after the server invalidated the statement blob
    async fn reprepare(&mut self, h: &Handle) -> Result<(), QuartzError> {
        let sql = match &self.statement {
            Some(s) => s.clone(),
            None => {
                let s = self.prepared_statement.sql_text.clone();
                if s.is_empty() {
                    return ia_err!(
                        "prepared statement was invalidated by the server and no \
                         SQL text is available to re-prepare it"
                    );
                }
                s
            }
        };
        trace!("re-preparing invalidated statement");
        let mut prep = QueryRequest::new(&sql, &self.table_name).prepare_only();
        prep.compartment_id = self.compartment_id.clone();
        prep.timeout = self.timeout;
        prep.cancel = self.cancel.clone();
        let mut rows: Vec<MapValue> = Vec::new();
        let mut iter_data = ReceiveStepData::default();
        prep.execute_batch_internal(h, &mut rows, &mut iter_data)
            .await?;
        if prep.prepared_statement.is_empty() {
            return ia_err!("re-prepare returned no prepared statement");
        }
        // keep the caller's bindings across the new plan
        let bind = std::mem::take(&mut self.prepared_statement.data);
        self.prepared_statement = prep.prepared_statement;
        let _ = self.prepared_statement.reset();
        self.prepared_statement.data = bind;
        self.has_driver = false;
        Ok(())
    }

    pub(crate) async fn execute_batch_internal(
        &mut self,
        handle: &Handle,
        results: &mut Vec<MapValue>,
        iter_data: &mut ReceiveStepData,
    ) -> Result<(), QuartzError> {
        trace!(
            "batch: counter={} num_results={}",
            self.batch_counter,
            results.len()
        );

        self.reached_limit = false;
        if self.max_memory_bytes == 0 {
            self.max_memory_bytes = handle.max_memory_bytes();
        }

        // Internal single-batch requests bypass the plan machinery; they
        // return plain results.
        if !self.is_internal {
            /*
             * This branch is taken for advanced queries only, and only
             * after the first execute() call bound this request to its
             * driver plan. Each call computes one batch of results by
             * walking the plan.
             */
            if self.has_driver {
                return self.get_results(handle, results).await;
            }

            /*
             * An advanced query that was prepared earlier: set up the
             * register array, bind the driver plan, and compute the
             * first batch.
             */
            if !self.prepared_statement.is_empty() && !self.prepared_statement.is_simple() {
                self.num_registers = self.prepared_statement.num_registers;
                self.registers = Vec::new();
                for _i in 0..self.num_registers {
                    self.registers.push(FieldValue::Uninitialized);
                }
                self.has_driver = true;
                return self.get_results(handle, results).await;
            }

            /*
             * Otherwise this is either (a) a simple query or (b) an
             * advanced query not yet prepared, implying the first
             * execute() call. For (b), this round trip compiles the
             * query server-side and returns the prepared statement with
             * no rows; the driver plan is bound on the next loop
             * iteration. For (a), rows come back directly.
             */
        }

        let mut w: Writer = Writer::new();
        w.write_i16(handle.serial_version());
        let timeout = handle.get_timeout(&self.timeout);
        self.serialize_internal(&mut w, &timeout, handle.topo_seq_num())?;
        let op = if self.prepare_only {
            OpCode::Prepare
        } else {
            OpCode::Query
        };
        let mut opts = SendOptions::new(op, timeout)
            .table(&self.table_name)
            .compartment(&self.compartment_id)
            .cancellation(&self.cancel);
        let mut r = handle.send_and_receive(w, &mut opts).await?;
        self.continuation_key = None;
        let before = self.consumed_capacity;
        self.deserialize(&mut r, results, iter_data)?;
        handle.update_topology(&self.topology_info);
        // feed only this batch's consumption back to the limiters
        let batch_consumed = Capacity {
            read_kb: self.consumed_capacity.read_kb - before.read_kb,
            write_kb: self.consumed_capacity.write_kb - before.write_kb,
            read_units: self.consumed_capacity.read_units - before.read_units,
            write_units: self.consumed_capacity.write_units - before.write_units,
        };
        handle.apply_rate_feedback(&opts, &batch_consumed);
        if self.continuation_key.is_none() {
            trace!("continuation key is None, setting is_done");
            self.is_done = true;
        }
        Ok(())
    }

    fn serialize_internal(
        &self,
        w: &mut Writer,
        timeout: &Duration,
        topo_seq: i32,
    ) -> Result<(), QuartzError> {
        let mut ns = Serializer::start_request(w);
        ns.start_header();
        let op_code = if self.prepare_only {
            OpCode::Prepare
        } else {
            OpCode::Query
        };
        ns.write_header(op_code, timeout, &self.table_name, topo_seq);
        ns.end_header();
        ns.start_payload();

        ns.write_consistency(self.consistency);
        ns.write_durability(&self.durability);

        if self.max_read_kb > 0 {
            ns.write_i32_field(MAX_READ_KB, self.max_read_kb as i32);
        }
        if self.max_write_kb > 0 {
            ns.write_i32_field(MAX_WRITE_KB, self.max_write_kb as i32);
        }
        if self.limit > 0 {
            ns.write_i32_field(NUMBER_LIMIT, self.limit as i32);
        }
        ns.write_nz_field(TRACE_LEVEL, self.trace_level);

        ns.write_i32_field(QUERY_VERSION_FIELD, QUERY_VERSION);
        if !self.prepared_statement.is_empty() {
            ns.write_bool_field(IS_PREPARED, true);
            ns.write_bool_field(IS_SIMPLE_QUERY, self.prepared_statement.is_simple());
            ns.write_binary_field(PREPARED_QUERY, &self.prepared_statement.statement);
            if !self.prepared_statement.data.bind_variables.is_empty() {
                ns.start_array(BIND_VARIABLES);
                for (k, v) in &self.prepared_statement.data.bind_variables {
                    ns.start_map("");
                    trace!(" bind: name={} value={:?}", k, v);
                    ns.write_string_field(NAME, k);
                    ns.write_field(VALUE, v);
                    ns.end_map("");
                    ns.incr_size(1);
                }
                ns.end_array(BIND_VARIABLES);
            }
        } else if let Some(s) = &self.statement {
            ns.write_string_field(STATEMENT, s);
        } else {
            return ia_err!("query has no statement or prepared statement");
        }
        if let Some(ck) = &self.continuation_key {
            if !ck.is_empty() {
                ns.write_binary_field(CONTINUATION_KEY, ck);
            }
        }

        ns.write_math_context();

        if self.shard_id > -1 {
            ns.write_i32_field(SHARD_ID, self.shard_id);
        }

        ns.end_payload();
        ns.end_request();
        Ok(())
    }

    pub(crate) fn add_results(
        &self,
        walker: &mut MapWalker,
        results: &mut Vec<MapValue>,
    ) -> Result<(), QuartzError> {
        let t = FieldType::try_from_u8(walker.r.read_byte()?)?;
        if t != FieldType::Array {
            return ia_err!("bad type in query results: {:?}, should be Array", t);
        }
        walker.r.read_i32()?; // length of array in bytes
        let num_elements = walker.r.read_i32()?;
        trace!("query results: num_results={}", num_elements);
        if num_elements <= 0 {
            return Ok(());
        }
        for _i in 0..num_elements {
            match walker.r.read_field_value()? {
                FieldValue::Map(m) | FieldValue::Record(m) => {
                    results.push(m);
                }
                _ => {
                    return ia_err!("got invalid type of value in query results");
                }
            }
        }
        Ok(())
    }

    // Deserialize one query response batch.
    fn deserialize(
        &mut self,
        r: &mut Reader,
        results: &mut Vec<MapValue>,
        iter_data: &mut ReceiveStepData,
    ) -> Result<(), QuartzError> {
        let is_prepared_request = !self.prepared_statement.is_empty();

        let mut ti = TopologyInfo::default();
        self.continuation_key = None;
        iter_data.continuation_key = None;

        let mut walker = MapWalker::new(r)?;
        while walker.has_next() {
            walker.next()?;
            let name = walker.current_name();
            match name.as_str() {
                ERROR_CODE => {
                    walker.handle_error_code()?;
                }
                CONSUMED => {
                    let cap = walker.read_consumed_capacity()?;
                    self.consumed_capacity.add(&cap);
                }
                QUERY_RESULTS => {
                    self.add_results(&mut walker, results)?;
                }
                CONTINUATION_KEY => {
                    let ck = walker.read_binary_field()?;
                    if !ck.is_empty() {
                        trace!("read {} byte continuation key", ck.len());
                        iter_data.continuation_key = Some(ck.clone());
                        self.continuation_key = Some(ck);
                    }
                }
                SORT_PHASE1_RESULTS => {
                    let arr = walker.read_binary_field()?;
                    self.read_phase_1_results(iter_data, &arr)?;
                }
                PREPARED_QUERY => {
                    if is_prepared_request {
                        return ia_err!("got prepared query in result for already prepared query");
                    }
                    self.prepared_statement.statement = walker.read_binary_field()?;
                    if let Some(s) = &self.statement {
                        self.prepared_statement.sql_text = s.clone();
                    }
                }
                DRIVER_QUERY_PLAN => {
                    if is_prepared_request {
                        return ia_err!("got driver plan in result for already prepared query");
                    }
                    let v = walker.read_binary_field()?;
                    self.read_driver_plan_info(&v)?;
                }
                REACHED_LIMIT => {
                    self.reached_limit = walker.read_bool_field()?;
                    trace!("reached_limit={}", self.reached_limit);
                }
                TABLE_NAME => {
                    self.prepared_statement.table_name = Some(walker.read_string_field()?);
                }
                NAMESPACE => {
                    self.prepared_statement.namespace = Some(walker.read_string_field()?);
                }
                QUERY_PLAN_STRING => {
                    self.prepared_statement.query_plan = walker.read_string_field()?;
                }
                QUERY_RESULT_SCHEMA => {
                    self.prepared_statement.query_schema = walker.read_string_field()?;
                }
                QUERY_OPERATION => {
                    self.prepared_statement.operation = walker.read_i32_field()? as u8;
                }
                TOPOLOGY_INFO => {
                    self.prepared_statement.topology_info = Some(walker.read_topology_info()?);
                }
                // pre-V4 servers return the topology as loose fields
                PROXY_TOPO_SEQNUM => {
                    ti.seq_num = walker.read_i32_field()?;
                }
                SHARD_IDS => {
                    ti.shard_ids = walker.read_i32_array_field()?;
                }
                _ => {
                    trace!("query response: skipping field '{}'", name);
                    walker.skip_field()?;
                }
            }
        }

        if ti.is_valid() {
            self.prepared_statement.topology_info = Some(ti);
        }

        if let Some(pti) = &self.prepared_statement.topology_info {
            // the stored topology only ever advances
            if pti.seq_num > self.topology_info.seq_num {
                self.topology_info = pti.clone();
            }
        } else {
            trace!("no valid topology received");
        }

        if self.prepare_only {
            if self.prepared_statement.is_empty() {
                return ia_err!("got no prepared statement when prepare_only was set");
            }
            self.is_done = true;
        } else if !self.prepared_statement.is_simple() && self.continuation_key.is_none() {
            // dummy continuation key so is_done won't be set before the
            // driver plan has run
            trace!("adding dummy continuation key");
            self.continuation_key = Some(Vec::new());
        }

        Ok(())
    }

    fn read_driver_plan_info(&mut self, v: &[u8]) -> Result<(), QuartzError> {
        if v.is_empty() {
            return Ok(());
        }
        let mut r = Reader::new().from_bytes(v);
        self.prepared_statement.driver_query_plan = deserialize_plan_step(&mut r)?;
        if self.prepared_statement.driver_query_plan.get_kind() == StepKind::Empty {
            return Ok(());
        }
        self.prepared_statement.num_iterators = r.read_i32()?;
        self.prepared_statement.num_registers = r.read_i32()?;
        let len = r.read_i32()?;
        if len <= 0 {
            return Ok(());
        }
        let mut hm: std::collections::HashMap<String, i32> =
            std::collections::HashMap::with_capacity(len as usize);
        for _i in 0..len {
            let name = r.read_string()?;
            let id = r.read_i32()?;
            hm.insert(name, id);
        }
        // positional order follows the variable ids
        let mut pairs: Vec<(&String, &i32)> = hm.iter().collect();
        pairs.sort_by_key(|(_, id)| **id);
        self.prepared_statement.variable_names =
            pairs.into_iter().map(|(n, _)| n.clone()).collect();
        self.prepared_statement.variable_to_ids = Some(hm);
        Ok(())
    }

    // The phase-1 envelope of a sorting all-partition query: a flag for
    // "phase 1 continues", the partition ids, the per-partition result
    // counts, and one continuation key per partition.
    fn read_phase_1_results(
        &mut self,
        iter_data: &mut ReceiveStepData,
        arr: &[u8],
    ) -> Result<(), QuartzError> {
        let mut r: Reader = Reader::new().from_bytes(arr);
        iter_data.in_sort_phase_1 = r.read_bool()?;
        iter_data.pids = r.read_i32_array()?;
        if !iter_data.pids.is_empty() {
            iter_data.num_results_per_pid = r.read_i32_array()?;
            iter_data.part_continuation_keys = Vec::new();
            for _x in 0..iter_data.num_results_per_pid.len() {
                iter_data.part_continuation_keys.push(r.read_binary()?);
            }
        }
        Ok(())
    }

    pub(crate) fn get_result(&mut self, reg: i32) -> FieldValue {
        if self.num_registers <= reg || reg < 0 {
            panic!("invalid register {} in get_result", reg);
        }
        std::mem::take(&mut self.registers[reg as usize])
    }

    pub(crate) fn get_result_ref(&self, reg: i32) -> &FieldValue {
        &self.registers[reg as usize]
    }

    pub(crate) fn set_result(&mut self, reg: i32, val: FieldValue) {
        if self.num_registers <= reg || reg < 0 {
            panic!("invalid register {} in set_result", reg);
        }
        self.registers[reg as usize] = val;
    }
}
