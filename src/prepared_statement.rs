use crate::error::{ia_err, QuartzError};
use crate::plan::{PlanStep, StepKind};
use crate::types::{FieldValue, TopologyInfo};

use std::collections::HashMap;
use std::result::Result;

/// A prepared query statement for use in a
/// [`QueryRequest`](crate::QueryRequest).
///
/// A prepared statement holds state that can be sent to a server and
/// executed without re-parsing the SQL text: the opaque server-side
/// statement bytes, and, for queries partially executed at the driver,
/// the driver-side plan. The internal layout is purposefully opaque and
/// may change over time.
///
/// Prepared statements are created by calling
/// [`QueryRequest::execute()`](crate::QueryRequest::execute) (typically
/// with [`prepare_only()`](crate::QueryRequest::prepare_only)) followed by
/// [`QueryResult::prepared_statement()`](crate::QueryResult::prepared_statement).
///
/// A prepared statement is intended for reuse: parse once, execute many
/// times with different bind variables. The plan portion is immutable
/// and freely shareable; the bind variables are not synchronized. To
/// execute the same plan concurrently from multiple tasks, either
/// synchronize externally or give each task its own handle via
/// [`copy_without_variables()`](PreparedStatement::copy_without_variables).
#[derive(Default, Clone)]
pub struct PreparedStatement {
    // the application-provided SQL text.
    #[allow(dead_code)]
    pub(crate) sql_text: String,

    // string form of the full query plan, if requested.
    pub(crate) query_plan: String,

    // string form of the query result schema, if requested.
    pub(crate) query_schema: String,

    // table name returned with the prepared query, if any.
    pub(crate) table_name: Option<String>,

    // namespace returned with the prepared query, if any.
    pub(crate) namespace: Option<String>,

    // the operation code for the query (select/insert/update/delete).
    pub(crate) operation: u8,

    // The part of the query plan executed at the driver, deserialized
    // from the plan blob the server returns at prepare time. Never sent
    // back to the server. Only present for advanced queries.
    pub(crate) driver_query_plan: Box<PlanStep>,

    // shard topology captured with the prepared query; updated
    // monotonically from later responses.
    pub(crate) topology_info: Option<TopologyInfo>,

    // The serialized statement created by the backend store. Opaque to
    // the driver; sent back to the server with every batch.
    pub(crate) statement: Vec<u8>,

    // Maps each external variable name to its id, a position in the
    // register array holding the variable values during execution. Only
    // present for advanced queries.
    pub(crate) variable_to_ids: Option<HashMap<String, i32>>,

    // external variable names in positional order (position i is
    // variable_names[i-1]).
    pub(crate) variable_names: Vec<String>,

    // sizes for the driver plan's runtime state
    pub(crate) num_registers: i32,
    pub(crate) num_iterators: i32,

    pub(crate) data: PreparedStatementData,
}

impl std::fmt::Debug for PreparedStatement {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "PreparedStatement: size={}, data={:?}",
            self.statement.len(),
            self.data
        )
    }
}

#[derive(Debug, Default)]
pub struct PreparedStatementData {
    // The name-to-value bindings for the external variables of the
    // query, set by the application and sent with every batch. The
    // values also seed the register array before driver-side execution
    // starts.
    pub bind_variables: HashMap<String, FieldValue>,
}

// Cloning a statement never clones its bound variables
impl Clone for PreparedStatementData {
    fn clone(&self) -> Self {
        PreparedStatementData {
            bind_variables: Default::default(),
        }
    }
    fn clone_from(&mut self, _source: &Self) {
        self.bind_variables.clear();
    }
}

impl PreparedStatement {
    /// Whether the statement executes entirely server-side, without a
    /// driver plan.
    pub(crate) fn is_simple(&self) -> bool {
        self.driver_query_plan.get_kind() == StepKind::Empty
    }
    pub(crate) fn is_empty(&self) -> bool {
        self.statement.is_empty()
    }
    // set the plan steps back to their just-deserialized state; bound
    // variables are not touched
    pub(crate) fn reset(&mut self) -> Result<(), QuartzError> {
        self.driver_query_plan.reset()?;
        Ok(())
    }

    /// Produce an independent statement sharing the immutable plan, with
    /// no bind variables set.
    ///
    /// Use this to execute one prepared statement concurrently from
    /// several tasks, giving each its own variables.
    pub fn copy_without_variables(&self) -> PreparedStatement {
        let mut ps = self.clone();
        ps.data.bind_variables.clear();
        ps
    }

    // like copy_without_variables, but keeps only the server-side
    // statement plus a copy of the current bindings; used for the
    // internal single-batch requests issued by the receive step
    pub(crate) fn copy_for_internal(&self) -> Self {
        let mut data = PreparedStatementData::default();
        for (k, v) in &self.data.bind_variables {
            data.bind_variables.insert(k.clone(), v.clone_internal());
        }
        PreparedStatement {
            statement: self.statement.clone(),
            data,
            ..Default::default()
        }
    }

    pub(crate) fn set_variable(
        &mut self,
        name: &str,
        value: &FieldValue,
    ) -> Result<(), QuartzError> {
        self.data
            .bind_variables
            .insert(name.to_string(), value.clone_internal());
        Ok(())
    }

    pub(crate) fn set_variable_by_position(
        &mut self,
        position: i32,
        value: &FieldValue,
    ) -> Result<(), QuartzError> {
        if position < 1 {
            return ia_err!("variable position must be 1 or greater");
        }
        if !self.variable_names.is_empty() {
            if position as usize > self.variable_names.len() {
                return ia_err!(
                    "variable position {} is beyond the statement's {} variables",
                    position,
                    self.variable_names.len()
                );
            }
            let name = self.variable_names[(position - 1) as usize].clone();
            return self.set_variable(&name, value);
        }
        // statements prepared without a variable table accept synthetic
        // positional names
        self.data
            .bind_variables
            .insert(format!("#{}", position), value.clone_internal());
        Ok(())
    }

    pub(crate) fn get_variable_by_id(&self, id: i32) -> Option<&FieldValue> {
        if let Some(vars) = &self.variable_to_ids {
            for (k, v) in vars {
                if *v == id {
                    return self.data.bind_variables.get(k);
                }
            }
        }
        None
    }
}
