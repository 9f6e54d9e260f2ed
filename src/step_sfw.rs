use crate::error::ia_err;
use crate::error::QuartzError;
use crate::handle::Handle;
use crate::plan::{deserialize_plan_step, deserialize_plan_steps};
use crate::plan::{Location, PlanStep, StepKind, StepState};
use crate::query_request::QueryRequest;
use crate::reader::Reader;
use crate::types::{FieldValue, MapValue};

use std::result::Result;
use tracing::{debug, trace};

// SfwStep ("select-from-where") is the driver-side projection step:
// (a) it projects out result columns that do not appear in the SELECT
//     list but were fetched from the server because they are order-by
//     columns or primary-key columns used for duplicate elimination;
// (b) for group-by and aggregation queries it regroups and reaggregates
//     the partial groups/aggregates received from the server;
// (c) it implements OFFSET and LIMIT.
#[derive(Debug, Default, Clone)]
pub struct SfwStep {
    result_reg: i32,
    #[allow(dead_code)]
    loc: Location,
    from_step: Box<PlanStep>,
    from_var_name: String,
    column_steps: Vec<Box<PlanStep>>,
    column_names: Vec<String>,
    is_select_star: bool,
    num_gb_columns: i32,
    offset_step: Box<PlanStep>,
    limit_step: Box<PlanStep>,

    data: SfwStepData,
}

impl SfwStep {
    pub(crate) fn new(r: &mut Reader) -> Result<Self, QuartzError> {
        let rr = r.read_i32()?; // result_reg
        let sp = r.read_i32()?; // state_pos, unused in this driver
        trace!("SfwStep: result_reg={} state_pos={}", rr, sp);
        let s = SfwStep {
            result_reg: rr,
            loc: Location::from_reader(r)?,
            column_names: r.read_string_array()?,
            num_gb_columns: r.read_i32()?,
            from_var_name: r.read_string()?,
            is_select_star: r.read_bool()?,
            column_steps: deserialize_plan_steps(r)?,
            from_step: deserialize_plan_step(r)?,
            offset_step: deserialize_plan_step(r)?,
            limit_step: deserialize_plan_step(r)?,
            ..Default::default()
        };
        debug!("SFW '{}': from_step={:?}", s.from_var_name, s.from_step);
        Ok(s)
    }
}

#[derive(Debug, Default)]
struct SfwStepData {
    state: StepState,
    offset: i64,
    limit: i64,
    num_results: i64,
    gb_tuple: Vec<FieldValue>,
    orig_offset: i64, // from the offset step
    orig_limit: i64,  // from the limit step
}

impl Clone for SfwStepData {
    // clone of step data never copies the running state
    fn clone(&self) -> Self {
        let mut s = SfwStepData::default();
        s.reset();
        s
    }
    fn clone_from(&mut self, _source: &Self) {
        self.reset();
    }
}

impl SfwStepData {
    fn reset(&mut self) {
        self.state = StepState::Uninitialized;
        self.num_results = 0;
        self.gb_tuple = Vec::new();
        self.offset = self.orig_offset;
        self.limit = self.orig_limit;
    }
}

impl SfwStep {
    pub(crate) fn open(&mut self, req: &mut QueryRequest, handle: &Handle) -> Result<(), QuartzError> {
        self.data.state = StepState::Open;
        self.from_step.open(req, handle)?;
        for i in &mut self.column_steps {
            i.open(req, handle)?;
        }
        self.compute_offset_limit(req, handle)?;
        Ok(())
    }
    pub(crate) fn get_kind(&self) -> StepKind {
        StepKind::Sfw
    }
    pub(crate) fn get_result(&self, req: &mut QueryRequest) -> FieldValue {
        req.get_result(self.result_reg)
    }
    pub(crate) fn set_result(&self, req: &mut QueryRequest, result: FieldValue) {
        req.set_result(self.result_reg, result);
    }
    pub(crate) fn get_state(&self) -> StepState {
        self.data.state
    }
    pub(crate) fn get_aggr_value(
        &self,
        _req: &QueryRequest,
        _reset: bool,
    ) -> Result<Option<FieldValue>, QuartzError> {
        Ok(None)
    }
    fn done(&mut self) {
        self.data.state = StepState::Done;
    }

    pub(crate) async fn next(
        &mut self,
        req: &mut QueryRequest,
        handle: &Handle,
    ) -> Result<bool, QuartzError> {
        if self.data.state == StepState::Done {
            return Ok(false);
        }
        if self.data.num_results >= self.data.limit {
            self.done();
            return Ok(false);
        }
        // loop to skip over offset results
        loop {
            let more = self.compute_next_result(req, handle).await?;
            if !more {
                return Ok(false);
            }
            // Even with a result in hand the state may be DONE: the
            // result can be the last group tuple of a grouping SFW. If
            // the offset has not been consumed yet, that result is
            // ignored too.
            if self.data.state.is_done() && self.data.offset > 0 {
                return Ok(false);
            }
            if self.data.offset == 0 {
                self.data.num_results += 1;
                break;
            }
            self.data.offset -= 1;
        }
        Ok(true)
    }

    async fn compute_next_result(
        &mut self,
        req: &mut QueryRequest,
        handle: &Handle,
    ) -> Result<bool, QuartzError> {
        // loop for group-by
        loop {
            let mut more = self.from_step.next(req, handle).await?;
            if !more {
                if !req.reached_limit {
                    self.done();
                }
                if self.num_gb_columns >= 0 {
                    return self.produce_last_group(req);
                }
                return Ok(false);
            }

            // Compute the SELECT-list expressions. For a grouping SFW
            // compute only the group-by columns. Skip the computation
            // entirely for a non-grouping SFW whose offset has not been
            // reached yet.
            if self.num_gb_columns < 0 && self.data.offset > 0 {
                return Ok(true);
            }
            let mut num_cols = self.column_steps.len();
            if self.num_gb_columns >= 0 {
                num_cols = self.num_gb_columns as usize;
            }

            let mut i = 0;
            while i < num_cols {
                more = self.column_steps[i].next(req, handle).await?;
                if !more {
                    if self.num_gb_columns > 0 {
                        self.column_steps[i].reset()?;
                        break;
                    }
                    self.column_steps[i].set_result(req, FieldValue::Null);
                }
                self.column_steps[i].reset()?;
                i += 1;
            }

            if i < num_cols {
                continue;
            }

            if self.num_gb_columns < 0 {
                if self.is_select_star {
                    break;
                }
                let mut m = MapValue::new();
                for i in 0..self.column_steps.len() {
                    m.put_field_value(
                        self.column_names[i].as_str(),
                        self.column_steps[i].get_result(req),
                    );
                }
                self.set_result(req, FieldValue::Record(m));
                break;
            }

            if self.group_input_tuple(req, handle).await? {
                break;
            }
        }

        Ok(true)
    }

    // Decide whether the current input tuple (a) starts the very first
    // group, (b) belongs to the current group, or (c) starts a new
    // group. Only in case (c) is an output tuple ready, and true is
    // returned.
    async fn group_input_tuple(
        &mut self,
        req: &mut QueryRequest,
        handle: &Handle,
    ) -> Result<bool, QuartzError> {
        let num_cols = self.column_steps.len();
        let gb_cols = self.num_gb_columns as usize;

        // the very first input tuple starts the first group
        if self.data.gb_tuple.is_empty() {
            for _i in 0..num_cols {
                self.data.gb_tuple.push(FieldValue::Uninitialized);
            }

            for i in 0..gb_cols {
                self.data.gb_tuple[i] = self.column_steps[i].get_result(req);
            }

            for i in gb_cols..num_cols {
                let _ = self.column_steps[i].next(req, handle).await?;
                self.column_steps[i].reset()?;
            }

            return Ok(false);
        }

        // compare the input tuple with the current group tuple
        let mut j = 0;
        for i in 0..gb_cols {
            j = i;
            // move the value out of the column step...
            let newval = self.column_steps[j].get_result(req);
            let equals = &newval == &self.data.gb_tuple[j];
            // ...and then put it back
            self.column_steps[j].set_result(req, newval);
            if !equals {
                break;
            }
            j += 1;
        }

        // if the tuple is in the current group, update the aggregate
        // functions and go back for the next input tuple
        if j == gb_cols {
            for i in gb_cols..num_cols {
                let _ = self.column_steps[i].next(req, handle).await?;
                self.column_steps[i].reset()?;
            }

            return Ok(false);
        }

        // The tuple starts a new group. Finish the current group,
        // produce its output tuple, and init the new group.

        // 1. final aggregate values for the finished group
        for i in gb_cols..num_cols {
            if let Some(v) = self.column_steps[i].get_aggr_value(req, true)? {
                self.data.gb_tuple[i] = v;
            } else {
                return ia_err!("no aggregate value in column step");
            }
        }

        // 2. the output tuple
        let mut m = MapValue::new();
        for i in 0..num_cols {
            m.put_field_value(
                self.column_names[i].as_str(),
                std::mem::take(&mut self.data.gb_tuple[i]),
            );
        }
        self.set_result(req, FieldValue::Record(m));

        // 3. grouping columns of the new group
        for i in 0..gb_cols {
            self.data.gb_tuple[i] = self.column_steps[i].get_result(req);
        }

        // 4. initial aggregates of the new group
        for i in gb_cols..num_cols {
            let _ = self.column_steps[i].next(req, handle).await?;
            self.column_steps[i].reset()?;
        }

        Ok(true)
    }

    fn produce_last_group(&mut self, req: &mut QueryRequest) -> Result<bool, QuartzError> {
        if req.reached_limit {
            return Ok(false);
        }

        // no group started: nothing to produce
        if self.data.gb_tuple.is_empty() {
            return Ok(false);
        }
        let num_cols = self.column_steps.len();
        let gb_cols = self.num_gb_columns as usize;

        let mut m = MapValue::new();
        for i in 0..gb_cols {
            m.put_field_value(
                &self.column_names[i],
                std::mem::take(&mut self.data.gb_tuple[i]),
            );
        }

        for i in gb_cols..num_cols {
            if let Some(v) = self.column_steps[i].get_aggr_value(req, true)? {
                m.put_field_value(&self.column_names[i], v);
            } else {
                return ia_err!("no aggregate value in column step");
            }
        }
        self.set_result(req, FieldValue::Record(m));
        // the last group is produced exactly once
        self.data.gb_tuple = Vec::new();

        Ok(true)
    }

    pub(crate) fn reset(&mut self) -> Result<(), QuartzError> {
        self.from_step.reset()?;
        for i in 0..self.column_steps.len() {
            self.column_steps[i].reset()?;
        }
        self.offset_step.reset()?;
        self.limit_step.reset()?;
        self.data.reset();

        Ok(())
    }

    fn compute_offset_limit(
        &mut self,
        req: &mut QueryRequest,
        handle: &Handle,
    ) -> Result<(), QuartzError> {
        let mut offset: i64 = 0;
        let mut limit: i64 = i32::MAX as i64;

        if self.offset_step.get_kind() != StepKind::Empty {
            if self.offset_step.get_kind() != StepKind::Const {
                return ia_err!("expected const step for offset");
            }
            self.offset_step.open(req, handle)?;
            // move value out of the step...
            let val = self.offset_step.get_result(req);
            match val {
                FieldValue::Long(l) => offset = l,
                FieldValue::Integer(i) => offset = i as i64,
                _ => {
                    return ia_err!("got unexpected value for offset: {:?}", val);
                }
            }
            // ...and put it back
            self.offset_step.set_result(req, val);
            if offset < 0 {
                return ia_err!("offset can not be a negative number");
            }
            if offset > i32::MAX as i64 {
                return ia_err!("offset can not be greater than i32::MAX");
            }
        }

        if self.limit_step.get_kind() != StepKind::Empty {
            if self.limit_step.get_kind() != StepKind::Const {
                return ia_err!("expected const step for limit");
            }
            self.limit_step.open(req, handle)?;
            let val = self.limit_step.get_result(req);
            match val {
                FieldValue::Long(l) => limit = l,
                FieldValue::Integer(i) => limit = i as i64,
                _ => {
                    return ia_err!("got unexpected value for limit: {:?}", val);
                }
            }
            self.limit_step.set_result(req, val);
            if limit < 0 {
                return ia_err!("limit can not be a negative number");
            }
            if limit > i32::MAX as i64 {
                return ia_err!("limit can not be greater than i32::MAX");
            }
        }

        self.data.offset = offset;
        self.data.limit = limit;
        // kept so data.reset() restores them
        self.data.orig_offset = offset;
        self.data.orig_limit = limit;
        Ok(())
    }
}
