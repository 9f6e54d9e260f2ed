use crate::error::QuartzError;
use crate::handle::Handle;
use crate::plan::{deserialize_plan_step, Location, PlanStep, StepKind, StepState};
use crate::query_request::QueryRequest;
use crate::reader::Reader;
use crate::types::FieldValue;

use std::result::Result;
use tracing::trace;

// FieldStep returns the value of one field of an input map. It is how
// column references in the SELECT list are executed at the driver (see
// SfwStep).
#[derive(Debug, Default, Clone)]
pub struct FieldStep {
    result_reg: i32,
    #[allow(dead_code)]
    loc: Location,
    input_step: Box<PlanStep>,
    field_name: String,
    state: StepState,
}

impl FieldStep {
    pub(crate) fn new(r: &mut Reader) -> Result<Self, QuartzError> {
        let rr = r.read_i32()?; // result_reg
        let sp = r.read_i32()?; // state_pos, unused in this driver
        trace!("FieldStep: result_reg={} state_pos={}", rr, sp);
        Ok(FieldStep {
            result_reg: rr,
            loc: Location::from_reader(r)?,
            input_step: deserialize_plan_step(r)?,
            field_name: r.read_string()?,
            state: StepState::Uninitialized,
        })
    }

    pub(crate) fn open(&mut self, req: &mut QueryRequest, handle: &Handle) -> Result<(), QuartzError> {
        self.state = StepState::Open;
        self.input_step.open(req, handle)
    }
    pub(crate) fn get_kind(&self) -> StepKind {
        StepKind::FieldStep
    }
    pub(crate) async fn next(
        &mut self,
        req: &mut QueryRequest,
        handle: &Handle,
    ) -> Result<bool, QuartzError> {
        if self.state == StepState::Done {
            return Ok(false);
        }
        loop {
            let more = self.input_step.next(req, handle).await?;
            let ctx_item = self.input_step.get_result(req);

            if !more || ctx_item == FieldValue::Uninitialized {
                self.state = StepState::Done;
                return Ok(false);
            }

            // atomic context items contribute nothing
            if ctx_item.is_atomic() {
                if ctx_item == FieldValue::Null {
                    self.set_result(req, ctx_item);
                    return Ok(true);
                }
                continue;
            }

            let mv = ctx_item.get_map_value()?;
            match mv.get_field_value(&self.field_name) {
                Some(v) => {
                    self.set_result(req, v.clone_internal());
                    return Ok(true);
                }
                None => continue,
            }
        }
    }

    pub(crate) fn get_result(&self, req: &mut QueryRequest) -> FieldValue {
        req.get_result(self.result_reg)
    }
    pub(crate) fn set_result(&self, req: &mut QueryRequest, result: FieldValue) {
        req.set_result(self.result_reg, result);
    }
    pub(crate) fn reset(&mut self) -> Result<(), QuartzError> {
        self.state = StepState::Open;
        self.input_step.reset()
    }
    pub(crate) fn get_state(&self) -> StepState {
        self.state
    }
    pub(crate) fn get_aggr_value(
        &self,
        _req: &QueryRequest,
        _reset: bool,
    ) -> Result<Option<FieldValue>, QuartzError> {
        Ok(None)
    }
}
