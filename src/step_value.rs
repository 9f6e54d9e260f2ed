use crate::error::ia_err;
use crate::error::QuartzError;
use crate::handle::Handle;
use crate::plan::{Location, StepKind, StepState};
use crate::query_request::QueryRequest;
use crate::reader::Reader;
use crate::types::FieldValue;

use std::result::Result;
use tracing::trace;

// ConstStep is a reference to a constant value in the query. Such a
// reference is executed at the driver when the constant appears in the
// OFFSET or LIMIT clause.
#[derive(Debug, Default)]
pub struct ConstStep {
    result_reg: i32,
    loc: Location,
    state: StepState,
    value: FieldValue,
}

impl Clone for ConstStep {
    fn clone(&self) -> Self {
        ConstStep {
            result_reg: self.result_reg,
            loc: self.loc,
            state: StepState::Uninitialized,
            value: self.value.clone_internal(),
        }
    }
}

impl ConstStep {
    pub(crate) fn new(r: &mut Reader) -> Result<Self, QuartzError> {
        let rr = r.read_i32()?; // result_reg
        let sp = r.read_i32()?; // state_pos, unused in this driver
        trace!("ConstStep: result_reg={} state_pos={}", rr, sp);
        Ok(ConstStep {
            result_reg: rr,
            state: StepState::Uninitialized,
            loc: Location::from_reader(r)?,
            value: r.read_field_value()?,
        })
    }

    pub(crate) fn open(&mut self, req: &mut QueryRequest, _handle: &Handle) -> Result<(), QuartzError> {
        self.state = StepState::Open;
        self.set_result(req, self.value.clone_internal());
        Ok(())
    }
    pub(crate) fn get_kind(&self) -> StepKind {
        StepKind::Const
    }
    pub(crate) async fn next(&mut self, _req: &QueryRequest) -> Result<bool, QuartzError> {
        if self.state == StepState::Done {
            return Ok(false);
        }
        self.state = StepState::Done;
        Ok(true)
    }
    pub(crate) fn get_result(&self, req: &mut QueryRequest) -> FieldValue {
        req.get_result(self.result_reg)
    }
    pub(crate) fn set_result(&self, req: &mut QueryRequest, result: FieldValue) {
        req.set_result(self.result_reg, result);
    }
    pub(crate) fn reset(&mut self) -> Result<(), QuartzError> {
        self.state = StepState::Open;
        Ok(())
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

// VarRefStep is a reference to a non-external variable in the query. It
// returns the value the variable is currently bound to; that value is
// computed by the variable's domain step and stored in this step's
// register. In the driver, an implicit internal variable represents the
// results arriving from the server, and every driver-side expression
// references it.
#[derive(Debug, Default, Clone)]
pub struct VarRefStep {
    result_reg: i32,
    #[allow(dead_code)]
    loc: Location,
    // used only when displaying errors
    var_name: String,
    state: StepState,
}

impl VarRefStep {
    pub(crate) fn new(r: &mut Reader) -> Result<Self, QuartzError> {
        let rr = r.read_i32()?; // result_reg
        let sp = r.read_i32()?; // state_pos, unused in this driver
        trace!("VarRefStep: result_reg={} state_pos={}", rr, sp);
        Ok(VarRefStep {
            result_reg: rr,
            loc: Location::from_reader(r)?,
            var_name: r.read_string()?,
            state: StepState::Uninitialized,
        })
    }

    pub(crate) fn open(&mut self, _req: &QueryRequest, _handle: &Handle) -> Result<(), QuartzError> {
        self.state = StepState::Open;
        Ok(())
    }
    pub(crate) fn get_kind(&self) -> StepKind {
        StepKind::VarRef
    }
    pub(crate) async fn next(
        &mut self,
        _req: &mut QueryRequest,
        _handle: &Handle,
    ) -> Result<bool, QuartzError> {
        if self.state == StepState::Done {
            trace!("VarRefStep '{}' drained", self.var_name);
            return Ok(false);
        }
        // the domain step has already placed the value in our register;
        // a var ref yields it exactly once per binding
        self.state = StepState::Done;
        Ok(true)
    }
    pub(crate) fn get_result(&self, req: &mut QueryRequest) -> FieldValue {
        // several steps may reference the same variable register, so the
        // value is cloned rather than moved out
        req.get_result_ref(self.result_reg).clone_internal()
    }
    pub(crate) fn set_result(&self, req: &mut QueryRequest, result: FieldValue) {
        req.set_result(self.result_reg, result);
    }
    pub(crate) fn reset(&mut self) -> Result<(), QuartzError> {
        self.state = StepState::Open;
        Ok(())
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

// ExtVarStep is a reference to an external (bind) variable. It returns
// the value the application bound through the QueryRequest; the id
// indexes the request's external variable array.
#[derive(Debug, Default, Clone)]
pub struct ExtVarStep {
    result_reg: i32,
    #[allow(dead_code)]
    loc: Location,
    // used only in error messages
    var_name: String,
    id: i32,
    state: StepState,
}

impl ExtVarStep {
    pub(crate) fn new(r: &mut Reader) -> Result<Self, QuartzError> {
        let rr = r.read_i32()?; // result_reg
        let sp = r.read_i32()?; // state_pos, unused in this driver
        trace!("ExtVarStep: result_reg={} state_pos={}", rr, sp);
        Ok(ExtVarStep {
            result_reg: rr,
            loc: Location::from_reader(r)?,
            var_name: r.read_string()?,
            id: r.read_i32()?,
            state: StepState::Uninitialized,
        })
    }

    pub(crate) fn open(&mut self, _req: &QueryRequest, _handle: &Handle) -> Result<(), QuartzError> {
        self.state = StepState::Open;
        Ok(())
    }
    pub(crate) fn get_kind(&self) -> StepKind {
        StepKind::ExtVar
    }
    pub(crate) async fn next(
        &mut self,
        req: &mut QueryRequest,
        _handle: &Handle,
    ) -> Result<bool, QuartzError> {
        if self.state == StepState::Done {
            return Ok(false);
        }
        let val = match req.get_external_var(self.id) {
            Some(v) => v.clone_internal(),
            None => {
                return ia_err!(
                    "variable '{}' has not been bound to a value",
                    self.var_name
                );
            }
        };
        self.set_result(req, val);
        self.state = StepState::Done;
        Ok(true)
    }
    pub(crate) fn get_result(&self, req: &mut QueryRequest) -> FieldValue {
        // cloned, not moved; multiple steps may reference the variable
        req.get_result_ref(self.result_reg).clone_internal()
    }
    pub(crate) fn set_result(&self, req: &mut QueryRequest, result: FieldValue) {
        req.set_result(self.result_reg, result);
    }
    pub(crate) fn reset(&mut self) -> Result<(), QuartzError> {
        self.state = StepState::Open;
        Ok(())
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
