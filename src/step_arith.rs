use crate::error::ia_err;
use crate::error::QuartzError;
use crate::handle::Handle;
use crate::plan::{deserialize_plan_steps, FuncCode, Location, PlanStep, StepKind, StepState};
use crate::query_request::QueryRequest;
use crate::reader::Reader;
use crate::types::{FieldType, FieldValue};

use bigdecimal::BigDecimal;
use std::result::Result;
use tracing::trace;

// ArithOpStep implements addition/subtraction among two or more input
// values, or multiplication/division among two or more input values.
//
// The only arithmetic op strictly needed at the driver is real division,
// used to compute an AVG aggregate as SUM/COUNT when regrouping partial
// aggregates. Having all of them allows arithmetic among aggregate
// functions in the SELECT list.
#[derive(Debug, Default, Clone)]
pub struct ArithOpStep {
    result_reg: i32,
    loc: Location,
    state: StepState,
    func_code: FuncCode,
    arg_steps: Vec<Box<PlanStep>>,
    // If func_code is OpAddSub, ops holds one '+' or '-' char per input
    // value: (arg1 + arg2 - arg3) has ops "++-" (the leading op applies
    // to the first argument). For OpMultDiv, the chars are '*', '/' and
    // 'd', where 'd' marks real division.
    ops: Vec<u8>,
    init_result: i32,
    have_real_div: bool,
}

impl ArithOpStep {
    pub(crate) fn new(r: &mut Reader) -> Result<Self, QuartzError> {
        let rr = r.read_i32()?; // result_reg
        let sp = r.read_i32()?; // state_pos, unused in this driver
        trace!("ArithOpStep: result_reg={} state_pos={}", rr, sp);
        let mut a = ArithOpStep {
            result_reg: rr,
            state: StepState::Uninitialized,
            loc: Location::from_reader(r)?,
            func_code: FuncCode::try_from_u16(r.read_u16()?)?,
            arg_steps: deserialize_plan_steps(r)?,
            ..Default::default()
        };
        let s = r.read_string()?;
        a.have_real_div = s.contains('d');
        a.ops = s.into_bytes();
        if a.func_code == FuncCode::OpAddSub {
            a.init_result = 0;
        } else {
            a.init_result = 1;
        }
        if a.ops.len() != a.arg_steps.len() {
            return ia_err!("arithmetic step has mismatched ops and args lengths");
        }
        Ok(a)
    }

    pub(crate) fn open(&mut self, req: &mut QueryRequest, handle: &Handle) -> Result<(), QuartzError> {
        self.state = StepState::Open;
        for i in &mut self.arg_steps {
            i.open(req, handle)?;
        }
        Ok(())
    }
    pub(crate) fn get_kind(&self) -> StepKind {
        StepKind::ArithOp
    }
    pub(crate) async fn next(
        &mut self,
        req: &mut QueryRequest,
        handle: &Handle,
    ) -> Result<bool, QuartzError> {
        if self.state == StepState::Done {
            return Ok(false);
        }
        // Determine the result type for the expression by iterating its
        // operands, applying the numeric promotion rules. Start with
        // INTEGER, unless any real division is present, in which case
        // start with DOUBLE.
        let mut result_type = FieldType::Integer;
        if self.have_real_div {
            result_type = FieldType::Double;
        }

        for i in 0..self.arg_steps.len() {
            if !self.arg_steps[i].next(req, handle).await? {
                self.state = StepState::Done;
                return Ok(false);
            }
            // take the value from the register...
            let arg_value = self.arg_steps[i].get_result(req);
            if arg_value.is_null() {
                self.set_result(req, FieldValue::Null);
                self.state = StepState::Done;
                return Ok(true);
            }
            let arg_type = arg_value.get_type();
            // ...then put it back after noting its type
            self.arg_steps[i].set_result(req, arg_value);
            match arg_type {
                FieldType::Integer => (),
                FieldType::Long => {
                    if result_type == FieldType::Integer {
                        result_type = FieldType::Long;
                    }
                }
                FieldType::Double => {
                    if result_type == FieldType::Integer || result_type == FieldType::Long {
                        result_type = FieldType::Double;
                    }
                }
                FieldType::Number => {
                    result_type = FieldType::Number;
                }
                _ => {
                    return ia_err!(
                        "operand in arithmetic operation has illegal type\n \
                        operand: {} type: {:?} location: {:?}",
                        i,
                        arg_type,
                        self.loc
                    );
                }
            }
        }
        let mut i_res: i32 = self.init_result;
        let mut l_res: i64 = self.init_result as i64;
        let mut d_res: f64 = self.init_result as f64;
        let mut n_res = BigDecimal::default() + self.init_result;
        for i in 0..self.arg_steps.len() {
            let arg_value = self.arg_steps[i].get_result(req);
            if arg_value == FieldValue::Uninitialized {
                return ia_err!("found uninitialized field value in arg register {i}");
            }
            if self.func_code == FuncCode::OpAddSub {
                if self.ops[i] == b'+' {
                    match result_type {
                        FieldType::Integer => i_res += arg_value.as_i32()?,
                        FieldType::Long => l_res += arg_value.as_i64()?,
                        FieldType::Double => d_res += arg_value.as_f64()?,
                        FieldType::Number => n_res += arg_value.as_big_decimal()?,
                        _ => {
                            return ia_err!("invalid result type: {:?}", result_type);
                        }
                    }
                } else {
                    match result_type {
                        FieldType::Integer => i_res -= arg_value.as_i32()?,
                        FieldType::Long => l_res -= arg_value.as_i64()?,
                        FieldType::Double => d_res -= arg_value.as_f64()?,
                        FieldType::Number => n_res -= arg_value.as_big_decimal()?,
                        _ => {
                            return ia_err!("invalid result type: {:?}", result_type);
                        }
                    }
                }
            } else if self.ops[i] == b'*' {
                match result_type {
                    FieldType::Integer => i_res *= arg_value.as_i32()?,
                    FieldType::Long => l_res *= arg_value.as_i64()?,
                    FieldType::Double => d_res *= arg_value.as_f64()?,
                    FieldType::Number => n_res *= arg_value.as_big_decimal()?,
                    _ => {
                        return ia_err!("invalid result type: {:?}", result_type);
                    }
                }
            } else if self.ops[i] == b'/' {
                match result_type {
                    FieldType::Integer => {
                        let d = arg_value.as_i32()?;
                        if d == 0 {
                            return ia_err!("division by zero at {:?}", self.loc);
                        }
                        i_res /= d;
                    }
                    FieldType::Long => {
                        let d = arg_value.as_i64()?;
                        if d == 0 {
                            return ia_err!("division by zero at {:?}", self.loc);
                        }
                        l_res /= d;
                    }
                    FieldType::Double => d_res /= arg_value.as_f64()?,
                    FieldType::Number => n_res = n_res / arg_value.as_big_decimal()?,
                    _ => {
                        return ia_err!("invalid result type: {:?}", result_type);
                    }
                }
            } else {
                // 'd': real division, always Double or Number
                match result_type {
                    FieldType::Double => d_res /= arg_value.as_f64()?,
                    FieldType::Number => n_res = n_res / arg_value.as_big_decimal()?,
                    _ => {
                        return ia_err!(
                            "invalid result type: {:?} (i={} ops={:?})",
                            result_type,
                            i,
                            self.ops
                        );
                    }
                }
            }
        }
        match result_type {
            FieldType::Integer => self.set_result(req, FieldValue::Integer(i_res)),
            FieldType::Long => self.set_result(req, FieldValue::Long(l_res)),
            FieldType::Double => self.set_result(req, FieldValue::Double(d_res)),
            FieldType::Number => self.set_result(req, FieldValue::Number(n_res)),
            _ => {
                return ia_err!("invalid result type: {:?}", result_type);
            }
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
        self.state = StepState::Uninitialized;
        for i in 0..self.arg_steps.len() {
            self.arg_steps[i].reset()?;
        }
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
