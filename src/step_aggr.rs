use crate::error::ia_err;
use crate::error::QuartzError;
use crate::handle::Handle;
use crate::plan::{deserialize_plan_step, FuncCode, Location, PlanStep, StepKind, StepState};
use crate::query_request::QueryRequest;
use crate::reader::Reader;
use crate::types::{bd_from_f64, compare_atomics_total_order, FromFieldValue};
use crate::types::{FieldType, FieldValue};

use bigdecimal::BigDecimal;
use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::result::Result;
use tracing::trace;

// Accumulator state common to the aggregation steps.
#[derive(Debug)]
struct AggrStepData {
    state: StepState,
    count: i64,
    long_sum: i64,
    double_sum: f64,
    number_sum: BigDecimal,
    sum_type: FieldType,
    null_input_only: bool,
    min_max: FieldValue,
}

impl Clone for AggrStepData {
    // clone of step data never copies accumulated values
    fn clone(&self) -> Self {
        AggrStepData::default()
    }
    fn clone_from(&mut self, _source: &Self) {
        self.reset();
    }
}

impl Default for AggrStepData {
    fn default() -> Self {
        AggrStepData {
            state: StepState::Uninitialized,
            count: 0,
            long_sum: 0,
            double_sum: 0.0,
            number_sum: BigDecimal::default(),
            sum_type: FieldType::Long,
            null_input_only: true,
            min_max: FieldValue::Null,
        }
    }
}

impl AggrStepData {
    fn reset(&mut self) {
        let _ = std::mem::take(self);
    }
}

// SumStep implements the SUM aggregate function. The driver needs it to
// re-sum the partial sums and counts received from the server.
//
// Note: next() does not produce per-row results; it folds each numeric
// input into the running sum. The current sum is extracted, and the
// accumulator optionally reset, through get_aggr_value().
#[derive(Debug, Default, Clone)]
pub struct SumStep {
    result_reg: i32,
    #[allow(dead_code)]
    loc: Location,
    input_step: Box<PlanStep>,
    data: AggrStepData,
}

impl SumStep {
    pub(crate) fn new(r: &mut Reader) -> Result<Self, QuartzError> {
        let rr = r.read_i32()?; // result_reg
        let sp = r.read_i32()?; // state_pos, unused in this driver
        trace!("SumStep: result_reg={} state_pos={}", rr, sp);
        Ok(SumStep {
            result_reg: rr,
            loc: Location::from_reader(r)?,
            input_step: deserialize_plan_step(r)?,
            data: AggrStepData::default(),
        })
    }

    pub(crate) fn open(&mut self, req: &mut QueryRequest, handle: &Handle) -> Result<(), QuartzError> {
        self.data.state = StepState::Open;
        self.input_step.open(req, handle)
    }
    pub(crate) fn get_kind(&self) -> StepKind {
        StepKind::SumFunc
    }
    pub(crate) async fn next(
        &mut self,
        req: &mut QueryRequest,
        handle: &Handle,
    ) -> Result<bool, QuartzError> {
        if self.data.state == StepState::Done {
            return Ok(false);
        }

        loop {
            if !self.input_step.next(req, handle).await? {
                return Ok(true);
            }
            let val = self.input_step.get_result(req);
            if val.is_null() {
                continue;
            }
            self.data.null_input_only = false;
            self.sum_new_value(val)?;
        }
    }

    fn sum_new_value(&mut self, val: FieldValue) -> Result<(), QuartzError> {
        match val.get_type() {
            FieldType::Integer => {
                self.data.count += 1;
                match self.data.sum_type {
                    FieldType::Long => self.data.long_sum += i32::from_field(&val)? as i64,
                    FieldType::Double => self.data.double_sum += i32::from_field(&val)? as f64,
                    FieldType::Number => self.data.number_sum += i32::from_field(&val)?,
                    _ => {
                        return ia_err!("invalid sum type in SumStep: {:?}", self.data.sum_type);
                    }
                }
            }
            FieldType::Long => {
                self.data.count += 1;
                match self.data.sum_type {
                    FieldType::Long => self.data.long_sum += i64::from_field(&val)?,
                    FieldType::Double => self.data.double_sum += i64::from_field(&val)? as f64,
                    FieldType::Number => self.data.number_sum += i64::from_field(&val)?,
                    _ => {
                        return ia_err!("invalid sum type in SumStep: {:?}", self.data.sum_type);
                    }
                }
            }
            FieldType::Double => {
                self.data.count += 1;
                match self.data.sum_type {
                    FieldType::Long => {
                        // promote the running long sum to double
                        self.data.double_sum += self.data.long_sum as f64;
                        self.data.double_sum += f64::from_field(&val)?;
                        self.data.sum_type = FieldType::Double;
                    }
                    FieldType::Double => self.data.double_sum += f64::from_field(&val)?,
                    FieldType::Number => {
                        self.data.number_sum += bd_from_f64(f64::from_field(&val)?)?;
                    }
                    _ => {
                        return ia_err!("invalid sum type in SumStep: {:?}", self.data.sum_type);
                    }
                }
            }
            FieldType::Number => {
                self.data.count += 1;
                match self.data.sum_type {
                    FieldType::Long => {
                        self.data.number_sum += self.data.long_sum;
                        self.data.number_sum += BigDecimal::from_field(&val)?;
                        self.data.sum_type = FieldType::Number;
                    }
                    FieldType::Double => {
                        self.data.number_sum = bd_from_f64(self.data.double_sum)?;
                        self.data.number_sum += BigDecimal::from_field(&val)?;
                        self.data.sum_type = FieldType::Number;
                    }
                    FieldType::Number => self.data.number_sum += BigDecimal::from_field(&val)?,
                    _ => {
                        return ia_err!("invalid sum type in SumStep: {:?}", self.data.sum_type);
                    }
                }
            }
            // silently skip all other input types
            _ => (),
        }
        Ok(())
    }

    pub(crate) fn get_result(&self, req: &mut QueryRequest) -> FieldValue {
        req.get_result(self.result_reg)
    }
    pub(crate) fn set_result(&self, req: &mut QueryRequest, result: FieldValue) {
        req.set_result(self.result_reg, result);
    }
    pub(crate) fn reset(&mut self) -> Result<(), QuartzError> {
        // the accumulator itself is reset through get_aggr_value
        self.input_step.reset()
    }
    pub(crate) fn get_state(&self) -> StepState {
        self.data.state
    }

    // Called twice when a group completes and a new one starts: first to
    // extract (and reset) the final SUM of the finished group, then to
    // read the initial SUM computed from the first tuple of the new one.
    pub(crate) fn get_aggr_value(
        &mut self,
        _req: &QueryRequest,
        reset: bool,
    ) -> Result<Option<FieldValue>, QuartzError> {
        if self.data.null_input_only {
            return Ok(Some(FieldValue::Null));
        }
        let val = match self.data.sum_type {
            FieldType::Long => FieldValue::Long(self.data.long_sum),
            FieldType::Double => FieldValue::Double(self.data.double_sum),
            FieldType::Number => FieldValue::Number(self.data.number_sum.clone()),
            _ => {
                return ia_err!("invalid result type for SUM: {:?}", self.data.sum_type);
            }
        };
        if reset {
            self.data.reset();
        }
        Ok(Some(val))
    }
}

// MinMaxStep implements the MIN/MAX aggregate functions, computing the
// total min/max from the partial mins/maxs received from the server.
#[derive(Debug, Default, Clone)]
pub struct MinMaxStep {
    result_reg: i32,
    #[allow(dead_code)]
    loc: Location,
    func_code: FuncCode,
    input_step: Box<PlanStep>,
    data: AggrStepData,
}

impl MinMaxStep {
    pub(crate) fn new(r: &mut Reader) -> Result<Self, QuartzError> {
        let rr = r.read_i32()?; // result_reg
        let _ = r.read_i32()?; // state_pos, unused in this driver
        Ok(MinMaxStep {
            result_reg: rr,
            loc: Location::from_reader(r)?,
            func_code: FuncCode::try_from_u16(r.read_u16()?)?,
            input_step: deserialize_plan_step(r)?,
            data: AggrStepData::default(),
        })
    }

    pub(crate) fn open(&mut self, req: &mut QueryRequest, handle: &Handle) -> Result<(), QuartzError> {
        self.data.state = StepState::Open;
        self.input_step.open(req, handle)
    }
    pub(crate) fn get_kind(&self) -> StepKind {
        StepKind::MinMaxFunc
    }
    pub(crate) async fn next(
        &mut self,
        req: &mut QueryRequest,
        handle: &Handle,
    ) -> Result<bool, QuartzError> {
        if self.data.state == StepState::Done {
            return Ok(false);
        }

        loop {
            if !self.input_step.next(req, handle).await? {
                return Ok(true);
            }
            let val = self.input_step.get_result(req);
            self.min_max_new_value(val)?;
        }
    }

    fn min_max_new_value(&mut self, val: FieldValue) -> Result<(), QuartzError> {
        match val.get_type() {
            FieldType::Binary
            | FieldType::Array
            | FieldType::Map
            | FieldType::Record
            | FieldType::Null
            | FieldType::Empty
            | FieldType::JsonNull => {
                return Ok(());
            }
            _ => (),
        }
        if self.data.min_max == FieldValue::Null {
            self.data.min_max = val;
            return Ok(());
        }
        let cmp = compare_atomics_total_order(&self.data.min_max, &val);
        if self.func_code == FuncCode::FnMin {
            if cmp != Ordering::Greater {
                return Ok(());
            }
        } else if cmp != Ordering::Less {
            return Ok(());
        }
        self.data.min_max = val;
        Ok(())
    }

    pub(crate) fn get_result(&self, req: &mut QueryRequest) -> FieldValue {
        req.get_result(self.result_reg)
    }
    pub(crate) fn set_result(&self, req: &mut QueryRequest, result: FieldValue) {
        req.set_result(self.result_reg, result);
    }
    pub(crate) fn reset(&mut self) -> Result<(), QuartzError> {
        // the accumulator itself is reset through get_aggr_value
        self.input_step.reset()
    }
    pub(crate) fn get_state(&self) -> StepState {
        self.data.state
    }
    pub(crate) fn get_aggr_value(
        &mut self,
        _req: &QueryRequest,
        reset: bool,
    ) -> Result<Option<FieldValue>, QuartzError> {
        if reset {
            self.reset()?;
            self.data.state = StepState::Uninitialized;
            return Ok(Some(std::mem::take(&mut self.data.min_max)));
        }
        Ok(Some(self.data.min_max.clone_internal()))
    }
}

// CollectStep implements array_collect / array_collect(distinct),
// merging the partial arrays received from the server.
#[derive(Debug, Default, Clone)]
pub struct CollectStep {
    result_reg: i32,
    #[allow(dead_code)]
    loc: Location,
    is_distinct: bool,
    input_step: Box<PlanStep>,
    data: CollectStepData,
}

#[derive(Debug, Default)]
struct CollectStepData {
    state: StepState,
    array: Vec<FieldValue>,
    set: BTreeSet<FieldValue>,
}

impl Clone for CollectStepData {
    // clone of step data never copies accumulated values
    fn clone(&self) -> Self {
        CollectStepData::default()
    }
    fn clone_from(&mut self, _source: &Self) {
        self.reset();
    }
}

impl CollectStepData {
    fn reset(&mut self) {
        self.state = StepState::Uninitialized;
        self.array.clear();
        self.set.clear();
    }
}

impl CollectStep {
    pub(crate) fn new(r: &mut Reader) -> Result<Self, QuartzError> {
        let rr = r.read_i32()?; // result_reg
        let sp = r.read_i32()?; // state_pos, unused in this driver
        trace!("CollectStep: result_reg={} state_pos={}", rr, sp);
        Ok(CollectStep {
            result_reg: rr,
            loc: Location::from_reader(r)?,
            is_distinct: r.read_bool()?,
            input_step: deserialize_plan_step(r)?,
            ..Default::default()
        })
    }

    pub(crate) fn open(&mut self, req: &mut QueryRequest, handle: &Handle) -> Result<(), QuartzError> {
        self.data.state = StepState::Open;
        self.input_step.open(req, handle)
    }
    pub(crate) fn get_kind(&self) -> StepKind {
        StepKind::Collect
    }
    pub(crate) async fn next(
        &mut self,
        req: &mut QueryRequest,
        handle: &Handle,
    ) -> Result<bool, QuartzError> {
        if self.data.state == StepState::Done {
            return Ok(false);
        }

        loop {
            if !self.input_step.next(req, handle).await? {
                return Ok(true);
            }
            let val = self.input_step.get_result(req);
            self.aggregate(req, val)?;
        }
    }

    fn aggregate(&mut self, req: &mut QueryRequest, val: FieldValue) -> Result<(), QuartzError> {
        if val.is_null() {
            return Ok(());
        }
        if let FieldValue::Array(arr) = val {
            // collected values are buffered client-side; account for them
            let mut sz: i64 = 0;
            for i in &arr {
                sz += i.size_estimate();
            }
            req.add_memory(sz)?;
            if self.is_distinct {
                self.data.set.extend(arr);
            } else {
                self.data.array.extend(arr);
            }
            Ok(())
        } else {
            ia_err!(
                "input to array_collect has wrong type: expected Array, got {:?}",
                val.get_type()
            )
        }
    }

    pub(crate) fn get_result(&self, req: &mut QueryRequest) -> FieldValue {
        req.get_result(self.result_reg)
    }
    pub(crate) fn set_result(&self, req: &mut QueryRequest, result: FieldValue) {
        req.set_result(self.result_reg, result);
    }
    pub(crate) fn reset(&mut self) -> Result<(), QuartzError> {
        // the accumulator itself is reset through get_aggr_value
        self.input_step.reset()
    }
    pub(crate) fn get_state(&self) -> StepState {
        self.data.state
    }
    pub(crate) fn get_aggr_value(
        &mut self,
        _req: &QueryRequest,
        reset: bool,
    ) -> Result<Option<FieldValue>, QuartzError> {
        let arr: Vec<FieldValue> = if self.is_distinct {
            std::mem::take(&mut self.data.set).into_iter().collect()
        } else {
            std::mem::take(&mut self.data.array)
        };
        if reset {
            self.data.reset();
        }
        Ok(Some(FieldValue::Array(arr)))
    }
}

// SizeStep implements the size() function over a complex value.
#[derive(Debug, Default, Clone)]
pub struct SizeStep {
    result_reg: i32,
    loc: Location,
    input_step: Box<PlanStep>,
    state: StepState,
}

impl SizeStep {
    pub(crate) fn new(r: &mut Reader) -> Result<Self, QuartzError> {
        let rr = r.read_i32()?; // result_reg
        let sp = r.read_i32()?; // state_pos, unused in this driver
        trace!("SizeStep: result_reg={} state_pos={}", rr, sp);
        Ok(SizeStep {
            result_reg: rr,
            loc: Location::from_reader(r)?,
            input_step: deserialize_plan_step(r)?,
            state: StepState::Uninitialized,
        })
    }

    pub(crate) fn open(&mut self, req: &mut QueryRequest, handle: &Handle) -> Result<(), QuartzError> {
        self.state = StepState::Open;
        self.input_step.open(req, handle)
    }
    pub(crate) fn get_kind(&self) -> StepKind {
        StepKind::Size
    }
    pub(crate) async fn next(
        &mut self,
        req: &mut QueryRequest,
        handle: &Handle,
    ) -> Result<bool, QuartzError> {
        if self.state == StepState::Done {
            return Ok(false);
        }
        if !self.input_step.next(req, handle).await? {
            self.state = StepState::Done;
            return Ok(false);
        }

        let val = self.input_step.get_result(req);
        if val.is_null() {
            self.set_result(req, FieldValue::Null);
            self.state = StepState::Done;
            return Ok(true);
        }

        let size = match &val {
            FieldValue::Array(a) => a.len(),
            FieldValue::Map(m) | FieldValue::Record(m) => m.len(),
            _ => {
                return ia_err!(
                    "input to the size() function has wrong type\n\
                    expected complex type, actual type is: {:?}, {:?}",
                    val.get_type(),
                    self.loc
                );
            }
        };

        self.set_result(req, FieldValue::Long(size as i64));
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
