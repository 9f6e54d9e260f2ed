use crate::error::ia_err;
use crate::error::QuartzError;
use crate::error::QuartzErrorCode::BadProtocolMessage;
use crate::handle::Handle;
use crate::query_request::QueryRequest;
use crate::reader::Reader;
use crate::step_aggr::{CollectStep, MinMaxStep, SizeStep, SumStep};
use crate::step_arith::ArithOpStep;
use crate::step_field::FieldStep;
use crate::step_group::GroupStep;
use crate::step_receive::ReceiveStep;
use crate::step_sfw::SfwStep;
use crate::step_sort::SortStep;
use crate::step_value::{ConstStep, ExtVarStep, VarRefStep};
use crate::types::FieldValue;

use num_enum::TryFromPrimitive;
use std::result::Result;

use async_recursion::async_recursion;

// StepKind identifies a step in the driver-side query plan, as encoded
// in the plan blob the server returns with a prepared statement.
#[derive(Debug, Clone, Default, Eq, PartialEq, TryFromPrimitive)]
#[repr(u8)]
pub(crate) enum StepKind {
    #[default]
    Empty = 255,
    Const = 0,
    VarRef = 1,
    ExtVar = 2,
    ArithOp = 8,
    FieldStep = 11,
    Sfw = 14,
    Size = 15,
    Recv = 17,
    SumFunc = 39,
    MinMaxFunc = 41,
    Sorting = 47,
    Group = 65,
    Sorting2 = 66,
    Collect = 78,
}

impl StepKind {
    pub(crate) fn try_from_u8(val: u8) -> Result<Self, QuartzError> {
        match StepKind::try_from(val) {
            Ok(fc) => Ok(fc),
            Err(_) => Err(QuartzError::new(
                BadProtocolMessage,
                &format!("unrecognized plan step kind {}", val),
            )),
        }
    }
}

// FuncCode identifies a built-in function inside arithmetic and
// aggregation steps.
#[derive(Debug, Default, Clone, Copy, Eq, PartialEq, PartialOrd, TryFromPrimitive)]
#[repr(u16)]
pub(crate) enum FuncCode {
    OpAddSub = 14,
    OpMultDiv = 15,
    FnCountStar = 42,
    #[default]
    FnCount = 43,
    FnCountNumbers = 44,
    FnSum = 45,
    FnMin = 47,
    FnMax = 48,
    ArrayCollect = 91,
    ArrayCollectDistinct = 92,
}

impl FuncCode {
    pub(crate) fn try_from_u16(val: u16) -> Result<Self, QuartzError> {
        match FuncCode::try_from(val) {
            Ok(fc) => Ok(fc),
            Err(_) => Err(QuartzError::new(
                BadProtocolMessage,
                &format!("unrecognized function code {}", val),
            )),
        }
    }
}

// Dynamic state of a step during iteration.
#[derive(Debug, Default, Clone, Copy, Eq, PartialEq)]
#[repr(u8)]
pub(crate) enum StepState {
    #[default]
    Uninitialized = 255,
    Open = 0,
    Running = 1,
    Done = 2,
}

impl std::fmt::Display for StepState {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

impl StepState {
    pub fn is_done(self) -> bool {
        self == StepState::Done
    }
}

// Source location of the expression a step was compiled from; only used
// in error messages.
#[derive(Debug, Default, Clone, Copy)]
#[allow(dead_code)]
pub(crate) struct Location {
    pub start_line: i32,
    pub start_column: i32,
    pub end_line: i32,
    pub end_column: i32,
}

impl Location {
    pub fn from_reader(r: &mut Reader) -> Result<Self, QuartzError> {
        Ok(Location {
            start_line: r.read_i32_min(0)?,
            start_column: r.read_i32_min(0)?,
            end_line: r.read_i32_min(0)?,
            end_column: r.read_i32_min(0)?,
        })
    }
}

// A step of the driver-side query plan. The plan is a small tree the
// driver interprets around the server-resolved fragments: a step pulls
// values from its inputs through next(), leaving its current result in
// its register on the executing QueryRequest.
#[derive(Debug, Clone)]
pub enum PlanStep {
    Empty(EmptyStep),
    Const(ConstStep),
    ArithOp(ArithOpStep),
    Receive(ReceiveStep),
    Sfw(SfwStep),
    Size(SizeStep),
    FieldStep(FieldStep),
    VarRef(VarRefStep),
    ExtVar(ExtVarStep),
    Sorting(SortStep),
    Group(GroupStep),
    SumFunc(SumStep),
    MinMaxFunc(MinMaxStep),
    Collect(CollectStep),
}

impl Default for PlanStep {
    fn default() -> Self {
        PlanStep::Empty(EmptyStep::new())
    }
}

impl PlanStep {
    // set up the step for looping
    pub(crate) fn open(&mut self, req: &mut QueryRequest, handle: &Handle) -> Result<(), QuartzError> {
        match self {
            PlanStep::Empty(e) => e.open(req, handle),
            PlanStep::Const(c) => c.open(req, handle),
            PlanStep::Receive(r) => r.open(req, handle),
            PlanStep::Sfw(r) => r.open(req, handle),
            PlanStep::FieldStep(r) => r.open(req, handle),
            PlanStep::VarRef(r) => r.open(req, handle),
            PlanStep::ExtVar(r) => r.open(req, handle),
            PlanStep::Sorting(r) => r.open(req, handle),
            PlanStep::Group(r) => r.open(req, handle),
            PlanStep::SumFunc(r) => r.open(req, handle),
            PlanStep::MinMaxFunc(r) => r.open(req, handle),
            PlanStep::ArithOp(r) => r.open(req, handle),
            PlanStep::Collect(r) => r.open(req, handle),
            PlanStep::Size(r) => r.open(req, handle),
        }
    }

    // Advance to the next result, placing it in the step's register.
    // Returns true when a result is available, false when drained.
    #[async_recursion]
    pub(crate) async fn next(
        &mut self,
        req: &mut QueryRequest,
        handle: &Handle,
    ) -> Result<bool, QuartzError> {
        match self {
            PlanStep::Empty(e) => e.next(req).await,
            PlanStep::Const(c) => c.next(req).await,
            PlanStep::Receive(r) => r.next(req, handle).await,
            PlanStep::Sfw(r) => r.next(req, handle).await,
            PlanStep::FieldStep(r) => r.next(req, handle).await,
            PlanStep::VarRef(r) => r.next(req, handle).await,
            PlanStep::ExtVar(r) => r.next(req, handle).await,
            PlanStep::Sorting(r) => r.next(req, handle).await,
            PlanStep::Group(r) => r.next(req, handle).await,
            PlanStep::SumFunc(r) => r.next(req, handle).await,
            PlanStep::MinMaxFunc(r) => r.next(req, handle).await,
            PlanStep::ArithOp(r) => r.next(req, handle).await,
            PlanStep::Collect(r) => r.next(req, handle).await,
            PlanStep::Size(r) => r.next(req, handle).await,
        }
    }

    // restore the step to the state it had just after deserialization
    pub(crate) fn reset(&mut self) -> Result<(), QuartzError> {
        match self {
            PlanStep::Empty(e) => e.reset(),
            PlanStep::Const(c) => c.reset(),
            PlanStep::Receive(r) => r.reset(),
            PlanStep::Sfw(r) => r.reset(),
            PlanStep::FieldStep(r) => r.reset(),
            PlanStep::VarRef(r) => r.reset(),
            PlanStep::ExtVar(r) => r.reset(),
            PlanStep::Sorting(r) => r.reset(),
            PlanStep::Group(r) => r.reset(),
            PlanStep::SumFunc(r) => r.reset(),
            PlanStep::MinMaxFunc(r) => r.reset(),
            PlanStep::ArithOp(r) => r.reset(),
            PlanStep::Collect(r) => r.reset(),
            PlanStep::Size(r) => r.reset(),
        }
    }

    pub(crate) fn get_kind(&self) -> StepKind {
        match self {
            PlanStep::Empty(e) => e.get_kind(),
            PlanStep::Const(c) => c.get_kind(),
            PlanStep::Receive(r) => r.get_kind(),
            PlanStep::Sfw(r) => r.get_kind(),
            PlanStep::FieldStep(r) => r.get_kind(),
            PlanStep::VarRef(r) => r.get_kind(),
            PlanStep::ExtVar(r) => r.get_kind(),
            PlanStep::Sorting(r) => r.get_kind(),
            PlanStep::Group(r) => r.get_kind(),
            PlanStep::SumFunc(r) => r.get_kind(),
            PlanStep::MinMaxFunc(r) => r.get_kind(),
            PlanStep::ArithOp(r) => r.get_kind(),
            PlanStep::Collect(r) => r.get_kind(),
            PlanStep::Size(r) => r.get_kind(),
        }
    }

    // moves the current result out of the step's register
    pub(crate) fn get_result(&self, req: &mut QueryRequest) -> FieldValue {
        match self {
            PlanStep::Empty(e) => e.get_result(req),
            PlanStep::Const(c) => c.get_result(req),
            PlanStep::Receive(r) => r.get_result(req),
            PlanStep::Sfw(r) => r.get_result(req),
            PlanStep::FieldStep(r) => r.get_result(req),
            PlanStep::VarRef(r) => r.get_result(req),
            PlanStep::ExtVar(r) => r.get_result(req),
            PlanStep::Sorting(r) => r.get_result(req),
            PlanStep::Group(r) => r.get_result(req),
            PlanStep::SumFunc(r) => r.get_result(req),
            PlanStep::MinMaxFunc(r) => r.get_result(req),
            PlanStep::ArithOp(r) => r.get_result(req),
            PlanStep::Collect(r) => r.get_result(req),
            PlanStep::Size(r) => r.get_result(req),
        }
    }

    // moves a result into the step's register
    pub(crate) fn set_result(&self, req: &mut QueryRequest, result: FieldValue) {
        match self {
            PlanStep::Empty(e) => e.set_result(req, result),
            PlanStep::Const(c) => c.set_result(req, result),
            PlanStep::Receive(r) => r.set_result(req, result),
            PlanStep::Sfw(r) => r.set_result(req, result),
            PlanStep::FieldStep(r) => r.set_result(req, result),
            PlanStep::VarRef(r) => r.set_result(req, result),
            PlanStep::ExtVar(r) => r.set_result(req, result),
            PlanStep::Sorting(r) => r.set_result(req, result),
            PlanStep::Group(r) => r.set_result(req, result),
            PlanStep::SumFunc(r) => r.set_result(req, result),
            PlanStep::MinMaxFunc(r) => r.set_result(req, result),
            PlanStep::ArithOp(r) => r.set_result(req, result),
            PlanStep::Collect(r) => r.set_result(req, result),
            PlanStep::Size(r) => r.set_result(req, result),
        }
    }

    pub(crate) fn get_state(&self) -> StepState {
        match self {
            PlanStep::Empty(e) => e.get_state(),
            PlanStep::Const(c) => c.get_state(),
            PlanStep::Receive(r) => r.get_state(),
            PlanStep::Sfw(r) => r.get_state(),
            PlanStep::FieldStep(r) => r.get_state(),
            PlanStep::VarRef(r) => r.get_state(),
            PlanStep::ExtVar(r) => r.get_state(),
            PlanStep::Sorting(r) => r.get_state(),
            PlanStep::Group(r) => r.get_state(),
            PlanStep::SumFunc(r) => r.get_state(),
            PlanStep::MinMaxFunc(r) => r.get_state(),
            PlanStep::ArithOp(r) => r.get_state(),
            PlanStep::Collect(r) => r.get_state(),
            PlanStep::Size(r) => r.get_state(),
        }
    }

    // Only meaningful for aggregation steps: yield the running aggregate
    // value, optionally resetting the accumulator for the next group.
    pub(crate) fn get_aggr_value(
        &mut self,
        req: &QueryRequest,
        reset: bool,
    ) -> Result<Option<FieldValue>, QuartzError> {
        match self {
            PlanStep::Empty(e) => e.get_aggr_value(req, reset),
            PlanStep::Const(c) => c.get_aggr_value(req, reset),
            PlanStep::Receive(r) => r.get_aggr_value(req, reset),
            PlanStep::Sfw(r) => r.get_aggr_value(req, reset),
            PlanStep::FieldStep(r) => r.get_aggr_value(req, reset),
            PlanStep::VarRef(r) => r.get_aggr_value(req, reset),
            PlanStep::ExtVar(r) => r.get_aggr_value(req, reset),
            PlanStep::Sorting(r) => r.get_aggr_value(req, reset),
            PlanStep::Group(r) => r.get_aggr_value(req, reset),
            PlanStep::SumFunc(r) => r.get_aggr_value(req, reset),
            PlanStep::MinMaxFunc(r) => r.get_aggr_value(req, reset),
            PlanStep::ArithOp(r) => r.get_aggr_value(req, reset),
            PlanStep::Collect(r) => r.get_aggr_value(req, reset),
            PlanStep::Size(r) => r.get_aggr_value(req, reset),
        }
    }
}

pub(crate) fn read_sequence_length(r: &mut Reader) -> Result<i32, QuartzError> {
    let n = r.read_packed_i32()?;
    if n < -1 {
        return ia_err!("invalid sequence length: {}", n);
    }
    Ok(n)
}

pub(crate) fn deserialize_plan_steps(r: &mut Reader) -> Result<Vec<Box<PlanStep>>, QuartzError> {
    let n = read_sequence_length(r)?;
    if n == -1 {
        return Ok(Vec::new());
    }

    let mut steps: Vec<Box<PlanStep>> = Vec::with_capacity(n as usize);
    for _i in 0..n {
        let step = deserialize_plan_step(r)?;
        if step.get_kind() != StepKind::Empty {
            steps.push(step);
        }
    }
    Ok(steps)
}

pub(crate) fn deserialize_plan_step(r: &mut Reader) -> Result<Box<PlanStep>, QuartzError> {
    let b = r.read_byte()?;

    if b as i8 == -1 {
        return Ok(Box::new(PlanStep::default()));
    }

    let kind: StepKind = StepKind::try_from_u8(b)?;
    match kind {
        StepKind::Empty => Ok(Box::new(PlanStep::default())),
        StepKind::Const => Ok(Box::new(PlanStep::Const(ConstStep::new(r)?))),
        StepKind::VarRef => Ok(Box::new(PlanStep::VarRef(VarRefStep::new(r)?))),
        StepKind::ExtVar => Ok(Box::new(PlanStep::ExtVar(ExtVarStep::new(r)?))),
        StepKind::ArithOp => Ok(Box::new(PlanStep::ArithOp(ArithOpStep::new(r)?))),
        StepKind::FieldStep => Ok(Box::new(PlanStep::FieldStep(FieldStep::new(r)?))),
        StepKind::SumFunc => Ok(Box::new(PlanStep::SumFunc(SumStep::new(r)?))),
        StepKind::MinMaxFunc => Ok(Box::new(PlanStep::MinMaxFunc(MinMaxStep::new(r)?))),
        StepKind::Collect => Ok(Box::new(PlanStep::Collect(CollectStep::new(r)?))),
        StepKind::Size => Ok(Box::new(PlanStep::Size(SizeStep::new(r)?))),
        StepKind::Sorting => Ok(Box::new(PlanStep::Sorting(SortStep::new(r, kind)?))),
        StepKind::Sorting2 => Ok(Box::new(PlanStep::Sorting(SortStep::new(r, kind)?))),
        StepKind::Sfw => Ok(Box::new(PlanStep::Sfw(SfwStep::new(r)?))),
        StepKind::Recv => Ok(Box::new(PlanStep::Receive(ReceiveStep::new(r)?))),
        StepKind::Group => Ok(Box::new(PlanStep::Group(GroupStep::new(r)?))),
    }
}

// EmptyStep exists only to give PlanStep a cheap default while a real
// plan is deserialized.
#[derive(Debug, Default, Clone)]
pub struct EmptyStep {}

impl EmptyStep {
    pub(crate) fn new() -> Self {
        EmptyStep::default()
    }
    pub(crate) fn open(&mut self, _req: &QueryRequest, _handle: &Handle) -> Result<(), QuartzError> {
        Ok(())
    }
    pub(crate) fn get_kind(&self) -> StepKind {
        StepKind::Empty
    }
    pub(crate) async fn next(&mut self, _req: &QueryRequest) -> Result<bool, QuartzError> {
        Ok(false)
    }
    pub(crate) fn reset(&mut self) -> Result<(), QuartzError> {
        Ok(())
    }
    pub(crate) fn get_result(&self, _req: &mut QueryRequest) -> FieldValue {
        FieldValue::Uninitialized
    }
    pub(crate) fn set_result(&self, _req: &mut QueryRequest, _result: FieldValue) {}
    pub(crate) fn get_state(&self) -> StepState {
        StepState::Uninitialized
    }
    pub(crate) fn get_aggr_value(
        &self,
        _req: &QueryRequest,
        _reset: bool,
    ) -> Result<Option<FieldValue>, QuartzError> {
        Ok(None)
    }
}
