use crate::error::ia_err;
use crate::error::QuartzError;
use crate::handle::Handle;
use crate::plan::{deserialize_plan_step, Location, PlanStep, StepKind, StepState};
use crate::query_request::QueryRequest;
use crate::reader::Reader;
use crate::types::{sort_results, FieldValue, MapValue};

use std::result::Result;
use tracing::trace;

// SortSpec carries the per-expression ordering options of an ORDER BY
// clause: ascending or descending, and whether NULLs sort before all
// other values.
#[derive(Debug, Default, Clone)]
pub(crate) struct SortSpec {
    // sort in descending order
    pub is_desc: bool,

    // NULL values sort before all other values
    pub nulls_first: bool,
}

impl SortSpec {
    pub fn from_reader(r: &mut Reader) -> Result<SortSpec, QuartzError> {
        let desc = r.read_bool()?;
        let nulls = r.read_bool()?;
        Ok(SortSpec {
            is_desc: desc,
            nulls_first: nulls,
        })
    }
    pub fn read_sort_specs(r: &mut Reader) -> Result<Vec<SortSpec>, QuartzError> {
        let num = r.read_packed_i32()?;
        if num <= 0 {
            return Ok(Vec::new());
        }
        let mut v: Vec<SortSpec> = Vec::with_capacity(num as usize);
        for _i in 0..num {
            v.push(SortSpec::from_reader(r)?);
        }
        Ok(v)
    }
}

// SortStep buffers its entire input, sorts it on a set of top-level
// fields, then yields the rows in order. The buffered rows count toward
// the client-side query memory cap.
#[derive(Debug, Default, Clone)]
pub struct SortStep {
    result_reg: i32,
    #[allow(dead_code)]
    loc: Location,
    input_step: Box<PlanStep>,
    sort_fields: Vec<String>,
    sort_specs: Vec<SortSpec>,
    count_memory: bool,
    data: SortStepData,
}

#[derive(Debug, Default)]
struct SortStepData {
    state: StepState,
    results: Vec<MapValue>,
    current_result: i32,
}

impl Clone for SortStepData {
    // clone of step data never copies buffered rows
    fn clone(&self) -> Self {
        SortStepData::default()
    }
    fn clone_from(&mut self, _source: &Self) {
        self.reset();
    }
}

impl SortStepData {
    fn reset(&mut self) {
        self.state = StepState::Uninitialized;
        self.current_result = 0;
        self.results.clear();
    }
}

impl SortStep {
    pub(crate) fn new(r: &mut Reader, kind: StepKind) -> Result<Self, QuartzError> {
        let rr = r.read_i32()?; // result_reg
        let sp = r.read_i32()?; // state_pos, unused in this driver
        trace!("SortStep: result_reg={} state_pos={}", rr, sp);
        let mut s = SortStep {
            result_reg: rr,
            loc: Location::from_reader(r)?,
            input_step: deserialize_plan_step(r)?,
            sort_fields: r.read_string_array()?,
            sort_specs: SortSpec::read_sort_specs(r)?,
            count_memory: true,
            data: SortStepData::default(),
        };
        if kind == StepKind::Sorting2 {
            s.count_memory = r.read_bool()?;
        }
        Ok(s)
    }

    pub(crate) fn open(&mut self, req: &mut QueryRequest, handle: &Handle) -> Result<(), QuartzError> {
        self.data.state = StepState::Open;
        self.input_step.open(req, handle)
    }
    pub(crate) fn get_kind(&self) -> StepKind {
        StepKind::Sorting
    }
    pub(crate) async fn next(
        &mut self,
        req: &mut QueryRequest,
        handle: &Handle,
    ) -> Result<bool, QuartzError> {
        if self.data.state == StepState::Done {
            return Ok(false);
        }

        if self.data.state == StepState::Open {
            let mut more = self.input_step.next(req, handle).await?;

            while more {
                let mv = self.input_step.get_result(req).get_map_value()?;
                for field in &self.sort_fields {
                    if let Some(fv) = mv.get_field_value(field) {
                        if !fv.is_atomic() {
                            return ia_err!(
                                "sort expression does not return a single atomic value"
                            );
                        }
                    }
                }

                if self.count_memory {
                    req.add_memory(mv.size_estimate())?;
                }
                self.data.results.push(mv);
                more = self.input_step.next(req, handle).await?;
            }

            // a partial batch cannot be sorted yet; wait for the rest
            if req.reached_limit {
                return Ok(false);
            }

            self.data
                .results
                .sort_unstable_by(|a, b| sort_results(a, b, &self.sort_fields, &self.sort_specs));

            self.data.state = StepState::Running;
        }

        if self.data.current_result < self.data.results.len() as i32 {
            let mut mv = std::mem::take(&mut self.data.results[self.data.current_result as usize]);
            mv.convert_empty_to_null();
            self.set_result(req, FieldValue::Record(mv));
            self.data.current_result += 1;
            return Ok(true);
        }

        self.data.state = StepState::Done;
        Ok(false)
    }

    pub(crate) fn get_result(&self, req: &mut QueryRequest) -> FieldValue {
        req.get_result(self.result_reg)
    }
    pub(crate) fn set_result(&self, req: &mut QueryRequest, result: FieldValue) {
        req.set_result(self.result_reg, result);
    }
    pub(crate) fn reset(&mut self) -> Result<(), QuartzError> {
        self.data.reset();
        self.input_step.reset()
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
}
