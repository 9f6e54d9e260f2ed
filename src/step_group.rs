use crate::error::ia_err;
use crate::error::QuartzError;
use crate::handle::Handle;
use crate::plan::{deserialize_plan_step, FuncCode, Location, PlanStep, StepKind, StepState};
use crate::query_request::QueryRequest;
use crate::reader::Reader;
use crate::types::{bd_from_f64, compare_atomics_total_order, FieldType, FieldValue, MapValue};

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::mem::take;
use std::result::Result;
use tracing::{debug, trace};

// GroupStep regroups and reaggregates the partial groups and aggregates
// received from the server, which can only group within the rows each
// shard or partition saw.
#[derive(Debug, Default, Clone)]
pub struct GroupStep {
    result_reg: i32,
    #[allow(dead_code)]
    loc: Location,
    input_step: Box<PlanStep>,
    num_gb_columns: usize,
    column_names: Vec<String>,
    is_distinct: bool,
    aggr_funcs: Vec<FuncCode>,
    remove_produced_result: bool,
    count_memory: bool,

    data: GroupStepData,
}

impl GroupStep {
    pub(crate) fn new(r: &mut Reader) -> Result<Self, QuartzError> {
        let rr = r.read_i32()?; // result_reg
        let sp = r.read_i32()?; // state_pos, unused in this driver
        trace!("GroupStep: result_reg={} state_pos={}", rr, sp);
        let mut gi = GroupStep {
            result_reg: rr,
            loc: Location::from_reader(r)?,
            input_step: deserialize_plan_step(r)?,
            num_gb_columns: r.read_i32()? as usize,
            column_names: r.read_string_array()?,
            ..Default::default()
        };
        if gi.column_names.len() < gi.num_gb_columns {
            return ia_err!("group step has fewer columns than grouping columns");
        }
        let num_aggrs = gi.column_names.len() - gi.num_gb_columns;
        gi.aggr_funcs = Vec::with_capacity(num_aggrs);
        for _i in 0..num_aggrs {
            let kvcode = r.read_i16()?;
            gi.aggr_funcs.push(FuncCode::try_from_u16(kvcode as u16)?);
        }
        gi.is_distinct = r.read_bool()?;
        gi.remove_produced_result = r.read_bool()?;
        gi.count_memory = r.read_bool()?;
        Ok(gi)
    }
}

#[derive(Debug, Default, PartialEq, PartialOrd, Eq, Ord)]
struct GroupTuple {
    values: Vec<FieldValue>,
}

impl GroupTuple {
    fn clone_internal(&self) -> Self {
        let mut v: Vec<FieldValue> = Vec::with_capacity(self.values.len());
        for i in &self.values {
            v.push(i.clone_internal());
        }
        GroupTuple { values: v }
    }
    fn size_estimate(&self) -> i64 {
        let mut sz: i64 = 32;
        for v in &self.values {
            sz += v.size_estimate();
        }
        sz
    }
}

#[derive(Debug, Default, PartialEq, PartialOrd)]
enum AggrValueEnum {
    Array(Vec<FieldValue>),
    Set(BTreeSet<FieldValue>),
    Field(FieldValue),
    #[default]
    Uninitialized,
}

#[derive(Debug, Default, PartialEq, PartialOrd)]
struct AggrValue {
    func: FuncCode,
    value: AggrValueEnum,
    got_numeric_input: bool,
}

impl AggrValue {
    fn new(func: FuncCode) -> Result<Self, QuartzError> {
        let mut av = AggrValue {
            func,
            ..Default::default()
        };
        match av.func {
            FuncCode::FnCountStar
            | FuncCode::FnCount
            | FuncCode::FnCountNumbers
            | FuncCode::FnSum => {
                av.value = AggrValueEnum::Field(FieldValue::Long(0));
            }
            FuncCode::FnMin | FuncCode::FnMax => {
                av.value = AggrValueEnum::Field(FieldValue::Null);
            }
            FuncCode::ArrayCollect => {
                av.value = AggrValueEnum::Array(Vec::new());
            }
            FuncCode::ArrayCollectDistinct => {
                av.value = AggrValueEnum::Set(BTreeSet::new());
            }
            _ => {
                return ia_err!("invalid function code for group aggregate: {:?}", func);
            }
        }
        Ok(av)
    }

    fn collect(&mut self, val: FieldValue) -> Result<(), QuartzError> {
        if val.is_null() {
            return Ok(());
        }
        let FieldValue::Array(arr) = val else {
            return ia_err!(
                "invalid input for array_collect: expected Array, got {:?}",
                val.get_type()
            );
        };
        match &mut self.value {
            AggrValueEnum::Set(set) => {
                // ArrayCollectDistinct
                set.extend(arr);
            }
            AggrValueEnum::Array(a) => {
                // ArrayCollect
                a.extend(arr);
            }
            _ => {
                return ia_err!("invalid aggregator for array_collect: {:?}", self);
            }
        }
        Ok(())
    }

    fn increment(&mut self) -> Result<(), QuartzError> {
        if let AggrValueEnum::Field(sum_value) = &mut self.value {
            match sum_value {
                FieldValue::Integer(i) => *i += 1,
                FieldValue::Long(l) => *l += 1,
                FieldValue::Double(d) => *d += 1.0,
                FieldValue::Number(n) => *n += 1,
                _ => {
                    return ia_err!("can't increment count value: not numeric");
                }
            }
            return Ok(());
        }
        if self.value == AggrValueEnum::Uninitialized {
            self.value = AggrValueEnum::Field(FieldValue::Long(1));
            return Ok(());
        }
        ia_err!("can't increment aggregate value: not a field")
    }

    fn add(&mut self, val: &FieldValue) -> Result<(), QuartzError> {
        if !val.is_numeric() {
            return Ok(());
        }
        if self.value == AggrValueEnum::Uninitialized {
            self.value = AggrValueEnum::Field(val.clone_internal());
            return Ok(());
        }
        let AggrValueEnum::Field(sum_value) = &mut self.value else {
            return ia_err!("can't add to aggregate: not a field ({:?})", self);
        };
        match sum_value {
            FieldValue::Integer(i) => match val {
                FieldValue::Integer(vi) => {
                    *i += *vi;
                }
                FieldValue::Long(vl) => {
                    let l = *i as i64 + *vl;
                    self.value = AggrValueEnum::Field(FieldValue::Long(l));
                }
                FieldValue::Double(vd) => {
                    let d = *i as f64 + *vd;
                    self.value = AggrValueEnum::Field(FieldValue::Double(d));
                }
                FieldValue::Number(n) => {
                    self.value = AggrValueEnum::Field(FieldValue::Number(n + *i));
                }
                _ => {
                    return ia_err!("can't add non-numeric to numeric");
                }
            },
            FieldValue::Long(l) => match val {
                FieldValue::Integer(vi) => {
                    *l += *vi as i64;
                }
                FieldValue::Long(vl) => {
                    *l += *vl;
                }
                FieldValue::Double(vd) => {
                    let d = *l as f64 + *vd;
                    self.value = AggrValueEnum::Field(FieldValue::Double(d));
                }
                FieldValue::Number(n) => {
                    self.value = AggrValueEnum::Field(FieldValue::Number(n + *l));
                }
                _ => {
                    return ia_err!("can't add non-numeric to numeric");
                }
            },
            FieldValue::Double(d) => match val {
                FieldValue::Integer(vi) => {
                    *d += *vi as f64;
                }
                FieldValue::Long(vl) => {
                    *d += *vl as f64;
                }
                FieldValue::Double(vd) => {
                    *d += *vd;
                }
                FieldValue::Number(n) => {
                    let bd = bd_from_f64(*d)?;
                    self.value = AggrValueEnum::Field(FieldValue::Number(n + bd));
                }
                _ => {
                    return ia_err!("can't add non-numeric to numeric");
                }
            },
            FieldValue::Number(n) => match val {
                FieldValue::Integer(vi) => {
                    *n += *vi;
                }
                FieldValue::Long(vl) => {
                    *n += *vl;
                }
                FieldValue::Double(vd) => {
                    *n += bd_from_f64(*vd)?;
                }
                FieldValue::Number(vn) => {
                    *n += vn;
                }
                _ => {
                    return ia_err!("can't add non-numeric to numeric");
                }
            },
            _ => {
                return ia_err!(
                    "can't add to aggregate: expected numeric field, got {:?}",
                    sum_value
                );
            }
        }
        Ok(())
    }
}

#[derive(Debug, Default)]
struct GroupStepData {
    state: StepState,
    results: BTreeMap<GroupTuple, Vec<AggrValue>>,
    results_valid: bool,
    gb_tuple: GroupTuple,
}

impl Clone for GroupStepData {
    // clone of step data never copies accumulated groups
    fn clone(&self) -> Self {
        GroupStepData::default()
    }
    fn clone_from(&mut self, _source: &Self) {
        self.reset();
    }
}

impl GroupStepData {
    fn reset(&mut self) {
        self.state = StepState::Uninitialized;
        self.results.clear();
        self.results_valid = false;
        self.gb_tuple = GroupTuple::default();
    }
}

impl GroupStep {
    pub(crate) fn open(&mut self, req: &mut QueryRequest, handle: &Handle) -> Result<(), QuartzError> {
        self.data.state = StepState::Open;
        self.input_step.open(req, handle)?;
        Ok(())
    }
    pub(crate) fn get_kind(&self) -> StepKind {
        StepKind::Group
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
        self.data.reset();
    }

    fn finish_aggr_value(
        &self,
        aggr_tuple: &[AggrValue],
        value: AggrValueEnum,
        column: usize,
    ) -> FieldValue {
        let offset = column - self.num_gb_columns;
        let aggr_kind = aggr_tuple[offset].func;

        if aggr_kind == FuncCode::FnSum && !aggr_tuple[offset].got_numeric_input {
            return FieldValue::Null;
        }

        match value {
            AggrValueEnum::Array(arr) => FieldValue::Array(arr),
            AggrValueEnum::Set(set) => {
                let collect_array: Vec<FieldValue> = set.into_iter().collect();
                FieldValue::Array(collect_array)
            }
            AggrValueEnum::Field(f) => f,
            AggrValueEnum::Uninitialized => FieldValue::Null,
        }
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
            // drain phase: the input is exhausted and the groups are
            // handed out one by one
            if self.data.results_valid {
                if let Some((mut gb_tuple, mut aggr_tuple)) = self.data.results.pop_first() {
                    let mut mv = MapValue::new();

                    let gb_cols = self.num_gb_columns;
                    let max_cols = self.column_names.len();

                    for i in 0..gb_cols {
                        mv.put_field_value(&self.column_names[i], take(&mut gb_tuple.values[i]));
                    }
                    for i in gb_cols..max_cols {
                        let value = take(&mut aggr_tuple[i - gb_cols].value);
                        let aggr = self.finish_aggr_value(&aggr_tuple, value, i);
                        mv.put_field_value(&self.column_names[i], aggr);
                    }

                    self.set_result(req, FieldValue::Record(mv));
                    return Ok(true);
                }

                self.done();
                return Ok(false);
            }

            let more = self.input_step.next(req, handle).await?;
            if !more {
                if req.reached_limit {
                    return Ok(false);
                }
                if self.num_gb_columns == self.column_names.len() {
                    self.done();
                    return Ok(false);
                }
                self.data.results_valid = true;
                continue;
            }

            let mut i: usize = 0;
            let mut in_tuple: MapValue = self.input_step.get_result(req).get_map_value()?;

            while i < self.num_gb_columns {
                let mut col_value = in_tuple.get_field_value_clone(&self.column_names[i]);
                if col_value.is_none() {
                    if self.is_distinct {
                        col_value = Some(FieldValue::Null);
                    } else {
                        break;
                    }
                }
                if self.data.gb_tuple.values.len() > i {
                    self.data.gb_tuple.values[i] = col_value.unwrap();
                } else {
                    self.data.gb_tuple.values.push(col_value.unwrap());
                }
                i += 1;
            }

            // a tuple missing a grouping column contributes nothing
            if i < self.num_gb_columns {
                continue;
            }

            debug!("grouping tuple {:?}", self.data.gb_tuple);
            let mut results = take(&mut self.data.results);
            if let Some(aggr_tuple) = results.get_mut(&self.data.gb_tuple) {
                // existing group: fold the aggregate columns in
                for i in self.num_gb_columns..self.column_names.len() {
                    self.aggregate(
                        aggr_tuple,
                        i,
                        in_tuple.take_field_value(&self.column_names[i])?,
                    )?;
                }
                self.data.results = results;
                continue;
            }

            // new group
            let num_aggr_columns = self.column_names.len() - self.num_gb_columns;
            let mut gb_tuple = GroupTuple::default();
            let mut aggr_tuple: Vec<AggrValue> = Vec::new();

            for i in 0..num_aggr_columns {
                aggr_tuple.push(AggrValue::new(self.aggr_funcs[i])?);
            }

            for i in 0..self.num_gb_columns {
                gb_tuple
                    .values
                    .push(self.data.gb_tuple.values[i].clone_internal());
            }

            if self.count_memory {
                req.add_memory(gb_tuple.size_estimate())?;
            }

            for i in self.num_gb_columns..self.column_names.len() {
                self.aggregate(
                    &mut aggr_tuple,
                    i,
                    in_tuple.take_field_value(&self.column_names[i])?,
                )?;
            }

            if self.num_gb_columns == self.column_names.len() {
                // pure DISTINCT: the group itself is the result
                results.insert(gb_tuple.clone_internal(), aggr_tuple);
                self.data.results = results;
                let mut res = MapValue::new();
                for i in 0..self.num_gb_columns {
                    res.put_field_value(&self.column_names[i], take(&mut gb_tuple.values[i]));
                }
                self.set_result(req, FieldValue::Record(res));
                return Ok(true);
            }

            results.insert(gb_tuple, aggr_tuple);
            self.data.results = results;
        }
    }

    pub(crate) fn reset(&mut self) -> Result<(), QuartzError> {
        self.input_step.reset()?;
        self.data.reset();
        Ok(())
    }

    fn aggregate(
        &self,
        aggr_values: &mut [AggrValue],
        column: usize,
        val: FieldValue,
    ) -> Result<(), QuartzError> {
        let offset = column - self.num_gb_columns;
        let aggr_kind = aggr_values[offset].func;
        let val_type = val.get_type();

        match aggr_kind {
            FuncCode::FnCount => {
                if val.is_null() {
                    return Ok(());
                }
                aggr_values[offset].increment()?;
            }
            FuncCode::FnCountNumbers => {
                if val.is_null() || !val.is_numeric() {
                    return Ok(());
                }
                aggr_values[offset].increment()?;
            }
            FuncCode::FnCountStar => {
                aggr_values[offset].increment()?;
            }
            FuncCode::FnSum => {
                if val.is_null() || !val.is_numeric() {
                    return Ok(());
                }
                aggr_values[offset].add(&val)?;
                aggr_values[offset].got_numeric_input = true;
            }
            FuncCode::FnMin | FuncCode::FnMax => {
                match val_type {
                    FieldType::Binary
                    | FieldType::Array
                    | FieldType::Map
                    | FieldType::Record
                    | FieldType::Empty
                    | FieldType::Null
                    | FieldType::JsonNull => {
                        return Ok(());
                    }
                    _ => (),
                }
                if aggr_values[offset].value == AggrValueEnum::Uninitialized {
                    aggr_values[offset].value = AggrValueEnum::Field(val);
                    return Ok(());
                }
                let cmp: Ordering;
                if let AggrValueEnum::Field(aval) = &aggr_values[offset].value {
                    cmp = compare_atomics_total_order(aval, &val);
                } else {
                    return ia_err!("can't do MIN/MAX: existing value is not a field");
                }
                if aggr_kind == FuncCode::FnMin {
                    if cmp != Ordering::Greater {
                        return Ok(());
                    }
                } else if cmp != Ordering::Less {
                    return Ok(());
                }
                aggr_values[offset].value = AggrValueEnum::Field(val);
            }
            FuncCode::ArrayCollect | FuncCode::ArrayCollectDistinct => {
                aggr_values[offset].collect(val)?;
            }
            _ => {
                return ia_err!("aggregation not implemented for {:?}", aggr_kind);
            }
        }
        Ok(())
    }
}
