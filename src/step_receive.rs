use crate::error::ia_err;
use crate::error::QuartzError;
use crate::error::QuartzErrorCode::BadProtocolMessage;
use crate::handle::Handle;
use crate::plan::{Location, StepKind, StepState};
use crate::query_request::QueryRequest;
use crate::reader::Reader;
use crate::step_sort::SortSpec;
use crate::types::{sort_results, FieldValue, MapValue};
use crate::writer::Writer;

use num_enum::TryFromPrimitive;
use std::cmp::Ordering;
use std::collections::{BTreeSet, HashSet, VecDeque};
use std::mem::take;
use std::result::Result;
use tracing::trace;

// ReceiveStep requests and receives results from the server. For
// sorting queries it performs a merge sort of the received results, and
// it eliminates duplicates for queries that require it (a query can do
// both).

#[derive(Debug, Default, Clone)]
pub struct ReceiveStep {
    result_reg: i32,
    #[allow(dead_code)]
    loc: Location,
    // Created during deserialization and immutable afterwards.
    distribution_kind: DistributionKind,
    // For sorting queries: the names of the top-level fields holding the
    // values to sort the received results on.
    sort_fields: Vec<String>,
    sort_specs: Vec<SortSpec>,
    // For duplicate elimination: the names of the top-level fields
    // holding the primary-key values within the received results. Empty
    // means duplicates are allowed.
    prim_key_fields: Vec<String>,

    // Created/updated during iteration; cleared by reset().
    data: ReceiveStepData,
}

// Note: purposefully does not derive Clone
#[derive(Debug, Default)]
pub(crate) struct ReceiveStepData {
    state: StepState,

    // For sorting all-partition queries: whether execution is still in
    // sort phase 1.
    pub(crate) in_sort_phase_1: bool,
    pub(crate) continuation_key: Option<Vec<u8>>,

    // The following fields hold phase-1 state of a sorting AllPartitions
    // query. Results arrive grouped by partition; pids, num_results_per_pid
    // and part_continuation_keys record, per partition, its id, how many
    // of the batched results are its, and its own continuation key.
    pub(crate) pids: Vec<i32>,
    pub(crate) num_results_per_pid: Vec<i32>,
    pub(crate) part_continuation_keys: Vec<Vec<u8>>,

    // Primary keys (in wire form) of all results seen so far, for
    // duplicate elimination.
    prim_key_set: HashSet<Vec<u8>>,

    // The remote scanner used for non-sorting queries.
    scanner: RemoteScanner,

    // The remote scanners used for sorting queries: one per shard for
    // all-shard queries, or one per partition with results for
    // all-partition queries. Ordered by their next row's sort key, so
    // popping the first scanner yields the globally next row.
    sorted_scanners: BTreeSet<RemoteScanner>,
}

impl ReceiveStepData {
    pub fn reset(&mut self) {
        self.state = StepState::Uninitialized;
        self.prim_key_set.clear();
        self.in_sort_phase_1 = true;
        self.continuation_key = None;
        self.pids = Vec::new();
        self.num_results_per_pid = Vec::new();
        self.part_continuation_keys = Vec::new();
        self.scanner = RemoteScanner::default();
        self.sorted_scanners = BTreeSet::default();
    }
}

impl Clone for ReceiveStepData {
    fn clone(&self) -> Self {
        // clone does NOT copy the ephemeral data
        let mut rid = ReceiveStepData::default();
        rid.reset();
        rid
    }
    fn clone_from(&mut self, _source: &Self) {
        self.reset();
    }
}

#[derive(Debug, Clone, Default, Eq, PartialEq, TryFromPrimitive)]
#[repr(i16)]
pub(crate) enum DistributionKind {
    // The query predicates specify a complete shard key, so the query
    // goes to a single partition using the primary index.
    #[default]
    SinglePartition = 0,
    // The query uses the primary index but does not pin a complete
    // shard key; it must be sent to all partitions.
    AllPartitions = 1,
    // The query uses a secondary index; it must be sent to all shards.
    AllShards = 2,
}

impl DistributionKind {
    pub(crate) fn try_from_i16(val: i16) -> Result<Self, QuartzError> {
        match DistributionKind::try_from(val) {
            Ok(fc) => Ok(fc),
            Err(_) => Err(QuartzError::new(
                BadProtocolMessage,
                &format!("unrecognized distribution kind {}", val),
            )),
        }
    }
}

// A cursor over one shard or partition: locally cached rows plus the
// continuation key to fetch more from the server.
#[derive(Debug, Default)]
struct RemoteScanner {
    pub is_for_shard: bool,
    pub shard_or_part_id: i32,
    pub continuation_key: Option<Vec<u8>>,
    pub more_remote_results: bool,
    pub(crate) results: VecDeque<MapValue>,

    // copied here so Ord can compare head rows
    sort_fields: Vec<String>,
    sort_specs: Vec<SortSpec>,
}

impl Ord for RemoteScanner {
    fn cmp(&self, other: &Self) -> Ordering {
        if !self.has_local_results() {
            if other.has_local_results() {
                return Ordering::Less;
            }
            if self.shard_or_part_id < other.shard_or_part_id {
                return Ordering::Less;
            }
            return Ordering::Greater;
        }
        if !other.has_local_results() {
            return Ordering::Greater;
        }
        let v1 = self.results.front().unwrap();
        let v2 = other.results.front().unwrap();
        let comp = sort_results(v1, v2, &self.sort_fields, &self.sort_specs);
        if comp != Ordering::Equal {
            return comp;
        }
        // break ties by id so distinct scanners never compare equal
        self.shard_or_part_id.cmp(&other.shard_or_part_id)
    }
}

impl PartialEq for RemoteScanner {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for RemoteScanner {}

impl PartialOrd for RemoteScanner {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl RemoteScanner {
    pub fn new(
        is_for_shard: bool,
        shard_or_part_id: i32,
        sort_fields: &Vec<String>,
        sort_specs: &Vec<SortSpec>,
    ) -> Self {
        RemoteScanner {
            is_for_shard,
            shard_or_part_id,
            more_remote_results: true,
            continuation_key: None,
            results: VecDeque::new(),
            sort_fields: sort_fields.clone(),
            sort_specs: sort_specs.clone(),
        }
    }

    pub fn is_done(&self) -> bool {
        self.results.is_empty() && !self.more_remote_results
    }

    pub fn has_local_results(&self) -> bool {
        !self.results.is_empty()
    }

    pub fn add_results(&mut self, results: VecDeque<MapValue>, cont_key: Option<Vec<u8>>) {
        self.results = results;
        self.continuation_key = None;
        if let Some(ck) = cont_key {
            if !ck.is_empty() {
                self.continuation_key = Some(ck);
            }
        }
        self.more_remote_results = self.continuation_key.is_some();
    }

    pub fn next_local(&mut self) -> Option<MapValue> {
        self.results.pop_front()
    }

    pub async fn next(
        &mut self,
        step_data: &mut ReceiveStepData,
        req: &mut QueryRequest,
        handle: &Handle,
    ) -> Result<Option<MapValue>, QuartzError> {
        if !self.results.is_empty() {
            return Ok(self.results.pop_front());
        }

        if !self.more_remote_results || req.reached_limit {
            return Ok(None);
        }

        self.fetch(step_data, req, handle).await?;

        if self.results.is_empty() {
            return Ok(None);
        }

        Ok(self.results.pop_front())
    }

    // Issue one internal batch against this scanner's shard or
    // partition, refilling the local queue.
    async fn fetch(
        &mut self,
        data: &mut ReceiveStepData,
        req: &mut QueryRequest,
        handle: &Handle,
    ) -> Result<(), QuartzError> {
        req.batch_counter += 1;
        let mut req_copy = req.copy_for_internal();
        req_copy.continuation_key = self.continuation_key.clone();
        if self.is_for_shard {
            req_copy.shard_id = self.shard_or_part_id;
        } else {
            req_copy.shard_id = -1;
        }

        trace!(
            "scanner fetch for {} {}",
            if self.is_for_shard { "shard" } else { "partition" },
            self.shard_or_part_id
        );
        let mut vr: Vec<MapValue> = Vec::new();
        req_copy.execute_batch_internal(handle, &mut vr, data).await?;

        // buffered rows count toward the query memory cap
        let mut sz: i64 = 0;
        for mv in &vr {
            sz += mv.size_estimate();
        }
        req.add_memory(sz)?;

        self.add_results(VecDeque::from(vr), req_copy.continuation_key);
        req.consumed_capacity.add(&req_copy.consumed_capacity);

        if self.more_remote_results && !req.reached_limit {
            return ia_err!("didn't reach limit but more results exist");
        }

        Ok(())
    }
}

impl ReceiveStep {
    pub(crate) fn new(r: &mut Reader) -> Result<Self, QuartzError> {
        let rr = r.read_i32()?; // result_reg
        let sp = r.read_i32()?; // state_pos, unused in this driver
        trace!("ReceiveStep: result_reg={} state_pos={}", rr, sp);
        let mut step = ReceiveStep {
            result_reg: rr,
            loc: Location::from_reader(r)?,

            // specific to ReceiveStep; immutable afterwards
            distribution_kind: DistributionKind::try_from_i16(r.read_i16()?)?,
            sort_fields: r.read_string_array()?,
            sort_specs: SortSpec::read_sort_specs(r)?,
            prim_key_fields: r.read_string_array()?,

            ..Default::default()
        };
        // creates/resets the step data (scanners, etc)
        let _ = step.reset();
        Ok(step)
    }

    pub(crate) fn open(&mut self, req: &QueryRequest, _handle: &Handle) -> Result<(), QuartzError> {
        trace!("ReceiveStep.open(): current state = {:?}", self.data.state);
        if self.data.state == StepState::Open {
            return Ok(());
        }
        if self.does_sort() && self.distribution_kind == DistributionKind::AllPartitions {
            // nothing to do; the partition scanners are created from the
            // phase-1 results
        } else if self.does_sort() && self.distribution_kind == DistributionKind::AllShards {
            let ti = &req.topology_info;
            if !ti.is_valid() {
                return ia_err!("no valid topology for an all-shard sorting query");
            }
            for shard_id in &ti.shard_ids {
                self.data.sorted_scanners.insert(RemoteScanner::new(
                    true,
                    *shard_id,
                    &self.sort_fields,
                    &self.sort_specs,
                ));
            }
        } else {
            self.data.scanner = RemoteScanner::new(false, -1, &self.sort_fields, &self.sort_specs);
        }
        self.data.state = StepState::Open;
        Ok(())
    }
    pub(crate) fn get_kind(&self) -> StepKind {
        StepKind::Recv
    }
    pub(crate) async fn next(
        &mut self,
        req: &mut QueryRequest,
        handle: &Handle,
    ) -> Result<bool, QuartzError> {
        if self.data.state.is_done() {
            return Ok(false);
        }

        if !self.does_sort() {
            return self.simple_next(req, handle).await;
        }

        self.sorting_next(req, handle).await
    }
    fn does_sort(&self) -> bool {
        !self.sort_fields.is_empty()
    }
    pub(crate) fn get_result(&self, req: &mut QueryRequest) -> FieldValue {
        req.get_result(self.result_reg)
    }
    pub(crate) fn set_result(&self, req: &mut QueryRequest, result: FieldValue) {
        req.set_result(self.result_reg, result);
    }
    // Default all values, as if this was just created by deserialization
    pub(crate) fn reset(&mut self) -> Result<(), QuartzError> {
        self.data.reset();
        Ok(())
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

    async fn simple_next(
        &mut self,
        req: &mut QueryRequest,
        handle: &Handle,
    ) -> Result<bool, QuartzError> {
        loop {
            let mut scanner = take(&mut self.data.scanner);
            let ret = scanner.next(&mut self.data, req, handle).await;
            self.data.scanner = scanner;
            let ret = ret?;
            if ret.is_none() {
                break;
            }
            let mv = ret.unwrap();
            if self.check_duplicate(req, &mv)? {
                continue;
            }
            self.set_result(req, FieldValue::Record(mv));
            return Ok(true);
        }

        if !req.reached_limit {
            self.done();
        }

        Ok(false)
    }

    fn done(&mut self) {
        self.data.reset();
        self.data.state = StepState::Done;
    }

    async fn sorting_next(
        &mut self,
        req: &mut QueryRequest,
        handle: &Handle,
    ) -> Result<bool, QuartzError> {
        if self.distribution_kind == DistributionKind::AllPartitions && self.data.in_sort_phase_1 {
            trace!("ReceiveStep.sorting_next(): running partition sort phase 1");
            self.init_partition_sort(req, handle).await?;
            return Ok(false);
        }

        loop {
            let sc = self.data.sorted_scanners.pop_first();
            if sc.is_none() {
                self.done();
                return Ok(false);
            }

            let mut scanner = sc.unwrap();
            if let Some(mut mv) = scanner.next_local() {
                if !scanner.is_done() {
                    self.data.sorted_scanners.insert(scanner);
                }
                mv.convert_empty_to_null();
                if self.check_duplicate(req, &mv)? {
                    continue;
                }
                self.set_result(req, FieldValue::Record(mv));
                return Ok(true);
            }

            // Scanner had no cached results. If it may have remote
            // results, fetch more. Otherwise throw it away (by leaving
            // it outside sorted_scanners) and continue with another.
            if scanner.is_done() {
                continue;
            }

            let mut data = take(&mut self.data);

            let fetch_res = scanner.fetch(&mut data, req, handle).await;
            self.data = data;
            fetch_res?;

            // A remote fetch ran. If the scanner got results or may have
            // more, put it back; otherwise throw it away.
            if !scanner.is_done() {
                self.data.sorted_scanners.insert(scanner);
            }

            // Only one remote fetch is allowed per batch: whether or not
            // the size limit was actually reached during the fetch, flag
            // the limit and terminate the current batch.
            req.reached_limit = true;
            break;
        }
        Ok(false)
    }

    // Phase 1 of a sorting all-partition query: execute a request that
    // returns at least one result from the partition named in the
    // continuation key and any partitions co-located with it, then set
    // up one phase-2 scanner per partition that had results.
    async fn init_partition_sort(
        &mut self,
        req: &mut QueryRequest,
        handle: &Handle,
    ) -> Result<(), QuartzError> {
        let mut req_copy = req.copy_for_internal();
        req_copy.continuation_key = self.data.continuation_key.clone();

        let mut vr: Vec<MapValue> = Vec::new();
        req_copy
            .execute_batch_internal(handle, &mut vr, &mut self.data)
            .await?;
        let mut sz: i64 = 0;
        for mv in &vr {
            sz += mv.size_estimate();
        }
        req.add_memory(sz)?;
        let mut results = VecDeque::from(vr);
        req.consumed_capacity.add(&req_copy.consumed_capacity);

        for p in 0..self.data.pids.len() {
            let pid = self.data.pids[p];
            let num_results = self.data.num_results_per_pid[p];
            let cont_key = take(&mut self.data.part_continuation_keys[p]);

            trace!("phase1: pid={} results={}", pid, num_results);

            if num_results <= 0 {
                return ia_err!("expected at least one phase-1 result for partition {}", pid);
            }

            if num_results > results.len() as i32 {
                return ia_err!("phase-1 results short of the declared per-partition count");
            }

            let mut part_results: VecDeque<MapValue> =
                VecDeque::with_capacity(num_results as usize);
            for _j in 0..num_results {
                match results.pop_front() {
                    Some(r) => part_results.push_back(r),
                    None => {
                        return ia_err!("ran out of rows reading partition results");
                    }
                }
            }

            let mut scanner = RemoteScanner::new(false, pid, &self.sort_fields, &self.sort_specs);

            scanner.add_results(part_results, Some(cont_key));
            self.data.sorted_scanners.insert(scanner);
        }

        // If the size limit was not reached during this phase-1 batch we
        // still do not start a new one here; the app drives the next
        // batch, and each remote fetch then runs with the full read
        // limit, reducing the total number of fetches.
        req.reached_limit = true;

        Ok(())
    }

    // true if this row is a duplicate and duplicates are being eliminated
    fn check_duplicate(
        &mut self,
        req: &mut QueryRequest,
        mv: &MapValue,
    ) -> Result<bool, QuartzError> {
        if self.prim_key_fields.is_empty() {
            return Ok(false);
        }
        let v = self.create_binary_prim_key(mv)?;
        let sz = v.len() as i64 + 16;
        if !self.data.prim_key_set.insert(v) {
            return Ok(true);
        }
        // the retained key counts toward the query memory cap
        req.add_memory(sz)?;
        Ok(false)
    }

    fn create_binary_prim_key(&self, mv: &MapValue) -> Result<Vec<u8>, QuartzError> {
        let mut w = Writer::new();
        for i in 0..self.prim_key_fields.len() {
            match mv.get_field_value(&self.prim_key_fields[i]) {
                Some(f) => {
                    w.write_field_value(f);
                }
                None => {
                    return ia_err!(
                        "can't create binary primary key: no field '{}' in record",
                        self.prim_key_fields[i]
                    );
                }
            }
        }
        Ok(w.buf)
    }
}
