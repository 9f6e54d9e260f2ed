use std::collections::HashMap;
use std::fmt::Debug;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tracing::trace;

use crate::cancel::{sleep_honoring, CancellationToken};
use crate::error::QuartzError;
use crate::error::QuartzErrorCode::RequestTimeout;
use crate::types::{CapacityMode, TableLimits};

// The service-published per-table throughput cap, used for on-demand
// tables which carry no provisioned limits.
const ON_DEMAND_MAX_UNITS: f64 = 10_000.0;

// How far into the past the bucket may accumulate credit. One second of
// credit lets short bursts through at full speed while holding the
// long-run average at the configured limit.
const BURST_WINDOW: Duration = Duration::from_secs(1);

/// A client-side limiter for one direction (read or write) of one table.
///
/// Implementations must be internally thread-safe. `reserve` never
/// sleeps: it accounts for the requested units and returns how long the
/// caller must wait before proceeding, which keeps the locking scheme
/// independent of the async runtime.
pub trait RateLimiter: Send + Sync + Debug {
    /// Account for `units` and return the wait the caller owes. If the
    /// implied wait would exceed `max_wait`, nothing is consumed and
    /// `None` is returned.
    fn reserve(&self, units: f64, max_wait: Duration) -> Option<Duration>;

    /// Feedback after a response: charge units consumed beyond the
    /// up-front estimate. Never waits.
    fn record_actual(&self, units: f64);

    /// Replace the units-per-second limit, typically from a fresh table
    /// description.
    fn update_limit(&self, units_per_second: f64);

    fn limit(&self) -> f64;
}

/// Factory for limiter instances, letting applications plug in their own
/// implementation.
pub type RateLimiterFactory = fn(units_per_second: f64) -> Arc<dyn RateLimiter>;

pub(crate) fn default_rate_limiter_factory(units_per_second: f64) -> Arc<dyn RateLimiter> {
    Arc::new(SimpleRateLimiter::new(units_per_second))
}

/// The default smoothed token bucket.
///
/// State is a single instant, `next`: the time at which the bucket is
/// exactly empty. Consuming units pushes `next` forward by
/// `units / limit` seconds; a `next` in the past represents accumulated
/// credit, bounded by the burst window.
#[derive(Debug)]
pub struct SimpleRateLimiter {
    inner: Mutex<LimiterState>,
}

#[derive(Debug)]
struct LimiterState {
    units_per_second: f64,
    next: Instant,
}

impl SimpleRateLimiter {
    pub fn new(units_per_second: f64) -> SimpleRateLimiter {
        SimpleRateLimiter {
            inner: Mutex::new(LimiterState {
                units_per_second,
                next: Instant::now() - BURST_WINDOW,
            }),
        }
    }

    fn push(state: &mut LimiterState, units: f64) {
        if state.units_per_second <= 0.0 {
            return;
        }
        let secs = units / state.units_per_second;
        state.next += Duration::from_secs_f64(secs);
    }
}

impl RateLimiter for SimpleRateLimiter {
    fn reserve(&self, units: f64, max_wait: Duration) -> Option<Duration> {
        let mut state = self.inner.lock().unwrap();
        if state.units_per_second <= 0.0 || units <= 0.0 {
            return Some(Duration::ZERO);
        }
        let now = Instant::now();
        // cap accumulated credit at the burst window
        if state.next < now - BURST_WINDOW {
            state.next = now - BURST_WINDOW;
        }
        let wait = if state.next > now {
            state.next - now
        } else {
            Duration::ZERO
        };
        if wait > max_wait {
            return None;
        }
        Self::push(&mut state, units);
        Some(wait)
    }

    fn record_actual(&self, units: f64) {
        if units <= 0.0 {
            return;
        }
        let mut state = self.inner.lock().unwrap();
        Self::push(&mut state, units);
    }

    fn update_limit(&self, units_per_second: f64) {
        let mut state = self.inner.lock().unwrap();
        state.units_per_second = units_per_second;
    }

    fn limit(&self) -> f64 {
        self.inner.lock().unwrap().units_per_second
    }
}

// The read and write limiters for one table.
#[derive(Debug, Clone)]
pub(crate) struct LimiterPair {
    pub read: Arc<dyn RateLimiter>,
    pub write: Arc<dyn RateLimiter>,
}

// Registry of limiter pairs, keyed by (compartment, table name).
// Entries are created on first observation of a table's limits and
// updated on subsequent descriptions.
#[derive(Debug)]
pub(crate) struct RateLimiterMap {
    map: Mutex<HashMap<String, LimiterPair>>,
    // this client's share of the table's published units
    percent: f64,
    factory: RateLimiterFactory,
}

impl RateLimiterMap {
    pub fn new(percent: f64, factory: RateLimiterFactory) -> RateLimiterMap {
        RateLimiterMap {
            map: Mutex::new(HashMap::new()),
            percent,
            factory,
        }
    }

    fn key(compartment: &str, table_name: &str) -> String {
        format!("{}:{}", compartment, table_name.to_lowercase())
    }

    pub fn get(&self, compartment: &str, table_name: &str) -> Option<LimiterPair> {
        let map = self.map.lock().unwrap();
        map.get(&Self::key(compartment, table_name)).cloned()
    }

    // Create or update the pair for a table from its latest description.
    pub fn update(&self, compartment: &str, table_name: &str, limits: &TableLimits) {
        let (read_units, write_units) = match limits.mode {
            CapacityMode::Provisioned => (limits.read_units as f64, limits.write_units as f64),
            CapacityMode::OnDemand => (ON_DEMAND_MAX_UNITS, ON_DEMAND_MAX_UNITS),
        };
        let rl = read_units * self.percent / 100.0;
        let wl = write_units * self.percent / 100.0;
        let mut map = self.map.lock().unwrap();
        let key = Self::key(compartment, table_name);
        match map.get(&key) {
            Some(pair) => {
                pair.read.update_limit(rl);
                pair.write.update_limit(wl);
            }
            None => {
                trace!("creating rate limiters for {}: r={} w={}", key, rl, wl);
                map.insert(
                    key,
                    LimiterPair {
                        read: (self.factory)(rl),
                        write: (self.factory)(wl),
                    },
                );
            }
        }
    }

    pub fn remove(&self, compartment: &str, table_name: &str) {
        let mut map = self.map.lock().unwrap();
        map.remove(&Self::key(compartment, table_name));
    }
}

// Acquire `units` from a limiter, sleeping cooperatively. Fails with
// RequestTimeout if the implied wait would pass the deadline, with
// RequestCancelled if the token fires first. Returns the delay slept.
pub(crate) async fn consume(
    limiter: &Arc<dyn RateLimiter>,
    units: f64,
    deadline: Instant,
    cancel: Option<&CancellationToken>,
) -> Result<Duration, QuartzError> {
    let now = Instant::now();
    let max_wait = if deadline > now {
        deadline - now
    } else {
        Duration::ZERO
    };
    match limiter.reserve(units, max_wait) {
        Some(wait) => {
            if wait > Duration::ZERO {
                trace!("rate limiter delaying {:?}", wait);
                sleep_honoring(wait, cancel).await?;
            }
            Ok(wait)
        }
        None => Err(QuartzError::new(
            RequestTimeout,
            "rate limiter could not acquire units before the operation deadline",
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_burst_then_pace() {
        let rl = SimpleRateLimiter::new(100.0);
        // one second of burst credit: 100 units go through immediately
        let w = rl.reserve(100.0, Duration::from_secs(60)).unwrap();
        assert_eq!(w, Duration::ZERO);
        // next 100 units are roughly immediate (credit just used up)
        let w = rl.reserve(100.0, Duration::from_secs(60)).unwrap();
        assert!(w < Duration::from_millis(50));
        // now the bucket is a full second ahead; 50 more units owe ~1s
        let w = rl.reserve(50.0, Duration::from_secs(60)).unwrap();
        assert!(w >= Duration::from_millis(900), "wait was {:?}", w);
        assert!(w <= Duration::from_millis(1100), "wait was {:?}", w);
    }

    #[test]
    fn test_reserve_respects_max_wait() {
        let rl = SimpleRateLimiter::new(10.0);
        // exhaust credit plus several seconds of future capacity
        let _ = rl.reserve(50.0, Duration::from_secs(60)).unwrap();
        // a tiny max_wait cannot be satisfied and must not consume
        assert!(rl.reserve(1.0, Duration::from_millis(1)).is_none());
        // probe with a negligible amount: the schedule is unchanged,
        // still roughly four seconds out
        let before = rl.reserve(0.001, Duration::from_secs(60)).unwrap();
        assert!(before >= Duration::from_secs(3));
    }

    #[test]
    fn test_record_actual_pushes_schedule() {
        let rl = SimpleRateLimiter::new(100.0);
        let _ = rl.reserve(100.0, Duration::from_secs(60)).unwrap();
        let w1 = rl.reserve(0.001, Duration::from_secs(60)).unwrap();
        rl.record_actual(100.0);
        let w2 = rl.reserve(0.001, Duration::from_secs(60)).unwrap();
        assert!(w2 > w1);
    }

    #[test]
    fn test_zero_limit_never_waits() {
        let rl = SimpleRateLimiter::new(0.0);
        let w = rl.reserve(1000.0, Duration::ZERO).unwrap();
        assert_eq!(w, Duration::ZERO);
    }

    #[test]
    fn test_registry_percent_scaling() {
        let map = RateLimiterMap::new(50.0, default_rate_limiter_factory);
        map.update("", "users", &TableLimits::provisioned(200, 100, 10));
        let pair = map.get("", "Users").unwrap();
        assert_eq!(pair.read.limit(), 100.0);
        assert_eq!(pair.write.limit(), 50.0);
        // a fresh description updates in place
        map.update("", "users", &TableLimits::provisioned(400, 100, 10));
        assert_eq!(pair.read.limit(), 200.0);
    }

    #[test]
    fn test_registry_on_demand_uses_service_cap() {
        let map = RateLimiterMap::new(100.0, default_rate_limiter_factory);
        map.update("c1", "t1", &TableLimits::on_demand(10));
        let pair = map.get("c1", "t1").unwrap();
        assert_eq!(pair.read.limit(), ON_DEMAND_MAX_UNITS);
    }
}
