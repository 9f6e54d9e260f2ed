use rand::Rng;
use std::time::Duration;

use crate::error::QuartzError;
use crate::types::OpCode;

// Ceiling on any single computed back-off delay.
const MAX_BACKOFF: Duration = Duration::from_secs(10);

/// Retry policy for transient failures.
///
/// The classifier lives on [`QuartzError::is_retryable`]; this config
/// bounds how often and how fast retries happen. Delays grow
/// exponentially from `base_delay` with random jitter, and the whole
/// retry loop is additionally bounded by the operation deadline: the
/// total elapsed time including retries always fits within the
/// operation timeout.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of retries after the initial attempt.
    pub max_retries: u32,
    /// Base delay for the exponential back-off.
    pub base_delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        RetryConfig {
            max_retries: 5,
            base_delay: Duration::from_millis(200),
        }
    }
}

impl RetryConfig {
    /// Decide whether another attempt should be made for the given error
    /// at the given retry count. Reads are retried through the full
    /// budget; writes stop at half of it, since a timed-out write may
    /// have been applied server-side.
    pub(crate) fn should_retry(&self, err: &QuartzError, retries: u32, op: OpCode) -> bool {
        if !err.is_retryable() {
            return false;
        }
        let cap = match op {
            OpCode::Put
            | OpCode::PutIfAbsent
            | OpCode::PutIfPresent
            | OpCode::PutIfVersion
            | OpCode::Delete
            | OpCode::DeleteIfVersion
            | OpCode::WriteMultiple
            | OpCode::MultiDelete => std::cmp::max(1, self.max_retries / 2),
            _ => self.max_retries,
        };
        retries < cap
    }

    /// Compute the back-off before the given retry (1-based): an
    /// exponentially growing delay with up to one base-delay of jitter.
    pub(crate) fn backoff(&self, retries: u32) -> Duration {
        let shift = std::cmp::min(retries.saturating_sub(1), 16);
        let exp = self.base_delay.saturating_mul(1u32 << shift);
        let capped = std::cmp::min(exp, MAX_BACKOFF);
        let jitter_ms = rand::thread_rng().gen_range(0..=self.base_delay.as_millis() as u64);
        capped + Duration::from_millis(jitter_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::QuartzErrorCode;

    #[test]
    fn test_backoff_grows_and_caps() {
        let cfg = RetryConfig {
            max_retries: 10,
            base_delay: Duration::from_millis(100),
        };
        let d1 = cfg.backoff(1);
        assert!(d1 >= Duration::from_millis(100));
        assert!(d1 <= Duration::from_millis(200));
        let d4 = cfg.backoff(4);
        assert!(d4 >= Duration::from_millis(800));
        // far past the cap
        let d20 = cfg.backoff(20);
        assert!(d20 <= MAX_BACKOFF + cfg.base_delay);
    }

    #[test]
    fn test_writes_get_smaller_budget() {
        let cfg = RetryConfig::default();
        let err = QuartzError::new(QuartzErrorCode::ServerError, "boom");
        assert!(cfg.should_retry(&err, 4, OpCode::Get));
        assert!(!cfg.should_retry(&err, 4, OpCode::Put));
        assert!(cfg.should_retry(&err, 1, OpCode::Put));
    }

    #[test]
    fn test_non_retryable_never_retries() {
        let cfg = RetryConfig::default();
        let err = QuartzError::new(QuartzErrorCode::IllegalArgument, "bad");
        assert!(!cfg.should_retry(&err, 0, OpCode::Get));
    }
}
