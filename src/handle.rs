use reqwest::header::{HeaderMap, HeaderValue};
use std::result::Result;
use std::sync::atomic::{AtomicBool, AtomicI16, AtomicUsize, Ordering};
use std::sync::Arc;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::{debug, trace};

use crate::auth::AuthorizationProvider;
use crate::cancel::{sleep_honoring, CancellationToken};
use crate::error::QuartzErrorCode::{
    InternalRetry, InvalidAuthorization, OperationNotSupported, ReadThrottled, RequestCancelled,
    RequestSizeLimitExceeded, RequestTimeout, RetryAuthentication, SecurityInfoUnavailable,
    StorageThrottled, UnsupportedProtocol, WriteThrottled,
};
use crate::error::{user_agent, QuartzError};
use crate::handle_builder::{HandleBuilder, ServiceMode};
use crate::http::{HttpTransport, ReqwestTransport};
use crate::rate_limiter::{consume, RateLimiterMap};
use crate::reader::Reader;
use crate::tagged::{
    MapWalker, PREV4_SENTINEL_LEGACY, PREV4_SENTINEL_UNSUPPORTED, REQUEST_SIZE_LIMIT,
    SERIAL_VERSION_3, SERIAL_VERSION_4,
};
use crate::types::{Capacity, OpCode, TableLimits, TopologyInfo};
use crate::writer::Writer;

/// **The main database handle**.
///
/// This should be created once and used throughout the application
/// lifetime, across all threads. A handle multiplexes any number of
/// concurrent operations over a pooled HTTP transport; internal state is
/// guarded per field, so no external synchronization is needed.
///
/// Note: there is no need to enclose this struct in an `Rc` or [`Arc`],
/// as it uses an [`Arc`] internally; calling `.clone()` returns the same
/// underlying handle.
#[derive(Clone, Debug)]
pub struct Handle {
    // Use an inner Arc so cloning keeps the same contents
    pub(crate) inner: Arc<HandleRef>,
}

#[derive(Debug)]
pub(crate) struct HandleRef {
    pub(crate) transport: Arc<dyn HttpTransport>,
    pub(crate) endpoint: String,
    pub(crate) builder: HandleBuilder,
    pub(crate) auth: Box<dyn AuthorizationProvider>,
    pub(crate) limiters: Option<RateLimiterMap>,
    // current serial version; only ever decremented, under CAS
    serial_version: AtomicI16,
    // shard topology; only ever advances by sequence number
    topology: Mutex<TopologyInfo>,
    request_id: AtomicUsize,
    timeout: Duration,
    closed: AtomicBool,
}

// Per-call context threaded through the dispatcher: the operation kind,
// its deadline, routing fields, and the accumulated retry state.
#[derive(Debug)]
pub(crate) struct SendOptions {
    pub(crate) op: OpCode,
    pub(crate) timeout: Duration,
    pub(crate) deadline: Instant,
    pub(crate) retries: u32,
    pub(crate) compartment_id: String,
    pub(crate) namespace: String,
    pub(crate) table_name: String,
    pub(crate) cancel: Option<CancellationToken>,
    pub(crate) auth_refreshed: bool,
    // total delay imposed by the rate limiters for this operation
    pub(crate) rate_delay: Duration,
}

impl SendOptions {
    pub(crate) fn new(op: OpCode, timeout: Duration) -> SendOptions {
        SendOptions {
            op,
            timeout,
            deadline: Instant::now() + timeout,
            retries: 0,
            compartment_id: String::new(),
            namespace: String::new(),
            table_name: String::new(),
            cancel: None,
            auth_refreshed: false,
            rate_delay: Duration::ZERO,
        }
    }
    pub(crate) fn table(mut self, table_name: &str) -> SendOptions {
        self.table_name = table_name.to_string();
        self
    }
    pub(crate) fn compartment(mut self, compartment_id: &str) -> SendOptions {
        self.compartment_id = compartment_id.to_string();
        self
    }
    pub(crate) fn namespace(mut self, namespace: &str) -> SendOptions {
        self.namespace = namespace.to_string();
        self
    }
    pub(crate) fn cancellation(mut self, cancel: &Option<CancellationToken>) -> SendOptions {
        self.cancel = cancel.clone();
        self
    }
}

// Estimated (read, write) units charged up front when rate limiting.
// Actual consumption beyond the estimate is fed back after the response.
fn op_units(op: OpCode) -> (f64, f64) {
    match op {
        OpCode::Get | OpCode::Query | OpCode::Prepare => (1.0, 0.0),
        OpCode::Put
        | OpCode::PutIfAbsent
        | OpCode::PutIfPresent
        | OpCode::PutIfVersion
        | OpCode::Delete
        | OpCode::DeleteIfVersion
        | OpCode::MultiDelete
        | OpCode::WriteMultiple => (0.0, 1.0),
        _ => (0.0, 0.0),
    }
}

impl Handle {
    /// Create a new [`HandleBuilder`].
    pub fn builder() -> HandleBuilder {
        HandleBuilder::new()
    }

    // Create the new Handle based on builder configuration
    pub(crate) async fn new(b: &HandleBuilder) -> Result<Handle, QuartzError> {
        use crate::error::ia_err;
        if b.endpoint.is_empty() {
            if b.from_environment {
                return ia_err!("can't determine QuartzDB endpoint: set QUARTZDB_ENDPOINT");
            }
            return ia_err!("can't determine QuartzDB endpoint: call HandleBuilder::endpoint()");
        }

        let builder = b.clone();
        // default timeout to 30 seconds
        let timeout = builder.timeout.unwrap_or(Duration::new(30, 0));

        let transport: Arc<dyn HttpTransport> = match &builder.transport {
            Some(t) => t.clone(),
            None => {
                let c = match &builder.client {
                    Some(c) => c.clone(),
                    None => {
                        let mut cb = reqwest::Client::builder()
                            .timeout(timeout)
                            .connect_timeout(timeout)
                            .cookie_store(true);
                        if let Some(cert) = &builder.add_cert {
                            cb = cb.add_root_certificate(cert.clone());
                        }
                        if builder.accept_invalid_certs {
                            cb = cb.danger_accept_invalid_certs(true);
                        }
                        cb.build()?
                    }
                };
                Arc::new(ReqwestTransport::new(c))
            }
        };

        // normalize endpoint to "http[s]://{endpoint}/V2/quartz/data"
        let mut ep = String::from("http");
        if builder.use_https {
            ep.push('s');
        }
        ep.push_str("://");
        ep.push_str(&builder.endpoint);
        ep.push_str("/V2/quartz/data");

        // rate limiting only applies where table limits exist
        let limiters = if builder.rate_limiting_enabled && builder.mode != ServiceMode::KVStore {
            Some(RateLimiterMap::new(
                builder.rate_limiter_percent,
                builder.rate_limiter_factory,
            ))
        } else {
            None
        };

        let auth = builder.effective_auth();
        debug!("creating new Handle: {:?}, endpoint={}", builder.mode, ep);
        Ok(Handle {
            inner: Arc::new(HandleRef {
                transport,
                endpoint: ep,
                auth,
                limiters,
                builder,
                serial_version: AtomicI16::new(SERIAL_VERSION_4),
                topology: Mutex::new(TopologyInfo {
                    seq_num: -1,
                    shard_ids: Vec::new(),
                }),
                request_id: AtomicUsize::new(1),
                timeout,
                closed: AtomicBool::new(false),
            }),
        })
    }

    /// Close the handle.
    ///
    /// In-flight operations run to completion; subsequent calls fail
    /// with an IllegalState error. Transport sockets are released when
    /// the last in-flight operation finishes.
    pub async fn close(&self) {
        self.inner.closed.store(true, Ordering::SeqCst);
    }

    pub(crate) fn serial_version(&self) -> i16 {
        self.inner.serial_version.load(Ordering::SeqCst)
    }

    // Move the serial version one step below `observed`, as a guarded
    // compare-and-swap so concurrent observers produce at most one
    // effective downgrade. Returns false when no further downgrade is
    // possible.
    pub(crate) fn decrement_serial_version(&self, observed: i16) -> bool {
        if observed <= SERIAL_VERSION_3 {
            return false;
        }
        match self.inner.serial_version.compare_exchange(
            observed,
            observed - 1,
            Ordering::SeqCst,
            Ordering::SeqCst,
        ) {
            Ok(_) => true,
            // another request already downgraded past us; retry with
            // whatever is current
            Err(current) => current < observed,
        }
    }

    pub(crate) fn topo_seq_num(&self) -> i32 {
        self.inner.topology.lock().unwrap().seq_num
    }

    pub(crate) fn topology(&self) -> TopologyInfo {
        self.inner.topology.lock().unwrap().clone()
    }

    pub(crate) fn update_topology(&self, ti: &TopologyInfo) {
        if !ti.is_valid() {
            return;
        }
        let mut cur = self.inner.topology.lock().unwrap();
        if ti.seq_num > cur.seq_num {
            trace!("topology advanced to seq_num={}", ti.seq_num);
            *cur = ti.clone();
        }
    }

    pub(crate) fn get_timeout(&self, t: &Option<Duration>) -> Duration {
        // if t is given, use that. If not, use the handle's default.
        if let Some(d) = t {
            return *d;
        }
        self.inner.timeout
    }

    pub(crate) fn table_poll_timeout(&self) -> Option<Duration> {
        self.inner.builder.table_poll_timeout
    }

    pub(crate) fn poll_delay(&self) -> Duration {
        self.inner.builder.poll_delay
    }

    pub(crate) fn max_memory_bytes(&self) -> i64 {
        (self.inner.builder.max_memory_mb as i64) * 1024 * 1024
    }

    pub(crate) fn check_cloud_only(&self, what: &str) -> Result<(), QuartzError> {
        if self.inner.builder.mode == ServiceMode::KVStore {
            return Err(QuartzError::new(
                OperationNotSupported,
                &format!("{} is only supported by the cloud service", what),
            ));
        }
        Ok(())
    }

    pub(crate) fn check_onprem_only(&self, what: &str) -> Result<(), QuartzError> {
        if self.inner.builder.mode != ServiceMode::KVStore {
            return Err(QuartzError::new(
                OperationNotSupported,
                &format!("{} is only supported by on-premise stores", what),
            ));
        }
        Ok(())
    }

    // Create or refresh the rate limiters for a table from its latest
    // description.
    pub(crate) fn update_limiters(
        &self,
        compartment: &str,
        table_name: &str,
        limits: &Option<TableLimits>,
    ) {
        if let (Some(map), Some(l)) = (&self.inner.limiters, limits) {
            map.update(compartment, table_name, l);
        }
    }

    // A throttle reply means the server saw more load on the table than
    // the local schedule predicted. Push the offending limiter back a
    // full second of units so the retry does not throttle again
    // immediately.
    fn apply_throttle_feedback(&self, opts: &SendOptions, err: &QuartzError) {
        let Some(map) = &self.inner.limiters else {
            return;
        };
        if opts.table_name.is_empty() {
            return;
        }
        if let Some(pair) = map.get(&opts.compartment_id, &opts.table_name) {
            match err.code {
                ReadThrottled => pair.read.record_actual(pair.read.limit()),
                WriteThrottled | StorageThrottled => {
                    pair.write.record_actual(pair.write.limit())
                }
                _ => (),
            }
        }
    }

    // Feed actual consumed capacity back into the limiters after a
    // successful operation.
    pub(crate) fn apply_rate_feedback(&self, opts: &SendOptions, consumed: &Capacity) {
        let Some(map) = &self.inner.limiters else {
            return;
        };
        if opts.table_name.is_empty() {
            return;
        }
        if let Some(pair) = map.get(&opts.compartment_id, &opts.table_name) {
            let (r_est, w_est) = op_units(opts.op);
            let extra_r = consumed.read_units as f64 - r_est;
            if extra_r > 0.0 {
                pair.read.record_actual(extra_r);
            }
            let extra_w = consumed.write_units as f64 - w_est;
            if extra_w > 0.0 {
                pair.write.record_actual(extra_w);
            }
        }
    }

    fn timeout_error(opts: &SendOptions, last: Option<&QuartzError>) -> QuartzError {
        let mut msg = format!(
            "operation timed out after {:?} ({} retries)",
            opts.timeout, opts.retries
        );
        if let Some(e) = last {
            msg.push_str(&format!("; last error: {}", e));
        }
        QuartzError::new(RequestTimeout, &msg)
    }

    // Dispatch loop: rate-limit acquire, send, then classify failures
    // into immediate internal retries, backed-off retries, or surfaced
    // errors. The whole loop is bounded by the operation deadline.
    pub(crate) async fn send_and_receive(
        &self,
        mut w: Writer,
        opts: &mut SendOptions,
    ) -> Result<Reader, QuartzError> {
        use crate::error::is_err;
        if self.inner.closed.load(Ordering::SeqCst) {
            return is_err!("handle has been closed");
        }
        if self.inner.builder.mode != ServiceMode::KVStore && w.size() > REQUEST_SIZE_LIMIT {
            return Err(QuartzError::new(
                RequestSizeLimitExceeded,
                &format!(
                    "serialized request size {} exceeds limit of {}",
                    w.size(),
                    REQUEST_SIZE_LIMIT
                ),
            ));
        }
        opts.retries = 0;
        let mut last_err: Option<QuartzError> = None;
        loop {
            if let Some(tok) = &opts.cancel {
                tok.check()?;
            }
            if Instant::now() >= opts.deadline {
                return Err(Self::timeout_error(opts, last_err.as_ref()));
            }

            if let Some(map) = &self.inner.limiters {
                if !opts.table_name.is_empty() {
                    if let Some(pair) = map.get(&opts.compartment_id, &opts.table_name) {
                        let (r_est, w_est) = op_units(opts.op);
                        if r_est > 0.0 {
                            opts.rate_delay +=
                                consume(&pair.read, r_est, opts.deadline, opts.cancel.as_ref())
                                    .await?;
                        }
                        if w_est > 0.0 {
                            opts.rate_delay +=
                                consume(&pair.write, w_est, opts.deadline, opts.cancel.as_ref())
                                    .await?;
                        }
                    }
                }
            }

            match self.send_and_receive_once(&mut w, opts).await {
                Ok(r) => return Ok(r),
                Err(e) => {
                    if e.code == InternalRetry {
                        opts.retries += 1;
                        continue;
                    }
                    // throttles back off like any retryable error, but
                    // the better answer is rate limiting: teach the
                    // limiter about the overload first
                    if e.is_throttle() {
                        self.apply_throttle_feedback(opts, &e);
                    }
                    if !self
                        .inner
                        .builder
                        .retry_config
                        .should_retry(&e, opts.retries, opts.op)
                    {
                        return Err(e);
                    }
                    opts.retries += 1;
                    let delay = self.inner.builder.retry_config.backoff(opts.retries);
                    if Instant::now() + delay >= opts.deadline {
                        return Err(Self::timeout_error(opts, Some(&e)));
                    }
                    trace!(
                        "retry {} for {:?} after {:?}: {}",
                        opts.retries,
                        opts.op,
                        delay,
                        e
                    );
                    sleep_honoring(delay, opts.cancel.as_ref()).await?;
                    last_err = Some(e);
                }
            }
        }
    }

    pub(crate) async fn send_and_receive_once(
        &self,
        w: &mut Writer,
        opts: &mut SendOptions,
    ) -> Result<Reader, QuartzError> {
        // the serial version prefix reflects the current negotiated
        // version on every attempt, including downgrade retries
        let sent_version = self.serial_version();
        w.write_i16_at_offset(sent_version, 0)?;

        let bytes = self.post_data(&w.buf, opts).await?;

        if !bytes.is_empty()
            && (bytes[0] == PREV4_SENTINEL_UNSUPPORTED || bytes[0] == PREV4_SENTINEL_LEGACY)
        {
            if self.decrement_serial_version(sent_version) {
                debug!(
                    "server rejected serial version {}; retrying with {}",
                    sent_version,
                    self.serial_version()
                );
                return Err(QuartzError::new(InternalRetry, ""));
            }
            return Err(QuartzError::new(
                UnsupportedProtocol,
                "server does not support any serial version known to this client",
            ));
        }

        let mut r = Reader::new().from_bytes(&bytes);
        let m = MapWalker::check_reader_for_error(&mut r);
        if m.is_ok() {
            return Ok(r);
        }
        let err = m.unwrap_err();

        // Auth errors may clear after refreshing credentials. Allow a
        // single forced refresh per operation, then retry once.
        if !opts.auth_refreshed
            && (err.code == SecurityInfoUnavailable
                || err.code == RetryAuthentication
                || err.code == InvalidAuthorization)
        {
            opts.auth_refreshed = true;
            match self.inner.auth.refresh() {
                Ok(true) => {
                    trace!("refreshed auth provider: retrying");
                    return Err(QuartzError::new(InternalRetry, ""));
                }
                Ok(false) => {
                    trace!("auth provider had nothing to refresh");
                }
                Err(e) => {
                    return Err(QuartzError::new(
                        err.code,
                        &format!("error refreshing authorization provider: {}", e),
                    ));
                }
            }
        }
        Err(err)
    }

    async fn post_data(
        &self,
        data: &Vec<u8>,
        opts: &mut SendOptions,
    ) -> Result<bytes::Bytes, QuartzError> {
        let request_id = self.inner.request_id.fetch_add(1, Ordering::Relaxed);
        let mut headers = HeaderMap::new();
        headers.insert("x-quartz-request-id", HeaderValue::from(request_id));

        self.inner.auth.stamp(&mut headers)?;

        // per-request routing overrides fall back to handle defaults
        let compartment = if !opts.compartment_id.is_empty() {
            opts.compartment_id.as_str()
        } else {
            self.inner.builder.default_compartment.as_str()
        };
        if !compartment.is_empty() {
            headers.insert("x-quartz-compartment-id", HeaderValue::from_str(compartment)?);
        }
        let namespace = if !opts.namespace.is_empty() {
            opts.namespace.as_str()
        } else {
            self.inner.builder.default_namespace.as_str()
        };
        if !namespace.is_empty() {
            headers.insert("x-quartz-default-ns", HeaderValue::from_str(namespace)?);
        }

        headers.insert("User-Agent", HeaderValue::from_str(user_agent())?);

        let now = Instant::now();
        if now >= opts.deadline {
            return Err(Self::timeout_error(opts, None));
        }
        let remaining = opts.deadline - now;

        let fut = self
            .inner
            .transport
            .post(&self.inner.endpoint, data.clone(), headers, remaining);
        let bytes = match &opts.cancel {
            Some(tok) => {
                tokio::select! {
                    res = fut => res?,
                    _ = tok.cancelled() => {
                        return Err(QuartzError::new(RequestCancelled, "operation cancelled"));
                    }
                }
            }
            None => fut.await?,
        };
        Ok(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn test_handle() -> Handle {
        Handle::builder()
            .endpoint("http://localhost:8080")
            .unwrap()
            .mode(ServiceMode::CloudSim)
            .unwrap()
            .build()
            .await
            .unwrap()
    }

    // A V3 server rejecting V4 leads to exactly one effective
    // downgrade, no matter how many requests observe the rejection.
    #[tokio::test]
    async fn test_serial_version_downgrade() {
        let h = test_handle().await;
        assert_eq!(h.serial_version(), SERIAL_VERSION_4);
        assert!(h.decrement_serial_version(SERIAL_VERSION_4));
        assert_eq!(h.serial_version(), SERIAL_VERSION_3);
        // a concurrent observer of the old version retries without a
        // second downgrade
        assert!(h.decrement_serial_version(SERIAL_VERSION_4));
        assert_eq!(h.serial_version(), SERIAL_VERSION_3);
        // nothing below V3 to fall back to
        assert!(!h.decrement_serial_version(SERIAL_VERSION_3));
        assert_eq!(h.serial_version(), SERIAL_VERSION_3);
    }

    // Law: the stored topology sequence number is the maximum observed.
    #[tokio::test]
    async fn test_topology_is_monotone() {
        let h = test_handle().await;
        assert_eq!(h.topo_seq_num(), -1);
        h.update_topology(&TopologyInfo {
            seq_num: 5,
            shard_ids: vec![1, 2, 3],
        });
        assert_eq!(h.topo_seq_num(), 5);
        // an older topology never replaces a newer one
        h.update_topology(&TopologyInfo {
            seq_num: 3,
            shard_ids: vec![9],
        });
        assert_eq!(h.topo_seq_num(), 5);
        assert_eq!(h.topology().shard_ids, vec![1, 2, 3]);
        // invalid topologies are ignored
        h.update_topology(&TopologyInfo {
            seq_num: 10,
            shard_ids: vec![],
        });
        assert_eq!(h.topo_seq_num(), 5);
        h.update_topology(&TopologyInfo {
            seq_num: 8,
            shard_ids: vec![1, 2, 3, 4],
        });
        assert_eq!(h.topo_seq_num(), 8);
    }
}
