use crate::cancel::{sleep_honoring, CancellationToken};
use crate::error::QuartzErrorCode::RequestTimeout;
use crate::error::{ia_err, QuartzError};
use crate::handle::Handle;
use crate::handle::SendOptions;
use crate::reader::Reader;
use crate::tagged::*;
use crate::types::{OpCode, OperationState};
use crate::writer::Writer;
use std::result::Result;
use std::time::{Duration, Instant};

/// Struct used for on-premise-only administrative requests.
///
/// This performs table-independent administrative DDL such as
/// create/drop of namespaces and security-relevant operations
/// (create/drop users and roles). These operations are asynchronous and
/// potentially long-running; completion needs to be checked.
///
/// Examples of statements handled by this request:
///  - CREATE NAMESPACE mynamespace
///  - CREATE USER some_user IDENTIFIED BY password
///  - CREATE ROLE some_role
///  - GRANT ROLE some_role TO USER some_user
///
/// [`SystemRequest::execute()`] returns a [`SystemResult`] that can be
/// polled until the operation succeeds or fails.
#[derive(Default, Debug)]
pub struct SystemRequest {
    pub(crate) statement: String,
    pub(crate) timeout: Option<Duration>,
    pub(crate) cancel: Option<CancellationToken>,
}

/// Struct used to query the status of an in-progress [`SystemRequest`].
#[derive(Default, Debug)]
pub(crate) struct SystemStatusRequest {
    pub operation_id: String,
    pub timeout: Option<Duration>,
    pub cancel: Option<CancellationToken>,
}

/// Struct representing the result of a [`SystemRequest`].
#[derive(Default, Debug)]
pub struct SystemResult {
    pub(crate) operation_id: String,
    pub(crate) state: OperationState,
    pub(crate) statement: String,
    pub(crate) result_string: String,
}

impl SystemRequest {
    /// Create a new SystemRequest. `statement` must be non-empty.
    pub fn new(statement: &str) -> SystemRequest {
        SystemRequest {
            statement: statement.to_string(),
            ..Default::default()
        }
    }

    /// Specify the timeout value for the request.
    pub fn timeout(mut self, t: &Duration) -> Self {
        self.timeout = Some(*t);
        self
    }

    /// Supply a token that can cancel the operation while it is waiting
    /// or in flight.
    pub fn cancellation_token(mut self, token: &CancellationToken) -> SystemRequest {
        self.cancel = Some(token.clone());
        self
    }

    /// Start the administrative operation.
    ///
    /// This begins the asynchronous execution of the statement; use
    /// [`SystemResult::wait_for_completion()`] on the returned result to
    /// wait for it to finish.
    pub async fn execute(&self, h: &Handle) -> Result<SystemResult, QuartzError> {
        if self.statement.is_empty() {
            return ia_err!("system request statement must be non-empty");
        }
        h.check_onprem_only("administrative DDL")?;
        let mut w: Writer = Writer::new();
        w.write_i16(h.serial_version());
        let timeout = h.get_timeout(&self.timeout);
        self.serialize_internal(&mut w, &timeout, h.topo_seq_num());
        let mut opts = SendOptions::new(OpCode::SystemRequest, timeout).cancellation(&self.cancel);
        let mut r = h.send_and_receive(w, &mut opts).await?;
        let resp = SystemRequest::deserialize(&mut r)?;
        Ok(resp)
    }

    pub(crate) fn serialize_internal(&self, w: &mut Writer, timeout: &Duration, topo_seq: i32) {
        let mut ns = Serializer::start_request(w);
        ns.start_header();
        ns.write_header(OpCode::SystemRequest, timeout, "", topo_seq);
        ns.end_header();

        // payload
        ns.start_payload();
        ns.write_string_field(STATEMENT, &self.statement);
        ns.end_payload();

        ns.end_request();
    }

    pub(crate) fn deserialize(r: &mut Reader) -> Result<SystemResult, QuartzError> {
        let mut walker = MapWalker::new(r)?;
        let mut res: SystemResult = Default::default();
        while walker.has_next() {
            walker.next()?;
            let name = walker.current_name();
            match name.as_str() {
                ERROR_CODE => {
                    walker.handle_error_code()?;
                }
                OPERATION_ID => {
                    res.operation_id = walker.read_string_field()?;
                }
                STATEMENT => {
                    res.statement = walker.read_string_field()?;
                }
                SYSOP_RESULT => {
                    res.result_string = walker.read_string_field()?;
                }
                SYSOP_STATE => {
                    let s = walker.read_i32_field()?;
                    res.state = OperationState::from_int(s)?;
                }
                _ => {
                    walker.skip_field()?;
                }
            }
        }
        Ok(res)
    }
}

impl TaggedRequest for SystemRequest {
    fn serialize(&self, w: &mut Writer, timeout: &Duration, topo_seq: i32) {
        self.serialize_internal(w, timeout, topo_seq);
    }
}

impl SystemStatusRequest {
    pub fn new(operation_id: &str) -> SystemStatusRequest {
        SystemStatusRequest {
            operation_id: operation_id.to_string(),
            ..Default::default()
        }
    }

    pub async fn execute(&self, h: &Handle) -> Result<SystemResult, QuartzError> {
        let mut w: Writer = Writer::new();
        w.write_i16(h.serial_version());
        let timeout = h.get_timeout(&self.timeout);
        self.serialize_internal(&mut w, &timeout, h.topo_seq_num());
        let mut opts =
            SendOptions::new(OpCode::SystemStatusRequest, timeout).cancellation(&self.cancel);
        let mut r = h.send_and_receive(w, &mut opts).await?;
        let resp = SystemRequest::deserialize(&mut r)?;
        Ok(resp)
    }

    pub(crate) fn serialize_internal(&self, w: &mut Writer, timeout: &Duration, topo_seq: i32) {
        let mut ns = Serializer::start_request(w);
        ns.start_header();
        ns.write_header(OpCode::SystemStatusRequest, timeout, "", topo_seq);
        ns.end_header();

        // payload
        ns.start_payload();
        ns.write_string_field(OPERATION_ID, &self.operation_id);
        ns.end_payload();

        ns.end_request();
    }
}

impl SystemResult {
    /// Wait for a SystemRequest to complete.
    ///
    /// Polls the system for the status of the operation until it
    /// completes, an error occurs, or `wait` elapses. `delay` is slept
    /// between polls.
    pub async fn wait_for_completion(
        &mut self,
        h: &Handle,
        wait: Duration,
        delay: Duration,
    ) -> Result<(), QuartzError> {
        if wait < delay {
            return ia_err!("wait duration must be greater than delay duration");
        }
        self.wait_internal(h, Some(wait), delay, None).await
    }

    /// Like [`wait_for_completion()`](SystemResult::wait_for_completion),
    /// taking direct millisecond values.
    pub async fn wait_for_completion_ms(
        &mut self,
        h: &Handle,
        wait_ms: u64,
        delay_ms: u64,
    ) -> Result<(), QuartzError> {
        self.wait_for_completion(
            h,
            Duration::from_millis(wait_ms),
            Duration::from_millis(delay_ms),
        )
        .await
    }

    /// Wait for completion using the handle's configured poll timeout
    /// and delay. A handle configured with no poll timeout waits
    /// indefinitely.
    pub async fn wait_for_default_completion(&mut self, h: &Handle) -> Result<(), QuartzError> {
        self.wait_internal(h, h.table_poll_timeout(), h.poll_delay(), None)
            .await
    }

    async fn wait_internal(
        &mut self,
        h: &Handle,
        wait: Option<Duration>,
        delay: Duration,
        cancel: Option<CancellationToken>,
    ) -> Result<(), QuartzError> {
        if self.state == OperationState::Complete {
            return Ok(());
        }

        let deadline = wait.map(|w| Instant::now() + w);
        let mut first_loop = true;

        while self.state != OperationState::Complete {
            if let Some(d) = deadline {
                if Instant::now() >= d {
                    return Err(QuartzError::new(
                        RequestTimeout,
                        "administrative operation not completed in expected time",
                    ));
                }
            }

            if !first_loop {
                sleep_honoring(delay, cancel.as_ref()).await?;
            }
            first_loop = false;

            let mut status = SystemStatusRequest::new(self.operation_id.as_str());
            status.cancel = cancel.clone();
            let res = status.execute(h).await?;

            // operation_id and statement do not change
            self.state = res.state;
            self.result_string = res.result_string;
        }

        Ok(())
    }

    pub fn operation_id(&self) -> String {
        self.operation_id.clone()
    }

    pub fn state(&self) -> OperationState {
        self.state
    }

    pub fn statement(&self) -> String {
        self.statement.clone()
    }

    /// The textual result of the operation, if any. For example, SHOW
    /// operations return their output here.
    pub fn result_string(&self) -> String {
        self.result_string.clone()
    }
}
