use num_enum::TryFromPrimitive;

include!(concat!(env!("OUT_DIR"), "/ua.rs"));

pub(crate) fn sdk_version() -> &'static str {
    SDK_VERSION
}

pub(crate) fn user_agent() -> &'static str {
    USER_AGENT
}

/// The error type returned by all fallible operations in this library.
#[derive(Debug, Clone)]
pub struct QuartzError {
    pub code: QuartzErrorCode,
    pub message: String,
}

impl std::error::Error for QuartzError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        None
    }
}

impl std::fmt::Display for QuartzError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "code={:?} message=\"{}\"", self.code, self.message)
    }
}

impl QuartzError {
    pub fn new(code: QuartzErrorCode, msg: &str) -> QuartzError {
        QuartzError {
            code,
            message: msg.to_string(),
        }
    }

    pub fn from_int(icode: i32, msg: &str) -> QuartzError {
        if let Ok(code) = QuartzErrorCode::try_from(icode) {
            return QuartzError {
                code,
                message: msg.to_string(),
            };
        }
        QuartzError {
            code: QuartzErrorCode::UnknownError,
            message: format!("invalid integer error code {}: {}", icode, msg),
        }
    }

    /// Determine whether the operation that produced this error may be
    /// retried with some expectation of success.
    ///
    /// The throttle family (read/write/storage) and transient server
    /// conditions are retryable; caller mistakes (illegal arguments,
    /// missing tables, request/batch size limits) are not.
    pub fn is_retryable(&self) -> bool {
        match self.code {
            QuartzErrorCode::ReadThrottled
            | QuartzErrorCode::WriteThrottled
            | QuartzErrorCode::StorageThrottled
            | QuartzErrorCode::OperationLimitExceeded
            | QuartzErrorCode::ServerError
            | QuartzErrorCode::ServiceUnavailable
            | QuartzErrorCode::TableBusy
            | QuartzErrorCode::SecurityInfoUnavailable
            | QuartzErrorCode::RetryAuthentication
            | QuartzErrorCode::InternalRetry => true,
            _ => false,
        }
    }

    /// True for the throttling family of errors (read/write/storage).
    ///
    /// Throttles back off and retry, but the better answer is
    /// client-side rate limiting: the dispatcher uses this predicate to
    /// push the offending table limiter back when a throttle arrives.
    pub fn is_throttle(&self) -> bool {
        matches!(
            self.code,
            QuartzErrorCode::ReadThrottled
                | QuartzErrorCode::WriteThrottled
                | QuartzErrorCode::StorageThrottled
        )
    }
}

macro_rules! ia_error {
    ($($t:tt)*) => {{
        let m = format!($($t)*);
        QuartzError {
            code: crate::error::QuartzErrorCode::IllegalArgument,
            message: format!("{} ({})", m, crate::error::sdk_version()),
        }
    }};
}

pub(crate) use ia_error;

macro_rules! ia_err {
    ($($t:tt)*) => {{
        let m = format!($($t)*);
        Err(QuartzError {
            code: crate::error::QuartzErrorCode::IllegalArgument,
            message: format!("{} ({})", m, crate::error::sdk_version()),
        })
    }};
}

pub(crate) use ia_err;

macro_rules! is_err {
    ($($t:tt)*) => {{
        let m = format!($($t)*);
        Err(QuartzError {
            code: crate::error::QuartzErrorCode::IllegalState,
            message: format!("{} ({})", m, crate::error::sdk_version()),
        })
    }};
}

pub(crate) use is_err;

impl From<reqwest::Error> for QuartzError {
    fn from(e: reqwest::Error) -> Self {
        let mut code = QuartzErrorCode::ServerError;
        if e.is_timeout() {
            code = QuartzErrorCode::RequestTimeout;
        } else if e.is_connect() {
            code = QuartzErrorCode::ServiceUnavailable;
        }
        QuartzError {
            code,
            message: format!("http error: {} ({})", e, crate::error::sdk_version()),
        }
    }
}

impl From<reqwest::header::InvalidHeaderValue> for QuartzError {
    fn from(e: reqwest::header::InvalidHeaderValue) -> Self {
        ia_error!("invalid header value: {}", e)
    }
}

impl From<url::ParseError> for QuartzError {
    fn from(e: url::ParseError) -> Self {
        ia_error!("error parsing url: {}", e)
    }
}

impl From<chrono::ParseError> for QuartzError {
    fn from(e: chrono::ParseError) -> Self {
        ia_error!("invalid datetime value: {}", e)
    }
}

// QuartzErrorCode represents the error code.
// Error codes are divided into categories as follows:
//
// 1. Codes for user-generated errors, range from 1 to 50 (exclusive).
// These include illegal arguments, exceeding size limits for some objects,
// resource not found, etc.
//
// 2. Codes for user throttling, range from 50 to 100 (exclusive).
//
// 3. Codes for server issues, range from 100 to 150 (exclusive).
// The range 100-125 (exclusive) is for retryable conditions; codes from
// 125 are other server issues that may or may not be retryable.
//
// Codes of 1000 and above never appear on the wire; they are used by the
// client for internal control flow and client-local failures.
#[derive(Debug, Clone, Copy, Eq, PartialEq, TryFromPrimitive)]
#[repr(i32)]
pub enum QuartzErrorCode {
    /// No error occurred.
    NoError = 0,

    /// The operation attempted is unknown to the service.
    UnknownOperation = 1,

    /// The operation attempted to access a table that does not exist
    /// or is not in a visible state.
    TableNotFound = 2,

    /// The operation attempted to access an index that does not exist
    /// or is not in a visible state.
    IndexNotFound = 3,

    /// The application provided an illegal argument for the operation.
    /// Never retried.
    IllegalArgument = 4,

    /// An attempt was made to create a row whose size exceeds the system
    /// defined limit. Cloud service only.
    RowSizeLimitExceeded = 5,

    /// An attempt was made to create a row with a primary key or index key
    /// size that exceeds the system defined limit. Cloud service only.
    KeySizeLimitExceeded = 6,

    /// The number of sub-operations in a WriteMultiple request exceeds the
    /// system defined limit. Cloud service only.
    BatchOpNumberLimitExceeded = 7,

    /// The size of a serialized request exceeds the system defined limit.
    /// Cloud service only.
    RequestSizeLimitExceeded = 8,

    /// The operation attempted to create a table that already exists.
    TableExists = 9,

    /// The operation attempted to create an index that already exists.
    IndexExists = 10,

    /// The client provided an invalid authorization string in the
    /// request header.
    InvalidAuthorization = 11,

    /// The application does not have sufficient permission to perform
    /// the request.
    InsufficientPermission = 12,

    /// The operation attempted to create a resource that already exists.
    ResourceExists = 13,

    /// The operation attempted to access a resource that does not exist
    /// or is not in a visible state.
    ResourceNotFound = 14,

    /// An attempt was made to create more tables than the system allows.
    /// Cloud service only.
    TableLimitExceeded = 15,

    /// An attempt was made to create more indexes on a table than the
    /// system allows. Cloud service only.
    IndexLimitExceeded = 16,

    /// There is an error in the wire protocol exchange between client and
    /// server. Malformed messages are never retried.
    BadProtocolMessage = 17,

    /// The schema of a table was evolved more times than allowed by the
    /// system defined limit. Cloud service only.
    EvolutionLimitExceeded = 18,

    /// Table limits exceed the maximum allowed for a single table.
    /// Cloud service only.
    TableDeploymentLimitExceeded = 19,

    /// Table limits cause the tenant's aggregate resources to exceed the
    /// maximum allowed. Cloud service only.
    TenantDeploymentLimitExceeded = 20,

    /// The operation attempted is not supported, typically because of a
    /// cloud versus on-premises difference.
    OperationNotSupported = 21,

    /// An ETag supplied in the request did not match the current one.
    EtagMismatch = 22,

    /// A work request could not be cancelled.
    CannotCancelWorkRequest = 23,

    /// The server does not support the serial version used by the client.
    /// The client should decrement its serial version and try again.
    UnsupportedProtocol = 24,

    /// A prepared statement sent to the server is no longer valid there.
    /// The client should re-prepare the statement and retry once.
    PreparedStatementInvalid = 25,

    /// The provisioned read throughput has been exceeded.
    ///
    /// Operations resulting in this error can be retried, preferably after
    /// a delay. Applications should avoid throttling errors by using
    /// client-side rate limiting where possible.
    /// Cloud service only.
    ReadThrottled = 50,

    /// The provisioned write throughput has been exceeded.
    ///
    /// Operations resulting in this error can be retried, preferably after
    /// a delay. Applications should avoid throttling errors by using
    /// client-side rate limiting where possible.
    /// Cloud service only.
    WriteThrottled = 51,

    /// Writes were throttled against the table's storage limit.
    ///
    /// Retryable with back-off, like the other throttles. Sustained
    /// storage throttling means the table is at or near its storage
    /// limit and typically requires user intervention (raise the
    /// limit or delete data) to clear for good.
    /// Cloud service only.
    StorageThrottled = 52,

    /// A non-data operation (table creation, drop, and similar control
    /// operations) was throttled. Retryable with a relatively large delay.
    /// Cloud service only.
    OperationLimitExceeded = 53,

    /// The request cannot be processed or does not complete before the
    /// operation deadline elapses. If retries were performed, the message
    /// carries the retry count and last underlying error.
    RequestTimeout = 100,

    /// An internal, presumably temporary, system problem. Retryable.
    ServerError = 101,

    /// The requested service is currently unavailable. Usually temporary.
    ServiceUnavailable = 102,

    /// The table is in use or busy. Only one table modification operation
    /// at a time is allowed on a table.
    TableBusy = 103,

    /// The security information is not yet ready in the system. Retried
    /// until authorization works. Cloud service only.
    SecurityInfoUnavailable = 104,

    /// Authentication failed in a way that may succeed on retry, for
    /// example an expired session.
    RetryAuthentication = 105,

    /// An unknown error occurred on the server.
    UnknownError = 125,

    /// The service or client is in a state where it cannot service the
    /// request: DDL in progress, client closed, query memory cap exceeded.
    IllegalState = 126,

    /// Used internally for retry logic. Never surfaced to applications.
    InternalRetry = 1001,

    /// The caller cancelled the operation through its cancellation token.
    /// Server side effects of cancelled operations are unspecified.
    /// Client-local; never appears on the wire.
    RequestCancelled = 1002,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_classifier() {
        // every member of the throttle family retries
        let retryable = [
            QuartzErrorCode::ReadThrottled,
            QuartzErrorCode::WriteThrottled,
            QuartzErrorCode::StorageThrottled,
            QuartzErrorCode::OperationLimitExceeded,
            QuartzErrorCode::ServerError,
            QuartzErrorCode::ServiceUnavailable,
            QuartzErrorCode::TableBusy,
            QuartzErrorCode::SecurityInfoUnavailable,
            QuartzErrorCode::RetryAuthentication,
        ];
        for code in retryable {
            assert!(QuartzError::new(code, "").is_retryable(), "{:?}", code);
        }
        let terminal = [
            QuartzErrorCode::IllegalArgument,
            QuartzErrorCode::TableNotFound,
            QuartzErrorCode::TableExists,
            QuartzErrorCode::IndexNotFound,
            QuartzErrorCode::IndexExists,
            QuartzErrorCode::RequestSizeLimitExceeded,
            QuartzErrorCode::BatchOpNumberLimitExceeded,
            QuartzErrorCode::BadProtocolMessage,
            QuartzErrorCode::RequestTimeout,
            QuartzErrorCode::RequestCancelled,
        ];
        for code in terminal {
            assert!(!QuartzError::new(code, "").is_retryable(), "{:?}", code);
        }
    }

    #[test]
    fn test_throttle_family() {
        let throttles = [
            QuartzErrorCode::ReadThrottled,
            QuartzErrorCode::WriteThrottled,
            QuartzErrorCode::StorageThrottled,
        ];
        for code in throttles {
            let e = QuartzError::new(code, "");
            assert!(e.is_throttle(), "{:?}", code);
            assert!(e.is_retryable(), "{:?}", code);
        }
        assert!(!QuartzError::new(QuartzErrorCode::ServerError, "").is_throttle());
    }

    #[test]
    fn test_from_int() {
        assert_eq!(
            QuartzError::from_int(50, "x").code,
            QuartzErrorCode::ReadThrottled
        );
        assert_eq!(
            QuartzError::from_int(-5, "x").code,
            QuartzErrorCode::UnknownError
        );
    }
}
