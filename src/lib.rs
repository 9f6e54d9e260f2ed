//! QuartzDB Rust SDK
//!
//! This is the Rust SDK for the QuartzDB NoSQL Database. It provides
//! the core client runtime for applications that talk to the QuartzDB
//! Cloud Service, a local Cloud Simulator, or an on-premise QuartzDB
//! cluster through its proxy.
//!
//! The SDK is `async` throughout, using the [tokio](https://crates.io/crates/tokio)
//! runtime. There is currently no blocking support.
//!
//! The general flow of an application:
//! - Create a [`HandleBuilder`] with all needed parameters
//! - Build the [`Handle`] that is then shared across the whole
//!   application, across all threads
//! - Interact with the database through the `Handle` and request
//!   structs such as [`GetRequest`], [`PutRequest`], [`QueryRequest`],
//!   [`TableRequest`], etc.
//!
//! ## Simple example
//! The following creates a handle from values in the environment and
//! reads a single row:
//! ```no_run
//! use quartzdb_rust_sdk::{Handle, GetRequest};
//! use quartzdb_rust_sdk::types::MapValue;
//! use std::error::Error;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn Error>> {
//!     let handle = Handle::builder()
//! #       .endpoint("http://localhost:8080")?
//! #       .mode(quartzdb_rust_sdk::ServiceMode::CloudSim)?
//!         .from_environment()?
//!         .build().await?;
//!     let getres = GetRequest::new("test_table")
//!         .key(MapValue::new().i32("id", 10))
//!         .execute(&handle)
//!         .await?;
//!     println!("GetResult={:?}", getres);
//!     Ok(())
//! }
//! ```
//!
//! ## Configuring the SDK
//!
//! Three environments are supported, selected through
//! [`ServiceMode`]:
//!
//! - **Cloud** — the managed service. Secure; requests are stamped by an
//!   [`AuthorizationProvider`], typically a bearer-token provider fed
//!   from your identity infrastructure.
//! - **CloudSim** — a local simulator, not secure, for development and
//!   testing. Only an endpoint is needed.
//! - **KVStore** — an on-premise cluster reached through its proxy,
//!   either non-secure or secured with store credentials
//!   ([`HandleBuilder::store_auth()`]) and a trusted certificate
//!   ([`HandleBuilder::add_cert_from_pemfile()`]).
//!
//! Some operations are environment-specific: table limits, usage
//! reports, replicas and client-side rate limiting exist in the cloud
//! service only, while [`SystemRequest`] administrative DDL is
//! on-premise only. Such differences are noted per request.
//!
//! ```no_run
//! # use quartzdb_rust_sdk::{Handle, ServiceMode};
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//!     let handle = Handle::builder()
//!         .mode(ServiceMode::CloudSim)?
//!         .endpoint("http://localhost:8080")?
//!         .build().await?;
//!     // use handle for all QuartzDB operations
//! # Ok(())
//! # }
//! ```
//!
//! ## Queries
//!
//! [`QueryRequest`] executes SQL `SELECT/INSERT/UPDATE/DELETE`
//! statements, either directly or prepared. Queries run in batches;
//! [`QueryRequest::execute()`] loops until completion, while
//! [`QueryRequest::execute_batch()`] exposes the batch loop to the
//! application for incremental paging. Sorted queries over all
//! partitions, grouping, and aggregation are partially executed inside
//! the driver, transparently to the caller.
//!
//! ## Concurrency
//!
//! A [`Handle`] is cheap to clone and safe to share; every operation is
//! independent. Operations accept an optional [`CancellationToken`]
//! observed at every suspension point. Transient failures are retried
//! with exponential back-off within each operation's timeout, and
//! optional client-side [rate limiting](HandleBuilder::rate_limiting)
//! paces per-table throughput before requests are sent.

pub(crate) mod handle_builder;
pub use crate::handle_builder::{HandleBuilder, ServiceMode};

pub(crate) mod handle;
pub use crate::handle::Handle;

pub(crate) mod auth;
pub use crate::auth::{
    AuthorizationProvider, BearerTokenProvider, NoAuthProvider, StoreCredentialsProvider,
};

pub(crate) mod cancel;
pub use crate::cancel::CancellationToken;

pub(crate) mod http;
pub use crate::http::{HttpTransport, ReqwestTransport};

pub(crate) mod rate_limiter;
pub use crate::rate_limiter::{RateLimiter, RateLimiterFactory, SimpleRateLimiter};

pub(crate) mod retry;
pub use crate::retry::RetryConfig;

pub(crate) mod delete_request;
pub use crate::delete_request::{DeleteRequest, DeleteResult};

pub(crate) mod error;
pub use crate::error::{QuartzError, QuartzErrorCode};

pub(crate) mod get_indexes_request;
pub use crate::get_indexes_request::{GetIndexesRequest, GetIndexesResult, IndexInfo};

pub(crate) mod get_request;
pub use crate::get_request::{GetRequest, GetResult};

pub(crate) mod list_tables_request;
pub use crate::list_tables_request::{ListTablesRequest, ListTablesResult};

pub(crate) mod multi_delete_request;
pub use crate::multi_delete_request::{FieldRange, MultiDeleteRequest, MultiDeleteResult};

pub(crate) mod packed;
pub(crate) mod plan;
pub(crate) mod prepared_statement;
pub use crate::prepared_statement::PreparedStatement;

pub(crate) mod put_request;
pub use crate::put_request::{PutRequest, PutResult};

pub(crate) mod query_request;
pub use crate::query_request::{QueryRequest, QueryResult};

pub(crate) mod reader;
pub(crate) mod replica_request;
pub use crate::replica_request::{
    AddReplicaRequest, DropReplicaRequest, ReplicaStats, ReplicaStatsRequest, ReplicaStatsResult,
};

pub(crate) mod step_aggr;
pub(crate) mod step_arith;
pub(crate) mod step_field;
pub(crate) mod step_group;
pub(crate) mod step_receive;
pub(crate) mod step_sfw;
pub(crate) mod step_sort;
pub(crate) mod step_value;

pub(crate) mod system_request;
pub use crate::system_request::{SystemRequest, SystemResult};

pub(crate) mod table_request;
pub use crate::table_request::{GetTableRequest, ReplicaInfo, TableRequest, TableResult};

pub(crate) mod table_usage_request;
pub use crate::table_usage_request::{TableUsage, TableUsageRequest, TableUsageResult};

pub(crate) mod tagged;
pub mod types;
/// The version of a specific table row. Returned with rows and used for
/// conditional put/delete operations; compared for equality only.
pub type Version = Vec<u8>;
pub use crate::types::ToFieldValue;

pub(crate) mod write_multiple_request;
pub use crate::write_multiple_request::{
    SubOperationResult, WriteMultipleRequest, WriteMultipleResult,
};
pub(crate) mod writer;

#[cfg(test)]
pub(crate) mod codec_tests;
#[cfg(test)]
pub(crate) mod value_tests;
