use bytes::Bytes;
use reqwest::header::HeaderMap;
use std::fmt::Debug;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use crate::error::{ia_err, QuartzError};

/// The future returned by [`HttpTransport::post`].
pub type TransportFuture<'a> =
    Pin<Box<dyn Future<Output = Result<Bytes, QuartzError>> + Send + 'a>>;

/// The HTTP surface the dispatcher posts serialized requests through.
///
/// A single endpoint path accepts POSTs of `application/octet-stream`
/// bodies and replies with the same content type. Timeouts are enforced
/// by the caller supplying a per-attempt `timeout`; cancellation is
/// propagated by the dispatcher dropping the returned future.
pub trait HttpTransport: Send + Sync + Debug {
    fn post<'a>(
        &'a self,
        url: &'a str,
        body: Vec<u8>,
        headers: HeaderMap,
        timeout: Duration,
    ) -> TransportFuture<'a>;
}

/// Default transport backed by a pooled [`reqwest::Client`].
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    pub(crate) client: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new(client: reqwest::Client) -> ReqwestTransport {
        ReqwestTransport { client }
    }
}

impl HttpTransport for ReqwestTransport {
    fn post<'a>(
        &'a self,
        url: &'a str,
        body: Vec<u8>,
        mut headers: HeaderMap,
        timeout: Duration,
    ) -> TransportFuture<'a> {
        Box::pin(async move {
            headers.insert(
                "Content-Type",
                reqwest::header::HeaderValue::from_static("application/octet-stream"),
            );
            let resp = self
                .client
                .post(url)
                .body(body)
                .timeout(timeout)
                .headers(headers)
                .send()
                .await?;
            if !resp.status().is_success() {
                let status = resp.status();
                let content = resp.text().await.unwrap_or_default();
                return ia_err!(
                    "got unexpected http status: {}, response text: {}",
                    status,
                    content
                );
            }
            let bytes = resp.bytes().await?;
            Ok(bytes)
        })
    }
}
