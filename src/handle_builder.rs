//! Builder for creating a [`Handle`](crate::Handle)

use std::default::Default;
use std::env;
use std::result::Result;
use std::sync::Arc;
use std::time::Duration;

use reqwest::Certificate;
use reqwest::Client;

use crate::auth::{
    AuthorizationProvider, BearerTokenProvider, NoAuthProvider, StoreCredentialsProvider,
};
use crate::error::{ia_err, QuartzError};
use crate::handle::Handle;
use crate::http::HttpTransport;
use crate::rate_limiter::{default_rate_limiter_factory, RateLimiterFactory};
use crate::retry::RetryConfig;

/// The kind of QuartzDB service a handle connects to.
///
/// Certain operations are only available on certain service kinds:
/// table limits, usage reports, replicas and rate limiting are cloud
/// only; namespace/user/role administration is on-premise only.
#[derive(Default, Debug, Clone, PartialEq)]
pub enum ServiceMode {
    /// The managed cloud service.
    #[default]
    Cloud,
    /// A local cloud simulator instance, typically for testing.
    CloudSim,
    /// An on-premise cluster reached through its proxy.
    KVStore,
}

/// Builder used to set all the parameters to create a [`Handle`].
///
/// The builder collects the endpoint, service mode, authorization
/// provider, timeouts and the optional rate-limiting configuration,
/// then [`build()`](HandleBuilder::build) produces the shared handle.
#[derive(Debug, Clone)]
pub struct HandleBuilder {
    pub(crate) endpoint: String,
    pub(crate) mode: ServiceMode,
    pub(crate) use_https: bool,
    pub(crate) timeout: Option<Duration>,
    pub(crate) table_poll_timeout: Option<Duration>,
    pub(crate) poll_delay: Duration,
    pub(crate) retry_config: RetryConfig,
    pub(crate) rate_limiting_enabled: bool,
    pub(crate) rate_limiter_percent: f64,
    pub(crate) rate_limiter_factory: RateLimiterFactory,
    pub(crate) max_memory_mb: u64,
    pub(crate) default_compartment: String,
    pub(crate) default_namespace: String,
    pub(crate) auth: Option<Box<dyn AuthorizationProvider>>,
    pub(crate) transport: Option<Arc<dyn HttpTransport>>,
    pub(crate) client: Option<Client>,
    pub(crate) add_cert: Option<Certificate>,
    pub(crate) accept_invalid_certs: bool,
    // For error messaging
    pub(crate) from_environment: bool,
}

impl Default for HandleBuilder {
    fn default() -> Self {
        HandleBuilder {
            endpoint: String::new(),
            mode: ServiceMode::Cloud,
            use_https: false,
            timeout: None,
            table_poll_timeout: Some(Duration::from_secs(120)),
            poll_delay: Duration::from_millis(500),
            retry_config: RetryConfig::default(),
            rate_limiting_enabled: false,
            rate_limiter_percent: 100.0,
            rate_limiter_factory: default_rate_limiter_factory,
            max_memory_mb: 1024,
            default_compartment: String::new(),
            default_namespace: String::new(),
            auth: None,
            transport: None,
            client: None,
            add_cert: None,
            accept_invalid_certs: false,
            from_environment: false,
        }
    }
}

impl HandleBuilder {
    /// Create a new HandleBuilder.
    ///
    /// The default builder has no endpoint or authorization configured.
    /// Consider calling [`from_environment()`](HandleBuilder::from_environment)
    /// to collect the parameters from the local environment.
    pub fn new() -> Self {
        Default::default()
    }

    /// Build a new [`Handle`].
    ///
    /// If the builder holds a reference to an existing [`reqwest::Client`]
    /// it will clone and use that; otherwise a new pooled client is
    /// created for the handle's own use.
    pub async fn build(self) -> Result<Handle, QuartzError> {
        Handle::new(&self).await
    }

    /// Gather configuration settings from the current environment.
    ///
    /// The following variables are used:
    ///
    /// | variable | description |
    /// | -------- | ----------- |
    /// | `QUARTZDB_ENDPOINT` | The URL endpoint to use. |
    /// | `QUARTZDB_SERVICE` | One of `cloud`, `cloudsim`, `kvstore`. |
    /// | `QUARTZDB_AUTH_TOKEN` | Bearer token for cloud authorization. |
    /// | `QUARTZDB_USER` / `QUARTZDB_PASSWORD` | On-premise store credentials. |
    /// | `QUARTZDB_CA_CERT` | Path to a certificate file in `pem` format. |
    /// | `QUARTZDB_ACCEPT_INVALID_CERTS` | `1` or `true` to skip certificate checks. |
    /// | `QUARTZDB_TIMEOUT_MS` | Default request timeout in milliseconds. |
    pub fn from_environment(mut self) -> Result<Self, QuartzError> {
        self.from_environment = true;
        if let Ok(val) = env::var("QUARTZDB_ENDPOINT") {
            self = self.endpoint(&val)?;
        }
        if let Ok(val) = env::var("QUARTZDB_SERVICE") {
            match val.to_lowercase().as_str() {
                "cloud" => self = self.mode(ServiceMode::Cloud)?,
                "cloudsim" => self = self.mode(ServiceMode::CloudSim)?,
                "kvstore" => self = self.mode(ServiceMode::KVStore)?,
                _ => {
                    return ia_err!("unrecognized QUARTZDB_SERVICE value '{}'", val);
                }
            }
        }
        if let Ok(val) = env::var("QUARTZDB_CA_CERT") {
            self = self.add_cert_from_pemfile(&val)?;
        }
        if let Ok(val) = env::var("QUARTZDB_ACCEPT_INVALID_CERTS") {
            let lv = val.to_lowercase();
            if lv == "true" || lv == "1" {
                self = self.danger_accept_invalid_certs(true)?;
            }
        }
        if let Ok(val) = env::var("QUARTZDB_TIMEOUT_MS") {
            match val.parse::<u64>() {
                Ok(ms) => self = self.timeout(Duration::from_millis(ms))?,
                Err(_) => {
                    return ia_err!("invalid QUARTZDB_TIMEOUT_MS value '{}'", val);
                }
            }
        }
        if let Ok(val) = env::var("QUARTZDB_AUTH_TOKEN") {
            self = self.auth_provider(Box::new(BearerTokenProvider::new(&val)))?;
        } else if let Ok(user) = env::var("QUARTZDB_USER") {
            let pass = env::var("QUARTZDB_PASSWORD").unwrap_or_default();
            self = self.auth_provider(Box::new(StoreCredentialsProvider::new(&user, &pass)))?;
        }
        Ok(self)
    }

    /// Set the service endpoint, as `host`, `host:port`, or a full
    /// `http[s]://host[:port]` URL. `https` is assumed unless the scheme
    /// says otherwise or the host is local.
    pub fn endpoint(mut self, endpoint: &str) -> Result<Self, QuartzError> {
        if endpoint.is_empty() {
            return ia_err!("endpoint must be non-empty");
        }
        self.use_https = true;
        let mut ep = endpoint.to_string();
        if ep.contains("://") {
            let parsed = url::Url::parse(endpoint)?;
            match parsed.scheme() {
                "http" => self.use_https = false,
                "https" => (),
                s => {
                    return ia_err!("unsupported endpoint scheme '{}'", s);
                }
            }
            let host = match parsed.host_str() {
                Some(h) => h,
                None => {
                    return ia_err!("endpoint '{}' has no host", endpoint);
                }
            };
            ep = match parsed.port() {
                Some(p) => format!("{}:{}", host, p),
                None => host.to_string(),
            };
        } else if ep.starts_with("localhost") || ep.starts_with("127.0.0.1") {
            self.use_https = false;
        }
        self.endpoint = ep;
        Ok(self)
    }

    /// Set the service mode. See [`ServiceMode`].
    pub fn mode(mut self, mode: ServiceMode) -> Result<Self, QuartzError> {
        self.mode = mode;
        Ok(self)
    }

    /// Set the default timeout for all requests. Individual requests may
    /// override this. If never set, 30 seconds is used.
    pub fn timeout(mut self, t: Duration) -> Result<Self, QuartzError> {
        if t < Duration::from_millis(1) {
            return ia_err!("timeout must be at least 1 millisecond");
        }
        self.timeout = Some(t);
        Ok(self)
    }

    /// Set the default overall timeout used when waiting for table DDL
    /// and admin operations to complete. Pass `None` for no timeout.
    pub fn table_poll_timeout(mut self, t: Option<Duration>) -> Result<Self, QuartzError> {
        if let Some(d) = t {
            if d < Duration::from_millis(1) {
                return ia_err!("table poll timeout must be at least 1 millisecond");
            }
        }
        self.table_poll_timeout = t;
        Ok(self)
    }

    /// Set the default delay between polls when waiting for table DDL
    /// and admin operations to complete.
    pub fn poll_delay(mut self, d: Duration) -> Result<Self, QuartzError> {
        if d < Duration::from_millis(1) {
            return ia_err!("poll delay must be at least 1 millisecond");
        }
        self.poll_delay = d;
        Ok(self)
    }

    /// Replace the retry policy applied to transient failures.
    pub fn retry_config(mut self, cfg: RetryConfig) -> Result<Self, QuartzError> {
        self.retry_config = cfg;
        Ok(self)
    }

    /// Cloud only: enable client-side rate limiting. When enabled, every
    /// operation that names a table acquires units from per-table
    /// read/write limiters before it is sent.
    pub fn rate_limiting(mut self, enabled: bool) -> Result<Self, QuartzError> {
        self.rate_limiting_enabled = enabled;
        Ok(self)
    }

    /// Cloud only: the share of each table's published throughput this
    /// client may use, in percent. Useful when several client processes
    /// operate on the same tables. Default 100.
    pub fn rate_limiter_percent(mut self, percent: f64) -> Result<Self, QuartzError> {
        if percent <= 0.0 || percent > 100.0 {
            return ia_err!("rate limiter percent must be in (0, 100]");
        }
        self.rate_limiter_percent = percent;
        Ok(self)
    }

    /// Replace the factory used to create rate limiter instances.
    pub fn rate_limiter_factory(mut self, factory: RateLimiterFactory) -> Result<Self, QuartzError> {
        self.rate_limiter_factory = factory;
        Ok(self)
    }

    /// Cap the memory the client may use for query-side state such as
    /// sort buffers and duplicate elimination sets, in megabytes.
    /// Queries exceeding the cap fail with an IllegalState error.
    /// Default 1024.
    pub fn max_memory_mb(mut self, mb: u64) -> Result<Self, QuartzError> {
        if mb == 0 {
            return ia_err!("max memory must be at least 1 MB");
        }
        self.max_memory_mb = mb;
        Ok(self)
    }

    /// Cloud only: set the default compartment for all requests from
    /// this handle.
    pub fn default_compartment(mut self, compartment: &str) -> Result<Self, QuartzError> {
        self.default_compartment = compartment.to_string();
        Ok(self)
    }

    /// On-premise only: set the default namespace for all requests from
    /// this handle.
    pub fn default_namespace(mut self, namespace: &str) -> Result<Self, QuartzError> {
        self.default_namespace = namespace.to_string();
        Ok(self)
    }

    /// Supply the authorization provider that stamps outgoing requests.
    pub fn auth_provider(
        mut self,
        provider: Box<dyn AuthorizationProvider>,
    ) -> Result<Self, QuartzError> {
        self.auth = Some(provider);
        Ok(self)
    }

    /// On-premise only: authorize with store user credentials.
    pub fn store_auth(mut self, user: &str, password: &str) -> Result<Self, QuartzError> {
        if user.is_empty() {
            return ia_err!("store auth user must be non-empty");
        }
        self.auth = Some(Box::new(StoreCredentialsProvider::new(user, password)));
        Ok(self)
    }

    /// Replace the HTTP transport. Mostly useful for testing.
    pub fn transport(mut self, transport: Arc<dyn HttpTransport>) -> Result<Self, QuartzError> {
        self.transport = Some(transport);
        Ok(self)
    }

    /// Use an existing [`reqwest::Client`] instead of creating one.
    pub fn reqwest_client(mut self, client: &Client) -> Result<Self, QuartzError> {
        self.client = Some(client.clone());
        Ok(self)
    }

    /// Trust an additional root certificate, read from a `pem` file.
    pub fn add_cert_from_pemfile(mut self, path: &str) -> Result<Self, QuartzError> {
        let data = std::fs::read(path)
            .map_err(|e| crate::error::ia_error!("cannot read pem file '{}': {}", path, e))?;
        let cert = Certificate::from_pem(&data)
            .map_err(|e| crate::error::ia_error!("invalid pem file '{}': {}", path, e))?;
        self.add_cert = Some(cert);
        Ok(self)
    }

    /// Skip verification of the server certificate. Only for testing
    /// against self-signed installations.
    pub fn danger_accept_invalid_certs(mut self, accept: bool) -> Result<Self, QuartzError> {
        self.accept_invalid_certs = accept;
        Ok(self)
    }

    pub(crate) fn effective_auth(&self) -> Box<dyn AuthorizationProvider> {
        if let Some(p) = &self.auth {
            return p.clone();
        }
        match self.mode {
            // the simulator accepts any bearer token
            ServiceMode::CloudSim => Box::new(BearerTokenProvider::new("quartz")),
            _ => Box::new(NoAuthProvider {}),
        }
    }
}
