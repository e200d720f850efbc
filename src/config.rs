//! Configuration for the operator runtime and for the client that talks to the api server.
//! `OperatorConfig` is built up with builder style methods on top of sensible defaults.
//! `ClientConfig` is normally loaded either from the in-cluster service account, or from a
//! kubeconfig file when running locally.
mod kubeconfig;

pub use self::kubeconfig::{KubeConfig, KubeConfigError};

use backoff::ExponentialBackoff;

use std::path::Path;
use std::time::Duration;

pub const DEFAULT_OPERATOR_NAME: &str = "namespace-operator";
pub const DEFAULT_SERVER_PORT: u16 = 8080;
pub const DEFAULT_MAX_CONCURRENT_RECONCILES: usize = 4;
pub const DEFAULT_RECONCILE_TIMEOUT: Duration = Duration::from_secs(30);

const SERVICE_ACCOUNT_TOKEN_PATH: &str = "/var/run/secrets/kubernetes.io/serviceaccount/token";
const SERVICE_ACCOUNT_CA_PATH: &str = "/var/run/secrets/kubernetes.io/serviceaccount/ca.crt";
const API_SERVER_HOSTNAME: &str = "kubernetes.default.svc";

/// Determines how long a key waits before it's reconciled again after a retryable failure.
/// The default starts at 500 milliseconds and grows by a factor of 1.5 up to 10 minutes, with
/// a random jitter of +/- 50%. `BackoffConfig` implements `Default`, so individual fields can
/// be customized using struct update syntax:
///
/// ```rust
/// use namespace_operator::config::BackoffConfig;
/// use std::time::Duration;
///
/// let backoff = BackoffConfig {
///     max_interval: Duration::from_secs(60),
///     ..Default::default()
/// };
/// assert_eq!(Duration::from_millis(500), backoff.initial_interval);
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct BackoffConfig {
    pub initial_interval: Duration,
    pub max_interval: Duration,
    pub multiplier: f64,
    pub randomization_factor: f64,
}

impl Default for BackoffConfig {
    fn default() -> BackoffConfig {
        BackoffConfig {
            initial_interval: Duration::from_millis(500),
            max_interval: Duration::from_secs(600),
            multiplier: 1.5,
            randomization_factor: 0.5,
        }
    }
}

impl BackoffConfig {
    /// Always waits exactly `interval` between retries
    pub fn fixed_interval(interval: Duration) -> BackoffConfig {
        BackoffConfig {
            initial_interval: interval,
            max_interval: interval,
            multiplier: 1.0,
            randomization_factor: 0.0,
        }
    }

    /// Returns a fresh backoff that never gives up
    pub(crate) fn new_backoff(&self) -> ExponentialBackoff {
        let mut backoff = ExponentialBackoff {
            initial_interval: self.initial_interval,
            current_interval: self.initial_interval,
            max_interval: self.max_interval,
            multiplier: self.multiplier,
            randomization_factor: self.randomization_factor,
            max_elapsed_time: None,
            ..Default::default()
        };
        backoff::backoff::Backoff::reset(&mut backoff);
        backoff
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct OperatorConfig {
    /// Used as the value of the managed-by label on companion namespaces, and as the client
    /// user agent
    pub operator_name: String,
    /// Maximum number of reconciles that may run at the same time. Reconciles for the same key
    /// never run concurrently, regardless of this setting.
    pub max_concurrent_reconciles: usize,
    /// Deadline for each reconcile invocation
    pub reconcile_timeout: Duration,
    /// If set, every key that was reconciled successfully is reconciled again after this
    /// period, even if no new events arrive for it
    pub resync_period: Option<Duration>,
    pub backoff: BackoffConfig,
    pub server_port: u16,
    pub expose_metrics: bool,
    pub expose_health: bool,
}

impl Default for OperatorConfig {
    fn default() -> OperatorConfig {
        OperatorConfig::new(DEFAULT_OPERATOR_NAME)
    }
}

impl OperatorConfig {
    pub fn new(operator_name: impl Into<String>) -> OperatorConfig {
        OperatorConfig {
            operator_name: operator_name.into(),
            max_concurrent_reconciles: DEFAULT_MAX_CONCURRENT_RECONCILES,
            reconcile_timeout: DEFAULT_RECONCILE_TIMEOUT,
            resync_period: None,
            backoff: BackoffConfig::default(),
            server_port: DEFAULT_SERVER_PORT,
            expose_metrics: true,
            expose_health: true,
        }
    }

    /// Values less than 1 are treated as 1
    pub fn max_concurrent_reconciles(mut self, max: usize) -> Self {
        self.max_concurrent_reconciles = max.max(1);
        self
    }

    pub fn reconcile_timeout(mut self, timeout: Duration) -> Self {
        self.reconcile_timeout = timeout;
        self
    }

    pub fn resync_period(mut self, period: Duration) -> Self {
        self.resync_period = Some(period);
        self
    }

    pub fn backoff(mut self, backoff: BackoffConfig) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn server_port(mut self, port: u16) -> Self {
        self.server_port = port;
        self
    }

    pub fn expose_metrics(mut self, expose: bool) -> Self {
        self.expose_metrics = expose;
        self
    }

    pub fn expose_health(mut self, expose: bool) -> Self {
        self.expose_health = expose;
        self
    }

    pub(crate) fn server_enabled(&self) -> bool {
        self.expose_metrics || self.expose_health
    }
}

/// Where to find the CA certificate(s) for verifying the api server
#[derive(Debug, Clone, PartialEq)]
pub enum CAData {
    File(String),
    /// Base64 encoded PEM, as it appears in `certificate-authority-data` of a kubeconfig
    Contents(String),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Credentials {
    /// Sent as-is in the `Authorization` header
    Header(String),
    PemPath {
        certificate_path: String,
        private_key_path: String,
    },
    /// Base64 encoded PEM client certificate and key
    Pem {
        certificate_base64: String,
        private_key_base64: String,
    },
}

impl Credentials {
    pub fn bearer_token(token: &str) -> Credentials {
        Credentials::Header(format!("Bearer {}", token.trim()))
    }

    pub fn basic(username: &str, password: &str) -> Credentials {
        let encoded = base64::encode(format!("{}:{}", username, password).as_bytes());
        Credentials::Header(format!("Basic {}", encoded))
    }

    pub(crate) fn header_value(&self) -> Option<&str> {
        match self {
            Credentials::Header(value) => Some(value.as_str()),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ClientConfig {
    pub api_server_endpoint: String,
    pub credentials: Credentials,
    pub ca_data: Option<CAData>,
    pub user_agent: String,
    pub verify_ssl_certs: bool,
    pub impersonate: Option<String>,
    pub impersonate_groups: Vec<String>,
}

impl ClientConfig {
    /// Loads the configuration that's mounted into every pod by default
    pub fn from_service_account(user_agent: impl Into<String>) -> Result<ClientConfig, anyhow::Error> {
        let token = std::fs::read_to_string(SERVICE_ACCOUNT_TOKEN_PATH).map_err(|err| {
            anyhow::anyhow!(
                "Failed to read service account token from '{}': {}",
                SERVICE_ACCOUNT_TOKEN_PATH,
                err
            )
        })?;
        let ca_data = if Path::new(SERVICE_ACCOUNT_CA_PATH).exists() {
            Some(CAData::File(SERVICE_ACCOUNT_CA_PATH.to_owned()))
        } else {
            None
        };

        Ok(ClientConfig {
            api_server_endpoint: format!("https://{}", API_SERVER_HOSTNAME),
            credentials: Credentials::bearer_token(&token),
            ca_data,
            user_agent: user_agent.into(),
            verify_ssl_certs: true,
            impersonate: None,
            impersonate_groups: Vec::new(),
        })
    }

    /// Loads the kubeconfig from `$KUBECONFIG` or `~/.kube/config` and uses its current context
    pub fn from_kubeconfig(user_agent: impl Into<String>) -> Result<ClientConfig, KubeConfigError> {
        kubeconfig::load_from_kubeconfig(user_agent.into())
    }

    /// Tries the service account first, since that's what is used when running in a cluster,
    /// and falls back to the kubeconfig file
    pub fn load(user_agent: impl Into<String>) -> Result<ClientConfig, anyhow::Error> {
        let user_agent = user_agent.into();
        ClientConfig::from_service_account(user_agent.clone()).or_else(|sa_err| {
            log::debug!("Service account config is unavailable: {}", sa_err);
            ClientConfig::from_kubeconfig(user_agent).map_err(|kc_err| {
                anyhow::anyhow!(
                    "Unable to load client config from service account ({}) or from kubeconfig ({})",
                    sa_err,
                    kc_err
                )
            })
        })
    }
}
