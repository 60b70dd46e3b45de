use gpuwatch_core::ReconnectPolicy;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;
use url::Url;

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(3_000);

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("invalid endpoint '{endpoint}': {reason}")]
    InvalidEndpoint { endpoint: String, reason: String },
    #[error("scheme '{scheme}' is not usable with the {transport} transport")]
    UnsupportedScheme {
        scheme: String,
        transport: TransportKind,
    },
    #[error("invalid value for {key}: '{value}'")]
    InvalidValue { key: &'static str, value: String },
    #[error("http client setup failed: {0}")]
    HttpClient(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum TransportKind {
    #[default]
    Push,
    Poll,
}

impl TransportKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransportKind::Push => "push",
            TransportKind::Poll => "poll",
        }
    }
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TransportKind {
    type Err = ConfigError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        match input.trim().to_ascii_lowercase().as_str() {
            "push" | "ws" | "websocket" => Ok(TransportKind::Push),
            "poll" | "pull" | "http" => Ok(TransportKind::Poll),
            other => Err(ConfigError::InvalidValue {
                key: "transport",
                value: other.to_string(),
            }),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ClientConfig {
    pub endpoint: String,
    pub transport: TransportKind,
    pub poll_interval: Duration,
    pub request_timeout: Option<Duration>,
    pub backoff: ReconnectPolicy,
}

impl ClientConfig {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            transport: TransportKind::default(),
            poll_interval: DEFAULT_POLL_INTERVAL,
            request_timeout: None,
            backoff: ReconnectPolicy::default(),
        }
    }

    pub fn with_transport(mut self, transport: TransportKind) -> Self {
        self.transport = transport;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_backoff(mut self, backoff: ReconnectPolicy) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn request_timeout(&self) -> Duration {
        self.request_timeout.unwrap_or(self.poll_interval)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.poll_interval.is_zero() {
            return Err(ConfigError::InvalidValue {
                key: "poll_interval",
                value: "0".to_string(),
            });
        }
        let backoff = &self.backoff;
        if backoff.base.is_zero() {
            return Err(ConfigError::InvalidValue {
                key: "backoff_base",
                value: "0".to_string(),
            });
        }
        if !backoff.growth.is_finite() || backoff.growth < 1.0 {
            return Err(ConfigError::InvalidValue {
                key: "backoff_growth",
                value: backoff.growth.to_string(),
            });
        }
        if backoff.max < backoff.base {
            return Err(ConfigError::InvalidValue {
                key: "backoff_max",
                value: format!("{}ms", backoff.max.as_millis()),
            });
        }
        Ok(())
    }

    /// Parses the endpoint for the configured transport, swapping between the
    /// ws and http scheme families when the other one was given.
    pub fn resolve_endpoint(&self) -> Result<Url, ConfigError> {
        let mut url = Url::parse(self.endpoint.trim()).map_err(|err| {
            ConfigError::InvalidEndpoint {
                endpoint: self.endpoint.clone(),
                reason: err.to_string(),
            }
        })?;
        let target = match (self.transport, url.scheme()) {
            (TransportKind::Push, "ws" | "wss") | (TransportKind::Poll, "http" | "https") => {
                return Ok(url);
            }
            (TransportKind::Push, "http") => "ws",
            (TransportKind::Push, "https") => "wss",
            (TransportKind::Poll, "ws") => "http",
            (TransportKind::Poll, "wss") => "https",
            (transport, scheme) => {
                return Err(ConfigError::UnsupportedScheme {
                    scheme: scheme.to_string(),
                    transport,
                });
            }
        };
        url.set_scheme(target)
            .map_err(|_| ConfigError::InvalidEndpoint {
                endpoint: self.endpoint.clone(),
                reason: format!("cannot switch scheme to {target}"),
            })?;
        Ok(url)
    }
}
