use ahash::AHashMap as HashMap;
use anyhow::anyhow;
use std::{str::FromStr, time::Duration};

/// The protocol spoken to an upstream when something other than plaintext
/// HTTP/1 is selected. Plaintext has no variant: it is the absence of an
/// override and the absence of a protocol annotation.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Protocol {
    H2,
    H2c,
    Tls,
}

impl Protocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::H2 => "h2",
            Self::H2c => "h2c",
            Self::Tls => "tls",
        }
    }

    /// Whether connections using this protocol are TLS-secured.
    pub fn is_tls(&self) -> bool {
        matches!(self, Self::H2 | Self::Tls)
    }
}

impl FromStr for Protocol {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "h2" => Ok(Self::H2),
            "h2c" => Ok(Self::H2c),
            "tls" => Ok(Self::Tls),
            s => Err(anyhow!("unsupported protocol: {s}")),
        }
    }
}

/// Minimum TLS protocol version accepted by a secure virtual host.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum MinTlsVersion {
    #[default]
    V1_1,
    V1_2,
    V1_3,
}

/// Header mutations applied to requests or responses.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct HeadersPolicy {
    /// Headers to set, keyed by lower-cased name.
    pub set: HashMap<String, String>,

    /// Headers to remove, lower-cased and sorted.
    pub remove: Vec<String>,

    /// A `Host` rewrite. Only request policies may carry one.
    pub host_rewrite: Option<String>,
}

/// A timeout that distinguishes "not configured" from "explicitly unbounded".
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum Timeout {
    /// Use the data plane's default.
    #[default]
    Default,

    /// Disable the timeout entirely.
    Infinite,

    Duration(Duration),
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct TimeoutPolicy {
    pub response: Timeout,
    pub idle: Timeout,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RetryPolicy {
    pub retry_on: String,
    pub num_retries: u32,
    pub per_try_timeout: Option<Duration>,
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum LoadBalancerStrategy {
    #[default]
    RoundRobin,
    WeightedLeastRequest,
    Random,
    Cookie,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct HttpHealthCheckPolicy {
    pub path: String,
    pub host: Option<String>,
    pub interval: Duration,
    pub timeout: Duration,
    pub unhealthy_threshold: u32,
    pub healthy_threshold: u32,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct TcpHealthCheckPolicy {
    pub interval: Duration,
    pub timeout: Duration,
    pub unhealthy_threshold: u32,
    pub healthy_threshold: u32,
}
