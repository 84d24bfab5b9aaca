//! The forwarding graph produced by one translation run.
//!
//! Nodes are addressed by key (an FQDN for virtual hosts, a namespaced name
//! plus port for upstream services) rather than by reference, so the graph can
//! be built incrementally and handed to a consumer as plain data. The consumer
//! renders these nodes into proxy-specific configuration; nothing here knows
//! about any wire format.

#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

mod conditions;
mod policy;

pub use self::conditions::{HeaderMatchCondition, HeaderMatchType, PathMatchCondition};
pub use self::policy::{
    HeadersPolicy, HttpHealthCheckPolicy, LoadBalancerStrategy, MinTlsVersion, Protocol,
    RetryPolicy, TcpHealthCheckPolicy, Timeout, TimeoutPolicy,
};

use std::fmt;

/// The namespace and name identifying a Kubernetes resource.
#[derive(Clone, Debug, Default, Eq, Hash, PartialEq, PartialOrd, Ord)]
pub struct ResourceId {
    pub namespace: String,
    pub name: String,
}

impl ResourceId {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    /// Splits a possibly namespace-qualified `ns/name` string, falling back to
    /// `default_namespace` when no qualifier is present.
    pub fn parse(s: &str, default_namespace: &str) -> Self {
        match s.split_once('/') {
            Some((namespace, name)) => Self::new(namespace, name),
            None => Self::new(default_namespace, s),
        }
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// A TLS serving certificate resolved from the snapshot.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Secret {
    pub namespace: String,
    pub name: String,
    pub cert: Vec<u8>,
    pub key: Vec<u8>,
}

/// Constraints applied when validating a TLS peer, downstream or upstream.
///
/// `subject_name` is set for upstream validation only; downstream client
/// validation checks the presented chain against the CA bundle alone.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct PeerValidationContext {
    pub ca_certificate: Vec<u8>,
    pub subject_name: Option<String>,
}

/// An upstream service resolved against the snapshot.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Service {
    pub namespace: String,
    pub name: String,
    pub port: u16,

    /// The protocol spoken toward the upstream, when a protocol annotation
    /// selects one. `None` means plaintext HTTP/1.
    pub protocol: Option<Protocol>,

    /// Set when the service is of type `ExternalName`.
    pub external_name: Option<String>,
}

/// A forwarding target: one resolved upstream plus the policies that shape
/// traffic sent to it.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Cluster {
    pub upstream: Service,
    pub protocol: Option<Protocol>,
    pub weight: u32,
    pub load_balancer_strategy: LoadBalancerStrategy,
    pub http_health_check_policy: Option<HttpHealthCheckPolicy>,
    pub tcp_health_check_policy: Option<TcpHealthCheckPolicy>,
    pub upstream_validation: Option<PeerValidationContext>,
    pub request_headers_policy: Option<HeadersPolicy>,
    pub response_headers_policy: Option<HeadersPolicy>,

    /// SNI sent on upstream TLS connections.
    pub sni: Option<String>,
}

/// Shadow-traffic target for a route. Mirrored requests are fire-and-forget;
/// responses from the mirror are discarded.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct MirrorPolicy {
    pub cluster: Cluster,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Route {
    /// The merged path condition. Always present; an unconditioned route
    /// matches the `/` prefix.
    pub path_match_condition: PathMatchCondition,
    pub header_match_conditions: Vec<HeaderMatchCondition>,
    pub clusters: Vec<Cluster>,
    pub mirror_policy: Option<MirrorPolicy>,
    pub prefix_rewrite: Option<String>,
    pub websocket: bool,

    /// When set, requests arriving over plaintext are redirected to the
    /// secure listener instead of being forwarded.
    pub https_upgrade: bool,
    pub timeout_policy: TimeoutPolicy,
    pub retry_policy: Option<RetryPolicy>,
    pub request_headers_policy: Option<HeadersPolicy>,
    pub response_headers_policy: Option<HeadersPolicy>,
}

impl Route {
    pub fn has_path_prefix(&self) -> bool {
        matches!(self.path_match_condition, PathMatchCondition::Prefix(_))
    }
}

/// Anything routes can be attached to.
pub trait Vhost {
    fn add_route(&mut self, route: Route);
}

/// The plaintext-listener projection of an FQDN.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct VirtualHost {
    pub name: String,
    pub routes: Vec<Route>,
}

impl VirtualHost {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            routes: Vec::new(),
        }
    }
}

impl Vhost for VirtualHost {
    fn add_route(&mut self, route: Route) {
        self.routes.push(route);
    }
}

/// The TLS-listener projection of an FQDN.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct SecureVirtualHost {
    pub virtual_host: VirtualHost,
    pub secret: Option<Secret>,
    pub min_tls_version: MinTlsVersion,
    pub fallback_certificate: Option<Secret>,
    pub downstream_validation: Option<PeerValidationContext>,
    pub tcp_proxy: Option<TcpProxy>,
}

impl SecureVirtualHost {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            virtual_host: VirtualHost::new(name),
            ..Self::default()
        }
    }
}

impl Vhost for SecureVirtualHost {
    fn add_route(&mut self, route: Route) {
        self.virtual_host.add_route(route);
    }
}

/// An L4 forwarding decision attached to a secure virtual host: connections
/// matching the host's SNI are proxied to these clusters without L7 routing.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct TcpProxy {
    pub clusters: Vec<Cluster>,
}
