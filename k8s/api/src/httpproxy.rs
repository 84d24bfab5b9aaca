/// HTTPProxy declares how requests for a virtual host are routed to upstream
/// services, or delegates a subtree of that routing to other HTTPProxies in
/// the cluster. A document carrying a `virtualhost` stanza is a *root* and
/// owns its FQDN; a document without one only contributes routes when some
/// root includes it.
#[derive(
    Clone,
    Debug,
    Default,
    kube::CustomResource,
    serde::Deserialize,
    serde::Serialize,
    schemars::JsonSchema,
)]
#[kube(
    group = "trellis.dev",
    version = "v1alpha1",
    kind = "HTTPProxy",
    root = "HttpProxy",
    status = "HttpProxyStatus",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct HttpProxySpec {
    /// The virtual host this document owns. Present on roots only.
    #[serde(default, skip_serializing_if = "Option::is_none", rename = "virtualhost")]
    pub virtual_host: Option<VirtualHost>,

    /// The routes contributed by this document. Conditions accumulated along
    /// the delegation chain are prepended to each route's own conditions.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub routes: Vec<Route>,

    /// Subtrees delegated to other HTTPProxies.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub includes: Vec<Include>,

    /// An L4 proxy for the virtual host. Requires TLS on the virtual host.
    #[serde(default, skip_serializing_if = "Option::is_none", rename = "tcpproxy")]
    pub tcp_proxy: Option<TcpProxy>,
}

/// The most recent outcome of processing this HTTPProxy.
#[derive(Clone, Debug, Default, PartialEq, serde::Deserialize, serde::Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct HttpProxyStatus {
    #[serde(default)]
    pub current_status: String,
    #[serde(default)]
    pub description: String,
}

#[derive(Clone, Debug, Default, PartialEq, serde::Deserialize, serde::Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct VirtualHost {
    /// The fully qualified domain name of the virtual host. Must not contain
    /// wildcards.
    pub fqdn: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tls: Option<Tls>,
}

/// TLS termination or passthrough for a virtual host. Exactly one of
/// `secretName` and `passthrough` must be specified.
#[derive(Clone, Debug, Default, PartialEq, serde::Deserialize, serde::Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Tls {
    /// The serving certificate, as `name` or `namespace/name`. Referencing a
    /// secret in another namespace requires a TLSCertificateDelegation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret_name: Option<String>,

    /// Minimum TLS version to accept; `"1.2"` or `"1.3"`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub minimum_protocol_version: Option<String>,

    /// Forward the TLS session to the upstream without terminating it.
    #[serde(default)]
    pub passthrough: bool,

    /// Serve the cluster-wide fallback certificate to clients that do not
    /// send SNI. Incompatible with `clientValidation`.
    #[serde(default)]
    pub enable_fallback_certificate: bool,

    /// Require and verify client certificates.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_validation: Option<DownstreamValidation>,
}

/// Client-certificate verification for a terminating virtual host.
#[derive(Clone, Debug, Default, PartialEq, serde::Deserialize, serde::Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct DownstreamValidation {
    /// Name of the secret holding the CA bundle, in the proxy's namespace.
    pub ca_secret: String,
}

/// A delegation edge: routes contributed by the target document have this
/// include's conditions prepended.
#[derive(Clone, Debug, Default, PartialEq, serde::Deserialize, serde::Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Include {
    pub name: String,

    /// Defaults to the including document's namespace.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<MatchCondition>,
}

/// One request predicate. At most one of `prefix` and `exact` may be set in a
/// single condition; header conditions compose freely.
#[derive(Clone, Debug, Default, PartialEq, serde::Deserialize, serde::Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct MatchCondition {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prefix: Option<String>,

    /// Matches the request path exactly. Not permitted on includes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exact: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub header: Option<HeaderMatchCondition>,
}

/// A header predicate. Exactly one of the match fields should be set;
/// `present` matches any value.
#[derive(Clone, Debug, Default, PartialEq, serde::Deserialize, serde::Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct HeaderMatchCondition {
    pub name: String,

    #[serde(default)]
    pub present: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contains: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none", rename = "notcontains")]
    pub not_contains: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exact: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none", rename = "notexact")]
    pub not_exact: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq, serde::Deserialize, serde::Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Route {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<MatchCondition>,

    /// The upstream services for this route. At least one is required; at
    /// most one may be marked `mirror`.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub services: Vec<Service>,

    #[serde(default)]
    pub enable_websockets: bool,

    /// Permit plaintext requests even when the virtual host terminates TLS.
    #[serde(default)]
    pub permit_insecure: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_policy: Option<TimeoutPolicy>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_policy: Option<RetryPolicy>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub health_check_policy: Option<HttpHealthCheckPolicy>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub load_balancer_policy: Option<LoadBalancerPolicy>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path_rewrite_policy: Option<PathRewritePolicy>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_headers_policy: Option<HeadersPolicy>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_headers_policy: Option<HeadersPolicy>,
}

/// A weighted upstream service reference.
#[derive(Clone, Debug, Default, PartialEq, serde::Deserialize, serde::Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Service {
    pub name: String,

    /// Port in the range 1-65535.
    pub port: i32,

    /// Protocol override: one of `h2`, `h2c`, or `tls`. When absent the
    /// upstream service's protocol annotation, if any, applies.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub protocol: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weight: Option<u32>,

    /// Copy traffic to this service instead of load-balancing over it.
    #[serde(default)]
    pub mirror: bool,

    /// Verification of the upstream's serving certificate. Only meaningful
    /// with a TLS-bearing protocol.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upstream_validation: Option<UpstreamValidation>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_headers_policy: Option<HeadersPolicy>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_headers_policy: Option<HeadersPolicy>,
}

#[derive(Clone, Debug, Default, PartialEq, serde::Deserialize, serde::Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct UpstreamValidation {
    /// Name of the secret holding the CA bundle, in the proxy's namespace.
    pub ca_secret: String,

    /// Subject name the upstream certificate must present.
    pub subject_name: String,
}

/// An L4 proxy stanza. Specify either `services` or an include, not both.
#[derive(Clone, Debug, Default, PartialEq, serde::Deserialize, serde::Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct TcpProxy {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub load_balancer_policy: Option<LoadBalancerPolicy>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub services: Vec<Service>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub include: Option<TcpProxyInclude>,

    /// Deprecated plural form of `include`; `include` wins when both are set.
    #[serde(default, skip_serializing_if = "Option::is_none", rename = "includes")]
    pub includes_deprecated: Option<TcpProxyInclude>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub health_check_policy: Option<TcpHealthCheckPolicy>,
}

#[derive(Clone, Debug, Default, PartialEq, serde::Deserialize, serde::Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct TcpProxyInclude {
    pub name: String,

    /// Defaults to the including document's namespace.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
}

/// Timeouts for forwarded requests, as Go-format duration strings.
/// `"infinity"` disables a timeout.
#[derive(Clone, Debug, Default, PartialEq, serde::Deserialize, serde::Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct TimeoutPolicy {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub idle: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq, serde::Deserialize, serde::Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct RetryPolicy {
    /// Maximum number of retries. Values below 1 are treated as 1.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub count: Option<u32>,

    /// Per-try timeout as a Go-format duration string.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub per_try_timeout: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq, serde::Deserialize, serde::Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct HeadersPolicy {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub set: Vec<HeaderValue>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub remove: Vec<String>,
}

#[derive(Clone, Debug, Default, PartialEq, serde::Deserialize, serde::Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct HeaderValue {
    pub name: String,
    pub value: String,
}

/// Load-balancing strategy for a route's clusters: one of
/// `WeightedLeastRequest`, `Random`, or `Cookie`. Anything else selects the
/// round-robin default.
#[derive(Clone, Debug, Default, PartialEq, serde::Deserialize, serde::Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct LoadBalancerPolicy {
    #[serde(default)]
    pub strategy: String,
}

#[derive(Clone, Debug, Default, PartialEq, serde::Deserialize, serde::Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct HttpHealthCheckPolicy {
    pub path: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,

    #[serde(default)]
    pub interval_seconds: i64,

    #[serde(default)]
    pub timeout_seconds: i64,

    #[serde(default)]
    pub unhealthy_threshold_count: u32,

    #[serde(default)]
    pub healthy_threshold_count: u32,
}

#[derive(Clone, Debug, Default, PartialEq, serde::Deserialize, serde::Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct TcpHealthCheckPolicy {
    #[serde(default)]
    pub interval_seconds: i64,

    #[serde(default)]
    pub timeout_seconds: i64,

    #[serde(default)]
    pub unhealthy_threshold_count: u32,

    #[serde(default)]
    pub healthy_threshold_count: u32,
}

/// Rewrite of the matched path prefix before forwarding.
#[derive(Clone, Debug, Default, PartialEq, serde::Deserialize, serde::Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct PathRewritePolicy {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub replace_prefix: Vec<ReplacePrefix>,
}

#[derive(Clone, Debug, Default, PartialEq, serde::Deserialize, serde::Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ReplacePrefix {
    /// The matched prefix this replacement applies to. An empty prefix is the
    /// default replacement, applied when no other entry matches exactly.
    #[serde(default)]
    pub prefix: String,

    pub replacement: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spec_serializes_with_wire_field_names() {
        let spec = HttpProxySpec {
            virtual_host: Some(VirtualHost {
                fqdn: "ex.com".to_string(),
                tls: None,
            }),
            routes: vec![Route {
                conditions: vec![MatchCondition {
                    prefix: Some("/".to_string()),
                    ..Default::default()
                }],
                services: vec![Service {
                    name: "svc".to_string(),
                    port: 80,
                    ..Default::default()
                }],
                ..Default::default()
            }],
            includes: Vec::new(),
            tcp_proxy: Some(TcpProxy {
                includes_deprecated: Some(TcpProxyInclude {
                    name: "leaf".to_string(),
                    namespace: None,
                }),
                ..Default::default()
            }),
        };

        let value = serde_json::to_value(&spec).expect("spec serializes");
        assert_eq!(value["virtualhost"]["fqdn"], "ex.com");
        assert_eq!(value["routes"][0]["conditions"][0]["prefix"], "/");
        assert_eq!(value["routes"][0]["services"][0]["port"], 80);
        // The deprecated plural include keeps its wire name.
        assert_eq!(value["tcpproxy"]["includes"]["name"], "leaf");
    }

    #[test]
    fn spec_deserializes_camel_case_documents() {
        let spec: HttpProxySpec = serde_json::from_value(serde_json::json!({
            "virtualhost": {
                "fqdn": "ex.com",
                "tls": {"secretName": "serving", "enableFallbackCertificate": true},
            },
            "routes": [{
                "conditions": [
                    {"prefix": "/"},
                    {"header": {"name": "x-env", "notcontains": "dev"}},
                ],
                "permitInsecure": true,
                "services": [{"name": "svc", "port": 80}],
            }],
        }))
        .expect("spec deserializes");

        let tls = spec.virtual_host.as_ref().and_then(|vh| vh.tls.as_ref()).expect("tls");
        assert_eq!(tls.secret_name.as_deref(), Some("serving"));
        assert!(tls.enable_fallback_certificate);
        assert!(spec.routes[0].permit_insecure);
        let header = spec.routes[0].conditions[1].header.as_ref().expect("header");
        assert_eq!(header.not_contains.as_deref(), Some("dev"));
    }
}
