/// TLSCertificateDelegation permits HTTPProxies in other namespaces to
/// reference TLS secrets in this resource's namespace.
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
    kind = "TLSCertificateDelegation",
    root = "TlsCertificateDelegation",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct TlsCertificateDelegationSpec {
    pub delegations: Vec<CertificateDelegation>,
}

#[derive(Clone, Debug, Default, PartialEq, serde::Deserialize, serde::Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct CertificateDelegation {
    /// The secret, in this resource's namespace, being delegated.
    pub secret_name: String,

    /// Namespaces permitted to reference the secret. `"*"` permits all.
    pub target_namespaces: Vec<String>,
}
