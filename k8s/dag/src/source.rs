use ahash::AHashMap as HashMap;
use std::sync::Arc;
use trellis_ingress_core::{ResourceId, Secret};
use trellis_ingress_k8s_api::{self as api, HttpProxy, ResourceExt, TlsCertificateDelegation};

pub const TLS_CERT_KEY: &str = "tls.crt";
pub const TLS_PRIVATE_KEY_KEY: &str = "tls.key";
pub const CA_CERTIFICATE_KEY: &str = "ca.crt";

const TLS_SECRET_TYPE: &str = "kubernetes.io/tls";

/// A read-only view of the ingress-relevant resources for one translation
/// round. The snapshot is assembled by the watch layer and handed to the
/// processor; nothing here mutates it during a run.
#[derive(Debug, Default)]
pub struct Source {
    pub httpproxies: HashMap<ResourceId, Arc<HttpProxy>>,
    pub services: HashMap<ResourceId, api::Service>,
    pub secrets: HashMap<ResourceId, api::Secret>,
    pub certificate_delegations: HashMap<ResourceId, Arc<TlsCertificateDelegation>>,

    /// Namespaces in which root HTTPProxies are permitted. Empty permits all.
    pub root_namespaces: Vec<String>,
}

#[derive(Clone, Debug, Eq, PartialEq, thiserror::Error)]
pub enum SecretError {
    #[error("Secret not found")]
    NotFound,

    #[error("Secret type is not {TLS_SECRET_TYPE:?}")]
    WrongType,

    #[error("empty {0:?} key")]
    EmptyKey(&'static str),
}

/// Accepts secrets usable as serving certificates: type `kubernetes.io/tls`
/// with both the certificate and the private key present.
pub fn valid_tls_secret(secret: &api::Secret) -> Result<(), SecretError> {
    if secret.type_.as_deref() != Some(TLS_SECRET_TYPE) {
        return Err(SecretError::WrongType);
    }
    for key in [TLS_CERT_KEY, TLS_PRIVATE_KEY_KEY] {
        if secret_data(secret, key).is_none() {
            return Err(SecretError::EmptyKey(key));
        }
    }
    Ok(())
}

/// Accepts secrets usable as CA bundles: `ca.crt` present and non-empty.
pub fn valid_ca(secret: &api::Secret) -> Result<(), SecretError> {
    if secret_data(secret, CA_CERTIFICATE_KEY).is_none() {
        return Err(SecretError::EmptyKey(CA_CERTIFICATE_KEY));
    }
    Ok(())
}

fn secret_data<'s>(secret: &'s api::Secret, key: &str) -> Option<&'s [u8]> {
    secret
        .data
        .as_ref()
        .and_then(|data| data.get(key))
        .map(|api::ByteString(bytes)| bytes.as_slice())
        .filter(|bytes| !bytes.is_empty())
}

impl Source {
    /// Looks up a secret and checks it against a capability validator such as
    /// [`valid_tls_secret`] or [`valid_ca`].
    pub fn lookup_secret(
        &self,
        id: &ResourceId,
        valid: impl Fn(&api::Secret) -> Result<(), SecretError>,
    ) -> Result<&api::Secret, SecretError> {
        let secret = self.secrets.get(id).ok_or(SecretError::NotFound)?;
        valid(secret)?;
        Ok(secret)
    }

    /// Whether `namespace` may reference the given secret: always within the
    /// secret's own namespace, otherwise only when a TLSCertificateDelegation
    /// in the secret's namespace targets `namespace` (or all namespaces).
    pub fn delegation_permitted(&self, secret: &ResourceId, namespace: &str) -> bool {
        if secret.namespace == namespace {
            return true;
        }
        self.certificate_delegations
            .iter()
            .filter(|(id, _)| id.namespace == secret.namespace)
            .flat_map(|(_, cd)| &cd.spec.delegations)
            .filter(|d| d.secret_name == secret.name)
            .any(|d| d.target_namespaces.iter().any(|ns| ns == "*" || ns == namespace))
    }

    pub fn apply_httpproxy(&mut self, proxy: HttpProxy) {
        match object_id(&proxy) {
            Some(id) => {
                self.httpproxies.insert(id, Arc::new(proxy));
            }
            None => tracing::warn!(kind = "HTTPProxy", "ignoring resource without a namespace"),
        }
    }

    pub fn apply_service(&mut self, service: api::Service) {
        match object_id(&service) {
            Some(id) => {
                self.services.insert(id, service);
            }
            None => tracing::warn!(kind = "Service", "ignoring resource without a namespace"),
        }
    }

    pub fn apply_secret(&mut self, secret: api::Secret) {
        match object_id(&secret) {
            Some(id) => {
                self.secrets.insert(id, secret);
            }
            None => tracing::warn!(kind = "Secret", "ignoring resource without a namespace"),
        }
    }

    pub fn apply_certificate_delegation(&mut self, delegation: TlsCertificateDelegation) {
        match object_id(&delegation) {
            Some(id) => {
                self.certificate_delegations.insert(id, Arc::new(delegation));
            }
            None => tracing::warn!(
                kind = "TLSCertificateDelegation",
                "ignoring resource without a namespace"
            ),
        }
    }
}

/// Extracts the serving certificate from a snapshot secret already checked by
/// [`valid_tls_secret`].
pub(crate) fn tls_secret(id: &ResourceId, secret: &api::Secret) -> Secret {
    Secret {
        namespace: id.namespace.clone(),
        name: id.name.clone(),
        cert: secret_data(secret, TLS_CERT_KEY).unwrap_or_default().to_vec(),
        key: secret_data(secret, TLS_PRIVATE_KEY_KEY)
            .unwrap_or_default()
            .to_vec(),
    }
}

/// Extracts the CA bundle from a snapshot secret already checked by
/// [`valid_ca`].
pub(crate) fn ca_bundle(secret: &api::Secret) -> Vec<u8> {
    secret_data(secret, CA_CERTIFICATE_KEY)
        .unwrap_or_default()
        .to_vec()
}

/// The namespaced name of a resource, when its metadata carries one.
pub(crate) fn object_id(obj: &impl ResourceExt) -> Option<ResourceId> {
    let namespace = obj.namespace()?;
    let name = obj.meta().name.clone()?;
    Some(ResourceId::new(namespace, name))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests::{mk_ca_secret, mk_delegation, mk_tls_secret};

    #[test]
    fn tls_secret_validator_requires_cert_and_key() {
        let mut secret = mk_tls_secret("default", "tls");
        assert_eq!(valid_tls_secret(&secret), Ok(()));

        secret.data.as_mut().unwrap().remove(TLS_PRIVATE_KEY_KEY);
        assert_eq!(
            valid_tls_secret(&secret),
            Err(SecretError::EmptyKey(TLS_PRIVATE_KEY_KEY))
        );

        secret.type_ = Some("Opaque".to_string());
        assert_eq!(valid_tls_secret(&secret), Err(SecretError::WrongType));
    }

    #[test]
    fn ca_validator_requires_bundle() {
        assert_eq!(valid_ca(&mk_ca_secret("default", "ca")), Ok(()));
        assert_eq!(
            valid_ca(&mk_tls_secret("default", "tls")),
            Err(SecretError::EmptyKey(CA_CERTIFICATE_KEY))
        );
    }

    #[test]
    fn delegation_matrix() {
        let mut source = Source::default();
        source.apply_certificate_delegation(mk_delegation("certs", "wildcard", "fallback", &["*"]));
        source.apply_certificate_delegation(mk_delegation("certs", "scoped", "serving", &["app"]));

        let fallback = ResourceId::new("certs", "fallback");
        let serving = ResourceId::new("certs", "serving");
        let undelegated = ResourceId::new("certs", "other");

        // Same-namespace references never need a delegation.
        assert!(source.delegation_permitted(&undelegated, "certs"));

        assert!(source.delegation_permitted(&fallback, "anywhere"));
        assert!(source.delegation_permitted(&serving, "app"));
        assert!(!source.delegation_permitted(&serving, "elsewhere"));
        assert!(!source.delegation_permitted(&undelegated, "app"));
    }
}
