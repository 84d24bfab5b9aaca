#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

mod duration;
pub mod httpproxy;
pub mod tls_certificate_delegation;

pub use self::duration::{DurationParseError, GoDuration};
pub use self::httpproxy::{HttpProxy, HttpProxySpec, HttpProxyStatus};
pub use self::tls_certificate_delegation::{
    CertificateDelegation, TlsCertificateDelegation, TlsCertificateDelegationSpec,
};

pub use k8s_openapi::api::core::v1::{Secret, Service, ServicePort, ServiceSpec};
pub use k8s_openapi::ByteString;
pub use kube::core::ObjectMeta;
pub use kube::{Resource, ResourceExt};

/// The API group served by this controller's custom resources.
pub const API_GROUP: &str = "trellis.dev";
