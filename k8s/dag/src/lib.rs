//! Translation of HTTPProxy resources into a forwarding graph.
//!
//! One translation round works over an immutable [`Source`] snapshot:
//!
//! ```ignore
//! [ Source ] -> HttpProxyProcessor::run(&mut Builder) -> Builder::build() -> [ Dag ]
//! ```
//!
//! The processor selects root HTTPProxies (those carrying a `virtualhost`
//! stanza), walks their delegation trees, validates TLS and upstream policy,
//! and populates the builder with virtual hosts, routes, and clusters. Every
//! document in the snapshot receives exactly one status per round: valid,
//! invalid with a reason, or orphaned when no root's delegation chain reaches
//! it. Nothing here performs I/O; lookups are in-memory against the snapshot,
//! and the graph is drained from the builder when the round completes.

#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

mod annotation;
mod builder;
mod conditions;
mod httpproxy;
mod policy;
mod source;
mod status;

pub use self::builder::{Builder, Dag, ServiceError};
pub use self::httpproxy::HttpProxyProcessor;
pub use self::source::{valid_ca, valid_tls_secret, SecretError, Source};
pub use self::status::{ObjectStatusWriter, Status, StatusValue};

/// A translation pass over one snapshot. Implementations are invoked by the
/// reconciler on every snapshot change and must run to completion; a
/// processor instance is not reentrant.
pub trait Processor {
    fn run(&mut self, dag: &mut Builder);
}
