use crate::annotation::upstream_protocol;
use crate::source::Source;
use crate::status::{ObjectStatusWriter, Status};
use ahash::AHashMap as HashMap;
use trellis_ingress_core::{ResourceId, SecureVirtualHost, Service, VirtualHost};
use trellis_ingress_k8s_api::{self as api, Resource, ResourceExt};

#[derive(Clone, Debug, Eq, PartialEq, thiserror::Error)]
pub enum ServiceError {
    #[error("service \"{0}\" not found")]
    NotFound(ResourceId),

    #[error("port \"{port}\" on service \"{id}\" not matched")]
    PortNotMatched { id: ResourceId, port: i32 },
}

/// Accumulates the forwarding graph for one translation round. The builder is
/// owned exclusively by the running processor; lookups are idempotent and
/// allocate graph nodes on first reference.
#[derive(Debug, Default)]
pub struct Builder {
    pub source: Source,
    virtual_hosts: HashMap<String, VirtualHost>,
    secure_virtual_hosts: HashMap<String, SecureVirtualHost>,
    services: HashMap<(ResourceId, i32), Service>,
    statuses: HashMap<ResourceId, Status>,
}

/// The graph drained from a builder when a round completes.
#[derive(Debug, Default)]
pub struct Dag {
    pub virtual_hosts: HashMap<String, VirtualHost>,
    pub secure_virtual_hosts: HashMap<String, SecureVirtualHost>,
    pub statuses: HashMap<ResourceId, Status>,
}

impl Builder {
    pub fn new(source: Source) -> Self {
        Self {
            source,
            ..Self::default()
        }
    }

    /// Opens a status scope for the given document. The scope is buffered
    /// into the round's statuses by [`Builder::commit`].
    pub fn with_object(&self, obj: &api::HttpProxy) -> ObjectStatusWriter {
        let id = ResourceId::new(
            obj.namespace().unwrap_or_default(),
            obj.meta().name.clone().unwrap_or_default(),
        );
        ObjectStatusWriter::new(id)
    }

    /// Buffers a status scope. The first status committed for a document wins
    /// for the round; writers that never reached a terminal state are
    /// discarded.
    pub fn commit(&mut self, sw: ObjectStatusWriter) {
        if let Some((id, status)) = sw.into_status() {
            self.statuses.entry(id).or_insert(status);
        }
    }

    pub fn lookup_virtual_host(&mut self, name: &str) -> &mut VirtualHost {
        self.virtual_hosts
            .entry(name.to_string())
            .or_insert_with(|| VirtualHost::new(name))
    }

    pub fn lookup_secure_virtual_host(&mut self, name: &str) -> &mut SecureVirtualHost {
        self.secure_virtual_hosts
            .entry(name.to_string())
            .or_insert_with(|| SecureVirtualHost::new(name))
    }

    /// Resolves an upstream service and port against the snapshot, recording
    /// the resolution so repeated references share one graph node.
    pub fn lookup_service(&mut self, id: &ResourceId, port: i32) -> Result<Service, ServiceError> {
        if let Some(service) = self.services.get(&(id.clone(), port)) {
            return Ok(service.clone());
        }

        let svc = self
            .source
            .services
            .get(id)
            .ok_or_else(|| ServiceError::NotFound(id.clone()))?;
        let spec = svc.spec.as_ref();
        let matched = spec
            .and_then(|spec| spec.ports.as_ref())
            .into_iter()
            .flatten()
            .find(|p| p.port == port)
            .ok_or_else(|| ServiceError::PortNotMatched {
                id: id.clone(),
                port,
            })?;

        let external_name = spec
            .filter(|spec| spec.type_.as_deref() == Some("ExternalName"))
            .and_then(|spec| spec.external_name.clone());
        let service = Service {
            namespace: id.namespace.clone(),
            name: id.name.clone(),
            port: matched.port as u16,
            protocol: upstream_protocol(svc.annotations(), matched),
            external_name,
        };
        self.services
            .insert((id.clone(), port), service.clone());
        Ok(service)
    }

    /// Drains the accumulated graph, leaving the builder empty for the next
    /// round.
    pub fn build(&mut self) -> Dag {
        self.services.clear();
        Dag {
            virtual_hosts: std::mem::take(&mut self.virtual_hosts),
            secure_virtual_hosts: std::mem::take(&mut self.secure_virtual_hosts),
            statuses: std::mem::take(&mut self.statuses),
        }
    }
}
