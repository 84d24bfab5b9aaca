use std::fmt;
use trellis_ingress_core::ResourceId;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum StatusValue {
    Valid,
    Invalid,
    Orphaned,
}

impl fmt::Display for StatusValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Valid => "valid".fmt(f),
            Self::Invalid => "invalid".fmt(f),
            Self::Orphaned => "orphaned".fmt(f),
        }
    }
}

/// The outcome of processing one HTTPProxy in one translation round.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Status {
    pub status: StatusValue,
    pub description: String,

    /// The FQDN the document contributes to, when known by the time the
    /// status was recorded.
    pub vhost: Option<String>,
}

/// A scoped status for a single document. Writers accumulate state locally
/// and are buffered into the builder by `Builder::commit`; a writer that
/// never reached a terminal state commits nothing. Each visited document gets
/// its own writer while walking includes, and the first committed status for
/// a document wins for the round.
#[derive(Debug)]
pub struct ObjectStatusWriter {
    id: ResourceId,
    vhost: Option<String>,
    state: Option<(StatusValue, String)>,
}

impl ObjectStatusWriter {
    pub fn new(id: ResourceId) -> Self {
        Self {
            id,
            vhost: None,
            state: None,
        }
    }

    pub fn with_vhost(&mut self, vhost: impl Into<String>) -> &mut Self {
        self.vhost = Some(vhost.into());
        self
    }

    pub fn set_invalid(&mut self, description: impl Into<String>) {
        self.state = Some((StatusValue::Invalid, description.into()));
    }

    pub fn set_valid(&mut self) {
        self.state = Some((StatusValue::Valid, "valid HTTPProxy".to_string()));
    }

    pub fn set_orphaned(&mut self, description: impl Into<String>) {
        self.state = Some((StatusValue::Orphaned, description.into()));
    }

    pub(crate) fn into_status(self) -> Option<(ResourceId, Status)> {
        let (status, description) = self.state?;
        Some((
            self.id,
            Status {
                status,
                description,
                vhost: self.vhost,
            },
        ))
    }
}
