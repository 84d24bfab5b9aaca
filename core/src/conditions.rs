use std::fmt;

/// The single, merged path condition carried by a route.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum PathMatchCondition {
    Prefix(String),
    Exact(String),
}

impl PathMatchCondition {
    /// The prefix value, when this is a prefix match.
    pub fn prefix(&self) -> Option<&str> {
        match self {
            Self::Prefix(prefix) => Some(prefix),
            Self::Exact(_) => None,
        }
    }
}

impl fmt::Display for PathMatchCondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Prefix(prefix) => write!(f, "prefix: {prefix}"),
            Self::Exact(path) => write!(f, "exact: {path}"),
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum HeaderMatchType {
    Exact,
    Contains,
    Present,
}

/// One header predicate on a route. Names are normalized to lower case when
/// conditions are merged, so consumers may compare them bytewise.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct HeaderMatchCondition {
    pub name: String,
    pub value: String,
    pub match_type: HeaderMatchType,
    pub invert: bool,
}
