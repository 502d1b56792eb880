//! Identifier types shared across the migration engine.
//!
//! A document is addressed by a [`DocumentUuid`] that stays stable across
//! every backend hosting a replica. Each backend additionally knows the
//! document under its own native identifier; the pair of provider name and
//! native id is a [`ProviderId`]. A [`CompositeId`] fully qualifies a replica
//! for cross-instance references.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// 128-bit document identifier, stable across backends.
///
/// Assigned once at creation. Copies get new UUIDs; moves and migrations
/// preserve the UUID.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DocumentUuid(pub Uuid);

impl DocumentUuid {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for DocumentUuid {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for DocumentUuid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for DocumentUuid {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

impl From<Uuid> for DocumentUuid {
    fn from(value: Uuid) -> Self {
        Self(value)
    }
}

/// Backend-qualified native identifier for one replica of a document.
///
/// The native id format is opaque per backend (an object path, an API file
/// id, a filesystem path). Many provider ids may map to one document UUID.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProviderId {
    pub provider: String,
    pub native_id: String,
}

impl ProviderId {
    pub fn new(provider: impl Into<String>, native_id: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            native_id: native_id.into(),
        }
    }
}

impl fmt::Display for ProviderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.provider, self.native_id)
    }
}

/// Fully qualified cross-instance document reference.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompositeId {
    pub uuid: DocumentUuid,
    pub provider_id: ProviderId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_scope: Option<String>,
}

impl CompositeId {
    pub fn new(uuid: DocumentUuid, provider_id: ProviderId) -> Self {
        Self {
            uuid,
            provider_id,
            project_scope: None,
        }
    }

    pub fn scoped(mut self, scope: impl Into<String>) -> Self {
        self.project_scope = Some(scope.into());
        self
    }
}

impl fmt::Display for CompositeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.project_scope {
            Some(scope) => write!(f, "{}/{}@{}", scope, self.uuid, self.provider_id),
            None => write!(f, "{}@{}", self.uuid, self.provider_id),
        }
    }
}
