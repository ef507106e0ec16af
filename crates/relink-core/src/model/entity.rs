//! Identifier newtypes: catalog entities, edges and groups.

use serde::{Deserialize, Serialize};
use std::borrow::Borrow;
use std::fmt;

/// Opaque catalog item identifier.
///
/// Identifiers are trimmed on construction and never empty. The engine
/// attaches no behavior to them beyond equality and ordering.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityId(String);

impl EntityId {
    /// Build an identifier from raw input, trimming surrounding whitespace.
    ///
    /// # Errors
    ///
    /// Returns [`InvalidEntityId`] when the trimmed input is empty.
    pub fn new(raw: &str) -> Result<Self, InvalidEntityId> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(InvalidEntityId);
        }
        Ok(Self(trimmed.to_string()))
    }

    /// Build an identifier without validation. Intended for tests and for
    /// values that already passed through [`EntityId::new`].
    #[must_use]
    pub fn new_unchecked(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Borrow<str> for EntityId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl AsRef<str> for EntityId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Error returned for blank entity identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("entity identifier must not be empty")]
pub struct InvalidEntityId;

/// Stable group identifier. Allocated monotonically, never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GroupId(pub u64);

impl fmt::Display for GroupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Stable edge identifier assigned by the edge store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EdgeId(pub u64);

impl fmt::Display for EdgeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "e{}", self.0)
    }
}

/// Which side of a conversion an entity occupies inside a group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Side {
    Original,
    Replacement,
}

impl Side {
    #[must_use]
    pub const fn opposite(self) -> Self {
        match self {
            Self::Original => Self::Replacement,
            Self::Replacement => Self::Original,
        }
    }
}

/// Answer to "where does this entity appear?" across live edges.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntitySide {
    Original,
    Replacement,
    Both,
    None,
}

impl fmt::Display for EntitySide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Original => "original",
            Self::Replacement => "replacement",
            Self::Both => "both",
            Self::None => "none",
        })
    }
}
