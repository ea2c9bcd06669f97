//! Entity identifiers
//!
//! Ids cross the storage boundary in their text form (`Display` / `FromStr`),
//! so a single store implementation serves every relation whatever its id
//! types are.

use crate::error::StagingError;
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use std::fmt;
use std::hash::Hash;
use std::str::FromStr;
use uuid::Uuid;

/// An identifier usable on either side of a relation.
pub trait EntityId:
    Clone + Ord + Hash + fmt::Debug + fmt::Display + FromStr + Send + Sync + 'static
{
    /// Reject ids that can never name a stored row.
    fn validate(&self) -> Result<(), StagingError>;
}

fn validate_text(id: &str) -> Result<(), StagingError> {
    if id.trim().is_empty() {
        return Err(StagingError::EmptyId);
    }
    if id.chars().any(char::is_control) {
        return Err(StagingError::InvalidId {
            id: id.escape_debug().to_string(),
            reason: "contains control characters",
        });
    }
    Ok(())
}

impl EntityId for String {
    fn validate(&self) -> Result<(), StagingError> {
        validate_text(self)
    }
}

impl EntityId for Uuid {
    fn validate(&self) -> Result<(), StagingError> {
        if self.is_nil() {
            return Err(StagingError::InvalidId {
                id: self.to_string(),
                reason: "nil uuid",
            });
        }
        Ok(())
    }
}

impl EntityId for i64 {
    fn validate(&self) -> Result<(), StagingError> {
        if *self <= 0 {
            return Err(StagingError::InvalidId {
                id: self.to_string(),
                reason: "serial ids start at 1",
            });
        }
        Ok(())
    }
}

macro_rules! uuid_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub Uuid);

        impl $name {
            pub fn new_v4() -> Self {
                Self(Uuid::new_v4())
            }
        }

        impl From<Uuid> for $name {
            fn from(value: Uuid) -> Self {
                Self(value)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                self.0.fmt(f)
            }
        }

        impl FromStr for $name {
            type Err = uuid::Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Uuid::parse_str(s.trim()).map(Self)
            }
        }

        impl EntityId for $name {
            fn validate(&self) -> Result<(), StagingError> {
                self.0.validate()
            }
        }
    };
}

uuid_id!(
    /// A registered git worktree.
    WorktreeId
);
uuid_id!(
    /// A registered CLI pipeline.
    PipelineId
);
uuid_id!(
    /// A shared service package.
    ServiceId
);

/// Application directory name, e.g. `dhg-admin-code`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AppName(String);

impl AppName {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AppName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for AppName {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(s.to_string()))
    }
}

impl EntityId for AppName {
    fn validate(&self) -> Result<(), StagingError> {
        validate_text(&self.0)?;
        if self.0.chars().any(char::is_whitespace) {
            return Err(StagingError::InvalidId {
                id: self.0.clone(),
                reason: "app names cannot contain whitespace",
            });
        }
        Ok(())
    }
}
