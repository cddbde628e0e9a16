//! Mutation kinds and origin tags.

use serde::{Deserialize, Serialize};
use std::fmt;

/// What happened to a domain object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MutationKind {
    /// The object was created.
    Create,
    /// The object was updated.
    Update,
    /// The object was deleted.
    Delete,
}

impl MutationKind {
    /// Converts to a numeric code for the record envelope.
    pub fn to_code(&self) -> u8 {
        match self {
            MutationKind::Create => 1,
            MutationKind::Update => 2,
            MutationKind::Delete => 3,
        }
    }

    /// Converts from a numeric code.
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            1 => Some(MutationKind::Create),
            2 => Some(MutationKind::Update),
            3 => Some(MutationKind::Delete),
            _ => None,
        }
    }

    /// All kinds, in code order.
    pub const ALL: [MutationKind; 3] = [
        MutationKind::Create,
        MutationKind::Update,
        MutationKind::Delete,
    ];
}

impl fmt::Display for MutationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MutationKind::Create => write!(f, "create"),
            MutationKind::Update => write!(f, "update"),
            MutationKind::Delete => write!(f, "delete"),
        }
    }
}

/// Who initiated a mutation.
///
/// Writes made by the application are `Local`. Writes the sync engine makes
/// into local storage (acknowledgment echoes) are `SyncEngine`, and the
/// capture pipeline drops them so they never travel back to the remote.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Origin {
    /// Application-initiated.
    #[default]
    Local,
    /// Written back by the sync engine.
    SyncEngine,
}

impl Origin {
    /// Converts to a numeric code for the record envelope.
    pub fn to_code(&self) -> u8 {
        match self {
            Origin::Local => 1,
            Origin::SyncEngine => 2,
        }
    }

    /// Converts from a numeric code.
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            1 => Some(Origin::Local),
            2 => Some(Origin::SyncEngine),
            _ => None,
        }
    }

    /// Returns true for application-initiated mutations.
    pub fn is_local(&self) -> bool {
        matches!(self, Origin::Local)
    }
}

impl fmt::Display for Origin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Origin::Local => write!(f, "local"),
            Origin::SyncEngine => write!(f, "sync-engine"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_codes() {
        for kind in MutationKind::ALL {
            assert_eq!(MutationKind::from_code(kind.to_code()), Some(kind));
        }
        assert_eq!(MutationKind::from_code(0), None);
        assert_eq!(MutationKind::from_code(4), None);
    }

    #[test]
    fn origin_codes() {
        assert_eq!(Origin::from_code(1), Some(Origin::Local));
        assert_eq!(Origin::from_code(2), Some(Origin::SyncEngine));
        assert_eq!(Origin::from_code(9), None);
        assert!(Origin::default().is_local());
        assert!(!Origin::SyncEngine.is_local());
    }

    #[test]
    fn display() {
        assert_eq!(MutationKind::Update.to_string(), "update");
        assert_eq!(Origin::SyncEngine.to_string(), "sync-engine");
    }
}
