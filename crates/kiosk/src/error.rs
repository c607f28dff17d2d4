//! Error taxonomy shared by every engine operation.

use std::fmt;
use std::path::PathBuf;

use serde::Serialize;
use thiserror::Error;

/// The kind of entity an error refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Item,
    Theme,
    Atmosphere,
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntityKind::Item => write!(f, "item"),
            EntityKind::Theme => write!(f, "theme"),
            EntityKind::Atmosphere => write!(f, "atmosphere"),
        }
    }
}

#[derive(Debug, Error)]
pub enum KioskError {
    /// Malformed input: empty names, duplicates, bad cadence, unknown commands.
    #[error("{0}")]
    Validation(String),

    #[error("the {kind} \"{name}\" is protected and cannot be {action}")]
    Protected {
        kind: EntityKind,
        name: String,
        action: &'static str,
    },

    #[error("{kind} \"{id}\" not found")]
    NotFound { kind: EntityKind, id: String },

    #[error("failed to access state file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("state file {path} is not a valid state document: {source}")]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

impl KioskError {
    pub fn validation(message: impl Into<String>) -> Self {
        KioskError::Validation(message.into())
    }

    pub fn not_found(kind: EntityKind, id: impl Into<String>) -> Self {
        KioskError::NotFound {
            kind,
            id: id.into(),
        }
    }

    pub fn protected(kind: EntityKind, name: impl Into<String>, action: &'static str) -> Self {
        KioskError::Protected {
            kind,
            name: name.into(),
            action,
        }
    }

    /// Stable machine-readable code, used in HTTP error bodies.
    pub fn code(&self) -> &'static str {
        match self {
            KioskError::Validation(_) => "validation",
            KioskError::Protected { .. } => "protected",
            KioskError::NotFound { .. } => "not_found",
            KioskError::Io { .. } | KioskError::Corrupt { .. } => "storage",
        }
    }
}

pub type Result<T> = std::result::Result<T, KioskError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_name_the_entity() {
        let err = KioskError::protected(EntityKind::Theme, "All", "deleted");
        assert_eq!(
            err.to_string(),
            "the theme \"All\" is protected and cannot be deleted"
        );
        assert_eq!(err.code(), "protected");

        let err = KioskError::not_found(EntityKind::Atmosphere, "Dusk");
        assert_eq!(err.to_string(), "atmosphere \"Dusk\" not found");
        assert_eq!(err.code(), "not_found");
    }

    #[test]
    fn storage_errors_share_a_code() {
        let err = KioskError::Io {
            path: PathBuf::from("/nowhere/state.json"),
            source: std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
        };
        assert_eq!(err.code(), "storage");
        assert!(err.to_string().contains("/nowhere/state.json"));
    }
}
