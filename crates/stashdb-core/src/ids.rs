//! Opaque identifiers
//!
//! Two distinct identifier types share one representation (a random UUID):
//!
//! - [`DocumentId`] - identity assigned by the document store on first insert
//! - [`BlobHandle`] - retrieval key returned by the blob store on `put`
//!
//! Keeping them as separate types means a document identity can never be
//! mistaken for a blob reference during hydration.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Error returned when an identifier string cannot be parsed
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Invalid identifier '{0}': expected 32 hex digits or a hyphenated UUID")]
pub struct IdParseError(pub String);

macro_rules! opaque_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(Uuid);

        impl $name {
            /// Generate a new random identifier
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            /// Wrap an existing UUID
            pub fn from_uuid(uuid: Uuid) -> Self {
                Self(uuid)
            }

            /// The underlying UUID
            pub fn as_uuid(&self) -> &Uuid {
                &self.0
            }

            /// Lowercase hex form without hyphens (the persisted form)
            pub fn to_hex(&self) -> String {
                self.0.simple().to_string()
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0.simple())
            }
        }

        impl FromStr for $name {
            type Err = IdParseError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Uuid::parse_str(s.trim())
                    .map(Self)
                    .map_err(|_| IdParseError(s.to_string()))
            }
        }
    };
}

opaque_id!(
    /// Identity of a persisted document (the `_id` field)
    DocumentId
);

opaque_id!(
    /// Reference to a payload held by the blob store
    ///
    /// A document holds non-owning references to handles; the blob store
    /// owns the bytes. Handles are never derived from content, so two
    /// fields with identical arrays get independent blobs.
    BlobHandle
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_ids_are_unique() {
        let a = DocumentId::new();
        let b = DocumentId::new();
        assert_ne!(a, b);
    }

    #[test]
    fn test_hex_form_parses_back() {
        let handle = BlobHandle::new();
        let hex = handle.to_hex();
        assert_eq!(hex.len(), 32);
        assert!(!hex.contains('-'));
        assert_eq!(hex.parse::<BlobHandle>().unwrap(), handle);
    }

    #[test]
    fn test_hyphenated_form_accepted() {
        let id = DocumentId::new();
        let hyphenated = id.as_uuid().hyphenated().to_string();
        assert_eq!(hyphenated.parse::<DocumentId>().unwrap(), id);
    }

    #[test]
    fn test_display_matches_hex() {
        let id = DocumentId::new();
        assert_eq!(id.to_string(), id.to_hex());
    }

    #[test]
    fn test_invalid_id_rejected() {
        let err = "not-an-id".parse::<DocumentId>().unwrap_err();
        assert!(err.to_string().contains("not-an-id"));
    }
}
