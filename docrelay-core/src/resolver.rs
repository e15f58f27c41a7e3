//! Collection name resolution.
//!
//! Every request names its target collection. The name is checked here, before any
//! backend call, and a [`CollectionName`] is the only way to obtain a
//! [`Collection`](crate::collection::Collection) handle from a store.

use std::fmt;

use crate::{
    collection::Collection,
    error::{StoreError, StoreResult},
    store::DynDocumentStore,
};

/// Longest accepted collection name, in bytes.
pub const MAX_NAME_LEN: usize = 255;

/// A structurally valid collection name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CollectionName(String);

impl CollectionName {
    /// Validates `name`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::UnknownCollection`] if the name is empty, longer than
    /// [`MAX_NAME_LEN`] bytes, contains `$` or a NUL byte, starts or ends with `.`,
    /// or lies in the reserved `system.` namespace.
    pub fn parse(name: &str) -> StoreResult<Self> {
        let valid = !name.is_empty()
            && name.len() <= MAX_NAME_LEN
            && !name.contains(['$', '\0'])
            && !name.starts_with('.')
            && !name.ends_with('.')
            && !name.starts_with("system.");

        if valid {
            Ok(CollectionName(name.to_string()))
        } else {
            Err(StoreError::UnknownCollection(name.to_string()))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CollectionName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for CollectionName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Binds a validated name to the store's backend for the duration of one operation.
pub fn resolve<'a>(store: &'a DynDocumentStore, name: &'a CollectionName) -> Collection<'a> {
    store.collection(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_ordinary_and_dotted_names() {
        for name in ["users", "app.users", "audit_log-2024", "ünïcode"] {
            assert_eq!(CollectionName::parse(name).unwrap().as_str(), name);
        }
    }

    #[test]
    fn rejects_structurally_invalid_names() {
        let too_long = "c".repeat(MAX_NAME_LEN + 1);

        for name in [
            "",
            "us$ers",
            "nul\0byte",
            ".users",
            "users.",
            "system.indexes",
            too_long.as_str(),
        ] {
            assert_eq!(
                CollectionName::parse(name),
                Err(StoreError::UnknownCollection(name.to_string())),
            );
        }
    }

    #[test]
    fn accepts_names_at_the_length_limit() {
        assert!(CollectionName::parse(&"c".repeat(MAX_NAME_LEN)).is_ok());
    }
}
