//! Identifier newtypes for artifacts and products.

use serde::{Deserialize, Serialize};
use std::borrow::Borrow;

/// Defines a string newtype used as an identifier in a manifest.
///
/// Names are case-sensitive: binary module names are matched exactly, so
/// `Realm` and `realm` are different artifacts.
macro_rules! name_newtype {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Create a new name from the given string (stored as-is).
            pub fn new(name: &str) -> Self {
                Self(name.to_string())
            }

            /// Return the name as a string slice.
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl std::ops::Deref for $name {
            type Target = str;

            fn deref(&self) -> &Self::Target {
                &self.0
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl Borrow<str> for $name {
            fn borrow(&self) -> &str {
                &self.0
            }
        }

        impl PartialEq<str> for $name {
            fn eq(&self, other: &str) -> bool {
                self.0 == other
            }
        }

        impl PartialEq<&str> for $name {
            fn eq(&self, other: &&str) -> bool {
                self.0 == *other
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self::new(s)
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }
    };
}

name_newtype!(
    /// Identity of a binary artifact (e.g. `RealmSwift`).
    ArtifactName
);

name_newtype!(
    /// Identity of an importable product (e.g. `RealmSwift`).
    ProductName
);
