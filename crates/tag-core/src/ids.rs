//! String identifiers for taxonomies and text fields.
//!
//! Each id is a thin newtype over `String` so a taxonomy id cannot be passed
//! where a field id is expected.

use serde::{Deserialize, Serialize};
use std::fmt::{self, Display, Formatter};

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl Display for $name {
            fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl From<&str> for $name {
            fn from(id: &str) -> Self {
                Self(id.to_string())
            }
        }

        impl From<String> for $name {
            fn from(id: String) -> Self {
                Self(id)
            }
        }
    };
}

string_id!(
    /// Names one taxonomy (one persisted category tree).
    TaxonomyId
);
string_id!(
    /// The widget or node that owns one or more text fields.
    OwnerId
);
string_id!(
    /// One text field of an owner.
    FieldId
);

/// Addresses a single text field: `(owner, field)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FieldKey {
    pub owner: OwnerId,
    pub field: FieldId,
}

impl FieldKey {
    pub fn new(owner: impl Into<OwnerId>, field: impl Into<FieldId>) -> Self {
        Self {
            owner: owner.into(),
            field: field.into(),
        }
    }
}

impl Display for FieldKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.owner, self.field)
    }
}
