//! Identifier newtypes for the three persisted document kinds.
//!
//! All three share one document database per project, so each kind
//! carries a distinct id prefix. Bulk enumeration discriminates on the
//! prefix rather than fetching every document body.

use serde::{Deserialize, Serialize};

macro_rules! prefixed_id {
    ($(#[$doc:meta])* $name:ident, $prefix:literal) => {
        $(#[$doc])*
        #[derive(
            Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
        )]
        pub struct $name(pub String);

        impl $name {
            pub const PREFIX: &'static str = $prefix;

            /// Generate a fresh random id.
            pub fn generate() -> Self {
                $name(format!("{}{}", Self::PREFIX, uuid::Uuid::new_v4()))
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }

            /// Whether a raw document id belongs to this kind.
            pub fn matches(id: &str) -> bool {
                id.starts_with(Self::PREFIX)
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                $name(s.to_string())
            }
        }
    };
}

prefixed_id!(
    /// Identity of one logical record (client-generated, opaque).
    RecordId,
    "rec-"
);

prefixed_id!(
    /// Identity of one immutable revision in a record's DAG.
    RevisionId,
    "frev-"
);

prefixed_id!(
    /// Identity of one immutable attribute-value-pair document.
    AvpId,
    "avp-"
);
