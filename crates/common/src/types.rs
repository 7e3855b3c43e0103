use serde::{Deserialize, Serialize};
use uuid::Uuid;

macro_rules! uuid_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(Uuid);

        impl $name {
            /// Creates a new random identifier.
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            /// Wraps an existing UUID.
            pub fn from_uuid(uuid: Uuid) -> Self {
                Self(uuid)
            }

            /// Returns the underlying UUID.
            pub fn as_uuid(&self) -> Uuid {
                self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl std::str::FromStr for $name {
            type Err = uuid::Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Uuid::parse_str(s).map(Self)
            }
        }

        impl From<Uuid> for $name {
            fn from(uuid: Uuid) -> Self {
                Self(uuid)
            }
        }

        impl From<$name> for Uuid {
            fn from(id: $name) -> Self {
                id.0
            }
        }
    };
}

uuid_id!(
    /// Unique identifier for an aggregate instance in the event store.
    AggregateId
);

uuid_id!(
    /// Identifier of a platform user (customer or admin).
    UserId
);

uuid_id!(
    /// Identifier of a catalog product whose stock is tracked here.
    ProductId
);

impl AggregateId {
    /// Derives a stable id from a scope and a natural key.
    ///
    /// Used for aggregates addressed by something other than a random id,
    /// such as coupons (by code) or invoice sequences (by year).
    pub fn derived(scope: &str, key: &str) -> Self {
        Self(Uuid::new_v5(
            &Uuid::NAMESPACE_OID,
            format!("{scope}:{key}").as_bytes(),
        ))
    }
}

impl From<UserId> for AggregateId {
    fn from(id: UserId) -> Self {
        Self(id.0)
    }
}

impl From<ProductId> for AggregateId {
    fn from(id: ProductId) -> Self {
        Self(id.0)
    }
}
