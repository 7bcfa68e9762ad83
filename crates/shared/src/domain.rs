use std::fmt;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::freshness::{classify, FreshnessStatus};

macro_rules! id_newtype {
    ($name:ident) => {
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }
    };
}

id_newtype!(ItemId);
id_newtype!(UserId);

impl ItemId {
    /// Mints a fresh random identifier, as a remote store would on create.
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }
}

impl UserId {
    pub fn generate_anonymous() -> Self {
        Self(format!("anon-{}", uuid::Uuid::new_v4().simple()))
    }
}

/// An item as held by the remote collection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Item {
    pub id: ItemId,
    pub name: String,
    pub quantity: u32,
    pub expiration_date: NaiveDate,
    pub owner_id: UserId,
    pub created_at: DateTime<Utc>,
}

impl Item {
    pub fn freshness(&self, today: NaiveDate) -> FreshnessStatus {
        classify(self.expiration_date, today)
    }

    pub fn record(&self) -> ItemRecord {
        ItemRecord {
            name: self.name.clone(),
            quantity: self.quantity,
            expiration_date: self.expiration_date,
            owner_id: self.owner_id.clone(),
            created_at: self.created_at,
        }
    }
}

/// Item payload without its identity; what create and update send to the collection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemRecord {
    pub name: String,
    pub quantity: u32,
    pub expiration_date: NaiveDate,
    pub owner_id: UserId,
    pub created_at: DateTime<Utc>,
}

impl ItemRecord {
    pub fn into_item(self, id: ItemId) -> Item {
        Item {
            id,
            name: self.name,
            quantity: self.quantity,
            expiration_date: self.expiration_date,
            owner_id: self.owner_id,
            created_at: self.created_at,
        }
    }
}
