use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use shared::{
    domain::{Item, ItemId},
    freshness::{parse_expiration_date, ExpirationDateError, EXPIRATION_DATE_FORMAT},
};
use thiserror::Error;

/// Reference to the item a draft is editing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EditTarget {
    pub id: ItemId,
    pub created_at: DateTime<Utc>,
}

/// Unsaved form input. `editing` absent means create-mode, present means update-mode.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Draft {
    pub name: String,
    pub quantity: String,
    pub expiration_date: String,
    pub editing: Option<EditTarget>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedDraft {
    pub name: String,
    pub quantity: u32,
    pub expiration_date: NaiveDate,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DraftError {
    #[error("item name must not be empty")]
    EmptyName,
    #[error("quantity '{0}' is not a positive whole number")]
    InvalidQuantity(String),
    #[error("expiration date is required")]
    MissingExpirationDate,
    #[error("expiration date '{0}' is not a valid YYYY-MM-DD date")]
    MalformedExpirationDate(String),
}

impl Draft {
    pub fn new(
        name: impl Into<String>,
        quantity: impl Into<String>,
        expiration_date: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            quantity: quantity.into(),
            expiration_date: expiration_date.into(),
            editing: None,
        }
    }

    pub fn from_item(item: &Item) -> Self {
        Self {
            name: item.name.clone(),
            quantity: item.quantity.to_string(),
            expiration_date: item.expiration_date.format(EXPIRATION_DATE_FORMAT).to_string(),
            editing: Some(EditTarget {
                id: item.id.clone(),
                created_at: item.created_at,
            }),
        }
    }

    pub fn is_editing(&self) -> bool {
        self.editing.is_some()
    }

    pub fn validate(&self) -> Result<ValidatedDraft, DraftError> {
        let name = self.name.trim();
        if name.is_empty() {
            return Err(DraftError::EmptyName);
        }

        let raw_quantity = self.quantity.trim();
        let quantity = match raw_quantity.parse::<u32>() {
            Ok(quantity) if quantity >= 1 => quantity,
            _ => return Err(DraftError::InvalidQuantity(raw_quantity.to_string())),
        };

        let expiration_date = parse_expiration_date(&self.expiration_date).map_err(|err| match err {
            ExpirationDateError::Missing => DraftError::MissingExpirationDate,
            ExpirationDateError::Malformed(raw) => DraftError::MalformedExpirationDate(raw),
        })?;

        Ok(ValidatedDraft {
            name: name.to_string(),
            quantity,
            expiration_date,
        })
    }
}
