//! Ledger ("book") model

use serde::{Deserialize, Serialize};

use crate::sync::{FieldError, FieldValue, Record, RecordKind};

/// A ledger groups transactions that share a currency
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Ledger {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    /// ISO 4217 code
    pub currency: String,
    /// Exchange rate pinned by the user, if any
    #[serde(default)]
    pub locked_exchange_rate: Option<f64>,
    #[serde(default)]
    pub archived: bool,
}

impl Ledger {
    /// Create a new ledger with the given name and currency
    pub fn new(name: impl Into<String>, currency: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: None,
            currency: currency.into().trim().to_ascii_uppercase(),
            locked_exchange_rate: None,
            archived: false,
        }
    }
}

impl Record for Ledger {
    const KIND: RecordKind = RecordKind::Ledger;
    const FIELDS: &'static [&'static str] = &[
        "name",
        "description",
        "currency",
        "lockedExchangeRate",
        "archived",
    ];

    fn field(&self, name: &str) -> Result<FieldValue, FieldError> {
        Ok(match name {
            "name" => self.name.clone().into(),
            "description" => self.description.clone().into(),
            "currency" => self.currency.clone().into(),
            "lockedExchangeRate" => self.locked_exchange_rate.into(),
            "archived" => self.archived.into(),
            other => return Err(FieldError::UnknownField(other.to_string())),
        })
    }

    fn set_field(&mut self, name: &str, value: FieldValue) -> Result<(), FieldError> {
        match name {
            "name" => self.name = value.into_text(name)?,
            "description" => self.description = value.into_optional_text(name)?,
            "currency" => self.currency = value.into_text(name)?,
            "lockedExchangeRate" => self.locked_exchange_rate = value.into_optional_f64(name)?,
            "archived" => self.archived = value.into_bool(name)?,
            other => return Err(FieldError::UnknownField(other.to_string())),
        }
        Ok(())
    }

    fn validate(&self) -> Result<(), String> {
        if self.name.trim().is_empty() {
            return Err("ledger name cannot be empty".to_string());
        }
        if self.currency.len() != 3 || !self.currency.chars().all(|c| c.is_ascii_uppercase()) {
            return Err(format!("'{}' is not an ISO 4217 currency code", self.currency));
        }
        if self.locked_exchange_rate.is_some_and(|rate| !rate.is_finite() || rate <= 0.0) {
            return Err("locked exchange rate must be positive".to_string());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ledger_new_normalizes_currency() {
        let ledger = Ledger::new("Household", " eur ");
        assert_eq!(ledger.currency, "EUR");
        assert!(!ledger.archived);
    }

    #[test]
    fn test_every_declared_field_is_readable_and_writable() {
        let mut ledger = Ledger::new("Household", "EUR");
        for field in Ledger::FIELDS {
            let value = ledger.field(field).unwrap();
            ledger.set_field(field, value).unwrap();
        }
        assert_eq!(ledger, Ledger::new("Household", "EUR"));
    }

    #[test]
    fn test_set_field_rejects_wrong_type() {
        let mut ledger = Ledger::new("Household", "EUR");
        assert!(ledger.set_field("archived", FieldValue::Integer(1)).is_err());
        assert!(ledger.set_field("owner", FieldValue::Null).is_err());
    }
}
