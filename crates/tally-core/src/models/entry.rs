//! Transaction ("entry") model

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::RecordId;
use crate::sync::{FieldError, FieldValue, Record, RecordKind};

/// How a transaction was paid
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMode {
    #[default]
    Cash,
    Card,
    BankTransfer,
    Wallet,
    Other,
}

impl PaymentMode {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Cash => "cash",
            Self::Card => "card",
            Self::BankTransfer => "bank_transfer",
            Self::Wallet => "wallet",
            Self::Other => "other",
        }
    }
}

impl fmt::Display for PaymentMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PaymentMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace(['-', ' '], "_").as_str() {
            "cash" => Ok(Self::Cash),
            "card" => Ok(Self::Card),
            "bank_transfer" | "bank" | "transfer" => Ok(Self::BankTransfer),
            "wallet" => Ok(Self::Wallet),
            "other" => Ok(Self::Other),
            other => Err(format!("unknown payment mode '{other}'")),
        }
    }
}

/// A single money movement inside a ledger
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Entry {
    /// Owning ledger, fixed at creation
    pub ledger_id: RecordId,
    /// Signed amount in minor currency units (cents)
    pub amount: i64,
    pub date: DateTime<Utc>,
    pub counterparty: String,
    #[serde(default)]
    pub category_id: Option<RecordId>,
    #[serde(default)]
    pub payment_mode: PaymentMode,
    #[serde(default)]
    pub remarks: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
}

impl Entry {
    pub fn new(
        ledger_id: RecordId,
        amount: i64,
        counterparty: impl Into<String>,
        date: DateTime<Utc>,
    ) -> Self {
        Self {
            ledger_id,
            amount,
            date,
            counterparty: counterparty.into(),
            category_id: None,
            payment_mode: PaymentMode::default(),
            remarks: None,
            tags: Vec::new(),
        }
    }
}

impl Record for Entry {
    const KIND: RecordKind = RecordKind::Transaction;
    const FIELDS: &'static [&'static str] = &[
        "amount",
        "date",
        "counterparty",
        "category",
        "paymentMode",
        "remarks",
        "tags",
    ];

    fn field(&self, name: &str) -> Result<FieldValue, FieldError> {
        Ok(match name {
            "amount" => self.amount.into(),
            "date" => self.date.into(),
            "counterparty" => self.counterparty.clone().into(),
            "category" => self.category_id.map(|id| id.to_string()).into(),
            "paymentMode" => self.payment_mode.as_str().into(),
            "remarks" => self.remarks.clone().into(),
            "tags" => self.tags.clone().into(),
            other => return Err(FieldError::UnknownField(other.to_string())),
        })
    }

    fn set_field(&mut self, name: &str, value: FieldValue) -> Result<(), FieldError> {
        let invalid = |message: String| FieldError::Invalid {
            field: name.to_string(),
            message,
        };
        match name {
            "amount" => self.amount = value.into_i64(name)?,
            "date" => self.date = value.into_instant(name)?,
            "counterparty" => self.counterparty = value.into_text(name)?,
            "category" => {
                self.category_id = value
                    .into_optional_text(name)?
                    .map(|raw| raw.parse::<RecordId>())
                    .transpose()
                    .map_err(|error| invalid(error.to_string()))?;
            }
            "paymentMode" => {
                self.payment_mode = value.into_text(name)?.parse().map_err(invalid)?;
            }
            "remarks" => self.remarks = value.into_optional_text(name)?,
            "tags" => self.tags = value.into_text_list(name)?,
            other => return Err(FieldError::UnknownField(other.to_string())),
        }
        Ok(())
    }

    fn parent_id(&self) -> Option<RecordId> {
        Some(self.ledger_id)
    }

    fn validate(&self) -> Result<(), String> {
        if self.counterparty.trim().is_empty() {
            return Err("counterparty cannot be empty".to_string());
        }
        if self.amount == 0 {
            return Err("amount cannot be zero".to_string());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Entry {
        let mut entry = Entry::new(RecordId::new(), -1250, "Bakery", Utc::now());
        entry.category_id = Some(RecordId::new());
        entry.payment_mode = PaymentMode::Card;
        entry.tags = vec!["food".to_string()];
        entry
    }

    #[test]
    fn test_every_declared_field_is_readable_and_writable() {
        let original = sample();
        let mut copy = Entry::new(original.ledger_id, 0, "", original.date);
        for field in Entry::FIELDS {
            copy.set_field(field, original.field(field).unwrap()).unwrap();
        }
        assert_eq!(copy, original);
    }

    #[test]
    fn test_parent_is_owning_ledger() {
        let entry = sample();
        assert_eq!(entry.parent_id(), Some(entry.ledger_id));
    }

    #[test]
    fn test_category_rejects_malformed_id() {
        let mut entry = sample();
        let error = entry
            .set_field("category", FieldValue::Text("not-an-id".to_string()))
            .unwrap_err();
        assert!(matches!(error, FieldError::Invalid { .. }));
        entry.set_field("category", FieldValue::Null).unwrap();
        assert_eq!(entry.category_id, None);
    }

    #[test]
    fn test_payment_mode_parse_accepts_loose_spelling() {
        assert_eq!("Bank Transfer".parse::<PaymentMode>(), Ok(PaymentMode::BankTransfer));
        assert_eq!("card".parse::<PaymentMode>(), Ok(PaymentMode::Card));
        assert!("cheque".parse::<PaymentMode>().is_err());
    }
}
