//! Category model

use serde::{Deserialize, Serialize};

use crate::sync::{FieldError, FieldValue, Record, RecordKind};

/// A user-defined spending category
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Category {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    /// Display colour, e.g. `#ff8800`
    #[serde(default)]
    pub color: Option<String>,
    #[serde(default)]
    pub icon: Option<String>,
}

impl Category {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: None,
            color: None,
            icon: None,
        }
    }
}

impl Record for Category {
    const KIND: RecordKind = RecordKind::Category;
    const FIELDS: &'static [&'static str] = &["name", "description", "color", "icon"];

    fn field(&self, name: &str) -> Result<FieldValue, FieldError> {
        Ok(match name {
            "name" => self.name.clone().into(),
            "description" => self.description.clone().into(),
            "color" => self.color.clone().into(),
            "icon" => self.icon.clone().into(),
            other => return Err(FieldError::UnknownField(other.to_string())),
        })
    }

    fn set_field(&mut self, name: &str, value: FieldValue) -> Result<(), FieldError> {
        match name {
            "name" => self.name = value.into_text(name)?,
            "description" => self.description = value.into_optional_text(name)?,
            "color" => self.color = value.into_optional_text(name)?,
            "icon" => self.icon = value.into_optional_text(name)?,
            other => return Err(FieldError::UnknownField(other.to_string())),
        }
        Ok(())
    }

    fn validate(&self) -> Result<(), String> {
        if self.name.trim().is_empty() {
            return Err("category name cannot be empty".to_string());
        }
        Ok(())
    }
}
