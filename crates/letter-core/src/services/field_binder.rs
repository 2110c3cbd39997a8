//! Merges caller values, employee data and template defaults into bound fields

use crate::error::{LetterError, Result};
use chrono::NaiveDate;
use letter_types::{BoundField, BoundFields, Employee, FieldDataType, LetterTemplate, TemplateField};
use regex::Regex;
use serde_json::Value;
use std::collections::BTreeMap;

const EMAIL_PATTERN: &str = r"^[^@\s]+@[^@\s]+\.[^@\s]+$";

pub struct FieldBinder {
    email_pattern: Regex,
}

impl FieldBinder {
    pub fn new() -> Result<Self> {
        let email_pattern = Regex::new(EMAIL_PATTERN)
            .map_err(|e| LetterError::Config(format!("Invalid email pattern: {}", e)))?;
        Ok(Self { email_pattern })
    }

    /// Bind every template field.
    ///
    /// Precedence is explicit value, then employee attribute, then template
    /// default. Blank values count as absent. Optional fields with no value
    /// are bound to an empty string.
    pub fn bind(
        &self,
        template: &LetterTemplate,
        employee: &Employee,
        field_values: &BTreeMap<String, Value>,
    ) -> Result<BoundFields> {
        let overrides = self.normalize_overrides(template, field_values)?;

        let mut fields: Vec<&TemplateField> = template.fields.iter().collect();
        fields.sort_by(|a, b| a.sort_order.cmp(&b.sort_order).then_with(|| a.name.cmp(&b.name)));

        let mut bound = Vec::with_capacity(fields.len());
        for field in fields {
            let value = overrides
                .get(&field.name.to_ascii_lowercase())
                .cloned()
                .or_else(|| non_blank(employee.attribute(&field.name)))
                .or_else(|| non_blank(field.default_value.clone()));

            let value = match value {
                Some(value) => {
                    self.validate(field, &value)?;
                    value
                }
                None if field.required => {
                    return Err(LetterError::MissingRequiredField(field.name.clone()));
                }
                None => String::new(),
            };

            bound.push(BoundField {
                name: field.name.clone(),
                value,
            });
        }

        Ok(BoundFields::new(bound))
    }

    /// Map caller keys onto declared fields (case-insensitive) and stringify values
    fn normalize_overrides(
        &self,
        template: &LetterTemplate,
        field_values: &BTreeMap<String, Value>,
    ) -> Result<BTreeMap<String, String>> {
        let mut overrides = BTreeMap::new();

        for (key, value) in field_values {
            let field = template
                .field(key.trim())
                .ok_or_else(|| LetterError::UnknownField(key.clone()))?;

            let text = match value {
                Value::Null => None,
                Value::String(s) => Some(s.clone()),
                Value::Number(n) => Some(n.to_string()),
                Value::Bool(b) => Some(b.to_string()),
                Value::Array(_) | Value::Object(_) => {
                    return Err(LetterError::InvalidFieldValue {
                        field: field.name.clone(),
                        reason: "expected a scalar value".to_string(),
                    });
                }
            };

            if let Some(text) = non_blank(text) {
                overrides.insert(field.name.to_ascii_lowercase(), text);
            }
        }

        Ok(overrides)
    }

    fn validate(&self, field: &TemplateField, value: &str) -> Result<()> {
        let invalid = |reason: &str| LetterError::InvalidFieldValue {
            field: field.name.clone(),
            reason: reason.to_string(),
        };

        match field.data_type {
            FieldDataType::Text => Ok(()),
            FieldDataType::Number => match value.trim().parse::<f64>() {
                Ok(n) if n.is_finite() => Ok(()),
                _ => Err(invalid(&format!("'{}' is not a number", value))),
            },
            FieldDataType::Date => NaiveDate::parse_from_str(value.trim(), "%Y-%m-%d")
                .map(|_| ())
                .map_err(|_| invalid(&format!("'{}' is not a YYYY-MM-DD date", value))),
            FieldDataType::Email => {
                if self.email_pattern.is_match(value.trim()) {
                    Ok(())
                } else {
                    Err(invalid(&format!("'{}' is not an email address", value)))
                }
            }
        }
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}
