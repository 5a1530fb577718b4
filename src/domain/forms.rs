//! Runtime-defined form schemas: rendering, submission validation and
//! admin-side editing rules.

use crate::domain::models::FormType;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sqlx::FromRow;
use thiserror::Error;

pub const DEFAULT_SECTION: &str = "main";
pub const MAX_FIELD_ORDER: i32 = 10_000;

#[derive(Clone, Copy, Debug, Serialize, Deserialize, sqlx::Type, PartialEq, Eq)]
#[sqlx(type_name = "field_type", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    Text,
    Textarea,
    Select,
    Radio,
    Checkbox,
    Email,
    File,
}

impl FieldType {
    pub fn needs_options(&self) -> bool {
        matches!(self, FieldType::Select | FieldType::Radio | FieldType::Checkbox)
    }
}

impl Default for FieldType {
    fn default() -> Self {
        FieldType::Text
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct FormFieldConfig {
    pub id: i64,
    pub form_type: FormType,
    pub section_name: Option<String>,
    pub field_order: i32,
    pub field_type: FieldType,
    pub field_label: String,
    pub field_name: String,
    pub options: Option<Value>,
    pub required: bool,
    pub validation_rules: Option<Value>,
    pub placeholder: Option<String>,
    pub help_text: Option<String>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A field as rendered for clients. Absent options/validation are omitted, not null.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct FieldDescriptor {
    pub id: i64,
    pub order: i32,
    #[serde(rename = "type")]
    pub field_type: FieldType,
    pub label: String,
    pub name: String,
    pub required: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub placeholder: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub help_text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub options: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub validation: Option<Value>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct FormSection {
    pub name: String,
    pub fields: Vec<FieldDescriptor>,
}

fn section_of(field: &FormFieldConfig) -> &str {
    match field.section_name.as_deref().map(str::trim) {
        Some(name) if !name.is_empty() => name,
        _ => DEFAULT_SECTION,
    }
}

fn present(value: &Option<Value>) -> Option<Value> {
    match value {
        None | Some(Value::Null) => None,
        Some(Value::Object(map)) if map.is_empty() => None,
        Some(Value::Array(items)) if items.is_empty() => None,
        Some(other) => Some(other.clone()),
    }
}

fn non_blank(value: &Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

impl From<&FormFieldConfig> for FieldDescriptor {
    fn from(field: &FormFieldConfig) -> Self {
        FieldDescriptor {
            id: field.id,
            order: field.field_order,
            field_type: field.field_type,
            label: field.field_label.clone(),
            name: field.field_name.clone(),
            required: field.required,
            placeholder: non_blank(&field.placeholder),
            help_text: non_blank(&field.help_text),
            options: present(&field.options),
            validation: present(&field.validation_rules),
        }
    }
}

/// Group active fields by section and sort each section by `field_order`.
///
/// Sections appear in the order their first field appears in `fields`; the
/// sort is stable so equal orders keep insertion order.
pub fn render_sections(fields: &[FormFieldConfig]) -> Vec<FormSection> {
    let mut sections: Vec<FormSection> = Vec::new();

    for field in fields.iter().filter(|f| f.is_active) {
        let name = section_of(field);
        let descriptor = FieldDescriptor::from(field);
        match sections.iter_mut().find(|s| s.name == name) {
            Some(section) => section.fields.push(descriptor),
            None => sections.push(FormSection {
                name: name.to_string(),
                fields: vec![descriptor],
            }),
        }
    }

    for section in &mut sections {
        section.fields.sort_by_key(|f| f.order);
    }
    sections
}

// ============================================
// Submission validation
// ============================================

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ValidationReport {
    pub valid: bool,
    pub errors: Vec<FieldError>,
}

/// Per-field check derived from the configured field type.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldRule {
    FreeText,
    Choice { options: Vec<String>, multiple: bool },
    Email,
    File,
}

impl FieldRule {
    pub fn for_field(field: &FormFieldConfig) -> Self {
        let options = field.options.as_ref().map(option_values).unwrap_or_default();
        match field.field_type {
            FieldType::Text | FieldType::Textarea => FieldRule::FreeText,
            FieldType::Select | FieldType::Radio => FieldRule::Choice {
                options,
                multiple: false,
            },
            FieldType::Checkbox => FieldRule::Choice {
                options,
                multiple: true,
            },
            FieldType::Email => FieldRule::Email,
            FieldType::File => FieldRule::File,
        }
    }

    pub fn check(&self, value: &Value) -> Result<(), String> {
        match self {
            FieldRule::FreeText => match value {
                Value::String(_) | Value::Number(_) | Value::Bool(_) => Ok(()),
                _ => Err("must be a text value".to_string()),
            },
            FieldRule::Email => match value.as_str() {
                Some(s) if is_valid_email(s) => Ok(()),
                _ => Err("must be a valid email address".to_string()),
            },
            FieldRule::File => match value {
                Value::String(_) => Ok(()),
                Value::Array(items) if items.iter().all(Value::is_string) => Ok(()),
                _ => Err("must reference an uploaded file".to_string()),
            },
            FieldRule::Choice { options, multiple } => {
                let picked: Vec<String> = match value {
                    Value::Array(items) if *multiple => {
                        items.iter().filter_map(scalar_to_string).collect()
                    }
                    other => scalar_to_string(other).into_iter().collect(),
                };
                let expected = match value {
                    Value::Array(items) if *multiple => items.len(),
                    _ => 1,
                };
                if picked.len() != expected {
                    return Err("contains a value that is not a choice".to_string());
                }
                match picked.iter().find(|p| !options.contains(p)) {
                    Some(bad) => Err(format!("'{}' is not one of the allowed options", bad)),
                    None => Ok(()),
                }
            }
        }
    }
}

fn scalar_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// Allowed values of a choice field.
///
/// Accepts a plain array (`["a", "b"]`), an array of `{value, label}` objects,
/// an object with a `choices`/`options`/`values` array, or a `value -> label` map.
pub fn option_values(options: &Value) -> Vec<String> {
    match options {
        Value::Array(items) => items
            .iter()
            .filter_map(|item| match item {
                Value::Object(obj) => obj.get("value").and_then(scalar_to_string),
                other => scalar_to_string(other),
            })
            .collect(),
        Value::Object(obj) => {
            for key in ["choices", "options", "values"] {
                if let Some(inner @ Value::Array(_)) = obj.get(key) {
                    return option_values(inner);
                }
            }
            obj.keys().cloned().collect()
        }
        _ => Vec::new(),
    }
}

fn is_blank(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) | Some(Value::Bool(false)) => true,
        Some(Value::String(s)) => s.trim().is_empty(),
        Some(Value::Array(items)) => items.is_empty(),
        Some(Value::Object(map)) => map.is_empty(),
        Some(Value::Number(_)) | Some(Value::Bool(true)) => false,
    }
}

pub fn is_valid_email(raw: &str) -> bool {
    let s = raw.trim();
    if s.is_empty() || s.chars().any(char::is_whitespace) {
        return false;
    }
    let Some((local, domain)) = s.split_once('@') else {
        return false;
    };
    if local.is_empty() || domain.contains('@') {
        return false;
    }
    let labels: Vec<&str> = domain.split('.').collect();
    labels.len() >= 2 && labels.iter().all(|l| !l.is_empty())
}

/// `min_length` / `max_length` from `validation_rules`, applied to text values.
fn check_length_rules(rules: Option<&Value>, value: &Value) -> Result<(), String> {
    let (Some(rules), Some(text)) = (rules, value.as_str()) else {
        return Ok(());
    };
    let len = text.trim().chars().count() as u64;
    if let Some(min) = rules.get("min_length").and_then(Value::as_u64) {
        if len < min {
            return Err(format!("must be at least {} characters", min));
        }
    }
    if let Some(max) = rules.get("max_length").and_then(Value::as_u64) {
        if len > max {
            return Err(format!("must be at most {} characters", max));
        }
    }
    Ok(())
}

/// Validate a submitted payload against the active fields of a schema.
///
/// Inactive fields are ignored. Keys not described by the schema are
/// tolerated; the payload is stored as an open document.
pub fn validate_submission(fields: &[FormFieldConfig], payload: &Map<String, Value>) -> ValidationReport {
    let mut errors = Vec::new();

    for field in fields.iter().filter(|f| f.is_active) {
        let value = payload.get(&field.field_name);
        if is_blank(value) {
            if field.required {
                errors.push(FieldError {
                    field: field.field_name.clone(),
                    message: format!("{} is required", field.field_label),
                });
            }
            continue;
        }
        let Some(value) = value else { continue };

        let outcome = FieldRule::for_field(field)
            .check(value)
            .and_then(|_| check_length_rules(field.validation_rules.as_ref(), value));
        if let Err(message) = outcome {
            errors.push(FieldError {
                field: field.field_name.clone(),
                message: format!("{} {}", field.field_label, message),
            });
        }
    }

    ValidationReport {
        valid: errors.is_empty(),
        errors,
    }
}

// ============================================
// Admin-side editing
// ============================================

#[derive(Debug, Error, PartialEq)]
pub enum FormError {
    #[error("field_name must be non-empty and contain only letters, digits, '_' or '-'")]
    InvalidName,
    #[error("field_label must not be empty")]
    EmptyLabel,
    #[error("field_order must be between 0 and {}", MAX_FIELD_ORDER)]
    OrderOutOfRange,
    #[error("{0:?} fields require at least one option")]
    MissingOptions(FieldType),
    #[error("field '{0}' already exists in this form")]
    NameCollision(String),
}

fn default_active() -> bool {
    true
}

/// A field definition as submitted by an administrator.
#[derive(Debug, Clone, Deserialize)]
pub struct FieldDraft {
    pub form_type: FormType,
    #[serde(default)]
    pub section_name: Option<String>,
    #[serde(default)]
    pub field_order: Option<i32>,
    #[serde(default)]
    pub field_type: FieldType,
    pub field_label: String,
    pub field_name: String,
    #[serde(default)]
    pub options: Option<Value>,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub validation_rules: Option<Value>,
    #[serde(default)]
    pub placeholder: Option<String>,
    #[serde(default)]
    pub help_text: Option<String>,
    #[serde(default = "default_active")]
    pub is_active: bool,
}

/// Partial update. For the optional attributes an explicit `null` clears the
/// value, while an absent key leaves it unchanged.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct FieldPatch {
    pub section_name: Option<String>,
    pub field_order: Option<i32>,
    pub field_type: Option<FieldType>,
    pub field_label: Option<String>,
    pub field_name: Option<String>,
    #[serde(default, deserialize_with = "nullable")]
    pub options: Option<Option<Value>>,
    pub required: Option<bool>,
    #[serde(default, deserialize_with = "nullable")]
    pub validation_rules: Option<Option<Value>>,
    #[serde(default, deserialize_with = "nullable")]
    pub placeholder: Option<Option<String>>,
    #[serde(default, deserialize_with = "nullable")]
    pub help_text: Option<Option<String>>,
    pub is_active: Option<bool>,
}

// Only runs when the key is present, so `null` becomes `Some(None)`.
fn nullable<'de, D, T>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    D: serde::Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

impl FieldDraft {
    pub fn from_existing(field: &FormFieldConfig) -> Self {
        FieldDraft {
            form_type: field.form_type,
            section_name: field.section_name.clone(),
            field_order: Some(field.field_order),
            field_type: field.field_type,
            field_label: field.field_label.clone(),
            field_name: field.field_name.clone(),
            options: field.options.clone(),
            required: field.required,
            validation_rules: field.validation_rules.clone(),
            placeholder: field.placeholder.clone(),
            help_text: field.help_text.clone(),
            is_active: field.is_active,
        }
    }

    pub fn apply(mut self, patch: FieldPatch) -> Self {
        if let Some(v) = patch.section_name {
            self.section_name = Some(v);
        }
        if let Some(v) = patch.field_order {
            self.field_order = Some(v);
        }
        if let Some(v) = patch.field_type {
            self.field_type = v;
        }
        if let Some(v) = patch.field_label {
            self.field_label = v;
        }
        if let Some(v) = patch.field_name {
            self.field_name = v;
        }
        if let Some(v) = patch.options {
            self.options = v;
        }
        if let Some(v) = patch.required {
            self.required = v;
        }
        if let Some(v) = patch.validation_rules {
            self.validation_rules = v;
        }
        if let Some(v) = patch.placeholder {
            self.placeholder = v;
        }
        if let Some(v) = patch.help_text {
            self.help_text = v;
        }
        if let Some(v) = patch.is_active {
            self.is_active = v;
        }
        self
    }

    /// Trim names and check the definition is usable. Name collisions are
    /// checked separately against the store.
    pub fn normalized(mut self) -> Result<Self, FormError> {
        self.field_name = self.field_name.trim().to_string();
        self.field_label = self.field_label.trim().to_string();
        self.section_name = non_blank(&self.section_name);

        let name_ok = !self.field_name.is_empty()
            && self
                .field_name
                .chars()
                .all(|c| c.is_alphanumeric() || c == '_' || c == '-');
        if !name_ok {
            return Err(FormError::InvalidName);
        }
        if self.field_label.is_empty() {
            return Err(FormError::EmptyLabel);
        }
        if matches!(self.field_order, Some(order) if !(0..=MAX_FIELD_ORDER).contains(&order)) {
            return Err(FormError::OrderOutOfRange);
        }
        let has_options = self
            .options
            .as_ref()
            .map(|o| !option_values(o).is_empty())
            .unwrap_or(false);
        if self.field_type.needs_options() && !has_options {
            return Err(FormError::MissingOptions(self.field_type));
        }
        Ok(self)
    }
}

/// Result of parsing an `"id:order,id:order"` reorder batch.
#[derive(Debug, Default, PartialEq)]
pub struct ReorderBatch {
    pub pairs: Vec<(i64, i32)>,
    pub skipped: Vec<String>,
}

/// Parse a reorder batch. Malformed entries are skipped one by one and never
/// invalidate the rest of the batch.
pub fn parse_reorder_batch(raw: &str) -> ReorderBatch {
    let mut batch = ReorderBatch::default();
    for entry in raw.split(',').map(str::trim).filter(|e| !e.is_empty()) {
        let parsed = entry.split_once(':').and_then(|(id, order)| {
            let id = id.trim().parse::<i64>().ok()?;
            let order = order.trim().parse::<i32>().ok()?;
            (0..=MAX_FIELD_ORDER).contains(&order).then_some((id, order))
        });
        match parsed {
            Some(pair) => batch.pairs.push(pair),
            None => batch.skipped.push(entry.to_string()),
        }
    }
    batch
}

#[cfg(test)]
pub(crate) fn field(id: i64, section: Option<&str>, order: i32, field_type: FieldType, name: &str) -> FormFieldConfig {
    FormFieldConfig {
        id,
        form_type: FormType::Technical,
        section_name: section.map(str::to_string),
        field_order: order,
        field_type,
        field_label: name.to_uppercase(),
        field_name: name.to_string(),
        options: None,
        required: false,
        validation_rules: None,
        placeholder: None,
        help_text: None,
        is_active: true,
        created_at: Utc::now(),
        updated_at: Utc::now(),
    }
}
