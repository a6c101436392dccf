//! Runtime-configurable entity extension fields.
//!
//! Host applications declare extra fields on Orders and OrderLines at
//! startup; instances carry a typed value bag validated against those
//! declarations. Line identity includes the bag, so the same variant with
//! different custom fields produces separate lines.

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

/// A typed value stored in a custom-field bag.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum CustomFieldValue {
    /// Free text.
    Text(String),
    /// Signed integer.
    Int(i64),
    /// Floating-point number.
    Float(f64),
    /// Boolean flag.
    Bool(bool),
    /// Point in time.
    DateTime(DateTime<Utc>),
    /// Reference to another entity by UUID.
    Relation(Uuid),
    /// Arbitrary structured data.
    Struct(serde_json::Value),
    /// Homogeneous list of values.
    List(Vec<CustomFieldValue>),
}

impl CustomFieldValue {
    /// Human-readable name of the value's type, for error messages.
    #[must_use]
    pub const fn kind_name(&self) -> &'static str {
        match self {
            Self::Text(_) => "text",
            Self::Int(_) => "int",
            Self::Float(_) => "float",
            Self::Bool(_) => "bool",
            Self::DateTime(_) => "datetime",
            Self::Relation(_) => "relation",
            Self::Struct(_) => "struct",
            Self::List(_) => "list",
        }
    }
}

/// Custom-field bag carried by Orders and OrderLines.
pub type CustomFields = BTreeMap<String, CustomFieldValue>;

/// Declared type and constraints of one custom field.
#[derive(Clone, Debug)]
pub enum CustomFieldKind {
    /// Free text, optionally constrained by a regex and a maximum length.
    Text {
        /// Regex the whole value must match.
        pattern: Option<String>,
        /// Maximum length in characters.
        max_length: Option<usize>,
    },
    /// Integer with optional inclusive bounds.
    Int {
        /// Inclusive lower bound.
        min: Option<i64>,
        /// Inclusive upper bound.
        max: Option<i64>,
    },
    /// Float with optional inclusive bounds.
    Float {
        /// Inclusive lower bound.
        min: Option<f64>,
        /// Inclusive upper bound.
        max: Option<f64>,
    },
    /// Boolean flag.
    Bool,
    /// Point in time with optional inclusive bounds.
    DateTime {
        /// Inclusive lower bound.
        min: Option<DateTime<Utc>>,
        /// Inclusive upper bound.
        max: Option<DateTime<Utc>>,
    },
    /// Reference to another entity.
    Relation,
    /// Arbitrary structured data, not constrained.
    Struct,
}

impl CustomFieldKind {
    const fn expected_name(&self) -> &'static str {
        match self {
            Self::Text { .. } => "text",
            Self::Int { .. } => "int",
            Self::Float { .. } => "float",
            Self::Bool => "bool",
            Self::DateTime { .. } => "datetime",
            Self::Relation => "relation",
            Self::Struct => "struct",
        }
    }
}

/// Custom validation hook applied after the declarative constraints pass.
pub type FieldValidator = Arc<dyn Fn(&CustomFieldValue) -> Result<(), String> + Send + Sync>;

/// Declaration of one custom field on an entity.
#[derive(Clone)]
pub struct CustomFieldDef {
    name: String,
    kind: CustomFieldKind,
    list: bool,
    max_list_length: Option<usize>,
    required: bool,
    validator: Option<FieldValidator>,
}

impl CustomFieldDef {
    /// Declares a field of the given kind.
    #[must_use]
    pub fn new(name: impl Into<String>, kind: CustomFieldKind) -> Self {
        Self {
            name: name.into(),
            kind,
            list: false,
            max_list_length: None,
            required: false,
            validator: None,
        }
    }

    /// Marks the field as holding a list of values of its kind.
    #[must_use]
    pub const fn list(mut self) -> Self {
        self.list = true;
        self
    }

    /// Caps the number of elements a list field may hold.
    #[must_use]
    pub const fn max_list_length(mut self, max: usize) -> Self {
        self.max_list_length = Some(max);
        self
    }

    /// Requires the field to be present on every instance.
    #[must_use]
    pub const fn required(mut self) -> Self {
        self.required = true;
        self
    }

    /// Attaches a custom validation function.
    #[must_use]
    pub fn with_validator(mut self, validator: FieldValidator) -> Self {
        self.validator = Some(validator);
        self
    }

    /// The field's declared name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl fmt::Debug for CustomFieldDef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CustomFieldDef")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("list", &self.list)
            .field("required", &self.required)
            .field("has_validator", &self.validator.is_some())
            .finish()
    }
}

/// A custom-field bag violated its declared schema.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum CustomFieldError {
    /// A required field is absent.
    #[error("required custom field \"{field}\" is missing")]
    MissingRequired {
        /// Declared field name.
        field: String,
    },

    /// The bag contains a field with no declaration.
    #[error("custom field \"{field}\" is not defined for {entity}")]
    Unknown {
        /// Entity the bag belongs to.
        entity: String,
        /// Offending key.
        field: String,
    },

    /// A value has the wrong type for its declaration.
    #[error("custom field \"{field}\" expected a {expected} value")]
    TypeMismatch {
        /// Declared field name.
        field: String,
        /// Expected type name.
        expected: &'static str,
    },

    /// A declarative or custom constraint rejected the value.
    #[error("custom field \"{field}\" violates a constraint: {message}")]
    Constraint {
        /// Declared field name.
        field: String,
        /// What was violated.
        message: String,
    },
}

/// Registry of custom-field declarations keyed by entity name.
///
/// The engine consults the `"Order"` and `"OrderLine"` entries.
#[derive(Clone, Debug, Default)]
pub struct CustomFieldsRegistry {
    defs: BTreeMap<String, Vec<CustomFieldDef>>,
}

impl CustomFieldsRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a field declaration for the given entity.
    pub fn register(&mut self, entity: impl Into<String>, def: CustomFieldDef) {
        self.defs.entry(entity.into()).or_default().push(def);
    }

    /// Declarations for one entity, empty if none were registered.
    #[must_use]
    pub fn definitions(&self, entity: &str) -> &[CustomFieldDef] {
        self.defs.get(entity).map_or(&[], Vec::as_slice)
    }

    /// Validates a bag against the declarations for `entity`.
    ///
    /// Unknown keys are rejected and required fields must be present.
    /// Entities with no declarations accept only empty bags.
    ///
    /// # Errors
    ///
    /// Returns the first schema violation found.
    pub fn validate(&self, entity: &str, fields: &CustomFields) -> Result<(), CustomFieldError> {
        let defs = self.definitions(entity);
        for def in defs {
            if def.required && !fields.contains_key(&def.name) {
                return Err(CustomFieldError::MissingRequired { field: def.name.clone() });
            }
        }
        for (key, value) in fields {
            let Some(def) = defs.iter().find(|d| &d.name == key) else {
                return Err(CustomFieldError::Unknown {
                    entity: entity.to_string(),
                    field: key.clone(),
                });
            };
            validate_value(def, value)?;
            if let Some(validator) = &def.validator {
                validator(value).map_err(|message| CustomFieldError::Constraint {
                    field: key.clone(),
                    message,
                })?;
            }
        }
        Ok(())
    }
}

fn validate_value(def: &CustomFieldDef, value: &CustomFieldValue) -> Result<(), CustomFieldError> {
    if def.list {
        let CustomFieldValue::List(items) = value else {
            return Err(CustomFieldError::TypeMismatch { field: def.name.clone(), expected: "list" });
        };
        if let Some(max) = def.max_list_length {
            if items.len() > max {
                return Err(CustomFieldError::Constraint {
                    field: def.name.clone(),
                    message: format!("at most {max} element(s) allowed, got {}", items.len()),
                });
            }
        }
        for item in items {
            validate_scalar(def, item)?;
        }
        return Ok(());
    }
    validate_scalar(def, value)
}

fn validate_scalar(def: &CustomFieldDef, value: &CustomFieldValue) -> Result<(), CustomFieldError> {
    let mismatch = || CustomFieldError::TypeMismatch {
        field: def.name.clone(),
        expected: def.kind.expected_name(),
    };
    let constraint = |message: String| CustomFieldError::Constraint {
        field: def.name.clone(),
        message,
    };

    match (&def.kind, value) {
        (CustomFieldKind::Text { pattern, max_length }, CustomFieldValue::Text(text)) => {
            if let Some(max) = max_length {
                if text.chars().count() > *max {
                    return Err(constraint(format!("length exceeds {max}")));
                }
            }
            if let Some(pattern) = pattern {
                let regex = Regex::new(pattern)
                    .map_err(|e| constraint(format!("invalid pattern \"{pattern}\": {e}")))?;
                if !regex.is_match(text) {
                    return Err(constraint(format!("value does not match pattern \"{pattern}\"")));
                }
            }
            Ok(())
        }
        (CustomFieldKind::Int { min, max }, CustomFieldValue::Int(n)) => {
            if min.is_some_and(|min| *n < min) || max.is_some_and(|max| *n > max) {
                return Err(constraint(format!("{n} is out of bounds")));
            }
            Ok(())
        }
        (CustomFieldKind::Float { min, max }, CustomFieldValue::Float(x)) => {
            if min.is_some_and(|min| *x < min) || max.is_some_and(|max| *x > max) {
                return Err(constraint(format!("{x} is out of bounds")));
            }
            Ok(())
        }
        (CustomFieldKind::Bool, CustomFieldValue::Bool(_))
        | (CustomFieldKind::Relation, CustomFieldValue::Relation(_))
        | (CustomFieldKind::Struct, CustomFieldValue::Struct(_)) => Ok(()),
        (CustomFieldKind::DateTime { min, max }, CustomFieldValue::DateTime(at)) => {
            if min.is_some_and(|min| *at < min) || max.is_some_and(|max| *at > max) {
                return Err(constraint(format!("{at} is out of bounds")));
            }
            Ok(())
        }
        _ => Err(mismatch()),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)] // test assertions may unwrap
mod tests {
    use super::*;

    fn registry_with(def: CustomFieldDef) -> CustomFieldsRegistry {
        let mut registry = CustomFieldsRegistry::new();
        registry.register("OrderLine", def);
        registry
    }

    fn bag(key: &str, value: CustomFieldValue) -> CustomFields {
        let mut fields = CustomFields::new();
        fields.insert(key.to_string(), value);
        fields
    }

    #[test]
    fn unknown_fields_are_rejected() {
        let registry = CustomFieldsRegistry::new();
        let err = registry
            .validate("OrderLine", &bag("engraving", CustomFieldValue::Text("hi".into())))
            .unwrap_err();
        assert!(matches!(err, CustomFieldError::Unknown { .. }));
    }

    #[test]
    fn required_fields_must_be_present() {
        let registry = registry_with(
            CustomFieldDef::new("giftWrap", CustomFieldKind::Bool).required(),
        );
        let err = registry.validate("OrderLine", &CustomFields::new()).unwrap_err();
        assert_eq!(err, CustomFieldError::MissingRequired { field: "giftWrap".into() });
    }

    #[test]
    fn pattern_constraint_applies_to_text() {
        let registry = registry_with(CustomFieldDef::new(
            "sku_note",
            CustomFieldKind::Text { pattern: Some("^[A-Z]{3}-\\d+$".into()), max_length: None },
        ));
        assert!(registry
            .validate("OrderLine", &bag("sku_note", CustomFieldValue::Text("ABC-42".into())))
            .is_ok());
        let err = registry
            .validate("OrderLine", &bag("sku_note", CustomFieldValue::Text("nope".into())))
            .unwrap_err();
        assert!(matches!(err, CustomFieldError::Constraint { .. }));
    }

    #[test]
    fn int_bounds_are_inclusive() {
        let registry = registry_with(CustomFieldDef::new(
            "priority",
            CustomFieldKind::Int { min: Some(1), max: Some(5) },
        ));
        assert!(registry.validate("OrderLine", &bag("priority", CustomFieldValue::Int(5))).is_ok());
        assert!(registry.validate("OrderLine", &bag("priority", CustomFieldValue::Int(6))).is_err());
    }

    #[test]
    fn type_mismatch_names_expected_kind() {
        let registry = registry_with(CustomFieldDef::new(
            "priority",
            CustomFieldKind::Int { min: None, max: None },
        ));
        let err = registry
            .validate("OrderLine", &bag("priority", CustomFieldValue::Text("high".into())))
            .unwrap_err();
        assert_eq!(err, CustomFieldError::TypeMismatch { field: "priority".into(), expected: "int" });
    }

    #[test]
    fn list_fields_check_each_element_and_length() {
        let registry = registry_with(
            CustomFieldDef::new("tags", CustomFieldKind::Text { pattern: None, max_length: Some(8) })
                .list()
                .max_list_length(2),
        );
        let ok = CustomFieldValue::List(vec![
            CustomFieldValue::Text("gift".into()),
            CustomFieldValue::Text("fragile".into()),
        ]);
        assert!(registry.validate("OrderLine", &bag("tags", ok)).is_ok());

        let too_many = CustomFieldValue::List(vec![
            CustomFieldValue::Text("a".into()),
            CustomFieldValue::Text("b".into()),
            CustomFieldValue::Text("c".into()),
        ]);
        assert!(registry.validate("OrderLine", &bag("tags", too_many)).is_err());
    }

    #[test]
    fn custom_validator_runs_after_declarative_checks() {
        let def = CustomFieldDef::new("code", CustomFieldKind::Text { pattern: None, max_length: None })
            .with_validator(Arc::new(|value| match value {
                CustomFieldValue::Text(text) if text.starts_with("OF-") => Ok(()),
                _ => Err("must start with OF-".to_string()),
            }));
        let registry = registry_with(def);
        assert!(registry.validate("OrderLine", &bag("code", CustomFieldValue::Text("OF-1".into()))).is_ok());
        let err = registry
            .validate("OrderLine", &bag("code", CustomFieldValue::Text("XX-1".into())))
            .unwrap_err();
        assert!(err.to_string().contains("must start with OF-"));
    }
}
