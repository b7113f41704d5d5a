//! Field validation and the named validator registry.

use std::collections::HashMap;
use std::sync::{Arc, LazyLock};

use regex::Regex;

use super::schema::{FieldKind, FormFieldSchema, Validator};
use super::sequence::{StepConfig, StepSequence};
use crate::error::{SchemaError, ValidationError};

/// `local@domain.tld` with no whitespace and exactly one `@`.
static EMAIL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").unwrap());

pub const INVALID_EMAIL_MESSAGE: &str = "Please enter a valid email address";

pub const FOREIGN_FIELD_MESSAGE: &str = "This field cannot be changed on this step";

pub fn is_valid_email(value: &str) -> bool {
    EMAIL_RE.is_match(value.trim())
}

pub fn email_validator() -> Validator {
    Arc::new(|value: &str| {
        if is_valid_email(value) {
            None
        } else {
            Some(INVALID_EMAIL_MESSAGE.to_string())
        }
    })
}

pub fn non_empty_validator() -> Validator {
    Arc::new(|value: &str| {
        if value.trim().is_empty() {
            Some("This field cannot be empty".to_string())
        } else {
            None
        }
    })
}

pub fn min_length_validator(min: usize) -> Validator {
    Arc::new(move |value: &str| {
        if value.trim().chars().count() < min {
            Some(format!("Please enter at least {min} characters"))
        } else {
            None
        }
    })
}

pub fn max_length_validator(max: usize) -> Validator {
    Arc::new(move |value: &str| {
        if value.trim().chars().count() > max {
            Some(format!("Please keep this under {max} characters"))
        } else {
            None
        }
    })
}

/// Validate one field against a submitted value (`None` when absent).
///
/// Blank values fail only when the field is required. Non-blank values are
/// checked against radio options and the field's validator.
pub fn validate_field(field: &FormFieldSchema, value: Option<&str>) -> Result<(), ValidationError> {
    let value = value.unwrap_or_default();

    if value.trim().is_empty() {
        if field.required {
            return Err(ValidationError::new(
                &field.name,
                format!("{} is required", field.label),
            ));
        }
        return Ok(());
    }

    match &field.kind {
        FieldKind::Radio { options } => {
            if !options.iter().any(|o| o.value == value.trim()) {
                return Err(ValidationError::new(&field.name, "Please choose one of the options"));
            }
        }
        FieldKind::Email | FieldKind::Text => {}
        FieldKind::TerminalShare => return Ok(()),
    }

    if let Some(validator) = &field.validator
        && let Some(message) = validator(value)
    {
        return Err(ValidationError::new(&field.name, message));
    }

    Ok(())
}

/// Validate every field of a step. Reports the first failing field in order.
pub fn validate_step(
    step: &StepConfig,
    values: &HashMap<String, String>,
) -> Result<(), ValidationError> {
    for field in &step.fields {
        validate_field(field, values.get(&field.name).map(String::as_str))?;
    }
    Ok(())
}

/// Validate a submission for the step at `index`.
///
/// Keys naming a field of another step are rejected, so a later step can
/// never overwrite an earlier answer unchecked. Keys no step declares pass
/// through.
pub fn validate_submission(
    sequence: &StepSequence,
    index: usize,
    values: &HashMap<String, String>,
) -> Result<(), ValidationError> {
    let mut keys: Vec<&String> = values.keys().collect();
    keys.sort();
    for key in keys {
        if sequence.owning_step(key).is_some_and(|owner| owner != index) {
            return Err(ValidationError::new(key.as_str(), FOREIGN_FIELD_MESSAGE));
        }
    }
    match sequence.step(index) {
        Some(step) => validate_step(step, values),
        None => Ok(()),
    }
}

/// Validators addressable by name, so flows can be described as data.
///
/// Parameterised built-ins use `name:arg`, e.g. `min_length:3`.
pub struct ValidatorRegistry {
    validators: HashMap<String, Validator>,
}

impl ValidatorRegistry {
    /// Registry holding the built-in validators.
    pub fn new() -> Self {
        let mut validators: HashMap<String, Validator> = HashMap::new();
        validators.insert("email".to_string(), email_validator());
        validators.insert("non_empty".to_string(), non_empty_validator());
        Self { validators }
    }

    /// Register (or replace) a named validator.
    pub fn register(&mut self, name: impl Into<String>, validator: Validator) {
        let name = name.into();
        if self.validators.insert(name.clone(), validator).is_some() {
            tracing::debug!(validator = %name, "Replaced registered validator");
        }
    }

    /// Resolve a validator by name.
    pub fn resolve(&self, name: &str) -> Result<Validator, SchemaError> {
        if let Some(v) = self.validators.get(name) {
            return Ok(Arc::clone(v));
        }

        let unknown = || SchemaError::UnknownValidator {
            name: name.to_string(),
        };
        let (base, arg) = name.split_once(':').ok_or_else(unknown)?;
        let n: usize = arg.trim().parse().map_err(|_| unknown())?;
        match base {
            "min_length" => Ok(min_length_validator(n)),
            "max_length" => Ok(max_length_validator(n)),
            _ => Err(unknown()),
        }
    }
}

impl Default for ValidatorRegistry {
    fn default() -> Self {
        Self::new()
    }
}
