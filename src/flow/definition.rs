//! Flow definitions: a whole flow described as JSON and resolved against a
//! validator registry.
//!
//! ```json
//! {
//!   "collection": "signups",
//!   "source": "hero_cta",
//!   "column_mapping": { "email": "email_address" },
//!   "steps": [
//!     { "title": "Join", "fields": [{ "name": "email", "kind": "email", "label": "Email" }] },
//!     { "title": "Why", "fields": [{ "name": "why", "kind": "text", "label": "Why?",
//!                                    "required": true, "validators": ["min_length:3"] }] }
//!   ]
//! }
//! ```

use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::schema::{FieldKind, FormFieldSchema, Validator};
use super::sequence::{StepConfig, StepSequence};
use super::validation::ValidatorRegistry;
use crate::config::{DEFAULT_FAILURE_MESSAGE, FlowConfig};
use crate::error::{ConfigError, Error, SchemaError};
use crate::sink::ColumnMapping;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldDefinition {
    pub name: String,
    #[serde(flatten)]
    pub kind: FieldKind,
    pub label: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub placeholder: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Defaults to true for email fields, false otherwise.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub required: Option<bool>,
    /// Registry names, applied in order. Email fields always get `email`.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub validators: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepDefinition {
    pub title: String,
    pub fields: Vec<FieldDefinition>,
    #[serde(default)]
    pub persistence_boundary: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlowDefinition {
    pub collection: String,
    #[serde(default = "default_source")]
    pub source: String,
    #[serde(default)]
    pub column_mapping: ColumnMapping,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_message: Option<String>,
    pub steps: Vec<StepDefinition>,
}

fn default_source() -> String {
    "landing".to_string()
}

impl FlowDefinition {
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        serde_json::from_str(json).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_json(&raw)
    }

    /// Resolve validators and build the validated sequence plus its config.
    pub fn build(
        &self,
        registry: &ValidatorRegistry,
    ) -> Result<(StepSequence, FlowConfig), SchemaError> {
        let steps = self
            .steps
            .iter()
            .map(|step| {
                let fields = step
                    .fields
                    .iter()
                    .map(|f| build_field(f, registry))
                    .collect::<Result<Vec<_>, _>>()?;
                let mut config = StepConfig::new(step.title.clone(), fields);
                config.persistence_boundary = step.persistence_boundary;
                Ok(config)
            })
            .collect::<Result<Vec<_>, SchemaError>>()?;

        let sequence = StepSequence::new(steps)?;
        let config = FlowConfig {
            collection: self.collection.clone(),
            source: self.source.clone(),
            column_mapping: self.column_mapping.clone(),
            failure_message: self
                .failure_message
                .clone()
                .unwrap_or_else(|| DEFAULT_FAILURE_MESSAGE.to_string()),
        };
        Ok((sequence, config))
    }

    /// Load from a file and build, for the server binary.
    pub fn load_and_build(
        path: &Path,
        registry: &ValidatorRegistry,
    ) -> Result<(StepSequence, FlowConfig), Error> {
        Ok(Self::load(path)?.build(registry)?)
    }
}

fn build_field(def: &FieldDefinition, registry: &ValidatorRegistry) -> Result<FormFieldSchema, SchemaError> {
    let mut names: Vec<&str> = def.validators.iter().map(String::as_str).collect();
    if def.kind.is_email() && !names.contains(&"email") {
        names.insert(0, "email");
    }
    let validators = names
        .into_iter()
        .map(|n| registry.resolve(n))
        .collect::<Result<Vec<_>, _>>()?;

    let mut field = FormFieldSchema {
        name: def.name.clone(),
        kind: def.kind.clone(),
        label: def.label.clone(),
        placeholder: def.placeholder.clone(),
        description: def.description.clone(),
        required: def.required.unwrap_or(def.kind.is_email()),
        validator: None,
    };
    if let Some(v) = compose(validators) {
        field = field.with_validator(v);
    }
    Ok(field)
}

/// Chain validators; the first rejection wins.
fn compose(mut validators: Vec<Validator>) -> Option<Validator> {
    match validators.len() {
        0 => None,
        1 => validators.pop(),
        _ => Some(Arc::new(move |value: &str| {
            validators.iter().find_map(|v| v(value))
        })),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PMF: &str = r#"{
        "collection": "signups",
        "source": "hero_cta",
        "column_mapping": { "email": "email_address", "excitement": "excitement_to_focus" },
        "steps": [
            { "title": "Join", "fields": [{ "name": "email", "kind": "email", "label": "Email" }] },
            { "title": "Disappointment", "fields": [{
                "name": "disappointment", "kind": "radio", "label": "How disappointed?",
                "required": true,
                "options": [
                    { "value": "very", "label": "Very disappointed" },
                    { "value": "not", "label": "Not disappointed" }
                ]
            }] },
            { "title": "Excitement", "fields": [{
                "name": "excitement", "kind": "text", "label": "What excites you?",
                "required": true, "validators": ["min_length:3", "max_length:500"]
            }] },
            { "title": "Share", "fields": [{ "name": "share", "kind": "terminal_share", "label": "Tell a friend" }] }
        ]
    }"#;

    #[test]
    fn builds_four_step_flow() {
        let def = FlowDefinition::from_json(PMF).unwrap();
        let (sequence, config) = def.build(&ValidatorRegistry::new()).unwrap();

        assert_eq!(sequence.len(), 4);
        assert!(sequence.is_persistence_boundary(2));
        assert_eq!(config.collection, "signups");
        assert_eq!(config.source, "hero_cta");
        assert_eq!(config.column_mapping.column("email"), "email_address");
        assert_eq!(config.failure_message, DEFAULT_FAILURE_MESSAGE);

        let email = &sequence.step(0).unwrap().fields[0];
        assert!(email.required);
        let check = email.validator.as_ref().unwrap();
        assert!(check("nope").is_some());
        assert!(check("a@b.co").is_none());
    }

    #[test]
    fn composed_validators_apply_in_order() {
        let def = FlowDefinition::from_json(PMF).unwrap();
        let (sequence, _) = def.build(&ValidatorRegistry::new()).unwrap();
        let check = sequence.step(2).unwrap().fields[0].validator.clone().unwrap();
        assert_eq!(check("ab").unwrap(), "Please enter at least 3 characters");
        assert!(check(&"x".repeat(501)).unwrap().contains("500"));
        assert!(check("fast onboarding").is_none());
    }

    #[test]
    fn unknown_validator_fails_build() {
        let json = r#"{
            "collection": "signups",
            "steps": [{ "title": "Join", "fields": [{
                "name": "email", "kind": "email", "label": "Email", "validators": ["mx_record"]
            }] }]
        }"#;
        let def = FlowDefinition::from_json(json).unwrap();
        let err = def.build(&ValidatorRegistry::new()).unwrap_err();
        assert_eq!(err, SchemaError::UnknownValidator { name: "mx_record".to_string() });
    }

    #[test]
    fn invariant_violations_surface_from_build() {
        let json = r#"{
            "collection": "signups",
            "steps": [
                { "title": "Share", "fields": [{ "name": "share", "kind": "terminal_share", "label": "Share" }] },
                { "title": "Join", "fields": [{ "name": "email", "kind": "email", "label": "Email" }] }
            ]
        }"#;
        let def = FlowDefinition::from_json(json).unwrap();
        assert_eq!(
            def.build(&ValidatorRegistry::new()).unwrap_err(),
            SchemaError::TerminalShareNotLast { index: 0 }
        );
    }

    #[test]
    fn malformed_json_is_a_parse_error() {
        let err = FlowDefinition::from_json("{ not json").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("flow.json");
        std::fs::write(&path, PMF).unwrap();
        let (sequence, _) =
            FlowDefinition::load_and_build(&path, &ValidatorRegistry::new()).unwrap();
        assert_eq!(sequence.len(), 4);

        let missing = FlowDefinition::load(&dir.path().join("missing.json")).unwrap_err();
        assert!(matches!(missing, ConfigError::Io(_)));
    }
}
