//! Field schema: declarative description of one collectible input.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::validation::email_validator;

/// A pure check over a submitted value. Returns an error message on rejection.
pub type Validator = Arc<dyn Fn(&str) -> Option<String> + Send + Sync>;

/// One selectable answer of a radio field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChoiceOption {
    pub value: String,
    pub label: String,
}

impl ChoiceOption {
    pub fn new(value: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            label: label.into(),
        }
    }
}

/// What kind of input a field collects.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FieldKind {
    Email,
    Text,
    Radio { options: Vec<ChoiceOption> },
    /// Post-signup share call to action. Collects nothing.
    TerminalShare,
}

impl FieldKind {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::TerminalShare)
    }

    pub fn is_email(&self) -> bool {
        matches!(self, Self::Email)
    }
}

impl fmt::Display for FieldKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Email => "email",
            Self::Text => "text",
            Self::Radio { .. } => "radio",
            Self::TerminalShare => "terminal_share",
        };
        write!(f, "{s}")
    }
}

/// One input of a step.
#[derive(Clone)]
pub struct FormFieldSchema {
    pub name: String,
    pub kind: FieldKind,
    pub label: String,
    pub placeholder: Option<String>,
    pub description: Option<String>,
    pub required: bool,
    pub validator: Option<Validator>,
}

impl FormFieldSchema {
    fn new(name: impl Into<String>, kind: FieldKind, label: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind,
            label: label.into(),
            placeholder: None,
            description: None,
            required: false,
            validator: None,
        }
    }

    /// Required `email` field carrying the email-shape validator.
    pub fn email(label: impl Into<String>) -> Self {
        Self::new("email", FieldKind::Email, label)
            .required(true)
            .with_validator(email_validator())
    }

    pub fn text(name: impl Into<String>, label: impl Into<String>) -> Self {
        Self::new(name, FieldKind::Text, label)
    }

    pub fn radio(
        name: impl Into<String>,
        label: impl Into<String>,
        options: Vec<ChoiceOption>,
    ) -> Self {
        Self::new(name, FieldKind::Radio { options }, label)
    }

    pub fn terminal_share(name: impl Into<String>, label: impl Into<String>) -> Self {
        Self::new(name, FieldKind::TerminalShare, label)
    }

    pub fn required(mut self, required: bool) -> Self {
        self.required = required;
        self
    }

    pub fn placeholder(mut self, placeholder: impl Into<String>) -> Self {
        self.placeholder = Some(placeholder.into());
        self
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_validator(mut self, validator: Validator) -> Self {
        self.validator = Some(validator);
        self
    }

    /// Radio options, empty for every other kind.
    pub fn options(&self) -> &[ChoiceOption] {
        match &self.kind {
            FieldKind::Radio { options } => options,
            _ => &[],
        }
    }

    /// Whether this field contributes a value to the record.
    pub fn collects(&self) -> bool {
        !self.kind.is_terminal()
    }
}

impl fmt::Debug for FormFieldSchema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FormFieldSchema")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("label", &self.label)
            .field("required", &self.required)
            .field("has_validator", &self.validator.is_some())
            .finish()
    }
}
