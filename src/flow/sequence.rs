//! Step sequences: the ordered screens of a flow.

use std::collections::HashSet;

use super::schema::{FieldKind, FormFieldSchema};
use crate::error::SchemaError;

/// One screen of the flow.
#[derive(Debug, Clone)]
pub struct StepConfig {
    pub title: String,
    pub fields: Vec<FormFieldSchema>,
    /// Collected data is written to the store when this step is submitted.
    pub persistence_boundary: bool,
}

impl StepConfig {
    pub fn new(title: impl Into<String>, fields: Vec<FormFieldSchema>) -> Self {
        Self {
            title: title.into(),
            fields,
            persistence_boundary: false,
        }
    }

    /// Single-field step, the shape every shipped flow uses.
    pub fn single(title: impl Into<String>, field: FormFieldSchema) -> Self {
        Self::new(title, vec![field])
    }

    /// Mark this step as the persistence boundary.
    pub fn persist(mut self) -> Self {
        self.persistence_boundary = true;
        self
    }

    /// Name used in analytics: the first field's name.
    pub fn name(&self) -> &str {
        self.fields.first().map(|f| f.name.as_str()).unwrap_or("")
    }

    pub fn has_email_field(&self) -> bool {
        self.fields.iter().any(|f| f.kind.is_email())
    }

    pub fn is_terminal(&self) -> bool {
        self.fields.iter().any(|f| f.kind.is_terminal())
    }
}

/// Ordered, validated list of steps.
#[derive(Debug, Clone)]
pub struct StepSequence {
    steps: Vec<StepConfig>,
}

impl StepSequence {
    /// Build a sequence, rejecting any invariant violation.
    ///
    /// When no step is marked as the persistence boundary, the step before
    /// the trailing share step (or the last step) is marked.
    pub fn new(mut steps: Vec<StepConfig>) -> Result<Self, SchemaError> {
        if steps.is_empty() {
            return Err(SchemaError::EmptySequence);
        }

        let last = steps.len() - 1;
        let mut seen = HashSet::new();
        for (index, step) in steps.iter().enumerate() {
            if step.fields.is_empty() {
                return Err(SchemaError::EmptyStep { index });
            }
            if step.is_terminal() && index != last {
                return Err(SchemaError::TerminalShareNotLast { index });
            }
            for field in &step.fields {
                if !seen.insert(field.name.as_str()) {
                    return Err(SchemaError::DuplicateField {
                        field: field.name.clone(),
                    });
                }
                match &field.kind {
                    FieldKind::Radio { options } if options.is_empty() => {
                        return Err(SchemaError::RadioWithoutOptions {
                            field: field.name.clone(),
                        });
                    }
                    FieldKind::TerminalShare if field.required || field.validator.is_some() => {
                        return Err(SchemaError::InvalidTerminalField {
                            field: field.name.clone(),
                        });
                    }
                    _ => {}
                }
            }
        }

        if steps.iter().all(StepConfig::is_terminal) {
            return Err(SchemaError::NothingToCollect);
        }

        let marked: Vec<usize> = steps
            .iter()
            .enumerate()
            .filter(|(_, s)| s.persistence_boundary)
            .map(|(i, _)| i)
            .collect();

        match marked.as_slice() {
            [] => {
                let index = if steps[last].is_terminal() { last - 1 } else { last };
                steps[index].persistence_boundary = true;
            }
            [index] => {
                let index = *index;
                if steps[index].is_terminal() {
                    return Err(SchemaError::BoundaryOnTerminal { index });
                }
                if steps[index + 1..].iter().any(|s| !s.is_terminal()) {
                    return Err(SchemaError::BoundaryNotFinal { index });
                }
            }
            many => return Err(SchemaError::BoundaryCount { count: many.len() }),
        }

        Ok(Self { steps })
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn steps(&self) -> &[StepConfig] {
        &self.steps
    }

    pub fn step(&self, index: usize) -> Option<&StepConfig> {
        self.steps.get(index)
    }

    pub fn is_persistence_boundary(&self, index: usize) -> bool {
        self.step(index).is_some_and(|s| s.persistence_boundary)
    }

    /// Index a seeded flow starts at: the first collecting step without an
    /// email field. `None` when the email step is the only thing to collect.
    pub fn first_step_without_email(&self) -> Option<usize> {
        self.steps
            .iter()
            .position(|s| !s.has_email_field() && !s.is_terminal())
    }

    /// Index of the step that declares the field `name`.
    pub fn owning_step(&self, name: &str) -> Option<usize> {
        self.steps
            .iter()
            .position(|s| s.fields.iter().any(|f| f.name == name))
    }

    /// All fields that contribute a value to the record, in step order.
    pub fn collecting_fields(&self) -> impl Iterator<Item = &FormFieldSchema> {
        self.steps
            .iter()
            .flat_map(|s| s.fields.iter())
            .filter(|f| f.collects())
    }
}
