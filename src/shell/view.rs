//! View model rendered by the presentation shell.

use serde::Serialize;
use uuid::Uuid;

use crate::flow::{FieldKind, FlowPhase, FlowState, FormFieldSchema, StepSequence};

/// One input of the current step, with its current value pre-filled.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FieldView {
    pub name: String,
    #[serde(flatten)]
    pub kind: FieldKind,
    pub label: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub placeholder: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub required: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
}

impl FieldView {
    fn new(field: &FormFieldSchema, state: &FlowState) -> Self {
        Self {
            name: field.name.clone(),
            kind: field.kind.clone(),
            label: field.label.clone(),
            placeholder: field.placeholder.clone(),
            description: field.description.clone(),
            required: field.required,
            value: field.collects().then(|| state.collected.get(&field.name).cloned()).flatten(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ShellView {
    pub flow_id: Uuid,
    pub phase: FlowPhase,
    pub step_index: usize,
    pub step_count: usize,
    pub title: String,
    pub fields: Vec<FieldView>,
    pub inputs_disabled: bool,
    pub error: Option<String>,
    /// 0.0 on the first step, 1.0 on the last.
    pub progress: f64,
    pub success: bool,
    pub dismissable: bool,
}

impl ShellView {
    pub fn from_state(state: &FlowState, sequence: &StepSequence) -> Self {
        let step_count = sequence.len();
        let index = state.current_step_index.min(step_count.saturating_sub(1));
        let step = sequence.step(index);

        let progress = if step_count <= 1 {
            1.0
        } else {
            index as f64 / (step_count - 1) as f64
        };

        Self {
            flow_id: state.flow_id,
            phase: state.phase,
            step_index: index,
            step_count,
            title: step.map(|s| s.title.clone()).unwrap_or_default(),
            fields: step
                .map(|s| s.fields.iter().map(|f| FieldView::new(f, state)).collect())
                .unwrap_or_default(),
            inputs_disabled: state.submitting,
            error: state.last_error.clone(),
            progress,
            success: state.phase == FlowPhase::Succeeded,
            dismissable: !state.submitting,
        }
    }
}
