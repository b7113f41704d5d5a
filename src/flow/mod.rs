//! Multi-step signup flows: field schema, step sequence, state machine and
//! the controller that drives them.

pub mod controller;
pub mod definition;
pub mod presets;
pub mod schema;
pub mod sequence;
pub mod state;
pub mod validation;

pub use controller::{CloseOutcome, CloseReason, SignupFlowController, StepOutcome, SuccessHook};
pub use definition::{FieldDefinition, FlowDefinition, StepDefinition};
pub use schema::{ChoiceOption, FieldKind, FormFieldSchema, Validator};
pub use sequence::{StepConfig, StepSequence};
pub use state::{FlowPhase, FlowState, SignupRecord};
pub use validation::{
    ValidatorRegistry, is_valid_email, validate_field, validate_step, validate_submission,
};
