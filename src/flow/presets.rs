//! Built-in flows.

use super::schema::{ChoiceOption, FormFieldSchema};
use super::sequence::{StepConfig, StepSequence};
use crate::config::FlowConfig;
use crate::error::SchemaError;
use crate::sink::ColumnMapping;

pub const PRODUCT_MARKET_FIT: &str = "product_market_fit";
pub const WAITLIST: &str = "waitlist";

/// Look a preset up by name.
pub fn by_name(name: &str) -> Option<Result<(StepSequence, FlowConfig), SchemaError>> {
    match name {
        PRODUCT_MARKET_FIT => Some(product_market_fit()),
        WAITLIST => Some(waitlist()),
        _ => None,
    }
}

fn share_step() -> StepConfig {
    StepConfig::single(
        "You're on the list",
        FormFieldSchema::terminal_share("share", "Know someone who'd like this?")
            .description("Share the link and skip the queue together."),
    )
}

/// Email, then the "how disappointed would you be" survey, then an open
/// question, then the share screen. Persists after the open question.
pub fn product_market_fit() -> Result<(StepSequence, FlowConfig), SchemaError> {
    let steps = vec![
        StepConfig::single(
            "Get early access",
            FormFieldSchema::email("Email address").placeholder("you@company.com"),
        ),
        StepConfig::single(
            "Quick question",
            FormFieldSchema::radio(
                "disappointment",
                "How would you feel if you could no longer use the product?",
                vec![
                    ChoiceOption::new("very", "Very disappointed"),
                    ChoiceOption::new("somewhat", "Somewhat disappointed"),
                    ChoiceOption::new("not", "Not disappointed"),
                ],
            )
            .required(true),
        ),
        StepConfig::single(
            "One more thing",
            FormFieldSchema::text("excitement", "What are you most excited about?")
                .placeholder("The thing I'd use first is...")
                .required(true),
        ),
        share_step(),
    ];

    let config = FlowConfig {
        collection: "signups".to_string(),
        column_mapping: ColumnMapping::new()
            .with("email", "email_address")
            .with("excitement", "excitement_to_focus"),
        ..FlowConfig::default()
    };
    Ok((StepSequence::new(steps)?, config))
}

/// Email only, then the share screen.
pub fn waitlist() -> Result<(StepSequence, FlowConfig), SchemaError> {
    let steps = vec![
        StepConfig::single(
            "Join the waitlist",
            FormFieldSchema::email("Email address").placeholder("you@company.com"),
        ),
        share_step(),
    ];
    let config = FlowConfig {
        collection: "waitlist".to_string(),
        column_mapping: ColumnMapping::new().with("email", "email_address"),
        ..FlowConfig::default()
    };
    Ok((StepSequence::new(steps)?, config))
}
