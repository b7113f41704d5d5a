//! Signup Flow: multi-step signup and survey capture.

pub mod analytics;
pub mod config;
pub mod error;
pub mod flow;
pub mod shell;
pub mod sink;
