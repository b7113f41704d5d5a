//! Presentation shell binding: view model, flow registry and HTTP routes.

pub mod registry;
pub mod routes;
pub mod view;

pub use registry::{FlowRegistry, spawn_sweep_task};
pub use routes::{ShellRouteState, cors_layer, shell_routes};
pub use view::{FieldView, ShellView};
