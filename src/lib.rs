// Veneer - Overlay Application Pipeline
//
// Builds, installs and activates themed resource-override packages, then
// reconciles their enabled state. This is a library crate; the UI layer that
// drives it lives elsewhere and only consumes the pipeline API and its state
// events.

pub mod config;
pub mod logging;
pub mod metrics;
pub mod models;
pub mod pipeline;
pub mod services;
pub mod state;

// Re-export commonly used types for convenience
pub use config::ConfigManager;
pub use models::{BatchState, OperationMode, OverlayCandidate, SelectionBatch, Settings};
pub use pipeline::{BatchOutcome, BatchReport, Pipeline, PipelineError};
pub use state::{StateChange, StateManager};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Crate name
pub const APP_NAME: &str = env!("CARGO_PKG_NAME");
