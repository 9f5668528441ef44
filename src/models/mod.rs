//! Data models for the overlay pipeline.
//!
//! These types are plain data. Shared mutable state lives in
//! [`crate::state::StateManager`] which wraps [`BatchState`] in an
//! `Arc<RwLock<_>>` and broadcasts change events.

pub mod batch_state;
pub mod overlay;
pub mod settings;

pub use batch_state::{BatchState, OutcomeKind, PipelinePhase};
pub use overlay::{
    OperationMode, OverlayCandidate, SelectionBatch, ThemeContext, VariantSelection,
};
pub use settings::{PipelineSettings, Settings};
