//! Pipeline module - the overlay application orchestrator.
//!
//! The pipeline drives one batch at a time through resolution, building,
//! install synchronization, activation and reporting:
//!
//! 1. [`resolver`] turns the user's selection and operation mode into the
//!    working batch, deselecting candidates already in the target state.
//! 2. [`Pipeline`] runs the per-candidate build loop over the staging and
//!    build services, classifying each outcome.
//! 3. Built overlays are activated through the tier-appropriate
//!    [`ActivationService`](crate::services::ActivationService) strategy.
//! 4. Results are aggregated into a [`BatchReport`] and a delayed state
//!    refresh is scheduled.
//!
//! Single-flight is enforced by the idle-phase gate: a batch submitted while
//! another is in flight is rejected with [`PipelineError::Busy`].

pub mod resolver;
pub mod runner;

use thiserror::Error;

use crate::services::ActivationError;

pub use resolver::{resolve, Resolution};
pub use runner::Pipeline;

/// Errors that abort a batch as a whole
///
/// Per-candidate build failures never surface here; they are aggregated into
/// the [`BatchReport`] instead.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("another batch is already in flight")]
    Busy,

    #[error("batch cancelled")]
    Cancelled,

    #[error("activation failed: {0}")]
    Activation(#[from] ActivationError),
}

/// How a completed batch ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchOutcome {
    /// The resolved batch was empty; nothing was built or touched.
    NothingToDo,

    /// Every candidate was built or activated.
    Completed,

    /// No hard failures, but at least one overlay had no content for the
    /// chosen theme variant.
    CompletedWithMissingContent,

    /// At least one candidate failed hard.
    Failed,
}

/// Aggregated result of one batch
#[derive(Debug, Clone)]
pub struct BatchReport {
    pub outcome: BatchOutcome,

    /// Overlay identifiers successfully built or activated, batch order.
    pub built: Vec<String>,

    /// Overlays skipped because the chosen variant had no content for them.
    pub soft_skipped: Vec<String>,

    /// Overlays that failed hard.
    pub failed: Vec<String>,

    /// Concatenated builder diagnostics, one block per hard failure.
    pub error_log: String,

    /// `package (version)` descriptors for the failure summary.
    pub failed_packages: Vec<String>,

    /// The caller must prompt for a full restart before changes apply.
    pub restart_required: bool,
}

impl BatchReport {
    pub(crate) fn nothing_to_do() -> Self {
        Self {
            outcome: BatchOutcome::NothingToDo,
            built: Vec::new(),
            soft_skipped: Vec::new(),
            failed: Vec::new(),
            error_log: String::new(),
            failed_packages: Vec::new(),
            restart_required: false,
        }
    }

    pub fn succeeded(&self) -> bool {
        !matches!(self.outcome, BatchOutcome::Failed)
    }
}
