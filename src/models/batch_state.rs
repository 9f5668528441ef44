use camino::Utf8PathBuf;
use std::collections::HashSet;

/// Lifecycle of the pipeline.
///
/// A new batch may only be accepted while `Idle`; the pipeline rejects
/// anything else instead of interleaving batches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PipelinePhase {
    #[default]
    Idle,
    Preparing,
    Building,
    AwaitingInstallConfirm,
    Activating,
    Finishing,
}

impl PipelinePhase {
    pub fn label(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Preparing => "preparing",
            Self::Building => "building",
            Self::AwaitingInstallConfirm => "awaiting install confirm",
            Self::Activating => "activating",
            Self::Finishing => "finishing",
        }
    }
}

/// How a processed overlay was recorded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutcomeKind {
    Built,
    SoftSkipped,
    Failed,
}

impl OutcomeKind {
    pub fn label(self) -> &'static str {
        match self {
            Self::Built => "built",
            Self::SoftSkipped => "soft-skipped",
            Self::Failed => "failed",
        }
    }
}

/// Single source of truth for batch progress and results.
///
/// Owned exclusively by the pipeline for the duration of a batch and exposed
/// to observers through [`StateManager`](crate::state::StateManager); never
/// mutate it from outside the pipeline.
#[derive(Debug, Clone, Default)]
pub struct BatchState {
    pub phase: PipelinePhase,

    // Progress state
    pub progress: usize,
    pub total: usize,
    pub queued_overlays: Vec<String>,
    pub current_overlay: Option<String>,
    pub current_operation: String,

    // Results
    pub built_overlays: HashSet<String>,
    pub soft_skipped_overlays: HashSet<String>,
    pub failed_overlays: HashSet<String>,

    /// Concatenated builder diagnostics for every hard failure.
    pub error_log: String,

    /// `package (version)` descriptors, one per hard failure, batch order.
    pub failed_packages: Vec<String>,

    /// Artifacts that must be installed out-of-band after the build loop.
    pub deferred_installs: Vec<Utf8PathBuf>,

    /// At least one overlay had no content for the chosen theme variant.
    pub missing_content: bool,

    /// The resolver deselected candidates; any bound list must be redrawn.
    pub selection_dirty: bool,
}

impl BatchState {
    /// Whether a batch is currently in flight.
    pub fn is_active(&self) -> bool {
        self.phase != PipelinePhase::Idle
    }

    pub fn fail_count(&self) -> usize {
        self.failed_overlays.len()
    }

    pub fn has_failed(&self) -> bool {
        !self.failed_overlays.is_empty()
    }

    /// Progress percentage for the running batch (index / total * 100).
    pub fn percent(&self) -> u8 {
        if self.total == 0 {
            0
        } else {
            ((self.progress as f64 / self.total as f64) * 100.0) as u8
        }
    }

    /// (built, failed, soft-skipped, total) counters.
    pub fn batch_stats(&self) -> (usize, usize, usize, usize) {
        (
            self.built_overlays.len(),
            self.failed_overlays.len(),
            self.soft_skipped_overlays.len(),
            self.total,
        )
    }

    /// Record the outcome of one processed overlay and advance progress.
    pub fn add_outcome(&mut self, overlay_id: String, kind: OutcomeKind) {
        match kind {
            OutcomeKind::Built => {
                self.built_overlays.insert(overlay_id);
            }
            OutcomeKind::SoftSkipped => {
                self.missing_content = true;
                self.soft_skipped_overlays.insert(overlay_id);
            }
            OutcomeKind::Failed => {
                self.failed_overlays.insert(overlay_id);
            }
        }
        self.progress += 1;
    }

    /// Append one builder diagnostic log, newline-separated.
    pub fn append_error_log(&mut self, log: &str) {
        if !self.error_log.is_empty() {
            self.error_log.push('\n');
        }
        self.error_log.push_str(log);
    }

    /// Reset everything batch-scoped back to the idle baseline.
    pub fn reset_batch_state(&mut self) {
        self.phase = PipelinePhase::Idle;
        self.progress = 0;
        self.total = 0;
        self.queued_overlays.clear();
        self.current_overlay = None;
        self.current_operation.clear();
        self.built_overlays.clear();
        self.soft_skipped_overlays.clear();
        self.failed_overlays.clear();
        self.error_log.clear();
        self.failed_packages.clear();
        self.deferred_installs.clear();
        self.missing_content = false;
        self.selection_dirty = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_state_idle() {
        let state = BatchState::default();
        assert_eq!(state.phase, PipelinePhase::Idle);
        assert!(!state.is_active());
        assert_eq!(state.percent(), 0);
        assert!(!state.has_failed());
    }

    #[test]
    fn test_add_outcome_counters() {
        let mut state = BatchState {
            total: 3,
            ..BatchState::default()
        };
        state.add_outcome("a.Theme".to_string(), OutcomeKind::Built);
        state.add_outcome("b.Theme".to_string(), OutcomeKind::Failed);
        state.add_outcome("c.Theme".to_string(), OutcomeKind::SoftSkipped);

        let (built, failed, skipped, total) = state.batch_stats();
        assert_eq!((built, failed, skipped, total), (1, 1, 1, 3));
        assert_eq!(state.progress, 3);
        assert_eq!(state.percent(), 100);
        assert!(state.missing_content);
        assert_eq!(state.fail_count(), 1);
    }

    #[test]
    fn test_soft_skip_does_not_fail() {
        let mut state = BatchState {
            total: 1,
            ..BatchState::default()
        };
        state.add_outcome("a.Theme".to_string(), OutcomeKind::SoftSkipped);
        assert_eq!(state.fail_count(), 0);
        assert!(!state.has_failed());
        assert!(state.failed_packages.is_empty());
    }

    #[test]
    fn test_append_error_log_joins_with_newline() {
        let mut state = BatchState::default();
        state.append_error_log("first failure");
        state.append_error_log("second failure");
        assert_eq!(state.error_log, "first failure\nsecond failure");
    }

    #[test]
    fn test_percent_midway() {
        let state = BatchState {
            progress: 1,
            total: 3,
            ..BatchState::default()
        };
        assert_eq!(state.percent(), 33);
    }

    #[test]
    fn test_reset_batch_state() {
        let mut state = BatchState {
            phase: PipelinePhase::Building,
            progress: 2,
            total: 4,
            missing_content: true,
            selection_dirty: true,
            ..BatchState::default()
        };
        state.deferred_installs.push(Utf8PathBuf::from("/tmp/a.apk"));
        state.add_outcome("a".to_string(), OutcomeKind::Failed);

        state.reset_batch_state();

        assert_eq!(state.phase, PipelinePhase::Idle);
        assert_eq!(state.progress, 0);
        assert_eq!(state.total, 0);
        assert!(state.deferred_installs.is_empty());
        assert!(state.failed_overlays.is_empty());
        assert!(!state.missing_content);
        assert!(!state.selection_dirty);
    }
}
