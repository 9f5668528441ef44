// State management module
//
// This module provides the StateManager which wraps BatchState with thread-safe
// access using Arc<RwLock<T>> and emits change events for observers.

use crate::metrics::Metrics;
use crate::models::{BatchState, OutcomeKind, PipelinePhase};
use std::sync::{Arc, RwLock};
use tokio::sync::broadcast;

/// Change events emitted when state is modified
///
/// These events are emitted to notify interested parties (list views, progress
/// surfaces) about state changes without requiring them to poll the state.
#[derive(Clone, Debug, PartialEq)]
pub enum StateChange {
    /// The pipeline moved to another phase
    PhaseChanged {
        phase: PipelinePhase,
    },

    /// Progress has been updated during a batch
    ProgressUpdated {
        current: usize,
        total: usize,
        current_overlay: Option<String>,
    },

    /// A batch has started
    BatchStarted {
        total_overlays: usize,
    },

    /// A batch has finished
    BatchFinished {
        built: usize,
        failed: usize,
        soft_skipped: usize,
    },

    /// An overlay has been processed
    OverlayProcessed {
        overlay: String,
        status: String,
        message: String,
    },

    /// Current operation label has changed
    OperationChanged {
        operation: String,
    },

    /// The resolver deselected candidates; bound selection lists are stale
    SelectionInvalidated,

    /// State has been reset
    StateReset,
}

/// Thread-safe state manager with event emission
///
/// This is the central state management component that:
/// - Provides thread-safe access to [`BatchState`] via `Arc<RwLock<T>>`
/// - Detects state changes and emits [`StateChange`] events
/// - Supports subscribing to state changes via tokio broadcast channels
///
/// # Usage
///
/// Always use `StateManager` instead of accessing [`BatchState`] directly:
/// - [`read()`](Self::read) for reading state without cloning
/// - [`update()`](Self::update) for mutations with automatic event emission
/// - [`subscribe()`](Self::subscribe) for listening to state changes
///
/// # Related Types
///
/// - [`crate::models::BatchState`]: The underlying state structure
/// - [`StateChange`]: Event types emitted on state mutations
/// - [`crate::pipeline::Pipeline`]: The sole writer during a batch
pub struct StateManager {
    /// The batch state protected by RwLock for thread-safe access
    state: Arc<RwLock<BatchState>>,

    /// Broadcast channel for emitting state change events
    /// Multiple subscribers can listen for state changes
    state_tx: broadcast::Sender<StateChange>,

    /// Broadcast counters; shared with the pipeline's metrics
    metrics: Arc<Metrics>,
}

impl StateManager {
    /// Create a new StateManager with default state
    ///
    /// # Returns
    /// A new StateManager with a broadcast channel buffer of 100 events
    pub fn new() -> Self {
        Self::with_metrics(Arc::new(Metrics::new()))
    }

    /// Create a new StateManager sharing an existing metrics instance
    pub fn with_metrics(metrics: Arc<Metrics>) -> Self {
        let (state_tx, _) = broadcast::channel(100);
        Self {
            state: Arc::new(RwLock::new(BatchState::default())),
            state_tx,
            metrics,
        }
    }

    /// Get a read-only snapshot of the current state
    ///
    /// This clones the entire state, so it's safe to use without holding locks.
    /// For checking individual fields, consider using `read()` with a closure.
    pub fn snapshot(&self) -> BatchState {
        self.state.read().unwrap().clone()
    }

    /// Execute a function with read access to the state
    ///
    /// # Example
    /// ```ignore
    /// let active = state_manager.read(|state| state.is_active());
    /// ```
    pub fn read<F, R>(&self, f: F) -> R
    where
        F: FnOnce(&BatchState) -> R,
    {
        let state = self.state.read().unwrap();
        f(&state)
    }

    /// Update the state and emit change events
    ///
    /// This is the primary way to modify state. It:
    /// 1. Captures the old state
    /// 2. Applies the update function
    /// 3. Detects what changed
    /// 4. Emits appropriate events
    ///
    /// # Arguments
    /// * `update_fn` - A function that mutates the state
    ///
    /// # Returns
    /// A vector of StateChange events that were emitted
    ///
    /// # Example
    /// ```ignore
    /// state_manager.update(|state| {
    ///     state.phase = PipelinePhase::Building;
    ///     state.progress = 0;
    /// });
    /// ```
    pub fn update<F>(&self, update_fn: F) -> Vec<StateChange>
    where
        F: FnOnce(&mut BatchState),
    {
        let mut state = self.state.write().unwrap();
        let old_state = state.clone();

        // Apply the update
        update_fn(&mut state);

        // Detect changes and emit events
        let changes = self.detect_changes(&old_state, &state);

        for change in &changes {
            self.emit(change);
        }

        changes
    }

    /// Send one event, counting delivery for the metrics summary
    ///
    /// Send errors are ignored beyond the counter; it's OK if no one is
    /// listening.
    fn emit(&self, change: &StateChange) {
        match self.state_tx.send(change.clone()) {
            Ok(_) => self.metrics.record_state_broadcast(),
            Err(_) => self.metrics.record_state_broadcast_error(),
        }
    }

    /// Subscribe to state change events
    ///
    /// Returns a receiver that will get notified of all future state changes.
    /// Multiple subscribers can listen simultaneously.
    pub fn subscribe(&self) -> broadcast::Receiver<StateChange> {
        self.state_tx.subscribe()
    }

    /// Detect what changed between two states and generate events
    ///
    /// This is called internally by `update()` to determine which events to emit.
    fn detect_changes(&self, old: &BatchState, new: &BatchState) -> Vec<StateChange> {
        let mut changes = Vec::new();

        // Phase transitions, including batch start/finish
        if old.phase != new.phase {
            if old.phase == PipelinePhase::Idle {
                changes.push(StateChange::BatchStarted {
                    total_overlays: new.total,
                });
            } else if new.phase == PipelinePhase::Idle {
                // Stats come from the outgoing state so a combined
                // finish-and-reset update still reports real counts
                let (built, failed, soft_skipped, _) = old.batch_stats();
                changes.push(StateChange::BatchFinished {
                    built,
                    failed,
                    soft_skipped,
                });
            }
            changes.push(StateChange::PhaseChanged { phase: new.phase });
        }

        // Progress changes
        if old.progress != new.progress
            || old.total != new.total
            || old.current_overlay != new.current_overlay
        {
            changes.push(StateChange::ProgressUpdated {
                current: new.progress,
                total: new.total,
                current_overlay: new.current_overlay.clone(),
            });
        }

        // Operation changes
        if old.current_operation != new.current_operation {
            changes.push(StateChange::OperationChanged {
                operation: new.current_operation.clone(),
            });
        }

        // Selection invalidation fires on the rising edge only
        if !old.selection_dirty && new.selection_dirty {
            changes.push(StateChange::SelectionInvalidated);
        }

        changes
    }

    // Convenience methods for common state updates

    /// Start a batch over the given overlay queue
    pub fn start_batch(&self, overlays: Vec<String>, operation: String) -> Vec<StateChange> {
        self.update(|state| {
            state.reset_batch_state();
            state.phase = PipelinePhase::Preparing;
            state.total = overlays.len();
            state.queued_overlays = overlays;
            state.current_operation = operation;
        })
    }

    /// Move the pipeline to another phase
    pub fn set_phase(&self, phase: PipelinePhase) -> Vec<StateChange> {
        self.update(|state| {
            state.phase = phase;
        })
    }

    /// Update progress for the overlay currently being processed
    pub fn update_progress(&self, overlay: String, operation: String) -> Vec<StateChange> {
        self.update(|state| {
            state.current_overlay = Some(overlay);
            state.current_operation = operation;
        })
    }

    /// Record the result of processing one overlay
    ///
    /// # Arguments
    /// * `overlay` - Identifier of the overlay package that was processed
    /// * `kind` - How the overlay was classified
    /// * `message` - Human-readable message about the result
    pub fn add_overlay_result(
        &self,
        overlay: String,
        kind: OutcomeKind,
        message: String,
    ) -> Vec<StateChange> {
        let mut changes = self.update(|state| {
            state.add_outcome(overlay.clone(), kind);
        });

        // Emit an overlay processed event
        let overlay_event = StateChange::OverlayProcessed {
            overlay,
            status: kind.label().to_string(),
            message,
        };

        self.emit(&overlay_event);
        changes.push(overlay_event);

        changes
    }

    /// Mark the current selection as stale
    pub fn invalidate_selection(&self) -> Vec<StateChange> {
        self.update(|state| {
            state.selection_dirty = true;
        })
    }

    /// Reset all batch-scoped state
    pub fn reset_batch_state(&self) -> Vec<StateChange> {
        let mut changes = self.update(|state| {
            state.reset_batch_state();
        });

        // Emit a reset event
        let reset_event = StateChange::StateReset;
        self.emit(&reset_event);
        changes.push(reset_event);

        changes
    }

    /// Get an Arc reference to the state for use in worker threads
    ///
    /// Use this when you need to share state across threads but want
    /// to minimize cloning. Remember to use read/write locks appropriately.
    pub fn state_arc(&self) -> Arc<RwLock<BatchState>> {
        Arc::clone(&self.state)
    }
}

impl Default for StateManager {
    fn default() -> Self {
        Self::new()
    }
}

// Make StateManager cloneable for sharing across threads
impl Clone for StateManager {
    fn clone(&self) -> Self {
        Self {
            state: Arc::clone(&self.state),
            state_tx: self.state_tx.clone(),
            metrics: Arc::clone(&self.metrics),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_state_manager() {
        let manager = StateManager::new();
        let state = manager.snapshot();

        assert!(!state.is_active());
        assert_eq!(state.phase, PipelinePhase::Idle);
        assert_eq!(state.progress, 0);
    }

    #[test]
    fn test_start_batch_emits_started_event() {
        let manager = StateManager::new();
        let overlays = vec!["a.Theme".to_string(), "b.Theme".to_string()];

        let changes = manager.start_batch(overlays.clone(), "Compiling...".to_string());

        assert!(matches!(
            changes[0],
            StateChange::BatchStarted { total_overlays: 2 }
        ));

        let state = manager.snapshot();
        assert!(state.is_active());
        assert_eq!(state.total, 2);
        assert_eq!(state.queued_overlays, overlays);
    }

    #[test]
    fn test_finish_emits_batch_finished() {
        let manager = StateManager::new();
        manager.start_batch(vec!["a.Theme".to_string()], "Compiling...".to_string());
        manager.add_overlay_result("a.Theme".to_string(), OutcomeKind::Built, "ok".to_string());

        let changes = manager.reset_batch_state();

        assert!(changes.iter().any(|c| matches!(
            c,
            StateChange::BatchFinished {
                built: 1,
                failed: 0,
                soft_skipped: 0,
            }
        )));
        assert!(changes.iter().any(|c| matches!(c, StateChange::StateReset)));

        let state = manager.snapshot();
        assert!(!state.is_active());
    }

    #[test]
    fn test_update_progress() {
        let manager = StateManager::new();

        let changes = manager.update_progress(
            "a.Theme".to_string(),
            "Building overlay...".to_string(),
        );

        assert!(matches!(changes[0], StateChange::ProgressUpdated { .. }));
        assert!(matches!(changes[1], StateChange::OperationChanged { .. }));

        let state = manager.snapshot();
        assert_eq!(state.current_overlay, Some("a.Theme".to_string()));
        assert_eq!(state.current_operation, "Building overlay...");
    }

    #[test]
    fn test_add_overlay_result() {
        let manager = StateManager::new();
        manager.start_batch(vec!["a.Theme".to_string()], "Compiling...".to_string());

        let changes = manager.add_overlay_result(
            "a.Theme".to_string(),
            OutcomeKind::Built,
            "Built in 2.1s".to_string(),
        );

        // Should have progress update and overlay processed event
        assert!(changes
            .iter()
            .any(|c| matches!(c, StateChange::OverlayProcessed { .. })));

        let state = manager.snapshot();
        assert_eq!(state.built_overlays.len(), 1);
        assert_eq!(state.progress, 1);
    }

    #[test]
    fn test_phase_change_events() {
        let manager = StateManager::new();
        manager.start_batch(vec!["a.Theme".to_string()], "Enabling...".to_string());

        let changes = manager.set_phase(PipelinePhase::Activating);

        assert_eq!(changes.len(), 1);
        assert!(matches!(
            changes[0],
            StateChange::PhaseChanged {
                phase: PipelinePhase::Activating
            }
        ));
    }

    #[test]
    fn test_selection_invalidation_rising_edge() {
        let manager = StateManager::new();

        let changes = manager.invalidate_selection();
        assert!(matches!(changes[0], StateChange::SelectionInvalidated));

        // Setting it again while already dirty emits nothing
        let changes = manager.invalidate_selection();
        assert!(changes.is_empty());
    }

    #[test]
    fn test_subscribe_to_changes() {
        let manager = StateManager::new();
        let mut rx = manager.subscribe();

        // Make a change
        manager.update(|state| {
            state.phase = PipelinePhase::Preparing;
        });

        // Should receive the event
        let event = rx.try_recv();
        assert!(event.is_ok());
        assert!(matches!(event.unwrap(), StateChange::BatchStarted { .. }));
    }

    #[test]
    fn test_multiple_subscribers() {
        let manager = StateManager::new();
        let mut rx1 = manager.subscribe();
        let mut rx2 = manager.subscribe();

        manager.start_batch(vec!["a.Theme".to_string()], "Compiling...".to_string());

        // Both subscribers should receive the event
        assert!(rx1.try_recv().is_ok());
        assert!(rx2.try_recv().is_ok());
    }

    #[test]
    fn test_read_with_closure() {
        let manager = StateManager::new();
        manager.update(|state| {
            state.progress = 42;
        });

        let progress = manager.read(|state| state.progress);
        assert_eq!(progress, 42);
    }

    #[test]
    fn test_clone_state_manager() {
        let manager1 = StateManager::new();
        let manager2 = manager1.clone();

        // Update through one manager
        manager1.update(|state| {
            state.progress = 10;
        });

        // Changes should be visible through the clone
        let state = manager2.snapshot();
        assert_eq!(state.progress, 10);
    }

    #[test]
    fn test_state_arc() {
        let manager = StateManager::new();
        let state_arc = manager.state_arc();

        // Modify through the Arc
        {
            let mut state = state_arc.write().unwrap();
            state.progress = 99;
        }

        // Changes should be visible through manager
        let state = manager.snapshot();
        assert_eq!(state.progress, 99);
    }
}
