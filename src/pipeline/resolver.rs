use crate::models::{OperationMode, OverlayCandidate, SelectionBatch};
use crate::services::CapabilityTier;

/// Outcome of resolving user selections into a working batch
#[derive(Debug, Clone, Default)]
pub struct Resolution {
    /// The candidates the batch will actually operate on, batch order.
    pub batch: SelectionBatch,

    /// Overlay identifiers that were selected but dropped by the filter.
    /// Non-empty means any bound selection list must be redrawn.
    pub deselected: Vec<String>,
}

impl Resolution {
    pub fn is_empty(&self) -> bool {
        self.batch.is_empty()
    }
}

/// Resolve the selected candidates for one operation mode
///
/// Compile and swap take every selected candidate unfiltered. Enable and
/// disable on the live tier drop candidates already in the target state (or
/// not installed at all) and report them as deselected; the legacy tier has
/// no reliable runtime state to filter on, so selections pass through.
pub fn resolve(
    candidates: &[OverlayCandidate],
    mode: OperationMode,
    theme_variant: Option<String>,
    tier: CapabilityTier,
) -> Resolution {
    let selected = candidates.iter().filter(|c| c.selected);

    let mut kept = Vec::new();
    let mut deselected = Vec::new();

    for candidate in selected {
        let keep = match (mode, tier) {
            (OperationMode::Compile { .. } | OperationMode::Swap, _) => true,
            (_, CapabilityTier::Legacy) => true,
            (OperationMode::Enable, CapabilityTier::Live) => {
                candidate.installed && !candidate.enabled
            }
            (OperationMode::Disable, CapabilityTier::Live) => {
                candidate.installed && candidate.enabled
            }
        };

        if keep {
            kept.push(candidate.clone());
        } else {
            deselected.push(candidate.overlay_id.clone());
        }
    }

    if !deselected.is_empty() {
        tracing::debug!(
            mode = mode.label(),
            dropped = deselected.len(),
            "deselected candidates already in the target state"
        );
    }

    Resolution {
        batch: SelectionBatch {
            candidates: kept,
            theme_variant,
        },
        deselected,
    }
}
