use std::collections::BTreeSet;

/// The operation a batch performs. Modes are mutually exclusive per batch.
///
/// `Compile { enable_after: true }` is the compile-and-enable mode: freshly
/// built overlays are enabled as a set once installation has settled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationMode {
    Compile { enable_after: bool },
    Enable,
    Disable,
    Swap,
}

impl OperationMode {
    /// True for both plain compile and compile-and-enable.
    pub fn is_compile(self) -> bool {
        matches!(self, Self::Compile { .. })
    }

    /// True only for compile-and-enable.
    pub fn enable_after(self) -> bool {
        matches!(self, Self::Compile { enable_after: true })
    }

    /// Human-readable mode label used in progress and log lines.
    pub fn label(self) -> &'static str {
        match self {
            Self::Compile { enable_after: false } => "compile",
            Self::Compile { enable_after: true } => "compile+enable",
            Self::Enable => "enable",
            Self::Disable => "disable",
            Self::Swap => "swap",
        }
    }
}

/// Per-candidate variant slot selection.
///
/// Every slot is optional; an unselected slot contributes nothing to the
/// build. Slots 1a/1b/1c are mutually-additive value-resource files, slot 2
/// is a name-affecting asset directory, slot 4 is a pure naming variant and
/// slot 5 is a bundled-assets directory. The theme-wide slot 3 variant lives
/// on [`SelectionBatch`], not here, because it applies to the whole batch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VariantSelection {
    pub slot1a: Option<String>,
    pub slot1b: Option<String>,
    pub slot1c: Option<String>,
    pub slot2: Option<String>,
    pub slot4: Option<String>,
    pub slot5: Option<String>,
}

impl VariantSelection {
    /// Whether any slot carries a selection at all.
    pub fn any_selected(&self) -> bool {
        self.slot1a.is_some()
            || self.slot1b.is_some()
            || self.slot1c.is_some()
            || self.slot2.is_some()
            || self.slot4.is_some()
            || self.slot5.is_some()
    }
}

/// One overlay the user can act on.
#[derive(Debug, Clone)]
pub struct OverlayCandidate {
    /// Package identifier of the application being themed.
    pub target_package: String,

    /// Fully-qualified overlay package identifier (target + variant suffix).
    pub overlay_id: String,

    /// Label shown in progress reporting.
    pub display_name: String,

    /// Version of the target package, used in failure descriptors.
    pub target_version: String,

    /// Whether the user checked this candidate.
    pub selected: bool,

    /// Enabled state as last observed; meaningful on the live tier only.
    pub enabled: bool,

    /// Whether the overlay package is currently installed.
    pub installed: bool,

    pub variants: VariantSelection,
}

impl OverlayCandidate {
    /// Minimal constructor for a deselected, disabled, uninstalled candidate.
    pub fn new(target_package: impl Into<String>, overlay_id: impl Into<String>) -> Self {
        let target_package = target_package.into();
        Self {
            display_name: target_package.clone(),
            target_package,
            overlay_id: overlay_id.into(),
            target_version: String::new(),
            selected: false,
            enabled: false,
            installed: false,
            variants: VariantSelection::default(),
        }
    }

    /// `package (version)` descriptor used in the aggregated failure list.
    pub fn failure_descriptor(&self) -> String {
        format!("{} ({})", self.target_package, self.target_version)
    }
}

/// The ordered working set captured at request time.
///
/// Iteration order is fixed for progress reporting; outcome does not depend
/// on it.
#[derive(Debug, Clone, Default)]
pub struct SelectionBatch {
    pub candidates: Vec<OverlayCandidate>,

    /// Chosen theme-wide (slot 3) variant; `None` means every overlay builds
    /// from its default resource directory.
    pub theme_variant: Option<String>,
}

impl SelectionBatch {
    pub fn is_empty(&self) -> bool {
        self.candidates.is_empty()
    }

    pub fn len(&self) -> usize {
        self.candidates.len()
    }

    /// Fully-qualified overlay identifiers, preserving batch order but
    /// deduplicated.
    pub fn overlay_ids(&self) -> Vec<String> {
        let mut seen = BTreeSet::new();
        self.candidates
            .iter()
            .filter(|c| seen.insert(c.overlay_id.clone()))
            .map(|c| c.overlay_id.clone())
            .collect()
    }
}

/// Identity of the theme the batch belongs to.
#[derive(Debug, Clone, Default)]
pub struct ThemeContext {
    /// Display name of the theme, folded into built package names.
    pub name: String,

    /// Package identifier of the theme bundle (the overlay parent).
    pub package_id: String,

    /// Theme version string handed to the builder.
    pub version: String,
}
