//! Services module - Pure business logic for the overlay pipeline.
//!
//! This module contains the per-overlay building blocks the pipeline is
//! orchestrated from. The services are **framework-agnostic** and have no
//! dependencies on any UI layer, making them testable and reusable.
//!
//! # Components
//!
//! - [`OverlayStager`]: Assembles per-overlay working trees from theme
//!   assets. Handles:
//!   - Variant-suffixed resource roots (`/type3_<variant>` or `/res`),
//!     including `type3-common` layering
//!   - Value-resource slot files (`values/type1a.xml` and friends), with
//!     the transport-encryption suffix when the bundle ships encrypted
//!   - Asset-bundle and bundled-assets slot directories
//!   - Package-name suffix derivation from the name-affecting slots
//!
//! - [`OverlayBuilder`]: Trait boundary to the external resource compiler.
//!   [`BuildFailure`] carries the structured failure reason the pipeline
//!   classifies outcomes on.
//!
//! - [`ActivationService`]: Strategy over the two runtime capability tiers.
//!   The live tier (a runtime overlay manager) is external; the crate ships
//!   [`LegacyActivation`], the file-drop-and-restart tier with a privilege
//!   broker and an interactive-installer fallback.
//!
//! - [`InstallSync`]: Suspends the build worker until the platform's
//!   asynchronous install-completion signal arrives, with timeout and
//!   cancellation.
//!
//! # Design Philosophy
//!
//! The services layer is designed to be:
//! - **Pure**: No side effects beyond file I/O and collaborator calls
//! - **Testable**: No hidden dependencies, all inputs are explicit parameters
//! - **Framework-agnostic**: No GUI code, only business logic

pub mod activation;
pub mod builder;
pub mod install_sync;
pub mod staging;

pub use activation::{
    ActivationError, ActivationService, CapabilityTier, InstalledOverlay, InteractiveInstaller,
    LegacyActivation, PrivilegeBroker,
};
pub use builder::{package_id_from_artifact, Artifact, BuildFailure, BuildRequest, OverlayBuilder};
pub use install_sync::{InstallSync, SyncError};
pub use staging::{OverlayStager, StagedTree, StagingError, OVERLAYS_DIR};
