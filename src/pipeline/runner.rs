use camino::Utf8PathBuf;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::watch;

use crate::metrics::Metrics;
use crate::models::{
    OperationMode, OutcomeKind, OverlayCandidate, PipelinePhase, PipelineSettings, SelectionBatch,
    ThemeContext,
};
use crate::pipeline::{resolver, BatchOutcome, BatchReport, PipelineError};
use crate::services::{
    package_id_from_artifact, ActivationService, BuildFailure, BuildRequest, CapabilityTier,
    InstallSync, OverlayBuilder, OverlayStager, StagingError, SyncError,
};
use crate::state::StateManager;

/// The overlay application pipeline
///
/// Owns one batch at a time end to end: resolution, the sequential
/// per-candidate build loop, install synchronization, activation and the
/// final report. Observers follow along through [`StateManager`] broadcast
/// events; nothing outside the pipeline mutates batch state.
pub struct Pipeline {
    state: StateManager,
    stager: OverlayStager,
    builder: Arc<dyn OverlayBuilder>,
    activator: Arc<dyn ActivationService>,
    sync: Arc<InstallSync>,
    settings: PipelineSettings,
    theme: ThemeContext,

    /// Cancellation token observed between candidates and inside waits
    cancel_rx: watch::Receiver<bool>,

    metrics: Arc<Metrics>,
}

impl Pipeline {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        state: StateManager,
        stager: OverlayStager,
        builder: Arc<dyn OverlayBuilder>,
        activator: Arc<dyn ActivationService>,
        sync: Arc<InstallSync>,
        settings: PipelineSettings,
        theme: ThemeContext,
        cancel_rx: watch::Receiver<bool>,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            state,
            stager,
            builder,
            activator,
            sync,
            settings,
            theme,
            cancel_rx,
            metrics,
        }
    }

    /// Run one batch
    ///
    /// Rejected with [`PipelineError::Busy`] unless the pipeline is idle.
    /// Per-candidate failures are aggregated into the report; only
    /// cancellation and activation-level errors abort the batch.
    pub async fn run(
        &self,
        mode: OperationMode,
        candidates: Vec<OverlayCandidate>,
        theme_variant: Option<String>,
    ) -> Result<BatchReport, PipelineError> {
        // Single-flight gate: accept only from Idle, atomically
        let mut accepted = false;
        self.state.update(|state| {
            if !state.is_active() {
                state.reset_batch_state();
                state.phase = PipelinePhase::Preparing;
                state.current_operation = format!("Preparing {} batch", mode.label());
                accepted = true;
            }
        });
        if !accepted {
            tracing::warn!(mode = mode.label(), "batch rejected, another is in flight");
            return Err(PipelineError::Busy);
        }

        let tier = self.activator.tier();
        let resolution = resolver::resolve(&candidates, mode, theme_variant, tier);
        if !resolution.deselected.is_empty() {
            self.state.invalidate_selection();
        }
        if resolution.is_empty() {
            tracing::info!(mode = mode.label(), "nothing to do, batch is empty");
            self.state.reset_batch_state();
            return Ok(BatchReport::nothing_to_do());
        }

        let batch = resolution.batch;
        self.state.update(|state| {
            state.total = batch.len();
            state.queued_overlays = batch.overlay_ids();
        });
        self.metrics.record_batch_started();

        tracing::info!(
            mode = mode.label(),
            theme = %self.theme.name,
            overlays = batch.len(),
            tier = ?tier,
            "starting batch"
        );

        let mut built_now = Vec::new();
        if mode.is_compile() {
            self.build_phase(&batch, tier, &mut built_now)
                .await
                .inspect_err(|_| self.abort())?;
        }

        self.state.set_phase(PipelinePhase::Activating);
        let restarted_shell = self
            .activation_phase(&batch, mode, tier, &built_now)
            .inspect_err(|_| self.abort())?;

        self.state.set_phase(PipelinePhase::Finishing);
        let deferred = {
            let mut deferred = Vec::new();
            self.state.update(|state| {
                deferred = std::mem::take(&mut state.deferred_installs);
            });
            deferred
        };
        if !deferred.is_empty() {
            self.drain_deferred(deferred, mode.enable_after()).await;
        }
        if self.sync.is_registered() {
            self.sync.unregister();
        }

        let report = self.build_report(&batch, tier);
        self.record_metrics(&report);
        self.state.reset_batch_state();

        if tier == CapabilityTier::Live {
            self.schedule_refresh(batch.overlay_ids());
        }

        tracing::info!(
            outcome = ?report.outcome,
            built = report.built.len(),
            failed = report.failed.len(),
            soft_skipped = report.soft_skipped.len(),
            restarted_shell,
            "batch finished"
        );
        Ok(report)
    }

    /// Sequential per-candidate build loop
    async fn build_phase(
        &self,
        batch: &SelectionBatch,
        tier: CapabilityTier,
        built_now: &mut Vec<String>,
    ) -> Result<(), PipelineError> {
        // Exclusive themes on the legacy tier wipe the system directory
        // before anything new lands in it
        if tier == CapabilityTier::Legacy && self.settings.exclusive_theme {
            self.activator.clear_system_dir()?;
        }

        let needs_confirm = self.activator.requires_install_confirmation();
        if needs_confirm {
            self.sync.register();
        }

        self.state.set_phase(PipelinePhase::Building);
        let total = batch.len();

        for (index, candidate) in batch.candidates.iter().enumerate() {
            if *self.cancel_rx.borrow() {
                tracing::info!(processed = index, total, "batch cancelled");
                return Err(PipelineError::Cancelled);
            }

            self.state.update_progress(
                candidate.display_name.clone(),
                format!("Building {} ({}/{})", candidate.display_name, index + 1, total),
            );

            let started = Instant::now();
            let outcome = self
                .build_one(candidate, batch, tier, needs_confirm)
                .await;
            self.metrics.record_build_time(started.elapsed());

            match outcome {
                Ok(true) => built_now.push(candidate.overlay_id.clone()),
                Ok(false) => {}
                Err(PipelineError::Cancelled) => return Err(PipelineError::Cancelled),
                Err(other) => return Err(other),
            }
        }

        Ok(())
    }

    /// Stage, build and classify one candidate
    ///
    /// Returns `Ok(true)` when the overlay was built and fully installed in
    /// line (eligible for immediate enabling), `Ok(false)` for soft skips,
    /// hard failures and deferred installs.
    async fn build_one(
        &self,
        candidate: &OverlayCandidate,
        batch: &SelectionBatch,
        tier: CapabilityTier,
        needs_confirm: bool,
    ) -> Result<bool, PipelineError> {
        let staged = match self.stager.stage(candidate, batch.theme_variant.as_deref()) {
            Ok(staged) => staged,
            Err(StagingError::MissingVariantAsset { variant, .. }) => {
                tracing::info!(
                    overlay = %candidate.overlay_id,
                    %variant,
                    "no content for theme variant, soft skip"
                );
                self.state.add_overlay_result(
                    candidate.overlay_id.clone(),
                    OutcomeKind::SoftSkipped,
                    format!("no content for variant '{variant}'"),
                );
                return Ok(false);
            }
            Err(err) => {
                self.record_hard_failure(candidate, err.to_string());
                return Ok(false);
            }
        };

        let request = BuildRequest {
            overlay_id: candidate.overlay_id.clone(),
            target_package: candidate.target_package.clone(),
            theme_name: self.theme.name.clone(),
            theme_package: self.theme.package_id.clone(),
            package_suffix: staged.package_suffix,
            slot1a: candidate.variants.slot1a.clone(),
            slot1b: candidate.variants.slot1b.clone(),
            slot1c: candidate.variants.slot1c.clone(),
            slot2: candidate.variants.slot2.clone(),
            slot4: candidate.variants.slot4.clone(),
            theme_variant: batch.theme_variant.clone(),
            live_tier: tier == CapabilityTier::Live,
            asset_suffix: staged.asset_suffix,
            work_dir: staged.work_dir,
        };

        // Armed before the build so a fast in-line install cannot confirm
        // ahead of the wait
        if needs_confirm {
            self.sync.begin_wait();
        }

        let artifact = match self.builder.build(&request) {
            Ok(artifact) => artifact,
            Err(BuildFailure::MissingVariantAsset) => {
                self.state.add_overlay_result(
                    candidate.overlay_id.clone(),
                    OutcomeKind::SoftSkipped,
                    "no content for the selected theme variant".to_string(),
                );
                return Ok(false);
            }
            Err(failure) => {
                self.record_hard_failure(candidate, failure.log());
                return Ok(false);
            }
        };

        if artifact.deferred_install {
            if let Some(path) = artifact.path {
                self.state.update(|state| {
                    state.deferred_installs.push(path.clone());
                });
            }
            self.state.add_overlay_result(
                candidate.overlay_id.clone(),
                OutcomeKind::Built,
                "built, install deferred".to_string(),
            );
            return Ok(false);
        }

        // Collaborators that install in line leave no path behind; a path on
        // a non-deferred artifact means installation is on us
        if let Some(path) = &artifact.path {
            if let Err(err) = self.activator.install(path) {
                self.record_hard_failure(candidate, err.to_string());
                return Ok(false);
            }
        }

        if needs_confirm {
            self.state.set_phase(PipelinePhase::AwaitingInstallConfirm);
            let mut cancel = self.cancel_rx.clone();
            let waited = self.sync.wait(&mut cancel).await;
            self.state.set_phase(PipelinePhase::Building);
            match waited {
                Ok(()) => {}
                Err(SyncError::Cancelled) => return Err(PipelineError::Cancelled),
                Err(SyncError::TimedOut(timeout)) => {
                    // The item fails; the batch carries on
                    self.record_hard_failure(
                        candidate,
                        format!("install confirmation not received within {timeout:?}"),
                    );
                    return Ok(false);
                }
            }
        }

        self.state.add_overlay_result(
            candidate.overlay_id.clone(),
            OutcomeKind::Built,
            "built".to_string(),
        );
        Ok(true)
    }

    fn record_hard_failure(&self, candidate: &OverlayCandidate, log: String) {
        tracing::error!(overlay = %candidate.overlay_id, "overlay build failed");
        self.state.update(|state| {
            if !log.is_empty() {
                state.append_error_log(&log);
            }
            state.failed_packages.push(candidate.failure_descriptor());
        });
        self.state.add_overlay_result(
            candidate.overlay_id.clone(),
            OutcomeKind::Failed,
            "build failed".to_string(),
        );
    }

    /// Mode-appropriate enable/disable pass over the activation strategy
    ///
    /// Returns whether the system shell was restarted.
    fn activation_phase(
        &self,
        batch: &SelectionBatch,
        mode: OperationMode,
        tier: CapabilityTier,
        built_now: &[String],
    ) -> Result<bool, PipelineError> {
        let live = tier == CapabilityTier::Live;

        let activated: Vec<String> = match mode {
            OperationMode::Compile { enable_after } => {
                if enable_after && !built_now.is_empty() {
                    self.exclusive_disable_pass(batch)?;
                    self.activator.enable(built_now)?;
                    built_now.to_vec()
                } else {
                    // A rebuild of an already-enabled overlay counts as an
                    // activation for restart purposes
                    batch
                        .candidates
                        .iter()
                        .filter(|c| c.enabled && built_now.contains(&c.overlay_id))
                        .map(|c| c.overlay_id.clone())
                        .collect()
                }
            }
            OperationMode::Enable => {
                let targets: Vec<String> = batch
                    .candidates
                    .iter()
                    .filter(|c| !live || c.installed)
                    .map(|c| c.overlay_id.clone())
                    .collect();
                self.exclusive_disable_pass(batch)?;
                if !targets.is_empty() {
                    self.activator.enable(&targets)?;
                }
                targets
            }
            OperationMode::Disable => {
                let targets: Vec<String> = batch
                    .candidates
                    .iter()
                    .filter(|c| !live || c.installed)
                    .map(|c| c.overlay_id.clone())
                    .collect();
                if !targets.is_empty() {
                    self.activator.disable(&targets)?;
                }
                Vec::new()
            }
            OperationMode::Swap => {
                // Keyed solely by the pre-operation enabled flag
                let (enabled, disabled): (Vec<&OverlayCandidate>, Vec<&OverlayCandidate>) = batch
                    .candidates
                    .iter()
                    .filter(|c| !live || c.installed)
                    .partition(|c| c.enabled);

                let to_disable: Vec<String> =
                    enabled.iter().map(|c| c.overlay_id.clone()).collect();
                let to_enable: Vec<String> =
                    disabled.iter().map(|c| c.overlay_id.clone()).collect();

                if !to_disable.is_empty() {
                    self.activator.disable(&to_disable)?;
                }
                self.exclusive_disable_pass(batch)?;
                if !to_enable.is_empty() {
                    self.activator.enable(&to_enable)?;
                }
                to_enable
            }
        };

        // First shell-target hit wins; the scan stops there
        let mut restarted = false;
        if live {
            let activated_ids: HashSet<&String> = activated.iter().collect();
            if let Some(shell_candidate) = batch.candidates.iter().find(|c| {
                activated_ids.contains(&c.overlay_id)
                    && self.settings.is_shell_target(&c.target_package)
                    && self.activator.should_restart_shell(&c.target_package)
            }) {
                tracing::info!(
                    overlay = %shell_candidate.overlay_id,
                    "restarting system shell after overlay update"
                );
                self.activator.restart_shell()?;
                restarted = true;
            }
        }

        Ok(restarted)
    }

    /// Disable installed overlays displaced by the batch under the
    /// exclusive-theme policy
    ///
    /// Overlays from other themes are disabled wholesale. Overlays from the
    /// same theme are disabled only when a batch item replaces their target
    /// package, which retires stale variants of a re-themed target.
    ///
    /// Only applies on the live tier; the legacy tier handles exclusivity by
    /// wiping the system directory before the build loop.
    fn exclusive_disable_pass(&self, batch: &SelectionBatch) -> Result<(), PipelineError> {
        if !self.settings.exclusive_theme || self.activator.tier() != CapabilityTier::Live {
            return Ok(());
        }

        let batch_ids: HashSet<String> = batch.overlay_ids().into_iter().collect();
        let batch_targets: HashSet<&str> = batch
            .candidates
            .iter()
            .map(|c| c.target_package.as_str())
            .collect();

        let displaced: Vec<String> = self
            .activator
            .installed_overlays()
            .into_iter()
            .filter(|overlay| {
                !overlay.parent_theme.is_empty()
                    && !batch_ids.contains(&overlay.overlay_id)
                    && (overlay.parent_theme != self.theme.package_id
                        || batch_targets.contains(overlay.target_package.as_str()))
            })
            .map(|overlay| overlay.overlay_id)
            .collect();

        if !displaced.is_empty() {
            tracing::info!(
                count = displaced.len(),
                "disabling overlays displaced by the batch (exclusive policy)"
            );
            self.activator.disable(&displaced)?;
        }
        Ok(())
    }

    /// Install queued artifacts on a dedicated worker, exactly once
    async fn drain_deferred(&self, artifacts: Vec<Utf8PathBuf>, enable_after: bool) {
        let activator = Arc::clone(&self.activator);
        let sync = Arc::clone(&self.sync);
        let cancel = self.cancel_rx.clone();

        tracing::info!(count = artifacts.len(), "draining deferred installs");
        let worker = tokio::spawn(async move {
            drain_deferred_worker(activator, sync, cancel, artifacts, enable_after).await
        });

        match worker.await {
            Ok(installed) => {
                tracing::info!(installed = installed.len(), "deferred installs drained");
            }
            Err(err) => {
                tracing::error!(error = %err, "deferred install worker panicked");
            }
        }
    }

    fn build_report(&self, batch: &SelectionBatch, tier: CapabilityTier) -> BatchReport {
        let snapshot = self.state.snapshot();

        let in_set = |set: &HashSet<String>| -> Vec<String> {
            batch
                .overlay_ids()
                .into_iter()
                .filter(|id| set.contains(id))
                .collect()
        };

        let outcome = if snapshot.has_failed() {
            BatchOutcome::Failed
        } else if snapshot.missing_content {
            BatchOutcome::CompletedWithMissingContent
        } else {
            BatchOutcome::Completed
        };

        BatchReport {
            outcome,
            built: in_set(&snapshot.built_overlays),
            soft_skipped: in_set(&snapshot.soft_skipped_overlays),
            failed: in_set(&snapshot.failed_overlays),
            error_log: snapshot.error_log,
            failed_packages: snapshot.failed_packages,
            restart_required: tier == CapabilityTier::Legacy && self.activator.requires_restart(),
        }
    }

    fn record_metrics(&self, report: &BatchReport) {
        for _ in &report.built {
            self.metrics.record_overlay_built();
        }
        for _ in &report.failed {
            self.metrics.record_overlay_failed();
        }
        for _ in &report.soft_skipped {
            self.metrics.record_overlay_soft_skipped();
        }
    }

    /// One-shot delayed reconciliation of reported overlay state
    fn schedule_refresh(&self, overlay_ids: Vec<String>) {
        let state = self.state.clone();
        let activator = Arc::clone(&self.activator);
        let delay = self.settings.refresh_delay();

        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            for overlay_id in &overlay_ids {
                let enabled = activator.is_enabled(overlay_id);
                tracing::debug!(overlay = %overlay_id, enabled, "post-batch state re-read");
            }
            state.invalidate_selection();
        });
    }

    /// Roll state back after a batch-aborting error
    fn abort(&self) {
        if self.sync.is_registered() {
            self.sync.unregister();
        }
        self.state.reset_batch_state();
    }
}

/// Deferred-install worker body
///
/// Installs each queued artifact, waits for the platform confirmation where
/// required, and finally enables the installed set when the batch ran in
/// compile-and-enable mode. An artifact that never confirms is dropped from
/// the enable set; the rest of the queue still drains.
async fn drain_deferred_worker(
    activator: Arc<dyn ActivationService>,
    sync: Arc<InstallSync>,
    mut cancel: watch::Receiver<bool>,
    artifacts: Vec<Utf8PathBuf>,
    enable_after: bool,
) -> Vec<String> {
    let needs_confirm = activator.requires_install_confirmation();
    let mut installed = Vec::new();

    for artifact in artifacts {
        let Some(package_id) = package_id_from_artifact(&artifact) else {
            tracing::error!(artifact = %artifact, "cannot derive package id from artifact name");
            continue;
        };

        if needs_confirm {
            sync.begin_wait();
        }
        if let Err(err) = activator.install(&artifact) {
            tracing::error!(overlay = %package_id, error = %err, "deferred install failed");
            continue;
        }
        if needs_confirm {
            match sync.wait(&mut cancel).await {
                Ok(()) => {}
                Err(SyncError::Cancelled) => {
                    tracing::info!("deferred drain cancelled");
                    break;
                }
                Err(SyncError::TimedOut(timeout)) => {
                    tracing::warn!(
                        overlay = %package_id,
                        ?timeout,
                        "deferred install never confirmed"
                    );
                    continue;
                }
            }
        }

        tracing::debug!(overlay = %package_id, "deferred install confirmed");
        installed.push(package_id);
    }

    if enable_after && !installed.is_empty() {
        if let Err(err) = activator.enable(&installed) {
            tracing::error!(error = %err, "enabling deferred installs failed");
        }
    }

    installed
}
