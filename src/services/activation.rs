use camino::{Utf8Path, Utf8PathBuf};
use std::fs;
use std::sync::Arc;
use thiserror::Error;

use super::builder::package_id_from_artifact;
use crate::models::PipelineSettings;

/// Runtime capability tier selecting the activation strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CapabilityTier {
    /// A live overlay-manager service toggles overlays at runtime.
    Live,
    /// Overlays are files in a fixed system directory; changes require a
    /// full restart.
    Legacy,
}

/// One overlay package currently installed on the device
#[derive(Debug, Clone)]
pub struct InstalledOverlay {
    pub overlay_id: String,

    /// Package identifier of the theme the overlay was built from. Empty on
    /// tiers that cannot report it.
    pub parent_theme: String,

    /// Package identifier of the application the overlay targets.
    pub target_package: String,
}

/// Errors that can occur while activating or installing overlays
#[derive(Error, Debug)]
pub enum ActivationError {
    #[error("elevated privilege denied: {0}")]
    PrivilegeDenied(String),

    #[error("activation backend error: {0}")]
    Backend(String),

    #[error("artifact not found: {0}")]
    ArtifactNotFound(Utf8PathBuf),

    #[error("activation I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Strategy over the two activation tiers
///
/// One implementation is selected per batch. The live-tier implementation is
/// external to this crate; [`LegacyActivation`] covers devices without a
/// runtime overlay manager.
pub trait ActivationService: Send + Sync {
    fn tier(&self) -> CapabilityTier;

    /// Enable a set of installed overlays.
    fn enable(&self, overlay_ids: &[String]) -> Result<(), ActivationError>;

    /// Disable a set of installed overlays.
    fn disable(&self, overlay_ids: &[String]) -> Result<(), ActivationError>;

    fn is_enabled(&self, overlay_id: &str) -> bool;

    /// Every overlay package currently installed, with its parent theme
    /// where the tier can report it.
    fn installed_overlays(&self) -> Vec<InstalledOverlay>;

    /// Install a compiled artifact.
    fn install(&self, artifact: &Utf8Path) -> Result<(), ActivationError>;

    /// Uninstall a set of overlay packages.
    fn uninstall(&self, overlay_ids: &[String]) -> Result<(), ActivationError>;

    /// Whether enabling an overlay over this target warrants a shell restart.
    fn should_restart_shell(&self, _target_package: &str) -> bool {
        false
    }

    /// Restart the system shell. Only meaningful where
    /// [`should_restart_shell`](Self::should_restart_shell) can return true.
    fn restart_shell(&self) -> Result<(), ActivationError> {
        Ok(())
    }

    /// Whether installs complete asynchronously and must be awaited through
    /// the install-completion synchronizer.
    fn requires_install_confirmation(&self) -> bool {
        false
    }

    /// Whether any change on this tier requires a full restart to apply.
    fn requires_restart(&self) -> bool {
        self.tier() == CapabilityTier::Legacy
    }

    /// Remove every overlay file from the fixed system directory. Only
    /// meaningful on the legacy tier.
    fn clear_system_dir(&self) -> Result<(), ActivationError> {
        Ok(())
    }
}

/// Acquires elevated privilege for system-directory writes
pub trait PrivilegeBroker: Send + Sync {
    fn acquire(&self) -> Result<(), ActivationError>;
}

/// Interactive install/uninstall delegate used when privilege is denied
///
/// Hands the operation to the platform's package-installer UI instead of
/// failing the batch.
pub trait InteractiveInstaller: Send + Sync {
    fn install(&self, artifact: &Utf8Path) -> Result<(), ActivationError>;
    fn uninstall(&self, overlay_id: &str) -> Result<(), ActivationError>;
}

/// Legacy-tier activation: package files dropped into a fixed system
/// directory
///
/// Enablement is file presence. `enable` is therefore a no-op, `disable`
/// and `uninstall` both delete the package file, and every change requires
/// a full restart which the caller must prompt for.
pub struct LegacyActivation {
    /// Fixed system overlay directory for the device class
    system_dir: Utf8PathBuf,

    privilege: Arc<dyn PrivilegeBroker>,
    interactive: Arc<dyn InteractiveInstaller>,
}

impl std::fmt::Debug for LegacyActivation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LegacyActivation")
            .field("system_dir", &self.system_dir)
            .finish_non_exhaustive()
    }
}

impl LegacyActivation {
    pub fn new(
        system_dir: impl Into<Utf8PathBuf>,
        privilege: Arc<dyn PrivilegeBroker>,
        interactive: Arc<dyn InteractiveInstaller>,
    ) -> Self {
        Self {
            system_dir: system_dir.into(),
            privilege,
            interactive,
        }
    }

    /// Construct for the configured device class
    ///
    /// # Errors
    /// [`ActivationError::Backend`] when the configured class has no system
    /// overlay directory mapping.
    pub fn from_settings(
        settings: &PipelineSettings,
        privilege: Arc<dyn PrivilegeBroker>,
        interactive: Arc<dyn InteractiveInstaller>,
    ) -> Result<Self, ActivationError> {
        let system_dir = settings.system_overlay_dir().ok_or_else(|| {
            ActivationError::Backend(format!(
                "no system overlay directory for device class '{}'",
                settings.device_class
            ))
        })?;
        Ok(Self::new(system_dir, privilege, interactive))
    }

    fn package_file(&self, overlay_id: &str) -> Utf8PathBuf {
        self.system_dir.join(format!("{overlay_id}.apk"))
    }

    fn remove_package_file(&self, overlay_id: &str) -> Result<(), ActivationError> {
        let file = self.package_file(overlay_id);
        if !file.exists() {
            return Ok(());
        }
        match self.privilege.acquire() {
            Ok(()) => {
                fs::remove_file(&file)?;
                tracing::debug!(overlay = overlay_id, "removed overlay package file");
                Ok(())
            }
            Err(ActivationError::PrivilegeDenied(reason)) => {
                tracing::warn!(
                    overlay = overlay_id,
                    %reason,
                    "privilege denied, falling back to interactive uninstall"
                );
                self.interactive.uninstall(overlay_id)
            }
            Err(other) => Err(other),
        }
    }
}

impl ActivationService for LegacyActivation {
    fn tier(&self) -> CapabilityTier {
        CapabilityTier::Legacy
    }

    fn enable(&self, _overlay_ids: &[String]) -> Result<(), ActivationError> {
        // File presence is enablement on this tier
        Ok(())
    }

    fn disable(&self, overlay_ids: &[String]) -> Result<(), ActivationError> {
        for overlay_id in overlay_ids {
            self.remove_package_file(overlay_id)?;
        }
        Ok(())
    }

    fn is_enabled(&self, overlay_id: &str) -> bool {
        self.package_file(overlay_id).is_file()
    }

    fn installed_overlays(&self) -> Vec<InstalledOverlay> {
        let Ok(entries) = self.system_dir.read_dir_utf8() else {
            return Vec::new();
        };
        entries
            .flatten()
            .filter(|entry| entry.path().extension() == Some("apk"))
            .filter_map(|entry| {
                let overlay_id = entry.path().file_stem()?.to_string();
                Some(InstalledOverlay {
                    overlay_id,
                    // This tier has no package metadata to report
                    parent_theme: String::new(),
                    target_package: String::new(),
                })
            })
            .collect()
    }

    fn install(&self, artifact: &Utf8Path) -> Result<(), ActivationError> {
        if !artifact.is_file() {
            return Err(ActivationError::ArtifactNotFound(artifact.to_owned()));
        }
        let package_id = package_id_from_artifact(artifact)
            .ok_or_else(|| ActivationError::ArtifactNotFound(artifact.to_owned()))?;

        match self.privilege.acquire() {
            Ok(()) => {
                fs::create_dir_all(&self.system_dir)?;
                fs::copy(artifact, self.package_file(&package_id))?;
                tracing::info!(overlay = %package_id, "dropped overlay into system directory");
                Ok(())
            }
            Err(ActivationError::PrivilegeDenied(reason)) => {
                tracing::warn!(
                    overlay = %package_id,
                    %reason,
                    "privilege denied, falling back to interactive install"
                );
                self.interactive.install(artifact)
            }
            Err(other) => Err(other),
        }
    }

    fn uninstall(&self, overlay_ids: &[String]) -> Result<(), ActivationError> {
        self.disable(overlay_ids)
    }

    fn clear_system_dir(&self) -> Result<(), ActivationError> {
        for installed in self.installed_overlays() {
            self.remove_package_file(&installed.overlay_id)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use tempfile::TempDir;

    struct AlwaysGranted;

    impl PrivilegeBroker for AlwaysGranted {
        fn acquire(&self) -> Result<(), ActivationError> {
            Ok(())
        }
    }

    struct AlwaysDenied;

    impl PrivilegeBroker for AlwaysDenied {
        fn acquire(&self) -> Result<(), ActivationError> {
            Err(ActivationError::PrivilegeDenied("no root".to_string()))
        }
    }

    #[derive(Default)]
    struct RecordingInstaller {
        installs: Mutex<Vec<Utf8PathBuf>>,
        uninstalls: Mutex<Vec<String>>,
    }

    impl InteractiveInstaller for RecordingInstaller {
        fn install(&self, artifact: &Utf8Path) -> Result<(), ActivationError> {
            self.installs.lock().unwrap().push(artifact.to_owned());
            Ok(())
        }

        fn uninstall(&self, overlay_id: &str) -> Result<(), ActivationError> {
            self.uninstalls.lock().unwrap().push(overlay_id.to_string());
            Ok(())
        }
    }

    fn utf8(dir: &TempDir) -> Utf8PathBuf {
        Utf8PathBuf::try_from(dir.path().to_path_buf()).unwrap()
    }

    fn write_artifact(dir: &Utf8Path, name: &str) -> Utf8PathBuf {
        let path = dir.join(name);
        fs::write(&path, "package bytes").unwrap();
        path
    }

    #[test]
    fn test_install_drops_file_and_enables() {
        let system = TempDir::new().unwrap();
        let out = TempDir::new().unwrap();
        let artifact = write_artifact(&utf8(&out), "com.example.mail.Nocturne-4.2.1.apk");

        let service = LegacyActivation::new(
            utf8(&system),
            Arc::new(AlwaysGranted),
            Arc::new(RecordingInstaller::default()),
        );

        service.install(&artifact).unwrap();

        assert!(service.is_enabled("com.example.mail.Nocturne"));
        assert_eq!(service.installed_overlays().len(), 1);
        assert!(service.requires_restart());
    }

    #[test]
    fn test_disable_removes_file() {
        let system = TempDir::new().unwrap();
        let out = TempDir::new().unwrap();
        let artifact = write_artifact(&utf8(&out), "com.example.mail.Nocturne-4.2.1.apk");

        let service = LegacyActivation::new(
            utf8(&system),
            Arc::new(AlwaysGranted),
            Arc::new(RecordingInstaller::default()),
        );
        service.install(&artifact).unwrap();

        service
            .disable(&["com.example.mail.Nocturne".to_string()])
            .unwrap();

        assert!(!service.is_enabled("com.example.mail.Nocturne"));
        assert!(service.installed_overlays().is_empty());
    }

    #[test]
    fn test_privilege_denial_falls_back_to_interactive() {
        let system = TempDir::new().unwrap();
        let out = TempDir::new().unwrap();
        let artifact = write_artifact(&utf8(&out), "com.example.mail.Nocturne-4.2.1.apk");
        let installer = Arc::new(RecordingInstaller::default());

        let service = LegacyActivation::new(
            utf8(&system),
            Arc::new(AlwaysDenied),
            Arc::clone(&installer) as Arc<dyn InteractiveInstaller>,
        );

        // Falls back instead of failing
        service.install(&artifact).unwrap();

        assert_eq!(installer.installs.lock().unwrap().len(), 1);
        assert!(!service.is_enabled("com.example.mail.Nocturne"));
    }

    #[test]
    fn test_clear_system_dir() {
        let system = TempDir::new().unwrap();
        let system_dir = utf8(&system);
        write_artifact(&system_dir, "a.Theme.apk");
        write_artifact(&system_dir, "b.Theme.apk");

        let service = LegacyActivation::new(
            system_dir,
            Arc::new(AlwaysGranted),
            Arc::new(RecordingInstaller::default()),
        );

        service.clear_system_dir().unwrap();
        assert!(service.installed_overlays().is_empty());
    }

    #[test]
    fn test_from_settings_resolves_device_class() {
        let system = TempDir::new().unwrap();
        let system_dir = utf8(&system);
        let mut settings = PipelineSettings::default();
        settings.device_class = "test".to_string();
        settings
            .system_overlay_dirs
            .insert("test".to_string(), system_dir.to_string());

        let service = LegacyActivation::from_settings(
            &settings,
            Arc::new(AlwaysGranted),
            Arc::new(RecordingInstaller::default()),
        )
        .unwrap();

        let out = TempDir::new().unwrap();
        let artifact = write_artifact(&utf8(&out), "com.example.mail.Nocturne-4.2.1.apk");
        service.install(&artifact).unwrap();
        assert!(system_dir.join("com.example.mail.Nocturne.apk").is_file());
    }

    #[test]
    fn test_from_settings_rejects_unmapped_class() {
        let mut settings = PipelineSettings::default();
        settings.device_class = "tablet".to_string();

        let err = LegacyActivation::from_settings(
            &settings,
            Arc::new(AlwaysGranted),
            Arc::new(RecordingInstaller::default()),
        )
        .unwrap_err();
        assert!(matches!(err, ActivationError::Backend(_)));
    }

    #[test]
    fn test_missing_artifact_rejected() {
        let system = TempDir::new().unwrap();
        let service = LegacyActivation::new(
            utf8(&system),
            Arc::new(AlwaysGranted),
            Arc::new(RecordingInstaller::default()),
        );

        let err = service
            .install(Utf8Path::new("/nonexistent/a.Theme-1.0.apk"))
            .unwrap_err();
        assert!(matches!(err, ActivationError::ArtifactNotFound(_)));
    }
}
