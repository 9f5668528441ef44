use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Settings from Veneer Settings.yaml
///
/// Contains theme paths, tier/device configuration and pipeline timing knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    #[serde(rename = "Veneer_Settings")]
    pub pipeline: PipelineSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineSettings {
    /// Root of the theme bundle's asset tree (contains `overlays/<package>/`).
    #[serde(rename = "Theme Assets Dir", default)]
    pub theme_assets_dir: String,

    /// Scratch root for per-build working trees.
    #[serde(rename = "Working Dir", default = "default_working_dir")]
    pub working_dir: String,

    /// Device class selecting the legacy system overlay directory.
    #[serde(rename = "Device Class", default = "default_device_class")]
    pub device_class: String,

    /// Legacy-tier overlay directory per device class.
    #[serde(rename = "System Overlay Dirs", default = "default_system_overlay_dirs")]
    pub system_overlay_dirs: IndexMap<String, String>,

    /// Mutually-exclusive-theme policy: enabling a theme first disables every
    /// overlay belonging to a different theme.
    #[serde(rename = "Exclusive Theme", default)]
    pub exclusive_theme: bool,

    /// Theme assets are shipped with the transport-encryption suffix.
    #[serde(rename = "Encrypted Assets", default)]
    pub encrypted_assets: bool,

    /// Legacy poll interval for install-confirmation waits, in milliseconds.
    /// Every wait site shares this one knob.
    #[serde(rename = "Install Poll Interval Ms", default = "default_install_poll_interval_ms")]
    pub install_poll_interval_ms: u64,

    /// Upper bound on any single install-confirmation wait, in seconds.
    #[serde(rename = "Install Wait Timeout", default = "default_install_wait_timeout")]
    pub install_wait_timeout: u32,

    /// Settling delay before the post-activation state re-read, in
    /// milliseconds.
    #[serde(rename = "Refresh Delay Ms", default = "default_refresh_delay_ms")]
    pub refresh_delay_ms: u64,

    /// Target packages recognized as the system shell for restart policy.
    #[serde(rename = "Shell Targets", default = "default_shell_targets")]
    pub shell_targets: Vec<String>,

    #[serde(rename = "Debug Mode", default)]
    pub debug_mode: bool,
}

impl PipelineSettings {
    pub fn install_poll_interval(&self) -> Duration {
        Duration::from_millis(self.install_poll_interval_ms)
    }

    pub fn install_wait_timeout(&self) -> Duration {
        Duration::from_secs(u64::from(self.install_wait_timeout))
    }

    pub fn refresh_delay(&self) -> Duration {
        Duration::from_millis(self.refresh_delay_ms)
    }

    /// Legacy system directory for the configured device class, if known.
    pub fn system_overlay_dir(&self) -> Option<&str> {
        self.system_overlay_dirs
            .get(&self.device_class)
            .map(String::as_str)
    }

    pub fn is_shell_target(&self, target_package: &str) -> bool {
        self.shell_targets.iter().any(|t| t == target_package)
    }
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            theme_assets_dir: String::new(),
            working_dir: default_working_dir(),
            device_class: default_device_class(),
            system_overlay_dirs: default_system_overlay_dirs(),
            exclusive_theme: false,
            encrypted_assets: false,
            install_poll_interval_ms: default_install_poll_interval_ms(),
            install_wait_timeout: default_install_wait_timeout(),
            refresh_delay_ms: default_refresh_delay_ms(),
            shell_targets: default_shell_targets(),
            debug_mode: false,
        }
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            pipeline: PipelineSettings::default(),
        }
    }
}

fn default_working_dir() -> String {
    "cache/builder".to_string()
}

fn default_device_class() -> String {
    "legacy".to_string()
}

fn default_system_overlay_dirs() -> IndexMap<String, String> {
    let mut dirs = IndexMap::new();
    dirs.insert("legacy".to_string(), "/system/vendor/overlay".to_string());
    dirs.insert("pixel".to_string(), "/vendor/overlay".to_string());
    dirs
}

fn default_install_poll_interval_ms() -> u64 {
    500
}

fn default_install_wait_timeout() -> u32 {
    120
}

fn default_refresh_delay_ms() -> u64 {
    500
}

fn default_shell_targets() -> Vec<String> {
    vec!["com.android.systemui".to_string()]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pipeline_settings_defaults() {
        let settings = PipelineSettings::default();
        assert_eq!(settings.install_poll_interval(), Duration::from_millis(500));
        assert_eq!(settings.install_wait_timeout(), Duration::from_secs(120));
        assert_eq!(settings.refresh_delay(), Duration::from_millis(500));
        assert!(!settings.exclusive_theme);
        assert!(!settings.encrypted_assets);
    }

    #[test]
    fn test_system_overlay_dir_by_device_class() {
        let mut settings = PipelineSettings::default();
        assert_eq!(settings.system_overlay_dir(), Some("/system/vendor/overlay"));

        settings.device_class = "pixel".to_string();
        assert_eq!(settings.system_overlay_dir(), Some("/vendor/overlay"));

        settings.device_class = "unknown".to_string();
        assert_eq!(settings.system_overlay_dir(), None);
    }

    #[test]
    fn test_shell_target_recognition() {
        let settings = PipelineSettings::default();
        assert!(settings.is_shell_target("com.android.systemui"));
        assert!(!settings.is_shell_target("com.example.mail"));
    }

    #[test]
    fn test_settings_yaml_round_trip_defaults() {
        let yaml = "Veneer_Settings:\n  Exclusive Theme: true\n";
        let settings: Settings = serde_yaml_ng::from_str(yaml).unwrap();
        assert!(settings.pipeline.exclusive_theme);
        // Unspecified knobs fall back to defaults
        assert_eq!(settings.pipeline.install_wait_timeout, 120);
        assert_eq!(settings.pipeline.device_class, "legacy");
    }
}
