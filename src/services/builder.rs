use camino::{Utf8Path, Utf8PathBuf};
use thiserror::Error;

/// Everything the build collaborator needs to compile one overlay
#[derive(Debug, Clone)]
pub struct BuildRequest {
    /// Fully-qualified overlay package identifier.
    pub overlay_id: String,

    /// Package identifier of the application being themed.
    pub target_package: String,

    /// Display name of the theme, folded into package metadata.
    pub theme_name: String,

    /// Package identifier of the theme bundle (the overlay parent).
    pub theme_package: String,

    /// Sanitized variant suffix appended to the built package name.
    pub package_suffix: String,

    /// Value-resource slot selections, in declaration order.
    pub slot1a: Option<String>,
    pub slot1b: Option<String>,
    pub slot1c: Option<String>,

    /// Asset-bundle slot selection (name-affecting).
    pub slot2: Option<String>,

    /// Naming-only slot selection.
    pub slot4: Option<String>,

    /// Batch-wide theme variant, if one was chosen.
    pub theme_variant: Option<String>,

    /// Whether the device runs the live overlay-manager tier.
    pub live_tier: bool,

    /// Resource-root suffix inside the working directory.
    pub asset_suffix: String,

    /// Assembled working tree to compile from.
    pub work_dir: Utf8PathBuf,
}

/// A compiled overlay package
#[derive(Debug, Clone)]
pub struct Artifact {
    /// On-disk package file, when the collaborator leaves one behind.
    pub path: Option<Utf8PathBuf>,

    /// Artifact must be installed out-of-band after the build loop.
    pub deferred_install: bool,
}

/// Build failures, classified by reason
///
/// [`BuildFailure::MissingVariantAsset`] is the only soft reason; everything
/// else counts as a hard failure.
#[derive(Error, Debug)]
pub enum BuildFailure {
    #[error("no content for the selected theme variant")]
    MissingVariantAsset,

    #[error("resource compiler failed")]
    Compiler { log: String },

    #[error("build I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl BuildFailure {
    /// Diagnostic log for the aggregated error report
    pub fn log(&self) -> String {
        match self {
            Self::MissingVariantAsset => String::new(),
            Self::Compiler { log } => log.clone(),
            Self::Io(err) => err.to_string(),
        }
    }
}

/// The external resource-compiler collaborator
///
/// Compiles an assembled working tree into an installable overlay package.
/// On platforms that install the package as part of the build, the returned
/// artifact carries no path; when installation must happen out-of-band the
/// artifact is flagged `deferred_install`.
pub trait OverlayBuilder: Send + Sync {
    fn build(&self, request: &BuildRequest) -> Result<Artifact, BuildFailure>;
}

/// Derive the package identifier from an artifact file name
///
/// Artifacts are named `<package>-<version>.apk`; everything before the last
/// dash is the package identifier.
pub fn package_id_from_artifact(path: &Utf8Path) -> Option<String> {
    let stem = path.file_stem()?;
    match stem.rsplit_once('-') {
        Some((package, _version)) => Some(package.to_string()),
        None => Some(stem.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_package_id_from_artifact() {
        let path = Utf8PathBuf::from("/data/out/com.example.mail.Nocturne-4.2.1.apk");
        assert_eq!(
            package_id_from_artifact(&path).as_deref(),
            Some("com.example.mail.Nocturne")
        );
    }

    #[test]
    fn test_package_id_without_version() {
        let path = Utf8PathBuf::from("/data/out/com.example.mail.Nocturne.apk");
        assert_eq!(
            package_id_from_artifact(&path).as_deref(),
            Some("com.example.mail.Nocturne")
        );
    }

    #[test]
    fn test_failure_logs() {
        let failure = BuildFailure::Compiler {
            log: "error: resource not found".to_string(),
        };
        assert_eq!(failure.log(), "error: resource not found");
        assert!(BuildFailure::MissingVariantAsset.log().is_empty());
    }
}
