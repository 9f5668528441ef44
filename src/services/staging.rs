use camino::{Utf8Path, Utf8PathBuf};
use regex::Regex;
use std::fs;
use thiserror::Error;

use crate::models::{OverlayCandidate, PipelineSettings};

/// Directory inside a theme bundle that holds per-target overlay assets.
pub const OVERLAYS_DIR: &str = "overlays";

/// Suffix appended to asset file names when the bundle ships encrypted.
pub const ENCRYPTED_FILE_EXTENSION: &str = ".enc";

/// Errors that can occur while assembling a working tree
#[derive(Error, Debug)]
pub enum StagingError {
    /// The overlay has no resources for the requested theme variant.
    /// Classified as a soft skip, never as a hard failure.
    #[error("no content for variant '{variant}' under {overlay_dir}")]
    MissingVariantAsset {
        variant: String,
        overlay_dir: Utf8PathBuf,
    },

    #[error("overlay assets not found: {0}")]
    AssetsNotFound(Utf8PathBuf),

    #[error("staging I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// A fully assembled working tree, ready to hand to the build collaborator
#[derive(Debug, Clone)]
pub struct StagedTree {
    /// Root of the per-overlay working directory.
    pub work_dir: Utf8PathBuf,

    /// Resource-root suffix inside the working directory, either
    /// `/type3_<variant>` or `/res`.
    pub asset_suffix: String,

    /// Sanitized variant suffix folded into the built package name.
    pub package_suffix: String,
}

/// Service that assembles per-overlay working trees from theme assets
///
/// The working-tree layout is a contract with the build collaborator:
///
/// - `<suffix>/values/type1a.xml` (resp. `type1b`, `type1c`) for the
///   value-resource slots
/// - `/assets` for the bundled-assets slot
/// - `/type2_<name>` for the asset-bundle slot
/// - the resource root itself lives under the variant suffix
///
/// # Fields
///
/// The service pre-compiles regex patterns at construction time:
///
/// - `sanitize_pattern`: strips everything outside `[a-zA-Z0-9]` when folding
///   variant names into package-name suffixes
/// - `whitespace_pattern`: collapses whitespace when parsing a theme variant
///   display value into its directory-name form
pub struct OverlayStager {
    /// Root of the theme bundle's asset tree
    assets_root: Utf8PathBuf,

    /// Scratch root under which per-overlay working directories are created
    work_root: Utf8PathBuf,

    /// Whether asset files carry the transport-encryption suffix
    encrypted: bool,

    /// Regex stripping non-alphanumerics from package-name suffix parts
    sanitize_pattern: Regex,

    /// Regex collapsing whitespace in variant display values
    whitespace_pattern: Regex,
}

impl OverlayStager {
    pub fn new(
        assets_root: impl Into<Utf8PathBuf>,
        work_root: impl Into<Utf8PathBuf>,
        encrypted: bool,
    ) -> Self {
        Self {
            assets_root: assets_root.into(),
            work_root: work_root.into(),
            encrypted,
            sanitize_pattern: Regex::new(r"[^a-zA-Z0-9]").expect("Invalid sanitize regex"),
            whitespace_pattern: Regex::new(r"\s+").expect("Invalid whitespace regex"),
        }
    }

    /// Construct from the configured asset and scratch roots
    pub fn from_settings(settings: &PipelineSettings) -> Self {
        Self::new(
            settings.theme_assets_dir.clone(),
            settings.working_dir.clone(),
            settings.encrypted_assets,
        )
    }

    /// Asset directory for one overlay target inside the theme bundle
    pub fn overlay_dir(&self, target_package: &str) -> Utf8PathBuf {
        self.assets_root.join(OVERLAYS_DIR).join(target_package)
    }

    /// Directory-name form of a theme variant display value
    pub fn parse_variant(&self, variant: &str) -> String {
        self.whitespace_pattern.replace_all(variant.trim(), "").into_owned()
    }

    /// Strip everything outside `[a-zA-Z0-9]` for package-name use
    pub fn sanitize(&self, part: &str) -> String {
        self.sanitize_pattern.replace_all(part, "").into_owned()
    }

    /// Package-name suffix built from the name-affecting slot selections
    ///
    /// Concatenates slots 1a, 1b, 1c, 2 and 4 in that order, each part
    /// sanitized. Slot 5 carries assets only and never affects the name.
    pub fn package_suffix(&self, candidate: &OverlayCandidate) -> String {
        let variants = &candidate.variants;
        [
            variants.slot1a.as_deref(),
            variants.slot1b.as_deref(),
            variants.slot1c.as_deref(),
            variants.slot2.as_deref(),
            variants.slot4.as_deref(),
        ]
        .iter()
        .flatten()
        .map(|part| self.sanitize(part))
        .collect()
    }

    /// Assemble a fresh working tree for one candidate
    ///
    /// Any stale working directory for the same overlay is deleted first. The
    /// resource root is copied in under the variant suffix, then the selected
    /// slot assets are layered on top.
    ///
    /// # Arguments
    /// * `candidate` - The overlay being built
    /// * `theme_variant` - The batch-wide theme variant, if one was chosen
    ///
    /// # Errors
    /// [`StagingError::MissingVariantAsset`] when the overlay has no
    /// resources for the chosen variant; anything else is a hard failure.
    pub fn stage(
        &self,
        candidate: &OverlayCandidate,
        theme_variant: Option<&str>,
    ) -> Result<StagedTree, StagingError> {
        let overlay_dir = self.overlay_dir(&candidate.target_package);
        if !overlay_dir.is_dir() {
            return Err(StagingError::AssetsNotFound(overlay_dir));
        }

        let work_dir = self.work_root.join(&candidate.overlay_id);
        if work_dir.exists() {
            fs::remove_dir_all(&work_dir)?;
        }
        fs::create_dir_all(&work_dir)?;

        let asset_suffix = self.copy_resource_root(candidate, theme_variant, &overlay_dir, &work_dir)?;

        // Value-resource slots land under the suffix root
        let values_root = work_dir.join(asset_suffix.trim_start_matches('/'));
        let variants = &candidate.variants;
        self.copy_values_file(&overlay_dir, &values_root, "type1a", variants.slot1a.as_deref())?;
        self.copy_values_file(&overlay_dir, &values_root, "type1b", variants.slot1b.as_deref())?;
        self.copy_values_file(&overlay_dir, &values_root, "type1c", variants.slot1c.as_deref())?;

        // Slot 5: bundled assets
        if let Some(name) = variants.slot5.as_deref() {
            let source = overlay_dir.join(format!("type4_{}", self.parse_variant(name)));
            copy_dir_recursive(&source, &work_dir.join("assets"))?;
        }

        // Slot 2: asset-bundle variant, kept under its own directory name
        if let Some(name) = variants.slot2.as_deref() {
            let dir_name = format!("type2_{}", self.parse_variant(name));
            let source = overlay_dir.join(&dir_name);
            copy_dir_recursive(&source, &work_dir.join(&dir_name))?;
        }

        Ok(StagedTree {
            work_dir,
            asset_suffix,
            package_suffix: self.package_suffix(candidate),
        })
    }

    /// Copy the variant-appropriate resource root into the working tree
    ///
    /// With a theme variant chosen, an overlay that declares a
    /// `type3-common` directory gets it copied first with the
    /// variant-specific directory layered over it. An overlay with neither
    /// directory has no content for the variant.
    fn copy_resource_root(
        &self,
        candidate: &OverlayCandidate,
        theme_variant: Option<&str>,
        overlay_dir: &Utf8Path,
        work_dir: &Utf8Path,
    ) -> Result<String, StagingError> {
        let Some(variant) = theme_variant.filter(|v| !v.trim().is_empty()) else {
            let source = overlay_dir.join("res");
            if !source.is_dir() {
                return Err(StagingError::AssetsNotFound(source));
            }
            copy_dir_recursive(&source, &work_dir.join("res"))?;
            return Ok("/res".to_string());
        };

        let parsed = self.parse_variant(variant);
        let common_dir = overlay_dir.join("type3-common");
        let variant_dir = overlay_dir.join(format!("type3_{parsed}"));

        if !common_dir.is_dir() && !variant_dir.is_dir() {
            tracing::debug!(
                overlay = %candidate.overlay_id,
                variant = %parsed,
                "no content for theme variant, skipping"
            );
            return Err(StagingError::MissingVariantAsset {
                variant: parsed,
                overlay_dir: overlay_dir.to_owned(),
            });
        }

        let dest = work_dir.join(format!("type3_{parsed}"));
        if common_dir.is_dir() {
            copy_dir_recursive(&common_dir, &dest)?;
        }
        if variant_dir.is_dir() {
            copy_dir_recursive(&variant_dir, &dest)?;
        }

        Ok(format!("/type3_{parsed}"))
    }

    /// Copy one value-resource slot file to its canonical location
    ///
    /// `type1a_<name>.xml` (with the encryption suffix when the bundle ships
    /// encrypted) becomes `values/type1a.xml` under the suffix root.
    fn copy_values_file(
        &self,
        overlay_dir: &Utf8Path,
        values_root: &Utf8Path,
        slot: &str,
        selection: Option<&str>,
    ) -> Result<(), StagingError> {
        let Some(name) = selection else {
            return Ok(());
        };

        let mut file_name = format!("{slot}_{}.xml", self.parse_variant(name));
        if self.encrypted {
            file_name.push_str(ENCRYPTED_FILE_EXTENSION);
        }
        let source = overlay_dir.join(&file_name);

        let values_dir = values_root.join("values");
        fs::create_dir_all(&values_dir)?;
        fs::copy(&source, values_dir.join(format!("{slot}.xml")))?;

        tracing::debug!(source = %source, slot, "staged value-resource variant");
        Ok(())
    }
}

/// Recursively copy a directory tree, merging into an existing destination
fn copy_dir_recursive(source: &Utf8Path, dest: &Utf8Path) -> Result<(), StagingError> {
    fs::create_dir_all(dest)?;
    for entry in source.read_dir_utf8()? {
        let entry = entry?;
        let target = dest.join(entry.file_name());
        if entry.file_type()?.is_dir() {
            copy_dir_recursive(entry.path(), &target)?;
        } else {
            fs::copy(entry.path(), &target)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::VariantSelection;
    use tempfile::TempDir;

    fn utf8(dir: &TempDir) -> Utf8PathBuf {
        Utf8PathBuf::try_from(dir.path().to_path_buf()).unwrap()
    }

    fn write_overlay_assets(assets_root: &Utf8Path, target: &str) -> Utf8PathBuf {
        let overlay_dir = assets_root.join(OVERLAYS_DIR).join(target);
        fs::create_dir_all(overlay_dir.join("res/values")).unwrap();
        fs::write(overlay_dir.join("res/values/colors.xml"), "<resources/>").unwrap();
        overlay_dir
    }

    fn candidate(target: &str) -> OverlayCandidate {
        OverlayCandidate::new(target, format!("{target}.Nocturne"))
    }

    #[test]
    fn test_stage_default_resources() {
        let assets = TempDir::new().unwrap();
        let work = TempDir::new().unwrap();
        write_overlay_assets(&utf8(&assets), "com.example.mail");

        let stager = OverlayStager::new(utf8(&assets), utf8(&work), false);
        let tree = stager.stage(&candidate("com.example.mail"), None).unwrap();

        assert_eq!(tree.asset_suffix, "/res");
        assert!(tree.work_dir.join("res/values/colors.xml").is_file());
        assert_eq!(tree.package_suffix, "");
    }

    #[test]
    fn test_stage_missing_variant_is_soft() {
        let assets = TempDir::new().unwrap();
        let work = TempDir::new().unwrap();
        write_overlay_assets(&utf8(&assets), "com.example.mail");

        let stager = OverlayStager::new(utf8(&assets), utf8(&work), false);
        let err = stager
            .stage(&candidate("com.example.mail"), Some("Midnight"))
            .unwrap_err();

        assert!(matches!(err, StagingError::MissingVariantAsset { .. }));
    }

    #[test]
    fn test_stage_variant_layers_common_first() {
        let assets = TempDir::new().unwrap();
        let work = TempDir::new().unwrap();
        let assets_root = utf8(&assets);
        let overlay_dir = write_overlay_assets(&assets_root, "com.example.mail");

        fs::create_dir_all(overlay_dir.join("type3-common")).unwrap();
        fs::write(overlay_dir.join("type3-common/base.xml"), "common").unwrap();
        fs::create_dir_all(overlay_dir.join("type3_Midnight")).unwrap();
        fs::write(overlay_dir.join("type3_Midnight/base.xml"), "variant").unwrap();
        fs::write(overlay_dir.join("type3_Midnight/extra.xml"), "extra").unwrap();

        let stager = OverlayStager::new(assets_root, utf8(&work), false);
        let tree = stager
            .stage(&candidate("com.example.mail"), Some("Midnight"))
            .unwrap();

        assert_eq!(tree.asset_suffix, "/type3_Midnight");
        let root = tree.work_dir.join("type3_Midnight");
        // The variant copy wins over the common copy for shared names
        assert_eq!(fs::read_to_string(root.join("base.xml")).unwrap(), "variant");
        assert_eq!(fs::read_to_string(root.join("extra.xml")).unwrap(), "extra");
    }

    #[test]
    fn test_stage_variant_name_whitespace_collapsed() {
        let assets = TempDir::new().unwrap();
        let work = TempDir::new().unwrap();
        let assets_root = utf8(&assets);
        let overlay_dir = write_overlay_assets(&assets_root, "com.example.mail");
        fs::create_dir_all(overlay_dir.join("type3_DeepOcean")).unwrap();
        fs::write(overlay_dir.join("type3_DeepOcean/a.xml"), "a").unwrap();

        let stager = OverlayStager::new(assets_root, utf8(&work), false);
        let tree = stager
            .stage(&candidate("com.example.mail"), Some("Deep Ocean"))
            .unwrap();

        assert_eq!(tree.asset_suffix, "/type3_DeepOcean");
    }

    #[test]
    fn test_stage_value_slots_and_assets() {
        let assets = TempDir::new().unwrap();
        let work = TempDir::new().unwrap();
        let assets_root = utf8(&assets);
        let overlay_dir = write_overlay_assets(&assets_root, "com.example.mail");

        fs::write(overlay_dir.join("type1a_Teal.xml"), "<resources/>").unwrap();
        fs::write(overlay_dir.join("type1b_Round.xml"), "<resources/>").unwrap();
        fs::create_dir_all(overlay_dir.join("type4_Fonts")).unwrap();
        fs::write(overlay_dir.join("type4_Fonts/a.ttf"), "font").unwrap();
        fs::create_dir_all(overlay_dir.join("type2_Compact")).unwrap();
        fs::write(overlay_dir.join("type2_Compact/layout.xml"), "x").unwrap();

        let mut cand = candidate("com.example.mail");
        cand.variants = VariantSelection {
            slot1a: Some("Teal".to_string()),
            slot1b: Some("Round".to_string()),
            slot2: Some("Compact".to_string()),
            slot5: Some("Fonts".to_string()),
            ..VariantSelection::default()
        };

        let stager = OverlayStager::new(assets_root, utf8(&work), false);
        let tree = stager.stage(&cand, None).unwrap();

        assert!(tree.work_dir.join("res/values/type1a.xml").is_file());
        assert!(tree.work_dir.join("res/values/type1b.xml").is_file());
        assert!(!tree.work_dir.join("res/values/type1c.xml").exists());
        assert!(tree.work_dir.join("assets/a.ttf").is_file());
        assert!(tree.work_dir.join("type2_Compact/layout.xml").is_file());
        assert_eq!(tree.package_suffix, "TealRoundCompact");
    }

    #[test]
    fn test_stage_encrypted_value_slot() {
        let assets = TempDir::new().unwrap();
        let work = TempDir::new().unwrap();
        let assets_root = utf8(&assets);
        let overlay_dir = write_overlay_assets(&assets_root, "com.example.mail");
        fs::write(overlay_dir.join("type1a_Teal.xml.enc"), "cipher").unwrap();

        let mut cand = candidate("com.example.mail");
        cand.variants.slot1a = Some("Teal".to_string());

        let stager = OverlayStager::new(assets_root, utf8(&work), true);
        let tree = stager.stage(&cand, None).unwrap();

        assert!(tree.work_dir.join("res/values/type1a.xml").is_file());
    }

    #[test]
    fn test_stage_deletes_stale_working_tree() {
        let assets = TempDir::new().unwrap();
        let work = TempDir::new().unwrap();
        let assets_root = utf8(&assets);
        let work_root = utf8(&work);
        write_overlay_assets(&assets_root, "com.example.mail");

        let cand = candidate("com.example.mail");
        let stale = work_root.join(&cand.overlay_id).join("leftover");
        fs::create_dir_all(&stale).unwrap();

        let stager = OverlayStager::new(assets_root, work_root, false);
        let tree = stager.stage(&cand, None).unwrap();

        assert!(!tree.work_dir.join("leftover").exists());
    }

    #[test]
    fn test_from_settings_stages_encrypted_assets() {
        let assets = TempDir::new().unwrap();
        let work = TempDir::new().unwrap();
        let assets_root = utf8(&assets);
        let overlay_dir = write_overlay_assets(&assets_root, "com.example.mail");
        fs::write(overlay_dir.join("type1a_Teal.xml.enc"), "cipher").unwrap();

        let mut settings = PipelineSettings::default();
        settings.theme_assets_dir = assets_root.to_string();
        settings.working_dir = utf8(&work).to_string();
        settings.encrypted_assets = true;

        let stager = OverlayStager::from_settings(&settings);
        assert_eq!(
            stager.overlay_dir("com.example.mail"),
            assets_root.join("overlays/com.example.mail")
        );

        let mut cand = candidate("com.example.mail");
        cand.variants.slot1a = Some("Teal".to_string());
        let tree = stager.stage(&cand, None).unwrap();
        assert!(tree.work_dir.join("res/values/type1a.xml").is_file());
    }

    #[test]
    fn test_package_suffix_sanitized() {
        let stager = OverlayStager::new("/assets", "/work", false);
        let mut cand = candidate("com.example.mail");
        cand.variants = VariantSelection {
            slot1a: Some("Deep Ocean".to_string()),
            slot2: Some("v2.1-beta".to_string()),
            ..VariantSelection::default()
        };

        assert_eq!(stager.package_suffix(&cand), "DeepOceanv21beta");
    }
}
