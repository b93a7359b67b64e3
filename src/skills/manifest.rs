//! Skill package manifest (`manifest.toml`).
//!
//! Each skill directory carries a `manifest.toml` describing the skill and
//! naming the factory entry that builds it:
//!
//! ```toml
//! name = "Time"
//! version = "1.0.0"
//! description = "Tells the current time."
//! entry = "time"
//! ```

use crate::error::{AssistantError, Result};
use serde::Deserialize;
use std::path::Path;

/// File name looked for in each skill directory.
pub const MANIFEST_FILE: &str = "manifest.toml";

/// Parsed contents of a skill's `manifest.toml`.
#[derive(Debug, Clone, Deserialize)]
pub struct SkillManifest {
    /// Human-readable skill name.
    pub name: String,
    /// Semantic version string.
    #[serde(default = "default_version")]
    pub version: String,
    /// What the skill does.
    #[serde(default)]
    pub description: String,
    /// Factory entry that builds the skill instance. Defaults to the
    /// directory name when omitted.
    #[serde(default)]
    pub entry: String,
}

fn default_version() -> String {
    "0.1.0".to_owned()
}

impl SkillManifest {
    /// Load and validate the manifest inside `dir`.
    ///
    /// # Errors
    ///
    /// Returns an error if the file is missing, unparseable, or invalid.
    pub fn load(dir: &Path) -> Result<Self> {
        let path = dir.join(MANIFEST_FILE);
        let text = std::fs::read_to_string(&path).map_err(|e| {
            AssistantError::Skill(format!("cannot read {}: {e}", path.display()))
        })?;
        let mut manifest: Self = toml::from_str(&text).map_err(|e| {
            AssistantError::Skill(format!("invalid manifest {}: {e}", path.display()))
        })?;
        if manifest.entry.is_empty()
            && let Some(dir_name) = dir.file_name().and_then(|n| n.to_str())
        {
            manifest.entry = dir_name.to_owned();
        }
        manifest.validate()?;
        Ok(manifest)
    }

    /// Check the fields are well-formed.
    ///
    /// # Errors
    ///
    /// Returns an error for empty names/entries or malformed entries.
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(AssistantError::Skill(
                "manifest `name` cannot be empty".to_owned(),
            ));
        }
        if self.entry.trim().is_empty() {
            return Err(AssistantError::Skill(
                "manifest `entry` cannot be empty".to_owned(),
            ));
        }
        if !self
            .entry
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' || c == '-')
        {
            return Err(AssistantError::Skill(format!(
                "manifest `entry` `{}` is invalid (use lowercase letters, digits, _ or -)",
                self.entry
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_manifest(dir: &Path, text: &str) {
        std::fs::write(dir.join(MANIFEST_FILE), text).expect("write manifest");
    }

    #[test]
    fn loads_a_complete_manifest() {
        let dir = tempfile::tempdir().expect("tempdir");
        write_manifest(
            dir.path(),
            "name = \"Time\"\nversion = \"1.0.0\"\ndescription = \"Tells the time.\"\nentry = \"time\"\n",
        );
        let manifest = SkillManifest::load(dir.path()).expect("load");
        assert_eq!(manifest.name, "Time");
        assert_eq!(manifest.entry, "time");
    }

    #[test]
    fn entry_defaults_to_directory_name() {
        let parent = tempfile::tempdir().expect("tempdir");
        let dir = parent.path().join("diagnostics");
        std::fs::create_dir(&dir).expect("mkdir");
        write_manifest(&dir, "name = \"Diagnostics\"\n");
        let manifest = SkillManifest::load(&dir).expect("load");
        assert_eq!(manifest.entry, "diagnostics");
        assert_eq!(manifest.version, "0.1.0");
    }

    #[test]
    fn missing_manifest_is_an_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        assert!(SkillManifest::load(dir.path()).is_err());
    }

    #[test]
    fn invalid_entry_characters_are_rejected() {
        let dir = tempfile::tempdir().expect("tempdir");
        write_manifest(dir.path(), "name = \"Bad\"\nentry = \"Not Valid!\"\n");
        assert!(SkillManifest::load(dir.path()).is_err());
    }

    #[test]
    fn empty_name_is_rejected() {
        let dir = tempfile::tempdir().expect("tempdir");
        write_manifest(dir.path(), "name = \"\"\nentry = \"ok\"\n");
        assert!(SkillManifest::load(dir.path()).is_err());
    }
}
