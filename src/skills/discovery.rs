//! Skill discovery at backend startup.
//!
//! Scans the configured directory; each subdirectory with a valid
//! `manifest.toml` is instantiated through the factory map and registered.
//! Failures are logged and skipped, never fatal.

use super::builtins::skill_factory;
use super::manifest::SkillManifest;
use super::{SkillContext, SkillManager};
use std::path::Path;
use tracing::{info, warn};

/// Scan `dir` and register every loadable skill. Returns the number of
/// skills loaded from the directory.
pub fn discover_skills(dir: &Path, ctx: &SkillContext, manager: &mut SkillManager) -> usize {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            info!("no skills directory at {}: {e}", dir.display());
            return 0;
        }
    };

    let mut dirs: Vec<_> = entries
        .flatten()
        .map(|e| e.path())
        .filter(|p| p.is_dir())
        .collect();
    // Deterministic load order.
    dirs.sort();

    let mut loaded = 0;
    for skill_dir in dirs {
        let skill_id = skill_dir
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or_default()
            .to_owned();
        if skill_id.is_empty() {
            continue;
        }

        let manifest = match SkillManifest::load(&skill_dir) {
            Ok(manifest) => manifest,
            Err(e) => {
                warn!("skipping skill '{skill_id}': {e}");
                continue;
            }
        };

        let Some(skill) = skill_factory(&manifest.entry, ctx) else {
            warn!(
                "skipping skill '{skill_id}': unknown entry '{}'",
                manifest.entry
            );
            continue;
        };

        match manager.register_skill(&skill_id, skill) {
            Ok(()) => {
                info!(
                    "loaded skill '{skill_id}' v{} ({})",
                    manifest.version, manifest.name
                );
                loaded += 1;
            }
            Err(e) => warn!("failed to register skill '{skill_id}': {e}"),
        }
    }
    loaded
}
