use crate::skills::{Manifest, SkillInfo, SkillTool};
use crate::tools::Tool;
use anyhow::{Context, Result};
use std::collections::HashSet;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, warn};

/// Manifests larger than this are rejected.
const MAX_MANIFEST_BYTES: u64 = 64 * 1024;

/// Discovers skill plugins: every directory under the skills root with
/// a valid `manifest.json` yields one tool. Invalid manifests are
/// skipped, not fatal; a broken plugin must not take the agent down.
pub struct SkillLoader {
    skills_dir: PathBuf,
    default_timeout: u64,
    sandbox: bool,
}

impl SkillLoader {
    pub fn new(skills_dir: PathBuf, default_timeout: u64, sandbox: bool) -> Self {
        Self {
            skills_dir,
            default_timeout: if default_timeout > 0 {
                default_timeout
            } else {
                60
            },
            sandbox,
        }
    }

    /// Load tools for every enabled skill. An empty `enabled` list
    /// means all discovered skills load.
    pub fn load_all(&self, enabled: &[String]) -> Vec<Arc<dyn Tool>> {
        let enabled_set: HashSet<&str> = enabled.iter().map(String::as_str).collect();
        let mut tools: Vec<Arc<dyn Tool>> = Vec::new();

        for (name, dir) in self.skill_dirs() {
            if !enabled_set.is_empty() && !enabled_set.contains(name.as_str()) {
                continue;
            }
            match parse_manifest(&dir.join("manifest.json")) {
                Ok(manifest) => {
                    debug!("loaded skill '{}' from {}", manifest.name, dir.display());
                    tools.push(Arc::new(SkillTool::new(
                        manifest,
                        dir,
                        self.default_timeout,
                        self.sandbox,
                    )));
                }
                Err(e) => {
                    warn!("skipping skill at {}: {}", dir.display(), e);
                }
            }
        }

        tools
    }

    /// Info about every installed skill, whether enabled or not.
    pub fn list_installed(&self, enabled: &[String]) -> Vec<SkillInfo> {
        let enabled_set: HashSet<&str> = enabled.iter().map(String::as_str).collect();
        let mut skills = Vec::new();

        for (name, dir) in self.skill_dirs() {
            let Ok(manifest) = parse_manifest(&dir.join("manifest.json")) else {
                continue;
            };
            skills.push(SkillInfo {
                name: manifest.name,
                version: manifest.version,
                description: manifest.description,
                author: manifest.author,
                enabled: enabled_set.is_empty() || enabled_set.contains(name.as_str()),
            });
        }

        skills
    }

    fn skill_dirs(&self) -> Vec<(String, PathBuf)> {
        if self.skills_dir.as_os_str().is_empty() {
            return Vec::new();
        }
        let Ok(entries) = std::fs::read_dir(&self.skills_dir) else {
            return Vec::new();
        };

        let mut dirs: Vec<(String, PathBuf)> = entries
            .flatten()
            .filter(|e| e.path().is_dir())
            .map(|e| (e.file_name().to_string_lossy().into_owned(), e.path()))
            .collect();
        dirs.sort();
        dirs
    }
}

fn parse_manifest(path: &Path) -> Result<Manifest> {
    let file = std::fs::File::open(path).context("no manifest.json")?;
    let size = file.metadata().map(|m| m.len()).unwrap_or(0);
    if size > MAX_MANIFEST_BYTES {
        anyhow::bail!("manifest too large ({} bytes, max {})", size, MAX_MANIFEST_BYTES);
    }

    let mut data = String::new();
    file.take(MAX_MANIFEST_BYTES)
        .read_to_string(&mut data)
        .context("reading manifest")?;

    let manifest: Manifest = serde_json::from_str(&data).context("invalid manifest")?;
    if manifest.name.is_empty() || manifest.command.is_empty() {
        anyhow::bail!("manifest missing required fields (name, command)");
    }

    Ok(manifest)
}
