pub mod loader;
pub mod tool;

pub use loader::SkillLoader;
pub use tool::SkillTool;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A skill plugin's `manifest.json`. `name` and `command` are required;
/// everything else has a serviceable default.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Manifest {
    pub name: String,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub author: String,
    #[serde(default)]
    pub parameters: Option<Value>,
    pub command: String,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

/// Summary of an installed skill, surfaced to UI layers.
#[derive(Debug, Clone, Serialize)]
pub struct SkillInfo {
    pub name: String,
    pub version: String,
    pub description: String,
    pub author: String,
    pub enabled: bool,
}

/// Split a command string into program and arguments, honoring paired
/// single and double quotes. The quote characters themselves are not
/// preserved.
pub(crate) fn split_command(command: &str) -> Vec<String> {
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut in_quote = false;

    for ch in command.chars() {
        match ch {
            '"' | '\'' => in_quote = !in_quote,
            ' ' if !in_quote => {
                if !current.is_empty() {
                    parts.push(std::mem::take(&mut current));
                }
            }
            _ => current.push(ch),
        }
    }
    if !current.is_empty() {
        parts.push(current);
    }
    parts
}
