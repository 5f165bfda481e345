use crate::skills::{split_command, Manifest};
use crate::tools::{truncate_output, Tool, ToolResult};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::io::AsyncWriteExt;
use tracing::warn;

const MAX_SKILL_OUTPUT_CHARS: usize = 10_000;
/// Grace window after timeout before the process is force-killed.
const KILL_GRACE: Duration = Duration::from_secs(2);

/// An external program exposed to the registry as `skill_<name>`. The
/// tool call's arguments are delivered on the program's stdin as JSON;
/// stdout is the successful output, stderr the error text.
pub struct SkillTool {
    manifest: Manifest,
    dir: PathBuf,
    tool_name: String,
    tool_description: String,
    timeout_secs: u64,
    sandbox: bool,
}

impl SkillTool {
    pub fn new(manifest: Manifest, dir: PathBuf, default_timeout: u64, sandbox: bool) -> Self {
        let timeout_secs = match manifest.timeout_secs {
            Some(t) if t > 0 => t,
            _ if default_timeout > 0 => default_timeout,
            _ => 60,
        };
        let tool_name = format!("skill_{}", manifest.name);
        let tool_description = format!(
            "[Skill] {} (v{}): {}",
            manifest.name, manifest.version, manifest.description
        );
        Self {
            manifest,
            dir,
            tool_name,
            tool_description,
            timeout_secs,
            sandbox,
        }
    }
}

/// The program must resolve via PATH or relative to the skill
/// directory; absolute paths and traversal are rejected under sandbox.
fn validate_skill_command(command: &str) -> Result<(), String> {
    let parts = split_command(command);
    let Some(program) = parts.first() else {
        return Err("empty command".to_string());
    };

    if Path::new(program).is_absolute() {
        return Err(format!(
            "absolute paths not allowed in skill command: {}",
            program
        ));
    }

    if program.contains("..") {
        return Err(format!(
            "path traversal not allowed in skill command: {}",
            program
        ));
    }

    Ok(())
}

#[async_trait]
impl Tool for SkillTool {
    fn name(&self) -> &str {
        &self.tool_name
    }

    fn description(&self) -> &str {
        &self.tool_description
    }

    fn parameters(&self) -> Value {
        self.manifest
            .parameters
            .clone()
            .unwrap_or_else(|| json!({"type": "object", "properties": {}}))
    }

    async fn execute(&self, args: Value) -> anyhow::Result<ToolResult> {
        if self.sandbox {
            if let Err(reason) = validate_skill_command(&self.manifest.command) {
                return Ok(ToolResult::error(format!("sandbox violation: {}", reason)));
            }
        }

        let parts = split_command(&self.manifest.command);
        let Some((program, rest)) = parts.split_first() else {
            return Ok(ToolResult::error("skill command is empty"));
        };

        let mut cmd = tokio::process::Command::new(program);
        cmd.args(rest)
            .current_dir(&self.dir)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => {
                return Ok(ToolResult::error(format!(
                    "failed to start skill '{}': {}",
                    self.manifest.name, e
                )))
            }
        };

        // Arguments go in as a single JSON document; the program reads
        // to EOF.
        if let Some(mut stdin) = child.stdin.take() {
            let payload = serde_json::to_vec(&args).unwrap_or_else(|_| b"{}".to_vec());
            if let Err(e) = stdin.write_all(&payload).await {
                warn!("skill {}: failed to write stdin: {}", self.manifest.name, e);
            }
        }

        let mut stdout = child.stdout.take().expect("stdout piped");
        let mut stderr = child.stderr.take().expect("stderr piped");
        let mut out_buf = Vec::new();
        let mut err_buf = Vec::new();

        let run = async {
            let (out_res, err_res, status) = tokio::join!(
                stdout.read_to_end(&mut out_buf),
                stderr.read_to_end(&mut err_buf),
                child.wait(),
            );
            let _ = out_res;
            let _ = err_res;
            status
        };

        let waited = tokio::time::timeout(Duration::from_secs(self.timeout_secs), run).await;
        let status = match waited {
            Ok(Ok(status)) => status,
            Ok(Err(e)) => {
                return Ok(ToolResult::error(format!(
                    "skill '{}' failed: {}",
                    self.manifest.name, e
                )))
            }
            Err(_) => {
                if tokio::time::timeout(KILL_GRACE, child.wait()).await.is_err() {
                    let _ = child.kill().await;
                }
                return Ok(ToolResult::error(format!(
                    "skill '{}' timed out after {}s",
                    self.manifest.name, self.timeout_secs
                )));
            }
        };

        if status.success() {
            let output = String::from_utf8_lossy(&out_buf);
            Ok(ToolResult::ok(truncate_output(
                &output,
                MAX_SKILL_OUTPUT_CHARS,
                "\n... (output truncated)",
            )))
        } else {
            let stderr_text = String::from_utf8_lossy(&err_buf);
            let message = if stderr_text.trim().is_empty() {
                format!("exit status: {}", status)
            } else {
                stderr_text.into_owned()
            };
            Ok(ToolResult::error(truncate_output(
                &message,
                MAX_SKILL_OUTPUT_CHARS,
                "\n... (truncated)",
            )))
        }
    }
}
