use crate::config::SandboxConfig;
use crate::tools::{truncate_output, Tool, ToolResult};
use async_trait::async_trait;
use regex::Regex;
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use std::time::Duration;

/// Deny patterns matched against the whitespace-normalized command.
/// This is defense-in-depth against destructive model suggestions, not
/// a jail: a determined adversary controlling the model's output is out
/// of scope for a regex filter.
static DENY_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        // Destructive file operations
        r"(?i)\brm\s+-[rRf]{1,3}\s+[/~*]",
        r"(?i)\brm\s+-[rRf]{1,3}\b",
        r"(?i)\bmkfs\b",
        r"(?i)\bdd\s+if=",
        r":\(\)\s*\{.*\|.*&\s*\}\s*;", // fork bomb
        // System control
        r"(?i)\b(shutdown|reboot|poweroff|halt)\b",
        r"(?i)\bchmod\s+-R\s+777\s+/",
        r"(?i)\bchown\s+-R\b",
        // Device access
        r">\s*/dev/sd[a-z]",
        // Remote code execution via pipe
        r"(?i)\b(curl|wget)\b.*\|\s*(sh|bash)\b",
        // Shell meta-execution
        r"(?i)\beval\b",
        r"(?i)\bexec\b",
        // Privilege escalation + destructive combos
        r"(?i)\bsudo\s+(rm|dd|mkfs)\b",
        // Process control
        r"(?i)\b(killall|kill\s+-9)\b",
        // User management
        r"(?i)\b(passwd|useradd|userdel|usermod)\b",
        // Firewall
        r"(?i)\biptables\s+-F\b",
        r"(?i)\bufw\s+disable\b",
        // Network listeners
        r"(?i)\b(nc|ncat)\s+-l\b",
        // Inline script execution
        r"(?i)\b(python3?|perl|ruby)\s+-[ce]\b",
        // Anti-forensics
        r"(?i)\bbase64\s+-d\b",
        r"(?i)\bhistory\s+-c\b",
        r"(?i)\bshred\b",
        // Sensitive files
        r"/etc/(shadow|passwd)\b",
        // Cron/service management
        r"(?i)\bcrontab\s+-r\b",
        r"(?i)\bsystemctl\s+(stop|disable)\b",
        r"(?i)\blaunchctl\s+unload\b",
        r"(?i)\bdefaults\s+delete\b",
        // Bulk deletion
        r"(?i)\bxargs\s+rm\b",
        r"(?i)\bfind\s+/\s+.*-delete\b",
        r"(?i)\btruncate\s+-s\s+0\b",
        // Entropy/DoS
        r"(?i)\bcat\s+/dev/urandom\b",
        r"(?i)\bfork\(\)",
        r"(?i)\bwhile\s+true\b",
        // Background persistence
        r"(?i)\bnohup\b",
        // Remote transfer
        r"(?i)\bscp\b",
        r"(?i)\brsync\s+--delete\b",
        // VCS/package destructive
        r"(?i)\bgit\s+push\s+--force\b",
        r"(?i)\bnpm\s+publish\b",
        r"(?i)\bpip\s+install\s+--",
        // Container destructive
        r"(?i)\bdocker\s+(rm|rmi)\s+-f\b",
    ]
    .iter()
    .map(|p| Regex::new(p).expect("invalid shell deny pattern"))
    .collect()
});

static ABS_PATH_TOKEN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?:^|\s)(/[a-zA-Z][a-zA-Z0-9_/.-]*)").expect("invalid abs path pattern")
});

pub struct ShellTool {
    workspace_dir: PathBuf,
    timeout_secs: u64,
    max_output_chars: usize,
    sandbox_enabled: bool,
}

impl ShellTool {
    pub fn new(workspace_dir: PathBuf, cfg: &SandboxConfig) -> Self {
        Self {
            workspace_dir,
            timeout_secs: if cfg.timeout_secs > 0 {
                cfg.timeout_secs
            } else {
                60
            },
            max_output_chars: if cfg.max_output_chars > 0 {
                cfg.max_output_chars
            } else {
                10_000
            },
            sandbox_enabled: cfg.enabled,
        }
    }

    /// Pre-execution policy: deny-regex scan over the normalized
    /// command, path-traversal rejection, and workspace containment for
    /// absolute path tokens.
    fn guard_command(&self, command: &str) -> Option<String> {
        let normalized = collapse_whitespace(command);
        for pattern in DENY_PATTERNS.iter() {
            if pattern.is_match(&normalized) {
                return Some(format!("matches deny pattern: {}", pattern.as_str()));
            }
        }

        if command.contains("../") {
            return Some("path traversal detected".to_string());
        }

        if !self.workspace_dir.as_os_str().is_empty()
            && has_path_outside_workspace(command, &self.workspace_dir)
        {
            return Some("absolute path outside workspace".to_string());
        }

        None
    }
}

/// Collapse every run of space/tab/newline/CR to a single space so that
/// multi-space variants of denied commands still match the patterns.
fn collapse_whitespace(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut in_space = false;
    for ch in s.chars() {
        if matches!(ch, ' ' | '\t' | '\n' | '\r') {
            if !in_space {
                out.push(' ');
                in_space = true;
            }
        } else {
            out.push(ch);
            in_space = false;
        }
    }
    out
}

/// Scan absolute-path tokens in the command; everything must stay under
/// the workspace, with /dev/null as the single whitelisted exception.
fn has_path_outside_workspace(command: &str, workspace: &Path) -> bool {
    let workspace: String = workspace.to_string_lossy().into_owned();
    for caps in ABS_PATH_TOKEN.captures_iter(command) {
        if let Some(token) = caps.get(1) {
            let path = token.as_str();
            if !path.starts_with(&workspace) && !path.starts_with("/dev/null") {
                return true;
            }
        }
    }
    false
}

#[async_trait]
impl Tool for ShellTool {
    fn name(&self) -> &str {
        "shell"
    }

    fn description(&self) -> &str {
        "Execute a shell command. Use this to run system commands, scripts, and programs. \
         Commands are sandboxed to the workspace directory."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "command": {
                    "type": "string",
                    "description": "The shell command to execute"
                }
            },
            "required": ["command"]
        })
    }

    async fn execute(&self, args: Value) -> anyhow::Result<ToolResult> {
        let Some(command) = args["command"].as_str().filter(|c| !c.is_empty()) else {
            return Ok(ToolResult::error("command is required"));
        };

        if self.sandbox_enabled {
            if let Some(reason) = self.guard_command(command) {
                return Ok(ToolResult::error(format!(
                    "command blocked by sandbox: {}",
                    reason
                )));
            }
        }

        let mut cmd = tokio::process::Command::new("sh");
        cmd.arg("-c").arg(command);
        if !self.workspace_dir.as_os_str().is_empty() {
            cmd.current_dir(&self.workspace_dir);
        }
        cmd.kill_on_drop(true);

        let output = match tokio::time::timeout(
            Duration::from_secs(self.timeout_secs),
            cmd.output(),
        )
        .await
        {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                return Ok(ToolResult::error(format!(
                    "failed to run command: {}",
                    e
                )))
            }
            Err(_) => {
                return Ok(ToolResult::error(format!(
                    "command timed out after {} seconds",
                    self.timeout_secs
                )))
            }
        };

        let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
        combined.push_str(&String::from_utf8_lossy(&output.stderr));
        let result = truncate_output(&combined, self.max_output_chars, "\n... (output truncated)");

        if output.status.success() {
            Ok(ToolResult::ok(result))
        } else {
            Ok(ToolResult::failed(
                result,
                format!("exit status: {}", output.status),
            ))
        }
    }
}
