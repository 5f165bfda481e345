use crate::tools::{truncate_output, Tool, ToolResult};
use anyhow::bail;
use async_trait::async_trait;
use serde_json::{json, Value};
use std::path::{Component, Path, PathBuf};

/// Maximum characters returned by a read before truncation.
const MAX_READ_CHARS: usize = 50_000;

/// Workspace-rooted file operations. Every accepted path resolves
/// inside the workspace; the parent directory's real path (symlinks
/// followed) must stay inside it too.
pub struct FilesystemTool {
    workspace_dir: PathBuf,
}

impl FilesystemTool {
    pub fn new(workspace_dir: PathBuf) -> Self {
        Self { workspace_dir }
    }

    fn resolve_path(&self, rel_path: &str) -> anyhow::Result<PathBuf> {
        if self.workspace_dir.as_os_str().is_empty() {
            bail!("workspace directory not configured");
        }

        if rel_path.contains("..") {
            bail!("path traversal not allowed");
        }

        let full_path = lexical_normalize(&self.workspace_dir.join(rel_path));

        let abs_workspace = absolute(&self.workspace_dir);
        if !absolute(&full_path).starts_with(&abs_workspace) {
            bail!("path outside workspace");
        }

        // A symlinked parent can point anywhere; resolve it and check
        // containment against the workspace's own real path.
        if let Some(parent) = full_path.parent() {
            if let Ok(real_parent) = parent.canonicalize() {
                let real_workspace = self
                    .workspace_dir
                    .canonicalize()
                    .unwrap_or_else(|_| abs_workspace.clone());
                if !real_parent.starts_with(&real_workspace) {
                    bail!("symlink escapes workspace");
                }
            }
        }

        Ok(full_path)
    }

    fn read_file(&self, path: &Path) -> ToolResult {
        match std::fs::read_to_string(path) {
            Ok(content) => ToolResult::ok(truncate_output(
                &content,
                MAX_READ_CHARS,
                "\n... (file truncated)",
            )),
            Err(e) => ToolResult::error(format!("failed to read file: {}", e)),
        }
    }

    fn write_file(&self, path: &Path, content: &str) -> ToolResult {
        if let Some(parent) = path.parent() {
            if let Err(e) = std::fs::create_dir_all(parent) {
                return ToolResult::error(format!("failed to create directory: {}", e));
            }
        }

        match write_private(path, content) {
            Ok(()) => ToolResult::ok(format!(
                "File written: {} ({} bytes)",
                path.display(),
                content.len()
            )),
            Err(e) => ToolResult::error(format!("failed to write file: {}", e)),
        }
    }

    fn list_dir(&self, path: &Path) -> ToolResult {
        let entries = match std::fs::read_dir(path) {
            Ok(rd) => rd,
            Err(e) => return ToolResult::error(format!("failed to list directory: {}", e)),
        };

        let mut lines: Vec<String> = Vec::new();
        for entry in entries.flatten() {
            let prefix = if entry.path().is_dir() { "d " } else { "  " };
            lines.push(format!("{}{}", prefix, entry.file_name().to_string_lossy()));
        }
        lines.sort_by(|a, b| a[2..].cmp(&b[2..]));
        ToolResult::ok(lines.join("\n"))
    }
}

/// Resolve `.` and `..` components without touching the filesystem.
fn lexical_normalize(path: &Path) -> PathBuf {
    let mut components: Vec<Component> = Vec::new();
    for component in path.components() {
        match component {
            Component::ParentDir => {
                if matches!(components.last(), Some(Component::Normal(_))) {
                    components.pop();
                }
            }
            Component::CurDir => {}
            other => components.push(other),
        }
    }
    components.iter().collect()
}

fn absolute(path: &Path) -> PathBuf {
    if path.is_absolute() {
        lexical_normalize(path)
    } else {
        let base = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
        lexical_normalize(&base.join(path))
    }
}

/// Write with owner-only permissions (0600).
fn write_private(path: &Path, content: &str) -> std::io::Result<()> {
    use std::io::Write;
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        let mut file = std::fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(0o600)
            .open(path)?;
        file.write_all(content.as_bytes())
    }
    #[cfg(not(unix))]
    {
        std::fs::write(path, content)
    }
}

#[async_trait]
impl Tool for FilesystemTool {
    fn name(&self) -> &str {
        "filesystem"
    }

    fn description(&self) -> &str {
        "Read or write files within the workspace directory. Use action 'read' to read a file, \
         'write' to create/overwrite a file, 'list' to list directory contents."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "action": {
                    "type": "string",
                    "enum": ["read", "write", "list"],
                    "description": "The file operation to perform"
                },
                "path": {
                    "type": "string",
                    "description": "Relative path within workspace"
                },
                "content": {
                    "type": "string",
                    "description": "Content to write (only for 'write' action)"
                }
            },
            "required": ["action", "path"]
        })
    }

    async fn execute(&self, args: Value) -> anyhow::Result<ToolResult> {
        let action = args["action"].as_str().unwrap_or_default();
        let path = args["path"].as_str().unwrap_or_default();

        let full_path = match self.resolve_path(path) {
            Ok(p) => p,
            Err(e) => return Ok(ToolResult::error(e.to_string())),
        };

        match action {
            "read" => Ok(self.read_file(&full_path)),
            "write" => {
                let content = args["content"].as_str().unwrap_or_default();
                Ok(self.write_file(&full_path, content))
            }
            "list" => Ok(self.list_dir(&full_path)),
            other => Ok(ToolResult::error(format!("unknown action: {}", other))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tool_in(dir: &Path) -> FilesystemTool {
        FilesystemTool::new(dir.to_path_buf())
    }

    #[tokio::test]
    async fn write_then_read_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let tool = tool_in(dir.path());

        let written = tool
            .execute(json!({"action": "write", "path": "notes/a.txt", "content": "hello"}))
            .await
            .unwrap();
        assert!(!written.is_error, "{}", written.error);
        assert!(written.output.starts_with("File written:"));
        assert!(written.output.contains("(5 bytes)"));

        let read = tool
            .execute(json!({"action": "read", "path": "notes/a.txt"}))
            .await
            .unwrap();
        assert_eq!(read.output, "hello");
    }

    #[tokio::test]
    async fn list_marks_directories() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), "x").unwrap();
        std::fs::create_dir(dir.path().join("sub")).unwrap();

        let tool = tool_in(dir.path());
        let result = tool
            .execute(json!({"action": "list", "path": "."}))
            .await
            .unwrap();
        assert_eq!(result.output, "  a.txt\nd sub");
    }

    #[tokio::test]
    async fn rejects_dotdot() {
        let dir = tempfile::tempdir().unwrap();
        let tool = tool_in(dir.path());
        let result = tool
            .execute(json!({"action": "read", "path": "../outside.txt"}))
            .await
            .unwrap();
        assert!(result.is_error);
        assert!(result.error.contains("path traversal"));
    }

    #[tokio::test]
    async fn rejects_empty_workspace() {
        let tool = FilesystemTool::new(PathBuf::new());
        let result = tool
            .execute(json!({"action": "read", "path": "a.txt"}))
            .await
            .unwrap();
        assert!(result.is_error);
        assert!(result.error.contains("not configured"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn rejects_symlink_escape() {
        let outside = tempfile::tempdir().unwrap();
        let dir = tempfile::tempdir().unwrap();
        std::os::unix::fs::symlink(outside.path(), dir.path().join("escape")).unwrap();

        let tool = tool_in(dir.path());
        let result = tool
            .execute(json!({"action": "write", "path": "escape/pwned.txt", "content": "x"}))
            .await
            .unwrap();
        assert!(result.is_error);
        assert!(result.error.contains("symlink escapes workspace"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn written_files_are_owner_only() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempfile::tempdir().unwrap();
        let tool = tool_in(dir.path());
        tool.execute(json!({"action": "write", "path": "secret.txt", "content": "x"}))
            .await
            .unwrap();

        let mode = std::fs::metadata(dir.path().join("secret.txt"))
            .unwrap()
            .permissions()
            .mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[tokio::test]
    async fn read_truncates_large_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("big.txt"), "x".repeat(MAX_READ_CHARS + 10)).unwrap();

        let tool = tool_in(dir.path());
        let result = tool
            .execute(json!({"action": "read", "path": "big.txt"}))
            .await
            .unwrap();
        assert!(result.output.ends_with("... (file truncated)"));
    }

    #[tokio::test]
    async fn unknown_action_is_domain_error() {
        let dir = tempfile::tempdir().unwrap();
        let tool = tool_in(dir.path());
        let result = tool
            .execute(json!({"action": "delete", "path": "a.txt"}))
            .await
            .unwrap();
        assert!(result.is_error);
        assert!(result.error.contains("unknown action"));
    }
}
