//! Filesystem tools: read, list, write, delete

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use std::path::Path;
use tracing::{debug, info};

use arbor_core::{ArborError, Result};

use crate::path::{resolve, PathAccess};
use crate::tool::{parse_input, truncate, Tool, ToolContext, ToolOutput};

const MAX_READ_BYTES: usize = 100_000;
const MAX_LIST_ENTRIES: usize = 500;

/// Directories never worth listing
const SKIP_DIRS: &[&str] = &[".git", ".arbor", "target", "node_modules"];

fn io_error(tool: &str, path: &str, e: std::io::Error) -> ArborError {
    ArborError::ToolExecution {
        tool: tool.to_string(),
        message: format!("{}: {}", path, e),
    }
}

pub struct ReadFileTool;

#[derive(Deserialize)]
struct ReadArgs {
    path: String,
    #[serde(default)]
    max_bytes: Option<usize>,
}

#[async_trait]
impl Tool for ReadFileTool {
    fn name(&self) -> &str {
        "read_file"
    }

    fn description(&self) -> &str {
        "Read a text file relative to the working directory."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": {"type": "string", "description": "Relative file path"},
                "max_bytes": {"type": "integer", "description": "Truncate after this many bytes"}
            },
            "required": ["path"]
        })
    }

    fn read_only(&self) -> bool {
        true
    }

    async fn execute(&self, input: &Value, ctx: &ToolContext) -> Result<ToolOutput> {
        let args: ReadArgs = parse_input(self.name(), input)?;
        let (full, shown) = resolve(ctx, &args.path, PathAccess::Read)?;

        let content = tokio::fs::read_to_string(&full)
            .await
            .map_err(|e| io_error(self.name(), &shown, e))?;

        let max = args.max_bytes.unwrap_or(MAX_READ_BYTES).min(MAX_READ_BYTES);
        Ok(ToolOutput::text(truncate(&content, max)))
    }
}

pub struct ListFilesTool;

#[derive(Deserialize)]
struct ListArgs {
    #[serde(default)]
    path: Option<String>,
    #[serde(default)]
    recursive: bool,
}

#[async_trait]
impl Tool for ListFilesTool {
    fn name(&self) -> &str {
        "list_files"
    }

    fn description(&self) -> &str {
        "List files in a directory relative to the working directory. Directories end with '/'."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": {"type": "string", "description": "Relative directory, defaults to '.'"},
                "recursive": {"type": "boolean", "description": "Descend into subdirectories"}
            }
        })
    }

    fn read_only(&self) -> bool {
        true
    }

    async fn execute(&self, input: &Value, ctx: &ToolContext) -> Result<ToolOutput> {
        let args: ListArgs = parse_input(self.name(), input)?;
        let root = match args.path.as_deref() {
            None | Some("") | Some(".") => ctx.working_directory.clone(),
            Some(path) => resolve(ctx, path, PathAccess::Read)?.0,
        };

        let mut entries = Vec::new();
        let mut pending = vec![root.clone()];
        while let Some(dir) = pending.pop() {
            let mut reader = tokio::fs::read_dir(&dir)
                .await
                .map_err(|e| io_error(self.name(), &dir.display().to_string(), e))?;

            while let Some(entry) = reader.next_entry().await? {
                let name = entry.file_name().to_string_lossy().to_string();
                let is_dir = entry.file_type().await?.is_dir();
                if is_dir && SKIP_DIRS.contains(&name.as_str()) {
                    continue;
                }
                let rel = relative_display(&root, &entry.path());
                if is_dir {
                    entries.push(format!("{}/", rel));
                    if args.recursive {
                        pending.push(entry.path());
                    }
                } else {
                    entries.push(rel);
                }
            }
            if entries.len() >= MAX_LIST_ENTRIES {
                break;
            }
        }

        entries.sort();
        let total = entries.len();
        entries.truncate(MAX_LIST_ENTRIES);
        let mut content = entries.join("\n");
        if total > MAX_LIST_ENTRIES {
            content.push_str(&format!("\n...[{} more entries]", total - MAX_LIST_ENTRIES));
        }
        if content.is_empty() {
            content = "(empty directory)".to_string();
        }

        Ok(ToolOutput::text(content).with_data(json!({ "count": total })))
    }
}

fn relative_display(root: &Path, path: &Path) -> String {
    path.strip_prefix(root)
        .unwrap_or(path)
        .to_string_lossy()
        .to_string()
}

pub struct WriteFileTool;

#[derive(Deserialize)]
struct WriteArgs {
    path: String,
    content: String,
}

#[async_trait]
impl Tool for WriteFileTool {
    fn name(&self) -> &str {
        "write_file"
    }

    fn description(&self) -> &str {
        "Create or overwrite a file relative to the working directory. Parent directories are created."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": {"type": "string", "description": "Relative file path"},
                "content": {"type": "string", "description": "Full file contents"}
            },
            "required": ["path", "content"]
        })
    }

    async fn execute(&self, input: &Value, ctx: &ToolContext) -> Result<ToolOutput> {
        let args: WriteArgs = parse_input(self.name(), input)?;
        let (full, shown) = resolve(ctx, &args.path, PathAccess::Write)?;
        let existed = tokio::fs::try_exists(&full).await.unwrap_or(false);

        if ctx.dry_run {
            info!(path = %shown, bytes = args.content.len(), "[dry-run] would write file");
            return Ok(ToolOutput::text(format!(
                "[dry-run] would write {} bytes to {}",
                args.content.len(),
                shown
            )));
        }

        if let Some(parent) = full.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| io_error(self.name(), &shown, e))?;
        }
        tokio::fs::write(&full, &args.content)
            .await
            .map_err(|e| io_error(self.name(), &shown, e))?;

        debug!(path = %shown, created = !existed, "Wrote file");

        let output = ToolOutput::text(format!(
            "{} {} ({} bytes)",
            if existed { "Modified" } else { "Created" },
            shown,
            args.content.len()
        ));
        Ok(if existed {
            output.modified(shown)
        } else {
            output.created(shown)
        })
    }
}

pub struct DeleteFileTool;

#[derive(Deserialize)]
struct DeleteArgs {
    path: String,
}

#[async_trait]
impl Tool for DeleteFileTool {
    fn name(&self) -> &str {
        "delete_file"
    }

    fn description(&self) -> &str {
        "Delete a file relative to the working directory."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": {"type": "string", "description": "Relative file path"}
            },
            "required": ["path"]
        })
    }

    async fn execute(&self, input: &Value, ctx: &ToolContext) -> Result<ToolOutput> {
        let args: DeleteArgs = parse_input(self.name(), input)?;
        let (full, shown) = resolve(ctx, &args.path, PathAccess::Write)?;

        let metadata = tokio::fs::metadata(&full)
            .await
            .map_err(|e| io_error(self.name(), &shown, e))?;
        if metadata.is_dir() {
            return Err(ArborError::InvalidInput(format!(
                "{} is a directory; delete_file only removes files",
                shown
            )));
        }

        if ctx.dry_run {
            info!(path = %shown, "[dry-run] would delete file");
            return Ok(ToolOutput::text(format!("[dry-run] would delete {}", shown)));
        }

        tokio::fs::remove_file(&full)
            .await
            .map_err(|e| io_error(self.name(), &shown, e))?;

        Ok(ToolOutput::text(format!("Deleted {}", shown)).deleted(shown))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arbor_core::AgentId;
    use tempfile::TempDir;

    fn ctx(dir: &TempDir) -> ToolContext {
        ToolContext::new(AgentId::new(), dir.path())
    }

    #[tokio::test]
    async fn test_write_then_modify_tracks_files() {
        let dir = TempDir::new().unwrap();
        let ctx = ctx(&dir);

        let out = WriteFileTool
            .execute(&json!({"path": "src/a.rs", "content": "fn a() {}"}), &ctx)
            .await
            .unwrap();
        assert_eq!(out.files_created, vec!["src/a.rs"]);

        let out = WriteFileTool
            .execute(&json!({"path": "src/a.rs", "content": "fn b() {}"}), &ctx)
            .await
            .unwrap();
        assert_eq!(out.files_modified, vec!["src/a.rs"]);

        let read = ReadFileTool
            .execute(&json!({"path": "src/a.rs"}), &ctx)
            .await
            .unwrap();
        assert_eq!(read.content, "fn b() {}");
    }

    #[tokio::test]
    async fn test_dry_run_writes_nothing() {
        let dir = TempDir::new().unwrap();
        let ctx = ctx(&dir).with_dry_run(true);

        let out = WriteFileTool
            .execute(&json!({"path": "x.txt", "content": "hi"}), &ctx)
            .await
            .unwrap();
        assert!(out.content.starts_with("[dry-run]"));
        assert!(out.files_created.is_empty());
        assert!(!dir.path().join("x.txt").exists());
    }

    #[tokio::test]
    async fn test_protected_write_rejected() {
        let dir = TempDir::new().unwrap();
        let err = WriteFileTool
            .execute(&json!({"path": ".env", "content": "SECRET=1"}), &ctx(&dir))
            .await
            .unwrap_err();
        assert!(matches!(err, ArborError::PathValidation(_)));
    }

    #[tokio::test]
    async fn test_list_and_delete() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join("src")).unwrap();
        std::fs::create_dir_all(dir.path().join(".git")).unwrap();
        std::fs::write(dir.path().join("src/lib.rs"), "").unwrap();
        std::fs::write(dir.path().join("README.md"), "").unwrap();
        let ctx = ctx(&dir);

        let flat = ListFilesTool.execute(&json!({}), &ctx).await.unwrap();
        assert_eq!(flat.content, "README.md\nsrc/");

        let deep = ListFilesTool
            .execute(&json!({"recursive": true}), &ctx)
            .await
            .unwrap();
        assert!(deep.content.contains("src/lib.rs"));
        assert!(!deep.content.contains(".git"));

        let out = DeleteFileTool
            .execute(&json!({"path": "README.md"}), &ctx)
            .await
            .unwrap();
        assert_eq!(out.files_deleted, vec!["README.md"]);
        assert!(!dir.path().join("README.md").exists());
    }

    #[tokio::test]
    async fn test_read_missing_file_is_tool_error() {
        let dir = TempDir::new().unwrap();
        let err = ReadFileTool
            .execute(&json!({"path": "nope.txt"}), &ctx(&dir))
            .await
            .unwrap_err();
        assert!(matches!(err, ArborError::ToolExecution { .. }));
    }
}
