//! Filesystem actions: create, write and read files under a workspace root.
//!
//! None of these delete anything.

use async_trait::async_trait;
use serde_json::{Value, json};
use std::path::{Path, PathBuf};
use taskloop_core::action::{Action, ActionOutput};
use taskloop_core::context::Context;
use taskloop_core::error::ActionError;
use tokio::io::AsyncWriteExt;

use crate::{required_str, text_arg};

/// The directory relative paths resolve against.
#[derive(Debug, Clone)]
pub struct Workspace {
    root: PathBuf,
}

impl Workspace {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Absolute paths are used as given.
    pub fn resolve(&self, path: &str) -> PathBuf {
        let p = Path::new(path);
        if p.is_absolute() {
            p.to_path_buf()
        } else {
            self.root.join(p)
        }
    }
}

fn path_schema(extra: Option<(&str, &str)>) -> Value {
    let mut schema = json!({
        "type": "object",
        "properties": {
            "path": { "type": "string", "description": "Path relative to the workspace root" }
        },
        "required": ["path"]
    });
    if let Some((key, description)) = extra {
        schema["properties"][key] = json!({ "type": "string", "description": description });
        schema["required"] = json!(["path", key]);
    }
    schema
}

pub struct MkdirAction {
    workspace: Workspace,
}

impl MkdirAction {
    pub fn new(workspace: Workspace) -> Self {
        Self { workspace }
    }
}

#[async_trait]
impl Action for MkdirAction {
    fn name(&self) -> &str {
        "mkdir"
    }

    fn description(&self) -> &str {
        "Create a directory (and any missing parents)."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "folder": { "type": "string", "description": "Directory to create" }
            },
            "required": ["folder"]
        })
    }

    async fn execute(&self, arguments: Value, _context: &Context) -> Result<ActionOutput, ActionError> {
        let folder = required_str(&arguments, &["folder", "path"])?;
        let target = self.workspace.resolve(folder);

        tokio::fs::create_dir_all(&target)
            .await
            .map_err(|e| ActionError::failed(self.name(), format!("{}: {e}", target.display())))?;

        Ok(ActionOutput::text(format!("Created directory: {folder}")))
    }
}

pub struct TouchAction {
    workspace: Workspace,
}

impl TouchAction {
    pub fn new(workspace: Workspace) -> Self {
        Self { workspace }
    }
}

#[async_trait]
impl Action for TouchAction {
    fn name(&self) -> &str {
        "touch"
    }

    fn description(&self) -> &str {
        "Create an empty file, truncating it if it already exists."
    }

    fn parameters_schema(&self) -> Value {
        path_schema(None)
    }

    async fn execute(&self, arguments: Value, _context: &Context) -> Result<ActionOutput, ActionError> {
        let path = required_str(&arguments, &["path", "filename"])?;
        let target = self.workspace.resolve(path);

        tokio::fs::write(&target, b"")
            .await
            .map_err(|e| ActionError::failed(self.name(), format!("{}: {e}", target.display())))?;

        Ok(ActionOutput::text(format!("Created file: {path}")))
    }
}

pub struct WriteFileAction {
    workspace: Workspace,
}

impl WriteFileAction {
    pub fn new(workspace: Workspace) -> Self {
        Self { workspace }
    }
}

#[async_trait]
impl Action for WriteFileAction {
    fn name(&self) -> &str {
        "write_file"
    }

    fn description(&self) -> &str {
        "Write contents to a file, replacing anything already there."
    }

    fn parameters_schema(&self) -> Value {
        path_schema(Some(("contents", "Text to write")))
    }

    async fn execute(&self, arguments: Value, _context: &Context) -> Result<ActionOutput, ActionError> {
        let path = required_str(&arguments, &["path", "filename"])?;
        let contents = text_arg(&arguments, "contents")
            .ok_or_else(|| ActionError::InvalidArguments("Missing 'contents' argument".into()))?;
        let target = self.workspace.resolve(path);

        if let Some(parent) = target.parent()
            && let Err(e) = tokio::fs::create_dir_all(parent).await
        {
            return Err(ActionError::failed(self.name(), format!("Failed to create directory: {e}")));
        }

        tokio::fs::write(&target, contents.as_bytes())
            .await
            .map_err(|e| ActionError::failed(self.name(), format!("{}: {e}", target.display())))?;

        Ok(ActionOutput::text(format!("Wrote {} bytes to file: {path}", contents.len())))
    }
}

pub struct AppendFileAction {
    workspace: Workspace,
}

impl AppendFileAction {
    pub fn new(workspace: Workspace) -> Self {
        Self { workspace }
    }
}

#[async_trait]
impl Action for AppendFileAction {
    fn name(&self) -> &str {
        "append_file"
    }

    fn description(&self) -> &str {
        "Append contents to the end of a file, creating it if needed."
    }

    fn parameters_schema(&self) -> Value {
        path_schema(Some(("contents", "Text to append")))
    }

    async fn execute(&self, arguments: Value, _context: &Context) -> Result<ActionOutput, ActionError> {
        let path = required_str(&arguments, &["path", "filename"])?;
        let contents = text_arg(&arguments, "contents")
            .ok_or_else(|| ActionError::InvalidArguments("Missing 'contents' argument".into()))?;
        let target = self.workspace.resolve(path);

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&target)
            .await
            .map_err(|e| ActionError::failed(self.name(), format!("{}: {e}", target.display())))?;
        file.write_all(contents.as_bytes())
            .await
            .map_err(|e| ActionError::failed(self.name(), e))?;
        file.flush().await.map_err(|e| ActionError::failed(self.name(), e))?;

        Ok(ActionOutput::text(format!("Appended to file: {path}")))
    }
}

pub struct ReadFileAction {
    workspace: Workspace,
}

impl ReadFileAction {
    pub fn new(workspace: Workspace) -> Self {
        Self { workspace }
    }
}

#[async_trait]
impl Action for ReadFileAction {
    fn name(&self) -> &str {
        "read_file"
    }

    fn description(&self) -> &str {
        "Read the contents of a text file."
    }

    fn parameters_schema(&self) -> Value {
        path_schema(None)
    }

    async fn execute(&self, arguments: Value, _context: &Context) -> Result<ActionOutput, ActionError> {
        let path = required_str(&arguments, &["path", "filename"])?;
        let target = self.workspace.resolve(path);

        let contents = tokio::fs::read_to_string(&target)
            .await
            .map_err(|e| ActionError::failed(self.name(), format!("{}: {e}", target.display())))?;

        Ok(ActionOutput::Text(contents))
    }
}

pub struct ListDirAction {
    workspace: Workspace,
}

impl ListDirAction {
    pub fn new(workspace: Workspace) -> Self {
        Self { workspace }
    }
}

#[async_trait]
impl Action for ListDirAction {
    fn name(&self) -> &str {
        "list_dir"
    }

    fn description(&self) -> &str {
        "List the entries of a directory (sorted by name)."
    }

    fn parameters_schema(&self) -> Value {
        path_schema(None)
    }

    async fn execute(&self, arguments: Value, _context: &Context) -> Result<ActionOutput, ActionError> {
        let path = arguments.get("path").and_then(Value::as_str).unwrap_or(".");
        let target = self.workspace.resolve(path);

        let mut reader = tokio::fs::read_dir(&target)
            .await
            .map_err(|e| ActionError::failed(self.name(), format!("{}: {e}", target.display())))?;

        let mut names = Vec::new();
        while let Some(entry) = reader
            .next_entry()
            .await
            .map_err(|e| ActionError::failed(self.name(), e))?
        {
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
        names.sort();

        Ok(ActionOutput::Value(json!(names)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ws(dir: &tempfile::TempDir) -> Workspace {
        Workspace::new(dir.path())
    }

    #[test]
    fn workspace_resolves_relative_paths() {
        let ws = Workspace::new("/srv/run");
        assert_eq!(ws.resolve("out/a.txt"), PathBuf::from("/srv/run/out/a.txt"));
        assert_eq!(ws.resolve("/tmp/x"), PathBuf::from("/tmp/x"));
    }

    #[tokio::test]
    async fn mkdir_creates_nested_directory() {
        let dir = tempfile::tempdir().unwrap();
        let action = MkdirAction::new(ws(&dir));
        let out = action
            .execute(json!({"folder": "out/nested"}), &Context::new())
            .await
            .unwrap();
        assert_eq!(out, ActionOutput::text("Created directory: out/nested"));
        assert!(dir.path().join("out/nested").is_dir());
    }

    #[tokio::test]
    async fn mkdir_requires_folder() {
        let dir = tempfile::tempdir().unwrap();
        let err = MkdirAction::new(ws(&dir))
            .execute(json!({}), &Context::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ActionError::InvalidArguments(_)));
    }

    #[tokio::test]
    async fn write_append_read_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = Context::new();

        WriteFileAction::new(ws(&dir))
            .execute(json!({"path": "notes/a.txt", "contents": "hello"}), &ctx)
            .await
            .unwrap();
        AppendFileAction::new(ws(&dir))
            .execute(json!({"path": "notes/a.txt", "contents": ", world"}), &ctx)
            .await
            .unwrap();
        let out = ReadFileAction::new(ws(&dir))
            .execute(json!({"path": "notes/a.txt"}), &ctx)
            .await
            .unwrap();

        assert_eq!(out, ActionOutput::text("hello, world"));
    }

    #[tokio::test]
    async fn touch_truncates() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("f"), "old").unwrap();
        TouchAction::new(ws(&dir))
            .execute(json!({"path": "f"}), &Context::new())
            .await
            .unwrap();
        assert_eq!(std::fs::read_to_string(dir.path().join("f")).unwrap(), "");
    }

    #[tokio::test]
    async fn read_missing_file_fails() {
        let dir = tempfile::tempdir().unwrap();
        let err = ReadFileAction::new(ws(&dir))
            .execute(json!({"path": "nope.txt"}), &Context::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ActionError::ExecutionFailed { action_name, .. } if action_name == "read_file"));
    }

    #[tokio::test]
    async fn list_dir_is_sorted_value() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("b.txt"), "").unwrap();
        std::fs::write(dir.path().join("a.txt"), "").unwrap();
        let out = ListDirAction::new(ws(&dir))
            .execute(json!({}), &Context::new())
            .await
            .unwrap();
        assert_eq!(out, ActionOutput::Value(json!(["a.txt", "b.txt"])));
    }

    #[tokio::test]
    async fn write_accepts_structured_contents() {
        let dir = tempfile::tempdir().unwrap();
        WriteFileAction::new(ws(&dir))
            .execute(json!({"path": "data.json", "contents": {"k": [1, 2]}}), &Context::new())
            .await
            .unwrap();
        let written = std::fs::read_to_string(dir.path().join("data.json")).unwrap();
        assert_eq!(written, r#"{"k":[1,2]}"#);
    }
}
