//! Tools that read and grow the [`ContextSet`] directly.

use std::path::PathBuf;

use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::{Value, json};
use tokio::fs;
use toolloop::tools::{Tool, ToolFuture, parse_input};
use toolloop::{ToolDescriptor, json_schema_for};

use super::files::normalize_path;
use crate::context::ContextSet;

/// Typed arguments for `add_to_context`.
#[derive(Deserialize, JsonSchema)]
pub struct AddToContextArgs {
    /// Workdir-relative files to add.
    pub paths: Vec<String>,
}

/// Add files the model has confirmed relevant itself.
pub struct AddToContext {
    workdir: PathBuf,
    context: ContextSet,
}

impl AddToContext {
    pub fn new(workdir: impl Into<PathBuf>, context: ContextSet) -> Self {
        Self {
            workdir: workdir.into(),
            context,
        }
    }
}

impl Tool for AddToContext {
    fn descriptor(&self) -> ToolDescriptor {
        ToolDescriptor::new(
            "add_to_context",
            "Add files to the context. Only existing files are accepted.",
            json_schema_for::<AddToContextArgs>(),
        )
    }

    fn execute(&self, input: Value) -> ToolFuture<'_> {
        Box::pin(async move {
            let args: AddToContextArgs = parse_input("add_to_context", input)?;
            let mut added = Vec::new();
            let mut present = Vec::new();
            let mut rejected = Vec::new();

            for path in args.paths {
                let key = match normalize_path(&path) {
                    Ok(key) => key,
                    Err(_) => {
                        rejected.push(path);
                        continue;
                    }
                };
                if !fs::metadata(self.workdir.join(&key))
                    .await
                    .is_ok_and(|m| m.is_file())
                {
                    rejected.push(path);
                } else if self.context.add(key.clone()) {
                    added.push(key);
                } else {
                    present.push(key);
                }
            }

            let mut out = format!(
                "Added {} file(s); context now holds {}.",
                added.len(),
                self.context.len()
            );
            if !present.is_empty() {
                out.push_str(&format!("\nAlready present: {}", present.join(", ")));
            }
            if !rejected.is_empty() {
                out.push_str(&format!("\nNot found (skipped): {}", rejected.join(", ")));
            }
            Ok(out)
        })
    }
}

/// Show the current selection.
pub struct ViewContext {
    context: ContextSet,
}

impl ViewContext {
    pub fn new(context: ContextSet) -> Self {
        Self { context }
    }
}

impl Tool for ViewContext {
    fn descriptor(&self) -> ToolDescriptor {
        ToolDescriptor::new(
            "view_context",
            "List the files currently in the context, in the order they were added.",
            json!({"type": "object", "properties": {}}),
        )
    }

    fn execute(&self, _input: Value) -> ToolFuture<'_> {
        Box::pin(async move {
            let paths = self.context.paths();
            if paths.is_empty() {
                return Ok("Context is empty.".to_string());
            }
            Ok(format!(
                "{} file(s) in context:\n{}",
                paths.len(),
                paths.join("\n")
            ))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn add_then_view() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.rs"), "").unwrap();
        std::fs::write(dir.path().join("b.rs"), "").unwrap();
        let context = ContextSet::new();
        let add = AddToContext::new(dir.path(), context.clone());
        let view = ViewContext::new(context.clone());

        assert_eq!(view.execute(json!({})).await.unwrap(), "Context is empty.");

        let out = add
            .execute(json!({"paths": ["b.rs", "a.rs", "b.rs", "nope.rs", "../x"]}))
            .await
            .unwrap();
        assert!(out.starts_with("Added 2 file(s); context now holds 2."));
        assert!(out.contains("Already present: b.rs"));
        assert!(out.contains("Not found (skipped): nope.rs, ../x"));

        assert_eq!(
            view.execute(json!({})).await.unwrap(),
            "2 file(s) in context:\nb.rs\na.rs"
        );
    }

    #[tokio::test]
    async fn spellings_of_one_file_share_a_slot() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("src")).unwrap();
        std::fs::write(dir.path().join("src/a.rs"), "").unwrap();
        let context = ContextSet::new();
        let add = AddToContext::new(dir.path(), context.clone());

        let out = add
            .execute(json!({"paths": ["./src/a.rs", "src/a.rs", "src/./a.rs", "."]}))
            .await
            .unwrap();
        assert!(out.starts_with("Added 1 file(s); context now holds 1."));
        assert!(out.contains("Already present: src/a.rs, src/a.rs"));
        assert!(out.contains("Not found (skipped): ."));
        assert_eq!(context.paths(), vec!["src/a.rs"]);
    }
}
