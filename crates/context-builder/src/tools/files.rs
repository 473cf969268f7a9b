//! Filesystem tools rooted at a working directory.
//!
//! | Tool | Name | Purpose |
//! |------|------|---------|
//! | [`ListFiles`] | `list_files` | Recursive candidate listing |
//! | [`ReadFile`] | `read_file` | Read one file, truncated |
//!
//! Paths are always relative to the workdir. Absolute paths and `..`
//! components are rejected.

use std::path::{Component, Path, PathBuf};

use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::Value;
use tokio::fs;
use toolloop::tools::{DEFAULT_MAX_RESULT_BYTES, Tool, ToolFuture, parse_input, truncate_result};
use toolloop::{ToolDescriptor, ToolError, json_schema_for};
use tracing::debug;

/// Directory names never descended into.
pub const SKIPPED_DIRS: &[&str] = &[
    "target",
    "node_modules",
    "vendor",
    "dist",
    "build",
    "__pycache__",
    "venv",
];

/// Listing cap for `list_files`.
pub const DEFAULT_MAX_ENTRIES: usize = 2_000;

// ── Typed argument structs ─────────────────────────────────────────

/// Typed arguments for `list_files`.
#[derive(Deserialize, JsonSchema)]
pub struct ListFilesArgs {
    /// Directory relative to the workdir (default '.').
    #[serde(default)]
    pub path: Option<String>,
    /// Only list files with these extensions, without the dot (e.g. ["rs", "toml"]).
    #[serde(default)]
    pub extensions: Option<Vec<String>>,
}

/// Typed arguments for `read_file`.
#[derive(Deserialize, JsonSchema)]
pub struct ReadFileArgs {
    /// File path relative to the workdir (e.g. 'src/main.rs').
    pub path: String,
}

// ── Path helpers ───────────────────────────────────────────────────

fn checked_relative(relative: &str) -> Result<&Path, ToolError> {
    let rel = Path::new(relative);
    if rel
        .components()
        .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir))
    {
        return Err(ToolError::execution(format!(
            "path traversal not allowed: '{relative}'"
        )));
    }
    Ok(rel)
}

/// Join `relative` onto `workdir`, rejecting anything that could escape it.
pub fn resolve_path(workdir: &Path, relative: &str) -> Result<PathBuf, ToolError> {
    Ok(workdir.join(checked_relative(relative)?))
}

/// The key a file is known by: `/`-separated, without `.` components.
/// `src/a.rs`, `./src/a.rs` and `src/./a.rs` all map to `src/a.rs`.
pub fn normalize_path(relative: &str) -> Result<String, ToolError> {
    let key = to_slash(checked_relative(relative)?);
    if key.is_empty() {
        return Err(ToolError::execution(format!("'{relative}' does not name a file")));
    }
    Ok(key)
}

fn to_slash(rel: &Path) -> String {
    rel.components()
        .filter(|c| matches!(c, Component::Normal(_)))
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

fn matches_extension(path: &Path, extensions: &[String]) -> bool {
    if extensions.is_empty() {
        return true;
    }
    let Some(ext) = path.extension().and_then(|e| e.to_str()) else {
        return false;
    };
    extensions
        .iter()
        .any(|want| want.trim_start_matches('.').eq_ignore_ascii_case(ext))
}

/// Files under `start`, as sorted workdir-relative paths, skipping hidden
/// entries and [`SKIPPED_DIRS`]. The flag reports whether `max` cut the
/// list short.
pub async fn collect_files(
    workdir: &Path,
    start: &Path,
    extensions: &[String],
    max: usize,
) -> std::io::Result<(Vec<String>, bool)> {
    let mut stack = vec![start.to_path_buf()];
    let mut files = Vec::new();

    while let Some(dir) = stack.pop() {
        let mut entries = match fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if dir == start => return Err(e),
            Err(e) => {
                debug!("Skipping unreadable directory {}: {e}", dir.display());
                continue;
            }
        };

        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if name.starts_with('.') {
                continue;
            }
            let file_type = entry.file_type().await?;
            let path = entry.path();
            if file_type.is_dir() {
                if !SKIPPED_DIRS.contains(&&*name) {
                    stack.push(path);
                }
            } else if file_type.is_file()
                && matches_extension(&path, extensions)
                && let Ok(rel) = path.strip_prefix(workdir)
            {
                files.push(to_slash(rel));
            }
        }
    }

    files.sort();
    let truncated = files.len() > max;
    files.truncate(max);
    Ok((files, truncated))
}

// ── ListFiles ──────────────────────────────────────────────────────

/// Recursively list candidate files under the working directory.
pub struct ListFiles {
    workdir: PathBuf,
    max_entries: usize,
}

impl ListFiles {
    pub fn new(workdir: impl Into<PathBuf>) -> Self {
        Self {
            workdir: workdir.into(),
            max_entries: DEFAULT_MAX_ENTRIES,
        }
    }

    pub fn max_entries(mut self, max: usize) -> Self {
        self.max_entries = max;
        self
    }
}

impl Tool for ListFiles {
    fn descriptor(&self) -> ToolDescriptor {
        ToolDescriptor::new(
            "list_files",
            "List files under a directory of the codebase, recursively. Hidden entries and \
             build/vendor directories are skipped. Returns one workdir-relative path per line.",
            json_schema_for::<ListFilesArgs>(),
        )
    }

    fn execute(&self, input: Value) -> ToolFuture<'_> {
        Box::pin(async move {
            let args: ListFilesArgs = parse_input("list_files", input)?;
            let relative = args.path.as_deref().unwrap_or(".");
            let start = resolve_path(&self.workdir, relative)?;
            let extensions = args.extensions.unwrap_or_default();

            let (files, truncated) =
                collect_files(&self.workdir, &start, &extensions, self.max_entries)
                    .await
                    .map_err(|e| ToolError::execution(format!("Error listing '{relative}': {e}")))?;

            if files.is_empty() {
                return Ok(format!("No files found under '{relative}'."));
            }
            let mut out = files.join("\n");
            if truncated {
                out.push_str(&format!(
                    "\n[listing stopped at {} entries; narrow the path or extensions]",
                    self.max_entries
                ));
            }
            Ok(out)
        })
    }
}

// ── ReadFile ───────────────────────────────────────────────────────

/// Read one file under the working directory, truncated to
/// `max_result_bytes`.
pub struct ReadFile {
    workdir: PathBuf,
    max_result_bytes: usize,
}

impl ReadFile {
    pub fn new(workdir: impl Into<PathBuf>) -> Self {
        Self {
            workdir: workdir.into(),
            max_result_bytes: DEFAULT_MAX_RESULT_BYTES,
        }
    }

    pub fn max_result_bytes(mut self, max: usize) -> Self {
        self.max_result_bytes = max;
        self
    }
}

impl Tool for ReadFile {
    fn descriptor(&self) -> ToolDescriptor {
        ToolDescriptor::new(
            "read_file",
            "Read a file whose path you already know. Use list_files to discover paths.",
            json_schema_for::<ReadFileArgs>(),
        )
    }

    fn execute(&self, input: Value) -> ToolFuture<'_> {
        Box::pin(async move {
            let args: ReadFileArgs = parse_input("read_file", input)?;
            let full_path = resolve_path(&self.workdir, &args.path)?;

            if let Ok(meta) = fs::metadata(&full_path).await
                && meta.is_dir()
            {
                return Err(ToolError::execution(format!(
                    "'{}' is a directory, not a file. Use list_files to browse directories.",
                    args.path
                )));
            }

            let content = fs::read_to_string(&full_path)
                .await
                .map_err(|e| ToolError::execution(format!("Error reading '{}': {e}", args.path)))?;
            Ok(truncate_result(content, self.max_result_bytes))
        })
    }
}
