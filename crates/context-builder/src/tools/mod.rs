//! Tools for building a codebase context.
//!
//! | Name | Tool |
//! |------|------|
//! | `list_files` | [`ListFiles`] |
//! | `read_file` | [`ReadFile`] |
//! | `determine_relevance` | [`DetermineRelevance`] |
//! | `add_to_context` | [`AddToContext`] |
//! | `view_context` | [`ViewContext`] |

pub mod context;
pub mod files;
pub mod relevance;

use std::path::PathBuf;

use toolloop::tools::ToolRegistry;

pub use context::{AddToContext, ViewContext};
pub use files::{ListFiles, ReadFile};
pub use relevance::DetermineRelevance;

// ── Tool name constants ─────────────────────────────────────────────

pub const LIST_FILES: &str = "list_files";
pub const READ_FILE: &str = "read_file";
pub const DETERMINE_RELEVANCE: &str = "determine_relevance";
pub const ADD_TO_CONTEXT: &str = "add_to_context";
pub const VIEW_CONTEXT: &str = "view_context";

// ── Extension trait ─────────────────────────────────────────────────

/// Registers the filesystem and context tools on a [`ToolRegistry`].
///
/// `determine_relevance` needs a model service and is registered
/// separately.
///
/// ```ignore
/// let tools = ToolRegistry::new()
///     .with_context_tools(&workdir, context.clone())
///     .with(DetermineRelevance::new(&workdir, service, model, context));
/// ```
pub trait ContextToolsExt {
    fn with_context_tools(self, workdir: impl Into<PathBuf>, context: crate::ContextSet) -> Self;
}

impl ContextToolsExt for ToolRegistry {
    fn with_context_tools(self, workdir: impl Into<PathBuf>, context: crate::ContextSet) -> Self {
        let wd = workdir.into();
        self.with(ListFiles::new(wd.clone()))
            .with(ReadFile::new(wd.clone()))
            .with(AddToContext::new(wd, context.clone()))
            .with(ViewContext::new(context))
    }
}
