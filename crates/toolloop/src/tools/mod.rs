//! Tool trait, closure tools, and the name-keyed registry.

pub mod registry;

pub use registry::{
    DEFAULT_MAX_RESULT_BYTES, FnTool, Tool, ToolFuture, ToolRegistry,
    parse_input, truncate_result, validate_input,
};
