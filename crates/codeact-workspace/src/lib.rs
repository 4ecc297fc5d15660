//! Workspace utilities: path restriction under the per-user root, unified
//! diff generation and fuzzy application, anchor-based code block
//! replacement, the Python interactive-input guardrail, and the file
//! listing used in prompts.

pub mod diff;
pub mod guardrail;
pub mod listing;
pub mod paths;
pub mod replace;

pub use diff::{apply_unified_diff, generate_unified_diff, DiffError};
pub use guardrail::{check_python_interactive, GuardrailViolation};
pub use listing::list_files;
pub use paths::{PathError, UserWorkspace};
pub use replace::{replace_code_block, ReplaceError, Replacement};
