//! The agent control loop: drives the model through prompt → parse →
//! execute → reflect iterations until the task finishes, with retry
//! classification, anti-loop handling, and build/code-correction mode
//! switching.

pub mod agent;
pub mod context;
pub mod prompt;
pub mod reflect;
pub mod retry;

pub use agent::{Agent, EngineError, TaskOutcome};
pub use context::{FinishStatus, PromptMode, TaskContext};
pub use prompt::PromptBuilder;
pub use reflect::{Reflection, Reflector, RuleReflector};
