//! Runtime dispatcher: routes parsed actions to tool handlers, executing
//! them against the restricted workspace either locally or through the
//! sandbox HTTP runtime, and normalizes every failure into a structured,
//! never-empty result.

pub mod context;
pub mod dispatcher;
pub mod handler;
pub mod sandbox;
pub mod server;
pub mod terminal;
pub mod tools;

pub use context::{LlmCredential, RuntimeContext};
pub use dispatcher::{Dispatcher, UiEvent};
pub use handler::{ToolHandler, ToolRegistry};
pub use sandbox::SandboxClient;
pub use server::{serve_sandbox, SandboxServerConfig};
