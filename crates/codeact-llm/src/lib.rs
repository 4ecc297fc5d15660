//! Streaming LLM client.
//!
//! Speaks OpenAI-compatible chat completions with `stream: true`, decoding
//! the response as server-sent messages split on a configurable delimiter.
//! Built to tolerate non-standard servers: unparseable payloads are
//! buffered rather than treated as terminators, and stream teardown flushes
//! whatever accumulated instead of raising.

pub mod client;
pub mod errors;
pub mod mock;
pub mod options;
pub mod sse;

pub use client::{ChatCompletion, ChatMessage, LlmClient, LlmConfig, TokenSink};
pub use errors::LlmError;
pub use mock::MockChat;
pub use options::ChatOptions;
