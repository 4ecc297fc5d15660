//! Shared types for the codeact execution core: conversation messages,
//! canonical actions and results, branded ids, digest helpers, content
//! sanitization, and the configuration knobs every other crate reads.

pub mod action;
pub mod config;
pub mod hash;
pub mod ids;
pub mod message;
pub mod sanitize;
pub mod truncate;
