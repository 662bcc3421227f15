//! Multi-Agent Market Analysis Orchestrator
//!
//! A crypto analysis pipeline that:
//! - Coordinates three specialized sub-agents (news, technical, quant)
//! - Drives them from an LLM reasoning loop with bounded iterations
//! - Validates and clamps every output against a fixed schema
//! - Degrades to safe defaults instead of failing
//! - Streams progress events over WebSocket while analysis runs
//!
//! SESSION LIFECYCLE:
//! PLANNING → ITERATING → SYNTHESIZING → DONE | FAILED

pub mod agents;
pub mod api;
pub mod config;
pub mod data;
pub mod error;
pub mod llm;
pub mod models;
pub mod orchestrator;
pub mod progress;
pub mod synthesis;
pub mod tools;

pub use error::{AgentError, Result};

// Re-export common types
pub use models::*;
pub use orchestrator::Orchestrator;
pub use progress::{ProgressEvent, ProgressKind};
