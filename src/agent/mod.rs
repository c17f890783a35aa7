//! Agent system for tool-calling conversations.
//!
//! Provides an LLM agent loop plus the parsing layer around it: repairing the
//! tool arguments a model produces and stripping reasoning scaffolding from
//! what it says.

mod normalize;
mod runner;
mod sanitize;
mod tools;

pub use normalize::{
    normalize, normalize_text, ExamContext, PatientContext, ToolDefaults, ToolRequest,
};
pub use runner::{Agent, AgentResponse, ToolCallRecord, STOPPED_MESSAGE};
pub use sanitize::{parse_trace, sanitize, truncate_at_sentence, SanitizeOptions, TraceStep};
pub use tools::{failure_message, tool_listing, tool_names, ToolKind, Toolkit};
