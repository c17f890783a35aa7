//! Parley - LLM examiner and consultation agents
//!
//! Conversational agents that sit between a user and an OpenAI-compatible
//! chat model (Gemini by default).
//!
//! # Overview
//!
//! Parley provides:
//! - An oral-examination ("viva") agent that asks questions, assigns
//!   practical tasks and closes the interview after a question budget
//! - A doctor-consultation agent that answers patient messages and uploaded
//!   images in short, plain replies
//! - Per-session API key rotation, repair of malformed tool arguments and
//!   removal of reasoning scaffolding from model output
//! - An HTTP API and interactive terminal sessions
//!
//! # Architecture
//!
//! - `config` - Settings and prompt templates
//! - `credentials` - API key rotation
//! - `llm` - Chat model abstraction over the provider
//! - `agent` - Tool-calling loop, tool input normalizer, response sanitizer
//! - `session` - Transcripts and the session store
//! - `viva` - Examination agent
//! - `consultation` - Consultation agent
//! - `orchestrator` - Builds session agents from shared components
//!
//! # Example
//!
//! ```rust,no_run
//! use parley::config::Settings;
//! use parley::orchestrator::Orchestrator;
//! use parley::viva::ExamConfig;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let settings = Settings::load()?;
//!     let orchestrator = Orchestrator::new(settings)?;
//!
//!     let config = ExamConfig::new("Ada", "Operating Systems", &orchestrator.settings().exam);
//!     let mut examiner = orchestrator.examination(config)?;
//!
//!     println!("{}", examiner.start().await.message);
//!     let reply = examiner.process_message("A process owns its own address space.").await;
//!     println!("{}", reply.message);
//!
//!     Ok(())
//! }
//! ```

pub mod agent;
pub mod cli;
pub mod config;
pub mod consultation;
pub mod credentials;
pub mod error;
pub mod llm;
pub mod openai;
pub mod orchestrator;
pub mod session;
pub mod viva;

pub use error::{ParleyError, Result};
