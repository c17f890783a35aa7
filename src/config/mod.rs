//! Configuration module for Parley.
//!
//! Handles loading and managing application settings and prompt templates.

mod prompts;
mod settings;

pub use prompts::{ConsultationPrompts, Prompts, VivaPrompts};
pub use settings::{
    AgentSettings, ConsultationSettings, ExamSettings, LlmSettings, PromptSettings,
    ServerSettings, Settings,
};
