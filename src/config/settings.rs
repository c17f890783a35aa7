//! Configuration settings for Parley.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Root configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
#[derive(Default)]
pub struct Settings {
    pub llm: LlmSettings,
    pub agent: AgentSettings,
    pub exam: ExamSettings,
    pub consultation: ConsultationSettings,
    pub server: ServerSettings,
    pub prompts: PromptSettings,
}

/// LLM provider settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmSettings {
    /// Chat model name.
    pub model: String,
    /// Base URL of the OpenAI-compatible API.
    pub api_base: String,
    /// Sampling temperature.
    pub temperature: f32,
    /// HTTP timeout for a single provider call.
    pub timeout_seconds: u64,
    /// Environment variable holding the comma-separated API keys.
    pub credentials_env: String,
    /// Minimum seconds between non-forced key rotations.
    pub rotation_cooldown_seconds: u64,
}

impl Default for LlmSettings {
    fn default() -> Self {
        Self {
            model: "gemini-1.5-flash".to_string(),
            api_base: "https://generativelanguage.googleapis.com/v1beta/openai".to_string(),
            temperature: 0.7,
            timeout_seconds: crate::openai::DEFAULT_TIMEOUT_SECS,
            credentials_env: "GEMINI_API_KEY".to_string(),
            rotation_cooldown_seconds: 300,
        }
    }
}

impl LlmSettings {
    pub fn rotation_cooldown(&self) -> Duration {
        Duration::from_secs(self.rotation_cooldown_seconds)
    }
}

/// Agent loop limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentSettings {
    /// Model calls allowed per examination turn.
    pub exam_max_iterations: usize,
    /// Model calls allowed per consultation turn.
    pub consultation_max_iterations: usize,
    /// Wall-clock budget for one agent run.
    pub max_execution_seconds: u64,
    /// Number of recent turns included in prompts.
    pub history_window: usize,
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            exam_max_iterations: 1,
            consultation_max_iterations: 3,
            max_execution_seconds: 120,
            history_window: 10,
        }
    }
}

impl AgentSettings {
    pub fn max_execution_time(&self) -> Duration {
        Duration::from_secs(self.max_execution_seconds)
    }
}

/// Viva examination defaults and pacing.
///
/// The pacing thresholds are tuning knobs, not invariants: they only decide
/// when the agent is nudged towards assigning a practical task.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExamSettings {
    pub default_difficulty: u8,
    pub default_tasks: u32,
    pub default_max_questions: usize,
    /// Messages exchanged before the first task is suggested.
    pub first_task_after_messages: usize,
    /// Messages exchanged before the second task is suggested.
    pub second_task_after_messages: usize,
    /// Messages after which any remaining task is pushed.
    pub task_deadline_messages: usize,
}

impl Default for ExamSettings {
    fn default() -> Self {
        Self {
            default_difficulty: 50,
            default_tasks: 2,
            default_max_questions: 5,
            first_task_after_messages: 3,
            second_task_after_messages: 7,
            task_deadline_messages: 10,
        }
    }
}

/// Doctor consultation settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsultationSettings {
    /// Soft character budget for replies.
    pub response_char_budget: usize,
}

impl Default for ConsultationSettings {
    fn default() -> Self {
        Self {
            response_char_budget: 750,
        }
    }
}

/// HTTP server settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
    /// The single origin allowed by CORS.
    pub cors_origin: String,
    /// Evict sessions idle for longer than this. Unset keeps sessions forever.
    pub session_idle_minutes: Option<u64>,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 5000,
            cors_origin: "http://localhost:5173".to_string(),
            session_idle_minutes: None,
        }
    }
}

impl ServerSettings {
    /// CORS origin, with `CORS_ORIGIN` taking precedence over the config file.
    pub fn effective_cors_origin(&self) -> String {
        std::env::var("CORS_ORIGIN")
            .ok()
            .filter(|o| !o.trim().is_empty())
            .unwrap_or_else(|| self.cors_origin.clone())
    }

    pub fn session_idle_timeout(&self) -> Option<Duration> {
        self.session_idle_minutes
            .map(|minutes| Duration::from_secs(minutes * 60))
    }
}

/// Prompt customization settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
#[derive(Default)]
pub struct PromptSettings {
    /// Directory for custom prompts (overrides defaults).
    pub custom_dir: Option<String>,
    /// Custom variables available in all prompts as {{variable_name}}.
    pub variables: std::collections::HashMap<String, String>,
}

impl Settings {
    /// Load settings from the default configuration file.
    pub fn load() -> crate::error::Result<Self> {
        Self::load_from(None)
    }

    /// Load settings from a specific path, or default location if None.
    pub fn load_from(path: Option<&PathBuf>) -> crate::error::Result<Self> {
        let config_path = match path {
            Some(p) => p.clone(),
            None => Self::default_config_path(),
        };

        if config_path.exists() {
            let content = std::fs::read_to_string(&config_path)?;
            let settings: Settings = toml::from_str(&content)?;
            Ok(settings)
        } else {
            Ok(Settings::default())
        }
    }

    /// Save settings to the default configuration file.
    pub fn save(&self) -> crate::error::Result<()> {
        self.save_to(&Self::default_config_path())
    }

    /// Save settings to a specific path.
    pub fn save_to(&self, path: &PathBuf) -> crate::error::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Get the default configuration file path.
    pub fn default_config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("parley")
            .join("config.toml")
    }

    /// Expand shell variables in paths (e.g., ~).
    pub fn expand_path(path: &str) -> PathBuf {
        PathBuf::from(shellexpand::tilde(path).to_string())
    }

    /// Check values that would otherwise only fail at request time.
    pub fn validate(&self) -> crate::error::Result<()> {
        url::Url::parse(&self.llm.api_base).map_err(|e| {
            crate::error::ParleyError::Config(format!(
                "llm.api_base '{}' is not a valid URL: {}",
                self.llm.api_base, e
            ))
        })?;

        if self.exam.default_difficulty == 0 || self.exam.default_difficulty > 100 {
            return Err(crate::error::ParleyError::Config(
                "exam.default_difficulty must be between 1 and 100".to_string(),
            ));
        }

        if self.agent.exam_max_iterations == 0 || self.agent.consultation_max_iterations == 0 {
            return Err(crate::error::ParleyError::Config(
                "agent iteration limits must be at least 1".to_string(),
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_validate() {
        let settings = Settings::default();
        assert!(settings.validate().is_ok());
        assert_eq!(settings.llm.rotation_cooldown(), Duration::from_secs(300));
        assert_eq!(settings.agent.exam_max_iterations, 1);
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let settings: Settings = toml::from_str(
            r#"
            [exam]
            first_task_after_messages = 4

            [server]
            port = 8080
            "#,
        )
        .unwrap();

        assert_eq!(settings.exam.first_task_after_messages, 4);
        assert_eq!(settings.exam.second_task_after_messages, 7);
        assert_eq!(settings.server.port, 8080);
        assert_eq!(settings.llm.model, "gemini-1.5-flash");
    }

    #[test]
    fn test_save_and_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let mut settings = Settings::default();
        settings.server.session_idle_minutes = Some(30);
        settings.save_to(&path).unwrap();

        let loaded = Settings::load_from(Some(&path)).unwrap();
        assert_eq!(loaded.server.session_idle_minutes, Some(30));
        assert_eq!(
            loaded.server.session_idle_timeout(),
            Some(Duration::from_secs(1800))
        );
    }

    #[test]
    fn test_invalid_api_base_is_rejected() {
        let mut settings = Settings::default();
        settings.llm.api_base = "not a url".to_string();
        assert!(settings.validate().is_err());
    }
}
