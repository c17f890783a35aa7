//! Session factory for Parley.
//!
//! Owns the shared pieces (model client, prompts, credential source) and
//! builds a fresh examination or consultation agent for every new session.
//! Each session gets its own key rotator so rotation in one conversation
//! never shifts the key another conversation is using.

use crate::agent::Toolkit;
use crate::config::{Prompts, Settings};
use crate::consultation::ConsultationAgent;
use crate::credentials::{credentials_from_env, KeyRotator, SharedRotator};
use crate::error::Result;
use crate::llm::{ChatModel, OpenAiChatModel};
use crate::viva::{ExamConfig, ExaminationAgent};
use std::sync::Arc;
use tracing::info;

/// Where session credentials come from.
#[derive(Debug, Clone)]
enum Credentials {
    /// Read the named variable each time a session starts.
    Env(String),
    Fixed(Arc<Vec<String>>),
}

impl Credentials {
    fn resolve(&self) -> Result<Vec<String>> {
        match self {
            Credentials::Env(var) => credentials_from_env(var),
            Credentials::Fixed(keys) => Ok(keys.as_ref().clone()),
        }
    }
}

/// Builds session agents from shared components.
#[derive(Clone)]
pub struct Orchestrator {
    settings: Arc<Settings>,
    prompts: Arc<Prompts>,
    model: Arc<dyn ChatModel>,
    credentials: Credentials,
}

impl Orchestrator {
    /// Create an orchestrator from settings.
    ///
    /// Credentials are read from `llm.credentials_env` whenever a session
    /// starts, so a missing variable fails that session rather than startup.
    pub fn new(settings: Settings) -> Result<Self> {
        let prompts = Prompts::load(
            settings.prompts.custom_dir.as_deref(),
            Some(&settings.prompts.variables),
        )?;

        let model: Arc<dyn ChatModel> = Arc::new(OpenAiChatModel::from_settings(&settings.llm)?);
        info!("Using {} at {}", settings.llm.model, settings.llm.api_base);

        Ok(Self {
            credentials: Credentials::Env(settings.llm.credentials_env.clone()),
            settings: Arc::new(settings),
            prompts: Arc::new(prompts),
            model,
        })
    }

    /// Create an orchestrator with custom components and a fixed credential list.
    pub fn with_components(
        settings: Settings,
        prompts: Prompts,
        model: Arc<dyn ChatModel>,
        credentials: Vec<String>,
    ) -> Result<Self> {
        KeyRotator::new(credentials.clone())?;

        Ok(Self {
            settings: Arc::new(settings),
            prompts: Arc::new(prompts),
            model,
            credentials: Credentials::Fixed(Arc::new(credentials)),
        })
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// A toolkit with a rotator of its own.
    pub fn toolkit(&self) -> Result<Toolkit> {
        let rotator = KeyRotator::with_cooldown(
            self.credentials.resolve()?,
            self.settings.llm.rotation_cooldown(),
        )?;

        Ok(Toolkit::new(
            self.model.clone(),
            SharedRotator::new(rotator),
            self.prompts.clone(),
        ))
    }

    /// A new examination agent for `config`.
    pub fn examination(&self, config: ExamConfig) -> Result<ExaminationAgent> {
        Ok(ExaminationAgent::new(config, self.toolkit()?, &self.settings))
    }

    /// A new consultation agent for `user_id`.
    pub fn consultation(
        &self,
        user_id: &str,
        patient_info: Option<String>,
    ) -> Result<ConsultationAgent> {
        Ok(ConsultationAgent::new(
            user_id,
            patient_info,
            self.toolkit()?,
            &self.settings,
        ))
    }
}
