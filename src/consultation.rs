//! Doctor consultation agent.

use crate::agent::{
    normalize, sanitize, tool_listing, tool_names, Agent, AgentResponse, SanitizeOptions,
    ToolDefaults, ToolKind, Toolkit,
};
use crate::config::{AgentSettings, Settings};
use crate::error::{ParleyError, Result};
use crate::session::{Speakers, Transcript};
use base64::{engine::general_purpose::STANDARD, Engine};
use std::collections::HashMap;
use tracing::{instrument, warn};

/// Fixed greeting returned when a consultation is opened over HTTP.
pub const WELCOME_MESSAGE: &str = "Hello! I'm your AI medical assistant. I can provide general \
    medical information and guidance, but I'm not a replacement for professional medical care. \
    How can I help you today?";

const NO_VISUAL_ANALYSIS: &str = "No visual analysis available";
const NO_PATIENT_INFO: &str = "No patient info provided";

const PROCESSING_APOLOGY: &str = "I apologize, but I'm having trouble processing your \
    information. Could you try rephrasing your question?";

const IMAGE_APOLOGY: &str = "I apologize, but I'm having trouble analyzing the image you \
    uploaded. Could you please upload a clearer image or describe what you're seeing in the image?";

const FALLBACK_INTRODUCTION: &str = "Hello, I'm an AI medical assistant. I can share general \
    medical information, but I don't replace a visit to a healthcare professional. What brings \
    you here today?";

/// One consultation, keyed by user id.
pub struct ConsultationAgent {
    user_id: String,
    patient_info: Option<String>,
    transcript: Transcript,
    toolkit: Toolkit,
    limits: AgentSettings,
    char_budget: usize,
}

impl ConsultationAgent {
    pub fn new(
        user_id: &str,
        patient_info: Option<String>,
        toolkit: Toolkit,
        settings: &Settings,
    ) -> Self {
        Self {
            user_id: user_id.to_string(),
            patient_info: patient_info.filter(|info| !info.trim().is_empty()),
            transcript: Transcript::new(),
            toolkit,
            limits: settings.agent.clone(),
            char_budget: settings.consultation.response_char_budget,
        }
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn history(&self) -> &Transcript {
        &self.transcript
    }

    pub fn patient_info(&self) -> Option<&str> {
        self.patient_info.as_deref()
    }

    pub fn set_patient_info(&mut self, info: &str) {
        self.patient_info = Some(info.to_string()).filter(|info| !info.trim().is_empty());
    }

    /// Fixed welcome text. Not recorded in the transcript.
    pub fn welcome(&self) -> &'static str {
        WELCOME_MESSAGE
    }

    /// Open the consultation with a generated greeting.
    pub async fn start(&mut self) -> String {
        let greeting = self
            .toolkit
            .complete_template(
                &self.toolkit.prompts().consultation.introduction,
                &HashMap::new(),
            )
            .await
            .map(|text| sanitize(&text, &self.options()))
            .unwrap_or_else(|e| {
                warn!("Failed to generate greeting: {}", e);
                String::new()
            });

        let greeting = if greeting.is_empty() {
            FALLBACK_INTRODUCTION.to_string()
        } else {
            greeting
        };

        self.transcript.push_assistant(greeting.clone());
        greeting
    }

    /// Answer a patient message. `image_analysis` is a description of the
    /// patient produced elsewhere, if any.
    #[instrument(skip(self, message, image_analysis), fields(user = %self.user_id))]
    pub async fn process_patient_message(
        &mut self,
        message: &str,
        image_analysis: Option<&str>,
    ) -> String {
        self.transcript.push_user(message);

        let image_analysis = image_analysis
            .map(str::trim)
            .filter(|analysis| !analysis.is_empty())
            .unwrap_or(NO_VISUAL_ANALYSIS);
        let defaults = self.tool_defaults(message, image_analysis);

        let reply = match self.run_agent(message, image_analysis, &defaults).await {
            Some(text) => text,
            None => {
                let request = normalize(
                    ToolKind::PatientAnalysis,
                    &serde_json::Value::Null,
                    &defaults,
                );
                sanitize(&self.toolkit.invoke(&request).await, &self.options())
            }
        };

        let reply = if reply.is_empty() {
            PROCESSING_APOLOGY.to_string()
        } else {
            reply
        };

        self.transcript.push_assistant(reply.clone());
        reply
    }

    async fn run_agent(
        &self,
        message: &str,
        image_analysis: &str,
        defaults: &ToolDefaults,
    ) -> Option<String> {
        let vars = HashMap::from([
            ("user_id".to_string(), self.user_id.clone()),
            ("patient_info".to_string(), self.patient_info_text()),
            ("conversation_history".to_string(), self.history_text()),
            ("image_analysis".to_string(), image_analysis.to_string()),
            ("tools".to_string(), tool_listing(&ToolKind::CONSULTATION)),
            ("tool_names".to_string(), tool_names(&ToolKind::CONSULTATION)),
        ]);
        let system_prompt = self
            .toolkit
            .prompts()
            .render_with_custom(&self.toolkit.prompts().consultation.agent_system, &vars);

        let agent = Agent::new(self.toolkit.clone(), &ToolKind::CONSULTATION)
            .with_system_prompt(&system_prompt)
            .with_max_iterations(self.limits.consultation_max_iterations)
            .with_max_execution_time(self.limits.max_execution_time());

        match agent.run(message, defaults).await {
            Ok(response) => Some(self.reply_text(&response)).filter(|text| !text.is_empty()),
            Err(e) => {
                warn!("Consultation agent failed: {}", e);
                None
            }
        }
    }

    /// The final answer, or the last tool observation when the loop was cut short.
    fn reply_text(&self, response: &AgentResponse) -> String {
        if response.stopped {
            return response
                .tool_calls
                .iter()
                .rev()
                .find(|record| record.request.is_some())
                .map(|record| sanitize(&record.result, &self.options()))
                .unwrap_or_default();
        }
        sanitize(&response.content, &self.options())
    }

    /// Analyse an uploaded image and reply to the accompanying message.
    ///
    /// `image_url` is an `https:` or `data:` URL.
    pub async fn process_uploaded_image(&mut self, message: &str, image_url: &str) -> String {
        self.transcript
            .push_user(format!("[Uploaded a medical image] {}", message));

        let context = if message.trim().is_empty() {
            "No specific context provided"
        } else {
            message
        };

        let reply = match self.toolkit.analyze_image(context, image_url).await {
            Ok(analysis) => {
                let vars = HashMap::from([
                    ("message".to_string(), message.to_string()),
                    ("analysis".to_string(), analysis),
                ]);
                self.toolkit
                    .complete_template(&self.toolkit.prompts().consultation.image_response, &vars)
                    .await
                    .map(|text| sanitize(&text, &self.options()))
                    .ok()
                    .filter(|text| !text.is_empty())
            }
            Err(e) => {
                warn!("Image analysis failed: {}", e);
                None
            }
        };

        let reply = reply.unwrap_or_else(|| IMAGE_APOLOGY.to_string());
        self.transcript.push_assistant(reply.clone());
        reply
    }

    fn options(&self) -> SanitizeOptions {
        SanitizeOptions::consultation(self.char_budget)
    }

    fn history_text(&self) -> String {
        self.transcript
            .history_text(Speakers::CONSULTATION, self.limits.history_window)
    }

    fn patient_info_text(&self) -> String {
        self.patient_info
            .clone()
            .unwrap_or_else(|| NO_PATIENT_INFO.to_string())
    }

    fn tool_defaults(&self, message: &str, image_analysis: &str) -> ToolDefaults {
        ToolDefaults::from([
            ("conversation_history".to_string(), self.history_text()),
            ("user_input".to_string(), message.to_string()),
            ("image_analysis".to_string(), image_analysis.to_string()),
            ("patient_info".to_string(), self.patient_info_text()),
        ])
    }
}

/// Guess an image media type from its leading bytes. Unknown data is treated as JPEG.
pub fn image_media_type(bytes: &[u8]) -> &'static str {
    if bytes.starts_with(b"\x89PNG") {
        "image/png"
    } else if bytes.starts_with(b"GIF8") {
        "image/gif"
    } else if bytes.len() >= 12 && &bytes[..4] == b"RIFF" && &bytes[8..12] == b"WEBP" {
        "image/webp"
    } else {
        "image/jpeg"
    }
}

/// Encode raw image bytes as a `data:` URL.
pub fn image_data_url(bytes: &[u8]) -> String {
    format!(
        "data:{};base64,{}",
        image_media_type(bytes),
        STANDARD.encode(bytes)
    )
}

/// Turn an uploaded image (bare base64 or a base64 `data:` URL) into a data URL.
pub fn parse_image_payload(raw: &str) -> Result<String> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err(ParleyError::InvalidInput("image is required".to_string()));
    }

    if let Some(rest) = raw.strip_prefix("data:") {
        let (header, data) = rest
            .split_once(',')
            .ok_or_else(|| ParleyError::InvalidInput("malformed data URL".to_string()))?;
        if !header.ends_with(";base64") || !header.starts_with("image/") {
            return Err(ParleyError::InvalidInput(
                "data URL must be a base64 encoded image".to_string(),
            ));
        }
        STANDARD
            .decode(data.trim())
            .map_err(|e| ParleyError::InvalidInput(format!("invalid base64 image data: {}", e)))?;
        return Ok(format!("data:{},{}", header, data.trim()));
    }

    let bytes = STANDARD
        .decode(raw)
        .map_err(|e| ParleyError::InvalidInput(format!("invalid base64 image data: {}", e)))?;
    Ok(image_data_url(&bytes))
}
