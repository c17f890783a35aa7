//! Tool definitions and implementations for the agent system.
//!
//! Every tool is a single prompt-template call against the chat model. The
//! toolkit owns the session's credential rotator so that a failed call can
//! move to the next key before its one retry.

use super::normalize::{ExamContext, PatientContext, ToolRequest};
use crate::config::Prompts;
use crate::credentials::SharedRotator;
use crate::error::{ParleyError, Result};
use crate::llm::{ChatMessage, ChatModel, ChatRequest, ToolSpec};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

/// The tools known to the agents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ToolKind {
    VivaQuestion,
    Task,
    EndInterview,
    PatientAnalysis,
    MedicalImage,
}

impl ToolKind {
    /// Tools offered to the examination agent.
    pub const EXAMINATION: [ToolKind; 3] =
        [ToolKind::VivaQuestion, ToolKind::Task, ToolKind::EndInterview];

    /// Tools offered to the consultation agent.
    pub const CONSULTATION: [ToolKind; 1] = [ToolKind::PatientAnalysis];

    pub fn name(&self) -> &'static str {
        match self {
            ToolKind::VivaQuestion => "viva_question_generator",
            ToolKind::Task => "task_generator",
            ToolKind::EndInterview => "end_interview",
            ToolKind::PatientAnalysis => "patient_analysis",
            ToolKind::MedicalImage => "medical_image_analysis",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        let name = name.trim();
        [
            ToolKind::VivaQuestion,
            ToolKind::Task,
            ToolKind::EndInterview,
            ToolKind::PatientAnalysis,
            ToolKind::MedicalImage,
        ]
        .into_iter()
        .find(|kind| kind.name() == name)
    }

    pub fn description(&self) -> &'static str {
        match self {
            ToolKind::VivaQuestion => {
                "Generates a conceptual viva question based on the conversation, subject, \
                syllabus, difficulty and teacher notes."
            }
            ToolKind::Task => {
                "Assigns a short practical task that tests real-world application of the subject."
            }
            ToolKind::EndInterview => {
                "Concludes the viva examination with a short thank-you message."
            }
            ToolKind::PatientAnalysis => {
                "Analyzes the patient's message, history, visual analysis and profile and \
                replies with medical information and advice."
            }
            ToolKind::MedicalImage => {
                "Describes a medical image uploaded by the patient, noting possible indicators \
                without a definitive diagnosis."
            }
        }
    }

    /// Fields the tool's prompt needs.
    pub fn fields(&self) -> &'static [&'static str] {
        match self {
            ToolKind::VivaQuestion => &[
                "conversation_history",
                "subject",
                "syllabus",
                "difficulty",
                "teacher_notes",
            ],
            ToolKind::Task => &[
                "conversation_history",
                "subject",
                "syllabus",
                "difficulty",
                "teacher_notes",
                "remaining_tasks",
            ],
            ToolKind::EndInterview => &["conversation_history", "student_name", "subject"],
            ToolKind::PatientAnalysis => &[
                "conversation_history",
                "user_input",
                "image_analysis",
                "patient_info",
            ],
            ToolKind::MedicalImage => &["user_input"],
        }
    }

    pub fn is_integer_field(field: &str) -> bool {
        matches!(field, "difficulty" | "remaining_tasks")
    }

    pub fn is_consultation(&self) -> bool {
        matches!(self, ToolKind::PatientAnalysis | ToolKind::MedicalImage)
    }

    /// JSON schema definition for native tool calling.
    pub fn spec(&self) -> ToolSpec {
        let properties: serde_json::Map<String, serde_json::Value> = self
            .fields()
            .iter()
            .map(|field| {
                let kind = if Self::is_integer_field(field) {
                    "integer"
                } else {
                    "string"
                };
                (
                    field.to_string(),
                    serde_json::json!({ "type": kind, "description": field_description(field) }),
                )
            })
            .collect();

        ToolSpec {
            name: self.name().to_string(),
            description: self.description().to_string(),
            parameters: serde_json::json!({
                "type": "object",
                "properties": properties,
                "required": self.fields(),
            }),
        }
    }
}

fn field_description(field: &str) -> &'static str {
    match field {
        "conversation_history" => "Recent conversation transcript",
        "subject" => "Subject of the examination",
        "syllabus" => "Topics covered by the examination",
        "difficulty" => "Difficulty from 1 to 100",
        "teacher_notes" => "Teacher notes on the student and questioning strategy",
        "remaining_tasks" => "Number of practical tasks still to assign",
        "student_name" => "Name of the student",
        "user_input" => "The patient's current message",
        "image_analysis" => "Visual analysis of the patient",
        "patient_info" => "Known patient information",
        _ => "",
    }
}

/// `name: description` lines for prompt rendering.
pub fn tool_listing(tools: &[ToolKind]) -> String {
    tools
        .iter()
        .map(|kind| format!("{}: {}", kind.name(), kind.description()))
        .collect::<Vec<_>>()
        .join("\n")
}

pub fn tool_names(tools: &[ToolKind]) -> String {
    tools
        .iter()
        .map(|kind| kind.name())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Tool execution context: the model, the session's keys and the templates.
#[derive(Clone)]
pub struct Toolkit {
    model: Arc<dyn ChatModel>,
    keys: SharedRotator,
    prompts: Arc<Prompts>,
}

impl Toolkit {
    pub fn new(model: Arc<dyn ChatModel>, keys: SharedRotator, prompts: Arc<Prompts>) -> Self {
        Self {
            model,
            keys,
            prompts,
        }
    }

    pub fn model(&self) -> &Arc<dyn ChatModel> {
        &self.model
    }

    pub fn keys(&self) -> &SharedRotator {
        &self.keys
    }

    pub fn prompts(&self) -> &Prompts {
        &self.prompts
    }

    /// One model call with the active key; on failure force-rotate and retry once.
    pub async fn complete(&self, request: &ChatRequest) -> Result<String> {
        let key = self.keys.rotate(false);
        match self.model.chat(&key, request).await {
            Ok(reply) => Ok(reply.content.unwrap_or_default()),
            Err(e) => {
                warn!(
                    index = self.keys.index(),
                    "Model call failed, rotating credential: {}", e
                );
                let key = self.keys.rotate(true);
                let reply = self.model.chat(&key, request).await?;
                Ok(reply.content.unwrap_or_default())
            }
        }
    }

    /// Render a single template and complete it.
    pub async fn complete_template(
        &self,
        template: &str,
        vars: &HashMap<String, String>,
    ) -> Result<String> {
        let prompt = self.prompts.render_with_custom(template, vars);
        self.complete(&ChatRequest::prompt(prompt)).await
    }

    /// Run a tool, returning the second failure as an error.
    pub async fn try_invoke(&self, request: &ToolRequest) -> Result<String> {
        debug!("Invoking tool {}", request.kind().name());

        match request {
            ToolRequest::VivaQuestionGenerator(context) => {
                let vars = exam_vars(context);
                self.complete_template(&self.prompts.viva.question, &vars)
                    .await
            }
            ToolRequest::TaskGenerator {
                context,
                remaining_tasks,
            } => {
                let mut vars = exam_vars(context);
                vars.insert("remaining_tasks".to_string(), remaining_tasks.to_string());
                self.complete_template(&self.prompts.viva.task, &vars).await
            }
            ToolRequest::EndInterview {
                conversation_history,
                student_name,
                subject,
            } => {
                let vars = HashMap::from([
                    ("conversation_history".to_string(), conversation_history.clone()),
                    ("student_name".to_string(), student_name.clone()),
                    ("subject".to_string(), subject.clone()),
                ]);
                self.complete_template(&self.prompts.viva.end_interview, &vars)
                    .await
            }
            ToolRequest::PatientAnalysis(context) => {
                let vars = patient_vars(context);
                self.complete_template(&self.prompts.consultation.patient_analysis, &vars)
                    .await
            }
            ToolRequest::MedicalImageAnalysis { .. } => Err(ParleyError::InvalidInput(
                "medical_image_analysis needs an image; use analyze_image".to_string(),
            )),
        }
    }

    /// Run a tool; a second failure becomes the tool's fixed failure text.
    pub async fn invoke(&self, request: &ToolRequest) -> String {
        match self.try_invoke(request).await {
            Ok(output) => output,
            Err(e) => {
                warn!("Tool {} failed after retry: {}", request.kind().name(), e);
                failure_message(request)
            }
        }
    }

    /// Describe an uploaded medical image. `image_url` may be a `data:` URL.
    pub async fn analyze_image(&self, user_input: &str, image_url: &str) -> Result<String> {
        let vars = HashMap::from([("user_input".to_string(), user_input.to_string())]);
        let prompt = self
            .prompts
            .render_with_custom(&self.prompts.consultation.image_analysis, &vars);

        let request = ChatRequest {
            messages: vec![ChatMessage::user_with_image(prompt, image_url)],
            tools: Vec::new(),
        };
        self.complete(&request).await
    }
}

fn exam_vars(context: &ExamContext) -> HashMap<String, String> {
    HashMap::from([
        (
            "conversation_history".to_string(),
            context.conversation_history.clone(),
        ),
        ("subject".to_string(), context.subject.clone()),
        ("syllabus".to_string(), context.syllabus.clone()),
        ("difficulty".to_string(), context.difficulty.to_string()),
        ("teacher_notes".to_string(), context.teacher_notes.clone()),
    ])
}

fn patient_vars(context: &PatientContext) -> HashMap<String, String> {
    HashMap::from([
        (
            "conversation_history".to_string(),
            context.conversation_history.clone(),
        ),
        ("user_input".to_string(), context.user_input.clone()),
        ("image_analysis".to_string(), context.image_analysis.clone()),
        ("patient_info".to_string(), context.patient_info.clone()),
    ])
}

/// Text returned in place of a tool's output when it cannot be produced.
pub fn failure_message(request: &ToolRequest) -> String {
    match request {
        ToolRequest::VivaQuestionGenerator(context) => format!(
            "Could you explain one of the key concepts of {} in your own words?",
            context.subject
        ),
        ToolRequest::TaskGenerator { context, .. } => format!(
            "Describe how you would apply a core idea from {} to solve a practical problem.",
            context.subject
        ),
        ToolRequest::EndInterview {
            student_name,
            subject,
            ..
        } => format!(
            "Thank you for your time, {}. This concludes your {} viva examination.",
            student_name, subject
        ),
        ToolRequest::PatientAnalysis(_) => "I'm having trouble analyzing your information right now. \
            Could you please repeat your concern?"
            .to_string(),
        ToolRequest::MedicalImageAnalysis { .. } => {
            "I'm unable to properly analyze the medical image at this time. The image may be \
            unclear or our systems might be experiencing difficulties."
                .to_string()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credentials::KeyRotator;
    use crate::llm::mock::ScriptedModel;

    fn toolkit(model: ScriptedModel) -> (Toolkit, Arc<ScriptedModel>) {
        let model = Arc::new(model);
        let keys = SharedRotator::new(
            KeyRotator::new(vec!["k1".to_string(), "k2".to_string()]).unwrap(),
        );
        let toolkit = Toolkit::new(model.clone(), keys, Arc::new(Prompts::default()));
        (toolkit, model)
    }

    fn question() -> ToolRequest {
        ToolRequest::VivaQuestionGenerator(ExamContext {
            conversation_history: "Examiner: Hello".to_string(),
            subject: "Operating Systems".to_string(),
            syllabus: "Scheduling".to_string(),
            difficulty: 40,
            teacher_notes: "Needs practice".to_string(),
        })
    }

    #[test]
    fn test_tool_names_round_trip() {
        for kind in [
            ToolKind::VivaQuestion,
            ToolKind::Task,
            ToolKind::EndInterview,
            ToolKind::PatientAnalysis,
            ToolKind::MedicalImage,
        ] {
            assert_eq!(ToolKind::from_name(kind.name()), Some(kind));
        }
        assert_eq!(ToolKind::from_name("search"), None);
    }

    #[test]
    fn test_tool_listing() {
        let listing = tool_listing(&ToolKind::EXAMINATION);
        assert!(listing.starts_with("viva_question_generator: "));
        assert_eq!(
            tool_names(&ToolKind::EXAMINATION),
            "viva_question_generator, task_generator, end_interview"
        );
    }

    #[test]
    fn test_spec_lists_required_fields() {
        let spec = ToolKind::Task.spec();
        assert_eq!(spec.name, "task_generator");
        assert_eq!(spec.parameters["properties"]["difficulty"]["type"], "integer");
        assert_eq!(spec.parameters["required"].as_array().unwrap().len(), 6);
    }

    #[tokio::test]
    async fn test_invoke_renders_template() {
        let (toolkit, model) = toolkit(ScriptedModel::new().text("What is a context switch?"));

        let output = toolkit.invoke(&question()).await;
        assert_eq!(output, "What is a context switch?");

        let prompt = model.prompt(0);
        assert!(prompt.contains("Operating Systems"));
        assert!(prompt.contains("Needs practice"));
        assert!(!prompt.contains("{{subject}}"));
    }

    #[tokio::test]
    async fn test_retry_once_with_rotated_key() {
        let (toolkit, model) = toolkit(ScriptedModel::new().fail("quota").text("Retried"));

        assert_eq!(toolkit.try_invoke(&question()).await.unwrap(), "Retried");

        let calls = model.calls();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].0, "k1");
        assert_eq!(calls[1].0, "k2");
    }

    #[tokio::test]
    async fn test_second_failure_becomes_failure_text() {
        let (toolkit, model) = toolkit(ScriptedModel::new().fail("one").fail("two"));

        assert!(toolkit.try_invoke(&question()).await.is_err());

        let (toolkit, _) = self::toolkit(ScriptedModel::new().fail("one").fail("two"));
        let output = toolkit.invoke(&question()).await;
        assert!(output.contains("Operating Systems"));
        assert_eq!(model.call_count(), 2);
    }

    #[tokio::test]
    async fn test_analyze_image_sends_image_part() {
        let (toolkit, model) = toolkit(ScriptedModel::new().text("A small rash."));

        let analysis = toolkit
            .analyze_image("What is this?", "data:image/png;base64,AAAA")
            .await
            .unwrap();
        assert_eq!(analysis, "A small rash.");

        let calls = model.calls();
        match &calls[0].1.messages[0] {
            ChatMessage::User { text, image } => {
                assert!(text.contains("What is this?"));
                assert_eq!(image.as_deref(), Some("data:image/png;base64,AAAA"));
            }
            other => panic!("Unexpected message {:?}", other),
        }
    }
}
