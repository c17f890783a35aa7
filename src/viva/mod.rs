//! Viva (oral examination) agent.
//!
//! Drives a multi-turn examination: an introduction, conceptual questions,
//! a configurable number of practical tasks and a closing message once the
//! question budget is used up.

mod pacing;

pub use pacing::{ExamState, Pacing};

use crate::agent::{
    normalize, sanitize, tool_listing, tool_names, Agent, SanitizeOptions, ToolDefaults, ToolKind,
    Toolkit,
};
use crate::config::{AgentSettings, ExamSettings, Settings};
use crate::session::{Role, Speakers, Transcript};
use serde::Serialize;
use std::collections::HashMap;
use tracing::{debug, info, instrument, warn};

/// Replies shorter than this are replaced by a direct question.
const MIN_REPLY_CHARS: usize = 10;

/// Parameters of one examination.
#[derive(Debug, Clone, PartialEq)]
pub struct ExamConfig {
    pub student_name: String,
    pub student_info: String,
    pub subject: String,
    pub syllabus: String,
    pub teacher_notes: String,
    /// 1 to 100.
    pub difficulty: u8,
    pub total_tasks: u32,
    /// Assistant turns before the interview is closed.
    pub max_questions: usize,
}

impl ExamConfig {
    pub fn new(student_name: &str, subject: &str, defaults: &ExamSettings) -> Self {
        Self {
            student_name: student_name.to_string(),
            student_info: String::new(),
            subject: subject.to_string(),
            syllabus: String::new(),
            teacher_notes: String::new(),
            difficulty: defaults.default_difficulty,
            total_tasks: defaults.default_tasks,
            max_questions: defaults.default_max_questions,
        }
    }
}

/// The examiner's answer to one student message.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExamReply {
    pub message: String,
    pub is_task: bool,
    pub finished: bool,
}

/// Snapshot of an examination's progress.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExamStatus {
    pub student_name: String,
    pub subject: String,
    pub total_tasks: u32,
    pub completed_tasks: u32,
    pub messages_count: usize,
    pub active: bool,
}

/// One viva session.
pub struct ExaminationAgent {
    config: ExamConfig,
    transcript: Transcript,
    completed_tasks: u32,
    finished: bool,
    toolkit: Toolkit,
    pacing: Pacing,
    limits: AgentSettings,
}

impl ExaminationAgent {
    pub fn new(config: ExamConfig, toolkit: Toolkit, settings: &Settings) -> Self {
        Self {
            config,
            transcript: Transcript::new(),
            completed_tasks: 0,
            finished: false,
            toolkit,
            pacing: Pacing::from_settings(&settings.exam),
            limits: settings.agent.clone(),
        }
    }

    pub fn config(&self) -> &ExamConfig {
        &self.config
    }

    pub fn history(&self) -> &Transcript {
        &self.transcript
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    pub fn status(&self) -> ExamStatus {
        ExamStatus {
            student_name: self.config.student_name.clone(),
            subject: self.config.subject.clone(),
            total_tasks: self.config.total_tasks,
            completed_tasks: self.completed_tasks,
            messages_count: self.transcript.len(),
            active: !self.finished,
        }
    }

    /// Open the examination with a generated introduction.
    pub async fn start(&mut self) -> ExamReply {
        let vars = HashMap::from([
            ("subject".to_string(), self.config.subject.clone()),
            ("student_name".to_string(), self.config.student_name.clone()),
            ("student_info".to_string(), self.config.student_info.clone()),
            ("syllabus".to_string(), self.config.syllabus.clone()),
        ]);

        let generated = self
            .toolkit
            .complete_template(&self.toolkit.prompts().viva.introduction, &vars)
            .await
            .map(|text| sanitize(&text, &SanitizeOptions::examination()));

        let message = match generated {
            Ok(text) if !text.is_empty() => text,
            Ok(_) => self.fallback_introduction(),
            Err(e) => {
                warn!("Failed to generate introduction: {}", e);
                self.fallback_introduction()
            }
        };

        self.transcript.push_assistant(message.clone());
        ExamReply {
            message,
            is_task: false,
            finished: false,
        }
    }

    fn fallback_introduction(&self) -> String {
        format!(
            "Hello {}! Welcome to your {} viva examination. I'll be asking you a series of questions to assess your knowledge. Let's begin.",
            self.config.student_name, self.config.subject
        )
    }

    /// Answer one student message. Never fails; errors degrade to fallback text.
    #[instrument(skip(self, message), fields(subject = %self.config.subject))]
    pub async fn process_message(&mut self, message: &str) -> ExamReply {
        self.transcript.push_user(message);

        if self.transcript.assistant_turns() >= self.config.max_questions {
            return self.conclude().await;
        }

        let state = self.current_state();
        debug!("Current state: {}", state);

        let reply = match self.run_agent(message, state).await {
            Some(reply) => reply,
            None => ExamReply {
                message: self.direct_question().await,
                is_task: false,
                finished: false,
            },
        };

        if reply.is_task {
            self.completed_tasks += 1;
            info!(
                completed = self.completed_tasks,
                total = self.config.total_tasks,
                "Assigned practical task"
            );
        }

        self.transcript.push_assistant(reply.message.clone());
        reply
    }

    /// Advisory hint for the next agent run.
    pub fn current_state(&self) -> ExamState {
        self.pacing.state(
            self.transcript.len(),
            self.config.total_tasks,
            self.completed_tasks,
        )
    }

    /// Run the agent; None when its output is unusable.
    async fn run_agent(&self, message: &str, state: ExamState) -> Option<ExamReply> {
        let history = self.history_text();
        let mut vars = HashMap::from([
            ("student_name".to_string(), self.config.student_name.clone()),
            ("student_info".to_string(), self.config.student_info.clone()),
            ("subject".to_string(), self.config.subject.clone()),
            ("syllabus".to_string(), self.config.syllabus.clone()),
            ("difficulty".to_string(), self.config.difficulty.to_string()),
            ("teacher_notes".to_string(), self.config.teacher_notes.clone()),
            ("conversation_history".to_string(), history),
            ("current_state".to_string(), state.to_string()),
            ("total_tasks".to_string(), self.config.total_tasks.to_string()),
        ]);
        vars.insert("tools".to_string(), tool_listing(&ToolKind::EXAMINATION));
        vars.insert("tool_names".to_string(), tool_names(&ToolKind::EXAMINATION));

        let system_prompt = self
            .toolkit
            .prompts()
            .render_with_custom(&self.toolkit.prompts().viva.agent_system, &vars);

        let agent = Agent::new(self.toolkit.clone(), &ToolKind::EXAMINATION)
            .with_system_prompt(&system_prompt)
            .with_max_iterations(self.limits.exam_max_iterations)
            .with_max_execution_time(self.limits.max_execution_time());

        let response = match agent.run(message, &self.tool_defaults()).await {
            Ok(response) => response,
            Err(e) => {
                warn!("Examination agent failed: {}", e);
                return None;
            }
        };

        let options = SanitizeOptions::examination();
        let (text, is_task) = match response.first_tool_call() {
            Some(record) => (
                sanitize(&record.result, &options),
                record.kind() == Some(ToolKind::Task),
            ),
            None if response.stopped => return None,
            None => (sanitize(&response.content, &options), false),
        };

        if text.chars().count() < MIN_REPLY_CHARS {
            debug!("Agent reply too short, asking directly");
            return None;
        }

        Some(ExamReply {
            message: text,
            is_task,
            finished: false,
        })
    }

    /// Ask the question tool directly, with a fixed apology if that fails too.
    async fn direct_question(&self) -> String {
        let request = normalize(
            ToolKind::VivaQuestion,
            &serde_json::Value::Null,
            &self.tool_defaults(),
        );

        match self.toolkit.try_invoke(&request).await {
            Ok(text) => {
                let cleaned = sanitize(&text, &SanitizeOptions::examination());
                if cleaned.is_empty() {
                    self.apology()
                } else {
                    cleaned
                }
            }
            Err(e) => {
                warn!("Direct question failed: {}", e);
                self.apology()
            }
        }
    }

    fn apology(&self) -> String {
        format!(
            "I apologize, but I encountered an error. Let's continue with a simpler question about {}.",
            self.config.subject
        )
    }

    /// Close the interview with the end tool, bypassing the agent.
    async fn conclude(&mut self) -> ExamReply {
        info!("Question budget reached, concluding examination");

        let request = normalize(
            ToolKind::EndInterview,
            &serde_json::Value::Null,
            &self.tool_defaults(),
        );
        let conclusion = sanitize(
            &self.toolkit.invoke(&request).await,
            &SanitizeOptions::examination(),
        );
        let message = if conclusion.is_empty() {
            crate::agent::failure_message(&request)
        } else {
            conclusion
        };

        self.finished = true;
        self.transcript.push_assistant(message.clone());
        ExamReply {
            message,
            is_task: false,
            finished: true,
        }
    }

    fn history_text(&self) -> String {
        self.transcript
            .history_text(Speakers::VIVA, self.limits.history_window)
    }

    fn tool_defaults(&self) -> ToolDefaults {
        let remaining = self
            .config
            .total_tasks
            .saturating_sub(self.completed_tasks);

        ToolDefaults::from([
            ("conversation_history".to_string(), self.history_text()),
            ("subject".to_string(), self.config.subject.clone()),
            ("syllabus".to_string(), self.config.syllabus.clone()),
            ("difficulty".to_string(), self.config.difficulty.to_string()),
            ("teacher_notes".to_string(), self.config.teacher_notes.clone()),
            ("remaining_tasks".to_string(), remaining.to_string()),
            ("student_name".to_string(), self.config.student_name.clone()),
        ])
    }

    /// The most recent assistant turn that reads like a task.
    pub fn latest_task(&self) -> String {
        self.transcript
            .turns()
            .iter()
            .rev()
            .filter(|turn| turn.role == Role::Assistant)
            .find(|turn| {
                let lower = turn.content.to_lowercase();
                lower.contains(" task") || lower.contains("write a")
            })
            .map(|turn| turn.content.clone())
            .unwrap_or_else(|| "Write code as requested".to_string())
    }
}

/// Pull the code out of a student's answer: the first complete fenced block,
/// otherwise the whole message.
pub fn extract_code_submission(message: &str) -> String {
    let parts: Vec<&str> = message.split("```").collect();
    if parts.len() >= 3 {
        let block = parts[1];
        // Drop a language tag such as "python" on the opening fence line.
        let block = match block.split_once('\n') {
            Some((tag, rest)) if !tag.trim().contains(' ') && !rest.trim().is_empty() => rest,
            _ => block,
        };
        return block.trim().to_string();
    }
    message.trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Prompts;
    use crate::credentials::{KeyRotator, SharedRotator};
    use crate::llm::mock::ScriptedModel;
    use std::sync::Arc;

    fn examiner(model: ScriptedModel, max_questions: usize) -> (ExaminationAgent, Arc<ScriptedModel>) {
        let model = Arc::new(model);
        let keys = SharedRotator::new(
            KeyRotator::new(vec!["k1".to_string(), "k2".to_string()]).unwrap(),
        );
        let toolkit = Toolkit::new(model.clone(), keys, Arc::new(Prompts::default()));

        let settings = Settings::default();
        let mut config = ExamConfig::new("Asha", "DBMS", &settings.exam);
        config.max_questions = max_questions;
        config.teacher_notes = "Weak on joins".to_string();

        (ExaminationAgent::new(config, toolkit, &settings), model)
    }

    #[tokio::test]
    async fn test_start_records_introduction() {
        let (mut agent, _) = examiner(
            ScriptedModel::new().text("Welcome Asha to your DBMS viva."),
            5,
        );

        let reply = agent.start().await;
        assert_eq!(reply.message, "Welcome Asha to your DBMS viva.");
        assert_eq!(agent.history().len(), 1);
        assert_eq!(agent.history().turns()[0].role, Role::Assistant);
    }

    #[tokio::test]
    async fn test_start_falls_back_on_error() {
        let (mut agent, _) = examiner(ScriptedModel::new().fail("a").fail("b"), 5);
        let reply = agent.start().await;
        assert!(reply.message.starts_with("Hello Asha! Welcome to your DBMS viva"));
    }

    #[tokio::test]
    async fn test_first_tool_output_is_the_reply() {
        let model = ScriptedModel::new()
            .text("Welcome.")
            .tool_call("viva_question_generator", r#"{"subject": "DBMS"}"#)
            .text("What is the purpose of a primary key?");
        let (mut agent, model) = examiner(model, 5);

        agent.start().await;
        let reply = agent.process_message("I'm ready").await;

        assert_eq!(reply.message, "What is the purpose of a primary key?");
        assert!(!reply.is_task);
        assert_eq!(agent.history().len(), 3);
        // The tool prompt was filled from session state.
        assert!(model.prompt(2).contains("Weak on joins"));
    }

    #[tokio::test]
    async fn test_task_tool_marks_task() {
        let model = ScriptedModel::new()
            .tool_call("task_generator", "garbage")
            .text("Write a query that lists every customer without an order.");
        let (mut agent, _) = examiner(model, 5);

        let reply = agent.process_message("hello").await;
        assert!(reply.is_task);
        assert_eq!(agent.status().completed_tasks, 1);
        assert!(agent.latest_task().starts_with("Write a query"));
    }

    #[tokio::test]
    async fn test_short_reply_triggers_direct_question() {
        let model = ScriptedModel::new()
            .text("Ok.")
            .text("Explain the difference between DELETE and TRUNCATE.");
        let (mut agent, model) = examiner(model, 5);

        let reply = agent.process_message("hi").await;
        assert_eq!(
            reply.message,
            "Explain the difference between DELETE and TRUNCATE."
        );
        assert_eq!(model.call_count(), 2);
    }

    #[tokio::test]
    async fn test_total_failure_yields_apology() {
        let (mut agent, _) = examiner(ScriptedModel::new(), 5);

        let reply = agent.process_message("hi").await;
        assert_eq!(
            reply.message,
            "I apologize, but I encountered an error. Let's continue with a simpler question about DBMS."
        );
        assert_eq!(agent.history().len(), 2);
    }

    #[tokio::test]
    async fn test_question_budget_routes_to_end_interview() {
        let model = ScriptedModel::new()
            .text("Welcome to the viva.")
            .tool_call("viva_question_generator", "{}")
            .text("What is normalisation in databases?")
            .text("Thank you Asha, the examination is complete.");
        let (mut agent, model) = examiner(model, 2);

        agent.start().await;
        agent.process_message("ready").await;
        let reply = agent.process_message("It removes redundancy").await;

        assert!(reply.finished);
        assert_eq!(reply.message, "Thank you Asha, the examination is complete.");
        assert!(!agent.status().active);
        // The closing prompt went straight to the end tool, not the agent.
        assert!(model.calls()[3].1.tools.is_empty());
    }

    #[test]
    fn test_extract_code_submission() {
        assert_eq!(
            extract_code_submission("Here:\n```python\ndef f():\n    return 1\n```\nthanks"),
            "def f():\n    return 1"
        );
        assert_eq!(
            extract_code_submission("```SELECT * FROM t;```"),
            "SELECT * FROM t;"
        );
        assert_eq!(extract_code_submission("  SELECT 1  "), "SELECT 1");
    }
}
