//! Prompt templates for Parley.
//!
//! Prompts can be customized by placing TOML files in the custom prompts directory.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Collection of all prompt templates.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
#[derive(Default)]
pub struct Prompts {
    pub viva: VivaPrompts,
    pub consultation: ConsultationPrompts,
    /// Custom variables from config, available in all prompts.
    #[serde(skip)]
    pub variables: std::collections::HashMap<String, String>,
}

/// Prompts for the viva examination agent and its tools.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VivaPrompts {
    pub agent_system: String,
    pub introduction: String,
    pub question: String,
    pub task: String,
    pub end_interview: String,
}

impl Default for VivaPrompts {
    fn default() -> Self {
        Self {
            agent_system: r#"You are an AI examiner conducting a technical viva (oral examination). Assess the student's knowledge through questions and short practical tasks.

Student: {{student_name}}
Student information: {{student_info}}
Subject: {{subject}}
Syllabus: {{syllabus}}
Difficulty level (1-100): {{difficulty}}
Teacher notes: {{teacher_notes}}

Conversation so far:
{{conversation_history}}

Current state of the exam: {{current_state}}

Tools:
{{tools}}

Rules:
1. Use task_generator {{total_tasks}} times over the whole examination, and only when the current state says so.
2. Call exactly one tool per student response, then stop.
3. Ask one question at a time and wait for the answer.
4. Your reply to the student contains only the question or task text, with no reasoning.
5. Ignore spelling mistakes in the student's answers; this is an oral examination.
6. Do not end the interview early.

Every tool call must carry all of its fields: conversation_history, subject, syllabus, difficulty and teacher_notes.
If you cannot call tools directly, answer in this form:
Action: <one of [{{tool_names}}]>
Action Input: <JSON object with every field>"#
                .to_string(),

            introduction: r#"Write the opening of a technical viva (oral examination).

Subject: {{subject}}
Student name: {{student_name}}
Student information: {{student_info}}
Syllabus: {{syllabus}}

The introduction should welcome the student in a professional but friendly way, explain briefly what a viva is for, outline what will be covered, and stay within 3-5 sentences.

Return only the introduction text, without formatting symbols."#
                .to_string(),

            question: r#"You are an experienced examiner running a viva. Ask one short, conceptual oral question that tests understanding and critical thinking. You cannot see the student's practical work, so stick to theory and concepts and never ask the student to write or demonstrate anything.

Context:
- Previous conversation: {{conversation_history}}
- Subject: {{subject}}
- Syllabus: {{syllabus}}
- Difficulty (1-100): {{difficulty}}
- Teacher notes (student performance and questioning strategy): {{teacher_notes}}

Guidance:
- Match the student's level and target weak areas named in the teacher notes.
- If the student is struggling, simplify and offer a hint; if they answer well, raise the difficulty gradually.
- Keep to a single concept that can be answered in 2-3 minutes and follows from the conversation.

Output exactly one question, friendly and professional, with no prefix such as "Question:"."#
                .to_string(),

            task: r#"You are a technical interviewer setting one practical task during a viva.

Context:
- Previous conversation: {{conversation_history}}
- Subject: {{subject}}
- Syllabus: {{syllabus}}
- Difficulty (1-100): {{difficulty}}
- Teacher notes: {{teacher_notes}}
- Tasks still to assign: {{remaining_tasks}}

Guidance:
- Tailor the task to the strengths, weaknesses and preferred format in the teacher notes.
- 1-3 sentences, answerable in 4-7 minutes, testing a real-world application of the subject.
- Coding subjects get a write, debug or optimise task; theoretical subjects get a scenario or problem to solve.

Return only the task description, one task, using no symbols other than periods, commas and question marks, and no prefix such as "Task:"."#
                .to_string(),

            end_interview: r#"You are closing a technical viva examination.

Student name: {{student_name}}
Subject: {{subject}}
Conversation: {{conversation_history}}

Write a 3-5 sentence conclusion that thanks the student, states that the examination is complete and stays positive and encouraging. Do not give an assessment or grade.

Return only the conclusion, without formatting symbols."#
                .to_string(),
        }
    }
}

/// Prompts for the doctor consultation agent and its tools.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsultationPrompts {
    pub agent_system: String,
    pub introduction: String,
    pub patient_analysis: String,
    pub image_analysis: String,
    pub image_response: String,
}

impl Default for ConsultationPrompts {
    fn default() -> Self {
        Self {
            agent_system: r#"You are an AI doctor assistant helping a patient with medical concerns.

Patient ID: {{user_id}}
Patient information: {{patient_info}}

Conversation so far:
{{conversation_history}}

Tools:
{{tools}}

Rules:
1. For ordinary conversation always use patient_analysis, passing conversation_history, user_input, image_analysis and patient_info.
2. Be professional, empathetic and medically accurate; never give a definitive diagnosis.
3. Make clear you are an AI and not a replacement for professional care.
4. Advise immediate medical attention when something looks serious.
5. Keep answers to 3-7 sentences focused on the current concern.

If you cannot call tools directly, answer in this form:
Action: <one of [{{tool_names}}]>
Action Input: <JSON object with every field>
and finish with "Final Answer: <reply to the patient>"."#
                .to_string(),

            introduction: r#"Write a short greeting for an AI medical assistant meeting a patient.

It should be warm and professional, explain that you are an AI assistant that provides medical information, make clear you do not replace professional care, invite the patient to describe their concern, and stay within 3-5 sentences.

Return only the greeting text, without formatting symbols."#
                .to_string(),

            patient_analysis: r#"You are an AI doctor assistant advising a patient. Be professional, empathetic and informative.

Context:
- Patient's current message: {{user_input}}
- Previous conversation: {{conversation_history}}
- Visual analysis of the patient: {{image_analysis}}
- Known patient information: {{patient_info}}

Guidance:
1. Consider the symptoms and concerns in the messages and the visual analysis.
2. Ask follow-up questions when you need more detail.
3. Give clear, accurate information and practical advice; basic first aid is fine, prescribing medication is not.
4. Offer possible explanations rather than definitive diagnoses.
5. Advise immediate medical attention for signs of a serious condition.

Reply in 3-7 sentences, direct and compassionate, without jargon or tangents."#
                .to_string(),

            image_analysis: r#"You are a medical image analyst reviewing an image a patient uploaded.

Patient's context: "{{user_input}}"

Describe what is visible, note possible indicators or abnormalities without a definitive diagnosis, recommend sensible next steps for anything concerning, explain any limits caused by image quality, and add short educational context. Keep the tone clear and professional."#
                .to_string(),

            image_response: r#"You are a medical professional replying to a patient who uploaded a medical image.

The patient said: "{{message}}"

Image analysis: {{analysis}}

Acknowledge the concern, use the analysis to give relevant information or advice, and explain the limits of AI analysis, recommending professional care where appropriate. Stay warm and professional and avoid definitive diagnoses."#
                .to_string(),
        }
    }
}

impl Prompts {
    /// Load prompts from the default location, with optional custom directory and variables.
    pub fn load(
        custom_dir: Option<&str>,
        custom_variables: Option<&std::collections::HashMap<String, String>>,
    ) -> crate::error::Result<Self> {
        let mut prompts = Prompts::default();

        if let Some(vars) = custom_variables {
            prompts.variables = vars.clone();
        }

        if let Some(dir) = custom_dir {
            let custom_path = PathBuf::from(shellexpand::tilde(dir).to_string());

            let viva_path = custom_path.join("viva.toml");
            if viva_path.exists() {
                let content = std::fs::read_to_string(&viva_path)?;
                prompts.viva = toml::from_str(&content)?;
            }

            let consultation_path = custom_path.join("consultation.toml");
            if consultation_path.exists() {
                let content = std::fs::read_to_string(&consultation_path)?;
                prompts.consultation = toml::from_str(&content)?;
            }
        }

        Ok(prompts)
    }

    /// Render a prompt template with the given variables.
    pub fn render(template: &str, vars: &std::collections::HashMap<String, String>) -> String {
        let mut result = template.to_string();
        for (key, value) in vars {
            result = result.replace(&format!("{{{{{}}}}}", key), value);
        }
        result
    }

    /// Render a prompt template with both provided variables and custom config variables.
    /// Provided variables take precedence over custom config variables.
    pub fn render_with_custom(
        &self,
        template: &str,
        vars: &std::collections::HashMap<String, String>,
    ) -> String {
        let mut merged = self.variables.clone();
        for (key, value) in vars {
            merged.insert(key.clone(), value.clone());
        }
        Self::render(template, &merged)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_default_prompts() {
        let prompts = Prompts::default();
        assert!(prompts.viva.question.contains("{{teacher_notes}}"));
        assert!(prompts.viva.task.contains("{{remaining_tasks}}"));
        assert!(prompts.consultation.patient_analysis.contains("{{user_input}}"));
    }

    #[test]
    fn test_render_template() {
        let template = "Hello {{name}}, you have {{count}} messages.";
        let mut vars = HashMap::new();
        vars.insert("name".to_string(), "Alice".to_string());
        vars.insert("count".to_string(), "5".to_string());

        let result = Prompts::render(template, &vars);
        assert_eq!(result, "Hello Alice, you have 5 messages.");
    }

    #[test]
    fn test_provided_variables_override_custom() {
        let mut prompts = Prompts::default();
        prompts.variables.insert("school".to_string(), "MIT".to_string());
        prompts.variables.insert("subject".to_string(), "Art".to_string());

        let mut vars = HashMap::new();
        vars.insert("subject".to_string(), "DBMS".to_string());

        let rendered = prompts.render_with_custom("{{subject}} at {{school}}", &vars);
        assert_eq!(rendered, "DBMS at MIT");
    }

    #[test]
    fn test_load_custom_viva_prompts() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("viva.toml"),
            "question = \"Ask about {{subject}}\"\n",
        )
        .unwrap();

        let prompts = Prompts::load(dir.path().to_str(), None).unwrap();
        assert_eq!(prompts.viva.question, "Ask about {{subject}}");
        // Unspecified templates keep their defaults.
        assert!(!prompts.viva.task.is_empty());
        assert!(!prompts.consultation.agent_system.is_empty());
    }
}
