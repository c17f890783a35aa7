//! Tool-input repair.
//!
//! Models hand back tool arguments as anything from clean JSON to prose with
//! a half-finished object in a code fence. [`normalize`] turns whatever
//! arrived into a complete, typed [`ToolRequest`] and never fails.

use super::tools::ToolKind;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::LazyLock;
use tracing::debug;

static FENCED_JSON: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)```(?:json|JSON)?\s*(.*?)\s*```").expect("Invalid regex")
});

static JSON_PAIR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#""(\w+)"\s*:\s*(?:"((?:[^"\\]|\\.)*)"|(-?\d+))"#).expect("Invalid regex")
});

/// Session-derived values used for fields the model left out.
pub type ToolDefaults = HashMap<String, String>;

/// Context shared by the examiner's question and task tools.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExamContext {
    pub conversation_history: String,
    pub subject: String,
    pub syllabus: String,
    pub difficulty: u8,
    pub teacher_notes: String,
}

/// Context for the patient analysis tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatientContext {
    pub conversation_history: String,
    pub user_input: String,
    pub image_analysis: String,
    pub patient_info: String,
}

/// A validated tool invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "name", rename_all = "snake_case")]
pub enum ToolRequest {
    VivaQuestionGenerator(ExamContext),
    TaskGenerator {
        context: ExamContext,
        remaining_tasks: u32,
    },
    EndInterview {
        conversation_history: String,
        student_name: String,
        subject: String,
    },
    PatientAnalysis(PatientContext),
    MedicalImageAnalysis {
        user_input: String,
    },
}

impl ToolRequest {
    /// The tool this request targets.
    pub fn kind(&self) -> ToolKind {
        match self {
            ToolRequest::VivaQuestionGenerator(_) => ToolKind::VivaQuestion,
            ToolRequest::TaskGenerator { .. } => ToolKind::Task,
            ToolRequest::EndInterview { .. } => ToolKind::EndInterview,
            ToolRequest::PatientAnalysis(_) => ToolKind::PatientAnalysis,
            ToolRequest::MedicalImageAnalysis { .. } => ToolKind::MedicalImage,
        }
    }
}

/// Repair a raw argument payload into a complete request for `kind`.
///
/// Objects are used as-is; strings are fence-stripped, parsed as JSON when
/// they look like an object, and otherwise scanned for `"key": value` pairs
/// of the tool's known fields. Missing fields come from `defaults`, then
/// from fixed fallbacks.
pub fn normalize(kind: ToolKind, raw: &Value, defaults: &ToolDefaults) -> ToolRequest {
    let mut fields = match raw {
        Value::Object(map) => map.clone(),
        Value::String(text) => parse_text(kind, text),
        _ => Map::new(),
    };

    if kind.is_consultation() {
        if !fields.contains_key("user_input") {
            if let Some(input) = fields.remove("input") {
                fields.insert("user_input".to_string(), input);
            }
        }
        fields.remove("tool");
    }

    for field in kind.fields() {
        let missing = match fields.get(*field) {
            None | Some(Value::Null) => true,
            Some(Value::String(s)) => s.trim().is_empty(),
            Some(_) => false,
        };
        if missing {
            if let Some(value) = defaults.get(*field) {
                fields.insert(field.to_string(), Value::String(value.clone()));
            }
        }
    }

    coerce(kind, &fields)
}

/// Convenience for argument text produced by the model.
pub fn normalize_text(kind: ToolKind, raw: &str, defaults: &ToolDefaults) -> ToolRequest {
    normalize(kind, &Value::String(raw.to_string()), defaults)
}

fn parse_text(kind: ToolKind, text: &str) -> Map<String, Value> {
    let body = strip_fences(text);

    if body.starts_with('{') && body.ends_with('}') {
        match serde_json::from_str::<Value>(body) {
            Ok(Value::Object(map)) => return map,
            Ok(_) => {}
            Err(e) => debug!("Tool input for {} is not valid JSON: {}", kind.name(), e),
        }
    }

    let extracted = extract_pairs(kind, body);
    if extracted.is_empty() && kind.is_consultation() && !body.is_empty() {
        let mut map = Map::new();
        map.insert("user_input".to_string(), Value::String(body.to_string()));
        return map;
    }
    extracted
}

fn strip_fences(text: &str) -> &str {
    if let Some(caps) = FENCED_JSON.captures(text) {
        if let Some(inner) = caps.get(1) {
            return inner.as_str().trim();
        }
    }

    // Unterminated fence.
    let trimmed = text.trim();
    match trimmed.strip_prefix("```") {
        Some(rest) => rest
            .strip_prefix("json")
            .or_else(|| rest.strip_prefix("JSON"))
            .unwrap_or(rest)
            .trim(),
        None => trimmed,
    }
}

/// Regex fallback over the tool's allow-listed fields. The first occurrence of a field wins.
fn extract_pairs(kind: ToolKind, text: &str) -> Map<String, Value> {
    let fields = kind.fields();
    let mut map = Map::new();

    for caps in JSON_PAIR.captures_iter(text) {
        let field = &caps[1];
        if !fields.iter().any(|known| *known == field) || map.contains_key(field) {
            continue;
        }

        if let Some(raw) = caps.get(2) {
            map.insert(field.to_string(), Value::String(unescape(raw.as_str())));
        } else if ToolKind::is_integer_field(field) {
            if let Ok(value) = caps[3].parse::<i64>() {
                map.insert(field.to_string(), Value::from(value));
            }
        }
    }

    map
}

/// Decode JSON string escapes, keeping the raw text if they are invalid.
fn unescape(raw: &str) -> String {
    serde_json::from_str::<String>(&format!("\"{}\"", raw)).unwrap_or_else(|_| raw.to_string())
}

fn coerce(kind: ToolKind, fields: &Map<String, Value>) -> ToolRequest {
    let exam_context = || ExamContext {
        conversation_history: text_field(fields, "conversation_history", ""),
        subject: text_field(fields, "subject", "Computer Science"),
        syllabus: text_field(fields, "syllabus", ""),
        difficulty: integer_field(fields, "difficulty", 50).clamp(1, 100) as u8,
        teacher_notes: text_field(fields, "teacher_notes", ""),
    };

    match kind {
        ToolKind::VivaQuestion => ToolRequest::VivaQuestionGenerator(exam_context()),
        ToolKind::Task => ToolRequest::TaskGenerator {
            context: exam_context(),
            remaining_tasks: integer_field(fields, "remaining_tasks", 1).max(0) as u32,
        },
        ToolKind::EndInterview => ToolRequest::EndInterview {
            conversation_history: text_field(fields, "conversation_history", ""),
            student_name: text_field(fields, "student_name", "Student"),
            subject: text_field(fields, "subject", "Computer Science"),
        },
        ToolKind::PatientAnalysis => ToolRequest::PatientAnalysis(PatientContext {
            conversation_history: text_field(fields, "conversation_history", ""),
            user_input: text_field(fields, "user_input", "Help me with my medical issue"),
            image_analysis: text_field(fields, "image_analysis", "No visual analysis available"),
            patient_info: text_field(fields, "patient_info", "No patient info provided"),
        }),
        ToolKind::MedicalImage => ToolRequest::MedicalImageAnalysis {
            user_input: text_field(fields, "user_input", "Please analyze this medical image"),
        },
    }
}

fn text_field(fields: &Map<String, Value>, key: &str, fallback: &str) -> String {
    match fields.get(key) {
        Some(Value::String(s)) if !s.trim().is_empty() => s.clone(),
        None | Some(Value::Null) | Some(Value::String(_)) => fallback.to_string(),
        Some(other) => other.to_string(),
    }
}

fn integer_field(fields: &Map<String, Value>, key: &str, fallback: i64) -> i64 {
    match fields.get(key) {
        Some(Value::Number(n)) => n
            .as_i64()
            .or_else(|| n.as_f64().map(|f| f.round() as i64))
            .unwrap_or(fallback),
        Some(Value::String(s)) => s.trim().parse().unwrap_or(fallback),
        _ => fallback,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn exam_defaults() -> ToolDefaults {
        let mut defaults = ToolDefaults::new();
        defaults.insert("conversation_history".to_string(), "Examiner: Hi".to_string());
        defaults.insert("subject".to_string(), "DBMS".to_string());
        defaults.insert("syllabus".to_string(), "Normalisation".to_string());
        defaults.insert("difficulty".to_string(), "70".to_string());
        defaults.insert("teacher_notes".to_string(), "Weak on joins".to_string());
        defaults.insert("remaining_tasks".to_string(), "2".to_string());
        defaults
    }

    #[test]
    fn test_fenced_json_with_all_keys() {
        let raw = "```json\n{\"conversation_history\": \"h\", \"subject\": \"OS\", \"syllabus\": \"Paging\", \"difficulty\": 30, \"teacher_notes\": \"n\"}\n```";
        let request = normalize_text(ToolKind::VivaQuestion, raw, &exam_defaults());
        assert_eq!(
            request,
            ToolRequest::VivaQuestionGenerator(ExamContext {
                conversation_history: "h".to_string(),
                subject: "OS".to_string(),
                syllabus: "Paging".to_string(),
                difficulty: 30,
                teacher_notes: "n".to_string(),
            })
        );
    }

    #[test]
    fn test_garbage_uses_session_defaults() {
        let request = normalize_text(ToolKind::Task, "call the tool please", &exam_defaults());
        match request {
            ToolRequest::TaskGenerator {
                context,
                remaining_tasks,
            } => {
                assert_eq!(context.subject, "DBMS");
                assert_eq!(context.difficulty, 70);
                assert_eq!(context.conversation_history, "Examiner: Hi");
                assert_eq!(remaining_tasks, 2);
            }
            other => panic!("Expected TaskGenerator, got {:?}", other),
        }
    }

    #[test]
    fn test_empty_input_without_defaults_uses_literals() {
        let request = normalize(ToolKind::EndInterview, &Value::Null, &ToolDefaults::new());
        assert_eq!(
            request,
            ToolRequest::EndInterview {
                conversation_history: String::new(),
                student_name: "Student".to_string(),
                subject: "Computer Science".to_string(),
            }
        );
    }

    #[test]
    fn test_regex_fallback_on_broken_json() {
        let raw = r#"{"subject": "Networks", "difficulty": 80, "syllabus": "TCP","#;
        let request = normalize_text(ToolKind::VivaQuestion, raw, &ToolDefaults::new());
        match request {
            ToolRequest::VivaQuestionGenerator(context) => {
                assert_eq!(context.subject, "Networks");
                assert_eq!(context.difficulty, 80);
                assert_eq!(context.syllabus, "TCP");
            }
            other => panic!("Unexpected request {:?}", other),
        }
    }

    #[test]
    fn test_regex_fallback_decodes_escapes() {
        let raw = r#"{"teacher_notes": "C:\\temp\tcheck \u00e9t\u00e9 \"joins\"", "subject": "DB", "subject": "OS""#;
        match normalize_text(ToolKind::VivaQuestion, raw, &ToolDefaults::new()) {
            ToolRequest::VivaQuestionGenerator(context) => {
                assert_eq!(context.teacher_notes, "C:\\temp\tcheck \u{e9}t\u{e9} \"joins\"");
                assert_eq!(context.subject, "DB");
            }
            other => panic!("Unexpected request {:?}", other),
        }
    }

    #[test]
    fn test_regex_fallback_keeps_invalid_escapes_raw() {
        let raw = r#"{"syllabus": "bad \q escape", "#;
        match normalize_text(ToolKind::VivaQuestion, raw, &ToolDefaults::new()) {
            ToolRequest::VivaQuestionGenerator(context) => {
                assert_eq!(context.syllabus, r"bad \q escape");
            }
            other => panic!("Unexpected request {:?}", other),
        }
    }

    #[test]
    fn test_mapping_used_as_is_with_coercion() {
        let raw = json!({"subject": 42, "difficulty": "250", "teacher_notes": null});
        let request = normalize(ToolKind::VivaQuestion, &raw, &ToolDefaults::new());
        match request {
            ToolRequest::VivaQuestionGenerator(context) => {
                assert_eq!(context.subject, "42");
                assert_eq!(context.difficulty, 100);
                assert_eq!(context.teacher_notes, "");
            }
            other => panic!("Unexpected request {:?}", other),
        }
    }

    #[test]
    fn test_consultation_plain_text_becomes_user_input() {
        let mut defaults = ToolDefaults::new();
        defaults.insert("patient_info".to_string(), "Age 40".to_string());

        let request = normalize_text(
            ToolKind::PatientAnalysis,
            "I have had a headache for three days",
            &defaults,
        );
        assert_eq!(
            request,
            ToolRequest::PatientAnalysis(PatientContext {
                conversation_history: String::new(),
                user_input: "I have had a headache for three days".to_string(),
                image_analysis: "No visual analysis available".to_string(),
                patient_info: "Age 40".to_string(),
            })
        );
    }

    #[test]
    fn test_consultation_input_key_renamed() {
        let raw = json!({"input": "My knee hurts", "tool": "patient_analysis"});
        match normalize(ToolKind::PatientAnalysis, &raw, &ToolDefaults::new()) {
            ToolRequest::PatientAnalysis(context) => {
                assert_eq!(context.user_input, "My knee hurts");
            }
            other => panic!("Unexpected request {:?}", other),
        }
    }

    #[test]
    fn test_request_kind() {
        let request = normalize(ToolKind::MedicalImage, &Value::Null, &ToolDefaults::new());
        assert_eq!(request.kind(), ToolKind::MedicalImage);
    }
}
