//! Reasoning-trace parsing and reply sanitization.
//!
//! Models prompted with a Thought/Action/Observation format leak those labels
//! into their replies. This module pulls the user-facing text back out and
//! recognises textual tool calls for the agent runner.

use regex::Regex;
use std::sync::LazyLock;

const FINAL_ANSWER: &str = "Final Answer:";
const OBSERVATION: &str = "Observation:";
const THOUGHT: &str = "Thought:";

/// Labels that end a `Thought:` section early, before its line ends.
const THOUGHT_TERMINATORS: [&str; 3] = ["Action:", "Observation:", "Final Answer:"];

static FENCED_BLOCK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)```.*?```").expect("Invalid regex"));

static ACTION_BLOCK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)Action\s*:.*?Action\s*Input\s*:[^\n]*(?:\n|$)").expect("Invalid regex")
});

static QUESTION_LINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"Question:[^\n]*\n").expect("Invalid regex"));

static OBSERVATION_LINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"Observation:[^\n]*(?:\n|$)").expect("Invalid regex"));

static CHAIN_BANNER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^[> \t]*(?:Entering new \w+ chain\.\.\.|Finished chain\.)[ \t]*\n*")
        .expect("Invalid regex")
});

static TOOL_NARRATION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^[ \t]*\d+\.[^\n]*\busing the \w+ tool\b[^\n]*(?:\n|$)")
        .expect("Invalid regex")
});

static INVALID_TOOL_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^[^\n]*is not a valid tool, try one of[^\n]*(?:\n|$)").expect("Invalid regex")
});

static RESIDUAL_LABEL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?:Final Answer|Action\s*Input|Action|Thought|Observation|Question)\s*:[ \t]*")
        .expect("Invalid regex")
});

static BLANK_RUN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\n\s*\n").expect("Invalid regex"));

static TEXT_ACTION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)Action\s*\d*\s*:[\s]*(.*?)[\s]*Action\s*\d*\s*Input\s*\d*\s*:[\s]*(.*)")
        .expect("Invalid regex")
});

/// Which clean-up passes apply to a reply.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SanitizeOptions {
    /// Drop numbered "using the X tool" narration and invalid-tool notices.
    pub strip_tool_narration: bool,
    /// Soft length budget in characters, cut at a sentence boundary.
    pub char_budget: Option<usize>,
}

impl SanitizeOptions {
    /// Profile used for examiner replies.
    pub fn examination() -> Self {
        Self {
            strip_tool_narration: true,
            char_budget: None,
        }
    }

    /// Profile used for doctor replies.
    pub fn consultation(char_budget: usize) -> Self {
        Self {
            strip_tool_narration: false,
            char_budget: Some(char_budget),
        }
    }
}

/// Turn raw agent output into user-facing text.
///
/// Text after a `Final Answer:` label wins, then text after an
/// `Observation:` label; otherwise every scaffold section is stripped.
/// The character budget only applies to scaffold-stripped text.
pub fn sanitize(raw: &str, options: &SanitizeOptions) -> String {
    if let Some(answer) = extract_final_answer(raw) {
        return strip_labels(answer);
    }
    if let Some(observation) = extract_observation(raw) {
        return strip_labels(observation);
    }

    let cleaned = strip_scaffold(raw, options);
    match options.char_budget {
        Some(budget) => truncate_at_sentence(&cleaned, budget),
        None => cleaned,
    }
}

fn extract_final_answer(text: &str) -> Option<&str> {
    let start = text.find(FINAL_ANSWER)? + FINAL_ANSWER.len();
    let rest = text[start..].trim_start();
    let end = rest.find("\n\n").unwrap_or(rest.len());
    Some(rest[..end].trim())
}

fn extract_observation(text: &str) -> Option<&str> {
    let start = text.find(OBSERVATION)? + OBSERVATION.len();
    let rest = text[start..].trim_start();
    let end = rest.find("\n\nThought:").unwrap_or(rest.len());
    Some(rest[..end].trim())
}

/// Light pass for already-extracted answers: remove trace sections and labels only.
fn strip_labels(text: &str) -> String {
    let text = ACTION_BLOCK.replace_all(text, "");
    let text = remove_thoughts(&text);
    let text = remove_residual_labels(text);
    BLANK_RUN.replace_all(&text, "\n\n").trim().to_string()
}

fn strip_scaffold(text: &str, options: &SanitizeOptions) -> String {
    let text = FENCED_BLOCK.replace_all(text, "");
    let text = ACTION_BLOCK.replace_all(&text, "");
    let text = remove_thoughts(&text);
    let text = QUESTION_LINE.replace_all(&text, "");
    let text = OBSERVATION_LINE.replace_all(&text, "");
    let mut text = CHAIN_BANNER.replace_all(&text, "").into_owned();

    if options.strip_tool_narration {
        text = TOOL_NARRATION.replace_all(&text, "").into_owned();
        text = INVALID_TOOL_LINE.replace_all(&text, "").into_owned();
    }

    let text = remove_residual_labels(text);
    BLANK_RUN.replace_all(&text, "\n\n").trim().to_string()
}

/// Strip labels until none are left; a removal can splice a new one together.
fn remove_residual_labels(mut text: String) -> String {
    while RESIDUAL_LABEL.is_match(&text) {
        text = RESIDUAL_LABEL.replace_all(&text, "").into_owned();
    }
    text
}

/// Remove every `Thought:` section up to the end of its line or the next trace label.
fn remove_thoughts(text: &str) -> String {
    let mut result = String::with_capacity(text.len());
    let mut rest = text;

    while let Some(start) = rest.find(THOUGHT) {
        result.push_str(&rest[..start]);
        let after = &rest[start + THOUGHT.len()..];
        let end = THOUGHT_TERMINATORS
            .iter()
            .filter_map(|label| after.find(label))
            .chain(after.find('\n'))
            .min()
            .unwrap_or(after.len());
        rest = &after[end..];
    }

    result.push_str(rest);
    result
}

/// Shorten text to roughly `budget` characters, ending on a sentence boundary.
pub fn truncate_at_sentence(text: &str, budget: usize) -> String {
    if text.chars().count() <= budget {
        return text.to_string();
    }

    let mut shortened = String::new();
    let mut length = 0;
    for sentence in split_sentences(text) {
        let sentence_len = sentence.chars().count();
        if length + sentence_len < budget {
            shortened.push_str(sentence);
            shortened.push(' ');
            length += sentence_len + 1;
        } else {
            break;
        }
    }

    let mut shortened = shortened.trim().to_string();
    if shortened.is_empty() {
        // Not even one sentence fits.
        shortened = text.chars().take(budget).collect::<String>().trim_end().to_string();
    }

    if shortened != text.trim() {
        if shortened.ends_with('.') {
            shortened.pop();
        }
        shortened.push_str("...");
    }
    shortened
}

/// Split after `.`, `!` or `?` when followed by whitespace.
fn split_sentences(text: &str) -> Vec<&str> {
    let mut sentences = Vec::new();
    let mut start = 0;
    let mut chars = text.char_indices().peekable();

    while let Some((i, c)) = chars.next() {
        if matches!(c, '.' | '!' | '?') {
            if let Some(&(_, next)) = chars.peek() {
                if next.is_whitespace() {
                    sentences.push(&text[start..i + c.len_utf8()]);
                    while let Some(&(_, ws)) = chars.peek() {
                        if !ws.is_whitespace() {
                            break;
                        }
                        chars.next();
                    }
                    start = chars.peek().map(|&(j, _)| j).unwrap_or(text.len());
                }
            }
        }
    }

    if start < text.len() {
        sentences.push(&text[start..]);
    }
    sentences
}

/// One step of a textual reasoning trace.
#[derive(Debug, Clone, PartialEq)]
pub enum TraceStep {
    /// The model asked for a tool.
    Action { tool: String, input: String },
    /// The model gave its final answer.
    Final(String),
    /// The trace was malformed; the string is fed back as an observation.
    Malformed(String),
    /// Plain text with no trace labels.
    Plain(String),
}

/// Parse model text written in the Thought/Action/Final Answer format.
pub fn parse_trace(text: &str) -> TraceStep {
    if let Some(caps) = TEXT_ACTION.captures(text) {
        let tool = caps[1]
            .trim()
            .trim_matches(|c: char| c == '*' || c == '`' || c == '"' || c == '[' || c == ']')
            .trim()
            .to_string();
        let input = &caps[2];
        let input = input
            .find("\nObservation")
            .map(|end| &input[..end])
            .unwrap_or(input)
            .trim()
            .trim_matches('"')
            .to_string();

        if tool.is_empty() {
            return TraceStep::Malformed(
                "Invalid Format: Missing tool name after 'Action:'".to_string(),
            );
        }
        return TraceStep::Action { tool, input };
    }

    if let Some(start) = text.find(FINAL_ANSWER) {
        return TraceStep::Final(text[start + FINAL_ANSWER.len()..].trim().to_string());
    }

    if text.contains("Action:") {
        return TraceStep::Malformed(
            "Invalid Format: Missing 'Action Input:' after 'Action:'".to_string(),
        );
    }

    TraceStep::Plain(text.trim().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    const MARKERS: [&str; 6] = [
        "Final Answer:",
        "Action Input:",
        "Action:",
        "Thought:",
        "Observation:",
        "Question:",
    ];

    fn assert_no_markers(text: &str) {
        for marker in MARKERS {
            assert!(!text.contains(marker), "{:?} still contains {}", text, marker);
        }
    }

    #[test]
    fn test_final_answer_wins() {
        let raw = "Thought: I should ask about joins.\nFinal Answer:  What is a natural join?  ";
        assert_eq!(
            sanitize(raw, &SanitizeOptions::examination()),
            "What is a natural join?"
        );
    }

    #[test]
    fn test_final_answer_stops_at_blank_line() {
        let raw = "Final Answer: Explain ACID.\n\nThought: done";
        assert_eq!(sanitize(raw, &SanitizeOptions::default()), "Explain ACID.");
    }

    #[test]
    fn test_observation_used_without_final_answer() {
        let raw = "Thought: use a tool\nAction: viva_question_generator\nAction Input: {}\nObservation: Why do we normalise tables?\n\nThought: I now know";
        assert_eq!(
            sanitize(raw, &SanitizeOptions::examination()),
            "Why do we normalise tables?"
        );
    }

    #[test]
    fn test_scaffold_stripped_without_answer_markers() {
        let raw = "Entering new AgentExecutor chain...\nQuestion: hi\nThought: thinking hard\nAction: task_generator\nAction Input: {\"subject\": \"DB\"}\nWrite a query that lists all customers.\n```sql\nSELECT 1;\n```\n\n\n\nKeep it short.";
        let cleaned = sanitize(raw, &SanitizeOptions::examination());
        assert_eq!(cleaned, "Write a query that lists all customers.\n\nKeep it short.");
    }

    #[test]
    fn test_nested_markers_never_leak() {
        let inputs = [
            "Final Answer: Thought: hmm Action: x Action Input: {} Observation: y",
            "Observation: Question: what? Thought: maybe\nAction: t\nAction Input: {}",
            "Thought: Final Answer: Final Answer: ok",
            "Action: a\nThought: b\nQuestion: c",
            "Question: Action: Thought: Observation:",
            "ActionAction: : take ibuprofen",
            "Final Answer: ThoughtThought: : rest",
        ];
        for raw in inputs {
            assert_no_markers(&sanitize(raw, &SanitizeOptions::examination()));
            assert_no_markers(&sanitize(raw, &SanitizeOptions::consultation(750)));
        }
    }

    #[test]
    fn test_spliced_label_is_removed() {
        assert_eq!(
            sanitize("ActionAction: : take ibuprofen", &SanitizeOptions::consultation(750)),
            "take ibuprofen"
        );
    }

    #[test]
    fn test_thought_line_keeps_following_reply() {
        let raw = "Thought: I will ask about indexes.\nWhat is a B-tree index used for?";
        assert_eq!(
            sanitize(raw, &SanitizeOptions::examination()),
            "What is a B-tree index used for?"
        );
    }

    #[test]
    fn test_single_line_question_label_keeps_text() {
        assert_eq!(
            sanitize("Question: What is normalisation?", &SanitizeOptions::examination()),
            "What is normalisation?"
        );
        assert_eq!(
            sanitize("Question: hi\nWhat is normalisation?", &SanitizeOptions::examination()),
            "What is normalisation?"
        );
    }

    #[test]
    fn test_final_answer_ignores_budget() {
        let answer = "Drink plenty of water and rest for a few days. ".repeat(20);
        let answer = answer.trim();
        assert!(answer.chars().count() > 750);

        let raw = format!("Thought: I can answer.\nFinal Answer: {}", answer);
        assert_eq!(sanitize(&raw, &SanitizeOptions::consultation(750)), answer);
    }

    #[test]
    fn test_clean_text_is_unchanged() {
        let clean = "What is the difference between a primary key and a unique key?\n\nTake your time.";
        assert_eq!(sanitize(clean, &SanitizeOptions::examination()), clean);
        assert_eq!(sanitize(clean, &SanitizeOptions::consultation(750)), clean);
        assert_eq!(
            sanitize(&format!("  {}\n", clean), &SanitizeOptions::examination()),
            clean
        );
    }

    #[test]
    fn test_tool_narration_only_stripped_for_examination() {
        let raw = "1. I am using the task_generator tool now\nWrite a function that reverses a list.";
        assert_eq!(
            sanitize(raw, &SanitizeOptions::examination()),
            "Write a function that reverses a list."
        );
        assert!(sanitize(raw, &SanitizeOptions::consultation(750)).starts_with("1."));
    }

    #[test]
    fn test_invalid_tool_notice_removed() {
        let raw = "ask_question is not a valid tool, try one of [viva_question_generator].\nWhat is an index?";
        assert_eq!(
            sanitize(raw, &SanitizeOptions::examination()),
            "What is an index?"
        );
    }

    #[test]
    fn test_empty_input() {
        assert_eq!(sanitize("", &SanitizeOptions::examination()), "");
        assert_eq!(sanitize("Thought: nothing", &SanitizeOptions::examination()), "");
    }

    #[test]
    fn test_truncate_at_sentence_boundary() {
        let text = "First sentence here. Second sentence is longer! Third one?";
        assert_eq!(truncate_at_sentence(text, 100), text);
        assert_eq!(truncate_at_sentence(text, 45), "First sentence here...");
    }

    #[test]
    fn test_truncate_hard_cut_when_no_sentence_fits() {
        let text = "a".repeat(20);
        assert_eq!(truncate_at_sentence(&text, 5), "aaaaa...");
    }

    #[test]
    fn test_consultation_budget_applies() {
        let long = "This is a sentence. ".repeat(60);
        let cleaned = sanitize(&long, &SanitizeOptions::consultation(750));
        assert!(cleaned.chars().count() <= 753);
        assert!(cleaned.ends_with("..."));
    }

    #[test]
    fn test_split_sentences() {
        assert_eq!(
            split_sentences("One. Two!  Three? Four"),
            vec!["One.", "Two!", "Three?", "Four"]
        );
        assert_eq!(split_sentences("v1.2 is out."), vec!["v1.2 is out."]);
    }

    #[test]
    fn test_parse_trace_action() {
        let text = "Thought: I need a question\nAction: viva_question_generator\nAction Input: {\"subject\": \"OS\"}\nObservation: ignored";
        assert_eq!(
            parse_trace(text),
            TraceStep::Action {
                tool: "viva_question_generator".to_string(),
                input: "{\"subject\": \"OS\"}".to_string(),
            }
        );
    }

    #[test]
    fn test_parse_trace_final_and_plain() {
        assert_eq!(
            parse_trace("Thought: done\nFinal Answer: Rest and hydrate."),
            TraceStep::Final("Rest and hydrate.".to_string())
        );
        assert_eq!(
            parse_trace("  Just text.  "),
            TraceStep::Plain("Just text.".to_string())
        );
    }

    #[test]
    fn test_parse_trace_malformed() {
        assert!(matches!(
            parse_trace("Action: patient_analysis"),
            TraceStep::Malformed(_)
        ));
    }
}
