//! When to nudge the examiner towards a practical task.
//!
//! The result is only a hint rendered into the agent's prompt; the model is
//! free to ignore it.

use crate::config::ExamSettings;
use std::fmt;

/// Advisory state of an examination.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExamState {
    /// Nothing has been said yet.
    Introduction,
    /// The first task is due.
    FirstTask { remaining: u32 },
    /// The second task is due.
    SecondTask { remaining: u32 },
    /// Tasks are overdue.
    TasksOverdue { remaining: u32 },
    /// Keep asking questions.
    Questions,
}

impl fmt::Display for ExamState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExamState::Introduction => {
                write!(f, "Beginning of examination. Generate an appropriate introduction.")
            }
            ExamState::FirstTask { remaining } => write!(
                f,
                "IMPORTANT: Use the task_generator tool now to assign the first practical task. {} tasks remaining.",
                remaining
            ),
            ExamState::SecondTask { remaining } => write!(
                f,
                "IMPORTANT: Use the task_generator tool now to assign the second practical task. {} tasks remaining.",
                remaining
            ),
            ExamState::TasksOverdue { remaining } => write!(
                f,
                "IMPORTANT: Use the task_generator tool now. {} tasks remaining that must be assigned.",
                remaining
            ),
            ExamState::Questions => {
                write!(f, "Continue the examination with appropriate theoretical questions.")
            }
        }
    }
}

/// Message-count thresholds for task assignment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pacing {
    pub first_task_after: usize,
    pub second_task_after: usize,
    pub deadline: usize,
}

impl Default for Pacing {
    fn default() -> Self {
        Self::from_settings(&ExamSettings::default())
    }
}

impl Pacing {
    pub fn from_settings(settings: &ExamSettings) -> Self {
        Self {
            first_task_after: settings.first_task_after_messages,
            second_task_after: settings.second_task_after_messages,
            deadline: settings.task_deadline_messages,
        }
    }

    /// Decide the hint for a conversation of `messages` turns.
    pub fn state(&self, messages: usize, total_tasks: u32, completed_tasks: u32) -> ExamState {
        if messages == 0 {
            return ExamState::Introduction;
        }

        let remaining = total_tasks.saturating_sub(completed_tasks);
        if remaining == 0 {
            return ExamState::Questions;
        }

        if messages >= self.first_task_after && completed_tasks == 0 {
            ExamState::FirstTask { remaining }
        } else if messages >= self.second_task_after && completed_tasks == 1 {
            ExamState::SecondTask { remaining }
        } else if messages >= self.deadline {
            ExamState::TasksOverdue { remaining }
        } else {
            ExamState::Questions
        }
    }
}
