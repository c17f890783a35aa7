//! Interactive viva examination in the terminal.

use crate::cli::preflight::{self, Operation};
use crate::cli::Output;
use crate::config::Settings;
use crate::orchestrator::Orchestrator;
use crate::viva::{extract_code_submission, ExamConfig, ExamReply};
use console::style;
use std::io::{self, BufRead, Write};

/// Options for a terminal viva, as given on the command line.
#[derive(Debug, Clone)]
pub struct VivaOptions {
    pub student: String,
    pub subject: String,
    pub student_info: Option<String>,
    pub syllabus: Option<String>,
    pub notes: Option<String>,
    pub difficulty: Option<u8>,
    pub tasks: Option<u32>,
    pub max_questions: Option<usize>,
}

impl VivaOptions {
    fn into_config(self, settings: &Settings) -> ExamConfig {
        let mut config = ExamConfig::new(&self.student, &self.subject, &settings.exam);
        config.student_info = self.student_info.unwrap_or_default();
        config.syllabus = self.syllabus.unwrap_or_default();
        config.teacher_notes = self.notes.unwrap_or_default();
        config.difficulty = self.difficulty.unwrap_or(config.difficulty);
        config.total_tasks = self.tasks.unwrap_or(config.total_tasks);
        config.max_questions = self.max_questions.unwrap_or(config.max_questions);
        config
    }
}

/// Run the interactive viva command.
pub async fn run_viva(options: VivaOptions, settings: Settings) -> anyhow::Result<()> {
    if let Err(e) = preflight::check(Operation::Session, &settings) {
        Output::error(&format!("{}", e));
        Output::info("Run 'parley check' for detailed diagnostics.");
        return Err(e.into());
    }

    let config = options.into_config(&settings);
    let orchestrator = Orchestrator::new(settings)?;
    let mut examiner = orchestrator.examination(config)?;

    println!(
        "\n{}",
        style(format!(
            "{} viva for {}",
            examiner.config().subject,
            examiner.config().student_name
        ))
        .bold()
        .cyan()
    );
    println!(
        "{}\n",
        style("Answer in your own words. Type 'status' for progress, 'task' to repeat the last task, or 'exit' to quit.").dim()
    );

    let spinner = Output::spinner("Preparing the examination...");
    let intro = examiner.start().await;
    spinner.finish_and_clear();
    print_reply(&intro);

    let stdin = io::stdin();
    let mut stdout = io::stdout();

    while !examiner.is_finished() {
        print!("{} ", style("You:").green().bold());
        stdout.flush()?;

        let mut input = String::new();
        if stdin.lock().read_line(&mut input)? == 0 {
            break;
        }
        let input = input.trim();

        if input.is_empty() {
            continue;
        }

        if input.eq_ignore_ascii_case("exit") || input.eq_ignore_ascii_case("quit") {
            Output::info("Examination abandoned.");
            return Ok(());
        }

        if input.eq_ignore_ascii_case("status") {
            let status = examiner.status();
            Output::kv(
                "Tasks",
                &format!("{}/{}", status.completed_tasks, status.total_tasks),
            );
            Output::kv("Messages", &status.messages_count.to_string());
            Output::kv("State", &examiner.current_state().to_string());
            continue;
        }

        if input.eq_ignore_ascii_case("task") {
            Output::task(&examiner.latest_task());
            continue;
        }

        if input.contains("```") {
            let code = extract_code_submission(input);
            Output::info(&format!("Submitting {} line(s) of code.", code.lines().count()));
        }

        let spinner = Output::spinner("Examiner is thinking...");
        let reply = examiner.process_message(input).await;
        spinner.finish_and_clear();
        print_reply(&reply);
    }

    let status = examiner.status();
    Output::success(&format!(
        "Examination complete: {} message(s), {}/{} task(s) assigned.",
        status.messages_count, status.completed_tasks, status.total_tasks
    ));

    Ok(())
}

fn print_reply(reply: &ExamReply) {
    if reply.is_task {
        Output::task(&reply.message);
    } else {
        Output::agent("Examiner", &reply.message);
    }
}
