//! Interactive doctor consultation in the terminal.

use crate::cli::preflight::{self, Operation};
use crate::cli::Output;
use crate::config::Settings;
use crate::consultation::image_data_url;
use crate::orchestrator::Orchestrator;
use console::style;
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use uuid::Uuid;

/// A line typed by the patient.
#[derive(Debug, PartialEq)]
enum Input {
    Exit,
    Message(String),
    Image { path: PathBuf, text: String },
}

fn parse_input(line: &str) -> Option<Input> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }

    if line.eq_ignore_ascii_case("exit") || line.eq_ignore_ascii_case("quit") {
        return Some(Input::Exit);
    }

    if let Some(rest) = line.strip_prefix("/image") {
        let rest = rest.trim();
        if rest.is_empty() {
            return None;
        }
        let (path, text) = rest.split_once(char::is_whitespace).unwrap_or((rest, ""));
        return Some(Input::Image {
            path: Settings::expand_path(path),
            text: text.trim().to_string(),
        });
    }

    Some(Input::Message(line.to_string()))
}

/// Run the interactive consultation command.
pub async fn run_consult(patient_info: Option<String>, settings: Settings) -> anyhow::Result<()> {
    if let Err(e) = preflight::check(Operation::Session, &settings) {
        Output::error(&format!("{}", e));
        Output::info("Run 'parley check' for detailed diagnostics.");
        return Err(e.into());
    }

    let orchestrator = Orchestrator::new(settings)?;
    let user_id = Uuid::new_v4().to_string();
    let mut doctor = orchestrator.consultation(&user_id, patient_info)?;

    println!("\n{}", style("Parley Consultation").bold().cyan());
    println!(
        "{}\n",
        style("Describe how you feel. Use '/image <path> [question]' to share a photo, or 'exit' to quit.").dim()
    );
    Output::warning("This is general information, not a diagnosis. In an emergency, call your local emergency number.");

    let spinner = Output::spinner("Connecting...");
    let greeting = doctor.start().await;
    spinner.finish_and_clear();
    Output::agent("Doctor", &greeting);

    let stdin = io::stdin();
    let mut stdout = io::stdout();

    loop {
        print!("{} ", style("You:").green().bold());
        stdout.flush()?;

        let mut line = String::new();
        if stdin.lock().read_line(&mut line)? == 0 {
            break;
        }

        let reply = match parse_input(&line) {
            None => continue,
            Some(Input::Exit) => break,
            Some(Input::Message(text)) => {
                let spinner = Output::spinner("Doctor is thinking...");
                let reply = doctor.process_patient_message(&text, None).await;
                spinner.finish_and_clear();
                reply
            }
            Some(Input::Image { path, text }) => {
                let bytes = match std::fs::read(&path) {
                    Ok(bytes) => bytes,
                    Err(e) => {
                        Output::error(&format!("Could not read {}: {}", path.display(), e));
                        continue;
                    }
                };
                let spinner = Output::spinner("Looking at your image...");
                let reply = doctor
                    .process_uploaded_image(&text, &image_data_url(&bytes))
                    .await;
                spinner.finish_and_clear();
                reply
            }
        };

        Output::agent("Doctor", &reply);
    }

    Output::info("Take care!");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_input() {
        assert_eq!(parse_input("   "), None);
        assert_eq!(parse_input("QUIT"), Some(Input::Exit));
        assert_eq!(
            parse_input(" my head hurts "),
            Some(Input::Message("my head hurts".to_string()))
        );
        assert_eq!(parse_input("/image"), None);
    }

    #[test]
    fn test_parse_image_command() {
        assert_eq!(
            parse_input("/image /tmp/rash.jpg is this serious?"),
            Some(Input::Image {
                path: PathBuf::from("/tmp/rash.jpg"),
                text: "is this serious?".to_string(),
            })
        );
        assert_eq!(
            parse_input("/image /tmp/rash.jpg"),
            Some(Input::Image {
                path: PathBuf::from("/tmp/rash.jpg"),
                text: String::new(),
            })
        );
    }
}
