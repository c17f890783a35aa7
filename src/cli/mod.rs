//! CLI module for Parley.

pub mod commands;
mod output;
pub mod preflight;

pub use output::Output;

use clap::{Parser, Subcommand};

/// Parley - LLM examiner and consultation agents
///
/// Runs oral-examination and doctor-consultation agents over an
/// OpenAI-compatible chat endpoint, in the terminal or as an HTTP API.
#[derive(Parser, Debug)]
#[command(name = "parley")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Increase verbosity (-v for info, -vv for debug, -vvv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Path to configuration file
    #[arg(short, long, global = true)]
    pub config: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start the HTTP API server
    Serve {
        /// Host to bind to (defaults to server.host)
        #[arg(long)]
        host: Option<String>,

        /// Port to listen on (defaults to server.port)
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Sit an interactive viva examination in the terminal
    Viva {
        /// Student name
        #[arg(long)]
        student: String,

        /// Subject under examination
        #[arg(long)]
        subject: String,

        /// Background on the student
        #[arg(long)]
        student_info: Option<String>,

        /// Syllabus the questions should cover
        #[arg(long)]
        syllabus: Option<String>,

        /// Notes from the teacher
        #[arg(long)]
        notes: Option<String>,

        /// Difficulty from 1 to 100
        #[arg(long, value_parser = clap::value_parser!(u8).range(1..=100))]
        difficulty: Option<u8>,

        /// Number of practical tasks to assign
        #[arg(long)]
        tasks: Option<u32>,

        /// Examiner turns before the interview is closed
        #[arg(long)]
        max_questions: Option<usize>,
    },

    /// Start an interactive doctor consultation in the terminal
    Consult {
        /// Patient details (age, conditions, allergies)
        #[arg(long, env = "PARLEY_PATIENT_INFO")]
        patient_info: Option<String>,
    },

    /// Check configuration and credentials
    Check,

    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Show current configuration
    Show,

    /// Open configuration file in editor
    Edit,

    /// Show configuration file path
    Path,
}
