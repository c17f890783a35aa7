//! Parley CLI entry point.

use anyhow::Result;
use clap::Parser;
use parley::cli::{commands, Cli, Commands};
use parley::config::Settings;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let log_level = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::registry()
        .with(EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| format!("parley={}", log_level)),
        ))
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    // Load configuration
    let config_path = cli
        .config
        .as_deref()
        .map(Settings::expand_path)
        .unwrap_or_else(Settings::default_config_path);
    let settings = Settings::load_from(Some(&config_path))?;

    // Execute command
    match cli.command {
        Commands::Serve { host, port } => {
            commands::run_serve(host, port, settings).await?;
        }

        Commands::Viva {
            student,
            subject,
            student_info,
            syllabus,
            notes,
            difficulty,
            tasks,
            max_questions,
        } => {
            let options = commands::VivaOptions {
                student,
                subject,
                student_info,
                syllabus,
                notes,
                difficulty,
                tasks,
                max_questions,
            };
            commands::run_viva(options, settings).await?;
        }

        Commands::Consult { patient_info } => {
            commands::run_consult(patient_info, settings).await?;
        }

        Commands::Check => {
            commands::run_check(&settings, &config_path)?;
        }

        Commands::Config { action } => {
            commands::run_config(&action, settings, &config_path)?;
        }
    }

    Ok(())
}
