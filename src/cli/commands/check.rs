//! Check command - verify configuration and credentials.

use crate::cli::output::mask_secret;
use crate::cli::Output;
use crate::config::Settings;
use crate::credentials::parse_credentials;
use console::style;
use std::path::Path;

/// Check result for a single item.
#[derive(Debug)]
pub struct CheckResult {
    pub name: String,
    pub status: CheckStatus,
    pub message: String,
    pub hint: Option<String>,
}

#[derive(Debug, PartialEq)]
pub enum CheckStatus {
    Ok,
    Warning,
    Error,
}

impl CheckResult {
    fn ok(name: &str, message: &str) -> Self {
        Self {
            name: name.to_string(),
            status: CheckStatus::Ok,
            message: message.to_string(),
            hint: None,
        }
    }

    fn warning(name: &str, message: &str, hint: &str) -> Self {
        Self {
            name: name.to_string(),
            status: CheckStatus::Warning,
            message: message.to_string(),
            hint: Some(hint.to_string()),
        }
    }

    fn error(name: &str, message: &str, hint: &str) -> Self {
        Self {
            name: name.to_string(),
            status: CheckStatus::Error,
            message: message.to_string(),
            hint: Some(hint.to_string()),
        }
    }

    fn print(&self) {
        let icon = match self.status {
            CheckStatus::Ok => style("✓").green(),
            CheckStatus::Warning => style("!").yellow(),
            CheckStatus::Error => style("✗").red(),
        };

        println!("  {} {} - {}", icon, style(&self.name).bold(), self.message);

        if let Some(hint) = &self.hint {
            println!("    {} {}", style("→").dim(), style(hint).dim());
        }
    }
}

/// Run all diagnostic checks.
pub fn run_check(settings: &Settings, config_path: &Path) -> anyhow::Result<()> {
    Output::header("Parley Check");
    println!();

    let sections = [
        ("Configuration", vec![check_config_file(config_path), check_settings(settings)]),
        (
            "Provider",
            vec![
                check_credentials(
                    &settings.llm.credentials_env,
                    std::env::var(&settings.llm.credentials_env).ok().as_deref(),
                ),
                check_api_base(&settings.llm.api_base),
            ],
        ),
        (
            "Server",
            vec![
                check_cors_origin(&settings.server.effective_cors_origin()),
                check_prompts_dir(settings.prompts.custom_dir.as_deref()),
            ],
        ),
    ];

    let mut errors = 0;
    let mut warnings = 0;
    for (title, checks) in &sections {
        println!("{}", style(title).bold());
        for check in checks {
            check.print();
            match check.status {
                CheckStatus::Error => errors += 1,
                CheckStatus::Warning => warnings += 1,
                CheckStatus::Ok => {}
            }
        }
        println!();
    }

    if errors > 0 {
        Output::error(&format!(
            "{} error(s) found. Please fix them before using Parley.",
            errors
        ));
        anyhow::bail!("{} check(s) failed", errors);
    } else if warnings > 0 {
        Output::warning(&format!("All checks passed with {} warning(s).", warnings));
    } else {
        Output::success("All checks passed! Parley is ready to use.");
    }

    Ok(())
}

fn check_config_file(path: &Path) -> CheckResult {
    if path.exists() {
        CheckResult::ok("Config file", &format!("{}", path.display()))
    } else {
        CheckResult::warning(
            "Config file",
            "using defaults",
            "Create with: parley config edit",
        )
    }
}

fn check_settings(settings: &Settings) -> CheckResult {
    match settings.validate() {
        Ok(()) => CheckResult::ok(
            "Settings",
            &format!(
                "model {}, {} exam / {} consultation iterations",
                settings.llm.model,
                settings.agent.exam_max_iterations,
                settings.agent.consultation_max_iterations
            ),
        ),
        Err(e) => CheckResult::error("Settings", &e.to_string(), "Fix with: parley config edit"),
    }
}

/// `raw` is the variable's value, if set.
fn check_credentials(var: &str, raw: Option<&str>) -> CheckResult {
    let hint = format!("Set with: export {}='key1,key2'", var);
    let keys = raw.map(parse_credentials).unwrap_or_default();

    match (raw, keys.as_slice()) {
        (None, _) => CheckResult::error(var, "not set", &hint),
        (Some(_), []) => CheckResult::error(var, "set but contains no keys", &hint),
        (Some(_), keys) => {
            let masked: Vec<String> = keys.iter().map(|k| mask_secret(k)).collect();
            CheckResult::ok(
                var,
                &format!("{} key(s) configured ({})", keys.len(), masked.join(", ")),
            )
        }
    }
}

fn check_api_base(api_base: &str) -> CheckResult {
    match url::Url::parse(api_base) {
        Ok(url) if url.scheme() == "https" => CheckResult::ok("API base", api_base),
        Ok(_) => CheckResult::warning(
            "API base",
            &format!("{} (not https)", api_base),
            "Credentials will be sent unencrypted",
        ),
        Err(e) => CheckResult::error(
            "API base",
            &format!("{}: {}", api_base, e),
            "Set llm.api_base to the provider's OpenAI-compatible URL",
        ),
    }
}

fn check_cors_origin(origin: &str) -> CheckResult {
    let hint = "Set server.cors_origin or CORS_ORIGIN to e.g. http://localhost:5173";
    match url::Url::parse(origin) {
        Ok(url) if url.path() == "/" && !origin.ends_with('/') => {
            CheckResult::ok("CORS origin", origin)
        }
        Ok(_) => CheckResult::warning(
            "CORS origin",
            &format!("{} (origins have no path or trailing slash)", origin),
            hint,
        ),
        Err(e) => CheckResult::error("CORS origin", &format!("{}: {}", origin, e), hint),
    }
}

fn check_prompts_dir(custom_dir: Option<&str>) -> CheckResult {
    match custom_dir {
        None => CheckResult::ok("Prompts", "built-in templates"),
        Some(dir) => {
            let path = Settings::expand_path(dir);
            if path.is_dir() {
                CheckResult::ok("Prompts", &format!("{}", path.display()))
            } else {
                CheckResult::warning(
                    "Prompts",
                    &format!("{} not found, using built-in templates", path.display()),
                    "Create it with viva.toml / consultation.toml overrides",
                )
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_result_error() {
        let result = CheckResult::error("test", "failed", "fix it");
        assert_eq!(result.status, CheckStatus::Error);
        assert_eq!(result.hint, Some("fix it".to_string()));
    }

    #[test]
    fn test_check_credentials() {
        assert_eq!(check_credentials("KEYS", None).status, CheckStatus::Error);
        assert_eq!(check_credentials("KEYS", Some(" , ")).status, CheckStatus::Error);

        let result = check_credentials("KEYS", Some("AIzaSyAAAAAAAA1111, AIzaSyBBBBBBBB2222"));
        assert_eq!(result.status, CheckStatus::Ok);
        assert_eq!(
            result.message,
            "2 key(s) configured (AIza...1111, AIza...2222)"
        );
    }

    #[test]
    fn test_check_api_base() {
        assert_eq!(
            check_api_base(&Settings::default().llm.api_base).status,
            CheckStatus::Ok
        );
        assert_eq!(check_api_base("http://localhost:8080/v1").status, CheckStatus::Warning);
        assert_eq!(check_api_base("not a url").status, CheckStatus::Error);
    }

    #[test]
    fn test_check_cors_origin() {
        assert_eq!(check_cors_origin("http://localhost:5173").status, CheckStatus::Ok);
        assert_eq!(
            check_cors_origin("http://localhost:5173/app").status,
            CheckStatus::Warning
        );
        assert_eq!(check_cors_origin("*").status, CheckStatus::Error);
    }

    #[test]
    fn test_missing_config_file_is_a_warning() {
        let dir = tempfile::tempdir().unwrap();
        let result = check_config_file(&dir.path().join("config.toml"));
        assert_eq!(result.status, CheckStatus::Warning);
    }
}
