//! Pre-flight checks before starting a session.
//!
//! Validates configuration and credentials up front so a misconfigured run
//! fails before the first model call rather than halfway through a session.

use crate::config::Settings;
use crate::credentials::credentials_from_env;
use crate::error::Result;

/// Requirements for different operations.
#[derive(Debug, Clone, Copy)]
pub enum Operation {
    /// Serving the API needs credentials and a valid CORS origin.
    Serve,
    /// Terminal sessions need credentials.
    Session,
    /// Inspecting configuration has no requirements.
    Config,
}

/// Run pre-flight checks for the given operation.
///
/// Returns the number of credentials found, or an error describing what's missing.
pub fn check(operation: Operation, settings: &Settings) -> Result<usize> {
    match operation {
        Operation::Serve | Operation::Session => {
            settings.validate()?;
            let keys = credentials_from_env(&settings.llm.credentials_env)?;
            Ok(keys.len())
        }
        Operation::Config => Ok(0),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ParleyError;

    #[test]
    fn test_config_has_no_requirements() {
        assert_eq!(check(Operation::Config, &Settings::default()).unwrap(), 0);
    }

    #[test]
    fn test_missing_credentials() {
        let mut settings = Settings::default();
        settings.llm.credentials_env = "PARLEY_TEST_PREFLIGHT_UNSET".to_string();
        assert!(matches!(
            check(Operation::Session, &settings),
            Err(ParleyError::NoCredentials(var)) if var == "PARLEY_TEST_PREFLIGHT_UNSET"
        ));
    }

    #[test]
    fn test_credentials_counted() {
        let mut settings = Settings::default();
        settings.llm.credentials_env = "PARLEY_TEST_PREFLIGHT_SET".to_string();
        std::env::set_var("PARLEY_TEST_PREFLIGHT_SET", "a, b,");
        assert_eq!(check(Operation::Serve, &settings).unwrap(), 2);
    }
}
