//! OpenAI-compatible client configuration with sensible defaults.

use async_openai::{config::OpenAIConfig, Client};
use std::time::Duration;

/// Default timeout for provider API requests (5 minutes).
pub const DEFAULT_TIMEOUT_SECS: u64 = 300;

/// Build the HTTP client shared by every provider call.
pub fn http_client(timeout: Duration) -> crate::Result<reqwest::Client> {
    Ok(reqwest::Client::builder().timeout(timeout).build()?)
}

/// Create a client bound to one credential and endpoint.
///
/// Clients are cheap to build over a shared `reqwest::Client`, so one is
/// created per call with whatever credential the session's rotator hands out.
pub fn create_client(
    api_key: &str,
    api_base: &str,
    http_client: reqwest::Client,
) -> Client<OpenAIConfig> {
    let config = OpenAIConfig::new()
        .with_api_key(api_key)
        .with_api_base(api_base.trim_end_matches('/'));

    Client::with_config(config).with_http_client(http_client)
}
