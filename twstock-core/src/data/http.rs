//! Shared blocking HTTP client for the exchange endpoints.

use super::provider::{DataError, FetchCause};
use crate::config::FetchConfig;
use reqwest::blocking::Client;
use tracing::debug;

pub fn build_client(config: &FetchConfig) -> Result<Client, DataError> {
    Client::builder()
        .timeout(config.timeout())
        .user_agent(config.user_agent.as_str())
        .build()
        .map_err(|e| DataError::Http(format!("failed to build HTTP client: {e}")))
}

/// GET `url` and return the body as text.
///
/// Non-2xx responses become [`FetchCause::Status`]; transport failures are
/// split into timeouts and everything else so retry can tell them apart.
pub fn get_text(client: &Client, url: &str, query: &[(&str, String)]) -> Result<String, FetchCause> {
    debug!(url, "GET");
    let resp = client.get(url).query(query).send().map_err(classify)?;

    let status = resp.status();
    if !status.is_success() {
        return Err(FetchCause::Status(status.as_u16()));
    }
    resp.text().map_err(classify)
}

fn classify(e: reqwest::Error) -> FetchCause {
    if e.is_timeout() {
        FetchCause::Timeout
    } else if let Some(status) = e.status() {
        FetchCause::Status(status.as_u16())
    } else {
        FetchCause::Transport(e.to_string())
    }
}
