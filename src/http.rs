//! Shared HTTP client for the platform REST API.
//!
//! One `reqwest::Client` is built at startup and cloned into every adapter.
//! Clones share the same connection pool, so concurrent reconciliations reuse
//! connections without any locking on our side.

use reqwest::{header, Client};
use std::time::Duration;

/// Default REST base of the platform API.
pub const DEFAULT_API_BASE: &str = "https://discord.com/api/v10";

/// The platform rejects bot requests without a `DiscordBot (...)` user agent.
const USER_AGENT: &str = concat!("DiscordBot (role-connection, ", env!("CARGO_PKG_VERSION"), ")");

/// Build the HTTP client used by every adapter.
///
/// `timeout` bounds each request end to end; a request that exceeds it fails
/// with a timeout error instead of hanging.
pub fn build_client(timeout: Duration) -> reqwest::Result<Client> {
    let mut headers = header::HeaderMap::new();
    headers.insert(
        header::ACCEPT,
        header::HeaderValue::from_static("application/json"),
    );

    Client::builder()
        .default_headers(headers)
        .user_agent(USER_AGENT)
        .timeout(timeout)
        .build()
}

/// Join a base URL and a path without doubling the slash.
pub(crate) fn endpoint(api_base: &str, path: &str) -> String {
    format!("{}/{}", api_base.trim_end_matches('/'), path.trim_start_matches('/'))
}
