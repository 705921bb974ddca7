use reqwest::Client;
use std::time::Duration;

use crate::utils::AppResult;

/// Agent user-agent string derived from Cargo.toml version at compile time.
pub const AGENT_USER_AGENT: &str = concat!("pos-agent/", env!("CARGO_PKG_VERSION"));

pub fn create_http_client() -> AppResult<Client> {
    let client = Client::builder()
        .user_agent(AGENT_USER_AGENT)
        .timeout(Duration::from_secs(30))
        .connect_timeout(Duration::from_secs(10))
        .gzip(true)
        .pool_max_idle_per_host(2)
        .tcp_nodelay(true)
        .build()?;
    Ok(client)
}

/// Client for package downloads: no overall timeout, since packages can be
/// large and terminal links slow.
pub fn create_download_client() -> AppResult<Client> {
    let client = Client::builder()
        .user_agent(AGENT_USER_AGENT)
        .connect_timeout(Duration::from_secs(15))
        .redirect(reqwest::redirect::Policy::limited(10))
        .build()?;
    Ok(client)
}
