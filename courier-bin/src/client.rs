use crate::options::Config;
use anyhow::{Context, Result};
use courier_lib::{Client, ClientBuilder};
use std::time::Duration;

/// Creates a client according to the command-line config
pub(crate) fn create(cfg: &Config) -> Result<Client> {
    let headers = cfg.header_map()?;

    ClientBuilder::builder()
        .base_url(cfg.base_url.clone())
        .timeout(Duration::from_secs(cfg.timeout))
        .user_agent(cfg.user_agent.clone())
        .token(cfg.token.clone())
        .token_type(cfg.token_type)
        .custom_headers(headers)
        .ratelimit(cfg.ratelimit())
        .build()
        .client()
        .context("Failed to create request client")
}
