use crate::verbosity::Verbosity;
use anyhow::{Context, Result, anyhow};
use clap::Parser;
use clap::builder::{PossibleValuesParser, TypedValueParser};
use const_format::{concatcp, formatcp};
use courier_lib::ratelimit::{RateLimitConfig, RetryAfterPrecision};
use courier_lib::{DEFAULT_BASE_URL, DEFAULT_TIMEOUT_SECS, DEFAULT_USER_AGENT, RouteParams, TokenType};
use http::{
    HeaderMap, Method,
    header::{HeaderName, HeaderValue},
};
use secrecy::SecretString;
use serde::{Deserialize, Deserializer};
use std::collections::HashMap;
use std::path::Path;
use std::{fs, path::PathBuf, str::FromStr, time::Duration};
use strum::VariantNames;

pub(crate) const COURIER_CONFIG_FILE: &str = "courier.toml";

// clap wants `&str` defaults, serde wants the typed value.
// Both have to agree with `RateLimitConfig::default()`.
const RECLAIM_INTERVAL_STR: &str = "10s";
const RECLAIM_GRACE_STR: &str = "10s";
const BLOCK_GRACE_STR: &str = "100ms";
const TIMEOUT_STR: &str = concatcp!(DEFAULT_TIMEOUT_SECS);

// Show the default config file, but keep `None` as the parsed value so that
// a missing default file is not an error.
const HELP_MSG_CONFIG_FILE: &str = formatcp!(
    "Configuration file to use\n\n[default: {}]",
    COURIER_CONFIG_FILE,
);

// Macro for generating default functions to be used by serde
macro_rules! default_function {
    ( $( $name:ident : $T:ty = $e:expr; )* ) => {
        $(
            #[allow(clippy::missing_const_for_fn)]
            fn $name() -> $T {
                $e
            }
        )*
    };
}

default_function! {
    base_url: String = DEFAULT_BASE_URL.to_string();
    user_agent: String = DEFAULT_USER_AGENT.to_string();
    timeout: u64 = DEFAULT_TIMEOUT_SECS;
    reclaim_interval: Duration = RateLimitConfig::default().reclaim_interval;
    reclaim_grace: Duration = RateLimitConfig::default().reclaim_grace;
    block_grace: Duration = RateLimitConfig::default().block_grace;
    verbosity: Verbosity = Verbosity::default();
}

// Macro for merging configuration values
macro_rules! fold_in {
    ($cli:ident , $toml:ident ; $ty:ident { $(..$ignore:ident,)* $( $key:ident : $default:expr, )* } ) => {
        if (false) {
            #[allow(dead_code, unused, clippy::diverging_sub_expression)]
            let _check_fold_in_exhaustivity = $ty {
                $($key: unreachable!(), )*
                $($ignore: unreachable!(), )*
            };
        };
        $(
            if $cli.$key == $default && $toml.$key != $default {
                $cli.$key = $toml.$key;
            }
        )*
    };
}

/// Parse an HTTP method, ignoring case
fn parse_method(method: &str) -> Result<Method> {
    Method::from_str(&method.to_uppercase()).map_err(|e| anyhow!("Invalid method '{method}': {e}"))
}

/// Parse a route parameter in the form `name=value`
fn parse_param(param: &str) -> Result<(String, String)> {
    match param.split_once('=') {
        Some((name, value)) if !name.trim().is_empty() => {
            Ok((name.trim().to_string(), value.trim().to_string()))
        }
        _ => Err(anyhow!(
            "Invalid route parameter '{param}'. Expected the format 'name=value'"
        )),
    }
}

/// Parse a header in the form `Header-Name: Header-Value`.
///
/// Everything after the first colon is the value. Name and value are trimmed.
fn parse_header(header: &str) -> Result<(String, String)> {
    let Some((name, value)) = header.split_once(':') else {
        return Err(anyhow!(
            "Invalid header format. Expected colon-separated string in the format 'HeaderName: HeaderValue'"
        ));
    };

    let name = name.trim();
    let value = value.trim();
    HeaderName::from_str(name).map_err(|e| anyhow!("Unable to convert header name '{name}': {e}"))?;
    HeaderValue::from_str(value)
        .map_err(|e| anyhow!("Unable to read value of header with name '{name}': {e}"))?;
    Ok((name.to_string(), value.to_string()))
}

// Headers are a table in TOML
fn deserialize_headers<'de, D>(deserializer: D) -> Result<Vec<(String, String)>, D::Error>
where
    D: Deserializer<'de>,
{
    let map = HashMap::<String, String>::deserialize(deserializer)?;
    Ok(map.into_iter().collect())
}

/// courier submits requests to a bucket rate limited HTTP API.
///
/// Limits are learned from the server's `X-RateLimit-*` headers. Requests
/// that would exceed them are held back, and 429 responses are retried
/// after the announced delay.
#[derive(Parser, Debug)]
#[command(version, about, next_display_order = None)]
pub(crate) struct CourierOptions {
    /// HTTP method of the request, e.g. GET or POST
    #[arg(value_parser = parse_method)]
    pub(crate) method: Method,

    /// Route template relative to the base URL, e.g. `/channels/:channel_id/messages`
    pub(crate) route: String,

    /// Route parameter substituted into the template, in the form `name=value`
    #[arg(short = 'p', long = "param", value_parser = parse_param)]
    pub(crate) params: Vec<(String, String)>,

    /// JSON body sent with the request
    #[arg(long)]
    pub(crate) json: Option<String>,

    /// Submit this many concurrent copies of the request
    #[arg(long, default_value_t = 1, value_parser = clap::value_parser!(u32).range(1..))]
    pub(crate) repeat: u32,

    /// Configuration file to use
    #[arg(short, long = "config")]
    #[arg(help = HELP_MSG_CONFIG_FILE)]
    pub(crate) config_file: Option<PathBuf>,

    #[clap(flatten)]
    pub(crate) config: Config,
}

impl CourierOptions {
    /// Route parameters given with `--param`
    pub(crate) fn route_params(&self) -> RouteParams {
        self.params
            .iter()
            .map(|(name, value)| (name.as_str(), value))
            .collect()
    }
}

/// Client configuration, from the command line or from a TOML file
#[derive(Parser, Debug, Deserialize, Clone)]
#[serde(deny_unknown_fields)]
pub(crate) struct Config {
    /// Verbose program output
    #[clap(flatten)]
    #[serde(default = "verbosity")]
    pub(crate) verbose: Verbosity,

    /// Base URL every route is appended to
    #[arg(long, default_value = DEFAULT_BASE_URL)]
    #[serde(default = "base_url")]
    pub(crate) base_url: String,

    /// API token sent in the `Authorization` header
    #[arg(long, env = "COURIER_TOKEN", hide_env_values = true)]
    #[serde(default)]
    pub(crate) token: Option<SecretString>,

    /// Prefix of the `Authorization` header
    #[arg(
        long,
        default_value = "Bot",
        value_parser = PossibleValuesParser::new(TokenType::VARIANTS).try_map(|s| s.parse::<TokenType>())
    )]
    #[serde(default)]
    pub(crate) token_type: TokenType,

    /// User agent sent with every request
    #[arg(short, long, default_value = DEFAULT_USER_AGENT)]
    #[serde(default = "user_agent")]
    pub(crate) user_agent: String,

    /// Request timeout in seconds from connect to response finished
    #[arg(short, long, default_value = &TIMEOUT_STR)]
    #[serde(default = "timeout")]
    pub(crate) timeout: u64,

    /// Custom request header sent with every request
    #[arg(
        short = 'H',
        long = "header",
        value_parser = parse_header,
        value_name = "HEADER:VALUE"
    )]
    #[serde(default)]
    #[serde(deserialize_with = "deserialize_headers")]
    pub(crate) header: Vec<(String, String)>,

    /// Schedule window resets with the absolute `X-RateLimit-Reset` header
    /// instead of the relative `X-RateLimit-Reset-After` header
    #[arg(long)]
    #[serde(default)]
    pub(crate) absolute_reset: bool,

    /// Replace the server's reset delay with a fixed duration (for testing)
    #[arg(long, value_parser = humantime::parse_duration)]
    #[serde(default, with = "humantime_serde")]
    pub(crate) wait_override: Option<Duration>,

    /// Unit of numeric `Retry-After` values
    #[arg(
        long,
        default_value = "milliseconds",
        value_parser = PossibleValuesParser::new(RetryAfterPrecision::VARIANTS).try_map(|s| s.parse::<RetryAfterPrecision>())
    )]
    #[serde(default)]
    pub(crate) retry_after_precision: RetryAfterPrecision,

    /// Period between two sweeps for idle buckets
    #[arg(long, value_parser = humantime::parse_duration, default_value = RECLAIM_INTERVAL_STR)]
    #[serde(default = "reclaim_interval", with = "humantime_serde")]
    pub(crate) reclaim_interval: Duration,

    /// How long past its reset an idle bucket is kept
    #[arg(long, value_parser = humantime::parse_duration, default_value = RECLAIM_GRACE_STR)]
    #[serde(default = "reclaim_grace", with = "humantime_serde")]
    pub(crate) reclaim_grace: Duration,

    /// Minimum delay of a request held back by a bucket's limit
    #[arg(long, value_parser = humantime::parse_duration, default_value = BLOCK_GRACE_STR)]
    #[serde(default = "block_grace", with = "humantime_serde")]
    pub(crate) block_grace: Duration,
}

impl Config {
    /// Load configuration from a file
    pub(crate) fn load_from_file(path: &Path) -> Result<Config> {
        let contents = fs::read_to_string(path)?;
        toml::from_str(&contents).with_context(|| "Failed to parse configuration file")
    }

    /// Merge the configuration from TOML into the CLI configuration.
    ///
    /// Values given on the command line win.
    pub(crate) fn merge(&mut self, toml: Config) {
        let cli_headers = std::mem::take(&mut self.header);
        let merged: HashMap<_, _> = toml.header.into_iter().chain(cli_headers).collect();
        self.header = merged.into_iter().collect();

        // Outside of fold_in! because SecretBox doesn't implement Eq.
        if self.token.is_none() {
            self.token = toml.token;
        }

        // NOTE: if you see an error within this macro call, check to make sure that
        // that the fields provided to fold_in! match all the fields of the Config struct.
        fold_in! {
            // Destination and source configs
            self, toml;

            Config {
                // Keys which are handled outside of fold_in
                ..header,
                ..token,

                // Keys with defaults to assign
                verbose: Verbosity::default(),
                base_url: DEFAULT_BASE_URL,
                token_type: TokenType::default(),
                user_agent: DEFAULT_USER_AGENT,
                timeout: DEFAULT_TIMEOUT_SECS,
                absolute_reset: false,
                wait_override: None,
                retry_after_precision: RetryAfterPrecision::default(),
                reclaim_interval: reclaim_interval(),
                reclaim_grace: reclaim_grace(),
                block_grace: block_grace(),
            }
        }
    }

    /// Rate limiting settings for the client
    pub(crate) const fn ratelimit(&self) -> RateLimitConfig {
        RateLimitConfig {
            use_relative_ratelimit: !self.absolute_reset,
            wait_override: self.wait_override,
            retry_after_precision: self.retry_after_precision,
            reclaim_interval: self.reclaim_interval,
            reclaim_grace: self.reclaim_grace,
            block_grace: self.block_grace,
        }
    }

    /// Custom headers as a `HeaderMap`
    pub(crate) fn header_map(&self) -> Result<HeaderMap> {
        let mut header_map = HeaderMap::new();
        for (name, value) in &self.header {
            let header_name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| anyhow!("Invalid header name '{name}': {e}"))?;
            let header_value = HeaderValue::from_str(value)
                .map_err(|e| anyhow!("Invalid header value '{value}': {e}"))?;
            header_map.insert(header_name, header_value);
        }
        Ok(header_map)
    }
}
