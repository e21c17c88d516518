//! `courier` submits requests to a bucket rate limited HTTP API.
//!
//! The binary is a thin wrapper around courier-lib: every request goes
//! through the same bucket engine an application embedding the library
//! would use, so limits are learned from the server and respected.
//!
//! Fetch a channel:
//! ```sh
//! COURIER_TOKEN=... courier GET /channels/:channel_id -p channel_id=81384788765712384
//! ```
//!
//! Post a message:
//! ```sh
//! courier POST /channels/:channel_id/messages -p channel_id=42 --json '{"content": "hi"}'
//! ```
//!
//! Watch the rate limiter hold back five concurrent copies of a request:
//! ```sh
//! courier -vv GET /channels/:channel_id/messages -p channel_id=42 --repeat 5
//! ```
#![warn(clippy::all, clippy::pedantic)]
#![warn(
    absolute_paths_not_starting_with_crate,
    rustdoc::invalid_html_tags,
    missing_copy_implementations,
    missing_debug_implementations,
    semicolon_in_expressions_from_macros,
    unreachable_pub,
    unused_extern_crates,
    variant_size_differences,
    clippy::missing_const_for_fn
)]
#![deny(anonymous_parameters, macro_use_extern_crate)]
#![deny(missing_docs)]

use std::path::PathBuf;

use anyhow::{Result, bail};
use clap::{Parser, crate_version};
use courier_lib::{Body, ErrorKind, Response};
use futures::future::join_all;
use http::HeaderMap;
use log::{error, info};

mod client;
mod logging;
mod options;
mod verbosity;

use crate::logging::init_logging;
use crate::options::{COURIER_CONFIG_FILE, Config, CourierOptions};

/// A C-like enum that can be cast to `i32` and used as process exit code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ExitCode {
    Success = 0,
    // NOTE: exit code 1 is used for any `Result::Err` bubbled up to `main()`
    // using the `?` operator.
    #[allow(unused)]
    UnexpectedFailure = 1,
    RequestFailure = 2,
    ConfigFile = 3,
}

fn main() -> Result<()> {
    // std::process::exit doesn't guarantee that all destructors will be run,
    // therefore we wrap the main code in another function to ensure that.
    let exit_code = run_main()?;
    std::process::exit(exit_code);
}

/// Merge all provided config options into one.
/// This includes a potential config file, command-line- and environment variables
fn load_config() -> Result<CourierOptions> {
    let mut opts = CourierOptions::parse();

    init_logging(&opts.config.verbose);

    if let Some(config_file) = &opts.config_file {
        match Config::load_from_file(config_file) {
            Ok(c) => opts.config.merge(c),
            Err(e) => {
                bail!(
                    "Cannot load configuration file `{}`: {e:?}",
                    config_file.display()
                );
            }
        }
    } else {
        // An invalid default config file is an error too, a missing one is not.
        let default_config = PathBuf::from(COURIER_CONFIG_FILE);
        if default_config.is_file() {
            match Config::load_from_file(&default_config) {
                Ok(c) => opts.config.merge(c),
                Err(e) => {
                    bail!(
                        "Cannot load default configuration file `{}`: {e:?}",
                        default_config.display()
                    );
                }
            }
        }
    }

    Ok(opts)
}

/// Set up runtime and call courier entrypoint
fn run_main() -> Result<i32> {
    use std::process::exit;

    let opts = match load_config() {
        Ok(opts) => opts,
        Err(e) => {
            error!(
                "Error while loading config: {e}\n\
                See the configuration section of the README for courier v{}",
                crate_version!()
            );
            exit(ExitCode::ConfigFile as i32);
        }
    };

    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(run(&opts))
}

/// Submit the request `--repeat` times concurrently and print every outcome
async fn run(opts: &CourierOptions) -> Result<i32> {
    let client = client::create(&opts.config)?;
    let params = opts.route_params();
    let body = opts.json.clone().map(Body::Json);

    let submissions = (0..opts.repeat).map(|_| {
        client.submit(
            opts.method.clone(),
            opts.route.clone(),
            params.clone(),
            HeaderMap::new(),
            body.clone(),
        )
    });
    let outcomes = join_all(submissions).await;

    let mut failures = 0;
    for outcome in &outcomes {
        match outcome {
            Ok(response) => print_response(response),
            Err(e) => {
                failures += 1;
                print_error(e);
            }
        }
    }

    info!(
        "{} of {} requests succeeded, {} buckets known",
        outcomes.len() - failures,
        outcomes.len(),
        client.bucket_count()
    );

    let exit_code = if failures == 0 {
        ExitCode::Success
    } else {
        ExitCode::RequestFailure
    };
    Ok(exit_code as i32)
}

fn print_response(response: &Response) {
    println!("{response}");
    if !response.body.is_empty() {
        println!("{}", response.body);
    }
}

fn print_error(error: &ErrorKind) {
    println!("{error}");
    if let Some(body) = error
        .failed_request()
        .map(|failed| failed.body())
        .filter(|body| !body.is_empty())
    {
        println!("{body}");
    }
}
