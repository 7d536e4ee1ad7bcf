//! sentinel-wire binary
//!
//! Runs the server role, the client role, or both paired on two threads,
//! as selected by CLI arguments or a TOML file.

use sentinel_wire::config::{Config, Role};
use sentinel_wire::run_pair;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load configuration
    let config = Config::load()?;

    // Initialize logging
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    info!(
        role = ?config.role,
        endpoint = %config.endpoint(),
        family = ?config.family,
        backlog = config.backlog,
        send_policy = ?config.send_policy,
        "Starting sentinel-wire"
    );

    match config.role {
        Role::Server => run_server(&config),
        Role::Client => run_client(&config),
        Role::Pair => run_both(&config),
    }
}

fn run_server(config: &Config) -> Result<(), Box<dyn std::error::Error>> {
    let report = config.server_role().run()?;
    info!(
        peer = %report.peer,
        messages = report.messages_received,
        acks = report.acks_sent,
        termination = ?report.termination,
        "Server done"
    );
    Ok(())
}

fn run_client(config: &Config) -> Result<(), Box<dyn std::error::Error>> {
    let report = config.client_role().run()?;
    for reply in &report.replies {
        info!(server = %report.server, reply = %String::from_utf8_lossy(reply), "Reply");
    }
    Ok(())
}

/// Each role reports its own failure; the first one becomes the exit error.
fn run_both(config: &Config) -> Result<(), Box<dyn std::error::Error>> {
    let outcome = run_pair(config.server_role(), config.client_role())?;

    let client = match outcome.client {
        Some(Ok(report)) => {
            info!(server = %report.server, replies = report.replies.len(), "Client done");
            Ok(())
        }
        Some(Err(e)) => {
            error!(step = e.step(), os_code = ?e.os_code(), error = %e, "Client failed");
            Err(e)
        }
        None => Ok(()),
    };

    match outcome.server {
        Ok(report) => info!(
            peer = %report.peer,
            messages = report.messages_received,
            termination = ?report.termination,
            "Server done"
        ),
        Err(e) => {
            error!(step = e.step(), os_code = ?e.os_code(), error = %e, "Server failed");
            return Err(e.into());
        }
    }

    client.map_err(Into::into)
}
