mod cli;
mod commands;
mod output;

use anyhow::Result;
use clap::Parser;
use cli::{Cli, Command, ServerCommand};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Structured-output runs keep stdout for the single trailing JSON
    // trailer; all logging goes to stderr either way.
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::from_default_env().add_directive("info".parse()?)
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    match &cli.command {
        Command::Apply { manifest, host, dry_run, yes: _ } => {
            commands::apply(&cli, manifest, host, *dry_run).await
        }
        Command::Destroy { manifest, host, dry_run, yes } => {
            commands::destroy(&cli, manifest, host, *dry_run, *yes).await
        }
        Command::Test { manifest, host, dry_run } => {
            commands::test(&cli, manifest, host, *dry_run).await
        }
        Command::Server { command } => match command {
            ServerCommand::Start {
                port,
                bind,
                cert,
                key,
                repos,
                repo_token,
                foreground,
            } => {
                commands::server_start(
                    &cli,
                    *port,
                    bind,
                    cert.clone(),
                    key.clone(),
                    repos.clone(),
                    repo_token.clone(),
                    *foreground,
                )
                .await
            }
            ServerCommand::Stop => commands::server_stop().await,
            ServerCommand::Status { json } => commands::server_status(*json).await,
        },
    }
}
