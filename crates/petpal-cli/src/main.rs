mod args;
mod bridge;

use std::process::ExitCode;

use clap::Parser;
use petpal_dispatch::DispatchError;

use args::{Cli, Command};

/// Configuration problems and other startup errors.
const EXIT_FAILURE: u8 = 1;
/// The appliance is unreachable.
const EXIT_LINK_FAILURE: u8 = 2;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(cli.log_level().into()),
        )
        .with_target(false)
        .init();

    let config = match cli.load_config() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("error: {e:#}");
            return ExitCode::from(EXIT_FAILURE);
        }
    };

    let result = match cli.command {
        Some(Command::Ports) => bridge::ports(&config),
        None | Some(Command::Run) => bridge::run(config, cli.dry_run).await.map(|stats| {
            println!("{stats}");
        }),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e:#}");
            let link_failure = e
                .downcast_ref::<DispatchError>()
                .is_some_and(DispatchError::is_fatal_link);
            if link_failure {
                ExitCode::from(EXIT_LINK_FAILURE)
            } else {
                ExitCode::from(EXIT_FAILURE)
            }
        }
    }
}
