use std::path::PathBuf;

use anyhow::Context;
use clap::{ArgAction, Parser, Subcommand};

use petpal_core::BridgeConfig;
use petpal_core::constants::AUTH_TOKEN_ENV;

#[derive(Debug, Parser)]
#[command(
    name = "petpal",
    about = "Bridge remote and scheduled refill commands to the PetPal appliance",
    version,
    propagate_version = true
)]
pub struct Cli {
    /// TOML configuration file
    #[arg(long, short = 'c', global = true, env = "PETPAL_CONFIG")]
    pub config: Option<PathBuf>,

    /// Serial port of the appliance (skips discovery)
    #[arg(long, global = true, env = "PETPAL_PORT")]
    pub port: Option<String>,

    /// Realtime Database URL
    #[arg(long, env = "PETPAL_DATABASE_URL")]
    pub database_url: Option<String>,

    /// Database secret or ID token
    #[arg(long, env = AUTH_TOKEN_ENV, hide_env_values = true)]
    pub auth_token: Option<String>,

    /// Seconds between schedule evaluations
    #[arg(long, env = "PETPAL_POLL_PERIOD")]
    pub poll_period: Option<u64>,

    /// Use the in-memory store with the [dry_run] schedule; commands are read from stdin
    #[arg(long)]
    pub dry_run: bool,

    /// More log output (-v debug, -vv trace)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run the bridge (default)
    Run,
    /// List serial ports and show which one would be used
    Ports,
}

impl Cli {
    pub fn log_level(&self) -> tracing::Level {
        match self.verbose {
            0 => tracing::Level::INFO,
            1 => tracing::Level::DEBUG,
            _ => tracing::Level::TRACE,
        }
    }

    /// Load the configuration file (or defaults) and apply overrides.
    pub fn load_config(&self) -> anyhow::Result<BridgeConfig> {
        let mut config = match &self.config {
            Some(path) => BridgeConfig::load(path)
                .with_context(|| format!("failed to load {}", path.display()))?,
            None => BridgeConfig::default(),
        };
        self.apply_overrides(&mut config);

        let needs_remote = !self.dry_run && matches!(self.command, None | Some(Command::Run));
        config
            .validate(needs_remote)
            .context("invalid configuration")?;
        Ok(config)
    }

    fn apply_overrides(&self, config: &mut BridgeConfig) {
        if let Some(port) = &self.port {
            config.discovery.port = Some(port.clone());
        }
        if let Some(url) = &self.database_url {
            config.remote.database_url = Some(url.clone());
        }
        if let Some(token) = &self.auth_token {
            config.remote.auth_token = Some(token.clone());
        }
        if let Some(secs) = self.poll_period {
            config.schedule.poll_period_secs = secs;
        }
    }
}
