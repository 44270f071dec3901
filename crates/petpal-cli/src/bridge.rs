//! `petpal run` and `petpal ports`.

use anyhow::Context;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use petpal_core::BridgeConfig;
use petpal_dispatch::{DispatchStats, Dispatcher};
use petpal_hardware::{
    AnyPortResolver, CommandChannel, ConnectionManager, PortResolver, SerialOpener, list_ports,
};
use petpal_remote::{AnyStore, FirebaseStore, MemoryStore};

/// Run the bridge until interrupted or the appliance becomes unreachable.
pub async fn run(config: BridgeConfig, dry_run: bool) -> anyhow::Result<DispatchStats> {
    let shutdown = CancellationToken::new();

    let store: AnyStore = if dry_run {
        let store = MemoryStore::with_schedule(config.dry_run.schedule.clone());
        spawn_stdin_commands(store.clone(), shutdown.clone());
        store.into()
    } else {
        FirebaseStore::new(config.remote.clone())
            .context("failed to set up the remote store")?
            .into()
    };

    let resolver = AnyPortResolver::from_config(&config.discovery);
    info!(
        store = store.kind(),
        discovery = %resolver.describe(),
        baud_rate = config.link.baud_rate,
        "Starting PetPal bridge v{}",
        petpal_core::VERSION
    );

    let manager = ConnectionManager::new(resolver, SerialOpener::new(), config.link.clone());
    let channel = CommandChannel::new(manager, config.link.write_failure_threshold);
    let dispatcher = Dispatcher::new(channel, store, config.schedule.poll_period());

    spawn_signal_handler(shutdown.clone());

    let stats = dispatcher.run(shutdown).await?;
    Ok(stats)
}

/// Print the serial ports and the one discovery would pick.
pub fn ports(config: &BridgeConfig) -> anyhow::Result<()> {
    let ports = list_ports().context("failed to enumerate serial ports")?;
    if ports.is_empty() {
        println!("No serial ports found.");
    }
    for port in &ports {
        println!("{port}");
    }

    let resolver = AnyPortResolver::from_config(&config.discovery);
    match resolver.resolve() {
        Ok(address) => println!("\nSelected: {address}"),
        Err(e) => println!("\nNo port selected: {e}"),
    }
    Ok(())
}

fn spawn_signal_handler(shutdown: CancellationToken) {
    tokio::spawn(async move {
        wait_for_signal().await;
        info!("Shutdown signal received");
        shutdown.cancel();
    });
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    match signal(SignalKind::terminate()) {
        Ok(mut term) => {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {}
                _ = term.recv() => {}
            }
        }
        Err(e) => {
            warn!("Cannot listen for SIGTERM: {}", e);
            let _ = tokio::signal::ctrl_c().await;
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    let _ = tokio::signal::ctrl_c().await;
}

/// In dry runs every line on stdin is written to the command slot.
fn spawn_stdin_commands(store: MemoryStore, shutdown: CancellationToken) {
    tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        loop {
            let line = tokio::select! {
                _ = shutdown.cancelled() => break,
                line = lines.next_line() => line,
            };
            match line {
                Ok(Some(line)) if line.trim().is_empty() => continue,
                Ok(Some(line)) => {
                    if !store.push_command(line.trim()) {
                        warn!("Command dropped, bridge not subscribed yet");
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    warn!("Failed to read stdin: {}", e);
                    break;
                }
            }
        }
        debug!("Stopped reading commands from stdin");
    });
}
