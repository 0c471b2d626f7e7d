//! Command handlers for the blechat CLI

use std::sync::Arc;
use std::time::Duration;

use blechat_core::{
    CentralHandle, CentralSession, CentralTransport, PeerAddress, PeripheralHandle,
    PeripheralSession, PeripheralTransport,
};
use tokio::io::{BufReader, Lines, Stdin};
use tokio::time::{sleep, timeout};
use tracing::info;

use crate::cli::Commands;
use crate::config::AppConfig;
use crate::console::{follow_log, print_peers, stdin_lines, Input};
use crate::demo;
use crate::error::{CliError, Result};

/// Command dispatcher for handling CLI commands
pub struct CommandDispatcher;

impl CommandDispatcher {
    /// Execute a CLI command
    pub async fn execute(command: Commands, config: AppConfig) -> Result<()> {
        match command {
            Commands::Scan { seconds } => {
                let seconds = seconds.unwrap_or(config.scan_seconds);
                Self::handle_scan_command(&config, seconds).await
            }
            Commands::Connect {
                address,
                scan_seconds,
            } => {
                let seconds = scan_seconds.unwrap_or(config.scan_seconds);
                Self::handle_connect_command(&config, PeerAddress::new(address), seconds).await
            }
            Commands::Serve => Self::handle_serve_command(&config).await,
            Commands::Demo => demo::run(config.engine).await,
        }
    }

    /// Scan for a while, reprinting the peer table on every change
    async fn handle_scan_command(config: &AppConfig, seconds: u64) -> Result<()> {
        let central = CentralSession::spawn(central_transport().await?, config.engine.clone());
        let printer = follow_log("scan", central.watch_messages());
        let mut peers = central.watch_peers();

        info!("Scanning for {} seconds", seconds);
        central.start_scan()?;

        let deadline = sleep(Duration::from_secs(seconds));
        tokio::pin!(deadline);
        loop {
            tokio::select! {
                _ = &mut deadline => break,
                changed = peers.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    print_peers(peers.borrow_and_update().peers());
                }
            }
        }

        central.stop_scan()?;
        finish_central(central).await?;
        printer.abort();
        Ok(())
    }

    /// Scan until `address` shows up, connect and chat over stdin
    async fn handle_connect_command(
        config: &AppConfig,
        address: PeerAddress,
        seconds: u64,
    ) -> Result<()> {
        let central = CentralSession::spawn(central_transport().await?, config.engine.clone());
        let printer = follow_log("chat", central.watch_messages());
        let mut peers = central.watch_peers();

        info!("Waiting up to {} seconds for {}", seconds, address);
        central.start_scan()?;
        let seen = timeout(Duration::from_secs(seconds), async {
            loop {
                if peers.borrow_and_update().get(&address).is_some() {
                    return true;
                }
                if peers.changed().await.is_err() {
                    return false;
                }
            }
        })
        .await
        .unwrap_or(false);
        central.stop_scan()?;

        if !seen {
            finish_central(central).await?;
            printer.abort();
            return Err(CliError::PeerNotFound(address.to_string()));
        }

        central.connect_address(address)?;
        let mut lines = stdin_lines();
        while let Some(input) = next_input(&mut lines).await? {
            match input {
                Input::Quit => break,
                Input::Empty => {}
                Input::Status => println!("state: {}", central.state()),
                Input::Send(text) => central.send(text)?,
            }
        }

        central.disconnect()?;
        finish_central(central).await?;
        printer.abort();
        Ok(())
    }

    /// Run the chat server and push stdin lines to subscribers
    async fn handle_serve_command(config: &AppConfig) -> Result<()> {
        let server =
            PeripheralSession::spawn(peripheral_transport().await?, config.engine.clone());
        let printer = follow_log("server", server.watch_messages());
        if let Err(e) = ensure_started(&server).await {
            server.shutdown().await?;
            printer.abort();
            return Err(e);
        }

        let mut lines = stdin_lines();
        while let Some(input) = next_input(&mut lines).await? {
            match input {
                Input::Quit => break,
                Input::Empty => {}
                Input::Status => print_server_status(&server),
                Input::Send(text) => server.send_to_subscribers(text)?,
            }
        }

        server.stop()?;
        server.flush().await?;
        server.shutdown().await?;
        printer.abort();
        Ok(())
    }
}

// ----------------------------------------------------------------------------
// Helpers
// ----------------------------------------------------------------------------

/// Next typed line, or `None` on end of input or Ctrl-C
async fn next_input(lines: &mut Lines<BufReader<Stdin>>) -> Result<Option<Input>> {
    tokio::select! {
        line = lines.next_line() => Ok(line?.map(|l| Input::parse(&l))),
        _ = tokio::signal::ctrl_c() => Ok(None),
    }
}

/// Start the server and fail if it fell back to `Stopped`
async fn ensure_started(server: &PeripheralHandle) -> Result<()> {
    server.start()?;
    server.flush().await?;
    if server.state().is_running() {
        return Ok(());
    }
    let reason = server
        .messages()
        .iter()
        .rev()
        .find(|m| m.is_error())
        .map(|m| m.text.clone())
        .unwrap_or_else(|| "unknown failure".to_string());
    Err(CliError::ServerNotStarted(reason))
}

async fn finish_central(central: CentralHandle) -> Result<()> {
    central.flush().await?;
    central.shutdown().await?;
    Ok(())
}

fn print_server_status(server: &PeripheralHandle) {
    println!(
        "state: {}, advertising: {}, connected: {}, subscribed: {}",
        server.state(),
        server.is_advertising(),
        server.connected().len(),
        server.subscribers().len()
    );
}

// ----------------------------------------------------------------------------
// Transport Selection
// ----------------------------------------------------------------------------

#[cfg(feature = "ble")]
async fn central_transport() -> Result<Arc<dyn CentralTransport>> {
    let central = blechat_ble::BtleplugCentral::new().await?;
    Ok(Arc::new(central))
}

#[cfg(feature = "ble")]
async fn peripheral_transport() -> Result<Arc<dyn PeripheralTransport>> {
    Ok(Arc::new(blechat_ble::PlatformPeripheral::new().await))
}

#[cfg(not(feature = "ble"))]
async fn central_transport() -> Result<Arc<dyn CentralTransport>> {
    Err(no_bluetooth())
}

#[cfg(not(feature = "ble"))]
async fn peripheral_transport() -> Result<Arc<dyn PeripheralTransport>> {
    Err(no_bluetooth())
}

#[cfg(not(feature = "ble"))]
fn no_bluetooth() -> CliError {
    CliError::FeatureNotAvailable(
        "built without Bluetooth support; rebuild with `--features ble`".to_string(),
    )
}
