//! Both roles in one process over the simulated radio

use std::sync::Arc;

use blechat_core::sim::SimRadio;
use blechat_core::{
    CentralHandle, CentralSession, EngineConfig, Message, PeripheralHandle, PeripheralSession,
};
use tracing::info;

use crate::error::Result;

const CENTRAL_ADDRESS: &str = "C0:FF:EE:00:00:01";
const SERVER_ADDRESS: &str = "5E:55:10:00:00:01";

/// Lines exchanged by the demo, alternating central then server
const SCRIPT: &[&str] = &[
    "hello from the central",
    "hello back from the server",
    "the link works both ways",
    "bye",
];

/// Run the scripted exchange and print both logs
pub async fn run(engine: EngineConfig) -> Result<()> {
    let radio = SimRadio::new();
    let server = PeripheralSession::spawn(Arc::new(radio.peripheral(SERVER_ADDRESS)), engine.clone());
    let central = CentralSession::spawn(Arc::new(radio.central(CENTRAL_ADDRESS)), engine);

    server.start()?;
    settle(&central, &server).await?;
    central.start_scan()?;
    settle(&central, &server).await?;
    info!("Central sees {} peer(s)", central.peers().len());

    central.connect_address(SERVER_ADDRESS)?;
    settle(&central, &server).await?;

    for (turn, line) in SCRIPT.iter().enumerate() {
        if turn % 2 == 0 {
            central.send(*line)?;
        } else {
            server.send_to_subscribers(*line)?;
        }
        settle(&central, &server).await?;
    }

    central.disconnect()?;
    settle(&central, &server).await?;

    print_log("central", &central.messages());
    print_log("server", &server.messages());
    let stats = radio.stats();
    println!(
        "writes: {}, notifications: {}",
        stats.writes(),
        stats.notifications()
    );

    central.shutdown().await?;
    server.shutdown().await?;
    Ok(())
}

/// Flush both actors until events crossing between them have run out
async fn settle(central: &CentralHandle, server: &PeripheralHandle) -> Result<()> {
    for _ in 0..4 {
        central.flush().await?;
        server.flush().await?;
    }
    Ok(())
}

fn print_log(label: &str, messages: &[Message]) {
    println!("--- {} ---", label);
    for message in messages {
        println!("{}", message);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_demo_runs_to_completion() {
        run(EngineConfig::default()).await.unwrap();
    }
}
