//! Standalone client binary.
//!
//! Usage:
//!   cargo run -p engine_client -- [--addr 127.0.0.1:40000] [--maps-dir maps] [--name Player]
//!
//! Connects to a server, runs client-side prediction against stdin-driven
//! input (there is no real input device here, just the console), and
//! interpolates everyone else.
//!
//! Console commands:
//!   connect             - (Re)connect to the configured server
//!   disconnect          - Disconnect from server
//!   status              - Show client status
//!   map <mapname>       - Load a map locally (for testing)
//!   say <message>       - Queue a chat message on the reliable lane
//!   quit                - Exit client

use std::env;
use std::io::{BufRead, Write};
use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use engine_client::client::GameClient;
use engine_client::input::InputSample;
use engine_shared::config::EngineConfig;
use engine_shared::conn_fsm::ConnState;
use tokio::sync::mpsc;
use tracing::info;

fn parse_args() -> EngineConfig {
    let mut cfg = EngineConfig::default();
    let args: Vec<String> = env::args().collect();
    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--addr" if i + 1 < args.len() => {
                cfg.server_addr = args[i + 1].clone();
                i += 2;
            }
            "--maps-dir" if i + 1 < args.len() => {
                cfg.maps_dir = args[i + 1].clone();
                i += 2;
            }
            "--name" if i + 1 < args.len() => {
                cfg.player_name = args[i + 1].clone();
                i += 2;
            }
            _ => i += 1,
        }
    }
    cfg
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .init();

    let cfg = parse_args();
    info!(server = %cfg.server_addr, maps_dir = %cfg.maps_dir, "Starting client");

    let mut client = GameClient::new(cfg.clone(), PathBuf::from(&cfg.maps_dir))
        .await
        .context("create client")?;

    let (console_tx, console_rx) = mpsc::channel::<String>(32);
    client.set_console_input(console_rx);

    std::thread::spawn(move || {
        let stdin = std::io::stdin();
        let mut stdout = std::io::stdout();
        loop {
            print!("] ");
            let _ = stdout.flush();
            let mut line = String::new();
            if stdin.lock().read_line(&mut line).is_err() {
                break;
            }
            let line = line.trim().to_string();
            if !line.is_empty() && console_tx.blocking_send(line).is_err() {
                break;
            }
        }
    });

    println!("Client ready. Type 'connect' to join the server, 'status' for info, 'quit' to exit.");
    println!();

    client.connect().await.context("send initial handshake")?;

    let tick_interval = Duration::from_secs_f32(1.0 / cfg.tick_hz as f32);
    loop {
        let input = InputSample::default();
        if let Err(e) = client.tick(input).await {
            println!("Tick error: {e}");
        }

        if client.state() == ConnState::Disconnected {
            println!("Disconnected from server.");
            break;
        }

        tokio::time::sleep(tick_interval).await;
    }

    Ok(())
}
