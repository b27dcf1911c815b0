//! Relay example: connect to a gateway, print the synchronized view and forward stdin.
//!
//! Run with: `cargo run --example relay -- ws://127.0.0.1:8765/`
//! Set `RUST_LOG=glasslink=debug` for connection logs.

use glasslink::{Client, Config, Event};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .try_init()
        .ok();

    let config = match std::env::args().nth(1) {
        Some(url) => Config::new(url),
        None => Config::default(),
    };
    println!("Connecting to {}...", config.url);
    let (client, mut events) = Client::tcp(config)?;
    client.connect();

    let mut stdin = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            event = events.recv() => {
                let Some(event) = event else { break };
                match event {
                    Event::Connected => println!("[Event] Connected."),
                    Event::Disconnected { reason } => {
                        println!("[Event] Disconnected: {}", reason.unwrap_or_default());
                    }
                    Event::ConnectFailed { reason } => println!("[Event] Connect failed: {reason}"),
                    Event::ViewUpdated { lines } => {
                        println!("----- {} lines -----", lines.len());
                        for line in lines {
                            println!("{line}");
                        }
                    }
                    Event::StreamFinished { message_id, content } => {
                        println!("[{message_id}] {content}");
                    }
                    Event::ServerError { message } => println!("[Event] Gateway error: {message}"),
                    Event::Exit { code } => {
                        println!("[Event] Remote exited with {code}");
                        break;
                    }
                    _ => {}
                }
            }
            line = stdin.next_line() => {
                let Some(line) = line? else { break };
                if let Err(e) = client.send_input(&format!("{line}\n")).await {
                    println!("not sent: {e}");
                }
            }
        }
    }

    client.disconnect().await;
    Ok(())
}
