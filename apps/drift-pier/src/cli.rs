use anyhow::Result;
use clap::{Parser, Subcommand};
use futures_util::{SinkExt, StreamExt};
use tokio::time::{timeout, Duration};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::debug;

use drift_proto::{generate_peer_id, ClientMessage, SearchAttributes, ServerMessage};

#[derive(Parser, Debug)]
#[command(name = "drift-pier")]
#[command(about = "Drift pairing server and probe client")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Join the search queue once and report what comes back
    Probe {
        /// Pier URL (e.g., ws://localhost:4520)
        #[arg(short, long, default_value = "ws://localhost:4520")]
        url: String,

        /// Comma-separated interests to advertise
        #[arg(short, long, value_delimiter = ',')]
        interests: Vec<String>,

        /// Seconds to wait for a match before giving up
        #[arg(short, long, default_value_t = 30)]
        wait: u64,
    },
}

/// Minimal end-to-end check against a running pier: queue up, wait for a
/// match-found, print the outcome. Two concurrent probes pair with each
/// other.
pub async fn run_probe(url: String, interests: Vec<String>, wait: u64) -> Result<()> {
    let ws_url = format!("{}/ws", url.trim_end_matches('/'));
    debug!("connecting to {ws_url}");

    let (ws_stream, _) = match timeout(Duration::from_secs(5), connect_async(&ws_url)).await {
        Ok(Ok(result)) => result,
        Ok(Err(e)) => {
            return Err(anyhow::anyhow!("connection to {ws_url} failed: {e}"));
        }
        Err(_) => {
            return Err(anyhow::anyhow!(
                "connection timeout - is the pier running at {url}?"
            ));
        }
    };
    let (mut write, mut read) = ws_stream.split();

    let peer_id = generate_peer_id();
    println!("probe peer id: {peer_id}");

    let search = ClientMessage::StartSearch {
        peer_id,
        attributes: SearchAttributes {
            interests,
            ..Default::default()
        },
    };
    write
        .send(Message::Text(serde_json::to_string(&search)?.into()))
        .await?;
    println!("searching...");

    let outcome = timeout(Duration::from_secs(wait), async {
        while let Some(frame) = read.next().await {
            if let Message::Text(text) = frame? {
                match serde_json::from_str::<ServerMessage>(&text)? {
                    ServerMessage::MatchFound {
                        partner_peer_id,
                        role,
                    } => {
                        return Ok::<_, anyhow::Error>(Some((partner_peer_id, role)));
                    }
                    ServerMessage::Error { message } => {
                        return Err(anyhow::anyhow!("pier rejected the search: {message}"));
                    }
                    ServerMessage::Pong => {}
                }
            }
        }
        Ok(None)
    })
    .await;

    match outcome {
        Ok(Ok(Some((partner, role)))) => {
            println!("match found: partner={partner} role={role}");
        }
        Ok(Ok(None)) => {
            println!("channel closed before a match arrived");
        }
        Ok(Err(e)) => return Err(e),
        Err(_) => {
            println!("no match within {wait}s; leaving the queue");
            write
                .send(Message::Text(
                    serde_json::to_string(&ClientMessage::StopSearch)?.into(),
                ))
                .await?;
        }
    }

    Ok(())
}
