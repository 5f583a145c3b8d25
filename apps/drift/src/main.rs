use anyhow::Result;
use clap::Parser;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};

use drift_client_core::cli::Cli;
use drift_client_core::config::SessionConfig;
use drift_client_core::media::scripted::{ScriptedMediaConfig, ScriptedMediaTransport};
use drift_client_core::prefs::PrefStore;
use drift_client_core::session::fallback::FallbackSimulator;
use drift_client_core::session::{Notice, Phase, SessionController, UserAction};
use drift_client_core::signaling::WebSocketConnector;

#[tokio::main]
async fn main() -> Result<()> {
    if std::env::var("RUST_LOG").is_err() {
        std::env::set_var("RUST_LOG", "warn");
    }
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();
    let prefs = PrefStore::load(cli.profile.as_deref()).with_overrides(cli.pref_overrides());
    let config = SessionConfig::from_env();

    let connector = Arc::new(WebSocketConnector::new(cli.server.clone()));
    // Stand-in transport; a real media library binds here.
    let media = Arc::new(ScriptedMediaTransport::new(ScriptedMediaConfig::default()));
    let fallback = FallbackSimulator::new(
        config.fallback_match_delay,
        ScriptedMediaConfig::default(),
    );

    let handle = SessionController::spawn(config, prefs, connector, media, fallback);
    let actions = handle.actions.clone();
    let mut phases = handle.phases.clone();
    let mut notices = handle.notices;

    println!("drift: /search /next /stop /quit; anything else is chat");

    tokio::spawn(async move {
        loop {
            let line = match &*phases.borrow_and_update() {
                Phase::Idle => "idle".to_string(),
                Phase::Searching => "searching for a partner...".to_string(),
                Phase::PlacingCall { partner_peer_id } => {
                    format!("calling {partner_peer_id}...")
                }
                Phase::AwaitingCall { partner_peer_id } => {
                    format!("waiting for {partner_peer_id} to call...")
                }
                Phase::Connected { partner_peer_id } => {
                    format!("connected to {partner_peer_id}")
                }
                Phase::MediaFailed { reason } => {
                    format!("camera/microphone unavailable: {reason}")
                }
            };
            println!("[{line}]");
            if phases.changed().await.is_err() {
                break;
            }
        }
    });

    tokio::spawn(async move {
        while let Some(notice) = notices.recv().await {
            match notice {
                Notice::Chat { text } => println!("partner: {text}"),
                Notice::PartnerLost => println!("[partner lost]"),
                Notice::FallbackEngaged => {
                    println!("[server unreachable; showing a demo partner]")
                }
                Notice::MediaUnavailable { reason } => {
                    println!("[media unavailable: {reason}]")
                }
            }
        }
    });

    actions.send(UserAction::StartSearch)?;

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let trimmed = line.trim();
        let action = match trimmed {
            "" => continue,
            "/search" => UserAction::StartSearch,
            "/next" => UserAction::Next,
            "/stop" => UserAction::Stop,
            "/quit" => {
                let _ = actions.send(UserAction::Shutdown);
                break;
            }
            text => UserAction::SendChat(text.to_string()),
        };
        if actions.send(action).is_err() {
            break;
        }
    }

    let _ = handle.task.await;
    Ok(())
}
