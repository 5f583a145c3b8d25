//! Substitute partner source for when the signaling path is unusable. The
//! simulator hands the controller a signal channel and a media transport
//! that satisfy the exact same contracts as the real ones: a search produces
//! a `match-found` for a synthetic persona, the persona's stream arrives
//! after a scripted delay, and skip/stop behave like any other session. The
//! controller runs one code path either way.

use async_trait::async_trait;
use rand::Rng;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info};
use uuid::Uuid;

use drift_proto::{ClientMessage, PairRole, SearchAttributes};

use crate::media::scripted::{ScriptedMediaConfig, ScriptedMediaTransport};
use crate::media::MediaTransport;
use crate::signaling::{SignalChannel, SignalError, SignalEvent};

const PERSONA_NAMES: &[&str] = &[
    "Alex", "Jordan", "Sam", "Casey", "Morgan", "Riley", "Taylor", "Jamie",
];

/// A synthetic partner identity
#[derive(Debug, Clone)]
pub struct Persona {
    pub peer_id: String,
    pub display_name: String,
    pub interest: Option<String>,
    pub country: Option<String>,
}

impl Persona {
    /// Shape a persona from the local search attributes, the one place the
    /// stated filters are honored.
    fn generate(attributes: &SearchAttributes) -> Self {
        let name = {
            let idx = rand::thread_rng().gen_range(0..PERSONA_NAMES.len());
            PERSONA_NAMES[idx]
        };
        let id = Uuid::new_v4().simple().to_string();
        Self {
            peer_id: format!("demo-{}-{}", name.to_ascii_lowercase(), &id[..8]),
            display_name: format!("{name} (demo)"),
            interest: attributes.interests.first().cloned(),
            country: attributes.country.clone(),
        }
    }

    fn greeting(&self) -> String {
        match (&self.interest, &self.country) {
            (Some(interest), _) => {
                format!("hi, i'm {}, also into {}", self.display_name, interest)
            }
            (None, Some(country)) => {
                format!("hi, i'm {} from {}", self.display_name, country)
            }
            (None, None) => format!("hi, i'm {}", self.display_name),
        }
    }
}

/// Personas issued so far, keyed by peer id, so the media side can greet
/// with the same identity the match announced
#[derive(Default)]
struct PersonaBook {
    inner: Mutex<HashMap<String, Persona>>,
}

impl PersonaBook {
    fn insert(&self, persona: Persona) {
        self.inner
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(persona.peer_id.clone(), persona);
    }

    fn get(&self, peer_id: &str) -> Option<Persona> {
        self.inner
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(peer_id)
            .cloned()
    }
}

pub struct FallbackSimulator {
    match_delay: Duration,
    media_config: ScriptedMediaConfig,
}

impl FallbackSimulator {
    pub fn new(match_delay: Duration, media_config: ScriptedMediaConfig) -> Self {
        Self {
            match_delay,
            media_config,
        }
    }

    /// Produce the substitute channel + transport pair the controller swaps
    /// in. Both ends share a persona book so the match announcement and the
    /// session greeting agree.
    pub fn engage(&self) -> (Box<dyn SignalChannel>, Arc<dyn MediaTransport>) {
        info!("signaling unavailable; engaging fallback simulator");
        let book = Arc::new(PersonaBook::default());

        let channel = SimulatedSignalChannel::spawn(self.match_delay, book.clone());

        let greeting_book = book;
        let media = ScriptedMediaTransport::new(self.media_config.clone())
            .with_greeting_source(Arc::new(move |peer_id: &str| {
                greeting_book.get(peer_id).map(|p| p.greeting())
            }));

        (Box::new(channel), Arc::new(media))
    }
}

/// Signal channel whose far end is the simulator: a search is answered with
/// a synthetic match after the configured delay. The local client is always
/// the caller; the persona cannot dial in.
struct SimulatedSignalChannel {
    requests: mpsc::UnboundedSender<ClientMessage>,
    events: mpsc::UnboundedReceiver<SignalEvent>,
}

impl SimulatedSignalChannel {
    fn spawn(match_delay: Duration, book: Arc<PersonaBook>) -> Self {
        let (requests, mut requests_rx) = mpsc::unbounded_channel::<ClientMessage>();
        let (events_tx, events) = mpsc::unbounded_channel::<SignalEvent>();

        tokio::spawn(async move {
            while let Some(msg) = requests_rx.recv().await {
                match msg {
                    ClientMessage::StartSearch { attributes, .. } => {
                        let persona = Persona::generate(&attributes);
                        debug!(persona = %persona.display_name, "simulated search");
                        book.insert(persona.clone());
                        let events_tx = events_tx.clone();
                        tokio::spawn(async move {
                            tokio::time::sleep(match_delay).await;
                            let _ = events_tx.send(SignalEvent::MatchFound {
                                partner_peer_id: persona.peer_id,
                                role: PairRole::Caller,
                            });
                        });
                    }
                    ClientMessage::StopSearch | ClientMessage::Ping => {}
                }
            }
        });

        Self { requests, events }
    }
}

#[async_trait]
impl SignalChannel for SimulatedSignalChannel {
    fn send(&self, msg: &ClientMessage) -> Result<(), SignalError> {
        self.requests
            .send(msg.clone())
            .map_err(|_| SignalError::Closed)
    }

    async fn next_event(&mut self) -> Option<SignalEvent> {
        self.events.recv().await
    }
}
