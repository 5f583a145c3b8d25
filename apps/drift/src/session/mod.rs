//! Per-client session lifecycle: one cooperative task that owns the
//! signaling channel, drives the media transport, and reacts to user
//! actions, timers, and partner loss. All network failures are absorbed here
//! and turned into transitions; the only error a user ever sees is a failed
//! camera/microphone acquisition.

pub mod fallback;

use std::future::pending;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use drift_proto::{ClientMessage, PairRole};

use crate::config::SessionConfig;
use crate::media::{IncomingOffer, LocalMedia, MediaEvent, MediaSession, MediaTransport};
use crate::prefs::PrefStore;
use crate::signaling::{SignalChannel, SignalConnector, SignalEvent};
use self::fallback::FallbackSimulator;

/// Where the state machine currently is. Published on a watch channel so
/// UIs and tests can observe transitions as they happen.
#[derive(Debug, Clone, PartialEq)]
pub enum Phase {
    Idle,
    Searching,
    PlacingCall { partner_peer_id: String },
    AwaitingCall { partner_peer_id: String },
    Connected { partner_peer_id: String },
    /// Camera/microphone unavailable; terminal until the user acts again
    MediaFailed { reason: String },
}

#[derive(Debug)]
pub enum UserAction {
    StartSearch,
    /// Skip to the next partner
    Next,
    Stop,
    SendChat(String),
    Shutdown,
}

/// User-visible happenings beyond the phase itself
#[derive(Debug, Clone, PartialEq)]
pub enum Notice {
    Chat { text: String },
    MediaUnavailable { reason: String },
    PartnerLost,
    FallbackEngaged,
}

pub struct SessionHandle {
    /// This client's media-layer identity, as sent in `start-search`
    pub peer_id: String,
    pub actions: mpsc::UnboundedSender<UserAction>,
    pub phases: watch::Receiver<Phase>,
    pub notices: mpsc::UnboundedReceiver<Notice>,
    pub task: tokio::task::JoinHandle<()>,
}

pub struct SessionController {
    config: SessionConfig,
    prefs: PrefStore,
    peer_id: String,

    connector: Arc<dyn SignalConnector>,
    media: Arc<dyn MediaTransport>,
    fallback: FallbackSimulator,

    channel: Option<Box<dyn SignalChannel>>,
    fallback_media: Option<Arc<dyn MediaTransport>>,
    using_fallback: bool,

    local: Option<LocalMedia>,
    session: Option<Box<dyn MediaSession>>,
    deadline: Option<Instant>,

    phase: Phase,
    phase_tx: watch::Sender<Phase>,
    actions_rx: mpsc::UnboundedReceiver<UserAction>,
    notices: mpsc::UnboundedSender<Notice>,
}

enum Wake {
    Action(Option<UserAction>),
    Signal(Option<SignalEvent>),
    Media(Option<MediaEvent>),
    Offer(Option<IncomingOffer>),
    Deadline,
}

impl SessionController {
    pub fn spawn(
        config: SessionConfig,
        prefs: PrefStore,
        connector: Arc<dyn SignalConnector>,
        media: Arc<dyn MediaTransport>,
        fallback: FallbackSimulator,
    ) -> SessionHandle {
        let (actions_tx, actions_rx) = mpsc::unbounded_channel();
        let (notices_tx, notices_rx) = mpsc::unbounded_channel();
        let (phase_tx, phase_rx) = watch::channel(Phase::Idle);
        let peer_id = drift_proto::generate_peer_id();

        let controller = Self {
            config,
            prefs,
            peer_id: peer_id.clone(),
            connector,
            media,
            fallback,
            channel: None,
            fallback_media: None,
            using_fallback: false,
            local: None,
            session: None,
            deadline: None,
            phase: Phase::Idle,
            phase_tx,
            actions_rx,
            notices: notices_tx,
        };
        let task = tokio::spawn(controller.run());

        SessionHandle {
            peer_id,
            actions: actions_tx,
            phases: phase_rx,
            notices: notices_rx,
            task,
        }
    }

    /// The event loop. Single-task by construction: no two transitions ever
    /// run concurrently for one client, and events are handled in arrival
    /// order.
    async fn run(mut self) {
        loop {
            let offer_armed = matches!(self.phase, Phase::AwaitingCall { .. })
                && self.session.is_none();
            let offer_media = offer_armed.then(|| self.active_media());

            let wake = tokio::select! {
                action = self.actions_rx.recv() => Wake::Action(action),
                event = next_signal(&mut self.channel) => Wake::Signal(event),
                event = next_media(&mut self.session) => Wake::Media(event),
                offer = next_offer(offer_media) => Wake::Offer(offer),
                _ = at_deadline(self.deadline) => Wake::Deadline,
            };

            match wake {
                Wake::Action(None) => {
                    self.stop();
                    break;
                }
                Wake::Action(Some(action)) => {
                    if !self.handle_action(action).await {
                        break;
                    }
                }
                Wake::Signal(event) => self.handle_signal(event).await,
                Wake::Media(event) => self.handle_media(event).await,
                Wake::Offer(offer) => self.handle_offer(offer).await,
                Wake::Deadline => self.handle_deadline().await,
            }
        }
        debug!("session controller stopped");
    }

    async fn handle_action(&mut self, action: UserAction) -> bool {
        match action {
            UserAction::StartSearch => match self.phase {
                Phase::Idle | Phase::MediaFailed { .. } => self.begin_attempt().await,
                _ => debug!(phase = ?self.phase, "start-search action ignored"),
            },
            UserAction::Next => match self.phase {
                Phase::PlacingCall { .. }
                | Phase::AwaitingCall { .. }
                | Phase::Connected { .. } => {
                    info!("skipping to the next partner");
                    self.drop_session();
                    self.enter_searching().await;
                }
                _ => debug!(phase = ?self.phase, "skip action ignored"),
            },
            UserAction::Stop => {
                info!("stop requested");
                self.stop();
            }
            UserAction::SendChat(text) => {
                if let Some(session) = &self.session {
                    if let Err(err) = session.send_chat(&text) {
                        warn!(%err, "chat send failed");
                    }
                }
            }
            UserAction::Shutdown => {
                self.stop();
                return false;
            }
        }
        true
    }

    /// A fresh attempt starts with the camera. Acquisition failure is the
    /// one user-visible, non-retried error in the whole machine.
    async fn begin_attempt(&mut self) {
        match self.media.acquire_local().await {
            Ok(local) => {
                debug!(label = %local.label, "local media acquired");
                self.local = Some(local);
                self.enter_searching().await;
            }
            Err(err) => {
                warn!(%err, "media acquisition failed");
                let reason = err.to_string();
                let _ = self.notices.send(Notice::MediaUnavailable {
                    reason: reason.clone(),
                });
                self.set_phase(Phase::MediaFailed { reason });
            }
        }
    }

    async fn enter_searching(&mut self) {
        self.deadline = None;
        if self.channel.is_none() {
            self.establish_channel().await;
        }
        if !self.send_search() {
            // The channel died between establishment and use.
            self.engage_fallback();
            self.send_search();
        }
        self.set_phase(Phase::Searching);
    }

    /// Snapshot the preferences and queue the search message
    fn send_search(&self) -> bool {
        let msg = ClientMessage::StartSearch {
            peer_id: self.peer_id.clone(),
            attributes: self.prefs.search_attributes(),
        };
        match &self.channel {
            Some(channel) => channel.send(&msg).is_ok(),
            None => false,
        }
    }

    /// Open the signaling channel, bounded; on any failure the fallback
    /// simulator substitutes for the pier.
    async fn establish_channel(&mut self) {
        let connect = self.connector.connect();
        match tokio::time::timeout(self.config.signal_open_timeout, connect).await {
            Ok(Ok(channel)) => {
                debug!("signaling channel established");
                self.channel = Some(channel);
            }
            Ok(Err(err)) => {
                warn!(%err, "signaling connect failed");
                self.engage_fallback();
            }
            Err(_) => {
                warn!(
                    timeout = ?self.config.signal_open_timeout,
                    "signaling connect timed out"
                );
                self.engage_fallback();
            }
        }
    }

    fn engage_fallback(&mut self) {
        let (channel, media) = self.fallback.engage();
        self.channel = Some(channel);
        self.fallback_media = Some(media);
        if !self.using_fallback {
            self.using_fallback = true;
            let _ = self.notices.send(Notice::FallbackEngaged);
        }
    }

    async fn handle_signal(&mut self, event: Option<SignalEvent>) {
        match event {
            None => self.signal_lost("event stream ended").await,
            Some(SignalEvent::Lost { reason }) => self.signal_lost(&reason).await,
            Some(SignalEvent::MatchFound {
                partner_peer_id,
                role,
            }) => {
                if self.phase != Phase::Searching {
                    // Delivered after a stop or skip already left the queue.
                    debug!(
                        partner = %partner_peer_id,
                        phase = ?self.phase,
                        "stale match-found ignored"
                    );
                    return;
                }
                info!(partner = %partner_peer_id, %role, "match found");
                match role {
                    PairRole::Caller => self.place_call(partner_peer_id).await,
                    PairRole::Receiver => {
                        self.deadline =
                            Some(Instant::now() + self.config.handshake_timeout);
                        self.set_phase(Phase::AwaitingCall { partner_peer_id });
                    }
                }
            }
        }
    }

    async fn signal_lost(&mut self, reason: &str) {
        warn!(%reason, "signaling channel lost");
        self.channel = None;
        if self.phase == Phase::Searching {
            self.engage_fallback();
            self.send_search();
        }
    }

    async fn place_call(&mut self, partner_peer_id: String) {
        let Some(local) = self.local.clone() else {
            warn!("no local media at call time; re-entering search");
            self.enter_searching().await;
            return;
        };
        match self.active_media().initiate(&partner_peer_id, &local).await {
            Ok(session) => {
                self.session = Some(session);
                self.deadline = Some(Instant::now() + self.config.handshake_timeout);
                self.set_phase(Phase::PlacingCall { partner_peer_id });
            }
            Err(err) => {
                warn!(%err, "failed to place call");
                let _ = self.notices.send(Notice::PartnerLost);
                self.enter_searching().await;
            }
        }
    }

    async fn handle_offer(&mut self, offer: Option<IncomingOffer>) {
        let Some(offer) = offer else {
            // The transport can produce no more offers, so the awaited call
            // can never arrive.
            if matches!(self.phase, Phase::AwaitingCall { .. }) {
                let _ = self.notices.send(Notice::PartnerLost);
                self.drop_session();
                self.enter_searching().await;
            }
            return;
        };
        let Phase::AwaitingCall { partner_peer_id } = &self.phase else {
            return;
        };
        if offer.from_peer_id != *partner_peer_id {
            // Answer it anyway: the pier advertises one partner at a time
            // and an inbound dial is the partner by construction.
            debug!(
                expected = %partner_peer_id,
                got = %offer.from_peer_id,
                "offer peer differs from announced partner"
            );
        }
        let Some(local) = self.local.clone() else {
            return;
        };
        match self.active_media().accept(offer, &local).await {
            // The handshake deadline keeps running until the stream arrives.
            Ok(session) => self.session = Some(session),
            Err(err) => {
                warn!(%err, "failed to accept call");
                let _ = self.notices.send(Notice::PartnerLost);
                self.enter_searching().await;
            }
        }
    }

    async fn handle_media(&mut self, event: Option<MediaEvent>) {
        match event {
            Some(MediaEvent::StreamReady { remote_peer_id }) => {
                if let Phase::PlacingCall { partner_peer_id }
                | Phase::AwaitingCall { partner_peer_id } = &self.phase
                {
                    info!(remote = %remote_peer_id, "media handshake complete");
                    let partner_peer_id = partner_peer_id.clone();
                    self.deadline = None;
                    self.set_phase(Phase::Connected { partner_peer_id });
                }
            }
            Some(MediaEvent::Chat { text }) => {
                let _ = self.notices.send(Notice::Chat { text });
            }
            Some(MediaEvent::Closed) | None => match self.phase {
                Phase::Connected { .. }
                | Phase::PlacingCall { .. }
                | Phase::AwaitingCall { .. } => {
                    info!("partner left; searching again");
                    let _ = self.notices.send(Notice::PartnerLost);
                    self.drop_session();
                    self.enter_searching().await;
                }
                _ => self.drop_session(),
            },
        }
    }

    /// Bounded-wait rule: no handshake progress in time means the partner
    /// is gone, and the client goes back to searching. Never stuck.
    async fn handle_deadline(&mut self) {
        self.deadline = None;
        match self.phase {
            Phase::PlacingCall { .. } | Phase::AwaitingCall { .. } => {
                info!("no handshake progress within bound; partner lost");
                let _ = self.notices.send(Notice::PartnerLost);
                self.drop_session();
                self.enter_searching().await;
            }
            _ => {}
        }
    }

    /// Explicit stop: cancel every pending wait, release media
    /// synchronously, tell the pier, and go idle. A real channel stays open
    /// for the next search; a match-found that was already in flight when
    /// the stop left the registry arrives here and is dropped as stale. The
    /// fallback substitution is discarded so the next attempt tries the
    /// real pier again.
    fn stop(&mut self) {
        self.drop_session();
        if let Some(channel) = &self.channel {
            let _ = channel.send(&ClientMessage::StopSearch);
        }
        if self.using_fallback {
            self.channel = None;
            self.fallback_media = None;
            self.using_fallback = false;
        }
        self.local = None;
        self.deadline = None;
        self.set_phase(Phase::Idle);
    }

    fn drop_session(&mut self) {
        if let Some(mut session) = self.session.take() {
            debug!(remote = %session.remote_peer_id(), "releasing media session");
            session.terminate();
        }
    }

    fn active_media(&self) -> Arc<dyn MediaTransport> {
        self.fallback_media
            .clone()
            .unwrap_or_else(|| self.media.clone())
    }

    fn set_phase(&mut self, phase: Phase) {
        debug!(from = ?self.phase, to = ?phase, "phase transition");
        self.phase = phase.clone();
        let _ = self.phase_tx.send(phase);
    }
}

async fn next_signal(channel: &mut Option<Box<dyn SignalChannel>>) -> Option<SignalEvent> {
    match channel {
        Some(channel) => channel.next_event().await,
        None => pending().await,
    }
}

async fn next_media(session: &mut Option<Box<dyn MediaSession>>) -> Option<MediaEvent> {
    match session {
        Some(session) => session.next_event().await,
        None => pending().await,
    }
}

async fn next_offer(media: Option<Arc<dyn MediaTransport>>) -> Option<IncomingOffer> {
    match media {
        Some(media) => media.next_incoming().await,
        None => pending().await,
    }
}

async fn at_deadline(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => pending().await,
    }
}
