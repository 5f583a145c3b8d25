//! Controller lifecycle tests over in-process signaling and media pairs:
//! every transition the state machine promises, driven from the outside the
//! way a pier and a partner would.

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, watch};

use drift_client_core::config::SessionConfig;
use drift_client_core::media::pair::{linked, PairedMediaTransport};
use drift_client_core::media::scripted::ScriptedMediaConfig;
use drift_client_core::media::{MediaEvent, MediaSession, MediaTransport};
use drift_client_core::prefs::PrefStore;
use drift_client_core::session::fallback::FallbackSimulator;
use drift_client_core::session::{
    Notice, Phase, SessionController, SessionHandle, UserAction,
};
use drift_client_core::signaling::{
    SignalChannel, SignalConnector, SignalError, SignalEvent,
};
use drift_proto::{ClientMessage, PairRole};

fn quick_config() -> SessionConfig {
    SessionConfig {
        signal_open_timeout: Duration::from_millis(200),
        handshake_timeout: Duration::from_millis(300),
        fallback_match_delay: Duration::from_millis(10),
    }
}

fn quick_fallback() -> FallbackSimulator {
    FallbackSimulator::new(
        Duration::from_millis(10),
        ScriptedMediaConfig {
            stream_delay: Duration::from_millis(20),
            typing_delay: Duration::from_millis(10),
            offer_delay: Duration::from_millis(10),
            ..Default::default()
        },
    )
}

/// Test stand-in for the pier: hands out channels whose events the test
/// scripts, and funnels everything the controller sends into one receiver.
#[derive(Clone)]
struct ScriptedPier {
    inner: Arc<PierInner>,
}

struct PierInner {
    current_events: Mutex<Option<mpsc::UnboundedSender<SignalEvent>>>,
    sent_tx: mpsc::UnboundedSender<ClientMessage>,
    refuse: AtomicBool,
}

impl ScriptedPier {
    fn new() -> (Self, mpsc::UnboundedReceiver<ClientMessage>) {
        let (sent_tx, sent_rx) = mpsc::unbounded_channel();
        (
            Self {
                inner: Arc::new(PierInner {
                    current_events: Mutex::new(None),
                    sent_tx,
                    refuse: AtomicBool::new(false),
                }),
            },
            sent_rx,
        )
    }

    fn refusing() -> Self {
        let (pier, _) = Self::new();
        pier.inner.refuse.store(true, Ordering::SeqCst);
        pier
    }

    fn push(&self, event: SignalEvent) {
        let guard = self.inner.current_events.lock().unwrap();
        guard
            .as_ref()
            .expect("no controller connection")
            .send(event)
            .expect("controller dropped its channel");
    }
}

#[async_trait]
impl SignalConnector for ScriptedPier {
    async fn connect(&self) -> Result<Box<dyn SignalChannel>, SignalError> {
        if self.inner.refuse.load(Ordering::SeqCst) {
            return Err(SignalError::Unavailable("connection refused".into()));
        }
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        *self.inner.current_events.lock().unwrap() = Some(events_tx);
        Ok(Box::new(ScriptedChannel {
            events: events_rx,
            sent: self.inner.sent_tx.clone(),
        }))
    }
}

struct ScriptedChannel {
    events: mpsc::UnboundedReceiver<SignalEvent>,
    sent: mpsc::UnboundedSender<ClientMessage>,
}

#[async_trait]
impl SignalChannel for ScriptedChannel {
    fn send(&self, msg: &ClientMessage) -> Result<(), SignalError> {
        self.sent.send(msg.clone()).map_err(|_| SignalError::Closed)
    }

    async fn next_event(&mut self) -> Option<SignalEvent> {
        self.events.recv().await
    }
}

/// Connector that never completes; exercises the open-timeout bound
struct HangingConnector;

#[async_trait]
impl SignalConnector for HangingConnector {
    async fn connect(&self) -> Result<Box<dyn SignalChannel>, SignalError> {
        std::future::pending().await
    }
}

fn spawn(
    connector: Arc<dyn SignalConnector>,
    media: Arc<dyn MediaTransport>,
) -> SessionHandle {
    SessionController::spawn(
        quick_config(),
        PrefStore::default(),
        connector,
        media,
        quick_fallback(),
    )
}

async fn wait_phase(
    phases: &mut watch::Receiver<Phase>,
    pred: impl Fn(&Phase) -> bool,
) -> Phase {
    loop {
        {
            let current = phases.borrow_and_update();
            if pred(&current) {
                return current.clone();
            }
        }
        phases
            .changed()
            .await
            .expect("controller ended while waiting for phase");
    }
}

async fn expect_search(sent: &mut mpsc::UnboundedReceiver<ClientMessage>) {
    match tokio::time::timeout(Duration::from_secs(2), sent.recv()).await {
        Ok(Some(ClientMessage::StartSearch { .. })) => {}
        other => panic!("expected start-search, got {other:?}"),
    }
}

async fn expect_notice(notices: &mut mpsc::UnboundedReceiver<Notice>, wanted: Notice) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    loop {
        let notice = tokio::time::timeout_at(deadline, notices.recv())
            .await
            .expect("timed out waiting for notice")
            .expect("notices channel closed");
        if notice == wanted {
            return;
        }
    }
}

/// Drive the controller (as caller) and the partner endpoint all the way to
/// Connected; returns the partner-side session.
async fn connect_as_caller(
    handle: &mut SessionHandle,
    pier: &ScriptedPier,
    sent: &mut mpsc::UnboundedReceiver<ClientMessage>,
    partner_end: &PairedMediaTransport,
) -> Box<dyn MediaSession> {
    handle.actions.send(UserAction::StartSearch).unwrap();
    expect_search(sent).await;
    wait_phase(&mut handle.phases, |p| *p == Phase::Searching).await;

    pier.push(SignalEvent::MatchFound {
        partner_peer_id: "partner-peer".into(),
        role: PairRole::Caller,
    });

    let offer = partner_end.next_incoming().await.expect("offer");
    let local = partner_end.acquire_local().await.unwrap();
    let mut partner_session = partner_end.accept(offer, &local).await.unwrap();
    assert!(matches!(
        partner_session.next_event().await,
        Some(MediaEvent::StreamReady { .. })
    ));

    wait_phase(&mut handle.phases, |p| {
        matches!(p, Phase::Connected { .. })
    })
    .await;
    partner_session
}

#[test_timeout::tokio_timeout_test]
async fn caller_reaches_connected_and_chats_both_ways() {
    let (pier, mut sent) = ScriptedPier::new();
    let (client_end, partner_end) = linked("client-end", "partner-end");
    let mut handle = spawn(Arc::new(pier.clone()), Arc::new(client_end));

    let mut partner_session =
        connect_as_caller(&mut handle, &pier, &mut sent, &partner_end).await;

    handle
        .actions
        .send(UserAction::SendChat("hi there".into()))
        .unwrap();
    assert_eq!(
        partner_session.next_event().await,
        Some(MediaEvent::Chat {
            text: "hi there".into()
        })
    );

    partner_session.send_chat("hello back").unwrap();
    expect_notice(
        &mut handle.notices,
        Notice::Chat {
            text: "hello back".into(),
        },
    )
    .await;
}

#[test_timeout::tokio_timeout_test]
async fn receiver_answers_the_inbound_call() {
    let (pier, mut sent) = ScriptedPier::new();
    let (client_end, partner_end) = linked("client-end", "partner-end");
    let mut handle = spawn(Arc::new(pier.clone()), Arc::new(client_end));

    handle.actions.send(UserAction::StartSearch).unwrap();
    expect_search(&mut sent).await;
    wait_phase(&mut handle.phases, |p| *p == Phase::Searching).await;

    pier.push(SignalEvent::MatchFound {
        partner_peer_id: "partner-peer".into(),
        role: PairRole::Receiver,
    });
    wait_phase(&mut handle.phases, |p| {
        matches!(p, Phase::AwaitingCall { .. })
    })
    .await;

    // The partner dials in; the controller answers without special-casing.
    let local = partner_end.acquire_local().await.unwrap();
    let mut partner_session = partner_end
        .initiate("client-peer", &local)
        .await
        .unwrap();

    wait_phase(&mut handle.phases, |p| {
        matches!(p, Phase::Connected { .. })
    })
    .await;
    assert!(matches!(
        partner_session.next_event().await,
        Some(MediaEvent::StreamReady { .. })
    ));
}

#[test_timeout::tokio_timeout_test]
async fn handshake_stall_counts_as_partner_lost() {
    let (pier, mut sent) = ScriptedPier::new();
    let (client_end, partner_end) = linked("client-end", "partner-end");
    let mut handle = spawn(Arc::new(pier.clone()), Arc::new(client_end));

    handle.actions.send(UserAction::StartSearch).unwrap();
    expect_search(&mut sent).await;

    pier.push(SignalEvent::MatchFound {
        partner_peer_id: "partner-peer".into(),
        role: PairRole::Caller,
    });
    wait_phase(&mut handle.phases, |p| {
        matches!(p, Phase::PlacingCall { .. })
    })
    .await;

    // The partner never answers: the offer sits unaccepted.
    let _unanswered = partner_end.next_incoming().await;

    expect_notice(&mut handle.notices, Notice::PartnerLost).await;
    wait_phase(&mut handle.phases, |p| *p == Phase::Searching).await;
    // Back in the queue: a second search went out.
    expect_search(&mut sent).await;
}

#[test_timeout::tokio_timeout_test]
async fn duplicate_match_found_is_ignored() {
    let (pier, mut sent) = ScriptedPier::new();
    let (client_end, partner_end) = linked("client-end", "partner-end");
    let mut handle = spawn(Arc::new(pier.clone()), Arc::new(client_end));

    handle.actions.send(UserAction::StartSearch).unwrap();
    expect_search(&mut sent).await;
    wait_phase(&mut handle.phases, |p| *p == Phase::Searching).await;

    let matched = SignalEvent::MatchFound {
        partner_peer_id: "partner-peer".into(),
        role: PairRole::Caller,
    };
    pier.push(matched.clone());
    pier.push(matched);

    wait_phase(&mut handle.phases, |p| {
        matches!(p, Phase::PlacingCall { .. })
    })
    .await;

    // Exactly one dial went out.
    let _first = partner_end.next_incoming().await.expect("first offer");
    match tokio::time::timeout(Duration::from_millis(200), partner_end.next_incoming())
        .await
    {
        Err(_) => {}
        Ok(offer) => panic!("second dial should not exist: {offer:?}"),
    }
}

#[test_timeout::tokio_timeout_test]
async fn match_found_after_stop_is_stale() {
    let (pier, mut sent) = ScriptedPier::new();
    let (client_end, partner_end) = linked("client-end", "partner-end");
    let mut handle = spawn(Arc::new(pier.clone()), Arc::new(client_end));

    handle.actions.send(UserAction::StartSearch).unwrap();
    expect_search(&mut sent).await;
    handle.actions.send(UserAction::Stop).unwrap();
    wait_phase(&mut handle.phases, |p| *p == Phase::Idle).await;
    match tokio::time::timeout(Duration::from_secs(2), sent.recv()).await {
        Ok(Some(ClientMessage::StopSearch)) => {}
        other => panic!("expected stop-search, got {other:?}"),
    }

    // The pairing raced the stop on the pier side; the notification arrives
    // after the stop already left the registry.
    pier.push(SignalEvent::MatchFound {
        partner_peer_id: "partner-peer".into(),
        role: PairRole::Caller,
    });

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(*handle.phases.borrow(), Phase::Idle);
    match tokio::time::timeout(Duration::from_millis(100), partner_end.next_incoming())
        .await
    {
        Err(_) => {}
        Ok(offer) => panic!("stale match must not dial: {offer:?}"),
    }
}

#[test_timeout::tokio_timeout_test]
async fn skip_releases_media_before_searching_again() {
    let (pier, mut sent) = ScriptedPier::new();
    let (client_end, partner_end) = linked("client-end", "partner-end");
    let mut handle = spawn(Arc::new(pier.clone()), Arc::new(client_end));

    let mut partner_session =
        connect_as_caller(&mut handle, &pier, &mut sent, &partner_end).await;

    handle.actions.send(UserAction::Next).unwrap();

    // The partner sees the hang-up, and the controller is searching again.
    loop {
        match partner_session.next_event().await {
            Some(MediaEvent::Closed) | None => break,
            Some(_) => {}
        }
    }
    wait_phase(&mut handle.phases, |p| *p == Phase::Searching).await;
    expect_search(&mut sent).await;
}

#[test_timeout::tokio_timeout_test]
async fn partner_disconnect_triggers_auto_research() {
    let (pier, mut sent) = ScriptedPier::new();
    let (client_end, partner_end) = linked("client-end", "partner-end");
    let mut handle = spawn(Arc::new(pier.clone()), Arc::new(client_end));

    let mut partner_session =
        connect_as_caller(&mut handle, &pier, &mut sent, &partner_end).await;

    partner_session.terminate();

    expect_notice(&mut handle.notices, Notice::PartnerLost).await;
    wait_phase(&mut handle.phases, |p| *p == Phase::Searching).await;
    expect_search(&mut sent).await;
}

#[test_timeout::tokio_timeout_test]
async fn stop_while_connected_releases_both_sides() {
    let (pier, mut sent) = ScriptedPier::new();
    let (client_end, partner_end) = linked("client-end", "partner-end");
    let mut handle = spawn(Arc::new(pier.clone()), Arc::new(client_end));

    let mut partner_session =
        connect_as_caller(&mut handle, &pier, &mut sent, &partner_end).await;

    handle.actions.send(UserAction::Stop).unwrap();

    loop {
        match partner_session.next_event().await {
            Some(MediaEvent::Closed) | None => break,
            Some(_) => {}
        }
    }
    wait_phase(&mut handle.phases, |p| *p == Phase::Idle).await;
}

#[test_timeout::tokio_timeout_test]
async fn camera_failure_is_terminal_until_the_user_retries() {
    let (pier, mut sent) = ScriptedPier::new();
    let (client_end, _partner_end) = linked("client-end", "partner-end");
    client_end.set_camera_unavailable(true);
    let mut handle = spawn(Arc::new(pier.clone()), Arc::new(client_end));

    handle.actions.send(UserAction::StartSearch).unwrap();
    expect_notice(
        &mut handle.notices,
        Notice::MediaUnavailable {
            reason: "camera/microphone unavailable: device busy".into(),
        },
    )
    .await;
    wait_phase(&mut handle.phases, |p| {
        matches!(p, Phase::MediaFailed { .. })
    })
    .await;

    // No search ever went out, and nothing retries on its own.
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(sent.try_recv().is_err());
    assert!(matches!(
        *handle.phases.borrow(),
        Phase::MediaFailed { .. }
    ));

    // A fresh explicit attempt is allowed (and fails the same way here).
    handle.actions.send(UserAction::StartSearch).unwrap();
    expect_notice(
        &mut handle.notices,
        Notice::MediaUnavailable {
            reason: "camera/microphone unavailable: device busy".into(),
        },
    )
    .await;
}

#[test_timeout::tokio_timeout_test]
async fn refused_signaling_falls_back_and_connects() {
    let pier = ScriptedPier::refusing();
    let (client_end, _partner_end) = linked("client-end", "partner-end");
    let mut handle = spawn(Arc::new(pier), Arc::new(client_end));

    handle.actions.send(UserAction::StartSearch).unwrap();
    expect_notice(&mut handle.notices, Notice::FallbackEngaged).await;

    let phase = wait_phase(&mut handle.phases, |p| {
        matches!(p, Phase::Connected { .. })
    })
    .await;
    let Phase::Connected { partner_peer_id } = phase else {
        unreachable!()
    };
    assert!(partner_peer_id.starts_with("demo-"), "{partner_peer_id}");

    // Chat gets a scripted reply, like any partner would give.
    handle
        .actions
        .send(UserAction::SendChat("hello?".into()))
        .unwrap();
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    loop {
        let notice = tokio::time::timeout_at(deadline, handle.notices.recv())
            .await
            .expect("timed out waiting for chat")
            .expect("notices closed");
        if matches!(notice, Notice::Chat { .. }) {
            break;
        }
    }

    // Skip behaves identically to a real session: a new partner arrives.
    handle.actions.send(UserAction::Next).unwrap();
    let phase = wait_phase(&mut handle.phases, |p| match p {
        Phase::Connected {
            partner_peer_id: next,
        } => *next != partner_peer_id,
        _ => false,
    })
    .await;
    let Phase::Connected {
        partner_peer_id: second,
    } = phase
    else {
        unreachable!()
    };
    assert_ne!(second, partner_peer_id);

    // And stop is stop.
    handle.actions.send(UserAction::Stop).unwrap();
    wait_phase(&mut handle.phases, |p| *p == Phase::Idle).await;
}

#[test_timeout::tokio_timeout_test]
async fn connect_timeout_engages_fallback() {
    let (client_end, _partner_end) = linked("client-end", "partner-end");
    let mut handle = spawn(Arc::new(HangingConnector), Arc::new(client_end));

    handle.actions.send(UserAction::StartSearch).unwrap();
    expect_notice(&mut handle.notices, Notice::FallbackEngaged).await;
    wait_phase(&mut handle.phases, |p| {
        matches!(p, Phase::Connected { .. })
    })
    .await;
}
