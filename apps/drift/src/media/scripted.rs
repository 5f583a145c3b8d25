//! Scripted media sessions: stream-ready after a fixed delay, canned chat
//! replies after a typing pause. This is what the fallback simulator plays a
//! synthetic partner with, and what the CLI binds until a real transport
//! library is linked in. No special-casing anywhere: it satisfies the same
//! contract as a real transport.

use async_trait::async_trait;
use rand::Rng;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use uuid::Uuid;

use super::{
    IncomingOffer, LocalMedia, MediaError, MediaEvent, MediaSession, MediaTransport, OfferLink,
};

/// Looks up a greeting line for a remote peer id, if one is known
pub type GreetingSource = dyn Fn(&str) -> Option<String> + Send + Sync;

#[derive(Debug, Clone)]
pub struct ScriptedMediaConfig {
    /// Delay before the remote stream "arrives"
    pub stream_delay: Duration,
    /// Typing pause before any scripted chat line
    pub typing_delay: Duration,
    /// Delay before an inbound dial materializes for a receiver
    pub offer_delay: Duration,
    pub replies: Vec<String>,
}

impl Default for ScriptedMediaConfig {
    fn default() -> Self {
        Self {
            stream_delay: Duration::from_secs(2),
            typing_delay: Duration::from_secs(2),
            offer_delay: Duration::from_secs(1),
            replies: vec![
                "hey!".to_string(),
                "how's it going?".to_string(),
                "this app is pretty neat".to_string(),
                "i'm only a scripted partner, but i can chat".to_string(),
            ],
        }
    }
}

pub struct ScriptedMediaTransport {
    config: ScriptedMediaConfig,
    greeting: Option<Arc<GreetingSource>>,
    /// Deadline for the currently pending synthetic offer, if armed
    armed_offer: Mutex<Option<Instant>>,
}

impl ScriptedMediaTransport {
    pub fn new(config: ScriptedMediaConfig) -> Self {
        Self {
            config,
            greeting: None,
            armed_offer: Mutex::new(None),
        }
    }

    pub fn with_greeting_source(mut self, source: Arc<GreetingSource>) -> Self {
        self.greeting = Some(source);
        self
    }

    fn open_session(&self, remote_peer_id: String) -> ScriptedSession {
        let (tx, rx) = mpsc::unbounded_channel();
        let greeting = match &self.greeting {
            Some(source) => (source.as_ref())(&remote_peer_id),
            None => None,
        };

        let script_tx = tx.clone();
        let stream_delay = self.config.stream_delay;
        let typing_delay = self.config.typing_delay;
        let script_remote = remote_peer_id.clone();
        let script = tokio::spawn(async move {
            tokio::time::sleep(stream_delay).await;
            if script_tx
                .send(MediaEvent::StreamReady {
                    remote_peer_id: script_remote,
                })
                .is_err()
            {
                return;
            }
            if let Some(line) = greeting {
                tokio::time::sleep(typing_delay).await;
                let _ = script_tx.send(MediaEvent::Chat { text: line });
            }
        });

        ScriptedSession {
            inbox: rx,
            inbox_tx: tx,
            remote_peer_id,
            replies: self.config.replies.clone(),
            typing_delay: self.config.typing_delay,
            terminated: Arc::new(AtomicBool::new(false)),
            script: Some(script),
        }
    }
}

#[async_trait]
impl MediaTransport for ScriptedMediaTransport {
    async fn acquire_local(&self) -> Result<LocalMedia, MediaError> {
        Ok(LocalMedia {
            label: "scripted-camera".to_string(),
        })
    }

    async fn initiate(
        &self,
        partner_peer_id: &str,
        _local: &LocalMedia,
    ) -> Result<Box<dyn MediaSession>, MediaError> {
        Ok(Box::new(self.open_session(partner_peer_id.to_string())))
    }

    async fn accept(
        &self,
        offer: IncomingOffer,
        _local: &LocalMedia,
    ) -> Result<Box<dyn MediaSession>, MediaError> {
        Ok(Box::new(self.open_session(offer.from_peer_id)))
    }

    async fn next_incoming(&self) -> Option<IncomingOffer> {
        // Arm once, then keep the same deadline across re-polls so waiting
        // alongside other events does not push the dial further out.
        let at = {
            let mut armed = self.armed_offer.lock().unwrap_or_else(|e| e.into_inner());
            *armed.get_or_insert_with(|| Instant::now() + self.config.offer_delay)
        };
        tokio::time::sleep_until(at).await;
        self.armed_offer
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();

        let id = Uuid::new_v4().simple().to_string();
        Some(IncomingOffer {
            from_peer_id: format!("visitor-{}", &id[..8]),
            link: OfferLink::Scripted,
        })
    }
}

struct ScriptedSession {
    inbox: mpsc::UnboundedReceiver<MediaEvent>,
    inbox_tx: mpsc::UnboundedSender<MediaEvent>,
    remote_peer_id: String,
    replies: Vec<String>,
    typing_delay: Duration,
    terminated: Arc<AtomicBool>,
    script: Option<tokio::task::JoinHandle<()>>,
}

#[async_trait]
impl MediaSession for ScriptedSession {
    async fn next_event(&mut self) -> Option<MediaEvent> {
        self.inbox.recv().await
    }

    fn send_chat(&self, _text: &str) -> Result<(), MediaError> {
        if self.terminated.load(Ordering::SeqCst) {
            return Err(MediaError::Closed);
        }
        if self.replies.is_empty() {
            return Ok(());
        }
        let reply = {
            let idx = rand::thread_rng().gen_range(0..self.replies.len());
            self.replies[idx].clone()
        };
        let tx = self.inbox_tx.clone();
        let typing = self.typing_delay;
        tokio::spawn(async move {
            tokio::time::sleep(typing).await;
            let _ = tx.send(MediaEvent::Chat { text: reply });
        });
        Ok(())
    }

    fn remote_peer_id(&self) -> &str {
        &self.remote_peer_id
    }

    fn terminate(&mut self) {
        self.terminated.store(true, Ordering::SeqCst);
        if let Some(script) = self.script.take() {
            script.abort();
        }
        self.inbox.close();
    }
}

impl Drop for ScriptedSession {
    fn drop(&mut self) {
        self.terminate();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn quick_config() -> ScriptedMediaConfig {
        ScriptedMediaConfig {
            stream_delay: Duration::from_millis(10),
            typing_delay: Duration::from_millis(10),
            offer_delay: Duration::from_millis(10),
            ..Default::default()
        }
    }

    #[test_timeout::tokio_timeout_test]
    async fn stream_ready_arrives_after_scripted_delay() {
        let transport = ScriptedMediaTransport::new(quick_config());
        let local = transport.acquire_local().await.unwrap();
        let mut session = transport.initiate("demo-1", &local).await.unwrap();
        assert_eq!(
            session.next_event().await,
            Some(MediaEvent::StreamReady {
                remote_peer_id: "demo-1".into()
            })
        );
    }

    #[test_timeout::tokio_timeout_test]
    async fn chat_gets_a_scripted_reply() {
        let transport = ScriptedMediaTransport::new(quick_config());
        let local = transport.acquire_local().await.unwrap();
        let mut session = transport.initiate("demo-1", &local).await.unwrap();
        // Skip the stream event, then chat.
        session.next_event().await;
        session.send_chat("hi there").unwrap();
        match session.next_event().await {
            Some(MediaEvent::Chat { text }) => assert!(!text.is_empty()),
            other => panic!("expected a chat reply, got {other:?}"),
        }
    }

    #[test_timeout::tokio_timeout_test]
    async fn greeting_mentions_the_persona() {
        let source: Arc<GreetingSource> =
            Arc::new(|peer: &str| Some(format!("hi, i'm {peer}")));
        let transport =
            ScriptedMediaTransport::new(quick_config()).with_greeting_source(source);
        let local = transport.acquire_local().await.unwrap();
        let mut session = transport.initiate("demo-alex", &local).await.unwrap();
        session.next_event().await; // stream
        assert_eq!(
            session.next_event().await,
            Some(MediaEvent::Chat {
                text: "hi, i'm demo-alex".into()
            })
        );
    }

    #[test_timeout::tokio_timeout_test]
    async fn terminate_silences_the_session() {
        let transport = ScriptedMediaTransport::new(quick_config());
        let local = transport.acquire_local().await.unwrap();
        let mut session = transport.initiate("demo-1", &local).await.unwrap();
        session.terminate();
        assert!(session.send_chat("anyone?").is_err());
        assert_eq!(session.next_event().await, None);
    }
}
