//! Two linked in-process media endpoints. Everything a real transport pair
//! would do (dial, answer, stream-ready on both sides, chat, hang-up) but
//! over channels, so tests can drive a partner without any network.

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::{mpsc, Mutex};

use super::{
    IncomingOffer, LocalMedia, MediaError, MediaEvent, MediaSession, MediaTransport, OfferLink,
};

/// Plumbing carried inside an offer from the dialing endpoint
pub(crate) struct PairLink {
    inbox: mpsc::UnboundedReceiver<MediaEvent>,
    own_tx: mpsc::UnboundedSender<MediaEvent>,
    to_partner: mpsc::UnboundedSender<MediaEvent>,
}

/// Build two endpoints that dial each other
pub fn linked(peer_a: &str, peer_b: &str) -> (PairedMediaTransport, PairedMediaTransport) {
    let (offers_to_a_tx, offers_to_a_rx) = mpsc::unbounded_channel();
    let (offers_to_b_tx, offers_to_b_rx) = mpsc::unbounded_channel();
    (
        PairedMediaTransport {
            peer_id: peer_a.to_string(),
            incoming: Mutex::new(offers_to_a_rx),
            partner_offers: offers_to_b_tx,
            fail_acquire: AtomicBool::new(false),
        },
        PairedMediaTransport {
            peer_id: peer_b.to_string(),
            incoming: Mutex::new(offers_to_b_rx),
            partner_offers: offers_to_a_tx,
            fail_acquire: AtomicBool::new(false),
        },
    )
}

pub struct PairedMediaTransport {
    peer_id: String,
    incoming: Mutex<mpsc::UnboundedReceiver<IncomingOffer>>,
    partner_offers: mpsc::UnboundedSender<IncomingOffer>,
    fail_acquire: AtomicBool,
}

impl PairedMediaTransport {
    /// Make `acquire_local` fail, for exercising the camera-unavailable path
    pub fn set_camera_unavailable(&self, broken: bool) {
        self.fail_acquire.store(broken, Ordering::SeqCst);
    }
}

#[async_trait]
impl MediaTransport for PairedMediaTransport {
    async fn acquire_local(&self) -> Result<LocalMedia, MediaError> {
        if self.fail_acquire.load(Ordering::SeqCst) {
            return Err(MediaError::Acquisition("device busy".into()));
        }
        Ok(LocalMedia {
            label: format!("mock-camera-{}", self.peer_id),
        })
    }

    async fn initiate(
        &self,
        partner_peer_id: &str,
        _local: &LocalMedia,
    ) -> Result<Box<dyn MediaSession>, MediaError> {
        let (caller_tx, caller_rx) = mpsc::unbounded_channel();
        let (callee_tx, callee_rx) = mpsc::unbounded_channel();

        let offer = IncomingOffer {
            from_peer_id: self.peer_id.clone(),
            link: OfferLink::Pair(PairLink {
                inbox: callee_rx,
                own_tx: callee_tx.clone(),
                to_partner: caller_tx,
            }),
        };
        self.partner_offers
            .send(offer)
            .map_err(|_| MediaError::Handshake("partner endpoint gone".into()))?;

        Ok(Box::new(PairSession {
            inbox: caller_rx,
            to_partner: Some(callee_tx),
            remote_peer_id: partner_peer_id.to_string(),
        }))
    }

    async fn accept(
        &self,
        offer: IncomingOffer,
        _local: &LocalMedia,
    ) -> Result<Box<dyn MediaSession>, MediaError> {
        let link = match offer.link {
            OfferLink::Pair(link) => link,
            OfferLink::Scripted => {
                return Err(MediaError::Handshake("offer carries no pair link".into()));
            }
        };

        // Answering completes the handshake: both sides see the stream.
        let _ = link.to_partner.send(MediaEvent::StreamReady {
            remote_peer_id: self.peer_id.clone(),
        });
        let _ = link.own_tx.send(MediaEvent::StreamReady {
            remote_peer_id: offer.from_peer_id.clone(),
        });

        Ok(Box::new(PairSession {
            inbox: link.inbox,
            to_partner: Some(link.to_partner),
            remote_peer_id: offer.from_peer_id,
        }))
    }

    async fn next_incoming(&self) -> Option<IncomingOffer> {
        self.incoming.lock().await.recv().await
    }
}

struct PairSession {
    inbox: mpsc::UnboundedReceiver<MediaEvent>,
    to_partner: Option<mpsc::UnboundedSender<MediaEvent>>,
    remote_peer_id: String,
}

#[async_trait]
impl MediaSession for PairSession {
    async fn next_event(&mut self) -> Option<MediaEvent> {
        self.inbox.recv().await
    }

    fn send_chat(&self, text: &str) -> Result<(), MediaError> {
        let tx = self.to_partner.as_ref().ok_or(MediaError::Closed)?;
        tx.send(MediaEvent::Chat {
            text: text.to_string(),
        })
        .map_err(|_| MediaError::Closed)
    }

    fn remote_peer_id(&self) -> &str {
        &self.remote_peer_id
    }

    fn terminate(&mut self) {
        if let Some(tx) = self.to_partner.take() {
            let _ = tx.send(MediaEvent::Closed);
        }
        self.inbox.close();
    }
}

impl Drop for PairSession {
    fn drop(&mut self) {
        self.terminate();
    }
}
