//! Narrow contract over the external media-transport library. The session
//! controller only ever talks to these traits; the real library (WebRTC or
//! otherwise) binds behind them, and the in-process implementations below
//! back the tests and the fallback path.

pub mod pair;
pub mod scripted;

use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum MediaError {
    /// Camera/microphone unavailable. Terminal for the current attempt and
    /// surfaced to the user; never retried automatically.
    #[error("camera/microphone unavailable: {0}")]
    Acquisition(String),
    /// The dial or accept could not be carried out
    #[error("media handshake failed: {0}")]
    Handshake(String),
    /// The session's transport is gone
    #[error("media transport closed")]
    Closed,
}

/// Handle on the local capture devices; dropping it releases them
#[derive(Debug, Clone)]
pub struct LocalMedia {
    pub label: String,
}

/// What a live media session reports back to the controller
#[derive(Debug, Clone, PartialEq)]
pub enum MediaEvent {
    /// Remote media is flowing; the handshake is complete
    StreamReady { remote_peer_id: String },
    /// Text line from the partner over the session's data path
    Chat { text: String },
    /// Partner hung up, or the transport failed unrecoverably
    Closed,
}

/// An inbound dial from a partner, handed to a receiver-role client
pub struct IncomingOffer {
    pub from_peer_id: String,
    pub(crate) link: OfferLink,
}

pub(crate) enum OfferLink {
    /// Linked in-process endpoint (tests)
    Pair(pair::PairLink),
    /// No plumbing; the implementation scripts the session itself
    Scripted,
}

impl std::fmt::Debug for IncomingOffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IncomingOffer")
            .field("from_peer_id", &self.from_peer_id)
            .finish()
    }
}

/// One established (or establishing) media session. `terminate` must release
/// transport resources synchronously; the stop and skip paths rely on that.
#[async_trait]
pub trait MediaSession: Send {
    /// Next event, in arrival order. `None` once the session is torn down.
    async fn next_event(&mut self) -> Option<MediaEvent>;

    /// Send a text line to the partner over the data path
    fn send_chat(&self, text: &str) -> Result<(), MediaError>;

    /// Identity of the remote end, as established at dial/answer time
    fn remote_peer_id(&self) -> &str;

    fn terminate(&mut self);
}

/// The transport factory the controller drives. Implementations must return
/// promptly from `initiate`/`accept`; handshake progress is reported on the
/// session's event stream, which is what the controller's bounded-wait rule
/// watches.
#[async_trait]
pub trait MediaTransport: Send + Sync {
    /// Acquire camera and microphone for the coming session
    async fn acquire_local(&self) -> Result<LocalMedia, MediaError>;

    /// Caller side: dial the partner
    async fn initiate(
        &self,
        partner_peer_id: &str,
        local: &LocalMedia,
    ) -> Result<Box<dyn MediaSession>, MediaError>;

    /// Receiver side: answer an inbound dial
    async fn accept(
        &self,
        offer: IncomingOffer,
        local: &LocalMedia,
    ) -> Result<Box<dyn MediaSession>, MediaError>;

    /// Wait for the next inbound dial. `None` means the transport can no
    /// longer produce offers.
    async fn next_incoming(&self) -> Option<IncomingOffer>;
}
