//! # Seer Chat
//!
//! Client core for the Seer consultation marketplace: everything between a
//! user tapping "Live Chat" and a negotiated, ordered, recoverable message
//! stream with attachments, typing signals, and read receipts.
//!
//! ## Pieces
//!
//! - [`ChatChannel`] — one reconnecting websocket connection shared
//!   process-wide across all chat views
//! - [`RoomTracker`] — at most one active room membership per client
//! - [`Negotiator`] — session request + bounded status polling until the
//!   expert accepts, declines, or the attempt times out
//! - [`MessageStream`] — the per-room log: history fetch, live events,
//!   dedup, read receipts, typing state
//! - [`UploadCoordinator`] — attachment drafts, validation, multipart
//!   upload, synthesized message broadcast
//! - [`HistoryPreference`] — continue / fresh / summary history loading
//! - [`ApiClient`] — the backend HTTP seam implementing the trait seams the
//!   components consume
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use tokio::sync::Mutex;
//! use seer_chat::{
//!     ApiClient, ChatChannel, ClientConfig, FileConfig, Negotiator, RoomTracker,
//! };
//!
//! # async fn run() -> Result<(), seer_chat::ChatError> {
//! let config = ClientConfig::from_file(&FileConfig::default());
//! let api = Arc::new(ApiClient::new(&config)?);
//! let channel = ChatChannel::shared(&config);
//! let room = Arc::new(Mutex::new(RoomTracker::new(&channel)));
//!
//! let mut negotiator = Negotiator::new(api.clone(), "expert-42", room, &config);
//! let session_id = negotiator.request().await?;
//! # let _ = session_id;
//! # Ok(())
//! # }
//! ```

pub mod api;
pub mod channel;
pub mod config;
pub mod error;
pub mod history;
pub mod protocol;
pub mod room;
pub mod session;
pub mod stream;
pub mod upload;

pub use api::ApiClient;
pub use channel::{ChannelEvent, ChatChannel, ConnectionState};
pub use config::{ClientConfig, FileConfig, ReconnectPolicy, load_config};
pub use error::ChatError;
pub use history::HistoryPreference;
pub use protocol::{
    ChatIdentity, ClientEvent, Message, MessageType, OutgoingMessage, RoomId, SenderType,
    ServerEvent, Session, SessionStatus,
};
pub use room::RoomTracker;
pub use session::{NegotiationFailure, NegotiationState, Negotiator, SessionBackend};
pub use stream::{HistoryBackend, MessageStream};
pub use upload::{
    AttachmentDraft, DraftPreview, MAX_ATTACHMENT_BYTES, UploadBackend, UploadCoordinator,
    UploadedFile,
};
