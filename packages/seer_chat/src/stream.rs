//! Message Stream Manager
//!
//! The authoritative per-room log, merging three inputs: a one-time history
//! fetch, live channel events, and local sends. Local sends are never
//! appended optimistically — the backend echo is the only append path, so
//! the id and timestamp shown are always the authoritative ones and the echo
//! can never duplicate an entry.

use chrono::Utc;
use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::channel::{ChannelEvent, ChatChannel};
use crate::error::ChatError;
use crate::history::HistoryPreference;
use crate::protocol::{ChatIdentity, ClientEvent, Message, MessageType, OutgoingMessage, ServerEvent};

const TYPING_DEBOUNCE: Duration = Duration::from_secs(1);

/// Seam to the backend's history endpoints.
pub trait HistoryBackend: Send + Sync {
    fn fetch_messages(
        &self,
        identity: &ChatIdentity,
        preference: HistoryPreference,
    ) -> impl Future<Output = Result<Vec<Message>, ChatError>> + Send;

    fn set_preference(
        &self,
        session_id: &str,
        preference: HistoryPreference,
    ) -> impl Future<Output = Result<(), ChatError>> + Send;
}

pub struct MessageStream {
    identity: ChatIdentity,
    outbound: mpsc::Sender<ClientEvent>,
    messages: Vec<Message>,
    seen: HashSet<String>,
    typing: HashSet<String>,
    preference: HistoryPreference,
    connected: bool,
    error: Option<String>,
    typing_active: Arc<AtomicBool>,
    typing_stop_task: Option<JoinHandle<()>>,
}

impl MessageStream {
    pub fn new(channel: &ChatChannel, identity: ChatIdentity) -> Self {
        Self::from_sender(channel.sender(), identity)
    }

    pub(crate) fn from_sender(
        outbound: mpsc::Sender<ClientEvent>,
        identity: ChatIdentity,
    ) -> Self {
        Self {
            identity,
            outbound,
            messages: Vec::new(),
            seen: HashSet::new(),
            typing: HashSet::new(),
            preference: HistoryPreference::default(),
            connected: false,
            error: None,
            typing_active: Arc::new(AtomicBool::new(false)),
            typing_stop_task: None,
        }
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn typing_users(&self) -> impl Iterator<Item = &str> {
        self.typing.iter().map(String::as_str)
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    pub fn preference(&self) -> HistoryPreference {
        self.preference
    }

    /// Current error banner, if any. Errors are recoverable: the log and
    /// typing set stay valid.
    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn clear_error(&mut self) {
        self.error = None;
    }

    /// Replace the log wholesale with a fresh history fetch. The fetch is
    /// the source of truth for past messages; nothing is merged from any
    /// prior in-memory log.
    pub async fn load_history<B: HistoryBackend>(&mut self, api: &B) -> Result<(), ChatError> {
        let fetched = api.fetch_messages(&self.identity, self.preference).await?;
        debug!(room = %self.identity.room_id, count = fetched.len(), "history loaded");
        self.seen = fetched.iter().map(|m| m.id.clone()).collect();
        self.messages = fetched;
        Ok(())
    }

    /// Switch history mode: acknowledge on the backend, then do a full
    /// context reset. Heavyweight by design — never call this per keystroke.
    /// In-flight sends are independent of the reload and arrive afterwards
    /// as ordinary receive events.
    pub async fn set_preference<B: HistoryBackend>(
        &mut self,
        api: &B,
        preference: HistoryPreference,
    ) -> Result<(), ChatError> {
        api.set_preference(self.identity.wire_session_id(), preference)
            .await?;
        self.preference = preference;
        self.load_history(api).await
    }

    /// Send a text message. The payload carries no id; the log is updated
    /// only by the subsequent echo from the channel.
    pub fn send_text(&mut self, text: &str) -> Result<(), ChatError> {
        let content = text.trim();
        if content.is_empty() {
            return Ok(());
        }
        let outgoing = OutgoingMessage {
            id: None,
            room_id: self.identity.room_id.clone(),
            session_id: self.identity.wire_session_id().to_string(),
            sender_id: self.identity.sender_id.clone(),
            sender_type: self.identity.sender_type,
            message_type: MessageType::Text,
            content: content.to_string(),
            file_url: None,
            file_name: None,
            file_size: None,
            file_type: None,
            timestamp: Utc::now(),
            user_id: self.identity.user_id.clone(),
            expert_id: self.identity.expert_id.clone(),
        };
        self.outbound
            .try_send(ClientEvent::SendMessage(outgoing))
            .map_err(|_| ChatError::Transport("outbound queue is full or closed".to_string()))?;
        // Sending ends the current typing burst.
        self.stop_typing();
        Ok(())
    }

    /// Record a keystroke. Emits `typing_start` at most once per burst and
    /// schedules a `typing_stop` after one second of inactivity; every
    /// keystroke resets the debounce timer.
    pub fn notify_typing(&mut self) {
        if !self.typing_active.swap(true, Ordering::SeqCst) {
            self.emit(ClientEvent::TypingStart {
                room_id: self.identity.room_id.clone(),
                sender_id: self.identity.sender_id.clone(),
            });
        }

        if let Some(task) = self.typing_stop_task.take() {
            task.abort();
        }
        let active = self.typing_active.clone();
        let outbound = self.outbound.clone();
        let room_id = self.identity.room_id.clone();
        let sender_id = self.identity.sender_id.clone();
        self.typing_stop_task = Some(tokio::spawn(async move {
            tokio::time::sleep(TYPING_DEBOUNCE).await;
            if active.swap(false, Ordering::SeqCst) {
                let _ = outbound.try_send(ClientEvent::TypingStop { room_id, sender_id });
            }
        }));
    }

    /// End the current typing burst immediately, if one is active.
    pub fn stop_typing(&mut self) {
        if let Some(task) = self.typing_stop_task.take() {
            task.abort();
        }
        if self.typing_active.swap(false, Ordering::SeqCst) {
            self.emit(ClientEvent::TypingStop {
                room_id: self.identity.room_id.clone(),
                sender_id: self.identity.sender_id.clone(),
            });
        }
    }

    /// Fold one channel event into the log. Events for other rooms are
    /// dropped silently — responses can arrive after the user has already
    /// switched rooms.
    pub fn apply(&mut self, event: ChannelEvent) {
        match event {
            ChannelEvent::Connected => {
                self.connected = true;
                self.error = None;
            }
            ChannelEvent::Disconnected => {
                self.connected = false;
            }
            ChannelEvent::ConnectError(_) => {
                self.connected = false;
                self.error = Some("Connection failed. Trying to reconnect...".to_string());
            }
            ChannelEvent::Server(server) => self.apply_server(server),
        }
    }

    fn apply_server(&mut self, event: ServerEvent) {
        match event {
            ServerEvent::ReceiveMessage(message) => {
                if message.room_id != self.identity.room_id {
                    debug!(room = %message.room_id, "dropping message for inactive room");
                    return;
                }
                if !self.seen.insert(message.id.clone()) {
                    debug!(id = %message.id, "duplicate message dropped");
                    return;
                }
                self.messages.push(message);
            }
            ServerEvent::UserTyping {
                room_id,
                user_id,
                is_typing,
            } => {
                if room_id != self.identity.room_id || user_id == self.identity.sender_id {
                    return;
                }
                if is_typing {
                    self.typing.insert(user_id);
                } else {
                    self.typing.remove(&user_id);
                }
            }
            ServerEvent::MessageRead { room_id, reader_id } => {
                if room_id != self.identity.room_id {
                    return;
                }
                // The reader has seen the *other* side's messages; their own
                // are untouched.
                for message in &mut self.messages {
                    if message.sender_id != reader_id {
                        message.is_read = true;
                    }
                }
            }
            ServerEvent::MessageError { error } => {
                warn!(error = %error, "message error from backend");
                self.error = Some(error);
            }
            ServerEvent::JoinSuccess { .. } => {
                self.error = None;
            }
            ServerEvent::JoinError { error } => {
                self.error = Some(format!("Failed to join chat room: {error}"));
            }
        }
    }

    fn emit(&self, event: ClientEvent) {
        if self.outbound.try_send(event).is_err() {
            warn!("channel outbound queue rejected a typing event");
        }
    }
}

impl Drop for MessageStream {
    fn drop(&mut self) {
        // Never leak the debounce timer past the view.
        if let Some(task) = self.typing_stop_task.take() {
            task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{RoomId, SenderType};
    use tokio::sync::Mutex;

    fn identity() -> ChatIdentity {
        ChatIdentity {
            room_id: RoomId::new("r1"),
            session_id: Some("s-1".to_string()),
            sender_id: "u-1".to_string(),
            sender_type: SenderType::User,
            user_id: "u-1".to_string(),
            expert_id: "e-1".to_string(),
        }
    }

    fn stream() -> (MessageStream, mpsc::Receiver<ClientEvent>) {
        let (tx, rx) = mpsc::channel(16);
        (MessageStream::from_sender(tx, identity()), rx)
    }

    fn incoming(id: &str, room: &str, sender: &str, content: &str) -> ServerEvent {
        ServerEvent::ReceiveMessage(Message {
            id: id.to_string(),
            room_id: RoomId::new(room),
            sender_id: sender.to_string(),
            sender_type: if sender == "u-1" {
                SenderType::User
            } else {
                SenderType::Expert
            },
            message_type: MessageType::Text,
            content: content.to_string(),
            file_url: None,
            file_name: None,
            file_size: None,
            file_type: None,
            timestamp: Utc::now(),
            is_read: false,
        })
    }

    fn drain(rx: &mut mpsc::Receiver<ClientEvent>) -> Vec<ClientEvent> {
        let mut out = Vec::new();
        while let Ok(ev) = rx.try_recv() {
            out.push(ev);
        }
        out
    }

    /// In-memory history backend for load/set-preference tests.
    struct FakeHistory {
        messages: Vec<Message>,
        preferences: Mutex<Vec<HistoryPreference>>,
    }

    impl FakeHistory {
        fn new(messages: Vec<Message>) -> Self {
            Self {
                messages,
                preferences: Mutex::new(Vec::new()),
            }
        }
    }

    impl HistoryBackend for FakeHistory {
        async fn fetch_messages(
            &self,
            _identity: &ChatIdentity,
            preference: HistoryPreference,
        ) -> Result<Vec<Message>, ChatError> {
            if preference == HistoryPreference::Fresh {
                return Ok(Vec::new());
            }
            Ok(self.messages.clone())
        }

        async fn set_preference(
            &self,
            _session_id: &str,
            preference: HistoryPreference,
        ) -> Result<(), ChatError> {
            self.preferences.lock().await.push(preference);
            Ok(())
        }
    }

    fn history_message(id: &str) -> Message {
        let ServerEvent::ReceiveMessage(m) = incoming(id, "r1", "e-1", "old") else {
            unreachable!()
        };
        m
    }

    #[tokio::test]
    async fn duplicate_ids_collapse_to_one_entry() {
        let (mut stream, _rx) = stream();
        stream.apply(ChannelEvent::Server(incoming("m1", "r1", "e-1", "hi")));
        stream.apply(ChannelEvent::Server(incoming("m1", "r1", "e-1", "hi")));
        stream.apply(ChannelEvent::Server(incoming("m2", "r1", "e-1", "there")));
        assert_eq!(stream.messages().len(), 2);
    }

    #[tokio::test]
    async fn echo_of_own_send_appears_exactly_once() {
        let (mut stream, mut rx) = stream();
        stream.send_text("hello").unwrap();
        // Nothing appended optimistically.
        assert!(stream.messages().is_empty());

        let sent = drain(&mut rx);
        assert!(matches!(&sent[0], ClientEvent::SendMessage(out) if out.id.is_none()));

        stream.apply(ChannelEvent::Server(incoming("m42", "r1", "u-1", "hello")));
        let hellos: Vec<_> = stream
            .messages()
            .iter()
            .filter(|m| m.content == "hello")
            .collect();
        assert_eq!(hellos.len(), 1);
        assert_eq!(hellos[0].id, "m42");
    }

    #[tokio::test]
    async fn messages_for_other_rooms_are_dropped() {
        let (mut stream, _rx) = stream();
        stream.apply(ChannelEvent::Server(incoming("m1", "r2", "e-1", "stale")));
        assert!(stream.messages().is_empty());
    }

    #[tokio::test]
    async fn read_receipt_marks_only_the_other_side() {
        let (mut stream, _rx) = stream();
        stream.apply(ChannelEvent::Server(incoming("m1", "r1", "u-1", "mine")));
        stream.apply(ChannelEvent::Server(incoming("m2", "r1", "e-1", "theirs")));

        // Expert read the room: the user's messages flip, the expert's don't.
        stream.apply(ChannelEvent::Server(ServerEvent::MessageRead {
            room_id: RoomId::new("r1"),
            reader_id: "e-1".to_string(),
        }));

        let mine = stream.messages().iter().find(|m| m.id == "m1").unwrap();
        let theirs = stream.messages().iter().find(|m| m.id == "m2").unwrap();
        assert!(mine.is_read);
        assert!(!theirs.is_read);
    }

    #[tokio::test]
    async fn read_receipt_for_other_room_is_ignored() {
        let (mut stream, _rx) = stream();
        stream.apply(ChannelEvent::Server(incoming("m1", "r1", "u-1", "mine")));
        stream.apply(ChannelEvent::Server(ServerEvent::MessageRead {
            room_id: RoomId::new("r2"),
            reader_id: "e-1".to_string(),
        }));
        assert!(!stream.messages()[0].is_read);
    }

    #[tokio::test]
    async fn typing_events_filter_room_and_self() {
        let (mut stream, _rx) = stream();

        stream.apply(ChannelEvent::Server(ServerEvent::UserTyping {
            room_id: RoomId::new("r1"),
            user_id: "e-1".to_string(),
            is_typing: true,
        }));
        // Own echo and foreign room must not show up.
        stream.apply(ChannelEvent::Server(ServerEvent::UserTyping {
            room_id: RoomId::new("r1"),
            user_id: "u-1".to_string(),
            is_typing: true,
        }));
        stream.apply(ChannelEvent::Server(ServerEvent::UserTyping {
            room_id: RoomId::new("r2"),
            user_id: "e-2".to_string(),
            is_typing: true,
        }));
        assert_eq!(stream.typing_users().collect::<Vec<_>>(), vec!["e-1"]);

        stream.apply(ChannelEvent::Server(ServerEvent::UserTyping {
            room_id: RoomId::new("r1"),
            user_id: "e-1".to_string(),
            is_typing: false,
        }));
        assert_eq!(stream.typing_users().count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn typing_burst_emits_one_start_and_a_debounced_stop() {
        let (mut stream, mut rx) = stream();

        stream.notify_typing();
        tokio::time::sleep(Duration::from_millis(400)).await;
        stream.notify_typing();
        tokio::time::sleep(Duration::from_millis(400)).await;
        stream.notify_typing();

        // Mid-burst: a single start, no stop yet.
        let mid = drain(&mut rx);
        assert_eq!(
            mid,
            vec![ClientEvent::TypingStart {
                room_id: RoomId::new("r1"),
                sender_id: "u-1".to_string(),
            }]
        );

        tokio::time::sleep(Duration::from_millis(1100)).await;
        let end = drain(&mut rx);
        assert_eq!(
            end,
            vec![ClientEvent::TypingStop {
                room_id: RoomId::new("r1"),
                sender_id: "u-1".to_string(),
            }]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn sending_ends_the_typing_burst() {
        let (mut stream, mut rx) = stream();
        stream.notify_typing();
        stream.send_text("done").unwrap();

        let events = drain(&mut rx);
        assert!(matches!(events[0], ClientEvent::TypingStart { .. }));
        assert!(matches!(events[1], ClientEvent::SendMessage(_)));
        assert!(matches!(events[2], ClientEvent::TypingStop { .. }));

        // The aborted debounce task must not fire a second stop.
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(drain(&mut rx).is_empty());
    }

    #[tokio::test]
    async fn history_load_replaces_the_log() {
        let (mut stream, _rx) = stream();
        stream.apply(ChannelEvent::Server(incoming("live-1", "r1", "e-1", "live")));

        let api = FakeHistory::new(vec![history_message("h1"), history_message("h2")]);
        stream.load_history(&api).await.unwrap();

        let ids: Vec<_> = stream.messages().iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, vec!["h1", "h2"]);

        // Live events resume appending after the reset, deduped against the
        // fetched ids.
        stream.apply(ChannelEvent::Server(incoming("h2", "r1", "e-1", "old")));
        stream.apply(ChannelEvent::Server(incoming("live-2", "r1", "e-1", "new")));
        assert_eq!(stream.messages().len(), 3);
    }

    #[tokio::test]
    async fn preference_switch_is_a_full_reset() {
        let (mut stream, _rx) = stream();
        let api = FakeHistory::new(vec![history_message("h1")]);

        stream.load_history(&api).await.unwrap();
        assert_eq!(stream.messages().len(), 1);

        stream
            .set_preference(&api, HistoryPreference::Fresh)
            .await
            .unwrap();
        assert_eq!(stream.preference(), HistoryPreference::Fresh);
        assert!(stream.messages().is_empty());
        assert_eq!(
            *api.preferences.lock().await,
            vec![HistoryPreference::Fresh]
        );
    }

    #[tokio::test]
    async fn errors_do_not_clear_the_log() {
        let (mut stream, _rx) = stream();
        stream.apply(ChannelEvent::Server(incoming("m1", "r1", "e-1", "hi")));
        stream.apply(ChannelEvent::Server(ServerEvent::MessageError {
            error: "persist failed".to_string(),
        }));
        assert_eq!(stream.error(), Some("persist failed"));
        assert_eq!(stream.messages().len(), 1);

        // join_success clears the banner, as does a reconnect.
        stream.apply(ChannelEvent::Server(ServerEvent::JoinSuccess { room_id: None }));
        assert_eq!(stream.error(), None);
    }
}
