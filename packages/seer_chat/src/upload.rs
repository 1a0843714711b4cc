//! Attachment Upload Coordinator
//!
//! Validate → preview → upload → broadcast. A selected file becomes a local
//! draft (no network traffic) until explicitly confirmed; confirmation does
//! a multipart upload and then transmits the backend's synthesized message
//! as an ordinary send, so every participant — the uploader included —
//! receives it through the normal receive path.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::future::Future;
use tokio::sync::mpsc;
use tracing::info;

use crate::channel::ChatChannel;
use crate::error::ChatError;
use crate::protocol::{ChatIdentity, ClientEvent, MessageType, OutgoingMessage};

pub const MAX_ATTACHMENT_BYTES: u64 = 10 * 1024 * 1024;

/// What the preview pane shows for a draft.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DraftPreview {
    /// Previewable inline from the draft's own bytes.
    Image,
    /// Non-image: name/size plus a lowercased extension badge.
    FileInfo { extension: String },
}

/// A locally held, not-yet-transmitted attachment selection.
#[derive(Debug, Clone)]
pub struct AttachmentDraft {
    pub file_name: String,
    pub mime_type: String,
    pub bytes: Vec<u8>,
    pub preview: DraftPreview,
}

impl AttachmentDraft {
    pub fn size(&self) -> u64 {
        self.bytes.len() as u64
    }
}

/// Upload response payload from which the broadcast message is synthesized.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadedFile {
    #[serde(alias = "_id")]
    pub id: String,
    #[serde(default)]
    pub content: String,
    pub message_type: MessageType,
    pub file_url: String,
    pub file_name: String,
    pub file_size: u64,
    pub file_type: String,
    pub timestamp: DateTime<Utc>,
}

/// Seam to the backend's multipart upload endpoint.
pub trait UploadBackend: Send + Sync {
    fn upload_file(
        &self,
        identity: &ChatIdentity,
        draft: &AttachmentDraft,
    ) -> impl Future<Output = Result<UploadedFile, ChatError>> + Send;
}

pub struct UploadCoordinator {
    outbound: mpsc::Sender<ClientEvent>,
    identity: ChatIdentity,
    selected: Option<AttachmentDraft>,
    uploading: bool,
}

impl UploadCoordinator {
    pub fn new(channel: &ChatChannel, identity: ChatIdentity) -> Self {
        Self::from_sender(channel.sender(), identity)
    }

    pub(crate) fn from_sender(
        outbound: mpsc::Sender<ClientEvent>,
        identity: ChatIdentity,
    ) -> Self {
        Self {
            outbound,
            identity,
            selected: None,
            uploading: false,
        }
    }

    /// Validate a file and hold it as the draft. No network call is made;
    /// oversized files are rejected before anything else happens.
    pub fn select_file(
        &mut self,
        file_name: &str,
        mime_type: &str,
        bytes: Vec<u8>,
    ) -> Result<&AttachmentDraft, ChatError> {
        if self.uploading {
            return Err(ChatError::Validation(
                "an upload is already in progress".to_string(),
            ));
        }
        if bytes.len() as u64 > MAX_ATTACHMENT_BYTES {
            return Err(ChatError::Validation(
                "file size must be less than 10MB".to_string(),
            ));
        }

        let preview = if mime_type.starts_with("image/") {
            DraftPreview::Image
        } else {
            DraftPreview::FileInfo {
                extension: extension_badge(file_name),
            }
        };

        Ok(self.selected.insert(AttachmentDraft {
            file_name: file_name.to_string(),
            mime_type: mime_type.to_string(),
            bytes,
            preview,
        }))
    }

    pub fn selected(&self) -> Option<&AttachmentDraft> {
        self.selected.as_ref()
    }

    /// True while an upload is in flight; new selection must stay disabled.
    pub fn uploading(&self) -> bool {
        self.uploading
    }

    /// Discard the draft with no network effect.
    pub fn cancel(&mut self) {
        if !self.uploading {
            self.selected = None;
        }
    }

    /// Upload the held draft and broadcast the resulting message. On failure
    /// the draft stays selected so the user can retry.
    pub async fn confirm_upload<B: UploadBackend>(
        &mut self,
        api: &B,
    ) -> Result<UploadedFile, ChatError> {
        if self.uploading {
            return Err(ChatError::Validation(
                "an upload is already in progress".to_string(),
            ));
        }
        let Some(draft) = self.selected.take() else {
            return Err(ChatError::Validation("no file selected".to_string()));
        };

        self.uploading = true;
        let result = api.upload_file(&self.identity, &draft).await;
        self.uploading = false;

        match result {
            Ok(uploaded) => {
                info!(file = %uploaded.file_name, url = %uploaded.file_url, "attachment uploaded");
                let outgoing = OutgoingMessage {
                    id: Some(uploaded.id.clone()),
                    room_id: self.identity.room_id.clone(),
                    session_id: self.identity.wire_session_id().to_string(),
                    sender_id: self.identity.sender_id.clone(),
                    sender_type: self.identity.sender_type,
                    message_type: uploaded.message_type,
                    content: uploaded.content.clone(),
                    file_url: Some(uploaded.file_url.clone()),
                    file_name: Some(uploaded.file_name.clone()),
                    file_size: Some(uploaded.file_size),
                    file_type: Some(uploaded.file_type.clone()),
                    timestamp: uploaded.timestamp,
                    user_id: self.identity.user_id.clone(),
                    expert_id: self.identity.expert_id.clone(),
                };
                self.outbound
                    .try_send(ClientEvent::SendMessage(outgoing))
                    .map_err(|_| {
                        ChatError::Transport("outbound queue is full or closed".to_string())
                    })?;
                Ok(uploaded)
            }
            Err(e) => {
                // Keep the draft for retry.
                self.selected = Some(draft);
                Err(match e {
                    ChatError::Auth(_) | ChatError::NotFound(_) => e,
                    other => ChatError::Upload(other.to_string()),
                })
            }
        }
    }
}

fn extension_badge(file_name: &str) -> String {
    file_name
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .filter(|ext| !ext.is_empty())
        .unwrap_or_else(|| "file".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{RoomId, SenderType};
    use std::sync::atomic::{AtomicBool, Ordering};

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

    fn coordinator() -> (UploadCoordinator, mpsc::Receiver<ClientEvent>) {
        let (tx, rx) = mpsc::channel(16);
        (UploadCoordinator::from_sender(tx, identity()), rx)
    }

    struct FakeUploads {
        fail: AtomicBool,
    }

    impl FakeUploads {
        fn new(fail: bool) -> Self {
            Self {
                fail: AtomicBool::new(fail),
            }
        }
    }

    impl UploadBackend for FakeUploads {
        async fn upload_file(
            &self,
            _identity: &ChatIdentity,
            draft: &AttachmentDraft,
        ) -> Result<UploadedFile, ChatError> {
            if self.fail.load(Ordering::SeqCst) {
                return Err(ChatError::Transport("backend is unreachable".to_string()));
            }
            Ok(UploadedFile {
                id: "m-99".to_string(),
                content: format!("Shared a file: {}", draft.file_name),
                message_type: if draft.mime_type.starts_with("image/") {
                    MessageType::Image
                } else {
                    MessageType::File
                },
                file_url: format!("https://cdn.example/{}", draft.file_name),
                file_name: draft.file_name.clone(),
                file_size: draft.size(),
                file_type: draft.mime_type.clone(),
                timestamp: Utc::now(),
            })
        }
    }

    #[tokio::test]
    async fn oversized_file_is_rejected_before_any_network_call() {
        let (mut uploads, _rx) = coordinator();
        let eleven_mb = vec![0u8; 11 * 1024 * 1024];
        let err = uploads
            .select_file("huge.bin", "application/octet-stream", eleven_mb)
            .unwrap_err();
        assert!(matches!(err, ChatError::Validation(_)));
        assert!(uploads.selected().is_none());
    }

    #[tokio::test]
    async fn file_under_the_limit_produces_a_draft() {
        let (mut uploads, _rx) = coordinator();
        let nine_mb = vec![0u8; 9 * 1024 * 1024];
        let draft = uploads
            .select_file("report.pdf", "application/pdf", nine_mb)
            .unwrap();
        assert_eq!(draft.size(), 9 * 1024 * 1024);
        assert_eq!(
            draft.preview,
            DraftPreview::FileInfo {
                extension: "pdf".to_string()
            }
        );
    }

    #[tokio::test]
    async fn image_mime_gets_an_image_preview() {
        let (mut uploads, _rx) = coordinator();
        let draft = uploads
            .select_file("cat.PNG", "image/png", vec![1, 2, 3])
            .unwrap();
        assert_eq!(draft.preview, DraftPreview::Image);
    }

    #[test]
    fn extension_badge_falls_back_for_odd_names() {
        assert_eq!(extension_badge("archive.tar.gz"), "gz");
        assert_eq!(extension_badge("README"), "file");
        assert_eq!(extension_badge("trailing."), "file");
    }

    #[tokio::test]
    async fn successful_upload_broadcasts_a_send_with_the_backend_id() {
        let (mut uploads, mut rx) = coordinator();
        uploads
            .select_file("cat.png", "image/png", vec![1, 2, 3])
            .unwrap();

        let uploaded = uploads.confirm_upload(&FakeUploads::new(false)).await.unwrap();
        assert_eq!(uploaded.id, "m-99");
        assert!(uploads.selected().is_none());
        assert!(!uploads.uploading());

        let event = rx.try_recv().unwrap();
        let ClientEvent::SendMessage(out) = event else {
            panic!("expected a send_message broadcast");
        };
        assert_eq!(out.id.as_deref(), Some("m-99"));
        assert_eq!(out.message_type, MessageType::Image);
        assert_eq!(out.file_name.as_deref(), Some("cat.png"));
    }

    #[tokio::test]
    async fn failed_upload_keeps_the_draft_for_retry() {
        let (mut uploads, mut rx) = coordinator();
        uploads
            .select_file("report.pdf", "application/pdf", vec![0u8; 128])
            .unwrap();

        let api = FakeUploads::new(true);
        let err = uploads.confirm_upload(&api).await.unwrap_err();
        assert!(matches!(err, ChatError::Upload(_)));
        assert!(uploads.selected().is_some());
        assert!(rx.try_recv().is_err());

        // Retry with the intact draft.
        api.fail.store(false, Ordering::SeqCst);
        uploads.confirm_upload(&api).await.unwrap();
        assert!(uploads.selected().is_none());
        assert!(rx.try_recv().is_ok());
    }

    #[tokio::test]
    async fn cancel_discards_the_draft_without_traffic() {
        let (mut uploads, mut rx) = coordinator();
        uploads
            .select_file("report.pdf", "application/pdf", vec![0u8; 128])
            .unwrap();
        uploads.cancel();
        assert!(uploads.selected().is_none());
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn confirm_without_a_draft_is_a_validation_error() {
        let (mut uploads, _rx) = coordinator();
        let err = uploads
            .confirm_upload(&FakeUploads::new(false))
            .await
            .unwrap_err();
        assert!(matches!(err, ChatError::Validation(_)));
    }
}
