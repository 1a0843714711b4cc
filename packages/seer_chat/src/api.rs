//! Backend API Client
//!
//! The HTTP seam: session creation and status polling, history fetches,
//! multipart uploads, and the history-preference acknowledgement. Every
//! request carries the bearer credential; response envelopes follow the
//! backend's `{ success, ... }` shape.

use reqwest::StatusCode;
use reqwest::multipart;
use serde::Deserialize;
use tracing::debug;

use crate::config::ClientConfig;
use crate::error::ChatError;
use crate::history::HistoryPreference;
use crate::protocol::{ChatIdentity, Message, Session, SessionStatus};
use crate::session::SessionBackend;
use crate::stream::HistoryBackend;
use crate::upload::{AttachmentDraft, UploadBackend, UploadedFile};

pub struct ApiClient {
    http: reqwest::Client,
    base_url: String,
    token: String,
}

#[derive(Debug, Deserialize)]
struct SessionResponse {
    success: bool,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    session: Option<Session>,
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    success: bool,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    messages: Vec<Message>,
}

#[derive(Debug, Deserialize)]
struct UploadResponse {
    success: bool,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    data: Option<UploadedFile>,
}

#[derive(Debug, Deserialize)]
struct AckResponse {
    success: bool,
    #[serde(default)]
    message: Option<String>,
}

fn rejection(message: Option<String>, what: &str) -> ChatError {
    ChatError::Transport(message.unwrap_or_else(|| format!("{what} rejected by backend")))
}

impl ApiClient {
    pub fn new(config: &ClientConfig) -> Result<Self, ChatError> {
        let http = reqwest::Client::builder()
            .build()
            .map_err(ChatError::from_reqwest)?;
        Ok(Self {
            http,
            base_url: config.base_url.clone(),
            token: config.token.clone(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    /// Map HTTP statuses into the taxonomy before looking at the body.
    fn check(resp: reqwest::Response) -> Result<reqwest::Response, ChatError> {
        match resp.status() {
            StatusCode::UNAUTHORIZED => Err(ChatError::Auth(
                "bearer credential rejected, please re-authenticate".to_string(),
            )),
            StatusCode::NOT_FOUND => Err(ChatError::NotFound(resp.url().path().to_string())),
            status if status.is_success() => Ok(resp),
            status => Err(ChatError::Transport(format!("backend returned {status}"))),
        }
    }
}

impl SessionBackend for ApiClient {
    async fn create_session(&self, expert_id: &str) -> Result<Session, ChatError> {
        let resp = self
            .http
            .post(self.url("/api/sessions/request"))
            .bearer_auth(&self.token)
            .json(&serde_json::json!({ "expertId": expert_id }))
            .send()
            .await
            .map_err(ChatError::from_reqwest)?;
        let body: SessionResponse = Self::check(resp)?
            .json()
            .await
            .map_err(ChatError::from_reqwest)?;
        if !body.success {
            return Err(rejection(body.message, "session request"));
        }
        body.session
            .ok_or_else(|| ChatError::Transport("missing session in response".to_string()))
    }

    async fn poll_session(&self, session_id: &str) -> Result<Option<SessionStatus>, ChatError> {
        let resp = self
            .http
            .get(self.url(&format!("/api/sessions/{session_id}/status")))
            .bearer_auth(&self.token)
            .send()
            .await
            .map_err(ChatError::from_reqwest)?;
        let body: SessionResponse = match Self::check(resp) {
            Ok(resp) => resp.json().await.map_err(ChatError::from_reqwest)?,
            // Absent id is a poll result, not a transport problem.
            Err(ChatError::NotFound(_)) => return Ok(None),
            Err(e) => return Err(e),
        };
        if !body.success {
            return Ok(None);
        }
        Ok(body.session.map(|s| s.status))
    }
}

impl HistoryBackend for ApiClient {
    async fn fetch_messages(
        &self,
        identity: &ChatIdentity,
        preference: HistoryPreference,
    ) -> Result<Vec<Message>, ChatError> {
        let query = [
            ("sessionId", identity.wire_session_id().to_string()),
            ("roomId", identity.room_id.to_string()),
            ("page", preference.fetch_page().to_string()),
            ("limit", preference.fetch_limit().to_string()),
            ("historyPreference", preference.to_string()),
        ];
        let resp = self
            .http
            .get(self.url("/api/chat/messages"))
            .bearer_auth(&self.token)
            .query(&query)
            .send()
            .await
            .map_err(ChatError::from_reqwest)?;
        let body: MessagesResponse = Self::check(resp)?
            .json()
            .await
            .map_err(ChatError::from_reqwest)?;
        if !body.success {
            return Err(rejection(body.message, "history fetch"));
        }
        debug!(room = %identity.room_id, count = body.messages.len(), "fetched history page");
        Ok(body.messages)
    }

    async fn set_preference(
        &self,
        session_id: &str,
        preference: HistoryPreference,
    ) -> Result<(), ChatError> {
        let resp = self
            .http
            .post(self.url("/api/chat/set-preference"))
            .bearer_auth(&self.token)
            .json(&serde_json::json!({
                "sessionId": session_id,
                "preference": preference,
            }))
            .send()
            .await
            .map_err(ChatError::from_reqwest)?;
        let body: AckResponse = Self::check(resp)?
            .json()
            .await
            .map_err(ChatError::from_reqwest)?;
        if !body.success {
            return Err(rejection(body.message, "preference update"));
        }
        Ok(())
    }
}

impl UploadBackend for ApiClient {
    async fn upload_file(
        &self,
        identity: &ChatIdentity,
        draft: &AttachmentDraft,
    ) -> Result<UploadedFile, ChatError> {
        let part = multipart::Part::bytes(draft.bytes.clone())
            .file_name(draft.file_name.clone())
            .mime_str(&draft.mime_type)
            .map_err(|e| ChatError::Validation(format!("invalid mime type: {e}")))?;
        let form = multipart::Form::new()
            .part("file", part)
            .text("sessionId", identity.wire_session_id().to_string())
            .text("roomId", identity.room_id.to_string())
            .text("senderId", identity.sender_id.clone())
            .text("senderType", identity.sender_type.as_str())
            .text("userId", identity.user_id.clone())
            .text("expertId", identity.expert_id.clone());

        let resp = self
            .http
            .post(self.url("/api/chat/upload-file"))
            .bearer_auth(&self.token)
            .multipart(form)
            .send()
            .await
            .map_err(ChatError::from_reqwest)?;
        let body: UploadResponse = Self::check(resp)?
            .json()
            .await
            .map_err(ChatError::from_reqwest)?;
        if !body.success {
            return Err(ChatError::Upload(
                body.message
                    .unwrap_or_else(|| "upload rejected by backend".to_string()),
            ));
        }
        body.data
            .ok_or_else(|| ChatError::Upload("missing file data in response".to_string()))
    }
}
