//! Session Negotiation State Machine
//!
//! Models the lifecycle of a chat request from creation to acceptance or
//! cancellation. The backend owns the status; the client polls it on a fixed
//! cadence with a single outstanding request at a time, bounded by a local
//! timeout. Exactly one poll task may exist per negotiation attempt —
//! starting a new attempt cancels the previous task first.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, watch};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::ClientConfig;
use crate::error::ChatError;
use crate::protocol::{RoomId, Session, SessionStatus};
use crate::room::RoomTracker;

/// Seam between the state machine and the HTTP backend, so tests can drive
/// the poll loop with a scripted fake.
pub trait SessionBackend: Send + Sync + 'static {
    fn create_session(
        &self,
        expert_id: &str,
    ) -> impl Future<Output = Result<Session, ChatError>> + Send;

    /// `Ok(None)` means the session id is unknown to the backend.
    fn poll_session(
        &self,
        session_id: &str,
    ) -> impl Future<Output = Result<Option<SessionStatus>, ChatError>> + Send;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NegotiationFailure {
    /// Backend no longer knows the session id. Terminal, not retried.
    NotFound,
    /// No status change within the local deadline.
    TimedOut,
    /// Backend marked the session expired.
    Expired,
}

impl std::fmt::Display for NegotiationFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NegotiationFailure::NotFound => f.write_str("session not found"),
            NegotiationFailure::TimedOut => f.write_str("no response from expert"),
            NegotiationFailure::Expired => f.write_str("session expired"),
        }
    }
}

/// Observable negotiation state. `Cancelled` and `Failed` are terminal for
/// the attempt and behave as idle for the next `request`.
#[derive(Debug, Clone, PartialEq)]
pub enum NegotiationState {
    Idle,
    Pending {
        session_id: String,
    },
    Active {
        session_id: String,
    },
    Cancelled {
        session_id: String,
    },
    Failed {
        session_id: String,
        reason: NegotiationFailure,
    },
}

pub struct Negotiator<B: SessionBackend> {
    backend: Arc<B>,
    expert_id: String,
    room: Arc<Mutex<RoomTracker>>,
    state_tx: Arc<watch::Sender<NegotiationState>>,
    attempt: Option<CancellationToken>,
    poll_interval: Duration,
    timeout: Duration,
}

impl<B: SessionBackend> Negotiator<B> {
    pub fn new(
        backend: Arc<B>,
        expert_id: impl Into<String>,
        room: Arc<Mutex<RoomTracker>>,
        config: &ClientConfig,
    ) -> Self {
        let (state_tx, _) = watch::channel(NegotiationState::Idle);
        Self {
            backend,
            expert_id: expert_id.into(),
            room,
            state_tx: Arc::new(state_tx),
            attempt: None,
            poll_interval: config.poll_interval,
            timeout: config.negotiation_timeout,
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<NegotiationState> {
        self.state_tx.subscribe()
    }

    pub fn state(&self) -> NegotiationState {
        self.state_tx.borrow().clone()
    }

    /// Create (or reuse) a session with the expert and start polling its
    /// status. Any previous attempt's poll task is cancelled first, so two
    /// negotiations can never run concurrently.
    pub async fn request(&mut self) -> Result<String, ChatError> {
        self.cancel_attempt();

        let session = self.backend.create_session(&self.expert_id).await?;
        let session_id = session.id.clone();

        // The backend reuses an existing pending-or-active session for the
        // same (user, expert) pair, so creation may come back already live.
        if session.status == SessionStatus::Active {
            info!(session = %session_id, "session already active");
            self.room
                .lock()
                .await
                .enter_room(RoomId::from_session(&session_id));
            self.state_tx.send_replace(NegotiationState::Active {
                session_id: session_id.clone(),
            });
            return Ok(session_id);
        }

        info!(session = %session_id, expert = %self.expert_id, "session requested, polling status");
        self.state_tx.send_replace(NegotiationState::Pending {
            session_id: session_id.clone(),
        });

        let cancel = CancellationToken::new();
        self.attempt = Some(cancel.clone());
        tokio::spawn(poll_status(
            self.backend.clone(),
            session_id.clone(),
            self.room.clone(),
            self.state_tx.clone(),
            self.poll_interval,
            self.timeout,
            cancel,
        ));
        Ok(session_id)
    }

    /// Local close: back to idle, release room membership, stop any poll.
    /// Does not change the backend's session status.
    pub async fn close(&mut self) {
        self.cancel_attempt();
        self.room.lock().await.leave_room();
        self.state_tx.send_replace(NegotiationState::Idle);
    }

    fn cancel_attempt(&mut self) {
        if let Some(token) = self.attempt.take() {
            token.cancel();
        }
    }
}

impl<B: SessionBackend> Drop for Negotiator<B> {
    fn drop(&mut self) {
        // Poll timers must never outlive their negotiator.
        self.cancel_attempt();
    }
}

async fn poll_status<B: SessionBackend>(
    backend: Arc<B>,
    session_id: String,
    room: Arc<Mutex<RoomTracker>>,
    state_tx: Arc<watch::Sender<NegotiationState>>,
    poll_interval: Duration,
    timeout: Duration,
    cancel: CancellationToken,
) {
    let deadline = tokio::time::Instant::now() + timeout;
    let mut ticker =
        tokio::time::interval_at(tokio::time::Instant::now() + poll_interval, poll_interval);
    // One outstanding request at a time: a slow poll delays the next tick
    // instead of bursting to catch up.
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,

            _ = tokio::time::sleep_until(deadline) => {
                warn!(session = %session_id, "negotiation timed out with no response");
                room.lock().await.leave_room();
                state_tx.send_replace(NegotiationState::Failed {
                    session_id,
                    reason: NegotiationFailure::TimedOut,
                });
                return;
            }

            _ = ticker.tick() => {
                match backend.poll_session(&session_id).await {
                    Ok(Some(SessionStatus::Pending)) => {}
                    Ok(Some(SessionStatus::Active)) => {
                        info!(session = %session_id, "session accepted");
                        room.lock().await.enter_room(RoomId::from_session(&session_id));
                        state_tx.send_replace(NegotiationState::Active { session_id });
                        return;
                    }
                    Ok(Some(SessionStatus::Cancelled)) => {
                        info!(session = %session_id, "session declined");
                        room.lock().await.leave_room();
                        state_tx.send_replace(NegotiationState::Cancelled { session_id });
                        return;
                    }
                    Ok(Some(SessionStatus::Expired)) => {
                        room.lock().await.leave_room();
                        state_tx.send_replace(NegotiationState::Failed {
                            session_id,
                            reason: NegotiationFailure::Expired,
                        });
                        return;
                    }
                    Ok(None) => {
                        warn!(session = %session_id, "session unknown to backend, stopping poll");
                        room.lock().await.leave_room();
                        state_tx.send_replace(NegotiationState::Failed {
                            session_id,
                            reason: NegotiationFailure::NotFound,
                        });
                        return;
                    }
                    // A flaky poll is not a status: keep the cadence and let
                    // the deadline bound the attempt.
                    Err(e) => warn!(session = %session_id, error = %e, "status poll failed, will retry"),
                }
            }
        }
    }
}
