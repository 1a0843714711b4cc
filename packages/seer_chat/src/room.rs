//! Room Membership Tracker
//!
//! Enforces single-active-room semantics on top of the shared channel. The
//! current room is an explicit owned value here, not a free-floating global:
//! whoever owns the tracker owns the membership, and dropping it releases
//! the room deterministically.

use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::channel::ChatChannel;
use crate::protocol::{ClientEvent, RoomId};

pub struct RoomTracker {
    outbound: mpsc::Sender<ClientEvent>,
    current: Option<RoomId>,
}

impl RoomTracker {
    pub fn new(channel: &ChatChannel) -> Self {
        Self::from_sender(channel.sender())
    }

    pub(crate) fn from_sender(outbound: mpsc::Sender<ClientEvent>) -> Self {
        Self {
            outbound,
            current: None,
        }
    }

    /// Join `room_id`, leaving the previous room first if it differs.
    /// Re-entering the current room is a no-op, safe to call repeatedly.
    pub fn enter_room(&mut self, room_id: RoomId) {
        if self.current.as_ref() == Some(&room_id) {
            return;
        }
        if let Some(prev) = self.current.take() {
            debug!(room = %prev, "leaving previous room");
            self.emit(ClientEvent::LeaveRoom { room_id: prev });
        }
        debug!(room = %room_id, "joining room");
        self.emit(ClientEvent::JoinRoom {
            room_id: room_id.clone(),
        });
        self.current = Some(room_id);
    }

    /// Leave the current room, if any, and clear it.
    pub fn leave_room(&mut self) {
        if let Some(prev) = self.current.take() {
            debug!(room = %prev, "leaving room");
            self.emit(ClientEvent::LeaveRoom { room_id: prev });
        }
    }

    pub fn current(&self) -> Option<&RoomId> {
        self.current.as_ref()
    }

    // Join/leave are fire-and-forget here; join_success/join_error arrive
    // asynchronously and belong to the stream manager.
    fn emit(&self, event: ClientEvent) {
        if self.outbound.try_send(event).is_err() {
            warn!("channel outbound queue rejected a membership event");
        }
    }
}

impl Drop for RoomTracker {
    fn drop(&mut self) {
        // Teardown must not leak membership across unrelated views.
        self.leave_room();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tracker() -> (RoomTracker, mpsc::Receiver<ClientEvent>) {
        let (tx, rx) = mpsc::channel(16);
        (RoomTracker::from_sender(tx), rx)
    }

    fn drain(rx: &mut mpsc::Receiver<ClientEvent>) -> Vec<ClientEvent> {
        let mut out = Vec::new();
        while let Ok(ev) = rx.try_recv() {
            out.push(ev);
        }
        out
    }

    #[test]
    fn reentering_same_room_emits_one_join_and_no_leave() {
        let (mut tracker, mut rx) = tracker();
        tracker.enter_room(RoomId::new("r1"));
        tracker.enter_room(RoomId::new("r1"));
        tracker.enter_room(RoomId::new("r1"));

        let events = drain(&mut rx);
        assert_eq!(
            events,
            vec![ClientEvent::JoinRoom {
                room_id: RoomId::new("r1")
            }]
        );
    }

    #[test]
    fn switching_rooms_leaves_old_before_joining_new() {
        let (mut tracker, mut rx) = tracker();
        tracker.enter_room(RoomId::new("r1"));
        tracker.enter_room(RoomId::new("r2"));

        let events = drain(&mut rx);
        assert_eq!(
            events,
            vec![
                ClientEvent::JoinRoom {
                    room_id: RoomId::new("r1")
                },
                ClientEvent::LeaveRoom {
                    room_id: RoomId::new("r1")
                },
                ClientEvent::JoinRoom {
                    room_id: RoomId::new("r2")
                },
            ]
        );
        assert_eq!(tracker.current(), Some(&RoomId::new("r2")));
    }

    #[test]
    fn leave_room_without_membership_is_silent() {
        let (mut tracker, mut rx) = tracker();
        tracker.leave_room();
        assert!(drain(&mut rx).is_empty());
        assert_eq!(tracker.current(), None);
    }

    #[test]
    fn drop_releases_membership() {
        let (tx, mut rx) = mpsc::channel(16);
        {
            let mut tracker = RoomTracker::from_sender(tx);
            tracker.enter_room(RoomId::new("r1"));
        }
        let events = drain(&mut rx);
        assert_eq!(
            events,
            vec![
                ClientEvent::JoinRoom {
                    room_id: RoomId::new("r1")
                },
                ClientEvent::LeaveRoom {
                    room_id: RoomId::new("r1")
                },
            ]
        );
    }
}
