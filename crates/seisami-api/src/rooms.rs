//! Board collaboration rooms
//!
//! Members of a room receive each other's broadcasts. Delivery is a
//! `try_send` onto the member's outbound queue, so a slow reader loses
//! messages instead of stalling the room. Locks are taken manager first,
//! then room.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tokio::sync::mpsc;
use uuid::Uuid;

const DEFAULT_EVENT: &str = "message";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RoomError {
    #[error("already in room {0}")]
    AlreadyInRoom(String),
    #[error("not in a room")]
    NotInRoom,
    #[error("not a member of room {0}")]
    RoomMismatch(String),
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Default)]
pub struct Room {
    members: Mutex<HashMap<Uuid, mpsc::Sender<String>>>,
}

impl Room {
    fn insert(&self, member: Uuid, outbound: mpsc::Sender<String>) {
        lock(&self.members).insert(member, outbound);
    }

    /// Returns `true` when the room is now empty.
    fn remove(&self, member: Uuid) -> bool {
        let mut members = lock(&self.members);
        members.remove(&member);
        members.is_empty()
    }

    /// Queue `message` for every member except `sender`.
    pub fn broadcast(&self, message: &str, sender: Uuid) -> usize {
        let members = lock(&self.members);
        let mut delivered = 0;
        for (member, outbound) in members.iter() {
            if *member == sender {
                continue;
            }
            match outbound.try_send(message.to_string()) {
                Ok(()) => delivered += 1,
                Err(mpsc::error::TrySendError::Full(_)) => {
                    tracing::warn!(
                        member = %member,
                        "Room member is not draining; dropped message"
                    );
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {}
            }
        }
        delivered
    }

    fn len(&self) -> usize {
        lock(&self.members).len()
    }
}

#[derive(Default)]
pub struct RoomManager {
    rooms: Mutex<HashMap<String, Room>>,
}

impl RoomManager {
    pub fn join(&self, room_id: &str, member: Uuid, outbound: mpsc::Sender<String>) {
        let mut rooms = lock(&self.rooms);
        rooms
            .entry(room_id.to_string())
            .or_default()
            .insert(member, outbound);
    }

    pub fn leave(&self, room_id: &str, member: Uuid) {
        let mut rooms = lock(&self.rooms);
        let now_empty = rooms.get(room_id).is_some_and(|room| room.remove(member));
        if now_empty {
            rooms.remove(room_id);
            tracing::debug!(room = room_id, "Removed empty room");
        }
    }

    /// Returns how many members the message was queued for.
    ///
    /// The manager lock is held for the whole fan-out, so a room removed by
    /// a concurrent last `leave` is never the target.
    pub fn broadcast(&self, room_id: &str, message: &str, sender: Uuid) -> usize {
        let rooms = lock(&self.rooms);
        rooms
            .get(room_id)
            .map_or(0, |room| room.broadcast(message, sender))
    }

    pub fn room_count(&self) -> usize {
        lock(&self.rooms).len()
    }

    pub fn member_count(&self, room_id: &str) -> usize {
        lock(&self.rooms).get(room_id).map_or(0, |room| room.len())
    }
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "lowercase")]
enum RoomAction {
    Join,
    Leave,
    Broadcast,
}

#[derive(Debug, Deserialize)]
struct ClientMessage {
    action: RoomAction,
    #[serde(rename = "roomId", default)]
    room_id: Option<String>,
    #[serde(default)]
    data: Value,
    #[serde(rename = "type", default)]
    event: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum ServerMessage<'a> {
    Relay {
        #[serde(rename = "type")]
        event: &'a str,
        from: Uuid,
        data: Value,
    },
    Ack {
        #[serde(rename = "type")]
        kind: &'static str,
        #[serde(rename = "roomId")]
        room_id: &'a str,
    },
    Error {
        #[serde(rename = "type")]
        kind: &'static str,
        message: String,
    },
}

impl ServerMessage<'_> {
    fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }
}

enum SessionState {
    Idle,
    InRoom(String),
}

/// One socket's view of the rooms. Leaves its room on drop.
pub struct RoomSession {
    id: Uuid,
    outbound: mpsc::Sender<String>,
    state: SessionState,
    manager: Arc<RoomManager>,
}

impl RoomSession {
    pub fn new(manager: Arc<RoomManager>, outbound: mpsc::Sender<String>) -> Self {
        Self {
            id: Uuid::now_v7(),
            outbound,
            state: SessionState::Idle,
            manager,
        }
    }

    pub const fn id(&self) -> Uuid {
        self.id
    }

    pub fn room(&self) -> Option<&str> {
        match &self.state {
            SessionState::Idle => None,
            SessionState::InRoom(room_id) => Some(room_id.as_str()),
        }
    }

    pub fn join(&mut self, room_id: &str) -> Result<(), RoomError> {
        if let SessionState::InRoom(current) = &self.state {
            return Err(RoomError::AlreadyInRoom(current.clone()));
        }
        self.manager.join(room_id, self.id, self.outbound.clone());
        self.state = SessionState::InRoom(room_id.to_string());
        tracing::debug!(
            session = %self.id,
            room = room_id,
            members = self.manager.member_count(room_id),
            "Joined room"
        );
        Ok(())
    }

    pub fn leave(&mut self) -> Result<String, RoomError> {
        match std::mem::replace(&mut self.state, SessionState::Idle) {
            SessionState::Idle => Err(RoomError::NotInRoom),
            SessionState::InRoom(room_id) => {
                self.manager.leave(&room_id, self.id);
                Ok(room_id)
            }
        }
    }

    /// Relay to the other members of the current room.
    ///
    /// `room_id`, when given, must name the room the session is in.
    pub fn broadcast(
        &self,
        room_id: Option<&str>,
        event: &str,
        data: Value,
    ) -> Result<usize, RoomError> {
        let SessionState::InRoom(current) = &self.state else {
            return Err(RoomError::NotInRoom);
        };
        if let Some(requested) = room_id {
            if requested != current.as_str() {
                return Err(RoomError::RoomMismatch(requested.to_string()));
            }
        }

        let message = ServerMessage::Relay {
            event,
            from: self.id,
            data,
        }
        .to_json();
        Ok(self.manager.broadcast(current, &message, self.id))
    }

    /// Handle one text frame from the client, replying on its own queue.
    pub fn handle_text(&mut self, text: &str) {
        let message = match serde_json::from_str::<ClientMessage>(text) {
            Ok(message) => message,
            Err(error) => {
                tracing::debug!(%error, session = %self.id, "Rejected room frame");
                self.reply_error(format!("invalid message: {error}"));
                return;
            }
        };

        let room_id = message
            .room_id
            .as_deref()
            .map(str::trim)
            .filter(|room_id| !room_id.is_empty());

        match message.action {
            RoomAction::Join => {
                let Some(room_id) = room_id else {
                    self.reply_error("roomId is required".to_string());
                    return;
                };
                match self.join(room_id) {
                    Ok(()) => self.reply(&ServerMessage::Ack {
                        kind: "joined",
                        room_id,
                    }),
                    Err(error) => self.reply_error(error.to_string()),
                }
            }
            RoomAction::Leave => match self.leave() {
                Ok(room_id) => self.reply(&ServerMessage::Ack {
                    kind: "left",
                    room_id: &room_id,
                }),
                Err(error) => self.reply_error(error.to_string()),
            },
            RoomAction::Broadcast => {
                let event = message.event.as_deref().unwrap_or(DEFAULT_EVENT);
                match self.broadcast(room_id, event, message.data) {
                    Ok(delivered) => {
                        tracing::debug!(session = %self.id, delivered, "Relayed room message");
                    }
                    Err(error) => self.reply_error(error.to_string()),
                }
            }
        }
    }

    fn reply(&self, message: &ServerMessage<'_>) {
        if self.outbound.try_send(message.to_json()).is_err() {
            tracing::debug!(session = %self.id, "Dropped reply to room client");
        }
    }

    fn reply_error(&self, message: String) {
        self.reply(&ServerMessage::Error {
            kind: "error",
            message,
        });
    }
}

impl Drop for RoomSession {
    fn drop(&mut self) {
        if let SessionState::InRoom(room_id) = &self.state {
            self.manager.leave(room_id, self.id);
        }
    }
}
