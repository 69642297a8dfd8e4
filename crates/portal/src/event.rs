//! Inbound room events, already classified by the transport adapter.

/// One event delivered to the coordinator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortalEvent {
    pub room_id: String,
    pub event_id: String,
    pub sender: String,
    /// Origin timestamp in milliseconds.
    pub timestamp: i64,
    pub kind: EventKind,
}

/// Event-specific content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventKind {
    /// `target` was invited into the room by `sender`.
    Invite { target: String, is_direct: bool },
    /// A user's membership became `join`.
    Join {
        user_id: String,
        displayname: Option<String>,
    },
    /// A user's membership went from `join` to `leave` or `ban`.
    Leave { user_id: String },
    /// A joined member changed their display name.
    ProfileChange {
        user_id: String,
        displayname: Option<String>,
    },
    /// A text message. `reply_to` is set for replies with a strict reference.
    Message {
        body: String,
        reply_to: Option<String>,
    },
    /// An annotation on another event.
    Reaction { relates_to: String, key: String },
    Redaction { redacts: String },
    RoomName { name: String },
}

impl PortalEvent {
    pub fn new(
        room_id: impl Into<String>,
        event_id: impl Into<String>,
        sender: impl Into<String>,
        timestamp: i64,
        kind: EventKind,
    ) -> Self {
        Self {
            room_id: room_id.into(),
            event_id: event_id.into(),
            sender: sender.into(),
            timestamp,
            kind,
        }
    }

    /// Short name of the event kind, for logs.
    pub fn kind_name(&self) -> &'static str {
        match self.kind {
            EventKind::Invite { .. } => "invite",
            EventKind::Join { .. } => "join",
            EventKind::Leave { .. } => "leave",
            EventKind::ProfileChange { .. } => "profile",
            EventKind::Message { .. } => "message",
            EventKind::Reaction { .. } => "reaction",
            EventKind::Redaction { .. } => "redaction",
            EventKind::RoomName { .. } => "room_name",
        }
    }

    /// Message body, if this is a message.
    pub fn body(&self) -> Option<&str> {
        match &self.kind {
            EventKind::Message { body, .. } => Some(body),
            _ => None,
        }
    }
}
