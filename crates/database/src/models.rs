//! Case store records.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// A support case, one per room.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct Case {
    /// Room ID of the case room (primary key).
    pub id: String,
    /// User who opened the case. `None` for group rooms.
    pub user_id: Option<String>,
    /// Display name of the originating user.
    pub displayname: String,
    /// Display name of the case room.
    pub room_name: String,
    /// When the bot last posted an automated message into the case room (ms since epoch).
    pub last_bot_msg: i64,
}

/// Partial update for a case. `None` fields are left untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CaseChanges {
    pub displayname: Option<String>,
    pub room_name: Option<String>,
    pub last_bot_msg: Option<i64>,
}

impl CaseChanges {
    pub fn displayname(name: impl Into<String>) -> Self {
        Self {
            displayname: Some(name.into()),
            ..Default::default()
        }
    }

    pub fn room_name(name: impl Into<String>) -> Self {
        Self {
            room_name: Some(name.into()),
            ..Default::default()
        }
    }

    pub fn last_bot_msg(ts: i64) -> Self {
        Self {
            last_bot_msg: Some(ts),
            ..Default::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.displayname.is_none() && self.room_name.is_none() && self.last_bot_msg.is_none()
    }

    /// Apply these changes to an in-memory copy of the case.
    pub fn apply_to(&self, case: &mut Case) {
        if let Some(ref name) = self.displayname {
            case.displayname = name.clone();
        }
        if let Some(ref name) = self.room_name {
            case.room_name = name.clone();
        }
        if let Some(ts) = self.last_bot_msg {
            case.last_bot_msg = ts;
        }
    }
}

/// A control room message carrying the status line of a case.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct ControlEvent {
    /// Event ID of the control room message (primary key).
    pub event_id: String,
    /// Room ID of the case this message represents.
    pub case_id: String,
    /// Per-case sequence index, starting at 0.
    pub seq: i64,
    /// When the message was posted (ms since epoch).
    pub created_at: i64,
}

/// An agent's claim on a case.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct CaseAccept {
    /// Event ID of the claiming reaction or reply (primary key).
    pub event_id: String,
    /// Control event the claim targets.
    pub control_event: String,
    /// Room ID of the claimed case.
    pub case_id: String,
    /// Claiming agent.
    pub user_id: String,
}
