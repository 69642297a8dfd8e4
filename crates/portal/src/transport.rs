//! Transport trait consumed by the coordinator.

use std::collections::HashMap;

use async_trait::async_trait;

use crate::error::TransportError;

/// What the coordinator knows about a room member.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MemberInfo {
    pub displayname: Option<String>,
}

impl MemberInfo {
    pub fn named(displayname: impl Into<String>) -> Self {
        Self {
            displayname: Some(displayname.into()),
        }
    }
}

/// Joined members of a room, keyed by user ID.
pub type Members = HashMap<String, MemberInfo>;

/// Chat transport primitives.
///
/// Abstracted so the coordinator can run against Matrix or an in-memory
/// recorder in tests.
#[async_trait]
pub trait Transport: Send + Sync {
    /// The bot's own user ID.
    fn user_id(&self) -> &str;

    /// Join a room the bot was invited to.
    async fn join_room(&self, room_id: &str) -> Result<(), TransportError>;

    /// Invite a user into a room.
    async fn invite_user(&self, room_id: &str, user_id: &str) -> Result<(), TransportError>;

    /// Send a markdown message and return its event ID.
    async fn send_markdown(&self, room_id: &str, markdown: &str) -> Result<String, TransportError>;

    /// Replace the content of an earlier message in place.
    async fn edit_markdown(
        &self,
        room_id: &str,
        event_id: &str,
        markdown: &str,
    ) -> Result<(), TransportError>;

    /// Redact an event.
    async fn redact(
        &self,
        room_id: &str,
        event_id: &str,
        reason: Option<&str>,
    ) -> Result<(), TransportError>;

    /// Fetch the full joined membership of a room.
    async fn joined_members(&self, room_id: &str) -> Result<Members, TransportError>;

    /// Display name of a user as set in a room's member state.
    async fn member_displayname(
        &self,
        room_id: &str,
        user_id: &str,
    ) -> Result<Option<String>, TransportError>;

    /// Current name of a room.
    async fn room_name(&self, room_id: &str) -> Result<Option<String>, TransportError>;
}
