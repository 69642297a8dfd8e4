//! Room membership cache.
//!
//! The first lookup for a room fetches its full joined membership; later
//! membership events patch the cached map in place. Entries live for the
//! process lifetime.

use std::collections::HashMap;

use tokio::sync::RwLock;

use crate::error::TransportError;
use crate::transport::{MemberInfo, Members, Transport};

#[derive(Debug, Default)]
pub struct MembershipCache {
    rooms: RwLock<HashMap<String, Members>>,
}

impl MembershipCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Joined members of a room, fetched on first access.
    pub async fn get_members<T: Transport + ?Sized>(
        &self,
        transport: &T,
        room_id: &str,
    ) -> Result<Members, TransportError> {
        if let Some(members) = self.rooms.read().await.get(room_id) {
            return Ok(members.clone());
        }

        let members = transport.joined_members(room_id).await?;
        tracing::debug!(room_id, count = members.len(), "Fetched room members");

        let mut rooms = self.rooms.write().await;
        Ok(rooms
            .entry(room_id.to_string())
            .or_insert(members)
            .clone())
    }

    /// Add or update a member. No-op if the room was never fetched.
    pub async fn record_join(&self, room_id: &str, user_id: &str, info: MemberInfo) {
        if let Some(members) = self.rooms.write().await.get_mut(room_id) {
            members.insert(user_id.to_string(), info);
        }
    }

    /// Remove a member. No-op if the room was never fetched.
    pub async fn record_leave(&self, room_id: &str, user_id: &str) {
        if let Some(members) = self.rooms.write().await.get_mut(room_id) {
            members.remove(user_id);
        }
    }

    /// Whether the room's members have been fetched.
    pub async fn is_cached(&self, room_id: &str) -> bool {
        self.rooms.read().await.contains_key(room_id)
    }
}
