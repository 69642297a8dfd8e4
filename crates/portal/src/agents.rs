//! Agent registry: control room members other than the bot.

use std::collections::HashSet;

use tokio::sync::RwLock;

use crate::error::TransportError;
use crate::transport::{Members, Transport};

#[derive(Debug)]
pub struct AgentRegistry {
    bot_id: String,
    agents: RwLock<HashSet<String>>,
}

impl AgentRegistry {
    pub fn new(bot_id: impl Into<String>) -> Self {
        Self {
            bot_id: bot_id.into(),
            agents: RwLock::new(HashSet::new()),
        }
    }

    /// Replace the agent set with the control room's current membership.
    ///
    /// Without a control room the set is cleared.
    pub async fn refresh<T: Transport + ?Sized>(
        &self,
        transport: &T,
        control_room: Option<&str>,
    ) -> Result<usize, TransportError> {
        let fresh: HashSet<String> = match control_room {
            Some(room_id) => transport
                .joined_members(room_id)
                .await?
                .into_keys()
                .filter(|user_id| *user_id != self.bot_id)
                .collect(),
            None => HashSet::new(),
        };

        let count = fresh.len();
        *self.agents.write().await = fresh;
        tracing::info!(count, "Agent set refreshed");
        Ok(count)
    }

    pub async fn on_join(&self, user_id: &str) {
        if user_id != self.bot_id {
            self.agents.write().await.insert(user_id.to_string());
        }
    }

    pub async fn on_leave(&self, user_id: &str) {
        self.agents.write().await.remove(user_id);
    }

    pub async fn contains(&self, user_id: &str) -> bool {
        self.agents.read().await.contains(user_id)
    }

    pub async fn snapshot(&self) -> HashSet<String> {
        self.agents.read().await.clone()
    }

    /// Agents among `members`, as `(user_id, display name)` sorted by user ID.
    ///
    /// Falls back to the user ID when no display name is known.
    pub async fn present_in(&self, members: &Members) -> Vec<(String, String)> {
        let agents = self.agents.read().await;
        let mut present: Vec<(String, String)> = members
            .iter()
            .filter(|(user_id, _)| agents.contains(*user_id))
            .map(|(user_id, info)| {
                let name = info.displayname.clone().unwrap_or_else(|| user_id.clone());
                (user_id.clone(), name)
            })
            .collect();
        present.sort();
        present
    }
}
