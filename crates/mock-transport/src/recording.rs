//! Recording transport implementation.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use portal::{MemberInfo, Members, Transport, TransportError};
use tokio::time::sleep;

/// Transport operations that can be made to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Op {
    Join,
    Invite,
    Send,
    Edit,
    Redact,
    Members,
    State,
}

impl Op {
    fn name(self) -> &'static str {
        match self {
            Op::Join => "join",
            Op::Invite => "invite",
            Op::Send => "send",
            Op::Edit => "edit",
            Op::Redact => "redact",
            Op::Members => "joined_members",
            Op::State => "state",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sent {
    pub room_id: String,
    pub event_id: String,
    pub body: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Edit {
    pub room_id: String,
    pub event_id: String,
    pub body: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Redaction {
    pub room_id: String,
    pub event_id: String,
    pub reason: Option<String>,
}

#[derive(Debug, Default)]
struct State {
    members: HashMap<String, Members>,
    room_names: HashMap<String, String>,
    failing: HashSet<Op>,
    joins: Vec<String>,
    invites: Vec<(String, String)>,
    sent: Vec<Sent>,
    edits: Vec<Edit>,
    redactions: Vec<Redaction>,
    member_fetches: usize,
}

/// A transport that keeps rooms in memory and records every call.
#[derive(Debug)]
pub struct RecordingTransport {
    user_id: String,
    delay: Option<Duration>,
    next_id: AtomicU64,
    state: Mutex<State>,
}

impl RecordingTransport {
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            delay: None,
            next_id: AtomicU64::new(1),
            state: Mutex::new(State::default()),
        }
    }

    /// Sleep this long inside every call.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    async fn call(&self, op: Op) -> Result<(), TransportError> {
        if let Some(delay) = self.delay {
            sleep(delay).await;
        }
        if self.state().failing.contains(&op) {
            return Err(TransportError::new(op.name(), "injected failure"));
        }
        Ok(())
    }

    fn next_event_id(&self) -> String {
        format!("$evt{}", self.next_id.fetch_add(1, Ordering::SeqCst))
    }

    // --- scripting ---

    /// Add a joined member to a room.
    pub fn add_member(&self, room_id: &str, user_id: &str, displayname: Option<&str>) {
        self.state()
            .members
            .entry(room_id.to_string())
            .or_default()
            .insert(
                user_id.to_string(),
                MemberInfo {
                    displayname: displayname.map(str::to_string),
                },
            );
    }

    pub fn remove_member(&self, room_id: &str, user_id: &str) {
        if let Some(members) = self.state().members.get_mut(room_id) {
            members.remove(user_id);
        }
    }

    pub fn set_room_name(&self, room_id: &str, name: &str) {
        self.state()
            .room_names
            .insert(room_id.to_string(), name.to_string());
    }

    /// Make every call of `op` fail until [`RecordingTransport::succeed`].
    pub fn fail(&self, op: Op) {
        self.state().failing.insert(op);
    }

    pub fn succeed(&self, op: Op) {
        self.state().failing.remove(&op);
    }

    // --- inspection ---

    pub fn joins(&self) -> Vec<String> {
        self.state().joins.clone()
    }

    /// `(room_id, user_id)` pairs.
    pub fn invites(&self) -> Vec<(String, String)> {
        self.state().invites.clone()
    }

    pub fn sent(&self) -> Vec<Sent> {
        self.state().sent.clone()
    }

    /// Bodies sent to one room, in order.
    pub fn sent_to(&self, room_id: &str) -> Vec<String> {
        self.state()
            .sent
            .iter()
            .filter(|s| s.room_id == room_id)
            .map(|s| s.body.clone())
            .collect()
    }

    pub fn edits(&self) -> Vec<Edit> {
        self.state().edits.clone()
    }

    /// Bodies an event was edited to, in order.
    pub fn edits_of(&self, event_id: &str) -> Vec<String> {
        self.state()
            .edits
            .iter()
            .filter(|e| e.event_id == event_id)
            .map(|e| e.body.clone())
            .collect()
    }

    pub fn redactions(&self) -> Vec<Redaction> {
        self.state().redactions.clone()
    }

    pub fn is_redacted(&self, event_id: &str) -> bool {
        self.state()
            .redactions
            .iter()
            .any(|r| r.event_id == event_id)
    }

    /// How many times `joined_members` was called.
    pub fn member_fetches(&self) -> usize {
        self.state().member_fetches
    }

    /// Forget recorded calls, keeping rooms and failures.
    pub fn clear_log(&self) {
        let mut state = self.state();
        state.joins.clear();
        state.invites.clear();
        state.sent.clear();
        state.edits.clear();
        state.redactions.clear();
        state.member_fetches = 0;
    }
}

#[async_trait]
impl Transport for RecordingTransport {
    fn user_id(&self) -> &str {
        &self.user_id
    }

    async fn join_room(&self, room_id: &str) -> Result<(), TransportError> {
        self.call(Op::Join).await?;
        self.state().joins.push(room_id.to_string());
        Ok(())
    }

    async fn invite_user(&self, room_id: &str, user_id: &str) -> Result<(), TransportError> {
        self.call(Op::Invite).await?;
        self.state()
            .invites
            .push((room_id.to_string(), user_id.to_string()));
        Ok(())
    }

    async fn send_markdown(&self, room_id: &str, markdown: &str) -> Result<String, TransportError> {
        self.call(Op::Send).await?;
        let event_id = self.next_event_id();
        self.state().sent.push(Sent {
            room_id: room_id.to_string(),
            event_id: event_id.clone(),
            body: markdown.to_string(),
        });
        Ok(event_id)
    }

    async fn edit_markdown(
        &self,
        room_id: &str,
        event_id: &str,
        markdown: &str,
    ) -> Result<(), TransportError> {
        self.call(Op::Edit).await?;
        self.state().edits.push(Edit {
            room_id: room_id.to_string(),
            event_id: event_id.to_string(),
            body: markdown.to_string(),
        });
        Ok(())
    }

    async fn redact(
        &self,
        room_id: &str,
        event_id: &str,
        reason: Option<&str>,
    ) -> Result<(), TransportError> {
        self.call(Op::Redact).await?;
        self.state().redactions.push(Redaction {
            room_id: room_id.to_string(),
            event_id: event_id.to_string(),
            reason: reason.map(str::to_string),
        });
        Ok(())
    }

    async fn joined_members(&self, room_id: &str) -> Result<Members, TransportError> {
        self.call(Op::Members).await?;
        let mut state = self.state();
        state.member_fetches += 1;
        Ok(state.members.get(room_id).cloned().unwrap_or_default())
    }

    async fn member_displayname(
        &self,
        room_id: &str,
        user_id: &str,
    ) -> Result<Option<String>, TransportError> {
        self.call(Op::State).await?;
        Ok(self
            .state()
            .members
            .get(room_id)
            .and_then(|members| members.get(user_id))
            .and_then(|info| info.displayname.clone()))
    }

    async fn room_name(&self, room_id: &str) -> Result<Option<String>, TransportError> {
        self.call(Op::State).await?;
        Ok(self.state().room_names.get(room_id).cloned())
    }
}
