//! Case lifecycle coordinator.
//!
//! Maps inbound room events onto case store mutations, control room messages
//! and membership side effects. One instance owns all in-memory state (case
//! cache, membership cache, agent set, room locks); the store stays the source
//! of truth.

use std::collections::HashMap;
use std::sync::Arc;

use database::{
    case, case_accept, control_event, Case, CaseAccept, CaseChanges, ControlEvent, Database,
    DatabaseError,
};
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::agents::AgentRegistry;
use crate::clock::{Clock, SystemClock};
use crate::error::{PortalError, TransportError};
use crate::event::{EventKind, PortalEvent};
use crate::locks::{RoomLocks, DEFAULT_LOCK_CAPACITY};
use crate::members::MembershipCache;
use crate::pipeline::{Admission, Admit, Route};
use crate::render::{self, RenderContext};
use crate::settings::PortalSettings;
use crate::transport::{MemberInfo, Transport};

/// Sent into a room when it becomes the control room.
pub const CONTROL_ROOM_REGISTERED: &str = "Room registered as the control room";

const REASON_REPLACED: &str = "Control event replaced";
const REASON_AGENT_LEFT: &str = "Agent left room";
const REASON_ROLLBACK: &str = "Case creation failed";

/// Result of handling one event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandleOutcome {
    Handled,
    /// Dropped by a guard, a cooldown or a benign miss.
    Skipped { reason: &'static str },
    /// The invited room became the control room. Callers should persist it.
    ControlRoomRegistered { room_id: String },
}

impl HandleOutcome {
    fn skipped(reason: &'static str) -> Self {
        HandleOutcome::Skipped { reason }
    }
}

/// The case lifecycle state machine.
pub struct Coordinator<T: Transport> {
    pub(crate) transport: Arc<T>,
    db: Database,
    settings: RwLock<Arc<PortalSettings>>,
    cases: RwLock<HashMap<String, Case>>,
    pub(crate) members: MembershipCache,
    pub(crate) agents: AgentRegistry,
    pub(crate) locks: RoomLocks,
    clock: Arc<dyn Clock>,
    bootstrap: Mutex<()>,
}

impl<T: Transport> Coordinator<T> {
    pub fn new(transport: Arc<T>, db: Database, settings: PortalSettings) -> Self {
        let agents = AgentRegistry::new(transport.user_id());
        Self {
            transport,
            db,
            settings: RwLock::new(Arc::new(settings)),
            cases: RwLock::new(HashMap::new()),
            members: MembershipCache::new(),
            agents,
            locks: RoomLocks::new(DEFAULT_LOCK_CAPACITY),
            clock: Arc::new(SystemClock),
            bootstrap: Mutex::new(()),
        }
    }

    /// Use a different time source.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Bound the number of idle room locks kept around.
    pub fn with_lock_capacity(mut self, capacity: usize) -> Self {
        self.locks = RoomLocks::new(capacity);
        self
    }

    pub fn transport(&self) -> &Arc<T> {
        &self.transport
    }

    pub fn db(&self) -> &Database {
        &self.db
    }

    pub fn agents(&self) -> &AgentRegistry {
        &self.agents
    }

    pub fn members(&self) -> &MembershipCache {
        &self.members
    }

    /// Current settings snapshot.
    pub async fn settings(&self) -> Arc<PortalSettings> {
        Arc::clone(&*self.settings.read().await)
    }

    /// Load the agent set. Call once before handling events.
    pub async fn start(&self) -> Result<(), PortalError> {
        self.refresh_agents().await?;
        Ok(())
    }

    /// Replace the agent set with the control room's membership.
    pub async fn refresh_agents(&self) -> Result<usize, TransportError> {
        let settings = self.settings().await;
        self.agents
            .refresh(self.transport.as_ref(), settings.control_room.as_deref())
            .await
    }

    /// Swap in reloaded settings and refresh agents in the background.
    ///
    /// No room lock is taken. Handlers already running keep the snapshot they
    /// started with, and may see the old agent set until the refresh lands.
    pub async fn apply_settings(self: &Arc<Self>, settings: PortalSettings) -> JoinHandle<()>
    where
        T: 'static,
    {
        info!(
            control_room = ?settings.control_room,
            new_user_cooldown_ms = settings.new_user_cooldown_ms,
            new_message_cooldown_ms = settings.new_message_cooldown_ms,
            "Applying settings"
        );
        *self.settings.write().await = Arc::new(settings);

        let this = Arc::clone(self);
        tokio::spawn(async move {
            if let Err(e) = this.refresh_agents().await {
                warn!("Agent refresh after reload failed: {}", e);
            }
        })
    }

    /// Handle one inbound event.
    pub async fn handle(&self, event: PortalEvent) -> Result<HandleOutcome, PortalError> {
        let settings = self.settings().await;
        let route = Route::classify(&event, &settings, self.transport.user_id());

        let admission = match self.admit(&event, &route, settings).await? {
            Admit::Admitted(admission) => admission,
            Admit::Skipped(reason) => {
                debug!(
                    room_id = %event.room_id,
                    event_id = %event.event_id,
                    kind = event.kind_name(),
                    reason,
                    "Event skipped"
                );
                return Ok(HandleOutcome::skipped(reason));
            }
        };

        let result = self.dispatch(&event, route, admission).await;
        if let Err(ref e) = result {
            error!(
                room_id = %event.room_id,
                event_id = %event.event_id,
                kind = event.kind_name(),
                "Handler aborted: {}",
                e
            );
        }
        result
    }

    async fn dispatch(
        &self,
        event: &PortalEvent,
        route: Route,
        admission: Admission,
    ) -> Result<HandleOutcome, PortalError> {
        let Admission {
            settings,
            guard: _guard,
            case,
        } = admission;

        match (route, case) {
            (Route::Invite, _) => self.on_invite(event).await,
            (Route::AgentJoined, _) => {
                let user_id = crate::pipeline::subject(event);
                self.agents.on_join(user_id).await;
                info!(user_id, "Agent joined control room");
                Ok(HandleOutcome::Handled)
            }
            (Route::AgentLeft, _) => {
                let user_id = crate::pipeline::subject(event);
                self.agents.on_leave(user_id).await;
                info!(user_id, "Agent left control room");
                Ok(HandleOutcome::Handled)
            }
            (Route::CaseJoin, Some(case)) => self.on_case_join(event, case, &settings).await,
            (Route::CaseLeave, Some(case)) => self.on_case_leave(event, case, &settings).await,
            (Route::ProfileChange, Some(case)) => {
                self.on_profile_change(event, case, &settings).await
            }
            (Route::RoomName, Some(case)) => self.on_room_name(event, case, &settings).await,
            (Route::CaseMessage, Some(case)) => self.on_case_message(event, case, &settings).await,
            (Route::Claim { control_event }, _) => {
                self.on_claim(event, &control_event, &settings).await
            }
            (Route::Unclaim { redacts }, _) => self.on_unclaim(&redacts).await,
            (Route::Reject, _) => {
                info!(sender = %event.sender, event_id = %event.event_id, "Case rejected");
                Ok(HandleOutcome::Handled)
            }
            (Route::Ignore(reason), _) => Ok(HandleOutcome::skipped(reason)),
            (_, None) => Ok(HandleOutcome::skipped("no case for room")),
        }
    }

    // ------------------------------------------------------------------
    // Invites
    // ------------------------------------------------------------------

    async fn on_invite(&self, event: &PortalEvent) -> Result<HandleOutcome, PortalError> {
        let is_direct = matches!(event.kind, EventKind::Invite { is_direct: true, .. });

        let settings = {
            let _bootstrap = self.bootstrap.lock().await;
            let settings = self.settings().await;
            if settings.control_room.is_none() {
                return self.register_control_room(&event.room_id).await;
            }
            settings
        };
        let Some(control_room) = settings.control_room.clone() else {
            return Ok(HandleOutcome::skipped("no control room"));
        };

        if event.room_id == control_room {
            self.transport.join_room(&event.room_id).await?;
            return Ok(HandleOutcome::skipped("invite to control room"));
        }

        if self.load_case(&event.room_id).await?.is_some() {
            self.transport.join_room(&event.room_id).await?;
            info!(room_id = %event.room_id, "Rejoined existing case room");
            return Ok(HandleOutcome::Handled);
        }

        let mut sent = Vec::new();
        match self
            .open_case(event, &control_room, &settings, is_direct, &mut sent)
            .await
        {
            Ok(case) => {
                info!(
                    room_id = %case.id,
                    user_id = ?case.user_id,
                    "Case opened"
                );
                self.cases.write().await.insert(case.id.clone(), case);
                Ok(HandleOutcome::Handled)
            }
            Err(PortalError::Storage(e)) => {
                self.roll_back(&sent).await;
                Err(PortalError::Storage(e))
            }
            Err(e) => {
                warn!(room_id = %event.room_id, sender = %event.sender, "Failed to open case: {}", e);
                self.roll_back(&sent).await;
                self.report_invite_error(event, &control_room, &settings, &e)
                    .await;
                Ok(HandleOutcome::Handled)
            }
        }
    }

    async fn register_control_room(&self, room_id: &str) -> Result<HandleOutcome, PortalError> {
        self.transport.join_room(room_id).await?;
        self.transport
            .send_markdown(room_id, CONTROL_ROOM_REGISTERED)
            .await?;

        {
            let mut settings = self.settings.write().await;
            let mut updated = PortalSettings::clone(&settings);
            updated.control_room = Some(room_id.to_string());
            *settings = Arc::new(updated);
        }
        info!(room_id, "Registered control room");

        if let Err(e) = self.refresh_agents().await {
            warn!(room_id, "Agent refresh after registration failed: {}", e);
        }

        Ok(HandleOutcome::ControlRoomRegistered {
            room_id: room_id.to_string(),
        })
    }

    /// Join, greet and announce a new case. Everything sent is recorded in
    /// `sent` so a failure can be rolled back.
    async fn open_case(
        &self,
        event: &PortalEvent,
        control_room: &str,
        settings: &PortalSettings,
        is_direct: bool,
        sent: &mut Vec<(String, String)>,
    ) -> Result<Case, PortalError> {
        let now = self.clock.now_ms();

        self.transport.join_room(&event.room_id).await?;
        let room_name = self
            .transport
            .room_name(&event.room_id)
            .await?
            .unwrap_or_else(|| event.room_id.clone());
        let displayname = self
            .transport
            .member_displayname(&event.room_id, &event.sender)
            .await?
            .unwrap_or_else(|| event.sender.clone());

        let case = Case {
            id: event.room_id.clone(),
            user_id: is_direct.then(|| event.sender.clone()),
            displayname,
            room_name,
            last_bot_msg: now,
        };
        let ctx = RenderContext::new().case(&case).event(event);

        let welcome = settings.templates.render(render::WELCOME, &ctx)?;
        let welcome_id = self.transport.send_markdown(&case.id, &welcome).await?;
        sent.push((case.id.clone(), welcome_id));

        let summary = settings.templates.render(render::NEW_CASE, &ctx)?;
        let control_id = self.transport.send_markdown(control_room, &summary).await?;
        sent.push((control_room.to_string(), control_id.clone()));

        let control = ControlEvent {
            event_id: control_id,
            case_id: case.id.clone(),
            seq: 0,
            created_at: now,
        };
        case::open_case(self.db.pool(), &case, &control).await?;

        Ok(case)
    }

    async fn roll_back(&self, sent: &[(String, String)]) {
        for (room_id, event_id) in sent {
            if let Err(e) = self
                .transport
                .redact(room_id, event_id, Some(REASON_ROLLBACK))
                .await
            {
                warn!(room_id = %room_id, event_id = %event_id, "Rollback redaction failed: {}", e);
            }
        }
    }

    async fn report_invite_error(
        &self,
        event: &PortalEvent,
        control_room: &str,
        settings: &PortalSettings,
        err: &PortalError,
    ) {
        let ctx = RenderContext::new().event(event).error(err.to_string());
        let text = settings
            .templates
            .render(render::INVITE_ERROR, &ctx)
            .unwrap_or_else(|_| {
                format!(
                    "Failed to open a case for {} (invited by {}): {}",
                    event.room_id, event.sender, err
                )
            });
        if let Err(e) = self.transport.send_markdown(control_room, &text).await {
            error!(room_id = %event.room_id, "Could not report invite error: {}", e);
        }
    }

    // ------------------------------------------------------------------
    // Case room membership
    // ------------------------------------------------------------------

    async fn on_case_join(
        &self,
        event: &PortalEvent,
        mut case: Case,
        settings: &PortalSettings,
    ) -> Result<HandleOutcome, PortalError> {
        let EventKind::Join {
            user_id,
            displayname,
        } = &event.kind
        else {
            return Ok(HandleOutcome::skipped("not a join"));
        };

        self.members
            .record_join(
                &case.id,
                user_id,
                MemberInfo {
                    displayname: displayname.clone(),
                },
            )
            .await;

        if self.agents.contains(user_id).await {
            info!(room_id = %case.id, user_id = %user_id, "Agent joined case");
            self.update_status(&case, None, settings).await?;
            return Ok(HandleOutcome::Handled);
        }

        let now = self.clock.now_ms();
        if now - case.last_bot_msg <= settings.new_user_cooldown_ms {
            debug!(room_id = %case.id, user_id = %user_id, "New user notice on cooldown");
            return Ok(HandleOutcome::skipped("new user cooldown"));
        }

        let name = displayname.as_deref().unwrap_or(user_id);
        let ctx = RenderContext::new()
            .case(&case)
            .event(event)
            .user(user_id, name);
        let text = settings.templates.render(render::NEW_USER, &ctx)?;
        self.transport.send_markdown(&case.id, &text).await?;
        self.edit_case(&mut case, CaseChanges::last_bot_msg(now))
            .await?;
        info!(room_id = %case.id, user_id = %user_id, "Greeted new user");

        Ok(HandleOutcome::Handled)
    }

    async fn on_case_leave(
        &self,
        event: &PortalEvent,
        mut case: Case,
        settings: &PortalSettings,
    ) -> Result<HandleOutcome, PortalError> {
        let EventKind::Leave { user_id } = &event.kind else {
            return Ok(HandleOutcome::skipped("not a leave"));
        };

        self.members.record_leave(&case.id, user_id).await;

        if self.agents.contains(user_id).await {
            let latest = control_event::latest_control_event(self.db.pool(), &case.id).await?;
            if let Some(ref ctrl) = latest {
                self.drop_claim(ctrl, user_id, settings).await?;
            }
            info!(room_id = %case.id, user_id = %user_id, "Agent left case");
            self.update_status(&case, latest, settings).await?;
            return Ok(HandleOutcome::Handled);
        }

        if case.user_id.as_deref() != Some(user_id.as_str()) {
            return Ok(HandleOutcome::skipped("bystander left"));
        }

        let members = self
            .members
            .get_members(self.transport.as_ref(), &case.id)
            .await?;
        if !self.agents.present_in(&members).await.is_empty() {
            return Ok(HandleOutcome::skipped("agents still present"));
        }

        let now = self.clock.now_ms();
        if now - case.last_bot_msg <= settings.new_user_cooldown_ms {
            debug!(room_id = %case.id, "Case closed notice on cooldown");
            return Ok(HandleOutcome::skipped("case closed cooldown"));
        }

        let Some(ctrl) = control_event::latest_control_event(self.db.pool(), &case.id).await?
        else {
            warn!(room_id = %case.id, "Case has no control event to close");
            return Ok(HandleOutcome::skipped("no control event"));
        };
        let Some(control_room) = settings.control_room.as_deref() else {
            return Ok(HandleOutcome::skipped("no control room"));
        };

        let ctx = RenderContext::new().case(&case).event(event);
        let text = settings.templates.render(render::CASE_CLOSED, &ctx)?;
        self.transport
            .edit_markdown(control_room, &ctrl.event_id, &text)
            .await?;
        self.edit_case(&mut case, CaseChanges::last_bot_msg(now))
            .await?;
        info!(room_id = %case.id, "Case closed by user leaving");

        Ok(HandleOutcome::Handled)
    }

    /// Remove an agent's claim on a control event, redacting the marker.
    async fn drop_claim(
        &self,
        ctrl: &ControlEvent,
        user_id: &str,
        settings: &PortalSettings,
    ) -> Result<(), PortalError> {
        let Some(accept) =
            case_accept::get_accept(self.db.pool(), &ctrl.event_id, user_id).await?
        else {
            return Ok(());
        };

        if let Some(control_room) = settings.control_room.as_deref() {
            self.transport
                .redact(control_room, &accept.event_id, Some(REASON_AGENT_LEFT))
                .await?;
        }

        match case_accept::delete_accept_by_ctrl(self.db.pool(), &ctrl.event_id, user_id).await {
            Ok(()) => {
                info!(case_id = %ctrl.case_id, user_id, "Claim removed");
                Ok(())
            }
            Err(e) if e.is_not_found() => {
                debug!(case_id = %ctrl.case_id, user_id, "Claim already gone");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn on_profile_change(
        &self,
        event: &PortalEvent,
        mut case: Case,
        settings: &PortalSettings,
    ) -> Result<HandleOutcome, PortalError> {
        let EventKind::ProfileChange {
            user_id,
            displayname,
        } = &event.kind
        else {
            return Ok(HandleOutcome::skipped("not a profile change"));
        };

        self.members
            .record_join(
                &case.id,
                user_id,
                MemberInfo {
                    displayname: displayname.clone(),
                },
            )
            .await;

        if self.agents.contains(user_id).await {
            self.update_status(&case, None, settings).await?;
            return Ok(HandleOutcome::Handled);
        }

        if case.user_id.as_deref() != Some(user_id.as_str()) {
            return Ok(HandleOutcome::skipped("not the case user"));
        }

        let name = displayname.clone().unwrap_or_else(|| user_id.clone());
        if name == case.displayname {
            return Ok(HandleOutcome::skipped("display name unchanged"));
        }

        self.edit_case(&mut case, CaseChanges::displayname(name))
            .await?;
        info!(room_id = %case.id, displayname = %case.displayname, "Case user renamed");
        self.update_status(&case, None, settings).await?;

        Ok(HandleOutcome::Handled)
    }

    async fn on_room_name(
        &self,
        event: &PortalEvent,
        mut case: Case,
        settings: &PortalSettings,
    ) -> Result<HandleOutcome, PortalError> {
        let EventKind::RoomName { name } = &event.kind else {
            return Ok(HandleOutcome::skipped("not a room name"));
        };
        if *name == case.room_name {
            return Ok(HandleOutcome::skipped("room name unchanged"));
        }

        self.edit_case(&mut case, CaseChanges::room_name(name.as_str()))
            .await?;
        info!(room_id = %case.id, room_name = %case.room_name, "Case room renamed");
        self.update_status(&case, None, settings).await?;

        Ok(HandleOutcome::Handled)
    }

    // ------------------------------------------------------------------
    // Messages
    // ------------------------------------------------------------------

    async fn on_case_message(
        &self,
        event: &PortalEvent,
        case: Case,
        settings: &PortalSettings,
    ) -> Result<HandleOutcome, PortalError> {
        let Some(control_room) = settings.control_room.as_deref() else {
            return Ok(HandleOutcome::skipped("no control room"));
        };

        let members = self
            .members
            .get_members(self.transport.as_ref(), &case.id)
            .await?;
        if !self.agents.present_in(&members).await.is_empty() {
            return Ok(HandleOutcome::skipped("case has agents"));
        }

        let now = self.clock.now_ms();
        let prev = control_event::latest_control_event(self.db.pool(), &case.id).await?;
        if let Some(ref prev) = prev {
            if now - prev.created_at <= settings.new_message_cooldown_ms {
                debug!(room_id = %case.id, "Control message on cooldown");
                return Ok(HandleOutcome::skipped("message cooldown"));
            }
        }

        let ctx = RenderContext::new().case(&case).event(event);
        let text = settings.templates.render(render::CASE_MESSAGE, &ctx)?;

        let seq = match prev {
            Some(prev) => {
                self.transport
                    .redact(control_room, &prev.event_id, Some(REASON_REPLACED))
                    .await?;
                prev.seq + 1
            }
            None => {
                warn!(room_id = %case.id, "Case has no control event, starting a new one");
                0
            }
        };

        let event_id = self.transport.send_markdown(control_room, &text).await?;
        let ctrl = ControlEvent {
            event_id,
            case_id: case.id.clone(),
            seq,
            created_at: now,
        };
        control_event::insert_control_event(self.db.pool(), &ctrl).await?;
        info!(room_id = %case.id, seq, event_id = %ctrl.event_id, "Case resurfaced");

        Ok(HandleOutcome::Handled)
    }

    // ------------------------------------------------------------------
    // Claims
    // ------------------------------------------------------------------

    async fn on_claim(
        &self,
        event: &PortalEvent,
        control_event_id: &str,
        settings: &PortalSettings,
    ) -> Result<HandleOutcome, PortalError> {
        let Some(ctrl) = control_event::get_control_event(self.db.pool(), control_event_id).await?
        else {
            debug!(control_event_id, "Claim on unknown control event");
            return Ok(HandleOutcome::skipped("unknown control event"));
        };

        let _guard = self.locks.lock(&ctrl.case_id).await;
        let Some(case) = self.load_case(&ctrl.case_id).await? else {
            warn!(case_id = %ctrl.case_id, "Control event without a case");
            return Ok(HandleOutcome::skipped("no case for control event"));
        };
        let agent = event.sender.as_str();

        let members = self
            .members
            .get_members(self.transport.as_ref(), &case.id)
            .await?;
        // No accept is recorded for an agent who cannot get into the room
        if !members.contains_key(agent) {
            self.transport.invite_user(&case.id, agent).await?;
        }

        let accept = CaseAccept {
            event_id: event.event_id.clone(),
            control_event: ctrl.event_id.clone(),
            case_id: case.id.clone(),
            user_id: agent.to_string(),
        };
        match case_accept::insert_accept(self.db.pool(), &accept).await {
            Ok(()) => {}
            Err(DatabaseError::AlreadyExists { .. }) => {
                debug!(room_id = %case.id, user_id = agent, "Case already claimed by agent");
                return Ok(HandleOutcome::skipped("already claimed"));
            }
            Err(e) => return Err(e.into()),
        }
        info!(room_id = %case.id, user_id = agent, control_event = %ctrl.event_id, "Case claimed");

        if !self.agents.present_in(&members).await.is_empty() {
            return Ok(HandleOutcome::Handled);
        }

        let latest = control_event::latest_control_event(self.db.pool(), &case.id).await?;
        if latest.as_ref().map(|c| c.event_id.as_str()) != Some(ctrl.event_id.as_str()) {
            debug!(room_id = %case.id, "Claim on superseded control event");
            return Ok(HandleOutcome::Handled);
        }
        let Some(control_room) = settings.control_room.as_deref() else {
            return Ok(HandleOutcome::Handled);
        };

        let name = self
            .transport
            .member_displayname(control_room, agent)
            .await
            .ok()
            .flatten()
            .unwrap_or_else(|| agent.to_string());
        let ctx = RenderContext::new()
            .case(&case)
            .event(event)
            .agent(agent, &name);
        let text = settings.templates.render(render::CASE_ACCEPTED, &ctx)?;
        self.transport
            .edit_markdown(control_room, &ctrl.event_id, &text)
            .await?;

        Ok(HandleOutcome::Handled)
    }

    async fn on_unclaim(&self, redacts: &str) -> Result<HandleOutcome, PortalError> {
        let Some(accept) = case_accept::get_accept_by_id(self.db.pool(), redacts).await? else {
            return Ok(HandleOutcome::skipped("untracked redaction"));
        };

        let _guard = self.locks.lock(&accept.case_id).await;
        match case_accept::delete_accept_by_id(self.db.pool(), redacts).await {
            Ok(()) => {
                info!(room_id = %accept.case_id, user_id = %accept.user_id, "Claim redacted");
                Ok(HandleOutcome::Handled)
            }
            Err(e) if e.is_not_found() => Ok(HandleOutcome::skipped("claim already gone")),
            Err(e) => Err(e.into()),
        }
    }

    // ------------------------------------------------------------------
    // Status rendering
    // ------------------------------------------------------------------

    /// Re-render a case's status line under its room lock.
    ///
    /// Returns the rendered text, or `None` when the case has no control event.
    pub async fn update_case_status(&self, room_id: &str) -> Result<Option<String>, PortalError> {
        let _guard = self.locks.lock(room_id).await;
        let Some(case) = self.load_case(room_id).await? else {
            return Ok(None);
        };
        let settings = self.settings().await;
        self.update_status(&case, None, &settings).await
    }

    /// Edit the latest control message to list the agents in the case room.
    async fn update_status(
        &self,
        case: &Case,
        ctrl: Option<ControlEvent>,
        settings: &PortalSettings,
    ) -> Result<Option<String>, PortalError> {
        let ctrl = match ctrl {
            Some(ctrl) => ctrl,
            None => match control_event::latest_control_event(self.db.pool(), &case.id).await? {
                Some(ctrl) => ctrl,
                None => {
                    warn!(room_id = %case.id, "Tried to update case with no control event");
                    return Ok(None);
                }
            },
        };
        let Some(control_room) = settings.control_room.as_deref() else {
            warn!(room_id = %case.id, "Tried to update case with no control room");
            return Ok(None);
        };

        let members = self
            .members
            .get_members(self.transport.as_ref(), &case.id)
            .await?;
        let agents = self.agents.present_in(&members).await;
        let ctx = RenderContext::new().case(case).agents(&agents);
        let text = settings.templates.render(render::CASE_STATUS, &ctx)?;

        self.transport
            .edit_markdown(control_room, &ctrl.event_id, &text)
            .await?;
        debug!(room_id = %case.id, agents = agents.len(), "Case status updated");

        Ok(Some(text))
    }

    // ------------------------------------------------------------------
    // Case cache
    // ------------------------------------------------------------------

    /// Read-through lookup of a case.
    pub(crate) async fn load_case(&self, room_id: &str) -> Result<Option<Case>, PortalError> {
        if let Some(case) = self.cases.read().await.get(room_id) {
            return Ok(Some(case.clone()));
        }

        let case = case::get_case(self.db.pool(), room_id).await?;
        if let Some(ref case) = case {
            self.cases
                .write()
                .await
                .insert(case.id.clone(), case.clone());
        }
        Ok(case)
    }

    async fn edit_case(&self, case: &mut Case, changes: CaseChanges) -> Result<(), PortalError> {
        case::edit_case(self.db.pool(), &case.id, &changes).await?;
        changes.apply_to(case);
        self.cases
            .write()
            .await
            .insert(case.id.clone(), case.clone());
        Ok(())
    }
}
