//! Coordinator scenarios against the recording transport and in-memory SQLite.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use database::{case, case_accept, control_event, Case, Database};
use mock_transport::{Op, RecordingTransport};
use portal::{
    Coordinator, EventKind, HandleOutcome, ManualClock, PortalError, PortalEvent, PortalSettings,
    CONTROL_ROOM_REGISTERED,
};

const BOT: &str = "@bot:example.org";
const ADMIN: &str = "@admin:example.org";
const CONTROL: &str = "!control:example.org";
const CASE: &str = "!case:example.org";
const USER: &str = "@alice:example.org";
const AGENT: &str = "@agent:example.org";
const AGENT2: &str = "@zed:example.org";
const BYSTANDER: &str = "@bob:example.org";

const START_MS: i64 = 1_700_000_000_000;
const CLAIM: &str = "\u{1F44D}";

struct Harness {
    coordinator: Arc<Coordinator<RecordingTransport>>,
    transport: Arc<RecordingTransport>,
    clock: Arc<ManualClock>,
}

impl Harness {
    fn db(&self) -> &Database {
        self.coordinator.db()
    }

    async fn handle(&self, event: PortalEvent) -> HandleOutcome {
        self.coordinator.handle(event).await.unwrap()
    }

    /// Open the default case and return its control event ID.
    async fn open_case(&self) -> String {
        let outcome = self.handle(invite(CASE, USER, true)).await;
        assert_eq!(outcome, HandleOutcome::Handled);
        latest_ctrl(self.db()).await
    }

    fn last_edit(&self, event_id: &str) -> Option<String> {
        self.transport.edits_of(event_id).pop()
    }
}

async fn test_db() -> Database {
    let db = Database::connect_with_pool_size("sqlite::memory:", 1)
        .await
        .unwrap();
    db.migrate().await.unwrap();
    db
}

async fn harness_with(settings: PortalSettings, transport: RecordingTransport) -> Harness {
    let transport = Arc::new(transport);
    transport.add_member(CONTROL, BOT, Some("Support Bot"));
    transport.add_member(CONTROL, AGENT, Some("Agent Smith"));
    transport.add_member(CONTROL, AGENT2, Some("Zed"));
    transport.add_member(CASE, USER, Some("Alice"));
    transport.set_room_name(CASE, "Billing question");

    let clock = Arc::new(ManualClock::new(START_MS));
    let coordinator = Coordinator::new(Arc::clone(&transport), test_db().await, settings)
        .with_clock(clock.clone());
    coordinator.start().await.unwrap();

    Harness {
        coordinator: Arc::new(coordinator),
        transport,
        clock,
    }
}

async fn harness() -> Harness {
    harness_with(
        PortalSettings::default().with_control_room(CONTROL),
        RecordingTransport::new(BOT),
    )
    .await
}

async fn latest_ctrl(db: &Database) -> String {
    control_event::latest_control_event(db.pool(), CASE)
        .await
        .unwrap()
        .expect("case has a control event")
        .event_id
}

fn next_id() -> String {
    static NEXT: AtomicU64 = AtomicU64::new(1);
    format!("$test{}", NEXT.fetch_add(1, Ordering::SeqCst))
}

fn event(room_id: &str, sender: &str, kind: EventKind) -> PortalEvent {
    PortalEvent::new(room_id, next_id(), sender, START_MS, kind)
}

fn invite(room_id: &str, sender: &str, is_direct: bool) -> PortalEvent {
    event(
        room_id,
        sender,
        EventKind::Invite {
            target: BOT.to_string(),
            is_direct,
        },
    )
}

fn join(room_id: &str, user_id: &str, displayname: &str) -> PortalEvent {
    event(
        room_id,
        user_id,
        EventKind::Join {
            user_id: user_id.to_string(),
            displayname: Some(displayname.to_string()),
        },
    )
}

fn leave(room_id: &str, user_id: &str) -> PortalEvent {
    event(
        room_id,
        user_id,
        EventKind::Leave {
            user_id: user_id.to_string(),
        },
    )
}

fn message(room_id: &str, sender: &str, body: &str) -> PortalEvent {
    event(
        room_id,
        sender,
        EventKind::Message {
            body: body.to_string(),
            reply_to: None,
        },
    )
}

fn reaction(event_id: &str, sender: &str, relates_to: &str, key: &str) -> PortalEvent {
    PortalEvent::new(
        CONTROL,
        event_id,
        sender,
        START_MS,
        EventKind::Reaction {
            relates_to: relates_to.to_string(),
            key: key.to_string(),
        },
    )
}

fn redaction(sender: &str, redacts: &str) -> PortalEvent {
    event(
        CONTROL,
        sender,
        EventKind::Redaction {
            redacts: redacts.to_string(),
        },
    )
}

/// Agent joins the case room, both on the transport and as an event.
async fn agent_joins(h: &Harness, agent: &str, name: &str) -> HandleOutcome {
    h.transport.add_member(CASE, agent, Some(name));
    h.handle(join(CASE, agent, name)).await
}

async fn agent_leaves(h: &Harness, agent: &str) -> HandleOutcome {
    h.transport.remove_member(CASE, agent);
    h.handle(leave(CASE, agent)).await
}

// ----------------------------------------------------------------------
// Invites
// ----------------------------------------------------------------------

#[tokio::test]
async fn test_first_invite_registers_control_room_then_cases_open() {
    let h = harness_with(PortalSettings::default(), RecordingTransport::new(BOT)).await;
    assert!(h.coordinator.agents().snapshot().await.is_empty());

    let outcome = h.handle(invite(CONTROL, ADMIN, false)).await;
    assert_eq!(
        outcome,
        HandleOutcome::ControlRoomRegistered {
            room_id: CONTROL.to_string()
        }
    );
    assert_eq!(
        h.transport.sent_to(CONTROL),
        vec![CONTROL_ROOM_REGISTERED.to_string()]
    );
    assert_eq!(
        h.coordinator.settings().await.control_room.as_deref(),
        Some(CONTROL)
    );
    assert!(h.coordinator.agents().contains(AGENT).await);
    assert!(!h.coordinator.agents().contains(BOT).await);

    let outcome = h.handle(invite(CASE, USER, true)).await;
    assert_eq!(outcome, HandleOutcome::Handled);

    let stored = case::get_case(h.db().pool(), CASE).await.unwrap().unwrap();
    assert_eq!(
        stored,
        Case {
            id: CASE.to_string(),
            user_id: Some(USER.to_string()),
            displayname: "Alice".to_string(),
            room_name: "Billing question".to_string(),
            last_bot_msg: START_MS,
        }
    );

    let welcome = h.transport.sent_to(CASE);
    assert_eq!(welcome.len(), 1);
    assert!(welcome[0].contains("Alice"));

    let control = h.transport.sent();
    let announcement = control
        .iter()
        .filter(|s| s.room_id == CONTROL)
        .last()
        .unwrap();
    assert!(announcement.body.contains("New case from **Alice**"));

    let ctrl = control_event::latest_control_event(h.db().pool(), CASE)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(ctrl.seq, 0);
    assert_eq!(ctrl.event_id, announcement.event_id);
    assert_eq!(ctrl.created_at, START_MS);
}

#[tokio::test]
async fn test_group_invite_has_no_originating_user() {
    let h = harness().await;
    h.handle(invite(CASE, USER, false)).await;

    let stored = case::get_case(h.db().pool(), CASE).await.unwrap().unwrap();
    assert_eq!(stored.user_id, None);
    assert_eq!(stored.displayname, "Alice");
}

#[tokio::test]
async fn test_invite_failure_reports_error_and_creates_nothing() {
    let h = harness().await;
    h.transport.fail(Op::State);

    let outcome = h.handle(invite(CASE, USER, true)).await;
    assert_eq!(outcome, HandleOutcome::Handled);

    assert!(case::get_case(h.db().pool(), CASE).await.unwrap().is_none());
    assert!(control_event::latest_control_event(h.db().pool(), CASE)
        .await
        .unwrap()
        .is_none());
    assert!(h.transport.sent_to(CASE).is_empty());

    let reports = h.transport.sent_to(CONTROL);
    assert_eq!(reports.len(), 1);
    assert!(reports[0].starts_with("Failed to open a case for `!case:example.org`"));
    assert!(reports[0].contains("injected failure"));
}

#[tokio::test]
async fn test_join_failure_reports_error() {
    let h = harness().await;
    h.transport.fail(Op::Join);

    h.handle(invite(CASE, USER, true)).await;

    assert!(case::get_case(h.db().pool(), CASE).await.unwrap().is_none());
    assert_eq!(h.transport.sent_to(CONTROL).len(), 1);
    assert!(h.transport.joins().is_empty());
}

#[tokio::test]
async fn test_reinvite_to_existing_case_only_joins() {
    let h = harness().await;
    h.open_case().await;
    h.transport.clear_log();

    let outcome = h.handle(invite(CASE, USER, true)).await;
    assert_eq!(outcome, HandleOutcome::Handled);
    assert_eq!(h.transport.joins(), vec![CASE.to_string()]);
    assert!(h.transport.sent().is_empty());
    assert_eq!(case::count_cases(h.db().pool()).await.unwrap(), 1);
}

#[tokio::test]
async fn test_invites_for_other_users_are_ignored() {
    let h = harness().await;
    let outcome = h
        .handle(event(
            CASE,
            USER,
            EventKind::Invite {
                target: BYSTANDER.to_string(),
                is_direct: true,
            },
        ))
        .await;
    assert!(matches!(outcome, HandleOutcome::Skipped { .. }));
    assert!(h.transport.joins().is_empty());
}

// ----------------------------------------------------------------------
// Agent registry
// ----------------------------------------------------------------------

#[tokio::test]
async fn test_control_room_membership_tracks_agents() {
    let h = harness().await;
    let newcomer = "@newcomer:example.org";

    h.handle(join(CONTROL, newcomer, "Newcomer")).await;
    assert!(h.coordinator.agents().contains(newcomer).await);

    h.handle(leave(CONTROL, AGENT)).await;
    assert!(!h.coordinator.agents().contains(AGENT).await);

    let outcome = h.handle(join(CONTROL, BOT, "Support Bot")).await;
    assert_eq!(outcome, HandleOutcome::Skipped { reason: "own event" });
    assert!(!h.coordinator.agents().contains(BOT).await);
}

#[tokio::test]
async fn test_apply_settings_refreshes_agents() {
    let h = harness_with(PortalSettings::default(), RecordingTransport::new(BOT)).await;
    assert!(!h.coordinator.agents().contains(AGENT).await);

    let refresh = h
        .coordinator
        .apply_settings(PortalSettings::default().with_control_room(CONTROL))
        .await;
    refresh.await.unwrap();

    assert!(h.coordinator.agents().contains(AGENT).await);
    assert!(h.coordinator.agents().contains(AGENT2).await);
    assert_eq!(
        h.coordinator.settings().await.control_room.as_deref(),
        Some(CONTROL)
    );
}

// ----------------------------------------------------------------------
// Messages
// ----------------------------------------------------------------------

#[tokio::test]
async fn test_message_burst_posts_once_within_cooldown() {
    let h = harness().await;
    let first_ctrl = h.open_case().await;
    let cooldown = h.coordinator.settings().await.new_message_cooldown_ms;
    h.clock.advance(cooldown + 1);

    assert_eq!(
        h.handle(message(CASE, USER, "hello?")).await,
        HandleOutcome::Handled
    );
    h.clock.advance(1_000);
    assert_eq!(
        h.handle(message(CASE, USER, "anyone there?")).await,
        HandleOutcome::Skipped {
            reason: "message cooldown"
        }
    );
    h.clock.advance(1_000);
    assert_eq!(
        h.handle(message(CASE, USER, "please")).await,
        HandleOutcome::Skipped {
            reason: "message cooldown"
        }
    );

    let control = h.transport.sent_to(CONTROL);
    assert_eq!(control.len(), 2);
    assert!(control[1].ends_with("hello?"));

    let redactions = h.transport.redactions();
    assert_eq!(redactions.len(), 1);
    assert_eq!(redactions[0].event_id, first_ctrl);
    assert_eq!(
        redactions[0].reason.as_deref(),
        Some("Control event replaced")
    );

    let history = control_event::list_control_events(h.db().pool(), CASE)
        .await
        .unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].seq, 1);
    assert_eq!(history[1].event_id, first_ctrl);

    // Past the cooldown again the next message resurfaces the case
    h.clock.advance(cooldown);
    assert_eq!(
        h.handle(message(CASE, USER, "still waiting")).await,
        HandleOutcome::Handled
    );
    let latest = control_event::latest_control_event(h.db().pool(), CASE)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(latest.seq, 2);
}

#[tokio::test]
async fn test_messages_with_agent_present_are_not_surfaced() {
    let h = harness().await;
    h.open_case().await;
    agent_joins(&h, AGENT, "Agent Smith").await;
    h.clock.advance(3_600_000);

    assert_eq!(
        h.handle(message(CASE, USER, "thanks")).await,
        HandleOutcome::Skipped {
            reason: "case has agents"
        }
    );
    assert_eq!(
        h.handle(message(CASE, AGENT, "you're welcome")).await,
        HandleOutcome::Skipped {
            reason: "sent by agent"
        }
    );
    assert_eq!(h.transport.sent_to(CONTROL).len(), 1);
}

#[tokio::test]
async fn test_message_without_control_event_starts_at_zero() {
    let h = harness().await;
    let orphan = Case {
        id: CASE.to_string(),
        user_id: Some(USER.to_string()),
        displayname: "Alice".to_string(),
        room_name: "Billing question".to_string(),
        last_bot_msg: START_MS,
    };
    case::insert_case(h.db().pool(), &orphan).await.unwrap();

    assert_eq!(
        h.handle(message(CASE, USER, "hello")).await,
        HandleOutcome::Handled
    );
    let ctrl = control_event::latest_control_event(h.db().pool(), CASE)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(ctrl.seq, 0);
    assert!(h.transport.redactions().is_empty());
}

#[tokio::test]
async fn test_messages_outside_cases_are_skipped() {
    let h = harness().await;
    let outcome = h.handle(message("!random:example.org", USER, "hi")).await;
    assert_eq!(
        outcome,
        HandleOutcome::Skipped {
            reason: "no case for room"
        }
    );
}

#[tokio::test]
async fn test_membership_fetched_once_per_room() {
    let h = harness().await;
    h.open_case().await;
    let cooldown = h.coordinator.settings().await.new_message_cooldown_ms;

    h.clock.advance(cooldown + 1);
    h.handle(message(CASE, USER, "one")).await;
    h.clock.advance(cooldown + 1);
    h.handle(message(CASE, USER, "two")).await;

    // One fetch for the control room at start, one for the case room
    assert_eq!(h.transport.member_fetches(), 2);
    assert!(h.coordinator.members().is_cached(CASE).await);
}

// ----------------------------------------------------------------------
// Claims
// ----------------------------------------------------------------------

#[tokio::test]
async fn test_claim_then_agent_leaves() {
    let h = harness().await;
    let ctrl = h.open_case().await;

    let outcome = h.handle(reaction("$claim", AGENT, &ctrl, CLAIM)).await;
    assert_eq!(outcome, HandleOutcome::Handled);
    assert_eq!(
        h.transport.invites(),
        vec![(CASE.to_string(), AGENT.to_string())]
    );

    let accept = case_accept::get_accept(h.db().pool(), &ctrl, AGENT)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(accept.event_id, "$claim");
    assert_eq!(accept.case_id, CASE);
    assert!(h.last_edit(&ctrl).unwrap().ends_with("claimed by Agent Smith"));

    agent_joins(&h, AGENT, "Agent Smith").await;
    assert!(h
        .last_edit(&ctrl)
        .unwrap()
        .ends_with("agents in room: Agent Smith"));

    agent_leaves(&h, AGENT).await;
    assert!(case_accept::get_accept(h.db().pool(), &ctrl, AGENT)
        .await
        .unwrap()
        .is_none());

    let redactions = h.transport.redactions();
    assert_eq!(redactions.len(), 1);
    assert_eq!(redactions[0].room_id, CONTROL);
    assert_eq!(redactions[0].event_id, "$claim");
    assert_eq!(redactions[0].reason.as_deref(), Some("Agent left room"));
    assert!(h.last_edit(&ctrl).unwrap().ends_with("agents in room: none"));
}

#[tokio::test]
async fn test_claim_by_reply() {
    let h = harness().await;
    let ctrl = h.open_case().await;

    let reply = PortalEvent::new(
        CONTROL,
        "$reply",
        AGENT,
        START_MS,
        EventKind::Message {
            body: "on it \u{1F44D}\u{1F3FD}".to_string(),
            reply_to: Some(ctrl.clone()),
        },
    );
    assert_eq!(h.handle(reply).await, HandleOutcome::Handled);

    let accept = case_accept::get_accept(h.db().pool(), &ctrl, AGENT)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(accept.event_id, "$reply");
}

#[tokio::test]
async fn test_claim_with_agents_present_keeps_status() {
    let h = harness().await;
    let ctrl = h.open_case().await;
    agent_joins(&h, AGENT2, "Zed").await;
    let edits_before = h.transport.edits_of(&ctrl).len();

    h.handle(reaction("$claim", AGENT, &ctrl, CLAIM)).await;

    assert!(case_accept::get_accept(h.db().pool(), &ctrl, AGENT)
        .await
        .unwrap()
        .is_some());
    assert_eq!(h.transport.edits_of(&ctrl).len(), edits_before);
}

#[tokio::test]
async fn test_duplicate_and_unknown_claims() {
    let h = harness().await;
    let ctrl = h.open_case().await;

    h.handle(reaction("$claim1", AGENT, &ctrl, CLAIM)).await;
    assert_eq!(
        h.handle(reaction("$claim2", AGENT, &ctrl, "\u{1F44D}\u{1F3FB}"))
            .await,
        HandleOutcome::Skipped {
            reason: "already claimed"
        }
    );
    assert_eq!(
        h.handle(reaction("$claim3", AGENT, "$nope", CLAIM)).await,
        HandleOutcome::Skipped {
            reason: "unknown control event"
        }
    );

    let accepts = case_accept::list_accepts_for_case(h.db().pool(), CASE)
        .await
        .unwrap();
    assert_eq!(accepts.len(), 1);
}

#[tokio::test]
async fn test_reject_changes_nothing() {
    let h = harness().await;
    let ctrl = h.open_case().await;
    h.transport.clear_log();

    let outcome = h.handle(reaction("$nah", AGENT, &ctrl, "\u{1F44E}")).await;
    assert_eq!(outcome, HandleOutcome::Handled);
    assert!(h.transport.edits().is_empty());
    assert!(h.transport.invites().is_empty());
    assert!(case_accept::list_accepts_for_case(h.db().pool(), CASE)
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn test_redacting_claim_unclaims() {
    let h = harness().await;
    let ctrl = h.open_case().await;
    h.handle(reaction("$claim", AGENT, &ctrl, CLAIM)).await;

    // The bot's own redactions are not unclaims
    assert_eq!(
        h.handle(redaction(BOT, "$claim")).await,
        HandleOutcome::Skipped { reason: "own event" }
    );
    assert!(case_accept::get_accept_by_id(h.db().pool(), "$claim")
        .await
        .unwrap()
        .is_some());

    assert_eq!(
        h.handle(redaction(AGENT, "$claim")).await,
        HandleOutcome::Handled
    );
    assert!(case_accept::get_accept_by_id(h.db().pool(), "$claim")
        .await
        .unwrap()
        .is_none());

    assert_eq!(
        h.handle(redaction(AGENT, "$claim")).await,
        HandleOutcome::Skipped {
            reason: "untracked redaction"
        }
    );
}

// ----------------------------------------------------------------------
// Status rendering
// ----------------------------------------------------------------------

#[tokio::test]
async fn test_status_render_is_idempotent() {
    let h = harness().await;
    let ctrl = h.open_case().await;
    agent_joins(&h, AGENT, "Agent Smith").await;

    let first = h.coordinator.update_case_status(CASE).await.unwrap();
    let second = h.coordinator.update_case_status(CASE).await.unwrap();
    assert!(first.is_some());
    assert_eq!(first, second);

    let edits = h.transport.edits_of(&ctrl);
    let n = edits.len();
    assert_eq!(edits[n - 1], edits[n - 2]);
}

#[tokio::test]
async fn test_status_without_control_event_is_noop() {
    let h = harness().await;
    let orphan = Case {
        id: CASE.to_string(),
        user_id: None,
        displayname: "Alice".to_string(),
        room_name: "Billing question".to_string(),
        last_bot_msg: START_MS,
    };
    case::insert_case(h.db().pool(), &orphan).await.unwrap();

    assert_eq!(h.coordinator.update_case_status(CASE).await.unwrap(), None);
    assert!(h.transport.edits().is_empty());
}

#[tokio::test]
async fn test_status_lists_agents_in_room() {
    let h = harness().await;
    let ctrl = h.open_case().await;

    agent_joins(&h, AGENT, "Agent Smith").await;
    assert!(h
        .last_edit(&ctrl)
        .unwrap()
        .ends_with("agents in room: Agent Smith"));

    // Non-agents never show up and do not trigger a re-render
    let edits = h.transport.edits_of(&ctrl).len();
    h.transport.add_member(CASE, BYSTANDER, Some("Bob"));
    h.handle(join(CASE, BYSTANDER, "Bob")).await;
    assert_eq!(h.transport.edits_of(&ctrl).len(), edits);

    agent_joins(&h, AGENT2, "Zed").await;
    assert!(h
        .last_edit(&ctrl)
        .unwrap()
        .ends_with("agents in room: Agent Smith, Zed"));

    agent_leaves(&h, AGENT).await;
    assert!(h.last_edit(&ctrl).unwrap().ends_with("agents in room: Zed"));

    // The rendered set matches room members intersected with the registry
    let members = h.coordinator.members().get_members(h.transport.as_ref(), CASE).await.unwrap();
    let present = h.coordinator.agents().present_in(&members).await;
    assert_eq!(present, vec![(AGENT2.to_string(), "Zed".to_string())]);
}

#[tokio::test]
async fn test_profile_and_room_name_changes() {
    let h = harness().await;
    let ctrl = h.open_case().await;

    let rename = event(
        CASE,
        USER,
        EventKind::ProfileChange {
            user_id: USER.to_string(),
            displayname: Some("Alice B.".to_string()),
        },
    );
    assert_eq!(h.handle(rename.clone()).await, HandleOutcome::Handled);
    assert!(h.last_edit(&ctrl).unwrap().contains("(Alice B.)"));

    assert_eq!(
        h.handle(rename).await,
        HandleOutcome::Skipped {
            reason: "display name unchanged"
        }
    );

    let room_name = event(
        CASE,
        USER,
        EventKind::RoomName {
            name: "Refund".to_string(),
        },
    );
    assert_eq!(h.handle(room_name).await, HandleOutcome::Handled);
    assert!(h.last_edit(&ctrl).unwrap().starts_with("**Refund**"));

    let stored = case::get_case(h.db().pool(), CASE).await.unwrap().unwrap();
    assert_eq!(stored.displayname, "Alice B.");
    assert_eq!(stored.room_name, "Refund");
}

// ----------------------------------------------------------------------
// Case room notices
// ----------------------------------------------------------------------

#[tokio::test]
async fn test_new_user_notice_respects_cooldown() {
    let h = harness().await;
    h.open_case().await;

    h.transport.add_member(CASE, BYSTANDER, Some("Bob"));
    assert_eq!(
        h.handle(join(CASE, BYSTANDER, "Bob")).await,
        HandleOutcome::Skipped {
            reason: "new user cooldown"
        }
    );

    let cooldown = h.coordinator.settings().await.new_user_cooldown_ms;
    h.clock.advance(cooldown + 1);
    assert_eq!(
        h.handle(join(CASE, BYSTANDER, "Bob")).await,
        HandleOutcome::Handled
    );

    let sent = h.transport.sent_to(CASE);
    assert_eq!(sent.len(), 2);
    assert!(sent[1].contains("Welcome Bob"));

    let stored = case::get_case(h.db().pool(), CASE).await.unwrap().unwrap();
    assert_eq!(stored.last_bot_msg, START_MS + cooldown + 1);
}

#[tokio::test]
async fn test_user_leaving_unattended_case_closes_it() {
    let h = harness().await;
    let ctrl = h.open_case().await;
    let cooldown = h.coordinator.settings().await.new_user_cooldown_ms;
    h.clock.advance(cooldown + 1);

    h.transport.remove_member(CASE, USER);
    assert_eq!(h.handle(leave(CASE, USER)).await, HandleOutcome::Handled);
    assert!(h.last_edit(&ctrl).unwrap().ends_with("user left, case closed"));

    let stored = case::get_case(h.db().pool(), CASE).await.unwrap().unwrap();
    assert_eq!(stored.last_bot_msg, START_MS + cooldown + 1);
}

#[tokio::test]
async fn test_user_leaving_with_agent_present_keeps_case_open() {
    let h = harness().await;
    let ctrl = h.open_case().await;
    agent_joins(&h, AGENT, "Agent Smith").await;
    let cooldown = h.coordinator.settings().await.new_user_cooldown_ms;
    h.clock.advance(cooldown + 1);

    h.transport.remove_member(CASE, USER);
    assert_eq!(
        h.handle(leave(CASE, USER)).await,
        HandleOutcome::Skipped {
            reason: "agents still present"
        }
    );
    assert!(h
        .last_edit(&ctrl)
        .unwrap()
        .ends_with("agents in room: Agent Smith"));
    let stored = case::get_case(h.db().pool(), CASE).await.unwrap().unwrap();
    assert_eq!(stored.last_bot_msg, START_MS);
}

#[tokio::test]
async fn test_user_leaving_right_after_notice_is_not_announced() {
    let h = harness().await;
    let ctrl = h.open_case().await;
    let edits_before = h.transport.edits_of(&ctrl).len();

    h.transport.remove_member(CASE, USER);
    assert_eq!(
        h.handle(leave(CASE, USER)).await,
        HandleOutcome::Skipped {
            reason: "case closed cooldown"
        }
    );
    assert_eq!(h.transport.edits_of(&ctrl).len(), edits_before);
    let stored = case::get_case(h.db().pool(), CASE).await.unwrap().unwrap();
    assert_eq!(stored.last_bot_msg, START_MS);
}

// ----------------------------------------------------------------------
// Transport failures
// ----------------------------------------------------------------------

#[tokio::test]
async fn test_claim_invite_failure_records_no_accept() {
    let h = harness().await;
    let ctrl = h.open_case().await;
    let edits_before = h.transport.edits_of(&ctrl).len();
    h.transport.fail(Op::Invite);

    let result = h
        .coordinator
        .handle(reaction("$claim", AGENT, &ctrl, CLAIM))
        .await;
    assert!(matches!(result, Err(PortalError::Transport(_))));
    assert!(case_accept::get_accept(h.db().pool(), &ctrl, AGENT)
        .await
        .unwrap()
        .is_none());
    assert_eq!(h.transport.edits_of(&ctrl).len(), edits_before);

    // A fresh claim goes through once invites work again
    h.transport.succeed(Op::Invite);
    assert_eq!(
        h.handle(reaction("$claim2", AGENT, &ctrl, CLAIM)).await,
        HandleOutcome::Handled
    );
    let accept = case_accept::get_accept(h.db().pool(), &ctrl, AGENT)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(accept.event_id, "$claim2");
}

#[tokio::test]
async fn test_claim_by_agent_already_in_room_skips_invite() {
    let h = harness().await;
    let ctrl = h.open_case().await;
    agent_joins(&h, AGENT, "Agent Smith").await;
    h.transport.fail(Op::Invite);

    assert_eq!(
        h.handle(reaction("$claim", AGENT, &ctrl, CLAIM)).await,
        HandleOutcome::Handled
    );
    assert!(h.transport.invites().is_empty());
    assert!(case_accept::get_accept(h.db().pool(), &ctrl, AGENT)
        .await
        .unwrap()
        .is_some());
}

#[tokio::test]
async fn test_redact_failure_keeps_previous_control_event() {
    let h = harness().await;
    let first_ctrl = h.open_case().await;
    let cooldown = h.coordinator.settings().await.new_message_cooldown_ms;
    h.clock.advance(cooldown + 1);
    h.transport.fail(Op::Redact);

    let result = h.coordinator.handle(message(CASE, USER, "hello?")).await;
    assert!(matches!(result, Err(PortalError::Transport(_))));

    let history = control_event::list_control_events(h.db().pool(), CASE)
        .await
        .unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].event_id, first_ctrl);
    assert_eq!(h.transport.sent_to(CONTROL).len(), 1);
    assert!(h.transport.redactions().is_empty());
}

#[tokio::test]
async fn test_claim_edit_failure_keeps_accept() {
    let h = harness().await;
    let ctrl = h.open_case().await;
    let edits_before = h.transport.edits_of(&ctrl).len();
    h.transport.fail(Op::Edit);

    let result = h
        .coordinator
        .handle(reaction("$claim", AGENT, &ctrl, CLAIM))
        .await;
    assert!(matches!(result, Err(PortalError::Transport(_))));

    // The claim stands, only its notice is missing
    assert!(case_accept::get_accept(h.db().pool(), &ctrl, AGENT)
        .await
        .unwrap()
        .is_some());
    assert_eq!(h.transport.edits_of(&ctrl).len(), edits_before);
}

#[tokio::test]
async fn test_status_edit_failure_on_agent_join_recovers_on_rerender() {
    let h = harness().await;
    let ctrl = h.open_case().await;
    h.transport.fail(Op::Edit);

    h.transport.add_member(CASE, AGENT, Some("Agent Smith"));
    let result = h
        .coordinator
        .handle(join(CASE, AGENT, "Agent Smith"))
        .await;
    assert!(matches!(result, Err(PortalError::Transport(_))));
    assert!(!h
        .transport
        .edits_of(&ctrl)
        .iter()
        .any(|e| e.ends_with("Agent Smith")));

    h.transport.succeed(Op::Edit);
    let text = h.coordinator.update_case_status(CASE).await.unwrap().unwrap();
    assert!(text.ends_with("agents in room: Agent Smith"));
    assert_eq!(h.last_edit(&ctrl), Some(text));
}

// ----------------------------------------------------------------------
// Concurrency
// ----------------------------------------------------------------------

#[tokio::test]
async fn test_concurrent_leaves_remove_claim_once() {
    let h = harness_with(
        PortalSettings::default().with_control_room(CONTROL),
        RecordingTransport::new(BOT).with_delay(Duration::from_millis(5)),
    )
    .await;
    let ctrl = h.open_case().await;
    h.handle(reaction("$claim", AGENT, &ctrl, CLAIM)).await;
    agent_joins(&h, AGENT, "Agent Smith").await;

    h.transport.remove_member(CASE, AGENT);
    let (a, b) = tokio::join!(
        h.coordinator.handle(leave(CASE, AGENT)),
        h.coordinator.handle(leave(CASE, AGENT)),
    );
    assert_eq!(a.unwrap(), HandleOutcome::Handled);
    assert_eq!(b.unwrap(), HandleOutcome::Handled);

    let claim_redactions = h
        .transport
        .redactions()
        .into_iter()
        .filter(|r| r.event_id == "$claim")
        .count();
    assert_eq!(claim_redactions, 1);
    assert!(case_accept::get_accept(h.db().pool(), &ctrl, AGENT)
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn test_concurrent_messages_post_one_control_event() {
    let h = harness_with(
        PortalSettings::default().with_control_room(CONTROL),
        RecordingTransport::new(BOT).with_delay(Duration::from_millis(5)),
    )
    .await;
    h.open_case().await;
    let cooldown = h.coordinator.settings().await.new_message_cooldown_ms;
    h.clock.advance(cooldown + 1);

    let (a, b) = tokio::join!(
        h.coordinator.handle(message(CASE, USER, "one")),
        h.coordinator.handle(message(CASE, USER, "two")),
    );
    let outcomes = [a.unwrap(), b.unwrap()];
    assert_eq!(
        outcomes
            .iter()
            .filter(|o| **o == HandleOutcome::Handled)
            .count(),
        1
    );

    let history = control_event::list_control_events(h.db().pool(), CASE)
        .await
        .unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].seq, 1);
}
