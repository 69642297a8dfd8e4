//! Event routing and the guard chain run before every handler.
//!
//! Each event is classified into a [`Route`], and each route declares the
//! ordered [`Guard`]s it needs. Guards either drop the event with a reason or
//! contribute to the [`Admission`] passed to the handler (the room lock and
//! the case).

use std::sync::Arc;

use database::Case;

use crate::claim;
use crate::coordinator::Coordinator;
use crate::error::PortalError;
use crate::event::{EventKind, PortalEvent};
use crate::locks::RoomGuard;
use crate::settings::PortalSettings;
use crate::transport::Transport;

/// What an event means to the coordinator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    /// The bot was invited somewhere.
    Invite,
    /// Someone joined the control room.
    AgentJoined,
    /// Someone left the control room.
    AgentLeft,
    CaseJoin,
    CaseLeave,
    ProfileChange,
    RoomName,
    CaseMessage,
    /// A claim marker on (or reply to) a control message.
    Claim { control_event: String },
    Reject,
    /// A redaction in the control room, possibly of a claim.
    Unclaim { redacts: String },
    Ignore(&'static str),
}

/// A precondition applied before a handler runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Guard {
    /// Drop events whose subject is the bot itself.
    IgnoreSelf,
    /// Drop events sent by agents.
    IgnoreAgent,
    /// Hold the room's lock for the rest of the handler.
    SerializeByRoom,
    /// Drop events in rooms without a case.
    RequireCase,
}

impl Route {
    /// Classify an event against the current settings.
    pub fn classify(event: &PortalEvent, settings: &PortalSettings, bot_id: &str) -> Route {
        if let EventKind::Invite { target, .. } = &event.kind {
            return if target == bot_id {
                Route::Invite
            } else {
                Route::Ignore("invite for another user")
            };
        }

        if settings.is_control_room(&event.room_id) {
            return match &event.kind {
                EventKind::Join { .. } => Route::AgentJoined,
                EventKind::Leave { .. } => Route::AgentLeft,
                EventKind::Reaction { relates_to, key } => {
                    if claim::is_claim_key(key) {
                        Route::Claim {
                            control_event: relates_to.clone(),
                        }
                    } else if claim::is_reject_key(key) {
                        Route::Reject
                    } else {
                        Route::Ignore("unrelated reaction")
                    }
                }
                EventKind::Message {
                    body,
                    reply_to: Some(reply_to),
                } if claim::contains_claim_marker(body) => Route::Claim {
                    control_event: reply_to.clone(),
                },
                EventKind::Redaction { redacts } => Route::Unclaim {
                    redacts: redacts.clone(),
                },
                _ => Route::Ignore("control room chatter"),
            };
        }

        match &event.kind {
            EventKind::Join { .. } => Route::CaseJoin,
            EventKind::Leave { .. } => Route::CaseLeave,
            EventKind::ProfileChange { .. } => Route::ProfileChange,
            EventKind::RoomName { .. } => Route::RoomName,
            EventKind::Message { .. } => Route::CaseMessage,
            _ => Route::Ignore("not a case event"),
        }
    }

    /// Guards for this route, in the order they apply.
    pub fn guards(&self) -> &'static [Guard] {
        use Guard::*;
        match self {
            Route::Invite => &[SerializeByRoom],
            Route::AgentJoined | Route::AgentLeft => &[IgnoreSelf],
            Route::CaseJoin | Route::CaseLeave | Route::ProfileChange | Route::RoomName => {
                &[IgnoreSelf, SerializeByRoom, RequireCase]
            }
            Route::CaseMessage => &[IgnoreSelf, IgnoreAgent, SerializeByRoom, RequireCase],
            // Claims lock the case room once the control event is resolved
            Route::Claim { .. } | Route::Unclaim { .. } | Route::Reject => &[IgnoreSelf],
            Route::Ignore(_) => &[],
        }
    }
}

/// The user an event is about: the state key for membership, else the sender.
pub fn subject(event: &PortalEvent) -> &str {
    match &event.kind {
        EventKind::Join { user_id, .. }
        | EventKind::Leave { user_id }
        | EventKind::ProfileChange { user_id, .. } => user_id,
        EventKind::Invite { target, .. } => target,
        _ => &event.sender,
    }
}

/// State handed to a handler by the guard chain.
pub struct Admission {
    pub settings: Arc<PortalSettings>,
    pub guard: Option<RoomGuard>,
    pub case: Option<Case>,
}

pub enum Admit {
    Admitted(Admission),
    Skipped(&'static str),
}

impl<T: Transport> Coordinator<T> {
    /// Run the guard chain for a route.
    pub(crate) async fn admit(
        &self,
        event: &PortalEvent,
        route: &Route,
        settings: Arc<PortalSettings>,
    ) -> Result<Admit, PortalError> {
        if let Route::Ignore(reason) = route {
            return Ok(Admit::Skipped(*reason));
        }

        let mut admission = Admission {
            settings,
            guard: None,
            case: None,
        };

        for guard in route.guards() {
            match guard {
                Guard::IgnoreSelf => {
                    if subject(event) == self.transport.user_id() {
                        return Ok(Admit::Skipped("own event"));
                    }
                }
                Guard::IgnoreAgent => {
                    if event.sender == self.transport.user_id() {
                        return Ok(Admit::Skipped("own event"));
                    }
                    if self.agents.contains(&event.sender).await {
                        return Ok(Admit::Skipped("sent by agent"));
                    }
                }
                Guard::SerializeByRoom => {
                    admission.guard = Some(self.locks.lock(&event.room_id).await);
                }
                Guard::RequireCase => match self.load_case(&event.room_id).await? {
                    Some(case) => admission.case = Some(case),
                    None => return Ok(Admit::Skipped("no case for room")),
                },
            }
        }

        Ok(Admit::Admitted(admission))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BOT: &str = "@bot:example.org";
    const CONTROL: &str = "!control:example.org";

    fn settings() -> PortalSettings {
        PortalSettings::default().with_control_room(CONTROL)
    }

    fn event(room_id: &str, kind: EventKind) -> PortalEvent {
        PortalEvent::new(room_id, "$evt", "@alice:example.org", 0, kind)
    }

    #[test]
    fn test_invites() {
        let own = event(
            "!case:x",
            EventKind::Invite {
                target: BOT.to_string(),
                is_direct: true,
            },
        );
        assert_eq!(Route::classify(&own, &settings(), BOT), Route::Invite);

        let other = event(
            "!case:x",
            EventKind::Invite {
                target: "@carol:x".to_string(),
                is_direct: true,
            },
        );
        assert!(matches!(
            Route::classify(&other, &settings(), BOT),
            Route::Ignore(_)
        ));
    }

    #[test]
    fn test_control_room_routes() {
        let reaction = event(
            CONTROL,
            EventKind::Reaction {
                relates_to: "$ctrl".to_string(),
                key: "\u{1F44D}\u{1F3FE}".to_string(),
            },
        );
        assert_eq!(
            Route::classify(&reaction, &settings(), BOT),
            Route::Claim {
                control_event: "$ctrl".to_string()
            }
        );

        let reply = event(
            CONTROL,
            EventKind::Message {
                body: "on it \u{1F44D}".to_string(),
                reply_to: Some("$ctrl".to_string()),
            },
        );
        assert_eq!(
            Route::classify(&reply, &settings(), BOT),
            Route::Claim {
                control_event: "$ctrl".to_string()
            }
        );

        let plain = event(
            CONTROL,
            EventKind::Message {
                body: "\u{1F44D}".to_string(),
                reply_to: None,
            },
        );
        assert!(matches!(
            Route::classify(&plain, &settings(), BOT),
            Route::Ignore(_)
        ));

        let reject = event(
            CONTROL,
            EventKind::Reaction {
                relates_to: "$ctrl".to_string(),
                key: "\u{1F44E}".to_string(),
            },
        );
        assert_eq!(Route::classify(&reject, &settings(), BOT), Route::Reject);

        let redaction = event(
            CONTROL,
            EventKind::Redaction {
                redacts: "$claim".to_string(),
            },
        );
        assert_eq!(
            Route::classify(&redaction, &settings(), BOT),
            Route::Unclaim {
                redacts: "$claim".to_string()
            }
        );

        let join = event(
            CONTROL,
            EventKind::Join {
                user_id: "@agent:x".to_string(),
                displayname: None,
            },
        );
        assert_eq!(Route::classify(&join, &settings(), BOT), Route::AgentJoined);
    }

    #[test]
    fn test_case_room_routes() {
        let message = event(
            "!case:x",
            EventKind::Message {
                body: "help".to_string(),
                reply_to: None,
            },
        );
        assert_eq!(
            Route::classify(&message, &settings(), BOT),
            Route::CaseMessage
        );

        // Reactions outside the control room never claim
        let reaction = event(
            "!case:x",
            EventKind::Reaction {
                relates_to: "$x".to_string(),
                key: "\u{1F44D}".to_string(),
            },
        );
        assert!(matches!(
            Route::classify(&reaction, &settings(), BOT),
            Route::Ignore(_)
        ));
    }

    #[test]
    fn test_guard_order() {
        assert_eq!(
            Route::CaseMessage.guards(),
            &[
                Guard::IgnoreSelf,
                Guard::IgnoreAgent,
                Guard::SerializeByRoom,
                Guard::RequireCase
            ]
        );
        assert!(Route::Ignore("x").guards().is_empty());
    }

    #[test]
    fn test_subject() {
        let leave = PortalEvent::new(
            "!case:x",
            "$e",
            "@admin:x",
            0,
            EventKind::Leave {
                user_id: "@kicked:x".to_string(),
            },
        );
        assert_eq!(subject(&leave), "@kicked:x");
    }
}
