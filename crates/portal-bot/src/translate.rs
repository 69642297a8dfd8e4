//! Turn `/sync` payloads into coordinator events.
//!
//! Membership changes are classified from the new and previous content:
//! - join after join is a profile change (if the display name changed)
//! - join after anything else is a join
//! - leave or ban after join is a leave
//!
//! Invites for the bot come only from the `invite` section of a sync.

use matrix_sdk::sync::SyncResponse;
use portal::{EventKind, PortalEvent};
use ruma::events::room::member::{MembershipState, RoomMemberEventContent};
use ruma::events::room::message::Relation;
use ruma::events::room::redaction::SyncRoomRedactionEvent;
use ruma::events::{
    AnyStrippedStateEvent, AnySyncMessageLikeEvent, AnySyncStateEvent, AnySyncTimelineEvent,
    SyncMessageLikeEvent, SyncStateEvent,
};
use ruma::serde::Raw;
use ruma::OwnedUserId;
use tracing::debug;

/// Events of one room, in delivery order.
pub type RoomBatch = (String, Vec<PortalEvent>);

/// Translate a sync response into per-room batches.
///
/// Pending invites always come through. Timelines are skipped when
/// `include_timeline` is false, which is used to drop the backlog of a first
/// sync without a stored token.
pub fn translate_sync(bot_id: &str, sync: &SyncResponse, include_timeline: bool) -> Vec<RoomBatch> {
    let mut batches = Vec::new();

    for (room_id, room) in &sync.rooms.invite {
        if let Some(event) = translate_invite(bot_id, room_id.as_str(), &room.invite_state.events) {
            batches.push((room_id.to_string(), vec![event]));
        }
    }

    if include_timeline {
        for (room_id, room) in &sync.rooms.join {
            let events =
                translate_timeline(room_id.as_str(), room.timeline.events.iter().map(|e| e.raw()));
            if !events.is_empty() {
                batches.push((room_id.to_string(), events));
            }
        }
    }

    batches
}

/// The bot's own pending invite, found in a room's stripped state.
pub fn translate_invite(
    bot_id: &str,
    room_id: &str,
    invite_state: &[Raw<AnyStrippedStateEvent>],
) -> Option<PortalEvent> {
    let invite = invite_state.iter().find_map(|raw| match raw.deserialize() {
        Ok(AnyStrippedStateEvent::RoomMember(member)) if member.state_key == bot_id => {
            Some(member)
        }
        _ => None,
    })?;
    if invite.content.membership != MembershipState::Invite {
        return None;
    }

    Some(PortalEvent::new(
        room_id,
        format!("invite:{}", room_id),
        invite.sender.to_string(),
        0,
        EventKind::Invite {
            target: bot_id.to_string(),
            is_direct: invite.content.is_direct.unwrap_or(false),
        },
    ))
}

/// Translate a room timeline, dropping events that do not parse or matter.
pub fn translate_timeline<'a>(
    room_id: &str,
    events: impl IntoIterator<Item = &'a Raw<AnySyncTimelineEvent>>,
) -> Vec<PortalEvent> {
    events
        .into_iter()
        .filter_map(|raw| match raw.deserialize() {
            Ok(event) => translate_event(room_id, &event),
            Err(e) => {
                debug!(room_id, "Skipping undecodable event: {}", e);
                None
            }
        })
        .collect()
}

/// Translate one timeline event. Unrelated events yield `None`.
pub fn translate_event(room_id: &str, event: &AnySyncTimelineEvent) -> Option<PortalEvent> {
    let kind = match event {
        AnySyncTimelineEvent::State(state) => state_kind(state)?,
        AnySyncTimelineEvent::MessageLike(message) => message_kind(message)?,
    };

    Some(PortalEvent::new(
        room_id,
        event.event_id().to_string(),
        event.sender().to_string(),
        i64::from(event.origin_server_ts().0),
        kind,
    ))
}

fn state_kind(event: &AnySyncStateEvent) -> Option<EventKind> {
    match event {
        AnySyncStateEvent::RoomMember(SyncStateEvent::Original(member)) => member_kind(
            member.state_key.clone(),
            &member.content,
            member.unsigned.prev_content.as_ref(),
        ),
        AnySyncStateEvent::RoomName(SyncStateEvent::Original(name)) => Some(EventKind::RoomName {
            name: name.content.name.clone(),
        }),
        _ => None,
    }
}

fn message_kind(event: &AnySyncMessageLikeEvent) -> Option<EventKind> {
    match event {
        AnySyncMessageLikeEvent::RoomMessage(SyncMessageLikeEvent::Original(message)) => {
            let body = message.content.body();
            match &message.content.relates_to {
                // Edits never claim or resurface anything
                Some(Relation::Replacement(_)) => None,
                Some(Relation::Reply { in_reply_to }) => Some(EventKind::Message {
                    body: strip_reply_fallback(body).to_string(),
                    reply_to: Some(in_reply_to.event_id.to_string()),
                }),
                _ => Some(EventKind::Message {
                    body: body.to_string(),
                    reply_to: None,
                }),
            }
        }
        AnySyncMessageLikeEvent::Reaction(SyncMessageLikeEvent::Original(reaction)) => {
            let annotation = &reaction.content.relates_to;
            Some(EventKind::Reaction {
                relates_to: annotation.event_id.to_string(),
                key: annotation.key.clone(),
            })
        }
        AnySyncMessageLikeEvent::RoomRedaction(SyncRoomRedactionEvent::Original(redaction)) => {
            // Pre-v11 rooms put the target at the top level
            let redacts = redaction
                .redacts
                .as_ref()
                .or(redaction.content.redacts.as_ref())?;
            Some(EventKind::Redaction {
                redacts: redacts.to_string(),
            })
        }
        _ => None,
    }
}

fn member_kind(
    user_id: OwnedUserId,
    content: &RoomMemberEventContent,
    prev: Option<&RoomMemberEventContent>,
) -> Option<EventKind> {
    let user_id = user_id.to_string();
    let was_joined = prev.is_some_and(|p| p.membership == MembershipState::Join);

    match content.membership {
        MembershipState::Join if was_joined => {
            let old_name = prev.and_then(|p| p.displayname.as_deref());
            if old_name == content.displayname.as_deref() {
                return None;
            }
            Some(EventKind::ProfileChange {
                user_id,
                displayname: content.displayname.clone(),
            })
        }
        MembershipState::Join => Some(EventKind::Join {
            user_id,
            displayname: content.displayname.clone(),
        }),
        MembershipState::Leave | MembershipState::Ban if was_joined => {
            Some(EventKind::Leave { user_id })
        }
        _ => None,
    }
}

/// Drop the quoted `> ` lines older clients put in front of a reply.
fn strip_reply_fallback(body: &str) -> &str {
    let mut rest = body;
    while rest.starts_with('>') {
        rest = match rest.find('\n') {
            Some(end) => &rest[end + 1..],
            None => "",
        };
    }
    rest.trim()
}
