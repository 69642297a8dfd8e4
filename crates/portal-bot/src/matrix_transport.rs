//! `Transport` backed by a matrix-sdk [`Client`].

use async_trait::async_trait;
use matrix_sdk::authentication::matrix::MatrixSession;
use matrix_sdk::authentication::SessionTokens;
use matrix_sdk::room::Room;
use matrix_sdk::{Client, RoomMemberships, SessionMeta};
use portal::{MemberInfo, Members, Transport, TransportError};
use ruma::events::relation::Replacement;
use ruma::events::room::message::{Relation, RoomMessageEventContent};
use ruma::{EventId, OwnedDeviceId, RoomId, UserId};
use tracing::info;

use crate::config::BotConfig;
use crate::error::BotError;

/// Build a client for the configured homeserver and restore the bot's
/// access-token session. Nothing is persisted, the first sync fills the
/// in-memory state store.
pub async fn connect(config: &BotConfig) -> Result<Client, BotError> {
    let client = Client::builder()
        .homeserver_url(&config.homeserver)
        .build()
        .await?;

    let session = MatrixSession {
        meta: SessionMeta {
            user_id: UserId::parse(&config.user_id)?,
            device_id: OwnedDeviceId::from(config.device_id.as_str()),
        },
        tokens: SessionTokens {
            access_token: config.access_token.clone(),
            refresh_token: None,
        },
    };
    client.restore_session(session).await?;

    info!(user_id = %config.user_id, homeserver = %config.homeserver, "Session restored");
    Ok(client)
}

/// Adapts a matrix-sdk [`Client`] to the coordinator's transport trait.
#[derive(Clone)]
pub struct MatrixTransport {
    client: Client,
    user_id: String,
}

impl MatrixTransport {
    pub fn new(client: Client, user_id: impl Into<String>) -> Self {
        Self {
            client,
            user_id: user_id.into(),
        }
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    fn room(&self, operation: &'static str, room_id: &str) -> Result<Room, TransportError> {
        let room_id = RoomId::parse(room_id).map_err(transport_error(operation))?;
        self.client
            .get_room(&room_id)
            .ok_or_else(|| TransportError::new(operation, format!("unknown room {}", room_id)))
    }
}

fn transport_error<E: std::fmt::Display>(operation: &'static str) -> impl Fn(E) -> TransportError {
    move |e| TransportError::new(operation, e.to_string())
}

fn notice(markdown: &str) -> RoomMessageEventContent {
    RoomMessageEventContent::notice_markdown(markdown)
}

#[async_trait]
impl Transport for MatrixTransport {
    fn user_id(&self) -> &str {
        &self.user_id
    }

    async fn join_room(&self, room_id: &str) -> Result<(), TransportError> {
        let room_id = RoomId::parse(room_id).map_err(transport_error("join"))?;
        self.client
            .join_room_by_id(&room_id)
            .await
            .map(|_| ())
            .map_err(transport_error("join"))
    }

    async fn invite_user(&self, room_id: &str, user_id: &str) -> Result<(), TransportError> {
        let room = self.room("invite", room_id)?;
        let user_id = UserId::parse(user_id).map_err(transport_error("invite"))?;
        room.invite_user_by_id(&user_id)
            .await
            .map_err(transport_error("invite"))
    }

    async fn send_markdown(&self, room_id: &str, markdown: &str) -> Result<String, TransportError> {
        let room = self.room("send", room_id)?;
        let response = room
            .send(notice(markdown))
            .await
            .map_err(transport_error("send"))?;
        Ok(response.event_id.to_string())
    }

    async fn edit_markdown(
        &self,
        room_id: &str,
        event_id: &str,
        markdown: &str,
    ) -> Result<(), TransportError> {
        let room = self.room("edit", room_id)?;
        let original = EventId::parse(event_id).map_err(transport_error("edit"))?;

        // Clients without edit support show the `* ` fallback body
        let mut content = notice(&format!("* {}", markdown));
        content.relates_to = Some(Relation::Replacement(Replacement::new(
            original,
            notice(markdown).into(),
        )));

        room.send(content)
            .await
            .map(|_| ())
            .map_err(transport_error("edit"))
    }

    async fn redact(
        &self,
        room_id: &str,
        event_id: &str,
        reason: Option<&str>,
    ) -> Result<(), TransportError> {
        let room = self.room("redact", room_id)?;
        let event_id = EventId::parse(event_id).map_err(transport_error("redact"))?;
        room.redact(&event_id, reason, None)
            .await
            .map(|_| ())
            .map_err(transport_error("redact"))
    }

    async fn joined_members(&self, room_id: &str) -> Result<Members, TransportError> {
        let room = self.room("joined_members", room_id)?;
        let members = room
            .members(RoomMemberships::JOIN)
            .await
            .map_err(transport_error("joined_members"))?;
        Ok(members
            .into_iter()
            .map(|member| {
                (
                    member.user_id().to_string(),
                    MemberInfo {
                        displayname: member.display_name().map(str::to_string),
                    },
                )
            })
            .collect())
    }

    async fn member_displayname(
        &self,
        room_id: &str,
        user_id: &str,
    ) -> Result<Option<String>, TransportError> {
        let room = self.room("member_state", room_id)?;
        let user_id = UserId::parse(user_id).map_err(transport_error("member_state"))?;
        let member = room
            .get_member(&user_id)
            .await
            .map_err(transport_error("member_state"))?;
        Ok(member.and_then(|m| m.display_name().map(str::to_string)))
    }

    async fn room_name(&self, room_id: &str) -> Result<Option<String>, TransportError> {
        Ok(self.room("room_name", room_id)?.name())
    }
}
