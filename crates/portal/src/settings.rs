//! Hot-reloadable coordinator settings.

use crate::render::TemplateSet;

pub const DEFAULT_NEW_USER_COOLDOWN_MS: i64 = 5 * 60 * 1000;
pub const DEFAULT_NEW_MESSAGE_COOLDOWN_MS: i64 = 60 * 1000;

/// Everything a config reload may change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortalSettings {
    /// Unset until the first invite registers a control room.
    pub control_room: Option<String>,
    pub templates: TemplateSet,
    /// Minimum gap between automated messages in a case room.
    pub new_user_cooldown_ms: i64,
    /// Minimum age of a control message before a new user message replaces it.
    pub new_message_cooldown_ms: i64,
}

impl Default for PortalSettings {
    fn default() -> Self {
        Self {
            control_room: None,
            templates: TemplateSet::default(),
            new_user_cooldown_ms: DEFAULT_NEW_USER_COOLDOWN_MS,
            new_message_cooldown_ms: DEFAULT_NEW_MESSAGE_COOLDOWN_MS,
        }
    }
}

impl PortalSettings {
    pub fn with_control_room(mut self, room_id: impl Into<String>) -> Self {
        self.control_room = Some(room_id.into());
        self
    }

    pub fn is_control_room(&self, room_id: &str) -> bool {
        self.control_room.as_deref() == Some(room_id)
    }
}
