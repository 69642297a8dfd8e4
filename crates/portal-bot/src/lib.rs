//! Matrix front end for the support portal.
//!
//! Turns `/sync` responses into [`portal::PortalEvent`]s, feeds them to a
//! [`portal::Coordinator`] with per-room ordering, and keeps the settings in
//! step with the config file.
//!
//! ```toml
//! homeserver = "https://matrix.example.org"
//! user_id = "@support:example.org"
//! sqlite_path = "portal.db"
//! new_user_cooldown_ms = 300000
//! new_message_cooldown_ms = 60000
//!
//! [templates]
//! welcome = "Hi {{ case.displayname }}, an agent will be with you soon."
//! case_status = "{{ case.room_name }}: {{ agents|join(', ') if agents else 'waiting' }}"
//! ```
//!
//! `MATRIX_ACCESS_TOKEN` is read from the environment. `control_room` is
//! written back to the file when the bot is first invited to a room.

pub mod config;
pub mod dispatcher;
pub mod error;
pub mod matrix_transport;
pub mod sync;
pub mod translate;
pub mod watcher;

pub use config::{save_control_room, BotConfig, ConfigError, CONFIG_PATH_VAR};
pub use dispatcher::{run, Dispatcher};
pub use error::BotError;
pub use matrix_transport::MatrixTransport;
pub use sync::{sync_stream, Backoff, SyncOptions};
pub use translate::{translate_event, translate_invite, translate_sync, translate_timeline, RoomBatch};
pub use watcher::{is_config_event, reload, watch_config, ConfigWatcher};
