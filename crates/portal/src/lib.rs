//! Case lifecycle coordination for a Matrix support control room.
//!
//! End users open a case by inviting the bot into a room. The bot announces
//! every case in a single control room, where agents claim cases by reacting
//! with 👍. The [`Coordinator`] keeps one status message per case up to date
//! as people join, leave, rename and write.
//!
//! The coordinator talks to the chat network only through the [`Transport`]
//! trait and stores everything through the `database` crate.
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use portal::{Coordinator, PortalSettings};
//!
//! let coordinator = Arc::new(Coordinator::new(transport, db, PortalSettings::default()));
//! coordinator.start().await?;
//! coordinator.handle(event).await?;
//! ```

pub mod agents;
pub mod claim;
pub mod clock;
pub mod coordinator;
pub mod error;
pub mod event;
pub mod locks;
pub mod members;
pub mod pipeline;
pub mod render;
pub mod settings;
pub mod transport;

pub use agents::AgentRegistry;
pub use clock::{Clock, ManualClock, SystemClock};
pub use coordinator::{Coordinator, HandleOutcome, CONTROL_ROOM_REGISTERED};
pub use error::{PortalError, RenderError, TransportError};
pub use event::{EventKind, PortalEvent};
pub use locks::{RoomLocks, DEFAULT_LOCK_CAPACITY};
pub use members::MembershipCache;
pub use pipeline::{Guard, Route};
pub use render::{RenderContext, TemplateSet};
pub use settings::PortalSettings;
pub use transport::{MemberInfo, Members, Transport};
