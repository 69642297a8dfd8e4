//! In-memory transport for exercising the portal coordinator.
//!
//! [`RecordingTransport`] implements `portal::Transport` against a scripted
//! view of rooms and members, and records every call the coordinator makes:
//! - joins and invites
//! - sent messages, with generated event IDs
//! - in-place edits and redactions
//!
//! Individual operations can be made to fail, and every call can be slowed
//! down to surface interleaving between concurrent handlers.
//!
//! # Example
//!
//! ```rust
//! use mock_transport::RecordingTransport;
//! use portal::Transport;
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() {
//!     let transport = RecordingTransport::new("@bot:example.org");
//!     let event_id = transport.send_markdown("!room:example.org", "hello").await.unwrap();
//!     assert_eq!(transport.sent_to("!room:example.org"), vec!["hello".to_string()]);
//!     assert!(event_id.starts_with('$'));
//! }
//! ```

mod recording;

pub use recording::{Edit, Op, Redaction, RecordingTransport, Sent};
