//! Error types for case coordination.

use database::DatabaseError;
use thiserror::Error;

/// A failed transport call (join, send, edit, redact, invite, state fetch).
#[derive(Debug, Clone, Error)]
#[error("{operation} failed: {message}")]
pub struct TransportError {
    pub operation: &'static str,
    pub message: String,
}

impl TransportError {
    pub fn new(operation: &'static str, message: impl Into<String>) -> Self {
        Self {
            operation,
            message: message.into(),
        }
    }
}

/// Template rendering failures.
#[derive(Debug, Clone, Error)]
pub enum RenderError {
    /// No template is configured under this name.
    #[error("template not found: {0}")]
    MissingTemplate(String),

    /// The template failed to parse or render.
    #[error("template {name}: {message}")]
    Template { name: String, message: String },
}

impl RenderError {
    pub(crate) fn template(name: &str, err: minijinja::Error) -> Self {
        Self::Template {
            name: name.to_string(),
            message: err.to_string(),
        }
    }
}

/// Errors that abort an event handler.
#[derive(Debug, Error)]
pub enum PortalError {
    /// The case store failed. Never masked.
    #[error("storage error: {0}")]
    Storage(#[from] DatabaseError),

    /// A transport call failed outside the invite flow.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// A message body could not be rendered.
    #[error("render error: {0}")]
    Render(#[from] RenderError),
}
