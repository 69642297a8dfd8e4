//! Bot-level errors.

use database::DatabaseError;
use portal::PortalError;
use thiserror::Error;

use crate::config::ConfigError;

#[derive(Debug, Error)]
pub enum BotError {
    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    #[error("database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("matrix error: {0}")]
    Matrix(#[from] matrix_sdk::Error),

    #[error("failed to build matrix client: {0}")]
    ClientBuild(#[from] matrix_sdk::ClientBuildError),

    #[error("invalid matrix id: {0}")]
    InvalidId(#[from] ruma::IdParseError),

    #[error("portal error: {0}")]
    Portal(#[from] PortalError),

    #[error("matrix client has no session")]
    NoSession,

    /// The sync stream gave up after repeated failures.
    #[error("sync stream ended")]
    StreamEnded,
}
