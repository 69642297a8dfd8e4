//! `/sync` as a stream of responses.
//!
//! The first request asks for full state so the client's in-memory store
//! knows every joined room and its members before events are handled.

use std::time::Duration;

use futures::stream::{self, BoxStream, StreamExt};
use matrix_sdk::config::SyncSettings;
use matrix_sdk::sync::SyncResponse;
use matrix_sdk::Client;
use tracing::{debug, warn};

/// Doubling retry delay, capped, reset on success.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Backoff {
    base: Duration,
    cap: Duration,
    failures: u32,
}

impl Backoff {
    pub fn new(base: Duration, cap: Duration) -> Self {
        Self {
            base,
            cap,
            failures: 0,
        }
    }

    /// Consecutive failures since the last success.
    pub fn failures(&self) -> u32 {
        self.failures
    }

    /// Record a failure and return how long to wait before retrying.
    pub fn fail(&mut self) -> Duration {
        let shift = self.failures.min(16);
        self.failures = self.failures.saturating_add(1);
        self.base.saturating_mul(1 << shift).min(self.cap)
    }

    pub fn reset(&mut self) {
        self.failures = 0;
    }
}

/// Tuning for [`sync_stream`].
#[derive(Debug, Clone)]
pub struct SyncOptions {
    /// Server-side long-poll timeout.
    pub timeout: Duration,
    pub retry_base: Duration,
    pub retry_cap: Duration,
    /// Consecutive failures before the stream ends. `None` retries forever.
    pub max_failures: Option<u32>,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            retry_base: Duration::from_millis(500),
            retry_cap: Duration::from_secs(60),
            max_failures: None,
        }
    }
}

pub type SyncStream = BoxStream<'static, Result<SyncResponse, matrix_sdk::Error>>;

struct Cursor {
    client: Client,
    token: Option<String>,
    full_state: bool,
    backoff: Backoff,
    pending_delay: Option<Duration>,
    options: SyncOptions,
}

/// Sync from `since` until `max_failures` consecutive errors.
///
/// Errors are yielded so the caller can log them, then retried after the
/// backoff delay.
pub fn sync_stream(client: Client, since: Option<String>, options: SyncOptions) -> SyncStream {
    let cursor = Cursor {
        client,
        token: since,
        full_state: true,
        backoff: Backoff::new(options.retry_base, options.retry_cap),
        pending_delay: None,
        options,
    };

    stream::unfold(cursor, |mut cursor| async move {
        if let Some(delay) = cursor.pending_delay.take() {
            if cursor
                .options
                .max_failures
                .is_some_and(|max| cursor.backoff.failures() >= max)
            {
                warn!(failures = cursor.backoff.failures(), "Giving up on sync");
                return None;
            }
            debug!(?delay, "Retrying sync");
            tokio::time::sleep(delay).await;
        }

        let mut settings = SyncSettings::default()
            .timeout(cursor.options.timeout)
            .full_state(cursor.full_state);
        if let Some(token) = &cursor.token {
            settings = settings.token(token.clone());
        }

        match cursor.client.sync_once(settings).await {
            Ok(response) => {
                cursor.token = Some(response.next_batch.clone());
                cursor.full_state = false;
                cursor.backoff.reset();
                Some((Ok(response), cursor))
            }
            Err(e) => {
                cursor.pending_delay = Some(cursor.backoff.fail());
                Some((Err(e), cursor))
            }
        }
    })
    .boxed()
}
