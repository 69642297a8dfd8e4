//! Per-room ordered dispatch of the sync stream.
//!
//! Every room gets a chain of tasks: a new batch for a room starts only after
//! the previous batch for the same room finished, while different rooms are
//! handled concurrently.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use database::{sync_state, Database};
use futures::StreamExt;
use matrix_sdk::Client;
use portal::{Coordinator, HandleOutcome, PortalEvent, Transport};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::save_control_room;
use crate::error::BotError;
use crate::sync::{sync_stream, SyncOptions};
use crate::translate::{translate_sync, RoomBatch};

/// Feeds translated events to the coordinator, preserving per-room order.
pub struct Dispatcher<T: Transport + 'static> {
    coordinator: Arc<Coordinator<T>>,
    config_path: Option<PathBuf>,
    chains: HashMap<String, JoinHandle<()>>,
}

impl<T: Transport + 'static> Dispatcher<T> {
    /// `config_path` receives the control room when one gets registered.
    pub fn new(coordinator: Arc<Coordinator<T>>, config_path: Option<PathBuf>) -> Self {
        Self {
            coordinator,
            config_path,
            chains: HashMap::new(),
        }
    }

    /// Queue several rooms' events.
    pub fn dispatch(&mut self, batches: Vec<RoomBatch>) {
        for (room_id, events) in batches {
            self.dispatch_room(room_id, events);
        }
    }

    /// Queue a room's events behind whatever is still running for that room.
    pub fn dispatch_room(&mut self, room_id: String, events: Vec<PortalEvent>) {
        self.chains.retain(|_, handle| !handle.is_finished());

        let previous = self.chains.remove(&room_id);
        let coordinator = Arc::clone(&self.coordinator);
        let config_path = self.config_path.clone();

        let handle = tokio::spawn(async move {
            if let Some(previous) = previous {
                if let Err(e) = previous.await {
                    error!("Previous room task failed: {}", e);
                }
            }
            for event in events {
                handle_event(&coordinator, event, config_path.as_ref()).await;
            }
        });
        self.chains.insert(room_id, handle);
    }

    /// Rooms with work still in flight.
    pub fn pending(&mut self) -> usize {
        self.chains.retain(|_, handle| !handle.is_finished());
        self.chains.len()
    }

    /// Wait for everything queued so far.
    pub async fn drain(&mut self) {
        for (room_id, handle) in self.chains.drain() {
            if let Err(e) = handle.await {
                error!(room_id = %room_id, "Room task failed: {}", e);
            }
        }
    }
}

async fn handle_event<T: Transport>(
    coordinator: &Coordinator<T>,
    event: PortalEvent,
    config_path: Option<&PathBuf>,
) {
    let room_id = event.room_id.clone();
    match coordinator.handle(event).await {
        Ok(HandleOutcome::ControlRoomRegistered { room_id }) => {
            if let Some(path) = config_path {
                if let Err(e) = save_control_room(path, &room_id) {
                    error!(room_id = %room_id, "Failed to save control room: {}", e);
                }
            }
        }
        Ok(_) => {}
        Err(e) => {
            warn!(room_id = %room_id, "Event failed: {}", e);
        }
    }
}

/// Run the sync loop until `shutdown` resolves or the stream gives up.
///
/// The `next_batch` token is stored after each batch is dispatched. Without a
/// stored token the first batch's timelines are skipped so old history is not
/// replayed, but pending invites are still handled.
pub async fn run<T, S>(
    client: Client,
    coordinator: Arc<Coordinator<T>>,
    db: Database,
    options: SyncOptions,
    config_path: Option<PathBuf>,
    shutdown: S,
) -> Result<(), BotError>
where
    T: Transport + 'static,
    S: std::future::Future<Output = ()> + Send,
{
    let since = sync_state::get_value(db.pool(), sync_state::NEXT_BATCH_KEY).await?;
    let mut skip_backlog = since.is_none();
    info!(resume = !skip_backlog, "Starting sync loop");

    let bot_id = client
        .user_id()
        .map(ToString::to_string)
        .ok_or(BotError::NoSession)?;
    let mut stream = sync_stream(client, since, options);
    let mut dispatcher = Dispatcher::new(coordinator, config_path);

    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            biased;

            () = &mut shutdown => {
                info!("Shutdown signal received, waiting for room tasks");
                dispatcher.drain().await;
                return Ok(());
            }

            item = stream.next() => {
                match item {
                    Some(Ok(batch)) => {
                        let batches = translate_sync(&bot_id, &batch, !skip_backlog);
                        if skip_backlog {
                            debug!("Skipped initial sync backlog");
                            skip_backlog = false;
                        }
                        dispatcher.dispatch(batches);
                        sync_state::set_value(
                            db.pool(),
                            sync_state::NEXT_BATCH_KEY,
                            &batch.next_batch,
                        )
                        .await?;
                    }
                    Some(Err(e)) => {
                        warn!("Sync error: {}", e);
                    }
                    None => {
                        warn!("Sync stream ended");
                        dispatcher.drain().await;
                        return Err(BotError::StreamEnded);
                    }
                }
            }
        }
    }
}
