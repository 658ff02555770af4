use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use log::{error, info, warn};
use tokio::time::interval;

use watchroom_core::now_millis;

use crate::bus::BroadcastBus;
use crate::durable::DurableStore;
use crate::events::ServerEvent;
use crate::registry::ClientRegistry;
use crate::repository::RoomRepository;
use crate::config::RuntimeConfig;

const SWEEP_INTERVAL: Duration = Duration::from_secs(10 * 60);
const SNAPSHOT_INTERVAL: Duration = Duration::from_secs(10 * 60);
const REVERSE_SYNC_INTERVAL: Duration = Duration::from_secs(60 * 60);
const DAILY_INTEGRITY_INTERVAL: Duration = Duration::from_secs(24 * 60 * 60);
const ORPHAN_ROOMLESS_TIMEOUT: Duration = Duration::from_secs(24 * 60 * 60);
const SNAPSHOT_BATCH_SIZE: usize = 100;
const SNAPSHOT_RETRY_ATTEMPTS: usize = 3;
const SNAPSHOT_RETRY_DELAY: Duration = Duration::from_secs(2);
const BACKOFF_BASE: Duration = Duration::from_secs(1);
const BACKOFF_MAX_ATTEMPTS: u32 = 3;
const DAILY_INTEGRITY_HOUR_UTC: u32 = 3;

/// The set of background workers that keep stored rooms honest over
/// time - evicting inactive ones, reconciling the durable snapshot with
/// the shared store, and rebuilding the shared store from the durable
/// snapshot on a cold start.
pub struct LifecycleWorker {
    repository: Arc<RoomRepository>,
    registry: Arc<ClientRegistry>,
    bus: Arc<BroadcastBus>,
    durable: Arc<dyn DurableStore>,
    config: Arc<RuntimeConfig>,
}

impl LifecycleWorker {
    pub fn new(
        repository: Arc<RoomRepository>,
        registry: Arc<ClientRegistry>,
        bus: Arc<BroadcastBus>,
        durable: Arc<dyn DurableStore>,
        config: Arc<RuntimeConfig>,
    ) -> Self {
        Self {
            repository,
            registry,
            bus,
            durable,
            config,
        }
    }

    /// Spawns every background loop and performs the one-time startup
    /// reverse-sync (restoring rooms from the durable snapshot into the
    /// shared store, so a fleet recovering from a total shared-store
    /// loss doesn't start with an empty room set).
    pub async fn start(self: Arc<Self>) {
        self.reverse_sync_once("startup").await;

        tokio::spawn({
            let worker = self.clone();
            async move { worker.run_inactivity_sweep().await }
        });

        tokio::spawn({
            let worker = self.clone();
            async move { worker.run_snapshot_loop().await }
        });

        tokio::spawn({
            let worker = self.clone();
            async move { worker.run_reverse_sync_loop().await }
        });

        tokio::spawn({
            let worker = self.clone();
            async move { worker.run_daily_integrity_loop().await }
        });
    }

    async fn run_inactivity_sweep(&self) {
        let mut ticker = interval(SWEEP_INTERVAL);
        loop {
            ticker.tick().await;
            if let Err(e) = self.sweep_inactive_rooms().await {
                warn!("inactivity sweep failed: {e}");
            }
            if let Err(e) = self.purge_orphan_clients().await {
                warn!("orphan-client cleanup failed: {e}");
            }
        }
    }

    /// For every persisted `client:<id>` record: if it has no `roomId`,
    /// drop it once it's over a day stale; if its `roomId` points at a
    /// room that no longer exists, drop it unconditionally.
    async fn purge_orphan_clients(&self) -> crate::Result<()> {
        let now = now_millis();

        for client_id in self.registry.list_persisted_ids().await? {
            let fields = self.registry.persisted_fields(&client_id).await?;
            if fields.is_empty() {
                continue;
            }

            let room_id = fields.get("roomId").filter(|s| !s.is_empty());
            let last_seen: u64 = fields
                .get("lastSeen")
                .and_then(|v| v.parse().ok())
                .unwrap_or(0);

            let orphaned = match room_id {
                None => Duration::from_millis(now.saturating_sub(last_seen)) > ORPHAN_ROOMLESS_TIMEOUT,
                Some(room_id) => !self.repository.exists_id(room_id).await?,
            };

            if orphaned {
                info!("purging orphan client record {client_id}");
                self.registry.delete_persisted_record(&client_id).await?;
            }
        }

        Ok(())
    }

    /// Evicts rooms that have had no activity for longer than their
    /// (possibly video-extended) timeout, and rooms left with no members
    /// at all. Closing broadcasts `roomClosed` the same way an explicit
    /// `closeRoom` command does, so every process's listener tears down
    /// local membership consistently.
    async fn sweep_inactive_rooms(&self) -> crate::Result<()> {
        let room_ids = self.repository.list_ids().await?;
        let now = now_millis();

        for room_id in room_ids {
            let room = match self.repository.load(&room_id).await {
                Ok(room) => room,
                Err(e) => {
                    warn!("skipping room {room_id} during sweep: {e}");
                    continue;
                }
            };

            let playing_duration = room.playing_now.as_ref().map(|v| v.duration);
            let timeout = self.config.timeout_for(playing_duration);
            let idle_for = Duration::from_millis(now.saturating_sub(room.last_activity));

            if room.is_empty() || idle_for >= timeout {
                info!("evicting room {room_id} (empty={}, idle_for={idle_for:?})", room.is_empty());

                self.bus
                    .broadcast(
                        &room_id,
                        &ServerEvent::RoomClosed {
                            reason: "Room closed due to inactivity".into(),
                        },
                    )
                    .await?;

                self.bus.forget(&room_id);
                self.repository.delete(&room_id).await?;
                self.durable.delete_room(&room_id).await?;

                for member in &room.clients {
                    self.registry.unbind(member).await.ok();
                }
            }
        }

        Ok(())
    }

    async fn run_snapshot_loop(&self) {
        let mut ticker = interval(SNAPSHOT_INTERVAL);
        loop {
            ticker.tick().await;
            self.snapshot_all_rooms().await;
        }
    }

    /// Copies every currently-known room into the durable store in
    /// batches, retrying each batch up to [`SNAPSHOT_RETRY_ATTEMPTS`]
    /// times with a fixed delay between attempts. A batch that still
    /// fails after retrying is logged and skipped rather than blocking
    /// the rest of the sweep.
    async fn snapshot_all_rooms(&self) {
        let room_ids = match self.repository.list_ids().await {
            Ok(ids) => ids,
            Err(e) => {
                warn!("snapshot pass could not list rooms: {e}");
                return;
            }
        };

        for chunk in room_ids.chunks(SNAPSHOT_BATCH_SIZE) {
            for room_id in chunk {
                let room = match self.repository.load(room_id).await {
                    Ok(room) => room,
                    Err(e) => {
                        warn!("snapshot skipping room {room_id}: {e}");
                        continue;
                    }
                };

                let mut attempts = 0;
                loop {
                    match self.durable.save_room(&room).await {
                        Ok(()) => break,
                        Err(e) => {
                            attempts += 1;
                            if attempts >= SNAPSHOT_RETRY_ATTEMPTS {
                                error!("giving up snapshotting room {room_id} after {attempts} attempts: {e}");
                                break;
                            }
                            tokio::time::sleep(SNAPSHOT_RETRY_DELAY).await;
                        }
                    }
                }
            }
        }
    }

    async fn run_reverse_sync_loop(&self) {
        let mut ticker = interval(REVERSE_SYNC_INTERVAL);
        loop {
            ticker.tick().await;
            self.reverse_sync_once("scheduled").await;
        }
    }

    /// Restores any durably-snapshotted room that is missing from the
    /// shared store, with exponential backoff on transient failures.
    async fn reverse_sync_once(&self, reason: &str) {
        let mut attempt = 0;

        loop {
            match self.try_reverse_sync().await {
                Ok(restored) => {
                    if restored > 0 {
                        info!("{reason} reverse-sync restored {restored} room(s)");
                    }
                    return;
                }
                Err(e) => {
                    attempt += 1;
                    if attempt >= BACKOFF_MAX_ATTEMPTS {
                        error!("{reason} reverse-sync failed after {attempt} attempts: {e}");
                        return;
                    }
                    tokio::time::sleep(BACKOFF_BASE * 2u32.pow(attempt - 1)).await;
                }
            }
        }
    }

    async fn try_reverse_sync(&self) -> crate::Result<usize> {
        let rooms = self.durable.load_all_rooms().await?;
        let mut restored = 0;

        for room in rooms {
            if !self.repository.exists_id(&room.id).await? {
                self.repository.create(room).await?;
                restored += 1;
            }
        }

        Ok(restored)
    }

    /// Sleeps until the next occurrence of [`DAILY_INTEGRITY_HOUR_UTC`],
    /// then runs the data-integrity pass once every
    /// [`DAILY_INTEGRITY_INTERVAL`] thereafter.
    async fn run_daily_integrity_loop(&self) {
        tokio::time::sleep(duration_until_next_integrity_hour()).await;

        let mut ticker = interval(DAILY_INTEGRITY_INTERVAL);
        loop {
            ticker.tick().await;
            if let Err(e) = self.data_integrity_pass().await {
                warn!("daily integrity pass failed: {e}");
            }
        }
    }

    /// Drops `client:*` entries whose `roomId` references a missing
    /// room, then filters every room's `clients` down to those whose
    /// `client:*` record still exists.
    async fn data_integrity_pass(&self) -> crate::Result<()> {
        info!("running daily data-integrity pass");

        for client_id in self.registry.list_persisted_ids().await? {
            let fields = self.registry.persisted_fields(&client_id).await?;
            let Some(room_id) = fields.get("roomId").filter(|s| !s.is_empty()) else {
                continue;
            };

            if !self.repository.exists_id(room_id).await? {
                self.registry.delete_persisted_record(&client_id).await?;
            }
        }

        for room_id in self.repository.list_ids().await? {
            let room = match self.repository.load(&room_id).await {
                Ok(room) => room,
                Err(e) => {
                    warn!("integrity pass skipping room {room_id}: {e}");
                    continue;
                }
            };

            let mut live = HashSet::new();
            for client_id in &room.clients {
                if self.registry.client_record_exists(client_id).await? {
                    live.insert(client_id.clone());
                }
            }

            if live.len() == room.clients.len() {
                continue;
            }

            self.repository
                .mutate(&room_id, move |room| {
                    room.clients.retain(|c| live.contains(c));
                    Ok(())
                })
                .await?;
        }

        Ok(())
    }
}

/// The duration from now until the next UTC occurrence of
/// [`DAILY_INTEGRITY_HOUR_UTC`]:00:00, at least a few seconds out so the
/// first real tick never lands in the same instant the worker started.
fn duration_until_next_integrity_hour() -> Duration {
    let now = Utc::now();
    let mut next = now
        .date_naive()
        .and_hms_opt(DAILY_INTEGRITY_HOUR_UTC, 0, 0)
        .expect("valid time components")
        .and_utc();

    if next <= now {
        next += chrono::Duration::days(1);
    }

    (next - now).to_std().unwrap_or(Duration::from_secs(1))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn next_integrity_hour_is_in_the_future() {
        let wait = duration_until_next_integrity_hour();
        assert!(wait <= Duration::from_secs(24 * 60 * 60));
        assert!(wait > Duration::from_secs(0));
    }
}
