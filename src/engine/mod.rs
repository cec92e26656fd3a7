mod availability;
mod conflict;
mod error;
mod mutations;
mod queries;
mod validate;

pub use availability::{free_windows, merge_overlapping, opening_span, slot_availability, subtract_intervals};
pub use error::EngineError;

use std::io;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use dashmap::DashMap;
use tokio::sync::{RwLock, mpsc, oneshot};
use tracing::{error, info, warn};
use ulid::Ulid;

use crate::config::Schedule;
use crate::model::*;
use crate::wal::Wal;

pub type SharedResourceState = Arc<RwLock<ResourceState>>;

// ── Group-commit WAL channel ─────────────────────────────

pub(super) enum WalCommand {
    Append {
        event: Event,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        events: Vec<Event>,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

/// Background task that owns the WAL and batches appends for group commit.
/// 1. Block until the first Append arrives.
/// 2. Buffer it (no fsync).
/// 3. Drain all immediately available Appends (the batch window).
/// 4. Single flush_sync for the whole batch.
/// 5. Respond to all senders.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        match cmd {
            WalCommand::Append { event, response } => {
                let mut batch = vec![(event, response)];

                loop {
                    match rx.try_recv() {
                        Ok(WalCommand::Append { event, response }) => {
                            batch.push((event, response));
                        }
                        Ok(other) => {
                            // Flush current batch first, then handle the non-append command
                            commit_batch(&mut wal, &mut batch);
                            handle_non_append(&mut wal, other);
                            break;
                        }
                        Err(_) => break,
                    }
                }

                if !batch.is_empty() {
                    commit_batch(&mut wal, &mut batch);
                }
            }
            other => handle_non_append(&mut wal, other),
        }
    }
}

fn commit_batch(wal: &mut Wal, batch: &mut Vec<(Event, oneshot::Sender<io::Result<()>>)>) {
    metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
    let flush_start = std::time::Instant::now();
    let result = flush_batch(wal, batch);
    metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
        .record(flush_start.elapsed().as_secs_f64());
    respond_batch(batch, &result);
}

fn flush_batch(wal: &mut Wal, batch: &[(Event, oneshot::Sender<io::Result<()>>)]) -> io::Result<()> {
    let result = batch
        .iter()
        .try_for_each(|(event, _)| wal.append_buffered(event))
        .and_then(|()| wal.flush_sync());
    if result.is_err() {
        // Every caller in the batch is told it failed, so none of it may
        // survive on disk to be replayed later.
        if let Err(e) = wal.rollback() {
            error!("WAL rollback after failed batch: {e}");
        }
    }
    result
}

fn respond_batch(batch: &mut Vec<(Event, oneshot::Sender<io::Result<()>>)>, result: &io::Result<()>) {
    for (_, tx) in batch.drain(..) {
        let r = match result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(r);
    }
}

fn handle_non_append(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { events, response } => {
            let result = Wal::write_compact_file(wal.path(), &events)
                .and_then(|()| wal.swap_compact_file());
            let _ = response.send(result);
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { .. } => unreachable!("appends are batched by the caller"),
    }
}

/// Write one event through the group-commit writer and wait until it is durable.
async fn wal_append_via(wal_tx: &mpsc::Sender<WalCommand>, event: &Event) -> Result<(), EngineError> {
    let (tx, rx) = oneshot::channel();
    wal_tx
        .send(WalCommand::Append {
            event: event.clone(),
            response: tx,
        })
        .await
        .map_err(|_| EngineError::StorageUnavailable("WAL writer shut down".into()))?;
    rx.await
        .map_err(|_| EngineError::StorageUnavailable("WAL writer dropped response".into()))?
        .map_err(|e| EngineError::StorageUnavailable(e.to_string()))
}

/// Reservation engine for a fixed set of resources.
///
/// Each resource sits behind its own `RwLock`; every state change is
/// written to the WAL before it is applied in memory.
pub struct Engine {
    pub schedule: Arc<Schedule>,
    pub(super) state: DashMap<String, SharedResourceState>,
    pub(super) wal_tx: mpsc::Sender<WalCommand>,
    /// Reverse lookup: reservation id → resource name
    pub(super) reservation_to_resource: Arc<DashMap<Ulid, String>>,
    pub(super) ids: Mutex<ulid::Generator>,
}

/// Apply an event directly to a ResourceState. Caller holds the lock.
fn apply_to_resource(rs: &mut ResourceState, event: &Event, index: &DashMap<Ulid, String>) {
    match event {
        Event::ReservationAdmitted {
            id,
            resource,
            span,
            holder_name,
            contact,
            note,
            credential,
            created_at,
        } => {
            rs.insert_reservation(Reservation {
                id: *id,
                resource: resource.clone(),
                span: *span,
                holder_name: holder_name.clone(),
                contact: contact.clone(),
                note: note.clone(),
                credential: credential.clone(),
                created_at: *created_at,
            });
            index.insert(*id, resource.clone());
        }
        Event::ReservationCancelled { id, .. } => {
            rs.remove_reservation(*id);
            index.remove(id);
        }
    }
}

impl Engine {
    /// Open (or create) the WAL at `wal_path`, replay it, and start the writer task.
    /// Must be called inside a tokio runtime.
    pub fn new(wal_path: PathBuf, schedule: Schedule) -> io::Result<Self> {
        schedule
            .validate()
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e.to_string()))?;
        let events = Wal::replay(&wal_path)?;
        let wal = Wal::open(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let state = DashMap::new();
        for (position, name) in schedule.resources.iter().enumerate() {
            let rs = ResourceState::new(name.clone(), position);
            state.insert(name.clone(), Arc::new(RwLock::new(rs)));
        }

        let engine = Self {
            schedule: Arc::new(schedule),
            state,
            wal_tx,
            reservation_to_resource: Arc::new(DashMap::new()),
            ids: Mutex::new(ulid::Generator::new()),
        };

        // We're the sole owner of these Arcs, so try_write always succeeds instantly.
        // Never use blocking_write here: this runs inside an async context.
        let mut skipped = 0usize;
        let mut conflicting = 0usize;
        for event in &events {
            let Some(entry) = engine.state.get(event.resource()) else {
                skipped += 1;
                continue;
            };
            let rs_arc = entry.value().clone();
            let Ok(mut guard) = rs_arc.try_write() else {
                skipped += 1;
                continue;
            };
            if let Event::ReservationAdmitted { id, span, .. } = event {
                if let Err(e) = conflict::check_no_conflict(&guard, span) {
                    warn!("replay dropped reservation {id}: {e}");
                    conflicting += 1;
                    continue;
                }
            }
            apply_to_resource(&mut guard, event, &engine.reservation_to_resource);
        }
        if skipped > 0 {
            warn!("replay skipped {skipped} events for resources no longer configured");
        }
        if conflicting > 0 {
            warn!("replay dropped {conflicting} reservations overlapping earlier ones");
        }
        info!(
            "replayed {} events, {} live reservations",
            events.len(),
            engine.reservation_to_resource.len()
        );

        Ok(engine)
    }

    pub fn get_resource(&self, name: &str) -> Option<SharedResourceState> {
        self.state.get(name).map(|e| e.value().clone())
    }

    pub(super) fn require_resource(&self, name: &str) -> Result<SharedResourceState, EngineError> {
        self.get_resource(name)
            .ok_or_else(|| EngineError::UnknownResource(name.to_string()))
    }

    pub fn get_resource_for_reservation(&self, id: &Ulid) -> Option<String> {
        self.reservation_to_resource.get(id).map(|e| e.value().clone())
    }

    pub(super) fn next_id(&self) -> Result<Ulid, EngineError> {
        let mut ids = self.ids.lock().unwrap_or_else(|p| p.into_inner());
        ids.generate()
            .map_err(|_| EngineError::LimitExceeded("reservation id space exhausted this millisecond"))
    }

    /// WAL-append + apply, performed by a detached task that owns the write guard.
    ///
    /// If the caller is dropped mid-commit the task still finishes, so the log
    /// and the in-memory index never disagree.
    pub(super) async fn persist_and_apply(
        &self,
        mut guard: tokio::sync::OwnedRwLockWriteGuard<ResourceState>,
        event: Event,
    ) -> Result<(), EngineError> {
        let wal_tx = self.wal_tx.clone();
        let index = self.reservation_to_resource.clone();
        tokio::spawn(async move {
            wal_append_via(&wal_tx, &event).await?;
            apply_to_resource(&mut guard, &event, &index);
            Ok::<(), EngineError>(())
        })
        .await
        .map_err(|e| EngineError::StorageUnavailable(format!("commit task failed: {e}")))?
    }
}
