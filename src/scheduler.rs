//! Deferred deletion with undo.
//!
//! A [`DeletionScheduler`] belongs to one client session. It owns the ids the
//! session currently shows, the ids selected for bulk actions and a
//! [`PendingDeletion`] per id waiting to be deleted. Each pending entry is a
//! small state machine, `Scheduled → Fired | Cancelled`, backed by one
//! spawned timer task that can be aborted until it fires.
//!
//! Once a timer fires the delete request is issued and the id leaves the
//! view whatever the outcome; failures are logged and never retried.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::{
    collections::{HashMap, HashSet},
    sync::Arc,
    time::Duration,
};
use tokio::{runtime::Handle, task::AbortHandle, time::Instant};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Grace window between a delete request and its execution.
pub const DEFAULT_DELETION_DELAY: Duration = Duration::from_secs(7);

/// Issues the authorized, irreversible delete.
#[async_trait]
pub trait MediaDeleter: Send + Sync + 'static {
    async fn delete_media(&self, id: Uuid) -> anyhow::Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeletionState {
    Scheduled,
    Fired,
    Cancelled,
}

#[derive(Debug)]
struct PendingDeletion {
    /// Distinguishes this timer from an older one for the same id.
    ticket: u64,
    state: DeletionState,
    fire_at: Instant,
    timer: AbortHandle,
}

impl PendingDeletion {
    fn fire(&mut self) -> bool {
        if self.state != DeletionState::Scheduled {
            return false;
        }
        self.state = DeletionState::Fired;
        true
    }

    /// Only a scheduled deletion can be called off; a fired one runs to the
    /// end.
    fn cancel(&mut self) -> bool {
        if self.state != DeletionState::Scheduled {
            return false;
        }
        self.timer.abort();
        self.state = DeletionState::Cancelled;
        true
    }
}

/// Read-only view of one pending entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingSnapshot {
    pub id: Uuid,
    pub state: DeletionState,
    pub fires_in: Duration,
}

#[derive(Debug, Default)]
struct Session {
    view: Vec<Uuid>,
    selected: HashSet<Uuid>,
    pending: HashMap<Uuid, PendingDeletion>,
    next_ticket: u64,
}

/// Per-session deletion scheduler. Cloning shares the session.
///
/// Timers run on the Tokio runtime the scheduler was built on, so its methods
/// may be called from any thread afterwards. Dropping the scheduler does not
/// cancel anything: deletions already scheduled still fire.
#[derive(Clone)]
pub struct DeletionScheduler {
    session: Arc<Mutex<Session>>,
    deleter: Arc<dyn MediaDeleter>,
    delay: Duration,
    runtime: Handle,
}

impl DeletionScheduler {
    /// # Panics
    ///
    /// Outside a Tokio runtime context.
    pub fn new(deleter: Arc<dyn MediaDeleter>) -> Self {
        Self::with_delay(deleter, DEFAULT_DELETION_DELAY)
    }

    /// # Panics
    ///
    /// Outside a Tokio runtime context; use [`Self::on_runtime`] there.
    pub fn with_delay(deleter: Arc<dyn MediaDeleter>, delay: Duration) -> Self {
        Self::on_runtime(deleter, delay, Handle::current())
    }

    pub fn on_runtime(deleter: Arc<dyn MediaDeleter>, delay: Duration, runtime: Handle) -> Self {
        Self {
            session: Arc::new(Mutex::new(Session::default())),
            deleter,
            delay,
            runtime,
        }
    }

    /// Replace the ids the session shows. Selection is reset.
    pub fn set_view(&self, ids: impl IntoIterator<Item = Uuid>) {
        let mut session = self.session.lock();
        session.view = ids.into_iter().collect();
        session.selected.clear();
    }

    pub fn view(&self) -> Vec<Uuid> {
        self.session.lock().view.clone()
    }

    /// Toggle selection of one id. Ids waiting to be deleted cannot be
    /// selected. Returns whether the id is selected afterwards.
    pub fn select(&self, id: Uuid, selected: bool) -> bool {
        let mut session = self.session.lock();
        if !selected || session.pending.contains_key(&id) || !session.view.contains(&id) {
            session.selected.remove(&id);
            return false;
        }
        session.selected.insert(id);
        true
    }

    /// Select every visible id that is not pending.
    pub fn select_all(&self) {
        let mut session = self.session.lock();
        let Session {
            view,
            selected,
            pending,
            ..
        } = &mut *session;
        selected.extend(view.iter().filter(|id| !pending.contains_key(*id)));
    }

    pub fn clear_selection(&self) {
        self.session.lock().selected.clear();
    }

    pub fn selected(&self) -> HashSet<Uuid> {
        self.session.lock().selected.clone()
    }

    /// Schedule deletion of `ids` after the configured delay.
    ///
    /// Ids leave the selection immediately. Ids already pending are skipped
    /// and keep their original timer. Returns how many timers were started.
    pub fn schedule(&self, ids: impl IntoIterator<Item = Uuid>) -> usize {
        let mut session = self.session.lock();
        let fire_at = Instant::now() + self.delay;
        let mut started = 0;

        for id in ids {
            session.selected.remove(&id);
            if session.pending.contains_key(&id) {
                debug!(%id, "deletion already pending");
                continue;
            }

            let ticket = session.next_ticket;
            session.next_ticket += 1;
            let task = self.runtime.spawn(run_timer(
                Arc::clone(&self.session),
                Arc::clone(&self.deleter),
                id,
                ticket,
                fire_at,
            ));
            session.pending.insert(
                id,
                PendingDeletion {
                    ticket,
                    state: DeletionState::Scheduled,
                    fire_at,
                    timer: task.abort_handle(),
                },
            );
            started += 1;
        }

        if started > 0 {
            info!(count = started, delay_ms = self.delay.as_millis() as u64, "deletions scheduled");
        }
        started
    }

    /// Schedule everything currently selected.
    pub fn delete_selected(&self) -> usize {
        let ids: Vec<Uuid> = self.session.lock().selected.iter().copied().collect();
        self.schedule(ids)
    }

    /// Cancel pending deletions that have not fired yet. Returns how many
    /// were cancelled; ids already firing are left alone.
    pub fn cancel(&self, ids: impl IntoIterator<Item = Uuid>) -> usize {
        let mut session = self.session.lock();
        let mut cancelled = 0;
        for id in ids {
            let Some(entry) = session.pending.get_mut(&id) else {
                continue;
            };
            if entry.cancel() {
                session.pending.remove(&id);
                cancelled += 1;
            } else {
                debug!(%id, "deletion already fired, cancel ignored");
            }
        }
        if cancelled > 0 {
            info!(count = cancelled, "deletions cancelled");
        }
        cancelled
    }

    /// Undo every deletion that has not fired yet.
    pub fn undo_all(&self) -> usize {
        let ids: Vec<Uuid> = self.session.lock().pending.keys().copied().collect();
        self.cancel(ids)
    }

    pub fn is_pending(&self, id: Uuid) -> bool {
        self.session.lock().pending.contains_key(&id)
    }

    pub fn pending_ids(&self) -> Vec<Uuid> {
        let mut ids: Vec<Uuid> = self.session.lock().pending.keys().copied().collect();
        ids.sort();
        ids
    }

    pub fn pending(&self) -> Vec<PendingSnapshot> {
        let now = Instant::now();
        let mut snapshots: Vec<PendingSnapshot> = self
            .session
            .lock()
            .pending
            .iter()
            .map(|(id, entry)| PendingSnapshot {
                id: *id,
                state: entry.state,
                fires_in: entry.fire_at.saturating_duration_since(now),
            })
            .collect();
        snapshots.sort_by_key(|snapshot| snapshot.id);
        snapshots
    }
}

async fn run_timer(
    session: Arc<Mutex<Session>>,
    deleter: Arc<dyn MediaDeleter>,
    id: Uuid,
    ticket: u64,
    fire_at: Instant,
) {
    tokio::time::sleep_until(fire_at).await;

    {
        let mut session = session.lock();
        let fired = match session.pending.get_mut(&id) {
            Some(entry) if entry.ticket == ticket => entry.fire(),
            _ => false,
        };
        if !fired {
            return;
        }
    }

    match deleter.delete_media(id).await {
        Ok(()) => info!(%id, "scheduled deletion completed"),
        Err(err) => warn!(%id, error = %err, "scheduled deletion failed; removing from view anyway"),
    }

    let mut session = session.lock();
    session.view.retain(|visible| *visible != id);
    session.selected.remove(&id);
    if session
        .pending
        .get(&id)
        .is_some_and(|entry| entry.ticket == ticket)
    {
        session.pending.remove(&id);
    }
}
