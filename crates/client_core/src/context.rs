//! Shared client state owned by the composing application.
//!
//! Session, snapshot, busy flag, error slot and draft live behind one mutex.
//! Every mutation goes through [`InventoryContext::update`] or
//! [`InventoryContext::update_if`], which publish the resulting [`ViewState`]
//! while the lock is still held so observers see changes in order.

use std::sync::Arc;

use chrono::NaiveDate;
use serde::Serialize;
use shared::{
    domain::{Item, ItemId, UserId},
    error::{ErrorKind, InventoryError},
    freshness::FreshnessStatus,
};
use tokio::sync::{broadcast, watch, Mutex};
use tracing::warn;

use crate::draft::Draft;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "detail", rename_all = "snake_case")]
pub enum SessionState {
    Unresolved,
    Resolving,
    Resolved(UserId),
    Failed(String),
}

impl SessionState {
    pub fn user_id(&self) -> Option<&UserId> {
        match self {
            Self::Resolved(user_id) => Some(user_id),
            _ => None,
        }
    }

    pub fn is_resolved(&self) -> bool {
        matches!(self, Self::Resolved(_))
    }

    pub fn is_resolving(&self) -> bool {
        matches!(self, Self::Resolving)
    }
}

/// Items ordered by ascending expiration date.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct Snapshot {
    items: Vec<Item>,
}

impl Snapshot {
    /// Stable sort: items sharing a date keep the order they were delivered in.
    pub fn from_delivery(mut items: Vec<Item>) -> Self {
        items.sort_by(|a, b| a.expiration_date.cmp(&b.expiration_date));
        Self { items }
    }

    pub fn items(&self) -> &[Item] {
        &self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn get(&self, id: &ItemId) -> Option<&Item> {
        self.items.iter().find(|item| &item.id == id)
    }

    pub fn contains(&self, id: &ItemId) -> bool {
        self.get(id).is_some()
    }

    pub fn classified(&self, today: NaiveDate) -> Vec<(&Item, FreshnessStatus)> {
        self.items
            .iter()
            .map(|item| (item, item.freshness(today)))
            .collect()
    }
}

/// What presentation renders; published on every change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ViewState {
    pub session: SessionState,
    pub snapshot: Snapshot,
    pub synced: bool,
    pub busy: bool,
    pub error: Option<InventoryError>,
    pub draft: Draft,
}

impl ViewState {
    pub fn session_id(&self) -> Option<&UserId> {
        self.session.user_id()
    }
}

pub(crate) struct ContextState {
    pub(crate) session: SessionState,
    pub(crate) session_epoch: u64,
    pub(crate) snapshot: Snapshot,
    pub(crate) synced: bool,
    pub(crate) busy: bool,
    pub(crate) error: Option<InventoryError>,
    pub(crate) draft: Draft,
    pub(crate) live_subscription: Option<u64>,
}

impl ContextState {
    fn view(&self) -> ViewState {
        ViewState {
            session: self.session.clone(),
            snapshot: self.snapshot.clone(),
            synced: self.synced,
            busy: self.busy,
            error: self.error.clone(),
            draft: self.draft.clone(),
        }
    }
}

pub struct InventoryContext {
    state: Mutex<ContextState>,
    session_tx: watch::Sender<SessionState>,
    events: broadcast::Sender<ViewState>,
}

impl InventoryContext {
    pub fn new(event_capacity: usize) -> Arc<Self> {
        let (events, _) = broadcast::channel(event_capacity.max(1));
        let (session_tx, _) = watch::channel(SessionState::Unresolved);
        Arc::new(Self {
            state: Mutex::new(ContextState {
                session: SessionState::Unresolved,
                session_epoch: 0,
                snapshot: Snapshot::default(),
                synced: false,
                busy: false,
                error: None,
                draft: Draft::default(),
                live_subscription: None,
            }),
            session_tx,
            events,
        })
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<ViewState> {
        self.events.subscribe()
    }

    pub fn watch_session(&self) -> watch::Receiver<SessionState> {
        self.session_tx.subscribe()
    }

    pub async fn view(&self) -> ViewState {
        self.state.lock().await.view()
    }

    pub async fn session(&self) -> SessionState {
        self.state.lock().await.session.clone()
    }

    pub async fn snapshot(&self) -> Snapshot {
        self.state.lock().await.snapshot.clone()
    }

    pub async fn draft(&self) -> Draft {
        self.state.lock().await.draft.clone()
    }

    pub async fn error(&self) -> Option<InventoryError> {
        self.state.lock().await.error.clone()
    }

    pub async fn is_busy(&self) -> bool {
        self.state.lock().await.busy
    }

    pub async fn clear_error(&self) {
        self.update_if(|state| ((), state.error.take().is_some()))
            .await;
    }

    /// Mutates and always publishes.
    pub(crate) async fn update<R>(&self, f: impl FnOnce(&mut ContextState) -> R) -> R {
        self.update_if(|state| (f(state), true)).await
    }

    /// Mutates and publishes only when the closure reports a visible change.
    pub(crate) async fn update_if<R>(
        &self,
        f: impl FnOnce(&mut ContextState) -> (R, bool),
    ) -> R {
        let mut state = self.state.lock().await;
        let (result, changed) = f(&mut state);
        if changed {
            self.publish(&state);
        }
        result
    }

    /// Latest error wins; there is no queue.
    pub(crate) async fn report(&self, error: InventoryError) {
        warn!(kind = ?error.kind, message = %error.message, "inventory: error reported");
        self.update(|state| state.error = Some(error)).await;
    }

    pub(crate) async fn report_with(&self, error: InventoryError, f: impl FnOnce(&mut ContextState)) {
        warn!(kind = ?error.kind, message = %error.message, "inventory: error reported");
        self.update(|state| {
            f(state);
            state.error = Some(error);
        })
        .await;
    }

    fn publish(&self, state: &ContextState) {
        let session = &state.session;
        self.session_tx.send_if_modified(|current| {
            if current == session {
                return false;
            }
            *current = session.clone();
            true
        });
        let _ = self.events.send(state.view());
    }
}

pub(crate) fn clears_on_sync(error: &Option<InventoryError>) -> bool {
    matches!(error, Some(err) if err.kind == ErrorKind::SubscriptionFailure)
}
