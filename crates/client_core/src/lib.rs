use std::{sync::Arc, time::Duration};

use shared::{
    domain::{Item, ItemId},
    error::InventoryError,
    protocol::CollectionPath,
};
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::info;

pub mod backend;
pub mod collaborators;
pub mod context;
pub mod coordinator;
pub mod draft;
pub mod mirror;
pub mod session;

pub use collaborators::{IdentityProvider, NotificationStream, RemoteCollection};
pub use context::{InventoryContext, SessionState, Snapshot, ViewState};
pub use coordinator::{MutationCoordinator, SubmitOutcome};
pub use draft::{Draft, DraftError, EditTarget};
pub use mirror::ItemStoreMirror;
pub use session::SessionGate;

pub const DEFAULT_EVENT_CAPACITY: usize = 256;

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub collection_path: CollectionPath,
    pub bootstrap_credential: Option<String>,
    pub event_capacity: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            collection_path: CollectionPath::default(),
            bootstrap_credential: None,
            event_capacity: DEFAULT_EVENT_CAPACITY,
        }
    }
}

/// Composition root: one shared context plus the gate, mirror and coordinator
/// that operate on it. Dropping the client releases the subscription.
pub struct InventoryClient {
    context: Arc<InventoryContext>,
    session: SessionGate,
    mirror: ItemStoreMirror,
    coordinator: MutationCoordinator,
}

impl InventoryClient {
    pub fn new(
        config: ClientConfig,
        identity: Arc<dyn IdentityProvider>,
        collection: Arc<dyn RemoteCollection>,
    ) -> Self {
        let context = InventoryContext::new(config.event_capacity);
        let session = SessionGate::new(
            Arc::clone(&context),
            identity,
            config.bootstrap_credential,
        );
        let mirror = ItemStoreMirror::new(
            Arc::clone(&context),
            Arc::clone(&collection),
            config.collection_path.clone(),
        );
        let coordinator =
            MutationCoordinator::new(Arc::clone(&context), collection, config.collection_path);
        Self {
            context,
            session,
            mirror,
            coordinator,
        }
    }

    pub fn context(&self) -> &Arc<InventoryContext> {
        &self.context
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<ViewState> {
        self.context.subscribe_events()
    }

    pub async fn view(&self) -> ViewState {
        self.context.view().await
    }

    pub async fn snapshot(&self) -> Snapshot {
        self.context.snapshot().await
    }

    pub async fn begin_session(&self) -> SessionState {
        self.session.begin().await
    }

    pub async fn start_sync(&self) -> Result<(), InventoryError> {
        self.mirror.start().await
    }

    pub async fn stop_sync(&self) {
        self.mirror.stop().await;
    }

    /// Resolves the session, then opens the subscription.
    pub async fn connect(&self) -> Result<SessionState, InventoryError> {
        let session = self.session.begin().await;
        if let SessionState::Failed(message) = &session {
            return Err(InventoryError::authentication(message.clone()));
        }
        self.mirror.start().await?;
        Ok(session)
    }

    /// Stops the mirror, forgets the session and resolves a new one.
    pub async fn change_identity(&self) -> Result<SessionState, InventoryError> {
        self.mirror.stop().await;
        self.session.invalidate().await;
        info!("client: identity changed, reconnecting");
        self.connect().await
    }

    pub async fn submit(&self, draft: Draft) -> Result<SubmitOutcome, InventoryError> {
        self.coordinator.submit(draft).await
    }

    pub async fn submit_current(&self) -> Result<SubmitOutcome, InventoryError> {
        let draft = self.context.draft().await;
        self.coordinator.submit(draft).await
    }

    pub async fn remove(&self, item_id: &ItemId) -> Result<(), InventoryError> {
        self.coordinator.remove(item_id).await
    }

    pub async fn begin_edit(&self, item: &Item) {
        self.coordinator.begin_edit(item).await;
    }

    pub async fn cancel_edit(&self) {
        self.coordinator.cancel_edit().await;
    }

    pub async fn update_draft(&self, edit: impl FnOnce(&mut Draft)) {
        self.coordinator.update_draft(edit).await;
    }

    /// Waits for a published state matching `accept`, checking the current state first.
    pub async fn wait_for_view(
        &self,
        timeout: Duration,
        accept: impl Fn(&ViewState) -> bool,
    ) -> Option<ViewState> {
        let mut events = self.context.subscribe_events();
        let current = self.context.view().await;
        if accept(&current) {
            return Some(current);
        }

        tokio::time::timeout(timeout, async {
            loop {
                match events.recv().await {
                    Ok(view) if accept(&view) => return Some(view),
                    Ok(_) | Err(RecvError::Lagged(_)) => continue,
                    Err(RecvError::Closed) => return None,
                }
            }
        })
        .await
        .ok()
        .flatten()
    }

    pub async fn shutdown(&self) {
        self.mirror.stop().await;
    }
}

#[cfg(test)]
#[path = "tests/support.rs"]
mod test_support;

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
