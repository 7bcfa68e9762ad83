//! Live, ordered mirror of the shared remote collection.
//!
//! The snapshot is replaced wholesale on every notification and is never
//! touched by local mutations. Each `start` tags its subscription with a
//! generation; a notification is applied only while that generation is live,
//! which is what lets `stop` guarantee silence once it returns.

use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};

use futures::StreamExt;
use shared::{
    domain::Item,
    error::InventoryError,
    protocol::{CollectionNotification, CollectionPath, OrderKey},
};
use tokio::{sync::Mutex, task::JoinHandle};
use tracing::{debug, info, warn};

use crate::{
    collaborators::{NotificationStream, RemoteCollection},
    context::{clears_on_sync, InventoryContext, Snapshot},
};

struct ActiveSubscription {
    generation: u64,
    task: JoinHandle<()>,
}

impl Drop for ActiveSubscription {
    fn drop(&mut self) {
        self.task.abort();
    }
}

pub struct ItemStoreMirror {
    context: Arc<InventoryContext>,
    collection: Arc<dyn RemoteCollection>,
    path: CollectionPath,
    active: Mutex<Option<ActiveSubscription>>,
    next_generation: AtomicU64,
}

impl ItemStoreMirror {
    pub fn new(
        context: Arc<InventoryContext>,
        collection: Arc<dyn RemoteCollection>,
        path: CollectionPath,
    ) -> Self {
        Self {
            context,
            collection,
            path,
            active: Mutex::new(None),
            next_generation: AtomicU64::new(0),
        }
    }

    pub fn path(&self) -> &CollectionPath {
        &self.path
    }

    pub async fn is_active(&self) -> bool {
        self.active.lock().await.is_some()
    }

    /// Opens the standing subscription. Fails closed unless the session is resolved.
    pub async fn start(&self) -> Result<(), InventoryError> {
        let mut active = self.active.lock().await;
        if active.is_some() {
            debug!(path = %self.path, "mirror: already subscribed");
            return Ok(());
        }

        if !self.context.session().await.is_resolved() {
            let err = InventoryError::not_ready("cannot subscribe before the session is resolved");
            self.context.report(err.clone()).await;
            return Err(err);
        }

        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed) + 1;
        let stream = match self
            .collection
            .subscribe(&self.path, OrderKey::ExpirationDate)
            .await
        {
            Ok(stream) => stream,
            Err(err) => {
                let err = InventoryError::subscription(format!(
                    "failed to subscribe to '{}': {err:#}",
                    self.path
                ));
                self.context.report(err.clone()).await;
                return Err(err);
            }
        };

        self.context
            .update_if(|state| {
                state.live_subscription = Some(generation);
                ((), false)
            })
            .await;

        let task = spawn_notification_task(
            Arc::clone(&self.context),
            self.path.clone(),
            generation,
            stream,
        );
        *active = Some(ActiveSubscription { generation, task });
        info!(path = %self.path, generation, "mirror: subscribed");
        Ok(())
    }

    /// Releases the subscription. Idempotent.
    pub async fn stop(&self) {
        let mut active = self.active.lock().await;
        let Some(subscription) = active.take() else {
            return;
        };

        let generation = subscription.generation;
        self.context
            .update_if(|state| {
                if state.live_subscription == Some(generation) {
                    state.live_subscription = None;
                }
                ((), false)
            })
            .await;
        drop(subscription);
        info!(path = %self.path, generation, "mirror: unsubscribed");
    }
}

fn spawn_notification_task(
    context: Arc<InventoryContext>,
    path: CollectionPath,
    generation: u64,
    mut stream: NotificationStream,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(notification) = stream.next().await {
            let live = match notification {
                CollectionNotification::Snapshot(items) => {
                    apply_snapshot(&context, generation, items).await
                }
                CollectionNotification::Error(message) => {
                    warn!(path = %path, generation, "mirror: subscription delivery failed: {message}");
                    report_delivery_error(&context, generation, &path, message).await
                }
            };
            if !live {
                break;
            }
        }
        debug!(path = %path, generation, "mirror: notification stream ended");
    })
}

/// Returns false once the generation is no longer live.
async fn apply_snapshot(
    context: &InventoryContext,
    generation: u64,
    items: Vec<Item>,
) -> bool {
    context
        .update_if(|state| {
            if state.live_subscription != Some(generation) {
                return (false, false);
            }
            state.snapshot = Snapshot::from_delivery(items);
            state.synced = true;
            if clears_on_sync(&state.error) {
                state.error = None;
            }
            debug!(generation, items = state.snapshot.len(), "mirror: snapshot replaced");
            (true, true)
        })
        .await
}

/// Keeps the last snapshot in place; only the error slot changes.
async fn report_delivery_error(
    context: &InventoryContext,
    generation: u64,
    path: &CollectionPath,
    message: String,
) -> bool {
    context
        .update_if(|state| {
            if state.live_subscription != Some(generation) {
                return (false, false);
            }
            state.error = Some(InventoryError::subscription(format!(
                "failed to load '{path}': {message}"
            )));
            (true, true)
        })
        .await
}

#[cfg(test)]
#[path = "tests/mirror_tests.rs"]
mod tests;
