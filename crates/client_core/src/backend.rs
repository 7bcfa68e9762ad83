//! Collaborator implementations over the local SQLite [`Storage`].

use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use futures::StreamExt;
use shared::{
    domain::{Item, ItemId, ItemRecord, UserId},
    protocol::{CollectionNotification, CollectionPath, OrderKey},
};
use storage::Storage;
use tokio::{
    sync::{broadcast::error::RecvError, mpsc},
    time::{interval, Interval, MissedTickBehavior},
};
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::{debug, info, warn};

use crate::collaborators::{IdentityProvider, NotificationStream, RemoteCollection};

/// Shared collection backed by [`Storage`].
///
/// Writes made through the same `Storage` handle are pushed immediately. With
/// a poll interval, writes from other processes sharing the database file are
/// picked up too; a poll only notifies when the contents differ.
#[derive(Clone)]
pub struct StorageCollection {
    storage: Storage,
    poll_interval: Option<Duration>,
}

impl StorageCollection {
    pub fn new(storage: Storage) -> Self {
        Self {
            storage,
            poll_interval: None,
        }
    }

    pub fn with_poll_interval(mut self, poll_interval: Option<Duration>) -> Self {
        self.poll_interval = poll_interval.filter(|every| !every.is_zero());
        self
    }

    pub fn storage(&self) -> &Storage {
        &self.storage
    }
}

#[async_trait]
impl RemoteCollection for StorageCollection {
    async fn subscribe(
        &self,
        path: &CollectionPath,
        order: OrderKey,
    ) -> Result<NotificationStream> {
        // Storage always lists by expiration date; it is the only order key.
        let OrderKey::ExpirationDate = order;

        // Subscribe before the first read so no write slips between them.
        let mut changes = self.storage.subscribe_changes();
        let initial = self.storage.list_items(path).await?;

        let (tx, rx) = mpsc::unbounded_channel();
        let _ = tx.send(CollectionNotification::Snapshot(initial.clone()));

        let storage = self.storage.clone();
        let path = path.clone();
        let mut ticker = self.poll_interval.map(|every| {
            let mut ticker = interval(every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            ticker
        });

        tokio::spawn(async move {
            let mut last: Vec<Item> = initial;
            loop {
                let pushed = tokio::select! {
                    change = changes.recv() => match change {
                        Ok(changed) if changed == path => true,
                        Ok(_) => continue,
                        Err(RecvError::Lagged(skipped)) => {
                            debug!(path = %path, skipped, "storage collection: change feed lagged");
                            true
                        }
                        Err(RecvError::Closed) => break,
                    },
                    _ = next_tick(&mut ticker) => false,
                    _ = tx.closed() => break,
                };

                let notification = match storage.list_items(&path).await {
                    Ok(items) => {
                        if !pushed && items == last {
                            continue;
                        }
                        last = items.clone();
                        CollectionNotification::Snapshot(items)
                    }
                    Err(err) => {
                        warn!(path = %path, "storage collection: reload failed: {err:#}");
                        CollectionNotification::Error(format!("{err:#}"))
                    }
                };

                if tx.send(notification).is_err() {
                    break;
                }
            }
            debug!(path = %path, "storage collection: subscription closed");
        });

        Ok(UnboundedReceiverStream::new(rx).boxed())
    }

    async fn create(&self, path: &CollectionPath, record: ItemRecord) -> Result<ItemId> {
        self.storage.insert_item(path, &record).await
    }

    async fn update(&self, path: &CollectionPath, id: &ItemId, record: ItemRecord) -> Result<()> {
        self.storage.update_item(path, id, &record).await
    }

    async fn delete(&self, path: &CollectionPath, id: &ItemId) -> Result<()> {
        self.storage.delete_item(path, id).await
    }
}

async fn next_tick(ticker: &mut Option<Interval>) {
    match ticker {
        Some(ticker) => {
            ticker.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}

/// Identity remembered per profile in the local database.
#[derive(Clone)]
pub struct LocalIdentityProvider {
    storage: Storage,
    profile: String,
}

impl LocalIdentityProvider {
    pub fn new(storage: Storage, profile: impl Into<String>) -> Self {
        Self {
            storage,
            profile: profile.into(),
        }
    }

    pub fn profile(&self) -> &str {
        &self.profile
    }

    pub async fn forget(&self) -> Result<()> {
        self.storage.clear_identity(&self.profile).await
    }
}

#[async_trait]
impl IdentityProvider for LocalIdentityProvider {
    async fn resolve_existing_identity(&self) -> Result<Option<UserId>> {
        self.storage.load_identity(&self.profile).await
    }

    async fn create_anonymous_identity(&self) -> Result<UserId> {
        let user_id = UserId::generate_anonymous();
        self.storage.save_identity(&self.profile, &user_id).await?;
        info!(profile = %self.profile, user_id = %user_id, "identity: created anonymous identity");
        Ok(user_id)
    }

    async fn exchange_bootstrap_credential(&self, token: &str) -> Result<UserId> {
        let user_id = self.storage.exchange_bootstrap_credential(token).await?;
        self.storage.save_identity(&self.profile, &user_id).await?;
        info!(profile = %self.profile, user_id = %user_id, "identity: adopted identity from bootstrap credential");
        Ok(user_id)
    }
}

#[cfg(test)]
#[path = "tests/backend_tests.rs"]
mod tests;
