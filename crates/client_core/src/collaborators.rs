//! Seams to the identity provider and the remote ordered collection.

use anyhow::Result;
use async_trait::async_trait;
use futures::stream::BoxStream;
use shared::{
    domain::{ItemId, ItemRecord, UserId},
    protocol::{CollectionNotification, CollectionPath, OrderKey},
};

/// Standing subscription feed. Dropping the stream cancels the subscription.
pub type NotificationStream = BoxStream<'static, CollectionNotification>;

#[async_trait]
pub trait IdentityProvider: Send + Sync {
    async fn resolve_existing_identity(&self) -> Result<Option<UserId>>;
    async fn create_anonymous_identity(&self) -> Result<UserId>;
    async fn exchange_bootstrap_credential(&self, token: &str) -> Result<UserId>;
}

#[async_trait]
pub trait RemoteCollection: Send + Sync {
    /// Notifications must be yielded in the order the store emits them.
    async fn subscribe(&self, path: &CollectionPath, order: OrderKey)
        -> Result<NotificationStream>;
    async fn create(&self, path: &CollectionPath, record: ItemRecord) -> Result<ItemId>;
    async fn update(&self, path: &CollectionPath, id: &ItemId, record: ItemRecord) -> Result<()>;
    async fn delete(&self, path: &CollectionPath, id: &ItemId) -> Result<()>;
}
