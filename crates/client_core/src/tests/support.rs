//! Hand-written collaborator doubles shared by the client_core unit tests.

use std::{
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{NaiveDate, TimeZone, Utc};
use futures::StreamExt;
use shared::{
    domain::{Item, ItemId, ItemRecord, UserId},
    protocol::{CollectionNotification, CollectionPath, OrderKey},
};
use tokio::sync::{broadcast, mpsc, Mutex, Notify};
use tokio_stream::wrappers::UnboundedReceiverStream;

use crate::{
    collaborators::{IdentityProvider, NotificationStream, RemoteCollection},
    context::ViewState,
};

pub(crate) struct TestIdentityProvider {
    existing: Option<UserId>,
    anonymous: UserId,
    fail_with: Option<String>,
    delay: Option<Duration>,
    pub(crate) calls: Arc<Mutex<Vec<&'static str>>>,
    pub(crate) resolutions: Arc<AtomicUsize>,
}

impl TestIdentityProvider {
    pub(crate) fn anonymous(user_id: &str) -> Self {
        Self {
            existing: None,
            anonymous: UserId::new(user_id),
            fail_with: None,
            delay: None,
            calls: Arc::new(Mutex::new(Vec::new())),
            resolutions: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub(crate) fn existing(user_id: &str) -> Self {
        let mut provider = Self::anonymous("anon-unused");
        provider.existing = Some(UserId::new(user_id));
        provider
    }

    pub(crate) fn failing(err: impl Into<String>) -> Self {
        let mut provider = Self::anonymous("anon-unused");
        provider.fail_with = Some(err.into());
        provider
    }

    pub(crate) fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    async fn record(&self, call: &'static str) -> Result<()> {
        self.calls.lock().await.push(call);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(err) = &self.fail_with {
            return Err(anyhow!(err.clone()));
        }
        Ok(())
    }
}

#[async_trait]
impl IdentityProvider for TestIdentityProvider {
    async fn resolve_existing_identity(&self) -> Result<Option<UserId>> {
        self.resolutions.fetch_add(1, Ordering::SeqCst);
        self.record("resolve_existing").await?;
        Ok(self.existing.clone())
    }

    async fn create_anonymous_identity(&self) -> Result<UserId> {
        self.record("create_anonymous").await?;
        Ok(self.anonymous.clone())
    }

    async fn exchange_bootstrap_credential(&self, token: &str) -> Result<UserId> {
        self.record("exchange_bootstrap").await?;
        Ok(UserId::new(format!("user-for-{token}")))
    }
}

/// Remote collection whose notifications are delivered only when the test says so.
pub(crate) struct TestCollection {
    feeds: Arc<Mutex<Vec<mpsc::UnboundedSender<CollectionNotification>>>>,
    pub(crate) subscriptions: Arc<AtomicUsize>,
    pub(crate) creates: Arc<Mutex<Vec<ItemRecord>>>,
    pub(crate) updates: Arc<Mutex<Vec<(ItemId, ItemRecord)>>>,
    pub(crate) deletes: Arc<Mutex<Vec<ItemId>>>,
    fail_writes_with: Option<String>,
    fail_subscribe_with: Option<String>,
    write_gate: Option<Arc<Notify>>,
    next_id: AtomicUsize,
}

impl TestCollection {
    pub(crate) fn new() -> Self {
        Self {
            feeds: Arc::new(Mutex::new(Vec::new())),
            subscriptions: Arc::new(AtomicUsize::new(0)),
            creates: Arc::new(Mutex::new(Vec::new())),
            updates: Arc::new(Mutex::new(Vec::new())),
            deletes: Arc::new(Mutex::new(Vec::new())),
            fail_writes_with: None,
            fail_subscribe_with: None,
            write_gate: None,
            next_id: AtomicUsize::new(0),
        }
    }

    pub(crate) fn failing_writes(err: impl Into<String>) -> Self {
        let mut collection = Self::new();
        collection.fail_writes_with = Some(err.into());
        collection
    }

    pub(crate) fn failing_subscribe(err: impl Into<String>) -> Self {
        let mut collection = Self::new();
        collection.fail_subscribe_with = Some(err.into());
        collection
    }

    /// Writes block until the returned gate is notified.
    pub(crate) fn gated() -> (Self, Arc<Notify>) {
        let gate = Arc::new(Notify::new());
        let mut collection = Self::new();
        collection.write_gate = Some(Arc::clone(&gate));
        (collection, gate)
    }

    /// Pushes into the most recent subscription. False when nobody is listening.
    pub(crate) async fn deliver(&self, notification: CollectionNotification) -> bool {
        let feeds = self.feeds.lock().await;
        match feeds.last() {
            Some(feed) => feed.send(notification).is_ok(),
            None => false,
        }
    }

    pub(crate) async fn deliver_items(&self, items: Vec<Item>) -> bool {
        self.deliver(CollectionNotification::Snapshot(items)).await
    }

    pub(crate) fn remote_calls(&self) -> usize {
        self.next_id.load(Ordering::SeqCst)
    }

    async fn before_write(&self) -> Result<()> {
        self.next_id.fetch_add(1, Ordering::SeqCst);
        if let Some(gate) = &self.write_gate {
            gate.notified().await;
        }
        if let Some(err) = &self.fail_writes_with {
            return Err(anyhow!(err.clone()));
        }
        Ok(())
    }
}

#[async_trait]
impl RemoteCollection for TestCollection {
    async fn subscribe(
        &self,
        _path: &CollectionPath,
        _order: OrderKey,
    ) -> Result<NotificationStream> {
        if let Some(err) = &self.fail_subscribe_with {
            return Err(anyhow!(err.clone()));
        }
        self.subscriptions.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = mpsc::unbounded_channel();
        self.feeds.lock().await.push(tx);
        Ok(UnboundedReceiverStream::new(rx).boxed())
    }

    async fn create(&self, _path: &CollectionPath, record: ItemRecord) -> Result<ItemId> {
        self.before_write().await?;
        let mut creates = self.creates.lock().await;
        creates.push(record);
        Ok(ItemId::new(format!("item-{}", creates.len())))
    }

    async fn update(&self, _path: &CollectionPath, id: &ItemId, record: ItemRecord) -> Result<()> {
        self.before_write().await?;
        self.updates.lock().await.push((id.clone(), record));
        Ok(())
    }

    async fn delete(&self, _path: &CollectionPath, id: &ItemId) -> Result<()> {
        self.before_write().await?;
        self.deletes.lock().await.push(id.clone());
        Ok(())
    }
}

pub(crate) fn item(id: &str, name: &str, expires: (i32, u32, u32)) -> Item {
    Item {
        id: ItemId::new(id),
        name: name.to_string(),
        quantity: 1,
        expiration_date: NaiveDate::from_ymd_opt(expires.0, expires.1, expires.2)
            .expect("valid date"),
        owner_id: UserId::new("user-a"),
        created_at: Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap(),
    }
}

pub(crate) async fn next_view_matching(
    events: &mut broadcast::Receiver<ViewState>,
    accept: impl Fn(&ViewState) -> bool,
) -> ViewState {
    tokio::time::timeout(Duration::from_secs(2), async {
        loop {
            match events.recv().await {
                Ok(view) if accept(&view) => return view,
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => panic!("event channel closed"),
            }
        }
    })
    .await
    .expect("timed out waiting for view state")
}
