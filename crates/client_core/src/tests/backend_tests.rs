use super::*;

use chrono::{NaiveDate, TimeZone, Utc};

const WAIT: Duration = Duration::from_secs(2);

fn record(name: &str, expires: (i32, u32, u32)) -> ItemRecord {
    ItemRecord {
        name: name.to_string(),
        quantity: 1,
        expiration_date: NaiveDate::from_ymd_opt(expires.0, expires.1, expires.2)
            .expect("valid date"),
        owner_id: UserId::new("user-a"),
        created_at: Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap(),
    }
}

async fn next_snapshot(stream: &mut NotificationStream) -> Vec<Item> {
    match tokio::time::timeout(WAIT, stream.next())
        .await
        .expect("notification in time")
        .expect("stream open")
    {
        CollectionNotification::Snapshot(items) => items,
        CollectionNotification::Error(message) => panic!("unexpected error: {message}"),
    }
}

async fn memory_storage() -> Storage {
    Storage::new("sqlite::memory:").await.expect("db")
}

#[tokio::test]
async fn subscribe_delivers_the_current_contents_first() {
    let storage = memory_storage().await;
    let path = CollectionPath::default();
    storage
        .insert_item(&path, &record("milk", (2024, 6, 11)))
        .await
        .expect("insert");
    let collection = StorageCollection::new(storage);

    let mut stream = collection
        .subscribe(&path, OrderKey::ExpirationDate)
        .await
        .expect("subscribe");

    let items = next_snapshot(&mut stream).await;
    assert_eq!(items.len(), 1);
    assert_eq!(items[0].name, "milk");
}

#[tokio::test]
async fn writes_through_the_collection_push_a_fresh_snapshot() {
    let collection = StorageCollection::new(memory_storage().await);
    let path = CollectionPath::default();
    let mut stream = collection
        .subscribe(&path, OrderKey::ExpirationDate)
        .await
        .expect("subscribe");
    assert!(next_snapshot(&mut stream).await.is_empty());

    let later = collection
        .create(&path, record("cheese", (2024, 7, 1)))
        .await
        .expect("create");
    next_snapshot(&mut stream).await;
    let sooner = collection
        .create(&path, record("milk", (2024, 6, 11)))
        .await
        .expect("create");

    let items = next_snapshot(&mut stream).await;
    let ids: Vec<&ItemId> = items.iter().map(|item| &item.id).collect();
    assert_eq!(ids, vec![&sooner, &later]);

    collection.delete(&path, &sooner).await.expect("delete");
    let items = next_snapshot(&mut stream).await;
    assert_eq!(items.len(), 1);
    assert_eq!(items[0].id, later);
}

#[tokio::test]
async fn update_through_the_collection_keeps_created_at() {
    let collection = StorageCollection::new(memory_storage().await);
    let path = CollectionPath::default();
    let original = record("milk", (2024, 6, 11));
    let id = collection
        .create(&path, original.clone())
        .await
        .expect("create");

    let mut changed = original.clone();
    changed.quantity = 3;
    changed.created_at = Utc::now();
    collection.update(&path, &id, changed).await.expect("update");

    let stored = collection
        .storage()
        .get_item(&path, &id)
        .await
        .expect("get")
        .expect("present");
    assert_eq!(stored.quantity, 3);
    assert_eq!(stored.created_at, original.created_at);
}

#[tokio::test]
async fn writes_to_other_paths_do_not_notify() {
    let collection = StorageCollection::new(memory_storage().await);
    let watched = CollectionPath::default();
    let mut stream = collection
        .subscribe(&watched, OrderKey::ExpirationDate)
        .await
        .expect("subscribe");
    next_snapshot(&mut stream).await;

    collection
        .create(&CollectionPath::new("inventory/private/items"), record("jam", (2025, 1, 1)))
        .await
        .expect("create");

    let quiet = tokio::time::timeout(Duration::from_millis(100), stream.next()).await;
    assert!(quiet.is_err(), "unrelated path must not produce a notification");
}

#[tokio::test]
async fn polling_picks_up_writes_from_another_handle() {
    let temp_root = tempfile::tempdir().expect("tempdir");
    let db_path = temp_root.path().join("pantry.db");
    let database_url = format!("sqlite://{}", db_path.to_string_lossy().replace('\\', "/"));
    let watcher = Storage::new(&database_url).await.expect("watcher db");
    let writer = Storage::new(&database_url).await.expect("writer db");
    let path = CollectionPath::default();

    let collection =
        StorageCollection::new(watcher).with_poll_interval(Some(Duration::from_millis(20)));
    let mut stream = collection
        .subscribe(&path, OrderKey::ExpirationDate)
        .await
        .expect("subscribe");
    assert!(next_snapshot(&mut stream).await.is_empty());

    let id = writer
        .insert_item(&path, &record("eggs", (2024, 6, 20)))
        .await
        .expect("insert");

    let items = next_snapshot(&mut stream).await;
    assert_eq!(items.len(), 1);
    assert_eq!(items[0].id, id);
}

#[tokio::test]
async fn polling_stays_quiet_while_nothing_changes() {
    let collection = StorageCollection::new(memory_storage().await)
        .with_poll_interval(Some(Duration::from_millis(10)));
    let mut stream = collection
        .subscribe(&CollectionPath::default(), OrderKey::ExpirationDate)
        .await
        .expect("subscribe");
    next_snapshot(&mut stream).await;

    let quiet = tokio::time::timeout(Duration::from_millis(100), stream.next()).await;
    assert!(quiet.is_err());
}

#[tokio::test]
async fn zero_poll_interval_disables_polling() {
    let collection = StorageCollection::new(memory_storage().await)
        .with_poll_interval(Some(Duration::ZERO));
    assert!(collection.poll_interval.is_none());
}

#[tokio::test]
async fn anonymous_identity_is_remembered_per_profile() {
    let storage = memory_storage().await;
    let provider = LocalIdentityProvider::new(storage.clone(), "default");
    assert_eq!(provider.resolve_existing_identity().await.expect("load"), None);

    let created = provider
        .create_anonymous_identity()
        .await
        .expect("anonymous");
    assert!(created.as_str().starts_with("anon-"));

    let reopened = LocalIdentityProvider::new(storage.clone(), "default");
    assert_eq!(
        reopened.resolve_existing_identity().await.expect("load"),
        Some(created)
    );
    let other = LocalIdentityProvider::new(storage, "kitchen");
    assert_eq!(other.resolve_existing_identity().await.expect("load"), None);
}

#[tokio::test]
async fn bootstrap_exchange_adopts_the_issued_identity() {
    let storage = memory_storage().await;
    let issued_for = UserId::new("user-shared");
    let token = storage
        .issue_bootstrap_credential(&issued_for)
        .await
        .expect("issue");
    let provider = LocalIdentityProvider::new(storage, "default");

    let user_id = provider
        .exchange_bootstrap_credential(&token)
        .await
        .expect("exchange");

    assert_eq!(user_id, issued_for);
    assert_eq!(
        provider.resolve_existing_identity().await.expect("load"),
        Some(issued_for)
    );
}

#[tokio::test]
async fn unknown_bootstrap_credential_is_rejected() {
    let provider = LocalIdentityProvider::new(memory_storage().await, "default");

    let err = provider
        .exchange_bootstrap_credential("not-a-token")
        .await
        .expect_err("unknown token");

    assert!(err.to_string().contains("unknown bootstrap credential"));
    assert_eq!(provider.resolve_existing_identity().await.expect("load"), None);
}

#[tokio::test]
async fn forget_clears_the_remembered_identity() {
    let provider = LocalIdentityProvider::new(memory_storage().await, "default");
    provider
        .create_anonymous_identity()
        .await
        .expect("anonymous");

    provider.forget().await.expect("forget");

    assert_eq!(provider.resolve_existing_identity().await.expect("load"), None);
}
