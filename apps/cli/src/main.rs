use std::{path::PathBuf, sync::Arc, time::Duration};

use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, Subcommand};
use client_core::{
    backend::{LocalIdentityProvider, StorageCollection},
    Draft, IdentityProvider, InventoryClient, SessionState, Snapshot, ViewState,
};
use serde::Serialize;
use shared::{
    domain::{Item, ItemId, UserId},
    freshness::{today_local, FreshnessStatus},
};
use storage::Storage;
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::info;
use tracing_subscriber::EnvFilter;

mod config;

use config::{load_settings, normalize_database_url, Settings, DEFAULT_CONFIG_FILE};

const SYNC_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Parser, Debug)]
#[command(name = "pantry", about = "Shared perishable inventory")]
struct Args {
    #[arg(long, default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,
    #[arg(long)]
    database_url: Option<String>,
    #[arg(long)]
    profile: Option<String>,
    /// Adopt the identity behind a token issued with `issue-token`.
    #[arg(long)]
    token: Option<String>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the collection ordered by expiration date.
    List {
        #[arg(long)]
        json: bool,
    },
    /// Re-print the collection on every change until Ctrl-C.
    Watch,
    Add {
        name: String,
        #[arg(long, short, default_value = "1")]
        quantity: String,
        /// YYYY-MM-DD
        #[arg(long, short)]
        expires: String,
    },
    Edit {
        id: String,
        #[arg(long)]
        name: Option<String>,
        #[arg(long, short)]
        quantity: Option<String>,
        #[arg(long, short)]
        expires: Option<String>,
    },
    Remove {
        id: String,
    },
    Whoami,
    /// Mint a token that lets another profile share this identity.
    IssueToken,
    /// Drop the remembered identity for this profile.
    ForgetIdentity,
}

#[derive(Serialize)]
struct Row<'a> {
    #[serde(flatten)]
    item: &'a Item,
    status: FreshnessStatus,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();
    let args = Args::parse();

    let mut settings = load_settings(&args.config);
    apply_overrides(&mut settings, &args);
    let database_url = normalize_database_url(&settings.database_url);
    let storage = Storage::new(&database_url)
        .await
        .with_context(|| format!("failed to open {database_url}"))?;
    let identity = Arc::new(LocalIdentityProvider::new(
        storage.clone(),
        settings.profile.clone(),
    ));
    info!(database_url = %database_url, profile = %settings.profile, "pantry: storage ready");

    let collection =
        StorageCollection::new(storage.clone()).with_poll_interval(settings.poll_interval());
    let client = InventoryClient::new(
        settings.client_config(),
        Arc::clone(&identity) as Arc<dyn IdentityProvider>,
        Arc::new(collection),
    );

    let result = run(&client, &storage, &identity, args.command).await;
    client.shutdown().await;
    result
}

fn apply_overrides(settings: &mut Settings, args: &Args) {
    if let Some(v) = &args.database_url {
        settings.database_url = v.clone();
    }
    if let Some(v) = &args.profile {
        settings.profile = v.clone();
    }
    if let Some(v) = &args.token {
        settings.bootstrap_token = Some(v.clone());
    }
}

async fn run(
    client: &InventoryClient,
    storage: &Storage,
    identity: &LocalIdentityProvider,
    command: Command,
) -> Result<()> {
    match command {
        Command::Whoami => {
            let user_id = resolve(client).await?;
            println!("{user_id}");
        }
        Command::IssueToken => {
            let user_id = resolve(client).await?;
            let token = storage.issue_bootstrap_credential(&user_id).await?;
            println!("{token}");
        }
        Command::List { json } => {
            client.connect().await?;
            let view = synced_view(client).await?;
            if json {
                let today = today_local();
                let rows: Vec<Row<'_>> = view
                    .snapshot
                    .classified(today)
                    .into_iter()
                    .map(|(item, status)| Row { item, status })
                    .collect();
                println!("{}", serde_json::to_string_pretty(&rows)?);
            } else {
                print_snapshot(&view.snapshot);
            }
        }
        Command::Watch => {
            let mut events = client.subscribe_events();
            client.connect().await?;
            let initial = synced_view(client).await?.snapshot;
            print_snapshot(&initial);
            watch(&mut events, initial).await?;
        }
        Command::Add {
            name,
            quantity,
            expires,
        } => {
            client.connect().await?;
            let outcome = client.submit(Draft::new(name, quantity, expires)).await?;
            println!("Added {}", outcome.item_id());
        }
        Command::Edit {
            id,
            name,
            quantity,
            expires,
        } => {
            client.connect().await?;
            let id = ItemId::new(id);
            let view = synced_view(client).await?;
            let item = view
                .snapshot
                .get(&id)
                .ok_or_else(|| anyhow!("no item with id {id}"))?;
            client.begin_edit(item).await;
            client
                .update_draft(|draft| {
                    if let Some(name) = name {
                        draft.name = name;
                    }
                    if let Some(quantity) = quantity {
                        draft.quantity = quantity;
                    }
                    if let Some(expires) = expires {
                        draft.expiration_date = expires;
                    }
                })
                .await;
            let outcome = client.submit_current().await?;
            println!("Updated {}", outcome.item_id());
        }
        Command::Remove { id } => {
            client.connect().await?;
            let id = ItemId::new(id);
            client.remove(&id).await?;
            println!("Removed {id}");
        }
        Command::ForgetIdentity => {
            identity.forget().await?;
            println!("Forgot identity for profile '{}'", identity.profile());
        }
    }
    Ok(())
}

async fn resolve(client: &InventoryClient) -> Result<UserId> {
    match client.begin_session().await {
        SessionState::Resolved(user_id) => Ok(user_id),
        SessionState::Failed(message) => bail!("could not resolve identity: {message}"),
        other => bail!("session did not settle: {other:?}"),
    }
}

async fn synced_view(client: &InventoryClient) -> Result<ViewState> {
    let view = client
        .wait_for_view(SYNC_TIMEOUT, |view| view.synced || view.error.is_some())
        .await
        .ok_or_else(|| anyhow!("timed out waiting for the collection"))?;
    match view.error {
        Some(err) if !view.synced => Err(err.into()),
        _ => Ok(view),
    }
}

async fn watch(events: &mut broadcast::Receiver<ViewState>, mut last: Snapshot) -> Result<()> {
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    loop {
        tokio::select! {
            _ = &mut ctrl_c => {
                info!("pantry: interrupted");
                return Ok(());
            }
            event = events.recv() => match event {
                Ok(view) => {
                    if let Some(err) = &view.error {
                        eprintln!("! {err}");
                    }
                    if view.synced && view.snapshot != last {
                        println!();
                        print_snapshot(&view.snapshot);
                        last = view.snapshot;
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    info!(skipped, "pantry: skipped stale view states");
                }
                Err(RecvError::Closed) => return Ok(()),
            }
        }
    }
}

fn print_snapshot(snapshot: &Snapshot) {
    if snapshot.is_empty() {
        println!("(no items)");
        return;
    }
    for (item, status) in snapshot.classified(today_local()) {
        println!(
            "{:<13} {}  {:>4}  {}  [{}]",
            status.as_str(),
            item.expiration_date,
            item.quantity,
            item.name,
            item.id
        );
    }
}
