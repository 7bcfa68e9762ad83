//! Turns drafts and delete intents into exactly one remote operation each.
//!
//! The busy flag doubles as a single-slot guard: a second mutation issued
//! while one is in flight is rejected with `OperationInFlight`. Nothing here
//! touches the snapshot; the mirror's next notification reflects the write.

use std::sync::Arc;

use chrono::Utc;
use shared::{
    domain::{Item, ItemId, ItemRecord, UserId},
    error::InventoryError,
    protocol::CollectionPath,
};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::{
    collaborators::RemoteCollection,
    context::{ContextState, InventoryContext},
    draft::Draft,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmitOutcome {
    Created(ItemId),
    Updated(ItemId),
}

impl SubmitOutcome {
    pub fn item_id(&self) -> &ItemId {
        match self {
            Self::Created(id) | Self::Updated(id) => id,
        }
    }
}

pub struct MutationCoordinator {
    context: Arc<InventoryContext>,
    collection: Arc<dyn RemoteCollection>,
    path: CollectionPath,
}

impl MutationCoordinator {
    pub fn new(
        context: Arc<InventoryContext>,
        collection: Arc<dyn RemoteCollection>,
        path: CollectionPath,
    ) -> Self {
        Self {
            context,
            collection,
            path,
        }
    }

    pub async fn submit(&self, draft: Draft) -> Result<SubmitOutcome, InventoryError> {
        let validated = match draft.validate() {
            Ok(validated) => validated,
            Err(err) => {
                let err = InventoryError::validation(err.to_string());
                self.reject(err.clone(), Some(draft)).await;
                return Err(err);
            }
        };

        let Some(owner_id) = self.resolved_user().await else {
            let err = InventoryError::not_ready("cannot save before the session is resolved");
            self.reject(err.clone(), Some(draft)).await;
            return Err(err);
        };

        let submitted = draft.clone();
        if !self.claim(|state| state.draft = submitted).await {
            warn!(name = %validated.name, "coordinator: submit rejected, mutation in flight");
            return Err(InventoryError::in_flight(
                "another change is still being saved",
            ));
        }

        let record = ItemRecord {
            name: validated.name,
            quantity: validated.quantity,
            expiration_date: validated.expiration_date,
            owner_id,
            created_at: match &draft.editing {
                Some(target) => target.created_at,
                None => Utc::now(),
            },
        };

        let context = Arc::clone(&self.context);
        let collection = Arc::clone(&self.collection);
        let path = self.path.clone();
        let editing = draft.editing;
        // Detached so the busy slot is released even if the caller stops waiting.
        let task = tokio::spawn(async move {
            let name = record.name.clone();
            let result = match &editing {
                Some(target) => collection
                    .update(&path, &target.id, record)
                    .await
                    .map(|()| SubmitOutcome::Updated(target.id.clone())),
                None => collection
                    .create(&path, record)
                    .await
                    .map(SubmitOutcome::Created),
            };

            match result {
                Ok(outcome) => {
                    context
                        .update(|state| {
                            state.busy = false;
                            state.draft = Draft::default();
                        })
                        .await;
                    info!(item_id = %outcome.item_id(), name = %name, "coordinator: saved item");
                    Ok(outcome)
                }
                Err(err) => {
                    error!(name = %name, "coordinator: save failed: {err:#}");
                    let err = InventoryError::save(format!("failed to save '{name}': {err:#}"));
                    context
                        .report_with(err.clone(), |state| state.busy = false)
                        .await;
                    Err(err)
                }
            }
        });

        self.join(task, |message| InventoryError::save(message)).await
    }

    /// Deletes by identity. The item stays visible until the mirror says otherwise.
    pub async fn remove(&self, item_id: &ItemId) -> Result<(), InventoryError> {
        if self.resolved_user().await.is_none() {
            let err = InventoryError::not_ready("cannot delete before the session is resolved");
            self.reject(err.clone(), None).await;
            return Err(err);
        }

        if !self.claim(|_| {}).await {
            warn!(item_id = %item_id, "coordinator: remove rejected, mutation in flight");
            return Err(InventoryError::in_flight(
                "another change is still being saved",
            ));
        }

        let context = Arc::clone(&self.context);
        let collection = Arc::clone(&self.collection);
        let path = self.path.clone();
        let item_id = item_id.clone();
        let task = tokio::spawn(async move {
            match collection.delete(&path, &item_id).await {
                Ok(()) => {
                    context.update(|state| state.busy = false).await;
                    info!(item_id = %item_id, "coordinator: deleted item");
                    Ok(())
                }
                Err(err) => {
                    error!(item_id = %item_id, "coordinator: delete failed: {err:#}");
                    let err =
                        InventoryError::delete(format!("failed to delete '{item_id}': {err:#}"));
                    context
                        .report_with(err.clone(), |state| state.busy = false)
                        .await;
                    Err(err)
                }
            }
        });

        self.join(task, |message| InventoryError::delete(message)).await
    }

    pub async fn begin_edit(&self, item: &Item) {
        let draft = Draft::from_item(item);
        self.context.update(|state| state.draft = draft).await;
    }

    pub async fn cancel_edit(&self) {
        self.context
            .update(|state| state.draft = Draft::default())
            .await;
    }

    pub async fn update_draft(&self, edit: impl FnOnce(&mut Draft)) {
        self.context.update(|state| edit(&mut state.draft)).await;
    }

    async fn resolved_user(&self) -> Option<UserId> {
        self.context.session().await.user_id().cloned()
    }

    /// Takes the busy slot and clears the previous error in one step.
    async fn claim(&self, on_claim: impl FnOnce(&mut ContextState)) -> bool {
        self.context
            .update_if(|state| {
                if state.busy {
                    return (false, false);
                }
                state.busy = true;
                state.error = None;
                on_claim(state);
                (true, true)
            })
            .await
    }

    /// Records a rejected request unless another mutation owns the slot; the
    /// running operation's draft and error are never overwritten.
    async fn reject(&self, error: InventoryError, draft: Option<Draft>) {
        warn!(kind = ?error.kind, message = %error.message, "coordinator: request rejected");
        self.context
            .update_if(|state| {
                if state.busy {
                    return ((), false);
                }
                if let Some(draft) = draft {
                    state.draft = draft;
                }
                state.error = Some(error);
                ((), true)
            })
            .await;
    }

    /// A panicked mutation task still frees the busy slot.
    async fn join<T>(
        &self,
        task: JoinHandle<Result<T, InventoryError>>,
        on_failure: impl FnOnce(String) -> InventoryError,
    ) -> Result<T, InventoryError> {
        match task.await {
            Ok(result) => result,
            Err(err) => {
                error!("coordinator: mutation task failed: {err}");
                let err = on_failure(format!("mutation task failed: {err}"));
                self.context
                    .report_with(err.clone(), |state| state.busy = false)
                    .await;
                Err(err)
            }
        }
    }
}

#[cfg(test)]
#[path = "tests/coordinator_tests.rs"]
mod tests;
