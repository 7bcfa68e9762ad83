//! Identity gate. Reads and writes stay blocked until the session is resolved.

use std::sync::Arc;

use anyhow::{anyhow, Result};
use shared::{domain::UserId, error::InventoryError};
use tracing::{error, info};

use crate::{
    collaborators::IdentityProvider,
    context::{InventoryContext, SessionState},
};

pub struct SessionGate {
    context: Arc<InventoryContext>,
    identity: Arc<dyn IdentityProvider>,
    bootstrap_credential: Option<String>,
}

impl SessionGate {
    pub fn new(
        context: Arc<InventoryContext>,
        identity: Arc<dyn IdentityProvider>,
        bootstrap_credential: Option<String>,
    ) -> Self {
        Self {
            context,
            identity,
            bootstrap_credential: bootstrap_credential.filter(|token| !token.trim().is_empty()),
        }
    }

    /// Starts resolution from `Unresolved` or `Failed`. A caller arriving while
    /// another resolution is running waits for it instead of starting a second one.
    pub async fn begin(&self) -> SessionState {
        let claimed = self
            .context
            .update_if(|state| match state.session {
                SessionState::Unresolved | SessionState::Failed(_) => {
                    state.session = SessionState::Resolving;
                    state.session_epoch += 1;
                    (Some(state.session_epoch), true)
                }
                SessionState::Resolving | SessionState::Resolved(_) => (None, false),
            })
            .await;

        let Some(epoch) = claimed else {
            return self.wait_until_settled().await;
        };

        info!(epoch, "session: resolving identity");
        let context = Arc::clone(&self.context);
        let identity = Arc::clone(&self.identity);
        let credential = self.bootstrap_credential.clone();
        // Detached so the claimed epoch always settles, even if this caller stops waiting.
        let task = tokio::spawn(async move {
            let outcome = resolve(identity.as_ref(), credential.as_deref()).await;
            settle(&context, epoch, outcome).await
        });

        match task.await {
            Ok(state) => state,
            Err(err) => {
                let outcome = Err(anyhow!("identity resolution task failed: {err}"));
                settle(&self.context, epoch, outcome).await
            }
        }
    }

    /// Returns once no resolution is running.
    pub async fn wait_until_settled(&self) -> SessionState {
        let mut session = self.context.watch_session();
        let settled = match session.wait_for(|state| !state.is_resolving()).await {
            Ok(state) => Some(state.clone()),
            Err(_) => None,
        };
        match settled {
            Some(state) => state,
            None => self.context.session().await,
        }
    }

    /// Identity changed: forget the current session so the next `begin` resolves again.
    pub async fn invalidate(&self) {
        self.context
            .update(|state| {
                state.session = SessionState::Unresolved;
                state.session_epoch += 1;
            })
            .await;
        info!("session: invalidated");
    }

    pub async fn current(&self) -> SessionState {
        self.context.session().await
    }

}

async fn resolve(identity: &dyn IdentityProvider, credential: Option<&str>) -> Result<UserId> {
    if let Some(existing) = identity.resolve_existing_identity().await? {
        return Ok(existing);
    }

    match credential {
        Some(token) => {
            info!("session: exchanging bootstrap credential");
            identity.exchange_bootstrap_credential(token).await
        }
        None => {
            info!("session: creating anonymous identity");
            identity.create_anonymous_identity().await
        }
    }
}

async fn settle(context: &InventoryContext, epoch: u64, outcome: Result<UserId>) -> SessionState {
    let (session, error) = match outcome {
        Ok(user_id) => {
            info!(epoch, user_id = %user_id, "session: resolved");
            (SessionState::Resolved(user_id), None)
        }
        Err(err) => {
            error!(epoch, "session: identity resolution failed: {err:#}");
            let message = format!("{err:#}");
            let error = InventoryError::authentication(format!(
                "could not establish a session: {message}"
            ));
            (SessionState::Failed(message), Some(error))
        }
    };

    context
        .update_if(|state| {
            // A newer invalidate/begin owns the session now.
            if state.session_epoch != epoch {
                return (state.session.clone(), false);
            }
            state.session = session;
            if let Some(error) = error {
                state.error = Some(error);
            }
            (state.session.clone(), true)
        })
        .await
}

#[cfg(test)]
#[path = "tests/session_tests.rs"]
mod tests;
