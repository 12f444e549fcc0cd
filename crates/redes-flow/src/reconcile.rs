//! Inbound webhook reconciliation and the manual retry trigger.

use redes_core::{allocate_mirror_key, current_unix_timestamp};
use redes_store::{
    LogDirection, LogStatus, NewLogEntry, StoreResult, Ticket, TicketKind, TicketStore,
    TicketStoreError,
};
use redes_sync::{RemoteSyncClient, SyncResult, TicketKey, TicketPayload};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;

/// Event type recorded for every accepted webhook delivery.
pub const WEBHOOK_IN_EVENT: &str = "webhook_in";
/// Event type recorded when a failed create-path sync is compensated.
pub const ROLLBACK_EVENT: &str = "rollback";
/// Event type recorded for a manual retry that reached the gateway.
pub const RETRY_SUCCESS_EVENT: &str = "retry_success";
/// Event type recorded for a manual retry the gateway rejected.
pub const RETRY_ERROR_EVENT: &str = "retry_error";

/// Inbound ticket update pushed by the remote authority.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookEvent {
    #[serde(default)]
    pub primary_key: Option<String>,
    #[serde(default)]
    pub mirror_key: Option<String>,
    #[serde(default, rename = "baseTroubleTicketState")]
    pub state: Option<String>,
    #[serde(default)]
    pub dialog: Option<String>,
}

/// Result of an accepted webhook delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconcileOutcome {
    pub mirror_key: String,
    pub created: bool,
}

/// Failures surfaced by reconciliation and retry.
#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("webhook event is missing primaryKey")]
    MissingPrimaryKey,
    #[error("ticket '{0}' not found")]
    TicketNotFound(String),
    #[error("outbound sync failed: {error}")]
    SyncFailed { error: String },
    #[error(transparent)]
    Store(#[from] TicketStoreError),
}

/// Applies inbound webhook events to the store and mirrors them back out.
pub struct Reconciler {
    store: Arc<dyn TicketStore>,
    sync: Arc<RemoteSyncClient>,
    clearance_person: String,
}

impl Reconciler {
    pub fn new(
        store: Arc<dyn TicketStore>,
        sync: Arc<RemoteSyncClient>,
        clearance_person: impl Into<String>,
    ) -> Self {
        Self {
            store,
            sync,
            clearance_person: clearance_person.into(),
        }
    }

    /// Applies one inbound event: create-or-update, then an immediate
    /// outbound sync.
    ///
    /// A ticket created by this event is removed again when the sync fails,
    /// so a create only stays visible once the mirror acknowledged it.
    /// Update-path failures keep the local write; the event log carries the
    /// fault and a manual retry can re-send later.
    pub async fn reconcile_webhook(
        &self,
        event: &WebhookEvent,
    ) -> Result<ReconcileOutcome, ReconcileError> {
        let primary_key = event
            .primary_key
            .as_deref()
            .map(str::trim)
            .filter(|key| !key.is_empty())
            .ok_or(ReconcileError::MissingPrimaryKey)?;

        let (ticket, created) = self.apply_event(primary_key, event).await?;
        self.store
            .append_log(
                NewLogEntry::new(WEBHOOK_IN_EVENT, LogStatus::Success)
                    .with_ticket(primary_key)
                    .with_direction(LogDirection::In)
                    .with_payload(serde_json::to_string(event).map_err(TicketStoreError::from)?),
            )
            .await?;
        tracing::debug!(primary_key, created, "webhook event applied");

        let payload = mirror_payload(&ticket, &self.clearance_person);
        let result = self.sync.push_ticket(&payload).await?;
        if result.is_error() {
            let error = result.error_text().to_string();
            if created {
                self.store.remove_ticket(primary_key).await?;
                self.store
                    .append_log(
                        NewLogEntry::new(ROLLBACK_EVENT, LogStatus::RolledBack)
                            .with_ticket(primary_key)
                            .with_direction(LogDirection::Local)
                            .with_payload(error.clone()),
                    )
                    .await?;
                tracing::warn!(primary_key, "removed webhook-created ticket after failed sync");
            } else {
                tracing::warn!(primary_key, "webhook sync failed, keeping updated ticket");
            }
            return Err(ReconcileError::SyncFailed { error });
        }

        Ok(ReconcileOutcome {
            mirror_key: ticket.mirror_key,
            created,
        })
    }

    /// Re-sends the ticket's current persisted fields without mutating it.
    pub async fn retry_sync(&self, primary_key: &str) -> Result<SyncResult, ReconcileError> {
        let ticket = self
            .store
            .get_ticket(primary_key)
            .await?
            .ok_or_else(|| ReconcileError::TicketNotFound(primary_key.to_string()))?;

        let payload = mirror_payload(&ticket, &self.clearance_person);
        let result = self.sync.push_ticket(&payload).await?;
        let (event_type, status) = if result.is_error() {
            (RETRY_ERROR_EVENT, LogStatus::Error)
        } else {
            (RETRY_SUCCESS_EVENT, LogStatus::Success)
        };
        self.store
            .append_log(
                NewLogEntry::new(event_type, status)
                    .with_ticket(primary_key)
                    .with_direction(LogDirection::Out)
                    .with_payload(serde_json::to_string(&result).map_err(TicketStoreError::from)?),
            )
            .await?;
        Ok(result)
    }

    async fn apply_event(
        &self,
        primary_key: &str,
        event: &WebhookEvent,
    ) -> StoreResult<(Ticket, bool)> {
        if self.store.get_ticket(primary_key).await?.is_some() {
            let updated = self.update_from_event(primary_key, event).await?;
            return Ok((updated, false));
        }

        let mirror_key = non_empty(&event.mirror_key)
            .unwrap_or_else(|| allocate_mirror_key(current_unix_timestamp()));
        let mut ticket = Ticket::new(primary_key, mirror_key, TicketKind::Standard);
        ticket.state = non_empty(&event.state);
        ticket.dialog = non_empty(&event.dialog);
        match self.store.insert_ticket(ticket.clone()).await {
            Ok(()) => Ok((ticket, true)),
            // Two deliveries can race on first sight; the loser folds into
            // an update against the row the winner committed.
            Err(TicketStoreError::TicketAlreadyExists(_)) => {
                let updated = self.update_from_event(primary_key, event).await?;
                Ok((updated, false))
            }
            Err(error) => Err(error),
        }
    }

    async fn update_from_event(
        &self,
        primary_key: &str,
        event: &WebhookEvent,
    ) -> StoreResult<Ticket> {
        self.store
            .update_ticket_fields(primary_key, non_empty(&event.state), non_empty(&event.dialog))
            .await
    }
}

/// Builds the outbound payload for a ticket's current fields.
fn mirror_payload(ticket: &Ticket, clearance_person: &str) -> TicketPayload {
    let mut payload = TicketPayload::new(
        TicketKey {
            primary_key: ticket.primary_key.clone(),
            mirror_key: ticket.mirror_key.clone(),
        },
        ticket.dialog.clone().unwrap_or_default(),
        clearance_person,
    );
    payload.base_trouble_ticket_state = ticket.state.clone();
    payload
}

fn non_empty(value: &Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|text| !text.is_empty())
        .map(str::to_string)
}
