//! Outbound flow dispatch and inbound webhook reconciliation.
//!
//! `dispatch` carries operator actions (request info, propose resolution,
//! send report) upstream, shaped per ticket kind. `reconcile` applies
//! inbound webhook events to the store and mirrors them back out, undoing
//! newly created tickets when that mirror call fails.

pub mod dispatch;
pub mod reconcile;

pub use dispatch::{
    Attachment, FlowOperation, FlowOutcome, MessageType, ResolutionRequest, TicketFlows,
    OPEN_ACTIVE_STATE,
};
pub use reconcile::{
    ReconcileError, ReconcileOutcome, Reconciler, WebhookEvent, RETRY_ERROR_EVENT,
    RETRY_SUCCESS_EVENT, ROLLBACK_EVENT, WEBHOOK_IN_EVENT,
};
