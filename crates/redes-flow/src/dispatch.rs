//! Outbound flow dispatch keyed by ticket kind.
//!
//! The three operator actions share one payload-assembly path; a per-kind
//! profile toggles the few switches that actually differ (report state
//! marker, attachment re-encoding, restore-date rendering). Adding a kind
//! means adding a profile row, not another set of operations.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::{DateTime, Utc};
use redes_core::naive_local_timestamp;
use redes_store::{
    AttachmentRef, LocalAction, LocalHistory, LogDirection, LogStatus, NewLogEntry, StoreResult,
    Ticket, TicketKind, TicketStore, TicketStoreError,
};
use redes_sync::{PayloadAttachment, RemoteSyncClient, SyncResult, TicketKey, TicketPayload};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

/// State marker stamped on outbound payloads while a ticket is being worked.
pub const OPEN_ACTIVE_STATE: &str = "OPENACTIVE";

const DEFAULT_ATTACHMENT_MIME: &str = "application/octet-stream";

/// The three operator actions a flow can push upstream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlowOperation {
    RequestInfo,
    ProposeResolution,
    SendReport,
}

impl FlowOperation {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::RequestInfo => "request_info",
            Self::ProposeResolution => "propose_resolution",
            Self::SendReport => "send_report",
        }
    }

    fn history(self) -> LocalHistory {
        match self {
            Self::RequestInfo => LocalHistory::Requests,
            Self::ProposeResolution => LocalHistory::Resolutions,
            Self::SendReport => LocalHistory::Reports,
        }
    }
}

/// Payload-shaping switches that distinguish the kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct KindProfile {
    /// Report payloads carry the open-active state marker.
    state_marker_on_report: bool,
    /// Attachment content is re-encoded to base64 before forwarding.
    reencode_attachments: bool,
    /// Restore dates are rendered without a UTC offset suffix.
    naive_restore_date: bool,
}

impl KindProfile {
    const fn of(kind: TicketKind) -> Self {
        match kind {
            TicketKind::Standard => Self {
                state_marker_on_report: true,
                reencode_attachments: false,
                naive_restore_date: false,
            },
            TicketKind::Bulk => Self {
                state_marker_on_report: true,
                reencode_attachments: true,
                naive_restore_date: false,
            },
            TicketKind::ScheduledWorks => Self {
                state_marker_on_report: false,
                reencode_attachments: false,
                naive_restore_date: true,
            },
        }
    }
}

/// Attachment supplied with an operator action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Attachment {
    pub name: String,
    #[serde(default)]
    pub mime_type: Option<String>,
    pub content: String,
}

/// Banner category the UI renders for a completed action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    Success,
    Error,
}

/// User-facing outcome of a flow action.
///
/// Flows never surface raw faults; callers render `message` with the styling
/// `message_type` selects, and the event log keeps the fault detail.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlowOutcome {
    pub message: String,
    pub message_type: MessageType,
}

impl FlowOutcome {
    fn from_sync(result: &SyncResult) -> Self {
        if result.is_error() {
            Self {
                message: "failed to send request to Adamo".to_string(),
                message_type: MessageType::Error,
            }
        } else {
            Self {
                message: "request sent to Adamo".to_string(),
                message_type: MessageType::Success,
            }
        }
    }

    pub fn is_success(&self) -> bool {
        self.message_type == MessageType::Success
    }
}

/// Inputs for a propose-resolution action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolutionRequest {
    pub restore_date: DateTime<Utc>,
    pub raw_resolution: String,
    pub dialog: String,
    pub certification: Option<String>,
    pub department: Option<String>,
    pub raw_real_tipification: Option<String>,
    pub attachments: Vec<Attachment>,
}

/// Dispatches operator actions upstream according to a ticket's kind.
pub struct TicketFlows {
    store: Arc<dyn TicketStore>,
    sync: Arc<RemoteSyncClient>,
    clearance_person: String,
}

impl TicketFlows {
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

    /// Asks the remote side for more information on a ticket.
    pub async fn request_info(
        &self,
        primary_key: &str,
        dialog: &str,
        attachments: Vec<Attachment>,
    ) -> StoreResult<FlowOutcome> {
        let ticket = self.load_ticket(primary_key).await?;
        let payload = self.base_payload(&ticket, dialog, &attachments);
        let action = local_action(dialog, &attachments, BTreeMap::new());
        self.deliver(&ticket, FlowOperation::RequestInfo, payload, action)
            .await
    }

    /// Proposes a resolution with a restore date and resolution code.
    pub async fn propose_resolution(
        &self,
        primary_key: &str,
        request: ResolutionRequest,
    ) -> StoreResult<FlowOutcome> {
        let ticket = self.load_ticket(primary_key).await?;
        let profile = KindProfile::of(ticket.kind);
        let restore_date = render_restore_date(request.restore_date, profile);

        let mut payload = self.base_payload(&ticket, &request.dialog, &request.attachments);
        payload.date_restore_service = Some(restore_date.clone());
        payload.raw_resolution = Some(request.raw_resolution.clone());
        payload.certification = request.certification.clone();
        payload.department = request.department.clone();
        payload.raw_real_tipification = request.raw_real_tipification.clone();

        let mut fields = BTreeMap::new();
        fields.insert("restore_date".to_string(), restore_date);
        fields.insert("raw_resolution".to_string(), request.raw_resolution);
        if let Some(certification) = request.certification {
            fields.insert("certification".to_string(), certification);
        }
        if let Some(department) = request.department {
            fields.insert("department".to_string(), department);
        }
        if let Some(tipification) = request.raw_real_tipification {
            fields.insert("raw_real_tipification".to_string(), tipification);
        }
        let action = local_action(&request.dialog, &request.attachments, fields);
        self.deliver(&ticket, FlowOperation::ProposeResolution, payload, action)
            .await
    }

    /// Reports completed work back upstream.
    pub async fn send_report(
        &self,
        primary_key: &str,
        dialog: &str,
        attachments: Vec<Attachment>,
    ) -> StoreResult<FlowOutcome> {
        let ticket = self.load_ticket(primary_key).await?;
        let profile = KindProfile::of(ticket.kind);
        let mut payload = self.base_payload(&ticket, dialog, &attachments);
        if !profile.state_marker_on_report {
            payload.base_trouble_ticket_state = None;
        }
        let action = local_action(dialog, &attachments, BTreeMap::new());
        self.deliver(&ticket, FlowOperation::SendReport, payload, action)
            .await
    }

    async fn load_ticket(&self, primary_key: &str) -> StoreResult<Ticket> {
        self.store
            .get_ticket(primary_key)
            .await?
            .ok_or_else(|| TicketStoreError::TicketNotFound(primary_key.to_string()))
    }

    fn base_payload(
        &self,
        ticket: &Ticket,
        dialog: &str,
        attachments: &[Attachment],
    ) -> TicketPayload {
        let mut payload = TicketPayload::new(
            TicketKey {
                primary_key: ticket.primary_key.clone(),
                mirror_key: ticket.mirror_key.clone(),
            },
            dialog,
            self.clearance_person.as_str(),
        );
        payload.base_trouble_ticket_state = Some(OPEN_ACTIVE_STATE.to_string());
        payload.attachments = normalize_attachments(attachments, KindProfile::of(ticket.kind));
        payload
    }

    /// Pushes the payload, records the operation-tagged log entry, and
    /// appends the action to the matching local history.
    async fn deliver(
        &self,
        ticket: &Ticket,
        operation: FlowOperation,
        payload: TicketPayload,
        action: LocalAction,
    ) -> StoreResult<FlowOutcome> {
        let result = self.sync.push_ticket(&payload).await?;
        let status = if result.is_error() {
            LogStatus::Error
        } else {
            LogStatus::Success
        };
        self.store
            .append_log(
                NewLogEntry::new(flow_event(ticket.kind, operation), status)
                    .with_ticket(ticket.primary_key.as_str())
                    .with_direction(LogDirection::Out)
                    .with_payload(serde_json::to_string(&payload)?),
            )
            .await?;
        self.store
            .append_local_action(&ticket.primary_key, operation.history(), action)
            .await?;

        tracing::debug!(
            primary_key = ticket.primary_key.as_str(),
            kind = ticket.kind.as_str(),
            operation = operation.as_str(),
            success = !result.is_error(),
            "flow dispatched"
        );
        Ok(FlowOutcome::from_sync(&result))
    }
}

/// Event tag recorded for one flow invocation, e.g. `bulk_send_report`.
pub fn flow_event(kind: TicketKind, operation: FlowOperation) -> String {
    format!("{}_{}", kind.as_str(), operation.as_str())
}

fn render_restore_date(restore_date: DateTime<Utc>, profile: KindProfile) -> String {
    if profile.naive_restore_date {
        naive_local_timestamp(restore_date)
    } else {
        restore_date.to_rfc3339()
    }
}

fn normalize_attachments(attachments: &[Attachment], profile: KindProfile) -> Vec<PayloadAttachment> {
    attachments
        .iter()
        .map(|attachment| {
            let content = if profile.reencode_attachments {
                BASE64.encode(attachment.content.as_bytes())
            } else {
                attachment.content.clone()
            };
            PayloadAttachment {
                content,
                mime_type: attachment
                    .mime_type
                    .clone()
                    .unwrap_or_else(|| DEFAULT_ATTACHMENT_MIME.to_string()),
                name: attachment.name.clone(),
            }
        })
        .collect()
}

fn local_action(
    dialog: &str,
    attachments: &[Attachment],
    fields: BTreeMap<String, String>,
) -> LocalAction {
    let mut action = LocalAction::new(Some(dialog.to_string()));
    action.fields = fields;
    action.attachments = attachments
        .iter()
        .map(|attachment| AttachmentRef {
            name: attachment.name.clone(),
            mime_type: attachment
                .mime_type
                .clone()
                .unwrap_or_else(|| DEFAULT_ATTACHMENT_MIME.to_string()),
            bytes: attachment.content.len(),
        })
        .collect();
    action
}
