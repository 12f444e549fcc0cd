//! Outbound sync client for mirroring tickets to the Adamo gateway.
//!
//! Every push writes a pending event-log entry before touching the network
//! and a terminal entry after, so the log always tells whether a call was
//! in flight when the process died. Remote faults and transport failures are
//! returned as data; `push_ticket` only errors when the local store does.

use anyhow::{bail, Context, Result};
use redes_store::{LogDirection, LogStatus, NewLogEntry, StoreResult, TicketStore};
use reqwest::header::CONTENT_TYPE;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

mod envelope;

pub use envelope::{extract_fault_string, render_set_ticket_envelope};

/// Event type recorded for every outbound gateway call.
pub const SOAP_OUT_EVENT: &str = "soap_out";

/// Key pair identifying a ticket on both sides of the mirror.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TicketKey {
    pub primary_key: String,
    pub mirror_key: String,
}

/// Attachment forwarded inside an outbound payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PayloadAttachment {
    pub content: String,
    pub mime_type: String,
    pub name: String,
}

/// Outbound `setTroubleTicketByValue` payload in the gateway's wire shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TicketPayload {
    pub trouble_ticket_key: TicketKey,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_trouble_ticket_state: Option<String>,
    pub dialog: String,
    pub clearance_person: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub date_restore_service: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw_resolution: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub certification: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub department: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw_real_tipification: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attachments: Vec<PayloadAttachment>,
}

impl TicketPayload {
    /// Creates a payload with only the required fields set.
    pub fn new(
        trouble_ticket_key: TicketKey,
        dialog: impl Into<String>,
        clearance_person: impl Into<String>,
    ) -> Self {
        Self {
            trouble_ticket_key,
            base_trouble_ticket_state: None,
            dialog: dialog.into(),
            clearance_person: clearance_person.into(),
            date_restore_service: None,
            raw_resolution: None,
            certification: None,
            department: None,
            raw_real_tipification: None,
            attachments: Vec::new(),
        }
    }
}

/// Target Adamo environment for outbound calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncEnvironment {
    PreProduction,
    Production,
}

impl SyncEnvironment {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::PreProduction => "pre_production",
            Self::Production => "production",
        }
    }
}

/// Whether outbound calls hit the wire or are echoed locally.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncMode {
    Simulated,
    Live,
}

impl SyncMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Simulated => "simulated",
            Self::Live => "live",
        }
    }
}

/// Recognized families of gateway faults.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FaultKind {
    IllegalArgument,
    SetException,
    ObjectNotFound,
    RemoteException,
    Unknown,
}

impl FaultKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::IllegalArgument => "illegal_argument",
            Self::SetException => "set_exception",
            Self::ObjectNotFound => "object_not_found",
            Self::RemoteException => "remote_exception",
            Self::Unknown => "unknown",
        }
    }

    /// Classifies a fault string by the exception-name marker it carries.
    pub fn classify(fault_text: &str) -> Self {
        let lowered = fault_text.to_ascii_lowercase();
        if lowered.contains("illegalargument") {
            Self::IllegalArgument
        } else if lowered.contains("setexception") {
            Self::SetException
        } else if lowered.contains("objectnotfound") {
            Self::ObjectNotFound
        } else if lowered.contains("remoteexception") {
            Self::RemoteException
        } else {
            Self::Unknown
        }
    }
}

/// Terminal status of a push attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
    Success,
    Error,
}

/// Structured outcome of one push attempt.
///
/// Serializes as `{status, body}` on success and `{status, error, type}` on
/// failure, which is the shape the retry endpoint returns unchanged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncResult {
    pub status: SyncStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub fault: Option<FaultKind>,
}

impl SyncResult {
    pub fn success(body: impl Into<String>) -> Self {
        Self {
            status: SyncStatus::Success,
            body: Some(body.into()),
            error: None,
            fault: None,
        }
    }

    pub fn fault(kind: FaultKind, error: impl Into<String>) -> Self {
        Self {
            status: SyncStatus::Error,
            body: None,
            error: Some(error.into()),
            fault: Some(kind),
        }
    }

    pub fn is_error(&self) -> bool {
        self.status == SyncStatus::Error
    }

    pub fn error_text(&self) -> &str {
        self.error.as_deref().unwrap_or("")
    }
}

/// Configuration for the outbound sync client.
#[derive(Debug, Clone)]
pub struct RemoteSyncConfig {
    pub mode: SyncMode,
    pub environment: SyncEnvironment,
    pub endpoint_pre: String,
    pub endpoint_pro: String,
    pub request_timeout_ms: u64,
    pub username: Option<String>,
    pub password: Option<String>,
}

impl Default for RemoteSyncConfig {
    fn default() -> Self {
        Self {
            mode: SyncMode::Simulated,
            environment: SyncEnvironment::PreProduction,
            endpoint_pre: String::new(),
            endpoint_pro: String::new(),
            request_timeout_ms: 10_000,
            username: None,
            password: None,
        }
    }
}

impl RemoteSyncConfig {
    /// Returns the gateway endpoint for the configured environment.
    pub fn active_endpoint(&self) -> &str {
        match self.environment {
            SyncEnvironment::PreProduction => self.endpoint_pre.as_str(),
            SyncEnvironment::Production => self.endpoint_pro.as_str(),
        }
    }
}

/// Client pushing mirrored tickets to the Adamo SOAP gateway.
pub struct RemoteSyncClient {
    config: RemoteSyncConfig,
    client: Client,
    store: Arc<dyn TicketStore>,
}

impl std::fmt::Debug for RemoteSyncClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteSyncClient")
            .field("config", &self.config)
            .field("client", &self.client)
            .finish_non_exhaustive()
    }
}

impl RemoteSyncClient {
    pub fn new(config: RemoteSyncConfig, store: Arc<dyn TicketStore>) -> Result<Self> {
        if config.mode == SyncMode::Live && config.active_endpoint().trim().is_empty() {
            bail!(
                "live sync mode requires an endpoint for the {} environment",
                config.environment.as_str()
            );
        }

        let request_timeout_ms = config.request_timeout_ms.max(1_000);
        let client = Client::builder()
            .timeout(Duration::from_millis(request_timeout_ms))
            .build()
            .context("failed to construct reqwest client for adamo sync")?;
        Ok(Self {
            config,
            client,
            store,
        })
    }

    pub fn mode(&self) -> SyncMode {
        self.config.mode
    }

    pub fn environment(&self) -> SyncEnvironment {
        self.config.environment
    }

    /// Pushes `payload` to the gateway and returns a structured result.
    ///
    /// Errors only when event-log writes fail; remote faults, non-2xx
    /// statuses, and transport failures all come back inside `SyncResult`.
    pub async fn push_ticket(&self, payload: &TicketPayload) -> StoreResult<SyncResult> {
        let snapshot = serde_json::to_string(payload)?;
        self.store
            .append_log(
                NewLogEntry::new(SOAP_OUT_EVENT, LogStatus::Pending)
                    .with_ticket(payload.trouble_ticket_key.primary_key.as_str())
                    .with_direction(LogDirection::Out)
                    .with_payload(snapshot.clone()),
            )
            .await?;

        let result = match self.config.mode {
            SyncMode::Simulated => SyncResult::success(snapshot),
            SyncMode::Live => self.dispatch_live(payload).await,
        };

        let terminal_status = if result.is_error() {
            LogStatus::Error
        } else {
            LogStatus::Success
        };
        self.store
            .append_log(
                NewLogEntry::new(SOAP_OUT_EVENT, terminal_status)
                    .with_ticket(payload.trouble_ticket_key.primary_key.as_str())
                    .with_direction(LogDirection::Out)
                    .with_payload(serde_json::to_string(&result)?),
            )
            .await?;

        if result.is_error() {
            tracing::warn!(
                primary_key = payload.trouble_ticket_key.primary_key.as_str(),
                environment = self.config.environment.as_str(),
                fault = result.fault.map(FaultKind::as_str),
                "adamo push failed"
            );
        } else {
            tracing::debug!(
                primary_key = payload.trouble_ticket_key.primary_key.as_str(),
                environment = self.config.environment.as_str(),
                "adamo push succeeded"
            );
        }
        Ok(result)
    }

    async fn dispatch_live(&self, payload: &TicketPayload) -> SyncResult {
        let body = render_set_ticket_envelope(payload);
        let mut request = self
            .client
            .post(self.config.active_endpoint())
            .header(CONTENT_TYPE, "text/xml; charset=utf-8")
            .header("SOAPAction", "\"\"")
            .body(body);
        if let Some(username) = self.config.username.as_deref() {
            request = request.basic_auth(username, self.config.password.as_deref());
        }

        let response = match request.send().await {
            Ok(response) => response,
            Err(error) => {
                return SyncResult::fault(
                    FaultKind::Unknown,
                    format!("transport failure: {error}"),
                );
            }
        };

        let status = response.status();
        let text = match response.text().await {
            Ok(text) => text,
            Err(error) => {
                return SyncResult::fault(
                    FaultKind::Unknown,
                    format!("failed to read gateway response: {error}"),
                );
            }
        };

        if let Some(fault) = extract_fault_string(&text) {
            return SyncResult::fault(FaultKind::classify(&fault), fault);
        }
        if !status.is_success() {
            return SyncResult::fault(
                FaultKind::Unknown,
                format!("gateway returned http {}", status.as_u16()),
            );
        }
        SyncResult::success(text)
    }
}
