use std::sync::Arc;

use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use axum::response::Response;
use axum::Router;
use httpmock::Method::POST;
use httpmock::MockServer;
use redes_server::{build_server_router, ServerConfig, ServerState};
use redes_store::{InMemoryTicketStore, PageQuery, TicketStore};
use redes_sync::{RemoteSyncConfig, SyncMode};
use serde_json::{json, Value};
use tempfile::TempDir;
use tower::ServiceExt;

struct MirrorHarness {
    router: Router,
    // Kept alive so the SQLite database outlives the scenario.
    _workdir: TempDir,
}

impl MirrorHarness {
    fn simulated() -> Self {
        Self::with_sync(RemoteSyncConfig::default())
    }

    fn live(gateway_url: String) -> Self {
        Self::with_sync(RemoteSyncConfig {
            mode: SyncMode::Live,
            endpoint_pre: gateway_url,
            ..RemoteSyncConfig::default()
        })
    }

    fn with_sync(sync: RemoteSyncConfig) -> Self {
        let workdir = TempDir::new().expect("create scenario workdir");
        let config = ServerConfig {
            database_path: workdir.path().join("mirror.sqlite3"),
            sync,
            ..ServerConfig::default()
        };
        let state = ServerState::from_config(config).expect("open mirror state");
        Self {
            router: build_server_router(Arc::new(state)),
            _workdir: workdir,
        }
    }

    async fn send(&self, request: Request<Body>) -> Response {
        self.router
            .clone()
            .oneshot(request)
            .await
            .expect("route request")
    }

    async fn send_json(&self, method: &str, uri: &str, token: Option<&str>, body: Value) -> Value {
        let response = self.send(json_request(method, uri, token, body)).await;
        let status = response.status();
        let parsed = response_json(response).await;
        assert!(
            status.is_success(),
            "{method} {uri} answered {status}: {parsed}"
        );
        parsed
    }

    async fn get_json(&self, uri: &str, token: &str) -> Value {
        let response = self.send(bare_request("GET", uri, Some(token))).await;
        let status = response.status();
        let parsed = response_json(response).await;
        assert!(status.is_success(), "GET {uri} answered {status}: {parsed}");
        parsed
    }

    async fn operator_token(&self) -> String {
        let registered = self
            .send(json_request(
                "POST",
                "/auth/register",
                None,
                json!({"email": "field@example.com", "password": "hunter2"}),
            ))
            .await;
        assert_eq!(registered.status(), StatusCode::OK);

        let login = self
            .send_json(
                "POST",
                "/auth/login",
                None,
                json!({"email": "field@example.com", "password": "hunter2"}),
            )
            .await;
        login["access_token"]
            .as_str()
            .expect("session token issued")
            .to_string()
    }

    async fn deliver_webhook(&self, primary_key: &str, dialog: &str) -> Value {
        self.send_json(
            "POST",
            "/webhook/adamo",
            None,
            json!({
                "primaryKey": primary_key,
                "baseTroubleTicketState": "OPENACTIVE",
                "dialog": dialog,
            }),
        )
        .await
    }

    async fn log_entries(&self, token: &str) -> Vec<Value> {
        let logs = self
            .send(bare_request(
                "GET",
                "/logs?limit=200",
                Some(token),
            ))
            .await;
        assert_eq!(logs.status(), StatusCode::OK);
        response_json(logs)
            .await
            .as_array()
            .expect("log entries array")
            .clone()
    }
}

fn json_request(method: &str, uri: &str, token: Option<&str>, body: Value) -> Request<Body> {
    let mut builder = Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json");
    if let Some(token) = token {
        builder = builder.header("authorization", format!("Bearer {token}"));
    }
    builder
        .body(Body::from(body.to_string()))
        .expect("build json request")
}

fn bare_request(method: &str, uri: &str, token: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(token) = token {
        builder = builder.header("authorization", format!("Bearer {token}"));
    }
    builder.body(Body::empty()).expect("build bare request")
}

async fn response_json(response: Response) -> Value {
    let body = to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("read response body");
    serde_json::from_slice(&body).expect("parse response json")
}

fn events_of(entries: &[Value], event_type: &str) -> Vec<Value> {
    entries
        .iter()
        .filter(|entry| entry["event_type"] == event_type)
        .cloned()
        .collect()
}

#[tokio::test]
async fn integration_webhook_to_retry_pipeline_over_sqlite() {
    let harness = MirrorHarness::simulated();

    let created = harness.deliver_webhook("IB-9001", "loss of signal at cab 12").await;
    assert_eq!(created["status"], "ok");
    assert_eq!(created["created"], true);
    let mirror_key = created["mirrorKey"].as_str().expect("mirror key");
    assert!(mirror_key.starts_with("RED-"));
    assert!(mirror_key["RED-".len()..].bytes().all(|b| b.is_ascii_digit()));

    let token = harness.operator_token().await;

    harness
        .send_json(
            "POST",
            "/tickets/IB-9001/request_info",
            Some(&token),
            json!({"dialog": "which splitter port is affected?"}),
        )
        .await;
    harness
        .send_json(
            "POST",
            "/tickets/IB-9001/propose_resolution",
            Some(&token),
            json!({
                "dateRestoreService": "2024-06-01T08:00:00Z",
                "rawResolution": "FTTH_REVENTA_ACTUACION_EN_RED",
                "dialog": "splice redone at cab 12",
                "attachments": [{"name": "splice.jpg", "mimeType": "image/jpeg", "content": "jpeg-bytes"}],
            }),
        )
        .await;
    harness
        .send_json(
            "POST",
            "/tickets/IB-9001/send_report",
            Some(&token),
            json!({"dialog": "service verified with customer"}),
        )
        .await;

    let retry = harness
        .send(bare_request("POST", "/tickets/IB-9001/retry", Some(&token)))
        .await;
    assert_eq!(retry.status(), StatusCode::OK);
    let retried = response_json(retry).await;
    assert_eq!(retried["status"], "success");
    assert!(retried["body"]
        .as_str()
        .expect("echoed sync body")
        .contains("IB-9001"));

    let ticket = harness.get_json("/tickets/IB-9001", &token).await;
    assert_eq!(ticket["mirror_key"], mirror_key);
    assert_eq!(ticket["local_requests"].as_array().map(Vec::len), Some(1));
    assert_eq!(ticket["local_resolutions"].as_array().map(Vec::len), Some(1));
    assert_eq!(ticket["local_reports"].as_array().map(Vec::len), Some(1));
    assert_eq!(
        ticket["local_resolutions"][0]["attachments"][0]["name"],
        "splice.jpg"
    );

    // Five gateway calls ran: webhook mirror, three flows, one retry. Each
    // leaves exactly one pending and one terminal soap_out entry.
    let entries = harness.log_entries(&token).await;
    let soap = events_of(&entries, "soap_out");
    assert_eq!(soap.len(), 10);
    assert_eq!(
        soap.iter().filter(|e| e["status"] == "pending").count(),
        5
    );
    assert_eq!(
        soap.iter().filter(|e| e["status"] == "success").count(),
        5
    );
    assert!(soap
        .iter()
        .all(|e| e["ticket_primary_key"] == "IB-9001" && e["direction"] == "out"));

    assert_eq!(events_of(&entries, "webhook_in").len(), 1);
    assert_eq!(events_of(&entries, "standard_request_info").len(), 1);
    assert_eq!(events_of(&entries, "standard_propose_resolution").len(), 1);
    assert_eq!(events_of(&entries, "standard_send_report").len(), 1);
    assert_eq!(events_of(&entries, "retry_success").len(), 1);
    assert!(events_of(&entries, "rollback").is_empty());

    // Newest-first ordering by id.
    let ids: Vec<i64> = entries
        .iter()
        .map(|entry| entry["log_id"].as_i64().expect("log id"))
        .collect();
    assert!(ids.windows(2).all(|pair| pair[0] > pair[1]));
}

#[tokio::test]
async fn conformance_update_delivery_preserves_identity_and_merges_fields() {
    let harness = MirrorHarness::simulated();

    let created = harness.deliver_webhook("IB-9002", "new issue").await;
    let mirror_key = created["mirrorKey"].as_str().expect("mirror key").to_string();

    // Only dialog supplied: state must survive, identity must not move.
    let updated = harness
        .send_json(
            "POST",
            "/webhook/adamo",
            None,
            json!({"primaryKey": "IB-9002", "dialog": "updated issue"}),
        )
        .await;
    assert_eq!(updated["created"], false);
    assert_eq!(updated["mirrorKey"], mirror_key.as_str());

    // Empty strings are treated as absent, not as clears.
    harness
        .send_json(
            "POST",
            "/webhook/adamo",
            None,
            json!({"primaryKey": "IB-9002", "baseTroubleTicketState": "", "dialog": "  "}),
        )
        .await;

    let token = harness.operator_token().await;
    let ticket = harness.get_json("/tickets/IB-9002", &token).await;
    assert_eq!(ticket["primary_key"], "IB-9002");
    assert_eq!(ticket["mirror_key"], mirror_key.as_str());
    assert_eq!(ticket["state"], "OPENACTIVE");
    assert_eq!(ticket["dialog"], "updated issue");

    let tickets = harness.get_json("/tickets?limit=10", &token).await;
    assert_eq!(tickets.as_array().map(Vec::len), Some(1));
}

#[tokio::test]
async fn regression_gateway_fault_rolls_back_creates_but_not_updates() {
    let gateway = MockServer::start_async().await;
    // The envelope carries the dialog, so the two deliveries can be told
    // apart by body content.
    gateway.mock(|when, then| {
        when.method(POST).body_includes("first sighting");
        then.status(200).body("<setTroubleTicketByValueResponse/>");
    });
    gateway.mock(|when, then| {
        when.method(POST).body_includes("second sighting");
        then.status(500).body(concat!(
            "<soapenv:Envelope><soapenv:Body><soapenv:Fault>",
            "<faultstring>ws.SetException: mirror rejected</faultstring>",
            "</soapenv:Fault></soapenv:Body></soapenv:Envelope>"
        ));
    });
    gateway.mock(|when, then| {
        when.method(POST).body_includes("doomed create");
        then.status(500).body(concat!(
            "<soapenv:Envelope><soapenv:Body><soapenv:Fault>",
            "<faultstring>ObjectNotFoundException: no such ticket</faultstring>",
            "</soapenv:Fault></soapenv:Body></soapenv:Envelope>"
        ));
    });

    let harness = MirrorHarness::live(gateway.url("/gateway/TroubleTicket"));

    // Create path failure: the ticket must vanish again.
    let response = harness
        .send(json_request(
            "POST",
            "/webhook/adamo",
            None,
            json!({"primaryKey": "IB-9100", "dialog": "doomed create"}),
        ))
        .await;
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let error = response_json(response).await;
    assert_eq!(error["error"]["code"], "sync_failed");

    // Update path failure: the accepted create survives, only the second
    // delivery's merge sticks locally while the fault is surfaced.
    harness.deliver_webhook("IB-9101", "first sighting").await;
    let response = harness
        .send(json_request(
            "POST",
            "/webhook/adamo",
            None,
            json!({"primaryKey": "IB-9101", "dialog": "second sighting"}),
        ))
        .await;
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

    let token = harness.operator_token().await;
    let gone = harness
        .send(bare_request("GET", "/tickets/IB-9100", Some(&token)))
        .await;
    assert_eq!(gone.status(), StatusCode::NOT_FOUND);

    let kept = harness.get_json("/tickets/IB-9101", &token).await;
    assert_eq!(kept["dialog"], "second sighting");

    let entries = harness.log_entries(&token).await;
    let rollbacks = events_of(&entries, "rollback");
    assert_eq!(rollbacks.len(), 1);
    assert_eq!(rollbacks[0]["ticket_primary_key"], "IB-9100");
    assert_eq!(rollbacks[0]["status"], "rolled_back");
    assert!(rollbacks[0]["payload"]
        .as_str()
        .expect("rollback payload")
        .contains("ObjectNotFoundException"));
}

#[tokio::test]
async fn functional_retry_relays_the_live_gateway_body() {
    let gateway = MockServer::start_async().await;
    let soap = gateway.mock(|when, then| {
        when.method(POST)
            .header("content-type", "text/xml; charset=utf-8")
            .body_includes("<primaryKey>IB-9200</primaryKey>")
            .body_includes("<clearancePerson>ibiocom</clearancePerson>");
        then.status(200)
            .body("<setTroubleTicketByValueResponse><ack>IB-9200</ack></setTroubleTicketByValueResponse>");
    });

    let store = Arc::new(InMemoryTicketStore::new());
    store
        .insert_ticket(redes_store::Ticket::new(
            "IB-9200",
            "RED-1714000000",
            redes_store::TicketKind::Standard,
        ))
        .await
        .expect("seed ticket");
    let config = ServerConfig {
        sync: RemoteSyncConfig {
            mode: SyncMode::Live,
            endpoint_pre: gateway.url("/gateway/TroubleTicket"),
            ..RemoteSyncConfig::default()
        },
        ..ServerConfig::default()
    };
    let state = ServerState::with_store(config, store.clone()).expect("wire state");
    let router = build_server_router(Arc::new(state));

    let register = router
        .clone()
        .oneshot(json_request(
            "POST",
            "/auth/register",
            None,
            json!({"email": "noc@example.com", "password": "hunter2"}),
        ))
        .await
        .expect("register");
    assert_eq!(register.status(), StatusCode::OK);
    let login = router
        .clone()
        .oneshot(json_request(
            "POST",
            "/auth/login",
            None,
            json!({"email": "noc@example.com", "password": "hunter2"}),
        ))
        .await
        .expect("login");
    let token = response_json(login).await["access_token"]
        .as_str()
        .expect("token")
        .to_string();

    let retry = router
        .oneshot(bare_request(
            "POST",
            "/tickets/IB-9200/retry",
            Some(&token),
        ))
        .await
        .expect("retry");
    assert_eq!(retry.status(), StatusCode::OK);
    let result = response_json(retry).await;
    soap.assert();
    assert_eq!(result["status"], "success");
    assert!(result["body"]
        .as_str()
        .expect("gateway body")
        .contains("<ack>IB-9200</ack>"));

    // Retry never mutates the ticket; the store still holds the seed values.
    let ticket = store
        .get_ticket("IB-9200")
        .await
        .expect("get ticket")
        .expect("ticket exists");
    assert_eq!(ticket.mirror_key, "RED-1714000000");
    assert_eq!(ticket.state, None);
    assert_eq!(ticket.dialog, None);

    let logs = store
        .list_logs(PageQuery::default())
        .await
        .expect("list logs");
    assert_eq!(logs[0].event_type, "retry_success");
}
