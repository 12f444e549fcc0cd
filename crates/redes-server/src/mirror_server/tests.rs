//! Mirror server tests grouped by endpoint behavior.
use super::*;
use axum::body::{to_bytes, Body};
use axum::http::Request;
use httpmock::Method::POST;
use httpmock::MockServer;
use redes_store::{InMemoryTicketStore, TicketKind};
use redes_sync::SyncMode;
use serde_json::Value;
use tempfile::tempdir;
use tower::ServiceExt;

fn test_state() -> Arc<ServerState> {
    Arc::new(
        ServerState::with_store(
            ServerConfig::default(),
            Arc::new(InMemoryTicketStore::new()),
        )
        .expect("build server state"),
    )
}

fn faulting_state(gateway: &MockServer) -> Arc<ServerState> {
    gateway.mock(|when, then| {
        when.method(POST);
        then.status(500).body(concat!(
            "<soapenv:Envelope><soapenv:Body><soapenv:Fault>",
            "<faultstring>ws.SetException: rejected by Adamo</faultstring>",
            "</soapenv:Fault></soapenv:Body></soapenv:Envelope>"
        ));
    });
    let config = ServerConfig {
        sync: RemoteSyncConfig {
            mode: SyncMode::Live,
            endpoint_pre: gateway.url("/gateway"),
            ..RemoteSyncConfig::default()
        },
        ..ServerConfig::default()
    };
    Arc::new(
        ServerState::with_store(config, Arc::new(InMemoryTicketStore::new()))
            .expect("build server state"),
    )
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
        .expect("build request")
}

fn bare_request(method: &str, uri: &str, token: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(token) = token {
        builder = builder.header("authorization", format!("Bearer {token}"));
    }
    builder.body(Body::empty()).expect("build request")
}

async fn response_json(response: Response) -> Value {
    let body = to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("read response body");
    serde_json::from_slice(&body).expect("parse response body")
}

async fn bearer_token(router: &Router) -> String {
    let response = router
        .clone()
        .oneshot(json_request(
            "POST",
            AUTH_REGISTER_ENDPOINT,
            None,
            json!({"email": "ops@example.com", "password": "hunter2"}),
        ))
        .await
        .expect("register response");
    assert_eq!(response.status(), StatusCode::OK);

    let response = router
        .clone()
        .oneshot(json_request(
            "POST",
            AUTH_LOGIN_ENDPOINT,
            None,
            json!({"email": "ops@example.com", "password": "hunter2"}),
        ))
        .await
        .expect("login response");
    assert_eq!(response.status(), StatusCode::OK);
    let parsed = response_json(response).await;
    parsed["access_token"]
        .as_str()
        .expect("access token")
        .to_string()
}

async fn seed_webhook_ticket(router: &Router, primary_key: &str) -> String {
    let response = router
        .clone()
        .oneshot(json_request(
            "POST",
            WEBHOOK_ENDPOINT,
            None,
            json!({
                "primaryKey": primary_key,
                "baseTroubleTicketState": "OPENACTIVE",
                "dialog": "new issue",
            }),
        ))
        .await
        .expect("webhook response");
    assert_eq!(response.status(), StatusCode::OK);
    let parsed = response_json(response).await;
    parsed["mirrorKey"].as_str().expect("mirror key").to_string()
}

#[tokio::test]
async fn integration_health_endpoint_reports_ok() {
    let router = build_server_router(test_state());

    let response = router
        .oneshot(bare_request("GET", HEALTH_ENDPOINT, None))
        .await
        .expect("health response");
    assert_eq!(response.status(), StatusCode::OK);
    let parsed = response_json(response).await;
    assert_eq!(parsed["status"], "ok");
    assert_eq!(parsed["sync_mode"], "simulated");
    assert_eq!(parsed["auth"]["active_sessions"], 0);
    assert_eq!(parsed["auth"]["session_ttl_seconds"].as_u64(), Some(86_400));
}

#[tokio::test]
async fn integration_webhook_creates_then_updates_ticket() {
    let router = build_server_router(test_state());

    let response = router
        .clone()
        .oneshot(json_request(
            "POST",
            WEBHOOK_ENDPOINT,
            None,
            json!({
                "primaryKey": "IB-100",
                "baseTroubleTicketState": "OPENACTIVE",
                "dialog": "new issue",
            }),
        ))
        .await
        .expect("create response");
    assert_eq!(response.status(), StatusCode::OK);
    let created = response_json(response).await;
    assert_eq!(created["status"], "ok");
    assert_eq!(created["created"], true);
    let mirror_key = created["mirrorKey"].as_str().expect("mirror key");
    assert!(mirror_key.starts_with("RED-"));

    let response = router
        .clone()
        .oneshot(json_request(
            "POST",
            WEBHOOK_ENDPOINT,
            None,
            json!({"primaryKey": "IB-100", "dialog": "more detail"}),
        ))
        .await
        .expect("update response");
    assert_eq!(response.status(), StatusCode::OK);
    let updated = response_json(response).await;
    assert_eq!(updated["created"], false);
    assert_eq!(updated["mirrorKey"].as_str(), Some(mirror_key));

    let token = bearer_token(&router).await;
    let response = router
        .oneshot(bare_request(
            "GET",
            &format!("{TICKETS_ENDPOINT}/IB-100"),
            Some(&token),
        ))
        .await
        .expect("detail response");
    assert_eq!(response.status(), StatusCode::OK);
    let ticket = response_json(response).await;
    assert_eq!(ticket["state"], "OPENACTIVE");
    assert_eq!(ticket["dialog"], "more detail");
    assert_eq!(ticket["mirror_key"].as_str(), Some(mirror_key));
}

#[tokio::test]
async fn regression_webhook_rejects_missing_primary_key_and_malformed_json() {
    let router = build_server_router(test_state());

    let response = router
        .clone()
        .oneshot(json_request(
            "POST",
            WEBHOOK_ENDPOINT,
            None,
            json!({"baseTroubleTicketState": "OPENACTIVE"}),
        ))
        .await
        .expect("missing key response");
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let parsed = response_json(response).await;
    assert_eq!(parsed["error"]["code"], "missing_primary_key");
    assert_eq!(parsed["error"]["type"], "invalid_request_error");

    let request = Request::builder()
        .method("POST")
        .uri(WEBHOOK_ENDPOINT)
        .header("content-type", "application/json")
        .body(Body::from("not json"))
        .expect("build request");
    let response = router.oneshot(request).await.expect("malformed response");
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let parsed = response_json(response).await;
    assert_eq!(parsed["error"]["code"], "malformed_json");
}

#[tokio::test]
async fn regression_protected_endpoints_reject_missing_or_unknown_tokens() {
    let router = build_server_router(test_state());

    for request in [
        bare_request("GET", TICKETS_ENDPOINT, None),
        bare_request("GET", LOGS_ENDPOINT, None),
        bare_request("GET", "/tickets/IB-1", Some("redes_sess_bogus")),
        json_request(
            "POST",
            "/tickets/IB-1/request_info",
            None,
            json!({"dialog": "hello"}),
        ),
        bare_request("POST", "/tickets/IB-1/retry", Some("redes_sess_bogus")),
    ] {
        let response = router
            .clone()
            .oneshot(request)
            .await
            .expect("unauthorized response");
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        let parsed = response_json(response).await;
        assert_eq!(parsed["error"]["code"], "unauthorized");
    }
}

#[tokio::test]
async fn integration_flow_actions_record_history_and_events() {
    let router = build_server_router(test_state());
    seed_webhook_ticket(&router, "IB-200").await;
    let token = bearer_token(&router).await;

    let response = router
        .clone()
        .oneshot(json_request(
            "POST",
            &format!("{TICKETS_ENDPOINT}/IB-200/request_info"),
            Some(&token),
            json!({"dialog": "need access to the cabinet"}),
        ))
        .await
        .expect("request info response");
    assert_eq!(response.status(), StatusCode::OK);
    let outcome = response_json(response).await;
    assert_eq!(outcome["message_type"], "success");
    assert_eq!(outcome["message"], "request sent to Adamo");

    let response = router
        .clone()
        .oneshot(json_request(
            "POST",
            &format!("{TICKETS_ENDPOINT}/IB-200/send_report"),
            Some(&token),
            json!({
                "dialog": "work done",
                "attachments": [{"name": "photo.jpg", "content": "binary"}],
            }),
        ))
        .await
        .expect("send report response");
    assert_eq!(response.status(), StatusCode::OK);

    let response = router
        .clone()
        .oneshot(bare_request(
            "GET",
            &format!("{TICKETS_ENDPOINT}/IB-200"),
            Some(&token),
        ))
        .await
        .expect("detail response");
    let ticket = response_json(response).await;
    assert_eq!(ticket["local_requests"].as_array().expect("requests").len(), 1);
    assert_eq!(ticket["local_reports"].as_array().expect("reports").len(), 1);
    assert_eq!(
        ticket["local_reports"][0]["attachments"][0]["name"],
        "photo.jpg"
    );

    let response = router
        .oneshot(bare_request("GET", LOGS_ENDPOINT, Some(&token)))
        .await
        .expect("logs response");
    let logs = response_json(response).await;
    let events: Vec<&str> = logs
        .as_array()
        .expect("log entries")
        .iter()
        .filter_map(|entry| entry["event_type"].as_str())
        .collect();
    assert!(events.contains(&"standard_request_info"));
    assert!(events.contains(&"standard_send_report"));
    assert!(events.contains(&"webhook_in"));
}

#[tokio::test]
async fn integration_propose_resolution_validates_restore_date() {
    let router = build_server_router(test_state());
    seed_webhook_ticket(&router, "IB-300").await;
    let token = bearer_token(&router).await;

    let response = router
        .clone()
        .oneshot(json_request(
            "POST",
            &format!("{TICKETS_ENDPOINT}/IB-300/propose_resolution"),
            Some(&token),
            json!({
                "dateRestoreService": "tomorrow at noon",
                "rawResolution": "FTTH_REVENTA_ACTUACION_EN_RED",
            }),
        ))
        .await
        .expect("invalid date response");
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let parsed = response_json(response).await;
    assert_eq!(parsed["error"]["code"], "invalid_date");

    let response = router
        .clone()
        .oneshot(json_request(
            "POST",
            &format!("{TICKETS_ENDPOINT}/IB-300/propose_resolution"),
            Some(&token),
            json!({
                "dateRestoreService": "2024-05-04T09:30:00Z",
                "rawResolution": "FTTH_REVENTA_ACTUACION_EN_RED",
                "dialog": "splice repaired",
                "department": "field-ops",
            }),
        ))
        .await
        .expect("resolution response");
    assert_eq!(response.status(), StatusCode::OK);
    let outcome = response_json(response).await;
    assert_eq!(outcome["message_type"], "success");

    let response = router
        .oneshot(bare_request(
            "GET",
            &format!("{TICKETS_ENDPOINT}/IB-300"),
            Some(&token),
        ))
        .await
        .expect("detail response");
    let ticket = response_json(response).await;
    let resolutions = ticket["local_resolutions"].as_array().expect("resolutions");
    assert_eq!(resolutions.len(), 1);
    assert_eq!(
        resolutions[0]["fields"]["raw_resolution"],
        "FTTH_REVENTA_ACTUACION_EN_RED"
    );
    assert_eq!(resolutions[0]["fields"]["department"], "field-ops");
}

#[tokio::test]
async fn integration_retry_returns_sync_result_shape() {
    let router = build_server_router(test_state());
    seed_webhook_ticket(&router, "IB-400").await;
    let token = bearer_token(&router).await;

    let response = router
        .clone()
        .oneshot(bare_request(
            "POST",
            &format!("{TICKETS_ENDPOINT}/IB-400/retry"),
            Some(&token),
        ))
        .await
        .expect("retry response");
    assert_eq!(response.status(), StatusCode::OK);
    let result = response_json(response).await;
    assert_eq!(result["status"], "success");
    assert!(result["body"].as_str().expect("echoed body").contains("IB-400"));

    let response = router
        .oneshot(bare_request(
            "POST",
            &format!("{TICKETS_ENDPOINT}/IB-404/retry"),
            Some(&token),
        ))
        .await
        .expect("unknown retry response");
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let parsed = response_json(response).await;
    assert_eq!(parsed["error"]["code"], "ticket_not_found");
}

#[tokio::test]
async fn integration_register_and_login_issue_session_tokens() {
    let router = build_server_router(test_state());

    let response = router
        .clone()
        .oneshot(json_request(
            "POST",
            AUTH_REGISTER_ENDPOINT,
            None,
            json!({"email": "Tech@Example.com ", "password": "hunter2"}),
        ))
        .await
        .expect("register response");
    assert_eq!(response.status(), StatusCode::OK);
    let registered = response_json(response).await;
    assert_eq!(registered["email"], "tech@example.com");
    assert_eq!(registered["role"], "technician");

    let response = router
        .clone()
        .oneshot(json_request(
            "POST",
            AUTH_REGISTER_ENDPOINT,
            None,
            json!({"email": "tech@example.com", "password": "other"}),
        ))
        .await
        .expect("duplicate register response");
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let parsed = response_json(response).await;
    assert_eq!(parsed["error"]["code"], "user_exists");

    let response = router
        .clone()
        .oneshot(json_request(
            "POST",
            AUTH_LOGIN_ENDPOINT,
            None,
            json!({"email": "tech@example.com", "password": "wrong"}),
        ))
        .await
        .expect("bad login response");
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let parsed = response_json(response).await;
    assert_eq!(parsed["error"]["code"], "invalid_credentials");

    let response = router
        .oneshot(json_request(
            "POST",
            AUTH_LOGIN_ENDPOINT,
            None,
            json!({"email": "tech@example.com", "password": "hunter2"}),
        ))
        .await
        .expect("login response");
    assert_eq!(response.status(), StatusCode::OK);
    let token = response_json(response).await;
    assert!(token["access_token"]
        .as_str()
        .expect("access token")
        .starts_with("redes_sess_"));
    assert_eq!(token["token_type"], "bearer");
    assert_eq!(token["expires_in_seconds"].as_u64(), Some(86_400));
}

#[tokio::test]
async fn regression_register_rejects_invalid_email_and_empty_password() {
    let router = build_server_router(test_state());

    let response = router
        .clone()
        .oneshot(json_request(
            "POST",
            AUTH_REGISTER_ENDPOINT,
            None,
            json!({"email": "not-an-email", "password": "hunter2"}),
        ))
        .await
        .expect("invalid email response");
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let parsed = response_json(response).await;
    assert_eq!(parsed["error"]["code"], "invalid_email");

    let response = router
        .oneshot(json_request(
            "POST",
            AUTH_REGISTER_ENDPOINT,
            None,
            json!({"email": "ops@example.com", "password": ""}),
        ))
        .await
        .expect("empty password response");
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let parsed = response_json(response).await;
    assert_eq!(parsed["error"]["code"], "invalid_password");
}

#[tokio::test]
async fn integration_simulate_endpoints_drive_both_directions() {
    let router = build_server_router(test_state());

    let response = router
        .clone()
        .oneshot(bare_request("POST", SIMULATE_OUTBOUND_ENDPOINT, None))
        .await
        .expect("outbound on empty store");
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let parsed = response_json(response).await;
    assert_eq!(parsed["error"]["code"], "no_tickets");

    let response = router
        .clone()
        .oneshot(bare_request("POST", SIMULATE_INBOUND_ENDPOINT, None))
        .await
        .expect("inbound response");
    assert_eq!(response.status(), StatusCode::OK);
    let inbound = response_json(response).await;
    assert_eq!(inbound["status"], "received");
    assert_eq!(inbound["ticket"]["primary_key"], SIMULATED_PRIMARY_KEY);
    assert_eq!(inbound["ticket"]["state"], "OPENACTIVE");

    let response = router
        .oneshot(bare_request("POST", SIMULATE_OUTBOUND_ENDPOINT, None))
        .await
        .expect("outbound response");
    assert_eq!(response.status(), StatusCode::OK);
    let outbound = response_json(response).await;
    assert_eq!(outbound["status"], "sent");
    assert_eq!(outbound["primaryKey"], SIMULATED_PRIMARY_KEY);
    assert_eq!(outbound["outcome"]["message_type"], "success");
}

#[tokio::test]
async fn integration_web_page_renders_ticket_board() {
    let router = build_server_router(test_state());
    seed_webhook_ticket(&router, "IB-700").await;

    let response = router
        .oneshot(bare_request("GET", WEB_ENDPOINT, None))
        .await
        .expect("web page response");
    assert_eq!(response.status(), StatusCode::OK);
    let content_type = response
        .headers()
        .get("content-type")
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default()
        .to_string();
    assert!(content_type.starts_with("text/html"));
    let body = to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("read page body");
    let page = String::from_utf8(body.to_vec()).expect("utf-8 page");
    assert!(page.contains("Redes Ticket Mirror"));
    assert!(page.contains("IB-700"));
    assert!(page.contains("OPENACTIVE"));
}

#[test]
fn unit_operator_page_escapes_markup_in_ticket_fields() {
    let mut ticket = Ticket::new("IB-800", "RED-1714000000", TicketKind::Standard);
    ticket.dialog = Some("<script>alert('x')</script>".to_string());

    let page = render_operator_page(&[ticket]);
    assert!(page.contains("&lt;script&gt;"));
    assert!(!page.contains("<script>alert"));
}

#[tokio::test]
async fn regression_webhook_sync_failure_rolls_back_created_ticket() {
    let gateway = MockServer::start_async().await;
    let router = build_server_router(faulting_state(&gateway));

    let response = router
        .clone()
        .oneshot(json_request(
            "POST",
            WEBHOOK_ENDPOINT,
            None,
            json!({
                "primaryKey": "IB-500",
                "baseTroubleTicketState": "OPENACTIVE",
                "dialog": "new issue",
            }),
        ))
        .await
        .expect("webhook response");
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let parsed = response_json(response).await;
    assert_eq!(parsed["error"]["code"], "sync_failed");
    assert_eq!(parsed["error"]["type"], "server_error");

    let token = bearer_token(&router).await;
    let response = router
        .clone()
        .oneshot(bare_request(
            "GET",
            &format!("{TICKETS_ENDPOINT}/IB-500"),
            Some(&token),
        ))
        .await
        .expect("detail response");
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let response = router
        .oneshot(bare_request("GET", LOGS_ENDPOINT, Some(&token)))
        .await
        .expect("logs response");
    let logs = response_json(response).await;
    let rollback = logs
        .as_array()
        .expect("log entries")
        .iter()
        .find(|entry| entry["event_type"] == "rollback")
        .expect("rollback entry");
    assert_eq!(rollback["status"], "rolled_back");
    assert_eq!(rollback["ticket_primary_key"], "IB-500");
}

#[tokio::test]
async fn integration_sqlite_backed_state_survives_reopen() {
    let temp = tempdir().expect("tempdir");
    let config = ServerConfig {
        database_path: temp.path().join("tickets.sqlite3"),
        ..ServerConfig::default()
    };

    let router = build_server_router(Arc::new(
        ServerState::from_config(config.clone()).expect("open state"),
    ));
    seed_webhook_ticket(&router, "IB-600").await;
    drop(router);

    let reopened = build_server_router(Arc::new(
        ServerState::from_config(config).expect("reopen state"),
    ));
    let token = bearer_token(&reopened).await;
    let response = reopened
        .oneshot(bare_request(
            "GET",
            &format!("{TICKETS_ENDPOINT}/IB-600"),
            Some(&token),
        ))
        .await
        .expect("detail response");
    assert_eq!(response.status(), StatusCode::OK);
    let ticket = response_json(response).await;
    assert_eq!(ticket["primary_key"], "IB-600");
    assert_eq!(ticket["state"], "OPENACTIVE");
}
