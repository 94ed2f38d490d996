use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use wiremock::{matchers, Mock, MockServer, ResponseTemplate};
use wpp_admin::api::WppClient;
use wpp_admin::auth::AuthFlow;
use wpp_admin::config::Config;
use wpp_admin::db::Store;
use wpp_admin::dispatch::{BulkDispatch, BulkPlan};
use wpp_admin::numbers::NumbersRegistry;
use wpp_admin::poller::fleet_status;
use wpp_admin::recipients::parse_rows;
use wpp_admin::reports::{daily_counts, fetch_reports, ReportQuery};
use wpp_admin::session::{now_ms, SessionManager};
use wpp_admin::types::{MessageKind, NumberRole, PhoneNumber};
use wpp_admin::{App, WppError};

async fn setup(server: &MockServer) -> (Arc<WppClient>, Arc<SessionManager>) {
    let store = Store::connect_in_memory().await.unwrap();
    let session = Arc::new(SessionManager::load(store).await.unwrap());
    let client = Arc::new(WppClient::with_base_url(&server.uri(), session.clone()));
    (client, session)
}

async fn logged_in(server: &MockServer) -> Arc<WppClient> {
    let (client, session) = setup(server).await;
    session.establish("tok", 3600, now_ms()).await.unwrap();
    client
}

fn ok() -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(json!({"success": true, "description": "ok"}))
}

fn phone(raw: &str) -> PhoneNumber {
    PhoneNumber::parse(raw).unwrap()
}

#[tokio::test]
async fn test_login_flow_establishes_session() {
    let server = MockServer::start().await;
    Mock::given(matchers::method("POST"))
        .and(matchers::path("/api/v2/auth/otp/request"))
        .respond_with(ok())
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(matchers::method("POST"))
        .and(matchers::path("/api/v2/auth/otp/validate"))
        .and(matchers::body_json(json!({
            "otp_type": "login",
            "otp_for": "email",
            "email": "ops@example.com",
            "email_otp_code": "123456"
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "success": true,
            "token": "jwt-abc",
            "expires_in": 3600
        })))
        .expect(1)
        .mount(&server)
        .await;

    let (client, session) = setup(&server).await;
    let auth = AuthFlow::new(client, session.clone());
    auth.request_login("ops@example.com").await.unwrap();
    assert_eq!(
        auth.pending().await.unwrap().email.as_deref(),
        Some("ops@example.com")
    );

    let before = now_ms();
    let established = auth.verify("123456", None).await.unwrap();
    assert_eq!(established.bearer_token, "jwt-abc");
    assert_eq!(established.user_email.as_deref(), Some("ops@example.com"));
    assert!(established.expires_at_ms >= before + 3_600_000);
    assert!(session.is_authenticated().await);
    assert!(auth.pending().await.unwrap().email.is_none());
}

#[tokio::test]
async fn test_registration_requests_both_codes() {
    let server = MockServer::start().await;
    Mock::given(matchers::method("POST"))
        .and(matchers::path("/api/v2/auth/otp/request"))
        .and(matchers::body_partial_json(json!({"otp_type": "register", "otp_for": "email"})))
        .respond_with(ok())
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(matchers::method("POST"))
        .and(matchers::path("/api/v2/auth/otp/request"))
        .and(matchers::body_partial_json(json!({
            "otp_type": "register",
            "otp_for": "number",
            "number": "5511999999999"
        })))
        .respond_with(ok())
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(matchers::method("POST"))
        .and(matchers::path("/api/v2/auth/otp/validate"))
        .and(matchers::body_json(json!({
            "otp_type": "register",
            "otp_for": "email",
            "email": "new@example.com",
            "number": "5511999999999",
            "email_otp_code": "111111",
            "number_otp_code": "222222"
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "success": true,
            "token": "jwt-new",
            "expires_in": 600
        })))
        .expect(1)
        .mount(&server)
        .await;

    let (client, session) = setup(&server).await;
    let auth = AuthFlow::new(client, session);
    auth.request_registration("new@example.com", "+55 (11) 99999-9999")
        .await
        .unwrap();

    let missing = auth.verify("111111", None).await.unwrap_err();
    assert!(matches!(missing, WppError::Validation(_)));

    let established = auth.verify("111111", Some("222222")).await.unwrap();
    assert_eq!(established.bearer_token, "jwt-new");

    let requests = server.received_requests().await.unwrap();
    let first: serde_json::Value = serde_json::from_slice(&requests[0].body).unwrap();
    assert_eq!(first["otp_for"], "email");
}

#[tokio::test]
async fn test_rejected_code_leaves_no_session() {
    let server = MockServer::start().await;
    Mock::given(matchers::method("POST"))
        .and(matchers::path("/api/v2/auth/otp/request"))
        .respond_with(ok())
        .mount(&server)
        .await;
    Mock::given(matchers::method("POST"))
        .and(matchers::path("/api/v2/auth/otp/validate"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "success": false,
            "description": "código inválido"
        })))
        .mount(&server)
        .await;

    let (client, session) = setup(&server).await;
    let auth = AuthFlow::new(client, session.clone());
    auth.request_login("ops@example.com").await.unwrap();
    match auth.verify("000000", None).await {
        Err(WppError::Auth(message)) => assert_eq!(message, "código inválido"),
        other => panic!("unexpected {other:?}"),
    }
    assert!(session.current().await.is_none());
    assert!(auth.pending().await.unwrap().email.is_some());
}

#[tokio::test]
async fn test_invalid_input_never_reaches_api() {
    let server = MockServer::start().await;
    let (client, session) = setup(&server).await;
    let auth = AuthFlow::new(client.clone(), session);

    assert!(auth.request_login("not-an-email").await.is_err());
    assert!(auth
        .request_registration("ops@example.com", "12345")
        .await
        .is_err());
    assert!(matches!(
        auth.resend().await,
        Err(WppError::Validation(_))
    ));

    let registry = NumbersRegistry::new(client);
    assert!(matches!(
        registry.add("abc", NumberRole::Worker).await,
        Err(WppError::Validation(_))
    ));
    assert!(server.received_requests().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_resend_repeats_login_request() {
    let server = MockServer::start().await;
    Mock::given(matchers::method("POST"))
        .and(matchers::path("/api/v2/auth/otp/request"))
        .and(matchers::body_partial_json(json!({"otp_type": "login"})))
        .respond_with(ok())
        .expect(2)
        .mount(&server)
        .await;

    let (client, session) = setup(&server).await;
    let auth = AuthFlow::new(client, session);
    auth.request_login("ops@example.com").await.unwrap();
    auth.resend().await.unwrap();
}

#[tokio::test]
async fn test_logout_clears_state() {
    let server = MockServer::start().await;
    let (client, session) = setup(&server).await;
    session.establish("tok", 3600, now_ms()).await.unwrap();
    let auth = AuthFlow::new(client, session.clone());
    auth.logout().await.unwrap();
    assert!(!session.is_authenticated().await);
}

#[tokio::test]
async fn test_registry_refreshes_after_add() {
    let server = MockServer::start().await;
    Mock::given(matchers::method("POST"))
        .and(matchers::path("/api/v2/numbers/add"))
        .respond_with(ok())
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(matchers::method("GET"))
        .and(matchers::path("/api/v2/numbers"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "success": true,
            "description": {"workers": ["5511999999999"], "admins": []}
        })))
        .expect(1)
        .mount(&server)
        .await;

    let registry = NumbersRegistry::new(logged_in(&server).await);
    let snapshot = registry
        .add("+55 11 99999-9999", NumberRole::Worker)
        .await
        .unwrap();
    assert_eq!(snapshot.workers, vec!["5511999999999"]);
    assert_eq!(registry.workers().await, vec!["5511999999999"]);
    assert!(registry.admins().await.is_empty());
    assert!(registry.last_error().await.is_none());
}

#[tokio::test]
async fn test_registry_failure_resets_snapshot() {
    let server = MockServer::start().await;
    Mock::given(matchers::method("GET"))
        .and(matchers::path("/api/v2/numbers"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "success": true,
            "description": {"workers": ["5511999999999"], "admins": []}
        })))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(matchers::method("GET"))
        .and(matchers::path("/api/v2/numbers"))
        .respond_with(
            ResponseTemplate::new(503).set_body_json(json!({"description": "maintenance"})),
        )
        .mount(&server)
        .await;

    let registry = NumbersRegistry::new(logged_in(&server).await);
    registry.refresh().await.unwrap();
    assert_eq!(registry.snapshot().await.workers.len(), 1);

    assert!(registry.refresh().await.is_err());
    assert!(registry.snapshot().await.workers.is_empty());
    assert_eq!(registry.last_error().await.as_deref(), Some("maintenance"));
}

#[tokio::test]
async fn test_bulk_send_through_api_counts_failures() {
    let server = MockServer::start().await;
    Mock::given(matchers::method("POST"))
        .and(matchers::path("/api/v2/sends"))
        .and(matchers::body_partial_json(json!({"to_number": "5511988888888"})))
        .respond_with(
            ResponseTemplate::new(400).set_body_json(json!({"description": "not on whatsapp"})),
        )
        .with_priority(1)
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(matchers::method("POST"))
        .and(matchers::path("/api/v2/sends"))
        .respond_with(ok())
        .expect(2)
        .mount(&server)
        .await;

    let rows: Vec<Vec<String>> = [
        ["número", "mensagem"],
        ["5511999999999", "Oi João"],
        ["5511988888888", ""],
        ["5511977777777", "Oi Pedro"],
    ]
    .iter()
    .map(|r| r.iter().map(|c| c.to_string()).collect())
    .collect();
    let list = parse_rows(&rows);

    let client = logged_in(&server).await;
    let mut bulk = BulkDispatch::new(BulkPlan {
        from_number: phone("5511900000000"),
        recipients: list.recipients,
        fallback: Some("Mensagem padrão".into()),
        kind: MessageKind::Text,
        media: None,
        delay: Duration::ZERO,
    })
    .unwrap();
    let summary = bulk.run(client.as_ref()).await;
    assert_eq!(summary.attempted, 3);
    assert_eq!(summary.successes, 2);
    assert_eq!(summary.failures, 1);

    let requests = server.received_requests().await.unwrap();
    let contents: Vec<String> = requests
        .iter()
        .map(|r| {
            let body: serde_json::Value = serde_json::from_slice(&r.body).unwrap();
            body["content"].as_str().unwrap().to_string()
        })
        .collect();
    assert_eq!(contents, vec!["Oi João", "Mensagem padrão", "Oi Pedro"]);
}

#[tokio::test]
async fn test_bulk_stops_when_session_rejected() {
    let server = MockServer::start().await;
    Mock::given(matchers::method("POST"))
        .and(matchers::path("/api/v2/sends"))
        .respond_with(ResponseTemplate::new(401))
        .expect(1)
        .mount(&server)
        .await;

    let (client, session) = setup(&server).await;
    session.establish("tok", 3600, now_ms()).await.unwrap();
    let recipients = ["5511999999999", "5511988888888", "5511977777777"]
        .iter()
        .map(|n| wpp_admin::types::BulkRecipient::new(phone(n), None))
        .collect();
    let mut bulk = BulkDispatch::new(BulkPlan {
        from_number: phone("5511900000000"),
        recipients,
        fallback: Some("Oi".into()),
        kind: MessageKind::Text,
        media: None,
        delay: Duration::ZERO,
    })
    .unwrap();

    let summary = bulk.run(client.as_ref()).await;
    assert!(summary.session_expired);
    assert_eq!(summary.attempted, 1);
    assert!(!session.is_authenticated().await);
}

#[tokio::test]
async fn test_report_fetch_and_chart() {
    let server = MockServer::start().await;
    Mock::given(matchers::method("GET"))
        .and(matchers::path("/api/v2/reports/sends"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "success": true,
            "description": [
                {"date_time_send": "2024-05-02T10:00:00Z", "to_number": "5511999999999", "status": "sent"},
                {"date_time_send": "2024-05-02T11:00:00Z", "to_number": "5511988888888", "status": "sent"},
                {"date_time_send": null, "to_number": "5511977777777", "status": "queued"}
            ]
        })))
        .mount(&server)
        .await;

    let client = logged_in(&server).await;
    assert!(matches!(
        fetch_reports(&client, &ReportQuery::default()).await,
        Err(WppError::Validation(_))
    ));

    let entries = fetch_reports(&client, &ReportQuery::new(phone("5511900000000")))
        .await
        .unwrap();
    assert_eq!(entries.len(), 3);
    let counts = daily_counts(&entries);
    assert_eq!(counts.values().copied().collect::<Vec<_>>(), vec![2]);
}

#[tokio::test]
async fn test_fleet_status_through_api() {
    let server = MockServer::start().await;
    Mock::given(matchers::method("GET"))
        .and(matchers::path("/api/v2/numbers/status"))
        .and(matchers::query_param("number", "5511999999999"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "success": true,
            "description": {"status": "conectado"}
        })))
        .mount(&server)
        .await;
    Mock::given(matchers::method("GET"))
        .and(matchers::path("/api/v2/numbers/status"))
        .and(matchers::query_param("number", "5511988888888"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let client = logged_in(&server).await;
    let report = fleet_status(
        client.as_ref(),
        &[phone("5511999999999"), phone("5511988888888")],
    )
    .await
    .unwrap();
    assert_eq!(report.stats.connected, 1);
    assert_eq!(report.stats.errors, 1);
}

#[tokio::test]
async fn test_app_wires_config_endpoint() {
    let server = MockServer::start().await;
    Mock::given(matchers::method("GET"))
        .and(matchers::path("/api/v2/numbers"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "success": true,
            "description": {"workers": [], "admins": ["5511999999999"]}
        })))
        .mount(&server)
        .await;

    let mut config = Config::default();
    config.api.endpoint = format!("{}/", server.uri());
    let store = Store::connect_in_memory().await.unwrap();
    let app = App::with_store(config, store).await.unwrap();
    app.session.establish("tok", 3600, now_ms()).await.unwrap();

    assert_eq!(app.client.base_url(), server.uri());
    let snapshot = app.numbers().refresh().await.unwrap();
    assert_eq!(snapshot.admins, vec!["5511999999999"]);
}
