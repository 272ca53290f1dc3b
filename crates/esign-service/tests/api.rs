use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use axum::Router;
use esign_service::{build_router, ServiceConfig, ServiceState};
use serde_json::{json, Value};
use std::path::PathBuf;
use tower::ServiceExt;
use uuid::Uuid;

const PNG: &str = "data:image/png;base64,iVBORw0KGgo=";
const PDF: &[u8] = b"%PDF-1.4\n1 0 obj << /Type /Catalog >> endobj\n%%EOF\n";

struct TestApp {
    router: Router,
    root: PathBuf,
}

impl Drop for TestApp {
    fn drop(&mut self) {
        let _ = std::fs::remove_dir_all(&self.root);
    }
}

async fn app() -> TestApp {
    let root = std::env::temp_dir().join(format!("esign-service-{}", Uuid::new_v4()));
    std::fs::create_dir_all(root.join("contracts")).unwrap();
    std::fs::write(root.join("contracts/nda.pdf"), PDF).unwrap();

    let state = ServiceState::bootstrap(&ServiceConfig::local(&root))
        .await
        .unwrap();
    TestApp {
        router: build_router(state),
        root,
    }
}

async fn call(
    app: &TestApp,
    method: &str,
    uri: &str,
    owner: Option<&str>,
    body: Option<Value>,
) -> (StatusCode, Value) {
    let mut builder = Request::builder()
        .method(method)
        .uri(uri)
        .header("x-forwarded-for", "203.0.113.7, 10.0.0.1")
        .header("user-agent", "api-test");
    if let Some(owner) = owner {
        builder = builder
            .header("x-owner-id", owner)
            .header("x-owner-email", format!("{}@example.com", owner));
    }
    let request = match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = app.router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };
    (status, value)
}

fn envelope_request(mode: &str, emails: &[&str]) -> Value {
    json!({
        "title": "Mutual NDA",
        "message": "Please review and sign",
        "document_ref": "contracts/nda.pdf",
        "signing_mode": mode,
        "signers": emails.iter().map(|e| json!({ "email": e, "name": e })).collect::<Vec<_>>(),
        "signature_fields": emails.iter().enumerate().map(|(i, e)| json!({
            "id": format!("sig-{}", i + 1),
            "type": "signature",
            "page": 1,
            "x": 72.0,
            "y": 640.0,
            "width": 180.0,
            "height": 40.0,
            "assignee_email": e,
        })).collect::<Vec<_>>(),
    })
}

/// Create and send; returns the envelope id and one token per signer.
async fn create_and_send(app: &TestApp, mode: &str, emails: &[&str]) -> (String, Vec<String>) {
    let (status, created) = call(
        app,
        "POST",
        "/envelopes",
        Some("owner-1"),
        Some(envelope_request(mode, emails)),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "{}", created);
    let id = created["envelope"]["id"].as_str().unwrap().to_string();
    let tokens = created["signing_links"]
        .as_array()
        .unwrap()
        .iter()
        .map(|link| link["token"].as_str().unwrap().to_string())
        .collect();

    let (status, sent) = call(app, "POST", &format!("/envelopes/{}/send", id), Some("owner-1"), None).await;
    assert_eq!(status, StatusCode::OK, "{}", sent);
    (id, tokens)
}

fn submission(field: &str) -> Value {
    json!({ "signatures": [{ "fieldId": field, "value": PNG }] })
}

/// PNG data URL whose payload decodes to `quads * 3` zero bytes.
fn large_image(quads: usize) -> String {
    format!("data:image/png;base64,{}", "AAAA".repeat(quads))
}

#[tokio::test]
async fn health_reports_storage_backend() {
    let app = app().await;
    let (status, body) = call(&app, "GET", "/health", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["storage_backend"], "memory");
}

#[tokio::test]
async fn owner_routes_require_identity() {
    let app = app().await;
    let (status, body) = call(&app, "GET", "/envelopes", None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["code"], "UNAUTHORIZED");
}

#[tokio::test]
async fn single_signer_flow_seals_and_serves_document() {
    let app = app().await;
    let (id, tokens) = create_and_send(&app, "SINGLE", &["ana@example.com"]).await;

    let (status, session) = call(&app, "GET", &format!("/sign/{}", tokens[0]), None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(session["signer"]["email"], "ana@example.com");
    assert_eq!(session["fields"].as_array().unwrap().len(), 1);
    assert!(session["signer"].get("token").is_none());
    assert!(session["preview_url"]
        .as_str()
        .unwrap()
        .contains("/documents/contracts/nda.pdf?expires="));

    let (status, body) = call(
        &app,
        "POST",
        &format!("/sign/{}/submit", tokens[0]),
        None,
        Some(json!({ "signatures": [{ "fieldId": "sig-1", "value": "data:image/png;base64," }] })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "INVALID_IMAGE");

    let (status, signed) = call(
        &app,
        "POST",
        &format!("/sign/{}/submit", tokens[0]),
        None,
        Some(submission("sig-1")),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{}", signed);
    assert_eq!(signed["status"], "COMPLETED");
    assert_eq!(signed["all_signed"], true);
    assert_eq!(signed["replayed"], false);

    let url = signed["sealed_document_url"].as_str().unwrap();
    let path = url.strip_prefix("http://127.0.0.1:8080").unwrap();
    let response = app
        .router
        .clone()
        .oneshot(Request::builder().uri(path).body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()["content-type"], "application/pdf");
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    assert!(bytes.starts_with(PDF));

    let tampered = path.replace("nda-sealed-1.pdf", "nda.pdf");
    let (status, _) = call(&app, "GET", &tampered, None, None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, replay) = call(
        &app,
        "POST",
        &format!("/sign/{}/submit", tokens[0]),
        None,
        Some(submission("sig-1")),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(replay["replayed"], true);
    assert_eq!(replay["signed_at"], signed["signed_at"]);

    let (status, closed) = call(&app, "GET", &format!("/sign/{}", tokens[0]), None, None).await;
    assert_eq!(status, StatusCode::GONE);
    assert_eq!(closed["code"], "ENVELOPE_CLOSED");
    assert_eq!(closed["already_signed"], true);

    let (status, trail) = call(
        &app,
        "GET",
        &format!("/envelopes/{}/audit", id),
        Some("owner-1"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(trail["chain_valid"], true);
    let entries = trail["entries"].as_array().unwrap();
    let signed_entry = entries.iter().find(|e| e["event"] == "SIGNED").unwrap();
    assert_eq!(signed_entry["ip"], "203.0.113.7");
    assert_eq!(signed_entry["user_agent"], "api-test");
    assert!(entries.iter().any(|e| e["event"] == "PDF_SEALED"));
}

#[tokio::test]
async fn sequential_order_is_enforced_over_http() {
    let app = app().await;
    let (id, tokens) =
        create_and_send(&app, "SEQUENTIAL", &["first@example.com", "second@example.com"]).await;

    let (status, body) = call(
        &app,
        "POST",
        &format!("/sign/{}/submit", tokens[1]),
        None,
        Some(submission("sig-2")),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "INVALID_STATE");

    let (_, first) = call(
        &app,
        "POST",
        &format!("/sign/{}/submit", tokens[0]),
        None,
        Some(submission("sig-1")),
    )
    .await;
    assert_eq!(first["status"], "AWAITING_SIGNER_2");
    assert_eq!(first["all_signed"], false);

    let (_, second) = call(
        &app,
        "POST",
        &format!("/sign/{}/submit", tokens[1]),
        None,
        Some(submission("sig-2")),
    )
    .await;
    assert_eq!(second["status"], "COMPLETED");

    let (_, view) = call(&app, "GET", &format!("/envelopes/{}", id), Some("owner-1"), None).await;
    assert_eq!(view["signed_count"], 2);
    assert!(view["pdf_hash_final"].is_string());
}

#[tokio::test]
async fn decline_halts_envelope_and_burns_token() {
    let app = app().await;
    let (id, tokens) = create_and_send(&app, "PARALLEL", &["a@example.com", "b@example.com"]).await;

    let (status, declined) = call(
        &app,
        "POST",
        &format!("/sign/{}/decline", tokens[0]),
        None,
        Some(json!({ "reason": "terms changed" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(declined["status"], "DECLINED");

    let (status, body) = call(&app, "POST", &format!("/sign/{}/decline", tokens[0]), None, None).await;
    assert_eq!(status, StatusCode::GONE);
    assert_eq!(body["code"], "INVALIDATED");

    let (status, body) = call(
        &app,
        "POST",
        &format!("/sign/{}/submit", tokens[1]),
        None,
        Some(submission("sig-2")),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "INVALID_STATE");

    let (_, view) = call(&app, "GET", &format!("/envelopes/{}", id), Some("owner-1"), None).await;
    assert_eq!(view["signers"][0]["decline_reason"], "terms changed");
}

#[tokio::test]
async fn owner_management_routes() {
    let app = app().await;
    let (id, tokens) = create_and_send(&app, "PARALLEL", &["a@example.com"]).await;

    let (status, _) = call(&app, "GET", &format!("/envelopes/{}", id), Some("intruder"), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (status, _) = call(&app, "GET", "/envelopes/not-a-uuid", Some("owner-1"), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (status, body) = call(&app, "GET", "/sign/unknown-token", None, None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], "NOT_FOUND");

    // invitations were just sent
    let (status, body) = call(&app, "POST", &format!("/envelopes/{}/remind", id), Some("owner-1"), None).await;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(body["code"], "THROTTLED");

    let (status, body) = call(&app, "POST", &format!("/envelopes/{}/seal", id), Some("owner-1"), None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST, "{}", body);

    let (status, view) = call(
        &app,
        "PUT",
        &format!("/envelopes/{}/note", id),
        Some("owner-1"),
        Some(json!({ "note": "chase legal" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(view["owner_note"], "chase legal");

    let (status, view) = call(
        &app,
        "POST",
        &format!("/envelopes/{}/void", id),
        Some("owner-1"),
        Some(json!({ "reason": "superseded" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(view["status"], "VOIDED");
    assert_eq!(view["void_reason"], "superseded");

    let (status, body) = call(
        &app,
        "POST",
        &format!("/sign/{}/submit", tokens[0]),
        None,
        Some(submission("sig-1")),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "INVALID_STATE");

    let (status, _) = call(&app, "POST", &format!("/envelopes/{}/archive", id), Some("owner-1"), None).await;
    assert_eq!(status, StatusCode::OK);
    let (_, page) = call(&app, "GET", "/envelopes?archived=false", Some("owner-1"), None).await;
    assert_eq!(page["total"], 0);
    let (_, page) = call(&app, "GET", "/envelopes?archived=true&status=VOIDED", Some("owner-1"), None).await;
    assert_eq!(page["total"], 1);

    let (status, outcome) = call(
        &app,
        "POST",
        "/envelopes/bulk-delete",
        Some("owner-1"),
        Some(json!({ "ids": [id, "garbage"] })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(outcome["deleted"].as_array().unwrap().len(), 1);

    let (status, _) = call(&app, "GET", &format!("/envelopes/{}", id), Some("owner-1"), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn large_signature_images_reach_the_validator() {
    let app = app().await;
    let (_, tokens) = create_and_send(&app, "SINGLE", &["ana@example.com"]).await;
    let submit = format!("/sign/{}/submit", tokens[0]);

    // decodes past the 2 MiB image cap but stays inside the body limit
    let (status, body) = call(
        &app,
        "POST",
        &submit,
        None,
        Some(json!({ "signatures": [{ "fieldId": "sig-1", "value": large_image(700_000) }] })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST, "{}", body);
    assert_eq!(body["code"], "IMAGE_TOO_LARGE");

    let (status, _) = call(
        &app,
        "POST",
        &submit,
        None,
        Some(json!({ "signatures": [{ "fieldId": "sig-1", "value": "A".repeat(12_000_000) }] })),
    )
    .await;
    assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);

    // 1.6 MB decoded, about 2.1 MB on the wire
    let (status, signed) = call(
        &app,
        "POST",
        &submit,
        None,
        Some(json!({ "signatures": [{ "fieldId": "sig-1", "value": large_image(533_334) }] })),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{}", signed);
    assert_eq!(signed["status"], "COMPLETED");
}

#[tokio::test]
async fn document_urls_use_a_random_secret_unless_configured() {
    let root = std::env::temp_dir().join(format!("esign-secret-{}", Uuid::new_v4()));
    let mut config = ServiceConfig::local(&root);
    let now = chrono::Utc::now();

    let first = ServiceState::bootstrap(&config).await.unwrap();
    let second = ServiceState::bootstrap(&config).await.unwrap();
    assert_ne!(
        first.urls.sign_at("contracts/nda.pdf", now),
        second.urls.sign_at("contracts/nda.pdf", now)
    );

    config.documents.url_secret = Some("change-me".to_string());
    let err = ServiceState::bootstrap(&config).await.err().unwrap();
    assert!(err.to_string().contains("url_secret"));

    config.documents.url_secret = Some("0123456789abcdef0123456789abcdef".to_string());
    let first = ServiceState::bootstrap(&config).await.unwrap();
    let second = ServiceState::bootstrap(&config).await.unwrap();
    assert_eq!(
        first.urls.sign_at("contracts/nda.pdf", now),
        second.urls.sign_at("contracts/nda.pdf", now)
    );

    let _ = std::fs::remove_dir_all(&root);
}
