use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::post;
use axum::{Json, Router};
use esign_adapters::{
    KeyedUrlSigner, LocalSealingService, NotificationKind, RecordingNotificationDispatcher,
    TracingNotificationDispatcher, WebhookNotificationDispatcher,
};
use esign_core::{
    AuditEventKind, EngineConfig, EnvelopeStatus, EnvelopeStore, FieldInput, FieldPosition,
    FieldSubmission, FieldType, MemoryEnvelopeStore, NewEnvelope, NotificationDispatcher,
    OwnerContext, RequestContext, SignerInput, SigningEngine, SigningMode,
};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

const PNG: &str = "data:image/png;base64,iVBORw0KGgo=";
const PDF: &[u8] = b"%PDF-1.4\n1 0 obj << /Type /Catalog >> endobj\n%%EOF\n";

fn temp_root() -> PathBuf {
    let root = std::env::temp_dir().join(format!("esign-adapters-{}", uuid::Uuid::new_v4()));
    std::fs::create_dir_all(root.join("docs")).unwrap();
    root
}

fn owner() -> OwnerContext {
    OwnerContext::new(
        "owner-1",
        Some("owner@example.com".to_string()),
        RequestContext::unknown(),
    )
}

fn request(document_ref: &str, emails: &[&str]) -> NewEnvelope {
    NewEnvelope {
        contract_id: None,
        title: "Lease".to_string(),
        message: "Please sign".to_string(),
        document_ref: document_ref.to_string(),
        signing_mode: SigningMode::Parallel,
        signers: emails
            .iter()
            .map(|e| SignerInput {
                email: e.to_string(),
                name: "Signer".to_string(),
                role: None,
                order: None,
            })
            .collect(),
        signature_fields: emails
            .iter()
            .enumerate()
            .map(|(i, e)| FieldInput {
                id: Some(format!("sig-{}", i + 1)),
                field_type: FieldType::Signature,
                page: 1,
                position: FieldPosition {
                    x: 50.0,
                    y: 50.0,
                    width: 120.0,
                    height: 30.0,
                    ..FieldPosition::default()
                },
                assignee_email: e.to_string(),
                required: true,
                label: None,
            })
            .collect(),
        expires_in_days: Some(7),
    }
}

fn engine(
    root: &Path,
    notifier: Arc<dyn NotificationDispatcher>,
) -> (SigningEngine, KeyedUrlSigner) {
    let urls = KeyedUrlSigner::new("http://localhost:8080", "test-secret", 900);
    let engine = SigningEngine::new(
        Arc::new(MemoryEnvelopeStore::new()),
        Arc::new(LocalSealingService::new(root)),
        notifier,
        Arc::new(urls.clone()),
        EngineConfig::default(),
    );
    (engine, urls)
}

#[tokio::test]
async fn local_sealing_writes_verifiable_rendition() {
    let root = temp_root();
    std::fs::write(root.join("docs/lease.pdf"), PDF).unwrap();
    let notifier = Arc::new(RecordingNotificationDispatcher::new("http://localhost:3000/sign"));
    let (engine, urls) = engine(&root, notifier.clone());

    let created = engine
        .create(&owner(), request("docs/lease.pdf", &["a@x.io"]))
        .await
        .unwrap();
    let id = created.envelope.id;
    let original_hash = blake3::hash(PDF).to_hex().to_string();
    assert_eq!(created.envelope.pdf_hash_original, Some(original_hash));
    engine.send(&owner(), &id).await.unwrap();

    let invitations = notifier.messages_of(NotificationKind::SignatureInvitation);
    assert_eq!(invitations.len(), 1);
    assert_eq!(
        invitations[0].sign_url.as_deref(),
        Some(format!("http://localhost:3000/sign/{}", created.signing_links[0].token).as_str())
    );
    assert_eq!(invitations[0].from.as_deref(), Some("owner@example.com"));

    let outcome = engine
        .submit(
            &created.signing_links[0].token,
            &[FieldSubmission::new("sig-1", PNG)],
            &RequestContext::new("198.51.100.4", "test"),
        )
        .await
        .unwrap();
    assert_eq!(outcome.status, EnvelopeStatus::Completed);
    let url = outcome.sealed_document_url.unwrap();
    assert!(url.starts_with("http://localhost:8080/documents/docs/lease-sealed-1.pdf?expires="));

    let sealed = std::fs::read(root.join("docs/lease-sealed-1.pdf")).unwrap();
    assert!(sealed.starts_with(PDF));
    let text = String::from_utf8_lossy(&sealed);
    assert!(text.contains("%ESIGN-SEAL"));
    assert!(text.contains("a@x.io"));
    assert!(!text.contains(PNG));

    let view = engine.get(&owner(), &id).await.unwrap();
    assert_eq!(
        view.pdf_hash_final,
        Some(blake3::hash(&sealed).to_hex().to_string())
    );

    let query = url.split_once('?').unwrap().1;
    let mut expires = 0i64;
    let mut signature = "";
    for pair in query.split('&') {
        match pair.split_once('=').unwrap() {
            ("expires", v) => expires = v.parse().unwrap(),
            ("signature", v) => signature = v,
            _ => {}
        }
    }
    assert!(urls
        .verify("docs/lease-sealed-1.pdf", expires, signature, chrono::Utc::now())
        .is_ok());

    let completions = notifier.messages_of(NotificationKind::CompletionNotice);
    let mut recipients: Vec<_> = completions.iter().map(|m| m.to.as_str()).collect();
    recipients.sort_unstable();
    assert_eq!(recipients, vec!["a@x.io", "owner@example.com"]);

    let _ = std::fs::remove_dir_all(&root);
}

#[tokio::test]
async fn missing_document_records_sealing_failure() {
    let root = temp_root();
    let notifier = Arc::new(RecordingNotificationDispatcher::new("http://localhost:3000/sign"));
    notifier.fail_for("b@x.io");
    let (engine, _) = engine(&root, notifier.clone());

    let created = engine
        .create(&owner(), request("docs/missing.pdf", &["a@x.io", "b@x.io"]))
        .await
        .unwrap();
    assert!(created.envelope.pdf_hash_original.is_none());
    let id = created.envelope.id;

    let sent = engine.send(&owner(), &id).await.unwrap();
    assert_eq!(sent.delivered, 1);

    let outcome = engine
        .submit(
            &created.signing_links[0].token,
            &[FieldSubmission::new("sig-1", PNG)],
            &RequestContext::unknown(),
        )
        .await
        .unwrap();
    assert_eq!(outcome.status, EnvelopeStatus::Signed);
    assert!(outcome.sealed_document_url.is_none());

    let trail = engine.audit_trail(&owner(), &id).await.unwrap();
    assert!(trail
        .entries
        .iter()
        .any(|e| e.event == AuditEventKind::PdfSealingFailed));

    let err = engine.seal(&owner(), &id).await.unwrap_err();
    assert_eq!(err.code(), "INTEGRATION_FAILURE");

    let _ = std::fs::remove_dir_all(&root);
}

type Inbox = Arc<Mutex<Vec<serde_json::Value>>>;

async fn spawn_receiver(status: StatusCode) -> (String, Inbox) {
    let inbox: Inbox = Arc::default();
    let app = Router::new()
        .route(
            "/notify",
            post(
                |State((inbox, status)): State<(Inbox, StatusCode)>,
                 Json(body): Json<serde_json::Value>| async move {
                    inbox.lock().unwrap().push(body);
                    status
                },
            ),
        )
        .with_state((inbox.clone(), status));

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    (format!("http://{}/notify", addr), inbox)
}

#[tokio::test]
async fn webhook_dispatcher_posts_json_messages() {
    let (endpoint, inbox) = spawn_receiver(StatusCode::ACCEPTED).await;
    let root = temp_root();
    let notifier = Arc::new(WebhookNotificationDispatcher::new(
        endpoint,
        "https://sign.example.com/s",
    ));
    let (engine, _) = engine(&root, notifier);

    let created = engine
        .create(&owner(), request("docs/x.pdf", &["a@x.io", "b@x.io"]))
        .await
        .unwrap();
    let sent = engine.send(&owner(), &created.envelope.id).await.unwrap();
    assert_eq!(sent.delivered, 2);

    let received = inbox.lock().unwrap().clone();
    assert_eq!(received.len(), 2);
    assert_eq!(received[0]["kind"], "signature_invitation");
    assert_eq!(received[0]["to"], "a@x.io");
    assert_eq!(received[0]["title"], "Lease");
    assert!(received[0]["sign_url"]
        .as_str()
        .unwrap()
        .starts_with("https://sign.example.com/s/"));

    let _ = std::fs::remove_dir_all(&root);
}

#[tokio::test]
async fn webhook_rejections_and_outages_are_reported() {
    let (endpoint, _) = spawn_receiver(StatusCode::SERVICE_UNAVAILABLE).await;
    let root = temp_root();
    let (engine, _) = engine(
        &root,
        Arc::new(WebhookNotificationDispatcher::new(endpoint, "https://sign.example.com/s")),
    );
    let created = engine
        .create(&owner(), request("docs/x.pdf", &["a@x.io"]))
        .await
        .unwrap();
    let sent = engine.send(&owner(), &created.envelope.id).await.unwrap();
    assert_eq!(sent.delivered, 0);
    assert_eq!(sent.status, EnvelopeStatus::Sent);

    let view = engine.get(&owner(), &created.envelope.id).await.unwrap();
    assert!(view.signers[0].notified_at.is_some());

    // nothing listens on the discard port
    let offline = WebhookNotificationDispatcher::new("http://127.0.0.1:9/notify", "https://s");
    let envelope = engine
        .store()
        .get(&created.envelope.id)
        .await
        .unwrap()
        .unwrap();
    let err = offline
        .send_completion_notice("a@x.io", "A", &envelope)
        .await
        .unwrap_err();
    assert_eq!(err.code(), "INTEGRATION_FAILURE");

    let _ = std::fs::remove_dir_all(&root);
}

#[derive(Clone, Default)]
struct LogBuffer(Arc<Mutex<Vec<u8>>>);

impl io::Write for LogBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[tokio::test]
async fn tracing_dispatcher_keeps_tokens_out_of_logs() {
    let root = temp_root();
    let (engine, _) = engine(&root, Arc::new(RecordingNotificationDispatcher::default()));
    let created = engine
        .create(&owner(), request("docs/x.pdf", &["a@x.io"]))
        .await
        .unwrap();
    let token = created.signing_links[0].token.clone();
    let envelope = engine
        .store()
        .get(&created.envelope.id)
        .await
        .unwrap()
        .unwrap();

    let logs = LogBuffer::default();
    let writer = logs.clone();
    let subscriber = tracing_subscriber::fmt()
        .with_ansi(false)
        .with_writer(move || writer.clone())
        .finish();
    let _guard = tracing::subscriber::set_default(subscriber);

    let dispatcher = TracingNotificationDispatcher::new("https://sign.example.com/s");
    let delivered = dispatcher
        .send_signature_invitation(&envelope.signers()[0], &envelope, "owner@example.com")
        .await
        .unwrap();
    assert!(delivered);

    let output = String::from_utf8(logs.0.lock().unwrap().clone()).unwrap();
    assert!(output.contains("signature invitation"));
    assert!(output.contains("a@x.io"));
    assert!(!output.contains(&token));
    assert!(!output.contains("https://sign.example.com/s/"));

    let _ = std::fs::remove_dir_all(&root);
}
