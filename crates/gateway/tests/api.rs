//! End-to-end tests against a real server on an ephemeral port.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::{collections::BTreeMap, net::SocketAddr, sync::Arc, time::Duration};

use {
    parley_common::{now_ms, time::HOUR_MS},
    parley_config::ParleyConfig,
    parley_gateway::{GatewayState, build_gateway_app},
    parley_store::{
        Audience, Contact, Conversation, ConversationStatus, DeliveryStatus, Segment, SqliteStore,
        Store, Template, TemplateStatus, Visibility, new_id,
    },
    parley_transport::{DryRunRecord, DryRunTransport, TransportError},
    reqwest::StatusCode,
    secrecy::Secret,
    serde_json::{Value, json},
    tempfile::TempDir,
    tokio::net::TcpListener,
};

const CUSTOMER: &str = "+14155550101";

struct TestServer {
    addr: SocketAddr,
    store: Arc<SqliteStore>,
    transport: Arc<DryRunTransport>,
    http: reqwest::Client,
    _media: TempDir,
}

impl TestServer {
    fn url(&self, path: &str) -> String {
        format!("http://{}{path}", self.addr)
    }

    async fn post_form(&self, path: &str, form: &[(&str, &str)]) -> reqwest::Response {
        self.http
            .post(self.url(path))
            .form(form)
            .send()
            .await
            .unwrap()
    }

    async fn inbound(&self, sid: &str, body: &str) {
        let from = format!("whatsapp:{CUSTOMER}");
        let res = self
            .post_form(
                "/webhooks/inbound",
                &[
                    ("MessageSid", sid),
                    ("From", from.as_str()),
                    ("To", "whatsapp:+14155559999"),
                    ("Body", body),
                    ("ProfileName", "Ada"),
                ],
            )
            .await;
        assert_eq!(res.status(), StatusCode::OK);
    }

    async fn customer_conversation(&self) -> Conversation {
        let contact = self
            .store
            .find_or_create_contact(CUSTOMER, None, now_ms())
            .await
            .unwrap();
        self.store
            .latest_conversation_for_contact(&contact.id)
            .await
            .unwrap()
            .unwrap()
    }
}

async fn start(api_key: Option<&str>, transport: DryRunTransport) -> TestServer {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let media = tempfile::tempdir().unwrap();

    let mut config = ParleyConfig::default();
    config.server.public_url = Some(format!("http://{addr}"));
    config.media.upload_dir = media.path().display().to_string();
    config.campaigns.batch_delay_ms = 0;
    config.auth.api_key = api_key.map(|k| Secret::new(k.to_string()));

    let store = Arc::new(SqliteStore::in_memory().await.unwrap());
    let transport = Arc::new(transport);
    let state = GatewayState::new(&config, store.clone(), transport.clone());
    let app = build_gateway_app(state);
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    TestServer {
        addr,
        store,
        transport,
        http: reqwest::Client::new(),
        _media: media,
    }
}

#[tokio::test]
async fn health_reports_transport() {
    let server = start(None, DryRunTransport::new()).await;
    let body: Value = reqwest::get(server.url("/health"))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["status"], "ok");
    assert_eq!(body["transport"], "dry_run");
}

#[tokio::test]
async fn inbound_opens_window_and_reply_is_sent() {
    let server = start(None, DryRunTransport::new()).await;
    server.inbound("SMin1", "hello").await;
    let conversation = server.customer_conversation().await;

    let view: Value = server
        .http
        .get(server.url(&format!("/api/conversations/{}", conversation.id)))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(view["status"], "open");
    assert_eq!(view["visibility"], "active");
    assert_eq!(view["withinWindow"], true);
    assert_eq!(view["windowState"]["state"], "open");
    assert_eq!(view["messages"].as_array().unwrap().len(), 1);

    let res = server
        .http
        .post(server.url(&format!("/api/conversations/{}/messages", conversation.id)))
        .json(&json!({ "message": "thanks for writing" }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::CREATED);
    let outcome: Value = res.json().await.unwrap();
    assert!(outcome["messageId"].as_str().is_some());
    assert_eq!(outcome["providerStatus"], "queued");

    let sent = server.transport.sent().await;
    assert_eq!(sent.len(), 1);
    match &sent[0] {
        DryRunRecord::Message(req) => {
            assert_eq!(req.to, CUSTOMER);
            assert_eq!(req.body.as_deref(), Some("thanks for writing"));
            assert!(req.status_callback.as_deref().unwrap().ends_with("/webhooks/status"));
        },
        other => panic!("unexpected record {other:?}"),
    }
}

#[tokio::test]
async fn reply_outside_window_is_rejected() {
    let server = start(None, DryRunTransport::new()).await;
    let now = now_ms();
    let contact = Contact {
        id: new_id(),
        phone: CUSTOMER.into(),
        name: None,
        email: None,
        profile: BTreeMap::new(),
        created_at: now,
        updated_at: now,
    };
    server.store.insert_contact(&contact).await.unwrap();
    let conversation = Conversation {
        id: new_id(),
        contact_id: contact.id.clone(),
        status: ConversationStatus::Open,
        visibility: Visibility::Active,
        last_message_at: Some(now - 25 * HOUR_MS),
        last_customer_message_at: Some(now - 25 * HOUR_MS),
        window_expires_at: Some(now - HOUR_MS),
        created_by_campaign: None,
        created_at: now - 25 * HOUR_MS,
        updated_at: now - 25 * HOUR_MS,
    };
    server.store.insert_conversation(&conversation).await.unwrap();

    let res = server
        .http
        .post(server.url(&format!("/api/conversations/{}/messages", conversation.id)))
        .json(&json!({ "message": "too late" }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["code"], "WINDOW_EXPIRED");
    assert!(
        server
            .store
            .list_messages(&conversation.id, 10)
            .await
            .unwrap()
            .is_empty()
    );
    assert!(server.transport.sent().await.is_empty());
}

#[tokio::test]
async fn unknown_conversation_is_not_found() {
    let server = start(None, DryRunTransport::new()).await;
    let res = server
        .http
        .post(server.url("/api/conversations/nope/messages"))
        .json(&json!({ "message": "hi" }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::NOT_FOUND);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["code"], "CONVERSATION_NOT_FOUND");
    assert_eq!(body["details"]["id"], "nope");
}

#[tokio::test]
async fn malformed_body_is_a_validation_error() {
    let server = start(None, DryRunTransport::new()).await;
    server.inbound("SMin1", "hello").await;
    let conversation = server.customer_conversation().await;

    let res = server
        .http
        .post(server.url(&format!("/api/conversations/{}/messages", conversation.id)))
        .header("content-type", "application/json")
        .body("{not json")
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["code"], "VALIDATION_ERROR");
}

#[tokio::test]
async fn provider_permission_error_is_forbidden() {
    let server = start(None, DryRunTransport::new()).await;
    server.inbound("SMin1", "send me the brochure").await;
    let conversation = server.customer_conversation().await;
    server
        .transport
        .fail_for(
            CUSTOMER,
            TransportError::from_provider(Some("20403".into()), "media URL not accessible"),
        )
        .await;

    let res = server
        .http
        .post(server.url(&format!("/api/conversations/{}/messages", conversation.id)))
        .json(&json!({
            "type": "document",
            "mediaUrl": "https://cdn.example.com/brochure.pdf",
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::FORBIDDEN);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["code"], "MEDIA_PERMISSION_DENIED");
    assert_eq!(body["details"]["providerCode"], "20403");

    let messages = server
        .store
        .list_messages(&conversation.id, 10)
        .await
        .unwrap();
    assert_eq!(messages.len(), 1, "only the inbound message is stored");
}

#[tokio::test]
async fn api_key_guards_api_routes_only() {
    let server = start(Some("s3cret"), DryRunTransport::new()).await;
    let path = server.url("/api/campaigns/missing");

    let res = server.http.get(&path).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["code"], "UNAUTHORIZED");

    let res = server
        .http
        .get(&path)
        .bearer_auth("wrong")
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);

    let res = server
        .http
        .get(&path)
        .bearer_auth("s3cret")
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::NOT_FOUND);

    let res = server
        .http
        .get(&path)
        .header("x-api-key", "s3cret")
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::NOT_FOUND);

    let res = server.http.get(server.url("/health")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    server.inbound("SMin1", "no key needed").await;
}

#[tokio::test]
async fn webhooks_always_acknowledge() {
    let server = start(None, DryRunTransport::new()).await;

    for path in ["/webhooks/inbound", "/webhooks/status"] {
        let res = server
            .http
            .post(server.url(path))
            .body("%%%&&=")
            .send()
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        assert_eq!(res.headers()["content-type"], "text/xml");
        assert!(res.text().await.unwrap().contains("<Response/>"));
    }

    let res = server
        .post_form(
            "/webhooks/inbound",
            &[("MessageSid", "SMbad"), ("From", "not-a-phone")],
        )
        .await;
    assert_eq!(res.status(), StatusCode::OK);

    let res = server
        .post_form(
            "/webhooks/status",
            &[("MessageSid", "SMunknown"), ("MessageStatus", "delivered")],
        )
        .await;
    assert_eq!(res.status(), StatusCode::OK);
}

#[tokio::test]
async fn duplicate_inbound_delivery_is_stored_once() {
    let server = start(None, DryRunTransport::new()).await;
    server.inbound("SMdup", "hello").await;
    server.inbound("SMdup", "hello").await;
    let conversation = server.customer_conversation().await;
    let messages = server
        .store
        .list_messages(&conversation.id, 10)
        .await
        .unwrap();
    assert_eq!(messages.len(), 1);
}

async fn seed_audience(store: &SqliteStore, phones: &[&str]) -> (String, String) {
    let now = now_ms();
    let template = Template {
        id: new_id(),
        name: "promo".into(),
        content_sid: "HX1234".into(),
        body: "Hello {{1}}".into(),
        status: TemplateStatus::Approved,
        created_at: now,
    };
    store.insert_template(&template).await.unwrap();
    let segment = Segment {
        id: new_id(),
        name: "customers".into(),
        created_at: now,
    };
    store.insert_segment(&segment).await.unwrap();
    for phone in phones {
        let contact = Contact {
            id: new_id(),
            phone: (*phone).into(),
            name: None,
            email: None,
            profile: BTreeMap::new(),
            created_at: now,
            updated_at: now,
        };
        store.insert_contact(&contact).await.unwrap();
        store.add_to_segment(&contact.id, &segment.id).await.unwrap();
    }
    let audience = Audience {
        id: new_id(),
        name: "everyone".into(),
        segment_ids: vec![segment.id],
        created_at: now,
    };
    store.insert_audience(&audience).await.unwrap();
    (template.id, audience.id)
}

#[tokio::test]
async fn campaign_completes_after_delivery_reports() {
    let phones = ["+14155550101", "+14155550102", "+14155550103"];
    let transport = DryRunTransport::new().with_callbacks();
    transport
        .fail_for(
            phones[2],
            TransportError::from_provider(Some("63003".into()), "unreachable"),
        )
        .await;
    let server = start(None, transport).await;
    let (template_id, audience_id) = seed_audience(&server.store, &phones).await;

    let res = server
        .http
        .post(server.url("/api/campaigns"))
        .json(&json!({
            "name": "spring",
            "templateId": template_id,
            "audienceId": audience_id,
            "scheduleType": "immediate",
            "templateVariables": { "1": "friend" },
            "variableSource": "static",
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::ACCEPTED);
    let created: Value = res.json().await.unwrap();
    let id = created["campaign"]["id"].as_str().unwrap().to_string();

    let campaign_url = server.url(&format!("/api/campaigns/{id}"));
    let mut view = Value::Null;
    for _ in 0..200 {
        view = server
            .http
            .get(&campaign_url)
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        if view["latestRun"]["status"] == "completed" {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(view["latestRun"]["status"], "completed");
    assert_eq!(view["campaign"]["status"], "running");

    let rows = server.store.campaign_messages(&id).await.unwrap();
    assert_eq!(rows.len(), 3);
    for row in rows.iter().filter(|r| r.status == DeliveryStatus::Sent) {
        let sid = row.provider_message_id.clone().unwrap();
        let res = server
            .post_form(
                "/webhooks/status",
                &[("MessageSid", sid.as_str()), ("MessageStatus", "delivered")],
            )
            .await;
        assert_eq!(res.status(), StatusCode::OK);
    }

    let analytics: Value = server
        .http
        .get(server.url(&format!("/api/campaigns/{id}/analytics")))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(analytics["sent"], 3);
    assert_eq!(analytics["delivered"], 2);
    assert_eq!(analytics["failed"], 1);
    assert_eq!(analytics["deliveryRate"], 66.67);

    let view: Value = server
        .http
        .get(&campaign_url)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(view["campaign"]["status"], "completed");

    let res = server
        .http
        .post(server.url(&format!("/api/campaigns/{id}/pause")))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["code"], "CAMPAIGN_STATE");
}

#[tokio::test]
async fn campaign_with_unknown_template_is_not_found() {
    let server = start(None, DryRunTransport::new()).await;
    let (_, audience_id) = seed_audience(&server.store, &[CUSTOMER]).await;
    let res = server
        .http
        .post(server.url("/api/campaigns"))
        .json(&json!({
            "name": "spring",
            "templateId": "missing",
            "audienceId": audience_id,
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::NOT_FOUND);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["code"], "TEMPLATE_NOT_FOUND");
}

#[tokio::test]
async fn uploaded_media_is_served_back() {
    let server = start(None, DryRunTransport::new()).await;
    let bytes = b"\x89PNG\r\n\x1a\nfake image".to_vec();

    let res = server
        .http
        .post(server.url("/api/media"))
        .header("content-type", "image/png")
        .header("x-filename", "../logo.png")
        .body(bytes.clone())
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::CREATED);
    let uploaded: Value = res.json().await.unwrap();
    assert_eq!(uploaded["contentType"], "image/png");
    assert_eq!(uploaded["derivedMessageType"], "image");
    assert_eq!(uploaded["size"], bytes.len());
    let url = uploaded["url"].as_str().unwrap();
    assert!(url.ends_with("-logo.png"));

    let served = server.http.get(url).send().await.unwrap();
    assert_eq!(served.status(), StatusCode::OK);
    assert_eq!(served.bytes().await.unwrap().to_vec(), bytes);
}

#[tokio::test]
async fn upload_rejects_empty_and_unlisted_types() {
    let server = start(None, DryRunTransport::new()).await;

    let res = server
        .http
        .post(server.url("/api/media"))
        .header("content-type", "application/x-msdownload")
        .body(vec![1u8, 2, 3])
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["code"], "MEDIA_VALIDATION_ERROR");

    let res = server
        .http
        .post(server.url("/api/media"))
        .header("content-type", "image/jpeg")
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
}
