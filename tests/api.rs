//! End-to-end tests of the HTTP surface against the in-memory store.

use std::sync::Arc;

use axum::{
    Router,
    body::{Body, to_bytes},
    http::{Request, StatusCode, header},
};
use base64::{Engine, engine::general_purpose::STANDARD};
use serde_json::{Value, json};
use tower::ServiceExt;
use uuid::Uuid;

use link_relay::{
    config::AdminCredentials,
    db::InMemoryKeyStore,
    router::create_router,
    services::{
        delivery::RecordingDispatcher, notifier::RecordingNotifier, registration::TrustPolicy,
    },
    state::AppState,
};

struct TestApp {
    router: Router,
    dispatcher: Arc<RecordingDispatcher>,
    notifier: Arc<RecordingNotifier>,
}

fn app() -> TestApp {
    let dispatcher = Arc::new(RecordingDispatcher::new());
    let notifier = Arc::new(RecordingNotifier::new());
    let state = AppState::new(
        Arc::new(InMemoryKeyStore::new()),
        dispatcher.clone(),
        notifier.clone(),
        TrustPolicy::default(),
        Some(AdminCredentials {
            user: "admin".to_string(),
            password: "hunter2".to_string(),
        }),
    );

    TestApp {
        router: create_router(state),
        dispatcher,
        notifier,
    }
}

impl TestApp {
    async fn call(&self, request: Request<Body>) -> (StatusCode, Value) {
        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, body)
    }

    async fn post_json(&self, uri: &str, body: Value) -> (StatusCode, Value) {
        self.call(
            Request::post(uri)
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
    }

    async fn post_form(&self, uri: &str, body: &str) -> (StatusCode, Value) {
        self.call(
            Request::post(uri)
                .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
    }

    async fn get(&self, uri: &str) -> (StatusCode, Value) {
        self.call(Request::get(uri).body(Body::empty()).unwrap())
            .await
    }

    async fn admin(&self, method: &str, uri: &str) -> (StatusCode, Value) {
        let credentials = STANDARD.encode("admin:hunter2");
        self.call(
            Request::builder()
                .method(method)
                .uri(uri)
                .header(header::AUTHORIZATION, format!("Basic {}", credentials))
                .body(Body::empty())
                .unwrap(),
        )
        .await
    }

    async fn flush(&self, uuid: &str) -> (StatusCode, Value) {
        self.call(
            Request::post(format!("/api/flush?api-key={}", uuid))
                .body(Body::empty())
                .unwrap(),
        )
        .await
    }

    /// Register an iOS key, which is active immediately.
    async fn active_key(&self, email: &str) -> String {
        let (status, body) = self
            .post_json("/api/register", json!({"email": email, "source": "ios"}))
            .await;
        assert_eq!(status, StatusCode::OK);
        body["uuid"].as_str().unwrap().to_string()
    }
}

#[tokio::test]
async fn register_without_data_is_rejected() {
    let app = app();

    let (status, body) = app.post_json("/api/register", json!({})).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body, json!(["Missing data"]));

    let (status, body) = app.post_form("/api/register", "").await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body, json!(["Missing data"]));
}

#[tokio::test]
async fn register_with_unknown_source_is_rejected() {
    let app = app();

    let (status, body) = app
        .post_json(
            "/api/register",
            json!({"email": "jane@example.com", "source": "palm"}),
        )
        .await;

    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body, json!(["Missing data"]));
}

#[tokio::test]
async fn chrome_registration_needs_confirmation() {
    let app = app();

    let (status, body) = app
        .post_json(
            "/api/register",
            json!({"email": "jane@example.com", "source": "chrome"}),
        )
        .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["email"], "jane@example.com");
    assert_eq!(body["source"], "chrome");
    assert_eq!(body["status"], "needs_confirmation");
    assert!(Uuid::parse_str(body["uuid"].as_str().unwrap()).is_ok());
    assert!(body.get("confirmation_code").is_none());
    assert_eq!(app.notifier.sent().len(), 1);
}

#[tokio::test]
async fn ios_registration_is_active() {
    let app = app();

    let (status, body) = app
        .post_form("/api/register", "email=jane%40example.com&source=ios")
        .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "active");
    assert!(app.notifier.sent().is_empty());
}

#[tokio::test]
async fn legacy_routes_pin_the_source() {
    let app = app();

    let (_, chrome) = app
        .post_form("/chrome/register", "email=jane%40example.com&source=ios")
        .await;
    assert_eq!(chrome["source"], "chrome");
    assert_eq!(chrome["status"], "needs_confirmation");

    let (_, bookmarklet) = app.post_form("/", "email=joe%40example.com").await;
    assert_eq!(bookmarklet["source"], "bookmarklet");
    assert_eq!(bookmarklet["status"], "needs_confirmation");
}

#[tokio::test]
async fn update_email_requires_confirmation_again() {
    let app = app();
    let uuid = app.active_key("jane@example.com").await;

    let (status, body) = app
        .post_json(
            &format!("/api/update?api-key={}", uuid),
            json!({"email": "jane@work.example.com"}),
        )
        .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["uuid"], uuid.as_str());
    assert_eq!(body["email"], "jane@work.example.com");
    assert_eq!(body["status"], "needs_confirmation");
}

#[tokio::test]
async fn update_email_of_unknown_key_is_not_found() {
    let app = app();

    let (status, _) = app
        .post_json(
            &format!("/api/update?api-key={}", Uuid::new_v4()),
            json!({"email": "jane@example.com"}),
        )
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let uuid = app.active_key("jane@example.com").await;
    let (status, _) = app
        .post_json(
            &format!("/api/update?api-key={}", uuid),
            json!({"email": "not-an-email"}),
        )
        .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
}

#[tokio::test]
async fn confirm_with_unknown_code_is_not_found() {
    let app = app();

    let (status, _) = app.get("/api/confirm/deadbeef").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn send_without_data_is_unauthorized() {
    let app = app();

    let (status, body) = app.post_form("/api/send", "").await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body, json!(["Missing data"]));

    let uuid = app.active_key("jane@example.com").await;
    let (status, _) = app
        .post_form("/api/send", &format!("api-key={}", uuid))
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert!(app.dispatcher.tasks().is_empty());
}

#[tokio::test]
async fn send_with_unknown_key_is_forbidden() {
    let app = app();

    let (status, body) = app
        .post_form(
            "/api/send",
            &format!("api-key={}&link=http%3A%2F%2Fexample.com", Uuid::new_v4()),
        )
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body, json!(["Invalid API key"]));

    let (status, _) = app
        .post_form("/api/send", "api-key=fake&link=http%3A%2F%2Fexample.com")
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn send_with_unconfirmed_key_is_forbidden() {
    let app = app();
    let (_, key) = app
        .post_json(
            "/api/register",
            json!({"email": "jane@example.com", "source": "firefox"}),
        )
        .await;

    let (status, _) = app
        .post_json(
            "/api/send",
            json!({"api-key": key["uuid"], "link": "http://example.com"}),
        )
        .await;

    assert_eq!(status, StatusCode::FORBIDDEN);
    assert!(app.dispatcher.tasks().is_empty());
}

#[tokio::test]
async fn immediate_send_dispatches_one_task() {
    let app = app();
    let uuid = app.active_key("jane@example.com").await;

    let (status, body) = app
        .get(&format!(
            "/api/send?api-key={}&link=http%3A%2F%2Fexample.com%2Fa&title=Example&preview=yes",
            uuid
        ))
        .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!(["Link processed"]));

    let tasks = app.dispatcher.tasks();
    assert_eq!(tasks.len(), 1);
    assert_eq!(tasks[0].link, "http://example.com/a");
    assert_eq!(tasks[0].title.as_deref(), Some("Example"));
    assert_eq!(tasks[0].api_key.email, "jane@example.com");
    assert!(tasks[0].preview);
    assert!(!tasks[0].queued);
}

#[tokio::test]
async fn queued_links_flush_in_submission_order() {
    let app = app();
    let uuid = app.active_key("jane@example.com").await;

    for n in 1..=3 {
        let (status, _) = app
            .post_json(
                "/api/send",
                json!({
                    "api-key": uuid,
                    "link": format!("http://example.com/{}", n),
                    "queued": true,
                }),
            )
            .await;
        assert_eq!(status, StatusCode::OK);
    }
    assert!(app.dispatcher.tasks().is_empty());

    let (status, body) = app.flush(&uuid).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"flushed": 3}));

    let links: Vec<String> = app
        .dispatcher
        .tasks()
        .into_iter()
        .map(|task| {
            assert!(task.queued);
            task.link
        })
        .collect();
    assert_eq!(
        links,
        vec![
            "http://example.com/1",
            "http://example.com/2",
            "http://example.com/3",
        ]
    );
}

#[tokio::test]
async fn flush_stops_at_failed_hand_off() {
    let app = app();
    let uuid = app.active_key("jane@example.com").await;
    for n in 1..=3 {
        app.post_form(
            "/api/send",
            &format!("api-key={}&link=http%3A%2F%2Fexample.com%2F{}&queued=1", uuid, n),
        )
        .await;
    }
    app.dispatcher.fail_after(Some(1));

    let (status, _) = app.flush(&uuid).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(app.dispatcher.tasks().len(), 1);

    app.dispatcher.fail_after(None);
    let (status, body) = app.flush(&uuid).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"flushed": 2}));
    assert_eq!(app.dispatcher.tasks()[2].link, "http://example.com/3");
}

#[tokio::test]
async fn chrome_key_full_lifecycle() {
    let app = app();

    // Register: pending until confirmed
    let (_, key) = app
        .post_form("/chrome/register", "email=Jane%40Example.com")
        .await;
    assert_eq!(key["status"], "needs_confirmation");
    let uuid = key["uuid"].as_str().unwrap().to_string();

    let (status, _) = app
        .post_form("/chrome/ping", &format!("api-key={}", uuid))
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    // Confirm with the code the notifier received
    let code = app
        .notifier
        .last_code_for(Uuid::parse_str(&uuid).unwrap())
        .unwrap();
    let (status, confirmed) = app.get(&format!("/confirm/{}", code)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(confirmed["status"], "active");

    // Codes are single use
    let (status, _) = app.get(&format!("/api/confirm/{}", code)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, body) = app
        .post_form("/chrome/ping", &format!("api-key={}", uuid))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!(["pong"]));

    // Queue two links, then flush
    for link in ["http%3A%2F%2Fa.example", "http%3A%2F%2Fb.example"] {
        let (status, _) = app
            .post_form(
                "/chrome/send",
                &format!("api-key={}&link={}&queued=yes", uuid, link),
            )
            .await;
        assert_eq!(status, StatusCode::OK);
    }

    let (_, detail) = app.admin("GET", &format!("/jarvis/keys/{}", uuid)).await;
    assert_eq!(detail["pending_links"].as_array().unwrap().len(), 2);

    let (_, body) = app.flush(&uuid).await;
    assert_eq!(body, json!({"flushed": 2}));

    let (_, body) = app.flush(&uuid).await;
    assert_eq!(body, json!({"flushed": 0}));
    assert_eq!(app.dispatcher.tasks().len(), 2);
}

#[tokio::test]
async fn re_registration_reuses_the_key() {
    let app = app();

    let (_, first) = app
        .post_json(
            "/api/register",
            json!({"email": "jane@example.com", "source": "android"}),
        )
        .await;
    let (_, second) = app
        .post_json(
            "/api/register",
            json!({"email": " JANE@example.com ", "source": "android"}),
        )
        .await;

    assert_eq!(first["uuid"], second["uuid"]);
    assert_eq!(second["email"], "jane@example.com");
}

#[tokio::test]
async fn send2_answers_with_a_pixel() {
    let app = app();
    let uuid = app.active_key("jane@example.com").await;

    let response = app
        .router
        .clone()
        .oneshot(
            Request::get(format!(
                "/send2?api-key={}&link=http%3A%2F%2Fexample.com",
                uuid
            ))
            .body(Body::empty())
            .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[header::CONTENT_TYPE], "image/gif");
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    assert!(bytes.starts_with(b"GIF89a"));
    assert_eq!(app.dispatcher.tasks().len(), 1);
}

#[tokio::test]
async fn admin_routes_require_credentials() {
    let app = app();

    let response = app
        .router
        .clone()
        .oneshot(Request::get("/jarvis").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert!(response.headers().contains_key(header::WWW_AUTHENTICATE));

    let wrong = STANDARD.encode("admin:wrong");
    let (status, _) = app
        .call(
            Request::get("/jarvis")
                .header(header::AUTHORIZATION, format!("Basic {}", wrong))
                .body(Body::empty())
                .unwrap(),
        )
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    app.active_key("jane@example.com").await;
    let (status, body) = app.admin("GET", "/jarvis").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["keys"]["active"], 1);
    assert_eq!(body["keys"]["revoked"], 0);
    assert_eq!(body["pending_links"], 0);
}

#[tokio::test]
async fn admin_key_routes_treat_bad_ids_as_unknown() {
    let app = app();

    let (status, body) = app.admin("GET", "/jarvis/keys/not-a-uuid").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body, json!(["Not found"]));

    let (status, body) = app.admin("POST", "/jarvis/keys/12345/revoke").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body, json!(["Not found"]));

    let (status, _) = app
        .admin("GET", "/jarvis/keys/8b9c7f0e-1d2a-4c3b-9e8f-000000000000")
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn revoked_key_can_no_longer_send() {
    let app = app();
    let uuid = app.active_key("jane@example.com").await;

    let (status, body) = app
        .admin("POST", &format!("/jarvis/keys/{}/revoke", uuid))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "revoked");

    let (status, _) = app
        .post_form(
            "/send",
            &format!("api-key={}&link=http%3A%2F%2Fexample.com", uuid),
        )
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert!(app.dispatcher.tasks().is_empty());
}

#[tokio::test]
async fn health_reports_ok() {
    let app = app();

    let (status, body) = app.get("/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["database"], "connected");
}
