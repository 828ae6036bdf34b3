//! Integration tests for the sign-in handshake.
//!
//! An in-process axum stub plays the remote back-office admin service:
//! scripted login envelopes, a rotating CAPTCHA key, and countable
//! provisioning/bind/permission endpoints. The handshake is driven
//! through its public API with recording fakes for the UI and the
//! navigator.

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use base64ct::{Base64, Encoding};
use cassa::{
    api::{types::Session, ApiClient, ApiError},
    auth::{
        flow::{Handshake, HandshakeUi, Navigator},
        machine::HandshakeState,
        session::{SessionEstablisher, SessionHandle, SessionStore},
    },
};
use secrecy::SecretString;
use serde_json::{json, Value};
use std::{
    collections::VecDeque,
    sync::{
        atomic::{AtomicBool, AtomicU32, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

const OTPAUTH: &str = "otpauth://totp/cassa:ops1?secret=JBSWY3DPEHPK3PXP";

#[derive(Default)]
struct StubState {
    captcha_counter: AtomicU32,
    provision_calls: AtomicU32,
    bind_calls: AtomicU32,
    login_requests: Mutex<Vec<Value>>,
    login_replies: Mutex<VecDeque<Value>>,
    bind_reply: Mutex<Option<Value>>,
    permissions_fail: AtomicBool,
    health_unauthorized: AtomicBool,
}

impl StubState {
    fn push_login_reply(&self, reply: Value) {
        self.login_replies.lock().unwrap().push_back(reply);
    }

    fn set_bind_reply(&self, reply: Value) {
        *self.bind_reply.lock().unwrap() = Some(reply);
    }

    fn login_request(&self, index: usize) -> Value {
        self.login_requests.lock().unwrap()[index].clone()
    }

    fn login_request_count(&self) -> usize {
        self.login_requests.lock().unwrap().len()
    }
}

fn ok_login_reply(token: &str, account: &str) -> Value {
    json!({
        "code": "200",
        "data": {"token": token, "profile": {"account": account}}
    })
}

async fn captcha(State(state): State<Arc<StubState>>) -> Json<Value> {
    let n = state.captcha_counter.fetch_add(1, Ordering::SeqCst) + 1;
    Json(json!({
        "image": Base64::encode_string(b"png-bytes"),
        "key": format!("K{n}"),
    }))
}

async fn login(State(state): State<Arc<StubState>>, Json(body): Json<Value>) -> Json<Value> {
    state.login_requests.lock().unwrap().push(body);
    let reply = state
        .login_replies
        .lock()
        .unwrap()
        .pop_front()
        .unwrap_or_else(|| json!({"code": "500", "message": "unexpected login"}));
    Json(reply)
}

async fn provision(State(state): State<Arc<StubState>>, Json(_body): Json<Value>) -> Json<Value> {
    state.provision_calls.fetch_add(1, Ordering::SeqCst);
    Json(json!({
        "code": "200",
        "data": Base64::encode_string(OTPAUTH.as_bytes()),
    }))
}

async fn bind(State(state): State<Arc<StubState>>, Json(_body): Json<Value>) -> Json<Value> {
    state.bind_calls.fetch_add(1, Ordering::SeqCst);
    let reply = state
        .bind_reply
        .lock()
        .unwrap()
        .clone()
        .unwrap_or_else(|| json!({"code": "200"}));
    Json(reply)
}

async fn permissions(State(state): State<Arc<StubState>>) -> Response {
    if state.permissions_fail.load(Ordering::SeqCst) {
        StatusCode::INTERNAL_SERVER_ERROR.into_response()
    } else {
        Json(json!({
            "menu": [
                {"name": "Merchants", "url": "/merchants"},
                {"name": "Orders", "url": "/orders"}
            ],
            "user": {"role_id": 3, "account": "ops1"}
        }))
        .into_response()
    }
}

async fn health(State(state): State<Arc<StubState>>) -> Response {
    if state.health_unauthorized.load(Ordering::SeqCst) {
        StatusCode::UNAUTHORIZED.into_response()
    } else {
        Json(json!({"name": "admin", "version": "0.1.0", "build": "abcdef1"})).into_response()
    }
}

async fn spawn_stub(state: Arc<StubState>) -> String {
    let app = Router::new()
        .route("/v1/auth/captcha", get(captcha))
        .route("/v1/auth/login", post(login))
        .route("/v1/auth/totp/provision", post(provision))
        .route("/v1/auth/totp/bind", post(bind))
        .route("/v1/auth/permissions", get(permissions))
        .route("/health", get(health))
        .with_state(state);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind stub listener");
    let addr = listener.local_addr().expect("Failed to read stub address");

    tokio::spawn(async move {
        axum::serve(listener, app.into_make_service())
            .await
            .expect("stub server failed");
    });

    format!("http://{addr}")
}

#[derive(Default)]
struct RecordingUi {
    bind_payloads: Mutex<Vec<String>>,
    verify_opened: AtomicU32,
    closed: AtomicU32,
    errors: Mutex<Vec<String>>,
}

impl HandshakeUi for RecordingUi {
    fn open_bind_dialog(&self, otpauth: &str) {
        self.bind_payloads.lock().unwrap().push(otpauth.to_string());
    }

    fn open_verify_dialog(&self) {
        self.verify_opened.fetch_add(1, Ordering::SeqCst);
    }

    fn focus_code_input(&self) {}

    fn close_dialogs(&self) {
        self.closed.fetch_add(1, Ordering::SeqCst);
    }

    fn show_error(&self, message: &str) {
        self.errors.lock().unwrap().push(message.to_string());
    }
}

#[derive(Default)]
struct RecordingNavigator {
    destinations: Mutex<Vec<String>>,
}

impl Navigator for RecordingNavigator {
    fn navigate(&self, destination: &str) {
        self.destinations
            .lock()
            .unwrap()
            .push(destination.to_string());
    }
}

#[derive(Default)]
struct CountingStore {
    saved: Mutex<Vec<Session>>,
    cleared: AtomicU32,
}

impl SessionStore for CountingStore {
    fn load(&self) -> anyhow::Result<Option<Session>> {
        Ok(self.saved.lock().unwrap().last().cloned())
    }

    fn save(&self, session: &Session) -> anyhow::Result<()> {
        self.saved.lock().unwrap().push(session.clone());
        Ok(())
    }

    fn clear(&self) -> anyhow::Result<()> {
        self.cleared.fetch_add(1, Ordering::SeqCst);
        self.saved.lock().unwrap().clear();
        Ok(())
    }
}

struct Harness {
    stub: Arc<StubState>,
    ui: Arc<RecordingUi>,
    navigator: Arc<RecordingNavigator>,
    store: Arc<CountingStore>,
    handle: SessionHandle,
    flow: Handshake,
}

async fn harness() -> Harness {
    let stub = Arc::new(StubState::default());
    let base_url = spawn_stub(stub.clone()).await;

    let api = ApiClient::new(&base_url, Duration::from_secs(2)).expect("Failed to build client");

    let ui = Arc::new(RecordingUi::default());
    let navigator = Arc::new(RecordingNavigator::default());
    let store = Arc::new(CountingStore::default());
    let handle = SessionHandle::default();
    let establisher = SessionEstablisher::new(store.clone(), handle.clone());

    let flow = Handshake::new(api, ui.clone(), navigator.clone(), establisher);

    Harness {
        stub,
        ui,
        navigator,
        store,
        handle,
        flow,
    }
}

fn secret(value: &str) -> SecretString {
    SecretString::from(value.to_string())
}

#[tokio::test]
async fn test_direct_success_persists_once_and_navigates_once() {
    let mut h = harness().await;
    h.stub.push_login_reply(ok_login_reply("T1", "ops1"));

    h.flow.refresh_captcha().await.expect("Failed to refresh");
    h.flow
        .submit("ops1", secret("p@ss"), "7x2q")
        .await
        .expect("validation failed");

    assert_eq!(*h.flow.state(), HandshakeState::Authenticated);
    assert_eq!(h.store.saved.lock().unwrap().len(), 1);
    assert_eq!(h.store.saved.lock().unwrap()[0].token, "T1");
    assert_eq!(
        *h.navigator.destinations.lock().unwrap(),
        vec!["/".to_string()]
    );

    let permissions = h.handle.permissions().expect("missing permissions");
    assert_eq!(permissions.menu.len(), 2);
    assert_eq!(permissions.user.role_id, 3);

    let request = h.stub.login_request(0);
    assert_eq!(request["mode"], "login");
    assert_eq!(request["captcha_key"], "K1");
    assert_eq!(request["captcha_text"], "7x2q");
    assert!(request.get("authenticator_code").is_none());
}

#[tokio::test]
async fn test_bind_flow_provisions_then_replays_original_credentials() {
    let mut h = harness().await;
    h.stub
        .push_login_reply(json!({"code": "202", "message": "ops1"}));
    h.stub.push_login_reply(ok_login_reply("T2", "ops1"));

    h.flow.refresh_captcha().await.expect("Failed to refresh");
    h.flow
        .submit("ops1", secret("p@ss"), "7x2q")
        .await
        .expect("validation failed");

    // A "202" always opens the bind dialog, never Authenticated directly.
    assert_eq!(*h.flow.state(), HandshakeState::NeedsBind);
    assert_eq!(h.stub.provision_calls.load(Ordering::SeqCst), 1);
    assert_eq!(
        *h.ui.bind_payloads.lock().unwrap(),
        vec![OTPAUTH.to_string()]
    );
    assert!(h.navigator.destinations.lock().unwrap().is_empty());

    h.flow.confirm("482913").await.expect("validation failed");

    assert_eq!(*h.flow.state(), HandshakeState::Authenticated);
    assert_eq!(h.stub.bind_calls.load(Ordering::SeqCst), 1);
    assert_eq!(h.store.saved.lock().unwrap().len(), 1);
    assert_eq!(h.navigator.destinations.lock().unwrap().len(), 1);

    // The replay carries the credentials captured at the original submit.
    let replay = h.stub.login_request(1);
    assert_eq!(replay["mode"], "confirm");
    assert_eq!(replay["authenticator_code"], "482913");
    assert_eq!(replay["account"], "ops1");
    assert_eq!(replay["secret"], "p@ss");
    assert_eq!(replay["captcha_key"], "K1");
}

#[tokio::test]
async fn test_verify_flow_makes_no_provisioning_call() {
    let mut h = harness().await;
    h.stub.push_login_reply(json!({"code": "203"}));
    h.stub.push_login_reply(ok_login_reply("T3", "ops1"));

    h.flow.refresh_captcha().await.expect("Failed to refresh");
    h.flow
        .submit("ops1", secret("p@ss"), "7x2q")
        .await
        .expect("validation failed");

    assert_eq!(*h.flow.state(), HandshakeState::NeedsVerify);
    assert_eq!(h.ui.verify_opened.load(Ordering::SeqCst), 1);
    assert_eq!(h.stub.provision_calls.load(Ordering::SeqCst), 0);

    h.flow.confirm("111111").await.expect("validation failed");

    assert_eq!(*h.flow.state(), HandshakeState::Authenticated);
    assert_eq!(h.stub.bind_calls.load(Ordering::SeqCst), 0);
    assert_eq!(h.navigator.destinations.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn test_verify_rejection_closes_dialog_and_rotates_captcha() {
    let mut h = harness().await;
    h.stub.push_login_reply(json!({"code": "203"}));
    h.stub
        .push_login_reply(json!({"code": "500", "message": "bad code"}));

    h.flow.refresh_captcha().await.expect("Failed to refresh");
    h.flow
        .submit("ops1", secret("p@ss"), "7x2q")
        .await
        .expect("validation failed");
    h.flow.confirm("111111").await.expect("validation failed");

    assert_eq!(*h.flow.state(), HandshakeState::Idle);
    assert!(h.ui.closed.load(Ordering::SeqCst) >= 1);
    assert!(h
        .ui
        .errors
        .lock()
        .unwrap()
        .iter()
        .any(|message| message.contains("bad code")));

    // The key used by the failed attempt must no longer be live.
    assert_eq!(h.stub.captcha_counter.load(Ordering::SeqCst), 2);
    assert_eq!(h.flow.captcha().expect("missing challenge").key, "K2");

    assert!(h.store.saved.lock().unwrap().is_empty());
    assert!(h.navigator.destinations.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_rejected_login_shows_error_and_allows_fresh_attempt() {
    let mut h = harness().await;
    h.stub
        .push_login_reply(json!({"code": "500", "message": "bad credentials"}));

    h.flow.refresh_captcha().await.expect("Failed to refresh");
    h.flow
        .submit("ops1", secret("wrong"), "7x2q")
        .await
        .expect("validation failed");

    assert_eq!(*h.flow.state(), HandshakeState::Idle);
    assert!(h
        .ui
        .errors
        .lock()
        .unwrap()
        .iter()
        .any(|message| message.contains("bad credentials")));
    assert_eq!(h.flow.captcha().expect("missing challenge").key, "K2");

    // The next attempt redeems the fresh challenge.
    h.stub.push_login_reply(ok_login_reply("T4", "ops1"));
    h.flow
        .submit("ops1", secret("p@ss"), "9k1m")
        .await
        .expect("validation failed");

    assert_eq!(*h.flow.state(), HandshakeState::Authenticated);
    assert_eq!(h.stub.login_request(1)["captcha_key"], "K2");
}

#[tokio::test]
async fn test_permission_failure_installs_fallback_and_still_navigates() {
    let mut h = harness().await;
    h.stub.permissions_fail.store(true, Ordering::SeqCst);
    h.stub.push_login_reply(ok_login_reply("T5", "ops1"));

    h.flow.refresh_captcha().await.expect("Failed to refresh");
    h.flow
        .submit("ops1", secret("p@ss"), "7x2q")
        .await
        .expect("validation failed");

    assert_eq!(*h.flow.state(), HandshakeState::Authenticated);

    let permissions = h.handle.permissions().expect("missing permissions");
    assert_eq!(permissions.menu.len(), 1);
    assert_eq!(permissions.menu[0].name, "Appearance settings");
    assert_eq!(permissions.user.role_id, 0);

    // Login is still complete: persisted once, navigated once.
    assert_eq!(h.store.saved.lock().unwrap().len(), 1);
    assert_eq!(h.navigator.destinations.lock().unwrap().len(), 1);
    assert!(h.ui.errors.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_validation_failure_makes_no_network_call() {
    let mut h = harness().await;

    h.flow.refresh_captcha().await.expect("Failed to refresh");
    let result = h.flow.submit("ops1", secret("   "), "7x2q").await;

    assert!(result.is_err());
    assert_eq!(*h.flow.state(), HandshakeState::Idle);
    assert_eq!(h.stub.login_request_count(), 0);
    // The live challenge is untouched.
    assert_eq!(h.stub.captcha_counter.load(Ordering::SeqCst), 1);
    assert_eq!(h.flow.captcha().expect("missing challenge").key, "K1");
}

#[tokio::test]
async fn test_malformed_code_is_rejected_client_side() {
    let mut h = harness().await;
    h.stub.push_login_reply(json!({"code": "203"}));

    h.flow.refresh_captcha().await.expect("Failed to refresh");
    h.flow
        .submit("ops1", secret("p@ss"), "7x2q")
        .await
        .expect("validation failed");

    let result = h.flow.confirm("12345").await;
    assert!(result.is_err());
    assert_eq!(*h.flow.state(), HandshakeState::NeedsVerify);
    // Only the initial login reached the server.
    assert_eq!(h.stub.login_request_count(), 1);
}

#[tokio::test]
async fn test_bind_confirm_failure_keeps_dialog_open() {
    let mut h = harness().await;
    h.stub
        .push_login_reply(json!({"code": "202", "message": "ops1"}));
    h.stub
        .set_bind_reply(json!({"code": "500", "message": "code mismatch"}));

    h.flow.refresh_captcha().await.expect("Failed to refresh");
    h.flow
        .submit("ops1", secret("p@ss"), "7x2q")
        .await
        .expect("validation failed");
    h.flow.confirm("482913").await.expect("validation failed");

    // Back in the dialog, no CAPTCHA refresh, error surfaced.
    assert_eq!(*h.flow.state(), HandshakeState::NeedsBind);
    assert_eq!(h.ui.closed.load(Ordering::SeqCst), 0);
    assert_eq!(h.stub.captcha_counter.load(Ordering::SeqCst), 1);
    assert!(h
        .ui
        .errors
        .lock()
        .unwrap()
        .iter()
        .any(|message| message.contains("code mismatch")));

    // A corrected code completes the handshake.
    h.stub.set_bind_reply(json!({"code": "200"}));
    h.stub.push_login_reply(ok_login_reply("T6", "ops1"));
    h.flow.confirm("482914").await.expect("validation failed");

    assert_eq!(*h.flow.state(), HandshakeState::Authenticated);
    assert_eq!(h.stub.bind_calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_replay_asking_for_second_factor_again_is_a_failure() {
    let mut h = harness().await;
    h.stub.push_login_reply(json!({"code": "203"}));
    h.stub.push_login_reply(json!({"code": "203"}));

    h.flow.refresh_captcha().await.expect("Failed to refresh");
    h.flow
        .submit("ops1", secret("p@ss"), "7x2q")
        .await
        .expect("validation failed");
    h.flow.confirm("111111").await.expect("validation failed");

    assert_eq!(*h.flow.state(), HandshakeState::Idle);
    assert!(h.store.saved.lock().unwrap().is_empty());
    assert!(h.navigator.destinations.lock().unwrap().is_empty());
    assert!(!h.ui.errors.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_unauthorized_response_clears_persisted_session() {
    let stub = Arc::new(StubState::default());
    let base_url = spawn_stub(stub.clone()).await;

    let store = Arc::new(CountingStore::default());
    store
        .save(&Session {
            token: "stale".to_string(),
            profile: cassa::api::types::UserProfile {
                account: "ops1".to_string(),
                display_name: None,
            },
        })
        .expect("Failed to seed store");

    let store_for_hook = store.clone();
    let api = ApiClient::new(&base_url, Duration::from_secs(2))
        .expect("Failed to build client")
        .with_unauthorized_hook(Arc::new(move || {
            store_for_hook.clear().expect("Failed to clear store");
        }));

    stub.health_unauthorized.store(true, Ordering::SeqCst);
    let result = api.health().await;

    assert!(matches!(result, Err(ApiError::Http { status: 401, .. })));
    assert_eq!(store.cleared.load(Ordering::SeqCst), 1);
    assert!(store.load().expect("Failed to load").is_none());
}
