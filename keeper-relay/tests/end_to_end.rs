//! Relay and client exercised together over real sockets.

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::middleware::{self, Next};
use axum::response::IntoResponse;
use axum::Router;
use keeper_core::client::ApplyOutcome;
use keeper_core::secrets::{LoginData, SecretData, TextData};
use keeper_core::{ApiClient, Cryptor, KdfParams, KeeperClient, LocalSecret, LocalSecretStore, SqliteSecretStore};
use keeper_relay::config::PasswordHashParams;
use keeper_relay::{app_state, build_router, RelayConfig, RelayStorage};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

const FAST_KDF: KdfParams = KdfParams {
    mem_cost: 1024,
    time_cost: 1,
    parallelism: 1,
};

fn relay_config() -> RelayConfig {
    RelayConfig {
        jwt_secret: "end-to-end-secret".to_string(),
        password_hash: PasswordHashParams {
            mem_cost: 1024,
            time_cost: 1,
            parallelism: 1,
        },
        ..RelayConfig::default()
    }
}

fn relay_router() -> Router {
    let cfg = relay_config();
    let storage = RelayStorage::in_memory().unwrap();
    build_router(app_state(storage, &cfg), &cfg)
}

async fn serve(router: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    format!("http://{}", addr)
}

struct TestClient {
    client: KeeperClient,
    store: Arc<SqliteSecretStore>,
    cryptor: Arc<Cryptor>,
}

async fn client(addr: &str, login: &str) -> TestClient {
    let cryptor = Arc::new(Cryptor::with_params("correct horse", login, FAST_KDF));
    let store = Arc::new(SqliteSecretStore::in_memory(cryptor.clone()).unwrap());
    let api = ApiClient::new(addr).unwrap();
    let client = KeeperClient::new(cryptor.clone(), store.clone(), api)
        .await
        .unwrap();
    TestClient {
        client,
        store,
        cryptor,
    }
}

fn note(content: &str) -> SecretData {
    SecretData::Text(TextData {
        content: content.to_string(),
    })
}

/// Poll `check` until it holds or a few seconds pass.
async fn eventually<F, Fut>(mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    for _ in 0..100 {
        if check().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    false
}

#[tokio::test]
async fn secret_lifecycle() {
    let addr = serve(relay_router()).await;
    let alice = client(&addr, "alice").await;

    alice.client.register().await.unwrap();
    let err = alice.client.register().await.unwrap_err();
    assert!(err.is_already_exists(), "unexpected: {err}");

    alice.client.login().await.unwrap();
    assert!(alice.client.session().has_token().await);

    let created = alice
        .client
        .create_secret("note1", &note("remember the milk"), "groceries")
        .await
        .unwrap();

    let read = alice.client.read_secret("note1").await.unwrap();
    assert_eq!(read.parse_data().unwrap(), note("remember the milk"));
    assert_eq!(read.hash, created.hash);
    assert_eq!(read.last_modified, created.last_modified);
    assert_eq!(read.metadata, "groceries");

    let remote = alice.client.list_remote_secrets().await.unwrap();
    assert_eq!(remote.len(), 1);
    assert_eq!(remote[0].name, "note1");

    alice.client.delete_secret("note1").await.unwrap();
    let err = alice.client.read_secret("note1").await.unwrap_err();
    assert!(err.is_not_found(), "unexpected: {err}");
    assert!(alice.client.list_remote_secrets().await.unwrap().is_empty());
    assert!(alice.client.list_local_secrets().await.unwrap().is_empty());

    alice.client.close().await.unwrap();
}

#[tokio::test]
async fn update_changes_hash_and_timestamp() {
    let addr = serve(relay_router()).await;
    let alice = client(&addr, "alice").await;
    alice.client.register().await.unwrap();
    alice.client.login().await.unwrap();

    let login = SecretData::Login(LoginData {
        username: "alice".to_string(),
        password: "hunter2".to_string(),
        url: "https://bank.example.com".to_string(),
    });
    let first = alice.client.create_secret("bank", &login, "").await.unwrap();

    let rotated = SecretData::Login(LoginData {
        username: "alice".to_string(),
        password: "hunter3".to_string(),
        url: String::new(),
    });
    let second = alice
        .client
        .update_secret("bank", &rotated, "")
        .await
        .unwrap();
    assert_ne!(second.hash, first.hash);
    assert!(second.last_modified > first.last_modified);

    let read = alice.client.read_secret("bank").await.unwrap();
    assert_eq!(read.parse_data().unwrap(), rotated);

    alice.client.close().await.unwrap();
}

#[tokio::test]
async fn login_failures() {
    let addr = serve(relay_router()).await;
    let alice = client(&addr, "alice").await;

    let err = alice.client.login().await.unwrap_err();
    assert!(err.is_not_found(), "unexpected: {err}");

    alice.client.register().await.unwrap();
    let impostor = {
        let cryptor = Arc::new(Cryptor::with_params("wrong password", "alice", FAST_KDF));
        let store = Arc::new(SqliteSecretStore::in_memory(cryptor.clone()).unwrap());
        KeeperClient::new(cryptor, store, ApiClient::new(&addr).unwrap())
            .await
            .unwrap()
    };
    let err = impostor.login().await.unwrap_err();
    assert!(
        matches!(&err, keeper_core::KeeperError::Api(e) if e.is_unauthenticated()),
        "unexpected: {err}"
    );
}

#[tokio::test]
async fn pushed_updates_reach_other_devices() {
    let addr = serve(relay_router()).await;
    let laptop = client(&addr, "alice").await;
    let phone = client(&addr, "alice").await;
    assert_ne!(
        laptop.client.connection_number(),
        phone.client.connection_number()
    );

    laptop.client.register().await.unwrap();
    laptop.client.login().await.unwrap();
    phone.client.login().await.unwrap();

    laptop
        .client
        .create_secret("wifi", &note("correct-horse-battery"), "")
        .await
        .unwrap();

    let phone_store = phone.store.clone();
    assert!(
        eventually(|| {
            let store = phone_store.clone();
            async move { store.get("wifi").await.is_ok() }
        })
        .await,
        "phone never received the new secret"
    );
    let received = phone.store.get("wifi").await.unwrap();
    assert_eq!(received.parse_data().unwrap(), note("correct-horse-battery"));

    laptop.client.delete_secret("wifi").await.unwrap();
    assert!(
        eventually(|| {
            let store = phone_store.clone();
            async move { store.get("wifi").await.is_err() }
        })
        .await,
        "phone never applied the deletion"
    );

    laptop.client.close().await.unwrap();
    phone.client.close().await.unwrap();
}

#[tokio::test]
async fn sync_uploads_offline_secrets() {
    let addr = serve(relay_router()).await;
    let laptop = client(&addr, "alice").await;
    let phone = client(&addr, "alice").await;
    laptop.client.register().await.unwrap();
    laptop.client.login().await.unwrap();
    phone.client.login().await.unwrap();

    // Written while offline: present locally, unknown to the relay.
    let offline = LocalSecret::new(&phone.cryptor, "offline", &note("drafted on a plane"), "")
        .unwrap();
    phone.store.create(&offline).await.unwrap();
    assert!(laptop.client.list_remote_secrets().await.unwrap().is_empty());

    phone.client.sync_secrets().await.unwrap();

    let remote = laptop.client.list_remote_secrets().await.unwrap();
    assert_eq!(remote.len(), 1);
    assert_eq!(remote[0].name, "offline");
    assert_eq!(remote[0].hash, offline.hash);

    let laptop_store = laptop.store.clone();
    assert!(
        eventually(|| {
            let store = laptop_store.clone();
            async move { store.get("offline").await.is_ok() }
        })
        .await,
        "laptop never received the synced secret"
    );

    // Nothing left to reconcile.
    phone.client.sync_secrets().await.unwrap();
    assert_eq!(laptop.client.list_remote_secrets().await.unwrap().len(), 1);

    laptop.client.close().await.unwrap();
    phone.client.close().await.unwrap();
}

#[tokio::test]
async fn sync_pulls_relay_secrets_to_a_fresh_device() {
    let addr = serve(relay_router()).await;
    let laptop = client(&addr, "alice").await;
    laptop.client.register().await.unwrap();
    laptop.client.login().await.unwrap();
    laptop
        .client
        .create_secret("wifi", &note("correct-horse-battery"), "")
        .await
        .unwrap();

    // Never logged in, so no update stream: only the sync reply can deliver.
    let phone = client(&addr, "alice").await;
    assert!(phone.store.get_all().await.unwrap().is_empty());

    let outcomes = phone.client.sync_secrets().await.unwrap();
    assert_eq!(outcomes, vec![ApplyOutcome::Inserted]);
    let pulled = phone.store.get("wifi").await.unwrap();
    assert_eq!(pulled.parse_data().unwrap(), note("correct-horse-battery"));

    // A second sync finds both sides equal.
    let outcomes = phone.client.sync_secrets().await.unwrap();
    assert!(outcomes.iter().all(|o| *o == ApplyOutcome::Kept), "{outcomes:?}");

    laptop.client.close().await.unwrap();
    phone.client.close().await.unwrap();
}

#[tokio::test]
async fn stale_token_is_refreshed_once() {
    let logins = Arc::new(AtomicUsize::new(0));
    let rejected = Arc::new(AtomicUsize::new(0));

    // Rejects the first secrets call as unauthenticated and counts logins.
    let flaky = {
        let logins = logins.clone();
        let rejected = rejected.clone();
        move |request: Request<Body>, next: Next| {
            let logins = logins.clone();
            let rejected = rejected.clone();
            async move {
                let path = request.uri().path().to_string();
                if path == "/api/v1/auth/login" {
                    logins.fetch_add(1, Ordering::SeqCst);
                }
                if path.starts_with("/api/v1/secrets") && rejected.fetch_add(1, Ordering::SeqCst) == 0 {
                    return (StatusCode::UNAUTHORIZED, "stale").into_response();
                }
                next.run(request).await
            }
        }
    };
    let addr = serve(relay_router().layer(middleware::from_fn(flaky))).await;

    let alice = client(&addr, "alice").await;
    alice.client.register().await.unwrap();
    alice.client.session().login().await.unwrap();
    assert_eq!(logins.load(Ordering::SeqCst), 1);

    let remote = alice.client.list_remote_secrets().await.unwrap();
    assert!(remote.is_empty());
    assert_eq!(logins.load(Ordering::SeqCst), 2);
    assert_eq!(rejected.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn persistent_unauthenticated_is_returned() {
    // Every secrets call is rejected: exactly one retry, then the error.
    let logins = Arc::new(AtomicUsize::new(0));
    let always = {
        let logins = logins.clone();
        move |request: Request<Body>, next: Next| {
            let logins = logins.clone();
            async move {
                let path = request.uri().path().to_string();
                if path == "/api/v1/auth/login" {
                    logins.fetch_add(1, Ordering::SeqCst);
                }
                if path.starts_with("/api/v1/secrets") {
                    return (StatusCode::UNAUTHORIZED, "stale").into_response();
                }
                next.run(request).await
            }
        }
    };
    let addr = serve(relay_router().layer(middleware::from_fn(always))).await;

    let alice = client(&addr, "alice").await;
    alice.client.register().await.unwrap();

    let err = alice.client.list_remote_secrets().await.unwrap_err();
    assert!(
        matches!(&err, keeper_core::KeeperError::Api(e) if e.is_unauthenticated()),
        "unexpected: {err}"
    );
    assert_eq!(logins.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn header_requirements() {
    let addr = serve(relay_router()).await;
    let http = reqwest::Client::new();

    let health = http.get(format!("{addr}/health")).send().await.unwrap();
    assert_eq!(health.status(), reqwest::StatusCode::OK);

    let first: serde_json::Value = http
        .post(format!("{addr}/api/v1/connection"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let second: serde_json::Value = http
        .post(format!("{addr}/api/v1/connection"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert!(second["connection_number"].as_u64() > first["connection_number"].as_u64());

    // Register without a connection number.
    let resp = http
        .post(format!("{addr}/api/v1/auth/register"))
        .json(&serde_json::json!({"login": "bob", "password": "pw"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), reqwest::StatusCode::BAD_REQUEST);

    // Secrets without a token.
    let resp = http
        .get(format!("{addr}/api/v1/secrets"))
        .header("connectionnumber", "1")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), reqwest::StatusCode::UNAUTHORIZED);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert!(body["error"].is_string());

    // Secrets with a token but no connection number.
    let resp = http
        .get(format!("{addr}/api/v1/secrets"))
        .bearer_auth("whatever")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), reqwest::StatusCode::BAD_REQUEST);
}
