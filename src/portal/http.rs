//! Onboarding HTTP server for the captive portal.
//!
//! Serves the credential-entry form, redirects OS connectivity probes to it,
//! and persists submitted credentials. A successful save answers with a static
//! success page and schedules the restart signal after a short grace delay so
//! the response can flush before the process goes down.

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{Html, IntoResponse, Response};
use axum::routing::{get, post};
use axum::Router;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use super::decode::parse_form;
use crate::store::{CredentialStore, Credentials};

/// Connectivity probe paths that must land on the form. One entry per probe;
/// the DNS responder needs no change when this list grows.
const PROBE_PATHS: &[&str] = &[
    // Android
    "/generate_204",
    "/gen_204",
    // Apple
    "/hotspot-detect.html",
    "/library/test/success.html",
    // Windows
    "/connecttest.txt",
    "/ncsi.txt",
    "/redirect",
    "/fwlink",
    // Firefox
    "/canonical.html",
    "/success.txt",
];

const FORM_PAGE: &str = r#"<!DOCTYPE html>
<html>
<head>
    <meta charset="UTF-8">
    <meta name="viewport" content="width=device-width, initial-scale=1.0">
    <title>MoneyBot Setup</title>
    <style>
        body { font-family: -apple-system, sans-serif; max-width: 400px; margin: 50px auto; padding: 20px; background: #1a1a2e; color: #eee; }
        h1 { color: #ffd700; text-align: center; }
        form { background: #16213e; padding: 20px; border-radius: 10px; }
        label { display: block; margin: 15px 0 5px; color: #ffd700; }
        input { width: 100%; padding: 12px; border: 1px solid #0f3460; border-radius: 5px; background: #1a1a2e; color: #fff; box-sizing: border-box; }
        button { width: 100%; padding: 15px; margin-top: 20px; background: #ffd700; color: #1a1a2e; border: none; border-radius: 5px; font-weight: bold; cursor: pointer; }
    </style>
</head>
<body>
    <h1>MoneyBot</h1>
    <form method="POST" action="/save">
        <label>WiFi Network (SSID)</label>
        <input type="text" name="ssid" required maxlength="32">

        <label>WiFi Password</label>
        <input type="password" name="pass" maxlength="64">

        <button type="submit">Save &amp; Connect</button>
    </form>
</body>
</html>"#;

const SUCCESS_PAGE: &str = r#"<!DOCTYPE html>
<html>
<head>
    <meta charset="UTF-8">
    <meta name="viewport" content="width=device-width, initial-scale=1.0">
    <title>Setup Complete</title>
    <style>
        body { font-family: -apple-system, sans-serif; max-width: 400px; margin: 50px auto; padding: 20px; background: #1a1a2e; color: #eee; text-align: center; }
        h1 { color: #00ff88; }
        p { color: #888; }
    </style>
</head>
<body>
    <h1>Setup Complete!</h1>
    <p>MoneyBot will restart and connect to your network.</p>
    <p>This setup network will disappear.</p>
</body>
</html>"#;

#[derive(Clone)]
pub struct PortalState {
    store: Arc<CredentialStore>,
    restart_tx: mpsc::Sender<()>,
    restart_grace: Duration,
}

impl PortalState {
    pub fn new(
        store: Arc<CredentialStore>,
        restart_tx: mpsc::Sender<()>,
        restart_grace: Duration,
    ) -> Self {
        Self {
            store,
            restart_tx,
            restart_grace,
        }
    }
}

/// Builds the portal router: form, save handler and every probe redirect.
pub fn router(state: PortalState) -> Router {
    let mut router = Router::new()
        .route("/", get(form_page))
        .route("/save", post(save_credentials));

    for path in PROBE_PATHS {
        router = router.route(path, get(probe_redirect));
    }

    router.layer(TraceLayer::new_for_http()).with_state(state)
}

async fn form_page() -> Html<&'static str> {
    Html(FORM_PAGE)
}

/// Every probe maps onto the same `302 Found -> /`. Built by hand because the
/// `Redirect` helpers emit 303/307 and captive-portal agents expect 302.
async fn probe_redirect() -> impl IntoResponse {
    (
        StatusCode::FOUND,
        [(header::LOCATION, HeaderValue::from_static("/"))],
    )
}

async fn save_credentials(State(state): State<PortalState>, body: Bytes) -> Response {
    let body = String::from_utf8_lossy(&body);
    let fields = parse_form(&body);

    let mut credentials = Credentials::default();
    for (key, value) in fields {
        match key.as_str() {
            "ssid" => credentials.ssid = value,
            "pass" => credentials.pass = value,
            other => warn!("Ignoring unexpected form field '{}'", other),
        }
    }

    if credentials.ssid.is_empty() {
        return (StatusCode::BAD_REQUEST, "missing network name").into_response();
    }

    if let Err(e) = state.store.save_credentials(&credentials) {
        error!("Failed to persist credentials: {}", e);
        return (StatusCode::INTERNAL_SERVER_ERROR, "failed to save").into_response();
    }

    info!(
        "Credentials saved for '{}', restart in {:?}",
        credentials.ssid, state.restart_grace
    );

    // Let the success page flush before asking for the restart.
    let restart_tx = state.restart_tx.clone();
    let grace = state.restart_grace;
    tokio::spawn(async move {
        tokio::time::sleep(grace).await;
        if restart_tx.send(()).await.is_err() {
            warn!("Restart receiver gone, cannot apply new credentials");
        }
    });

    Html(SUCCESS_PAGE).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use tempfile::tempdir;
    use tower::ServiceExt;

    fn portal(dir: &std::path::Path) -> (Router, mpsc::Receiver<()>, Arc<CredentialStore>) {
        let store = Arc::new(CredentialStore::new(dir, "moneybot-test"));
        let (restart_tx, restart_rx) = mpsc::channel(1);
        let state = PortalState::new(store.clone(), restart_tx, Duration::ZERO);
        (router(state), restart_rx, store)
    }

    #[tokio::test]
    async fn root_serves_the_form() {
        let dir = tempdir().unwrap();
        let (router, _rx, _store) = portal(dir.path());

        let response = router
            .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = response.into_body().collect().await.unwrap().to_bytes();
        let body = String::from_utf8_lossy(&body);
        assert!(body.contains("name=\"ssid\""));
        assert!(body.contains("action=\"/save\""));
    }

    #[tokio::test]
    async fn probe_paths_redirect_to_the_form() {
        let dir = tempdir().unwrap();
        let (router, _rx, _store) = portal(dir.path());

        for path in PROBE_PATHS {
            let response = router
                .clone()
                .oneshot(Request::builder().uri(*path).body(Body::empty()).unwrap())
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::FOUND, "path {}", path);
            assert_eq!(response.headers()[header::LOCATION], "/");
        }
    }

    #[tokio::test]
    async fn save_persists_and_signals_restart() {
        let dir = tempdir().unwrap();
        let (router, mut restart_rx, store) = portal(dir.path());

        let request = Request::builder()
            .method("POST")
            .uri("/save")
            .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(Body::from("ssid=My+Home+Net&pass=s3cret%21"))
            .unwrap();
        let response = router.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let saved = store.load_credentials().unwrap();
        assert_eq!(saved.ssid, "My Home Net");
        assert_eq!(saved.pass, "s3cret!");

        tokio::time::timeout(Duration::from_secs(1), restart_rx.recv())
            .await
            .expect("restart signal not sent")
            .unwrap();
    }

    #[tokio::test]
    async fn save_without_ssid_is_rejected() {
        let dir = tempdir().unwrap();
        let (router, mut restart_rx, store) = portal(dir.path());

        let request = Request::builder()
            .method("POST")
            .uri("/save")
            .body(Body::from("pass=whatever"))
            .unwrap();
        let response = router.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert!(store.load_credentials().is_none());
        assert!(restart_rx.try_recv().is_err());
    }
}
