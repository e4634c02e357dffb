//! HTTP contract tests against a scripted browser backend

use std::sync::Arc;

use axum::body::{Body, Bytes};
use axum::http::{header, HeaderMap, Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use pagepress::acquire::DEFAULT_REMOTE_ENDPOINT;
use pagepress::server::{router, GENERATE_PDF_PATH, HEALTH_PATH};
use pagepress::testing::{Event, Script, ScriptedLauncher, SAMPLE_PDF};
use pagepress::{Acquirer, AcquirerConfig, RenderConfig, Renderer, SessionOrigin};
use tower::ServiceExt;
use url::Url;

fn app_with(script: Script, config: AcquirerConfig) -> (ScriptedLauncher, Router) {
    let launcher = ScriptedLauncher::new(script);
    let acquirer = Acquirer::new(launcher.clone(), config);
    let renderer = Renderer::new(acquirer, RenderConfig::default(), 4);
    (launcher, router(Arc::new(renderer)))
}

fn app(script: Script) -> (ScriptedLauncher, Router) {
    app_with(script, AcquirerConfig::default())
}

async fn post(app: Router, body: &str) -> (StatusCode, HeaderMap, Bytes) {
    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri(GENERATE_PDF_PATH)
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
        .unwrap();

    let status = response.status();
    let headers = response.headers().clone();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    (status, headers, bytes)
}

fn json(bytes: &Bytes) -> serde_json::Value {
    serde_json::from_slice(bytes).expect("error responses are JSON")
}

#[tokio::test]
async fn test_renders_pdf_attachment() {
    let (launcher, app) = app(Script::default());

    let (status, headers, body) = post(app, r#"{"url":"https://example.com"}"#).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(headers[header::CONTENT_TYPE], "application/pdf");
    assert_eq!(headers[header::CONTENT_DISPOSITION], "attachment; filename=\"page.pdf\"");
    assert_eq!(headers[header::CONTENT_LENGTH], body.len().to_string().as_str());
    assert!(body.starts_with(b"%PDF-"));
    assert_eq!(&body[..], SAMPLE_PDF);

    let events = launcher.events();
    assert!(events.contains(&Event::Navigated("https://example.com/".into())));
    assert_eq!(
        &events[events.len() - 2..],
        &[Event::PageClosed, Event::SessionClosed(SessionOrigin::Local)]
    );
}

#[tokio::test]
async fn test_unparseable_url_is_rejected() {
    let (launcher, app) = app(Script::default());

    let (status, _, body) = post(app, r#"{"url":"not a url"}"#).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(json(&body)["error"].as_str().unwrap().contains("not a url"));
    assert_eq!(launcher.sessions_opened(), 0);
}

#[tokio::test]
async fn test_unexpected_key_is_named() {
    let (_, app) = app(Script::default());

    let (status, _, body) = post(app, r#"{"other":"x"}"#).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json(&body), serde_json::json!({ "error": "Unexpected property: other" }));
}

#[tokio::test]
async fn test_extra_keys_next_to_url_are_named() {
    let (launcher, app) = app(Script::default());

    let payload = r#"{"url":"https://example.com","scale":2,"landscape":true}"#;
    let (status, _, body) = post(app, payload).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    let error = json(&body)["error"].as_str().unwrap().to_string();
    assert!(error.contains("scale") && error.contains("landscape"), "{error}");
    assert_eq!(launcher.sessions_opened(), 0);
}

#[tokio::test]
async fn test_file_scheme_is_rejected() {
    let (_, app) = app(Script::default());

    let (status, _, body) = post(app, r#"{"url":"file:///etc/passwd"}"#).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(json(&body)["error"].as_str().unwrap().contains("file:"));
}

#[tokio::test]
async fn test_malformed_json_gets_json_error() {
    let (_, app) = app(Script::default());

    let (status, _, body) = post(app, "{not json").await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(json(&body)["error"].is_string());
}

#[tokio::test]
async fn test_navigation_failure_closes_session_before_responding() {
    let (launcher, app) = app(Script {
        navigation_fails: true,
        ..Default::default()
    });

    let (status, _, body) = post(app, r#"{"url":"http://unreachable.invalid"}"#).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(json(&body)["error"]
        .as_str()
        .unwrap()
        .starts_with("Failed to navigate to URL: "));
    assert_eq!(launcher.sessions_closed(), 1);
    assert!(!launcher.events().contains(&Event::PdfPrinted));
}

#[tokio::test]
async fn test_export_failure_still_tears_down() {
    let (launcher, app) = app(Script {
        print_fails: true,
        ..Default::default()
    });

    let (status, _, body) = post(app, r#"{"url":"https://example.com"}"#).await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    let body = json(&body);
    assert_eq!(body["error"], "PDF Generation Failed");
    assert!(!body["message"].as_str().unwrap().is_empty());
    assert_eq!(launcher.sessions_closed(), 1);
    assert!(launcher.events().contains(&Event::PageClosed));
}

#[tokio::test]
async fn test_teardown_failure_does_not_mask_navigation_error() {
    let (launcher, app) = app(Script {
        navigation_fails: true,
        session_close_fails: true,
        ..Default::default()
    });

    let (status, _, body) = post(app, r#"{"url":"https://example.com"}"#).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(json(&body)["error"].as_str().unwrap().contains("Navigation timeout"));
    assert_eq!(launcher.sessions_closed(), 1);
}

#[tokio::test]
async fn test_browser_unavailable_is_500() {
    let (launcher, app) = app(Script {
        local_fails: true,
        ..Default::default()
    });

    let (status, _, body) = post(app, r#"{"url":"https://example.com"}"#).await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    let body = json(&body);
    assert_eq!(body["error"], "Failed to initialize browser. Please try again later.");
    assert!(body["message"].is_string());
    assert_eq!(launcher.sessions_closed(), 0);
}

#[tokio::test]
async fn test_remote_failure_is_invisible_to_caller() {
    let endpoint = Url::parse(DEFAULT_REMOTE_ENDPOINT).unwrap();
    let (launcher, app) = app_with(
        Script {
            remote_fails: true,
            ..Default::default()
        },
        AcquirerConfig::from_token(Some("expired".into()), endpoint),
    );

    let (status, headers, body) = post(app, r#"{"url":"https://example.com"}"#).await;

    assert_eq!(status, StatusCode::OK);
    assert!(body.starts_with(b"%PDF-"));
    let contract = [header::CONTENT_TYPE, header::CONTENT_DISPOSITION, header::CONTENT_LENGTH];
    assert!(headers.keys().all(|name| contract.contains(name)));
    let events = launcher.events();
    assert_eq!(&events[..2], &[Event::RemoteRefused, Event::LocalLaunched]);
    assert!(events.contains(&Event::SessionClosed(SessionOrigin::Local)));
}

#[tokio::test]
async fn test_health() {
    let (_, app) = app(Script::default());

    let response = app
        .oneshot(Request::builder().uri(HEALTH_PATH).body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_get_on_render_route_is_not_allowed() {
    let (_, app) = app(Script::default());

    let response = app
        .oneshot(Request::builder().uri(GENERATE_PDF_PATH).body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
}
