//! HTTP API for the speaker box.
//!
//! - `GET /health`: 200 when VOICEVOX answers and the default voice resolves, else 503
//! - `POST /speak`: queue a request and wait for its result

use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::json;
use tracing::{info, warn};

use crate::error::{Error, Result};
use crate::service::SpeakService;
use crate::speaker_box::SpeakRequest;

#[derive(Clone)]
pub struct ApiState {
    pub service: Arc<SpeakService>,
}

pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/health", get(handle_health))
        .route("/speak", post(handle_speak))
        .with_state(state)
}

/// Serve the API until the listener fails.
pub async fn serve(state: ApiState, host: &str, port: u16) -> Result<()> {
    let addr = format!("{host}:{port}");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("HTTP API listening on http://{addr}");
    axum::serve(listener, router(state)).await?;
    Ok(())
}

fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    (status, Json(json!({ "error": message.into() }))).into_response()
}

async fn handle_health(State(state): State<ApiState>) -> Response {
    let health = state.service.speaker_box().health().await;
    let status = if health.is_ok() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(health)).into_response()
}

async fn handle_speak(
    State(state): State<ApiState>,
    body: std::result::Result<Json<SpeakRequest>, JsonRejection>,
) -> Response {
    let request = match body {
        Ok(Json(request)) => request,
        Err(rejection) => return error_response(StatusCode::BAD_REQUEST, rejection.body_text()),
    };
    if request.text.trim().is_empty() {
        return error_response(StatusCode::BAD_REQUEST, "text is required");
    }

    let preview: String = request.text.chars().take(40).collect();
    info!(
        "HTTP /speak: \"{}\" (mode={:?}, dry_run={})",
        preview.replace('\n', " "),
        request.mode,
        request.dry_run
    );

    match state.service.speak(request).await {
        Ok(result) if result.is_failure() => {
            (StatusCode::INTERNAL_SERVER_ERROR, Json(result)).into_response()
        }
        Ok(result) => Json(result).into_response(),
        Err(Error::QueueFull) => {
            warn!("Rejecting /speak: queue full");
            error_response(StatusCode::TOO_MANY_REQUESTS, Error::QueueFull.to_string())
        }
        Err(e) => error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use axum::body::Body;
    use axum::http::Request;
    use serde_json::Value;
    use tokio::sync::Semaphore;
    use tower::ServiceExt;

    use super::*;
    use crate::reply::Mode;
    use crate::testing::{test_box, test_config, FakeEngine, FakeLlm, FakeSink};

    fn app(
        engine: FakeEngine,
        llm: FakeLlm,
        capacity: usize,
        dir: &std::path::Path,
    ) -> (Router, Arc<SpeakService>) {
        let speaker_box = test_box(
            test_config(dir),
            &Arc::new(engine),
            &Arc::new(llm),
            &Arc::new(FakeSink::new()),
        );
        let service = Arc::new(SpeakService::start(speaker_box, capacity));
        let router = router(ApiState {
            service: service.clone(),
        });
        (router, service)
    }

    fn speak(body: &str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/speak")
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn send(router: Router, request: Request<Body>) -> (StatusCode, Value) {
        let response = router.oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn health_ok() {
        let dir = tempfile::tempdir().unwrap();
        let (router, _) = app(FakeEngine::new(), FakeLlm::failing(), 4, dir.path());
        let request = Request::get("/health").body(Body::empty()).unwrap();

        let (status, body) = send(router, request).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
        assert_eq!(body["default_speaker"]["id"], 14);
        assert_eq!(body["voicevox"]["speakers_count"], 3);
    }

    #[tokio::test]
    async fn health_degraded_is_503() {
        let dir = tempfile::tempdir().unwrap();
        let (router, _) = app(FakeEngine::unreachable(), FakeLlm::failing(), 4, dir.path());
        let request = Request::get("/health").body(Body::empty()).unwrap();

        let (status, body) = send(router, request).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body["status"], "degraded");
        assert!(body["error"].is_string());
        assert_eq!(body["voicevox"]["reachable"], false);
    }

    #[tokio::test]
    async fn speak_returns_result() {
        let dir = tempfile::tempdir().unwrap();
        let (router, _) = app(FakeEngine::new(), FakeLlm::failing(), 4, dir.path());

        let (status, body) = send(
            router,
            speak(r#"{"text": "こんにちは", "mode": "direct", "dry_run": true}"#),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["reply_text"], "こんにちは。");
        assert_eq!(body["played"], false);
        assert_eq!(body["reply_source"], "direct");
        assert_eq!(body["speaker_id"], 14);
    }

    #[tokio::test]
    async fn speak_rejects_bad_bodies() {
        let dir = tempfile::tempdir().unwrap();
        let (router, _) = app(FakeEngine::new(), FakeLlm::failing(), 4, dir.path());

        for body in [
            r#"{"mode": "direct"}"#,
            r#"{"text": "   "}"#,
            r#"{"text": "hi", "mode": "shout"}"#,
            "not json",
        ] {
            let (status, json) = send(router.clone(), speak(body)).await;
            assert_eq!(status, StatusCode::BAD_REQUEST, "{body}");
            assert!(json["error"].is_string());
        }
    }

    #[tokio::test]
    async fn unknown_speaker_is_500() {
        let dir = tempfile::tempdir().unwrap();
        let (router, _) = app(FakeEngine::new(), FakeLlm::failing(), 4, dir.path());

        let (status, body) = send(
            router,
            speak(r#"{"text": "こんにちは", "speaker": "ずんだもん", "dry_run": true}"#),
        )
        .await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(body["error"].as_str().unwrap().contains("ずんだもん"));
        assert!(body.get("reply_text").is_none());
    }

    #[tokio::test]
    async fn full_queue_is_429() {
        let dir = tempfile::tempdir().unwrap();
        let gate = Arc::new(Semaphore::new(0));
        let (router, service) = app(FakeEngine::new(), FakeLlm::gated(gate.clone()), 1, dir.path());

        let mut request = SpeakRequest::new("一件目", Mode::Llm);
        request.dry_run = true;
        let running = service.submit(request.clone()).unwrap();
        // Fill the single slot once the worker has taken the first request
        let _queued = tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                match service.submit(request.clone()) {
                    Ok(queued) => break queued,
                    Err(_) => tokio::time::sleep(Duration::from_millis(10)).await,
                }
            }
        })
        .await
        .unwrap();

        let (status, body) = send(router, speak(r#"{"text": "三件目", "dry_run": true}"#)).await;
        assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(body["error"], "queue full");

        gate.add_permits(64);
        assert!(running.wait().await.unwrap().reply_text.is_some());
    }
}
