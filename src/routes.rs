use axum::{
    Json,
    body::Bytes,
    extract::{Path, State},
    http::{header, HeaderMap, StatusCode},
    response::{Html, IntoResponse, Response},
};
use base64::Engine;
use include_dir::{include_dir, Dir};
use parking_lot::RwLock;
use std::{collections::HashMap, sync::Arc, time::Duration};
use uuid::Uuid;

use crate::{
    error::{ApiError, SessionError},
    gemini::GeminiClient,
    ingest::{ingest_data_url, ingest_reader},
    models::{DataUrlUpload, GenerateBody, GenerationRequest, MetaView, SessionView},
    session::Session,
};

static STATIC_DIR: Dir<'_> = include_dir!("$CARGO_MANIFEST_DIR/static");

pub const SUGGESTED_EDITS: [&str; 5] = [
    "Add a retro film filter",
    "Remove the background",
    "Turn it into a watercolor painting",
    "Make it look like a snowy winter day",
    "Add a banana somewhere in the scene",
];

pub const COMPLEX_PROMPT_EXAMPLE: &str = "A cozy reading nook inside a giant hollowed-out banana, \
warm lamplight, stacks of old books, a sleepy cat on a knitted blanket, cinematic lighting, \
highly detailed, 35mm photograph";

#[derive(Clone)]
pub struct AppState {
    pub sessions: Arc<RwLock<HashMap<Uuid, Session>>>,
    pub gemini: Arc<GeminiClient>,
    pub max_upload_bytes: usize,
}

impl AppState {
    pub fn new(gemini: GeminiClient, max_upload_bytes: usize) -> Self {
        Self { sessions: Arc::default(), gemini: Arc::new(gemini), max_upload_bytes }
    }

    fn with_session<T>(&self, id: Uuid, f: impl FnOnce(&mut Session) -> T) -> Result<T, ApiError> {
        let mut guard = self.sessions.write();
        let session = guard.get_mut(&id).ok_or(SessionError::NotFound)?;
        session.touch();
        Ok(f(session))
    }

    /// Drops sessions untouched for `ttl`. Returns how many were removed.
    pub fn evict_idle(&self, ttl: Duration) -> usize {
        let Ok(ttl) = chrono::Duration::from_std(ttl) else { return 0 };
        let now = chrono::Utc::now();
        let mut guard = self.sessions.write();
        let before = guard.len();
        guard.retain(|_, s| !s.is_idle_for(ttl, now));
        before - guard.len()
    }
}

/// Background loop evicting abandoned sessions.
pub async fn sweep_idle_sessions(state: AppState, ttl: Duration) {
    let mut interval = tokio::time::interval(ttl.clamp(Duration::from_secs(1), Duration::from_secs(60)));
    loop {
        interval.tick().await;
        let evicted = state.evict_idle(ttl);
        if evicted > 0 {
            tracing::info!("🧹 Evicted {} idle session(s), {} remaining", evicted, state.sessions.read().len());
        }
    }
}

pub async fn index() -> Response {
    match STATIC_DIR.get_file("index.html").and_then(|f| f.contents_utf8()) {
        Some(html) => Html(html).into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

pub async fn meta(State(state): State<AppState>) -> Json<MetaView> {
    Json(MetaView {
        model: state.gemini.model().to_string(),
        demo_mode: state.gemini.is_demo(),
        suggested_edits: SUGGESTED_EDITS.to_vec(),
        complex_prompt_example: COMPLEX_PROMPT_EXAMPLE,
    })
}

pub async fn create_session(State(state): State<AppState>) -> (StatusCode, Json<SessionView>) {
    let session = Session::new();
    let view = session.view();
    state.sessions.write().insert(session.id, session);
    tracing::info!("🆕 Created session {}", view.id);
    (StatusCode::CREATED, Json(view))
}

pub async fn delete_session(Path(id): Path<Uuid>, State(state): State<AppState>) -> Result<StatusCode, ApiError> {
    state.sessions.write().remove(&id).ok_or(SessionError::NotFound)?;
    tracing::info!("🗑️ Deleted session {}", id);
    Ok(StatusCode::NO_CONTENT)
}

pub async fn get_session(Path(id): Path<Uuid>, State(state): State<AppState>) -> Result<Json<SessionView>, ApiError> {
    state.with_session(id, |s| Json(s.view()))
}

/// Raw file bytes from a picker or drop; `Content-Type` is the browser's guess.
pub async fn upload_image(
    Path(id): Path<Uuid>,
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<SessionView>, ApiError> {
    state.with_session(id, |_| ())?;
    if body.len() > state.max_upload_bytes {
        return Err(ApiError::PayloadTooLarge(state.max_upload_bytes));
    }
    let declared = headers.get(header::CONTENT_TYPE).and_then(|v| v.to_str().ok());
    let image = ingest_reader(&body[..], declared).await?;
    state.with_session(id, |s| {
        s.set_source_image(image);
        Json(s.view())
    })
}

pub async fn upload_data_url(
    Path(id): Path<Uuid>,
    State(state): State<AppState>,
    Json(body): Json<DataUrlUpload>,
) -> Result<Json<SessionView>, ApiError> {
    state.with_session(id, |_| ())?;
    let image = ingest_data_url(&body.data_url)?;
    state.with_session(id, |s| {
        s.set_source_image(image);
        Json(s.view())
    })
}

pub async fn clear_session(Path(id): Path<Uuid>, State(state): State<AppState>) -> Result<Json<SessionView>, ApiError> {
    state.with_session(id, |s| {
        s.clear();
        Json(s.view())
    })
}

pub async fn dismiss(Path(id): Path<Uuid>, State(state): State<AppState>) -> Result<Json<SessionView>, ApiError> {
    state.with_session(id, |s| s.dismiss().map(|_| Json(s.view())))?.map_err(ApiError::from)
}

/// Runs one generate/edit call. Model failures land in the session as the
/// error state and are returned with 200 like any other state change.
///
/// The call runs in its own task so the session is resolved even when the
/// client disconnects and this handler's future is dropped.
pub async fn generate(
    Path(id): Path<Uuid>,
    State(state): State<AppState>,
    Json(body): Json<GenerateBody>,
) -> Result<Json<SessionView>, ApiError> {
    let (request, submission) = state.with_session(id, |s| {
        let request = GenerationRequest::new(&body.prompt, s.source_image().cloned())?;
        let submission = s.begin()?;
        Ok::<_, ApiError>((request, submission))
    })??;

    tracing::info!("🚀 Session {} submission {} ({})", id, submission, if request.is_edit() { "edit" } else { "generate" });

    // Lock released while the model call is in flight
    let task_state = state.clone();
    let task = tokio::spawn(async move {
        let result = task_state.gemini.generate(&request).await;
        task_state.with_session(id, |s| {
            s.resolve(submission, result);
            Json(s.view())
        })
    });

    task.await.map_err(|e| ApiError::Task(e.to_string()))?
}

pub async fn download(Path(id): Path<Uuid>, State(state): State<AppState>) -> Result<Response, ApiError> {
    let image = state
        .with_session(id, |s| s.result().cloned())?
        .ok_or(SessionError::NoResult)?;
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(&image.payload)
        .map_err(|e| ApiError::CorruptPayload(e.to_string()))?;

    let disposition = format!("attachment; filename=\"{}\"", image.download_name());
    Ok((
        StatusCode::OK,
        [(header::CONTENT_TYPE, image.mime_type), (header::CONTENT_DISPOSITION, disposition)],
        bytes,
    )
        .into_response())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app;
    use crate::error::GenerationError;
    use crate::gemini::{ContentTransport, GenerateContentRequest, GenerateContentResponse};
    use async_trait::async_trait;
    use axum::{body::Body, http::Request, Router};
    use pretty_assertions::assert_eq;
    use serde_json::{json, Value};
    use std::time::Duration;
    use tower::ServiceExt;

    struct Canned(Value);

    /// Answers like `Canned`, after a delay.
    struct Slow(Value, Duration);

    #[async_trait]
    impl ContentTransport for Slow {
        async fn generate_content(
            &self,
            _model: &str,
            _body: &GenerateContentRequest,
        ) -> Result<GenerateContentResponse, GenerationError> {
            tokio::time::sleep(self.1).await;
            serde_json::from_value(self.0.clone()).map_err(|e| GenerationError::transport(e.to_string()))
        }
    }

    #[async_trait]
    impl ContentTransport for Canned {
        async fn generate_content(
            &self,
            _model: &str,
            _body: &GenerateContentRequest,
        ) -> Result<GenerateContentResponse, GenerationError> {
            serde_json::from_value(self.0.clone()).map_err(|e| GenerationError::transport(e.to_string()))
        }
    }

    fn router(response: Value) -> Router {
        let gemini = GeminiClient::with_transport(Arc::new(Canned(response)), "test-model", Duration::from_secs(5));
        app(AppState::new(gemini, 1024 * 1024))
    }

    fn image_response() -> Value {
        json!({ "candidates": [{ "content": { "parts": [
            { "inlineData": { "mimeType": "image/png", "data": "iVBORw0KGgo=" } }
        ] } }] })
    }

    async fn call(app: &Router, req: Request<Body>) -> (StatusCode, Vec<u8>, HeaderMap) {
        let res = app.clone().oneshot(req).await.unwrap();
        let status = res.status();
        let headers = res.headers().clone();
        let body = axum::body::to_bytes(res.into_body(), usize::MAX).await.unwrap();
        (status, body.to_vec(), headers)
    }

    fn post_json(uri: &str, body: Value) -> Request<Body> {
        Request::post(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn new_session(app: &Router) -> String {
        let (status, body, _) = call(app, Request::post("/api/sessions").body(Body::empty()).unwrap()).await;
        assert_eq!(status, StatusCode::CREATED);
        let view: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(view["status"], "idle");
        view["id"].as_str().unwrap().to_string()
    }

    #[tokio::test]
    async fn generate_then_download() {
        let app = router(image_response());
        let id = new_session(&app).await;

        let (status, body, _) =
            call(&app, post_json(&format!("/api/sessions/{id}/generate"), json!({ "prompt": "a cat wearing sunglasses" }))).await;
        assert_eq!(status, StatusCode::OK);
        let view: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(view["status"], "success");
        assert_eq!(view["result"]["imageUrl"], "data:image/png;base64,iVBORw0KGgo=");
        assert!(view.get("error").is_none());

        let (status, body, headers) =
            call(&app, Request::get(format!("/api/sessions/{id}/download")).body(Body::empty()).unwrap()).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, b"\x89PNG\r\n\x1a\n");
        assert_eq!(headers[header::CONTENT_TYPE], "image/png");
        let disposition = headers[header::CONTENT_DISPOSITION].to_str().unwrap();
        assert!(disposition.starts_with("attachment; filename=\"banana-edit-"), "{disposition}");
        assert!(disposition.ends_with(".png\""));
    }

    #[tokio::test]
    async fn model_failure_becomes_error_state_then_dismisses() {
        let app = router(json!({ "candidates": [{ "content": { "parts": [] } }] }));
        let id = new_session(&app).await;

        let (status, body, _) = call(&app, post_json(&format!("/api/sessions/{id}/generate"), json!({ "prompt": "x" }))).await;
        assert_eq!(status, StatusCode::OK);
        let view: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(view["status"], "error");
        assert_eq!(view["error"], "No content generated");

        let (status, body, _) = call(&app, Request::post(format!("/api/sessions/{id}/dismiss")).body(Body::empty()).unwrap()).await;
        assert_eq!(status, StatusCode::OK);
        let view: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(view["status"], "idle");

        let (status, _, _) = call(&app, Request::get(format!("/api/sessions/{id}/download")).body(Body::empty()).unwrap()).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn blank_prompt_is_rejected_without_state_change() {
        let app = router(image_response());
        let id = new_session(&app).await;

        let (status, body, _) = call(&app, post_json(&format!("/api/sessions/{id}/generate"), json!({ "prompt": "   " }))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        let err: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(err["error"], "Please enter a prompt describing what you want to generate or edit.");

        let (_, body, _) = call(&app, Request::get(format!("/api/sessions/{id}")).body(Body::empty()).unwrap()).await;
        let view: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(view["status"], "idle");
    }

    #[tokio::test]
    async fn upload_rejects_garbage_and_accepts_data_url() {
        let app = router(image_response());
        let id = new_session(&app).await;

        let garbage = Request::put(format!("/api/sessions/{id}/image"))
            .header(header::CONTENT_TYPE, "image/png")
            .body(Body::from("definitely not a png"))
            .unwrap();
        let (status, body, _) = call(&app, garbage).await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        let err: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(err["error"], "Failed to parse file data");

        let mut png = Vec::new();
        image::DynamicImage::new_rgb8(2, 2)
            .write_to(&mut std::io::Cursor::new(&mut png), image::ImageFormat::Png)
            .unwrap();
        let data_url = format!("data:image/png;base64,{}", base64::engine::general_purpose::STANDARD.encode(&png));
        let (status, body, _) =
            call(&app, post_json(&format!("/api/sessions/{id}/image"), json!({ "dataUrl": data_url }))).await;
        assert_eq!(status, StatusCode::OK);
        let view: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(view["sourceImage"]["previewUrl"], data_url.as_str());

        let (status, body, _) =
            call(&app, Request::delete(format!("/api/sessions/{id}/image")).body(Body::empty()).unwrap()).await;
        assert_eq!(status, StatusCode::OK);
        let view: Value = serde_json::from_slice(&body).unwrap();
        assert!(view.get("sourceImage").is_none());
    }

    #[tokio::test]
    async fn raw_upload_is_used_for_edit() {
        let app = router(image_response());
        let id = new_session(&app).await;

        let mut jpeg = Vec::new();
        image::DynamicImage::new_rgb8(3, 3)
            .write_to(&mut std::io::Cursor::new(&mut jpeg), image::ImageFormat::Jpeg)
            .unwrap();
        let upload = Request::put(format!("/api/sessions/{id}/image"))
            .header(header::CONTENT_TYPE, "image/jpeg")
            .body(Body::from(jpeg))
            .unwrap();
        let (status, body, _) = call(&app, upload).await;
        assert_eq!(status, StatusCode::OK);
        let view: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(view["sourceImage"]["mimeType"], "image/jpeg");
    }

    #[tokio::test]
    async fn unknown_session_is_404() {
        let app = router(image_response());
        let uri = format!("/api/sessions/{}", Uuid::new_v4());
        let (status, _, _) = call(&app, Request::get(uri).body(Body::empty()).unwrap()).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn busy_session_rejects_second_generate() {
        let gemini = GeminiClient::with_transport(Arc::new(Canned(image_response())), "m", Duration::from_secs(5));
        let state = AppState::new(gemini, 1024);
        let mut session = Session::new();
        session.begin().unwrap();
        let id = session.id;
        state.sessions.write().insert(id, session);
        let app = app(state);

        let (status, _, _) = call(&app, post_json(&format!("/api/sessions/{id}/generate"), json!({ "prompt": "x" }))).await;
        assert_eq!(status, StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn index_and_meta_are_served() {
        let app = router(image_response());
        let (status, body, _) = call(&app, Request::get("/").body(Body::empty()).unwrap()).await;
        assert_eq!(status, StatusCode::OK);
        assert!(String::from_utf8(body).unwrap().contains("Banana Studio"));

        let (status, body, _) = call(&app, Request::get("/api/meta").body(Body::empty()).unwrap()).await;
        assert_eq!(status, StatusCode::OK);
        let meta: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(meta["model"], "test-model");
        assert_eq!(meta["demoMode"], false);
        assert_eq!(meta["suggestedEdits"].as_array().unwrap().len(), SUGGESTED_EDITS.len());
    }

    #[tokio::test]
    async fn disconnect_mid_generate_still_resolves_session() {
        let gemini = GeminiClient::with_transport(
            Arc::new(Slow(image_response(), Duration::from_millis(150))),
            "m",
            Duration::from_secs(5),
        );
        let app = app(AppState::new(gemini, 1024 * 1024));
        let id = new_session(&app).await;

        // client goes away before the model answers
        let req = post_json(&format!("/api/sessions/{id}/generate"), json!({ "prompt": "x" }));
        let dropped = tokio::time::timeout(Duration::from_millis(20), app.clone().oneshot(req)).await;
        assert!(dropped.is_err());

        tokio::time::sleep(Duration::from_millis(400)).await;
        let (_, body, _) = call(&app, Request::get(format!("/api/sessions/{id}")).body(Body::empty()).unwrap()).await;
        let view: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(view["status"], "success");

        let (status, _, _) = call(&app, Request::post(format!("/api/sessions/{id}/dismiss")).body(Body::empty()).unwrap()).await;
        assert_eq!(status, StatusCode::OK);
        let (status, _, _) = call(&app, post_json(&format!("/api/sessions/{id}/generate"), json!({ "prompt": "again" }))).await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn delete_releases_session() {
        let app = router(image_response());
        let id = new_session(&app).await;

        let (status, _, _) = call(&app, Request::delete(format!("/api/sessions/{id}")).body(Body::empty()).unwrap()).await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        let (status, _, _) = call(&app, Request::get(format!("/api/sessions/{id}")).body(Body::empty()).unwrap()).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        let (status, _, _) = call(&app, Request::delete(format!("/api/sessions/{id}")).body(Body::empty()).unwrap()).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn idle_sessions_are_evicted_but_in_flight_ones_kept() {
        let gemini = GeminiClient::with_transport(Arc::new(Canned(image_response())), "m", Duration::from_secs(5));
        let state = AppState::new(gemini, 1024);
        for _ in 0..50 {
            let s = Session::new();
            state.sessions.write().insert(s.id, s);
        }
        let mut busy = Session::new();
        busy.begin().unwrap();
        let busy_id = busy.id;
        state.sessions.write().insert(busy_id, busy);

        assert_eq!(state.evict_idle(Duration::from_secs(3600)), 0);
        assert_eq!(state.evict_idle(Duration::ZERO), 50);
        let remaining: Vec<Uuid> = state.sessions.read().keys().copied().collect();
        assert_eq!(remaining, vec![busy_id]);
    }

    #[tokio::test]
    async fn raw_upload_over_limit_is_refused() {
        let gemini = GeminiClient::with_transport(Arc::new(Canned(image_response())), "m", Duration::from_secs(5));
        let app = app(AppState::new(gemini, 64));
        let id = new_session(&app).await;

        let upload = Request::put(format!("/api/sessions/{id}/image"))
            .header(header::CONTENT_TYPE, "image/png")
            .body(Body::from(vec![0u8; 100]))
            .unwrap();
        let (status, body, _) = call(&app, upload).await;
        assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
        let err: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(err["error"], "Image is too large (limit is 64 bytes)");
    }
}
