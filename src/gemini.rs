use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use chrono::Utc;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use serde_with::DefaultOnNull;
use tracing::{debug, error, info, warn};

use crate::config::GeminiConfig;
use crate::error::GenerationError;
use crate::models::{GeneratedImage, GenerationRequest, GenerationResult};

pub const DEFAULT_IMAGE_MIME: &str = "image/png";

// Helper function to truncate base64 data in JSON for cleaner logging
fn truncate_base64_in_json(value: &mut serde_json::Value) {
    match value {
        serde_json::Value::Object(map) => {
            for (key, val) in map.iter_mut() {
                if key == "data" {
                    if let serde_json::Value::String(s) = val {
                        if s.len() > 100 && s.is_ascii() {
                            *val = serde_json::Value::String(format!("{}...[truncated {} chars]", &s[..50], s.len() - 50));
                        }
                    }
                } else {
                    truncate_base64_in_json(val);
                }
            }
        }
        serde_json::Value::Array(arr) => {
            for val in arr.iter_mut() {
                truncate_base64_in_json(val);
            }
        }
        _ => {}
    }
}

fn loggable<T: Serialize>(body: &T) -> String {
    match serde_json::to_value(body) {
        Ok(mut value) => {
            truncate_base64_in_json(&mut value);
            value.to_string()
        }
        Err(e) => format!("<unserializable: {e}>"),
    }
}

// --- Wire types ---

/// One unit of a request or response body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Segment {
    InlineImage {
        #[serde(rename = "inlineData")]
        inline_data: InlineData,
    },
    Text { text: String },
    /// Anything else the service sends (function calls, thought signatures...).
    Other(serde_json::Value),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InlineData {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    #[serde(default)]
    pub data: String,
}

impl Segment {
    pub fn image(mime_type: impl Into<String>, data: impl Into<String>) -> Self {
        Segment::InlineImage {
            inline_data: InlineData { mime_type: Some(mime_type.into()), data: data.into() },
        }
    }

    pub fn text(text: impl Into<String>) -> Self {
        Segment::Text { text: text.into() }
    }

    /// `(mime, data)` when the segment actually carries image bytes.
    fn as_image(&self) -> Option<(&str, &str)> {
        match self {
            Segment::InlineImage { inline_data } if !inline_data.data.is_empty() => {
                let mime = inline_data
                    .mime_type
                    .as_deref()
                    .filter(|m| !m.is_empty())
                    .unwrap_or(DEFAULT_IMAGE_MIME);
                Some((mime, inline_data.data.as_str()))
            }
            _ => None,
        }
    }

    fn as_text(&self) -> Option<&str> {
        match self {
            Segment::Text { text } if !text.is_empty() => Some(text),
            _ => None,
        }
    }
}

#[serde_with::serde_as]
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Content {
    #[serde_as(as = "DefaultOnNull")]
    #[serde(default)]
    pub parts: Vec<Segment>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateContentRequest {
    pub contents: Vec<Content>,
    pub generation_config: GenerationConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationConfig {
    pub response_modalities: Vec<&'static str>,
}

impl GenerateContentRequest {
    /// Image segment first (the subject), then the instruction text.
    pub fn from_generation_request(req: &GenerationRequest) -> Self {
        let mut parts = Vec::with_capacity(2);
        if let Some(image) = req.source_image() {
            parts.push(Segment::image(image.mime_type.clone(), image.payload.clone()));
        }
        parts.push(Segment::text(req.prompt()));
        Self {
            contents: vec![Content { parts }],
            generation_config: GenerationConfig { response_modalities: vec!["TEXT", "IMAGE"] },
        }
    }

    pub fn parts(&self) -> &[Segment] {
        self.contents.first().map(|c| c.parts.as_slice()).unwrap_or_default()
    }
}

#[serde_with::serde_as]
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateContentResponse {
    #[serde_as(as = "DefaultOnNull")]
    #[serde(default)]
    pub candidates: Vec<Candidate>,
    #[serde(default)]
    pub prompt_feedback: Option<PromptFeedback>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Candidate {
    #[serde(default)]
    pub content: Option<Content>,
    #[serde(default)]
    pub finish_reason: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PromptFeedback {
    #[serde(default)]
    pub block_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    error: ApiErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ApiErrorDetail {
    #[serde(default)]
    message: String,
}

/// Picks the result out of a model response.
///
/// First inline image wins. Without one, the first text segment is the model
/// explaining itself and becomes a `ModelRefusal`.
pub fn extract_image(response: GenerateContentResponse, prompt: &str) -> GenerationResult {
    if let Some(reason) = response.prompt_feedback.as_ref().and_then(|f| f.block_reason.as_deref()) {
        warn!("⚠️ Prompt blocked by service: {}", reason);
    }

    let candidate = response.candidates.into_iter().next();
    if let Some(reason) = candidate.as_ref().and_then(|c| c.finish_reason.as_deref()) {
        debug!("finish reason: {}", reason);
    }
    let parts = candidate
        .and_then(|c| c.content)
        .map(|c| c.parts)
        .filter(|parts| !parts.is_empty())
        .ok_or(GenerationError::EmptyResponse)?;

    let mut images = parts.iter().filter_map(Segment::as_image);
    if let Some((mime_type, data)) = images.next() {
        let dropped = images.count();
        if dropped > 0 {
            // only one result slot; later images are discarded
            warn!("⚠️ Response carried {} extra image(s), keeping the first", dropped);
        }
        info!("🎯 Found image data with mime type: {}", mime_type);
        return Ok(GeneratedImage {
            mime_type: mime_type.to_string(),
            payload: data.to_string(),
            prompt: prompt.to_string(),
            created_at: Utc::now(),
        });
    }

    if let Some(text) = parts.iter().find_map(Segment::as_text) {
        info!("⚠️ Model returned text instead of an image");
        return Err(GenerationError::ModelRefusal(text.to_string()));
    }

    Err(GenerationError::NoImageData)
}

// --- Transport ---

/// The one network call: `generateContent` for a model.
#[async_trait]
pub trait ContentTransport: Send + Sync {
    async fn generate_content(
        &self,
        model: &str,
        body: &GenerateContentRequest,
    ) -> Result<GenerateContentResponse, GenerationError>;
}

pub struct HttpTransport {
    client: Client,
    api_key: String,
    base_url: String,
}

impl HttpTransport {
    pub fn new(api_key: String, base_url: String) -> Self {
        Self { client: Client::new(), api_key, base_url }
    }
}

fn api_error_message(status: StatusCode, body: &str) -> String {
    match serde_json::from_str::<ApiErrorBody>(body) {
        Ok(parsed) if !parsed.error.message.is_empty() => parsed.error.message,
        _ if body.trim().is_empty() => format!("HTTP {}", status),
        _ => format!("status={} body={}", status, body),
    }
}

#[async_trait]
impl ContentTransport for HttpTransport {
    async fn generate_content(
        &self,
        model: &str,
        body: &GenerateContentRequest,
    ) -> Result<GenerateContentResponse, GenerationError> {
        let url = format!("{}/models/{}:generateContent", self.base_url, model);
        info!("🔗 Making request to: {}", url);
        debug!("📤 Request body: {}", loggable(body));

        let response = self
            .client
            .post(&url)
            .header("x-goog-api-key", &self.api_key)
            .json(body)
            .send()
            .await
            .map_err(|e| GenerationError::transport(e.to_string()))?;

        let status = response.status();
        info!("📥 Response status: {}", status);

        let response_text = response
            .text()
            .await
            .map_err(|e| GenerationError::transport(e.to_string()))?;

        if !status.is_success() {
            error!("❌ API Error response: {}", response_text);
            return Err(GenerationError::transport(api_error_message(status, &response_text)));
        }

        let parsed: GenerateContentResponse = serde_json::from_str(&response_text).map_err(|e| {
            error!("❌ Unparseable response: {}", e);
            GenerationError::transport(format!("malformed response: {}", e))
        })?;
        if let Ok(value) = serde_json::from_str::<serde_json::Value>(&response_text) {
            debug!("📥 Raw Gemini API response: {}", loggable(&value));
        }
        Ok(parsed)
    }
}

/// Offline stand-in used when no API key is configured.
pub struct PlaceholderTransport;

impl PlaceholderTransport {
    fn placeholder_svg(prompt: &str, editing: bool) -> String {
        let colors = ["#F59E0B", "#FBBF24", "#3B82F6", "#10B981", "#8B5CF6"];
        let color = colors[prompt.len() % colors.len()];
        let title = if editing { "🍌 Edited Image" } else { "🍌 Generated Image" };
        let caption: String = prompt.chars().take(48).collect();
        let caption = caption.replace('&', "&amp;").replace('<', "&lt;").replace('>', "&gt;");

        let svg = format!(r#"<svg width="512" height="512" xmlns="http://www.w3.org/2000/svg">
            <defs>
                <linearGradient id="grad" x1="0%" y1="0%" x2="100%" y2="100%">
                    <stop offset="0%" style="stop-color:{color};stop-opacity:1" />
                    <stop offset="100%" style="stop-color:{color};stop-opacity:0.6" />
                </linearGradient>
            </defs>
            <rect width="512" height="512" fill="url(#grad)" />
            <text x="256" y="240" font-family="Arial, sans-serif" font-size="28" font-weight="bold"
                  text-anchor="middle" fill="white">{title}</text>
            <text x="256" y="290" font-family="Arial, sans-serif" font-size="14"
                  text-anchor="middle" fill="white" opacity="0.8">{caption}</text>
        </svg>"#);

        base64::engine::general_purpose::STANDARD.encode(svg.as_bytes())
    }
}

#[async_trait]
impl ContentTransport for PlaceholderTransport {
    async fn generate_content(
        &self,
        _model: &str,
        body: &GenerateContentRequest,
    ) -> Result<GenerateContentResponse, GenerationError> {
        let parts = body.parts();
        let prompt = parts.iter().find_map(Segment::as_text).unwrap_or_default();
        let editing = parts.iter().any(|p| p.as_image().is_some());
        info!("Using demo mode - no real images generated");

        Ok(GenerateContentResponse {
            candidates: vec![Candidate {
                content: Some(Content {
                    parts: vec![
                        Segment::text("Demo mode: configure GEMINI_API_KEY for real images."),
                        Segment::image("image/svg+xml", Self::placeholder_svg(prompt, editing)),
                    ],
                }),
                finish_reason: Some("STOP".into()),
            }],
            prompt_feedback: None,
        })
    }
}

// --- Client ---

pub struct GeminiClient {
    transport: Arc<dyn ContentTransport>,
    model: String,
    timeout: Duration,
    demo: bool,
}

impl GeminiClient {
    pub fn new(config: GeminiConfig) -> Self {
        match config.api_key {
            Some(api_key) => {
                let transport = HttpTransport::new(api_key, config.api_base);
                Self { transport: Arc::new(transport), model: config.model, timeout: config.timeout, demo: false }
            }
            None => {
                warn!("GEMINI_API_KEY is missing; serving placeholder images");
                Self { transport: Arc::new(PlaceholderTransport), model: config.model, timeout: config.timeout, demo: true }
            }
        }
    }

    pub fn with_transport(transport: Arc<dyn ContentTransport>, model: impl Into<String>, timeout: Duration) -> Self {
        Self { transport, model: model.into(), timeout, demo: false }
    }

    pub fn model(&self) -> &str { &self.model }

    pub fn is_demo(&self) -> bool { self.demo }

    /// Issues exactly one model call. Every failure comes back as a `GenerationError`.
    pub async fn generate(&self, request: &GenerationRequest) -> GenerationResult {
        let body = GenerateContentRequest::from_generation_request(request);
        let verb = if request.is_edit() { "Editing" } else { "Generating" };
        let prompt = request.prompt();
        info!("🎯 {} image with prompt: {}", verb, &prompt[..prompt.char_indices().nth(100).map_or(prompt.len(), |(i, _)| i)]);

        let response = match tokio::time::timeout(self.timeout, self.transport.generate_content(&self.model, &body)).await {
            Ok(Ok(response)) => response,
            Ok(Err(e)) => {
                error!("❌ Failed to generate image: {}", e);
                return Err(e);
            }
            Err(_) => {
                error!("❌ Model call exceeded {:?}", self.timeout);
                return Err(GenerationError::Timeout(self.timeout));
            }
        };

        let result = extract_image(response, prompt);
        match &result {
            Ok(image) => info!("✅ Successfully generated {} image ({} chars)", image.mime_type, image.payload.len()),
            Err(e) => error!("❌ Generation produced no image: {}", e),
        }
        result
    }
}
