use serde::{Serialize, Deserialize};
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::GenerationError;

/// An uploaded image ready to be sent inline to the model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedImage {
    pub mime_type: String,
    /// Base64 (standard alphabet, padded) of the original file bytes.
    pub payload: String,
    /// `data:` URL the page can render directly.
    pub preview_reference: String,
}

impl EncodedImage {
    pub fn new(mime_type: impl Into<String>, payload: impl Into<String>) -> Self {
        let mime_type = mime_type.into();
        let payload = payload.into();
        let preview_reference = data_url(&mime_type, &payload);
        Self { mime_type, payload, preview_reference }
    }
}

pub fn data_url(mime_type: &str, payload: &str) -> String {
    format!("data:{mime_type};base64,{payload}")
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationRequest {
    prompt: String,
    source_image: Option<EncodedImage>,
}

impl GenerationRequest {
    /// Trims the prompt; an empty prompt never reaches the model.
    pub fn new(prompt: &str, source_image: Option<EncodedImage>) -> Result<Self, GenerationError> {
        let prompt = prompt.trim();
        if prompt.is_empty() {
            return Err(GenerationError::EmptyPrompt);
        }
        Ok(Self { prompt: prompt.to_string(), source_image })
    }

    pub fn prompt(&self) -> &str { &self.prompt }

    pub fn source_image(&self) -> Option<&EncodedImage> { self.source_image.as_ref() }

    pub fn is_edit(&self) -> bool { self.source_image.is_some() }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedImage {
    pub mime_type: String,
    pub payload: String,
    pub prompt: String,
    pub created_at: DateTime<Utc>,
}

impl GeneratedImage {
    pub fn image_url(&self) -> String { data_url(&self.mime_type, &self.payload) }

    pub fn file_extension(&self) -> &'static str {
        match self.mime_type.as_str() {
            "image/jpeg" | "image/jpg" => "jpg",
            "image/webp" => "webp",
            "image/gif" => "gif",
            "image/svg+xml" => "svg",
            _ => "png",
        }
    }

    /// `banana-edit-<unix millis>.<ext>`
    pub fn download_name(&self) -> String {
        format!("banana-edit-{}.{}", self.created_at.timestamp_millis(), self.file_extension())
    }
}

pub type GenerationResult = Result<GeneratedImage, GenerationError>;

// --- HTTP payloads ---

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct GenerateBody {
    #[serde(default)]
    pub prompt: String,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct DataUrlUpload {
    pub data_url: String,
}

#[derive(Debug, Serialize, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SourceImageView {
    pub mime_type: String,
    pub preview_url: String,
}

#[derive(Debug, Serialize, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ResultView {
    pub mime_type: String,
    pub image_url: String,
    pub prompt: String,
    pub created_at: DateTime<Utc>,
    pub download_name: String,
}

#[serde_with::skip_serializing_none]
#[derive(Debug, Serialize, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SessionView {
    pub id: Uuid,
    pub created_at: DateTime<Utc>,
    pub status: &'static str,
    pub source_image: Option<SourceImageView>,
    pub result: Option<ResultView>,
    pub error: Option<String>,
}

#[derive(Debug, Serialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct MetaView {
    pub model: String,
    pub demo_mode: bool,
    pub suggested_edits: Vec<&'static str>,
    pub complex_prompt_example: &'static str,
}
