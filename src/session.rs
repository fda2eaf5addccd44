use chrono::{DateTime, Utc};
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::SessionError;
use crate::models::{EncodedImage, GeneratedImage, GenerationResult, ResultView, SessionView, SourceImageView};

/// What the result pane shows. Exactly one at a time.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Status {
    #[default]
    Idle,
    Loading { submission: u64 },
    Success(GeneratedImage),
    Error(String),
}

impl Status {
    pub fn label(&self) -> &'static str {
        match self {
            Status::Idle => "idle",
            Status::Loading { .. } => "loading",
            Status::Success(_) => "success",
            Status::Error(_) => "error",
        }
    }
}

/// One browser tab's worth of state: the chosen source image and the current result.
#[derive(Debug, Clone)]
pub struct Session {
    pub id: Uuid,
    pub created_at: DateTime<Utc>,
    last_active: DateTime<Utc>,
    source_image: Option<EncodedImage>,
    status: Status,
    last_submission: u64,
}

impl Session {
    pub fn new() -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            created_at: now,
            last_active: now,
            source_image: None,
            status: Status::Idle,
            last_submission: 0,
        }
    }

    pub fn status(&self) -> &Status { &self.status }

    pub fn touch(&mut self) { self.last_active = Utc::now(); }

    /// Untouched for at least `ttl` and nothing in flight.
    pub fn is_idle_for(&self, ttl: chrono::Duration, now: DateTime<Utc>) -> bool {
        !matches!(self.status, Status::Loading { .. }) && now - self.last_active >= ttl
    }

    pub fn source_image(&self) -> Option<&EncodedImage> { self.source_image.as_ref() }

    /// Replaces any previous selection wholesale.
    pub fn set_source_image(&mut self, image: EncodedImage) {
        self.source_image = Some(image);
    }

    /// Idle/Success/Error → Loading. Returns the submission id to resolve with.
    pub fn begin(&mut self) -> Result<u64, SessionError> {
        if let Status::Loading { .. } = self.status {
            return Err(SessionError::Busy);
        }
        self.last_submission += 1;
        self.status = Status::Loading { submission: self.last_submission };
        Ok(self.last_submission)
    }

    /// Applies a finished call. Returns false when the result is stale
    /// (the session was cleared or moved on since `submission` began).
    pub fn resolve(&mut self, submission: u64, result: GenerationResult) -> bool {
        match self.status {
            Status::Loading { submission: current } if current == submission => {
                self.status = match result {
                    Ok(image) => Status::Success(image),
                    Err(e) => Status::Error(e.to_string()),
                };
                true
            }
            _ => {
                warn!(session = %self.id, submission, "discarding stale generation result");
                false
            }
        }
    }

    /// Success/Error → Idle. The result is released.
    pub fn dismiss(&mut self) -> Result<(), SessionError> {
        match self.status {
            Status::Loading { .. } => Err(SessionError::Busy),
            _ => {
                self.status = Status::Idle;
                Ok(())
            }
        }
    }

    /// Drops source image and result from any state. An in-flight call becomes stale.
    pub fn clear(&mut self) {
        if let Status::Loading { submission } = self.status {
            info!(session = %self.id, submission, "clearing while a generation is in flight");
        }
        self.source_image = None;
        self.status = Status::Idle;
    }

    pub fn result(&self) -> Option<&GeneratedImage> {
        match &self.status {
            Status::Success(image) => Some(image),
            _ => None,
        }
    }

    pub fn view(&self) -> SessionView {
        SessionView {
            id: self.id,
            created_at: self.created_at,
            status: self.status.label(),
            source_image: self.source_image.as_ref().map(|img| SourceImageView {
                mime_type: img.mime_type.clone(),
                preview_url: img.preview_reference.clone(),
            }),
            result: self.result().map(|img| ResultView {
                mime_type: img.mime_type.clone(),
                image_url: img.image_url(),
                prompt: img.prompt.clone(),
                created_at: img.created_at,
                download_name: img.download_name(),
            }),
            error: match &self.status {
                Status::Error(message) => Some(message.clone()),
                _ => None,
            },
        }
    }
}

impl Default for Session {
    fn default() -> Self { Self::new() }
}
