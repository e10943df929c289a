use std::sync::Arc;

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use thiserror::Error;

use crate::intake::ReferenceImage;

/// Unique identifier for a submitted generation task.
pub type TaskId = u64;

/// Message used whenever a failure carries no usable description.
pub const UNKNOWN_ERROR_MESSAGE: &str = "An unknown error occurred.";

/// Output frame shape requested from the provider.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Display, EnumString, Serialize, Deserialize)]
pub enum AspectRatio {
    #[default]
    #[strum(serialize = "16:9")]
    #[serde(rename = "16:9")]
    Landscape,
    #[strum(serialize = "9:16")]
    #[serde(rename = "9:16")]
    Portrait,
}

/// Output resolution requested from the provider.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Display, EnumString, Serialize, Deserialize)]
pub enum Resolution {
    #[strum(serialize = "720p")]
    #[serde(rename = "720p")]
    Hd,
    #[default]
    #[strum(serialize = "1080p")]
    #[serde(rename = "1080p")]
    FullHd,
}

/// Reasons a request is refused before it ever reaches the orchestrator's driver.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("Prompt cannot be empty.")]
    EmptyPrompt,

    #[error("API Key is required. Please enter your Google AI API key.")]
    MissingCredential,

    #[error("unsupported reference image type: {media_type}")]
    UnsupportedImage { media_type: String },

    #[error("reference image is {size} bytes; the limit is {limit} bytes")]
    ImageTooLarge { size: usize, limit: usize },

    #[error("reference image could not be read: {message}")]
    UnreadableImage { message: String },
}

/// Immutable description of one generation submission.
///
/// Built once from the caller's current input and handed to
/// [`Orchestrator::submit`]; the orchestrator shares it behind an `Arc` and
/// never mutates it.
///
/// [`Orchestrator::submit`]: crate::runtime::orchestrator::Orchestrator::submit
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskRequest {
    prompt: String,
    reference_image: Option<ReferenceImage>,
    aspect_ratio: AspectRatio,
    resolution: Resolution,
    sound_enabled: bool,
    credential: String,
}

impl TaskRequest {
    pub fn new(prompt: impl Into<String>, credential: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            reference_image: None,
            aspect_ratio: AspectRatio::default(),
            resolution: Resolution::default(),
            sound_enabled: true,
            credential: credential.into(),
        }
    }

    pub fn with_reference_image(mut self, image: ReferenceImage) -> Self {
        self.reference_image = Some(image);
        self
    }

    pub fn with_aspect_ratio(mut self, aspect_ratio: AspectRatio) -> Self {
        self.aspect_ratio = aspect_ratio;
        self
    }

    pub fn with_resolution(mut self, resolution: Resolution) -> Self {
        self.resolution = resolution;
        self
    }

    /// Sound is accepted but not sent to the current provider integration.
    pub fn with_sound(mut self, enabled: bool) -> Self {
        self.sound_enabled = enabled;
        self
    }

    pub fn prompt(&self) -> &str {
        &self.prompt
    }

    pub fn reference_image(&self) -> Option<&ReferenceImage> {
        self.reference_image.as_ref()
    }

    pub fn aspect_ratio(&self) -> AspectRatio {
        self.aspect_ratio
    }

    pub fn resolution(&self) -> Resolution {
        self.resolution
    }

    pub fn sound_enabled(&self) -> bool {
        self.sound_enabled
    }

    pub fn credential(&self) -> &str {
        &self.credential
    }

    /// Check the submission preconditions.
    ///
    /// The prompt is checked first, so a request missing both reports
    /// [`ValidationError::EmptyPrompt`].
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.prompt.trim().is_empty() {
            return Err(ValidationError::EmptyPrompt);
        }
        if self.credential.trim().is_empty() {
            return Err(ValidationError::MissingCredential);
        }
        Ok(())
    }
}

/// Advisory classification of a credential string, shown next to key input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CredentialStatus {
    #[strum(serialize = "required")]
    Required,
    #[strum(serialize = "check")]
    Check,
    #[strum(serialize = "valid")]
    Valid,
}

impl CredentialStatus {
    /// Keys longer than this many characters are considered plausible.
    pub const PLAUSIBLE_LENGTH: usize = 20;

    pub fn classify(credential: &str) -> Self {
        let len = credential.chars().count();
        if len == 0 {
            CredentialStatus::Required
        } else if len > Self::PLAUSIBLE_LENGTH {
            CredentialStatus::Valid
        } else {
            CredentialStatus::Check
        }
    }
}

/// Category of a failed outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// The provider call failed (network, auth, malformed response, generation).
    #[strum(serialize = "provider")]
    Provider,
    /// The configured deadline elapsed first.
    #[strum(serialize = "timeout")]
    Timeout,
    /// Anything not recognised as the above, e.g. a panicking provider.
    #[strum(serialize = "unknown")]
    Unknown,
}

/// Terminal result of one accepted [`TaskRequest`]; produced exactly once.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TaskOutcome {
    Success { artifact_location: String },
    Failure { kind: FailureKind, message: String },
    Cancelled,
}

impl TaskOutcome {
    /// Build a failure, substituting [`UNKNOWN_ERROR_MESSAGE`] for a blank message.
    pub fn failure(kind: FailureKind, message: impl Into<String>) -> Self {
        let message = message.into();
        let message = if message.trim().is_empty() {
            UNKNOWN_ERROR_MESSAGE.to_owned()
        } else {
            message
        };
        TaskOutcome::Failure { kind, message }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, TaskOutcome::Success { .. })
    }
}

/// Where a progress message originated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum ProgressSource {
    /// Cosmetic status from the [`Narrator`](crate::runtime::narrator::Narrator).
    #[strum(serialize = "narrator")]
    Narrator,
    /// Relayed from the provider's own progress reports.
    #[strum(serialize = "provider")]
    Provider,
}

/// Transient, human-readable status notification emitted before the outcome.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgressEvent {
    pub task_id: TaskId,
    pub source: ProgressSource,
    pub message: Arc<str>,
}

/// Everything a consumer observes for one submission, in order.
///
/// Zero or more `Progress` events are followed by exactly one `Finished`,
/// after which the event channel is closed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskEvent {
    Progress(ProgressEvent),
    Finished { task_id: TaskId, outcome: TaskOutcome },
}

/// Consumer-side lifecycle state for the most recent submission.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum TaskState {
    /// Nothing submitted yet.
    #[default]
    Idle,
    /// The last submission was refused before it started.
    Rejected { message: String },
    /// A generation is pending.
    InFlight {
        task_id: TaskId,
        progress: Option<String>,
    },
    Succeeded {
        task_id: TaskId,
        artifact_location: String,
    },
    Failed {
        task_id: TaskId,
        kind: FailureKind,
        message: String,
    },
    Cancelled { task_id: TaskId },
}

impl TaskState {
    pub fn is_in_flight(&self) -> bool {
        matches!(self, TaskState::InFlight { .. })
    }

    /// Returns `true` once the current submission has an outcome.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskState::Succeeded { .. } | TaskState::Failed { .. } | TaskState::Cancelled { .. }
        )
    }
}
