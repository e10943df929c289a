//! Seam between the orchestrator and a remote video-generation service.
//!
//! The orchestrator only relies on "resolves to an [`Artifact`] or fails with
//! a [`ProviderError`]"; everything about the wire format stays inside the
//! concrete provider.

pub mod veo;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::debug;

use crate::runtime::types::{FailureKind, TaskRequest};

pub use veo::{VeoConfig, VeoProvider};

/// Reference to a generated video that the consumer can resolve.
///
/// Either a local file path or a content URL, depending on the provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    pub location: String,
}

impl Artifact {
    pub fn new(location: impl Into<String>) -> Self {
        Self {
            location: location.into(),
        }
    }
}

/// Errors a provider call can end with.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// The request never got a response (DNS, connect, timeout, TLS...).
    #[error("network error: {0}")]
    Network(String),

    /// The provider refused the credential.
    #[error("authentication rejected by provider (HTTP {status}): {message}")]
    Unauthorized { status: u16, message: String },

    /// Any other non-success HTTP status.
    #[error("provider returned HTTP {status}: {message}")]
    Status { status: u16, message: String },

    /// The response did not have the shape the provider integration reads.
    #[error("malformed provider response: {message}")]
    MalformedResponse { message: String },

    /// The provider accepted the job but reported that generation failed.
    #[error("video generation failed: {message}")]
    GenerationFailed { message: String },

    /// source and Display delegate to anyhow::Error
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl ProviderError {
    /// How this error is classified in a failed outcome.
    pub fn failure_kind(&self) -> FailureKind {
        match self {
            ProviderError::Other(_) => FailureKind::Unknown,
            _ => FailureKind::Provider,
        }
    }
}

impl From<reqwest::Error> for ProviderError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            ProviderError::MalformedResponse {
                message: e.to_string(),
            }
        } else if let Some(status) = e.status() {
            ProviderError::Status {
                status: status.as_u16(),
                message: e.to_string(),
            }
        } else {
            ProviderError::Network(e.to_string())
        }
    }
}

/// Queue depth for provider-native progress awaiting relay.
pub const PROVIDER_PROGRESS_BUFFER: usize = 16;

/// Relays provider-native progress into the orchestrator's event stream.
///
/// Reporting never blocks: a message that finds the queue full is dropped, and
/// once the task has finished reports go nowhere.
#[derive(Debug, Clone)]
pub struct ProgressReporter {
    tx: mpsc::Sender<String>,
}

impl ProgressReporter {
    pub fn new(tx: mpsc::Sender<String>) -> Self {
        Self { tx }
    }

    /// A reporter whose messages go nowhere.
    pub fn detached() -> Self {
        let (tx, _rx) = mpsc::channel(1);
        Self { tx }
    }

    pub fn report(&self, message: impl Into<String>) {
        if let Err(mpsc::error::TrySendError::Full(dropped)) = self.tx.try_send(message.into()) {
            debug!(message = %dropped, "progress queue full; dropping report");
        }
    }
}

/// A remote video-generation service.
#[async_trait]
pub trait VideoProvider: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &str;

    /// Run one generation to completion.
    ///
    /// Implementations may call `progress.report` any number of times. They
    /// must not retry on their own.
    async fn generate(
        &self,
        request: &TaskRequest,
        progress: ProgressReporter,
    ) -> Result<Artifact, ProviderError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn report_drops_overflow_instead_of_blocking() {
        let (tx, mut rx) = mpsc::channel(4);
        let reporter = ProgressReporter::new(tx);

        for i in 0..100 {
            reporter.report(format!("poll #{i}"));
        }

        let mut kept = Vec::new();
        while let Ok(m) = rx.try_recv() {
            kept.push(m);
        }
        assert_eq!(kept, ["poll #0", "poll #1", "poll #2", "poll #3"]);
    }

    #[test]
    fn report_after_receiver_closed_is_silent() {
        let reporter = ProgressReporter::detached();
        reporter.report("nobody listens");
    }

    #[test]
    fn only_opaque_errors_classify_as_unknown() {
        assert_eq!(
            ProviderError::Other(anyhow::anyhow!("boom")).failure_kind(),
            FailureKind::Unknown
        );
        assert_eq!(
            ProviderError::Network("reset".into()).failure_kind(),
            FailureKind::Provider
        );
    }
}
