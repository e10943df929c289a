//! Task orchestration core for prompt-driven video generation.
//!
//! A [`TaskRequest`] is validated and handed to an [`Orchestrator`], which
//! calls a [`VideoProvider`] in the background while a [`Narrator`] keeps the
//! consumer informed. Every accepted request ends in exactly one
//! [`TaskOutcome`].

pub mod intake;
pub mod provider;
pub mod runtime;

pub use intake::ReferenceImage;
pub use provider::{Artifact, ProgressReporter, ProviderError, VeoConfig, VeoProvider, VideoProvider};
pub use runtime::narrator::{Narrator, NarratorHandle};
pub use runtime::orchestrator::{Orchestrator, OrchestratorConfig, Submission};
pub use runtime::sink::{OutcomeSink, Session, SessionError};
pub use runtime::types::{
    AspectRatio, CredentialStatus, FailureKind, ProgressEvent, ProgressSource, Resolution,
    TaskEvent, TaskId, TaskOutcome, TaskRequest, TaskState, ValidationError,
};
