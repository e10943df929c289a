use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::task::{Context, Poll};
use std::time::Duration;

use futures::Stream;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinError;
use tokio::time::Instant;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, info, warn};

use crate::provider::{
    Artifact, PROVIDER_PROGRESS_BUFFER, ProgressReporter, ProviderError, VideoProvider,
};
use crate::runtime::narrator::{Narration, Narrator, NarratorHandle};
use crate::runtime::sink::OutcomeSink;
use crate::runtime::types::{
    FailureKind, ProgressEvent, ProgressSource, TaskEvent, TaskId, TaskOutcome, TaskRequest,
    UNKNOWN_ERROR_MESSAGE, ValidationError,
};

/// Default capacity of a submission's event channel.
pub const DEFAULT_EVENT_CAPACITY: usize = 32;

/// Tunables for an [`Orchestrator`].
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Bound of each submission's event channel. A slow consumer back-pressures
    /// the driver rather than growing memory.
    pub event_capacity: usize,
    /// Upper bound on one provider call. `None` waits indefinitely.
    pub deadline: Option<Duration>,
    /// Status messages shown while a generation is pending.
    pub narrator: Narrator,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            event_capacity: DEFAULT_EVENT_CAPACITY,
            deadline: None,
            narrator: Narrator::default(),
        }
    }
}

/// Accepts generation requests and drives each one to exactly one outcome.
///
/// Every accepted request gets its own driver task that owns the provider
/// call, the narrator timer and the sending half of the event channel. The
/// orchestrator itself keeps no per-task state; single-flight is the
/// consumer's business (see [`Session`](crate::runtime::sink::Session)).
///
/// # Usage
///
/// ```rust,ignore
/// let orchestrator = Orchestrator::new(Arc::new(provider), OrchestratorConfig::default());
/// let (_cancel_tx, cancel_rx) = watch::channel(false);
/// let outcome = orchestrator.submit(request, cancel_rx)?.outcome().await;
/// ```
#[derive(Clone)]
pub struct Orchestrator {
    provider: Arc<dyn VideoProvider>,
    config: OrchestratorConfig,
    next_id: Arc<AtomicU64>,
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("provider", &self.provider.name())
            .field("config", &self.config)
            .finish()
    }
}

impl Orchestrator {
    pub fn new(provider: Arc<dyn VideoProvider>, config: OrchestratorConfig) -> Self {
        Self {
            provider,
            config,
            next_id: Arc::new(AtomicU64::new(1)),
        }
    }

    /// Validate `request` and, if it passes, start generating.
    ///
    /// Validation happens synchronously: a rejected request never reaches the
    /// provider and consumes no task id. An accepted request is handed to a
    /// freshly spawned driver task and this returns immediately.
    ///
    /// Setting the value behind `cancel` to `true` cancels the task. Dropping
    /// its sender without doing so never cancels.
    ///
    /// Must be called inside a Tokio runtime.
    pub fn submit(
        &self,
        request: TaskRequest,
        cancel: watch::Receiver<bool>,
    ) -> Result<Submission, ValidationError> {
        request.validate()?;

        let task_id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel(self.config.event_capacity.max(1));

        let driver = Driver {
            task_id,
            request: Arc::new(request),
            provider: Arc::clone(&self.provider),
            narrator: self.config.narrator.clone(),
            deadline: self.config.deadline,
            cancel,
            tx,
        };
        tokio::spawn(driver.run());

        Ok(Submission { task_id, rx })
    }
}

// ── Driver ──────────────────────────────────────────────────────────────────

struct Driver {
    task_id: TaskId,
    request: Arc<TaskRequest>,
    provider: Arc<dyn VideoProvider>,
    narrator: Narrator,
    deadline: Option<Duration>,
    cancel: watch::Receiver<bool>,
    tx: mpsc::Sender<TaskEvent>,
}

/// What woke the driver loop.
enum Step {
    Cancelled,
    Completed(Result<Result<Artifact, ProviderError>, JoinError>),
    DeadlineElapsed,
    Provider(Option<String>),
    Narration(Option<Narration>),
    ConsumerGone,
}

/// How the loop ended.
enum Exit {
    Completed(Result<Result<Artifact, ProviderError>, JoinError>),
    Cancelled,
    TimedOut,
    ConsumerGone,
}

impl Driver {
    async fn run(mut self) {
        let task_id = self.task_id;
        info!(task_id, provider = self.provider.name(), "generation task started");

        let (progress_tx, mut progress_rx) = mpsc::channel::<String>(PROVIDER_PROGRESS_BUFFER);
        let reporter = ProgressReporter::new(progress_tx);

        let provider = Arc::clone(&self.provider);
        let request = Arc::clone(&self.request);
        let mut call = tokio::spawn(async move { provider.generate(&request, reporter).await });

        let mut narration = Some(self.narrator.activate());
        let deadline_at = self.deadline.map(|d| Instant::now() + d);
        let mut progress_open = true;

        let exit = loop {
            let step = tokio::select! {
                biased;

                _ = cancelled(&mut self.cancel) => Step::Cancelled,
                joined = &mut call => Step::Completed(joined),
                _ = deadline(deadline_at) => Step::DeadlineElapsed,
                msg = progress_rx.recv(), if progress_open => Step::Provider(msg),
                tick = next_narration(&mut narration) => Step::Narration(tick),
                _ = self.tx.closed() => Step::ConsumerGone,
            };

            match step {
                Step::Cancelled => break Exit::Cancelled,
                Step::Completed(joined) => break Exit::Completed(joined),
                Step::DeadlineElapsed => break Exit::TimedOut,
                Step::ConsumerGone => break Exit::ConsumerGone,
                Step::Provider(Some(message)) => {
                    if !self.progress(ProgressSource::Provider, message.into()).await {
                        break Exit::ConsumerGone;
                    }
                }
                Step::Provider(None) => progress_open = false,
                Step::Narration(Some(tick)) => {
                    debug!(task_id, tick = tick.tick, "narrator tick");
                    if !self.progress(ProgressSource::Narrator, tick.message).await {
                        break Exit::ConsumerGone;
                    }
                }
                Step::Narration(None) => narration = None,
            }
        };

        let outcome = match exit {
            Exit::Completed(joined) => {
                // A tick due on the completion instant still precedes the outcome.
                if let Some(due) = narration.as_mut().and_then(NarratorHandle::take_due) {
                    if !self.progress(ProgressSource::Narrator, due.message).await {
                        stop_narration(narration).await;
                        return;
                    }
                }
                // The provider is done, so the reporter is gone and this drains
                // everything it reported.
                while let Ok(message) = progress_rx.try_recv() {
                    if !self.progress(ProgressSource::Provider, message.into()).await {
                        stop_narration(narration).await;
                        return;
                    }
                }
                self.settle(joined)
            }
            Exit::Cancelled => {
                call.abort();
                info!(task_id, "generation task cancelled");
                TaskOutcome::Cancelled
            }
            Exit::TimedOut => {
                call.abort();
                let secs = self.deadline.map(|d| d.as_secs_f64()).unwrap_or_default();
                warn!(task_id, deadline_secs = secs, "generation task timed out");
                TaskOutcome::failure(
                    FailureKind::Timeout,
                    format!("Video generation timed out after {secs:.0}s."),
                )
            }
            Exit::ConsumerGone => {
                call.abort();
                stop_narration(narration).await;
                debug!(task_id, "consumer dropped submission; abandoning task");
                return;
            }
        };

        stop_narration(narration).await;

        let finished = TaskEvent::Finished { task_id, outcome };
        if self.tx.send(finished).await.is_err() {
            debug!(task_id, "outcome produced after consumer dropped submission");
        }
    }

    /// Forward one progress message. Returns `false` once the consumer is gone.
    async fn progress(&self, source: ProgressSource, message: Arc<str>) -> bool {
        let event = TaskEvent::Progress(ProgressEvent {
            task_id: self.task_id,
            source,
            message,
        });
        self.tx.send(event).await.is_ok()
    }

    fn settle(&self, joined: Result<Result<Artifact, ProviderError>, JoinError>) -> TaskOutcome {
        let task_id = self.task_id;
        match joined {
            Ok(Ok(artifact)) => {
                info!(task_id, artifact = %artifact.location, "generation task succeeded");
                TaskOutcome::Success {
                    artifact_location: artifact.location,
                }
            }
            Ok(Err(e)) => {
                warn!(task_id, error = %e, "generation task failed");
                TaskOutcome::failure(e.failure_kind(), e.to_string())
            }
            Err(e) if e.is_panic() => {
                warn!(task_id, "provider panicked");
                TaskOutcome::failure(FailureKind::Unknown, UNKNOWN_ERROR_MESSAGE)
            }
            Err(e) => {
                warn!(task_id, error = %e, "provider call ended unexpectedly");
                TaskOutcome::failure(FailureKind::Unknown, UNKNOWN_ERROR_MESSAGE)
            }
        }
    }
}

/// Resolves once cancellation is requested; never if the sender goes away first.
async fn cancelled(cancel: &mut watch::Receiver<bool>) {
    if cancel.wait_for(|c| *c).await.is_err() {
        std::future::pending::<()>().await;
    }
}

async fn deadline(at: Option<Instant>) {
    match at {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}

async fn next_narration(handle: &mut Option<NarratorHandle>) -> Option<Narration> {
    match handle {
        Some(h) => h.next().await,
        None => std::future::pending().await,
    }
}

async fn stop_narration(handle: Option<NarratorHandle>) {
    if let Some(mut h) = handle {
        h.stop().await;
    }
}

// ── Submission ──────────────────────────────────────────────────────────────

/// Consumer handle for one accepted request.
///
/// Yields zero or more [`TaskEvent::Progress`] followed by exactly one
/// [`TaskEvent::Finished`]. Dropping it abandons the task.
#[derive(Debug)]
pub struct Submission {
    task_id: TaskId,
    rx: mpsc::Receiver<TaskEvent>,
}

impl Submission {
    pub fn task_id(&self) -> TaskId {
        self.task_id
    }

    /// Next event, or `None` once the channel is closed.
    pub async fn next_event(&mut self) -> Option<TaskEvent> {
        self.rx.recv().await
    }

    /// Skip progress and wait for the outcome.
    pub async fn outcome(mut self) -> TaskOutcome {
        while let Some(event) = self.rx.recv().await {
            if let TaskEvent::Finished { outcome, .. } = event {
                return outcome;
            }
        }
        self.lost()
    }

    /// Feed every event into `sink` and return the outcome.
    pub async fn drive<S>(mut self, sink: &mut S) -> TaskOutcome
    where
        S: OutcomeSink + ?Sized,
    {
        while let Some(event) = self.rx.recv().await {
            match event {
                TaskEvent::Progress(p) => sink.on_progress(&p),
                TaskEvent::Finished { task_id, outcome } => {
                    sink.on_outcome(task_id, &outcome);
                    return outcome;
                }
            }
        }
        let outcome = self.lost();
        sink.on_outcome(self.task_id, &outcome);
        outcome
    }

    pub fn into_stream(self) -> ReceiverStream<TaskEvent> {
        ReceiverStream::new(self.rx)
    }

    fn lost(&self) -> TaskOutcome {
        warn!(task_id = self.task_id, "event channel closed without an outcome");
        TaskOutcome::failure(FailureKind::Unknown, UNKNOWN_ERROR_MESSAGE)
    }
}

impl Stream for Submission {
    type Item = TaskEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<TaskEvent>> {
        self.rx.poll_recv(cx)
    }
}
