use thiserror::Error;
use tokio::sync::watch;
use tracing::debug;

use crate::runtime::orchestrator::{Orchestrator, Submission};
use crate::runtime::types::{
    ProgressEvent, TaskEvent, TaskId, TaskOutcome, TaskRequest, TaskState, ValidationError,
};

/// Receives the events of one submission, in order.
pub trait OutcomeSink {
    fn on_progress(&mut self, event: &ProgressEvent);

    /// Called exactly once per driven submission.
    fn on_outcome(&mut self, task_id: TaskId, outcome: &TaskOutcome);
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SessionError {
    #[error("a generation is already in progress (task {task_id})")]
    Busy { task_id: TaskId },

    #[error(transparent)]
    Rejected(#[from] ValidationError),
}

/// Single-flight consumer that folds task events into a [`TaskState`].
///
/// Only the most recent submission is tracked: events from any other task and
/// anything after the terminal state are ignored.
#[derive(Debug, Default)]
pub struct Session {
    state: TaskState,
}

impl Session {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> &TaskState {
        &self.state
    }

    /// Submit through `orchestrator` unless a task is already in flight.
    ///
    /// On success the previous outcome (if any) is replaced by
    /// [`TaskState::InFlight`]. A validation failure leaves
    /// [`TaskState::Rejected`] behind.
    pub fn submit(
        &mut self,
        orchestrator: &Orchestrator,
        request: TaskRequest,
        cancel: watch::Receiver<bool>,
    ) -> Result<Submission, SessionError> {
        if let TaskState::InFlight { task_id, .. } = self.state {
            return Err(SessionError::Busy { task_id });
        }

        match orchestrator.submit(request, cancel) {
            Ok(submission) => {
                self.state = TaskState::InFlight {
                    task_id: submission.task_id(),
                    progress: None,
                };
                Ok(submission)
            }
            Err(e) => {
                self.state = TaskState::Rejected {
                    message: e.to_string(),
                };
                Err(e.into())
            }
        }
    }

    /// Fold one event into the state. Returns whether the state changed.
    pub fn apply(&mut self, event: &TaskEvent) -> bool {
        match event {
            TaskEvent::Progress(p) => self.apply_progress(p),
            TaskEvent::Finished { task_id, outcome } => self.apply_outcome(*task_id, outcome),
        }
    }

    /// Submit, then drive the task to completion, calling `on_change` after
    /// every state change (including the initial `InFlight`).
    pub async fn run<F>(
        &mut self,
        orchestrator: &Orchestrator,
        request: TaskRequest,
        cancel: watch::Receiver<bool>,
        mut on_change: F,
    ) -> Result<TaskOutcome, SessionError>
    where
        F: FnMut(&TaskState),
    {
        let submission = self.submit(orchestrator, request, cancel)?;
        on_change(&self.state);

        let mut observed = Observed {
            session: self,
            on_change,
        };
        Ok(submission.drive(&mut observed).await)
    }

    fn apply_progress(&mut self, event: &ProgressEvent) -> bool {
        match &mut self.state {
            TaskState::InFlight { task_id, progress } if *task_id == event.task_id => {
                *progress = Some(event.message.to_string());
                true
            }
            _ => {
                debug!(task_id = event.task_id, "ignoring stale progress event");
                false
            }
        }
    }

    fn apply_outcome(&mut self, task_id: TaskId, outcome: &TaskOutcome) -> bool {
        match self.state {
            TaskState::InFlight { task_id: current, .. } if current == task_id => {}
            _ => {
                debug!(task_id, "ignoring stale outcome");
                return false;
            }
        }

        self.state = match outcome.clone() {
            TaskOutcome::Success { artifact_location } => TaskState::Succeeded {
                task_id,
                artifact_location,
            },
            TaskOutcome::Failure { kind, message } => TaskState::Failed {
                task_id,
                kind,
                message,
            },
            TaskOutcome::Cancelled => TaskState::Cancelled { task_id },
        };
        true
    }
}

impl OutcomeSink for Session {
    fn on_progress(&mut self, event: &ProgressEvent) {
        self.apply_progress(event);
    }

    fn on_outcome(&mut self, task_id: TaskId, outcome: &TaskOutcome) {
        self.apply_outcome(task_id, outcome);
    }
}

struct Observed<'a, F> {
    session: &'a mut Session,
    on_change: F,
}

impl<F: FnMut(&TaskState)> OutcomeSink for Observed<'_, F> {
    fn on_progress(&mut self, event: &ProgressEvent) {
        if self.session.apply_progress(event) {
            (self.on_change)(&self.session.state);
        }
    }

    fn on_outcome(&mut self, task_id: TaskId, outcome: &TaskOutcome) {
        if self.session.apply_outcome(task_id, outcome) {
            (self.on_change)(&self.session.state);
        }
    }
}
