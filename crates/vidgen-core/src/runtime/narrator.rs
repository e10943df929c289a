use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::debug;

/// Status lines cycled while a generation is pending.
pub const LOADING_MESSAGES: [&str; 9] = [
    "✨ Warming up the AI creative engines...",
    "🎬 Analyzing your vision and gathering digital inspiration...",
    "🎭 Directing virtual actors and setting up the scene...",
    "🎥 Rendering frame by frame with precision...",
    "⚡ Processing through advanced neural networks...",
    "🎨 Applying cinematic effects and color grading...",
    "🚀 Almost ready! Preparing your masterpiece...",
    "🎉 Finalizing your AI-generated video...",
    "🌟 Adding the finishing touches of magic...",
];

/// Default cadence between narrator messages.
pub const DEFAULT_NARRATOR_INTERVAL: Duration = Duration::from_millis(4000);

const NARRATION_BUFFER: usize = 4;

/// One message produced by an active narrator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Narration {
    /// Zero-based tick count since activation.
    pub tick: u64,
    pub message: Arc<str>,
}

/// Cycles cosmetic status messages on a fixed cadence.
///
/// The narrator knows nothing about real provider progress; it only keeps a
/// waiting consumer from looking frozen. A `Narrator` is a cheap, cloneable
/// description; [`Narrator::activate`] starts the timer.
#[derive(Debug, Clone)]
pub struct Narrator {
    messages: Arc<[Arc<str>]>,
    interval: Duration,
}

impl Narrator {
    /// Returns `None` for an empty message list or a zero interval.
    pub fn new<I, S>(messages: I, interval: Duration) -> Option<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let messages: Arc<[Arc<str>]> = messages
            .into_iter()
            .map(|m| Arc::<str>::from(m.as_ref()))
            .collect();
        if messages.is_empty() || interval.is_zero() {
            return None;
        }
        Some(Self { messages, interval })
    }

    /// The reference message set with a custom cadence.
    ///
    /// A zero interval falls back to [`DEFAULT_NARRATOR_INTERVAL`].
    pub fn with_interval(interval: Duration) -> Self {
        let interval = if interval.is_zero() {
            DEFAULT_NARRATOR_INTERVAL
        } else {
            interval
        };
        Self {
            messages: LOADING_MESSAGES.iter().map(|m| Arc::<str>::from(*m)).collect(),
            interval,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Message shown at tick `k`: `messages[k mod N]`.
    pub fn message_at(&self, tick: u64) -> Arc<str> {
        let idx = (tick % self.messages.len() as u64) as usize;
        Arc::clone(&self.messages[idx])
    }

    /// Start the timer. The first message is available immediately.
    ///
    /// Each activation starts again from message 0. Must be called inside a
    /// Tokio runtime.
    pub fn activate(&self) -> NarratorHandle {
        let (tx, rx) = mpsc::channel::<Narration>(NARRATION_BUFFER);
        let narrator = self.clone();
        let started = Instant::now();

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(narrator.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            let mut tick: u64 = 0;
            loop {
                ticker.tick().await;
                let narration = Narration {
                    tick,
                    message: narrator.message_at(tick),
                };
                if tx.send(narration).await.is_err() {
                    break;
                }
                tick += 1;
            }
            debug!(ticks = tick, "narrator loop exited");
        });

        NarratorHandle {
            narrator: self.clone(),
            started,
            delivered: 0,
            rx,
            task: Some(task),
        }
    }
}

impl Default for Narrator {
    fn default() -> Self {
        Self::with_interval(DEFAULT_NARRATOR_INTERVAL)
    }
}

/// Scoped handle to an active narrator timer.
///
/// The timer task is released exactly once: either by [`NarratorHandle::stop`]
/// or, failing that, when the handle is dropped.
#[derive(Debug)]
pub struct NarratorHandle {
    narrator: Narrator,
    started: Instant,
    /// Ticks handed out so far; the next one is due at `started + delivered * interval`.
    delivered: u64,
    rx: mpsc::Receiver<Narration>,
    task: Option<JoinHandle<()>>,
}

impl NarratorHandle {
    /// Wait for the next message. Returns `None` once stopped.
    pub async fn next(&mut self) -> Option<Narration> {
        while let Some(n) = self.rx.recv().await {
            // Already handed out by `take_due`.
            if n.tick < self.delivered {
                continue;
            }
            self.delivered = n.tick + 1;
            return Some(n);
        }
        None
    }

    /// The next message if its tick has already come due, without waiting.
    ///
    /// Covers a tick that falls on the same instant as the caller's wake-up
    /// but has not reached the channel yet.
    pub fn take_due(&mut self) -> Option<Narration> {
        while let Ok(n) = self.rx.try_recv() {
            if n.tick >= self.delivered {
                self.delivered = n.tick + 1;
                return Some(n);
            }
        }
        if self.task.is_none() {
            return None;
        }

        let ticks = u32::try_from(self.delivered).unwrap_or(u32::MAX);
        let due_at = self.started + self.narrator.interval.saturating_mul(ticks);
        if Instant::now() < due_at {
            return None;
        }

        let tick = self.delivered;
        self.delivered += 1;
        Some(Narration {
            tick,
            message: self.narrator.message_at(tick),
        })
    }

    pub fn is_active(&self) -> bool {
        self.task.as_ref().is_some_and(|t| !t.is_finished())
    }

    /// Stop the timer and wait until its task has fully exited.
    ///
    /// No message is produced after this returns. Messages already buffered
    /// are discarded.
    pub async fn stop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
            // JoinError here is the expected cancellation.
            let _ = task.await;
        }
        self.rx.close();
        while self.rx.try_recv().is_ok() {}
    }
}

impl Drop for NarratorHandle {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}
