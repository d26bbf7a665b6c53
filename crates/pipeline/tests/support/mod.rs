//! Recording sinks shared by the integration tests

#![allow(dead_code)]

use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::Semaphore;
use tracing::field::{Field, Visit};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::layer::{Context, Layer, SubscriberExt};

use shortener_pipeline::{AuditEvent, AuditSink, DeleteSink, SinkError, Task};

/// Records every batch it is asked to apply
#[derive(Default)]
pub struct RecordingDeleteSink {
    batches: Mutex<Vec<Vec<Task>>>,
    attempts: AtomicUsize,
    fail_first: AtomicUsize,
    delay: Option<Duration>,
}

impl RecordingDeleteSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every call sleeps this long before recording
    pub fn with_delay(delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Self::default()
        }
    }

    /// The first `n` calls fail
    pub fn failing_first(n: usize) -> Self {
        let sink = Self::default();
        sink.fail_first.store(n, Ordering::SeqCst);
        sink
    }

    pub fn batches(&self) -> Vec<Vec<Task>> {
        self.batches.lock().clone()
    }

    pub fn batch_sizes(&self) -> Vec<usize> {
        self.batches.lock().iter().map(Vec::len).collect()
    }

    pub fn total_tasks(&self) -> usize {
        self.batches.lock().iter().map(Vec::len).sum()
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DeleteSink for RecordingDeleteSink {
    async fn apply(&self, batch: Vec<Task>) -> Result<(), SinkError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let should_fail = self
            .fail_first
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if should_fail {
            return Err(SinkError::Other(anyhow::anyhow!("store unavailable")));
        }

        self.batches.lock().push(batch);
        Ok(())
    }
}

/// Records audit events; sends can be held back behind a gate
pub struct RecordingAuditSink {
    events: Mutex<Vec<AuditEvent>>,
    attempts: AtomicUsize,
    closed: AtomicUsize,
    gate: Option<Semaphore>,
    delay: Option<Duration>,
}

impl RecordingAuditSink {
    pub fn new() -> Self {
        Self {
            events: Mutex::new(Vec::new()),
            attempts: AtomicUsize::new(0),
            closed: AtomicUsize::new(0),
            gate: None,
            delay: None,
        }
    }

    /// Sends block until [`RecordingAuditSink::open_gate`] is called
    pub fn gated() -> Self {
        Self {
            gate: Some(Semaphore::new(0)),
            ..Self::new()
        }
    }

    /// Every send sleeps this long before recording
    pub fn with_delay(delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Self::new()
        }
    }

    pub fn open_gate(&self) {
        if let Some(gate) = &self.gate {
            gate.add_permits(Semaphore::MAX_PERMITS / 2);
        }
    }

    pub fn events(&self) -> Vec<AuditEvent> {
        self.events.lock().clone()
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    pub fn closed(&self) -> usize {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AuditSink for RecordingAuditSink {
    async fn send(&self, event: &AuditEvent) -> Result<(), SinkError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);

        if let Some(gate) = &self.gate {
            let _permit = gate
                .acquire()
                .await
                .map_err(|e| SinkError::Other(e.into()))?;
        }
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        self.events.lock().push(event.clone());
        Ok(())
    }

    async fn close(&self) -> Result<(), SinkError> {
        self.closed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// A deletion request with ids `r0..r{count}`
pub fn request(owner: &str, count: usize) -> shortener_pipeline::DeletionRequest {
    shortener_pipeline::DeletionRequest::new(owner, (0..count).map(|n| format!("r{n}")).collect())
}

/// Collects the messages of WARN and ERROR events
///
/// Installed as the thread's default subscriber, which covers every task on
/// a current-thread test runtime.
#[derive(Clone, Default)]
pub struct LogCapture {
    messages: Arc<Mutex<Vec<(Level, String)>>>,
}

impl LogCapture {
    pub fn install(&self) -> tracing::subscriber::DefaultGuard {
        tracing::subscriber::set_default(tracing_subscriber::registry().with(self.clone()))
    }

    /// Number of WARN events whose message contains `needle`
    pub fn warnings_containing(&self, needle: &str) -> usize {
        self.messages
            .lock()
            .iter()
            .filter(|(level, message)| *level == Level::WARN && message.contains(needle))
            .count()
    }

    /// Number of ERROR events whose message contains `needle`
    pub fn errors_containing(&self, needle: &str) -> usize {
        self.messages
            .lock()
            .iter()
            .filter(|(level, message)| *level == Level::ERROR && message.contains(needle))
            .count()
    }
}

impl<S: Subscriber> Layer<S> for LogCapture {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let level = *event.metadata().level();
        if level > Level::WARN {
            return;
        }

        let mut visitor = MessageVisitor::default();
        event.record(&mut visitor);
        self.messages.lock().push((level, visitor.message));
    }
}

#[derive(Default)]
struct MessageVisitor {
    message: String,
}

impl Visit for MessageVisitor {
    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        if field.name() == "message" {
            self.message = format!("{value:?}");
        }
    }
}
