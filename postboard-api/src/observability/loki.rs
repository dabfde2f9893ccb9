//! Ships log lines to a Loki push endpoint.
//!
//! [`LokiLayer`] copies matching events into a bounded channel without blocking,
//! and [`LokiPusher::run`] drains that channel in batches. Lines are dropped when
//! the channel is full or Loki cannot be reached within [`PUSH_TIMEOUT`].

use serde::Serialize;
use std::{
    collections::BTreeMap,
    fmt::Debug,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};
use time::UtcDateTime;
use tokio::{
    sync::mpsc::{self, Receiver, Sender, error::TryRecvError},
    time::{MissedTickBehavior, error::Elapsed},
};
use tokio_util::sync::CancellationToken;
use tracing::{
    Event, Level, Subscriber,
    field::{Field, Visit},
    warn,
};
use tracing_subscriber::{Layer, layer::Context};
use url::Url;

pub const CHANNEL_CAPACITY: usize = 1024;
pub const PUSH_BATCH_SIZE: usize = 100;
pub const PUSH_INTERVAL: Duration = Duration::from_secs(1);
pub const PUSH_TIMEOUT: Duration = Duration::from_secs(5);
pub const LOGGER_LABEL: &str = "access";

#[derive(Clone, Eq, PartialEq, Debug, Hash)]
pub struct LogLine {
    pub timestamp: UtcDateTime,
    pub severity: Level,
    pub line: String,
}

pub struct LokiLayer {
    target: &'static str,
    sender: Sender<LogLine>,
    dropped: Arc<AtomicUsize>,
}

impl LokiLayer {
    /// A layer forwarding the events of `target`, and the receiving end for a
    /// [`LokiPusher`].
    #[must_use]
    pub fn new(target: &'static str, capacity: usize) -> (Self, LogLines) {
        let (sender, receiver) = mpsc::channel(capacity);
        let dropped = Arc::new(AtomicUsize::new(0));
        let layer = Self {
            target,
            sender,
            dropped: dropped.clone(),
        };

        (layer, LogLines { receiver, dropped })
    }
}

/// Receiving end of a [`LokiLayer`].
#[derive(Debug)]
pub struct LogLines {
    receiver: Receiver<LogLine>,
    dropped: Arc<AtomicUsize>,
}

impl LogLines {
    pub async fn recv(&mut self) -> Option<LogLine> {
        self.receiver.recv().await
    }

    pub fn try_recv(&mut self) -> Result<LogLine, TryRecvError> {
        self.receiver.try_recv()
    }

    pub fn close(&mut self) {
        self.receiver.close();
    }

    /// Number of lines the layer could not enqueue since the last call.
    #[must_use]
    pub fn take_dropped(&self) -> usize {
        self.dropped.swap(0, Ordering::Relaxed)
    }
}

#[derive(Default)]
struct MessageVisitor {
    message: String,
}

impl Visit for MessageVisitor {
    fn record_debug(&mut self, field: &Field, value: &dyn Debug) {
        if field.name() == "message" {
            self.message = format!("{value:?}");
        }
    }

    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            value.clone_into(&mut self.message);
        }
    }
}

impl<S> Layer<S> for LokiLayer
where
    S: Subscriber,
{
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let metadata = event.metadata();
        if metadata.target() != self.target {
            return;
        }

        let mut visitor = MessageVisitor::default();
        event.record(&mut visitor);

        let line = LogLine {
            timestamp: UtcDateTime::now(),
            severity: *metadata.level(),
            line: visitor.message,
        };
        if self.sender.try_send(line).is_err() {
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
    }
}

#[derive(Serialize)]
struct PushRequest<'a> {
    streams: Vec<Stream<'a>>,
}

#[derive(Serialize)]
struct Stream<'a> {
    stream: BTreeMap<&'a str, &'a str>,
    values: Vec<[String; 2]>,
}

#[derive(Clone, Debug)]
pub struct LokiPusher {
    client: reqwest::Client,
    endpoint: Url,
    application: String,
    timeout: Duration,
}

impl LokiPusher {
    #[must_use]
    pub fn new(endpoint: Url, application: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint,
            application,
            timeout: PUSH_TIMEOUT,
        }
    }

    /// Replaces [`PUSH_TIMEOUT`] as the limit for a single push.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// The push request body, one stream per severity.
    pub fn payload(&self, batch: &[LogLine]) -> serde_json::Result<serde_json::Value> {
        let mut by_severity: BTreeMap<&str, Vec<[String; 2]>> = BTreeMap::new();
        for line in batch {
            by_severity
                .entry(severity_label(line.severity))
                .or_default()
                .push([
                    line.timestamp.unix_timestamp_nanos().to_string(),
                    line.line.clone(),
                ]);
        }

        let streams = by_severity
            .into_iter()
            .map(|(severity, values)| Stream {
                stream: BTreeMap::from([
                    ("application", self.application.as_str()),
                    ("logger", LOGGER_LABEL),
                    ("severity", severity),
                ]),
                values,
            })
            .collect();

        serde_json::to_value(PushRequest { streams })
    }

    pub async fn push(&self, batch: &[LogLine]) -> Result<(), PushError> {
        let payload = self.payload(batch)?;

        let request = self.client.post(self.endpoint.clone()).json(&payload).send();
        tokio::time::timeout(self.timeout, request)
            .await??
            .error_for_status()?;

        Ok(())
    }

    /// Pushes batches until `shutdown` fires, then flushes what is left.
    pub async fn run(self, mut lines: LogLines, shutdown: CancellationToken) {
        let mut batch = Vec::with_capacity(PUSH_BATCH_SIZE);
        let mut interval = tokio::time::interval(PUSH_INTERVAL);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                () = shutdown.cancelled() => break,
                line = lines.recv() => match line {
                    Some(line) => {
                        batch.push(line);
                        if batch.len() >= PUSH_BATCH_SIZE {
                            self.flush(&mut batch).await;
                        }
                    }
                    None => break,
                },
                _ = interval.tick() => {
                    report_dropped(&lines);
                    self.flush(&mut batch).await;
                }
            }
        }

        lines.close();
        while let Ok(line) = lines.try_recv() {
            batch.push(line);
        }
        report_dropped(&lines);
        self.flush(&mut batch).await;
    }

    async fn flush(&self, batch: &mut Vec<LogLine>) {
        if batch.is_empty() {
            return;
        }

        if let Err(err) = self.push(batch).await {
            warn!(error = %err, lines = batch.len(), "Dropping log lines");
        }
        batch.clear();
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PushError {
    #[error("Push request could not be serialized: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("Push request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("Push request timed out")]
    Timeout(#[from] Elapsed),
}

fn report_dropped(lines: &LogLines) {
    let dropped = lines.take_dropped();
    if dropped > 0 {
        warn!(lines = dropped, "Log channel full, dropped log lines");
    }
}

fn severity_label(level: Level) -> &'static str {
    match level {
        Level::ERROR => "error",
        Level::WARN => "warning",
        Level::INFO => "info",
        Level::DEBUG => "debug",
        _ => "trace",
    }
}
