//! Console bridge -- leveled message fan-in with a swappable sink.
//!
//! Any thread or task can call [`ConsoleBridge::write`] without locking: the
//! message is handed to a dedicated writer task over an unbounded channel,
//! so callers never block on a slow sink. Sink swaps travel over the same
//! channel, which guarantees every message is handled by exactly one sink
//! (old or new, never both, never neither).

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};

use crate::types::LogLevel;

/// Destination for console traffic.
///
/// Implementations are owned by the bridge's writer task, so `emit` takes
/// `&mut self` and needs no internal locking.
pub trait ConsoleSink: Send {
    fn emit(&mut self, level: LogLevel, text: &str);

    /// Flush buffered output. Default is a no-op.
    fn flush(&mut self) {}
}

enum ConsoleMsg {
    Emit { level: LogLevel, text: String },
    SetSink(Box<dyn ConsoleSink>),
    Restore,
    Flush(oneshot::Sender<()>),
}

/// Thread-safe handle to the console writer task.
///
/// Cheap to clone; all clones feed the same writer.
#[derive(Clone)]
pub struct ConsoleBridge {
    tx: mpsc::UnboundedSender<ConsoleMsg>,
}

impl ConsoleBridge {
    /// Spawn the writer task with [`TracingSink`] as the initial sink.
    ///
    /// Must be called from within a tokio runtime.
    pub fn new() -> Self {
        Self::with_sink(Box::new(TracingSink))
    }

    /// Spawn the writer task with a caller-provided initial sink.
    pub fn with_sink(sink: Box<dyn ConsoleSink>) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(Self::writer(sink, rx));
        Self { tx }
    }

    /// Writer task: owns the current sink, applies messages in order.
    async fn writer(mut sink: Box<dyn ConsoleSink>, mut rx: mpsc::UnboundedReceiver<ConsoleMsg>) {
        while let Some(msg) = rx.recv().await {
            match msg {
                ConsoleMsg::Emit { level, text } => sink.emit(level, &text),
                ConsoleMsg::SetSink(new_sink) => {
                    sink.flush();
                    sink = new_sink;
                }
                ConsoleMsg::Restore => {
                    sink.flush();
                    sink = Box::new(TracingSink);
                }
                ConsoleMsg::Flush(ack) => {
                    sink.flush();
                    let _ = ack.send(());
                }
            }
        }
        sink.flush();
        tracing::debug!("console writer finished");
    }

    /// Emit a leveled message. Never blocks; safe from any thread or task.
    pub fn write(&self, level: LogLevel, text: impl Into<String>) {
        // Send failure means the writer is gone (shutdown tail); drop silently.
        let _ = self.tx.send(ConsoleMsg::Emit {
            level,
            text: text.into(),
        });
    }

    pub fn debug(&self, text: impl Into<String>) {
        self.write(LogLevel::Debug, text);
    }

    pub fn info(&self, text: impl Into<String>) {
        self.write(LogLevel::Info, text);
    }

    pub fn warn(&self, text: impl Into<String>) {
        self.write(LogLevel::Warning, text);
    }

    pub fn error(&self, text: impl Into<String>) {
        self.write(LogLevel::Error, text);
    }

    /// Swap the destination sink. Messages already queued ahead of the swap
    /// go to the old sink; everything after goes to the new one.
    pub fn set_sink(&self, sink: Box<dyn ConsoleSink>) {
        let _ = self.tx.send(ConsoleMsg::SetSink(sink));
    }

    /// Revert to the default tracing-backed sink, so output emitted during
    /// shutdown remains visible after custom sinks are torn down.
    pub fn restore(&self) {
        let _ = self.tx.send(ConsoleMsg::Restore);
    }

    /// Wait (bounded) until all messages queued so far have reached the sink.
    ///
    /// Returns `false` if the writer did not acknowledge within the timeout.
    pub async fn flush(&self, timeout: Duration) -> bool {
        let (ack_tx, ack_rx) = oneshot::channel();
        if self.tx.send(ConsoleMsg::Flush(ack_tx)).is_err() {
            return false;
        }
        tokio::time::timeout(timeout, ack_rx).await.is_ok()
    }
}

impl Default for ConsoleBridge {
    fn default() -> Self {
        Self::new()
    }
}

// ─────────────────────────────────────────────────────────────────
// Sinks
// ─────────────────────────────────────────────────────────────────

/// Default sink: forwards console traffic to the tracing subscriber.
pub struct TracingSink;

impl ConsoleSink for TracingSink {
    fn emit(&mut self, level: LogLevel, text: &str) {
        match level {
            LogLevel::Debug => tracing::debug!(target: "console", "{}", text),
            LogLevel::Info => tracing::info!(target: "console", "{}", text),
            LogLevel::Warning => tracing::warn!(target: "console", "{}", text),
            LogLevel::Error => tracing::error!(target: "console", "{}", text),
        }
    }
}

/// Retains the last `capacity` leveled lines.
///
/// The sink itself lives in the writer task; the paired [`BufferHandle`]
/// reads the retained lines from outside (UI message buffer, tests).
pub struct BufferSink {
    lines: Arc<Mutex<VecDeque<(LogLevel, String)>>>,
    capacity: usize,
}

/// Reader side of a [`BufferSink`].
#[derive(Clone)]
pub struct BufferHandle {
    lines: Arc<Mutex<VecDeque<(LogLevel, String)>>>,
}

impl BufferSink {
    pub fn new(capacity: usize) -> (Self, BufferHandle) {
        let lines = Arc::new(Mutex::new(VecDeque::new()));
        (
            Self {
                lines: Arc::clone(&lines),
                capacity,
            },
            BufferHandle { lines },
        )
    }
}

impl ConsoleSink for BufferSink {
    fn emit(&mut self, level: LogLevel, text: &str) {
        // Capacity zero retains nothing rather than growing forever.
        if self.capacity == 0 {
            return;
        }
        let mut lines = self.lines.lock().expect("console buffer poisoned");
        while lines.len() >= self.capacity {
            lines.pop_front();
        }
        lines.push_back((level, text.to_string()));
    }
}

impl BufferHandle {
    /// Snapshot of the retained lines, oldest first.
    pub fn lines(&self) -> Vec<(LogLevel, String)> {
        self.lines
            .lock()
            .expect("console buffer poisoned")
            .iter()
            .cloned()
            .collect()
    }

    /// Remove and return all retained lines.
    pub fn drain(&self) -> Vec<(LogLevel, String)> {
        self.lines
            .lock()
            .expect("console buffer poisoned")
            .drain(..)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.lines.lock().expect("console buffer poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
