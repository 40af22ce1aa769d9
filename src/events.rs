//! Event bus for batch progress reporting
//!
//! A batch owns one unbounded MPSC channel. Job runners and the orchestrator
//! publish through cloned [`EventPublisher`]s; the single observer consumes the
//! [`EventStream`]. End-of-stream is the channel closing, which happens once the
//! last publisher is dropped. Dropping the [`EventStream`] cancels the batch.
//!
//! This module also defines the [`JobLogger`] capability handed to
//! collaborators, with an adapter that publishes `log` events
//! ([`EventLogger`]) and one that only writes to `tracing` ([`TracingLogger`]).

use crate::types::{Event, LogLevel};
use futures::Stream;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::mpsc;
use tokio_util::sync::{CancellationToken, DropGuard};

/// Create a new event bus bound to a batch cancellation token
///
/// The token is cancelled when the returned [`EventStream`] is dropped.
pub fn channel(cancel: &CancellationToken) -> (EventPublisher, EventStream) {
    let (tx, rx) = mpsc::unbounded_channel();
    (
        EventPublisher { tx },
        EventStream {
            rx,
            _cancel_on_drop: cancel.clone().drop_guard(),
        },
    )
}

/// Producer side of the event bus
#[derive(Clone, Debug)]
pub struct EventPublisher {
    tx: mpsc::UnboundedSender<Event>,
}

impl EventPublisher {
    /// Publish an event without blocking
    ///
    /// Returns false if the observer is gone; the event is discarded.
    pub fn publish(&self, event: Event) -> bool {
        self.tx.send(event).is_ok()
    }

    /// Publish a `status` event
    pub fn status(&self, message: impl Into<String>, video_index: Option<usize>) -> bool {
        self.publish(Event::Status {
            message: message.into(),
            video_index,
        })
    }

    /// Publish an `error` event
    pub fn error(&self, message: impl Into<String>, video_index: Option<usize>) -> bool {
        self.publish(Event::Error {
            message: message.into(),
            video_index,
        })
    }

    /// Returns true once the observer dropped its stream
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Consumer side of the event bus
///
/// Yields events in arrival order and ends once every publisher is dropped.
pub struct EventStream {
    rx: mpsc::UnboundedReceiver<Event>,
    _cancel_on_drop: DropGuard,
}

impl EventStream {
    /// Receive the next event, or None at end-of-stream
    pub async fn next_event(&mut self) -> Option<Event> {
        self.rx.recv().await
    }

    /// Drain the stream to completion
    pub async fn collect_all(mut self) -> Vec<Event> {
        let mut events = Vec::new();
        while let Some(event) = self.rx.recv().await {
            events.push(event);
        }
        events
    }
}

impl Stream for EventStream {
    type Item = Event;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Event>> {
        self.rx.poll_recv(cx)
    }
}

impl std::fmt::Debug for EventStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventStream").finish_non_exhaustive()
    }
}

/// Logging capability handed to collaborators (resolver, relay, transcoder)
pub trait JobLogger: Send + Sync {
    /// Informational message
    fn info(&self, message: &str);

    /// Recoverable problem
    fn warn(&self, message: &str);

    /// Error reported by a collaborator
    fn error(&self, message: &str);
}

/// Publishes collaborator output as `log` events tagged `[video_n]`
#[derive(Clone, Debug)]
pub struct EventLogger {
    publisher: EventPublisher,
    video_index: usize,
    prefix: String,
}

impl EventLogger {
    /// Logger for the job with the given 0-based index
    pub fn new(publisher: EventPublisher, video_index: usize) -> Self {
        Self {
            publisher,
            video_index,
            prefix: format!("[video_{}]", video_index + 1),
        }
    }

    fn emit(&self, level: LogLevel, message: &str) {
        self.publisher.publish(Event::Log {
            level,
            message: format!("{} {}", self.prefix, message.trim()),
            video_index: Some(self.video_index),
        });
    }
}

impl JobLogger for EventLogger {
    fn info(&self, message: &str) {
        tracing::debug!(video_index = self.video_index, "{}", message);
        self.emit(LogLevel::Info, message);
    }

    fn warn(&self, message: &str) {
        tracing::warn!(video_index = self.video_index, "{}", message);
        self.emit(LogLevel::Warning, message);
    }

    fn error(&self, message: &str) {
        tracing::error!(video_index = self.video_index, "{}", message);
        self.emit(LogLevel::Error, message);
    }
}

/// Writes collaborator output to `tracing` only (single relayed downloads)
#[derive(Clone, Debug)]
pub struct TracingLogger {
    source_ref: String,
}

impl TracingLogger {
    /// Logger labelled with the source being relayed
    pub fn new(source_ref: impl Into<String>) -> Self {
        Self {
            source_ref: source_ref.into(),
        }
    }
}

impl JobLogger for TracingLogger {
    fn info(&self, message: &str) {
        tracing::info!(source = %self.source_ref, "{}", message);
    }

    fn warn(&self, message: &str) {
        tracing::warn!(source = %self.source_ref, "{}", message);
    }

    fn error(&self, message: &str) {
        tracing::error!(source = %self.source_ref, "{}", message);
    }
}
