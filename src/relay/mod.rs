//! Resilient stream relay
//!
//! [`StreamRelay::relay`] turns a source reference into a lazy byte stream.
//! Every attempt asks the [`Resolver`] for a fresh descriptor, opens a
//! streaming GET and only yields bytes once the response status has been
//! checked. Expired URLs (401/403) and network failures are retried with
//! backoff; when a transfer breaks after bytes were delivered, the next attempt
//! re-resolves and resumes with a `Range` request so the consumer never sees
//! duplicated or missing bytes.
//!
//! ```text
//! Resolving ──ok──▶ Transferring ──eof──▶ Done
//!     ▲                  │
//!     │             transient error
//!     │                  ▼
//!     └────────── RetryBackoff ──exhausted / fatal──▶ Failed
//! ```

mod classify;

pub use classify::{BodyAlignment, align_body, build_headers, check_body_end, classify_status};

use crate::config::RelayConfig;
use crate::error::{Error, RelayError, Result};
use crate::events::JobLogger;
use crate::resolver::Resolver;
use crate::retry::{RetryDecision, RetryState};
use bytes::Bytes;
use futures::stream::{BoxStream, Stream, StreamExt};
use reqwest::StatusCode;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

/// Metadata of the active transfer attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferInfo {
    /// Title reported by the resolver
    pub title: Option<String>,
    /// Container / extension of the selected format
    pub container: String,
    /// Format id chosen by the resolver
    pub format_id: Option<String>,
    /// Size of the complete object, when the origin reports it
    pub total_bytes: Option<u64>,
}

/// Retrying, re-resolving relay over a shared HTTP client
#[derive(Clone)]
pub struct StreamRelay {
    inner: Arc<RelayInner>,
}

struct RelayInner {
    client: reqwest::Client,
    resolver: Arc<dyn Resolver>,
    config: RelayConfig,
}

impl StreamRelay {
    /// Create a relay
    pub fn new(client: reqwest::Client, resolver: Arc<dyn Resolver>, config: RelayConfig) -> Self {
        Self {
            inner: Arc::new(RelayInner {
                client,
                resolver,
                config,
            }),
        }
    }

    /// Build the origin HTTP client for a relay configuration
    ///
    /// Per-read idle timeouts are enforced by the relay itself, so only the
    /// connect timeout is set here.
    pub fn build_client(config: &RelayConfig) -> Result<reqwest::Client> {
        reqwest::Client::builder()
            .connect_timeout(config.connect_timeout)
            .build()
            .map_err(Error::Network)
    }

    /// Relay configuration in use
    pub fn config(&self) -> &RelayConfig {
        &self.inner.config
    }

    /// Start relaying `source_ref`
    ///
    /// Nothing happens until the returned stream is polled. The stream ends
    /// after the complete body, or yields exactly one error and then ends.
    pub fn relay(
        &self,
        source_ref: impl Into<String>,
        format_selector: Option<String>,
        logger: Arc<dyn JobLogger>,
        cancel: CancellationToken,
    ) -> RelayStream {
        let (info_tx, info_rx) = watch::channel(None);
        let machine = RelayMachine {
            inner: self.inner.clone(),
            source_ref: source_ref.into(),
            format_selector,
            logger,
            cancel,
            delivered: 0,
            known_total: None,
            info_tx,
            phase: Phase::Resolving(RetryState::new(&self.inner.config)),
        };

        let stream = futures::stream::unfold(machine, |mut machine| async move {
            let item = machine.next_item().await?;
            Some((item, machine))
        })
        .boxed();

        RelayStream {
            inner: stream,
            info: info_rx,
            pending: None,
        }
    }
}

/// Lazy, finite, non-restartable byte stream produced by [`StreamRelay::relay`]
pub struct RelayStream {
    inner: BoxStream<'static, Result<Bytes>>,
    info: watch::Receiver<Option<TransferInfo>>,
    pending: Option<Bytes>,
}

impl RelayStream {
    /// Metadata of the current attempt, once its status check passed
    pub fn info(&self) -> Option<TransferInfo> {
        self.info.borrow().clone()
    }

    /// Size of the complete object, once an attempt reported it
    pub fn total_bytes(&self) -> Option<u64> {
        self.info.borrow().as_ref().and_then(|info| info.total_bytes)
    }

    /// Drive the relay until the first attempt is accepted
    ///
    /// Resolves, retries and checks status as needed, then returns the
    /// transfer metadata. The first chunk (if any) is held back and yielded
    /// by the stream as usual. Errors that end the relay before any byte was
    /// accepted are returned here.
    pub async fn ready(&mut self) -> Result<TransferInfo> {
        if let Some(info) = self.info() {
            return Ok(info);
        }
        match self.inner.next().await {
            Some(Ok(chunk)) => self.pending = Some(chunk),
            Some(Err(e)) => return Err(e),
            None => {}
        }
        self.info()
            .ok_or_else(|| Error::Other("relay ended before any attempt was accepted".into()))
    }
}

impl Stream for RelayStream {
    type Item = Result<Bytes>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if let Some(chunk) = self.pending.take() {
            return Poll::Ready(Some(Ok(chunk)));
        }
        self.inner.poll_next_unpin(cx)
    }
}

impl std::fmt::Debug for RelayStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RelayStream")
            .field("info", &*self.info.borrow())
            .finish_non_exhaustive()
    }
}

enum Phase {
    Resolving(RetryState),
    Transferring {
        retry: RetryState,
        body: BoxStream<'static, reqwest::Result<Bytes>>,
        skip: u64,
        total: Option<u64>,
    },
    Finished,
}

enum Opened {
    Body {
        body: BoxStream<'static, reqwest::Result<Bytes>>,
        alignment: BodyAlignment,
    },
    AlreadyComplete,
}

enum AttemptFailure {
    /// Ends the relay without consulting the retry policy
    Terminal(Error),
    /// Classified failure handed to the retry policy
    Relay(RelayError),
}

struct RelayMachine {
    inner: Arc<RelayInner>,
    source_ref: String,
    format_selector: Option<String>,
    logger: Arc<dyn JobLogger>,
    cancel: CancellationToken,
    delivered: u64,
    known_total: Option<u64>,
    info_tx: watch::Sender<Option<TransferInfo>>,
    phase: Phase,
}

impl RelayMachine {
    async fn next_item(&mut self) -> Option<Result<Bytes>> {
        loop {
            match std::mem::replace(&mut self.phase, Phase::Finished) {
                Phase::Finished => return None,

                Phase::Resolving(retry) => {
                    let retry = retry.begin_attempt();
                    match self.open_attempt(&retry).await {
                        Ok(Opened::Body { body, alignment }) => {
                            self.phase = Phase::Transferring {
                                retry,
                                body,
                                skip: alignment.skip,
                                total: alignment.total_bytes,
                            };
                        }
                        Ok(Opened::AlreadyComplete) => return None,
                        Err(AttemptFailure::Terminal(e)) => return Some(Err(e)),
                        Err(AttemptFailure::Relay(e)) => match self.back_off(retry, e).await {
                            Ok(next) => self.phase = Phase::Resolving(next),
                            Err(e) => return Some(Err(e)),
                        },
                    }
                }

                Phase::Transferring {
                    retry,
                    mut body,
                    mut skip,
                    total,
                } => {
                    let read_timeout = self.inner.config.read_timeout;
                    let read = tokio::select! {
                        biased;
                        _ = self.cancel.cancelled() => return Some(Err(Error::Cancelled)),
                        read = tokio::time::timeout(read_timeout, body.next()) => read,
                    };

                    let failure = match read {
                        Ok(Some(Ok(mut chunk))) => {
                            if skip > 0 {
                                let dropped = skip.min(chunk.len() as u64);
                                chunk = chunk.slice(dropped as usize..);
                                skip -= dropped;
                            }
                            self.phase = Phase::Transferring {
                                retry,
                                body,
                                skip,
                                total,
                            };
                            if chunk.is_empty() {
                                continue;
                            }
                            self.delivered += chunk.len() as u64;
                            return Some(Ok(chunk));
                        }
                        Ok(None) => match check_body_end(self.delivered, skip, total) {
                            Some(err) => err,
                            None => {
                                tracing::debug!(
                                    source = %self.source_ref,
                                    bytes = self.delivered,
                                    attempts = retry.attempt(),
                                    "Relay completed"
                                );
                                return None;
                            }
                        },
                        Ok(Some(Err(e))) => RelayError::network(&e),
                        Err(_) => RelayError::TransientNetwork {
                            reason: format!("no data received for {}s", read_timeout.as_secs_f32()),
                        },
                    };

                    match self.back_off(retry, failure).await {
                        Ok(next) => self.phase = Phase::Resolving(next),
                        Err(e) => return Some(Err(e)),
                    }
                }
            }
        }
    }

    /// Resolve, send the request and check the status of one attempt
    async fn open_attempt(&mut self, retry: &RetryState) -> std::result::Result<Opened, AttemptFailure> {
        let inner = self.inner.clone();
        let config = &inner.config;

        let resolved = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return Err(AttemptFailure::Terminal(Error::Cancelled)),
            resolved = inner.resolver.resolve(
                &self.source_ref,
                self.format_selector.as_deref(),
                self.logger.as_ref(),
            ) => resolved,
        };
        let descriptor = resolved.map_err(AttemptFailure::Terminal)?;

        tracing::debug!(
            source = %self.source_ref,
            attempt = retry.attempt(),
            format_id = ?descriptor.selected_format_id,
            resume_from = self.delivered,
            "Opening origin stream"
        );

        let headers = build_headers(config, &descriptor.http_headers, self.delivered);
        let request = inner
            .client
            .get(&descriptor.direct_url)
            .headers(headers)
            .send();

        let response = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return Err(AttemptFailure::Terminal(Error::Cancelled)),
            sent = tokio::time::timeout(config.read_timeout, request) => match sent {
                Ok(Ok(response)) => response,
                Ok(Err(e)) => return Err(AttemptFailure::Relay(RelayError::network(&e))),
                Err(_) => {
                    return Err(AttemptFailure::Relay(RelayError::TransientNetwork {
                        reason: "timed out waiting for response headers".into(),
                    }));
                }
            },
        };

        let status = response.status();
        if self.delivered > 0
            && status == StatusCode::RANGE_NOT_SATISFIABLE
            && self.known_total == Some(self.delivered)
        {
            return Ok(Opened::AlreadyComplete);
        }
        if let Some(err) = classify_status(status, config.retry_on_rate_limit) {
            return Err(AttemptFailure::Relay(err));
        }

        let alignment = align_body(
            status,
            response.headers(),
            response.content_length(),
            self.delivered,
        )
        .map_err(AttemptFailure::Relay)?;

        // A resumed attempt must describe the same object
        if self.delivered > 0
            && let (Some(expected), Some(actual)) = (self.known_total, alignment.total_bytes)
            && expected != actual
        {
            return Err(AttemptFailure::Relay(RelayError::ObjectChanged {
                delivered: self.delivered,
                reason: format!("object size changed from {expected} to {actual} bytes"),
            }));
        }

        if alignment.total_bytes.is_some() {
            self.known_total = alignment.total_bytes;
        }
        self.info_tx.send_replace(Some(TransferInfo {
            title: descriptor.title,
            container: descriptor.container,
            format_id: descriptor.selected_format_id,
            total_bytes: self.known_total,
        }));

        Ok(Opened::Body {
            body: response.bytes_stream().boxed(),
            alignment,
        })
    }

    /// Consult the retry policy, then sleep (interruptibly) before the next attempt
    ///
    /// The decision and logging happen up front; the returned future owns
    /// only the cancel token and the delay.
    fn back_off(
        &self,
        retry: RetryState,
        error: RelayError,
    ) -> impl Future<Output = Result<RetryState>> + Send + use<> {
        let attempt = retry.attempt();
        let max_attempts = retry.max_attempts();
        let message = error.to_string();

        let decision = match retry.on_failure(error) {
            RetryDecision::Retry { state, delay } => {
                tracing::warn!(
                    source = %self.source_ref,
                    error = %message,
                    attempt,
                    max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    delivered = self.delivered,
                    "Relay attempt failed, retrying"
                );
                self.logger.warn(&format!(
                    "Attempt {attempt}/{max_attempts} failed ({message}), retrying in {} ms",
                    delay.as_millis()
                ));
                Ok((state, delay))
            }
            RetryDecision::GiveUp(error) => {
                tracing::error!(
                    source = %self.source_ref,
                    error = %error,
                    attempts = attempt,
                    delivered = self.delivered,
                    "Relay failed"
                );
                Err(Error::Relay(error))
            }
        };

        let cancel = self.cancel.clone();
        async move {
            let (state, delay) = decision?;
            tokio::select! {
                biased;
                _ = cancel.cancelled() => Err(Error::Cancelled),
                _ = tokio::time::sleep(delay) => Ok(state),
            }
        }
    }
}
