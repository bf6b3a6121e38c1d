//! Streaming relay state machine.
//!
//! ```text
//! Init -> HeadersPending -> Streaming -> Complete
//!   \            \              \
//!    +------------+--------------+--> Failed
//! ```
//!
//! A [`Relay`] owns the client sink and the [`ExchangeRecord`] for one
//! request. It issues the outbound call, holds the client-facing head until
//! the first body chunk (or the end of an empty body) is ready, then pipes
//! chunks through in upstream order while keeping a copy for the record.
//! `Complete` is reached only once the client has taken the end of the
//! body, so a record never precedes delivery. Any transport failure or
//! client disconnect, including one while chunks are still queued, ends in
//! `Failed` with nothing to log.

use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::{Bytes, BytesMut};
use futures_util::StreamExt;

use super::headers::{filter_headers, to_string_pairs, ExclusionSet};
use super::sink::{ClientSink, ResponseHead};
use super::upstream::{OutboundRequest, Upstream, UpstreamResponse};
use crate::error::ProxyError;
use crate::recorder::ExchangeRecord;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayState {
    Init,
    HeadersPending,
    Streaming,
    Complete,
    Failed,
}

impl RelayState {
    #[must_use]
    pub const fn can_become(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Init, Self::HeadersPending)
                | (Self::HeadersPending, Self::Streaming)
                | (Self::Streaming, Self::Complete)
                | (Self::Init | Self::HeadersPending | Self::Streaming, Self::Failed)
        )
    }
}

#[derive(Debug)]
pub enum RelayOutcome {
    Complete(ExchangeRecord),
    Failed(ProxyError),
}

#[derive(Debug, Clone)]
pub struct RelayOptions {
    /// Bound on waiting for upstream status and headers.
    pub timeout: Option<Duration>,
    pub response_exclusions: Arc<ExclusionSet>,
}

impl Default for RelayOptions {
    fn default() -> Self {
        Self {
            timeout: None,
            response_exclusions: Arc::new(ExclusionSet::defaults().clone()),
        }
    }
}

pub struct Relay<S> {
    state: RelayState,
    sink: S,
    options: RelayOptions,
    record: ExchangeRecord,
    started: Instant,
    pending_head: Option<ResponseHead>,
    headers_sent: bool,
    body: BytesMut,
}

enum Next {
    Chunk(Option<Result<Bytes, crate::error::BoxError>>),
    ClientGone,
}

impl<S: ClientSink> Relay<S> {
    /// `record` must already carry the request URL, method and start time.
    pub fn new(sink: S, record: ExchangeRecord, options: RelayOptions) -> Self {
        Self {
            state: RelayState::Init,
            sink,
            options,
            record,
            started: Instant::now(),
            pending_head: None,
            headers_sent: false,
            body: BytesMut::new(),
        }
    }

    fn transition(&mut self, next: RelayState) {
        debug_assert!(
            self.state.can_become(next),
            "invalid relay transition {:?} -> {next:?}",
            self.state
        );
        tracing::trace!(from = ?self.state, to = ?next, url = %self.record.request_url, "relay state");
        self.state = next;
    }

    /// Drive the relay to `Complete` or `Failed`.
    pub async fn run(mut self, upstream: &dyn Upstream, request: OutboundRequest) -> RelayOutcome {
        self.transition(RelayState::HeadersPending);

        let connect = connect(upstream, request, self.options.timeout);
        let response = tokio::select! {
            result = connect => result,
            () = self.sink.closed() => Err(ProxyError::ClientGone),
        };
        let response = match response {
            Ok(response) => response,
            Err(e) => return self.fail(e).await,
        };

        let UpstreamResponse {
            status,
            headers,
            mut body,
        } = response;
        self.record.status_code = Some(status.as_u16());
        self.record.response_headers = to_string_pairs(&headers);
        self.pending_head = Some(ResponseHead {
            status,
            headers: filter_headers(&headers, &self.options.response_exclusions),
        });
        self.transition(RelayState::Streaming);

        loop {
            let next = tokio::select! {
                chunk = body.next() => Next::Chunk(chunk),
                () = self.sink.closed() => Next::ClientGone,
            };
            match next {
                Next::Chunk(Some(Ok(chunk))) => {
                    if chunk.is_empty() {
                        continue;
                    }
                    if let Err(e) = self.forward(chunk).await {
                        return self.fail(e).await;
                    }
                }
                Next::Chunk(Some(Err(source))) => {
                    return self.fail(ProxyError::Upstream { source }).await;
                }
                Next::Chunk(None) => break,
                Next::ClientGone => return self.fail(ProxyError::ClientGone).await,
            }
        }
        drop(body);

        self.complete().await
    }

    async fn flush_head(&mut self) -> Result<(), ProxyError> {
        if self.headers_sent {
            return Ok(());
        }
        if let Some(head) = self.pending_head.take() {
            self.sink.send_head(head).await?;
        }
        self.headers_sent = true;
        Ok(())
    }

    async fn forward(&mut self, chunk: Bytes) -> Result<(), ProxyError> {
        self.flush_head().await?;
        self.sink.send_data(chunk.clone()).await?;
        self.body.extend_from_slice(&chunk);
        Ok(())
    }

    async fn complete(mut self) -> RelayOutcome {
        if let Err(e) = self.flush_head().await {
            return self.fail(e).await;
        }
        if let Err(e) = self.sink.finish().await {
            return self.fail(e).await;
        }
        self.record.elapsed = self.started.elapsed();
        self.transition(RelayState::Complete);

        let body = self.body.split().freeze();
        self.record.response_body = decode_text(&body, &self.record.request_url);
        RelayOutcome::Complete(self.record)
    }

    async fn fail(mut self, error: ProxyError) -> RelayOutcome {
        self.transition(RelayState::Failed);
        self.sink.fail(&error).await;
        if self.headers_sent {
            tracing::warn!(
                url = %self.record.request_url,
                relayed_bytes = self.body.len(),
                error = %error,
                "relay aborted mid-stream"
            );
        }
        RelayOutcome::Failed(error)
    }
}

async fn connect(
    upstream: &dyn Upstream,
    request: OutboundRequest,
    timeout: Option<Duration>,
) -> Result<UpstreamResponse, ProxyError> {
    match timeout {
        Some(limit) => tokio::time::timeout(limit, upstream.send(request))
            .await
            .map_err(|_| {
                ProxyError::UpstreamTimeout(u64::try_from(limit.as_millis()).unwrap_or(u64::MAX))
            })?,
        None => upstream.send(request).await,
    }
}

/// UTF-8 text for the exchange log. Invalid sequences become U+FFFD and the
/// substitution is reported.
#[must_use]
pub fn decode_text(bytes: &[u8], url: &str) -> String {
    match std::str::from_utf8(bytes) {
        Ok(text) => text.to_string(),
        Err(e) => {
            tracing::warn!(
                url = %url,
                valid_up_to = e.valid_up_to(),
                len = bytes.len(),
                "body is not valid UTF-8, logging lossy text"
            );
            String::from_utf8_lossy(bytes).into_owned()
        }
    }
}
