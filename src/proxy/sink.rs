//! Client-facing side of the relay.
//!
//! The relay writes to a [`ClientSink`]: one head (status and headers), then
//! body chunks, then either a clean finish or a failure. [`channel`] builds
//! the sink used in production, a pair of tokio channels whose receiving
//! half turns into an axum [`Response`] once the head arrives. Dropping the
//! response body (client disconnect) closes the channel, which the relay
//! observes through [`ClientSink::closed`]. [`ClientSink::finish`] returns
//! only after the response body has handed its last frame to the server.

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use tokio::sync::{mpsc, oneshot};

use super::headers::HeaderList;
use crate::error::ProxyError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseHead {
    pub status: StatusCode,
    pub headers: HeaderList,
}

#[async_trait]
pub trait ClientSink: Send {
    /// Transmit status and headers. Called at most once, before any data.
    async fn send_head(&mut self, head: ResponseHead) -> Result<(), ProxyError>;

    async fn send_data(&mut self, chunk: Bytes) -> Result<(), ProxyError>;

    /// Clean end of body. Resolves once the client has taken the end of the
    /// stream, or fails with [`ProxyError::ClientGone`] if it went away first.
    async fn finish(&mut self) -> Result<(), ProxyError>;

    /// Before the head is sent this becomes an error response; afterwards it
    /// terminates the client stream abruptly.
    async fn fail(&mut self, error: &ProxyError);

    /// Resolves once the client can no longer receive anything.
    async fn closed(&mut self);
}

type HeadResult = Result<ResponseHead, Response>;
type DataResult = Result<Bytes, std::io::Error>;

pub struct ChannelSink {
    head: Option<oneshot::Sender<HeadResult>>,
    data: Option<mpsc::Sender<DataResult>>,
    delivered: Option<oneshot::Receiver<()>>,
}

pub struct ClientReceiver {
    head: oneshot::Receiver<HeadResult>,
    data: mpsc::Receiver<DataResult>,
    delivered: oneshot::Sender<()>,
}

/// `buffer` bounds how many chunks may queue ahead of the client.
#[must_use]
pub fn channel(buffer: usize) -> (ChannelSink, ClientReceiver) {
    let (head_tx, head_rx) = oneshot::channel();
    let (data_tx, data_rx) = mpsc::channel(buffer.max(1));
    let (delivered_tx, delivered_rx) = oneshot::channel();
    (
        ChannelSink {
            head: Some(head_tx),
            data: Some(data_tx),
            delivered: Some(delivered_rx),
        },
        ClientReceiver {
            head: head_rx,
            data: data_rx,
            delivered: delivered_tx,
        },
    )
}

#[async_trait]
impl ClientSink for ChannelSink {
    async fn send_head(&mut self, head: ResponseHead) -> Result<(), ProxyError> {
        let tx = self.head.take().ok_or(ProxyError::ClientGone)?;
        tx.send(Ok(head)).map_err(|_| ProxyError::ClientGone)
    }

    async fn send_data(&mut self, chunk: Bytes) -> Result<(), ProxyError> {
        let tx = self.data.as_ref().ok_or(ProxyError::ClientGone)?;
        tx.send(Ok(chunk)).await.map_err(|_| ProxyError::ClientGone)
    }

    async fn finish(&mut self) -> Result<(), ProxyError> {
        self.data = None;
        let delivered = self.delivered.take().ok_or(ProxyError::ClientGone)?;
        // The response body drops the sender unsent when the client goes away.
        delivered.await.map_err(|_| ProxyError::ClientGone)
    }

    async fn fail(&mut self, error: &ProxyError) {
        if let Some(head) = self.head.take() {
            let _ = head.send(Err(error.to_response()));
        } else if let Some(data) = self.data.take() {
            let _ = data
                .send(Err(std::io::Error::other(error.to_string())))
                .await;
        }
        self.data = None;
    }

    async fn closed(&mut self) {
        if let Some(head) = self.head.as_mut() {
            head.closed().await;
        } else if let Some(data) = self.data.as_ref() {
            data.closed().await;
        } else {
            std::future::pending::<()>().await;
        }
    }
}

impl ClientReceiver {
    /// Wait for the relay's head and build the streaming response.
    pub async fn into_response(self) -> Response {
        let head = match self.head.await {
            Ok(Ok(head)) => head,
            Ok(Err(error_response)) => return error_response,
            Err(_) => {
                tracing::error!("relay ended without producing a response");
                return StatusCode::BAD_GATEWAY.into_response();
            }
        };

        // The server never polls a body for these, so the head is the whole response.
        if head.status.is_informational()
            || head.status == StatusCode::NO_CONTENT
            || head.status == StatusCode::NOT_MODIFIED
        {
            let _ = self.delivered.send(());
            let mut response = Response::new(Body::empty());
            *response.status_mut() = head.status;
            append_headers(&mut response, head.headers);
            return response;
        }

        let stream = futures_util::stream::unfold(
            (self.data, self.delivered),
            |(mut rx, delivered)| async move {
                match rx.recv().await {
                    Some(item) => Some((item, (rx, delivered))),
                    None => {
                        let _ = delivered.send(());
                        None
                    }
                }
            },
        );

        let mut response = Response::new(Body::from_stream(stream));
        *response.status_mut() = head.status;
        append_headers(&mut response, head.headers);
        response
    }
}

fn append_headers(response: &mut Response, list: HeaderList) {
    let headers = response.headers_mut();
    for (name, value) in list {
        headers.append(name, value);
    }
}

/// Attach the correlation id to any response.
pub fn with_correlation_id(mut response: Response, correlation_id: &str) -> Response {
    if let Ok(value) = HeaderValue::from_str(correlation_id) {
        response.headers_mut().insert("x-correlation-id", value);
    }
    response
}
