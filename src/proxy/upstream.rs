//! Outbound HTTP client seam.
//!
//! The relay talks to upstreams through the [`Upstream`] trait so it can be
//! driven by a scripted upstream in tests. The production implementation is
//! the pooled hyper client built by
//! [`build_http_client`](crate::server::build_http_client), whose response
//! body is exposed as a chunk stream without buffering.

use std::pin::Pin;

use async_trait::async_trait;
use axum::http::{HeaderMap, Method, StatusCode};
use bytes::Bytes;
use futures_util::{Stream, StreamExt};
use http_body_util::{BodyExt, Full};

use super::headers::HeaderList;
use crate::error::{BoxError, ProxyError};
use crate::server::HttpClient;

pub type BodyStream = Pin<Box<dyn Stream<Item = Result<Bytes, BoxError>> + Send>>;

#[derive(Debug, Clone)]
pub struct OutboundRequest {
    pub method: Method,
    pub url: String,
    pub headers: HeaderList,
    pub body: Option<Bytes>,
}

pub struct UpstreamResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: BodyStream,
}

impl std::fmt::Debug for UpstreamResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UpstreamResponse")
            .field("status", &self.status)
            .field("headers", &self.headers)
            .finish_non_exhaustive()
    }
}

// async_trait is required here because Upstream is used as &dyn Upstream.
#[async_trait]
pub trait Upstream: Send + Sync {
    /// Issue `request` and resolve once status and headers are known.
    /// Transport failures map to [`ProxyError::Upstream`].
    async fn send(&self, request: OutboundRequest) -> Result<UpstreamResponse, ProxyError>;
}

#[async_trait]
impl Upstream for HttpClient {
    async fn send(&self, request: OutboundRequest) -> Result<UpstreamResponse, ProxyError> {
        let uri: hyper::Uri = request
            .url
            .parse()
            .map_err(|e: hyper::http::uri::InvalidUri| ProxyError::UpstreamUri {
                uri: request.url.clone(),
                source: Box::new(e),
            })?;

        let mut builder = hyper::Request::builder().method(request.method).uri(uri);
        for (name, value) in request.headers {
            builder = builder.header(name, value);
        }
        let outbound = builder
            .body(Full::new(request.body.unwrap_or_default()))
            .map_err(|e| ProxyError::Upstream {
                source: Box::new(e),
            })?;

        let response = self
            .request(outbound)
            .await
            .map_err(|e| ProxyError::Upstream {
                source: Box::new(e),
            })?;

        let (parts, body) = response.into_parts();
        let body = body
            .into_data_stream()
            .map(|chunk| chunk.map_err(BoxError::from));

        Ok(UpstreamResponse {
            status: parts.status,
            headers: parts.headers,
            body: Box::pin(body),
        })
    }
}
