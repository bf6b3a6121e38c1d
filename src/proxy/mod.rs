//! Per-request orchestration.
//!
//! [`forward_handler`] is the Axum fallback that receives every request
//! outside the health endpoint. It resolves the upstream base URL through
//! the [`routing`] tree, builds the outbound request with [`headers`]
//! filtering, and hands the exchange to a [`relay::Relay`] running on its
//! own task. The handler returns as soon as the relay has produced the
//! response head; completed exchanges go to the
//! [`Recorder`](crate::recorder::Recorder) without delaying the client.

pub mod headers;
pub mod relay;
pub mod routing;
pub mod sink;
pub mod upstream;

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use axum::body::Bytes;
use axum::extract::State;
use axum::http::header::CONTENT_TYPE;
use axum::http::{HeaderMap, HeaderValue, Method, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use url::form_urlencoded;

use self::headers::{filter_headers, ExclusionSet};
use self::relay::{Relay, RelayOptions, RelayOutcome};
use self::upstream::OutboundRequest;
use crate::config::model::Defaults;
use crate::error::ProxyError;
use crate::recorder::ExchangeRecord;
use crate::server::AppState;

/// Chunks allowed to queue between the relay task and a slow client.
const RELAY_BUFFER: usize = 16;

/// Request-path settings resolved once from [`Defaults`].
#[derive(Debug, Clone)]
pub struct ProxySettings {
    pub methods: Vec<Method>,
    pub body_methods: Vec<Method>,
    pub no_route_status: StatusCode,
    pub request_exclusions: ExclusionSet,
    pub relay: RelayOptions,
    pub tenant_param: Option<String>,
}

impl ProxySettings {
    #[must_use]
    pub fn from_defaults(defaults: &Defaults, timeout_override: Option<u64>) -> Self {
        let parse = |methods: &[String]| -> Vec<Method> {
            methods
                .iter()
                .filter_map(|m| Method::from_bytes(m.to_uppercase().as_bytes()).ok())
                .collect()
        };
        let exclusions = ExclusionSet::with_defaults(&defaults.strip_headers);

        Self {
            methods: parse(&defaults.methods),
            body_methods: parse(&defaults.body_methods),
            no_route_status: defaults.no_route_status(),
            request_exclusions: exclusions.clone(),
            relay: RelayOptions {
                timeout: timeout_override
                    .or(defaults.timeout)
                    .map(Duration::from_millis),
                response_exclusions: Arc::new(exclusions),
            },
            tenant_param: defaults.tenant_param.clone(),
        }
    }

    fn allow_header(&self) -> String {
        self.methods
            .iter()
            .map(Method::as_str)
            .collect::<Vec<_>>()
            .join(", ")
    }
}

pub async fn forward_handler(
    State(state): State<Arc<AppState>>,
    method: Method,
    uri: Uri,
    req_headers: HeaderMap,
    body: Bytes,
) -> Response {
    let correlation_id = req_headers
        .get("x-correlation-id")
        .and_then(|v| v.to_str().ok())
        .map_or_else(|| uuid::Uuid::new_v4().to_string(), String::from);

    let response = match prepare(&state, &method, &uri, &req_headers, &body) {
        Ok((request, record)) => {
            tracing::info!(
                correlation_id = %correlation_id,
                method = %method,
                url = %request.url,
                "forwarding request"
            );
            dispatch(state, request, record, correlation_id.clone()).await
        }
        Err(e) => {
            state.stats.failed.fetch_add(1, Ordering::Relaxed);
            tracing::warn!(
                correlation_id = %correlation_id,
                method = %method,
                path = %uri.path(),
                error = %e,
                "request rejected"
            );
            e.into_response()
        }
    };

    sink::with_correlation_id(response, &correlation_id)
}

/// Build the outbound request and open its record. Everything that can
/// be rejected without contacting an upstream is rejected here.
fn prepare(
    state: &AppState,
    method: &Method,
    uri: &Uri,
    req_headers: &HeaderMap,
    body: &Bytes,
) -> Result<(OutboundRequest, ExchangeRecord), ProxyError> {
    let settings = &state.settings;
    if !settings.methods.contains(method) {
        return Err(ProxyError::UnsupportedMethod {
            method: method.clone(),
            allow: settings.allow_header(),
        });
    }

    let path = uri.path();
    let base = state.routes.resolve(path).ok_or_else(|| ProxyError::NoRoute {
        path: path.to_string(),
        status: settings.no_route_status,
    })?;

    let (query, tenant) = split_tenant(uri.query(), settings.tenant_param.as_deref());
    let url = match query {
        Some(query) => format!("{base}{path}?{query}"),
        None => format!("{base}{path}"),
    };

    let mut headers = filter_headers(req_headers, &settings.request_exclusions);

    let (forward_body, request_body) = if settings.body_methods.contains(method) {
        if body.is_empty() {
            (None, None)
        } else {
            let value: serde_json::Value =
                serde_json::from_slice(body).map_err(ProxyError::InvalidBody)?;
            let encoded = serde_json::to_vec(&value).map_err(ProxyError::InvalidBody)?;
            headers.retain(|(name, _)| name != CONTENT_TYPE);
            headers.push((CONTENT_TYPE, HeaderValue::from_static("application/json")));
            (
                Some(Bytes::from(encoded)),
                Some(String::from_utf8_lossy(body).into_owned()),
            )
        }
    } else {
        (None, None)
    };

    let mut record = ExchangeRecord::open(url.clone(), method.clone(), SystemTime::now());
    record.request_body = request_body;
    record.tenant = tenant;

    Ok((
        OutboundRequest {
            method: method.clone(),
            url,
            headers,
            body: forward_body,
        },
        record,
    ))
}

/// Run the relay on its own task and wait only for the response head. The
/// record is handed to the recorder after the client has taken the whole
/// body.
async fn dispatch(
    state: Arc<AppState>,
    request: OutboundRequest,
    record: ExchangeRecord,
    correlation_id: String,
) -> Response {
    let (sink, receiver) = sink::channel(RELAY_BUFFER);
    let relay = Relay::new(sink, record, state.settings.relay.clone());

    tokio::spawn(async move {
        match relay.run(&*state.upstream, request).await {
            RelayOutcome::Complete(record) => {
                state.stats.forwarded.fetch_add(1, Ordering::Relaxed);
                tracing::info!(
                    correlation_id = %correlation_id,
                    status = record.status_code.unwrap_or(0),
                    elapsed_us = record.elapsed_micros(),
                    bytes = record.response_body.len(),
                    "exchange complete"
                );
                state.recorder.record(record);
            }
            RelayOutcome::Failed(ProxyError::ClientGone) => {
                state.stats.failed.fetch_add(1, Ordering::Relaxed);
                tracing::info!(correlation_id = %correlation_id, "client disconnected, relay cancelled");
            }
            RelayOutcome::Failed(e) => {
                state.stats.failed.fetch_add(1, Ordering::Relaxed);
                tracing::error!(correlation_id = %correlation_id, error = %e, "relay failed");
            }
        }
    });

    receiver.into_response().await
}

/// Remove `param` from `query`, returning the forwarded query and the
/// first value of `param`. The query is passed through untouched when the
/// parameter is absent.
fn split_tenant(query: Option<&str>, param: Option<&str>) -> (Option<String>, Option<String>) {
    let query = query.filter(|q| !q.is_empty());
    let (Some(query), Some(param)) = (query, param) else {
        return (query.map(String::from), None);
    };

    let mut tenant = None;
    let mut forwarded = form_urlencoded::Serializer::new(String::new());
    let mut kept = 0usize;
    for (key, value) in form_urlencoded::parse(query.as_bytes()) {
        if key == param {
            tenant.get_or_insert_with(|| value.into_owned());
        } else {
            forwarded.append_pair(&key, &value);
            kept += 1;
        }
    }

    if tenant.is_none() {
        return (Some(query.to_string()), None);
    }
    let forwarded = forwarded.finish();
    ((kept > 0).then_some(forwarded), tenant)
}

#[cfg(test)]
mod tests {
    use std::time::Instant;

    use super::relay::test_support::{ScriptedUpstream, Step};
    use super::*;
    use crate::config::model::Config;
    use crate::config::ConfigVersion;
    use crate::recorder::test_support::MemoryStore;
    use crate::recorder::Recorder;

    fn state(defaults: Defaults, upstream: ScriptedUpstream) -> (Arc<AppState>, Arc<MemoryStore>, Arc<ScriptedUpstream>) {
        let config: Config = serde_json::from_str(
            r#"{"routes": [
                {"path": "/", "upstream": "https://api.openai.com/"},
                {"path": "/backend-api/conversation", "upstream": "https://chat.openai.com"}
            ]}"#,
        )
        .unwrap();
        let config = Config { defaults, ..config };
        let store = Arc::new(MemoryStore::default());
        let upstream = Arc::new(upstream);
        let state = AppState::new(
            &config,
            ConfigVersion::Hash("test".into()),
            "test",
            upstream.clone(),
            Recorder::new(store.clone()),
            None,
        );
        (Arc::new(state), store, upstream)
    }

    fn get(uri: &str) -> (Method, Uri) {
        (Method::GET, uri.parse().unwrap())
    }

    #[test]
    fn tenant_is_split_from_query() {
        assert_eq!(
            split_tenant(Some("a=1&org=acme&b=2"), Some("org")),
            (Some("a=1&b=2".into()), Some("acme".into()))
        );
        assert_eq!(split_tenant(Some("org=acme"), Some("org")), (None, Some("acme".into())));
    }

    #[test]
    fn query_untouched_without_tenant() {
        assert_eq!(
            split_tenant(Some("q=a%20b&x"), Some("org")),
            (Some("q=a%20b&x".into()), None)
        );
        assert_eq!(split_tenant(Some("q=1"), None), (Some("q=1".into()), None));
        assert_eq!(split_tenant(Some(""), None), (None, None));
    }

    #[test]
    fn builds_url_from_route_and_query() {
        let (state, _, _) = state(Defaults::default(), ScriptedUpstream::new(vec![]));
        let (method, uri) = get("/v1/models?limit=2");
        let (request, record) =
            prepare(&state, &method, &uri, &HeaderMap::new(), &Bytes::new()).unwrap();
        assert_eq!(request.url, "https://api.openai.com/v1/models?limit=2");
        assert_eq!(record.request_url, request.url);
        assert!(request.body.is_none());
        assert!(record.request_body.is_none());
    }

    #[test]
    fn unresolved_path_is_a_routing_error() {
        let (state, _, _) = state(Defaults::default(), ScriptedUpstream::new(vec![]));
        let (method, uri) = get("/backend-api/other");
        let err = prepare(&state, &method, &uri, &HeaderMap::new(), &Bytes::new()).unwrap_err();
        assert!(matches!(err, ProxyError::NoRoute { status, .. } if status == StatusCode::NOT_FOUND));
    }

    #[test]
    fn configured_no_route_status_is_used() {
        let defaults = Defaults {
            no_route_status: 421,
            ..Defaults::default()
        };
        let (state, _, _) = state(defaults, ScriptedUpstream::new(vec![]));
        let (method, uri) = get("/backend-api/other");
        let err = prepare(&state, &method, &uri, &HeaderMap::new(), &Bytes::new()).unwrap_err();
        assert_eq!(err.status().as_u16(), 421);
    }

    #[test]
    fn unlisted_method_is_rejected() {
        let (state, _, _) = state(Defaults::default(), ScriptedUpstream::new(vec![]));
        let err = prepare(
            &state,
            &Method::PATCH,
            &"/v1".parse().unwrap(),
            &HeaderMap::new(),
            &Bytes::new(),
        )
        .unwrap_err();
        assert!(
            matches!(err, ProxyError::UnsupportedMethod { ref allow, .. } if allow == "GET, POST, PUT, DELETE")
        );
    }

    #[test]
    fn post_body_is_parsed_and_reencoded() {
        let (state, _, _) = state(Defaults::default(), ScriptedUpstream::new(vec![]));
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("text/plain"));
        headers.insert("authorization", HeaderValue::from_static("Bearer k"));
        let raw = Bytes::from_static(b"{ \"model\" : \"gpt\" }");

        let (request, record) = prepare(
            &state,
            &Method::POST,
            &"/v1/chat/completions".parse().unwrap(),
            &headers,
            &raw,
        )
        .unwrap();

        assert_eq!(request.body.as_deref(), Some(&b"{\"model\":\"gpt\"}"[..]));
        assert_eq!(record.request_body.as_deref(), Some("{ \"model\" : \"gpt\" }"));
        let content_types: Vec<_> = request
            .headers
            .iter()
            .filter(|(name, _)| name == CONTENT_TYPE)
            .map(|(_, v)| v.clone())
            .collect();
        assert_eq!(content_types, vec![HeaderValue::from_static("application/json")]);
        assert!(request.headers.iter().any(|(name, _)| name == "authorization"));
    }

    #[test]
    fn invalid_json_body_is_rejected() {
        let (state, _, _) = state(Defaults::default(), ScriptedUpstream::new(vec![]));
        let err = prepare(
            &state,
            &Method::PUT,
            &"/v1".parse().unwrap(),
            &HeaderMap::new(),
            &Bytes::from_static(b"{not json"),
        )
        .unwrap_err();
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn get_body_is_not_forwarded() {
        let (state, _, _) = state(Defaults::default(), ScriptedUpstream::new(vec![]));
        let (method, uri) = get("/v1");
        let (request, record) = prepare(
            &state,
            &method,
            &uri,
            &HeaderMap::new(),
            &Bytes::from_static(b"{not json"),
        )
        .unwrap();
        assert!(request.body.is_none());
        assert!(record.request_body.is_none());
    }

    #[test]
    fn tenant_param_is_recorded() {
        let defaults = Defaults {
            tenant_param: Some("institution".into()),
            ..Defaults::default()
        };
        let (state, _, _) = state(defaults, ScriptedUpstream::new(vec![]));
        let (method, uri) = get("/v1/models?institution=uni&x=1");
        let (request, record) =
            prepare(&state, &method, &uri, &HeaderMap::new(), &Bytes::new()).unwrap();
        assert_eq!(request.url, "https://api.openai.com/v1/models?x=1");
        assert_eq!(record.tenant.as_deref(), Some("uni"));
    }

    #[tokio::test]
    async fn handler_relays_and_records() {
        let upstream = ScriptedUpstream::new(vec![
            Step::Chunk(b"hel"),
            Step::Chunk(b"lo"),
        ]);
        let (state, store, upstream) = state(Defaults::default(), upstream);
        let started = Instant::now();

        let response = forward_handler(
            State(state.clone()),
            Method::GET,
            "/v1/models".parse().unwrap(),
            HeaderMap::new(),
            Bytes::new(),
        )
        .await;

        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers().contains_key("x-correlation-id"));
        let body = http_body_util::BodyExt::collect(response.into_body())
            .await
            .unwrap()
            .to_bytes();
        assert_eq!(&body[..], b"hello");

        while store.snapshot().is_empty() {
            assert!(started.elapsed() < Duration::from_secs(5), "record never written");
            tokio::task::yield_now().await;
        }
        let records = store.snapshot();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].response_body, "hello");
        assert_eq!(records[0].request_url, "https://api.openai.com/v1/models");
        assert_eq!(upstream.requests.lock().unwrap().len(), 1);
        assert_eq!(state.stats.forwarded.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn unread_response_is_not_recorded() {
        let upstream = ScriptedUpstream::new(vec![Step::Chunk(b"hel"), Step::Chunk(b"lo")]);
        let (state, store, _) = state(Defaults::default(), upstream);
        let started = Instant::now();

        let response = forward_handler(
            State(state.clone()),
            Method::GET,
            "/v1/models".parse().unwrap(),
            HeaderMap::new(),
            Bytes::new(),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);
        assert!(store.snapshot().is_empty());
        drop(response);

        while state.stats.failed.load(Ordering::Relaxed) == 0 {
            assert!(started.elapsed() < Duration::from_secs(5), "relay never ended");
            tokio::task::yield_now().await;
        }
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        assert!(store.snapshot().is_empty());
        assert_eq!(state.stats.forwarded.load(Ordering::Relaxed), 0);
    }

    #[tokio::test]
    async fn rejected_request_never_reaches_upstream() {
        let (state, store, upstream) = state(Defaults::default(), ScriptedUpstream::new(vec![]));
        let response = forward_handler(
            State(state.clone()),
            Method::GET,
            "/backend-api/other".parse().unwrap(),
            HeaderMap::new(),
            Bytes::new(),
        )
        .await;

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert!(response.headers().contains_key("x-correlation-id"));
        tokio::task::yield_now().await;
        assert!(upstream.requests.lock().unwrap().is_empty());
        assert!(store.snapshot().is_empty());
        assert_eq!(state.stats.failed.load(Ordering::Relaxed), 1);
    }
}
