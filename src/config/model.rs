//! Serde data structures for the Tapwire configuration file.
//!
//! Contains [`Config`] (the root), [`Route`] and [`Defaults`]. All types
//! derive `Serialize` and `Deserialize` with `deny_unknown_fields` for
//! strict parsing. `routes` is an ordered list: when two patterns
//! normalize to the same path, the later entry wins.

use axum::http::StatusCode;
use serde::{Deserialize, Serialize};

use crate::proxy::routing::RouteTree;

const fn default_no_route_status() -> u16 {
    404
}

fn default_methods() -> Vec<String> {
    ["GET", "POST", "PUT", "DELETE"]
        .iter()
        .map(|m| (*m).to_string())
        .collect()
}

fn default_body_methods() -> Vec<String> {
    vec!["POST".to_string(), "PUT".to_string()]
}

fn is_default_no_route_status(v: &u16) -> bool {
    *v == default_no_route_status()
}

fn is_default_methods(v: &[String]) -> bool {
    v == default_methods().as_slice()
}

fn is_default_body_methods(v: &[String]) -> bool {
    v == default_body_methods().as_slice()
}

fn is_default_defaults(v: &Defaults) -> bool {
    is_default_methods(&v.methods)
        && is_default_body_methods(&v.body_methods)
        && v.timeout.is_none()
        && is_default_no_route_status(&v.no_route_status)
        && v.strip_headers.is_empty()
        && v.tenant_param.is_none()
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default, skip_serializing_if = "is_default_defaults")]
    pub defaults: Defaults,

    pub routes: Vec<Route>,
}

impl Config {
    /// Build the lookup tree in route order.
    #[must_use]
    pub fn route_tree(&self) -> RouteTree<String> {
        RouteTree::build(
            self.routes
                .iter()
                .map(|r| (r.path.as_str(), r.upstream.trim_end_matches('/').to_string())),
        )
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct Route {
    /// `/`-separated pattern; `*` matches any single segment.
    pub path: String,

    /// Base URL the request path is appended to.
    pub upstream: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct Defaults {
    /// Inbound methods the proxy accepts.
    #[serde(
        default = "default_methods",
        skip_serializing_if = "is_default_methods"
    )]
    pub methods: Vec<String>,

    /// Methods whose request body is read, parsed as JSON and forwarded.
    #[serde(
        default = "default_body_methods",
        skip_serializing_if = "is_default_body_methods"
    )]
    pub body_methods: Vec<String>,

    /// Upstream header timeout in milliseconds. Unset means transport defaults.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u64>,

    #[serde(
        default = "default_no_route_status",
        skip_serializing_if = "is_default_no_route_status"
    )]
    pub no_route_status: u16,

    /// Extra headers dropped in both directions.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub strip_headers: Vec<String>,

    /// Query parameter carrying a tenant id. Stripped from the forwarded
    /// query and recorded on the exchange instead.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tenant_param: Option<String>,
}

impl Default for Defaults {
    fn default() -> Self {
        Self {
            methods: default_methods(),
            body_methods: default_body_methods(),
            timeout: None,
            no_route_status: default_no_route_status(),
            strip_headers: Vec::new(),
            tenant_param: None,
        }
    }
}

impl Defaults {
    #[must_use]
    pub fn no_route_status(&self) -> StatusCode {
        StatusCode::from_u16(self.no_route_status).unwrap_or(StatusCode::NOT_FOUND)
    }
}
