//! Configuration validation with detailed error reporting.
//!
//! The [`validate`] function checks a parsed [`Config`] for structural
//! errors such as empty routes, invalid patterns, malformed upstream URLs
//! and bad HTTP methods. Returns a list of [`ValidationError`] values with
//! per-field suggestions. Duplicate patterns are legal (the later one wins)
//! and are only reported by [`duplicate_patterns`].

use std::collections::HashMap;

use axum::http::{HeaderName, StatusCode};
use url::Url;

use super::model::Config;
use crate::error::ValidationError;
use crate::proxy::routing::segments;

pub const VALID_METHODS: &[&str] = &["GET", "POST", "PUT", "DELETE", "PATCH", "HEAD", "OPTIONS"];

/// Validate a single route pattern. Returns `Ok(())` or a human-readable error.
pub fn validate_path(path: &str) -> Result<(), String> {
    if path.is_empty() {
        return Err("path cannot be empty".into());
    }
    if !path.starts_with('/') {
        return Err(format!("path must start with '/' (did you mean '/{path}'?)"));
    }
    if let Some(bad) = segments(path).find(|s| s.contains('*') && *s != "*") {
        return Err(format!(
            "segment '{bad}' mixes '*' with other characters; '*' must be a whole segment"
        ));
    }
    Ok(())
}

/// Validate an upstream base URL. Returns `Ok(())` or a human-readable error.
pub fn validate_upstream_url(url: &str) -> Result<(), String> {
    match Url::parse(url) {
        Ok(parsed) => {
            let scheme = parsed.scheme();
            if scheme != "http" && scheme != "https" {
                Err(format!(
                    "unsupported scheme '{scheme}' (expected http or https)"
                ))
            } else if parsed.query().is_some() || parsed.fragment().is_some() {
                Err("upstream must not carry a query string or fragment".into())
            } else {
                Ok(())
            }
        }
        Err(_) => Err(format!("'{url}' is not a valid URL")),
    }
}

/// Validate an HTTP method string. Returns `Ok(())` or a human-readable error.
pub fn validate_method(method: &str) -> Result<(), String> {
    let upper = method.to_uppercase();
    if VALID_METHODS.contains(&upper.as_str()) {
        Ok(())
    } else {
        Err(format!("'{method}' is not a valid HTTP method"))
    }
}

pub fn validate(config: &Config) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();
    let defaults = &config.defaults;

    let root_error = |field: &str, message: String| ValidationError {
        route: "(defaults)".into(),
        field: field.into(),
        message,
        suggestion: None,
    };

    if defaults.methods.is_empty() {
        errors.push(root_error(
            "defaults.methods",
            "at least one method must be accepted".into(),
        ));
    }
    for method in &defaults.methods {
        if let Err(msg) = validate_method(method) {
            errors.push(root_error("defaults.methods", msg));
        }
    }
    for method in &defaults.body_methods {
        if let Err(msg) = validate_method(method) {
            errors.push(root_error("defaults.body_methods", msg));
        }
    }
    if StatusCode::from_u16(defaults.no_route_status).is_err() {
        errors.push(root_error(
            "defaults.no_route_status",
            format!("{} is not a valid HTTP status", defaults.no_route_status),
        ));
    }
    if defaults.timeout == Some(0) {
        errors.push(ValidationError {
            suggestion: Some("omit it to rely on transport defaults".into()),
            ..root_error("defaults.timeout", "timeout must be positive".into())
        });
    }
    for name in &defaults.strip_headers {
        if HeaderName::from_bytes(name.trim().as_bytes()).is_err() {
            errors.push(root_error(
                "defaults.strip_headers",
                format!("'{name}' is not a valid header name"),
            ));
        }
    }
    if defaults.tenant_param.as_deref() == Some("") {
        errors.push(root_error(
            "defaults.tenant_param",
            "tenant parameter name cannot be empty".into(),
        ));
    }

    if config.routes.is_empty() {
        errors.push(ValidationError {
            route: "(root)".into(),
            field: "routes".into(),
            message: "at least one route must be defined".into(),
            suggestion: None,
        });
        return Err(errors);
    }

    for (i, route) in config.routes.iter().enumerate() {
        let route_id = if route.path.is_empty() {
            format!("routes[{i}]")
        } else {
            route.path.clone()
        };

        if let Err(msg) = validate_path(&route.path) {
            errors.push(ValidationError {
                route: route_id.clone(),
                field: "path".into(),
                message: msg,
                suggestion: if !route.path.is_empty() && !route.path.starts_with('/') {
                    Some(format!("did you mean '/{}'?", route.path))
                } else {
                    None
                },
            });
        }

        if let Err(msg) = validate_upstream_url(&route.upstream) {
            errors.push(ValidationError {
                route: route_id,
                field: "upstream".into(),
                message: msg,
                suggestion: None,
            });
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

/// Patterns that normalize to the same segments, with the index of the
/// entry that wins.
#[must_use]
pub fn duplicate_patterns(config: &Config) -> Vec<(String, usize)> {
    let mut seen: HashMap<Vec<&str>, usize> = HashMap::new();
    let mut duplicates = Vec::new();
    for (i, route) in config.routes.iter().enumerate() {
        let key: Vec<&str> = segments(&route.path).collect();
        if seen.insert(key, i).is_some() {
            duplicates.push((route.path.clone(), i));
        }
    }
    duplicates
}

#[must_use]
pub fn format_validation_report(path: &str, config: &Config) -> String {
    let mut lines = vec![format!("  {} routes\n", config.routes.len())];

    for route in &config.routes {
        lines.push(format!("  {}  -> {}", route.path, route.upstream));
    }

    for (pattern, winner) in duplicate_patterns(config) {
        lines.push(format!(
            "  note: '{pattern}' repeats an earlier pattern; routes[{winner}] wins"
        ));
    }

    let defaults = &config.defaults;
    lines.push(format!("\n  methods: {}", defaults.methods.join(", ")));
    lines.push(format!("  body methods: {}", defaults.body_methods.join(", ")));
    lines.push(format!(
        "  timeout: {}",
        defaults
            .timeout
            .map_or_else(|| "transport default".to_string(), |t| format!("{t}ms"))
    ));
    lines.push(format!("  no route: {}", defaults.no_route_status));
    if !defaults.strip_headers.is_empty() {
        lines.push(format!("  extra stripped headers: {}", defaults.strip_headers.join(", ")));
    }
    lines.push(format!(
        "  tenant param: {}",
        defaults.tenant_param.as_deref().unwrap_or("none")
    ));

    format!("{} is valid\n{}", path, lines.join("\n"))
}
