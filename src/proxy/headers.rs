//! Header filtering for both relay directions.
//!
//! [`filter_headers`] produces an ordered [`HeaderList`] with every header
//! in an [`ExclusionSet`] removed. The same default set is applied to the
//! inbound request before it goes upstream and to the upstream response
//! before it is relayed to the client. Duplicate header names are kept as
//! separate entries in their original relative order.

use std::sync::LazyLock;

use axum::http::{HeaderMap, HeaderName, HeaderValue};

/// Ordered `(name, value)` pairs. A list rather than a map because the same
/// name may legally appear more than once.
pub type HeaderList = Vec<(HeaderName, HeaderValue)>;

/// Connection-management headers that never cross the proxy.
pub const DEFAULT_EXCLUDED: &[&str] = &[
    "host",
    "content-length",
    "content-encoding",
    "accept-encoding",
    "connection",
    "x-forwarded-for",
    "x-real-ip",
    "alt-svc",
    "keep-alive",
    "transfer-encoding",
    "te",
    "trailer",
    "upgrade",
    "proxy-authorization",
    "proxy-authenticate",
    "proxy-connection",
];

static DEFAULT_SET: LazyLock<ExclusionSet> =
    LazyLock::new(|| ExclusionSet::from_names(DEFAULT_EXCLUDED.iter().copied()));

/// Case-insensitive set of header names to drop.
#[derive(Debug, Clone, Default)]
pub struct ExclusionSet {
    names: Vec<HeaderName>,
}

impl ExclusionSet {
    /// Names that are not valid header names are skipped with a warning.
    pub fn from_names<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut set = Self::default();
        set.extend(names);
        set
    }

    #[must_use]
    pub fn defaults() -> &'static Self {
        &DEFAULT_SET
    }

    /// The default set plus `extra`.
    pub fn with_defaults<I, S>(extra: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut set = DEFAULT_SET.clone();
        set.extend(extra);
        set
    }

    fn extend<I, S>(&mut self, names: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for name in names {
            // HeaderName parsing lowercases, which makes the set case-insensitive
            match HeaderName::from_bytes(name.as_ref().trim().as_bytes()) {
                Ok(parsed) if !self.names.contains(&parsed) => self.names.push(parsed),
                Ok(_) => {}
                Err(_) => {
                    tracing::warn!(header = %name.as_ref(), "invalid header name in exclusion list, skipping");
                }
            }
        }
    }

    #[must_use]
    pub fn contains(&self, name: &HeaderName) -> bool {
        self.names.contains(name)
    }
}

pub fn filter_headers<'a, I>(headers: I, exclude: &ExclusionSet) -> HeaderList
where
    I: IntoIterator<Item = (&'a HeaderName, &'a HeaderValue)>,
{
    headers
        .into_iter()
        .filter(|(name, _)| !exclude.contains(name))
        .map(|(name, value)| (name.clone(), value.clone()))
        .collect()
}

/// Render headers as strings for the exchange log. Non-visible-ASCII values
/// are decoded lossily.
#[must_use]
pub fn to_string_pairs(headers: &HeaderMap) -> Vec<(String, String)> {
    headers
        .iter()
        .map(|(name, value)| {
            let value = value.to_str().map_or_else(
                |_| String::from_utf8_lossy(value.as_bytes()).into_owned(),
                String::from,
            );
            (name.as_str().to_string(), value)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn inbound() -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert("host", "proxy.local".parse().unwrap());
        headers.insert("content-length", "12".parse().unwrap());
        headers.insert("authorization", "Bearer sk-test".parse().unwrap());
        headers.insert("x-forwarded-for", "1.2.3.4".parse().unwrap());
        headers.insert("connection", "keep-alive".parse().unwrap());
        headers.append("accept", "text/event-stream".parse().unwrap());
        headers.append("accept", "application/json".parse().unwrap());
        headers
    }

    #[test]
    fn removes_excluded_and_keeps_order() {
        let headers = inbound();
        let filtered = filter_headers(&headers, &ExclusionSet::with_defaults::<_, &str>([]));
        let names: Vec<&str> = filtered.iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(names, vec!["authorization", "accept", "accept"]);
        assert_eq!(filtered[1].1, "text/event-stream");
        assert_eq!(filtered[2].1, "application/json");
    }

    #[test]
    fn filtering_is_idempotent() {
        let headers = inbound();
        let set = ExclusionSet::with_defaults(["x-custom"]);
        let once = filter_headers(&headers, &set);
        let twice = filter_headers(once.iter().map(|(n, v)| (n, v)), &set);
        assert_eq!(once, twice);
    }

    #[test]
    fn exclusion_is_case_insensitive() {
        let mut headers = HeaderMap::new();
        headers.insert("x-secret", "1".parse().unwrap());
        headers.insert("x-public", "2".parse().unwrap());
        let set = ExclusionSet::from_names(["X-Secret"]);
        let filtered = filter_headers(&headers, &set);
        assert_eq!(filtered.len(), 1);
        assert_eq!(filtered[0].0, "x-public");
    }

    #[test]
    fn response_direction_strips_encoding_and_alt_svc() {
        let mut headers = HeaderMap::new();
        headers.insert("content-type", "text/event-stream".parse().unwrap());
        headers.insert("content-encoding", "gzip".parse().unwrap());
        headers.insert("alt-svc", "h3=\":443\"".parse().unwrap());
        headers.insert("transfer-encoding", "chunked".parse().unwrap());
        let filtered = filter_headers(&headers, ExclusionSet::defaults());
        assert_eq!(filtered.len(), 1);
        assert_eq!(filtered[0].0, "content-type");
    }

    #[test]
    fn invalid_names_are_skipped() {
        let set = ExclusionSet::from_names(["bad header", "x-ok"]);
        assert!(set.contains(&HeaderName::from_static("x-ok")));
    }

    #[test]
    fn string_pairs_preserve_duplicates() {
        let mut headers = HeaderMap::new();
        headers.append("set-cookie", "a=1".parse().unwrap());
        headers.append("set-cookie", "b=2".parse().unwrap());
        let pairs = to_string_pairs(&headers);
        assert_eq!(
            pairs,
            vec![
                ("set-cookie".to_string(), "a=1".to_string()),
                ("set-cookie".to_string(), "b=2".to_string()),
            ]
        );
    }
}
