//! Form parameters of management requests.

use std::collections::HashMap;

use hyper::header::CONTENT_TYPE;
use hyper::HeaderMap;

/// Decoded `key=value` pairs from the query string and a form body.
#[derive(Debug, Default)]
pub struct Params {
    values: HashMap<String, String>,
}

impl Params {
    /// Merges the query string and an urlencoded body. For a key present in
    /// both, the body value wins; the first occurrence wins within each.
    pub fn parse(query: Option<&str>, body: Option<&[u8]>) -> Self {
        let mut values = HashMap::new();
        for source in [body, query.map(str::as_bytes)].into_iter().flatten() {
            for (key, value) in form_urlencoded::parse(source) {
                values.entry(key.into_owned()).or_insert_with(|| value.into_owned());
            }
        }
        Self { values }
    }

    /// The value for `key`, treating an empty value as absent.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str).filter(|v| !v.is_empty())
    }
}

/// Whether the request carries an `application/x-www-form-urlencoded` body.
pub fn is_form(headers: &HeaderMap) -> bool {
    headers
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(';').next())
        .is_some_and(|v| v.trim().eq_ignore_ascii_case("application/x-www-form-urlencoded"))
}
