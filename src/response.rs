//! [`StoredResponse`]: an in-memory capture of an upstream HTTP response
//! that can be replayed to many clients.

use std::collections::HashMap;

use bytes::Bytes;
use http::StatusCode;

use crate::error::HandlerError;

/// A case-insensitive, order-preserving multimap of header names to values.
///
/// Keys are normalized to lower case on write; the original case supplied
/// by the caller is preserved in a side table purely so it can be echoed
/// back verbatim on replay (most upstreams and clients do not care, but a
/// faithful reverse proxy should not silently rewrite casing).
#[derive(Debug, Clone, Default)]
pub struct HeaderMultimap {
    display_names: HashMap<String, String>,
    values: HashMap<String, Vec<String>>,
}

impl HeaderMultimap {
    /// Creates an empty header table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a value for `name`, preserving any existing values for the
    /// same (case-insensitive) name.
    pub fn append(&mut self, name: &str, value: impl Into<String>) {
        let key = name.to_ascii_lowercase();
        self.display_names.entry(key.clone()).or_insert_with(|| name.to_string());
        self.values.entry(key).or_default().push(value.into());
    }

    /// Returns the first value for `name`, matched case-insensitively.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.values
            .get(&name.to_ascii_lowercase())
            .and_then(|vals| vals.first())
            .map(String::as_str)
    }

    /// Returns every value for `name`, matched case-insensitively.
    pub fn get_all(&self, name: &str) -> &[String] {
        self.values
            .get(&name.to_ascii_lowercase())
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Removes every value for `name`, matched case-insensitively.
    pub fn remove(&mut self, name: &str) {
        let key = name.to_ascii_lowercase();
        self.values.remove(&key);
        self.display_names.remove(&key);
    }

    /// Returns `true` iff at least one value is stored for `name`.
    pub fn contains(&self, name: &str) -> bool {
        self.values.contains_key(&name.to_ascii_lowercase())
    }

    /// Iterates over `(display_name, value)` pairs in an unspecified but
    /// stable order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.values.iter().flat_map(move |(key, vals)| {
            let display = self.display_names.get(key).map(String::as_str).unwrap_or(key);
            vals.iter().map(move |v| (display, v.as_str()))
        })
    }

    /// Number of distinct header names stored.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// `true` iff no headers are stored.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// A target that response headers, status, and body can be written into.
///
/// Implemented by whatever sits at the edge of the process: the real
/// client connection, or a [`StoredResponse`] acting as the fill target for
/// a cache entry.
pub trait ResponseSink {
    /// Appends a response header. May be called multiple times for the
    /// same name to produce repeated headers.
    fn write_header(&mut self, name: &str, value: &str) -> Result<(), HandlerError>;
    /// Commits the status code. Callers write headers before the status and
    /// the status before the body, matching HTTP wire order.
    fn write_status(&mut self, status: StatusCode) -> Result<(), HandlerError>;
    /// Writes the full response body in one call.
    fn write_body(&mut self, body: Bytes) -> Result<(), HandlerError>;
}

/// An in-memory capture of an upstream HTTP response.
///
/// Created once by a cache fill (or by direct, uncached dispatch) and
/// thereafter immutable: [`StoredResponse::replay`] only reads `self`, so a
/// single instance can be shared behind an `Arc` and replayed concurrently
/// to any number of waiting callers.
#[derive(Debug, Clone, Default)]
pub struct StoredResponse {
    status_code: u16,
    status_text: String,
    headers: HeaderMultimap,
    body: Bytes,
}

impl StoredResponse {
    /// Creates an empty stored response (status `0`, no headers, no body)
    /// ready to be filled.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a minimal stored response carrying just a status code, used
    /// for synthesizing error responses (e.g. the `500` written when a
    /// fill fails).
    pub fn with_status(code: StatusCode) -> Self {
        let mut response = Self::new();
        response.set_status(code);
        response
    }

    /// Sets the status code and derives the reason phrase from the
    /// standard HTTP status text table. Idempotent; the last call before
    /// publication wins.
    pub fn set_status(&mut self, code: StatusCode) {
        self.status_code = code.as_u16();
        self.status_text = code.canonical_reason().unwrap_or("").to_string();
    }

    /// Returns the stored status code.
    pub fn status_code(&self) -> u16 {
        self.status_code
    }

    /// Returns the stored reason phrase.
    pub fn status_text(&self) -> &str {
        &self.status_text
    }

    /// Appends a header, preserving the caller's casing for replay while
    /// matching case-insensitively on read.
    pub fn set_header(&mut self, name: &str, value: impl Into<String>) {
        self.headers.append(name, value);
    }

    /// Read-only access to the accumulated headers.
    pub fn headers(&self) -> &HeaderMultimap {
        &self.headers
    }

    /// Replaces the body outright. Calling this more than once discards
    /// the previous body; responses are not streamed in chunks.
    pub fn write_body(&mut self, body: Bytes) {
        self.body = body;
    }

    /// Read-only access to the body bytes.
    pub fn body(&self) -> &Bytes {
        &self.body
    }

    /// Replays this response into `sink`: headers, then status, then body
    /// if non-empty. Safe to call concurrently from multiple request
    /// handlers since it only reads `self`. Fails only if the sink itself
    /// fails; the caller logs and swallows such failures.
    pub fn replay(&self, sink: &mut dyn ResponseSink) -> Result<(), HandlerError> {
        for (name, value) in self.headers.iter() {
            sink.write_header(name, value)?;
        }
        let status = StatusCode::from_u16(self.status_code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        sink.write_status(status)?;
        if !self.body.is_empty() {
            sink.write_body(self.body.clone())?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_status_derives_reason_phrase() {
        let mut response = StoredResponse::new();
        response.set_status(StatusCode::NOT_FOUND);
        assert_eq!(response.status_code(), 404);
        assert_eq!(response.status_text(), "Not Found");
    }

    #[test]
    fn set_status_is_idempotent_last_writer_wins() {
        let mut response = StoredResponse::new();
        response.set_status(StatusCode::NOT_FOUND);
        response.set_status(StatusCode::OK);
        assert_eq!(response.status_code(), 200);
        assert_eq!(response.status_text(), "OK");
    }

    #[test]
    fn header_lookup_is_case_insensitive_write_case_preserved() {
        let mut response = StoredResponse::new();
        response.set_header("Content-Type", "text/plain");
        assert_eq!(response.headers().get("content-type"), Some("text/plain"));
        assert_eq!(response.headers().get("CONTENT-TYPE"), Some("text/plain"));
        let (display, _) = response.headers().iter().next().unwrap();
        assert_eq!(display, "Content-Type");
    }

    #[test]
    fn write_body_overwrites_not_appends() {
        let mut response = StoredResponse::new();
        response.write_body(Bytes::from_static(b"first"));
        response.write_body(Bytes::from_static(b"second"));
        assert_eq!(response.body(), &Bytes::from_static(b"second"));
    }

    struct RecordingSink {
        headers: Vec<(String, String)>,
        status: Option<StatusCode>,
        body: Option<Bytes>,
    }

    impl ResponseSink for RecordingSink {
        fn write_header(&mut self, name: &str, value: &str) -> Result<(), HandlerError> {
            self.headers.push((name.to_string(), value.to_string()));
            Ok(())
        }
        fn write_status(&mut self, status: StatusCode) -> Result<(), HandlerError> {
            self.status = Some(status);
            Ok(())
        }
        fn write_body(&mut self, body: Bytes) -> Result<(), HandlerError> {
            self.body = Some(body);
            Ok(())
        }
    }

    #[test]
    fn replay_writes_headers_then_status_then_body() {
        let mut response = StoredResponse::new();
        response.set_header("X-Test", "1");
        response.set_status(StatusCode::OK);
        response.write_body(Bytes::from_static(b"hello"));

        let mut sink = RecordingSink { headers: vec![], status: None, body: None };
        response.replay(&mut sink).unwrap();

        assert_eq!(sink.headers, vec![("X-Test".to_string(), "1".to_string())]);
        assert_eq!(sink.status, Some(StatusCode::OK));
        assert_eq!(sink.body, Some(Bytes::from_static(b"hello")));
    }

    #[test]
    fn replay_skips_empty_body() {
        let mut response = StoredResponse::new();
        response.set_status(StatusCode::NO_CONTENT);
        let mut sink = RecordingSink { headers: vec![], status: None, body: None };
        response.replay(&mut sink).unwrap();
        assert_eq!(sink.body, None);
    }

    #[test]
    fn clone_is_a_faithful_deep_copy() {
        let mut response = StoredResponse::new();
        response.set_status(StatusCode::OK);
        response.set_header("X-Test", "1");
        response.write_body(Bytes::from_static(b"hello"));

        let cloned = response.clone();
        assert_eq!(cloned.status_code(), response.status_code());
        assert_eq!(cloned.headers().get("x-test"), response.headers().get("x-test"));
        assert_eq!(cloned.body(), response.body());
    }
}
