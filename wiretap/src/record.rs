//! The observed request record handed to the engine by interception layers.

use std::collections::BTreeMap;

/// Raised when a record cannot be built.
#[derive(Debug, thiserror::Error)]
pub enum RecordError {
    /// The record has no URL.
    #[error("observed request is missing a url")]
    MissingUrl,
}

/// An outbound request observed by an interception layer.
///
/// Records are immutable once built. The engine resolves the destination
/// provider during processing via [`with_provider`](Self::with_provider),
/// producing a new record, so interception layers do not need the provider
/// table.
#[derive(Clone, Debug, PartialEq)]
pub struct ObservedRequest {
    url: String,
    method: String,
    user_agent: String,
    response_code: i32,
    payload: Vec<u8>,
    payload_size: u64,
    payload_truncated: bool,
    provider: String,
    interception_module: String,
    context: BTreeMap<String, String>,
    headers: BTreeMap<String, String>,
    error_message: Option<String>,
    created_at_ms: i64,
}

impl ObservedRequest {
    /// Starts building a record for the given URL.
    pub fn builder(url: impl Into<String>) -> ObservedRequestBuilder {
        ObservedRequestBuilder {
            request: ObservedRequest {
                url: url.into(),
                method: "GET".to_owned(),
                user_agent: String::new(),
                response_code: -1,
                payload: Vec::new(),
                payload_size: 0,
                payload_truncated: false,
                provider: String::new(),
                interception_module: String::new(),
                context: BTreeMap::new(),
                headers: BTreeMap::new(),
                error_message: None,
                created_at_ms: 0,
            },
        }
    }

    /// The full request URL.
    pub fn url(&self) -> &str {
        &self.url
    }

    /// The path component of the URL, without the leading slash.
    pub fn path(&self) -> &str {
        self.url
            .split_once("://")
            .and_then(|(_, rest)| rest.split_once('/'))
            .map(|(_, path)| path)
            .unwrap_or("")
    }

    /// The HTTP method.
    pub fn method(&self) -> &str {
        &self.method
    }

    /// The user agent header, empty when unknown.
    pub fn user_agent(&self) -> &str {
        &self.user_agent
    }

    /// The response status code, -1 when unknown.
    pub fn response_code(&self) -> i32 {
        self.response_code
    }

    /// The captured request body, possibly truncated.
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// The body as text, or `None` for binary bodies.
    pub fn payload_text(&self) -> Option<&str> {
        std::str::from_utf8(&self.payload).ok()
    }

    /// The declared body size, which may exceed the captured bytes.
    pub fn payload_size(&self) -> u64 {
        self.payload_size
    }

    /// Whether the captured body was truncated.
    pub fn payload_truncated(&self) -> bool {
        self.payload_truncated
    }

    /// The resolved destination provider, empty when unresolved.
    pub fn provider(&self) -> &str {
        &self.provider
    }

    /// The interception layer that produced this record.
    pub fn interception_module(&self) -> &str {
        &self.interception_module
    }

    /// Free-form context attached at interception time.
    pub fn context(&self) -> &BTreeMap<String, String> {
        &self.context
    }

    /// Captured request headers, keys lowercased.
    pub fn headers(&self) -> &BTreeMap<String, String> {
        &self.headers
    }

    /// The connection error observed for this request, if any.
    pub fn error_message(&self) -> Option<&str> {
        self.error_message.as_deref()
    }

    /// Monotonic creation time in milliseconds, 0 when not stamped yet.
    pub fn created_at_ms(&self) -> i64 {
        self.created_at_ms
    }

    /// Returns the record with its destination provider resolved.
    pub(crate) fn with_provider(mut self, provider: impl Into<String>) -> Self {
        self.provider = provider.into();
        self
    }

    /// Returns the record stamped with a monotonic creation time.
    pub(crate) fn with_created_at(mut self, created_at_ms: i64) -> Self {
        self.created_at_ms = created_at_ms;
        self
    }
}

/// Builder for [`ObservedRequest`].
#[derive(Debug)]
pub struct ObservedRequestBuilder {
    request: ObservedRequest,
}

impl ObservedRequestBuilder {
    /// Sets the HTTP method.
    pub fn method(mut self, method: impl Into<String>) -> Self {
        self.request.method = method.into();
        self
    }

    /// Sets the user agent.
    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.request.user_agent = user_agent.into();
        self
    }

    /// Sets the response status code.
    pub fn response_code(mut self, code: i32) -> Self {
        self.request.response_code = code;
        self
    }

    /// Sets the captured request body.
    ///
    /// Also sets the declared size unless [`payload_size`](Self::payload_size)
    /// was called explicitly.
    pub fn payload(mut self, payload: Vec<u8>) -> Self {
        if self.request.payload_size == 0 {
            self.request.payload_size = payload.len() as u64;
        }
        self.request.payload = payload;
        self
    }

    /// Sets the declared body size.
    pub fn payload_size(mut self, size: u64) -> Self {
        self.request.payload_size = size;
        self
    }

    /// Marks the captured body as truncated.
    pub fn payload_truncated(mut self, truncated: bool) -> Self {
        self.request.payload_truncated = truncated;
        self
    }

    /// Presets the destination provider, skipping provider resolution.
    pub fn provider(mut self, provider: impl Into<String>) -> Self {
        self.request.provider = provider.into();
        self
    }

    /// Names the interception layer producing this record.
    pub fn interception_module(mut self, module: impl Into<String>) -> Self {
        self.request.interception_module = module.into();
        self
    }

    /// Adds a context field.
    pub fn context_field(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.request.context.insert(name.into(), value.into());
        self
    }

    /// Adds a request header, lowercasing the key.
    pub fn header_field(mut self, name: &str, value: impl Into<String>) -> Self {
        self.request.headers.insert(name.to_lowercase(), value.into());
        self
    }

    /// Records a connection error observed for this request.
    pub fn error_message(mut self, message: impl Into<String>) -> Self {
        self.request.error_message = Some(message.into());
        self
    }

    /// Sets the monotonic creation time in milliseconds.
    pub fn created_at_ms(mut self, created_at_ms: i64) -> Self {
        self.request.created_at_ms = created_at_ms;
        self
    }

    /// Validates and finishes the record.
    pub fn finish(self) -> Result<ObservedRequest, RecordError> {
        if self.request.url.is_empty() {
            return Err(RecordError::MissingUrl);
        }
        Ok(self.request)
    }
}
