//! The per-request view that access-log directives read from.
//!
//! Every accessor that may be absent returns `Option`; the evaluator turns a
//! `None` into the directive's placeholder, so implementations never have to
//! invent values.

use http::{HeaderMap, HeaderValue};
use std::borrow::Cow;
use std::collections::HashMap;

/// A single request cookie.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cookie {
    pub name: String,
    pub value: String,
}

impl Cookie {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// The HTTP session bound to a request, if any.
#[derive(Debug, Clone, Default)]
pub struct Session {
    pub id: String,
    pub attributes: HashMap<String, String>,
}

impl Session {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            attributes: HashMap::new(),
        }
    }

    pub fn with_attribute(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(name.into(), value.into());
        self
    }
}

/// Read-only request/response fields consumed by the access-log evaluator.
pub trait RecordContext {
    fn remote_addr(&self) -> Option<&str>;
    /// Resolved client host name; `None` when no lookup was made.
    fn remote_host(&self) -> Option<&str>;
    fn local_addr(&self) -> Option<&str>;
    fn local_port(&self) -> Option<u16>;
    fn server_name(&self) -> Option<&str>;
    fn protocol(&self) -> Option<&str>;
    fn method(&self) -> Option<&str>;
    fn request_uri(&self) -> Option<&str>;
    fn query_string(&self) -> Option<&str>;
    fn status(&self) -> Option<u16>;
    /// Body bytes written to the client. Zero or negative means none.
    fn bytes_sent(&self) -> i64;
    fn remote_user(&self) -> Option<&str>;
    fn session_id(&self) -> Option<&str>;
    fn session_attribute(&self, name: &str) -> Option<&str>;
    fn request_attribute(&self, name: &str) -> Option<&str>;
    /// Header values are decoded lossily: bytes outside UTF-8 become U+FFFD.
    fn header(&self, name: &str) -> Option<Cow<'_, str>>;
    /// All values of a response header, in insertion order.
    fn response_header_values(&self, name: &str) -> Vec<Cow<'_, str>>;
    fn cookies(&self) -> &[Cookie];

    /// Name of the worker thread that served the request.
    fn thread_name(&self) -> Option<&str> {
        None
    }
}

/// Owned `RecordContext` built by the request pipeline.
#[derive(Debug, Clone, Default)]
pub struct AccessRecord {
    pub remote_addr: Option<String>,
    pub remote_host: Option<String>,
    pub local_addr: Option<String>,
    pub local_port: Option<u16>,
    pub server_name: Option<String>,
    pub protocol: Option<String>,
    pub method: Option<String>,
    pub request_uri: Option<String>,
    pub query_string: Option<String>,
    pub status: Option<u16>,
    pub bytes_sent: i64,
    pub remote_user: Option<String>,
    pub thread_name: Option<String>,
    pub request_headers: HeaderMap,
    pub response_headers: HeaderMap,
    pub cookies: Vec<Cookie>,
    pub attributes: HashMap<String, String>,
    pub session: Option<Session>,
}

impl AccessRecord {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_remote_addr(mut self, addr: impl Into<String>) -> Self {
        self.remote_addr = Some(addr.into());
        self
    }

    pub fn with_remote_host(mut self, host: impl Into<String>) -> Self {
        self.remote_host = Some(host.into());
        self
    }

    /// Sets method, URI and protocol in one go.
    pub fn with_request(
        mut self,
        method: impl Into<String>,
        uri: impl Into<String>,
        protocol: impl Into<String>,
    ) -> Self {
        self.method = Some(method.into());
        self.request_uri = Some(uri.into());
        self.protocol = Some(protocol.into());
        self
    }

    pub fn with_query(mut self, query: impl Into<String>) -> Self {
        self.query_string = Some(query.into());
        self
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_bytes_sent(mut self, bytes: i64) -> Self {
        self.bytes_sent = bytes;
        self
    }

    pub fn with_cookie(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.cookies.push(Cookie::new(name, value));
        self
    }

    pub fn with_attribute(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(name.into(), value.into());
        self
    }

    pub fn with_session(mut self, session: Session) -> Self {
        self.session = Some(session);
        self
    }
}

fn header_text(value: &HeaderValue) -> Cow<'_, str> {
    String::from_utf8_lossy(value.as_bytes())
}

impl RecordContext for AccessRecord {
    fn remote_addr(&self) -> Option<&str> {
        self.remote_addr.as_deref()
    }

    fn remote_host(&self) -> Option<&str> {
        self.remote_host.as_deref()
    }

    fn local_addr(&self) -> Option<&str> {
        self.local_addr.as_deref()
    }

    fn local_port(&self) -> Option<u16> {
        self.local_port
    }

    fn server_name(&self) -> Option<&str> {
        self.server_name.as_deref()
    }

    fn protocol(&self) -> Option<&str> {
        self.protocol.as_deref()
    }

    fn method(&self) -> Option<&str> {
        self.method.as_deref()
    }

    fn request_uri(&self) -> Option<&str> {
        self.request_uri.as_deref()
    }

    fn query_string(&self) -> Option<&str> {
        self.query_string.as_deref()
    }

    fn status(&self) -> Option<u16> {
        self.status
    }

    fn bytes_sent(&self) -> i64 {
        self.bytes_sent
    }

    fn remote_user(&self) -> Option<&str> {
        self.remote_user.as_deref()
    }

    fn session_id(&self) -> Option<&str> {
        self.session.as_ref().map(|s| s.id.as_str())
    }

    fn session_attribute(&self, name: &str) -> Option<&str> {
        self.session
            .as_ref()
            .and_then(|s| s.attributes.get(name))
            .map(String::as_str)
    }

    fn request_attribute(&self, name: &str) -> Option<&str> {
        self.attributes.get(name).map(String::as_str)
    }

    fn header(&self, name: &str) -> Option<Cow<'_, str>> {
        self.request_headers.get(name).map(header_text)
    }

    fn response_header_values(&self, name: &str) -> Vec<Cow<'_, str>> {
        self.response_headers.get_all(name).iter().map(header_text).collect()
    }

    fn cookies(&self) -> &[Cookie] {
        &self.cookies
    }

    fn thread_name(&self) -> Option<&str> {
        self.thread_name.as_deref()
    }
}
