//! Request/response exchange passed through the interceptor.
//!
//! # Responsibilities
//! - Carry the original request head and the destinations chosen for it
//! - Provide a per-request property bag between request and response phases
//! - Record the response head (or a locally generated error) and failed attempts

use axum::body::Bytes;
use axum::http::{Extensions, HeaderMap, Method, StatusCode, Uri};

/// A message whose headers, URI or body may carry a session id.
pub trait Message {
    fn headers(&self) -> &HeaderMap;

    /// The request URI; `None` for responses.
    fn uri(&self) -> Option<&Uri> {
        None
    }

    /// The buffered body, when the transport has one.
    fn body(&self) -> Option<&[u8]> {
        None
    }

    fn is_response(&self) -> bool;
}

/// Head of the inbound request.
#[derive(Debug, Clone)]
pub struct RequestHead {
    pub method: Method,
    pub uri: Uri,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl RequestHead {
    pub fn new(method: Method, uri: Uri, headers: HeaderMap) -> Self {
        Self {
            method,
            uri,
            headers,
            body: Bytes::new(),
        }
    }

    pub fn get(uri: &str) -> Self {
        Self::new(
            Method::GET,
            uri.parse().unwrap_or_else(|_| Uri::from_static("/")),
            HeaderMap::new(),
        )
    }

    pub fn with_body(mut self, body: Bytes) -> Self {
        self.body = body;
        self
    }
}

impl Message for RequestHead {
    fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    fn uri(&self) -> Option<&Uri> {
        Some(&self.uri)
    }

    fn body(&self) -> Option<&[u8]> {
        (!self.body.is_empty()).then_some(&self.body[..])
    }

    fn is_response(&self) -> bool {
        false
    }
}

/// Head of the response, either from a node or generated locally.
#[derive(Debug, Clone)]
pub struct ResponseHead {
    pub status: StatusCode,
    pub headers: HeaderMap,
    /// True when produced by the proxy itself rather than a node.
    pub local: bool,
}

impl ResponseHead {
    pub fn new(status: StatusCode, headers: HeaderMap) -> Self {
        Self {
            status,
            headers,
            local: false,
        }
    }

    pub fn internal_server_error() -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            headers: HeaderMap::new(),
            local: true,
        }
    }

    pub fn bad_gateway() -> Self {
        Self {
            status: StatusCode::BAD_GATEWAY,
            headers: HeaderMap::new(),
            local: true,
        }
    }
}

impl Message for ResponseHead {
    fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    fn is_response(&self) -> bool {
        true
    }
}

/// One proxied request and everything decided about it.
#[derive(Debug)]
pub struct Exchange {
    request: RequestHead,
    destinations: Vec<String>,
    properties: Extensions,
    response: Option<ResponseHead>,
    failed_destinations: Vec<String>,
}

impl Exchange {
    pub fn new(request: RequestHead) -> Self {
        Self {
            request,
            destinations: Vec::new(),
            properties: Extensions::new(),
            response: None,
            failed_destinations: Vec::new(),
        }
    }

    pub fn request(&self) -> &RequestHead {
        &self.request
    }

    /// The request URI as received.
    pub fn original_uri(&self) -> &Uri {
        &self.request.uri
    }

    /// Ordered destinations: primary first, then failover candidates.
    pub fn destinations(&self) -> &[String] {
        &self.destinations
    }

    pub fn destinations_mut(&mut self) -> &mut Vec<String> {
        &mut self.destinations
    }

    pub fn properties(&self) -> &Extensions {
        &self.properties
    }

    pub fn properties_mut(&mut self) -> &mut Extensions {
        &mut self.properties
    }

    pub fn response(&self) -> Option<&ResponseHead> {
        self.response.as_ref()
    }

    pub fn set_response(&mut self, response: ResponseHead) {
        self.response = Some(response);
    }

    /// Record that the transport could not complete a call to `destination`.
    pub fn record_failed_destination(&mut self, destination: impl Into<String>) {
        self.failed_destinations.push(destination.into());
    }

    pub fn failed_destinations(&self) -> &[String] {
        &self.failed_destinations
    }
}
