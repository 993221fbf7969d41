//! # HTTP Request
//!
//! Transport-neutral request data consumed by the middleware pipeline and
//! the router's parameter binder.
//!
//! The raw request-data providers (query map, JSON body, form fields merged
//! with upload metadata) all hang off [`Request`]; multipart decoding is the
//! host's job, it only hands over [`UploadedFile`] metadata.

use crate::error::{Error, Result};
use http_body_util::BodyExt;
use hyper::body::Bytes;
use hyper::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_LENGTH, CONTENT_TYPE};
use serde::Serialize;
use std::collections::HashMap;

const FORM_CONTENT_TYPE: &str = "application/x-www-form-urlencoded";

/// Metadata describing one uploaded file
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UploadedFile {
    /// Client-supplied file name
    pub name: String,
    /// Declared media type
    #[serde(rename = "type")]
    pub content_type: String,
    /// Where the host stored the bytes
    pub tmp_name: String,
    /// Upload status code reported by the host (0 = ok)
    pub error: u8,
    /// Size in bytes
    pub size: u64,
}

/// HTTP request
///
/// - Path is stored without its query string
/// - Query string is parsed once at construction
/// - Form fields are parsed from the body on access
#[derive(Debug, Clone)]
pub struct Request {
    /// HTTP method, upper-cased
    pub method: String,
    /// Request path (without query string)
    pub path: String,
    /// Raw query string (e.g., "page=1&limit=10")
    query_string: Option<String>,
    /// Parsed query parameters
    query_params: HashMap<String, String>,
    /// Request headers
    headers: HeaderMap,
    /// Request body (collected)
    body: Option<Bytes>,
    /// Uploaded files keyed by form field
    uploads: HashMap<String, UploadedFile>,
}

impl Request {
    /// Create a request from a method and a URI (path plus optional query)
    pub fn new(method: &str, uri: &str) -> Self {
        let (path, query_string) = match uri.split_once('?') {
            Some((p, q)) => (p.to_string(), Some(q.to_string())),
            None => (uri.to_string(), None),
        };

        let query_params = parse_query_string(query_string.as_deref());

        Self {
            method: method.to_ascii_uppercase(),
            path,
            query_string,
            query_params,
            headers: HeaderMap::new(),
            body: None,
            uploads: HashMap::new(),
        }
    }

    /// Attach a body
    #[must_use]
    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// Attach a header
    #[must_use]
    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.set_header(name, value);
        self
    }

    /// Attach a JSON body and its content type
    #[must_use]
    pub fn with_json(self, body: &serde_json::Value) -> Self {
        self.with_header(CONTENT_TYPE.as_str(), "application/json")
            .with_body(body.to_string())
    }

    /// Attach an URL-encoded form body and its content type
    #[must_use]
    pub fn with_form(self, body: &str) -> Self {
        self.with_header(CONTENT_TYPE.as_str(), FORM_CONTENT_TYPE)
            .with_body(body.to_string())
    }

    /// Attach metadata for a file uploaded under `field`
    #[must_use]
    pub fn with_upload(mut self, field: impl Into<String>, file: UploadedFile) -> Self {
        self.uploads.insert(field.into(), file);
        self
    }

    /// Create from hyper request with body size limit
    ///
    /// # Errors
    ///
    /// Returns `Error::PayloadTooLarge` if the declared or actual body size
    /// exceeds `max_body_size`.
    pub async fn from_hyper_with_limit(
        req: hyper::Request<hyper::body::Incoming>,
        max_body_size: usize,
    ) -> Result<Self> {
        let uri = req.uri();
        let mut request = Self::new(
            req.method().as_str(),
            uri.path_and_query().map_or("/", |pq| pq.as_str()),
        );
        request.headers = req.headers().clone();

        let declared = request
            .header(CONTENT_LENGTH.as_str())
            .and_then(|len| len.parse::<usize>().ok());
        if let Some(content_len) = declared {
            if content_len > max_body_size {
                return Err(Error::PayloadTooLarge {
                    limit: max_body_size,
                    actual: content_len,
                });
            }
        }

        let bytes = req.into_body().collect().await?.to_bytes();
        if bytes.len() > max_body_size {
            return Err(Error::PayloadTooLarge {
                limit: max_body_size,
                actual: bytes.len(),
            });
        }
        if !bytes.is_empty() {
            request.body = Some(bytes);
        }

        Ok(request)
    }

    /// Get a header value by name (case-insensitive)
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// Set or override a header
    pub fn set_header(&mut self, name: &str, value: &str) {
        if let (Ok(n), Ok(v)) = (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            self.headers.insert(n, v);
        }
    }

    /// Get all headers as a `HashMap`
    #[must_use]
    pub fn headers_map(&self) -> HashMap<String, String> {
        self.headers
            .iter()
            .filter_map(|(k, v)| {
                v.to_str()
                    .ok()
                    .map(|val| (k.as_str().to_string(), val.to_string()))
            })
            .collect()
    }

    /// Get query parameters
    #[must_use]
    pub const fn query_map(&self) -> &HashMap<String, String> {
        &self.query_params
    }

    /// Get raw query string
    #[must_use]
    pub fn query_string(&self) -> Option<&str> {
        self.query_string.as_deref()
    }

    /// Get the request body as bytes
    #[must_use]
    pub fn body_bytes(&self) -> Option<&[u8]> {
        self.body.as_deref()
    }

    /// Get the request body as string (UTF-8)
    #[must_use]
    pub fn body_str(&self) -> Option<&str> {
        self.body_bytes().and_then(|b| std::str::from_utf8(b).ok())
    }

    /// Posted form fields
    ///
    /// Empty unless the content type is `application/x-www-form-urlencoded`.
    #[must_use]
    pub fn form_fields(&self) -> HashMap<String, String> {
        let is_form = self
            .header(CONTENT_TYPE.as_str())
            .is_some_and(|ct| ct.trim_start().starts_with(FORM_CONTENT_TYPE));
        if is_form {
            parse_query_string(self.body_str())
        } else {
            HashMap::new()
        }
    }

    /// Uploaded file metadata keyed by form field
    #[must_use]
    pub const fn uploads(&self) -> &HashMap<String, UploadedFile> {
        &self.uploads
    }
}

/// Parse query string into `HashMap`
///
/// Handles URL decoding and duplicate keys (last value wins).
fn parse_query_string(query: Option<&str>) -> HashMap<String, String> {
    query
        .map(|q| {
            q.split('&')
                .filter(|pair| !pair.is_empty())
                .map(|pair| {
                    let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
                    (url_decode(key), url_decode(value))
                })
                .collect()
        })
        .unwrap_or_default()
}

/// Percent-decoding with `+` as space; invalid escapes are kept verbatim
fn url_decode(s: &str) -> String {
    let bytes = s.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;

    while i < bytes.len() {
        match bytes[i] {
            b'+' => out.push(b' '),
            b'%' => {
                let decoded = s
                    .get(i + 1..i + 3)
                    .filter(|hex| hex.bytes().all(|b| b.is_ascii_hexdigit()))
                    .and_then(|hex| u8::from_str_radix(hex, 16).ok());
                if let Some(byte) = decoded {
                    out.push(byte);
                    i += 2;
                } else {
                    out.push(b'%');
                }
            }
            b => out.push(b),
        }
        i += 1;
    }

    String::from_utf8_lossy(&out).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_query_string_simple() {
        let result = parse_query_string(Some("page=1&limit=10"));
        assert_eq!(result.get("page"), Some(&"1".to_string()));
        assert_eq!(result.get("limit"), Some(&"10".to_string()));
    }

    #[test]
    fn test_parse_query_string_empty() {
        let result = parse_query_string(None);
        assert!(result.is_empty());
        assert!(parse_query_string(Some("&&")).is_empty());
    }

    #[test]
    fn test_parse_query_string_url_encoded() {
        let result = parse_query_string(Some("name=John+Doe&city=New%20York&flag"));
        assert_eq!(result.get("name"), Some(&"John Doe".to_string()));
        assert_eq!(result.get("city"), Some(&"New York".to_string()));
        assert_eq!(result.get("flag"), Some(&String::new()));
    }

    #[test]
    fn test_url_decode() {
        assert_eq!(url_decode("hello+world"), "hello world");
        assert_eq!(url_decode("hello%20world"), "hello world");
        assert_eq!(url_decode("100%25"), "100%");
        assert_eq!(url_decode("caf%C3%A9"), "café");
        assert_eq!(url_decode("50%"), "50%");
        assert_eq!(url_decode("%zz"), "%zz");
    }

    #[test]
    fn test_new_splits_query() {
        let req = Request::new("get", "/users/42?expand=posts");
        assert_eq!(req.method, "GET");
        assert_eq!(req.path, "/users/42");
        assert_eq!(req.query_string(), Some("expand=posts"));
        assert_eq!(req.query_map().get("expand").map(String::as_str), Some("posts"));
    }

    #[test]
    fn test_headers_are_case_insensitive() {
        let req = Request::new("GET", "/").with_header("X-Request-Id", "abc");
        assert_eq!(req.header("x-request-id"), Some("abc"));
        assert_eq!(req.headers_map().get("x-request-id").map(String::as_str), Some("abc"));
    }

    #[test]
    fn test_form_fields_need_form_content_type() {
        let plain = Request::new("POST", "/").with_body("title=Hi");
        assert!(plain.form_fields().is_empty());

        let form = Request::new("POST", "/").with_form("title=Hi+there&tags=a%2Cb");
        let fields = form.form_fields();
        assert_eq!(fields.get("title").map(String::as_str), Some("Hi there"));
        assert_eq!(fields.get("tags").map(String::as_str), Some("a,b"));
    }

    #[test]
    fn test_json_body_helpers() {
        let req = Request::new("POST", "/").with_json(&serde_json::json!({"a": 1}));
        assert_eq!(req.body_str(), Some(r#"{"a":1}"#));
        assert_eq!(req.header("content-type"), Some("application/json"));
    }
}
