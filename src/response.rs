// HTTP/3 response types

use bytes::Bytes;
use http::header::{HeaderName, HeaderValue};
use http::{HeaderMap, StatusCode};

use crate::frame::{Headers, STATUS};

/// Structured response returned by a stream handler
#[derive(Debug, Clone)]
pub struct Http3Response {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl Http3Response {
    /// Create a new HTTP/3 response
    pub fn new(status: StatusCode) -> Self {
        Self {
            status,
            headers: HeaderMap::new(),
            body: Bytes::new(),
        }
    }

    /// Create a 200 OK response
    pub fn ok() -> Self {
        Self::new(StatusCode::OK)
    }

    /// Create a 404 Not Found response
    pub fn not_found() -> Self {
        Self::new(StatusCode::NOT_FOUND)
    }

    /// Create a 500 Internal Server Error response
    pub fn internal_server_error() -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR)
    }

    /// 200 OK with a `text/html` body
    pub fn html(body: impl Into<String>) -> Self {
        Self::ok()
            .header(http::header::CONTENT_TYPE, HeaderValue::from_static("text/html"))
            .body(body.into())
    }

    /// Append a header; the same name may be added more than once
    pub fn header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.append(name, value);
        self
    }

    /// Set the response body
    pub fn body<B: Into<Bytes>>(mut self, body: B) -> Self {
        self.body = body.into();
        self
    }

    pub fn has_body(&self) -> bool {
        !self.body.is_empty()
    }

    /// Body decoded as UTF-8, invalid sequences replaced
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    /// Header section for the response HEADERS frame: `:status` plus every
    /// response header. Repeated names are folded into one comma-separated value.
    pub fn to_headers(&self) -> Headers {
        let mut headers = Headers::with_capacity(self.headers.keys_len() + 1);
        headers.insert(STATUS.to_string(), self.status.as_str().to_string());

        for name in self.headers.keys() {
            let joined = self
                .headers
                .get_all(name)
                .iter()
                .map(|value| String::from_utf8_lossy(value.as_bytes()).into_owned())
                .collect::<Vec<_>>()
                .join(", ");
            headers.insert(name.as_str().to_string(), joined);
        }
        headers
    }
}

impl<B: Into<Bytes>> From<http::Response<B>> for Http3Response {
    fn from(response: http::Response<B>) -> Self {
        let (parts, body) = response.into_parts();
        Self {
            status: parts.status,
            headers: parts.headers,
            body: body.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::header::{CONTENT_TYPE, VARY};

    #[test]
    fn headers_frame_carries_status_first_class() {
        let response = Http3Response::html("<h1>Hi</h1>");
        let headers = response.to_headers();

        assert_eq!(headers.len(), 2);
        assert_eq!(headers[":status"], "200");
        assert_eq!(headers["content-type"], "text/html");
        assert_eq!(response.text(), "<h1>Hi</h1>");
    }

    #[test]
    fn repeated_headers_are_joined() {
        let response = Http3Response::not_found()
            .header(VARY, HeaderValue::from_static("accept"))
            .header(VARY, HeaderValue::from_static("origin"));

        let headers = response.to_headers();
        assert_eq!(headers[":status"], "404");
        assert_eq!(headers["vary"], "accept, origin");
        assert!(!response.has_body());
    }

    #[test]
    fn converts_from_http_response() {
        let response = http::Response::builder()
            .status(StatusCode::CREATED)
            .header(CONTENT_TYPE, "application/json")
            .body("{}")
            .unwrap();

        let converted = Http3Response::from(response);
        assert_eq!(converted.status, StatusCode::CREATED);
        assert_eq!(converted.text(), "{}");
        assert_eq!(converted.to_headers()["content-type"], "application/json");
    }
}
