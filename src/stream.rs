//! HTTP/3 request stream
//!
//! A [`Stream`] is built from the HEADERS frame that opened it. It exposes the
//! request (method, URL, regular headers, streaming body) to the application
//! and offers the send-side operations used to answer it.

use bytes::{Bytes, BytesMut};
use http::header::{HeaderName, HeaderValue};
use http::{HeaderMap, Method, Uri};
use parking_lot::Mutex;
use std::fmt;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::task::{Context, Poll};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::connection::Connection;
use crate::error::Result;
use crate::frame::{self, Data, Headers};
use crate::identity::{ConnectionId, StreamId};
use crate::server::ServerHandle;
use crate::server::config::DEFAULT_PORT;

const DEFAULT_SCHEME: &str = "https";
const DEFAULT_PATH: &str = "/";
const DEFAULT_URL: &str = "https://localhost:4433/";

/// Request/response progress of a stream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    /// Registered, handler not yet invoked
    HeadersPending,
    /// Handler invoked, no terminal DATA frame sent
    Open,
    /// A terminal DATA frame has been sent
    Responded,
}

pub struct Stream {
    id: StreamId,
    connection_id: ConnectionId,
    connection: Weak<Connection>,
    server: ServerHandle,
    method: Method,
    url: String,
    uri: Uri,
    headers: HeaderMap,
    sink: Mutex<Option<mpsc::UnboundedSender<Bytes>>>,
    body: Mutex<Option<Body>>,
    state: Mutex<StreamState>,
    fin_sent: AtomicBool,
}

impl Stream {
    /// Build a stream from the raw header section of its HEADERS frame.
    ///
    /// Missing or malformed pseudo-headers fall back to defaults; this never fails.
    pub fn new(connection: &Arc<Connection>, id: StreamId, raw: &Headers) -> Self {
        let scheme = pseudo_header(raw, frame::SCHEME).unwrap_or(DEFAULT_SCHEME);
        let authority = pseudo_header(raw, frame::AUTHORITY)
            .map(str::to_string)
            .unwrap_or_else(|| format!("localhost:{}", DEFAULT_PORT));
        let path = pseudo_header(raw, frame::PATH).unwrap_or(DEFAULT_PATH);
        let url = format!("{}://{}{}", scheme, authority, path);

        let uri = url.parse::<Uri>().unwrap_or_else(|e| {
            warn!(stream_id = %id, url = %url, error = %e, "Unparseable request URL, using default");
            Uri::from_static(DEFAULT_URL)
        });

        let method = match pseudo_header(raw, frame::METHOD) {
            Some(m) => Method::from_bytes(m.as_bytes()).unwrap_or_else(|_| {
                warn!(stream_id = %id, method = %m, "Invalid method token, treating as GET");
                Method::GET
            }),
            None => Method::GET,
        };

        let headers = regular_headers(&id, raw);

        let (sink, body) = if method == Method::GET || method == Method::HEAD {
            (None, None)
        } else {
            let (tx, rx) = mpsc::unbounded_channel();
            (Some(tx), Some(Body { rx }))
        };

        Self {
            id,
            connection_id: connection.id().clone(),
            connection: Arc::downgrade(connection),
            server: connection.server().clone(),
            method,
            url,
            uri,
            headers,
            sink: Mutex::new(sink),
            body: Mutex::new(body),
            state: Mutex::new(StreamState::HeadersPending),
            fin_sent: AtomicBool::new(false),
        }
    }

    pub fn id(&self) -> &StreamId {
        &self.id
    }

    pub fn connection_id(&self) -> &ConnectionId {
        &self.connection_id
    }

    /// Owning connection, `None` once it has been evicted and dropped
    pub fn connection(&self) -> Option<Arc<Connection>> {
        self.connection.upgrade()
    }

    pub fn server(&self) -> &ServerHandle {
        &self.server
    }

    pub fn protocol(&self) -> &'static str {
        "HTTP/3"
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    /// Request URL exactly as assembled from the pseudo-headers
    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn uri(&self) -> &Uri {
        &self.uri
    }

    /// Regular request headers; pseudo-headers are never present here
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn state(&self) -> StreamState {
        *self.state.lock()
    }

    pub(crate) fn set_state(&self, state: StreamState) {
        *self.state.lock() = state;
    }

    /// True while the body sink is attached and not yet closed by `Data::Fin`
    pub fn has_body_sink(&self) -> bool {
        self.sink.lock().is_some()
    }

    pub fn is_finished(&self) -> bool {
        self.fin_sent.load(Ordering::Acquire)
    }

    /// Take the request body reader. `None` for GET/HEAD or if already taken.
    pub fn take_body(&self) -> Option<Body> {
        self.body.lock().take()
    }

    /// Merge header fragments (later ones win) and send them as one HEADERS frame
    pub fn send_headers<I>(&self, fragments: I) -> Result<()>
    where
        I: IntoIterator<Item = Headers>,
    {
        let server = self.server.server()?;
        server.send_headers_frame(&self.id, &frame::merge_headers(fragments))
    }

    /// Send data items in order. `Data::Fin` closes the body sink and emits an
    /// empty final DATA frame; empty byte payloads are skipped.
    ///
    /// Nothing stops a caller from sending more data after `Fin`.
    pub fn send_data<I>(&self, items: I) -> Result<()>
    where
        I: IntoIterator<Item = Data>,
    {
        let server = self.server.server()?;

        for item in items {
            match item {
                Data::Fin => {
                    if self.fin_sent.swap(true, Ordering::AcqRel) {
                        warn!(stream_id = %self.id, "FIN sent more than once");
                    }
                    self.sink.lock().take();
                    server.send_data_frame(&self.id, Data::Fin)?;
                    self.set_state(StreamState::Responded);
                }
                Data::Bytes(bytes) if bytes.is_empty() => {}
                Data::Bytes(bytes) => {
                    if self.is_finished() {
                        warn!(stream_id = %self.id, len = bytes.len(), "DATA sent after FIN");
                    }
                    self.write_sink(bytes.clone());
                    server.send_data_frame(&self.id, Data::Bytes(bytes))?;
                }
            }
        }
        Ok(())
    }

    /// Append an inbound DATA payload to the request body
    pub(crate) fn push_body(&self, bytes: Bytes) {
        if !self.write_sink(bytes) {
            debug!(stream_id = %self.id, method = %self.method, "No body sink, dropping DATA payload");
        }
    }

    fn write_sink(&self, bytes: Bytes) -> bool {
        match self.sink.lock().as_ref() {
            Some(tx) => tx.send(bytes).is_ok(),
            None => false,
        }
    }
}

impl fmt::Debug for Stream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Http3Stream")
            .field("id", &self.id)
            .field("connection_id", &self.connection_id)
            .field("method", &self.method)
            .field("url", &self.url)
            .field("headers", &self.headers)
            .field("state", &self.state())
            .finish()
    }
}

/// A pseudo-header value, with an empty value treated as absent
fn pseudo_header<'a>(raw: &'a Headers, name: &str) -> Option<&'a str> {
    raw.get(name).map(String::as_str).filter(|value| !value.is_empty())
}

fn regular_headers(stream_id: &StreamId, raw: &Headers) -> HeaderMap {
    let mut headers = HeaderMap::with_capacity(raw.len());
    for (name, value) in raw.iter().filter(|(name, _)| !frame::is_pseudo_header(name)) {
        match (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            (Ok(name), Ok(value)) => {
                headers.append(name, value);
            }
            _ => warn!(stream_id = %stream_id, header = %name, "Skipping invalid request header"),
        }
    }
    headers
}

/// Streaming request body fed by inbound DATA frames.
///
/// The body ends once the stream's sink is closed by sending `Data::Fin`.
#[derive(Debug)]
pub struct Body {
    rx: mpsc::UnboundedReceiver<Bytes>,
}

impl Body {
    /// Next chunk, or `None` once the sink is closed and drained
    pub async fn chunk(&mut self) -> Option<Bytes> {
        self.rx.recv().await
    }

    /// Chunk already buffered, without waiting
    pub fn try_chunk(&mut self) -> Option<Bytes> {
        self.rx.try_recv().ok()
    }

    pub async fn to_bytes(mut self) -> Bytes {
        let mut collected = BytesMut::new();
        while let Some(chunk) = self.rx.recv().await {
            collected.extend_from_slice(&chunk);
        }
        collected.freeze()
    }

    pub async fn text(self) -> String {
        String::from_utf8_lossy(&self.to_bytes().await).into_owned()
    }
}

impl futures::Stream for Body {
    type Item = Bytes;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Bytes>> {
        self.get_mut().rx.poll_recv(cx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::ConnectionInfo;

    fn connection() -> Arc<Connection> {
        Arc::new(Connection::new(
            ServerHandle::detached(),
            ConnectionId::from("c1"),
            ConnectionInfo::default(),
        ))
    }

    fn headers(pairs: &[(&str, &str)]) -> Headers {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn derives_request_from_pseudo_headers() {
        let conn = connection();
        let raw = headers(&[
            (":method", "POST"),
            (":scheme", "https"),
            (":authority", "example.com"),
            (":path", "/x"),
            ("content-type", "text/plain"),
        ]);
        let stream = Stream::new(&conn, StreamId::from("0"), &raw);

        assert_eq!(stream.url(), "https://example.com/x");
        assert_eq!(stream.uri().host(), Some("example.com"));
        assert_eq!(stream.method(), Method::POST);
        assert_eq!(stream.headers().len(), 1);
        assert_eq!(stream.headers()["content-type"], "text/plain");
        assert!(stream.headers().keys().all(|k| !k.as_str().starts_with(':')));
        assert_eq!(stream.protocol(), "HTTP/3");
        assert_eq!(stream.state(), StreamState::HeadersPending);
    }

    #[test]
    fn missing_pseudo_headers_fall_back_to_defaults() {
        let conn = connection();
        let stream = Stream::new(&conn, StreamId::from("0"), &Headers::new());

        assert_eq!(stream.url(), "https://localhost:4433/");
        assert_eq!(stream.method(), Method::GET);
        assert!(stream.headers().is_empty());
    }

    #[test]
    fn empty_pseudo_headers_count_as_missing() {
        let conn = connection();
        let raw = headers(&[(":scheme", ""), (":authority", ""), (":path", ""), (":method", "")]);
        let stream = Stream::new(&conn, StreamId::from("0"), &raw);

        assert_eq!(stream.url(), "https://localhost:4433/");
        assert_eq!(stream.uri().to_string(), stream.url());
        assert_eq!(stream.uri().port_u16(), Some(4433));
        assert_eq!(stream.method(), Method::GET);
    }

    #[test]
    fn unparseable_url_keeps_default_port_in_uri() {
        let conn = connection();
        let raw = headers(&[(":authority", "bad host"), (":path", "/x")]);
        let stream = Stream::new(&conn, StreamId::from("0"), &raw);

        assert_eq!(stream.url(), "https://bad host/x");
        assert_eq!(stream.uri().to_string(), "https://localhost:4433/");
    }

    #[test]
    fn invalid_header_names_are_skipped() {
        let conn = connection();
        let raw = headers(&[("bad header", "x"), ("accept", "*/*")]);
        let stream = Stream::new(&conn, StreamId::from("0"), &raw);

        assert_eq!(stream.headers().len(), 1);
        assert_eq!(stream.headers()["accept"], "*/*");
    }

    #[test]
    fn get_and_head_have_no_body_sink() {
        let conn = connection();
        for method in ["GET", "HEAD"] {
            let stream = Stream::new(&conn, StreamId::from("0"), &headers(&[(":method", method)]));
            assert!(!stream.has_body_sink(), "{} should not carry a body", method);
            assert!(stream.take_body().is_none());
        }
    }

    #[tokio::test]
    async fn other_methods_stream_inbound_data_into_body() {
        let conn = connection();
        for method in ["POST", "PUT", "PATCH", "DELETE", "OPTIONS"] {
            let stream = Stream::new(&conn, StreamId::from("4"), &headers(&[(":method", method)]));
            assert!(stream.has_body_sink(), "{} should carry a body", method);

            let mut body = stream.take_body().unwrap();
            stream.push_body(Bytes::from_static(b"part one, "));
            stream.push_body(Bytes::from_static(b"part two"));

            assert_eq!(body.chunk().await.unwrap(), "part one, ");
            assert_eq!(body.try_chunk().unwrap(), "part two");
            assert!(body.try_chunk().is_none());
        }
    }

    #[test]
    fn sends_fail_once_server_is_gone() {
        let conn = connection();
        let stream = Stream::new(&conn, StreamId::from("0"), &Headers::new());
        assert!(stream.send_data([Data::Fin]).is_err());
        assert!(stream.send_headers([Headers::new()]).is_err());
    }

    #[test]
    fn stream_outlives_evicted_connection() {
        let conn = connection();
        let stream = Stream::new(&conn, StreamId::from("0"), &Headers::new());
        assert!(stream.connection().is_some());
        drop(conn);
        assert!(stream.connection().is_none());
        assert_eq!(stream.connection_id().as_str(), "c1");
    }
}
