//! Boundary to the native HTTP/3 engine
//!
//! The engine owns QUIC, TLS and HTTP/3 framing. This crate only sees the
//! events it reports (connection established, HEADERS and DATA received) and
//! the handful of commands it accepts. Events travel over an unbounded channel
//! so the engine's callback threads never block on application code.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::warn;

use crate::error::EngineError;
use crate::frame::Headers;
use crate::identity::{ConnectionId, StreamId};
use crate::server::config::EngineConfig;

pub mod recording;

pub use recording::RecordingEngine;

/// Invoked by the engine once it has fully shut down
pub type StopCallback = Box<dyn FnOnce() + Send + 'static>;

/// Command surface of the native engine.
pub trait NativeEngine: Send + Sync {
    /// Register where the engine should deliver its events
    fn subscribe(&self, sink: EventSink);

    fn send_headers_frame(&self, stream_id: &StreamId, headers: &Headers) -> Result<(), EngineError>;

    /// `data` is `None` only for an empty final frame
    fn send_data_frame(
        &self,
        stream_id: &StreamId,
        data: Option<Bytes>,
        fin: bool,
    ) -> Result<(), EngineError>;

    fn start(&self, config: &EngineConfig) -> Result<(), EngineError>;

    /// Begin shutdown. `on_stopped` fires once the engine has stopped; an
    /// `Err` means shutdown could not even be requested.
    fn stop(&self, on_stopped: StopCallback) -> Result<(), EngineError>;
}

/// Events reported by the engine
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum EngineEvent {
    ConnectionReceived {
        connection_id: ConnectionId,
        version: String,
        alpn: String,
        remote_address: String,
        remote_port: u16,
    },
    HeadersFrameReceived {
        stream_id: StreamId,
        connection_id: ConnectionId,
        headers: Headers,
    },
    DataFrameReceived {
        stream_id: StreamId,
        connection_id: ConnectionId,
        #[serde(with = "crate::frame::payload")]
        data: Bytes,
    },
}

impl EngineEvent {
    pub fn connection_id(&self) -> &ConnectionId {
        match self {
            EngineEvent::ConnectionReceived { connection_id, .. }
            | EngineEvent::HeadersFrameReceived { connection_id, .. }
            | EngineEvent::DataFrameReceived { connection_id, .. } => connection_id,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            EngineEvent::ConnectionReceived { .. } => "connection_received",
            EngineEvent::HeadersFrameReceived { .. } => "headers_frame_received",
            EngineEvent::DataFrameReceived { .. } => "data_frame_received",
        }
    }
}

/// Engine-side handle for delivering events to a server.
///
/// Every method returns `false` once the server side has gone away.
#[derive(Debug, Clone)]
pub struct EventSink {
    tx: mpsc::UnboundedSender<EngineEvent>,
}

impl EventSink {
    pub(crate) fn channel() -> (Self, mpsc::UnboundedReceiver<EngineEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    pub fn emit(&self, event: EngineEvent) -> bool {
        match self.tx.send(event) {
            Ok(()) => true,
            Err(mpsc::error::SendError(event)) => {
                warn!(event = event.name(), connection_id = %event.connection_id(), "Dropping engine event, server is gone");
                false
            }
        }
    }

    pub fn connection_received(
        &self,
        connection_id: impl Into<ConnectionId>,
        version: impl Into<String>,
        alpn: impl Into<String>,
        remote_address: impl Into<String>,
        remote_port: u16,
    ) -> bool {
        self.emit(EngineEvent::ConnectionReceived {
            connection_id: connection_id.into(),
            version: version.into(),
            alpn: alpn.into(),
            remote_address: remote_address.into(),
            remote_port,
        })
    }

    pub fn headers_frame_received(
        &self,
        stream_id: impl Into<StreamId>,
        connection_id: impl Into<ConnectionId>,
        headers: Headers,
    ) -> bool {
        self.emit(EngineEvent::HeadersFrameReceived {
            stream_id: stream_id.into(),
            connection_id: connection_id.into(),
            headers,
        })
    }

    pub fn data_frame_received(
        &self,
        stream_id: impl Into<StreamId>,
        connection_id: impl Into<ConnectionId>,
        data: impl Into<Bytes>,
    ) -> bool {
        self.emit(EngineEvent::DataFrameReceived {
            stream_id: stream_id.into(),
            connection_id: connection_id.into(),
            data: data.into(),
        })
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn sink_delivers_events_in_order() {
        let (sink, mut rx) = EventSink::channel();
        assert!(sink.connection_received("c1", "1", "h3", "127.0.0.1", 50000));
        assert!(sink.data_frame_received("0", "c1", &b"abc"[..]));

        let first = rx.recv().await.unwrap();
        assert_eq!(first.name(), "connection_received");
        assert_eq!(first.connection_id().as_str(), "c1");

        match rx.recv().await.unwrap() {
            EngineEvent::DataFrameReceived { data, .. } => assert_eq!(&data[..], b"abc"),
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[test]
    fn sink_reports_closed_receiver() {
        let (sink, rx) = EventSink::channel();
        drop(rx);
        assert!(sink.is_closed());
        assert!(!sink.headers_frame_received("0", "c1", Headers::new()));
    }

    #[test]
    fn events_parse_from_json_lines() {
        let line = r#"{"event":"data_frame_received","stream_id":"0","connection_id":"c1","data":"hello"}"#;
        let event: EngineEvent = serde_json::from_str(line).unwrap();
        assert_eq!(
            event,
            EngineEvent::DataFrameReceived {
                stream_id: StreamId::from("0"),
                connection_id: ConnectionId::from("c1"),
                data: Bytes::from_static(b"hello"),
            }
        );
    }
}
