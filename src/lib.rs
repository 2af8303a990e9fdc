// Connection and stream orchestration over a native HTTP/3 engine
pub mod connection;
pub mod server;
pub mod stream;

// Boundary to the native engine
pub mod engine;

// Wire-level values exchanged with the engine
pub mod frame;
pub mod response;

// Identifier types and per-server lookup tables
pub mod identity;

pub mod error;

// Re-export main types
pub use connection::{Connection, ConnectionInfo};
pub use engine::{EngineEvent, EventSink, NativeEngine, RecordingEngine};
pub use error::{ConfigError, EngineError, Result, ServerError};
pub use frame::{Data, Headers, OutboundFrame};
pub use identity::{ConnectionId, IdentityMap, StreamId};
pub use response::Http3Response;
pub use server::{EngineConfig, Handler, Server, ServerBuilder, ServerConfig, ServerHandle};
pub use stream::{Body, Stream, StreamState};

pub mod prelude {
    pub use crate::connection::{Connection, ConnectionInfo};
    pub use crate::engine::{EngineEvent, EventSink, NativeEngine, RecordingEngine};
    pub use crate::frame::{Data, Headers};
    pub use crate::identity::{ConnectionId, StreamId};
    pub use crate::response::Http3Response;
    pub use crate::server::{EngineConfig, Handler, Server, ServerBuilder, ServerConfig, StreamFn};
    pub use crate::stream::{Body, Stream};
    pub use anyhow::Result;
    pub use async_trait::async_trait;
}
