use bytes::Bytes;
use futures::stream::{FuturesUnordered, StreamExt};
use parking_lot::{Mutex, RwLock};
use std::fmt;
use std::sync::{Arc, Weak};
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, error, info};

use crate::connection::{Connection, ConnectionInfo};
use crate::engine::{EngineEvent, EventSink, NativeEngine};
use crate::error::{EngineError, Result, ServerError};
use crate::frame::{Data, Headers};
use crate::identity::{ConnectionId, IdentityMap, StreamId};
use crate::response::Http3Response;
use crate::stream::{Stream, StreamState};

pub mod builder;
pub mod config;
pub mod handler;

pub use builder::ServerBuilder;
pub use config::{EngineConfig, ServerConfig};
pub use handler::{Handler, NoopHandler, StreamFn};

/// HTTP/3 server orchestrating connections and streams on top of a native engine.
///
/// Cloning is cheap; all clones share the same connection table and handler.
#[derive(Clone)]
pub struct Server {
    shared: Arc<Shared>,
}

struct Shared {
    engine: Arc<dyn NativeEngine>,
    connections: IdentityMap<ConnectionId, Connection>,
    handler: RwLock<Arc<dyn Handler>>,
    events: Mutex<Option<mpsc::UnboundedReceiver<EngineEvent>>>,
    shutdown: watch::Sender<bool>,
}

/// Non-owning reference to a server, held by connections, streams and maps
#[derive(Clone, Default)]
pub struct ServerHandle {
    shared: Weak<Shared>,
}

impl ServerHandle {
    /// A handle that refers to no server
    pub fn detached() -> Self {
        Self::default()
    }

    pub fn upgrade(&self) -> Option<Server> {
        self.shared.upgrade().map(|shared| Server { shared })
    }

    pub(crate) fn server(&self) -> Result<Server> {
        self.upgrade().ok_or(ServerError::ServerDropped)
    }
}

impl fmt::Debug for ServerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerHandle")
            .field("alive", &(self.shared.strong_count() > 0))
            .finish()
    }
}

impl Server {
    /// Create a new server builder
    pub fn builder() -> ServerBuilder {
        ServerBuilder::new()
    }

    /// Create a server and subscribe it to the engine's events
    pub fn new(engine: Arc<dyn NativeEngine>) -> Self {
        Self::new_with_handler(engine, Arc::new(NoopHandler))
    }

    pub fn new_with_handler(engine: Arc<dyn NativeEngine>, handler: Arc<dyn Handler>) -> Self {
        let (sink, events) = EventSink::channel();
        let (shutdown, _) = watch::channel(false);

        let shared = Arc::new_cyclic(|weak| Shared {
            engine: Arc::clone(&engine),
            connections: IdentityMap::new("Connection", ServerHandle { shared: weak.clone() }),
            handler: RwLock::new(handler),
            events: Mutex::new(Some(events)),
            shutdown,
        });

        engine.subscribe(sink);
        Self { shared }
    }

    pub fn downgrade(&self) -> ServerHandle {
        ServerHandle {
            shared: Arc::downgrade(&self.shared),
        }
    }

    /// Connections belonging to this server indexed by connection ID
    pub fn connections(&self) -> &IdentityMap<ConnectionId, Connection> {
        &self.shared.connections
    }

    /// Replace the application handler. The previous one is dropped, not merged.
    pub fn handle(&self, handler: Arc<dyn Handler>) {
        *self.shared.handler.write() = handler;
    }

    fn handler(&self) -> Arc<dyn Handler> {
        Arc::clone(&self.shared.handler.read())
    }

    /// Remove a connection and its stream table. Nothing calls this
    /// automatically; the engine reports no connection-closed event.
    pub fn evict_connection(&self, connection_id: &ConnectionId) -> Option<Arc<Connection>> {
        let evicted = self.shared.connections.delete(connection_id);
        if let Some(connection) = &evicted {
            debug!(
                connection_id = %connection_id,
                streams = connection.streams().len(),
                "Connection evicted"
            );
        }
        evicted
    }

    /// Start the native engine. The configuration is passed through as is;
    /// see [`EngineConfig::validate`].
    pub fn start(&self, config: &EngineConfig) -> Result<()> {
        self.shared.engine.start(config)?;
        info!("🚀 HTTP/3 server starting on port {}", config.port);
        Ok(())
    }

    /// Stop the native engine gracefully.
    ///
    /// Resolves once the engine reports that it has stopped. Ends the dispatch
    /// loop started by [`Server::run`].
    pub async fn stop(&self) -> Result<()> {
        let (stopped_tx, stopped_rx) = oneshot::channel();
        self.shared
            .engine
            .stop(Box::new(move || {
                let _ = stopped_tx.send(());
            }))
            .map_err(ServerError::Stop)?;

        stopped_rx.await.map_err(|_| {
            ServerError::Stop(EngineError::Failed(
                "engine dropped the stop callback without calling it".to_string(),
            ))
        })?;

        self.shared.shutdown.send_replace(true);
        info!("Server stopped");
        Ok(())
    }

    /// Drive engine events until the engine closes the event channel or
    /// [`Server::stop`] completes, then wait for events already being
    /// dispatched to finish.
    ///
    /// All events are processed on the calling task. Handlers for different
    /// streams interleave at their await points; a failing event is logged and
    /// does not affect the others.
    pub async fn run(&self) -> Result<()> {
        let mut events = self
            .shared
            .events
            .lock()
            .take()
            .ok_or(ServerError::AlreadyRunning)?;
        let mut shutdown = self.shared.shutdown.subscribe();
        let already_stopped = *shutdown.borrow_and_update();
        if already_stopped {
            return Ok(());
        }

        let mut in_flight = FuturesUnordered::new();
        info!("📡 Dispatch loop running");

        loop {
            tokio::select! {
                biased;

                Some((event, result)) = in_flight.next(), if !in_flight.is_empty() => {
                    if let Err(e) = result {
                        log_event_failure(event, &e);
                    }
                }

                event = events.recv() => match event {
                    Some(event) => {
                        let server = self.clone();
                        in_flight.push(async move {
                            let name = event.name();
                            (name, server.dispatch(event).await)
                        });
                    }
                    None => {
                        debug!("Engine closed the event channel");
                        break;
                    }
                },

                _ = shutdown.changed() => break,
            }
        }

        // Handlers already started run to completion; only new events stop.
        if !in_flight.is_empty() {
            debug!(pending = in_flight.len(), "Draining in-flight events");
        }
        while let Some((event, result)) = in_flight.next().await {
            if let Err(e) = result {
                log_event_failure(event, &e);
            }
        }
        Ok(())
    }

    /// Route one engine event to its handler
    pub async fn dispatch(&self, event: EngineEvent) -> Result<()> {
        match event {
            EngineEvent::ConnectionReceived {
                connection_id,
                version,
                alpn,
                remote_address,
                remote_port,
            } => self
                .on_connection_received(
                    connection_id,
                    ConnectionInfo {
                        version,
                        alpn,
                        remote_address,
                        remote_port,
                    },
                )
                .map(|_| ()),
            EngineEvent::HeadersFrameReceived {
                stream_id,
                connection_id,
                headers,
            } => {
                self.on_headers_frame_received(stream_id, &connection_id, headers)
                    .await
            }
            EngineEvent::DataFrameReceived {
                stream_id,
                connection_id,
                data,
            } => self.on_data_frame_received(&stream_id, &connection_id, data),
        }
    }

    /// Register a newly established connection
    pub fn on_connection_received(
        &self,
        connection_id: ConnectionId,
        info: ConnectionInfo,
    ) -> Result<Arc<Connection>> {
        let connections = &self.shared.connections;
        if connections.has(&connection_id) {
            return Err(ServerError::DuplicateConnection(connection_id));
        }

        info!(
            connection_id = %connection_id,
            version = %info.version,
            alpn = %info.alpn,
            remote_address = %info.remote_address,
            remote_port = info.remote_port,
            "🔗 Connection established"
        );

        let connection = Arc::new(Connection::new(self.downgrade(), connection_id.clone(), info));
        connections.set(connection_id, Arc::clone(&connection));
        Ok(connection)
    }

    /// Open a request stream and run the application handlers for it
    pub async fn on_headers_frame_received(
        &self,
        stream_id: StreamId,
        connection_id: &ConnectionId,
        headers: Headers,
    ) -> Result<()> {
        let connection = self.shared.connections.get(connection_id)?;

        let handler = self.handler();
        connection
            .ensure_setup(|| {
                let connection = Arc::clone(&connection);
                async move {
                    debug!(connection_id = %connection.id(), "Running connection handler");
                    handler.connection(connection).await.map_err(ServerError::Handler)
                }
            })
            .await?;

        if connection.streams().has(&stream_id) {
            return Err(ServerError::DuplicateStream {
                connection_id: connection_id.clone(),
                stream_id,
            });
        }

        let stream = Arc::new(Stream::new(&connection, stream_id.clone(), &headers));
        connection.streams().set(stream_id.clone(), Arc::clone(&stream));
        debug!(
            connection_id = %connection_id,
            stream_id = %stream_id,
            method = %stream.method(),
            url = %stream.url(),
            "Request stream opened"
        );

        stream.set_state(StreamState::Open);
        let response = self
            .handler()
            .stream(Arc::clone(&stream))
            .await
            .map_err(ServerError::Handler)?;

        if let Some(response) = response {
            self.send_response(&stream, response)?;
        }
        Ok(())
    }

    /// Append an inbound DATA payload to its stream's request body
    pub fn on_data_frame_received(
        &self,
        stream_id: &StreamId,
        connection_id: &ConnectionId,
        data: Bytes,
    ) -> Result<()> {
        let connection = self.shared.connections.get(connection_id)?;
        let stream = connection.streams().get(stream_id)?;

        debug!(connection_id = %connection_id, stream_id = %stream_id, len = data.len(), "DATA frame received");
        stream.push_body(data);
        Ok(())
    }

    /// Send a response as one HEADERS frame followed by one final DATA frame
    fn send_response(&self, stream: &Stream, response: Http3Response) -> Result<()> {
        self.send_headers_frame(stream.id(), &response.to_headers())?;

        let body = (!response.body.is_empty()).then_some(response.body);
        self.emit_data(stream.id(), body, true)?;
        stream.set_state(StreamState::Responded);

        debug!(stream_id = %stream.id(), status = %response.status, "Response sent");
        Ok(())
    }

    /// Send a HEADERS frame to the given stream
    pub fn send_headers_frame(&self, stream_id: &StreamId, headers: &Headers) -> Result<()> {
        self.shared.engine.send_headers_frame(stream_id, headers)?;
        Ok(())
    }

    /// Send a DATA frame to the given stream. Only `Data::Fin` sets the
    /// termination flag, and it always travels with an empty payload.
    pub fn send_data_frame(&self, stream_id: &StreamId, data: Data) -> Result<()> {
        match data {
            Data::Bytes(bytes) => self.emit_data(stream_id, Some(bytes), false),
            Data::Fin => self.emit_data(stream_id, None, true),
        }
    }

    fn emit_data(&self, stream_id: &StreamId, data: Option<Bytes>, fin: bool) -> Result<()> {
        self.shared.engine.send_data_frame(stream_id, data, fin)?;
        Ok(())
    }
}

impl fmt::Debug for Server {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Http3Server")
            .field("connections", &self.shared.connections)
            .finish()
    }
}

fn log_event_failure(event: &'static str, err: &ServerError) {
    if err.is_protocol_violation() {
        error!(event, error = %err, "Engine event violated stream ordering");
    } else {
        error!(event, error = %err, "Failed to handle engine event");
    }
}
