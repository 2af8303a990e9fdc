use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

use crate::connection::Connection;
use crate::response::Http3Response;
use crate::stream::Stream;

/// Application callbacks driven by the server.
///
/// Both methods default to doing nothing, so implementors override only what
/// they need.
#[async_trait]
pub trait Handler: Send + Sync {
    /// Runs once per connection, before the first stream handler of that
    /// connection. Triggered by the connection's first HEADERS frame.
    async fn connection(&self, _connection: Arc<Connection>) -> Result<()> {
        Ok(())
    }

    /// Runs for every new request stream. Returning a response makes the
    /// server send it and finish the stream; returning `None` leaves the
    /// stream open for the handler to drive through [`Stream::send_data`].
    async fn stream(&self, _stream: Arc<Stream>) -> Result<Option<Http3Response>> {
        Ok(None)
    }
}

/// Handler installed until the application provides one
pub struct NoopHandler;

#[async_trait]
impl Handler for NoopHandler {
    async fn stream(&self, stream: Arc<Stream>) -> Result<Option<Http3Response>> {
        debug!(stream_id = %stream.id(), url = %stream.url(), "No handler installed, leaving stream open");
        Ok(None)
    }
}

/// Adapter turning an async closure into a stream-only handler
pub struct StreamFn<F>(pub F);

#[async_trait]
impl<F, Fut> Handler for StreamFn<F>
where
    F: Fn(Arc<Stream>) -> Fut + Send + Sync + 'static,
    Fut: std::future::Future<Output = Result<Option<Http3Response>>> + Send + 'static,
{
    async fn stream(&self, stream: Arc<Stream>) -> Result<Option<Http3Response>> {
        (self.0)(stream).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::{Connection, ConnectionInfo};
    use crate::frame::Headers;
    use crate::identity::{ConnectionId, StreamId};
    use crate::server::ServerHandle;

    fn stream() -> Arc<Stream> {
        let connection = Arc::new(Connection::new(
            ServerHandle::detached(),
            ConnectionId::from("c1"),
            ConnectionInfo::default(),
        ));
        Arc::new(Stream::new(&connection, StreamId::from("0"), &Headers::new()))
    }

    #[tokio::test]
    async fn stream_fn_wraps_closure() {
        let handler = StreamFn(|stream: Arc<Stream>| async move {
            Ok::<_, anyhow::Error>(Some(Http3Response::ok().body(stream.url().to_string())))
        });

        let response = handler.stream(stream()).await.unwrap().unwrap();
        assert_eq!(response.text(), "https://localhost:4433/");
    }

    #[tokio::test]
    async fn noop_handler_leaves_stream_open() {
        assert!(NoopHandler.stream(stream()).await.unwrap().is_none());
    }
}
