//! HTTP/3 connection bookkeeping

use serde::{Deserialize, Serialize};
use std::future::Future;
use std::net::{IpAddr, SocketAddr};
use tokio::sync::OnceCell;

use crate::error::Result;
use crate::identity::{ConnectionId, IdentityMap, StreamId};
use crate::server::ServerHandle;
use crate::stream::Stream;

/// Transport details reported by the engine when the connection was established
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionInfo {
    pub version: String,
    pub alpn: String,
    pub remote_address: String,
    pub remote_port: u16,
}

impl ConnectionInfo {
    /// Peer address, if the engine reported a literal IP
    pub fn remote_addr(&self) -> Option<SocketAddr> {
        self.remote_address
            .parse::<IpAddr>()
            .ok()
            .map(|ip| SocketAddr::new(ip, self.remote_port))
    }
}

/// One transport session and the streams opened on it
pub struct Connection {
    id: ConnectionId,
    info: ConnectionInfo,
    server: ServerHandle,
    streams: IdentityMap<StreamId, Stream>,
    setup: OnceCell<()>,
}

impl Connection {
    pub fn new(server: ServerHandle, id: ConnectionId, info: ConnectionInfo) -> Self {
        Self {
            id,
            info,
            streams: IdentityMap::new("Stream", server.clone()),
            server,
            setup: OnceCell::new(),
        }
    }

    pub fn id(&self) -> &ConnectionId {
        &self.id
    }

    pub fn info(&self) -> &ConnectionInfo {
        &self.info
    }

    /// Server that owns this connection
    pub fn server(&self) -> &ServerHandle {
        &self.server
    }

    /// Streams belonging to this connection indexed by stream ID
    pub fn streams(&self) -> &IdentityMap<StreamId, Stream> {
        &self.streams
    }

    /// Whether the application's connection handler has completed
    pub fn is_set_up(&self) -> bool {
        self.setup.initialized()
    }

    /// Run `setup` the first time this is called. Concurrent callers wait for
    /// the same run; a failed run leaves the connection un-set-up so the next
    /// caller tries again.
    pub(crate) async fn ensure_setup<F, Fut>(&self, setup: F) -> Result<()>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<()>>,
    {
        self.setup.get_or_try_init(setup).await.map(|_| ())
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Http3Connection")
            .field("id", &self.id)
            .field("info", &self.info)
            .field("streams", &self.streams)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ServerError;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn connection() -> Connection {
        Connection::new(
            ServerHandle::detached(),
            ConnectionId::from("c1"),
            ConnectionInfo {
                version: "1".into(),
                alpn: "h3".into(),
                remote_address: "192.0.2.10".into(),
                remote_port: 51000,
            },
        )
    }

    #[test]
    fn remote_addr_from_engine_info() {
        let conn = connection();
        assert_eq!(conn.info().remote_addr(), Some("192.0.2.10:51000".parse().unwrap()));
        assert_eq!(ConnectionInfo::default().remote_addr(), None);
    }

    #[test]
    fn new_connection_has_empty_stream_map() {
        let conn = connection();
        assert!(conn.streams().is_empty());
        assert_eq!(conn.streams().kind(), "Stream");
        assert!(!conn.is_set_up());
    }

    #[tokio::test]
    async fn setup_runs_once() {
        let conn = connection();
        let calls = AtomicUsize::new(0);

        for _ in 0..3 {
            conn.ensure_setup(|| async {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
            .await
            .unwrap();
        }

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(conn.is_set_up());
    }

    #[tokio::test]
    async fn failed_setup_is_retried() {
        let conn = connection();
        let failed = conn
            .ensure_setup(|| async { Err(ServerError::Handler(anyhow::anyhow!("boom"))) })
            .await;
        assert!(failed.is_err());
        assert!(!conn.is_set_up());

        conn.ensure_setup(|| async { Ok(()) }).await.unwrap();
        assert!(conn.is_set_up());
    }
}
