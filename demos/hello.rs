//! Hello World over the recording engine.
//!
//! Every request gets 103 Early Hints pointing at a stylesheet, then a small
//! HTML page. The frames the server would hand to the network are printed as
//! JSON.

use anyhow::Result;
use h3_orchestra::prelude::*;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

struct HelloHandler;

#[async_trait]
impl Handler for HelloHandler {
    async fn connection(&self, connection: Arc<Connection>) -> Result<()> {
        info!("{:?}", connection);
        Ok(())
    }

    async fn stream(&self, stream: Arc<Stream>) -> Result<Option<Http3Response>> {
        stream.send_headers([Headers::from([
            (":status".to_string(), "103".to_string()),
            ("link".to_string(), "</style.css>;rel=preload;as=style".to_string()),
        ])])?;

        Ok(Some(Http3Response::html("<h1>Hello World</h1>")))
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let engine = Arc::new(RecordingEngine::new());
    let server = Server::builder()
        .engine(engine.clone())
        .with_handler(Arc::new(HelloHandler))
        .build()?;

    server.start(&EngineConfig {
        certificate_file: "cert.pem".into(),
        certificate_file_ca: Some("cert.pem".into()),
        port: 4433,
        private_key_file: "key.pem".into(),
    })?;

    let runner = {
        let server = server.clone();
        tokio::spawn(async move { server.run().await })
    };

    let sink = engine
        .sink()
        .ok_or_else(|| anyhow::anyhow!("server did not subscribe to the engine"))?;
    sink.connection_received("conn-1", "1", "h3", "127.0.0.1", 50123);
    sink.headers_frame_received(
        "0",
        "conn-1",
        Headers::from([
            (":method".to_string(), "GET".to_string()),
            (":scheme".to_string(), "https".to_string()),
            (":authority".to_string(), "localhost:4433".to_string()),
            (":path".to_string(), "/".to_string()),
            ("accept".to_string(), "text/html".to_string()),
        ]),
    );

    let stream_id = StreamId::from("0");
    tokio::time::timeout(Duration::from_secs(5), async {
        while !engine.frames_for(&stream_id).last().is_some_and(|f| f.is_fin()) {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await?;

    server.stop().await?;
    runner.await??;

    for frame in engine.take_frames() {
        println!("{}", serde_json::to_string(&frame)?);
    }
    Ok(())
}
