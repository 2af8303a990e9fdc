use anyhow::{Context, Result};
use async_trait::async_trait;
use clap::{Parser, Subcommand};
use h3_orchestra::prelude::*;
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
#[command(name = "h3d")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    #[arg(short, long, default_value = "info")]
    log_level: String,

    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate a server configuration and the TLS files it references
    CheckConfig {
        /// TOML file; falls back to --config, then to environment only
        file: Option<PathBuf>,
    },

    /// Feed a JSON-lines script of engine events through a server and print
    /// the frames it sends back
    Replay {
        /// Event script, or `-` for stdin
        file: PathBuf,

        /// Pretty-print each emitted frame
        #[arg(long)]
        pretty: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize tracing
    let log_level = match cli.log_level.as_str() {
        "trace" => tracing::Level::TRACE,
        "debug" => tracing::Level::DEBUG,
        "info" => tracing::Level::INFO,
        "warn" => tracing::Level::WARN,
        "error" => tracing::Level::ERROR,
        _ => tracing::Level::INFO,
    };

    // Logs go to stderr so replayed frames on stdout stay machine-readable
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(tracing_subscriber::filter::LevelFilter::from_level(log_level))
        .init();

    info!("🚀 h3d v{} starting...", env!("CARGO_PKG_VERSION"));

    match cli.command {
        Commands::CheckConfig { file } => {
            check_config(file.or(cli.config))?;
        }

        Commands::Replay { file, pretty } => {
            replay(file, pretty).await?;
        }
    }

    Ok(())
}

fn check_config(path: Option<PathBuf>) -> Result<()> {
    let config = ServerConfig::load(path.as_deref()).context("Failed to load configuration")?;
    let engine = &config.engine;

    println!("port:             {}", engine.port);
    println!("certificate_file: {}", engine.certificate_file.display());
    println!("private_key_file: {}", engine.private_key_file.display());
    match &engine.certificate_file_ca {
        Some(ca) => println!("certificate_ca:   {}", ca.display()),
        None => println!("certificate_ca:   (none)"),
    }
    println!("log_level:        {}", config.log_level);

    if let Err(e) = engine.validate() {
        error!("❌ {}", e);
        return Err(e.into());
    }

    info!("✅ Configuration is valid");
    Ok(())
}

/// Answers every request with its method and URL
struct ReplayHandler;

#[async_trait]
impl Handler for ReplayHandler {
    async fn connection(&self, connection: Arc<Connection>) -> Result<()> {
        info!(connection_id = %connection.id(), alpn = %connection.info().alpn, "Replaying connection");
        Ok(())
    }

    async fn stream(&self, stream: Arc<Stream>) -> Result<Option<Http3Response>> {
        let body = format!("{} {}\n", stream.method(), stream.url());
        Ok(Some(
            Http3Response::ok()
                .header(
                    http::header::CONTENT_TYPE,
                    http::HeaderValue::from_static("text/plain"),
                )
                .body(body),
        ))
    }
}

async fn replay(path: PathBuf, pretty: bool) -> Result<()> {
    let reader: Box<dyn BufRead> = if path.as_os_str() == "-" {
        Box::new(BufReader::new(std::io::stdin()))
    } else {
        let file = std::fs::File::open(&path)
            .with_context(|| format!("Failed to open event script {}", path.display()))?;
        Box::new(BufReader::new(file))
    };

    let engine = Arc::new(RecordingEngine::new());
    let server = Server::builder()
        .engine(engine.clone())
        .with_handler(Arc::new(ReplayHandler))
        .build()?;

    let mut replayed = 0usize;
    for (index, line) in reader.lines().enumerate() {
        let line = line?;
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let event: EngineEvent = serde_json::from_str(line)
            .with_context(|| format!("Invalid event on line {}", index + 1))?;
        if let Err(e) = server.dispatch(event).await {
            warn!(line = index + 1, error = %e, "Event rejected");
        }
        replayed += 1;
    }

    let frames = engine.take_frames();
    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    for frame in &frames {
        let json = if pretty {
            serde_json::to_string_pretty(frame)?
        } else {
            serde_json::to_string(frame)?
        };
        writeln!(out, "{}", json)?;
    }

    let mut connections: Vec<String> = server
        .connections()
        .ids()
        .iter()
        .map(ToString::to_string)
        .collect();
    connections.sort();
    info!(
        events = replayed,
        frames = frames.len(),
        connections = ?connections,
        "Replay finished"
    );
    Ok(())
}
