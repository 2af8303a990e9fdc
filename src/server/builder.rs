use std::sync::Arc;

use super::config::ServerConfig;
use super::handler::{Handler, NoopHandler};
use super::Server;
use crate::engine::NativeEngine;
use crate::error::{ConfigError, Result};

pub struct ServerBuilder {
    engine: Option<Arc<dyn NativeEngine>>,
    handler: Option<Arc<dyn Handler>>,
    config: Option<ServerConfig>,
}

impl ServerBuilder {
    pub fn new() -> Self {
        Self {
            engine: None,
            handler: None,
            config: None,
        }
    }

    pub fn engine(mut self, engine: Arc<dyn NativeEngine>) -> Self {
        self.engine = Some(engine);
        self
    }

    pub fn with_handler(mut self, handler: Arc<dyn Handler>) -> Self {
        self.handler = Some(handler);
        self
    }

    /// Start the engine with this configuration as part of `build`
    pub fn with_config(mut self, config: ServerConfig) -> Self {
        self.config = Some(config);
        self
    }

    pub fn build(self) -> Result<Server> {
        let engine = self.engine.ok_or(ConfigError::Required("engine"))?;
        let handler = self.handler.unwrap_or_else(|| Arc::new(NoopHandler));

        let server = Server::new_with_handler(engine, handler);
        if let Some(config) = self.config {
            config.engine.validate()?;
            server.start(&config.engine)?;
        }
        Ok(server)
    }
}

impl Default for ServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}
