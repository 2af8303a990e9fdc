use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::ConfigError;

pub const DEFAULT_PORT: u16 = 4433;

/// Settings handed to the native engine on `start`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Certificate chain in PEM format
    pub certificate_file: PathBuf,
    /// PEM file with trusted CA certificates
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub certificate_file_ca: Option<PathBuf>,
    #[serde(default = "default_port")]
    pub port: u16,
    pub private_key_file: PathBuf,
}

impl EngineConfig {
    /// Check that the port is usable and every referenced file exists
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.port == 0 {
            return Err(ConfigError::InvalidPort(self.port));
        }
        if !self.certificate_file.exists() {
            return Err(ConfigError::MissingCertificate(display(&self.certificate_file)));
        }
        if !self.private_key_file.exists() {
            return Err(ConfigError::MissingPrivateKey(display(&self.private_key_file)));
        }
        if let Some(ca) = &self.certificate_file_ca {
            if !ca.exists() {
                return Err(ConfigError::MissingCaCertificate(display(ca)));
            }
        }
        Ok(())
    }
}

/// Full server configuration as read from disk and environment
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerConfig {
    pub engine: EngineConfig,
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl ServerConfig {
    /// Create a new configuration builder
    pub fn builder() -> ServerConfigBuilder {
        ServerConfigBuilder::new()
    }

    /// Load from an optional TOML file, overridden by `H3_`-prefixed
    /// environment variables (`H3_ENGINE__PORT=8443`, `H3_LOG_LEVEL=debug`).
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut builder = config::Config::builder()
            .set_default("engine.port", i64::from(DEFAULT_PORT))?
            .set_default("log_level", default_log_level())?;

        if let Some(path) = path {
            builder = builder.add_source(
                config::File::from(path.to_path_buf()).format(config::FileFormat::Toml),
            );
        }

        let settings = builder
            .add_source(
                config::Environment::with_prefix("H3")
                    .prefix_separator("_")
                    .separator("__"),
            )
            .build()?;

        Ok(settings.try_deserialize()?)
    }
}

/// Builder for ServerConfig
#[derive(Debug)]
pub struct ServerConfigBuilder {
    certificate_file: Option<PathBuf>,
    certificate_file_ca: Option<PathBuf>,
    private_key_file: Option<PathBuf>,
    port: u16,
    log_level: String,
}

impl ServerConfigBuilder {
    pub fn new() -> Self {
        Self {
            certificate_file: None,
            certificate_file_ca: None,
            private_key_file: None,
            port: DEFAULT_PORT,
            log_level: default_log_level(),
        }
    }

    /// Set the listen port
    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Set TLS certificate and key files
    pub fn with_tls_files(
        mut self,
        cert_path: impl AsRef<Path>,
        key_path: impl AsRef<Path>,
    ) -> Result<Self, ConfigError> {
        let (cert_path, key_path) = (cert_path.as_ref(), key_path.as_ref());
        if !cert_path.exists() {
            return Err(ConfigError::MissingCertificate(display(cert_path)));
        }
        if !key_path.exists() {
            return Err(ConfigError::MissingPrivateKey(display(key_path)));
        }

        self.certificate_file = Some(cert_path.to_path_buf());
        self.private_key_file = Some(key_path.to_path_buf());
        Ok(self)
    }

    /// Set a PEM bundle of trusted CA certificates
    pub fn with_ca_file(mut self, ca_path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let ca_path = ca_path.as_ref();
        if !ca_path.exists() {
            return Err(ConfigError::MissingCaCertificate(display(ca_path)));
        }
        self.certificate_file_ca = Some(ca_path.to_path_buf());
        Ok(self)
    }

    pub fn log_level(mut self, level: impl Into<String>) -> Self {
        self.log_level = level.into();
        self
    }

    /// Build the configuration
    pub fn build(self) -> Result<ServerConfig, ConfigError> {
        let certificate_file = self
            .certificate_file
            .ok_or(ConfigError::Required("certificate_file"))?;
        let private_key_file = self
            .private_key_file
            .ok_or(ConfigError::Required("private_key_file"))?;
        if self.port == 0 {
            return Err(ConfigError::InvalidPort(self.port));
        }

        Ok(ServerConfig {
            engine: EngineConfig {
                certificate_file,
                certificate_file_ca: self.certificate_file_ca,
                port: self.port,
                private_key_file,
            },
            log_level: self.log_level,
        })
    }
}

impl Default for ServerConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_log_level() -> String {
    "info".to_string()
}

fn display(path: &Path) -> String {
    path.display().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn pem_pair() -> (tempfile::NamedTempFile, tempfile::NamedTempFile) {
        let cert = tempfile::NamedTempFile::new().unwrap();
        let key = tempfile::NamedTempFile::new().unwrap();
        (cert, key)
    }

    #[test]
    fn builder_requires_tls_files() {
        let result = ServerConfig::builder().port(8443).build();
        assert!(matches!(result, Err(ConfigError::Required("certificate_file"))));
    }

    #[test]
    fn builder_rejects_missing_files() {
        let result = ServerConfig::builder().with_tls_files("/nonexistent/cert.pem", "/nonexistent/key.pem");
        assert!(matches!(result, Err(ConfigError::MissingCertificate(_))));
    }

    #[test]
    fn builder_produces_engine_config() {
        let (cert, key) = pem_pair();
        let config = ServerConfig::builder()
            .port(8443)
            .with_tls_files(cert.path(), key.path())
            .unwrap()
            .with_ca_file(cert.path())
            .unwrap()
            .build()
            .unwrap();

        assert_eq!(config.engine.port, 8443);
        assert_eq!(config.engine.certificate_file_ca.as_deref(), Some(cert.path()));
        assert_eq!(config.log_level, "info");
        assert!(config.engine.validate().is_ok());
    }

    #[test]
    fn validate_rejects_port_zero() {
        let (cert, key) = pem_pair();
        let engine = EngineConfig {
            certificate_file: cert.path().to_path_buf(),
            certificate_file_ca: None,
            port: 0,
            private_key_file: key.path().to_path_buf(),
        };
        assert!(matches!(engine.validate(), Err(ConfigError::InvalidPort(0))));
    }

    #[test]
    fn load_reads_toml_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            "log_level = \"debug\"\n\n[engine]\ncertificate_file = \"cert.pem\"\nprivate_key_file = \"key.pem\"\nport = 9443"
        )
        .unwrap();

        let config = ServerConfig::load(Some(file.path())).unwrap();
        assert_eq!(config.log_level, "debug");
        assert_eq!(config.engine.port, 9443);
        assert_eq!(config.engine.certificate_file, PathBuf::from("cert.pem"));
        assert!(config.engine.certificate_file_ca.is_none());
    }

    #[test]
    fn load_fills_default_port() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "[engine]\ncertificate_file = \"c.pem\"\nprivate_key_file = \"k.pem\"").unwrap();

        let config = ServerConfig::load(Some(file.path())).unwrap();
        assert_eq!(config.engine.port, DEFAULT_PORT);
        assert_eq!(config.log_level, "info");
    }
}
