// HTTP client construction for the switch management API.
//
// Switch management planes ship self-signed certificates, so the default
// TLS mode accepts any certificate.

use std::time::Duration;

use crate::error::ConnectError;

/// TLS verification mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TlsMode {
    /// Use the system certificate store.
    System,
    /// Accept any certificate (self-signed switch certificates).
    #[default]
    DangerAcceptInvalid,
}

/// Shared transport configuration for building HTTP clients.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    pub tls: TlsMode,
    /// Per-request timeout.
    pub timeout: Duration,
    /// `https` against real devices; tests point it at a plain-HTTP mock.
    pub scheme: String,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            tls: TlsMode::default(),
            timeout: Duration::from_secs(10),
            scheme: "https".to_string(),
        }
    }
}

impl TransportConfig {
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_scheme(mut self, scheme: impl Into<String>) -> Self {
        self.scheme = scheme.into();
        self
    }

    /// Build a `reqwest::Client` from this config.
    pub fn build_client(&self) -> Result<reqwest::Client, ConnectError> {
        let mut builder = reqwest::Client::builder()
            .timeout(self.timeout)
            .user_agent(concat!("rfleet/", env!("CARGO_PKG_VERSION")));

        if self.tls == TlsMode::DangerAcceptInvalid {
            builder = builder.danger_accept_invalid_certs(true);
        }

        builder
            .build()
            .map_err(|e| ConnectError::Transport(format!("failed to build HTTP client: {e}")))
    }

    /// `{scheme}://{host}:{port}/api/v1`
    pub fn base_url(&self, host: &str, port: u16) -> String {
        format!("{}://{host}:{port}/api/v1", self.scheme)
    }
}
