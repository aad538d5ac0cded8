//! Server configuration, loaded from `PODIUM_*` environment variables.

use podium_core::{Error, Result};

/// CORS configuration.
#[derive(Debug, Clone, Default)]
pub struct CorsConfig {
    /// Allowed origins; empty means same-origin only (no CORS layer in
    /// permissive mode).
    pub allowed_origins: Vec<String>,
}

/// HTTP server configuration.
#[derive(Debug, Clone)]
pub struct ApiConfig {
    /// Bind host.
    pub host: String,
    /// Bind port. A deployment concern only; nothing in the control
    /// plane contract depends on it.
    pub port: u16,
    /// Development posture: pretty logs, permissive defaults.
    pub debug: bool,
    /// CORS settings.
    pub cors: CorsConfig,
    /// Static bearer token for admin-scoped routes. Unset means dev
    /// posture: admin routes are open.
    pub admin_token: Option<String>,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
            debug: true,
            cors: CorsConfig::default(),
            admin_token: None,
        }
    }
}

impl ApiConfig {
    /// Loads configuration from environment variables.
    ///
    /// Recognized: `PODIUM_HOST`, `PODIUM_PORT`, `PODIUM_DEBUG`,
    /// `PODIUM_CORS_ALLOWED_ORIGINS` (comma-separated),
    /// `PODIUM_ADMIN_TOKEN`.
    ///
    /// # Errors
    ///
    /// Returns a validation error for unparseable values.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Ok(host) = std::env::var("PODIUM_HOST") {
            if !host.trim().is_empty() {
                config.host = host.trim().to_string();
            }
        }
        if let Ok(port) = std::env::var("PODIUM_PORT") {
            config.port = port.trim().parse().map_err(|e| Error::Validation {
                message: format!("PODIUM_PORT: invalid port '{port}': {e}"),
            })?;
        }
        if let Ok(debug) = std::env::var("PODIUM_DEBUG") {
            config.debug = matches!(debug.trim(), "1" | "true" | "yes");
        }
        if let Ok(origins) = std::env::var("PODIUM_CORS_ALLOWED_ORIGINS") {
            config.cors.allowed_origins = origins
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(String::from)
                .collect();
        }
        if let Ok(token) = std::env::var("PODIUM_ADMIN_TOKEN") {
            if !token.trim().is_empty() {
                config.admin_token = Some(token.trim().to_string());
            }
        }

        Ok(config)
    }

    /// The socket address string to bind.
    #[must_use]
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = ApiConfig::default();
        assert_eq!(config.bind_addr(), "0.0.0.0:8000");
        assert!(config.debug);
        assert!(config.admin_token.is_none());
    }
}
