//! Environment-driven gateway configuration.
//!
//! # Examples
//!
//! ```
//! use meshmcp_core::config::MeshConfig;
//!
//! let config = MeshConfig::builder()
//!     .production(true)
//!     .mesh_url("https://mesh.example.com")
//!     .jwt_secret("dev-secret")
//!     .build();
//!
//! assert!(config.production);
//! assert!(!config.stdio_allowed());
//! ```

use std::env;

/// Environment variable selecting production mode (`NODE_ENV=production`)
pub const ENV_NODE_ENV: &str = "NODE_ENV";

/// Environment variable gating stdio transports in production
pub const ENV_UNSAFE_ALLOW_STDIO: &str = "UNSAFE_ALLOW_STDIO_TRANSPORT";

/// Environment variable for the public mesh URL (JWT audience)
pub const ENV_MESH_URL: &str = "MESH_URL";

/// Fallback environment variable for the public mesh URL
pub const ENV_BASE_URL: &str = "BASE_URL";

/// Environment variable for the mesh JWT signing secret
pub const ENV_MESH_JWT_SECRET: &str = "MESH_JWT_SECRET";

/// Environment variable toggling monitoring DB writes
pub const ENV_MONITORING_ENABLED: &str = "MONITORING_ENABLED";

/// Gateway configuration resolved once at startup.
#[derive(Debug, Clone)]
pub struct MeshConfig {
    /// Whether the process runs in production mode
    pub production: bool,

    /// Explicit override allowing stdio transports in production
    pub unsafe_allow_stdio: bool,

    /// Public URL of this mesh, used as JWT audience and `meshUrl` claim
    pub mesh_url: Option<String>,

    /// Secret used to sign mesh-issued JWTs
    pub jwt_secret: String,

    /// Whether completed tool calls are persisted to storage.
    /// Metrics emit regardless.
    pub monitoring_enabled: bool,
}

impl MeshConfig {
    /// Resolve configuration from the process environment
    pub fn from_env() -> Self {
        let production = env::var(ENV_NODE_ENV)
            .map(|v| v == "production")
            .unwrap_or(false);
        let unsafe_allow_stdio = env::var(ENV_UNSAFE_ALLOW_STDIO)
            .map(|v| v == "true" || v == "1")
            .unwrap_or(false);
        let mesh_url = env::var(ENV_MESH_URL)
            .or_else(|_| env::var(ENV_BASE_URL))
            .ok();
        let jwt_secret = env::var(ENV_MESH_JWT_SECRET).unwrap_or_default();
        let monitoring_enabled = env::var(ENV_MONITORING_ENABLED)
            .map(|v| v != "false" && v != "0")
            .unwrap_or(true);

        Self {
            production,
            unsafe_allow_stdio,
            mesh_url,
            jwt_secret,
            monitoring_enabled,
        }
    }

    /// Start building a configuration programmatically
    pub fn builder() -> MeshConfigBuilder {
        MeshConfigBuilder::default()
    }

    /// Whether stdio transports may be constructed under this configuration.
    ///
    /// Stdio spawns arbitrary child processes; production refuses it unless
    /// the unsafe override is set.
    pub fn stdio_allowed(&self) -> bool {
        !self.production || self.unsafe_allow_stdio
    }
}

impl Default for MeshConfig {
    fn default() -> Self {
        Self {
            production: false,
            unsafe_allow_stdio: false,
            mesh_url: None,
            jwt_secret: String::new(),
            monitoring_enabled: true,
        }
    }
}

/// Builder for [`MeshConfig`]
#[derive(Debug, Default)]
pub struct MeshConfigBuilder {
    config: MeshConfig,
}

impl MeshConfigBuilder {
    /// Set production mode
    #[must_use]
    pub fn production(mut self, production: bool) -> Self {
        self.config.production = production;
        self
    }

    /// Set the unsafe stdio override
    #[must_use]
    pub fn unsafe_allow_stdio(mut self, allow: bool) -> Self {
        self.config.unsafe_allow_stdio = allow;
        self
    }

    /// Set the public mesh URL
    #[must_use]
    pub fn mesh_url(mut self, url: impl Into<String>) -> Self {
        self.config.mesh_url = Some(url.into());
        self
    }

    /// Set the JWT signing secret
    #[must_use]
    pub fn jwt_secret(mut self, secret: impl Into<String>) -> Self {
        self.config.jwt_secret = secret.into();
        self
    }

    /// Toggle monitoring DB writes
    #[must_use]
    pub fn monitoring_enabled(mut self, enabled: bool) -> Self {
        self.config.monitoring_enabled = enabled;
        self
    }

    /// Build the configuration
    #[must_use]
    pub fn build(self) -> MeshConfig {
        self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = MeshConfig::default();
        assert!(!config.production);
        assert!(config.stdio_allowed());
        assert!(config.monitoring_enabled);
    }

    #[test]
    fn test_stdio_gate() {
        let config = MeshConfig::builder().production(true).build();
        assert!(!config.stdio_allowed());

        let config = MeshConfig::builder()
            .production(true)
            .unsafe_allow_stdio(true)
            .build();
        assert!(config.stdio_allowed());
    }

    #[test]
    fn test_builder_sets_fields() {
        let config = MeshConfig::builder()
            .mesh_url("https://mesh.test")
            .jwt_secret("s3cret")
            .monitoring_enabled(false)
            .build();
        assert_eq!(config.mesh_url.as_deref(), Some("https://mesh.test"));
        assert_eq!(config.jwt_secret, "s3cret");
        assert!(!config.monitoring_enabled);
    }
}
