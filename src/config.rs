//! Configuration management for Prism CDN.
//!
//! This module provides a flexible configuration system that supports:
//! - Command-line arguments via clap
//! - Environment variables with `PRISM_` prefix
//! - Sensible defaults for all optional settings
//!
//! # Environment Variables
//!
//! - `PRISM_HOST` - Server bind address (default: 0.0.0.0)
//! - `PRISM_PORT` - Server port (default: 3000)
//! - `PRISM_CACHE_DIR` - Disk cache root (default: `<tmp>/prism-cdn`)
//! - `PRISM_CACHE_ENABLED` - Enable the disk cache (default: true)
//! - `PRISM_PREFIX_CDN` / `PRISM_PREFIX_IMG` / `PRISM_PREFIX_PROXY` - Route prefixes
//! - `PRISM_DISABLE_CDN` / `PRISM_DISABLE_IMG` / `PRISM_DISABLE_PROXY` - Route toggles
//! - `PRISM_DEADLINE_SECS` - Client-facing deadline (default: 5)
//! - `PRISM_ORIGIN_TIMEOUT_SECS` - Per-fetch HTTP timeout (default: 30)
//! - `PRISM_ORIGIN_SCHEME` - Scheme for `{domain}/{path}` origins (default: http)
//! - `PRISM_CORS_ORIGINS` - Allowed CORS origins, comma-separated (default: any)

use std::path::PathBuf;
use std::time::Duration;

use clap::{ArgAction, Parser};

use crate::server::{RouterConfig, DEFAULT_CACHE_MAX_AGE};
use crate::store::CacheConfig;

// =============================================================================
// Default Values
// =============================================================================

/// Default server host.
pub const DEFAULT_HOST: &str = "0.0.0.0";

/// Default server port.
pub const DEFAULT_PORT: u16 = 3000;

/// Default client-facing deadline in seconds.
pub const DEFAULT_DEADLINE_SECS: u64 = 5;

/// Default per-fetch HTTP client timeout in seconds.
pub const DEFAULT_ORIGIN_TIMEOUT_SECS: u64 = 30;

/// Directory name of the default cache root below the system temp dir.
pub const DEFAULT_CACHE_DIR_NAME: &str = "prism-cdn";

// =============================================================================
// CLI Arguments
// =============================================================================

/// Prism CDN - on-the-fly image delivery proxy.
///
/// Negotiates image format, size and quality from client hints, fetches
/// originals from upstream hosts or public CDN mirrors, and caches every
/// artifact on disk.
#[derive(Parser, Debug, Clone)]
#[command(name = "prism-cdn")]
#[command(author, version, about, long_about = None)]
pub struct Config {
    // =========================================================================
    // Server Configuration
    // =========================================================================
    /// Host address to bind the server to.
    #[arg(long, default_value = DEFAULT_HOST, env = "PRISM_HOST")]
    pub host: String,

    /// Port to listen on.
    #[arg(short, long, default_value_t = DEFAULT_PORT, env = "PRISM_PORT")]
    pub port: u16,

    // =========================================================================
    // Cache Configuration
    // =========================================================================
    /// Root directory of the disk cache.
    #[arg(long, env = "PRISM_CACHE_DIR")]
    pub cache_dir: Option<PathBuf>,

    /// Enable the disk cache.
    #[arg(long, default_value_t = true, action = ArgAction::Set, env = "PRISM_CACHE_ENABLED")]
    pub cache_enabled: bool,

    // =========================================================================
    // Routes
    // =========================================================================
    /// Prefix of the library asset route.
    #[arg(long, default_value = "cdn", env = "PRISM_PREFIX_CDN")]
    pub prefix_cdn: String,

    /// Prefix of the image route.
    #[arg(long, default_value = "img", env = "PRISM_PREFIX_IMG")]
    pub prefix_img: String,

    /// Prefix of the byte proxy route.
    #[arg(long, default_value = "proxy", env = "PRISM_PREFIX_PROXY")]
    pub prefix_proxy: String,

    /// Disable the library asset route.
    #[arg(long, default_value_t = false, env = "PRISM_DISABLE_CDN")]
    pub disable_cdn: bool,

    /// Disable the image route.
    #[arg(long, default_value_t = false, env = "PRISM_DISABLE_IMG")]
    pub disable_img: bool,

    /// Disable the byte proxy route.
    #[arg(long, default_value_t = false, env = "PRISM_DISABLE_PROXY")]
    pub disable_proxy: bool,

    // =========================================================================
    // Upstream Configuration
    // =========================================================================
    /// Seconds a client waits for a mirror race, render or proxied response.
    #[arg(long, default_value_t = DEFAULT_DEADLINE_SECS, env = "PRISM_DEADLINE_SECS")]
    pub deadline_secs: u64,

    /// Timeout of a single upstream HTTP request, in seconds.
    #[arg(long, default_value_t = DEFAULT_ORIGIN_TIMEOUT_SECS, env = "PRISM_ORIGIN_TIMEOUT_SECS")]
    pub origin_timeout_secs: u64,

    /// Scheme used to reach `{domain}/{path}` origins (http or https).
    #[arg(long, default_value = "http", env = "PRISM_ORIGIN_SCHEME")]
    pub origin_scheme: String,

    // =========================================================================
    // CORS Configuration
    // =========================================================================
    /// Allowed CORS origins (comma-separated).
    ///
    /// If not specified, the request origin is echoed back.
    #[arg(long, env = "PRISM_CORS_ORIGINS", value_delimiter = ',')]
    pub cors_origins: Option<Vec<String>>,

    // =========================================================================
    // Logging Configuration
    // =========================================================================
    /// Enable verbose logging (debug level).
    #[arg(short, long, default_value_t = false)]
    pub verbose: bool,

    /// Disable request tracing.
    #[arg(long, default_value_t = false)]
    pub no_tracing: bool,
}

impl Config {
    /// Validate the configuration and return an error message if invalid.
    pub fn validate(&self) -> Result<(), String> {
        let routes = [
            ("cdn", &self.prefix_cdn, !self.disable_cdn),
            ("img", &self.prefix_img, !self.disable_img),
            ("proxy", &self.prefix_proxy, !self.disable_proxy),
        ];

        if routes.iter().all(|(_, _, enabled)| !enabled) {
            return Err("All routes are disabled; enable at least one of cdn, img or proxy".to_string());
        }

        for (name, prefix, enabled) in &routes {
            if !enabled {
                continue;
            }
            if prefix.is_empty() {
                return Err(format!("The {} route prefix must not be empty", name));
            }
            if prefix.contains('/') || prefix.contains('{') || prefix.contains('}') {
                return Err(format!(
                    "The {} route prefix must be a single path segment, got {:?}",
                    name, prefix
                ));
            }
            if prefix.as_str() == "health" {
                return Err(format!("The {} route prefix conflicts with /health", name));
            }
        }

        for (i, (name, prefix, enabled)) in routes.iter().enumerate() {
            for (other, other_prefix, other_enabled) in &routes[i + 1..] {
                if *enabled && *other_enabled && prefix == other_prefix {
                    return Err(format!(
                        "The {} and {} routes share the prefix {:?}",
                        name, other, prefix
                    ));
                }
            }
        }

        if self.deadline_secs == 0 {
            return Err("deadline_secs must be greater than 0".to_string());
        }
        if self.origin_timeout_secs == 0 {
            return Err("origin_timeout_secs must be greater than 0".to_string());
        }

        if self.origin_scheme != "http" && self.origin_scheme != "https" {
            return Err(format!(
                "origin_scheme must be http or https, got {:?}",
                self.origin_scheme
            ));
        }

        Ok(())
    }

    /// Get the server bind address as "host:port".
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Root of the disk cache, defaulting to a directory in the temp dir.
    pub fn cache_root(&self) -> PathBuf {
        self.cache_dir
            .clone()
            .unwrap_or_else(|| std::env::temp_dir().join(DEFAULT_CACHE_DIR_NAME))
    }

    pub fn cache_config(&self) -> CacheConfig {
        if self.cache_enabled {
            CacheConfig::new(self.cache_root())
        } else {
            CacheConfig::disabled()
        }
    }

    pub fn deadline(&self) -> Duration {
        Duration::from_secs(self.deadline_secs)
    }

    pub fn origin_timeout(&self) -> Duration {
        Duration::from_secs(self.origin_timeout_secs)
    }

    /// Router settings derived from this configuration.
    pub fn router_config(&self) -> RouterConfig {
        let mut config = RouterConfig::default()
            .with_prefixes(&self.prefix_cdn, &self.prefix_img, &self.prefix_proxy)
            .with_routes(!self.disable_cdn, !self.disable_img, !self.disable_proxy)
            .with_origin_scheme(&self.origin_scheme)
            .with_deadline(self.deadline())
            .with_cache_max_age(DEFAULT_CACHE_MAX_AGE)
            .with_tracing(!self.no_tracing);
        if let Some(origins) = &self.cors_origins {
            config = config.with_cors_origins(origins.clone());
        }
        config
    }
}

// =============================================================================
// Tests
// =============================================================================
