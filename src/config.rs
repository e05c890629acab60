//! Configuration for the frame proxy.
//!
//! Every option can be given on the command line or through an environment
//! variable with the `TLM_` prefix:
//!
//! - `TLM_HOST` - Server bind address (default: 0.0.0.0)
//! - `TLM_PORT` - Server port (default: 8080)
//! - `TLM_S3_BUCKET` - Bucket holding the frames (required)
//! - `TLM_S3_PREFIX` - Key prefix in front of `{datastore}/{imageset}/{frame}`
//! - `TLM_S3_ENDPOINT` - Custom S3 endpoint for S3-compatible services
//! - `TLM_S3_REGION` - AWS region (default: us-east-1)
//! - `TLM_FETCH_TIMEOUT` - Backing store timeout in seconds (default: 30)
//! - `TLM_LOCAL_CACHE` - Enable the in-process cache (default: true)
//! - `TLM_LOCAL_CACHE_SIZE` - In-process cache size in bytes (default: 512MB)
//! - `TLM_CACHE_TTL` - Cache entry lifetime in seconds (default: one week)
//! - `TLM_MEMCACHED_ADDRESS` - `host:port` of memcached; unset disables it
//! - `TLM_MEMCACHED_TIMEOUT_MS` - Memcached call timeout (default: 1000)
//! - `TLM_MEMCACHED_MAX_VALUE` - Largest value sent to memcached (default: 50MB)
//! - `TLM_CACHE_NAMESPACE` - Prefix of memcached keys
//! - `TLM_CACHE_MAX_AGE` - HTTP cache max-age seconds (default: 86400)
//! - `TLM_CORS_ORIGINS` - Allowed CORS origins, comma-separated

use std::time::Duration;

use clap::Parser;

use crate::frame::{
    MemcachedClient, DEFAULT_FRAME_CACHE_CAPACITY, DEFAULT_MAX_VALUE_SIZE,
};

// =============================================================================
// Default Values
// =============================================================================

pub const DEFAULT_HOST: &str = "0.0.0.0";

pub const DEFAULT_PORT: u16 = 8080;

pub const DEFAULT_REGION: &str = "us-east-1";

/// Default backing store timeout in seconds.
pub const DEFAULT_FETCH_TIMEOUT: u64 = 30;

/// Default cache entry lifetime in seconds (one week).
pub const DEFAULT_CACHE_TTL_SECS: u64 = 604_800;

pub const DEFAULT_MEMCACHED_TIMEOUT_MS: u64 = 1000;

/// Default HTTP cache max-age in seconds (1 day).
pub const DEFAULT_CACHE_MAX_AGE: u32 = 86_400;

// =============================================================================
// CLI Arguments
// =============================================================================

/// TLM Proxy - serve HTJ2K frames one resolution level at a time.
///
/// Streams frames from S3, indexes their tile-parts and serves any window of
/// resolution levels, caching levels locally and in memcached.
#[derive(Parser, Debug, Clone)]
#[command(name = "tlm-proxy")]
#[command(author, version, about, long_about = None)]
pub struct Config {
    // =========================================================================
    // Server Configuration
    // =========================================================================
    /// Host address to bind the server to.
    #[arg(long, default_value = DEFAULT_HOST, env = "TLM_HOST")]
    pub host: String,

    /// Port to listen on.
    #[arg(short, long, default_value_t = DEFAULT_PORT, env = "TLM_PORT")]
    pub port: u16,

    // =========================================================================
    // S3 Configuration
    // =========================================================================
    /// S3 bucket name containing the image frames.
    #[arg(long, env = "TLM_S3_BUCKET")]
    pub s3_bucket: String,

    /// Key prefix of the frames within the bucket (e.g. "frames/").
    #[arg(long, env = "TLM_S3_PREFIX")]
    pub s3_prefix: Option<String>,

    /// Custom S3 endpoint URL for S3-compatible services (MinIO, etc.).
    #[arg(long, env = "TLM_S3_ENDPOINT")]
    pub s3_endpoint: Option<String>,

    /// AWS region for S3.
    #[arg(long, default_value = DEFAULT_REGION, env = "TLM_S3_REGION")]
    pub s3_region: String,

    /// Timeout in seconds for opening a frame and for each chunk read.
    #[arg(long, default_value_t = DEFAULT_FETCH_TIMEOUT, env = "TLM_FETCH_TIMEOUT")]
    pub fetch_timeout: u64,

    // =========================================================================
    // Cache Configuration
    // =========================================================================
    /// Enable the in-process cache tier.
    #[arg(long, default_value_t = true, env = "TLM_LOCAL_CACHE", action = clap::ArgAction::Set)]
    pub local_cache: bool,

    /// Size of the in-process cache tier in bytes.
    #[arg(long, default_value_t = DEFAULT_FRAME_CACHE_CAPACITY, env = "TLM_LOCAL_CACHE_SIZE")]
    pub local_cache_size: usize,

    /// Lifetime of cache entries in seconds.
    #[arg(long, default_value_t = DEFAULT_CACHE_TTL_SECS, env = "TLM_CACHE_TTL")]
    pub cache_ttl: u64,

    /// Memcached address as host:port. The distributed tier is disabled when
    /// unset.
    #[arg(long, env = "TLM_MEMCACHED_ADDRESS")]
    pub memcached_address: Option<String>,

    /// Timeout of each memcached call in milliseconds.
    #[arg(long, default_value_t = DEFAULT_MEMCACHED_TIMEOUT_MS, env = "TLM_MEMCACHED_TIMEOUT_MS")]
    pub memcached_timeout_ms: u64,

    /// Largest value written to memcached in bytes.
    #[arg(long, default_value_t = DEFAULT_MAX_VALUE_SIZE, env = "TLM_MEMCACHED_MAX_VALUE")]
    pub memcached_max_value: usize,

    /// Prefix applied to memcached keys, to share one memcached between
    /// deployments.
    #[arg(long, default_value = "", env = "TLM_CACHE_NAMESPACE")]
    pub cache_namespace: String,

    /// HTTP Cache-Control max-age in seconds.
    #[arg(long, default_value_t = DEFAULT_CACHE_MAX_AGE, env = "TLM_CACHE_MAX_AGE")]
    pub cache_max_age: u32,

    // =========================================================================
    // CORS Configuration
    // =========================================================================
    /// Allowed CORS origins (comma-separated).
    ///
    /// If not specified, allows any origin.
    #[arg(long, env = "TLM_CORS_ORIGINS", value_delimiter = ',')]
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
        if self.s3_bucket.is_empty() {
            return Err("S3 bucket name is required. Set --s3-bucket or TLM_S3_BUCKET".to_string());
        }

        if self.fetch_timeout == 0 {
            return Err("fetch_timeout must be greater than 0".to_string());
        }

        if self.local_cache && self.local_cache_size == 0 {
            return Err(
                "local_cache_size must be greater than 0 when the local cache is enabled"
                    .to_string(),
            );
        }

        if let Some(address) = &self.memcached_address {
            if !MemcachedClient::is_valid_address(address) {
                return Err(format!(
                    "memcached_address must be host:port, got '{}'",
                    address
                ));
            }
            if self.memcached_timeout_ms == 0 {
                return Err("memcached_timeout_ms must be greater than 0".to_string());
            }
        }

        if self
            .cache_namespace
            .bytes()
            .any(|b| b.is_ascii_whitespace() || b.is_ascii_control())
        {
            return Err("cache_namespace must not contain whitespace".to_string());
        }

        Ok(())
    }

    /// Get the server bind address as "host:port".
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout)
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl)
    }

    pub fn memcached_timeout(&self) -> Duration {
        Duration::from_millis(self.memcached_timeout_ms)
    }
}

// =============================================================================
// Tests
// =============================================================================
