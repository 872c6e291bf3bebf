//! Configuration for multirootca
//!
//! CLI arguments and environment variable handling using clap. Per-root
//! settings live in the roots file (see `roots::config`).

use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;

use crate::logging::LogFormat;

/// multirootca - certificate signing service for several independent roots
#[derive(Parser, Debug, Clone)]
#[command(name = "multirootca")]
#[command(about = "Multi-root certificate authority signing service")]
pub struct Args {
    /// Address to listen on
    #[arg(long, env = "LISTEN", default_value = "0.0.0.0:8888")]
    pub listen: SocketAddr,

    /// TOML file describing the roots
    #[arg(long = "roots", env = "ROOTS_FILE")]
    pub roots_file: PathBuf,

    /// Label used when a request does not name one
    #[arg(long, env = "DEFAULT_LABEL")]
    pub default_label: Option<String>,

    /// Certificate chain for HTTPS (requires --tls-key)
    #[arg(long, env = "TLS_CERT")]
    pub tls_cert: Option<PathBuf>,

    /// Private key for HTTPS (requires --tls-cert)
    #[arg(long, env = "TLS_KEY")]
    pub tls_key: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// Log output format
    #[arg(long, env = "LOG_FORMAT", value_enum, default_value_t = LogFormat::Text)]
    pub log_format: LogFormat,

    /// Maximum concurrent signing requests before answering 503
    #[arg(long, env = "MAX_IN_FLIGHT", default_value = "256")]
    pub max_in_flight: usize,

    /// Seconds to wait for in-flight connections on shutdown
    #[arg(long, env = "SHUTDOWN_GRACE_SECS", default_value = "30")]
    pub shutdown_grace_secs: u64,

    /// Serve the remaining roots when one fails to load
    #[arg(long, env = "SKIP_INVALID_ROOTS", default_value = "false")]
    pub skip_invalid_roots: bool,

    /// Refuse to start if any root lacks an ACL
    #[arg(long, env = "REQUIRE_ACL", default_value = "false")]
    pub require_acl: bool,
}

impl Args {
    /// Default label, treating an empty value as unset
    pub fn default_label(&self) -> Option<&str> {
        self.default_label.as_deref().filter(|l| !l.is_empty())
    }

    /// Whether HTTPS is configured
    pub fn tls_enabled(&self) -> bool {
        self.tls_cert.is_some() && self.tls_key.is_some()
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.tls_cert.is_some() != self.tls_key.is_some() {
            return Err("TLS_CERT and TLS_KEY must be set together".to_string());
        }

        if self.max_in_flight == 0 {
            return Err("MAX_IN_FLIGHT must be at least 1".to_string());
        }

        if self.roots_file.as_os_str().is_empty() {
            return Err("ROOTS_FILE is required".to_string());
        }

        Ok(())
    }
}
