//! Config loader (strict parsing) and the immutable per-listener configs
//! derived from it.

pub mod schema;

use std::fs;
use std::net::SocketAddr;
use std::time::Duration;

use reqlens_core::error::{ReqlensError, Result};

pub use schema::{AdminSection, ReqlensConfig, ServerSection, ShutdownSection};

pub fn load_from_file(path: &str) -> Result<ReqlensConfig> {
    let s = fs::read_to_string(path)
        .map_err(|e| ReqlensError::Internal(format!("read config failed ({path}): {e}")))?;
    load_from_str(&s)
}

pub fn load_from_str(s: &str) -> Result<ReqlensConfig> {
    let cfg: ReqlensConfig = serde_yaml::from_str(s)
        .map_err(|e| ReqlensError::InvalidConfig(format!("invalid yaml: {e}")))?;
    cfg.validate()?;
    Ok(cfg)
}

/// Data-plane listener settings. Built once at startup and owned by the
/// listener.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub addr: SocketAddr,
    /// Keep-alive connection with no request in flight is closed after this.
    pub idle_timeout: Duration,
    pub read_header_timeout: Duration,
    /// Bound on reading the request body.
    pub read_timeout: Duration,
    /// Bound on producing the response.
    pub write_timeout: Duration,
    pub max_header_bytes: usize,
}

impl ServerConfig {
    /// Defaults of an empty `server:` section, bound to `addr`.
    pub fn with_addr(addr: SocketAddr) -> Self {
        let section = ServerSection::default();
        Self::from_section(addr, &section)
    }

    fn from_section(addr: SocketAddr, s: &ServerSection) -> Self {
        Self {
            addr,
            idle_timeout: Duration::from_millis(s.idle_timeout_ms),
            read_header_timeout: Duration::from_millis(s.read_header_timeout_ms),
            read_timeout: Duration::from_millis(s.read_timeout_ms),
            write_timeout: Duration::from_millis(s.write_timeout_ms),
            max_header_bytes: s.max_header_bytes,
        }
    }
}

/// Administrative listener settings.
#[derive(Debug, Clone)]
pub struct AdminConfig {
    pub addr: SocketAddr,
    pub default_profile: Duration,
    pub max_profile: Duration,
    pub max_trace: Duration,
}

impl AdminConfig {
    /// Defaults of an empty `admin:` section, bound to `addr`.
    pub fn with_addr(addr: SocketAddr) -> Self {
        let section = AdminSection::default();
        Self::from_section(addr, &section)
    }

    fn from_section(addr: SocketAddr, s: &AdminSection) -> Self {
        Self {
            addr,
            default_profile: Duration::from_secs(s.default_profile_seconds),
            max_profile: Duration::from_secs(s.max_profile_seconds),
            max_trace: Duration::from_secs(s.max_trace_seconds),
        }
    }
}

impl ReqlensConfig {
    pub fn server_config(&self) -> Result<ServerConfig> {
        Ok(ServerConfig::from_section(
            self.server.listen_addr()?,
            &self.server,
        ))
    }

    /// `None` when the admin listener is disabled.
    pub fn admin_config(&self) -> Result<Option<AdminConfig>> {
        if !self.admin.enabled {
            return Ok(None);
        }
        let addr = self.admin.listen_addr(&self.server)?;
        Ok(Some(AdminConfig::from_section(addr, &self.admin)))
    }

    pub fn grace_period(&self) -> Duration {
        Duration::from_millis(self.shutdown.grace_period_ms)
    }
}
