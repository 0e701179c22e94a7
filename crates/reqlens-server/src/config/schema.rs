use std::net::SocketAddr;

use serde::Deserialize;
use reqlens_core::error::{ReqlensError, Result};

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ReqlensConfig {
    pub version: u32,

    #[serde(default)]
    pub server: ServerSection,

    #[serde(default)]
    pub admin: AdminSection,

    #[serde(default)]
    pub shutdown: ShutdownSection,
}

impl ReqlensConfig {
    pub fn validate(&self) -> Result<()> {
        if self.version != 1 {
            return Err(ReqlensError::UnsupportedVersion);
        }

        self.server.validate()?;
        self.admin.validate(&self.server)?;
        self.shutdown.validate()?;

        Ok(())
    }
}

fn invalid(msg: &str) -> ReqlensError {
    ReqlensError::InvalidConfig(msg.into())
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServerSection {
    #[serde(default = "default_listen")]
    pub listen: String,

    #[serde(default = "default_idle_timeout_ms")]
    pub idle_timeout_ms: u64,

    #[serde(default = "default_read_header_timeout_ms")]
    pub read_header_timeout_ms: u64,

    #[serde(default = "default_read_timeout_ms")]
    pub read_timeout_ms: u64,

    #[serde(default = "default_write_timeout_ms")]
    pub write_timeout_ms: u64,

    #[serde(default = "default_max_header_bytes")]
    pub max_header_bytes: usize,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            idle_timeout_ms: default_idle_timeout_ms(),
            read_header_timeout_ms: default_read_header_timeout_ms(),
            read_timeout_ms: default_read_timeout_ms(),
            write_timeout_ms: default_write_timeout_ms(),
            max_header_bytes: default_max_header_bytes(),
        }
    }
}

impl ServerSection {
    pub fn validate(&self) -> Result<()> {
        self.listen_addr()?;
        if !(1000..=600000).contains(&self.idle_timeout_ms) {
            return Err(invalid("server.idle_timeout_ms must be between 1000 and 600000"));
        }
        if !(100..=120000).contains(&self.read_header_timeout_ms) {
            return Err(invalid("server.read_header_timeout_ms must be between 100 and 120000"));
        }
        if !(100..=600000).contains(&self.read_timeout_ms) {
            return Err(invalid("server.read_timeout_ms must be between 100 and 600000"));
        }
        if !(100..=600000).contains(&self.write_timeout_ms) {
            return Err(invalid("server.write_timeout_ms must be between 100 and 600000"));
        }
        if self.read_header_timeout_ms > self.read_timeout_ms {
            return Err(invalid(
                "server.read_header_timeout_ms must not exceed read_timeout_ms",
            ));
        }
        if !(8192..=16 * 1024 * 1024).contains(&self.max_header_bytes) {
            return Err(invalid("server.max_header_bytes must be between 8192 and 16777216"));
        }
        Ok(())
    }

    pub fn listen_addr(&self) -> Result<SocketAddr> {
        self.listen
            .parse()
            .map_err(|e| ReqlensError::InvalidConfig(format!("server.listen is not a socket address: {e}")))
    }
}

fn default_listen() -> String {
    "0.0.0.0:1337".into()
}
fn default_idle_timeout_ms() -> u64 {
    20000
}
fn default_read_header_timeout_ms() -> u64 {
    10000
}
fn default_read_timeout_ms() -> u64 {
    10000
}
fn default_write_timeout_ms() -> u64 {
    15000
}
fn default_max_header_bytes() -> usize {
    1024 * 1024
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AdminSection {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Explicit bind address. When absent, the data-plane address with its
    /// port shifted by `port_offset` is used.
    #[serde(default)]
    pub listen: Option<String>,

    #[serde(default = "default_port_offset")]
    pub port_offset: u16,

    #[serde(default = "default_profile_seconds")]
    pub default_profile_seconds: u64,

    #[serde(default = "default_max_profile_seconds")]
    pub max_profile_seconds: u64,

    #[serde(default = "default_max_trace_seconds")]
    pub max_trace_seconds: u64,
}

impl Default for AdminSection {
    fn default() -> Self {
        Self {
            enabled: default_true(),
            listen: None,
            port_offset: default_port_offset(),
            default_profile_seconds: default_profile_seconds(),
            max_profile_seconds: default_max_profile_seconds(),
            max_trace_seconds: default_max_trace_seconds(),
        }
    }
}

impl AdminSection {
    pub fn validate(&self, server: &ServerSection) -> Result<()> {
        if !(1..=600).contains(&self.max_profile_seconds) {
            return Err(invalid("admin.max_profile_seconds must be between 1 and 600"));
        }
        if !(1..=self.max_profile_seconds).contains(&self.default_profile_seconds) {
            return Err(invalid(
                "admin.default_profile_seconds must be between 1 and max_profile_seconds",
            ));
        }
        if !(1..=60).contains(&self.max_trace_seconds) {
            return Err(invalid("admin.max_trace_seconds must be between 1 and 60"));
        }
        if self.listen.is_none() && self.port_offset == 0 {
            return Err(invalid(
                "admin.port_offset must be non-zero when admin.listen is not set",
            ));
        }
        let admin = self.listen_addr(server)?;
        if admin.port() != 0 && admin == server.listen_addr()? {
            return Err(invalid("admin listener must not share the data-plane address"));
        }
        Ok(())
    }

    pub fn listen_addr(&self, server: &ServerSection) -> Result<SocketAddr> {
        if let Some(listen) = &self.listen {
            return listen.parse().map_err(|e| {
                ReqlensError::InvalidConfig(format!("admin.listen is not a socket address: {e}"))
            });
        }
        let mut addr = server.listen_addr()?;
        // Port 0 asks the OS for a port; keep it that way for the admin side too.
        if addr.port() != 0 {
            let port = addr
                .port()
                .checked_add(self.port_offset)
                .ok_or_else(|| invalid("server port + admin.port_offset overflows"))?;
            addr.set_port(port);
        }
        Ok(addr)
    }
}

fn default_true() -> bool {
    true
}
fn default_port_offset() -> u16 {
    1000
}
fn default_profile_seconds() -> u64 {
    30
}
fn default_max_profile_seconds() -> u64 {
    60
}
fn default_max_trace_seconds() -> u64 {
    10
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ShutdownSection {
    #[serde(default = "default_grace_period_ms")]
    pub grace_period_ms: u64,
}

impl Default for ShutdownSection {
    fn default() -> Self {
        Self {
            grace_period_ms: default_grace_period_ms(),
        }
    }
}

impl ShutdownSection {
    pub fn validate(&self) -> Result<()> {
        if self.grace_period_ms > 300000 {
            return Err(invalid("shutdown.grace_period_ms must be at most 300000"));
        }
        Ok(())
    }
}

fn default_grace_period_ms() -> u64 {
    3000
}
