//! Adapter configuration.
//!
//! [`AdapterConfig`] is the only construction input for
//! [`RedisAdapter`](crate::RedisAdapter). The shorthand constructors and
//! `with_*` helpers all fill in the same struct.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use redis::{ConnectionInfo, IntoConnectionInfo};
use serde::Deserialize;

use crate::error::{AdapterError, AdapterResult};
use crate::storage::ConnectionProvider;

/// List key used when none is configured.
pub const DEFAULT_KEY: &str = "casbin_rules";

/// Idle connections kept by a pool when not configured.
pub const DEFAULT_MAX_IDLE: usize = 8;

// ================================================================================================
// NETWORK
// ================================================================================================

/// Transport used to reach Redis.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Network {
    Tcp,
    Unix,
}

impl FromStr for Network {
    type Err = AdapterError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "tcp" | "tcp4" | "tcp6" => Ok(Network::Tcp),
            "unix" => Ok(Network::Unix),
            other => Err(AdapterError::config(format!("unsupported network {:?}", other))),
        }
    }
}

// ================================================================================================
// CONFIGURATION
// ================================================================================================

/// Connection pool settings.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Connections kept open between operations
    pub max_idle: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_idle: DEFAULT_MAX_IDLE,
        }
    }
}

/// Configuration for the Redis adapter.
///
/// When `provider` is set it is used as-is and every connection field is
/// ignored. Otherwise `network` and `address` are required; with `pool` set
/// the adapter checks connections out per operation, without it one
/// connection is dialed up front and shared.
#[derive(Clone, Deserialize)]
#[serde(default)]
pub struct AdapterConfig {
    /// `tcp` or `unix`
    pub network: Option<Network>,
    /// `host:port` for TCP, socket path for Unix
    pub address: Option<String>,
    /// List key holding the rules (default `casbin_rules`)
    pub key: String,
    pub username: Option<String>,
    pub password: Option<String>,
    /// Connect with TLS (`rediss://`); requires the `tls` feature
    pub use_tls: bool,
    pub connect_timeout_ms: Option<u64>,
    pub pool: Option<PoolConfig>,
    /// Existing connection provider, e.g. a shared pool or an in-memory store
    #[serde(skip)]
    pub provider: Option<Arc<dyn ConnectionProvider>>,
}

impl Default for AdapterConfig {
    fn default() -> Self {
        Self {
            network: None,
            address: None,
            key: DEFAULT_KEY.to_string(),
            username: None,
            password: None,
            use_tls: false,
            connect_timeout_ms: None,
            pool: None,
            provider: None,
        }
    }
}

impl fmt::Debug for AdapterConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AdapterConfig")
            .field("network", &self.network)
            .field("address", &self.address)
            .field("key", &self.key)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("use_tls", &self.use_tls)
            .field("connect_timeout_ms", &self.connect_timeout_ms)
            .field("pool", &self.pool)
            .field("provider", &self.provider)
            .finish()
    }
}

impl AdapterConfig {
    /// Connect over TCP to `host:port`.
    pub fn tcp(address: impl Into<String>) -> Self {
        Self {
            network: Some(Network::Tcp),
            address: Some(address.into()),
            ..Self::default()
        }
    }

    /// Connect over a Unix socket.
    pub fn unix(path: impl Into<String>) -> Self {
        Self {
            network: Some(Network::Unix),
            address: Some(path.into()),
            ..Self::default()
        }
    }

    /// Use an existing connection provider.
    pub fn with_provider(provider: Arc<dyn ConnectionProvider>) -> Self {
        Self {
            provider: Some(provider),
            ..Self::default()
        }
    }

    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = key.into();
        self
    }

    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    pub fn with_user(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self.password = Some(password.into());
        self
    }

    pub fn with_tls(mut self) -> Self {
        self.use_tls = true;
        self
    }

    pub fn with_pool(mut self, pool: PoolConfig) -> Self {
        self.pool = Some(pool);
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout_ms = Some(timeout.as_millis() as u64);
        self
    }

    /// The configured key, or the default when empty.
    pub fn resolved_key(&self) -> &str {
        if self.key.is_empty() {
            DEFAULT_KEY
        } else {
            &self.key
        }
    }

    pub fn connect_timeout(&self) -> Option<Duration> {
        self.connect_timeout_ms.map(Duration::from_millis)
    }

    /// Check the fields needed to dial Redis.
    pub fn validate(&self) -> AdapterResult<()> {
        if self.provider.is_some() {
            return Ok(());
        }
        let network = self
            .network
            .ok_or_else(|| AdapterError::config("network is required when no provider is set"))?;
        match self.address.as_deref() {
            None | Some("") => {
                return Err(AdapterError::config(
                    "address is required when no provider is set",
                ))
            }
            Some(_) => {}
        }
        if network == Network::Unix && self.use_tls {
            return Err(AdapterError::config("TLS is not supported over unix sockets"));
        }
        if self.pool.as_ref().is_some_and(|pool| pool.max_idle == 0) {
            return Err(AdapterError::config("pool max_idle must be at least 1"));
        }
        Ok(())
    }

    /// Redis connection info built from the network fields and credentials.
    pub fn connection_info(&self) -> AdapterResult<ConnectionInfo> {
        self.validate()?;
        let address = self.address.as_deref().unwrap_or_default();
        let url = match self.network {
            Some(Network::Unix) => format!("redis+unix://{}", address),
            _ if self.use_tls => format!("rediss://{}", address),
            _ => format!("redis://{}", address),
        };

        let mut info = url
            .as_str()
            .into_connection_info()
            .map_err(|e| AdapterError::config(format!("invalid address {:?}: {}", address, e)))?;
        if let Some(username) = &self.username {
            info.redis.username = Some(username.clone());
        }
        if let Some(password) = &self.password {
            info.redis.password = Some(password.clone());
        }
        Ok(info)
    }
}
