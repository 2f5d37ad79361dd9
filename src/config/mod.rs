//! Configuration for the maxstream server and client driver
//!
//! Server settings come from environment variables (the deployment sets
//! `MY_IP` and `EDS_SERVER` on every pod) and can be overridden by CLI
//! flags. Tests build configs through [`ServerConfig::builder`].

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::time::Duration;
use thiserror::Error;

/// Default gRPC port for the `math.Math` service
pub const DEFAULT_PORT: u16 = 50005;

/// Default low-water mark: below this many connections the instance advertises itself
pub const DEFAULT_THRESHOLD: usize = 3;

/// Port the discovery service listens on when only a host is configured
pub const DISCOVERY_PORT: u16 = 8080;

/// Path of the EDS cluster resource on the discovery service
pub const DISCOVERY_PATH: &str = "/edsservice/eds-cluster-service";

/// Build the discovery resource URL for a discovery host
pub fn discovery_url_for(server: &str) -> String {
    format!("http://{server}:{DISCOVERY_PORT}{DISCOVERY_PATH}")
}

// ============================================================================
// Placement Tags
// ============================================================================

/// Static placement metadata advertised alongside this instance
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlacementConfig {
    /// Availability zone
    pub az: String,

    /// Whether this instance is a canary
    pub canary: bool,

    /// Load-balancing weight
    pub load_balancing_weight: u32,
}

impl Default for PlacementConfig {
    fn default() -> Self {
        Self {
            az: "us-central1-a".to_string(),
            canary: false,
            load_balancing_weight: 50,
        }
    }
}

// ============================================================================
// Server Configuration
// ============================================================================

/// Configuration for a server instance
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// IP address this instance advertises to discovery
    pub self_ip: String,

    /// Port the gRPC listener binds to
    pub listen_port: u16,

    /// Port advertised to discovery
    pub advertised_port: u16,

    /// Full URL of the discovery resource
    pub discovery_url: String,

    /// Advertise while the connection count is below this value
    pub threshold: usize,

    /// Advertiser tick period in milliseconds
    pub tick_interval_ms: u64,

    /// Delay before the first advertiser tick in milliseconds
    pub startup_delay_ms: u64,

    /// Upper bound for advertiser backoff after repeated failures
    pub max_backoff_ms: u64,

    /// Client-side timeout for discovery mutations (POST/PUT)
    pub mutation_timeout_secs: u64,

    /// Bind address of the admin HTTP server (health + metrics)
    pub admin_addr: Option<SocketAddr>,

    /// Placement tags for the advertised host entry
    pub placement: PlacementConfig,
}

impl ServerConfig {
    /// Create configuration from environment variables
    ///
    /// Environment variables:
    /// - `MY_IP`: IP address advertised to discovery [required]
    /// - `EDS_SERVER`: discovery service host [required unless `EDS_URL` is set]
    /// - `EDS_URL`: full discovery resource URL [optional override]
    /// - `MAXSTREAM_PORT`: gRPC listen port [default: 50005]
    /// - `MAXSTREAM_ADVERTISED_PORT`: advertised port [default: listen port]
    /// - `MAXSTREAM_THRESHOLD`: connection low-water mark [default: 3]
    /// - `MAXSTREAM_TICK_MS`: advertiser period [default: 1000]
    /// - `MAXSTREAM_STARTUP_DELAY_MS`: delay before first tick [default: 5000]
    /// - `MAXSTREAM_MAX_BACKOFF_MS`: advertiser backoff cap [default: 30000]
    /// - `MAXSTREAM_ADMIN_ADDR`: admin server address, `off` disables [default: 0.0.0.0:9090]
    /// - `MAXSTREAM_AZ`, `MAXSTREAM_CANARY`, `MAXSTREAM_LB_WEIGHT`: placement tags
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Create configuration from an arbitrary key lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let self_ip = lookup("MY_IP").ok_or_else(|| ConfigError::MissingEnvVar("MY_IP".into()))?;

        let discovery_url = match lookup("EDS_URL") {
            Some(url) => url,
            None => {
                let server = lookup("EDS_SERVER")
                    .ok_or_else(|| ConfigError::MissingEnvVar("EDS_SERVER".into()))?;
                discovery_url_for(&server)
            }
        };

        let listen_port = parse_or(&lookup, "MAXSTREAM_PORT", DEFAULT_PORT)?;
        let defaults = PlacementConfig::default();

        let admin_addr = match lookup("MAXSTREAM_ADMIN_ADDR") {
            Some(v) if v.eq_ignore_ascii_case("off") => None,
            Some(v) => Some(v.parse().map_err(|_| {
                ConfigError::InvalidValue("MAXSTREAM_ADMIN_ADDR".into(), format!("invalid address: {v}"))
            })?),
            None => Some(SocketAddr::from(([0, 0, 0, 0], 9090))),
        };

        let config = Self {
            self_ip,
            listen_port,
            advertised_port: parse_or(&lookup, "MAXSTREAM_ADVERTISED_PORT", listen_port)?,
            discovery_url,
            threshold: parse_or(&lookup, "MAXSTREAM_THRESHOLD", DEFAULT_THRESHOLD)?,
            tick_interval_ms: parse_or(&lookup, "MAXSTREAM_TICK_MS", 1000)?,
            startup_delay_ms: parse_or(&lookup, "MAXSTREAM_STARTUP_DELAY_MS", 5000)?,
            max_backoff_ms: parse_or(&lookup, "MAXSTREAM_MAX_BACKOFF_MS", 30_000)?,
            mutation_timeout_secs: 5,
            admin_addr,
            placement: PlacementConfig {
                az: lookup("MAXSTREAM_AZ").unwrap_or(defaults.az),
                canary: lookup("MAXSTREAM_CANARY")
                    .map(|s| s.eq_ignore_ascii_case("true"))
                    .unwrap_or(defaults.canary),
                load_balancing_weight: parse_or(
                    &lookup,
                    "MAXSTREAM_LB_WEIGHT",
                    defaults.load_balancing_weight,
                )?,
            },
        };

        config.validate()?;
        Ok(config)
    }

    /// Create configuration with builder pattern
    pub fn builder() -> ServerConfigBuilder {
        ServerConfigBuilder::default()
    }

    /// Advertiser tick period
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    /// Delay before the first advertiser tick
    pub fn startup_delay(&self) -> Duration {
        Duration::from_millis(self.startup_delay_ms)
    }

    /// Upper bound for advertiser backoff
    pub fn max_backoff(&self) -> Duration {
        Duration::from_millis(self.max_backoff_ms)
    }

    /// Timeout for POST/PUT calls to discovery
    pub fn mutation_timeout(&self) -> Duration {
        Duration::from_secs(self.mutation_timeout_secs)
    }

    /// Address the gRPC listener binds to
    pub fn listen_addr(&self) -> SocketAddr {
        SocketAddr::from(([0, 0, 0, 0], self.listen_port))
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.self_ip.trim().is_empty() {
            return Err(ConfigError::InvalidValue(
                "self_ip".to_string(),
                "IP address cannot be empty".to_string(),
            ));
        }

        if self.discovery_url.trim().is_empty() {
            return Err(ConfigError::InvalidValue(
                "discovery_url".to_string(),
                "URL cannot be empty".to_string(),
            ));
        }

        if self.threshold == 0 {
            return Err(ConfigError::InvalidValue(
                "threshold".to_string(),
                "Must be at least 1".to_string(),
            ));
        }

        if self.tick_interval_ms == 0 {
            return Err(ConfigError::InvalidValue(
                "tick_interval_ms".to_string(),
                "Must be positive".to_string(),
            ));
        }

        if self.max_backoff_ms < self.tick_interval_ms {
            return Err(ConfigError::InvalidValue(
                "max_backoff_ms".to_string(),
                "Must not be shorter than the tick interval".to_string(),
            ));
        }

        Ok(())
    }

    /// Display configuration
    pub fn display(&self) -> String {
        format!(
            "Server Configuration\n\
             {:-<50}\n\
             Self IP: {}\n\
             Listen Port: {}\n\
             Advertised Port: {}\n\
             Discovery: {}\n\
             Threshold: {} connections\n\
             Tick: {}ms\n\
             Startup Delay: {}ms\n\
             Admin: {}\n\
             Placement: az={} canary={} weight={}",
            "",
            self.self_ip,
            self.listen_port,
            self.advertised_port,
            self.discovery_url,
            self.threshold,
            self.tick_interval_ms,
            self.startup_delay_ms,
            self.admin_addr
                .map(|a| a.to_string())
                .unwrap_or_else(|| "disabled".to_string()),
            self.placement.az,
            self.placement.canary,
            self.placement.load_balancing_weight,
        )
    }
}

fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidValue(key.to_string(), format!("cannot parse '{raw}'"))),
        None => Ok(default),
    }
}

// ============================================================================
// Server Config Builder
// ============================================================================

/// Builder for ServerConfig
#[derive(Debug, Default)]
pub struct ServerConfigBuilder {
    self_ip: Option<String>,
    listen_port: Option<u16>,
    advertised_port: Option<u16>,
    discovery_url: Option<String>,
    threshold: Option<usize>,
    tick_interval_ms: Option<u64>,
    startup_delay_ms: Option<u64>,
    max_backoff_ms: Option<u64>,
    mutation_timeout_secs: Option<u64>,
    admin_addr: Option<Option<SocketAddr>>,
    placement: Option<PlacementConfig>,
}

impl ServerConfigBuilder {
    pub fn self_ip(mut self, ip: impl Into<String>) -> Self {
        self.self_ip = Some(ip.into());
        self
    }

    pub fn listen_port(mut self, port: u16) -> Self {
        self.listen_port = Some(port);
        self
    }

    pub fn advertised_port(mut self, port: u16) -> Self {
        self.advertised_port = Some(port);
        self
    }

    pub fn discovery_url(mut self, url: impl Into<String>) -> Self {
        self.discovery_url = Some(url.into());
        self
    }

    pub fn discovery_server(mut self, server: &str) -> Self {
        self.discovery_url = Some(discovery_url_for(server));
        self
    }

    pub fn threshold(mut self, threshold: usize) -> Self {
        self.threshold = Some(threshold);
        self
    }

    pub fn tick_interval_ms(mut self, ms: u64) -> Self {
        self.tick_interval_ms = Some(ms);
        self
    }

    pub fn startup_delay_ms(mut self, ms: u64) -> Self {
        self.startup_delay_ms = Some(ms);
        self
    }

    pub fn max_backoff_ms(mut self, ms: u64) -> Self {
        self.max_backoff_ms = Some(ms);
        self
    }

    pub fn mutation_timeout_secs(mut self, secs: u64) -> Self {
        self.mutation_timeout_secs = Some(secs);
        self
    }

    pub fn admin_addr(mut self, addr: Option<SocketAddr>) -> Self {
        self.admin_addr = Some(addr);
        self
    }

    pub fn placement(mut self, placement: PlacementConfig) -> Self {
        self.placement = Some(placement);
        self
    }

    pub fn build(self) -> Result<ServerConfig, ConfigError> {
        let listen_port = self.listen_port.unwrap_or(DEFAULT_PORT);
        let config = ServerConfig {
            self_ip: self
                .self_ip
                .ok_or_else(|| ConfigError::MissingField("self_ip".to_string()))?,
            listen_port,
            advertised_port: self.advertised_port.unwrap_or(listen_port),
            discovery_url: self
                .discovery_url
                .ok_or_else(|| ConfigError::MissingField("discovery_url".to_string()))?,
            threshold: self.threshold.unwrap_or(DEFAULT_THRESHOLD),
            tick_interval_ms: self.tick_interval_ms.unwrap_or(1000),
            startup_delay_ms: self.startup_delay_ms.unwrap_or(5000),
            max_backoff_ms: self.max_backoff_ms.unwrap_or(30_000),
            mutation_timeout_secs: self.mutation_timeout_secs.unwrap_or(5),
            admin_addr: self
                .admin_addr
                .unwrap_or_else(|| Some(SocketAddr::from(([0, 0, 0, 0], 9090)))),
            placement: self.placement.unwrap_or_default(),
        };

        config.validate()?;
        Ok(config)
    }
}

// ============================================================================
// Driver Configuration
// ============================================================================

/// Configuration for the client driver
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DriverConfig {
    /// Server host
    pub host: String,

    /// Server port
    pub port: u16,

    /// Number of observations to send before closing the send half
    pub observations: u64,

    /// Delay between observations in milliseconds
    pub pace_ms: u64,

    /// Random delay range before dialing, in milliseconds
    pub connect_jitter_ms: (u64, u64),
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: DEFAULT_PORT,
            observations: 20_000_000,
            pace_ms: 1000,
            connect_jitter_ms: (1000, 5000),
        }
    }
}

impl DriverConfig {
    /// Create a driver config for a target
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            ..Default::default()
        }
    }

    /// Set the number of observations
    pub fn with_observations(mut self, count: u64) -> Self {
        self.observations = count;
        self
    }

    /// Set the pacing delay
    pub fn with_pace_ms(mut self, ms: u64) -> Self {
        self.pace_ms = ms;
        self
    }

    /// Set the pre-dial jitter range (`(0, 0)` disables it)
    pub fn with_connect_jitter_ms(mut self, min: u64, max: u64) -> Self {
        self.connect_jitter_ms = (min, max.max(min));
        self
    }

    /// gRPC endpoint URI of the target server
    pub fn endpoint(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }

    /// Pacing delay as Duration
    pub fn pace(&self) -> Duration {
        Duration::from_millis(self.pace_ms)
    }
}

// ============================================================================
// Configuration Errors
// ============================================================================

/// Configuration errors
#[derive(Debug, Clone, Error)]
pub enum ConfigError {
    /// Missing environment variable
    #[error("Missing environment variable: {0}")]
    MissingEnvVar(String),

    /// Missing required field
    #[error("Missing required field: {0}")]
    MissingField(String),

    /// Invalid value
    #[error("Invalid value for {0}: {1}")]
    InvalidValue(String, String),
}
