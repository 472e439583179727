//! Application settings and configuration structures.

use std::time::Duration;

use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

/// Root configuration structure containing all application settings.
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    /// Server configuration (host, port)
    pub server: ServerSettings,

    /// Long-poll scheduling and session lifecycle
    pub bayeux: BayeuxSettings,

    /// Per-browser multi-session throttle
    pub browser: BrowserSettings,

    /// Inactivity monitor
    pub activity: ActivitySettings,

    /// Client-side transport negotiation defaults
    pub client: ClientSettings,

    /// CORS configuration
    pub cors: CorsSettings,

    /// Current environment (development, staging, production)
    pub environment: String,
}

/// Server binding configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerSettings {
    /// Host address to bind to (e.g., "0.0.0.0")
    pub host: String,

    /// Port number to listen on
    pub port: u16,
}

/// Connect scheduling and session lifecycle configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct BayeuxSettings {
    /// Default (and maximum) long-poll suspension in milliseconds
    pub timeout_ms: u64,

    /// Interval advised to clients between connects, in milliseconds
    pub interval_ms: u64,

    /// Idle-expiry window: a session without a connect renewal for this
    /// long (beyond its timeout) is swept
    pub max_interval_ms: u64,

    /// Maximum number of undelivered messages queued per session
    pub max_queue: usize,

    /// Period of the idle-expiry sweeper in milliseconds
    pub sweep_period_ms: u64,

    /// Remove the session as soon as its connect reply advises `none`
    pub meta_connect_delivery_only: bool,
}

/// Browser throttle configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct BrowserSettings {
    /// Max simultaneously suspended sessions per browser (0 disables)
    pub max_sessions_per_browser: usize,

    /// Stagger window in milliseconds (0 disables staggering)
    pub multi_session_interval_ms: u64,

    /// Name of the cookie carrying the browser identity
    pub cookie_name: String,
}

/// Inactivity monitor configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ActivitySettings {
    /// Maximum inactivity in milliseconds (0 disables the monitor)
    pub max_inactivity_ms: u64,

    /// Which directions of traffic count as activity
    pub mode: InactivityMode,

    /// Period of the background check in milliseconds
    pub check_period_ms: u64,
}

/// Activity directions considered by the inactivity monitor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub enum InactivityMode {
    /// Only messages published by the client reset the clock
    #[serde(rename = "client")]
    ClientOnly,
    /// Messages in either direction reset the clock
    #[serde(rename = "client-server")]
    ClientAndServer,
}

/// Client transport negotiation configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ClientSettings {
    /// Deadline for the handshake and first connect on a transport
    pub connect_timeout_ms: u64,

    /// Slack added to the advised timeout for steady-state connects
    pub max_network_delay_ms: u64,

    /// Consecutive connect failures before renegotiating transports
    pub max_consecutive_failures: u32,

    /// Initial retry backoff in milliseconds
    pub backoff_base_ms: u64,

    /// Maximum retry backoff in milliseconds
    pub backoff_max_ms: u64,
}

/// CORS configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct CorsSettings {
    /// Allowed origins (comma-separated in env)
    pub allowed_origins: Vec<String>,
}

impl Settings {
    /// Load settings from environment variables and configuration files.
    ///
    /// The loading order is:
    /// 1. config/default.toml (base configuration)
    /// 2. config/{RUN_ENV}.toml (environment-specific overrides)
    /// 3. Environment variables (highest priority)
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if configuration cannot be loaded or parsed,
    /// or if the scheduling values are inconsistent.
    pub fn load() -> Result<Self, ConfigError> {
        // Load .env file if present (ignore errors if not found)
        let _ = dotenvy::dotenv();

        let environment = std::env::var("RUN_ENV").unwrap_or_else(|_| "development".into());

        Config::builder()
            .set_default("environment", environment.clone())?
            .set_default("server.host", "0.0.0.0")?
            .set_default("server.port", 8080)?
            .set_default("bayeux.timeout_ms", 30_000_i64)?
            .set_default("bayeux.interval_ms", 0_i64)?
            .set_default("bayeux.max_interval_ms", 10_000_i64)?
            .set_default("bayeux.max_queue", 1_000_i64)?
            .set_default("bayeux.sweep_period_ms", 1_000_i64)?
            .set_default("bayeux.meta_connect_delivery_only", false)?
            .set_default("browser.max_sessions_per_browser", 1_i64)?
            .set_default("browser.multi_session_interval_ms", 2_000_i64)?
            .set_default("browser.cookie_name", "BAYEUX_BROWSER")?
            .set_default("activity.max_inactivity_ms", 0_i64)?
            .set_default("activity.mode", "client")?
            .set_default("activity.check_period_ms", 1_000_i64)?
            .set_default("client.connect_timeout_ms", 10_000_i64)?
            .set_default("client.max_network_delay_ms", 10_000_i64)?
            .set_default("client.max_consecutive_failures", 3_i64)?
            .set_default("client.backoff_base_ms", 1_000_i64)?
            .set_default("client.backoff_max_ms", 60_000_i64)?
            .set_default("cors.allowed_origins", vec!["http://localhost:3000"])?
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name(&format!("config/{}", environment)).required(false))
            // APP__BAYEUX__TIMEOUT_MS=20000 -> bayeux.timeout_ms = 20000
            .add_source(
                Environment::default()
                    .prefix("APP")
                    .separator("__")
                    .try_parsing(true),
            )
            .set_override_option("server.host", std::env::var("SERVER_HOST").ok())?
            .set_override_option("server.port", std::env::var("SERVER_PORT").ok())?
            .build()?
            .try_deserialize()
            .and_then(|settings: Self| {
                settings.validate()?;
                Ok(settings)
            })
    }

    /// Reject combinations the scheduler cannot honour.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.bayeux.timeout_ms == 0 {
            return Err(ConfigError::Message(
                "bayeux.timeout_ms must be greater than zero".into(),
            ));
        }
        if self.bayeux.max_queue == 0 {
            return Err(ConfigError::Message(
                "bayeux.max_queue must be greater than zero".into(),
            ));
        }
        if self.activity.max_inactivity_ms > 0 && self.activity.check_period_ms == 0 {
            return Err(ConfigError::Message(
                "activity.check_period_ms must be greater than zero when the monitor is enabled"
                    .into(),
            ));
        }
        Ok(())
    }

    /// Get the full server address as a string.
    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

impl BayeuxSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    pub fn max_interval(&self) -> Duration {
        Duration::from_millis(self.max_interval_ms)
    }

    pub fn sweep_period(&self) -> Duration {
        Duration::from_millis(self.sweep_period_ms.max(1))
    }
}

impl BrowserSettings {
    pub fn multi_session_interval(&self) -> Duration {
        Duration::from_millis(self.multi_session_interval_ms)
    }
}

impl ActivitySettings {
    pub fn max_inactivity(&self) -> Duration {
        Duration::from_millis(self.max_inactivity_ms)
    }

    pub fn check_period(&self) -> Duration {
        Duration::from_millis(self.check_period_ms.max(1))
    }

    /// The monitor is disabled when no inactivity bound is configured.
    pub fn is_enabled(&self) -> bool {
        self.max_inactivity_ms > 0
    }
}

impl ClientSettings {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn max_network_delay(&self) -> Duration {
        Duration::from_millis(self.max_network_delay_ms)
    }
}

impl Default for BayeuxSettings {
    fn default() -> Self {
        Self {
            timeout_ms: 30_000,
            interval_ms: 0,
            max_interval_ms: 10_000,
            max_queue: 1_000,
            sweep_period_ms: 1_000,
            meta_connect_delivery_only: false,
        }
    }
}

impl Default for BrowserSettings {
    fn default() -> Self {
        Self {
            max_sessions_per_browser: 1,
            multi_session_interval_ms: 2_000,
            cookie_name: "BAYEUX_BROWSER".into(),
        }
    }
}

impl Default for ActivitySettings {
    fn default() -> Self {
        Self {
            max_inactivity_ms: 0,
            mode: InactivityMode::ClientOnly,
            check_period_ms: 1_000,
        }
    }
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            connect_timeout_ms: 10_000,
            max_network_delay_ms: 10_000,
            max_consecutive_failures: 3,
            backoff_base_ms: 1_000,
            backoff_max_ms: 60_000,
        }
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            server: ServerSettings {
                host: "127.0.0.1".into(),
                port: 8080,
            },
            bayeux: BayeuxSettings::default(),
            browser: BrowserSettings::default(),
            activity: ActivitySettings::default(),
            client: ClientSettings::default(),
            cors: CorsSettings {
                allowed_origins: vec!["http://localhost:3000".into()],
            },
            environment: "development".into(),
        }
    }
}
