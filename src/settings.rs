use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;
use url::Url;

/// Environment variable naming a directory whose `Settings.toml` overrides
/// the one in the working directory
pub const CONFIG_DIR_ENV: &str = "SESSION_KEEPER_CONFIG_DIR";

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct KeeperSettings {
    pub application: ApplicationSettings,
    pub session: SessionSettings,
    pub bridge: BridgeSettings,
    pub refresh: RefreshSettings,
    pub storage: StorageSettings,
    pub logging: LoggingSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApplicationSettings {
    /// Origin the web content is served from; decides the cookie `secure` flag
    pub origin: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionSettings {
    /// Refresh this long before the access token expires
    pub refresh_margin_secs: u64,
    /// How long restore waits for the native host to push login info
    pub login_info_wait_ms: u64,
    /// Cookie lifetime when the user did not choose to stay logged in
    pub session_cookie_hours: u64,
    /// Cookie lifetime when the user chose to stay logged in
    pub keep_login_cookie_days: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeSettings {
    /// Name of the iOS `webkit.messageHandlers` entry to post to
    pub handler_name: String,
    /// Deadline for status queries such as `checkBiometricStatus`
    pub status_timeout_ms: u64,
    /// Deadline for user-interactive operations such as biometric prompts
    pub interactive_timeout_ms: u64,
    /// Reason shown by the host when prompting for biometrics
    pub biometric_reason: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RefreshSettings {
    /// Endpoint that exchanges a refresh token for a new access token
    pub url: String,
    pub request_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct StorageSettings {
    /// File backing durable storage; in-memory when unset
    pub durable_path: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    pub level: String,
}

impl Default for ApplicationSettings {
    fn default() -> Self {
        Self {
            origin: "http://localhost:3000".to_string(),
        }
    }
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            refresh_margin_secs: 300, // 5 minutes
            login_info_wait_ms: 3_000,
            session_cookie_hours: 24,
            keep_login_cookie_days: 30,
        }
    }
}

impl Default for BridgeSettings {
    fn default() -> Self {
        Self {
            handler_name: "nativeBridge".to_string(),
            status_timeout_ms: 10_000,
            interactive_timeout_ms: 30_000,
            biometric_reason: "Confirm your identity to continue".to_string(),
        }
    }
}

impl Default for RefreshSettings {
    fn default() -> Self {
        Self {
            url: "http://localhost:3000/api/auth/refresh".to_string(),
            request_timeout_secs: 15,
        }
    }
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl KeeperSettings {
    /// Load settings from configuration files and environment variables,
    /// then initialise logging at the configured level
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - Settings file cannot be read or parsed
    /// - TOML parsing fails
    pub fn load() -> Result<Self, Box<dyn std::error::Error>> {
        let mut settings = Self::load_base_settings()?;
        Self::apply_env_overrides(&mut settings);
        settings.init_logging();
        Ok(settings)
    }

    /// Load settings from a single TOML file (missing keys take defaults)
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or is not valid TOML
    pub fn from_file(path: &Path) -> Result<Self, Box<dyn std::error::Error>> {
        let toml_content = fs::read_to_string(path)?;
        Ok(basic_toml::from_str(&toml_content)?)
    }

    /// Load base settings from TOML file(s) or use defaults
    /// Settings are loaded with the following priority (highest to lowest):
    /// 1. Environment variables (applied separately after loading base settings)
    /// 2. Settings.toml in `SESSION_KEEPER_CONFIG_DIR` (if specified and exists)
    /// 3. Settings.toml in current directory (if exists)
    /// 4. Default settings
    fn load_base_settings() -> Result<Self, Box<dyn std::error::Error>> {
        let mut settings = Self::default();

        let default_config_path = Path::new("Settings.toml");
        if default_config_path.exists() {
            settings = Self::from_file(default_config_path)?;
            log::debug!(
                "Loaded base settings from {}",
                default_config_path.display()
            );
        }

        if let Ok(config_dir) = std::env::var(CONFIG_DIR_ENV) {
            let config_path = Path::new(&config_dir).join("Settings.toml");
            if config_path.exists() {
                settings = Self::from_file(&config_path)?;
                log::debug!("Overriding settings from {}", config_path.display());
            } else {
                log::debug!(
                    "{CONFIG_DIR_ENV} set but no Settings.toml found at: {}",
                    config_path.display()
                );
            }
        }

        Ok(settings)
    }

    /// Apply environment variable overrides to settings
    pub fn apply_env_overrides(settings: &mut Self) {
        if let Ok(origin) = std::env::var("SESSION_ORIGIN") {
            settings.application.origin = origin;
        }

        let session = &mut settings.session;
        Self::apply_numeric_env_override("REFRESH_MARGIN_SECS", &mut session.refresh_margin_secs);
        Self::apply_numeric_env_override("LOGIN_INFO_WAIT_MS", &mut session.login_info_wait_ms);
        Self::apply_numeric_env_override("SESSION_COOKIE_HOURS", &mut session.session_cookie_hours);
        Self::apply_numeric_env_override(
            "KEEP_LOGIN_COOKIE_DAYS",
            &mut session.keep_login_cookie_days,
        );

        let bridge = &mut settings.bridge;
        if let Ok(handler) = std::env::var("BRIDGE_HANDLER") {
            bridge.handler_name = handler;
        }
        Self::apply_numeric_env_override("BRIDGE_STATUS_TIMEOUT_MS", &mut bridge.status_timeout_ms);
        Self::apply_numeric_env_override(
            "BRIDGE_INTERACTIVE_TIMEOUT_MS",
            &mut bridge.interactive_timeout_ms,
        );

        if let Ok(url) = std::env::var("REFRESH_URL") {
            settings.refresh.url = url;
        }
        Self::apply_numeric_env_override(
            "REFRESH_TIMEOUT_SECS",
            &mut settings.refresh.request_timeout_secs,
        );

        if let Ok(path) = std::env::var("DURABLE_STORAGE_PATH") {
            settings.storage.durable_path = Some(path).filter(|p| !p.is_empty());
        }

        if let Ok(log_level) = std::env::var("RUST_LOG") {
            settings.logging.level = log_level;
        }
    }

    /// Helper function to apply numeric environment variable overrides
    fn apply_numeric_env_override(env_var: &str, target: &mut u64) {
        if let Ok(value_str) = std::env::var(env_var) {
            match value_str.parse::<u64>() {
                Ok(value) => *target = value,
                Err(e) => log::warn!("Ignoring {env_var}={value_str}: {e}"),
            }
        }
    }

    fn init_logging(&self) {
        let env = env_logger::Env::default().default_filter_or(self.logging.level.as_str());
        if let Err(e) = env_logger::Builder::from_env(env).try_init() {
            log::debug!("Logger already initialised: {e}");
        }
    }

    /// Parsed refresh endpoint
    ///
    /// # Errors
    ///
    /// Returns an error if the configured URL is not absolute
    pub fn refresh_endpoint(&self) -> Result<Url, url::ParseError> {
        Url::parse(&self.refresh.url)
    }

    #[must_use]
    pub fn refresh_margin(&self) -> Duration {
        Duration::from_secs(self.session.refresh_margin_secs)
    }

    #[must_use]
    pub fn login_info_wait(&self) -> Duration {
        Duration::from_millis(self.session.login_info_wait_ms)
    }

    #[must_use]
    pub fn session_cookie_lifetime(&self) -> Duration {
        Duration::from_secs(self.session.session_cookie_hours * 60 * 60)
    }

    #[must_use]
    pub fn keep_login_cookie_lifetime(&self) -> Duration {
        Duration::from_secs(self.session.keep_login_cookie_days * 24 * 60 * 60)
    }

    #[must_use]
    pub fn status_timeout(&self) -> Duration {
        Duration::from_millis(self.bridge.status_timeout_ms)
    }

    #[must_use]
    pub fn interactive_timeout(&self) -> Duration {
        Duration::from_millis(self.bridge.interactive_timeout_ms)
    }
}
