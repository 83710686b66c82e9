//! # Configuration
//!
//! [`NotionConfig`] holds everything needed to reach a device and decide
//! which transport to use.
//!
//! ## Loading Priority
//!
//! Configuration is loaded from the first source that provides a value:
//!
//! 1. Explicit struct fields (programmatic construction)
//! 2. Environment variables (`NEURO_DEVICE_ID`, `NEURO_CLOUD`, etc.)
//! 3. TOML config file at an explicit path
//! 4. `./notion.toml` in the current directory
//! 5. `~/.config/neurosity/notion.toml`
//!
//! Individual fields can always be overridden by environment variables,
//! even when loading from a file.
//!
//! ```toml
//! device_id = "2a8e7f6c..."
//! cloud = true
//!
//! [oauth]
//! oauth = true
//! auth_id = "grant-123"
//! scopes = "read:kinesis,read:calm"
//!
//! [auth]
//! unknown_scope = "deny"
//! ```

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::auth::OAuthClaims;
use crate::error::{NotionError, NotionResult};
use crate::scopes::UnknownScopePolicy;

/// Default local device socket URL.
pub const DEFAULT_SOCKET_URL: &str = "ws://localhost:8080";

/// Default cloud relay URL.
pub const DEFAULT_RELAY_URL: &str = "wss://relay.neurosity.co";

/// Default connect timeout in seconds.
const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 5;

/// Default request timeout in seconds.
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 10;

/// Configuration for a Notion client.
///
/// # Examples
///
/// ## From environment variables
///
/// ```no_run
/// use neurosity_notion::config::NotionConfig;
///
/// // Set NEURO_DEVICE_ID, then:
/// let config = NotionConfig::from_env().expect("Missing env vars");
/// ```
///
/// ## Programmatic
///
/// ```
/// use neurosity_notion::config::NotionConfig;
///
/// let mut config = NotionConfig::new("my-device-id");
/// config.cloud = true;
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotionConfig {
    /// ID of the device to talk to.
    pub device_id: String,

    /// Route through the cloud relay instead of the local socket.
    #[serde(default)]
    pub cloud: bool,

    /// Connect during construction.
    #[serde(default = "default_true")]
    pub auto_connect: bool,

    /// Base URL of the device's local socket; the device id is appended.
    #[serde(default = "default_socket_url")]
    pub socket_url: String,

    /// URL of the cloud relay.
    #[serde(default = "default_relay_url")]
    pub relay_url: String,

    /// Allow insecure TLS connections to non-localhost hosts.
    /// Only enable this for development/testing.
    #[serde(default)]
    pub allow_insecure_tls: bool,

    /// OAuth claims for third-party sessions. Absent means unauthenticated.
    #[serde(default)]
    pub oauth: Option<OAuthClaims>,

    /// Authorization behavior.
    #[serde(default)]
    pub auth: AuthConfig,

    /// Timeout configuration.
    #[serde(default)]
    pub timeouts: TimeoutConfig,
}

/// Authorization settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuthConfig {
    /// How keys missing from the scope tables are treated.
    #[serde(default)]
    pub unknown_scope: UnknownScopePolicy,
}

/// Timeout settings for transport operations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeoutConfig {
    /// Timeout for the WebSocket handshake, in seconds.
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    /// Timeout for individual requests, in seconds.
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

// ─── Defaults ───────────────────────────────────────────────────────────

fn default_true() -> bool {
    true
}

fn default_socket_url() -> String {
    DEFAULT_SOCKET_URL.to_string()
}

fn default_relay_url() -> String {
    DEFAULT_RELAY_URL.to_string()
}

fn default_connect_timeout() -> u64 {
    DEFAULT_CONNECT_TIMEOUT_SECS
}

fn default_request_timeout() -> u64 {
    DEFAULT_REQUEST_TIMEOUT_SECS
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            connect_timeout_secs: DEFAULT_CONNECT_TIMEOUT_SECS,
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
        }
    }
}

impl TimeoutConfig {
    /// Connect timeout as a [`Duration`].
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    /// Request timeout as a [`Duration`].
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

// ─── NotionConfig impl ──────────────────────────────────────────────────

impl NotionConfig {
    /// Create a config for a device (all other fields use defaults).
    pub fn new(device_id: impl Into<String>) -> Self {
        Self {
            device_id: device_id.into(),
            cloud: false,
            auto_connect: true,
            socket_url: default_socket_url(),
            relay_url: default_relay_url(),
            allow_insecure_tls: false,
            oauth: None,
            auth: AuthConfig::default(),
            timeouts: TimeoutConfig::default(),
        }
    }

    /// Load config from environment variables.
    ///
    /// Required: `NEURO_DEVICE_ID`
    ///
    /// Optional: `NEURO_CLOUD`, `NEURO_SOCKET_URL`, `NEURO_RELAY_URL`,
    /// `NEURO_AUTH_ID`, `NEURO_OAUTH_SCOPES`
    pub fn from_env() -> NotionResult<Self> {
        let device_id = std::env::var("NEURO_DEVICE_ID").map_err(|_| NotionError::ConfigError {
            reason: "NEURO_DEVICE_ID environment variable not set".into(),
        })?;

        let mut config = Self::new(device_id);
        config.apply_env_overrides();
        Ok(config)
    }

    /// Load config from a TOML file, with environment variable overrides.
    pub fn from_file(path: impl AsRef<Path>) -> NotionResult<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|e| NotionError::ConfigError {
            reason: format!("Failed to read config file '{}': {}", path.display(), e),
        })?;
        let mut config = Self::parse_toml(&contents)?;

        if let Ok(id) = std::env::var("NEURO_DEVICE_ID") {
            config.device_id = id;
        }
        config.apply_env_overrides();

        Ok(config)
    }

    #[cfg(feature = "config-toml")]
    fn parse_toml(contents: &str) -> NotionResult<Self> {
        Ok(toml::from_str(contents)?)
    }

    #[cfg(not(feature = "config-toml"))]
    fn parse_toml(_contents: &str) -> NotionResult<Self> {
        Err(NotionError::ConfigError {
            reason: "TOML config files need the `config-toml` feature".into(),
        })
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(cloud) = std::env::var("NEURO_CLOUD") {
            self.cloud = matches!(cloud.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes");
        }
        if let Ok(url) = std::env::var("NEURO_SOCKET_URL") {
            self.socket_url = url;
        }
        if let Ok(url) = std::env::var("NEURO_RELAY_URL") {
            self.relay_url = url;
        }
        if let Ok(scopes) = std::env::var("NEURO_OAUTH_SCOPES") {
            let oauth = self.oauth.get_or_insert_with(OAuthClaims::default);
            oauth.oauth = true;
            oauth.scopes = Some(scopes);
        }
        if let Ok(auth_id) = std::env::var("NEURO_AUTH_ID") {
            self.oauth.get_or_insert_with(OAuthClaims::default).auth_id = Some(auth_id);
        }
    }

    /// Discover and load config from the standard search path:
    ///
    /// 1. Explicit path (if `Some`)
    /// 2. `NEURO_CONFIG` environment variable
    /// 3. `./notion.toml`
    /// 4. `~/.config/neurosity/notion.toml`
    ///
    /// Falls back to environment-variable-only config if no file is found.
    pub fn discover(explicit_path: Option<&Path>) -> NotionResult<Self> {
        if let Some(path) = explicit_path {
            return Self::from_file(path);
        }

        if let Ok(path) = std::env::var("NEURO_CONFIG") {
            let path = PathBuf::from(path);
            if path.exists() {
                return Self::from_file(&path);
            }
        }

        let local_path = PathBuf::from("notion.toml");
        if local_path.exists() {
            return Self::from_file(&local_path);
        }

        if let Some(config_path) = dirs_config_path() {
            if config_path.exists() {
                return Self::from_file(&config_path);
            }
        }

        Self::from_env()
    }

    /// URL of the device's local socket.
    pub fn local_url(&self) -> String {
        format!("{}/{}", self.socket_url.trim_end_matches('/'), self.device_id)
    }

    /// URL of the transport selected by [`cloud`](Self::cloud).
    pub fn transport_url(&self) -> String {
        if self.cloud {
            self.relay_url.clone()
        } else {
            self.local_url()
        }
    }

    /// Returns `true` if insecure TLS should be allowed for the transport URL.
    ///
    /// Always allowed for `localhost`, `127.0.0.1` and `[::1]` (devices use
    /// self-signed certs). For other hosts, `allow_insecure_tls` must be set.
    pub fn should_accept_invalid_certs(&self) -> bool {
        if is_localhost(&self.transport_url()) {
            return true;
        }
        self.allow_insecure_tls
    }
}

// ─── Helpers ────────────────────────────────────────────────────────────

/// Check if a WebSocket URL points to localhost.
fn is_localhost(url: &str) -> bool {
    let rest = url
        .strip_prefix("wss://")
        .or_else(|| url.strip_prefix("ws://"))
        .unwrap_or(url);
    let authority = rest.split('/').next().unwrap_or(rest);

    if let Some(rest) = authority.strip_prefix('[') {
        let host = rest.split(']').next().unwrap_or("");
        return host == "::1";
    }

    let host = match authority.rfind(':') {
        Some(idx) => &authority[..idx],
        None => authority,
    };
    matches!(host, "localhost" | "127.0.0.1")
}

/// Platform-appropriate config file path.
fn dirs_config_path() -> Option<PathBuf> {
    #[cfg(target_os = "windows")]
    {
        std::env::var("APPDATA")
            .ok()
            .map(|dir| PathBuf::from(dir).join("neurosity").join("notion.toml"))
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var("HOME").ok().map(|dir| {
            PathBuf::from(dir)
                .join(".config")
                .join("neurosity")
                .join("notion.toml")
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::ffi::OsString;
    use std::fs;
    use std::sync::Mutex;
    use std::time::{SystemTime, UNIX_EPOCH};

    static ENV_LOCK: Mutex<()> = Mutex::new(());

    const ENV_KEYS: [&str; 7] = [
        "NEURO_DEVICE_ID",
        "NEURO_CLOUD",
        "NEURO_SOCKET_URL",
        "NEURO_RELAY_URL",
        "NEURO_OAUTH_SCOPES",
        "NEURO_AUTH_ID",
        "NEURO_CONFIG",
    ];

    #[allow(unsafe_code)]
    fn set_env(key: &str, value: impl AsRef<std::ffi::OsStr>) {
        // SAFETY: every test touching the environment holds ENV_LOCK.
        unsafe { std::env::set_var(key, value) }
    }

    #[allow(unsafe_code)]
    fn remove_env(key: &str) {
        // SAFETY: every test touching the environment holds ENV_LOCK.
        unsafe { std::env::remove_var(key) }
    }

    struct EnvGuard {
        saved: Vec<(&'static str, Option<OsString>)>,
    }

    impl EnvGuard {
        fn capture(keys: &[&'static str]) -> Self {
            let saved = keys.iter().map(|k| (*k, std::env::var_os(k))).collect();
            for key in keys {
                remove_env(key);
            }
            Self { saved }
        }
    }

    impl Drop for EnvGuard {
        fn drop(&mut self) {
            for (key, value) in &self.saved {
                match value {
                    Some(value) => set_env(key, value),
                    None => remove_env(key),
                }
            }
        }
    }

    fn env_lock() -> std::sync::MutexGuard<'static, ()> {
        ENV_LOCK
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn unique_temp_dir(label: &str) -> PathBuf {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_nanos();
        let dir = std::env::temp_dir().join(format!(
            "neurosity-notion-config-tests-{}-{}-{}",
            label,
            std::process::id(),
            now
        ));
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn test_new_defaults() {
        let config = NotionConfig::new("device-1");
        assert_eq!(config.device_id, "device-1");
        assert!(!config.cloud);
        assert!(config.auto_connect);
        assert_eq!(config.socket_url, DEFAULT_SOCKET_URL);
        assert_eq!(config.relay_url, DEFAULT_RELAY_URL);
        assert!(config.oauth.is_none());
        assert_eq!(config.auth.unknown_scope, UnknownScopePolicy::Unrestricted);
        assert_eq!(config.timeouts.connect_timeout(), Duration::from_secs(5));
        assert_eq!(config.timeouts.request_timeout(), Duration::from_secs(10));
    }

    #[test]
    fn test_transport_url_follows_cloud_flag() {
        let mut config = NotionConfig::new("abc");
        config.socket_url = "ws://192.168.1.20:8080/".into();
        assert_eq!(config.transport_url(), "ws://192.168.1.20:8080/abc");

        config.cloud = true;
        assert_eq!(config.transport_url(), DEFAULT_RELAY_URL);
    }

    #[test]
    fn test_is_localhost() {
        assert!(is_localhost("ws://localhost:8080/device"));
        assert!(is_localhost("wss://127.0.0.1:8080"));
        assert!(is_localhost("ws://[::1]:8080/device"));
        assert!(!is_localhost("wss://relay.neurosity.co"));
        assert!(!is_localhost("ws://192.168.1.20:8080/device"));
    }

    #[test]
    fn test_should_accept_invalid_certs() {
        let mut config = NotionConfig::new("abc");
        assert!(config.should_accept_invalid_certs());

        config.cloud = true;
        assert!(!config.should_accept_invalid_certs());

        config.allow_insecure_tls = true;
        assert!(config.should_accept_invalid_certs());
    }

    #[cfg(feature = "config-toml")]
    #[test]
    fn test_deserialize_toml() {
        let toml_str = r#"
            device_id = "abc"
            cloud = true
            auto_connect = false
            relay_url = "wss://relay.example"

            [oauth]
            oauth = true
            auth_id = "grant-1"
            scopes = "read:kinesis,read:calm"

            [auth]
            unknown_scope = "deny"

            [timeouts]
            request_timeout_secs = 30
        "#;

        let config: NotionConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.device_id, "abc");
        assert!(config.cloud);
        assert!(!config.auto_connect);
        assert_eq!(config.relay_url, "wss://relay.example");
        let oauth = config.oauth.unwrap();
        assert!(oauth.oauth);
        assert_eq!(oauth.auth_id.as_deref(), Some("grant-1"));
        assert_eq!(oauth.scopes.as_deref(), Some("read:kinesis,read:calm"));
        assert_eq!(config.auth.unknown_scope, UnknownScopePolicy::Deny);
        assert_eq!(config.timeouts.request_timeout_secs, 30);
        assert_eq!(config.timeouts.connect_timeout_secs, 5);
    }

    #[test]
    fn test_from_env_requires_device_and_applies_overrides() {
        let _lock = env_lock();
        let _env = EnvGuard::capture(&ENV_KEYS);

        let missing = NotionConfig::from_env().unwrap_err();
        assert!(matches!(missing, NotionError::ConfigError { .. }));
        assert!(missing.to_string().contains("NEURO_DEVICE_ID"));

        set_env("NEURO_DEVICE_ID", "env-device");
        set_env("NEURO_CLOUD", "true");
        set_env("NEURO_RELAY_URL", "wss://env.example");
        set_env("NEURO_OAUTH_SCOPES", "read:focus");
        set_env("NEURO_AUTH_ID", "env-grant");

        let config = NotionConfig::from_env().unwrap();
        assert_eq!(config.device_id, "env-device");
        assert!(config.cloud);
        assert_eq!(config.relay_url, "wss://env.example");
        let oauth = config.oauth.unwrap();
        assert!(oauth.oauth);
        assert_eq!(oauth.scopes.as_deref(), Some("read:focus"));
        assert_eq!(oauth.auth_id.as_deref(), Some("env-grant"));
    }

    #[cfg(feature = "config-toml")]
    #[test]
    fn test_from_file_env_overrides_precedence() {
        let _lock = env_lock();
        let _env = EnvGuard::capture(&ENV_KEYS);

        let dir = unique_temp_dir("from-file-overrides");
        let config_path = dir.join("notion.toml");
        fs::write(
            &config_path,
            r#"
device_id = "file-device"
socket_url = "ws://file.example:8080"
"#,
        )
        .unwrap();

        set_env("NEURO_DEVICE_ID", "env-device");
        set_env("NEURO_SOCKET_URL", "ws://env.example:8080");

        let config = NotionConfig::from_file(&config_path).unwrap();
        assert_eq!(config.device_id, "env-device");
        assert_eq!(config.socket_url, "ws://env.example:8080");

        fs::remove_dir_all(dir).unwrap();
    }

    #[cfg(feature = "config-toml")]
    #[test]
    fn test_discover_prefers_explicit_then_env_pointer() {
        let _lock = env_lock();
        let _env = EnvGuard::capture(&ENV_KEYS);

        let dir = unique_temp_dir("discover");
        let explicit = dir.join("explicit.toml");
        let pointed = dir.join("pointed.toml");
        fs::write(&explicit, "device_id = \"explicit\"\n").unwrap();
        fs::write(&pointed, "device_id = \"pointed\"\n").unwrap();
        set_env("NEURO_CONFIG", &pointed);

        assert_eq!(
            NotionConfig::discover(Some(&explicit)).unwrap().device_id,
            "explicit"
        );
        assert_eq!(NotionConfig::discover(None).unwrap().device_id, "pointed");

        fs::remove_dir_all(dir).unwrap();
    }

    #[test]
    fn test_from_file_missing_errors() {
        let _lock = env_lock();
        let dir = unique_temp_dir("from-file-errors");

        let missing = NotionConfig::from_file(dir.join("missing.toml")).unwrap_err();
        assert!(matches!(missing, NotionError::ConfigError { .. }));
        assert!(missing.to_string().contains("Failed to read config file"));

        fs::remove_dir_all(dir).unwrap();
    }

    #[cfg(feature = "config-toml")]
    #[test]
    fn test_from_file_invalid_errors() {
        let _lock = env_lock();
        let dir = unique_temp_dir("from-file-invalid");
        let invalid_path = dir.join("invalid.toml");
        fs::write(&invalid_path, "device_id = [").unwrap();

        let invalid = NotionConfig::from_file(&invalid_path).unwrap_err();
        assert!(matches!(invalid, NotionError::ConfigError { .. }));

        fs::remove_dir_all(dir).unwrap();
    }
}
