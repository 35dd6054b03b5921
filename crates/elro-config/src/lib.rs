//! Persistent configuration for the ELRO CLI.
//!
//! TOML profiles (one per hub), control-key resolution (env + keyring +
//! plaintext) and translation to `elro_core::HubConfig`.

use std::collections::HashMap;
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use elro_core::HubConfig;
use elro_core::config::DEVICE_ID_PREFIX;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use thiserror::Error;

const KEYRING_SERVICE: &str = "elro";

// ── Error ───────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {field}: {reason}")]
    Validation { field: String, reason: String },

    #[error("profile '{name}' not found")]
    UnknownProfile { name: String },

    #[error("keyring error: {0}")]
    Keyring(#[from] keyring::Error),

    #[error("failed to serialize config: {0}")]
    Serialization(#[from] toml::ser::Error),

    #[error("config loading failed: {0}")]
    Figment(Box<figment::Error>),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self::Figment(Box::new(err))
    }
}

// ── TOML config structs ─────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    /// Profile used when `--profile` is not given.
    pub default_profile: Option<String>,

    #[serde(default)]
    pub defaults: Defaults,

    /// Named hub profiles.
    #[serde(default)]
    pub profiles: HashMap<String, Profile>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            default_profile: Some("default".into()),
            defaults: Defaults::default(),
            profiles: HashMap::new(),
        }
    }
}

impl Config {
    /// The named profile, or the default one when `name` is `None`.
    pub fn profile(&self, name: Option<&str>) -> Result<(String, &Profile), ConfigError> {
        let name = name
            .or(self.default_profile.as_deref())
            .unwrap_or("default")
            .to_owned();
        self.profiles
            .get(&name)
            .map(|profile| (name.clone(), profile))
            .ok_or(ConfigError::UnknownProfile { name })
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Defaults {
    #[serde(default = "default_output")]
    pub output: String,

    #[serde(default = "default_color")]
    pub color: String,

    /// Per-request reply deadline in milliseconds.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    #[serde(default = "default_retransmissions")]
    pub retransmissions: u32,
}

impl Default for Defaults {
    fn default() -> Self {
        Self {
            output: default_output(),
            color: default_color(),
            timeout_ms: default_timeout_ms(),
            retransmissions: default_retransmissions(),
        }
    }
}

fn default_output() -> String {
    "table".into()
}
fn default_color() -> String {
    "auto".into()
}
fn default_timeout_ms() -> u64 {
    3000
}
fn default_retransmissions() -> u32 {
    2
}

/// One hub.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
pub struct Profile {
    /// Hub IP address on the LAN.
    pub host: String,

    /// Hub id (`ST_` + MAC). A bare MAC gets the prefix added.
    pub device_id: String,

    /// UDP port override (1025 when unset).
    pub port: Option<u16>,

    /// Control key (plaintext; prefer keyring or env var).
    pub ctrl_key: Option<String>,

    /// Environment variable holding the control key.
    pub ctrl_key_env: Option<String>,

    pub app_id: Option<String>,

    /// Override of `defaults.timeout_ms`.
    pub timeout_ms: Option<u64>,

    pub heartbeat_secs: Option<u64>,

    /// Periodic full sync; `0` disables it.
    pub sync_interval_secs: Option<u64>,
}

// ── Config file path ────────────────────────────────────────────────

/// Resolve the config file path via XDG / platform conventions.
pub fn config_path() -> PathBuf {
    ProjectDirs::from("com", "elro", "elro").map_or_else(
        || {
            let mut p = dirs_fallback();
            p.push("config.toml");
            p
        },
        |dirs| dirs.config_dir().join("config.toml"),
    )
}

fn dirs_fallback() -> PathBuf {
    let mut p = PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| ".".into()));
    p.push(".config");
    p.push("elro");
    p
}

// ── Config loading ──────────────────────────────────────────────────

/// Load the full Config from the canonical file + environment.
pub fn load_config() -> Result<Config, ConfigError> {
    load_config_from(&config_path())
}

/// Defaults, then the TOML file at `path`, then `ELRO_*` variables
/// (`ELRO_DEFAULTS__TIMEOUT_MS=5000`).
pub fn load_config_from(path: &Path) -> Result<Config, ConfigError> {
    let figment = Figment::new()
        .merge(Serialized::defaults(Config::default()))
        .merge(Toml::file(path))
        .merge(Env::prefixed("ELRO_").split("__"));

    let config: Config = figment.extract()?;
    Ok(config)
}

/// Load config, returning a default if the file doesn't exist.
pub fn load_config_or_default() -> Config {
    load_config().unwrap_or_default()
}

// ── Config saving ───────────────────────────────────────────────────

pub fn save_config(cfg: &Config) -> Result<(), ConfigError> {
    save_config_to(cfg, &config_path())
}

pub fn save_config_to(cfg: &Config, path: &Path) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let toml_str = toml::to_string_pretty(cfg)?;
    std::fs::write(path, toml_str)?;
    Ok(())
}

// ── Control key ─────────────────────────────────────────────────────

fn keyring_entry(profile_name: &str) -> Result<keyring::Entry, keyring::Error> {
    keyring::Entry::new(KEYRING_SERVICE, &format!("{profile_name}/ctrl-key"))
}

/// Store a profile's control key in the system keyring.
pub fn store_ctrl_key(profile_name: &str, key: &str) -> Result<(), ConfigError> {
    keyring_entry(profile_name)?.set_password(key)?;
    Ok(())
}

/// Resolve the control key: `ctrl_key_env` → keyring → plaintext.
///
/// `None` means the hub's default key applies.
pub fn resolve_ctrl_key(profile: &Profile, profile_name: &str) -> Option<SecretString> {
    resolve_ctrl_key_from(
        profile,
        |name| std::env::var(name).ok(),
        || {
            keyring_entry(profile_name)
                .and_then(|entry| entry.get_password())
                .ok()
        },
    )
}

fn resolve_ctrl_key_from(
    profile: &Profile,
    env: impl Fn(&str) -> Option<String>,
    keyring: impl FnOnce() -> Option<String>,
) -> Option<SecretString> {
    profile
        .ctrl_key_env
        .as_deref()
        .and_then(env)
        .or_else(keyring)
        .or_else(|| profile.ctrl_key.clone())
        .filter(|key| !key.is_empty())
        .map(SecretString::from)
}

// ── Profile → HubConfig ─────────────────────────────────────────────

/// Build a `HubConfig` from a profile, resolving the control key.
pub fn profile_to_hub_config(
    profile: &Profile,
    profile_name: &str,
    defaults: &Defaults,
) -> Result<HubConfig, ConfigError> {
    build_hub_config(profile, defaults, || resolve_ctrl_key(profile, profile_name))
}

/// Build a `HubConfig` with a caller-supplied control key source.
///
/// `ctrl_key` runs only once the address has been validated.
pub fn build_hub_config(
    profile: &Profile,
    defaults: &Defaults,
    ctrl_key: impl FnOnce() -> Option<SecretString>,
) -> Result<HubConfig, ConfigError> {
    let host: IpAddr = profile
        .host
        .trim()
        .parse()
        .map_err(|_| ConfigError::Validation {
            field: "host".into(),
            reason: format!("expected an IP address, got '{}'", profile.host),
        })?;

    let device_id = normalize_device_id(&profile.device_id);
    let mut config = HubConfig::new(host, device_id);
    if let Some(port) = profile.port {
        config.port = port;
    }
    if let Some(key) = ctrl_key() {
        config.ctrl_key = key;
    }
    if let Some(ref app_id) = profile.app_id {
        config.app_id.clone_from(app_id);
    }
    config.transaction_timeout =
        Duration::from_millis(profile.timeout_ms.unwrap_or(defaults.timeout_ms));
    config.retransmissions = defaults.retransmissions;
    if let Some(secs) = profile.heartbeat_secs {
        config.heartbeat_interval = Duration::from_secs(secs);
    }
    if let Some(secs) = profile.sync_interval_secs {
        config.sync_interval = (secs > 0).then(|| Duration::from_secs(secs));
    }

    config.validate().map_err(|e| ConfigError::Validation {
        field: "profile".into(),
        reason: e.to_string(),
    })?;
    Ok(config)
}

/// Accept `ST_<mac>`, a bare MAC, or a MAC with separators.
pub fn normalize_device_id(raw: &str) -> String {
    let raw = raw.trim();
    if raw.starts_with(DEVICE_ID_PREFIX) {
        return raw.to_owned();
    }
    let mac: String = raw
        .chars()
        .filter(|c| !matches!(c, ':' | '-'))
        .map(|c| c.to_ascii_lowercase())
        .collect();
    format!("{DEVICE_ID_PREFIX}{mac}")
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use pretty_assertions::assert_eq;
    use secrecy::ExposeSecret;

    use super::*;

    fn profile() -> Profile {
        Profile {
            host: "192.168.1.50".into(),
            device_id: "ST_0123456789ab".into(),
            ..Profile::default()
        }
    }

    #[test]
    fn loads_profiles_from_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            r#"
default_profile = "home"

[defaults]
timeout_ms = 1500

[profiles.home]
host = "10.0.0.7"
device_id = "ST_aabbccddeeff"
sync_interval_secs = 0
"#,
        )
        .unwrap();

        let config = load_config_from(&path).unwrap();
        assert_eq!(config.defaults.timeout_ms, 1500);
        assert_eq!(config.defaults.output, "table");

        let (name, home) = config.profile(None).unwrap();
        assert_eq!(name, "home");
        assert_eq!(home.host, "10.0.0.7");
        assert!(matches!(
            config.profile(Some("cabin")),
            Err(ConfigError::UnknownProfile { .. })
        ));
    }

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = load_config_from(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(config.default_profile.as_deref(), Some("default"));
        assert!(config.profiles.is_empty());
    }

    #[test]
    fn save_then_load_keeps_profiles() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");
        let mut config = Config::default();
        config.profiles.insert("default".into(), profile());

        save_config_to(&config, &path).unwrap();
        let loaded = load_config_from(&path).unwrap();
        assert_eq!(loaded.profiles.get("default"), Some(&profile()));
    }

    #[test]
    fn ctrl_key_prefers_env_then_keyring_then_plaintext() {
        let mut p = profile();
        p.ctrl_key = Some("plain".into());
        p.ctrl_key_env = Some("HUB_KEY".into());

        let from_env = resolve_ctrl_key_from(&p, |_| Some("env".into()), || Some("ring".into()));
        assert_eq!(from_env.unwrap().expose_secret(), "env");

        let from_ring = resolve_ctrl_key_from(&p, |_| None, || Some("ring".into()));
        assert_eq!(from_ring.unwrap().expose_secret(), "ring");

        let plain = resolve_ctrl_key_from(&p, |_| None, || None);
        assert_eq!(plain.unwrap().expose_secret(), "plain");

        assert!(resolve_ctrl_key_from(&profile(), |_| None, || None).is_none());
    }

    #[test]
    fn builds_hub_config_with_overrides() {
        let mut p = profile();
        p.port = Some(1026);
        p.timeout_ms = Some(500);
        p.sync_interval_secs = Some(0);

        let config = build_hub_config(&p, &Defaults::default(), || None).unwrap();
        assert_eq!(config.hub_addr().to_string(), "192.168.1.50:1026");
        assert_eq!(config.transaction_timeout, Duration::from_millis(500));
        assert_eq!(config.sync_interval, None);
        assert_eq!(config.ctrl_key.expose_secret(), "0");
    }

    #[test]
    fn rejects_hostname_and_normalizes_mac() {
        let mut p = profile();
        p.host = "hub.local".into();
        assert!(matches!(
            build_hub_config(&p, &Defaults::default(), || None),
            Err(ConfigError::Validation { .. })
        ));

        assert_eq!(normalize_device_id("AA:BB:CC:DD:EE:FF"), "ST_aabbccddeeff");
        assert_eq!(normalize_device_id("ST_0123456789ab"), "ST_0123456789ab");
    }
}
