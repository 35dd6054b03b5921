//! CLI configuration: thin wrapper around `elro_config` that applies
//! `GlobalOpts` flag overrides (--host, --device-id, --ctrl-key, --timeout).

use secrecy::SecretString;

use elro_core::HubConfig;

use crate::cli::GlobalOpts;
use crate::error::CliError;

// ── Re-exports from shared crate ────────────────────────────────────

pub use elro_config::{
    Config, Defaults, Profile, config_path, load_config_or_default, normalize_device_id,
    save_config, store_ctrl_key,
};

// ── CLI-specific helpers ────────────────────────────────────────────

/// Resolve the active profile name from CLI flags and config.
pub fn active_profile_name(global: &GlobalOpts, config: &Config) -> String {
    global
        .profile
        .clone()
        .or_else(|| config.default_profile.clone())
        .unwrap_or_else(|| "default".into())
}

/// Build the `HubConfig` for this invocation.
///
/// Flags override the active profile. Without a profile, `--host` and
/// `--device-id` are enough.
pub fn resolve_hub_config(global: &GlobalOpts) -> Result<HubConfig, CliError> {
    let cfg = load_config_or_default();
    let profile_name = active_profile_name(global, &cfg);

    let mut profile = match cfg.profiles.get(&profile_name) {
        Some(profile) => profile.clone(),
        None if global.profile.is_some() => {
            let mut available: Vec<_> = cfg.profiles.keys().cloned().collect();
            available.sort();
            return Err(CliError::ProfileNotFound {
                name: profile_name,
                available: if available.is_empty() {
                    "(none)".into()
                } else {
                    available.join(", ")
                },
            });
        }
        None => {
            if global.host.is_none() {
                return Err(CliError::NoConfig {
                    path: config_path().display().to_string(),
                });
            }
            Profile::default()
        }
    };

    if let Some(ref host) = global.host {
        profile.host.clone_from(host);
    }
    if let Some(ref device_id) = global.device_id {
        profile.device_id.clone_from(device_id);
    }
    if profile.device_id.trim().is_empty() {
        return Err(CliError::Validation {
            field: "device-id".into(),
            reason: "required when the profile does not set one".into(),
        });
    }

    let flag_key = global.ctrl_key.clone().map(SecretString::from);
    let mut hub = elro_config::build_hub_config(&profile, &cfg.defaults, || {
        flag_key.or_else(|| elro_config::resolve_ctrl_key(&profile, &profile_name))
    })?;

    if let Some(timeout) = global.timeout {
        hub.transaction_timeout = timeout;
    }
    Ok(hub)
}
