//! Config subcommand handlers.

use std::net::Ipv4Addr;

use dialoguer::{Input, Select};

use crate::cli::{ConfigArgs, ConfigCommand, GlobalOpts};
use crate::config::{self, Config, Profile};
use crate::error::CliError;
use crate::output;

// ── Helpers ─────────────────────────────────────────────────────────

const MASK: &str = "****";

/// Copy of the config with control keys masked.
fn redacted(cfg: &Config) -> Config {
    let mut cfg = cfg.clone();
    for profile in cfg.profiles.values_mut() {
        if profile.ctrl_key.is_some() {
            profile.ctrl_key = Some(MASK.into());
        }
    }
    cfg
}

/// Format config for display, masking sensitive fields.
fn format_config_redacted(cfg: &Config) -> String {
    use std::fmt::Write;
    let mut out = String::new();

    if let Some(ref default) = cfg.default_profile {
        let _ = writeln!(out, "default_profile = \"{default}\"");
    }
    let _ = writeln!(out);
    let _ = writeln!(out, "[defaults]");
    let _ = writeln!(out, "output = \"{}\"", cfg.defaults.output);
    let _ = writeln!(out, "color = \"{}\"", cfg.defaults.color);
    let _ = writeln!(out, "timeout_ms = {}", cfg.defaults.timeout_ms);
    let _ = writeln!(out, "retransmissions = {}", cfg.defaults.retransmissions);

    let mut names: Vec<_> = cfg.profiles.keys().collect();
    names.sort();
    for name in names {
        let p = &cfg.profiles[name];
        let _ = writeln!(out);
        let _ = writeln!(out, "[profiles.{name}]");
        let _ = writeln!(out, "host = \"{}\"", p.host);
        let _ = writeln!(out, "device_id = \"{}\"", p.device_id);
        if let Some(port) = p.port {
            let _ = writeln!(out, "port = {port}");
        }
        if p.ctrl_key.is_some() {
            let _ = writeln!(out, "ctrl_key = \"{MASK}\"");
        }
        if let Some(ref env) = p.ctrl_key_env {
            let _ = writeln!(out, "ctrl_key_env = \"{env}\"");
        }
        if let Some(ref app_id) = p.app_id {
            let _ = writeln!(out, "app_id = \"{app_id}\"");
        }
        if let Some(ms) = p.timeout_ms {
            let _ = writeln!(out, "timeout_ms = {ms}");
        }
        if let Some(secs) = p.heartbeat_secs {
            let _ = writeln!(out, "heartbeat_secs = {secs}");
        }
        if let Some(secs) = p.sync_interval_secs {
            let _ = writeln!(out, "sync_interval_secs = {secs}");
        }
    }

    out
}

fn profile_not_found(name: String, cfg: &Config) -> CliError {
    let mut available: Vec<_> = cfg.profiles.keys().cloned().collect();
    available.sort();
    CliError::ProfileNotFound {
        name,
        available: if available.is_empty() {
            "(none)".into()
        } else {
            available.join(", ")
        },
    }
}

/// Map a dialoguer / interactive I/O failure into CliError.
fn prompt_err(e: impl std::fmt::Display) -> CliError {
    CliError::Validation {
        field: "interactive".into(),
        reason: format!("prompt failed: {e}"),
    }
}

/// Ask where a control key goes. `Some` means plaintext in the config file.
fn prompt_key_storage(key: String, profile_name: &str) -> Result<Option<String>, CliError> {
    let choices = &[
        "Store in system keyring (recommended)",
        "Save to config file (plaintext)",
    ];
    let selection = Select::new()
        .with_prompt("Where to store the control key?")
        .items(choices)
        .default(0)
        .interact()
        .map_err(prompt_err)?;

    if selection == 0 {
        config::store_ctrl_key(profile_name, &key)?;
        eprintln!("   ✓ Control key stored in system keyring");
        Ok(None)
    } else {
        Ok(Some(key))
    }
}

// ── Handler ─────────────────────────────────────────────────────────

pub fn handle(args: ConfigArgs, global: &GlobalOpts) -> Result<(), CliError> {
    match args.command {
        // ── Init: interactive wizard ────────────────────────────────
        ConfigCommand::Init => {
            let config_path = config::config_path();
            eprintln!("ELRO Connects CLI configuration wizard");
            eprintln!("   Config path: {}\n", config_path.display());

            let profile_name: String = Input::new()
                .with_prompt("Profile name")
                .default("default".into())
                .interact_text()
                .map_err(prompt_err)?;

            let host: String = Input::new()
                .with_prompt("Hub IP address")
                .validate_with(|input: &String| -> Result<(), String> {
                    input
                        .trim()
                        .parse::<Ipv4Addr>()
                        .map(|_| ())
                        .map_err(|_| "expected an IPv4 address".into())
                })
                .interact_text()
                .map_err(prompt_err)?;

            let device_id: String = Input::new()
                .with_prompt("Hub id (ST_ followed by the MAC, or the bare MAC)")
                .interact_text()
                .map_err(prompt_err)?;
            let device_id = config::normalize_device_id(&device_id);

            let key = rpassword::prompt_password("Control key (empty for the hub default): ")
                .map_err(prompt_err)?;
            let ctrl_key = if key.is_empty() {
                None
            } else {
                prompt_key_storage(key, &profile_name)?
            };

            let mut cfg = config::load_config_or_default();
            cfg.profiles.insert(
                profile_name.clone(),
                Profile {
                    host: host.trim().to_owned(),
                    device_id,
                    ctrl_key,
                    ..Profile::default()
                },
            );
            cfg.default_profile = Some(profile_name.clone());
            config::save_config(&cfg)?;

            eprintln!("\n✓ Configuration written to {}", config_path.display());
            eprintln!("  Active profile: {profile_name}");
            eprintln!("\n  Test it: elro probe");
            Ok(())
        }

        // ── Show ────────────────────────────────────────────────────
        ConfigCommand::Show => {
            let cfg = redacted(&config::load_config_or_default());
            let out = output::render_single(&global.output, &cfg, format_config_redacted, |_| {
                "config".into()
            });
            output::print_output(&out, global.quiet);
            Ok(())
        }

        // ── Profiles ────────────────────────────────────────────────
        ConfigCommand::Profiles => {
            let cfg = config::load_config_or_default();
            let default = cfg.default_profile.as_deref().unwrap_or("default");
            if cfg.profiles.is_empty() {
                eprintln!("No profiles configured. Run: elro config init");
            } else {
                let mut names: Vec<_> = cfg.profiles.keys().collect();
                names.sort();
                for name in names {
                    let marker = if name == default { " *" } else { "" };
                    println!("{name}{marker}");
                }
            }
            Ok(())
        }

        // ── Use <name> ─────────────────────────────────────────────
        ConfigCommand::Use { name } => {
            let mut cfg = config::load_config_or_default();
            if !cfg.profiles.contains_key(&name) {
                return Err(profile_not_found(name, &cfg));
            }

            cfg.default_profile = Some(name.clone());
            config::save_config(&cfg)?;
            eprintln!("✓ Default profile set to '{name}'");
            Ok(())
        }

        // ── SetKey ──────────────────────────────────────────────────
        ConfigCommand::SetKey { profile } => {
            let cfg = config::load_config_or_default();
            let profile_name = profile.unwrap_or_else(|| config::active_profile_name(global, &cfg));
            if !cfg.profiles.contains_key(&profile_name) {
                return Err(profile_not_found(profile_name, &cfg));
            }

            let key = rpassword::prompt_password("Control key: ").map_err(prompt_err)?;
            if key.is_empty() {
                return Err(CliError::Validation {
                    field: "ctrl_key".into(),
                    reason: "control key cannot be empty".into(),
                });
            }
            config::store_ctrl_key(&profile_name, &key)?;
            eprintln!("✓ Control key for '{profile_name}' stored in system keyring");
            Ok(())
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::collections::HashMap;

    use super::*;
    use crate::config::Defaults;

    fn sample() -> Config {
        let mut profiles = HashMap::new();
        profiles.insert(
            "home".to_owned(),
            Profile {
                host: "192.168.1.40".into(),
                device_id: "ST_a0b1c2d3e4f5".into(),
                ctrl_key: Some("secret-key".into()),
                heartbeat_secs: Some(30),
                ..Profile::default()
            },
        );
        Config {
            default_profile: Some("home".into()),
            defaults: Defaults::default(),
            profiles,
        }
    }

    #[test]
    fn show_masks_control_keys() {
        let text = format_config_redacted(&redacted(&sample()));
        assert!(text.contains("[profiles.home]"));
        assert!(text.contains("host = \"192.168.1.40\""));
        assert!(text.contains("ctrl_key = \"****\""));
        assert!(text.contains("heartbeat_secs = 30"));
        assert!(!text.contains("secret-key"));

        let json = output::render_json(&redacted(&sample()), true);
        assert!(!json.contains("secret-key"));
    }

    #[test]
    fn unknown_profile_lists_alternatives() {
        let err = profile_not_found("office".into(), &sample());
        assert!(matches!(
            err,
            CliError::ProfileNotFound { ref available, .. } if available == "home"
        ));
    }
}
