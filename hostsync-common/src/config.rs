// SPDX-FileCopyrightText: 2025 hostsync contributors
// SPDX-License-Identifier: GPL-3.0-or-later

//! INI configuration loading.
//!
//! ```ini
//! [Host1x]
//! num_syncpoints = 192
//! hw_version = 6
//! intr_thread_name = host1x-intr
//!
//! [Fence]
//! wait_timeout_ms = 3000
//! ```

use std::path::{Path, PathBuf};

use ini::Ini;
use log::{debug, info, warn};

use crate::settings::Settings;

const CONFIG_DIR: &str = "hostsync";
const CONFIG_FILE: &str = "hostsync.ini";

/// Locate hostsync.ini under the user's config directory.
pub fn find_config_path() -> Option<PathBuf> {
    // XDG_CONFIG_HOME
    if let Ok(xdg) = std::env::var("XDG_CONFIG_HOME") {
        let path = PathBuf::from(&xdg).join(CONFIG_DIR).join(CONFIG_FILE);
        if path.exists() {
            return Some(path);
        }
    }

    // ~/.config/hostsync/hostsync.ini
    if let Ok(home) = std::env::var("HOME") {
        let path = PathBuf::from(&home)
            .join(".config")
            .join(CONFIG_DIR)
            .join(CONFIG_FILE);
        if path.exists() {
            return Some(path);
        }
    }

    None
}

/// Load settings from an INI file, falling back to defaults on any problem.
pub fn load_config(path: Option<&Path>) -> Settings {
    let config_path = match path {
        Some(p) => {
            if !p.exists() {
                warn!("Config file not found: {}", p.display());
                return Settings::default();
            }
            p.to_path_buf()
        }
        None => match find_config_path() {
            Some(p) => p,
            None => {
                info!("No hostsync config found, using defaults");
                return Settings::default();
            }
        },
    };

    info!("Loading config from: {}", config_path.display());

    match Ini::load_from_file(&config_path) {
        Ok(conf) => apply(&conf),
        Err(e) => {
            warn!("Failed to parse config: {}", e);
            Settings::default()
        }
    }
}

/// Parse settings from INI text.
pub fn parse_config(text: &str) -> Settings {
    match Ini::load_from_str(text) {
        Ok(conf) => apply(&conf),
        Err(e) => {
            warn!("Failed to parse config: {}", e);
            Settings::default()
        }
    }
}

fn apply(conf: &Ini) -> Settings {
    let mut settings = Settings::default();

    // [Host1x]
    if let Some(section) = conf.section(Some("Host1x")) {
        if let Some(count) = section.get("num_syncpoints") {
            match count.trim().parse::<u32>() {
                Ok(n) if n > 0 => settings.num_syncpoints = n,
                _ => warn!("Ignoring invalid num_syncpoints: {}", count),
            }
        }
        if let Some(version) = section.get("hw_version") {
            settings.hw_version = version.trim().parse().unwrap_or(settings.hw_version);
            debug!("Host1x hw version: {}", settings.hw_version);
        }
        if let Some(name) = section.get("intr_thread_name") {
            let name = name.trim();
            if !name.is_empty() {
                settings.intr_thread_name = name.to_string();
            }
        }
    }

    // [Fence]
    if let Some(section) = conf.section(Some("Fence")) {
        if let Some(timeout) = section.get("wait_timeout_ms") {
            settings.wait_timeout_ms = timeout.trim().parse().unwrap_or(settings.wait_timeout_ms);
        }
    }

    settings
}
