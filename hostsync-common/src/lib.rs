// SPDX-FileCopyrightText: 2025 hostsync contributors
// SPDX-License-Identifier: GPL-3.0-or-later

pub mod config;
pub mod error;
pub mod settings;
pub mod types;

pub use error::{Error, Result};
pub use settings::Settings;
pub use types::*;
