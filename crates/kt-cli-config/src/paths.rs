// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Config file and state directory locations.

use std::path::{Path, PathBuf};

use crate::ConfigError;

pub const SYSTEM_CONFIG_FILE: &str = "/etc/kt/config.toml";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathsConfig {
	/// User config file: $XDG_CONFIG_HOME/kt/config.toml
	pub user_config_file: PathBuf,
	/// System config file: /etc/kt/config.toml
	pub system_config_file: PathBuf,
	pub home_dir: PathBuf,
}

impl PathsConfig {
	/// All paths derived from a home directory and an optional
	/// `XDG_CONFIG_HOME`.
	pub fn from_home(home: impl Into<PathBuf>, config_home: Option<PathBuf>) -> Self {
		let home = home.into();
		let config_home = config_home.unwrap_or_else(|| home.join(".config"));
		Self {
			user_config_file: config_home.join("kt").join("config.toml"),
			system_config_file: PathBuf::from(SYSTEM_CONFIG_FILE),
			home_dir: home,
		}
	}

	/// Keys and pid markers: ~/.ktctl
	pub fn default_app_home(&self) -> PathBuf {
		self.home_dir.join(".ktctl")
	}

	pub fn default_kubeconfig(&self) -> PathBuf {
		self.home_dir.join(".kube").join("config")
	}
}

/// Resolve paths for the current user. `XDG_CONFIG_HOME` wins over
/// `~/.config`.
pub fn resolve_paths() -> Result<PathsConfig, ConfigError> {
	let home = dirs::home_dir().ok_or(ConfigError::HomeDirNotFound)?;
	let config_home = std::env::var_os("XDG_CONFIG_HOME")
		.map(PathBuf::from)
		.filter(|p| p.is_absolute());

	let paths = PathsConfig::from_home(home, config_home);
	tracing::debug!(
		user_config = %paths.user_config_file.display(),
		home = %paths.home_dir.display(),
		"resolved config paths"
	);
	Ok(paths)
}

/// Expand a leading `~/` against `home`.
pub fn expand_home(path: &Path, home: &Path) -> PathBuf {
	match path.strip_prefix("~") {
		Ok(rest) => home.join(rest),
		Err(_) => path.to_path_buf(),
	}
}
