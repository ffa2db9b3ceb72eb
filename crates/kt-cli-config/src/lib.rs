// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Configuration for ktctl.
//!
//! Layers are merged in precedence order: built-in defaults, the system file
//! (`/etc/kt/config.toml`), the user file (`$XDG_CONFIG_HOME/kt/config.toml`),
//! `KT_*` environment variables and finally command-line flags.

pub mod error;
pub mod layer;
pub mod paths;
pub mod sources;

pub use error::ConfigError;
pub use layer::ConfigLayer;
pub use paths::PathsConfig;
pub use sources::{CliSource, ConfigSource, DefaultsSource, EnvSource, FileSource, Precedence};

use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info};

pub const DEFAULT_NAMESPACE: &str = "default";
pub const DEFAULT_IMAGE: &str = "registry.cn-hangzhou.aliyuncs.com/rdc-incubator/kt-connect-shadow:stable";
pub const DEFAULT_WAIT_TIME: Duration = Duration::from_secs(5);
pub const DEFAULT_SSH_PORT: u16 = 2222;
pub const DEFAULT_SOCKS_PORT: u16 = 2223;
pub const DEFAULT_READY_TIMEOUT: Duration = Duration::from_secs(60);

/// Fully resolved configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KtConfig {
	pub namespace: String,
	pub kubeconfig: PathBuf,
	pub image: String,
	pub debug: bool,
	pub wait_time: Duration,
	pub kubectl: String,
	pub sshuttle: String,
	pub ssh_port: u16,
	pub socks_port: u16,
	/// Private keys and pid markers.
	pub app_home: PathBuf,
	pub ready_timeout: Duration,
}

/// Load configuration from every source, with `cli` on top.
pub fn load_config(cli: ConfigLayer) -> Result<KtConfig, ConfigError> {
	let paths = paths::resolve_paths()?;
	let sources: Vec<Box<dyn ConfigSource>> = vec![
		Box::new(DefaultsSource),
		Box::new(FileSource::system(&paths)),
		Box::new(FileSource::user(&paths)),
		Box::new(EnvSource::from_process()),
		Box::new(CliSource::new(cli)),
	];
	load_from(sources, &paths)
}

/// Merge `sources` by precedence and finalize against `paths`.
pub fn load_from(
	mut sources: Vec<Box<dyn ConfigSource>>,
	paths: &PathsConfig,
) -> Result<KtConfig, ConfigError> {
	sources.sort_by_key(|s| s.precedence());

	let mut merged = ConfigLayer::default();
	for source in sources {
		debug!(source = source.name(), "loading configuration source");
		merged.merge(source.load()?);
	}
	finalize(merged, paths)
}

fn finalize(layer: ConfigLayer, paths: &PathsConfig) -> Result<KtConfig, ConfigError> {
	let home = &paths.home_dir;
	let config = KtConfig {
		namespace: layer.namespace.unwrap_or_else(|| DEFAULT_NAMESPACE.to_string()),
		kubeconfig: layer
			.kubeconfig
			.map(|p| paths::expand_home(&p, home))
			.unwrap_or_else(|| paths.default_kubeconfig()),
		image: layer.image.unwrap_or_else(|| DEFAULT_IMAGE.to_string()),
		debug: layer.debug.unwrap_or(false),
		wait_time: layer
			.wait_time_secs
			.map(Duration::from_secs)
			.unwrap_or(DEFAULT_WAIT_TIME),
		kubectl: layer.kubectl.unwrap_or_else(|| "kubectl".to_string()),
		sshuttle: layer.sshuttle.unwrap_or_else(|| "sshuttle".to_string()),
		ssh_port: layer.ssh_port.unwrap_or(DEFAULT_SSH_PORT),
		socks_port: layer.socks_port.unwrap_or(DEFAULT_SOCKS_PORT),
		app_home: layer
			.app_home
			.map(|p| paths::expand_home(&p, home))
			.unwrap_or_else(|| paths.default_app_home()),
		ready_timeout: layer
			.ready_timeout_secs
			.map(Duration::from_secs)
			.unwrap_or(DEFAULT_READY_TIMEOUT),
	};
	validate(&config)?;

	info!(
		namespace = %config.namespace,
		kubeconfig = %config.kubeconfig.display(),
		image = %config.image,
		debug = config.debug,
		"configuration loaded"
	);
	Ok(config)
}

fn validate(config: &KtConfig) -> Result<(), ConfigError> {
	if config.ssh_port == 0 {
		return Err(ConfigError::invalid_value("ssh_port", "must not be 0"));
	}
	if config.socks_port == 0 {
		return Err(ConfigError::invalid_value("socks_port", "must not be 0"));
	}
	if config.ssh_port == config.socks_port {
		return Err(ConfigError::validation(format!(
			"ssh_port and socks_port are both {}",
			config.ssh_port
		)));
	}
	if config.namespace.is_empty() {
		return Err(ConfigError::invalid_value("namespace", "must not be empty"));
	}
	Ok(())
}

#[cfg(test)]
mod tests {
	use super::*;

	fn paths() -> PathsConfig {
		PathsConfig::from_home("/home/dev", None)
	}

	fn cli(layer: ConfigLayer) -> Vec<Box<dyn ConfigSource>> {
		vec![Box::new(DefaultsSource), Box::new(CliSource::new(layer))]
	}

	#[test]
	fn defaults() {
		let config = load_from(cli(ConfigLayer::default()), &paths()).unwrap();
		assert_eq!(config.namespace, "default");
		assert_eq!(config.image, DEFAULT_IMAGE);
		assert_eq!(config.wait_time, Duration::from_secs(5));
		assert_eq!(config.ssh_port, 2222);
		assert_eq!(config.socks_port, 2223);
		assert_eq!(config.app_home, PathBuf::from("/home/dev/.ktctl"));
		assert_eq!(config.kubeconfig, PathBuf::from("/home/dev/.kube/config"));
		assert_eq!(config.ready_timeout, Duration::from_secs(60));
	}

	#[test]
	fn precedence_is_file_then_env_then_cli() {
		let dir = tempfile::tempdir().unwrap();
		let file = dir.path().join("config.toml");
		std::fs::write(&file, "namespace = \"from-file\"\nimage = \"file-image\"\ndebug = true\n").unwrap();

		let sources: Vec<Box<dyn ConfigSource>> = vec![
			Box::new(CliSource::new(ConfigLayer {
				namespace: Some("from-cli".to_string()),
				..Default::default()
			})),
			Box::new(EnvSource::from_vars([("KT_NAMESPACE", "from-env"), ("KT_IMAGE", "env-image")])),
			Box::new(FileSource::new(&file, Precedence::UserFile)),
			Box::new(DefaultsSource),
		];
		let config = load_from(sources, &paths()).unwrap();
		assert_eq!(config.namespace, "from-cli");
		assert_eq!(config.image, "env-image");
		assert!(config.debug);
	}

	#[test]
	fn zero_ports_are_rejected() {
		let err = load_from(
			cli(ConfigLayer {
				ssh_port: Some(0),
				..Default::default()
			}),
			&paths(),
		)
		.unwrap_err();
		assert!(matches!(err, ConfigError::InvalidValue { ref field, .. } if field == "ssh_port"));

		assert!(load_from(
			cli(ConfigLayer {
				socks_port: Some(2222),
				..Default::default()
			}),
			&paths(),
		)
		.is_err());
	}

	#[test]
	fn tilde_paths_expand() {
		let config = load_from(
			cli(ConfigLayer {
				app_home: Some(PathBuf::from("~/kt-home")),
				..Default::default()
			}),
			&paths(),
		)
		.unwrap();
		assert_eq!(config.app_home, PathBuf::from("/home/dev/kt-home"));
	}
}
