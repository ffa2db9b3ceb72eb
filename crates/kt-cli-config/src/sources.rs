// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Configuration sources: files, environment and command line.

use std::collections::HashMap;
use std::path::PathBuf;

use tracing::{debug, trace};

use crate::error::ConfigError;
use crate::layer::ConfigLayer;
use crate::paths::PathsConfig;

/// Source precedence levels (higher = overrides lower).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Precedence {
	Defaults = 10,
	SystemFile = 20,
	UserFile = 30,
	Environment = 50,
	Cli = 100,
}

pub trait ConfigSource: Send + Sync {
	fn name(&self) -> &'static str;
	fn precedence(&self) -> Precedence;
	fn load(&self) -> Result<ConfigLayer, ConfigError>;
}

/// Built-in defaults are applied when finalizing; this layer is empty.
pub struct DefaultsSource;

impl ConfigSource for DefaultsSource {
	fn name(&self) -> &'static str {
		"defaults"
	}

	fn precedence(&self) -> Precedence {
		Precedence::Defaults
	}

	fn load(&self) -> Result<ConfigLayer, ConfigError> {
		Ok(ConfigLayer::default())
	}
}

/// A TOML file. A missing file is an empty layer.
pub struct FileSource {
	path: PathBuf,
	precedence: Precedence,
}

impl FileSource {
	pub fn new(path: impl Into<PathBuf>, precedence: Precedence) -> Self {
		Self {
			path: path.into(),
			precedence,
		}
	}

	pub fn system(paths: &PathsConfig) -> Self {
		Self::new(&paths.system_config_file, Precedence::SystemFile)
	}

	pub fn user(paths: &PathsConfig) -> Self {
		Self::new(&paths.user_config_file, Precedence::UserFile)
	}
}

impl ConfigSource for FileSource {
	fn name(&self) -> &'static str {
		match self.precedence {
			Precedence::SystemFile => "system-config",
			_ => "user-config",
		}
	}

	fn precedence(&self) -> Precedence {
		self.precedence
	}

	fn load(&self) -> Result<ConfigLayer, ConfigError> {
		if !self.path.exists() {
			debug!(path = %self.path.display(), "config file not found, skipping");
			return Ok(ConfigLayer::default());
		}

		debug!(path = %self.path.display(), "loading config file");
		let content = std::fs::read_to_string(&self.path).map_err(|e| ConfigError::FileRead {
			path: self.path.clone(),
			source: e,
		})?;

		let layer = toml::from_str(&content).map_err(|e| ConfigError::TomlParse {
			path: self.path.clone(),
			source: e,
		})?;
		trace!("parsed config layer from TOML");
		Ok(layer)
	}
}

/// Environment variables: `KT_NAMESPACE`, `KT_KUBECONFIG` (falling back to
/// `KUBECONFIG`), `KT_IMAGE`, `KT_DEBUG`, `KT_WAIT_TIME`, `KT_KUBECTL` and
/// `KT_SSHUTTLE`.
pub struct EnvSource {
	vars: HashMap<String, String>,
}

impl EnvSource {
	pub fn from_process() -> Self {
		Self::from_vars(std::env::vars())
	}

	pub fn from_vars<I, K, V>(vars: I) -> Self
	where
		I: IntoIterator<Item = (K, V)>,
		K: Into<String>,
		V: Into<String>,
	{
		Self {
			vars: vars.into_iter().map(|(k, v)| (k.into(), v.into())).collect(),
		}
	}

	fn var(&self, name: &str) -> Option<String> {
		self.vars.get(name).filter(|v| !v.is_empty()).cloned()
	}

	fn bool(&self, name: &str) -> Option<bool> {
		self.var(name)
			.map(|v| v.eq_ignore_ascii_case("true") || v == "1")
	}

	fn u64(&self, name: &str) -> Result<Option<u64>, ConfigError> {
		match self.var(name) {
			Some(v) => v
				.parse()
				.map(Some)
				.map_err(|_| ConfigError::invalid_value(name, format!("invalid number '{v}'"))),
			None => Ok(None),
		}
	}
}

impl ConfigSource for EnvSource {
	fn name(&self) -> &'static str {
		"environment"
	}

	fn precedence(&self) -> Precedence {
		Precedence::Environment
	}

	fn load(&self) -> Result<ConfigLayer, ConfigError> {
		debug!("loading environment variables");
		Ok(ConfigLayer {
			namespace: self.var("KT_NAMESPACE"),
			kubeconfig: self
				.var("KT_KUBECONFIG")
				.or_else(|| self.var("KUBECONFIG"))
				.map(PathBuf::from),
			image: self.var("KT_IMAGE"),
			debug: self.bool("KT_DEBUG"),
			wait_time_secs: self.u64("KT_WAIT_TIME")?,
			kubectl: self.var("KT_KUBECTL"),
			sshuttle: self.var("KT_SSHUTTLE"),
			..Default::default()
		})
	}
}

/// Values given on the command line.
pub struct CliSource {
	layer: ConfigLayer,
}

impl CliSource {
	pub fn new(layer: ConfigLayer) -> Self {
		Self { layer }
	}
}

impl ConfigSource for CliSource {
	fn name(&self) -> &'static str {
		"cli"
	}

	fn precedence(&self) -> Precedence {
		Precedence::Cli
	}

	fn load(&self) -> Result<ConfigLayer, ConfigError> {
		Ok(self.layer.clone())
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn env_reads_kt_variables() {
		let layer = EnvSource::from_vars([
			("KT_NAMESPACE", "dev"),
			("KT_DEBUG", "1"),
			("KT_WAIT_TIME", "9"),
			("KUBECONFIG", "/tmp/kube"),
		])
		.load()
		.unwrap();
		assert_eq!(layer.namespace.as_deref(), Some("dev"));
		assert_eq!(layer.debug, Some(true));
		assert_eq!(layer.wait_time_secs, Some(9));
		assert_eq!(layer.kubeconfig, Some(PathBuf::from("/tmp/kube")));
	}

	#[test]
	fn kt_kubeconfig_wins_over_kubeconfig() {
		let layer = EnvSource::from_vars([("KUBECONFIG", "/a"), ("KT_KUBECONFIG", "/b")])
			.load()
			.unwrap();
		assert_eq!(layer.kubeconfig, Some(PathBuf::from("/b")));
	}

	#[test]
	fn bad_number_is_reported() {
		let err = EnvSource::from_vars([("KT_WAIT_TIME", "soon")]).load().unwrap_err();
		assert!(matches!(err, ConfigError::InvalidValue { .. }));
	}

	#[test]
	fn missing_file_is_empty() {
		let dir = tempfile::tempdir().unwrap();
		let source = FileSource::new(dir.path().join("nope.toml"), Precedence::UserFile);
		assert_eq!(source.load().unwrap(), ConfigLayer::default());
	}

	#[test]
	fn broken_file_names_its_path() {
		let dir = tempfile::tempdir().unwrap();
		let path = dir.path().join("config.toml");
		std::fs::write(&path, "namespace = ").unwrap();
		match FileSource::new(&path, Precedence::UserFile).load() {
			Err(ConfigError::TomlParse { path: reported, .. }) => assert_eq!(reported, path),
			other => panic!("unexpected result: {other:?}"),
		}
	}
}
