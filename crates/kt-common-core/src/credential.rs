// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use kt_common_secret::SecretString;
use std::path::{Path, PathBuf};

/// Login used by the shadow image's sshd.
pub const DEFAULT_USERNAME: &str = "root";
pub const DEFAULT_PASSWORD: &str = "root";

/// SSH credential for one shadow endpoint.
///
/// Issued by the cluster collaborator when the endpoint is created and never
/// mutated afterwards. The password is only used when no private key is set.
#[derive(Debug, Clone)]
pub struct Credential {
	username: String,
	password: SecretString,
	private_key_path: Option<PathBuf>,
	remote_host: String,
}

impl Credential {
	pub fn new(username: impl Into<String>, password: impl Into<SecretString>) -> Self {
		Self {
			username: username.into(),
			password: password.into(),
			private_key_path: None,
			remote_host: "127.0.0.1".to_string(),
		}
	}

	pub fn with_private_key(mut self, path: impl Into<PathBuf>) -> Self {
		self.private_key_path = Some(path.into());
		self
	}

	pub fn with_remote_host(mut self, host: impl Into<String>) -> Self {
		self.remote_host = host.into();
		self
	}

	pub fn username(&self) -> &str {
		&self.username
	}

	pub fn password(&self) -> &SecretString {
		&self.password
	}

	pub fn private_key_path(&self) -> Option<&Path> {
		self.private_key_path.as_deref()
	}

	/// Host the SSH session is dialed on (the local end of the hop bridge).
	pub fn remote_host(&self) -> &str {
		&self.remote_host
	}
}

impl Default for Credential {
	fn default() -> Self {
		Self::new(DEFAULT_USERNAME, DEFAULT_PASSWORD)
	}
}
