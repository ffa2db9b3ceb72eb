// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Hosts-file entries for cluster services.

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::PathBuf;
use tracing::{info, instrument};

/// Suffix marking lines written by kt.
const MARKER: &str = "# kt";

#[cfg(unix)]
pub const DEFAULT_HOSTS_PATH: &str = "/etc/hosts";
#[cfg(windows)]
pub const DEFAULT_HOSTS_PATH: &str = r"C:\Windows\System32\drivers\etc\hosts";

/// Adds and removes `name -> ip` entries.
#[async_trait]
pub trait HostsEditor: Send + Sync {
	async fn add_entries(&self, entries: &BTreeMap<String, String>) -> std::io::Result<()>;

	/// Remove exactly the entries given. Missing ones are ignored.
	async fn remove_entries(&self, entries: &BTreeMap<String, String>) -> std::io::Result<()>;
}

#[derive(Debug, Clone)]
pub struct HostsFile {
	path: PathBuf,
}

impl HostsFile {
	pub fn new(path: impl Into<PathBuf>) -> Self {
		Self { path: path.into() }
	}

	async fn read(&self) -> std::io::Result<String> {
		match tokio::fs::read_to_string(&self.path).await {
			Ok(content) => Ok(content),
			Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(String::new()),
			Err(e) => Err(e),
		}
	}
}

impl Default for HostsFile {
	fn default() -> Self {
		Self::new(DEFAULT_HOSTS_PATH)
	}
}

fn entry_line(name: &str, ip: &str) -> String {
	format!("{ip} {name} {MARKER}")
}

#[async_trait]
impl HostsEditor for HostsFile {
	#[instrument(skip(self, entries), fields(path = %self.path.display(), count = entries.len()))]
	async fn add_entries(&self, entries: &BTreeMap<String, String>) -> std::io::Result<()> {
		let mut content = self.read().await?;
		let existing: Vec<String> = content.lines().map(str::to_string).collect();
		if !content.is_empty() && !content.ends_with('\n') {
			content.push('\n');
		}
		for (name, ip) in entries {
			let line = entry_line(name, ip);
			if !existing.contains(&line) {
				content.push_str(&line);
				content.push('\n');
			}
		}
		tokio::fs::write(&self.path, content).await?;
		info!("dumped services to hosts");
		Ok(())
	}

	#[instrument(skip(self, entries), fields(path = %self.path.display(), count = entries.len()))]
	async fn remove_entries(&self, entries: &BTreeMap<String, String>) -> std::io::Result<()> {
		let content = self.read().await?;
		let drop: Vec<String> = entries.iter().map(|(name, ip)| entry_line(name, ip)).collect();
		let kept: Vec<&str> = content
			.lines()
			.filter(|line| !drop.iter().any(|d| d == line))
			.collect();
		let mut rewritten = kept.join("\n");
		if !rewritten.is_empty() {
			rewritten.push('\n');
		}
		if rewritten != content {
			tokio::fs::write(&self.path, rewritten).await?;
		}
		info!("dropped hosts entries");
		Ok(())
	}
}
