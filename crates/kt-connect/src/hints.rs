// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Proxy hint files for tools that pick up per-directory settings.

use std::path::{Path, PathBuf};

pub const JVMRC: &str = ".jvmrc";
pub const ENVRC: &str = ".envrc";

/// Paths [`write_socks_hints`] writes to.
pub fn hint_paths(dir: &Path) -> [PathBuf; 2] {
	[dir.join(JVMRC), dir.join(ENVRC)]
}

/// Write `.jvmrc` and `.envrc` into `dir`. Returns the written paths.
pub async fn write_socks_hints(dir: &Path, socks_port: u16, namespace: &str) -> std::io::Result<Vec<PathBuf>> {
	let [jvmrc, envrc] = hint_paths(dir);
	tokio::fs::write(
		&jvmrc,
		format!("-DsocksProxyHost=127.0.0.1\n-DsocksProxyPort={socks_port}"),
	)
	.await?;

	tokio::fs::write(&envrc, format!("KUBERNETES_NAMESPACE={namespace}")).await?;

	Ok(vec![jvmrc, envrc])
}

#[cfg(test)]
mod tests {
	use super::*;

	#[tokio::test]
	async fn writes_both_files() {
		let dir = tempfile::tempdir().unwrap();
		let written = write_socks_hints(dir.path(), 2223, "dev").await.unwrap();
		assert_eq!(written.len(), 2);

		let jvmrc = std::fs::read_to_string(dir.path().join(JVMRC)).unwrap();
		assert_eq!(jvmrc, "-DsocksProxyHost=127.0.0.1\n-DsocksProxyPort=2223");
		let envrc = std::fs::read_to_string(dir.path().join(ENVRC)).unwrap();
		assert_eq!(envrc, "KUBERNETES_NAMESPACE=dev");
	}
}
