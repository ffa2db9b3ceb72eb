// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Per-mode pid marker that keeps a second daemon from starting.

use crate::error::{ConnectError, Result};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use tracing::info;

/// `<app_home>/<mode>.pid`
pub fn marker_path(app_home: &Path, mode: &str) -> PathBuf {
	app_home.join(format!("{mode}.pid"))
}

/// Create the marker and write this process id into it. Fails when the
/// marker already exists.
pub fn acquire(path: &Path) -> Result<u32> {
	if let Some(parent) = path.parent() {
		std::fs::create_dir_all(parent)?;
	}
	let mut file = match std::fs::OpenOptions::new()
		.write(true)
		.create_new(true)
		.open(path)
	{
		Ok(file) => file,
		Err(e) if e.kind() == ErrorKind::AlreadyExists => {
			return Err(ConnectError::Precondition {
				message: format!("already running, pid file {} exists", path.display()),
			});
		}
		Err(e) => return Err(e.into()),
	};
	let pid = std::process::id();
	write!(file, "{pid}")?;
	info!(pid, path = %path.display(), "daemon started");
	Ok(pid)
}

/// Remove a file. Absence is not an error; returns whether it existed.
pub fn remove_if_exists(path: &Path) -> std::io::Result<bool> {
	match std::fs::remove_file(path) {
		Ok(()) => Ok(true),
		Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
		Err(e) => Err(e),
	}
}
