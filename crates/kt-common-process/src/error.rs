// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use crate::supervisor::LegOutcome;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SupervisorError {
	#[error("failed to start {name}: {source}")]
	Spawn {
		name: String,
		#[source]
		source: std::io::Error,
	},

	#[error("{name} exited with code {code:?}")]
	Exited { name: String, code: Option<i32> },

	#[error("{name} stopped during startup: {outcome}")]
	LegExited { name: String, outcome: LegOutcome },

	#[error("IO error: {0}")]
	Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, SupervisorError>;
