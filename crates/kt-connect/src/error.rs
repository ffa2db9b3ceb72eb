// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use crate::cleanup::CleanupStep;
use kt_cluster::ClusterError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConnectError {
	/// Refused before anything was started; no cleanup is needed.
	#[error("{message}")]
	Precondition { message: String },

	#[error("{leg} failed: {message}")]
	Establishment { leg: String, message: String },

	#[error("cluster error: {0}")]
	Cluster(#[from] ClusterError),

	#[error("invalid pod IP {0:?}")]
	InvalidPodIp(String),

	#[error("kubectl option {0:?} invalid, check it with 'kubectl options'")]
	InvalidKubeOption(String),

	#[error("session cannot move from {from} to {to}")]
	InvalidTransition { from: String, to: String },

	#[error("IO error: {0}")]
	Io(#[from] std::io::Error),
}

impl ConnectError {
	pub fn establishment(leg: impl Into<String>, err: impl std::fmt::Display) -> Self {
		ConnectError::Establishment {
			leg: leg.into(),
			message: err.to_string(),
		}
	}

	/// Whether anything may have been started before the error.
	pub fn needs_cleanup(&self) -> bool {
		!matches!(self, ConnectError::Precondition { .. })
	}
}

/// One cleanup step that did not complete. Logged and reported, never raised.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("cleanup step {step} failed: {message}")]
pub struct CleanupFailure {
	pub step: CleanupStep,
	pub message: String,
}

pub type Result<T> = std::result::Result<T, ConnectError>;
