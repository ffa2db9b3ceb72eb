// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use thiserror::Error;

pub type ClusterResult<T> = Result<T, ClusterError>;

#[derive(Error, Debug)]
pub enum ClusterError {
	#[error("K8s API error: {message}")]
	Api { message: String },

	#[error("kubeconfig error: {message}")]
	Config { message: String },

	#[error("{kind} not found: {namespace}/{name}")]
	NotFound {
		kind: &'static str,
		namespace: String,
		name: String,
	},

	#[error("shadow {name} not ready after {waited_secs}s")]
	Timeout { name: String, waited_secs: u64 },

	#[error("ref count on {name} kept changing, gave up after {attempts} attempts")]
	Contended { name: String, attempts: u32 },

	#[error("no cluster CIDR found in namespace {namespace}")]
	NoCidrs { namespace: String },

	#[error("SSH key generation failed: {message}")]
	KeyGeneration { message: String },

	#[error("invalid manifest: {0}")]
	Manifest(#[from] serde_json::Error),

	#[error("IO error: {0}")]
	Io(#[from] std::io::Error),

	#[error("injected failure: {op}")]
	Injected { op: String },
}

impl From<kube::Error> for ClusterError {
	fn from(err: kube::Error) -> Self {
		ClusterError::Api {
			message: err.to_string(),
		}
	}
}

pub(crate) fn is_status(err: &kube::Error, code: u16) -> bool {
	matches!(err, kube::Error::Api(ae) if ae.code == code)
}
