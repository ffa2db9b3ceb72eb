// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use std::net::SocketAddr;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TunnelError {
	#[error("SSH protocol error: {0}")]
	Ssh(#[from] russh::Error),

	#[error("failed to load private key: {0}")]
	Key(#[from] russh_keys::Error),

	#[error("authentication rejected for user {user}")]
	AuthenticationRejected { user: String },

	#[error("failed to listen on {addr}: {source}")]
	Bind {
		addr: SocketAddr,
		#[source]
		source: std::io::Error,
	},

	#[error("server refused remote forward on {addr}")]
	ForwardRefused { addr: SocketAddr },

	#[error("SSH session closed by peer")]
	SessionClosed,

	#[error("IO error: {0}")]
	Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, TunnelError>;
