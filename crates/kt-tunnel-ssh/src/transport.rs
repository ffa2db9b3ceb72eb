// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use crate::error::Result;
use async_trait::async_trait;
use futures::future::BoxFuture;
use kt_common_core::Credential;
use kt_common_process::Scope;
use std::net::SocketAddr;

/// The serving half of an established tunnel.
///
/// Resolves with `Ok(())` after the scope is cancelled, or with an error
/// when the underlying session breaks.
pub type Serving = BoxFuture<'static, Result<()>>;

#[async_trait]
pub trait Transport: Send + Sync {
	/// Open a session to `session_addr` and listen for SOCKS5 clients on
	/// `listen_addr`. Each accepted connection is dialed through the session.
	async fn start_socks5_proxy(
		&self,
		credential: &Credential,
		session_addr: SocketAddr,
		listen_addr: SocketAddr,
		scope: Scope,
	) -> Result<Serving>;

	/// Open a session to `session_addr`, ask the server to listen on
	/// `remote_listen`, and relay every forwarded connection to `local_dial`.
	async fn forward_remote_to_local(
		&self,
		credential: &Credential,
		session_addr: SocketAddr,
		remote_listen: SocketAddr,
		local_dial: SocketAddr,
		scope: Scope,
	) -> Result<Serving>;
}
