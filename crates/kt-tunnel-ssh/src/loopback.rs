// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! A transport that never leaves the host.
//!
//! The "remote" side of every tunnel is emulated with a local listener, so
//! sessions can be driven end to end without a cluster or an SSH server.

use crate::error::{Result, TunnelError};
use crate::relay::relay;
use crate::socks5::{self, accept_failed, DirectDialer};
use crate::transport::{Serving, Transport};
use async_trait::async_trait;
use futures::FutureExt;
use kt_common_core::Credential;
use kt_common_process::Scope;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, warn};

/// A call observed by [`LoopbackTransport`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportCall {
	Socks5 {
		user: String,
		session_addr: SocketAddr,
		listen_addr: SocketAddr,
	},
	Forward {
		user: String,
		session_addr: SocketAddr,
		remote_listen: SocketAddr,
		local_dial: SocketAddr,
	},
}

#[derive(Debug, Clone, Default)]
pub struct LoopbackTransport {
	calls: Arc<Mutex<Vec<TransportCall>>>,
}

impl LoopbackTransport {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn calls(&self) -> Vec<TransportCall> {
		self.calls.lock().map(|c| c.clone()).unwrap_or_default()
	}

	fn record(&self, call: TransportCall) {
		if let Ok(mut calls) = self.calls.lock() {
			calls.push(call);
		}
	}
}

async fn bind(addr: SocketAddr) -> Result<TcpListener> {
	TcpListener::bind(addr)
		.await
		.map_err(|source| TunnelError::Bind { addr, source })
}

#[async_trait]
impl Transport for LoopbackTransport {
	async fn start_socks5_proxy(
		&self,
		credential: &Credential,
		session_addr: SocketAddr,
		listen_addr: SocketAddr,
		scope: Scope,
	) -> Result<Serving> {
		self.record(TransportCall::Socks5 {
			user: credential.username().to_string(),
			session_addr,
			listen_addr,
		});
		let listener = bind(listen_addr).await?;
		Ok(async move {
			socks5::serve(listener, Arc::new(DirectDialer), scope)
				.await
				.map_err(TunnelError::from)
		}
		.boxed())
	}

	async fn forward_remote_to_local(
		&self,
		credential: &Credential,
		session_addr: SocketAddr,
		remote_listen: SocketAddr,
		local_dial: SocketAddr,
		scope: Scope,
	) -> Result<Serving> {
		self.record(TransportCall::Forward {
			user: credential.username().to_string(),
			session_addr,
			remote_listen,
			local_dial,
		});
		let listener = bind(remote_listen).await?;
		Ok(async move {
			loop {
				tokio::select! {
					_ = scope.cancelled() => return Ok::<(), TunnelError>(()),
					accepted = listener.accept() => match accepted {
						Ok((remote, peer)) => {
							debug!(%peer, %local_dial, "loopback forward accepted");
							tokio::spawn(async move {
								match TcpStream::connect(local_dial).await {
									Ok(local) => {
										relay(remote, local).await;
									}
									Err(e) => warn!(%local_dial, error = %e, "failed to dial local service"),
								}
							});
						}
						Err(e) => accept_failed(&e).await,
					},
				}
			}
		}
		.boxed())
	}
}
