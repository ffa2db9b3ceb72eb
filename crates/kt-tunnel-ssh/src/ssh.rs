// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! In-process SSH transport built on russh.

use crate::error::{Result, TunnelError};
use crate::relay::relay;
use crate::socks5::{self, BoxedStream, Dialer, TargetAddr};
use crate::transport::{Serving, Transport};
use async_trait::async_trait;
use futures::FutureExt;
use kt_common_core::Credential;
use kt_common_process::Scope;
use russh::client::{self, Handle, Msg};
use russh::{Channel, Disconnect};
use russh_keys::key;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tracing::{debug, info, instrument, warn};

/// Keep-alive interval for tunnel sessions.
const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(30);

struct ClientHandler {
	forwarded: Option<mpsc::UnboundedSender<Channel<Msg>>>,
}

#[async_trait]
impl client::Handler for ClientHandler {
	type Error = TunnelError;

	async fn check_server_key(
		&mut self,
		_server_public_key: &key::PublicKey,
	) -> std::result::Result<bool, Self::Error> {
		// Shadow pods generate a fresh host key on every start.
		Ok(true)
	}

	async fn server_channel_open_forwarded_tcpip(
		&mut self,
		channel: Channel<Msg>,
		connected_address: &str,
		connected_port: u32,
		originator_address: &str,
		originator_port: u32,
		_session: &mut client::Session,
	) -> std::result::Result<(), Self::Error> {
		debug!(
			connected = %format!("{connected_address}:{connected_port}"),
			originator = %format!("{originator_address}:{originator_port}"),
			"remote connection forwarded"
		);
		if let Some(forwarded) = &self.forwarded {
			let _ = forwarded.send(channel);
		}
		Ok(())
	}
}

/// Transport that speaks SSH directly from this process.
#[derive(Clone)]
pub struct SshTransport {
	config: Arc<client::Config>,
}

impl SshTransport {
	pub fn new() -> Self {
		let config = client::Config {
			keepalive_interval: Some(KEEPALIVE_INTERVAL),
			..Default::default()
		};
		Self {
			config: Arc::new(config),
		}
	}

	#[instrument(skip(self, credential, handler), fields(user = %credential.username()))]
	async fn connect(
		&self,
		credential: &Credential,
		session_addr: SocketAddr,
		handler: ClientHandler,
	) -> Result<Handle<ClientHandler>> {
		let mut handle = client::connect(Arc::clone(&self.config), session_addr, handler).await?;

		let authenticated = match credential.private_key_path() {
			Some(path) => {
				let key_pair = russh_keys::load_secret_key(path, None)?;
				handle
					.authenticate_publickey(credential.username(), Arc::new(key_pair))
					.await?
			}
			None => {
				handle
					.authenticate_password(
						credential.username(),
						credential.password().expose().as_str(),
					)
					.await?
			}
		};
		if !authenticated {
			return Err(TunnelError::AuthenticationRejected {
				user: credential.username().to_string(),
			});
		}

		debug!(%session_addr, "SSH session established");
		Ok(handle)
	}
}

impl Default for SshTransport {
	fn default() -> Self {
		Self::new()
	}
}

struct SessionDialer {
	handle: Handle<ClientHandler>,
}

#[async_trait]
impl Dialer for SessionDialer {
	async fn dial(&self, target: &TargetAddr) -> io::Result<BoxedStream> {
		let channel = self
			.handle
			.channel_open_direct_tcpip(target.host(), target.port() as u32, "127.0.0.1", 0)
			.await
			.map_err(|e| io::Error::new(io::ErrorKind::ConnectionRefused, e.to_string()))?;
		Ok(Box::new(channel.into_stream()))
	}
}

#[async_trait]
impl Transport for SshTransport {
	async fn start_socks5_proxy(
		&self,
		credential: &Credential,
		session_addr: SocketAddr,
		listen_addr: SocketAddr,
		scope: Scope,
	) -> Result<Serving> {
		let handle = self
			.connect(credential, session_addr, ClientHandler { forwarded: None })
			.await?;
		let listener = TcpListener::bind(listen_addr)
			.await
			.map_err(|source| TunnelError::Bind {
				addr: listen_addr,
				source,
			})?;
		info!(%listen_addr, %session_addr, "SOCKS5 proxy ready");

		let dialer = Arc::new(SessionDialer { handle });
		Ok(async move {
			let served = socks5::serve(listener, Arc::clone(&dialer), scope).await;
			let _ = dialer
				.handle
				.disconnect(Disconnect::ByApplication, "", "en")
				.await;
			served.map_err(TunnelError::from)
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
		let (tx, mut forwarded) = mpsc::unbounded_channel();
		let mut handle = self
			.connect(credential, session_addr, ClientHandler { forwarded: Some(tx) })
			.await?;
		handle
			.tcpip_forward(remote_listen.ip().to_string(), remote_listen.port() as u32)
			.await
			.map_err(|e| {
				warn!(%remote_listen, error = %e, "remote forward request failed");
				TunnelError::ForwardRefused {
					addr: remote_listen,
				}
			})?;
		info!(%remote_listen, %local_dial, "reverse forward ready");

		Ok(async move {
			let result = loop {
				tokio::select! {
					_ = scope.cancelled() => break Ok(()),
					channel = forwarded.recv() => match channel {
						Some(channel) => {
							tokio::spawn(bridge_to_local(channel, local_dial));
						}
						None => break Err(TunnelError::SessionClosed),
					},
				}
			};
			let _ = handle.disconnect(Disconnect::ByApplication, "", "en").await;
			result
		}
		.boxed())
	}
}

async fn bridge_to_local(channel: Channel<Msg>, local_dial: SocketAddr) {
	match TcpStream::connect(local_dial).await {
		Ok(local) => {
			relay(channel.into_stream(), local).await;
		}
		Err(e) => {
			warn!(%local_dial, error = %e, "failed to dial local service");
			let _ = channel.close().await;
		}
	}
}
