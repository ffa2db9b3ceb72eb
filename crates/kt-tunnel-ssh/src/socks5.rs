// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Minimal SOCKS5 server (RFC 1928): no authentication, CONNECT only.

use crate::relay::relay;
use async_trait::async_trait;
use kt_common_process::Scope;
use std::fmt;
use std::io;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, info, warn};

const VERSION: u8 = 0x05;
const METHOD_NO_AUTH: u8 = 0x00;
const METHOD_NONE_ACCEPTABLE: u8 = 0xff;
const CMD_CONNECT: u8 = 0x01;
const ATYP_IPV4: u8 = 0x01;
const ATYP_DOMAIN: u8 = 0x03;
const ATYP_IPV6: u8 = 0x04;

const REPLY_SUCCEEDED: u8 = 0x00;
const REPLY_GENERAL_FAILURE: u8 = 0x01;
const REPLY_CONNECTION_REFUSED: u8 = 0x05;
const REPLY_COMMAND_NOT_SUPPORTED: u8 = 0x07;
const REPLY_ADDRESS_NOT_SUPPORTED: u8 = 0x08;

/// Pause after a failed accept before trying again.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// A byte stream the proxy can relay.
pub trait ProxyStream: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> ProxyStream for T {}

pub type BoxedStream = Box<dyn ProxyStream>;

/// Destination requested by a SOCKS5 client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TargetAddr {
	Ip(SocketAddr),
	Domain(String, u16),
}

impl TargetAddr {
	pub fn host(&self) -> String {
		match self {
			TargetAddr::Ip(addr) => addr.ip().to_string(),
			TargetAddr::Domain(host, _) => host.clone(),
		}
	}

	pub fn port(&self) -> u16 {
		match self {
			TargetAddr::Ip(addr) => addr.port(),
			TargetAddr::Domain(_, port) => *port,
		}
	}
}

impl fmt::Display for TargetAddr {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			TargetAddr::Ip(addr) => write!(f, "{addr}"),
			TargetAddr::Domain(host, port) => write!(f, "{host}:{port}"),
		}
	}
}

/// Opens the upstream connection for an accepted SOCKS5 request.
#[async_trait]
pub trait Dialer: Send + Sync + 'static {
	async fn dial(&self, target: &TargetAddr) -> io::Result<BoxedStream>;
}

/// Dials targets directly from this host.
#[derive(Debug, Clone, Copy, Default)]
pub struct DirectDialer;

#[async_trait]
impl Dialer for DirectDialer {
	async fn dial(&self, target: &TargetAddr) -> io::Result<BoxedStream> {
		let stream = match target {
			TargetAddr::Ip(addr) => TcpStream::connect(addr).await?,
			TargetAddr::Domain(host, port) => TcpStream::connect((host.as_str(), *port)).await?,
		};
		Ok(Box::new(stream))
	}
}

/// Source of client connections.
#[async_trait]
pub trait Incoming: Send {
	type Stream: ProxyStream + 'static;

	async fn accept(&mut self) -> io::Result<(Self::Stream, SocketAddr)>;
}

#[async_trait]
impl Incoming for TcpListener {
	type Stream = TcpStream;

	async fn accept(&mut self) -> io::Result<(TcpStream, SocketAddr)> {
		TcpListener::accept(self).await
	}
}

/// Log a failed accept and back off. Errors such as EMFILE or ECONNABORTED
/// leave the listener usable.
pub(crate) async fn accept_failed(error: &io::Error) {
	warn!(error = %error, "accept failed, retrying");
	tokio::time::sleep(ACCEPT_BACKOFF).await;
}

/// Accept SOCKS5 clients until the scope is cancelled.
pub async fn serve<D: Dialer>(listener: TcpListener, dialer: Arc<D>, scope: Scope) -> io::Result<()> {
	if let Ok(addr) = listener.local_addr() {
		info!(%addr, "SOCKS5 proxy listening");
	}
	serve_incoming(listener, dialer, scope).await
}

pub async fn serve_incoming<I, D>(mut incoming: I, dialer: Arc<D>, scope: Scope) -> io::Result<()>
where
	I: Incoming,
	D: Dialer,
{
	loop {
		tokio::select! {
			_ = scope.cancelled() => {
				debug!("SOCKS5 proxy stopping");
				return Ok(());
			}
			accepted = incoming.accept() => match accepted {
				Ok((stream, peer)) => {
					let dialer = Arc::clone(&dialer);
					tokio::spawn(async move {
						if let Err(e) = handle_client(stream, dialer.as_ref()).await {
							debug!(%peer, error = %e, "SOCKS5 client ended with error");
						}
					});
				}
				Err(e) => accept_failed(&e).await,
			},
		}
	}
}

async fn handle_client<S, D>(mut client: S, dialer: &D) -> io::Result<()>
where
	S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
	D: Dialer + ?Sized,
{
	negotiate_method(&mut client).await?;
	let target = match read_request(&mut client).await {
		Ok(target) => target,
		Err(RequestError::Io(e)) => return Err(e),
		Err(RequestError::Reject(code, message)) => {
			write_reply(&mut client, code).await?;
			return Err(io::Error::new(io::ErrorKind::InvalidData, message));
		}
	};

	let upstream = match dialer.dial(&target).await {
		Ok(upstream) => upstream,
		Err(e) => {
			warn!(%target, error = %e, "SOCKS5 dial failed");
			let code = if e.kind() == io::ErrorKind::ConnectionRefused {
				REPLY_CONNECTION_REFUSED
			} else {
				REPLY_GENERAL_FAILURE
			};
			write_reply(&mut client, code).await?;
			return Err(e);
		}
	};
	write_reply(&mut client, REPLY_SUCCEEDED).await?;
	debug!(%target, "SOCKS5 connection established");

	relay(upstream, client).await;
	Ok(())
}

async fn negotiate_method<S: AsyncRead + AsyncWrite + Unpin>(client: &mut S) -> io::Result<()> {
	let mut header = [0u8; 2];
	client.read_exact(&mut header).await?;
	if header[0] != VERSION {
		return Err(io::Error::new(
			io::ErrorKind::InvalidData,
			format!("unsupported SOCKS version {}", header[0]),
		));
	}
	let mut methods = vec![0u8; header[1] as usize];
	client.read_exact(&mut methods).await?;

	if methods.contains(&METHOD_NO_AUTH) {
		client.write_all(&[VERSION, METHOD_NO_AUTH]).await
	} else {
		client.write_all(&[VERSION, METHOD_NONE_ACCEPTABLE]).await?;
		Err(io::Error::new(
			io::ErrorKind::PermissionDenied,
			"client offered no acceptable auth method",
		))
	}
}

enum RequestError {
	Io(io::Error),
	Reject(u8, String),
}

impl From<io::Error> for RequestError {
	fn from(e: io::Error) -> Self {
		RequestError::Io(e)
	}
}

async fn read_request<S: AsyncRead + Unpin>(client: &mut S) -> Result<TargetAddr, RequestError> {
	let mut header = [0u8; 4];
	client.read_exact(&mut header).await?;
	let [version, command, _reserved, atyp] = header;
	if version != VERSION {
		return Err(RequestError::Reject(
			REPLY_GENERAL_FAILURE,
			format!("unsupported SOCKS version {version}"),
		));
	}
	if command != CMD_CONNECT {
		return Err(RequestError::Reject(
			REPLY_COMMAND_NOT_SUPPORTED,
			format!("unsupported SOCKS command {command}"),
		));
	}

	let target = match atyp {
		ATYP_IPV4 => {
			let mut octets = [0u8; 4];
			client.read_exact(&mut octets).await?;
			let port = client.read_u16().await?;
			TargetAddr::Ip(SocketAddr::new(Ipv4Addr::from(octets).into(), port))
		}
		ATYP_IPV6 => {
			let mut octets = [0u8; 16];
			client.read_exact(&mut octets).await?;
			let port = client.read_u16().await?;
			TargetAddr::Ip(SocketAddr::new(Ipv6Addr::from(octets).into(), port))
		}
		ATYP_DOMAIN => {
			let len = client.read_u8().await? as usize;
			let mut name = vec![0u8; len];
			client.read_exact(&mut name).await?;
			let port = client.read_u16().await?;
			let host = String::from_utf8(name).map_err(|_| {
				RequestError::Reject(REPLY_ADDRESS_NOT_SUPPORTED, "domain is not UTF-8".to_string())
			})?;
			TargetAddr::Domain(host, port)
		}
		other => {
			return Err(RequestError::Reject(
				REPLY_ADDRESS_NOT_SUPPORTED,
				format!("unsupported address type {other}"),
			))
		}
	};
	Ok(target)
}

async fn write_reply<S: AsyncWrite + Unpin>(client: &mut S, code: u8) -> io::Result<()> {
	client
		.write_all(&[VERSION, code, 0x00, ATYP_IPV4, 0, 0, 0, 0, 0, 0])
		.await
}
