// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use std::fmt;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tracing::{debug, trace};

/// Which half of a relay finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CopyDirection {
	RemoteToLocal,
	LocalToRemote,
}

impl fmt::Display for CopyDirection {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			CopyDirection::RemoteToLocal => f.write_str("remote->local"),
			CopyDirection::LocalToRemote => f.write_str("local->remote"),
		}
	}
}

/// Result of one copy direction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CopyEnd {
	pub direction: CopyDirection,
	pub bytes: u64,
	pub error: Option<String>,
}

/// A running bidirectional relay.
///
/// Each direction copies on its own task and shuts down its write side when
/// its read side reaches EOF. Neither task is aborted when the other ends.
pub struct Relay {
	done: mpsc::Receiver<CopyEnd>,
}

impl Relay {
	pub fn start<R, L>(remote: R, local: L) -> Self
	where
		R: AsyncRead + AsyncWrite + Send + 'static,
		L: AsyncRead + AsyncWrite + Send + 'static,
	{
		let (remote_read, remote_write) = tokio::io::split(remote);
		let (local_read, local_write) = tokio::io::split(local);
		let (tx, done) = mpsc::channel(2);

		tokio::spawn(copy_half(
			CopyDirection::RemoteToLocal,
			remote_read,
			local_write,
			tx.clone(),
		));
		tokio::spawn(copy_half(
			CopyDirection::LocalToRemote,
			local_read,
			remote_write,
			tx,
		));

		Self { done }
	}

	/// Wait for the first direction to finish.
	pub async fn first_finished(&mut self) -> Option<CopyEnd> {
		self.done.recv().await
	}

	/// Wait for both directions to finish.
	pub async fn finished(mut self) -> Vec<CopyEnd> {
		let mut ends = Vec::with_capacity(2);
		while let Some(end) = self.done.recv().await {
			ends.push(end);
		}
		ends
	}
}

/// Relay between two streams and return when either direction finishes.
/// The other direction keeps draining in the background.
pub async fn relay<R, L>(remote: R, local: L) -> Option<CopyEnd>
where
	R: AsyncRead + AsyncWrite + Send + 'static,
	L: AsyncRead + AsyncWrite + Send + 'static,
{
	let end = Relay::start(remote, local).first_finished().await;
	if let Some(end) = &end {
		debug!(direction = %end.direction, bytes = end.bytes, "relay direction finished");
	}
	end
}

async fn copy_half<Rd, Wr>(
	direction: CopyDirection,
	mut reader: Rd,
	mut writer: Wr,
	done: mpsc::Sender<CopyEnd>,
) where
	Rd: AsyncRead + Unpin,
	Wr: AsyncWrite + Unpin,
{
	let end = match tokio::io::copy(&mut reader, &mut writer).await {
		Ok(bytes) => CopyEnd {
			direction,
			bytes,
			error: None,
		},
		Err(e) => {
			trace!(%direction, error = %e, "copy ended with error");
			CopyEnd {
				direction,
				bytes: 0,
				error: Some(e.to_string()),
			}
		}
	};
	let _ = writer.shutdown().await;
	let _ = done.send(end).await;
}

#[cfg(test)]
mod tests {
	use super::*;
	use tokio::io::{duplex, AsyncReadExt};

	#[tokio::test]
	async fn payload_crosses_both_directions_intact() {
		let (mut remote_peer, remote) = duplex(64);
		let (mut local_peer, local) = duplex(64);
		let relay = Relay::start(remote, local);

		let request: Vec<u8> = (0..4096u32).map(|i| (i % 251) as u8).collect();
		let expected = request.clone();
		let writer = tokio::spawn(async move {
			remote_peer.write_all(&request).await.unwrap();
			remote_peer.shutdown().await.unwrap();
			let mut reply = Vec::new();
			remote_peer.read_to_end(&mut reply).await.unwrap();
			reply
		});

		let mut received = Vec::new();
		local_peer.read_to_end(&mut received).await.unwrap();
		assert_eq!(received, expected);

		local_peer.write_all(b"pong").await.unwrap();
		local_peer.shutdown().await.unwrap();

		assert_eq!(writer.await.unwrap(), b"pong");

		let ends = relay.finished().await;
		assert_eq!(ends.len(), 2);
		let inbound = ends
			.iter()
			.find(|e| e.direction == CopyDirection::RemoteToLocal)
			.unwrap();
		assert_eq!(inbound.bytes, 4096);
	}

	#[tokio::test]
	async fn first_finished_reports_closed_side() {
		let (remote_peer, remote) = duplex(64);
		let (_local_peer, local) = duplex(64);
		let mut relay = Relay::start(remote, local);

		drop(remote_peer);
		let end = relay.first_finished().await.unwrap();
		assert_eq!(end.direction, CopyDirection::RemoteToLocal);
		assert_eq!(end.bytes, 0);
	}

	#[tokio::test]
	async fn eof_on_one_side_propagates_as_shutdown() {
		let (remote_peer, remote) = duplex(64);
		let (mut local_peer, local) = duplex(64);
		let _relay = Relay::start(remote, local);

		drop(remote_peer);
		let mut buf = Vec::new();
		let n = local_peer.read_to_end(&mut buf).await.unwrap();
		assert_eq!(n, 0);
	}
}
