// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

#![cfg(unix)]

use async_trait::async_trait;
use kt_cluster::ShadowEndpoint;
use kt_common_core::{Credential, PortMapping};
use kt_common_process::{ExitReceiver, LegOutcome, Scope, Supervisor};
use kt_connect::{
	CleanupLedger, ConnectError, InboundSession, KubeOptions, PortFailurePolicy, PortForward,
	SessionContext, SessionState,
};
use kt_tunnel_ssh::{LoopbackTransport, Serving, Transport, TunnelError};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

fn context(dir: &TempDir, hop_body: &str) -> (SessionContext, Scope) {
	let (ctx, scope, _exits) = context_with(dir, hop_body, Arc::new(LoopbackTransport::new()));
	(ctx, scope)
}

fn context_with(
	dir: &TempDir,
	hop_body: &str,
	transport: Arc<dyn Transport>,
) -> (SessionContext, Scope, ExitReceiver) {
	let script = dir.path().join("kubectl.sh");
	std::fs::write(&script, format!("{hop_body}\n")).unwrap();
	let options = KubeOptions::parse([script.display().to_string()]).unwrap();
	let scope = Scope::new();
	let (supervisor, exits) = Supervisor::new(scope.clone());
	let ctx = SessionContext {
		supervisor,
		transport,
		port_forward: PortForward::new("sh", options, false),
		ledger: Arc::new(CleanupLedger::new()),
		wait_time: Duration::from_millis(150),
	};
	(ctx, scope, exits)
}

/// Forwards start fine; the one on `breaks_on` drops its session shortly
/// after, the rest serve until cancelled.
struct BreakingTransport {
	breaks_on: u16,
}

#[async_trait]
impl Transport for BreakingTransport {
	async fn start_socks5_proxy(
		&self,
		_credential: &Credential,
		_session_addr: SocketAddr,
		_listen_addr: SocketAddr,
		_scope: Scope,
	) -> kt_tunnel_ssh::Result<Serving> {
		Err(TunnelError::SessionClosed)
	}

	async fn forward_remote_to_local(
		&self,
		_credential: &Credential,
		_session_addr: SocketAddr,
		remote_listen: SocketAddr,
		_local_dial: SocketAddr,
		scope: Scope,
	) -> kt_tunnel_ssh::Result<Serving> {
		if remote_listen.port() == self.breaks_on {
			return Ok(Box::pin(async {
				tokio::time::sleep(Duration::from_millis(100)).await;
				Err(TunnelError::SessionClosed)
			}));
		}
		Ok(Box::pin(async move {
			scope.cancelled().await;
			Ok(())
		}))
	}
}

async fn round_trip(port: u16, payload: &[u8]) {
	let mut stream = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
	stream.write_all(payload).await.unwrap();
	let mut buf = vec![0u8; payload.len()];
	stream.read_exact(&mut buf).await.unwrap();
	assert_eq!(buf, payload);
}

fn endpoint() -> ShadowEndpoint {
	ShadowEndpoint {
		name: "orders".to_string(),
		namespace: "dev".to_string(),
		pod_name: "orders-0".to_string(),
		pod_ip: "10.0.0.7".to_string(),
		config_map: "orders-ssh".to_string(),
		credential: Credential::default(),
		ref_count: 1,
		shared: false,
	}
}

async fn free_port() -> u16 {
	TcpListener::bind("127.0.0.1:0")
		.await
		.unwrap()
		.local_addr()
		.unwrap()
		.port()
}

async fn echo_server() -> u16 {
	let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
	let port = listener.local_addr().unwrap().port();
	tokio::spawn(async move {
		while let Ok((mut stream, _)) = listener.accept().await {
			tokio::spawn(async move {
				let (mut rd, mut wr) = stream.split();
				let _ = tokio::io::copy(&mut rd, &mut wr).await;
			});
		}
	});
	port
}

#[tokio::test]
async fn inbound_relays_remote_port_to_local_service() {
	let dir = tempfile::tempdir().unwrap();
	let (ctx, _scope) = context(&dir, "exec sleep 30");
	let local = echo_server().await;
	let remote = free_port().await;

	let mut session = InboundSession::new(ctx, PortFailurePolicy::FailFast);
	let served = session
		.establish(&endpoint(), &[PortMapping::new(local, remote)])
		.await
		.unwrap();
	assert_eq!(served, vec![PortMapping::new(local, remote)]);
	assert_eq!(session.state(), SessionState::FinalLayerActive);

	let mut stream = TcpStream::connect(("127.0.0.1", remote)).await.unwrap();
	stream.write_all(b"hello shadow").await.unwrap();
	let mut buf = [0u8; 12];
	stream.read_exact(&mut buf).await.unwrap();
	assert_eq!(&buf, b"hello shadow");

	session.close().await;
	assert_eq!(session.state(), SessionState::Closed);
}

#[tokio::test]
async fn best_effort_keeps_the_pairs_that_started() {
	let dir = tempfile::tempdir().unwrap();
	let (ctx, scope) = context(&dir, "exec sleep 30");
	let taken = TcpListener::bind("0.0.0.0:0").await.unwrap();
	let busy = taken.local_addr().unwrap().port();
	let open = free_port().await;

	let mut session = InboundSession::new(ctx, PortFailurePolicy::BestEffort);
	let served = session
		.establish(
			&endpoint(),
			&[PortMapping::new(9001, busy), PortMapping::new(9002, open)],
		)
		.await
		.unwrap();

	assert_eq!(served, vec![PortMapping::new(9002, open)]);
	assert!(!scope.is_cancelled());
	session.close().await;
}

#[tokio::test]
async fn fail_fast_aborts_on_the_first_bad_pair() {
	let dir = tempfile::tempdir().unwrap();
	let (ctx, scope) = context(&dir, "exec sleep 30");
	let taken = TcpListener::bind("0.0.0.0:0").await.unwrap();
	let busy = taken.local_addr().unwrap().port();

	let mut session = InboundSession::new(ctx, PortFailurePolicy::FailFast);
	let err = session
		.establish(&endpoint(), &[PortMapping::new(9001, busy)])
		.await
		.unwrap_err();

	assert!(matches!(err, ConnectError::Establishment { .. }));
	assert!(scope.is_cancelled());
	assert_eq!(session.state(), SessionState::Closing);
}

#[tokio::test]
async fn hop_exiting_during_grace_fails_the_session() {
	let dir = tempfile::tempdir().unwrap();
	let (ctx, scope) = context(&dir, "exit 1");

	let mut session = InboundSession::new(ctx, PortFailurePolicy::BestEffort);
	let err = session
		.establish(&endpoint(), &[PortMapping::same(free_port().await)])
		.await
		.unwrap_err();

	match err {
		ConnectError::Establishment { leg, .. } => assert_eq!(leg, "port-forward"),
		other => panic!("unexpected error: {other}"),
	}
	assert!(scope.is_cancelled());
}

#[tokio::test]
async fn reverse_forward_accepts_again_after_a_connection_closes() {
	let dir = tempfile::tempdir().unwrap();
	let (ctx, _scope) = context(&dir, "exec sleep 30");
	let local = echo_server().await;
	let remote = free_port().await;

	let mut session = InboundSession::new(ctx, PortFailurePolicy::BestEffort);
	session
		.establish(&endpoint(), &[PortMapping::new(local, remote)])
		.await
		.unwrap();

	round_trip(remote, b"first").await;
	round_trip(remote, b"second connection").await;
	session.close().await;
}

#[tokio::test]
async fn best_effort_pair_breaking_later_leaves_the_rest_serving() {
	let dir = tempfile::tempdir().unwrap();
	let transport = Arc::new(BreakingTransport { breaks_on: 1001 });
	let (ctx, scope, mut exits) = context_with(&dir, "exec sleep 30", transport);

	let mut session = InboundSession::new(ctx, PortFailurePolicy::BestEffort);
	let served = session
		.establish(
			&endpoint(),
			&[PortMapping::new(8001, 1001), PortMapping::new(8002, 1002)],
		)
		.await
		.unwrap();
	assert_eq!(served.len(), 2);

	tokio::time::sleep(Duration::from_millis(400)).await;
	assert!(!scope.is_cancelled());
	assert!(exits.try_recv().is_err());
	assert_eq!(session.state(), SessionState::FinalLayerActive);

	session.close().await;
	assert_eq!(session.state(), SessionState::Closed);
}

#[tokio::test]
async fn fail_fast_pair_breaking_later_stops_the_session() {
	let dir = tempfile::tempdir().unwrap();
	let transport = Arc::new(BreakingTransport { breaks_on: 1001 });
	let (ctx, scope, mut exits) = context_with(&dir, "exec sleep 30", transport);

	let mut session = InboundSession::new(ctx, PortFailurePolicy::FailFast);
	session
		.establish(
			&endpoint(),
			&[PortMapping::new(8001, 1001), PortMapping::new(8002, 1002)],
		)
		.await
		.unwrap();

	let broken = tokio::time::timeout(Duration::from_secs(5), async {
		loop {
			let exit = exits.recv().await.unwrap();
			if exit.name == "forward 1001->8001" {
				return exit;
			}
		}
	})
	.await
	.unwrap();
	assert!(matches!(broken.outcome, LegOutcome::Failed(_)));
	assert!(scope.is_cancelled());
	session.close().await;
}
