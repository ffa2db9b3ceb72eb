// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Every way a daemon can stop ends in exactly one cleanup.

#![cfg(unix)]

use kt_cluster::{InMemoryCluster, ShadowRequest, ShadowRole};
use kt_common_core::PortMapping;
use kt_connect::{
	CleanupStep, ConnectError, ConnectFlow, Daemon, ExchangeFlow, KubeOptions, OutboundMethod,
	OutboundSettings, PortFailurePolicy, PortForward, RunFlow, Sshuttle, Termination,
};
use kt_tunnel_ssh::LoopbackTransport;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::net::{TcpListener, TcpStream};

const GRACE: Duration = Duration::from_millis(200);

/// A `kubectl` stand-in: `sh <script> --namespace .. port-forward ..` runs
/// `body` and ignores the port-forward arguments.
fn fake_kubectl(dir: &Path, body: &str) -> PortForward {
	let script = dir.join("kubectl.sh");
	std::fs::write(&script, format!("{body}\n")).unwrap();
	let options = KubeOptions::parse([script.display().to_string()]).unwrap();
	PortForward::new("sh", options, false)
}

async fn free_port() -> u16 {
	let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
	listener.local_addr().unwrap().port()
}

fn request(role: ShadowRole) -> ShadowRequest {
	ShadowRequest {
		namespace: "dev".to_string(),
		image: "kt-connect-shadow:test".to_string(),
		role,
		user_labels: BTreeMap::new(),
		local_domain: None,
		debug: false,
	}
}

struct Harness {
	home: TempDir,
	cluster: InMemoryCluster,
	daemon: Daemon,
}

fn harness(kubectl_body: &str) -> Harness {
	let home = tempfile::tempdir().unwrap();
	let port_forward = fake_kubectl(home.path(), kubectl_body);
	let cluster = InMemoryCluster::new();
	cluster.set_node_cidrs(vec!["10.244.0.0/16".to_string()]);
	let daemon = Daemon::new(
		home.path().join("app"),
		GRACE,
		Arc::new(cluster.clone()),
		Arc::new(LoopbackTransport::new()),
		port_forward,
	);
	Harness { home, cluster, daemon }
}

fn count(cluster: &InMemoryCluster, op: &str) -> usize {
	cluster.calls().iter().filter(|c| *c == op).count()
}

#[tokio::test]
async fn signal_after_connect_cleans_up_once() {
	let h = harness("exec sleep 30");
	let hint_dir = tempfile::tempdir().unwrap();
	let socks_port = free_port().await;
	let settings = OutboundSettings {
		method: OutboundMethod::Socks5,
		ssh_port: free_port().await,
		socks_port,
		disable_dns: false,
		debug: false,
		hint_dir: hint_dir.path().to_path_buf(),
		sshuttle: Sshuttle::default(),
	};
	let mut flow = ConnectFlow::new(
		Arc::new(h.cluster.clone()),
		request(ShadowRole::Connect { shared: false }),
		settings,
	);

	let hint_dir_path = hint_dir.path().to_path_buf();
	let shutdown = async move {
		while TcpStream::connect(("127.0.0.1", socks_port)).await.is_err()
			|| !hint_dir_path.join(".envrc").exists()
		{
			tokio::time::sleep(Duration::from_millis(50)).await;
		}
		"SIGTERM".to_string()
	};

	let outcome = h.daemon.run(&mut flow, shutdown).await.unwrap();

	assert_eq!(outcome.termination, Termination::Signal("SIGTERM".to_string()));
	assert!(outcome.report.is_clean());
	assert!(outcome.report.completed.contains(&CleanupStep::Shadow));
	assert!(outcome.report.completed.contains(&CleanupStep::HintFiles));
	assert_eq!(count(&h.cluster, "remove_deployment"), 1);
	assert_eq!(count(&h.cluster, "remove_config_map"), 1);
	assert!(!hint_dir.path().join(".jvmrc").exists());
	assert!(!h.home.path().join("app").join("connect.pid").exists());
}

#[tokio::test]
async fn failing_hop_after_startup_cleans_up_once() {
	let h = harness("sleep 1\nexit 1");
	let port = free_port().await;
	let mut flow = RunFlow::new(
		Arc::new(h.cluster.clone()),
		request(ShadowRole::Run {
			service: "orders".to_string(),
		}),
		port,
		true,
	);

	let outcome = h
		.daemon
		.run(&mut flow, std::future::pending::<String>())
		.await
		.unwrap();

	assert!(matches!(
		outcome.termination,
		Termination::LegExited(_) | Termination::Cancelled
	));
	assert_eq!(count(&h.cluster, "remove_deployment"), 1);
	assert_eq!(count(&h.cluster, "remove_service"), 1);
	assert!(!h.cluster.has_service("dev", "orders"));
	assert!(!h.home.path().join("app").join("run.pid").exists());
}

#[tokio::test]
async fn stop_handle_completes_exchange_and_restores_origin() {
	let h = harness("exec sleep 30");
	let labels = BTreeMap::from([("app".to_string(), "orders".to_string())]);
	h.cluster.add_workload("dev", "orders", 2, labels);
	let mut flow = ExchangeFlow::new(
		Arc::new(h.cluster.clone()),
		request(ShadowRole::Connect { shared: false }),
		"orders",
		vec![PortMapping::same(free_port().await)],
		PortFailurePolicy::BestEffort,
	);

	let stop = h.daemon.stop_handle();
	let cluster = h.cluster.clone();
	tokio::spawn(async move {
		while cluster.replicas("dev", "orders") != Some(0) {
			tokio::time::sleep(Duration::from_millis(50)).await;
		}
		tokio::time::sleep(GRACE * 2).await;
		stop.cancel();
	});

	let outcome = h
		.daemon
		.run(&mut flow, std::future::pending::<String>())
		.await
		.unwrap();

	assert_eq!(outcome.termination, Termination::Completed);
	assert_eq!(h.cluster.replicas("dev", "orders"), Some(2));
	assert!(outcome.report.completed.contains(&CleanupStep::RestoreOrigin));
	assert_eq!(count(&h.cluster, "remove_deployment"), 1);
}

#[tokio::test]
async fn establishment_failure_still_cleans_up() {
	let h = harness("exec sleep 30");
	h.cluster.fail_on("get_or_create_shadow");
	let mut flow = RunFlow::new(
		Arc::new(h.cluster.clone()),
		request(ShadowRole::Run {
			service: "orders".to_string(),
		}),
		8080,
		false,
	);

	let err = h
		.daemon
		.run(&mut flow, std::future::pending::<String>())
		.await
		.unwrap_err();

	assert!(matches!(err, ConnectError::Cluster(_)));
	assert!(err.needs_cleanup());
	assert!(!h.home.path().join("app").join("run.pid").exists());
}

#[tokio::test]
async fn second_daemon_in_same_mode_is_refused_without_cleanup() {
	let h = harness("exec sleep 30");
	let marker = h.home.path().join("app").join("run.pid");
	std::fs::create_dir_all(marker.parent().unwrap()).unwrap();
	std::fs::write(&marker, "1").unwrap();

	let mut flow = RunFlow::new(
		Arc::new(h.cluster.clone()),
		request(ShadowRole::Run {
			service: "orders".to_string(),
		}),
		8080,
		false,
	);
	let err = h
		.daemon
		.run(&mut flow, std::future::pending::<String>())
		.await
		.unwrap_err();

	assert!(matches!(err, ConnectError::Precondition { .. }));
	assert!(marker.exists());
	assert!(h.cluster.calls().is_empty());
}

#[tokio::test]
async fn signal_while_shadow_starts_removes_it() {
	let h = harness("exec sleep 30");
	h.cluster.set_ready_delay(Duration::from_secs(30));
	let mut flow = RunFlow::new(
		Arc::new(h.cluster.clone()),
		request(ShadowRole::Run {
			service: "orders".to_string(),
		}),
		8080,
		false,
	);

	let cluster = h.cluster.clone();
	let shutdown = async move {
		while !cluster.has_deployment("dev", "orders") {
			tokio::time::sleep(Duration::from_millis(20)).await;
		}
		"SIGINT".to_string()
	};

	let outcome = h.daemon.run(&mut flow, shutdown).await.unwrap();

	assert_eq!(outcome.termination, Termination::Signal("SIGINT".to_string()));
	assert!(outcome.report.completed.contains(&CleanupStep::Shadow));
	assert!(!h.cluster.has_deployment("dev", "orders"));
	assert!(!h.cluster.has_config_map("dev", "orders-ssh"));
	assert!(!h.home.path().join("app").join("run.pid").exists());
}

#[tokio::test]
async fn vpn_connect_routes_cluster_ranges_through_sshuttle() {
	let h = harness("exec sleep 30");
	h.cluster.add_service_host("dev", "orders", "172.21.3.4");
	let args_file = h.home.path().join("sshuttle.args");
	let script = h.home.path().join("sshuttle.sh");
	std::fs::write(
		&script,
		format!(
			"echo \"$@\" > {0}.tmp && mv {0}.tmp {0}\nexec sleep 30\n",
			args_file.display()
		),
	)
	.unwrap();
	let ssh_port = free_port().await;
	let settings = OutboundSettings {
		method: OutboundMethod::Vpn,
		ssh_port,
		socks_port: free_port().await,
		disable_dns: false,
		debug: false,
		hint_dir: h.home.path().to_path_buf(),
		sshuttle: Sshuttle::from_command_line(&format!("sh {}", script.display())),
	};
	let mut flow = ConnectFlow::new(
		Arc::new(h.cluster.clone()),
		request(ShadowRole::Connect { shared: false }),
		settings,
	);

	let watched = args_file.clone();
	let shutdown = async move {
		while !watched.exists() {
			tokio::time::sleep(Duration::from_millis(50)).await;
		}
		tokio::time::sleep(GRACE * 2).await;
		"SIGTERM".to_string()
	};

	let outcome = h.daemon.run(&mut flow, shutdown).await.unwrap();

	assert_eq!(outcome.termination, Termination::Signal("SIGTERM".to_string()));
	assert!(outcome.report.is_clean());
	let args = std::fs::read_to_string(&args_file).unwrap();
	assert!(args.starts_with("--dns --to-ns 10.0.0."));
	assert!(args.contains(&format!("root@127.0.0.1:{ssh_port}")));
	assert!(args.trim_end().ends_with("10.244.0.0/16 172.21.0.0/16"));
	assert!(!h.home.path().join(".envrc").exists());
	assert_eq!(count(&h.cluster, "remove_deployment"), 1);
}
