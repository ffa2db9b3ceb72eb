// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Teardown of everything a session recorded in its ledger.
//!
//! [`Cleanup::run`] executes at most once. Every trigger (signal, leg exit,
//! establishment failure, normal completion) calls it and all of them
//! observe the same [`CleanupReport`].

use crate::error::CleanupFailure;
use crate::hosts::HostsEditor;
use crate::ledger::{CleanupLedger, LedgerEntries};
use crate::pidfile;
use crate::registry::ServiceRegistry;
use kt_cluster::{ClusterControlPlane, ShadowLifecycle};
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::{debug, info, instrument, warn};

/// Cleanup steps in the order they run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CleanupStep {
	PidMarker,
	HintFiles,
	Hosts,
	Registry,
	RestoreOrigin,
	Shadow,
	Service,
}

impl fmt::Display for CleanupStep {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let name = match self {
			CleanupStep::PidMarker => "pid-marker",
			CleanupStep::HintFiles => "hint-files",
			CleanupStep::Hosts => "hosts",
			CleanupStep::Registry => "registry",
			CleanupStep::RestoreOrigin => "restore-origin",
			CleanupStep::Shadow => "shadow",
			CleanupStep::Service => "service",
		};
		f.write_str(name)
	}
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CleanupReport {
	/// Steps that had something to undo and did it.
	pub completed: Vec<CleanupStep>,
	pub failures: Vec<CleanupFailure>,
}

impl CleanupReport {
	pub fn is_clean(&self) -> bool {
		self.failures.is_empty()
	}

	fn record(&mut self, step: CleanupStep, result: Result<bool, String>) {
		match result {
			Ok(true) => self.completed.push(step),
			Ok(false) => debug!(%step, "nothing to clean"),
			Err(message) => {
				warn!(%step, error = %message, "cleanup step failed, continuing");
				self.failures.push(CleanupFailure { step, message });
			}
		}
	}
}

pub struct Cleanup {
	ledger: Arc<CleanupLedger>,
	cluster: Arc<dyn ClusterControlPlane>,
	lifecycle: ShadowLifecycle,
	hosts: Option<Arc<dyn HostsEditor>>,
	registry: Option<Arc<dyn ServiceRegistry>>,
	latch: OnceCell<CleanupReport>,
	executions: AtomicUsize,
}

impl Cleanup {
	pub fn new(ledger: Arc<CleanupLedger>, cluster: Arc<dyn ClusterControlPlane>) -> Self {
		Self {
			ledger,
			lifecycle: ShadowLifecycle::new(Arc::clone(&cluster)),
			cluster,
			hosts: None,
			registry: None,
			latch: OnceCell::new(),
			executions: AtomicUsize::new(0),
		}
	}

	pub fn with_hosts(mut self, hosts: Arc<dyn HostsEditor>) -> Self {
		self.hosts = Some(hosts);
		self
	}

	pub fn with_registry(mut self, registry: Arc<dyn ServiceRegistry>) -> Self {
		self.registry = Some(registry);
		self
	}

	/// How many times the steps actually ran. Never more than one.
	pub fn executions(&self) -> usize {
		self.executions.load(Ordering::SeqCst)
	}

	/// Run the cleanup steps once. Later and concurrent calls wait for and
	/// return the first run's report.
	pub async fn run(&self) -> &CleanupReport {
		self.latch.get_or_init(|| self.execute()).await
	}

	#[instrument(skip(self))]
	async fn execute(&self) -> CleanupReport {
		self.executions.fetch_add(1, Ordering::SeqCst);
		let entries = self.ledger.take().unwrap_or_default();
		info!("cleaning up");

		let mut report = CleanupReport::default();
		report.record(CleanupStep::PidMarker, self.remove_pid_marker(&entries));
		report.record(CleanupStep::HintFiles, remove_hint_files(&entries));
		report.record(CleanupStep::Hosts, self.drop_hosts(&entries).await);
		report.record(CleanupStep::Registry, self.deregister(&entries).await);
		report.record(CleanupStep::RestoreOrigin, self.restore_origin(&entries).await);
		report.record(CleanupStep::Shadow, self.release_shadow(&entries).await);
		report.record(CleanupStep::Service, self.remove_service(&entries).await);

		if report.is_clean() {
			info!(steps = report.completed.len(), "cleanup finished");
		} else {
			warn!(failed = report.failures.len(), "cleanup finished with failures");
		}
		report
	}

	fn remove_pid_marker(&self, entries: &LedgerEntries) -> Result<bool, String> {
		match &entries.pid_marker {
			Some(path) => pidfile::remove_if_exists(path).map_err(|e| e.to_string()),
			None => Ok(false),
		}
	}

	async fn drop_hosts(&self, entries: &LedgerEntries) -> Result<bool, String> {
		let Some(hosts) = self.hosts.as_ref().filter(|_| !entries.hosts.is_empty()) else {
			return Ok(false);
		};
		info!(count = entries.hosts.len(), "dropping hosts entries");
		hosts
			.remove_entries(&entries.hosts)
			.await
			.map(|()| true)
			.map_err(|e| e.to_string())
	}

	async fn deregister(&self, entries: &LedgerEntries) -> Result<bool, String> {
		let Some(registry) = self.registry.as_ref().filter(|_| !entries.registry.is_empty()) else {
			return Ok(false);
		};
		info!(count = entries.registry.len(), "deregistering services");
		registry
			.deregister(&entries.registry)
			.await
			.map(|()| true)
			.map_err(|e| e.to_string())
	}

	async fn restore_origin(&self, entries: &LedgerEntries) -> Result<bool, String> {
		let Some(origin) = &entries.origin else {
			return Ok(false);
		};
		info!(workload = %origin.name, replicas = origin.replicas, "restoring origin workload");
		self.cluster
			.scale_to(&origin.name, &origin.namespace, origin.replicas)
			.await
			.map(|()| true)
			.map_err(|e| e.to_string())
	}

	async fn release_shadow(&self, entries: &LedgerEntries) -> Result<bool, String> {
		let Some(shadow) = &entries.shadow else {
			return Ok(false);
		};
		self.lifecycle
			.release(shadow)
			.await
			.map(|_| true)
			.map_err(|e| e.to_string())
	}

	async fn remove_service(&self, entries: &LedgerEntries) -> Result<bool, String> {
		let Some(service) = &entries.service else {
			return Ok(false);
		};
		info!(service = %service.name, "removing service");
		self.cluster
			.remove_service(&service.name, &service.namespace)
			.await
			.map(|()| true)
			.map_err(|e| e.to_string())
	}
}

fn remove_hint_files(entries: &LedgerEntries) -> Result<bool, String> {
	let mut removed = false;
	let mut errors = Vec::new();
	for path in &entries.hint_files {
		match pidfile::remove_if_exists(path) {
			Ok(existed) => removed |= existed,
			Err(e) => errors.push(format!("{}: {e}", path.display())),
		}
	}
	if errors.is_empty() {
		Ok(removed)
	} else {
		Err(errors.join("; "))
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::ledger::{CreatedService, ScaledWorkload};
	use async_trait::async_trait;
	use kt_cluster::{InMemoryCluster, ShadowRecord};
	use std::collections::BTreeMap;
	use std::sync::Mutex;

	fn shadow(name: &str) -> ShadowRecord {
		ShadowRecord {
			name: name.to_string(),
			namespace: "dev".to_string(),
			config_map: format!("{name}-ssh"),
			shared: false,
			private_key: None,
			acquired: true,
		}
	}

	#[derive(Default)]
	struct RecordingHosts {
		removed: Mutex<Vec<BTreeMap<String, String>>>,
	}

	#[async_trait]
	impl HostsEditor for RecordingHosts {
		async fn add_entries(&self, _entries: &BTreeMap<String, String>) -> std::io::Result<()> {
			Ok(())
		}

		async fn remove_entries(&self, entries: &BTreeMap<String, String>) -> std::io::Result<()> {
			self.removed.lock().unwrap().push(entries.clone());
			Ok(())
		}
	}

	#[tokio::test]
	async fn steps_run_in_order() {
		let cluster = InMemoryCluster::new();
		cluster.add_workload("dev", "orders", 3, BTreeMap::new());
		cluster.scale_to("orders", "dev", 0).await.unwrap();

		let ledger = Arc::new(CleanupLedger::new());
		ledger.record_origin(ScaledWorkload {
			name: "orders".to_string(),
			namespace: "dev".to_string(),
			replicas: 3,
		});
		ledger.record_shadow(shadow("orders-kt-abcde"));
		ledger.record_service(CreatedService {
			name: "orders".to_string(),
			namespace: "dev".to_string(),
		});

		let cleanup = Cleanup::new(ledger, Arc::new(cluster.clone()));
		let report = cleanup.run().await;

		assert!(report.is_clean());
		assert_eq!(
			report.completed,
			vec![CleanupStep::RestoreOrigin, CleanupStep::Shadow, CleanupStep::Service]
		);
		assert_eq!(
			cluster.calls()[1..],
			["scale_to", "remove_deployment", "remove_config_map", "remove_service"]
		);
		assert_eq!(cluster.replicas("dev", "orders"), Some(3));
	}

	#[tokio::test]
	async fn second_run_is_a_no_op() {
		let dir = tempfile::tempdir().unwrap();
		let marker = dir.path().join("connect.pid");
		std::fs::write(&marker, "42").unwrap();

		let cluster = InMemoryCluster::new();
		let ledger = Arc::new(CleanupLedger::new());
		ledger.record_pid_marker(marker.clone());
		ledger.record_shadow(shadow("kt-connect-daemon-abcde"));

		let cleanup = Cleanup::new(ledger, Arc::new(cluster.clone()));
		let first = cleanup.run().await.clone();
		let calls = cluster.calls().len();
		let second = cleanup.run().await;

		assert_eq!(&first, second);
		assert_eq!(cleanup.executions(), 1);
		assert_eq!(cluster.calls().len(), calls);
		assert!(!marker.exists());
	}

	#[tokio::test]
	async fn concurrent_triggers_share_one_execution() {
		let cluster = InMemoryCluster::new();
		let ledger = Arc::new(CleanupLedger::new());
		ledger.record_shadow(shadow("kt-connect-daemon-xyz12"));
		let cleanup = Arc::new(Cleanup::new(ledger, Arc::new(cluster.clone())));

		let mut tasks = Vec::new();
		for _ in 0..8 {
			let cleanup = Arc::clone(&cleanup);
			tasks.push(tokio::spawn(async move { cleanup.run().await.clone() }));
		}
		for task in tasks {
			assert_eq!(task.await.unwrap().completed, vec![CleanupStep::Shadow]);
		}
		assert_eq!(cleanup.executions(), 1);
		assert_eq!(
			cluster.calls().iter().filter(|c| *c == "remove_deployment").count(),
			1
		);
	}

	#[tokio::test]
	async fn failed_step_does_not_stop_later_steps() {
		let cluster = InMemoryCluster::new();
		cluster.fail_on("remove_deployment");
		let hosts = Arc::new(RecordingHosts::default());

		let ledger = Arc::new(CleanupLedger::new());
		ledger.record_hosts(BTreeMap::from([("orders".to_string(), "172.21.0.4".to_string())]));
		ledger.record_shadow(shadow("orders"));
		ledger.record_service(CreatedService {
			name: "orders".to_string(),
			namespace: "dev".to_string(),
		});

		let cleanup = Cleanup::new(ledger, Arc::new(cluster.clone())).with_hosts(hosts.clone());
		let report = cleanup.run().await;

		assert_eq!(report.failures.len(), 1);
		assert_eq!(report.failures[0].step, CleanupStep::Shadow);
		assert_eq!(report.completed, vec![CleanupStep::Hosts, CleanupStep::Service]);
		assert_eq!(hosts.removed.lock().unwrap().len(), 1);
	}

	#[tokio::test]
	async fn absent_targets_are_not_failures() {
		let dir = tempfile::tempdir().unwrap();
		let ledger = Arc::new(CleanupLedger::new());
		ledger.record_pid_marker(dir.path().join("gone.pid"));
		ledger.record_hint_file(dir.path().join(".jvmrc"));

		let cleanup = Cleanup::new(ledger, Arc::new(InMemoryCluster::new()));
		let report = cleanup.run().await;
		assert!(report.is_clean());
		assert!(report.completed.is_empty());
	}
}
