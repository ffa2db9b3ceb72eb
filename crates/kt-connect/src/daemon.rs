// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Runs one [`Flow`] until a termination trigger fires, then cleans up.

use crate::cleanup::{Cleanup, CleanupReport};
use crate::error::Result;
use crate::flow::Flow;
use crate::hop::PortForward;
use crate::hosts::HostsEditor;
use crate::ledger::CleanupLedger;
use crate::pidfile;
use crate::registry::ServiceRegistry;
use crate::session::SessionContext;
use kt_cluster::ClusterControlPlane;
use kt_common_process::{LegExit, Scope, Supervisor};
use kt_tunnel_ssh::Transport;
use std::fmt;
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, instrument, warn};

/// Why the daemon stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Termination {
	/// A process signal, by name.
	Signal(String),
	/// A background leg ended on its own.
	LegExited(LegExit),
	/// The session scope was cancelled.
	Cancelled,
	/// The stop handle was triggered.
	Completed,
}

impl fmt::Display for Termination {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Termination::Signal(name) => write!(f, "signal {name}"),
			Termination::LegExited(exit) => write!(f, "{} {}", exit.name, exit.outcome),
			Termination::Cancelled => f.write_str("session cancelled"),
			Termination::Completed => f.write_str("completed"),
		}
	}
}

#[derive(Debug, Clone)]
pub struct DaemonOutcome {
	pub termination: Termination,
	pub report: CleanupReport,
}

pub struct Daemon {
	app_home: PathBuf,
	wait_time: Duration,
	cluster: Arc<dyn ClusterControlPlane>,
	transport: Arc<dyn Transport>,
	port_forward: PortForward,
	hosts: Option<Arc<dyn HostsEditor>>,
	registry: Option<Arc<dyn ServiceRegistry>>,
	stop: Scope,
}

impl Daemon {
	pub fn new(
		app_home: impl Into<PathBuf>,
		wait_time: Duration,
		cluster: Arc<dyn ClusterControlPlane>,
		transport: Arc<dyn Transport>,
		port_forward: PortForward,
	) -> Self {
		Self {
			app_home: app_home.into(),
			wait_time,
			cluster,
			transport,
			port_forward,
			hosts: None,
			registry: None,
			stop: Scope::new(),
		}
	}

	/// Hosts editor used to drop recorded hosts entries on cleanup.
	pub fn with_hosts(mut self, hosts: Arc<dyn HostsEditor>) -> Self {
		self.hosts = Some(hosts);
		self
	}

	pub fn with_registry(mut self, registry: Arc<dyn ServiceRegistry>) -> Self {
		self.registry = Some(registry);
		self
	}

	/// Cancelling the returned scope ends [`Daemon::run`] as completed.
	pub fn stop_handle(&self) -> Scope {
		self.stop.clone()
	}

	fn cleanup(&self, ledger: Arc<CleanupLedger>) -> Cleanup {
		let mut cleanup = Cleanup::new(ledger, Arc::clone(&self.cluster));
		if let Some(hosts) = &self.hosts {
			cleanup = cleanup.with_hosts(Arc::clone(hosts));
		}
		if let Some(registry) = &self.registry {
			cleanup = cleanup.with_registry(Arc::clone(registry));
		}
		cleanup
	}

	/// Establish `flow`, wait for the first termination trigger, then close
	/// the sessions and run cleanup exactly once.
	///
	/// A second daemon in the same mode fails before anything is started.
	/// Establishment errors are returned after cleanup has run.
	#[instrument(skip_all, fields(mode = flow.mode()))]
	pub async fn run<S>(&self, flow: &mut dyn Flow, shutdown: S) -> Result<DaemonOutcome>
	where
		S: Future<Output = String> + Send,
	{
		let marker = pidfile::marker_path(&self.app_home, flow.mode());
		pidfile::acquire(&marker)?;

		let ledger = Arc::new(CleanupLedger::new());
		ledger.record_pid_marker(marker);
		let cleanup = self.cleanup(Arc::clone(&ledger));

		let scope = Scope::new();
		let (supervisor, mut exits) = Supervisor::new(scope.clone());
		let ctx = SessionContext {
			supervisor,
			transport: Arc::clone(&self.transport),
			port_forward: self.port_forward.clone(),
			ledger,
			wait_time: self.wait_time,
		};

		tokio::pin!(shutdown);
		let early = tokio::select! {
			result = flow.establish(&ctx) => result.map(|()| None),
			signal = &mut shutdown => Ok(Some(Termination::Signal(signal))),
			_ = self.stop.cancelled() => Ok(Some(Termination::Completed)),
		};
		let early = match early {
			Ok(early) => early,
			Err(e) => {
				error!(error = %e, "failed to establish");
				scope.cancel();
				flow.close().await;
				cleanup.run().await;
				return Err(e);
			}
		};

		let termination = match early {
			Some(termination) => termination,
			None => {
				info!("daemon ready, waiting for termination");
				tokio::select! {
					biased;

					exit = exits.recv() => match exit {
						Some(exit) => Termination::LegExited(exit),
						None => Termination::Cancelled,
					},
					_ = scope.cancelled() => Termination::Cancelled,
					signal = &mut shutdown => Termination::Signal(signal),
					_ = self.stop.cancelled() => Termination::Completed,
				}
			}
		};

		info!(%termination, "shutting down");
		scope.cancel();
		flow.close().await;
		let report = cleanup.run().await.clone();
		if !report.is_clean() {
			warn!(failed = report.failures.len(), "some resources may need manual removal");
		}
		Ok(DaemonOutcome { termination, report })
	}
}

/// Resolves with the name of the first termination signal received.
#[cfg(unix)]
pub async fn shutdown_signal() -> String {
	use tokio::signal::unix::{signal, SignalKind};

	let kinds = [
		(SignalKind::interrupt(), "SIGINT"),
		(SignalKind::terminate(), "SIGTERM"),
		(SignalKind::hangup(), "SIGHUP"),
		(SignalKind::quit(), "SIGQUIT"),
	];
	let mut streams = Vec::with_capacity(kinds.len());
	for (kind, name) in kinds {
		match signal(kind) {
			Ok(stream) => streams.push((stream, name)),
			Err(e) => warn!(signal = name, error = %e, "cannot listen for signal"),
		}
	}
	if streams.is_empty() {
		return std::future::pending().await;
	}

	let waits = streams.iter_mut().map(|(stream, name)| {
		Box::pin(async move {
			stream.recv().await;
			*name
		})
	});
	let (name, _, _) = futures::future::select_all(waits).await;
	info!(signal = name, "terminal signal received");
	name.to_string()
}

#[cfg(not(unix))]
pub async fn shutdown_signal() -> String {
	match tokio::signal::ctrl_c().await {
		Ok(()) => "ctrl-c".to_string(),
		Err(e) => {
			warn!(error = %e, "cannot listen for ctrl-c");
			std::future::pending().await
		}
	}
}
