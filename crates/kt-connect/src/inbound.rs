// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Inbound session: cluster traffic to the shadow reaches local services.

use crate::error::{ConnectError, Result};
use crate::hop::derive_session_port;
use crate::session::{stop_legs, SessionContext, SessionState, SessionTracker};
use kt_cluster::ShadowEndpoint;
use kt_common_core::{Direction, PortMapping};
use kt_common_process::{LegHandle, Supervisor, TaskGroup};
use kt_tunnel_ssh::{Serving, TunnelError};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::{Ipv4Addr, SocketAddr};
use std::str::FromStr;
use std::sync::Arc;
use tracing::{error, info, instrument, warn};

/// What to do when one port pair cannot be forwarded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PortFailurePolicy {
	/// Log the pair and keep the others. Fails only if no pair starts.
	#[default]
	BestEffort,
	/// Abort the session on the first failing pair.
	FailFast,
}

impl fmt::Display for PortFailurePolicy {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			PortFailurePolicy::BestEffort => f.write_str("best-effort"),
			PortFailurePolicy::FailFast => f.write_str("fail-fast"),
		}
	}
}

impl FromStr for PortFailurePolicy {
	type Err = String;

	fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
		match s {
			"best-effort" => Ok(PortFailurePolicy::BestEffort),
			"fail-fast" => Ok(PortFailurePolicy::FailFast),
			other => Err(format!(
				"unknown port failure policy {other:?}, expected best-effort or fail-fast"
			)),
		}
	}
}

pub struct InboundSession {
	ctx: SessionContext,
	policy: PortFailurePolicy,
	tracker: SessionTracker,
	legs: Vec<LegHandle>,
}

impl InboundSession {
	pub fn new(ctx: SessionContext, policy: PortFailurePolicy) -> Self {
		Self {
			ctx,
			policy,
			tracker: SessionTracker::new(Direction::Inbound),
			legs: Vec::new(),
		}
	}

	pub fn state(&self) -> SessionState {
		self.tracker.state()
	}

	/// Forward every `mapping.remote` on the shadow to `127.0.0.1:mapping.local`.
	/// Returns the pairs that are being served.
	#[instrument(skip_all, fields(shadow = %endpoint.name, pairs = mappings.len(), policy = %self.policy))]
	pub async fn establish(
		&mut self,
		endpoint: &ShadowEndpoint,
		mappings: &[PortMapping],
	) -> Result<Vec<PortMapping>> {
		let result = self.layer_up(endpoint, mappings).await;
		if result.is_err() {
			self.ctx.supervisor.scope().cancel();
			self.tracker.begin_closing();
		}
		result
	}

	async fn layer_up(&mut self, endpoint: &ShadowEndpoint, mappings: &[PortMapping]) -> Result<Vec<PortMapping>> {
		self.tracker.advance(SessionState::HopEstablishing)?;
		let session_port = derive_session_port(&endpoint.pod_ip)?;
		info!(remote = %endpoint.pod_ip, session_port, "remote forward to local");
		let hop = self
			.ctx
			.port_forward
			.command(&endpoint.namespace, &endpoint.pod_name, session_port);
		let leg = self
			.ctx
			.supervisor
			.launch_with_grace(hop, self.ctx.wait_time)
			.await
			.map_err(|e| ConnectError::establishment("port-forward", e))?;
		self.legs.push(leg);

		self.tracker.advance(SessionState::SessionEstablishing)?;
		let session_addr = SocketAddr::from((Ipv4Addr::LOCALHOST, session_port));
		let served = self.launch_pairs(endpoint, session_addr, mappings).await?;

		self.tracker.advance(SessionState::FinalLayerActive)?;
		Ok(served)
	}

	async fn launch_pairs(
		&mut self,
		endpoint: &ShadowEndpoint,
		session_addr: SocketAddr,
		mappings: &[PortMapping],
	) -> Result<Vec<PortMapping>> {
		let credential = Arc::new(endpoint.credential.clone());
		let mut group: TaskGroup<(PortMapping, Supervisor, Serving), (PortMapping, TunnelError)> =
			TaskGroup::new();
		for &mapping in mappings {
			// Best-effort pairs fail alone; fail-fast pairs share the session scope.
			let supervisor = match self.policy {
				PortFailurePolicy::FailFast => self.ctx.supervisor.clone(),
				PortFailurePolicy::BestEffort => self.ctx.supervisor.isolated().0,
			};
			let transport = Arc::clone(&self.ctx.transport);
			let credential = Arc::clone(&credential);
			group.spawn(async move {
				info!(remote = mapping.remote, local = mapping.local, "exposing local port to shadow");
				let remote_listen = SocketAddr::from((Ipv4Addr::UNSPECIFIED, mapping.remote));
				let local_dial = SocketAddr::from((Ipv4Addr::LOCALHOST, mapping.local));
				let scope = supervisor.scope().clone();
				transport
					.forward_remote_to_local(&credential, session_addr, remote_listen, local_dial, scope)
					.await
					.map(|serving| (mapping, supervisor, serving))
					.map_err(|e| (mapping, e))
			});
		}

		let launched = match self.policy {
			PortFailurePolicy::FailFast => group.join_all().await.map_err(|(mapping, e)| {
				error!(%mapping, error = %e, "port pair failed");
				ConnectError::establishment(format!("forward {mapping}"), e)
			})?,
			PortFailurePolicy::BestEffort => {
				let mut launched = Vec::new();
				let mut last_error = None;
				for result in group.join_each().await {
					match result {
						Ok(pair) => launched.push(pair),
						Err((mapping, e)) => {
							warn!(%mapping, error = %e, "port pair failed, continuing with the rest");
							last_error = Some((mapping, e));
						}
					}
				}
				if launched.is_empty() {
					if let Some((mapping, e)) = last_error {
						return Err(ConnectError::establishment(format!("forward {mapping}"), e));
					}
				}
				launched
			}
		};

		let mut served = Vec::with_capacity(launched.len());
		for (mapping, supervisor, serving) in launched {
			let name = format!("forward {}->{}", mapping.remote, mapping.local);
			self.legs.push(supervisor.spawn_leg(name, serving));
			served.push(mapping);
		}
		Ok(served)
	}

	pub async fn close(&mut self) {
		self.tracker.begin_closing();
		stop_legs(&self.ctx.supervisor, std::mem::take(&mut self.legs)).await;
		let _ = self.tracker.advance(SessionState::Closed);
	}
}
