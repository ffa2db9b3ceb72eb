// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! The three daemon modes: `connect`, `run` and `exchange`.

use crate::error::{ConnectError, Result};
use crate::hosts::HostsEditor;
use crate::inbound::{InboundSession, PortFailurePolicy};
use crate::ledger::{CreatedService, ScaledWorkload};
use crate::outbound::{OutboundSession, OutboundSettings};
use crate::registry::ServiceRegistry;
use crate::session::SessionContext;
use async_trait::async_trait;
use kt_cluster::{ClusterControlPlane, ShadowEndpoint, ShadowLifecycle, ShadowRequest, ShadowRole};
use kt_common_core::{labels, PortMapping};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{info, instrument};

/// One daemon mode: sets up its cluster objects and sessions, then tears
/// the sessions down. Cluster objects are undone by cleanup from the ledger.
#[async_trait]
pub trait Flow: Send {
	/// Mode name; also names the pid marker.
	fn mode(&self) -> &'static str;

	async fn establish(&mut self, ctx: &SessionContext) -> Result<()>;

	async fn close(&mut self);
}

/// Acquire a shadow with the ledger tracking it from before the cluster call.
async fn acquire_shadow(
	cluster: &Arc<dyn ClusterControlPlane>,
	request: &ShadowRequest,
	ctx: &SessionContext,
) -> Result<ShadowEndpoint> {
	let lifecycle = ShadowLifecycle::new(Arc::clone(cluster));
	let endpoint = lifecycle
		.acquire_recorded(request, |record| ctx.ledger.record_shadow(record))
		.await?;
	Ok(endpoint)
}

/// `connect`: join the cluster network through a connect shadow.
pub struct ConnectFlow {
	cluster: Arc<dyn ClusterControlPlane>,
	request: ShadowRequest,
	settings: OutboundSettings,
	pod_cidr: Option<String>,
	hosts: Option<(Arc<dyn HostsEditor>, Vec<String>)>,
	registry: Option<Arc<dyn ServiceRegistry>>,
	session: Option<OutboundSession>,
}

impl ConnectFlow {
	pub fn new(
		cluster: Arc<dyn ClusterControlPlane>,
		request: ShadowRequest,
		settings: OutboundSettings,
	) -> Self {
		Self {
			cluster,
			request,
			settings,
			pod_cidr: None,
			hosts: None,
			registry: None,
			session: None,
		}
	}

	/// Route this range instead of the nodes' pod CIDRs.
	pub fn with_pod_cidr(mut self, cidr: impl Into<String>) -> Self {
		self.pod_cidr = Some(cidr.into());
		self
	}

	/// Write service addresses of the session namespace and `extra_namespaces`
	/// into the hosts file.
	pub fn with_hosts(mut self, hosts: Arc<dyn HostsEditor>, extra_namespaces: Vec<String>) -> Self {
		self.hosts = Some((hosts, extra_namespaces));
		self
	}

	pub fn with_registry(mut self, registry: Arc<dyn ServiceRegistry>) -> Self {
		self.registry = Some(registry);
		self
	}

	async fn dump_hosts(&self, ctx: &SessionContext) -> Result<()> {
		let Some((editor, extra)) = &self.hosts else {
			return Ok(());
		};
		let namespace = &self.request.namespace;
		let mut entries = self.cluster.service_hosts(namespace).await?;
		for other in extra.iter().filter(|ns| *ns != namespace) {
			for (name, ip) in self.cluster.service_hosts(other).await? {
				entries.insert(format!("{name}.{other}"), ip);
			}
		}
		for (name, ip) in &entries {
			info!(service = %name, %ip, "service found");
		}
		ctx.ledger.record_hosts(entries.clone());
		editor.add_entries(&entries).await?;
		Ok(())
	}

	async fn register(&self, ctx: &SessionContext) -> Result<()> {
		let Some(registry) = &self.registry else {
			return Ok(());
		};
		let entries = self.cluster.service_hosts(&self.request.namespace).await?;
		for (name, ip) in entries {
			let entry = BTreeMap::from([(name, ip)]);
			// Recorded first so a partial registration is still withdrawn.
			ctx.ledger.record_registry(entry.clone());
			registry
				.register(&entry)
				.await
				.map_err(|e| ConnectError::establishment("registry", e))?;
		}
		Ok(())
	}
}

#[async_trait]
impl Flow for ConnectFlow {
	fn mode(&self) -> &'static str {
		"connect"
	}

	#[instrument(skip_all, fields(namespace = %self.request.namespace))]
	async fn establish(&mut self, ctx: &SessionContext) -> Result<()> {
		self.dump_hosts(ctx).await?;
		self.register(ctx).await?;

		let endpoint = acquire_shadow(&self.cluster, &self.request, ctx).await?;

		let cidrs = self
			.cluster
			.cluster_cidrs(&self.request.namespace, self.pod_cidr.as_deref())
			.await?;
		info!(?cidrs, "cluster ranges");

		let session = self
			.session
			.insert(OutboundSession::new(ctx.clone(), self.settings.clone()));
		session.establish(&endpoint, &cidrs).await
	}

	async fn close(&mut self) {
		if let Some(session) = self.session.as_mut() {
			session.close().await;
		}
	}
}

/// `run`: a shadow named after a local service, forwarding one port back.
pub struct RunFlow {
	cluster: Arc<dyn ClusterControlPlane>,
	request: ShadowRequest,
	service: String,
	port: u16,
	expose: bool,
	session: Option<InboundSession>,
}

impl RunFlow {
	pub fn new(cluster: Arc<dyn ClusterControlPlane>, request: ShadowRequest, port: u16, expose: bool) -> Self {
		let service = match &request.role {
			ShadowRole::Run { service } => service.clone(),
			_ => String::new(),
		};
		Self {
			cluster,
			request,
			service,
			port,
			expose,
			session: None,
		}
	}
}

#[async_trait]
impl Flow for RunFlow {
	fn mode(&self) -> &'static str {
		"run"
	}

	#[instrument(skip_all, fields(service = %self.service, port = self.port))]
	async fn establish(&mut self, ctx: &SessionContext) -> Result<()> {
		if self.service.is_empty() {
			return Err(ConnectError::Precondition {
				message: "run needs a service name".to_string(),
			});
		}
		let endpoint = acquire_shadow(&self.cluster, &self.request, ctx).await?;

		if self.expose {
			info!(service = %self.service, port = self.port, "exposing shadow as a service");
			let selector = BTreeMap::from([(labels::KT.to_string(), endpoint.name.clone())]);
			self.cluster
				.create_service(&self.service, &self.request.namespace, self.port, &selector)
				.await?;
			ctx.ledger.record_service(CreatedService {
				name: self.service.clone(),
				namespace: self.request.namespace.clone(),
			});
		}

		let session = self
			.session
			.insert(InboundSession::new(ctx.clone(), PortFailurePolicy::FailFast));
		session
			.establish(&endpoint, &[PortMapping::same(self.port)])
			.await?;
		info!(
			"forward remote {}:{} -> 127.0.0.1:{}",
			endpoint.pod_ip, self.port, self.port
		);
		Ok(())
	}

	async fn close(&mut self) {
		if let Some(session) = self.session.as_mut() {
			session.close().await;
		}
	}
}

/// `exchange`: replace a workload's pods with a shadow that forwards its
/// ports to the local machine.
pub struct ExchangeFlow {
	cluster: Arc<dyn ClusterControlPlane>,
	namespace: String,
	image: String,
	origin: String,
	user_labels: BTreeMap<String, String>,
	mappings: Vec<PortMapping>,
	policy: PortFailurePolicy,
	debug: bool,
	session: Option<InboundSession>,
}

impl ExchangeFlow {
	/// `template` supplies namespace, image, user labels and debug; its role
	/// is replaced with the origin's.
	pub fn new(
		cluster: Arc<dyn ClusterControlPlane>,
		template: ShadowRequest,
		origin: impl Into<String>,
		mappings: Vec<PortMapping>,
		policy: PortFailurePolicy,
	) -> Self {
		Self {
			cluster,
			namespace: template.namespace,
			image: template.image,
			origin: origin.into(),
			user_labels: template.user_labels,
			mappings,
			policy,
			debug: template.debug,
			session: None,
		}
	}
}

#[async_trait]
impl Flow for ExchangeFlow {
	fn mode(&self) -> &'static str {
		"exchange"
	}

	#[instrument(skip_all, fields(origin = %self.origin, namespace = %self.namespace))]
	async fn establish(&mut self, ctx: &SessionContext) -> Result<()> {
		if self.mappings.is_empty() {
			return Err(ConnectError::Precondition {
				message: "exchange needs at least one port to expose".to_string(),
			});
		}
		let workload = self.cluster.get_workload(&self.origin, &self.namespace).await?;

		let request = ShadowRequest {
			namespace: self.namespace.clone(),
			image: self.image.clone(),
			role: ShadowRole::Exchange {
				origin: self.origin.clone(),
				origin_labels: workload.pod_labels.clone(),
			},
			user_labels: self.user_labels.clone(),
			local_domain: None,
			debug: self.debug,
		};
		let endpoint = acquire_shadow(&self.cluster, &request, ctx).await?;

		info!(origin = %self.origin, replicas = workload.replicas, "scaling origin to zero");
		ctx.ledger.record_origin(ScaledWorkload {
			name: self.origin.clone(),
			namespace: self.namespace.clone(),
			replicas: workload.replicas,
		});
		self.cluster.scale_to(&self.origin, &self.namespace, 0).await?;

		let session = self
			.session
			.insert(InboundSession::new(ctx.clone(), self.policy));
		session.establish(&endpoint, &self.mappings).await?;
		Ok(())
	}

	async fn close(&mut self) {
		if let Some(session) = self.session.as_mut() {
			session.close().await;
		}
	}
}
