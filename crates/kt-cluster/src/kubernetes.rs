// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! [`ClusterControlPlane`] backed by the Kubernetes API.

use crate::control_plane::ClusterControlPlane;
use crate::error::{is_status, ClusterError, ClusterResult};
use crate::keys;
use crate::manifest;
use crate::types::{ServiceRef, ShadowEndpoint, ShadowSpec, Workload};
use async_trait::async_trait;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{ConfigMap, Node, Pod, Service};
use kt_common_core::{labels, Credential};
use kube::api::{Api, DeleteParams, ListParams, Patch, PatchParams, PostParams};
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Client, Config};
use serde_json::json;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};

/// Attempts at a ref-count update before giving up on a contended shadow.
const MAX_REF_ATTEMPTS: u32 = 8;

#[derive(Debug, Clone)]
pub struct KubeSettings {
	/// Directory for private key files.
	pub app_home: PathBuf,
	pub ready_timeout: Duration,
	pub poll_interval: Duration,
}

impl Default for KubeSettings {
	fn default() -> Self {
		Self {
			app_home: PathBuf::from(".ktctl"),
			ready_timeout: Duration::from_secs(60),
			poll_interval: Duration::from_secs(1),
		}
	}
}

#[derive(Clone)]
pub struct KubeCluster {
	client: Client,
	settings: KubeSettings,
}

impl KubeCluster {
	pub fn new(client: Client, settings: KubeSettings) -> Self {
		Self { client, settings }
	}

	/// Build a client from a kubeconfig file, optionally pinned to a context.
	pub async fn from_kubeconfig(
		path: &Path,
		context: Option<&str>,
		settings: KubeSettings,
	) -> ClusterResult<Self> {
		let kubeconfig = Kubeconfig::read_from(path).map_err(|e| ClusterError::Config {
			message: format!("{}: {e}", path.display()),
		})?;
		let options = KubeConfigOptions {
			context: context.map(str::to_string),
			..Default::default()
		};
		let config = Config::from_custom_kubeconfig(kubeconfig, &options)
			.await
			.map_err(|e| ClusterError::Config {
				message: e.to_string(),
			})?;
		let client = Client::try_from(config)?;
		Ok(Self::new(client, settings))
	}

	fn deployments(&self, namespace: &str) -> Api<Deployment> {
		Api::namespaced(self.client.clone(), namespace)
	}

	fn config_maps(&self, namespace: &str) -> Api<ConfigMap> {
		Api::namespaced(self.client.clone(), namespace)
	}

	fn services(&self, namespace: &str) -> Api<Service> {
		Api::namespaced(self.client.clone(), namespace)
	}

	async fn create_shadow(&self, spec: &ShadowSpec) -> ClusterResult<ShadowEndpoint> {
		let key = keys::generate(&self.settings.app_home, &spec.component, &spec.version).await?;
		let config_map = manifest::config_map_name(&spec.name);

		let cm = manifest::credential_config_map(
			spec,
			&config_map,
			&key.public_key,
			key.private_key.expose(),
		)?;
		let config_map_existed = match self
			.config_maps(&spec.namespace)
			.create(&PostParams::default(), &cm)
			.await
		{
			Ok(_) => {
				debug!(config_map = %config_map, "created credential config map");
				false
			}
			Err(e) if spec.shared && is_status(&e, 409) => {
				debug!(config_map = %config_map, "credential config map already exists");
				true
			}
			Err(e) => return Err(e.into()),
		};

		let deployment = manifest::shadow_deployment(spec, &config_map)?;
		match self
			.deployments(&spec.namespace)
			.create(&PostParams::default(), &deployment)
			.await
		{
			Ok(_) => info!(shadow = %spec.name, namespace = %spec.namespace, "created shadow deployment"),
			Err(e) if spec.shared && is_status(&e, 409) => {
				info!(shadow = %spec.name, "shared shadow created concurrently, attaching");
				return self.attach_shared(spec).await;
			}
			Err(e) => return Err(e.into()),
		}

		if config_map_existed {
			// The deployment mounts the stored public key, not the one just generated.
			let stored = self.stored_private_key(&spec.namespace, &config_map).await?;
			keys::install(&key.private_key_path, &stored).await?;
			info!(config_map = %config_map, "using the key stored with the shadow");
		}

		let (pod_name, pod_ip) = self.wait_ready(spec).await?;
		Ok(ShadowEndpoint {
			name: spec.name.clone(),
			namespace: spec.namespace.clone(),
			pod_name,
			pod_ip,
			config_map,
			credential: Credential::default().with_private_key(key.private_key_path),
			ref_count: 1,
			shared: spec.shared,
		})
	}

	async fn attach_shared(&self, spec: &ShadowSpec) -> ClusterResult<ShadowEndpoint> {
		let ref_count = self
			.update_ref_count(&spec.namespace, &spec.name, |count| Some(count + 1))
			.await?
			.unwrap_or(1);
		info!(shadow = %spec.name, ref_count, "attached to shared shadow");

		let config_map = manifest::config_map_name(&spec.name);
		let private_key = self.stored_private_key(&spec.namespace, &config_map).await?;
		let key_path = keys::private_key_path(&self.settings.app_home, &spec.component, &spec.version);
		keys::install(&key_path, &private_key).await?;

		let (pod_name, pod_ip) = self.wait_ready(spec).await?;
		Ok(ShadowEndpoint {
			name: spec.name.clone(),
			namespace: spec.namespace.clone(),
			pod_name,
			pod_ip,
			config_map,
			credential: Credential::default().with_private_key(key_path),
			ref_count,
			shared: true,
		})
	}

	async fn stored_private_key(&self, namespace: &str, config_map: &str) -> ClusterResult<String> {
		let cm = self.config_maps(namespace).get(config_map).await?;
		manifest::stored_private_key(&cm)
			.map(str::to_string)
			.ok_or_else(|| ClusterError::NotFound {
				kind: "private key",
				namespace: namespace.to_string(),
				name: config_map.to_string(),
			})
	}

	/// Read-modify-replace of the ref-count annotation. `next` maps the current
	/// count to the new one, or `None` to leave the object untouched. Returns
	/// the written count.
	async fn update_ref_count<F>(&self, namespace: &str, name: &str, next: F) -> ClusterResult<Option<u32>>
	where
		F: Fn(u32) -> Option<u32> + Send + Sync,
	{
		let api = self.deployments(namespace);
		for attempt in 1..=MAX_REF_ATTEMPTS {
			let mut deployment = api.get(name).await?;
			let current = manifest::ref_count(&deployment.metadata);
			let Some(count) = next(current) else {
				return Ok(None);
			};
			manifest::set_ref_count(&mut deployment.metadata, count);
			match api.replace(name, &PostParams::default(), &deployment).await {
				Ok(_) => {
					debug!(shadow = %name, from = current, to = count, "updated ref count");
					return Ok(Some(count));
				}
				Err(e) if is_status(&e, 409) => {
					debug!(shadow = %name, attempt, "ref count changed underneath, retrying");
				}
				Err(e) => return Err(e.into()),
			}
		}
		Err(ClusterError::Contended {
			name: name.to_string(),
			attempts: MAX_REF_ATTEMPTS,
		})
	}

	async fn wait_ready(&self, spec: &ShadowSpec) -> ClusterResult<(String, String)> {
		let pods: Api<Pod> = Api::namespaced(self.client.clone(), &spec.namespace);
		let selector = ListParams::default().labels(&format!("{}={}", labels::KT, spec.name));
		let started = Instant::now();

		loop {
			let list = pods.list(&selector).await?;
			if let Some(ready) = list.items.iter().find_map(running_pod) {
				info!(shadow = %spec.name, pod = %ready.0, ip = %ready.1, "shadow pod ready");
				return Ok(ready);
			}
			if started.elapsed() >= self.settings.ready_timeout {
				return Err(ClusterError::Timeout {
					name: spec.name.clone(),
					waited_secs: self.settings.ready_timeout.as_secs(),
				});
			}
			debug!(shadow = %spec.name, "waiting for shadow pod");
			tokio::time::sleep(self.settings.poll_interval).await;
		}
	}
}

fn running_pod(pod: &Pod) -> Option<(String, String)> {
	if pod.metadata.deletion_timestamp.is_some() {
		return None;
	}
	let status = pod.status.as_ref()?;
	if status.phase.as_deref() != Some("Running") {
		return None;
	}
	Some((pod.metadata.name.clone()?, status.pod_ip.clone()?))
}

async fn delete_if_exists<K>(api: Api<K>, name: &str, kind: &'static str) -> ClusterResult<()>
where
	K: kube::Resource + Clone + serde::de::DeserializeOwned + std::fmt::Debug,
{
	match api.delete(name, &DeleteParams::background()).await {
		Ok(_) => {
			info!(%kind, %name, "deleted");
			Ok(())
		}
		Err(e) if is_status(&e, 404) => {
			debug!(%kind, %name, "already absent");
			Ok(())
		}
		Err(e) => Err(e.into()),
	}
}

#[async_trait]
impl ClusterControlPlane for KubeCluster {
	#[instrument(skip(self, spec), fields(shadow = %spec.name, namespace = %spec.namespace, shared = spec.shared))]
	async fn get_or_create_shadow(&self, spec: &ShadowSpec) -> ClusterResult<ShadowEndpoint> {
		if spec.shared && self.deployments(&spec.namespace).get_opt(&spec.name).await?.is_some() {
			return self.attach_shared(spec).await;
		}
		self.create_shadow(spec).await
	}

	fn private_key_path(&self, spec: &ShadowSpec) -> Option<PathBuf> {
		Some(keys::private_key_path(&self.settings.app_home, &spec.component, &spec.version))
	}

	#[instrument(skip(self))]
	async fn decrease_ref(&self, namespace: &str, name: &str) -> ClusterResult<bool> {
		if self.deployments(namespace).get_opt(name).await?.is_none() {
			warn!(shadow = %name, "shared shadow already gone");
			return Ok(true);
		}
		let written = self
			.update_ref_count(namespace, name, |count| (count > 1).then(|| count - 1))
			.await?;
		Ok(written.is_none())
	}

	async fn remove_deployment(&self, name: &str, namespace: &str) -> ClusterResult<()> {
		delete_if_exists(self.deployments(namespace), name, "deployment").await
	}

	async fn remove_config_map(&self, name: &str, namespace: &str) -> ClusterResult<()> {
		delete_if_exists(self.config_maps(namespace), name, "config map").await
	}

	async fn remove_service(&self, name: &str, namespace: &str) -> ClusterResult<()> {
		delete_if_exists(self.services(namespace), name, "service").await
	}

	#[instrument(skip(self))]
	async fn scale_to(&self, workload: &str, namespace: &str, replicas: i32) -> ClusterResult<()> {
		let patch = json!({ "spec": { "replicas": replicas } });
		self.deployments(namespace)
			.patch(workload, &PatchParams::default(), &Patch::Merge(&patch))
			.await?;
		info!(%workload, replicas, "scaled deployment");
		Ok(())
	}

	async fn get_workload(&self, workload: &str, namespace: &str) -> ClusterResult<Workload> {
		let deployment = self
			.deployments(namespace)
			.get_opt(workload)
			.await?
			.ok_or_else(|| ClusterError::NotFound {
				kind: "deployment",
				namespace: namespace.to_string(),
				name: workload.to_string(),
			})?;
		let spec = deployment.spec.unwrap_or_default();
		Ok(Workload {
			name: workload.to_string(),
			replicas: spec.replicas.unwrap_or(1),
			pod_labels: spec
				.template
				.metadata
				.and_then(|m| m.labels)
				.unwrap_or_default(),
		})
	}

	#[instrument(skip(self, labels))]
	async fn create_service(
		&self,
		name: &str,
		namespace: &str,
		port: u16,
		labels: &BTreeMap<String, String>,
	) -> ClusterResult<ServiceRef> {
		let service = manifest::cluster_ip_service(name, namespace, port, labels)?;
		let created = self
			.services(namespace)
			.create(&PostParams::default(), &service)
			.await?;
		let cluster_ip = created.spec.and_then(|s| s.cluster_ip);
		info!(service = %name, cluster_ip = ?cluster_ip, "created service");
		Ok(ServiceRef {
			name: name.to_string(),
			namespace: namespace.to_string(),
			cluster_ip,
			port,
		})
	}

	async fn cluster_cidrs(&self, namespace: &str, pod_cidr: Option<&str>) -> ClusterResult<Vec<String>> {
		let mut cidrs: Vec<String> = Vec::new();
		let mut push = |cidr: String| {
			if !cidrs.contains(&cidr) {
				cidrs.push(cidr);
			}
		};

		match pod_cidr {
			Some(cidr) => push(cidr.to_string()),
			None => {
				let nodes: Api<Node> = Api::all(self.client.clone());
				for node in nodes.list(&ListParams::default()).await?.items {
					if let Some(cidr) = node.spec.and_then(|s| s.pod_cidr) {
						push(cidr);
					}
				}
			}
		}

		for service in self.services(namespace).list(&ListParams::default()).await?.items {
			if let Some(cidr) = service
				.spec
				.and_then(|s| s.cluster_ip)
				.and_then(|ip| manifest::service_cidr(&ip))
			{
				push(cidr);
			}
		}

		if cidrs.is_empty() {
			return Err(ClusterError::NoCidrs {
				namespace: namespace.to_string(),
			});
		}
		debug!(?cidrs, "cluster CIDRs");
		Ok(cidrs)
	}

	async fn service_hosts(&self, namespace: &str) -> ClusterResult<BTreeMap<String, String>> {
		let mut hosts = BTreeMap::new();
		for service in self.services(namespace).list(&ListParams::default()).await?.items {
			let Some(name) = service.metadata.name else {
				continue;
			};
			match service.spec.and_then(|s| s.cluster_ip) {
				Some(ip) if !ip.is_empty() && ip != "None" => {
					hosts.insert(name, ip);
				}
				_ => {}
			}
		}
		Ok(hosts)
	}
}
