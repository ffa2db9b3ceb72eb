// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! In-memory [`ClusterControlPlane`] for tests.

use crate::control_plane::ClusterControlPlane;
use crate::error::{ClusterError, ClusterResult};
use crate::manifest;
use crate::types::{ServiceRef, ShadowEndpoint, ShadowSpec, Workload};
use async_trait::async_trait;
use kt_common_core::Credential;
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

type Key = (String, String);

fn key(namespace: &str, name: &str) -> Key {
	(namespace.to_string(), name.to_string())
}

#[derive(Debug, Clone)]
struct DeploymentRecord {
	replicas: i32,
	ref_count: u32,
	pod_labels: BTreeMap<String, String>,
	pod_ip: String,
}

#[derive(Debug, Default)]
struct State {
	deployments: BTreeMap<Key, DeploymentRecord>,
	config_maps: BTreeSet<Key>,
	services: BTreeMap<Key, ServiceRef>,
	service_hosts: BTreeMap<String, BTreeMap<String, String>>,
	node_cidrs: Vec<String>,
	failing: HashSet<String>,
	calls: Vec<String>,
	next_ip: u8,
	ready_delay: Option<Duration>,
}

/// Cluster double. Shadows become ready immediately with pod IPs handed out
/// from `10.0.0.0/24`. Every call is recorded, and any operation can be made
/// to fail by name.
#[derive(Debug, Clone, Default)]
pub struct InMemoryCluster {
	state: Arc<Mutex<State>>,
}

impl InMemoryCluster {
	pub fn new() -> Self {
		Self::default()
	}

	fn lock(&self) -> MutexGuard<'_, State> {
		self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
	}

	/// Record a call and fail it if it was marked failing.
	fn enter(&self, op: &str) -> ClusterResult<MutexGuard<'_, State>> {
		let mut state = self.lock();
		state.calls.push(op.to_string());
		if state.failing.contains(op) {
			return Err(ClusterError::Injected { op: op.to_string() });
		}
		Ok(state)
	}

	/// Make every later call of `op` (a trait method name) fail.
	pub fn fail_on(&self, op: &str) {
		self.lock().failing.insert(op.to_string());
	}

	pub fn add_workload(&self, namespace: &str, name: &str, replicas: i32, pod_labels: BTreeMap<String, String>) {
		self.lock().deployments.insert(
			key(namespace, name),
			DeploymentRecord {
				replicas,
				ref_count: 0,
				pod_labels,
				pod_ip: String::new(),
			},
		);
	}

	pub fn add_service_host(&self, namespace: &str, name: &str, ip: &str) {
		self.lock()
			.service_hosts
			.entry(namespace.to_string())
			.or_default()
			.insert(name.to_string(), ip.to_string());
	}

	/// Hold `get_or_create_shadow` for `delay` after the objects exist, as
	/// if waiting for the pod.
	pub fn set_ready_delay(&self, delay: Duration) {
		self.lock().ready_delay = Some(delay);
	}

	pub fn set_node_cidrs(&self, cidrs: Vec<String>) {
		self.lock().node_cidrs = cidrs;
	}

	/// Operation names in call order.
	pub fn calls(&self) -> Vec<String> {
		self.lock().calls.clone()
	}

	pub fn has_deployment(&self, namespace: &str, name: &str) -> bool {
		self.lock().deployments.contains_key(&key(namespace, name))
	}

	pub fn has_config_map(&self, namespace: &str, name: &str) -> bool {
		self.lock().config_maps.contains(&key(namespace, name))
	}

	pub fn has_service(&self, namespace: &str, name: &str) -> bool {
		self.lock().services.contains_key(&key(namespace, name))
	}

	pub fn ref_count(&self, namespace: &str, name: &str) -> Option<u32> {
		self.lock()
			.deployments
			.get(&key(namespace, name))
			.map(|d| d.ref_count)
	}

	pub fn replicas(&self, namespace: &str, name: &str) -> Option<i32> {
		self.lock()
			.deployments
			.get(&key(namespace, name))
			.map(|d| d.replicas)
	}

	fn create_or_attach(&self, spec: &ShadowSpec) -> ClusterResult<(ShadowEndpoint, Option<Duration>)> {
		let mut state = self.enter("get_or_create_shadow")?;
		let config_map = manifest::config_map_name(&spec.name);
		let id = key(&spec.namespace, &spec.name);

		let attached = if spec.shared {
			state.deployments.get_mut(&id).map(|existing| {
				existing.ref_count += 1;
				(existing.pod_ip.clone(), existing.ref_count)
			})
		} else {
			None
		};

		let (pod_ip, ref_count) = match attached {
			Some(attached) => attached,
			None => {
				state.next_ip = state.next_ip.wrapping_add(1);
				let pod_ip = format!("10.0.0.{}", state.next_ip);
				state.deployments.insert(
					id,
					DeploymentRecord {
						replicas: 1,
						ref_count: 1,
						pod_labels: spec.labels.clone(),
						pod_ip: pod_ip.clone(),
					},
				);
				state.config_maps.insert(key(&spec.namespace, &config_map));
				(pod_ip, 1)
			}
		};

		let endpoint = ShadowEndpoint {
			name: spec.name.clone(),
			namespace: spec.namespace.clone(),
			pod_name: format!("{}-0", spec.name),
			pod_ip,
			config_map,
			credential: Credential::default(),
			ref_count,
			shared: spec.shared,
		};
		Ok((endpoint, state.ready_delay))
	}
}

#[async_trait]
impl ClusterControlPlane for InMemoryCluster {
	async fn get_or_create_shadow(&self, spec: &ShadowSpec) -> ClusterResult<ShadowEndpoint> {
		let (endpoint, ready_delay) = self.create_or_attach(spec)?;
		if let Some(delay) = ready_delay {
			tokio::time::sleep(delay).await;
		}
		Ok(endpoint)
	}

	async fn decrease_ref(&self, namespace: &str, name: &str) -> ClusterResult<bool> {
		let mut state = self.enter("decrease_ref")?;
		match state.deployments.get_mut(&key(namespace, name)) {
			Some(existing) if existing.ref_count > 1 => {
				existing.ref_count -= 1;
				Ok(false)
			}
			_ => Ok(true),
		}
	}

	async fn remove_deployment(&self, name: &str, namespace: &str) -> ClusterResult<()> {
		self.enter("remove_deployment")?
			.deployments
			.remove(&key(namespace, name));
		Ok(())
	}

	async fn remove_config_map(&self, name: &str, namespace: &str) -> ClusterResult<()> {
		self.enter("remove_config_map")?
			.config_maps
			.remove(&key(namespace, name));
		Ok(())
	}

	async fn remove_service(&self, name: &str, namespace: &str) -> ClusterResult<()> {
		self.enter("remove_service")?
			.services
			.remove(&key(namespace, name));
		Ok(())
	}

	async fn scale_to(&self, workload: &str, namespace: &str, replicas: i32) -> ClusterResult<()> {
		let mut state = self.enter("scale_to")?;
		let record = state
			.deployments
			.get_mut(&key(namespace, workload))
			.ok_or_else(|| ClusterError::NotFound {
				kind: "deployment",
				namespace: namespace.to_string(),
				name: workload.to_string(),
			})?;
		record.replicas = replicas;
		Ok(())
	}

	async fn get_workload(&self, workload: &str, namespace: &str) -> ClusterResult<Workload> {
		let state = self.enter("get_workload")?;
		let record = state
			.deployments
			.get(&key(namespace, workload))
			.ok_or_else(|| ClusterError::NotFound {
				kind: "deployment",
				namespace: namespace.to_string(),
				name: workload.to_string(),
			})?;
		Ok(Workload {
			name: workload.to_string(),
			replicas: record.replicas,
			pod_labels: record.pod_labels.clone(),
		})
	}

	async fn create_service(
		&self,
		name: &str,
		namespace: &str,
		port: u16,
		_labels: &BTreeMap<String, String>,
	) -> ClusterResult<ServiceRef> {
		let mut state = self.enter("create_service")?;
		let service = ServiceRef {
			name: name.to_string(),
			namespace: namespace.to_string(),
			cluster_ip: Some(format!("172.21.0.{}", state.services.len() + 1)),
			port,
		};
		state.services.insert(key(namespace, name), service.clone());
		Ok(service)
	}

	async fn cluster_cidrs(&self, namespace: &str, pod_cidr: Option<&str>) -> ClusterResult<Vec<String>> {
		let state = self.enter("cluster_cidrs")?;
		let mut cidrs = match pod_cidr {
			Some(cidr) => vec![cidr.to_string()],
			None => state.node_cidrs.clone(),
		};
		for ip in state.service_hosts.get(namespace).into_iter().flat_map(|h| h.values()) {
			if let Some(cidr) = manifest::service_cidr(ip) {
				if !cidrs.contains(&cidr) {
					cidrs.push(cidr);
				}
			}
		}
		if cidrs.is_empty() {
			return Err(ClusterError::NoCidrs {
				namespace: namespace.to_string(),
			});
		}
		Ok(cidrs)
	}

	async fn service_hosts(&self, namespace: &str) -> ClusterResult<BTreeMap<String, String>> {
		let state = self.enter("service_hosts")?;
		Ok(state.service_hosts.get(namespace).cloned().unwrap_or_default())
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[tokio::test]
	async fn cidrs_combine_nodes_and_service_ranges() {
		let cluster = InMemoryCluster::new();
		cluster.set_node_cidrs(vec!["10.244.0.0/24".to_string()]);
		cluster.add_service_host("dev", "orders", "172.21.3.4");
		cluster.add_service_host("dev", "billing", "172.21.9.1");

		let cidrs = cluster.cluster_cidrs("dev", None).await.unwrap();
		assert_eq!(cidrs, vec!["10.244.0.0/24", "172.21.0.0/16"]);

		let cidrs = cluster.cluster_cidrs("dev", Some("10.1.0.0/16")).await.unwrap();
		assert_eq!(cidrs[0], "10.1.0.0/16");
	}

	#[tokio::test]
	async fn no_cidrs_is_an_error() {
		let err = InMemoryCluster::new().cluster_cidrs("dev", None).await.unwrap_err();
		assert!(matches!(err, ClusterError::NoCidrs { .. }));
	}

	#[tokio::test]
	async fn injected_failures_are_recorded() {
		let cluster = InMemoryCluster::new();
		cluster.fail_on("remove_service");
		assert!(cluster.remove_service("orders", "dev").await.is_err());
		assert!(cluster.remove_config_map("orders-ssh", "dev").await.is_ok());
		assert_eq!(cluster.calls(), vec!["remove_service", "remove_config_map"]);
	}

	#[tokio::test]
	async fn scale_round_trips_through_workload() {
		let cluster = InMemoryCluster::new();
		cluster.add_workload("dev", "orders", 3, BTreeMap::new());
		cluster.scale_to("orders", "dev", 0).await.unwrap();
		assert_eq!(cluster.get_workload("orders", "dev").await.unwrap().replicas, 0);
		assert!(cluster.scale_to("missing", "dev", 1).await.is_err());
	}
}
