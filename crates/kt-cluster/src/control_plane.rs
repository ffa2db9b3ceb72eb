// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use crate::error::ClusterResult;
use crate::types::{ServiceRef, ShadowEndpoint, ShadowSpec, Workload};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Cluster operations used by sessions and cleanup.
///
/// Removal operations treat an absent object as success.
#[async_trait]
pub trait ClusterControlPlane: Send + Sync {
	/// Create the shadow described by `spec` and wait for its pod, or attach
	/// to an existing shared one and take a reference.
	async fn get_or_create_shadow(&self, spec: &ShadowSpec) -> ClusterResult<ShadowEndpoint>;

	/// Where `get_or_create_shadow` leaves the private key for `spec`, if it
	/// writes one locally.
	fn private_key_path(&self, _spec: &ShadowSpec) -> Option<PathBuf> {
		None
	}

	/// Drop one reference. Returns `true` when the caller held the last one
	/// and should remove the shadow.
	async fn decrease_ref(&self, namespace: &str, name: &str) -> ClusterResult<bool>;

	async fn remove_deployment(&self, name: &str, namespace: &str) -> ClusterResult<()>;

	async fn remove_config_map(&self, name: &str, namespace: &str) -> ClusterResult<()>;

	async fn remove_service(&self, name: &str, namespace: &str) -> ClusterResult<()>;

	async fn scale_to(&self, workload: &str, namespace: &str, replicas: i32) -> ClusterResult<()>;

	async fn get_workload(&self, workload: &str, namespace: &str) -> ClusterResult<Workload>;

	async fn create_service(
		&self,
		name: &str,
		namespace: &str,
		port: u16,
		labels: &BTreeMap<String, String>,
	) -> ClusterResult<ServiceRef>;

	/// Pod and service ranges to route through the VPN helper.
	async fn cluster_cidrs(&self, namespace: &str, pod_cidr: Option<&str>)
		-> ClusterResult<Vec<String>>;

	/// Service name to cluster IP, headless services excluded.
	async fn service_hosts(&self, namespace: &str) -> ClusterResult<BTreeMap<String, String>>;
}
