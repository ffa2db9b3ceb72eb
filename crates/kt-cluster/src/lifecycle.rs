// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Shadow acquisition and release.
//!
//! Shared connect shadows are reference counted through the control plane:
//! every acquisition takes a reference and every release drops one. Only
//! the release that drops the last reference removes the cluster objects.

use crate::control_plane::ClusterControlPlane;
use crate::error::ClusterResult;
use crate::keys;
use crate::manifest;
use crate::types::{ShadowEndpoint, ShadowSpec};
use kt_common_core::labels;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, instrument, warn};

/// Name of the shadow every `connect --shareShadow` session attaches to.
pub const SHARED_SHADOW_NAME: &str = "kt-connect-daemon-connect-shared";
/// Environment variable carrying the local DNS search domain into the shadow.
pub const ENV_LOCAL_DOMAIN: &str = "KT_LOCAL_DOMAIN";

const CONNECT_PREFIX: &str = "kt-connect-daemon";
const SUFFIX_LEN: usize = 5;
const SUFFIX_CHARS: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";

/// What the shadow is for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShadowRole {
	Connect { shared: bool },
	Run { service: String },
	Exchange {
		origin: String,
		origin_labels: BTreeMap<String, String>,
	},
}

#[derive(Debug, Clone)]
pub struct ShadowRequest {
	pub namespace: String,
	pub image: String,
	pub role: ShadowRole,
	pub user_labels: BTreeMap<String, String>,
	pub local_domain: Option<String>,
	pub debug: bool,
}

/// What release needs to know about an acquired shadow.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShadowRecord {
	pub name: String,
	pub namespace: String,
	pub config_map: String,
	pub shared: bool,
	pub private_key: Option<PathBuf>,
	/// `false` while the cluster call is still in flight. A shared shadow
	/// is only dereferenced once this session holds a reference.
	pub acquired: bool,
}

impl From<&ShadowEndpoint> for ShadowRecord {
	fn from(endpoint: &ShadowEndpoint) -> Self {
		Self {
			name: endpoint.name.clone(),
			namespace: endpoint.namespace.clone(),
			config_map: endpoint.config_map.clone(),
			shared: endpoint.shared,
			private_key: endpoint.credential.private_key_path().map(PathBuf::from),
			acquired: true,
		}
	}
}

#[derive(Clone)]
pub struct ShadowLifecycle {
	cluster: Arc<dyn ClusterControlPlane>,
}

impl ShadowLifecycle {
	pub fn new(cluster: Arc<dyn ClusterControlPlane>) -> Self {
		Self { cluster }
	}

	/// Build the workload spec for a request.
	pub fn spec(request: &ShadowRequest) -> ShadowSpec {
		Self::spec_with(request, &mut fastrand::Rng::new())
	}

	fn spec_with(request: &ShadowRequest, rng: &mut fastrand::Rng) -> ShadowSpec {
		let suffix = random_suffix(rng);
		let (name, component, version, shared, mut labels) = match &request.role {
			ShadowRole::Connect { shared: true } => (
				SHARED_SHADOW_NAME.to_string(),
				labels::COMPONENT_CONNECT,
				last_segment(SHARED_SHADOW_NAME).to_string(),
				true,
				BTreeMap::new(),
			),
			ShadowRole::Connect { shared: false } => {
				let name = format!("{CONNECT_PREFIX}-{suffix}");
				(name, labels::COMPONENT_CONNECT, suffix, false, BTreeMap::new())
			}
			ShadowRole::Run { service } => (
				service.clone(),
				labels::COMPONENT_RUN,
				suffix,
				false,
				BTreeMap::new(),
			),
			ShadowRole::Exchange { origin, origin_labels } => (
				format!("{origin}-kt-{suffix}"),
				labels::COMPONENT_EXCHANGE,
				suffix,
				false,
				origin_labels.clone(),
			),
		};

		labels.insert(labels::CONTROL_BY.to_string(), labels::CONTROL_BY_VALUE.to_string());
		labels.insert(labels::COMPONENT.to_string(), component.to_string());
		labels.insert(labels::KT.to_string(), name.clone());
		labels.insert(labels::VERSION.to_string(), version.clone());
		labels.extend(request.user_labels.clone());

		let mut envs = BTreeMap::new();
		if let Some(domain) = request.local_domain.as_deref().filter(|d| !d.is_empty()) {
			envs.insert(ENV_LOCAL_DOMAIN.to_string(), domain.to_string());
		}

		ShadowSpec {
			name,
			namespace: request.namespace.clone(),
			image: request.image.clone(),
			labels,
			envs,
			component: component.to_string(),
			version,
			shared,
			debug: request.debug,
		}
	}

	/// Create or attach to the shadow for `request`. One control-plane call.
	pub async fn acquire(&self, request: &ShadowRequest) -> ClusterResult<ShadowEndpoint> {
		self.acquire_recorded(request, |_| {}).await
	}

	/// Like [`acquire`](Self::acquire), handing `record` what release needs
	/// before the cluster call starts and again once the shadow is ready.
	#[instrument(skip(self, request, record), fields(namespace = %request.namespace))]
	pub async fn acquire_recorded<F>(
		&self,
		request: &ShadowRequest,
		mut record: F,
	) -> ClusterResult<ShadowEndpoint>
	where
		F: FnMut(ShadowRecord) + Send,
	{
		let spec = Self::spec(request);
		info!(shadow = %spec.name, shared = spec.shared, "acquiring shadow");
		record(self.pending_record(&spec));

		let endpoint = self.cluster.get_or_create_shadow(&spec).await?;
		info!(
			shadow = %endpoint.name,
			pod = %endpoint.pod_name,
			ip = %endpoint.pod_ip,
			ref_count = endpoint.ref_count,
			"shadow acquired"
		);
		record(ShadowRecord::from(&endpoint));
		Ok(endpoint)
	}

	fn pending_record(&self, spec: &ShadowSpec) -> ShadowRecord {
		ShadowRecord {
			name: spec.name.clone(),
			namespace: spec.namespace.clone(),
			config_map: manifest::config_map_name(&spec.name),
			shared: spec.shared,
			private_key: self.cluster.private_key_path(spec),
			acquired: false,
		}
	}

	/// Drop this session's hold on the shadow. Returns `true` when the
	/// cluster objects were removed.
	#[instrument(skip(self, record), fields(shadow = %record.name, shared = record.shared))]
	pub async fn release(&self, record: &ShadowRecord) -> ClusterResult<bool> {
		if record.shared && !record.acquired {
			warn!(shadow = %record.name, "shared shadow acquisition was interrupted, leaving it to its holders");
			return Ok(false);
		}

		let remove = if record.shared {
			self.cluster.decrease_ref(&record.namespace, &record.name).await?
		} else {
			true
		};

		if remove {
			info!(shadow = %record.name, "removing shadow");
			self.cluster
				.remove_deployment(&record.name, &record.namespace)
				.await?;
			self.cluster
				.remove_config_map(&record.config_map, &record.namespace)
				.await?;
			// Sessions attached to one shared shadow share its key file.
			if let Some(path) = &record.private_key {
				keys::remove_if_exists(path).await?;
			}
		} else {
			info!(shadow = %record.name, "shared shadow still in use, keeping it");
		}
		Ok(remove)
	}
}

fn random_suffix(rng: &mut fastrand::Rng) -> String {
	(0..SUFFIX_LEN)
		.map(|_| SUFFIX_CHARS[rng.usize(..SUFFIX_CHARS.len())] as char)
		.collect()
}

fn last_segment(name: &str) -> &str {
	name.rsplit('-').next().unwrap_or(name)
}
