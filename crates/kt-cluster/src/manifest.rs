// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Object manifests for shadow resources.

use crate::types::ShadowSpec;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{ConfigMap, Service};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kt_common_core::labels;
use serde_json::json;
use std::collections::BTreeMap;
use std::net::Ipv4Addr;

/// Annotation holding the number of sessions attached to a shared shadow.
pub const REF_COUNT_ANNOTATION: &str = "kt-connect/ref-count";

/// Config map key for the public key mounted as `authorized_keys`.
pub const AUTHORIZED_KEY: &str = "authorized";
/// Config map key for the private key handed to attaching sessions.
pub const PRIVATE_KEY: &str = "privateKey";

const CONTAINER_NAME: &str = "standalone";
const KEY_VOLUME: &str = "ssh-public-key";

pub fn config_map_name(shadow: &str) -> String {
	format!("{shadow}-ssh")
}

pub fn shadow_deployment(spec: &ShadowSpec, config_map: &str) -> serde_json::Result<Deployment> {
	let envs: Vec<_> = spec
		.envs
		.iter()
		.map(|(name, value)| json!({ "name": name, "value": value }))
		.collect();
	let args: Vec<&str> = if spec.debug { vec!["--debug"] } else { vec![] };

	serde_json::from_value(json!({
		"apiVersion": "apps/v1",
		"kind": "Deployment",
		"metadata": {
			"name": spec.name,
			"namespace": spec.namespace,
			"labels": spec.labels,
			"annotations": { (REF_COUNT_ANNOTATION): "1" },
		},
		"spec": {
			"replicas": 1,
			"selector": { "matchLabels": { (labels::KT): spec.name } },
			"template": {
				"metadata": { "labels": spec.labels },
				"spec": {
					"containers": [{
						"name": CONTAINER_NAME,
						"image": spec.image,
						"imagePullPolicy": "Always",
						"args": args,
						"env": envs,
						"volumeMounts": [{
							"name": KEY_VOLUME,
							"mountPath": "/root/.ssh/authorized_keys",
							"subPath": AUTHORIZED_KEY,
						}],
					}],
					"volumes": [{
						"name": KEY_VOLUME,
						"configMap": {
							"name": config_map,
							"items": [{ "key": AUTHORIZED_KEY, "path": AUTHORIZED_KEY }],
						},
					}],
				},
			},
		},
	}))
}

pub fn credential_config_map(
	spec: &ShadowSpec,
	name: &str,
	public_key: &str,
	private_key: &str,
) -> serde_json::Result<ConfigMap> {
	serde_json::from_value(json!({
		"apiVersion": "v1",
		"kind": "ConfigMap",
		"metadata": {
			"name": name,
			"namespace": spec.namespace,
			"labels": spec.labels,
		},
		"data": {
			(AUTHORIZED_KEY): public_key,
			(PRIVATE_KEY): private_key,
		},
	}))
}

/// The private key a credential config map hands to attaching sessions.
pub fn stored_private_key(config_map: &ConfigMap) -> Option<&str> {
	config_map
		.data
		.as_ref()
		.and_then(|d| d.get(PRIVATE_KEY))
		.map(String::as_str)
		.filter(|key| !key.is_empty())
}

pub fn cluster_ip_service(
	name: &str,
	namespace: &str,
	port: u16,
	selector: &BTreeMap<String, String>,
) -> serde_json::Result<Service> {
	serde_json::from_value(json!({
		"apiVersion": "v1",
		"kind": "Service",
		"metadata": {
			"name": name,
			"namespace": namespace,
			"labels": { (labels::CONTROL_BY): labels::CONTROL_BY_VALUE },
		},
		"spec": {
			"type": "ClusterIP",
			"selector": selector,
			"ports": [{ "name": name, "port": port, "targetPort": port }],
		},
	}))
}

/// Current ref count; a missing or unreadable annotation counts as one.
pub fn ref_count(meta: &ObjectMeta) -> u32 {
	meta.annotations
		.as_ref()
		.and_then(|a| a.get(REF_COUNT_ANNOTATION))
		.and_then(|v| v.parse().ok())
		.unwrap_or(1)
}

pub fn set_ref_count(meta: &mut ObjectMeta, count: u32) {
	meta.annotations
		.get_or_insert_with(BTreeMap::new)
		.insert(REF_COUNT_ANNOTATION.to_string(), count.to_string());
}

/// The `/16` containing a service cluster IP. Headless and IPv6 services
/// have none.
pub fn service_cidr(cluster_ip: &str) -> Option<String> {
	let ip: Ipv4Addr = cluster_ip.parse().ok()?;
	let [a, b, _, _] = ip.octets();
	Some(format!("{a}.{b}.0.0/16"))
}

#[cfg(test)]
mod tests {
	use super::*;

	fn spec() -> ShadowSpec {
		ShadowSpec {
			name: "kt-connect-daemon-connect-shared".to_string(),
			namespace: "dev".to_string(),
			image: "shadow:stable".to_string(),
			labels: BTreeMap::from([
				(labels::KT.to_string(), "kt-connect-daemon-connect-shared".to_string()),
				(labels::COMPONENT.to_string(), "connect".to_string()),
			]),
			envs: BTreeMap::from([("KT_LOCAL_DOMAIN".to_string(), "dev.svc".to_string())]),
			component: "connect".to_string(),
			version: "shared".to_string(),
			shared: true,
			debug: true,
		}
	}

	#[test]
	fn deployment_mounts_authorized_key_and_starts_at_one_ref() {
		let deployment = shadow_deployment(&spec(), "kt-connect-daemon-connect-shared-ssh").unwrap();
		assert_eq!(ref_count(&deployment.metadata), 1);

		let pod = deployment.spec.unwrap().template.spec.unwrap();
		let container = &pod.containers[0];
		assert_eq!(container.image.as_deref(), Some("shadow:stable"));
		assert_eq!(container.args.as_deref(), Some(&["--debug".to_string()][..]));
		let env = container.env.as_ref().unwrap();
		assert_eq!(env[0].name, "KT_LOCAL_DOMAIN");
		let mount = &container.volume_mounts.as_ref().unwrap()[0];
		assert_eq!(mount.sub_path.as_deref(), Some(AUTHORIZED_KEY));
		assert_eq!(pod.volumes.unwrap().len(), 1);
	}

	#[test]
	fn config_map_carries_both_keys() {
		let cm = credential_config_map(&spec(), "x-ssh", "ssh-ed25519 AAAA kt", "PRIVATE").unwrap();
		let data = cm.data.unwrap();
		assert_eq!(data[AUTHORIZED_KEY], "ssh-ed25519 AAAA kt");
		assert_eq!(data[PRIVATE_KEY], "PRIVATE");
	}

	#[test]
	fn stored_private_key_reads_existing_config_map() {
		let cm = credential_config_map(&spec(), "x-ssh", "ssh-ed25519 AAAA kt", "PRIVATE").unwrap();
		assert_eq!(stored_private_key(&cm), Some("PRIVATE"));

		let blank = credential_config_map(&spec(), "x-ssh", "ssh-ed25519 AAAA kt", "").unwrap();
		assert_eq!(stored_private_key(&blank), None);
		assert_eq!(stored_private_key(&ConfigMap::default()), None);
	}

	#[test]
	fn service_targets_same_port() {
		let selector = BTreeMap::from([(labels::KT.to_string(), "orders".to_string())]);
		let svc = cluster_ip_service("orders", "dev", 8080, &selector).unwrap();
		let spec = svc.spec.unwrap();
		assert_eq!(spec.selector.unwrap()[labels::KT], "orders");
		assert_eq!(spec.ports.unwrap()[0].port, 8080);
	}

	#[test]
	fn ref_count_annotation_round_trip() {
		let mut meta = ObjectMeta::default();
		assert_eq!(ref_count(&meta), 1);
		set_ref_count(&mut meta, 4);
		assert_eq!(ref_count(&meta), 4);
	}

	#[test]
	fn service_cidr_is_slash_16() {
		assert_eq!(service_cidr("172.21.4.9").as_deref(), Some("172.21.0.0/16"));
		assert_eq!(service_cidr("None"), None);
		assert_eq!(service_cidr("fd00::1"), None);
	}
}
