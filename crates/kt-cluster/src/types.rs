// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use kt_common_core::Credential;
use std::collections::BTreeMap;

/// Everything needed to create (or attach to) a shadow workload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShadowSpec {
	pub name: String,
	pub namespace: String,
	pub image: String,
	pub labels: BTreeMap<String, String>,
	pub envs: BTreeMap<String, String>,
	/// `kt-component` value, used in the private key file name.
	pub component: String,
	pub version: String,
	pub shared: bool,
	pub debug: bool,
}

/// A ready shadow pod and the login issued for it.
#[derive(Debug, Clone)]
pub struct ShadowEndpoint {
	pub name: String,
	pub namespace: String,
	pub pod_name: String,
	pub pod_ip: String,
	pub config_map: String,
	pub credential: Credential,
	/// Sessions attached after this acquisition, including this one.
	pub ref_count: u32,
	pub shared: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceRef {
	pub name: String,
	pub namespace: String,
	pub cluster_ip: Option<String>,
	pub port: u16,
}

/// The parts of an origin workload that `exchange` needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Workload {
	pub name: String,
	pub replicas: i32,
	pub pod_labels: BTreeMap<String, String>,
}
