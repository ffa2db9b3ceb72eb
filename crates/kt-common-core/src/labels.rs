// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Label keys stamped on every object kt creates in the cluster.

use std::collections::BTreeMap;

pub const CONTROL_BY: &str = "control-by";
pub const CONTROL_BY_VALUE: &str = "kt";
pub const COMPONENT: &str = "kt-component";
pub const VERSION: &str = "version";
/// Selector label shared by a shadow deployment and its pods.
pub const KT: &str = "kt";

pub const COMPONENT_CONNECT: &str = "connect";
pub const COMPONENT_RUN: &str = "run";
pub const COMPONENT_EXCHANGE: &str = "exchange";

/// Parse `a=b,c=d` into a label map. Entries without `=` are ignored.
pub fn parse_labels(raw: &str) -> BTreeMap<String, String> {
	raw
		.split(',')
		.filter_map(|pair| {
			let (k, v) = pair.split_once('=')?;
			let k = k.trim();
			if k.is_empty() {
				return None;
			}
			Some((k.to_string(), v.trim().to_string()))
		})
		.collect()
}
