// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! One partial layer of configuration.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Every field is optional; later layers override earlier ones field by
/// field.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct ConfigLayer {
	pub namespace: Option<String>,
	pub kubeconfig: Option<PathBuf>,
	pub image: Option<String>,
	pub debug: Option<bool>,
	/// Seconds a launched helper must survive before it counts as started.
	pub wait_time_secs: Option<u64>,
	pub kubectl: Option<String>,
	pub sshuttle: Option<String>,
	pub ssh_port: Option<u16>,
	pub socks_port: Option<u16>,
	pub app_home: Option<PathBuf>,
	pub ready_timeout_secs: Option<u64>,
}

macro_rules! take_some {
	($self:ident, $other:ident, $($field:ident),+ $(,)?) => {
		$(
			if $other.$field.is_some() {
				$self.$field = $other.$field;
			}
		)+
	};
}

impl ConfigLayer {
	pub fn merge(&mut self, other: Self) {
		take_some!(
			self,
			other,
			namespace,
			kubeconfig,
			image,
			debug,
			wait_time_secs,
			kubectl,
			sshuttle,
			ssh_port,
			socks_port,
			app_home,
			ready_timeout_secs,
		);
	}
}
