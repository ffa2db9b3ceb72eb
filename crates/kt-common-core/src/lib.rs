// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Shared domain types for kt.
//!
//! This crate holds the small value types that every other kt crate passes
//! around:
//!
//! - [`Credential`]: the SSH login issued for a shadow endpoint
//! - [`PortMapping`]: a `(local, remote)` pair parsed from `remote[:local]`
//! - [`Direction`]: inbound or outbound session
//! - [`labels`]: label keys and values stamped onto cluster objects

pub mod credential;
pub mod labels;
pub mod port;

pub use credential::Credential;
pub use port::{parse_port_mappings, PortMapping, PortMappingError};

use serde::{Deserialize, Serialize};

/// Which way traffic flows through a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
	/// A local service is exposed to the cluster.
	Inbound,
	/// The local machine joins the cluster network.
	Outbound,
}

impl std::fmt::Display for Direction {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		match self {
			Direction::Inbound => f.write_str("inbound"),
			Direction::Outbound => f.write_str("outbound"),
		}
	}
}

/// sshd port inside the shadow container.
pub const SHADOW_SSH_PORT: u16 = 22;
