// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Port pair parsing for inbound sessions.
//!
//! The textual form is remote-first: `"8080:9090"` exposes the shadow's port
//! 8080 and relays it to local port 9090. A single port maps to itself.

use std::fmt;
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PortMappingError {
	#[error("empty port mapping")]
	Empty,

	#[error("invalid port '{0}'")]
	InvalidPort(String),
}

/// A `(local, remote)` port pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PortMapping {
	pub local: u16,
	pub remote: u16,
}

impl PortMapping {
	pub fn new(local: u16, remote: u16) -> Self {
		Self { local, remote }
	}

	pub fn same(port: u16) -> Self {
		Self::new(port, port)
	}
}

fn parse_port(raw: &str) -> Result<u16, PortMappingError> {
	let raw = raw.trim();
	match raw.parse::<u16>() {
		Ok(0) | Err(_) => Err(PortMappingError::InvalidPort(raw.to_string())),
		Ok(port) => Ok(port),
	}
}

impl FromStr for PortMapping {
	type Err = PortMappingError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		let s = s.trim();
		if s.is_empty() {
			return Err(PortMappingError::Empty);
		}
		match s.split_once(':') {
			Some((remote, local)) => Ok(Self::new(parse_port(local)?, parse_port(remote)?)),
			None => Ok(Self::same(parse_port(s)?)),
		}
	}
}

impl fmt::Display for PortMapping {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		if self.local == self.remote {
			write!(f, "{}", self.remote)
		} else {
			write!(f, "{}:{}", self.remote, self.local)
		}
	}
}

/// Parse a comma separated list of port pairs, e.g. `"80,443:8443"`.
pub fn parse_port_mappings(raw: &str) -> Result<Vec<PortMapping>, PortMappingError> {
	let mappings = raw
		.split(',')
		.map(str::trim)
		.filter(|s| !s.is_empty())
		.map(PortMapping::from_str)
		.collect::<Result<Vec<_>, _>>()?;
	if mappings.is_empty() {
		return Err(PortMappingError::Empty);
	}
	Ok(mappings)
}

#[cfg(test)]
mod tests {
	use super::*;
	use proptest::prelude::*;

	#[test]
	fn single_port_maps_to_itself() {
		let mapping: PortMapping = "8080".parse().unwrap();
		assert_eq!(mapping, PortMapping::new(8080, 8080));
	}

	#[test]
	fn pair_is_remote_first() {
		let mapping: PortMapping = "8080:9090".parse().unwrap();
		assert_eq!(mapping.remote, 8080);
		assert_eq!(mapping.local, 9090);
	}

	#[test]
	fn list_is_comma_separated() {
		let mappings = parse_port_mappings("80,443:8443").unwrap();
		assert_eq!(
			mappings,
			vec![PortMapping::same(80), PortMapping::new(8443, 443)]
		);
	}

	#[test]
	fn rejects_bad_input() {
		assert_eq!(parse_port_mappings(""), Err(PortMappingError::Empty));
		assert_eq!(
			"abc".parse::<PortMapping>(),
			Err(PortMappingError::InvalidPort("abc".to_string()))
		);
		assert!("0".parse::<PortMapping>().is_err());
		assert!("80:70000".parse::<PortMapping>().is_err());
	}

	proptest! {
		#[test]
		fn bare_port_is_symmetric(port in 1u16..) {
			let mapping: PortMapping = port.to_string().parse().unwrap();
			prop_assert_eq!(mapping.local, mapping.remote);
			prop_assert_eq!(mapping.local, port);
		}
	}
}
