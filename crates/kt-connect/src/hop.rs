// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! First hop: `kubectl port-forward` to the shadow's sshd.

use crate::error::{ConnectError, Result};
use kt_common_core::SHADOW_SSH_PORT;
use kt_common_process::BackgroundCommand;
use std::net::Ipv4Addr;

/// Local session port for a shadow pod: `22` followed by the last two digits
/// of the final octet, zero padded. `10.23.23.120` maps to `2220`.
pub fn derive_session_port(pod_ip: &str) -> Result<u16> {
	let ip: Ipv4Addr = pod_ip
		.parse()
		.map_err(|_| ConnectError::InvalidPodIp(pod_ip.to_string()))?;
	let last = ip.octets()[3];
	Ok(2200 + u16::from(last % 100))
}

/// Validated `kubectl` global options such as `--kubeconfig=/path` or
/// `-n default`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KubeOptions {
	options: Vec<String>,
}

impl KubeOptions {
	/// `--flag=value` must be a single token and `-f value` exactly two.
	pub fn parse<I, S>(raw: I) -> Result<Self>
	where
		I: IntoIterator<Item = S>,
		S: Into<String>,
	{
		let mut options = Vec::new();
		for opt in raw {
			let opt = opt.into();
			let fields = opt.split_whitespace().count();
			if opt.contains('=') && fields != 1 {
				return Err(ConnectError::InvalidKubeOption(opt));
			}
			if opt.contains(' ') && fields != 2 {
				return Err(ConnectError::InvalidKubeOption(opt));
			}
			options.push(opt);
		}
		Ok(Self { options })
	}

	fn value_of(&self, names: &[&str]) -> Option<&str> {
		self.options.iter().rev().find_map(|opt| {
			let (flag, value) = split_option(opt)?;
			names.contains(&flag).then_some(value)
		})
	}

	pub fn namespace(&self) -> Option<&str> {
		self.value_of(&["-n", "--namespace"])
	}

	pub fn kubeconfig(&self) -> Option<&str> {
		self.value_of(&["--kubeconfig"])
	}

	pub fn context(&self) -> Option<&str> {
		self.value_of(&["--context"])
	}

	/// Add `--kubeconfig` when it was not given explicitly.
	pub fn with_default_kubeconfig(mut self, kubeconfig: &str) -> Self {
		if self.kubeconfig().is_none() {
			self.options.push(format!("--kubeconfig={kubeconfig}"));
		}
		self
	}

	/// Tokens to pass to kubectl, namespace options excluded.
	pub fn args(&self) -> Vec<String> {
		self.options
			.iter()
			.filter(|opt| {
				!matches!(split_option(opt), Some((flag, _)) if flag == "-n" || flag == "--namespace")
			})
			.flat_map(|opt| opt.split_whitespace().map(str::to_string).collect::<Vec<_>>())
			.collect()
	}
}

fn split_option(opt: &str) -> Option<(&str, &str)> {
	let mut fields = opt.split_whitespace();
	let first = fields.next()?;
	match fields.next() {
		Some(value) => Some((first, value)),
		None => first.split_once('='),
	}
}

/// Builds the port-forward command for a shadow pod.
#[derive(Debug, Clone)]
pub struct PortForward {
	kubectl: String,
	options: KubeOptions,
	debug: bool,
}

impl PortForward {
	pub fn new(kubectl: impl Into<String>, options: KubeOptions, debug: bool) -> Self {
		Self {
			kubectl: kubectl.into(),
			options,
			debug,
		}
	}

	/// `kubectl [options] --namespace <ns> port-forward <pod> <local>:22`
	pub fn command(&self, namespace: &str, pod: &str, local_port: u16) -> BackgroundCommand {
		BackgroundCommand::new("port-forward", &self.kubectl)
			.args(self.options.args())
			.args(["--namespace", namespace, "port-forward", pod])
			.arg(format!("{local_port}:{SHADOW_SSH_PORT}"))
			.debug(self.debug)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use proptest::prelude::*;

	#[test]
	fn derives_documented_ports() {
		assert_eq!(derive_session_port("10.23.23.120").unwrap(), 2220);
		assert_eq!(derive_session_port("10.0.0.5").unwrap(), 2205);
		assert_eq!(derive_session_port("10.1.1.7").unwrap(), 2207);
		assert_eq!(derive_session_port("10.1.1.42").unwrap(), 2242);
		assert_eq!(derive_session_port("10.1.1.200").unwrap(), 2200);
	}

	#[test]
	fn rejects_non_ipv4() {
		assert!(derive_session_port("").is_err());
		assert!(derive_session_port("10.0.0").is_err());
		assert!(derive_session_port("fd00::1").is_err());
	}

	proptest! {
		#[test]
		fn session_port_is_always_in_range(octets in any::<[u8; 4]>()) {
			let ip = Ipv4Addr::from(octets).to_string();
			let port = derive_session_port(&ip).unwrap();
			prop_assert!((2200..=2299).contains(&port));
			prop_assert_eq!(port, derive_session_port(&ip).unwrap());
		}
	}

	#[test]
	fn kube_option_validation() {
		assert!(KubeOptions::parse(["--kubeconfig=/tmp/config", "-n default"]).is_ok());
		assert!(KubeOptions::parse(["--kubeconfig=/tmp/a b"]).is_err());
		assert!(KubeOptions::parse(["-n a b"]).is_err());
	}

	#[test]
	fn kube_options_expose_namespace_and_config() {
		let opts = KubeOptions::parse(["-n staging", "--context=prod"]).unwrap();
		assert_eq!(opts.namespace(), Some("staging"));
		assert_eq!(opts.context(), Some("prod"));
		assert_eq!(opts.kubeconfig(), None);

		let opts = opts.with_default_kubeconfig("/home/dev/.kube/config");
		assert_eq!(opts.kubeconfig(), Some("/home/dev/.kube/config"));
		assert_eq!(
			opts.args(),
			vec!["--context=prod", "--kubeconfig=/home/dev/.kube/config"]
		);
	}

	#[test]
	fn port_forward_command_line() {
		let opts = KubeOptions::parse(["--kubeconfig=/k"]).unwrap();
		let cmd = PortForward::new("kubectl", opts, false).command("dev", "shadow-0", 2205);
		assert_eq!(
			cmd.to_string(),
			"kubectl --kubeconfig=/k --namespace dev port-forward shadow-0 2205:22"
		);
		assert_eq!(cmd.name, "port-forward");
	}
}
