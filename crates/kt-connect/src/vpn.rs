// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Route injection through `sshuttle`.

use kt_common_process::BackgroundCommand;
use std::path::Path;

#[derive(Debug, Clone)]
pub struct Sshuttle {
	program: String,
	leading_args: Vec<String>,
}

impl Sshuttle {
	pub fn new(program: impl Into<String>) -> Self {
		Self {
			program: program.into(),
			leading_args: Vec::new(),
		}
	}

	/// A whitespace separated command line such as `python3 -m sshuttle`.
	/// An empty line falls back to `sshuttle`.
	pub fn from_command_line(line: &str) -> Self {
		let mut words = line.split_whitespace().map(str::to_string);
		match words.next() {
			Some(program) => Self {
				program,
				leading_args: words.collect(),
			},
			None => Self::default(),
		}
	}

	/// Route `cidrs` through the SSH session at `remote_host:session_port`.
	/// DNS goes to the shadow pod unless disabled.
	#[allow(clippy::too_many_arguments)]
	pub fn connect_command(
		&self,
		remote_host: &str,
		private_key_path: Option<&Path>,
		session_port: u16,
		pod_ip: &str,
		cidrs: &[String],
		disable_dns: bool,
		debug: bool,
	) -> BackgroundCommand {
		let mut ssh = String::from("ssh -oStrictHostKeyChecking=no -oUserKnownHostsFile=/dev/null");
		if let Some(key) = private_key_path {
			ssh.push_str(&format!(" -i {}", key.display()));
		}

		let mut cmd =
			BackgroundCommand::new("vpn(sshuttle)", &self.program).args(self.leading_args.iter().cloned());
		if !disable_dns {
			cmd = cmd.args(["--dns", "--to-ns", pod_ip]);
		}
		if debug {
			cmd = cmd.arg("-v");
		}
		cmd.arg("-e")
			.arg(ssh)
			.arg("-r")
			.arg(format!("root@{remote_host}:{session_port}"))
			.arg("-x")
			.arg(remote_host)
			.args(cidrs.iter().cloned())
			.debug(debug)
	}
}

impl Default for Sshuttle {
	fn default() -> Self {
		Self::new("sshuttle")
	}
}
