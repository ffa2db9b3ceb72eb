// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use std::fmt;
use std::process::Stdio;
use tokio::process::Command;

/// Description of an external command run as a background leg.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackgroundCommand {
	pub name: String,
	pub program: String,
	pub args: Vec<String>,
	pub envs: Vec<(String, String)>,
	/// Inherit stdout/stderr instead of discarding them.
	pub debug: bool,
}

impl BackgroundCommand {
	pub fn new(name: impl Into<String>, program: impl Into<String>) -> Self {
		Self {
			name: name.into(),
			program: program.into(),
			args: Vec::new(),
			envs: Vec::new(),
			debug: false,
		}
	}

	pub fn arg(mut self, arg: impl Into<String>) -> Self {
		self.args.push(arg.into());
		self
	}

	pub fn args<I, S>(mut self, args: I) -> Self
	where
		I: IntoIterator<Item = S>,
		S: Into<String>,
	{
		self.args.extend(args.into_iter().map(Into::into));
		self
	}

	pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
		self.envs.push((key.into(), value.into()));
		self
	}

	pub fn debug(mut self, debug: bool) -> Self {
		self.debug = debug;
		self
	}

	/// Build the tokio command. The child is killed when its handle drops.
	pub fn to_command(&self) -> Command {
		let mut cmd = Command::new(&self.program);
		cmd.args(&self.args);
		for (k, v) in &self.envs {
			cmd.env(k, v);
		}
		cmd.stdin(Stdio::null());
		if self.debug {
			cmd.stdout(Stdio::inherit());
			cmd.stderr(Stdio::inherit());
		} else {
			cmd.stdout(Stdio::null());
			cmd.stderr(Stdio::null());
		}
		cmd.kill_on_drop(true);
		cmd
	}
}

impl fmt::Display for BackgroundCommand {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}", self.program)?;
		for arg in &self.args {
			write!(f, " {arg}")?;
		}
		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn display_joins_program_and_args() {
		let cmd = BackgroundCommand::new("port-forward", "kubectl")
			.arg("port-forward")
			.args(["shadow-abc", "2222:22"]);
		assert_eq!(cmd.to_string(), "kubectl port-forward shadow-abc 2222:22");
		assert_eq!(cmd.name, "port-forward");
	}
}
