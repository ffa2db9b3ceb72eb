// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Outbound session: the local machine joins the cluster network.

use crate::error::{ConnectError, Result};
use crate::hints;
use crate::session::{stop_legs, SessionContext, SessionState, SessionTracker};
use crate::vpn::Sshuttle;
use kt_cluster::ShadowEndpoint;
use kt_common_core::Direction;
use kt_common_process::LegHandle;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::{Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::str::FromStr;
use tracing::{info, instrument};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutboundMethod {
	/// Route cluster CIDRs through `sshuttle`.
	#[default]
	Vpn,
	/// Local SOCKS5 proxy dialing through the SSH session.
	Socks5,
}

impl fmt::Display for OutboundMethod {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			OutboundMethod::Vpn => f.write_str("vpn"),
			OutboundMethod::Socks5 => f.write_str("socks5"),
		}
	}
}

impl FromStr for OutboundMethod {
	type Err = String;

	fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
		match s {
			"vpn" => Ok(OutboundMethod::Vpn),
			"socks5" => Ok(OutboundMethod::Socks5),
			other => Err(format!("unknown connect method {other:?}, expected vpn or socks5")),
		}
	}
}

#[derive(Debug, Clone)]
pub struct OutboundSettings {
	pub method: OutboundMethod,
	/// Local end of the port-forward to the shadow's sshd.
	pub ssh_port: u16,
	pub socks_port: u16,
	pub disable_dns: bool,
	pub debug: bool,
	/// Where `.jvmrc` and `.envrc` are written.
	pub hint_dir: PathBuf,
	pub sshuttle: Sshuttle,
}

pub struct OutboundSession {
	ctx: SessionContext,
	settings: OutboundSettings,
	tracker: SessionTracker,
	legs: Vec<LegHandle>,
}

impl OutboundSession {
	pub fn new(ctx: SessionContext, settings: OutboundSettings) -> Self {
		Self {
			ctx,
			settings,
			tracker: SessionTracker::new(Direction::Outbound),
			legs: Vec::new(),
		}
	}

	pub fn state(&self) -> SessionState {
		self.tracker.state()
	}

	/// Bring up every layer. On failure the session scope is cancelled and
	/// the session is left `Closing`.
	#[instrument(skip_all, fields(shadow = %endpoint.name, method = %self.settings.method))]
	pub async fn establish(&mut self, endpoint: &ShadowEndpoint, cidrs: &[String]) -> Result<()> {
		let result = self.layer_up(endpoint, cidrs).await;
		if result.is_err() {
			self.ctx.supervisor.scope().cancel();
			self.tracker.begin_closing();
		}
		result
	}

	async fn layer_up(&mut self, endpoint: &ShadowEndpoint, cidrs: &[String]) -> Result<()> {
		self.tracker.advance(SessionState::HopEstablishing)?;
		let hop = self
			.ctx
			.port_forward
			.command(&endpoint.namespace, &endpoint.pod_name, self.settings.ssh_port);
		let leg = self
			.ctx
			.supervisor
			.launch_with_grace(hop, self.ctx.wait_time)
			.await
			.map_err(|e| ConnectError::establishment("port-forward", e))?;
		self.legs.push(leg);

		self.tracker.advance(SessionState::SessionEstablishing)?;
		match self.settings.method {
			OutboundMethod::Vpn => self.start_vpn(endpoint, cidrs).await?,
			OutboundMethod::Socks5 => self.start_socks5(endpoint).await?,
		}

		self.tracker.advance(SessionState::FinalLayerActive)?;
		info!("KT proxy start successful");
		Ok(())
	}

	async fn start_vpn(&mut self, endpoint: &ShadowEndpoint, cidrs: &[String]) -> Result<()> {
		let credential = &endpoint.credential;
		let command = self.settings.sshuttle.connect_command(
			credential.remote_host(),
			credential.private_key_path(),
			self.settings.ssh_port,
			&endpoint.pod_ip,
			cidrs,
			self.settings.disable_dns,
			self.settings.debug,
		);
		let leg_name = command.name.clone();
		let leg = self
			.ctx
			.supervisor
			.launch_with_grace(command, self.ctx.wait_time)
			.await
			.map_err(|e| ConnectError::establishment(leg_name, e))?;
		self.legs.push(leg);
		Ok(())
	}

	async fn start_socks5(&mut self, endpoint: &ShadowEndpoint) -> Result<()> {
		let session_addr = SocketAddr::from((Ipv4Addr::LOCALHOST, self.settings.ssh_port));
		let listen_addr = SocketAddr::from((Ipv4Addr::LOCALHOST, self.settings.socks_port));
		let serving = self
			.ctx
			.transport
			.start_socks5_proxy(
				&endpoint.credential,
				session_addr,
				listen_addr,
				self.ctx.supervisor.scope().clone(),
			)
			.await
			.map_err(|e| ConnectError::establishment("socks5", e))?;
		self.legs.push(self.ctx.supervisor.spawn_leg("socks5", serving));

		// Recorded before writing so an interrupted write is still removed.
		for path in hints::hint_paths(&self.settings.hint_dir) {
			self.ctx.ledger.record_hint_file(path);
		}
		hints::write_socks_hints(
			&self.settings.hint_dir,
			self.settings.socks_port,
			&endpoint.namespace,
		)
		.await?;

		info!("==============================================================");
		info!(
			"Start SOCKS5 Proxy Successful: export http_proxy=socks5://127.0.0.1:{}",
			self.settings.socks_port
		);
		info!("==============================================================");
		Ok(())
	}

	/// Stop every leg and mark the session closed.
	pub async fn close(&mut self) {
		self.tracker.begin_closing();
		stop_legs(&self.ctx.supervisor, std::mem::take(&mut self.legs)).await;
		let _ = self.tracker.advance(SessionState::Closed);
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn method_parses_and_displays() {
		assert_eq!("socks5".parse::<OutboundMethod>().unwrap(), OutboundMethod::Socks5);
		assert_eq!("vpn".parse::<OutboundMethod>().unwrap(), OutboundMethod::Vpn);
		assert!("wireguard".parse::<OutboundMethod>().is_err());
		assert_eq!(OutboundMethod::default().to_string(), "vpn");
	}
}
