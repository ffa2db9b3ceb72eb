// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use crate::error::{ConnectError, Result};
use crate::hop::PortForward;
use crate::ledger::CleanupLedger;
use kt_common_core::Direction;
use kt_common_process::{LegHandle, Supervisor};
use kt_tunnel_ssh::Transport;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// What every session needs from the daemon that runs it.
#[derive(Clone)]
pub struct SessionContext {
	pub supervisor: Supervisor,
	pub transport: Arc<dyn Transport>,
	pub port_forward: PortForward,
	pub ledger: Arc<CleanupLedger>,
	/// Grace period a launched leg must survive.
	pub wait_time: Duration,
}

/// Cancel the session scope and wait for the given legs to stop.
pub(crate) async fn stop_legs(supervisor: &Supervisor, legs: Vec<LegHandle>) {
	supervisor.scope().cancel();
	for leg in legs {
		let name = leg.name().to_string();
		let outcome = leg.wait().await;
		debug!(leg = %name, %outcome, "leg stopped");
	}
}

/// Session progress. Ordered; a session only ever moves forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum SessionState {
	Idle,
	HopEstablishing,
	SessionEstablishing,
	FinalLayerActive,
	Closing,
	Closed,
}

impl fmt::Display for SessionState {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let name = match self {
			SessionState::Idle => "idle",
			SessionState::HopEstablishing => "hop-establishing",
			SessionState::SessionEstablishing => "session-establishing",
			SessionState::FinalLayerActive => "final-layer-active",
			SessionState::Closing => "closing",
			SessionState::Closed => "closed",
		};
		f.write_str(name)
	}
}

#[derive(Debug, Clone)]
pub struct SessionTracker {
	direction: Direction,
	state: SessionState,
}

impl SessionTracker {
	pub fn new(direction: Direction) -> Self {
		Self {
			direction,
			state: SessionState::Idle,
		}
	}

	pub fn direction(&self) -> Direction {
		self.direction
	}

	pub fn state(&self) -> SessionState {
		self.state
	}

	/// Move to `next`. Skipping ahead is allowed; going back or leaving
	/// `Closed` is not.
	pub fn advance(&mut self, next: SessionState) -> Result<()> {
		if next <= self.state {
			return Err(ConnectError::InvalidTransition {
				from: self.state.to_string(),
				to: next.to_string(),
			});
		}
		debug!(direction = %self.direction, from = %self.state, to = %next, "session state");
		self.state = next;
		Ok(())
	}

	/// Enter `Closing` unless already there or beyond.
	pub fn begin_closing(&mut self) {
		if self.state < SessionState::Closing {
			self.state = SessionState::Closing;
		}
	}
}
