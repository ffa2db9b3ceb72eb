// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use crate::command::BackgroundCommand;
use crate::error::{Result, SupervisorError};
use crate::scope::Scope;
use std::fmt;
use std::future::Future;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};

/// How a supervised leg ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LegOutcome {
	/// Returned successfully while the scope was still live.
	Completed,
	/// Returned an error while the scope was still live.
	Failed(String),
	/// Stopped because the scope was cancelled.
	Cancelled,
}

impl fmt::Display for LegOutcome {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			LegOutcome::Completed => f.write_str("exited"),
			LegOutcome::Failed(message) => write!(f, "failed: {message}"),
			LegOutcome::Cancelled => f.write_str("cancelled"),
		}
	}
}

/// Notification sent on the stop channel whenever a leg ends.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LegExit {
	pub name: String,
	pub outcome: LegOutcome,
}

pub type ExitReceiver = mpsc::UnboundedReceiver<LegExit>;

/// Handle to one running leg.
pub struct LegHandle {
	name: String,
	outcome: oneshot::Receiver<LegOutcome>,
	task: JoinHandle<()>,
}

impl LegHandle {
	pub fn name(&self) -> &str {
		&self.name
	}

	/// The outcome if the leg already ended.
	pub fn try_outcome(&mut self) -> Option<LegOutcome> {
		self.outcome.try_recv().ok()
	}

	/// Wait for the leg to end.
	pub async fn wait(self) -> LegOutcome {
		self
			.outcome
			.await
			.unwrap_or_else(|_| LegOutcome::Failed("leg task ended without reporting".to_string()))
	}

	pub fn abort(&self) {
		self.task.abort();
	}
}

impl fmt::Debug for LegHandle {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("LegHandle")
			.field("name", &self.name)
			.field("finished", &self.task.is_finished())
			.finish()
	}
}

/// Spawns legs bound to one scope and reports their exits.
#[derive(Clone)]
pub struct Supervisor {
	scope: Scope,
	exits: mpsc::UnboundedSender<LegExit>,
}

impl Supervisor {
	pub fn new(scope: Scope) -> (Self, ExitReceiver) {
		let (exits, rx) = mpsc::unbounded_channel();
		(Self { scope, exits }, rx)
	}

	pub fn scope(&self) -> &Scope {
		&self.scope
	}

	/// A supervisor over a child scope with its own exit channel. Its legs
	/// stop when this scope is cancelled, but a failing one only cancels the
	/// child scope and is not reported here.
	pub fn isolated(&self) -> (Self, ExitReceiver) {
		Self::new(self.scope.child())
	}

	/// Run an external command as a leg. Returns immediately.
	pub fn run_background(&self, command: BackgroundCommand) -> LegHandle {
		let name = command.name.clone();
		self.spawn_leg(name, run_command(command))
	}

	/// Run an in-process future as a leg. Returns immediately.
	pub fn spawn_leg<F, E>(&self, name: impl Into<String>, leg: F) -> LegHandle
	where
		F: Future<Output = std::result::Result<(), E>> + Send + 'static,
		E: fmt::Display + Send + 'static,
	{
		let name = name.into();
		let leg_name = name.clone();
		let scope = self.scope.clone();
		let exits = self.exits.clone();
		let (tx, rx) = oneshot::channel();

		let task = tokio::spawn(async move {
			let outcome = tokio::select! {
				biased;

				_ = scope.cancelled() => LegOutcome::Cancelled,

				result = leg => match result {
					_ if scope.is_cancelled() => LegOutcome::Cancelled,
					Ok(()) => LegOutcome::Completed,
					Err(e) => LegOutcome::Failed(e.to_string()),
				},
			};

			match &outcome {
				LegOutcome::Failed(message) => {
					error!(leg = %leg_name, error = %message, "background leg failed, cancelling its scope");
					scope.cancel();
				}
				LegOutcome::Completed => warn!(leg = %leg_name, "background leg exited"),
				LegOutcome::Cancelled => debug!(leg = %leg_name, "background leg cancelled"),
			}

			let _ = exits.send(LegExit {
				name: leg_name,
				outcome: outcome.clone(),
			});
			let _ = tx.send(outcome);
		});

		LegHandle {
			name,
			outcome: rx,
			task,
		}
	}

	/// Run a command and block for `grace` so it can settle. Fails if the leg
	/// ends during the grace period.
	#[instrument(skip(self, command), fields(leg = %command.name))]
	pub async fn launch_with_grace(
		&self,
		command: BackgroundCommand,
		grace: Duration,
	) -> Result<LegHandle> {
		let mut handle = self.run_background(command);
		self.await_grace(&mut handle, grace).await?;
		Ok(handle)
	}

	/// Block for `grace` unless the leg ends first.
	pub async fn await_grace(&self, handle: &mut LegHandle, grace: Duration) -> Result<()> {
		info!(leg = %handle.name, grace_secs = grace.as_secs_f32(), "waiting for leg to settle");
		tokio::select! {
			outcome = &mut handle.outcome => {
				let outcome = outcome.unwrap_or(LegOutcome::Cancelled);
				Err(SupervisorError::LegExited { name: handle.name.clone(), outcome })
			}
			_ = tokio::time::sleep(grace) => Ok(()),
		}
	}
}

async fn run_command(command: BackgroundCommand) -> Result<()> {
	let mut child = command
		.to_command()
		.spawn()
		.map_err(|source| SupervisorError::Spawn {
			name: command.name.clone(),
			source,
		})?;

	info!(leg = %command.name, pid = ?child.id(), command = %command, "started background command");

	let status = child.wait().await?;
	if status.success() {
		Ok(())
	} else {
		Err(SupervisorError::Exited {
			name: command.name,
			code: status.code(),
		})
	}
}
