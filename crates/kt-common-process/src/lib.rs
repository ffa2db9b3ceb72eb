// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Background leg supervision for kt sessions.
//!
//! A session is a stack of legs (port-forward, SSH layer, VPN helper or
//! SOCKS listener, reverse relays). Every leg runs as its own task bound to
//! one [`Scope`]:
//!
//! - [`Supervisor::run_background`] spawns an external command
//! - [`Supervisor::spawn_leg`] spawns an in-process future
//! - [`Supervisor::launch_with_grace`] waits a settle period before the next
//!   hop may start
//!
//! When a leg exits, a [`LegExit`] is sent on the supervisor's stop channel.
//! A leg that fails while the scope is still live cancels the scope, so all
//! siblings stop with it. Results travel through single-assignment channels
//! read via [`LegHandle`].
//!
//! [`TaskGroup`] is the scoped join primitive used to launch several legs
//! concurrently and collect their launch results.

pub mod command;
pub mod error;
pub mod group;
pub mod scope;
pub mod supervisor;

pub use command::BackgroundCommand;
pub use error::{Result, SupervisorError};
pub use group::TaskGroup;
pub use scope::Scope;
pub use supervisor::{ExitReceiver, LegExit, LegHandle, LegOutcome, Supervisor};
