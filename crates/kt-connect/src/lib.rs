// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Tunnel sessions and the daemon that runs them.
//!
//! A [`Daemon`] runs one [`Flow`] (`connect`, `run` or `exchange`). The flow
//! acquires a shadow through [`kt_cluster::ShadowLifecycle`] and starts an
//! [`OutboundSession`] or [`InboundSession`] on top of a `kubectl
//! port-forward` hop. Everything it creates is written to a
//! [`CleanupLedger`], which [`Cleanup`] drains exactly once when the daemon
//! stops.

pub mod cleanup;
pub mod daemon;
pub mod error;
pub mod flow;
pub mod hints;
pub mod hop;
pub mod hosts;
pub mod inbound;
pub mod ledger;
pub mod outbound;
pub mod pidfile;
pub mod registry;
pub mod session;
pub mod vpn;

pub use cleanup::{Cleanup, CleanupReport, CleanupStep};
pub use daemon::{shutdown_signal, Daemon, DaemonOutcome, Termination};
pub use error::{CleanupFailure, ConnectError, Result};
pub use flow::{ConnectFlow, ExchangeFlow, Flow, RunFlow};
pub use hop::{derive_session_port, KubeOptions, PortForward};
pub use hosts::{HostsEditor, HostsFile};
pub use inbound::{InboundSession, PortFailurePolicy};
pub use ledger::CleanupLedger;
pub use outbound::{OutboundMethod, OutboundSession, OutboundSettings};
pub use registry::{ConsulRegistry, RegistryError, ServiceRegistry};
pub use session::{SessionContext, SessionState};
pub use vpn::Sshuttle;
