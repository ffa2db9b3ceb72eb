// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! SSH tunnel transport for kt.
//!
//! A [`Transport`] opens one SSH session to a shadow endpoint and offers two
//! services over it:
//!
//! - a dynamic SOCKS5 proxy that dials every accepted connection through
//!   the session
//! - a reverse forward that asks the server to listen on a remote address
//!   and relays each forwarded connection to a local address
//!
//! Both return once the session is established. The returned [`Serving`]
//! future runs until the scope is cancelled or the session fails.

pub mod error;
pub mod loopback;
pub mod relay;
pub mod socks5;
pub mod ssh;
pub mod transport;

pub use error::{Result, TunnelError};
pub use loopback::LoopbackTransport;
pub use relay::{relay, CopyEnd, Relay};
pub use ssh::SshTransport;
pub use transport::{Serving, Transport};
