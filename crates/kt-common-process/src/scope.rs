// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};

/// Cancellation scope shared by every leg of one session.
///
/// Cloning is cheap; all clones observe the same cancellation.
#[derive(Debug, Clone, Default)]
pub struct Scope {
	token: CancellationToken,
}

impl Scope {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn cancel(&self) {
		self.token.cancel();
	}

	pub fn is_cancelled(&self) -> bool {
		self.token.is_cancelled()
	}

	/// Resolves once the scope is cancelled.
	pub fn cancelled(&self) -> WaitForCancellationFuture<'_> {
		self.token.cancelled()
	}

	/// A scope that is cancelled with this one but can also be cancelled on
	/// its own.
	pub fn child(&self) -> Scope {
		Scope {
			token: self.token.child_token(),
		}
	}

	pub fn token(&self) -> &CancellationToken {
		&self.token
	}
}
