// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use std::future::Future;
use tokio::task::{JoinError, JoinSet};

/// A scoped group of concurrently running tasks.
///
/// Children are joined explicitly with [`TaskGroup::join_all`] or
/// [`TaskGroup::join_each`]. Dropping the group aborts whatever is still
/// running. A panicking child re-panics in the joining task.
pub struct TaskGroup<T, E> {
	set: JoinSet<Result<T, E>>,
}

impl<T, E> TaskGroup<T, E>
where
	T: Send + 'static,
	E: Send + 'static,
{
	pub fn new() -> Self {
		Self {
			set: JoinSet::new(),
		}
	}

	pub fn spawn<F>(&mut self, task: F)
	where
		F: Future<Output = Result<T, E>> + Send + 'static,
	{
		self.set.spawn(task);
	}

	pub fn len(&self) -> usize {
		self.set.len()
	}

	pub fn is_empty(&self) -> bool {
		self.set.is_empty()
	}

	/// Join every child. Returns the first error, aborting the rest.
	pub async fn join_all(mut self) -> Result<Vec<T>, E> {
		let mut values = Vec::with_capacity(self.set.len());
		while let Some(joined) = self.set.join_next().await {
			match unwrap_join(joined) {
				Some(Ok(value)) => values.push(value),
				Some(Err(e)) => {
					self.set.abort_all();
					return Err(e);
				}
				None => {}
			}
		}
		Ok(values)
	}

	/// Join every child and keep each result, in completion order.
	pub async fn join_each(mut self) -> Vec<Result<T, E>> {
		let mut results = Vec::with_capacity(self.set.len());
		while let Some(joined) = self.set.join_next().await {
			if let Some(result) = unwrap_join(joined) {
				results.push(result);
			}
		}
		results
	}
}

impl<T, E> Default for TaskGroup<T, E>
where
	T: Send + 'static,
	E: Send + 'static,
{
	fn default() -> Self {
		Self::new()
	}
}

fn unwrap_join<R>(joined: Result<R, JoinError>) -> Option<R> {
	match joined {
		Ok(result) => Some(result),
		Err(e) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
		Err(_) => None,
	}
}
