// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! What a session created, so cleanup knows what to undo.

use kt_cluster::ShadowRecord;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::{Mutex, MutexGuard};

/// An origin workload scaled down by `exchange`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScaledWorkload {
	pub name: String,
	pub namespace: String,
	pub replicas: i32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreatedService {
	pub name: String,
	pub namespace: String,
}

/// Everything recorded for one session.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LedgerEntries {
	pub pid_marker: Option<PathBuf>,
	pub hint_files: Vec<PathBuf>,
	pub hosts: BTreeMap<String, String>,
	pub registry: BTreeMap<String, String>,
	pub origin: Option<ScaledWorkload>,
	pub shadow: Option<ShadowRecord>,
	pub service: Option<CreatedService>,
}

impl LedgerEntries {
	pub fn is_empty(&self) -> bool {
		*self == LedgerEntries::default()
	}
}

/// Shared, append-only record filled during establishment and drained once
/// by cleanup.
#[derive(Debug)]
pub struct CleanupLedger {
	entries: Mutex<Option<LedgerEntries>>,
}

impl CleanupLedger {
	pub fn new() -> Self {
		Self {
			entries: Mutex::new(Some(LedgerEntries::default())),
		}
	}

	fn with<F: FnOnce(&mut LedgerEntries)>(&self, f: F) {
		// Records made after cleanup drained the ledger are dropped.
		if let Some(entries) = self.lock().as_mut() {
			f(entries);
		}
	}

	fn lock(&self) -> MutexGuard<'_, Option<LedgerEntries>> {
		self.entries.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
	}

	pub fn record_pid_marker(&self, path: PathBuf) {
		self.with(|e| e.pid_marker = Some(path));
	}

	pub fn record_hint_file(&self, path: PathBuf) {
		self.with(|e| e.hint_files.push(path));
	}

	pub fn record_hosts(&self, hosts: BTreeMap<String, String>) {
		self.with(|e| e.hosts.extend(hosts));
	}

	pub fn record_registry(&self, entries: BTreeMap<String, String>) {
		self.with(|e| e.registry.extend(entries));
	}

	pub fn record_origin(&self, origin: ScaledWorkload) {
		self.with(|e| e.origin = Some(origin));
	}

	pub fn record_shadow(&self, shadow: ShadowRecord) {
		self.with(|e| e.shadow = Some(shadow));
	}

	pub fn record_service(&self, service: CreatedService) {
		self.with(|e| e.service = Some(service));
	}

	/// A copy of the current entries without draining them.
	pub fn snapshot(&self) -> LedgerEntries {
		self.lock().clone().unwrap_or_default()
	}

	/// Drain the ledger. Every later call returns `None`.
	pub fn take(&self) -> Option<LedgerEntries> {
		self.lock().take()
	}
}

impl Default for CleanupLedger {
	fn default() -> Self {
		Self::new()
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn take_drains_exactly_once() {
		let ledger = CleanupLedger::new();
		ledger.record_pid_marker(PathBuf::from("/tmp/connect.pid"));
		ledger.record_hint_file(PathBuf::from(".jvmrc"));

		let entries = ledger.take().unwrap();
		assert_eq!(entries.pid_marker, Some(PathBuf::from("/tmp/connect.pid")));
		assert_eq!(entries.hint_files.len(), 1);
		assert!(ledger.take().is_none());
	}

	#[test]
	fn records_after_drain_are_dropped() {
		let ledger = CleanupLedger::new();
		ledger.take();
		ledger.record_service(CreatedService {
			name: "orders".to_string(),
			namespace: "dev".to_string(),
		});
		assert!(ledger.snapshot().is_empty());
	}
}
