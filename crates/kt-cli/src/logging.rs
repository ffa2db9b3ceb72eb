// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{reload, EnvFilter, Registry};

/// Adjusts the log filter after startup.
pub struct LogHandle {
	filter: reload::Handle<EnvFilter, Registry>,
	from_env: bool,
}

impl LogHandle {
	/// Apply the verbosity from loaded configuration. `RUST_LOG` still wins.
	pub fn set_debug(&self, debug: bool) {
		if self.from_env {
			return;
		}
		if let Err(e) = self.filter.reload(EnvFilter::new(default_directive(debug))) {
			tracing::warn!(error = %e, "failed to change log level");
		}
	}
}

/// `RUST_LOG` wins; otherwise `debug` or `info`.
pub fn init(debug: bool) -> LogHandle {
	let (filter, from_env) = match EnvFilter::try_from_default_env() {
		Ok(filter) => (filter, true),
		Err(_) => (EnvFilter::new(default_directive(debug)), false),
	};
	let (filter, handle) = reload::Layer::new(filter);
	tracing_subscriber::registry()
		.with(filter)
		.with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
		.init();
	LogHandle {
		filter: handle,
		from_env,
	}
}

fn default_directive(debug: bool) -> &'static str {
	if debug {
		"debug"
	} else {
		"info"
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn directive_follows_debug_flag() {
		assert_eq!(default_directive(true), "debug");
		assert_eq!(default_directive(false), "info");
	}

	#[test]
	fn reloaded_filter_changes_level() {
		let (layer, handle) = reload::Layer::<EnvFilter, Registry>::new(EnvFilter::new("info"));
		let _subscriber = tracing_subscriber::registry().with(layer);
		let logs = LogHandle {
			filter: handle.clone(),
			from_env: false,
		};
		logs.set_debug(true);
		let level = handle.with_current(|f| f.max_level_hint()).unwrap();
		assert_eq!(level, Some(tracing::level_filters::LevelFilter::DEBUG));
	}

	#[test]
	fn env_filter_is_left_alone() {
		let (layer, handle) = reload::Layer::<EnvFilter, Registry>::new(EnvFilter::new("warn"));
		let _subscriber = tracing_subscriber::registry().with(layer);
		let logs = LogHandle {
			filter: handle.clone(),
			from_env: true,
		};
		logs.set_debug(true);
		let level = handle.with_current(|f| f.max_level_hint()).unwrap();
		assert_eq!(level, Some(tracing::level_filters::LevelFilter::WARN));
	}
}
