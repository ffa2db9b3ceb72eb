// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

mod cli;
mod commands;
mod logging;

use clap::Parser;
use console::style;
use std::process::ExitCode;

use crate::cli::Cli;

#[tokio::main]
async fn main() -> ExitCode {
	let cli = Cli::parse();
	let logs = logging::init(cli.debug);

	let config = match kt_cli_config::load_config(cli.config_layer()) {
		Ok(config) => config,
		Err(e) => {
			tracing::error!(error = %e, "failed to load configuration");
			eprintln!("{} {e}", style("✗").red().bold());
			return ExitCode::FAILURE;
		}
	};
	logs.set_debug(config.debug);

	match commands::execute(cli, config).await {
		Ok(outcome) => {
			if outcome.report.is_clean() {
				println!(
					"{} Stopped ({}), cleanup complete",
					style("✓").green().bold(),
					outcome.termination
				);
			} else {
				println!(
					"{} Stopped ({}), {} cleanup step(s) failed",
					style("!").yellow().bold(),
					outcome.termination,
					outcome.report.failures.len()
				);
			}
			ExitCode::SUCCESS
		}
		Err(e) => {
			tracing::error!(error = %e, "ktctl failed");
			eprintln!("{} {e:#}", style("✗").red().bold());
			ExitCode::FAILURE
		}
	}
}
