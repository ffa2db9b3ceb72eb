// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use clap::{Args, Parser, Subcommand};
use kt_cli_config::ConfigLayer;
use kt_connect::{OutboundMethod, PortFailurePolicy};
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(name = "ktctl", version, about = "Connect your machine to a Kubernetes cluster network")]
pub struct Cli {
	/// Namespace for shadow workloads
	#[arg(short, long, global = true)]
	pub namespace: Option<String>,

	#[arg(short = 'c', long, global = true)]
	pub kubeconfig: Option<PathBuf>,

	/// Shadow container image
	#[arg(short, long, global = true)]
	pub image: Option<String>,

	/// Debug logging, and helper output on the terminal
	#[arg(short, long, global = true)]
	pub debug: bool,

	/// Extra labels for the shadow, e.g. `owner=me,team=web`
	#[arg(short, long, global = true)]
	pub labels: Option<String>,

	/// Extra kubectl options, e.g. `--context=dev` or `-n dev`
	#[arg(long = "kube-options", global = true)]
	pub kube_options: Vec<String>,

	/// Seconds a helper process must survive to count as started
	#[arg(long = "wait-time", global = true)]
	pub wait_time: Option<u64>,

	#[command(subcommand)]
	pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
	/// Route local traffic into the cluster network
	Connect(ConnectArgs),
	/// Create a shadow that forwards a port to a local service
	Run(RunArgs),
	/// Replace a deployment's pods with a shadow forwarding to local ports
	Exchange(ExchangeArgs),
}

impl Command {
	pub fn mode(&self) -> &'static str {
		match self {
			Command::Connect(_) => "connect",
			Command::Run(_) => "run",
			Command::Exchange(_) => "exchange",
		}
	}
}

#[derive(Debug, Clone, Args)]
pub struct ConnectArgs {
	/// vpn or socks5
	#[arg(long, default_value_t = OutboundMethod::Vpn)]
	pub method: OutboundMethod,

	/// Local port forwarded to the shadow's sshd
	#[arg(long = "ssh-port")]
	pub ssh_port: Option<u16>,

	/// SOCKS5 listen port (socks5 method)
	#[arg(long = "socks-port", alias = "proxy")]
	pub socks_port: Option<u16>,

	/// Keep DNS local (vpn method)
	#[arg(long = "disable-dns", alias = "disableDNS")]
	pub disable_dns: bool,

	/// Pod CIDR to route instead of the nodes' ranges
	#[arg(long)]
	pub cidr: Option<String>,

	/// Attach to one shadow shared by every connect session
	#[arg(long = "share-shadow", alias = "shareShadow")]
	pub share_shadow: bool,

	/// DNS search domain handed to the shadow
	#[arg(long = "local-domain", alias = "localDomain")]
	pub local_domain: Option<String>,

	/// Write service addresses into /etc/hosts
	#[arg(long)]
	pub dump2hosts: bool,

	/// More namespaces for --dump2hosts, comma separated
	#[arg(long = "dump2hosts-namespaces", alias = "dump2hostsNamespaces", value_delimiter = ',')]
	pub dump2hosts_namespaces: Vec<String>,

	/// Register service addresses with this Consul agent (host:port)
	#[arg(long = "consul-address", alias = "consulAddress")]
	pub consul_address: Option<String>,

	/// Directory for .jvmrc and .envrc (socks5 method)
	#[arg(long = "hint-dir")]
	pub hint_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Args)]
pub struct RunArgs {
	/// Service name, also the shadow's name
	pub service: String,

	/// Local port to expose
	#[arg(long)]
	pub port: u16,

	/// Also create a ClusterIP service for the shadow
	#[arg(long)]
	pub expose: bool,
}

#[derive(Debug, Clone, Args)]
pub struct ExchangeArgs {
	/// Deployment to replace
	pub deployment: String,

	/// Ports as `remote[:local]`, comma separated
	#[arg(long)]
	pub expose: String,

	/// best-effort or fail-fast
	#[arg(long = "port-policy", default_value_t = PortFailurePolicy::BestEffort)]
	pub port_policy: PortFailurePolicy,
}

impl Cli {
	/// The flags that override configuration files and environment.
	pub fn config_layer(&self) -> ConfigLayer {
		let (ssh_port, socks_port) = match &self.command {
			Command::Connect(args) => (args.ssh_port, args.socks_port),
			_ => (None, None),
		};
		ConfigLayer {
			namespace: self.namespace.clone(),
			kubeconfig: self.kubeconfig.clone(),
			image: self.image.clone(),
			debug: self.debug.then_some(true),
			wait_time_secs: self.wait_time,
			ssh_port,
			socks_port,
			..Default::default()
		}
	}
}
