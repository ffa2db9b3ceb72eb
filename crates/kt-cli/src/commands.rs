// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Wires configuration and flags into a daemon and runs it.

use crate::cli::{Cli, Command, ConnectArgs, ExchangeArgs, RunArgs};
use anyhow::Context;
use console::style;
use kt_cli_config::KtConfig;
use kt_cluster::{ClusterControlPlane, KubeCluster, KubeSettings, ShadowRequest, ShadowRole};
use kt_common_core::{labels, parse_port_mappings};
use kt_connect::{
	shutdown_signal, ConnectFlow, ConsulRegistry, Daemon, DaemonOutcome, ExchangeFlow, Flow,
	HostsEditor, HostsFile, KubeOptions, OutboundSettings, PortForward, RunFlow, ServiceRegistry,
	Sshuttle,
};
use kt_tunnel_ssh::SshTransport;
use std::sync::Arc;
use tracing::{info, instrument};

/// Everything the three modes share.
struct Shared {
	namespace: String,
	cluster: Arc<dyn ClusterControlPlane>,
	port_forward: PortForward,
	request: ShadowRequest,
}

#[instrument(skip_all, fields(mode = cli.command.mode()))]
pub async fn execute(cli: Cli, config: KtConfig) -> anyhow::Result<DaemonOutcome> {
	let kube_options = KubeOptions::parse(cli.kube_options.iter().cloned())?
		.with_default_kubeconfig(&config.kubeconfig.display().to_string());
	let namespace = kube_options
		.namespace()
		.unwrap_or(config.namespace.as_str())
		.to_string();

	let settings = KubeSettings {
		app_home: config.app_home.clone(),
		ready_timeout: config.ready_timeout,
		..Default::default()
	};
	let cluster = KubeCluster::from_kubeconfig(&config.kubeconfig, kube_options.context(), settings)
		.await
		.context("failed to load kubeconfig")?;
	info!(%namespace, kubeconfig = %config.kubeconfig.display(), "cluster client ready");

	let shared = Shared {
		request: ShadowRequest {
			namespace: namespace.clone(),
			image: config.image.clone(),
			role: ShadowRole::Connect { shared: false },
			user_labels: cli
				.labels
				.as_deref()
				.map(labels::parse_labels)
				.unwrap_or_default(),
			local_domain: None,
			debug: config.debug,
		},
		namespace,
		cluster: Arc::new(cluster),
		port_forward: PortForward::new(config.kubectl.clone(), kube_options, config.debug),
	};

	let mut daemon = Daemon::new(
		config.app_home.clone(),
		config.wait_time,
		Arc::clone(&shared.cluster),
		Arc::new(SshTransport::new()),
		shared.port_forward.clone(),
	);

	let mut flow: Box<dyn Flow> = match cli.command {
		Command::Connect(args) => {
			let (flow, hosts, registry) = connect_flow(args, &config, &shared)?;
			if let Some(hosts) = hosts {
				daemon = daemon.with_hosts(hosts);
			}
			if let Some(registry) = registry {
				daemon = daemon.with_registry(registry);
			}
			Box::new(flow)
		}
		Command::Run(args) => Box::new(run_flow(args, &shared)),
		Command::Exchange(args) => Box::new(exchange_flow(args, &shared)?),
	};

	println!(
		"{} Starting {} in namespace {}",
		style("→").cyan(),
		flow.mode(),
		style(&shared.namespace).cyan()
	);
	let outcome = daemon.run(flow.as_mut(), shutdown_signal()).await?;
	Ok(outcome)
}

type Collaborators = (
	ConnectFlow,
	Option<Arc<dyn HostsEditor>>,
	Option<Arc<dyn ServiceRegistry>>,
);

fn connect_flow(args: ConnectArgs, config: &KtConfig, shared: &Shared) -> anyhow::Result<Collaborators> {
	let mut request = shared.request.clone();
	request.role = ShadowRole::Connect {
		shared: args.share_shadow,
	};
	request.local_domain = args.local_domain;

	let hint_dir = match args.hint_dir {
		Some(dir) => dir,
		None => std::env::current_dir().context("cannot determine the current directory")?,
	};
	let settings = OutboundSettings {
		method: args.method,
		ssh_port: config.ssh_port,
		socks_port: config.socks_port,
		disable_dns: args.disable_dns,
		debug: config.debug,
		hint_dir,
		sshuttle: Sshuttle::from_command_line(&config.sshuttle),
	};

	let mut flow = ConnectFlow::new(Arc::clone(&shared.cluster), request, settings);
	if let Some(cidr) = args.cidr {
		flow = flow.with_pod_cidr(cidr);
	}

	let hosts = args.dump2hosts.then(|| Arc::new(HostsFile::default()) as Arc<dyn HostsEditor>);
	if let Some(hosts) = &hosts {
		flow = flow.with_hosts(Arc::clone(hosts), args.dump2hosts_namespaces);
	}

	let registry = match args.consul_address {
		Some(address) => {
			let registry: Arc<dyn ServiceRegistry> = Arc::new(
				ConsulRegistry::new(&address).context("failed to build the Consul client")?,
			);
			flow = flow.with_registry(Arc::clone(&registry));
			Some(registry)
		}
		None => None,
	};

	Ok((flow, hosts, registry))
}

fn run_flow(args: RunArgs, shared: &Shared) -> RunFlow {
	let mut request = shared.request.clone();
	request.role = ShadowRole::Run {
		service: args.service,
	};
	RunFlow::new(Arc::clone(&shared.cluster), request, args.port, args.expose)
}

fn exchange_flow(args: ExchangeArgs, shared: &Shared) -> anyhow::Result<ExchangeFlow> {
	let mappings = parse_port_mappings(&args.expose)
		.with_context(|| format!("invalid --expose value {:?}", args.expose))?;
	Ok(ExchangeFlow::new(
		Arc::clone(&shared.cluster),
		shared.request.clone(),
		args.deployment,
		mappings,
		args.port_policy,
	))
}
