// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Service-registry synchronisation (Consul agent API).

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, instrument};

const USER_AGENT: &str = concat!("ktctl/", env!("CARGO_PKG_VERSION"));
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
const SERVICE_PORT: u16 = 80;

#[derive(Debug, Error)]
pub enum RegistryError {
	#[error("registry request failed: {0}")]
	Http(#[from] reqwest::Error),

	#[error("registry returned {status} for {url}")]
	Status { status: u16, url: String },
}

/// Publishes cluster service addresses to an external registry.
#[async_trait]
pub trait ServiceRegistry: Send + Sync {
	async fn register(&self, services: &BTreeMap<String, String>) -> Result<(), RegistryError>;

	async fn deregister(&self, services: &BTreeMap<String, String>) -> Result<(), RegistryError>;
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct CatalogEntry {
	#[serde(rename = "ServiceID")]
	service_id: String,
	service_address: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct Registration<'a> {
	#[serde(rename = "ID")]
	id: String,
	name: &'a str,
	address: &'a str,
	port: u16,
}

#[derive(Debug, Clone)]
pub struct ConsulRegistry {
	client: Client,
	base_url: String,
}

impl ConsulRegistry {
	/// `address` is the agent's `host:port`.
	pub fn new(address: &str) -> Result<Self, RegistryError> {
		let client = Client::builder()
			.user_agent(USER_AGENT)
			.timeout(REQUEST_TIMEOUT)
			.build()?;
		Ok(Self {
			client,
			base_url: format!("http://{}", address.trim_end_matches('/')),
		})
	}

	async fn lookup(&self, name: &str) -> Result<Vec<CatalogEntry>, RegistryError> {
		let url = format!("{}/v1/catalog/service/{name}", self.base_url);
		let response = self.client.get(&url).send().await?;
		check(response.status(), &url)?;
		Ok(response.json().await?)
	}

	async fn put_deregister(&self, service_id: &str) -> Result<(), RegistryError> {
		let url = format!("{}/v1/agent/service/deregister/{service_id}", self.base_url);
		let response = self.client.put(&url).send().await?;
		check(response.status(), &url)
	}
}

fn check(status: reqwest::StatusCode, url: &str) -> Result<(), RegistryError> {
	if status.is_success() {
		Ok(())
	} else {
		Err(RegistryError::Status {
			status: status.as_u16(),
			url: url.to_string(),
		})
	}
}

#[async_trait]
impl ServiceRegistry for ConsulRegistry {
	#[instrument(skip(self, services), fields(count = services.len()))]
	async fn register(&self, services: &BTreeMap<String, String>) -> Result<(), RegistryError> {
		for (name, ip) in services {
			let existing = self.lookup(name).await?;
			if let Some(entry) = existing.first() {
				if entry.service_address == *ip {
					debug!(service = %name, "already registered");
					continue;
				}
				self.put_deregister(&entry.service_id).await?;
			}

			let url = format!("{}/v1/agent/service/register", self.base_url);
			let registration = Registration {
				id: format!("{name}-1"),
				name,
				address: ip,
				port: SERVICE_PORT,
			};
			let response = self.client.put(&url).json(&registration).send().await?;
			check(response.status(), &url)?;
			info!(service = %name, %ip, "registered service");
		}
		Ok(())
	}

	#[instrument(skip(self, services), fields(count = services.len()))]
	async fn deregister(&self, services: &BTreeMap<String, String>) -> Result<(), RegistryError> {
		for name in services.keys() {
			if let Some(entry) = self.lookup(name).await?.first() {
				self.put_deregister(&entry.service_id).await?;
				info!(service = %name, "deregistered service");
			}
		}
		Ok(())
	}
}
