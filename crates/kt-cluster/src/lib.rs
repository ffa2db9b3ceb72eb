// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Cluster control plane for kt.
//!
//! [`ClusterControlPlane`] is the narrow set of cluster operations the
//! sessions need. [`KubeCluster`] implements it against a live API server;
//! [`InMemoryCluster`] implements it in memory for tests.
//!
//! [`ShadowLifecycle`] sits on top and owns naming, labelling and the
//! reference counting of shared shadow endpoints.

pub mod control_plane;
pub mod error;
pub mod keys;
pub mod kubernetes;
pub mod lifecycle;
pub mod manifest;
pub mod memory;
pub mod types;

pub use control_plane::ClusterControlPlane;
pub use error::{ClusterError, ClusterResult};
pub use kubernetes::{KubeCluster, KubeSettings};
pub use lifecycle::{ShadowLifecycle, ShadowRecord, ShadowRequest, ShadowRole, SHARED_SHADOW_NAME};
pub use memory::InMemoryCluster;
pub use types::{ServiceRef, ShadowEndpoint, ShadowSpec, Workload};
