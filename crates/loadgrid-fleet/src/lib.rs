//! loadgrid-fleet — the live view of the worker fleet.
//!
//! The discovery mechanism is an external collaborator that reports
//! endpoint-added / endpoint-removed events asynchronously; this crate
//! holds the resulting `FleetView` and tolerates duplicate or stale
//! events (duplicate add is idempotent, remove of an unknown endpoint is
//! a no-op).

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use serde::Serialize;
use tracing::info;

use loadgrid_core::Endpoint;

/// A discovery event from the external fleet-membership collaborator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FleetEvent {
    Added { endpoint: Endpoint, hostname: String },
    Removed { endpoint: Endpoint },
}

/// One entry of a fleet snapshot.
#[derive(Debug, Clone, Serialize)]
pub struct FleetMember {
    pub endpoint: Endpoint,
    pub hostname: String,
}

/// Mutable set of live worker endpoints, keyed by (host, port).
///
/// Mutated only through [`FleetView::insert`] and [`FleetView::remove`],
/// under an exclusive lock. Never holds two entries with the same
/// (host, port). Cloning shares the underlying map.
#[derive(Clone, Default)]
pub struct FleetView {
    members: Arc<Mutex<HashMap<Endpoint, String>>>,
}

impl FleetView {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an endpoint with its node hostname. Idempotent: a duplicate add
    /// refreshes the hostname without creating a second entry. Returns
    /// whether the endpoint was new.
    pub fn insert(&self, endpoint: Endpoint, hostname: impl Into<String>) -> bool {
        let hostname = hostname.into();
        let mut members = self.members.lock().unwrap_or_else(|e| e.into_inner());
        let added = members.insert(endpoint.clone(), hostname.clone()).is_none();
        if added {
            info!(%endpoint, %hostname, "fleet endpoint added");
        }
        added
    }

    /// Remove an endpoint. A remove for an endpoint not present is a no-op
    /// returning false.
    pub fn remove(&self, endpoint: &Endpoint) -> bool {
        let mut members = self.members.lock().unwrap_or_else(|e| e.into_inner());
        let removed = members.remove(endpoint).is_some();
        if removed {
            info!(%endpoint, "fleet endpoint removed");
        }
        removed
    }

    pub fn contains(&self, endpoint: &Endpoint) -> bool {
        let members = self.members.lock().unwrap_or_else(|e| e.into_inner());
        members.contains_key(endpoint)
    }

    pub fn hostname(&self, endpoint: &Endpoint) -> Option<String> {
        let members = self.members.lock().unwrap_or_else(|e| e.into_inner());
        members.get(endpoint).cloned()
    }

    /// Number of live endpoints.
    pub fn len(&self) -> usize {
        let members = self.members.lock().unwrap_or_else(|e| e.into_inner());
        members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of distinct node hostnames across the fleet.
    pub fn node_count(&self) -> usize {
        let members = self.members.lock().unwrap_or_else(|e| e.into_inner());
        let mut hostnames: Vec<&String> = members.values().collect();
        hostnames.sort();
        hostnames.dedup();
        hostnames.len()
    }

    /// Point-in-time copy of the membership.
    pub fn snapshot(&self) -> Vec<FleetMember> {
        let members = self.members.lock().unwrap_or_else(|e| e.into_inner());
        members
            .iter()
            .map(|(endpoint, hostname)| FleetMember {
                endpoint: endpoint.clone(),
                hostname: hostname.clone(),
            })
            .collect()
    }
}
