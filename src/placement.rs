//! Weighted endpoint placement
//!
//! Every client must rank endpoints for a block identically, so the weight
//! function is part of the wire contract: `md5(<block md5> + <last 15
//! chars of service uuid>)`, compared as lowercase hex strings, heaviest
//! first.

use crate::error::{KeepError, Result};
use crate::locator::{md5_hex, GatewayHint, Locator};
use crate::types::{KeepService, KeepServiceList};
use std::collections::{HashMap, HashSet};
use tracing::debug;

const UUID_SUFFIX_LEN: usize = 15;

/// Placement weight of `service_uuid` for a block with hash `data_hash`
pub fn service_weight(data_hash: &str, service_uuid: &str) -> String {
    let suffix = service_uuid
        .char_indices()
        .rev()
        .nth(UUID_SUFFIX_LEN - 1)
        .map_or(service_uuid, |(i, _)| &service_uuid[i..]);
    md5_hex(format!("{}{}", data_hash, suffix))
}

/// Immutable view of the accessible services, built once per refresh
#[derive(Debug, Clone)]
pub struct ServiceSnapshot {
    /// Every listed service by uuid, gateways included; used for `K@<uuid>` hints
    by_uuid: HashMap<String, KeepService>,
    /// Non-gateway services
    readable: Vec<KeepService>,
    /// Non-gateway, non-read-only services
    writable: Vec<KeepService>,
    /// 1 when every writable service is a disk server, otherwise unknown
    max_replicas_per_service: Option<u32>,
}

impl ServiceSnapshot {
    /// Build a snapshot from an accessible-services listing
    pub fn build(list: KeepServiceList) -> Result<Self> {
        if list.items.is_empty() {
            return Err(KeepError::NoGatewayServices);
        }

        let readable: Vec<KeepService> = list
            .items
            .iter()
            .filter(|s| !s.is_gateway())
            .cloned()
            .collect();
        let writable: Vec<KeepService> = readable.iter().filter(|s| !s.read_only).cloned().collect();

        let max_replicas_per_service = if writable.iter().all(KeepService::is_disk) {
            Some(1)
        } else {
            None
        };

        let by_uuid = list
            .items
            .into_iter()
            .map(|s| (s.uuid.clone(), s))
            .collect();

        debug!(
            readable = readable.len(),
            writable = writable.len(),
            max_replicas_per_service = ?max_replicas_per_service,
            "Built keep service snapshot"
        );

        Ok(Self {
            by_uuid,
            readable,
            writable,
            max_replicas_per_service,
        })
    }

    pub fn readable(&self) -> &[KeepService] {
        &self.readable
    }

    pub fn writable(&self) -> &[KeepService] {
        &self.writable
    }

    pub fn max_replicas_per_service(&self) -> Option<u32> {
        self.max_replicas_per_service
    }

    /// Number of concurrent writes needed to reach `copies` replicas
    pub fn write_fanout(&self, copies: u32) -> usize {
        match self.max_replicas_per_service {
            Some(max) if max < copies => copies.div_ceil(max) as usize,
            _ => 1,
        }
    }

    /// Service roots in the order they should be probed for `locator`.
    ///
    /// Roots named by gateway hints come first, in hint order, followed by
    /// the read (or write) pool sorted by descending weight. Each root
    /// appears once.
    pub fn weighted_service_roots(
        &self,
        locator: &Locator,
        need_writable: bool,
        gateway_domain: &str,
    ) -> Vec<String> {
        let mut roots = Vec::new();

        for hint in locator.gateway_hints() {
            match hint {
                GatewayHint::Region(region) => {
                    roots.push(format!("https://keep.{}.{}/", region, gateway_domain));
                }
                GatewayHint::Uuid(uuid) => {
                    if let Some(service) = self.by_uuid.get(uuid) {
                        roots.push(service.service_root());
                    }
                }
            }
        }

        let pool = if need_writable {
            &self.writable
        } else {
            &self.readable
        };

        let mut weighted: Vec<(String, &KeepService)> = pool
            .iter()
            .map(|s| (service_weight(locator.md5sum(), &s.uuid), s))
            .collect();
        weighted.sort_by(|a, b| b.0.cmp(&a.0));
        roots.extend(weighted.into_iter().map(|(_, s)| s.service_root()));

        let mut seen = HashSet::new();
        roots.retain(|root| seen.insert(root.clone()));
        roots
    }
}
