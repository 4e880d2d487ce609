// Copyright (C) 2025 Solusics.ai
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Per-tenant in-flight request guard.
//!
//! At most one guarded operation runs per tenant. A second caller does not
//! wait; it gets `None` and is expected to report "busy" instead of firing an
//! overlapping gateway call.

use std::sync::Arc;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;

/// Tracks which tenants currently have a guarded operation running.
#[derive(Debug, Clone, Default)]
pub struct InFlightGuard {
    active: Arc<DashMap<String, ()>>,
}

impl InFlightGuard {
    /// Create an empty guard.
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim the slot for `tenant_id`, or `None` if it is already taken.
    pub fn try_acquire(&self, tenant_id: &str) -> Option<InFlightPermit> {
        match self.active.entry(tenant_id.to_string()) {
            Entry::Occupied(_) => None,
            Entry::Vacant(slot) => {
                slot.insert(());
                Some(InFlightPermit {
                    active: self.active.clone(),
                    tenant_id: tenant_id.to_string(),
                })
            }
        }
    }

    /// Whether `tenant_id` has an operation running.
    pub fn is_busy(&self, tenant_id: &str) -> bool {
        self.active.contains_key(tenant_id)
    }

    /// Number of tenants with an operation running.
    pub fn len(&self) -> usize {
        self.active.len()
    }

    /// Whether no operation is running.
    pub fn is_empty(&self) -> bool {
        self.active.is_empty()
    }
}

/// Held while the guarded operation runs; frees the slot on drop.
#[derive(Debug)]
pub struct InFlightPermit {
    active: Arc<DashMap<String, ()>>,
    tenant_id: String,
}

impl InFlightPermit {
    /// The tenant this permit belongs to.
    pub fn tenant_id(&self) -> &str {
        &self.tenant_id
    }
}

impl Drop for InFlightPermit {
    fn drop(&mut self) {
        self.active.remove(&self.tenant_id);
    }
}
