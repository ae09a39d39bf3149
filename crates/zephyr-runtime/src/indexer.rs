//! The Gateway-local service indexer: an insertion-ordered, mutex-protected
//! list of known [`ServiceDescriptor`]s plus method+path resolution.
//!
//! Three fields are local-only bookkeeping never carried on the wire:
//! `last_seen_at`, `unreachable_at`, `unreachable_count`. Nothing in this
//! module currently sets `unreachable_at`/`unreachable_count` to non-default
//! values — health tracking across dispatch failures is left to a future
//! Gateway enhancement — but `resolve_service` already honors
//! `unreachable_at` per the indexer invariant, so that enhancement only has
//! to start setting the field.

use chrono::{DateTime, Utc};
use http::Method;
use std::sync::Mutex;
use zephyr_kernel::descriptor::ServiceDescriptor;

#[derive(Debug, Clone)]
struct IndexedService {
    descriptor: ServiceDescriptor,
    last_seen_at: DateTime<Utc>,
    unreachable_at: Option<DateTime<Utc>>,
    unreachable_count: u32,
}

/// A Gateway's in-memory route table.
///
/// All reads and writes serialize under a single mutex: no reader ever
/// observes a half-inserted descriptor, and `SetServiceDescriptor` /
/// `ResolveService` never interleave.
#[derive(Default)]
pub struct ServiceIndexer {
    services: Mutex<Vec<IndexedService>>,
}

impl ServiceIndexer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace `descriptor` by name. A replacement clears
    /// `unreachable_at` — a service that re-announces is, by definition,
    /// reachable again.
    pub fn set_service_descriptor(&self, descriptor: ServiceDescriptor) {
        let mut services = self.services.lock().unwrap();
        if let Some(existing) = services.iter_mut().find(|s| s.descriptor.name == descriptor.name) {
            existing.descriptor = descriptor;
            existing.last_seen_at = Utc::now();
            existing.unreachable_at = None;
            existing.unreachable_count = 0;
            return;
        }
        services.push(IndexedService {
            descriptor,
            last_seen_at: Utc::now(),
            unreachable_at: None,
            unreachable_count: 0,
        });
    }

    pub fn unset_service(&self, name: &str) {
        self.services.lock().unwrap().retain(|s| s.descriptor.name != name);
    }

    /// First service (in insertion order) with a route matching `method` and
    /// `path`. Services marked unreachable are skipped but retained.
    pub fn resolve_service(&self, method: &Method, path: &str) -> Option<String> {
        let services = self.services.lock().unwrap();
        for service in services.iter() {
            if service.unreachable_at.is_some() {
                continue;
            }
            if service.descriptor.resolve(method, path).is_some() {
                return Some(service.descriptor.name.clone());
            }
        }
        None
    }

    /// A snapshot of every currently-indexed descriptor, in insertion order.
    /// Carried verbatim into `GatewayAnnouncement.known_services` so a
    /// Service can tell whether the Gateway still knows about it.
    pub fn snapshot(&self) -> Vec<ServiceDescriptor> {
        self.services
            .lock()
            .unwrap()
            .iter()
            .map(|s| s.descriptor.clone())
            .collect()
    }
}
