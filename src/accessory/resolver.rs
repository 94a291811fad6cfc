//! Accessory Resolver
//!
//! Decides whether an attachment event already carries a usable accessory or
//! whether we have to look one up and ask for access.

use crate::accessory::error::HostError;
use crate::accessory::host::AccessoryHost;
use crate::domain::models::{AttachmentEvent, DeviceHandle};
use std::sync::Arc;
use tracing::{debug, info};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolveResult {
    /// Delivered directly by the host; access is already granted.
    Resolved(DeviceHandle),
    NotFound,
    NeedsPermission(DeviceHandle),
    QueryError(HostError),
}

pub struct AccessoryResolver {
    host: Arc<dyn AccessoryHost>,
}

impl AccessoryResolver {
    pub fn new(host: Arc<dyn AccessoryHost>) -> Self {
        Self { host }
    }

    /// Resolve an attachment event to an accessory.
    ///
    /// When searching, the first accessory the host lists wins. There is no
    /// filtering by device type.
    pub fn resolve(&self, event: &AttachmentEvent) -> ResolveResult {
        match event {
            AttachmentEvent::DirectDevice(handle) => {
                debug!("Accessory delivered directly: {}", handle);
                ResolveResult::Resolved(handle.clone())
            }
            AttachmentEvent::GenericSignal => match self.host.accessory_list() {
                Ok(accessories) => {
                    info!("Host lists {} attached accessories", accessories.len());
                    match accessories.into_iter().next() {
                        Some(first) => ResolveResult::NeedsPermission(first),
                        None => ResolveResult::NotFound,
                    }
                }
                Err(e) => ResolveResult::QueryError(e),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accessory::testing::{device, FakeHost};

    #[test]
    fn test_direct_device_skips_query() {
        let host = FakeHost::with_accessories(vec![device("Other")]);
        let resolver = AccessoryResolver::new(host.clone());
        let d1 = device("D1");

        let result = resolver.resolve(&AttachmentEvent::DirectDevice(d1.clone()));

        match result {
            ResolveResult::Resolved(h) => assert!(h.same_device(&d1)),
            other => panic!("unexpected result: {:?}", other),
        }
        assert_eq!(host.query_count(), 0);
    }

    #[test]
    fn test_generic_signal_without_accessories() {
        let host = FakeHost::with_accessories(Vec::new());
        let resolver = AccessoryResolver::new(host.clone());

        assert_eq!(
            resolver.resolve(&AttachmentEvent::GenericSignal),
            ResolveResult::NotFound
        );
        assert_eq!(host.query_count(), 1);
    }

    #[test]
    fn test_first_accessory_wins() {
        let d2 = device("D2");
        let d3 = device("D3");
        let host = FakeHost::with_accessories(vec![d2.clone(), d3]);
        let resolver = AccessoryResolver::new(host);

        match resolver.resolve(&AttachmentEvent::GenericSignal) {
            ResolveResult::NeedsPermission(h) => assert!(h.same_device(&d2)),
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn test_query_failure_is_reported() {
        let host = FakeHost::failing_query("usb service unavailable");
        let resolver = AccessoryResolver::new(host);

        assert_eq!(
            resolver.resolve(&AttachmentEvent::GenericSignal),
            ResolveResult::QueryError(HostError::Query("usb service unavailable".to_string()))
        );
    }
}
