//! Seams between the coordinator and the environment it runs in.

use crate::accessory::error::HostError;
use crate::domain::models::{DeviceHandle, PermissionRequest, PermissionResponse};
use std::sync::{Arc, Weak};
use tracing::{debug, warn};

/// Identifies one listener registration with a host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(pub u64);

/// Receives permission responses from the host event channel.
///
/// Called at an arbitrary time, possibly from a thread other than the one that
/// issued the request.
pub trait PermissionListener: Send + Sync {
    fn on_response(&self, response: PermissionResponse);
}

/// The host environment that owns attached accessories.
pub trait AccessoryHost: Send + Sync {
    /// Accessories currently attached, in host order.
    fn accessory_list(&self) -> Result<Vec<DeviceHandle>, HostError>;

    /// Show the authorization prompt. Must not block on the user's answer;
    /// the answer arrives later through every registered listener.
    fn request_permission(&self, request: &PermissionRequest) -> Result<(), HostError>;

    /// The host keeps only a weak reference to the listener.
    fn register_listener(&self, listener: Weak<dyn PermissionListener>)
        -> Result<ListenerId, HostError>;

    fn unregister_listener(&self, id: ListenerId);
}

/// Takes ownership of an authorized accessory.
pub trait ServiceLauncher: Send + Sync {
    /// Fire and forget; the coordinator never inspects the result.
    fn launch(&self, device: &DeviceHandle);
}

/// A listener registration that must be released exactly once.
///
/// Release is explicit. Dropping a guard that was never released still
/// unregisters, but logs it as a leak.
pub struct ListenerGuard {
    host: Arc<dyn AccessoryHost>,
    id: Option<ListenerId>,
}

impl ListenerGuard {
    pub fn new(host: Arc<dyn AccessoryHost>, id: ListenerId) -> Self {
        Self { host, id: Some(id) }
    }

    /// Unregister from the host. Returns false if already released.
    pub fn release(&mut self) -> bool {
        match self.id.take() {
            Some(id) => {
                debug!("Unregistering permission listener {:?}", id);
                self.host.unregister_listener(id);
                true
            }
            None => false,
        }
    }
}

impl Drop for ListenerGuard {
    fn drop(&mut self) {
        if let Some(id) = self.id {
            warn!("Permission listener {:?} dropped without release", id);
            self.release();
        }
    }
}
