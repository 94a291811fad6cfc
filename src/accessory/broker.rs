//! Permission Broker
//!
//! Issues authorization prompts to the host and correlates the asynchronous
//! answers with the request that produced them.

use crate::accessory::error::{BrokerError, HostError};
use crate::accessory::host::{AccessoryHost, ListenerGuard, PermissionListener};
use crate::domain::models::{DeviceHandle, PermissionRequest, PermissionResponse, RequestId};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info, warn};

/// Answer to the outstanding request, handed to the completion callback.
#[derive(Debug, Clone)]
pub struct PermissionOutcome {
    pub request_id: RequestId,
    pub granted: bool,
    pub device: Option<DeviceHandle>,
}

pub type Completion = Box<dyn Fn(PermissionOutcome) + Send + Sync>;

/// Outstanding request and release flag, always read and written together.
#[derive(Default)]
struct Slot {
    outstanding: Option<PermissionRequest>,
    released: bool,
}

/// Tracks at most one outstanding permission request.
pub struct PermissionBroker {
    host: Arc<dyn AccessoryHost>,
    slot: Mutex<Slot>,
    registration: Mutex<Option<ListenerGuard>>,
    on_complete: Completion,
}

impl PermissionBroker {
    /// Build a broker that is not listening yet. Used when the completion
    /// callback needs to exist before the broker can be registered.
    pub(crate) fn unregistered(host: Arc<dyn AccessoryHost>, on_complete: Completion) -> Arc<Self> {
        Arc::new(Self {
            host,
            slot: Mutex::new(Slot::default()),
            registration: Mutex::new(None),
            on_complete,
        })
    }

    pub(crate) fn attach(self: &Arc<Self>) -> Result<(), HostError> {
        let listener: Arc<dyn PermissionListener> = self.clone();
        let id = self.host.register_listener(Arc::downgrade(&listener))?;
        debug!("Permission listener registered as {:?}", id);
        *self.registration.lock().unwrap_or_else(|e| e.into_inner()) =
            Some(ListenerGuard::new(self.host.clone(), id));
        Ok(())
    }

    /// Allocate a request for `device` and mark it outstanding without
    /// prompting yet. Answers for the returned id are accepted from now on.
    pub fn reserve(&self, device: &DeviceHandle) -> Result<PermissionRequest, BrokerError> {
        let mut slot = self.slot();
        if slot.released {
            return Err(BrokerError::Released);
        }
        if let Some(pending) = slot.outstanding.as_ref() {
            return Err(BrokerError::RequestOutstanding(pending.request_id));
        }
        let request = PermissionRequest {
            request_id: RequestId::next(),
            device: device.clone(),
        };
        slot.outstanding = Some(request.clone());
        Ok(request)
    }

    /// Show the host prompt for a reserved request. Returns as soon as the
    /// prompt has been issued; the answer arrives through
    /// [`PermissionBroker::on_response`].
    ///
    /// Fails with [`BrokerError::Released`] when the broker was released
    /// before or while the prompt went out.
    pub fn request_permission(&self, request: PermissionRequest) -> Result<RequestId, BrokerError> {
        let request_id = request.request_id;
        if self.slot().released {
            debug!("Not prompting for {}: broker released", request_id);
            return Err(BrokerError::Released);
        }

        info!("Requesting permission {} for {}", request_id, request.device);

        // The host may answer synchronously, so no lock is held here.
        let issued = self.host.request_permission(&request);
        drop(request);

        let mut slot = self.slot();
        if let Err(e) = issued {
            slot.clear(request_id);
            return Err(e.into());
        }
        if slot.released {
            slot.clear(request_id);
            debug!("Broker released while permission {} was issued", request_id);
            return Err(BrokerError::Released);
        }
        Ok(request_id)
    }

    /// Handle an answer from the host event channel.
    ///
    /// Answers for any request other than the outstanding one are dropped, as
    /// are repeated answers for a request that was already settled.
    pub fn on_response(&self, response: PermissionResponse) {
        let matched = {
            let mut slot = self.slot();
            match slot.outstanding.as_ref() {
                Some(pending) if pending.request_id == response.request_id => {
                    slot.outstanding.take()
                }
                _ => None,
            }
        };

        if matched.is_none() {
            debug!(
                "Discarding permission response {} (not outstanding)",
                response.request_id
            );
            return;
        }

        (self.on_complete)(PermissionOutcome {
            request_id: response.request_id,
            granted: response.granted,
            device: response.device,
        });
    }

    /// Unregister from the host and forget any outstanding request.
    /// Only the first call has an effect.
    pub fn release(&self) -> bool {
        let dropped = {
            let mut slot = self.slot();
            if slot.released {
                return false;
            }
            slot.released = true;
            slot.outstanding.take()
        };
        if let Some(dropped) = dropped {
            warn!(
                "Released with permission {} still outstanding",
                dropped.request_id
            );
        }

        if let Some(guard) = self
            .registration
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .as_mut()
        {
            guard.release();
        }
        true
    }

    #[cfg(test)]
    pub fn outstanding(&self) -> Option<RequestId> {
        self.slot().outstanding.as_ref().map(|r| r.request_id)
    }

    fn slot(&self) -> MutexGuard<'_, Slot> {
        self.slot.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Slot {
    /// Forget `request_id` if it is still the outstanding request.
    fn clear(&mut self, request_id: RequestId) {
        if self
            .outstanding
            .as_ref()
            .is_some_and(|r| r.request_id == request_id)
        {
            self.outstanding = None;
        }
    }
}

impl PermissionListener for PermissionBroker {
    fn on_response(&self, response: PermissionResponse) {
        PermissionBroker::on_response(self, response);
    }
}
