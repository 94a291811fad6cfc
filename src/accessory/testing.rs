//! In-memory host and launcher used by unit tests.

use crate::accessory::error::HostError;
use crate::accessory::host::{AccessoryHost, ListenerId, PermissionListener, ServiceLauncher};
use crate::domain::models::{
    AccessoryDescriptor, DeviceHandle, PermissionRequest, PermissionResponse,
};
use std::sync::{Arc, Mutex, Weak};

pub fn device(model: &str) -> DeviceHandle {
    DeviceHandle::new(AccessoryDescriptor::new("Platypus", model))
}

type PromptHook = Arc<dyn Fn(&PermissionRequest) + Send + Sync>;

#[derive(Default)]
pub struct FakeHost {
    accessories: Mutex<Vec<DeviceHandle>>,
    query_error: Mutex<Option<String>>,
    prompt_error: Mutex<Option<String>>,
    requests: Mutex<Vec<PermissionRequest>>,
    listeners: Mutex<Vec<(ListenerId, Weak<dyn PermissionListener>)>>,
    next_listener: Mutex<u64>,
    unregistered: Mutex<Vec<ListenerId>>,
    queries: Mutex<usize>,
    prompt_hook: Mutex<Option<PromptHook>>,
}

impl FakeHost {
    pub fn with_accessories(accessories: Vec<DeviceHandle>) -> Arc<Self> {
        let host = Self::default();
        *host.accessories.lock().unwrap() = accessories;
        Arc::new(host)
    }

    pub fn failing_query(reason: &str) -> Arc<Self> {
        let host = Self::default();
        *host.query_error.lock().unwrap() = Some(reason.to_string());
        Arc::new(host)
    }

    pub fn refuse_prompts(&self, reason: &str) {
        *self.prompt_error.lock().unwrap() = Some(reason.to_string());
    }

    /// Run `hook` inside `request_permission`, after the prompt is recorded
    /// and before it returns. No host lock is held while it runs.
    pub fn on_prompt(&self, hook: impl Fn(&PermissionRequest) + Send + Sync + 'static) {
        *self.prompt_hook.lock().unwrap() = Some(Arc::new(hook));
    }

    /// Answer every prompt before `request_permission` returns.
    pub fn answer_synchronously(self: &Arc<Self>, granted: bool) {
        let host = Arc::downgrade(self);
        self.on_prompt(move |request| {
            if let Some(host) = host.upgrade() {
                host.respond(PermissionResponse {
                    request_id: request.request_id,
                    granted,
                    device: granted.then(|| request.device.clone()),
                });
            }
        });
    }

    pub fn requests(&self) -> Vec<PermissionRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn last_request(&self) -> PermissionRequest {
        self.requests().last().cloned().expect("no permission request issued")
    }

    pub fn query_count(&self) -> usize {
        *self.queries.lock().unwrap()
    }

    pub fn registered(&self) -> usize {
        self.listeners.lock().unwrap().len()
    }

    pub fn unregistered(&self) -> Vec<ListenerId> {
        self.unregistered.lock().unwrap().clone()
    }

    /// Broadcast a response to every registered listener, like a host
    /// event channel would.
    pub fn respond(&self, response: PermissionResponse) {
        let listeners: Vec<_> = self
            .listeners
            .lock()
            .unwrap()
            .iter()
            .filter_map(|(_, l)| l.upgrade())
            .collect();
        for listener in listeners {
            listener.on_response(response.clone());
        }
    }
}

impl AccessoryHost for FakeHost {
    fn accessory_list(&self) -> Result<Vec<DeviceHandle>, HostError> {
        *self.queries.lock().unwrap() += 1;
        if let Some(reason) = self.query_error.lock().unwrap().clone() {
            return Err(HostError::Query(reason));
        }
        Ok(self.accessories.lock().unwrap().clone())
    }

    fn request_permission(&self, request: &PermissionRequest) -> Result<(), HostError> {
        if let Some(reason) = self.prompt_error.lock().unwrap().clone() {
            return Err(HostError::PermissionPrompt(reason));
        }
        self.requests.lock().unwrap().push(request.clone());
        let hook = self.prompt_hook.lock().unwrap().clone();
        if let Some(hook) = hook {
            hook(request);
        }
        Ok(())
    }

    fn register_listener(
        &self,
        listener: Weak<dyn PermissionListener>,
    ) -> Result<ListenerId, HostError> {
        let mut next = self.next_listener.lock().unwrap();
        *next += 1;
        let id = ListenerId(*next);
        self.listeners.lock().unwrap().push((id, listener));
        Ok(id)
    }

    fn unregister_listener(&self, id: ListenerId) {
        self.listeners.lock().unwrap().retain(|(l, _)| *l != id);
        self.unregistered.lock().unwrap().push(id);
    }
}

#[derive(Default)]
pub struct RecordingLauncher {
    launched: Mutex<Vec<DeviceHandle>>,
}

impl RecordingLauncher {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn launched(&self) -> Vec<DeviceHandle> {
        self.launched.lock().unwrap().clone()
    }
}

impl ServiceLauncher for RecordingLauncher {
    fn launch(&self, device: &DeviceHandle) {
        self.launched.lock().unwrap().push(device.clone());
    }
}
