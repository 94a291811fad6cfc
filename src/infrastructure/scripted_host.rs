//! Scripted Host
//!
//! An [`AccessoryHost`] driven by a JSON scenario instead of real hardware.
//! Permission prompts are answered from a tokio task after the scripted
//! delay, so answers arrive on a different thread than the request.

use crate::accessory::error::HostError;
use crate::accessory::host::{AccessoryHost, ListenerId, PermissionListener};
use crate::domain::models::{
    AccessoryDescriptor, AttachmentEvent, DeviceHandle, PermissionRequest, PermissionResponse,
};
use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;
use tokio::runtime::Handle;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Delivery {
    /// The host hands the first attached accessory straight to us.
    Direct,
    /// The host only signals that something was attached.
    Search,
}

/// The simulated user's answer to the permission prompt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScriptedAnswer {
    pub granted: bool,
    #[serde(default = "default_true")]
    pub return_device: bool,
    #[serde(default)]
    pub delay_ms: u64,
    /// Deliver the same answer this many times.
    #[serde(default = "default_repeat")]
    pub repeat: u32,
}

fn default_true() -> bool {
    true
}
fn default_repeat() -> u32 {
    1
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Scenario {
    #[serde(default)]
    pub attached: Vec<AccessoryDescriptor>,
    pub delivery: Delivery,
    /// `None` leaves the prompt unanswered.
    #[serde(default)]
    pub answer: Option<ScriptedAnswer>,
    /// Make the accessory query fail with this message.
    #[serde(default)]
    pub query_error: Option<String>,
    /// Refuse to show the permission prompt.
    #[serde(default)]
    pub prompt_error: Option<String>,
    /// Refuse to register permission listeners.
    #[serde(default)]
    pub listener_error: Option<String>,
}

impl Default for Scenario {
    fn default() -> Self {
        Self {
            attached: vec![AccessoryDescriptor::new("Platypus", "Control Board")],
            delivery: Delivery::Search,
            answer: Some(ScriptedAnswer {
                granted: true,
                return_device: true,
                delay_ms: 200,
                repeat: 1,
            }),
            query_error: None,
            prompt_error: None,
            listener_error: None,
        }
    }
}

impl Scenario {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read scenario {}", path.display()))?;
        serde_json::from_str(&contents)
            .with_context(|| format!("Invalid scenario {}", path.display()))
    }
}

type Listeners = Mutex<HashMap<ListenerId, Weak<dyn PermissionListener>>>;

pub struct ScriptedHost {
    scenario: Scenario,
    accessories: Vec<DeviceHandle>,
    listeners: Arc<Listeners>,
    next_listener: AtomicU64,
    runtime: Handle,
}

impl ScriptedHost {
    /// Must be called from within a tokio runtime.
    pub fn new(scenario: Scenario) -> anyhow::Result<Self> {
        if scenario.delivery == Delivery::Direct && scenario.attached.is_empty() {
            anyhow::bail!("Direct delivery needs at least one attached accessory");
        }
        let runtime = Handle::try_current().context("Scripted host needs a tokio runtime")?;
        let accessories = scenario
            .attached
            .iter()
            .cloned()
            .map(DeviceHandle::new)
            .collect();

        Ok(Self {
            scenario,
            accessories,
            listeners: Arc::new(Mutex::new(HashMap::new())),
            next_listener: AtomicU64::new(1),
            runtime,
        })
    }

    /// The event the host delivers for this scenario.
    pub fn attachment_event(&self) -> AttachmentEvent {
        match (self.scenario.delivery, self.accessories.first()) {
            (Delivery::Direct, Some(first)) => AttachmentEvent::DirectDevice(first.clone()),
            _ => AttachmentEvent::GenericSignal,
        }
    }

    #[cfg(test)]
    pub fn listener_count(&self) -> usize {
        self.listeners.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

fn broadcast(listeners: &Listeners, response: PermissionResponse) {
    let live: Vec<_> = listeners
        .lock()
        .unwrap_or_else(|e| e.into_inner())
        .values()
        .filter_map(Weak::upgrade)
        .collect();
    debug!(
        "Delivering permission response {} to {} listeners",
        response.request_id,
        live.len()
    );
    for listener in live {
        listener.on_response(response.clone());
    }
}

impl AccessoryHost for ScriptedHost {
    fn accessory_list(&self) -> Result<Vec<DeviceHandle>, HostError> {
        if let Some(reason) = &self.scenario.query_error {
            return Err(HostError::Query(reason.clone()));
        }
        Ok(self.accessories.clone())
    }

    fn request_permission(&self, request: &PermissionRequest) -> Result<(), HostError> {
        if let Some(reason) = &self.scenario.prompt_error {
            return Err(HostError::PermissionPrompt(reason.clone()));
        }
        info!("Permission prompt shown for {}", request.device);

        let Some(answer) = self.scenario.answer.clone() else {
            warn!("Scenario leaves permission {} unanswered", request.request_id);
            return Ok(());
        };

        let response = PermissionResponse {
            request_id: request.request_id,
            granted: answer.granted,
            device: answer.return_device.then(|| request.device.clone()),
        };
        let listeners = self.listeners.clone();
        self.runtime.spawn(async move {
            tokio::time::sleep(Duration::from_millis(answer.delay_ms)).await;
            for _ in 0..answer.repeat {
                broadcast(&listeners, response.clone());
            }
        });

        Ok(())
    }

    fn register_listener(
        &self,
        listener: Weak<dyn PermissionListener>,
    ) -> Result<ListenerId, HostError> {
        if let Some(reason) = &self.scenario.listener_error {
            return Err(HostError::Registration(reason.clone()));
        }
        let id = ListenerId(self.next_listener.fetch_add(1, Ordering::Relaxed));
        self.listeners
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(id, listener);
        Ok(id)
    }

    fn unregister_listener(&self, id: ListenerId) {
        let removed = self
            .listeners
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&id);
        if removed.is_none() {
            warn!("Listener {:?} was not registered", id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accessory::error::BrokerError;
    use crate::accessory::testing::RecordingLauncher;
    use crate::accessory::{AttachmentCoordinator, AttachmentError, Termination};
    use crate::domain::models::CoordinatorState;

    fn scenario(answer: Option<ScriptedAnswer>) -> Scenario {
        Scenario {
            attached: vec![
                AccessoryDescriptor::new("Platypus", "Control Board").with_serial("D2"),
                AccessoryDescriptor::new("Other", "Dock").with_serial("D3"),
            ],
            delivery: Delivery::Search,
            answer,
            query_error: None,
            prompt_error: None,
            listener_error: None,
        }
    }

    fn answer(granted: bool, repeat: u32) -> Option<ScriptedAnswer> {
        Some(ScriptedAnswer {
            granted,
            return_device: true,
            delay_ms: 10,
            repeat,
        })
    }

    #[test]
    fn test_parse_scenario() {
        let json = r#"{
            "attached": [{ "manufacturer": "Platypus", "model": "Control Board" }],
            "delivery": "direct"
        }"#;
        let scenario: Scenario = serde_json::from_str(json).unwrap();
        assert_eq!(scenario.delivery, Delivery::Direct);
        assert!(scenario.answer.is_none());
        assert_eq!(scenario.attached[0].serial, None);
    }

    #[test]
    fn test_demo_scenarios_parse() {
        let demos = [
            include_str!("../../demos/search_granted.json"),
            include_str!("../../demos/search_denied.json"),
            include_str!("../../demos/direct.json"),
            include_str!("../../demos/unanswered.json"),
            include_str!("../../demos/query_error.json"),
            include_str!("../../demos/prompt_refused.json"),
        ];
        for demo in demos {
            let scenario: Scenario = serde_json::from_str(demo).unwrap();
            assert!(scenario.delivery == Delivery::Search || !scenario.attached.is_empty());
        }
    }

    #[tokio::test]
    async fn test_direct_delivery_without_accessory_is_rejected() {
        let scenario = Scenario {
            attached: Vec::new(),
            delivery: Delivery::Direct,
            answer: None,
            query_error: None,
            prompt_error: None,
            listener_error: None,
        };
        assert!(ScriptedHost::new(scenario).is_err());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_granted_answer_launches_first_accessory() {
        let host = Arc::new(ScriptedHost::new(scenario(answer(true, 2))).unwrap());
        let launcher = RecordingLauncher::new();
        let coordinator = AttachmentCoordinator::new(host.clone(), launcher.clone()).unwrap();

        let state = coordinator.handle_event(host.attachment_event()).unwrap();
        assert_eq!(state, CoordinatorState::AwaitingPermission);

        match coordinator.terminated().await {
            Termination::Launched(device) => {
                assert_eq!(device.descriptor().serial.as_deref(), Some("D2"))
            }
            other => panic!("unexpected termination: {:?}", other),
        }
        // Let the repeated answer arrive too.
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(launcher.launched().len(), 1);
        assert_eq!(host.listener_count(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_denied_answer_terminates_without_launch() {
        let host = Arc::new(ScriptedHost::new(scenario(answer(false, 1))).unwrap());
        let launcher = RecordingLauncher::new();
        let coordinator = AttachmentCoordinator::new(host.clone(), launcher.clone()).unwrap();

        coordinator.handle_event(host.attachment_event()).unwrap();

        assert_eq!(
            coordinator.terminated().await,
            Termination::Failed(AttachmentError::PermissionDenied)
        );
        assert!(launcher.launched().is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_unanswered_prompt_can_be_cancelled() {
        let host = Arc::new(ScriptedHost::new(scenario(None)).unwrap());
        let launcher = RecordingLauncher::new();
        let coordinator = AttachmentCoordinator::new(host.clone(), launcher.clone()).unwrap();
        coordinator.handle_event(host.attachment_event()).unwrap();

        assert_eq!(host.listener_count(), 1);
        assert!(coordinator.cancel());

        assert_eq!(
            coordinator.terminated().await,
            Termination::Failed(AttachmentError::Cancelled)
        );
        assert_eq!(host.listener_count(), 0);
        assert!(launcher.launched().is_empty());
    }

    #[tokio::test]
    async fn test_query_error_surfaces() {
        let mut s = scenario(None);
        s.query_error = Some("usb manager unavailable".to_string());
        let host = Arc::new(ScriptedHost::new(s).unwrap());
        let launcher = RecordingLauncher::new();
        let coordinator = AttachmentCoordinator::new(host.clone(), launcher).unwrap();

        let err = coordinator.handle_event(host.attachment_event()).unwrap_err();
        assert!(matches!(err, AttachmentError::Query(_)));
        assert_eq!(host.listener_count(), 0);
    }

    #[tokio::test]
    async fn test_refused_prompt_fails_request() {
        let mut s = scenario(answer(true, 1));
        s.prompt_error = Some("no display".to_string());
        let host = Arc::new(ScriptedHost::new(s).unwrap());
        let launcher = RecordingLauncher::new();
        let coordinator = AttachmentCoordinator::new(host.clone(), launcher.clone()).unwrap();

        let err = coordinator.handle_event(host.attachment_event()).unwrap_err();
        assert_eq!(
            err,
            AttachmentError::RequestFailed(BrokerError::Host(HostError::PermissionPrompt(
                "no display".to_string()
            )))
        );
        assert_eq!(host.listener_count(), 0);
        assert!(launcher.launched().is_empty());
    }

    #[tokio::test]
    async fn test_refused_listener_fails_construction() {
        let mut s = scenario(answer(true, 1));
        s.listener_error = Some("receiver limit".to_string());
        let host = Arc::new(ScriptedHost::new(s).unwrap());

        let err = AttachmentCoordinator::new(host.clone(), RecordingLauncher::new())
            .err()
            .unwrap();
        assert_eq!(err, HostError::Registration("receiver limit".to_string()));
        assert_eq!(host.listener_count(), 0);
    }
}
