//! Attachment Coordinator
//!
//! One coordinator drives one attachment lifecycle:
//!
//! ```text
//! Init ──DirectDevice──────────────────────────────► Terminated (launch)
//!  │
//!  └─GenericSignal─► AwaitingSearch ─┬─ none / error ► Terminated
//!                                    └─ found ─► AwaitingPermission
//!                                                  ├─ granted ► Terminated (launch)
//!                                                  ├─ denied  ► Terminated
//!                                                  └─ cancel  ► Terminated
//! ```
//!
//! All transitions happen under a single mutex. `Terminated` is absorbing and
//! entering it releases the permission listener exactly once.

use crate::accessory::broker::{Completion, PermissionBroker, PermissionOutcome};
use crate::accessory::error::{AttachmentError, HostError};
use crate::accessory::host::{AccessoryHost, ServiceLauncher};
use crate::accessory::resolver::{AccessoryResolver, ResolveResult};
use crate::domain::models::{
    AttachmentEvent, CoordinatorState, DeviceHandle, LauncherEvent, MessageSeverity,
    PermissionRequest, RequestId, StatusMessage,
};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

/// How a coordinator ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Termination {
    Launched(DeviceHandle),
    Failed(AttachmentError),
}

#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    /// Optional channel for user-facing status updates.
    pub events: Option<mpsc::UnboundedSender<LauncherEvent>>,
    /// Announce accessories the host delivers directly.
    pub notify_on_detect: bool,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            events: None,
            notify_on_detect: true,
        }
    }
}

struct Inner {
    state: CoordinatorState,
    pending: Option<RequestId>,
    termination: Option<Termination>,
}

/// What `handle_event` does once the state lock is dropped.
enum Next {
    Launch(DeviceHandle),
    Request(PermissionRequest),
    Fail(AttachmentError),
}

pub struct AttachmentCoordinator {
    resolver: AccessoryResolver,
    broker: Arc<PermissionBroker>,
    launcher: Arc<dyn ServiceLauncher>,
    inner: Mutex<Inner>,
    state_tx: watch::Sender<CoordinatorState>,
    config: CoordinatorConfig,
}

impl AttachmentCoordinator {
    pub fn new(
        host: Arc<dyn AccessoryHost>,
        launcher: Arc<dyn ServiceLauncher>,
    ) -> Result<Arc<Self>, HostError> {
        Self::with_config(host, launcher, CoordinatorConfig::default())
    }

    /// Build a coordinator and register its permission listener with the host.
    pub fn with_config(
        host: Arc<dyn AccessoryHost>,
        launcher: Arc<dyn ServiceLauncher>,
        config: CoordinatorConfig,
    ) -> Result<Arc<Self>, HostError> {
        let coordinator = Arc::new_cyclic(|weak: &Weak<Self>| {
            let weak = weak.clone();
            let on_complete: Completion = Box::new(move |outcome| {
                // A coordinator that is already gone has nothing left to decide.
                if let Some(coordinator) = weak.upgrade() {
                    coordinator.on_permission(outcome);
                }
            });
            let (state_tx, _) = watch::channel(CoordinatorState::Init);

            Self {
                resolver: AccessoryResolver::new(host.clone()),
                broker: PermissionBroker::unregistered(host, on_complete),
                launcher,
                inner: Mutex::new(Inner {
                    state: CoordinatorState::Init,
                    pending: None,
                    termination: None,
                }),
                state_tx,
                config,
            }
        });

        coordinator.broker.attach()?;
        info!("Accessory launcher coordinator started");
        Ok(coordinator)
    }

    /// Feed the attachment event that started this lifecycle.
    ///
    /// Returns the state the coordinator settled in, or the terminal error when
    /// the attempt ended without a launch. Events arriving after the first are
    /// ignored.
    pub fn handle_event(
        &self,
        event: AttachmentEvent,
    ) -> Result<CoordinatorState, AttachmentError> {
        let next = {
            let mut inner = self.lock();
            if inner.state != CoordinatorState::Init {
                debug!("Ignoring {:?} in state {:?}", event, inner.state);
                return Ok(inner.state);
            }
            if let AttachmentEvent::GenericSignal = event {
                self.set_state(&mut inner, CoordinatorState::AwaitingSearch);
            }

            let next = match self.resolver.resolve(&event) {
                ResolveResult::Resolved(device) => {
                    if self.config.notify_on_detect {
                        self.send_log(
                            &format!("Accessory detected: {}", device),
                            MessageSeverity::Info,
                        );
                    }
                    self.terminate(&mut inner, Termination::Launched(device.clone()));
                    Next::Launch(device)
                }
                ResolveResult::NeedsPermission(device) => {
                    self.set_state(&mut inner, CoordinatorState::AwaitingPermission);
                    // Reserved under the state lock so the pending id is known
                    // before any answer can arrive.
                    match self.broker.reserve(&device) {
                        Ok(request) => {
                            inner.pending = Some(request.request_id);
                            Next::Request(request)
                        }
                        Err(e) => {
                            error!("Could not reserve a permission request: {}", e);
                            Next::Fail(AttachmentError::RequestFailed(e))
                        }
                    }
                }
                ResolveResult::NotFound => {
                    info!("Exiting launcher: no accessories found");
                    self.send_log("No accessory found", MessageSeverity::Warning);
                    Next::Fail(AttachmentError::NotFound)
                }
                ResolveResult::QueryError(e) => {
                    error!("Accessory query failed: {}", e);
                    self.send_log(
                        &format!("Accessory query failed: {}", e),
                        MessageSeverity::Error,
                    );
                    Next::Fail(AttachmentError::Query(e))
                }
            };
            if let Next::Fail(err) = &next {
                self.terminate(&mut inner, Termination::Failed(err.clone()));
            }
            next
        };

        match next {
            Next::Launch(device) => {
                self.launch(&device);
                Ok(CoordinatorState::Terminated)
            }
            // The lock is released: the host may answer the prompt before
            // request_permission returns.
            Next::Request(request) => self.request_permission(request),
            Next::Fail(err) => Err(err),
        }
    }

    fn request_permission(
        &self,
        request: PermissionRequest,
    ) -> Result<CoordinatorState, AttachmentError> {
        self.send_log(
            &format!("Requesting access to {}", request.device),
            MessageSeverity::Info,
        );
        // The broker drops our copy of the candidate once the prompt is out.
        let requested = self.broker.request_permission(request);

        let mut inner = self.lock();
        match requested {
            Ok(_) => Ok(inner.state),
            Err(e) if inner.state == CoordinatorState::AwaitingPermission => {
                error!("Could not request permission: {}", e);
                let err = AttachmentError::RequestFailed(e);
                self.terminate(&mut inner, Termination::Failed(err.clone()));
                Err(err)
            }
            // Settled while the prompt was being issued.
            Err(_) => match &inner.termination {
                Some(Termination::Failed(err)) => Err(err.clone()),
                _ => Ok(inner.state),
            },
        }
    }

    fn on_permission(&self, outcome: PermissionOutcome) {
        let launch = {
            let mut inner = self.lock();
            if inner.state != CoordinatorState::AwaitingPermission {
                debug!(
                    "Ignoring permission {} in state {:?}",
                    outcome.request_id, inner.state
                );
                return;
            }
            if inner.pending != Some(outcome.request_id) {
                debug!(
                    "Ignoring permission {} while awaiting {:?}",
                    outcome.request_id, inner.pending
                );
                return;
            }

            match (outcome.granted, outcome.device) {
                (true, Some(device)) => {
                    info!("Permission {} granted for {}", outcome.request_id, device);
                    self.terminate(&mut inner, Termination::Launched(device.clone()));
                    Some(device)
                }
                (true, None) => {
                    warn!(
                        "Exiting launcher: permission {} granted but no device returned",
                        outcome.request_id
                    );
                    self.send_log(
                        "Permission granted without an accessory",
                        MessageSeverity::Warning,
                    );
                    self.terminate(
                        &mut inner,
                        Termination::Failed(AttachmentError::AnomalousGrant(outcome.request_id)),
                    );
                    None
                }
                (false, _) => {
                    info!("Exiting launcher: permission {} denied", outcome.request_id);
                    self.send_log("Permission denied", MessageSeverity::Info);
                    self.terminate(
                        &mut inner,
                        Termination::Failed(AttachmentError::PermissionDenied),
                    );
                    None
                }
            }
        };

        if let Some(device) = launch {
            self.launch(&device);
        }
    }

    /// Force the coordinator into `Terminated`. Returns false when it was
    /// already there.
    pub fn cancel(&self) -> bool {
        let mut inner = self.lock();
        if inner.state == CoordinatorState::Terminated {
            return false;
        }
        info!("Cancelling launcher in state {:?}", inner.state);
        self.terminate(&mut inner, Termination::Failed(AttachmentError::Cancelled));
        true
    }

    pub fn state(&self) -> CoordinatorState {
        self.lock().state
    }

    pub fn termination(&self) -> Option<Termination> {
        self.lock().termination.clone()
    }

    /// Request id of the prompt currently awaiting an answer.
    #[cfg(test)]
    pub fn pending_request(&self) -> Option<RequestId> {
        self.lock().pending
    }

    pub fn subscribe(&self) -> watch::Receiver<CoordinatorState> {
        self.state_tx.subscribe()
    }

    /// Wait until the coordinator has terminated and report how.
    pub async fn terminated(&self) -> Termination {
        let mut rx = self.subscribe();
        // The sender lives as long as `self`, so this cannot fail.
        let _ = rx.wait_for(|s| *s == CoordinatorState::Terminated).await;
        self.termination()
            .unwrap_or(Termination::Failed(AttachmentError::Cancelled))
    }

    fn terminate(&self, inner: &mut Inner, termination: Termination) {
        debug!("Terminating: {:?}", termination);
        inner.pending = None;
        inner.termination = Some(termination);
        self.broker.release();
        self.set_state(inner, CoordinatorState::Terminated);
    }

    fn set_state(&self, inner: &mut Inner, state: CoordinatorState) {
        inner.state = state;
        self.state_tx.send_replace(state);
        if let Some(events) = &self.config.events {
            let _ = events.send(LauncherEvent::StateChanged(state));
        }
    }

    fn launch(&self, device: &DeviceHandle) {
        info!("Launching device service for {}", device);
        self.send_log(
            &format!("Starting service for {}", device),
            MessageSeverity::Success,
        );
        self.launcher.launch(device);
    }

    fn send_log(&self, message: &str, severity: MessageSeverity) {
        if let Some(events) = &self.config.events {
            let _ = events.send(LauncherEvent::LogMessage(StatusMessage {
                message: message.to_string(),
                severity,
            }));
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Drop for AttachmentCoordinator {
    fn drop(&mut self) {
        // Losing the owner is a teardown signal like any other.
        self.cancel();
    }
}
