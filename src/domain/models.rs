use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Identification strings a host reports for an attached accessory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessoryDescriptor {
    pub manufacturer: String,
    pub model: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub uri: Option<String>,
    #[serde(default)]
    pub serial: Option<String>,
}

impl AccessoryDescriptor {
    pub fn new(manufacturer: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            manufacturer: manufacturer.into(),
            model: model.into(),
            description: None,
            version: None,
            uri: None,
            serial: None,
        }
    }

    #[cfg(test)]
    pub fn with_serial(mut self, serial: impl Into<String>) -> Self {
        self.serial = Some(serial.into());
        self
    }
}

/// Shared, non-owning reference to an accessory owned by the host.
///
/// Cloning hands out another reference to the same accessory; nothing in this
/// crate ever closes or frees the underlying device.
#[derive(Clone, PartialEq, Eq)]
pub struct DeviceHandle(Arc<AccessoryDescriptor>);

impl DeviceHandle {
    pub fn new(descriptor: AccessoryDescriptor) -> Self {
        Self(Arc::new(descriptor))
    }

    pub fn descriptor(&self) -> &AccessoryDescriptor {
        &self.0
    }

    /// True when both handles refer to the very same host object.
    #[cfg(test)]
    pub fn same_device(&self, other: &DeviceHandle) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl fmt::Debug for DeviceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DeviceHandle({})", self)
    }
}

impl fmt::Display for DeviceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let d = self.descriptor();
        write!(f, "{} {}", d.manufacturer, d.model)?;
        if let Some(serial) = &d.serial {
            write!(f, " [{}]", serial)?;
        }
        Ok(())
    }
}

/// Notification delivered once by the host when an accessory connects.
#[derive(Debug, Clone)]
pub enum AttachmentEvent {
    /// The host handed us the accessory; access is implied.
    DirectDevice(DeviceHandle),
    /// Something was attached; we must search and ask for access.
    GenericSignal,
}

/// Process-wide unique identifier of a permission request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RequestId(u64);

static NEXT_REQUEST_ID: AtomicU64 = AtomicU64::new(1);

impl RequestId {
    pub fn next() -> Self {
        Self(NEXT_REQUEST_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone)]
pub struct PermissionRequest {
    pub request_id: RequestId,
    pub device: DeviceHandle,
}

#[derive(Debug, Clone)]
pub struct PermissionResponse {
    pub request_id: RequestId,
    pub granted: bool,
    pub device: Option<DeviceHandle>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoordinatorState {
    Init,
    AwaitingSearch,
    AwaitingPermission,
    Terminated,
}

#[derive(Debug, Clone)]
pub enum LauncherEvent {
    StateChanged(CoordinatorState),
    LogMessage(StatusMessage),
}

#[derive(Debug, Clone)]
pub struct StatusMessage {
    pub message: String,
    pub severity: MessageSeverity,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageSeverity {
    Info,
    Success,
    Warning,
    Error,
}
