//! Service Launcher
//!
//! Starts the long-running device service as a separate process and hands it
//! the accessory through environment variables.

use crate::accessory::ServiceLauncher;
use crate::domain::models::{
    AccessoryDescriptor, DeviceHandle, LauncherEvent, MessageSeverity, StatusMessage,
};
use crate::domain::settings::ServiceSettings;
use std::process::{Command, Stdio};
use tokio::sync::mpsc;
use tracing::{error, info, warn};

pub struct CommandLauncher {
    settings: ServiceSettings,
    event_sender: Option<mpsc::UnboundedSender<LauncherEvent>>,
}

impl CommandLauncher {
    pub fn new(
        settings: ServiceSettings,
        event_sender: Option<mpsc::UnboundedSender<LauncherEvent>>,
    ) -> Self {
        Self {
            settings,
            event_sender,
        }
    }

    /// Spawn the service without waiting for it. Returns the child's pid.
    pub fn spawn(&self, device: &DeviceHandle) -> anyhow::Result<u32> {
        if self.settings.program.is_empty() {
            anyhow::bail!("No service program configured");
        }

        let child = Command::new(&self.settings.program)
            .args(&self.settings.args)
            .envs(accessory_env(&self.settings.env_prefix, device.descriptor()))
            .stdin(Stdio::null())
            .spawn()?;

        Ok(child.id())
    }

    fn send_log(&self, message: String, severity: MessageSeverity) {
        if let Some(sender) = &self.event_sender {
            let _ = sender.send(LauncherEvent::LogMessage(StatusMessage { message, severity }));
        }
    }
}

impl ServiceLauncher for CommandLauncher {
    fn launch(&self, device: &DeviceHandle) {
        match self.spawn(device) {
            Ok(pid) => {
                info!(
                    "Started {} (pid {}) for {}",
                    self.settings.program, pid, device
                );
            }
            Err(e) if self.settings.program.is_empty() => {
                warn!("{}; {} left unclaimed", e, device);
                self.send_log(format!("{}", e), MessageSeverity::Warning);
            }
            Err(e) => {
                error!("Failed to start {}: {}", self.settings.program, e);
                self.send_log(
                    format!("Failed to start device service: {}", e),
                    MessageSeverity::Error,
                );
            }
        }
    }
}

/// Environment handed to the service, e.g. `ACCESSORY_MODEL=Control Board`.
pub fn accessory_env(prefix: &str, descriptor: &AccessoryDescriptor) -> Vec<(String, String)> {
    let fields = [
        ("MANUFACTURER", Some(&descriptor.manufacturer)),
        ("MODEL", Some(&descriptor.model)),
        ("DESCRIPTION", descriptor.description.as_ref()),
        ("VERSION", descriptor.version.as_ref()),
        ("URI", descriptor.uri.as_ref()),
        ("SERIAL", descriptor.serial.as_ref()),
    ];

    fields
        .into_iter()
        .filter_map(|(key, value)| value.map(|v| (format!("{}{}", prefix, key), v.clone())))
        .collect()
}
