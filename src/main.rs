mod accessory;
mod domain;
mod infrastructure;

use crate::accessory::{AttachmentCoordinator, AttachmentError, CoordinatorConfig, Termination};
use crate::domain::models::{LauncherEvent, MessageSeverity};
use crate::domain::settings::{Settings, SettingsService};
use crate::infrastructure::launcher::CommandLauncher;
use crate::infrastructure::logging::init_logger;
use crate::infrastructure::scripted_host::{Scenario, ScriptedHost};
use anyhow::Context;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

fn main() -> anyhow::Result<ExitCode> {
    let settings_service = SettingsService::new()?;
    let settings = settings_service.get().clone();

    let _logging_guard = init_logger(&settings.log_settings)
        .map_err(|e| eprintln!("Failed to initialize logging: {}", e))
        .ok();

    info!(
        "Starting accessory launcher (settings: {})",
        settings_service.path().display()
    );
    if !settings_service.path().exists() {
        // Leave an editable file behind on first run.
        match settings_service.save() {
            Ok(()) => info!("Wrote default settings"),
            Err(e) => warn!("Could not write default settings: {}", e),
        }
    }

    let scenario = match std::env::args_os().nth(1).map(PathBuf::from) {
        Some(path) => Scenario::from_file(&path)?,
        None => Scenario::default(),
    };

    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to create tokio runtime")?;

    let termination = rt.block_on(async move {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let printer = tokio::spawn(print_status(event_rx));
        let result = run(settings, scenario, event_tx).await;
        let _ = printer.await;
        result
    })?;

    Ok(exit_code(&termination))
}

async fn run(
    settings: Settings,
    scenario: Scenario,
    event_tx: mpsc::UnboundedSender<LauncherEvent>,
) -> anyhow::Result<Termination> {
    let host = Arc::new(ScriptedHost::new(scenario)?);
    let launcher = Arc::new(CommandLauncher::new(
        settings.service.clone(),
        Some(event_tx.clone()),
    ));
    let coordinator = AttachmentCoordinator::with_config(
        host.clone(),
        launcher,
        CoordinatorConfig {
            events: Some(event_tx),
            notify_on_detect: settings.notify_on_detect,
        },
    )
    .context("Failed to register for permission responses")?;

    match coordinator.handle_event(host.attachment_event()) {
        Ok(state) => debug!("Coordinator settled in {:?}", state),
        Err(e) => info!("Attachment ended early: {}", e),
    }

    let timeout = async {
        match settings.permission_timeout_ms {
            Some(ms) => tokio::time::sleep(Duration::from_millis(ms)).await,
            None => std::future::pending().await,
        }
    };

    tokio::select! {
        termination = coordinator.terminated() => return Ok(termination),
        _ = tokio::signal::ctrl_c() => {
            info!("Interrupted, cancelling");
            coordinator.cancel();
        }
        _ = timeout => {
            warn!(
                "No permission answer in time (state {:?}), cancelling",
                coordinator.state()
            );
            coordinator.cancel();
        }
    }

    Ok(coordinator.terminated().await)
}

async fn print_status(mut event_rx: mpsc::UnboundedReceiver<LauncherEvent>) {
    while let Some(event) = event_rx.recv().await {
        if let LauncherEvent::LogMessage(status) = event {
            let tag = match status.severity {
                MessageSeverity::Info => "info",
                MessageSeverity::Success => "ok",
                MessageSeverity::Warning => "warn",
                MessageSeverity::Error => "error",
            };
            println!("[{}] {}", tag, status.message);
        }
    }
}

fn exit_code(termination: &Termination) -> ExitCode {
    match termination {
        Termination::Launched(_) => ExitCode::SUCCESS,
        Termination::Failed(AttachmentError::Query(_))
        | Termination::Failed(AttachmentError::RequestFailed(_)) => ExitCode::from(2),
        Termination::Failed(_) => ExitCode::from(1),
    }
}
