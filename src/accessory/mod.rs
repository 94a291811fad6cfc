//! Accessory Module
//!
//! Turns "an accessory was attached" into "the device service is running".
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │                  AttachmentCoordinator                   │
//! │   (state machine - one instance per attachment)          │
//! └──────────┬──────────────────┬───────────────────┬───────┘
//!            │                  │                   │
//!            ▼                  ▼                   ▼
//! ┌──────────────────┐ ┌─────────────────┐ ┌─────────────────┐
//! │ AccessoryResolver│ │ PermissionBroker│ │ ServiceLauncher │
//! │                  │ │                 │ │                 │
//! │ - direct handle  │ │ - request ids   │ │ - takes the     │
//! │ - first listed   │ │ - listener guard│ │   device over   │
//! └────────┬─────────┘ └────────┬────────┘ └─────────────────┘
//!          │                    │
//!          └─────────┬──────────┘
//!                    ▼
//!            ┌───────────────┐
//!            │ AccessoryHost │
//!            └───────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`host`] - Traits for the host environment and the service launcher
//! - [`resolver`] - Picks the accessory an attachment refers to
//! - [`broker`] - Permission requests and response correlation
//! - [`coordinator`] - The attachment state machine
//! - [`error`] - Error types

pub mod broker;
pub mod coordinator;
pub mod error;
pub mod host;
pub mod resolver;

#[cfg(test)]
pub(crate) mod testing;

pub use coordinator::{AttachmentCoordinator, CoordinatorConfig, Termination};
pub use error::AttachmentError;
pub use host::ServiceLauncher;
