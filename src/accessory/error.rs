//! Error types for the attachment lifecycle.

use crate::domain::models::RequestId;
use thiserror::Error;

/// Failures reported by the host environment.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum HostError {
    #[error("accessory query failed: {0}")]
    Query(String),
    #[error("host refused the permission prompt: {0}")]
    PermissionPrompt(String),
    #[error("listener registration failed: {0}")]
    Registration(String),
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BrokerError {
    #[error("permission request {0} is still outstanding")]
    RequestOutstanding(RequestId),
    #[error("permission listener is no longer registered")]
    Released,
    #[error(transparent)]
    Host(#[from] HostError),
}

/// Terminal outcomes of a coordinator that did not launch the service.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AttachmentError {
    #[error("no accessory attached")]
    NotFound,
    #[error(transparent)]
    Query(HostError),
    #[error("permission denied")]
    PermissionDenied,
    #[error("permission {0} granted but no accessory was returned")]
    AnomalousGrant(RequestId),
    #[error("could not request permission: {0}")]
    RequestFailed(#[source] BrokerError),
    #[error("cancelled before completion")]
    Cancelled,
}
