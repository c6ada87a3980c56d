// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! The host boundary: request/response transport trait and the event
//! stream feed.

pub mod feed;
pub mod rest;

use async_trait::async_trait;
use modrack_proto::{AddedPlugin, HardwarePorts};
use thiserror::Error;

pub use rest::RestTransport;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("http error: {0}")]
    Http(String),
    #[error("host rejected request: {0}")]
    Rejected(String),
    #[error("invalid response: {0}")]
    InvalidResponse(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<reqwest::Error> for TransportError {
    fn from(err: reqwest::Error) -> Self {
        TransportError::Http(err.to_string())
    }
}

/// Request/response operations the core drives against the host. The
/// host answers asynchronously on the event stream as well; the core
/// treats those echoes separately.
#[async_trait]
pub trait HostTransport: Send + Sync + 'static {
    /// Instantiate a plugin. Returns the assigned label and the
    /// host-reported ports.
    async fn add_plugin(&self, uri: &str) -> Result<AddedPlugin, TransportError>;

    /// Destroy an instance.
    async fn remove_plugin(&self, label: &str) -> Result<(), TransportError>;

    /// Create one directed edge between graph port paths.
    async fn connect_ports(&self, src: &str, dst: &str) -> Result<(), TransportError>;

    /// Remove one directed edge.
    async fn disconnect_ports(&self, src: &str, dst: &str) -> Result<(), TransportError>;

    /// Set a control value.
    async fn set_param(&self, label: &str, symbol: &str, value: f32)
        -> Result<(), TransportError>;

    /// Toggle an instance's bypass.
    async fn set_bypass(&self, label: &str, bypassed: bool) -> Result<(), TransportError>;

    /// Discover the hardware port set.
    async fn list_hardware_ports(&self) -> Result<HardwarePorts, TransportError>;

    /// Drop every instance on the host.
    async fn reset(&self) -> Result<(), TransportError>;
}
