// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! REST control-plane adapter for the host.

use crate::host::{HostTransport, TransportError};
use async_trait::async_trait;
use modrack_proto::{AddedPlugin, HardwarePorts, PortGroups};
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;
use uuid::Uuid;

/// HTTP client for the host's effect endpoints. The label for a new
/// instance is generated client-side and validated by the host.
pub struct RestTransport {
    client: reqwest::Client,
    base_url: String,
}

impl RestTransport {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// GET an endpoint that answers with a plain `true`/`false` body.
    async fn get_ok(&self, path: &str) -> Result<(), TransportError> {
        debug!("GET {}", path);
        let response = self.client.get(self.url(path)).send().await?;
        if !response.status().is_success() {
            return Err(TransportError::Http(format!("HTTP {}", response.status())));
        }
        let body = response.text().await?;
        match body.trim() {
            "true" => Ok(()),
            other => Err(TransportError::Rejected(other.to_string())),
        }
    }

    fn generate_label(uri: &str) -> String {
        let base = label_base(uri);
        let uid = Uuid::new_v4().simple().to_string();
        format!("{}_{}", base, &uid[..8])
    }
}

/// Label stem derived from a plugin URI: last path segment, fragment
/// dropped, unsafe characters replaced.
fn label_base(uri: &str) -> String {
    let path = uri.split('#').next().unwrap_or(uri).trim_end_matches('/');
    let tail = path.rsplit('/').next().unwrap_or(path);
    tail.chars()
        .map(|c| if c.is_alphanumeric() { c } else { '_' })
        .collect()
}

#[derive(Debug, Default, Deserialize)]
struct EffectAddResponse {
    #[serde(default)]
    valid: bool,
    #[serde(default)]
    ports: EffectPorts,
}

#[derive(Debug, Default, Deserialize)]
struct EffectPorts {
    #[serde(default)]
    audio: EffectPortGroup,
    #[serde(default)]
    midi: EffectPortGroup,
}

#[derive(Debug, Default, Deserialize)]
struct EffectPortGroup {
    #[serde(default)]
    input: Vec<EffectPort>,
    #[serde(default)]
    output: Vec<EffectPort>,
}

#[derive(Debug, Deserialize)]
struct EffectPort {
    symbol: String,
}

impl EffectPorts {
    fn into_groups(self) -> PortGroups {
        let symbols = |ports: Vec<EffectPort>| ports.into_iter().map(|p| p.symbol).collect();
        PortGroups {
            audio_ins: symbols(self.audio.input),
            audio_outs: symbols(self.audio.output),
            midi_ins: symbols(self.midi.input),
            midi_outs: symbols(self.midi.output),
        }
    }
}

#[async_trait]
impl HostTransport for RestTransport {
    async fn add_plugin(&self, uri: &str) -> Result<AddedPlugin, TransportError> {
        let label = Self::generate_label(uri);
        let path = format!("/effect/add//graph/{label}");
        debug!("GET {} uri={}", path, uri);
        let response = self
            .client
            .get(self.url(&path))
            .query(&[("uri", uri)])
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(TransportError::Http(format!("HTTP {}", response.status())));
        }
        let body: EffectAddResponse = response
            .json()
            .await
            .map_err(|e| TransportError::InvalidResponse(e.to_string()))?;
        if !body.valid {
            return Err(TransportError::Rejected(format!("add refused for {uri}")));
        }
        Ok(AddedPlugin {
            label,
            ports: body.ports.into_groups(),
        })
    }

    async fn remove_plugin(&self, label: &str) -> Result<(), TransportError> {
        self.get_ok(&format!("/effect/remove//graph/{label}")).await
    }

    async fn connect_ports(&self, src: &str, dst: &str) -> Result<(), TransportError> {
        self.get_ok(&format!("/effect/connect//graph/{src},/graph/{dst}"))
            .await
    }

    async fn disconnect_ports(&self, src: &str, dst: &str) -> Result<(), TransportError> {
        self.get_ok(&format!("/effect/disconnect//graph/{src},/graph/{dst}"))
            .await
    }

    async fn set_param(
        &self,
        label: &str,
        symbol: &str,
        value: f32,
    ) -> Result<(), TransportError> {
        let payload = format!("/graph/{label}/{symbol}/{value}");
        debug!("POST /effect/parameter/set/ {}", payload);
        let response = self
            .client
            .post(self.url("/effect/parameter/set/"))
            .header(reqwest::header::CONTENT_TYPE, "text/plain")
            .body(payload)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(TransportError::Http(format!("HTTP {}", response.status())));
        }
        Ok(())
    }

    async fn set_bypass(&self, label: &str, bypassed: bool) -> Result<(), TransportError> {
        self.set_param(label, ":bypass", if bypassed { 1.0 } else { 0.0 })
            .await
    }

    async fn list_hardware_ports(&self) -> Result<HardwarePorts, TransportError> {
        debug!("GET /hardware/ports");
        let response = self.client.get(self.url("/hardware/ports")).send().await?;
        if !response.status().is_success() {
            return Err(TransportError::Http(format!("HTTP {}", response.status())));
        }
        response
            .json()
            .await
            .map_err(|e| TransportError::InvalidResponse(e.to_string()))
    }

    async fn reset(&self) -> Result<(), TransportError> {
        self.get_ok("/reset").await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_label_base_strips_fragment_and_path() {
        assert_eq!(label_base("http://example.org/plugins/DS1"), "DS1");
        assert_eq!(label_base("http://example.org/gx#fuzz face/"), "gx");
        assert_eq!(label_base("urn:simple"), "urn_simple");
    }

    #[test]
    fn test_generated_labels_are_unique() {
        let a = RestTransport::generate_label("http://example.org/plugins/DS1");
        let b = RestTransport::generate_label("http://example.org/plugins/DS1");
        assert!(a.starts_with("DS1_"));
        assert_ne!(a, b);
    }
}
