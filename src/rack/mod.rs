// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! The chain core: slot registry, event dispatcher, and the orchestrator
//! that keeps the host graph and the local mirror in step.

mod dispatcher;
mod orchestrator;
mod slots;

pub use orchestrator::RackService;
pub use slots::{Slot, SlotRegistry, Terminal, TerminalKind};

use crate::preset::Preset;
use std::collections::BTreeMap;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use uuid::Uuid;

/// Failures surfaced to callers and, for the asynchronous kinds, on the
/// notification channel.
#[derive(Debug, Clone, Error)]
pub enum RackError {
    #[error("plugin not supported: {0}")]
    UnsupportedPlugin(String),
    #[error("transport failure: {0}")]
    Transport(String),
    #[error("request timed out")]
    Timeout,
    #[error("host assigned duplicate label: {0}")]
    DuplicateLabel(String),
    #[error("slot not found: {0}")]
    SlotNotFound(String),
    #[error("invariant violation: {0}")]
    InvariantViolation(String),
    #[error("routing conflict: {0}")]
    RoutingConflict(String),
    #[error("slot limit reached ({0})")]
    SlotLimitReached(usize),
    #[error("rack service is not running")]
    Closed,
}

/// State changes pushed to the embedding application (GUI, scripts).
#[derive(Debug, Clone)]
pub enum Notification {
    SlotAdded(SlotSnapshot),
    SlotRemoved { label: String },
    ParamChanged {
        label: String,
        symbol: String,
        value: f32,
    },
    BypassChanged { label: String, bypassed: bool },
    Error(RackError),
}

/// Read-only view of a slot.
#[derive(Debug, Clone)]
pub struct SlotSnapshot {
    pub uuid: Uuid,
    pub label: String,
    pub index: usize,
    pub plugin: Option<PluginSnapshot>,
}

/// Read-only view of a slot's plugin.
#[derive(Debug, Clone)]
pub struct PluginSnapshot {
    pub uri: String,
    pub name: String,
    pub category: String,
    pub audio_ins: Vec<String>,
    pub audio_outs: Vec<String>,
    pub midi_ins: Vec<String>,
    pub midi_outs: Vec<String>,
    pub controls: BTreeMap<String, f32>,
    pub bypassed: bool,
}

impl SlotSnapshot {
    pub(crate) fn of(slot: &Slot) -> Self {
        Self {
            uuid: slot.uuid,
            label: slot.label.clone(),
            index: slot.index,
            plugin: slot.plugin.as_ref().map(|p| PluginSnapshot {
                uri: p.uri.clone(),
                name: p.name.clone(),
                category: p.category.clone(),
                audio_ins: p.audio_ins.clone(),
                audio_outs: p.audio_outs.clone(),
                midi_ins: p.midi_ins.clone(),
                midi_outs: p.midi_outs.clone(),
                controls: p.controls.clone(),
                bypassed: p.bypassed,
            }),
        }
    }
}

/// User intents, serialized onto the dispatcher's timeline.
pub(crate) enum Intent {
    AddPlugin {
        uri: String,
        position: Option<usize>,
        reply: oneshot::Sender<Result<String, RackError>>,
    },
    RemovePlugin {
        label: String,
        reply: oneshot::Sender<Result<(), RackError>>,
    },
    Replace {
        label: String,
        uri: String,
        reply: oneshot::Sender<Result<String, RackError>>,
    },
    MoveSlot {
        from: usize,
        to: usize,
        reply: oneshot::Sender<Result<(), RackError>>,
    },
    Clear {
        reply: oneshot::Sender<Result<(), RackError>>,
    },
    SetParam {
        label: String,
        symbol: String,
        value: f32,
        reply: oneshot::Sender<Result<(), RackError>>,
    },
    SetBypass {
        label: String,
        bypassed: bool,
        reply: oneshot::Sender<Result<(), RackError>>,
    },
    SavePreset {
        reply: oneshot::Sender<Result<Preset, RackError>>,
    },
    LoadPreset {
        preset: Preset,
        reply: oneshot::Sender<Result<(), RackError>>,
    },
    Snapshot {
        reply: oneshot::Sender<Vec<SlotSnapshot>>,
    },
}

/// Cloneable async facade over the orchestrator. Intents queue FIFO and
/// resolve when the orchestrator finishes the edit.
#[derive(Clone)]
pub struct RackHandle {
    tx: mpsc::UnboundedSender<Intent>,
}

impl RackHandle {
    pub(crate) fn new(tx: mpsc::UnboundedSender<Intent>) -> Self {
        Self { tx }
    }

    async fn send<R>(
        &self,
        make: impl FnOnce(oneshot::Sender<Result<R, RackError>>) -> Intent,
    ) -> Result<R, RackError> {
        let (reply, rx) = oneshot::channel();
        self.tx.send(make(reply)).map_err(|_| RackError::Closed)?;
        rx.await.map_err(|_| RackError::Closed)?
    }

    /// Add a whitelisted plugin, by default at the end of the chain.
    /// Resolves to the host-assigned label.
    pub async fn request_add_plugin(
        &self,
        uri: impl Into<String>,
        position: Option<usize>,
    ) -> Result<String, RackError> {
        let uri = uri.into();
        self.send(|reply| Intent::AddPlugin {
            uri,
            position,
            reply,
        })
        .await
    }

    pub async fn request_remove_plugin(&self, label: impl Into<String>) -> Result<(), RackError> {
        let label = label.into();
        self.send(|reply| Intent::RemovePlugin { label, reply }).await
    }

    /// Swap the plugin in a slot for another, make-before-break.
    /// Resolves to the new instance's label.
    pub async fn request_replace(
        &self,
        label: impl Into<String>,
        uri: impl Into<String>,
    ) -> Result<String, RackError> {
        let label = label.into();
        let uri = uri.into();
        self.send(|reply| Intent::Replace { label, uri, reply }).await
    }

    pub async fn move_slot(&self, from: usize, to: usize) -> Result<(), RackError> {
        self.send(|reply| Intent::MoveSlot { from, to, reply }).await
    }

    pub async fn clear(&self) -> Result<(), RackError> {
        self.send(|reply| Intent::Clear { reply }).await
    }

    pub async fn set_param(
        &self,
        label: impl Into<String>,
        symbol: impl Into<String>,
        value: f32,
    ) -> Result<(), RackError> {
        let label = label.into();
        let symbol = symbol.into();
        self.send(|reply| Intent::SetParam {
            label,
            symbol,
            value,
            reply,
        })
        .await
    }

    pub async fn set_bypass(
        &self,
        label: impl Into<String>,
        bypassed: bool,
    ) -> Result<(), RackError> {
        let label = label.into();
        self.send(|reply| Intent::SetBypass {
            label,
            bypassed,
            reply,
        })
        .await
    }

    pub async fn save_preset(&self) -> Result<Preset, RackError> {
        self.send(|reply| Intent::SavePreset { reply }).await
    }

    pub async fn load_preset(&self, preset: Preset) -> Result<(), RackError> {
        self.send(|reply| Intent::LoadPreset { preset, reply }).await
    }

    /// Read-only snapshot of the chain in order.
    pub async fn slots(&self) -> Result<Vec<SlotSnapshot>, RackError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Intent::Snapshot { reply })
            .map_err(|_| RackError::Closed)?;
        rx.await.map_err(|_| RackError::Closed)
    }

    pub async fn get_slot_by_label(
        &self,
        label: &str,
    ) -> Result<Option<SlotSnapshot>, RackError> {
        Ok(self.slots().await?.into_iter().find(|s| s.label == label))
    }

    pub async fn get_slot(&self, uuid: Uuid) -> Result<Option<SlotSnapshot>, RackError> {
        Ok(self.slots().await?.into_iter().find(|s| s.uuid == uuid))
    }
}
