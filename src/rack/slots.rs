// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! The ordered slot sequence and the hardware terminal sentinels.

use crate::config::HardwareConfig;
use crate::plugin::{JoinHints, Plugin};
use crate::routing::Endpoint;
use uuid::Uuid;

/// A position in the chain. Carries a stable local identity, the label
/// assigned by the host, and optionally a plugin instance.
#[derive(Debug, Clone)]
pub struct Slot {
    pub uuid: Uuid,
    pub label: String,
    pub index: usize,
    pub plugin: Option<Plugin>,
}

impl Slot {
    pub fn new(label: impl Into<String>, plugin: Plugin) -> Self {
        Self {
            uuid: Uuid::new_v4(),
            label: label.into(),
            index: 0,
            plugin: Some(plugin),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.plugin.is_none()
    }

    /// Routing view of this slot; `None` while the slot is empty. Port
    /// symbols become graph paths under the slot's label.
    pub fn endpoint(&self) -> Option<Endpoint> {
        let plugin = self.plugin.as_ref()?;
        let path = |symbol: &String| format!("{}/{}", self.label, symbol);
        Some(Endpoint {
            audio_ins: plugin.audio_ins.iter().map(path).collect(),
            audio_outs: plugin.audio_outs.iter().map(path).collect(),
            midi_ins: plugin.midi_ins.iter().map(path).collect(),
            midi_outs: plugin.midi_outs.iter().map(path).collect(),
            join: plugin.joins,
        })
    }
}

/// Which hardware boundary a terminal stands for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminalKind {
    Input,
    Output,
}

/// Pseudo-slot for the host's hardware ports. Terminals bookend the
/// chain and never live in the registry.
#[derive(Debug, Clone)]
pub struct Terminal {
    pub kind: TerminalKind,
    pub audio_ports: Vec<String>,
    pub midi_ports: Vec<String>,
    join_audio: bool,
}

impl Terminal {
    /// Build the terminal pair from the hardware configuration. The
    /// capture terminal's ports act as graph sources, so its join hint
    /// comes from `join_audio_inputs`; the playback terminal mirrors.
    pub fn from_config(config: &HardwareConfig) -> (Terminal, Terminal) {
        (
            Terminal {
                kind: TerminalKind::Input,
                audio_ports: config.inputs.clone(),
                midi_ports: config.midi_inputs.clone(),
                join_audio: config.join_audio_inputs,
            },
            Terminal {
                kind: TerminalKind::Output,
                audio_ports: config.outputs.clone(),
                midi_ports: config.midi_outputs.clone(),
                join_audio: config.join_audio_outputs,
            },
        )
    }

    /// Routing view. Input-terminal ports are outputs into the graph;
    /// output-terminal ports are inputs from it.
    pub fn endpoint(&self) -> Endpoint {
        match self.kind {
            TerminalKind::Input => Endpoint {
                audio_outs: self.audio_ports.clone(),
                midi_outs: self.midi_ports.clone(),
                join: JoinHints {
                    audio_outs: self.join_audio,
                    ..JoinHints::default()
                },
                ..Endpoint::default()
            },
            TerminalKind::Output => Endpoint {
                audio_ins: self.audio_ports.clone(),
                midi_ins: self.midi_ports.clone(),
                join: JoinHints {
                    audio_ins: self.join_audio,
                    ..JoinHints::default()
                },
                ..Endpoint::default()
            },
        }
    }
}

/// Ordered slot sequence. Mutations reindex so that every slot's `index`
/// equals its position; only the orchestrator mutates it.
#[derive(Debug, Default)]
pub struct SlotRegistry {
    slots: Vec<Slot>,
}

impl SlotRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Slot> {
        self.slots.iter()
    }

    /// Non-empty slots in chain order.
    pub fn effective(&self) -> impl Iterator<Item = &Slot> {
        self.slots.iter().filter(|s| !s.is_empty())
    }

    pub fn get_by_label(&self, label: &str) -> Option<&Slot> {
        self.slots.iter().find(|s| s.label == label)
    }

    pub fn get_by_label_mut(&mut self, label: &str) -> Option<&mut Slot> {
        self.slots.iter_mut().find(|s| s.label == label)
    }

    pub fn get_by_uuid(&self, uuid: Uuid) -> Option<&Slot> {
        self.slots.iter().find(|s| s.uuid == uuid)
    }

    pub fn position_of(&self, label: &str) -> Option<usize> {
        self.slots.iter().position(|s| s.label == label)
    }

    pub fn append(&mut self, slot: Slot) {
        self.slots.push(slot);
        self.reindex();
    }

    /// Insert at `index`, clamped to the current length.
    pub fn insert(&mut self, index: usize, slot: Slot) {
        let index = index.min(self.slots.len());
        self.slots.insert(index, slot);
        self.reindex();
    }

    pub fn remove_by_label(&mut self, label: &str) -> Option<Slot> {
        let index = self.position_of(label)?;
        let slot = self.slots.remove(index);
        self.reindex();
        Some(slot)
    }

    /// Move a slot from one position to another. Out-of-range `from`
    /// is a no-op; `to` is clamped.
    pub fn move_slot(&mut self, from: usize, to: usize) -> bool {
        if from >= self.slots.len() {
            return false;
        }
        let slot = self.slots.remove(from);
        let to = to.min(self.slots.len());
        self.slots.insert(to, slot);
        self.reindex();
        true
    }

    pub fn clear(&mut self) -> Vec<Slot> {
        std::mem::take(&mut self.slots)
    }

    fn reindex(&mut self) {
        for (index, slot) in self.slots.iter_mut().enumerate() {
            slot.index = index;
        }
    }
}
