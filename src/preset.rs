// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Chain presets: the serializable shape of a rack.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use thiserror::Error;
use tracing::info;

#[derive(Debug, Error)]
pub enum PresetError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// One occupied slot in a preset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PresetSlot {
    pub index: usize,
    pub uri: String,
    #[serde(default)]
    pub controls: BTreeMap<String, f32>,
    #[serde(default)]
    pub bypassed: bool,
}

/// A saved chain: slots in order, serialized as a JSON array.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Preset {
    pub slots: Vec<PresetSlot>,
}

impl Preset {
    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, PresetError> {
        let content = fs::read_to_string(path.as_ref())?;
        let preset = Self::from_json(&content)?;
        info!("loaded preset from {:?}: {} slots", path.as_ref(), preset.slots.len());
        Ok(preset)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), PresetError> {
        fs::write(path.as_ref(), self.to_json()?)?;
        info!("saved preset to {:?}", path.as_ref());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_preset_is_a_json_array() {
        let json = r#"[
            {"index": 0, "uri": "urn:ds1", "controls": {"gain": 0.5}, "bypassed": false},
            {"index": 2, "uri": "urn:verb", "controls": {}, "bypassed": true}
        ]"#;
        let preset = Preset::from_json(json).unwrap();
        assert_eq!(preset.slots.len(), 2);
        assert_eq!(preset.slots[0].controls.get("gain"), Some(&0.5));
        assert!(preset.slots[1].bypassed);
        assert_eq!(preset.slots[1].index, 2);

        let round = Preset::from_json(&preset.to_json().unwrap()).unwrap();
        assert_eq!(round, preset);
    }

    #[test]
    fn test_missing_fields_default() {
        let preset = Preset::from_json(r#"[{"index": 0, "uri": "urn:x"}]"#).unwrap();
        assert!(preset.slots[0].controls.is_empty());
        assert!(!preset.slots[0].bypassed);
    }
}
