// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Plugin port model: effective port lists, join hints, and the control
//! surface of a hosted instance.

use crate::config::PluginConfig;
use modrack_proto::PortGroups;
use std::collections::BTreeMap;

/// All-to-all routing hints per media direction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct JoinHints {
    pub audio_ins: bool,
    pub audio_outs: bool,
    pub midi_ins: bool,
    pub midi_outs: bool,
}

/// A plugin instance attached to a slot.
///
/// The descriptor part (uri, name, category, port lists, hints) is fixed
/// at instantiation; controls and bypass mutate as the host reports
/// changes.
#[derive(Debug, Clone)]
pub struct Plugin {
    pub uri: String,
    pub name: String,
    pub category: String,
    pub audio_ins: Vec<String>,
    pub audio_outs: Vec<String>,
    pub midi_ins: Vec<String>,
    pub midi_outs: Vec<String>,
    pub joins: JoinHints,
    pub controls: BTreeMap<String, f32>,
    pub bypassed: bool,
}

impl Plugin {
    fn from_parts(
        uri: &str,
        name: String,
        category: String,
        ports: PortGroups,
        joins: JoinHints,
    ) -> Self {
        Self {
            uri: uri.to_string(),
            name,
            category,
            audio_ins: ports.audio_ins,
            audio_outs: ports.audio_outs,
            midi_ins: ports.midi_ins,
            midi_outs: ports.midi_outs,
            joins,
            controls: BTreeMap::new(),
            bypassed: false,
        }
    }
}

/// The configured plugin whitelist, projected onto host-reported ports.
#[derive(Debug, Clone, Default)]
pub struct PluginCatalog {
    plugins: Vec<PluginConfig>,
}

impl PluginCatalog {
    pub fn new(plugins: &[PluginConfig]) -> Self {
        Self {
            plugins: plugins.to_vec(),
        }
    }

    pub fn contains(&self, uri: &str) -> bool {
        self.plugins.iter().any(|p| p.uri == uri)
    }

    pub fn get(&self, uri: &str) -> Option<&PluginConfig> {
        self.plugins.iter().find(|p| p.uri == uri)
    }

    /// Find a whitelisted plugin by display name (case-insensitive).
    pub fn get_by_name(&self, name: &str) -> Option<&PluginConfig> {
        self.plugins
            .iter()
            .find(|p| p.name.eq_ignore_ascii_case(name))
    }

    /// Distinct categories across the whitelist, sorted.
    pub fn categories(&self) -> Vec<String> {
        let mut categories: Vec<String> = self
            .plugins
            .iter()
            .filter(|p| !p.category.is_empty())
            .map(|p| p.category.clone())
            .collect();
        categories.sort();
        categories.dedup();
        categories
    }

    /// Build an instance for a whitelisted URI. Configured port-list
    /// overrides replace the host-reported lists verbatim.
    pub fn instantiate(&self, uri: &str, reported: &PortGroups) -> Option<Plugin> {
        let entry = self.get(uri)?;
        let ports = PortGroups {
            audio_ins: entry
                .inputs
                .clone()
                .unwrap_or_else(|| reported.audio_ins.clone()),
            audio_outs: entry
                .outputs
                .clone()
                .unwrap_or_else(|| reported.audio_outs.clone()),
            midi_ins: entry
                .midi_inputs
                .clone()
                .unwrap_or_else(|| reported.midi_ins.clone()),
            midi_outs: entry
                .midi_outputs
                .clone()
                .unwrap_or_else(|| reported.midi_outs.clone()),
        };
        let joins = JoinHints {
            audio_ins: entry.join_audio_inputs,
            audio_outs: entry.join_audio_outputs,
            midi_ins: entry.join_midi_inputs,
            midi_outs: entry.join_midi_outputs,
        };
        Some(Plugin::from_parts(
            uri,
            entry.name.clone(),
            entry.category.clone(),
            ports,
            joins,
        ))
    }

    /// Build an instance for a URI outside the whitelist, from the
    /// host-reported ports alone. Used when mirroring external adds.
    pub fn adopt(uri: &str, reported: &PortGroups) -> Plugin {
        Plugin::from_parts(
            uri,
            display_name_from_uri(uri),
            String::new(),
            reported.clone(),
            JoinHints::default(),
        )
    }
}

/// Last path segment of a URI, with the fragment dropped.
fn display_name_from_uri(uri: &str) -> String {
    let path = uri.split('#').next().unwrap_or(uri).trim_end_matches('/');
    path.rsplit('/').next().unwrap_or(path).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn catalog() -> PluginCatalog {
        PluginCatalog::new(&[PluginConfig {
            name: "DS1".to_string(),
            uri: "http://example.org/plugins/DS1".to_string(),
            category: "Distortion".to_string(),
            inputs: Some(vec!["in".to_string()]),
            outputs: None,
            midi_inputs: None,
            midi_outputs: None,
            join_audio_inputs: false,
            join_audio_outputs: true,
            join_midi_inputs: false,
            join_midi_outputs: false,
        }])
    }

    fn reported() -> PortGroups {
        PortGroups {
            audio_ins: vec!["in_l".to_string(), "in_r".to_string()],
            audio_outs: vec!["out".to_string()],
            midi_ins: vec![],
            midi_outs: vec![],
        }
    }

    #[test]
    fn test_instantiate_applies_overrides_verbatim() {
        let plugin = catalog()
            .instantiate("http://example.org/plugins/DS1", &reported())
            .unwrap();
        // Override replaces the reported input list, output list is kept.
        assert_eq!(plugin.audio_ins, vec!["in".to_string()]);
        assert_eq!(plugin.audio_outs, vec!["out".to_string()]);
        assert!(plugin.joins.audio_outs);
        assert!(!plugin.joins.audio_ins);
        assert_eq!(plugin.name, "DS1");
    }

    #[test]
    fn test_instantiate_rejects_unknown_uri() {
        assert!(catalog()
            .instantiate("http://example.org/plugins/Nope", &reported())
            .is_none());
    }

    #[test]
    fn test_adopt_uses_reported_ports() {
        let plugin = PluginCatalog::adopt("http://example.org/plugins/Ext#mono", &reported());
        assert_eq!(plugin.audio_ins, reported().audio_ins);
        assert_eq!(plugin.name, "Ext");
        assert_eq!(plugin.joins, JoinHints::default());
    }

    #[test]
    fn test_lookup_by_name_is_case_insensitive() {
        let catalog = catalog();
        assert!(catalog.get_by_name("ds1").is_some());
        assert!(catalog.get_by_name("DS2").is_none());
        assert_eq!(catalog.categories(), vec!["Distortion".to_string()]);
    }
}
