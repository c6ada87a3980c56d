// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Wire protocol types shared between the modrack core and its transports.
//!
//! The host emits a line-oriented event stream; this crate defines the
//! parsed event type, the port payloads attached to plugin instances, and
//! the textual grammar both directions.

use serde::{Deserialize, Serialize};

/// Prefix the host puts in front of graph object paths.
pub const GRAPH_PREFIX: &str = "/graph/";

/// Wire placeholder for an empty port group.
const EMPTY_GROUP: &str = "-";

/// Port lists of a plugin instance, as reported by the host.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PortGroups {
    pub audio_ins: Vec<String>,
    pub audio_outs: Vec<String>,
    pub midi_ins: Vec<String>,
    pub midi_outs: Vec<String>,
}

/// Result of a successful add-plugin request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AddedPlugin {
    /// Label assigned to the new instance, unique across the graph.
    pub label: String,
    pub ports: PortGroups,
}

/// The host's hardware port set.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HardwarePorts {
    pub inputs: Vec<String>,
    pub outputs: Vec<String>,
}

/// One event from the host's stream.
#[derive(Debug, Clone, PartialEq)]
pub enum HostEvent {
    /// A plugin instance appeared on the graph.
    Added {
        label: String,
        uri: String,
        ports: PortGroups,
    },
    /// A plugin instance was destroyed.
    Removed { label: String },
    /// Every instance was destroyed at once.
    RemovedAll,
    /// A directed edge was created.
    Connected { src: String, dst: String },
    /// A directed edge was removed.
    Disconnected { src: String, dst: String },
    /// A control value changed.
    ParamSet {
        label: String,
        symbol: String,
        value: f32,
    },
    /// A bypass toggle changed.
    Bypass { label: String, bypassed: bool },
    /// The hardware port set was replaced.
    Hardware(HardwarePorts),
    /// The host started a bulk graph load.
    LoadingStart,
    /// The bulk load finished.
    LoadingEnd,
    /// Keepalive probe; answered at the framing layer.
    Ping,
}

impl HostEvent {
    /// Parse one line of the event stream. Returns `None` for messages
    /// outside the grammar; callers are expected to log those.
    pub fn parse(line: &str) -> Option<HostEvent> {
        let parts: Vec<&str> = line.split_whitespace().collect();
        match parts.as_slice() {
            ["ping"] => Some(HostEvent::Ping),
            ["loading_start", ..] => Some(HostEvent::LoadingStart),
            ["loading_end", ..] => Some(HostEvent::LoadingEnd),
            ["remove", ":all"] => Some(HostEvent::RemovedAll),
            ["remove", label] => Some(HostEvent::Removed {
                label: strip_graph(label),
            }),
            ["add", label, uri, groups @ ..] => {
                let mut groups = groups.iter();
                let ports = PortGroups {
                    audio_ins: groups.next().map_or_else(Vec::new, |g| parse_group(g)),
                    audio_outs: groups.next().map_or_else(Vec::new, |g| parse_group(g)),
                    midi_ins: groups.next().map_or_else(Vec::new, |g| parse_group(g)),
                    midi_outs: groups.next().map_or_else(Vec::new, |g| parse_group(g)),
                };
                Some(HostEvent::Added {
                    label: strip_graph(label),
                    uri: (*uri).to_string(),
                    ports,
                })
            }
            ["connect", src, dst] => Some(HostEvent::Connected {
                src: strip_graph(src),
                dst: strip_graph(dst),
            }),
            ["disconnect", src, dst] => Some(HostEvent::Disconnected {
                src: strip_graph(src),
                dst: strip_graph(dst),
            }),
            ["param_set", label, symbol, value] => {
                let value: f32 = value.parse().ok()?;
                let label = strip_graph(label);
                if *symbol == ":bypass" {
                    Some(HostEvent::Bypass {
                        label,
                        bypassed: value > 0.5,
                    })
                } else {
                    Some(HostEvent::ParamSet {
                        label,
                        symbol: (*symbol).to_string(),
                        value,
                    })
                }
            }
            ["bypass", label, flag] => Some(HostEvent::Bypass {
                label: strip_graph(label),
                bypassed: parse_bool(flag)?,
            }),
            ["hardware", groups @ ..] => {
                let mut groups = groups.iter();
                Some(HostEvent::Hardware(HardwarePorts {
                    inputs: groups.next().map_or_else(Vec::new, |g| parse_group(g)),
                    outputs: groups.next().map_or_else(Vec::new, |g| parse_group(g)),
                }))
            }
            _ => None,
        }
    }

    /// Render the event in wire form. Inverse of [`HostEvent::parse`].
    pub fn to_line(&self) -> String {
        match self {
            HostEvent::Added { label, uri, ports } => format!(
                "add {GRAPH_PREFIX}{label} {uri} {} {} {} {}",
                format_group(&ports.audio_ins),
                format_group(&ports.audio_outs),
                format_group(&ports.midi_ins),
                format_group(&ports.midi_outs),
            ),
            HostEvent::Removed { label } => format!("remove {GRAPH_PREFIX}{label}"),
            HostEvent::RemovedAll => "remove :all".to_string(),
            HostEvent::Connected { src, dst } => {
                format!("connect {GRAPH_PREFIX}{src} {GRAPH_PREFIX}{dst}")
            }
            HostEvent::Disconnected { src, dst } => {
                format!("disconnect {GRAPH_PREFIX}{src} {GRAPH_PREFIX}{dst}")
            }
            HostEvent::ParamSet {
                label,
                symbol,
                value,
            } => format!("param_set {GRAPH_PREFIX}{label} {symbol} {value}"),
            HostEvent::Bypass { label, bypassed } => format!(
                "bypass {GRAPH_PREFIX}{label} {}",
                if *bypassed { 1 } else { 0 }
            ),
            HostEvent::Hardware(hw) => format!(
                "hardware {} {}",
                format_group(&hw.inputs),
                format_group(&hw.outputs)
            ),
            HostEvent::LoadingStart => "loading_start".to_string(),
            HostEvent::LoadingEnd => "loading_end".to_string(),
            HostEvent::Ping => "ping".to_string(),
        }
    }
}

fn strip_graph(path: &str) -> String {
    path.strip_prefix(GRAPH_PREFIX).unwrap_or(path).to_string()
}

fn parse_group(token: &str) -> Vec<String> {
    if token == EMPTY_GROUP {
        return Vec::new();
    }
    token
        .split(',')
        .filter(|p| !p.is_empty())
        .map(str::to_string)
        .collect()
}

fn format_group(ports: &[String]) -> String {
    if ports.is_empty() {
        EMPTY_GROUP.to_string()
    } else {
        ports.join(",")
    }
}

fn parse_bool(token: &str) -> Option<bool> {
    match token {
        "1" | "true" => Some(true),
        "0" | "false" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_add_full() {
        let event =
            HostEvent::parse("add /graph/DS1_0 http://example.org/DS1 in_l,in_r out_l,out_r - -")
                .unwrap();
        assert_eq!(
            event,
            HostEvent::Added {
                label: "DS1_0".into(),
                uri: "http://example.org/DS1".into(),
                ports: PortGroups {
                    audio_ins: vec!["in_l".into(), "in_r".into()],
                    audio_outs: vec!["out_l".into(), "out_r".into()],
                    midi_ins: vec![],
                    midi_outs: vec![],
                },
            }
        );
    }

    #[test]
    fn test_parse_add_trailing_groups_omitted() {
        let event = HostEvent::parse("add /graph/ExtPlug_0 urn:ext in out").unwrap();
        match event {
            HostEvent::Added { label, ports, .. } => {
                assert_eq!(label, "ExtPlug_0");
                assert_eq!(ports.audio_ins, vec!["in".to_string()]);
                assert_eq!(ports.audio_outs, vec!["out".to_string()]);
                assert!(ports.midi_ins.is_empty());
                assert!(ports.midi_outs.is_empty());
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn test_parse_remove_all() {
        assert_eq!(HostEvent::parse("remove :all"), Some(HostEvent::RemovedAll));
        assert_eq!(
            HostEvent::parse("remove /graph/DS1_0"),
            Some(HostEvent::Removed {
                label: "DS1_0".into()
            })
        );
    }

    #[test]
    fn test_parse_connect_strips_prefix() {
        let event = HostEvent::parse("connect /graph/DS1_0/out capture_1").unwrap();
        assert_eq!(
            event,
            HostEvent::Connected {
                src: "DS1_0/out".into(),
                dst: "capture_1".into(),
            }
        );
    }

    #[test]
    fn test_parse_param_set_folds_bypass() {
        let event = HostEvent::parse("param_set /graph/DS1_0 :bypass 1.0").unwrap();
        assert_eq!(
            event,
            HostEvent::Bypass {
                label: "DS1_0".into(),
                bypassed: true,
            }
        );
        let event = HostEvent::parse("param_set /graph/DS1_0 gain 0.75").unwrap();
        assert_eq!(
            event,
            HostEvent::ParamSet {
                label: "DS1_0".into(),
                symbol: "gain".into(),
                value: 0.75,
            }
        );
    }

    #[test]
    fn test_parse_hardware() {
        let event = HostEvent::parse("hardware capture_1,capture_2 playback_1,playback_2").unwrap();
        assert_eq!(
            event,
            HostEvent::Hardware(HardwarePorts {
                inputs: vec!["capture_1".into(), "capture_2".into()],
                outputs: vec!["playback_1".into(), "playback_2".into()],
            })
        );
    }

    #[test]
    fn test_parse_unknown_is_none() {
        assert_eq!(HostEvent::parse("stats 0.13 42"), None);
        assert_eq!(HostEvent::parse(""), None);
    }

    #[test]
    fn test_line_round_trip() {
        let events = [
            HostEvent::Removed {
                label: "MVerb_1".into(),
            },
            HostEvent::Connected {
                src: "DS1_0/out".into(),
                dst: "MVerb_1/in".into(),
            },
            HostEvent::Hardware(HardwarePorts {
                inputs: vec!["capture_1".into()],
                outputs: vec!["playback_1".into()],
            }),
        ];
        for event in events {
            assert_eq!(HostEvent::parse(&event.to_line()), Some(event));
        }
    }
}
