// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Connection computation between chain endpoints.
//!
//! Pure functions: given ordered port lists and join hints, produce the
//! directed `(source, destination)` pairs to realize. Audio and MIDI are
//! computed independently, audio first.

use crate::plugin::JoinHints;
use serde::{Deserialize, Serialize};

/// A directed edge between two graph port paths.
pub type PortPair = (String, String);

/// How connections are laid across the chain.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoutingMode {
    /// Route only between adjacent non-empty slots, both media together.
    Linear,
    /// Each output feeds the nearest following endpoint with an input of
    /// the same medium; media are routed independently.
    #[default]
    HardBypass,
    /// Two parallel tracks, one across audio-bearing slots, one across
    /// MIDI-bearing slots.
    DualTrack,
}

/// One routable endpoint: a plugin slot or a terminal, reduced to its
/// graph port paths and join hints.
#[derive(Debug, Clone, Default)]
pub struct Endpoint {
    pub audio_ins: Vec<String>,
    pub audio_outs: Vec<String>,
    pub midi_ins: Vec<String>,
    pub midi_outs: Vec<String>,
    pub join: JoinHints,
}

impl Endpoint {
    fn bears_audio(&self) -> bool {
        !self.audio_ins.is_empty() || !self.audio_outs.is_empty()
    }

    fn bears_midi(&self) -> bool {
        !self.midi_ins.is_empty() || !self.midi_outs.is_empty()
    }
}

/// Pair one medium's outputs with inputs.
///
/// With a join hint the result is the full Cartesian product. Otherwise
/// ports pair index-wise; surplus outputs fold into the last input and a
/// surplus of inputs is fed by duplicating the last output.
pub fn pair_ports(outs: &[String], ins: &[String], join: bool) -> Vec<PortPair> {
    if join {
        return outs
            .iter()
            .flat_map(|out| ins.iter().map(move |inp| (out.clone(), inp.clone())))
            .collect();
    }
    if outs.is_empty() || ins.is_empty() {
        return Vec::new();
    }
    let mut pairs = Vec::new();
    if outs.len() >= ins.len() {
        for (i, out) in outs.iter().enumerate() {
            let idx = i.min(ins.len() - 1);
            pairs.push((out.clone(), ins[idx].clone()));
        }
    } else {
        for (i, out) in outs.iter().enumerate() {
            pairs.push((out.clone(), ins[i].clone()));
        }
        let last = &outs[outs.len() - 1];
        for inp in &ins[outs.len()..] {
            pairs.push((last.clone(), inp.clone()));
        }
    }
    pairs
}

fn audio_pairs(src: &Endpoint, dst: &Endpoint) -> Vec<PortPair> {
    pair_ports(
        &src.audio_outs,
        &dst.audio_ins,
        src.join.audio_outs || dst.join.audio_ins,
    )
}

fn midi_pairs(src: &Endpoint, dst: &Endpoint) -> Vec<PortPair> {
    pair_ports(
        &src.midi_outs,
        &dst.midi_ins,
        src.join.midi_outs || dst.join.midi_ins,
    )
}

/// All pairs for one adjacency, audio before MIDI.
pub fn connection_pairs(src: &Endpoint, dst: &Endpoint) -> Vec<PortPair> {
    let mut pairs = audio_pairs(src, dst);
    pairs.extend(midi_pairs(src, dst));
    pairs
}

/// The complete desired connection set for an effective chain.
///
/// `endpoints` is the effective chain in order, bookended by the input
/// and output terminals. The result order is deterministic: chain order
/// within a medium, audio before MIDI where media are computed
/// separately.
pub fn chain_connections(mode: RoutingMode, endpoints: &[Endpoint]) -> Vec<PortPair> {
    if endpoints.len() < 2 {
        return Vec::new();
    }
    match mode {
        RoutingMode::Linear => {
            let mut pairs = Vec::new();
            for pair in endpoints.windows(2) {
                pairs.extend(connection_pairs(&pair[0], &pair[1]));
            }
            pairs
        }
        RoutingMode::HardBypass => {
            let mut pairs = scan_medium(endpoints, |s, d| {
                if d.audio_ins.is_empty() {
                    None
                } else {
                    Some(audio_pairs(s, d))
                }
            });
            pairs.extend(scan_medium(endpoints, |s, d| {
                if d.midi_ins.is_empty() {
                    None
                } else {
                    Some(midi_pairs(s, d))
                }
            }));
            pairs
        }
        RoutingMode::DualTrack => {
            let audio_track = track(endpoints, Endpoint::bears_audio);
            let midi_track = track(endpoints, Endpoint::bears_midi);
            let mut pairs = Vec::new();
            for pair in audio_track.windows(2) {
                pairs.extend(audio_pairs(pair[0], pair[1]));
            }
            for pair in midi_track.windows(2) {
                pairs.extend(midi_pairs(pair[0], pair[1]));
            }
            pairs
        }
    }
}

/// For each endpoint with outputs in a medium, connect to the nearest
/// following endpoint that accepts that medium. The closure returns
/// `None` while the candidate destination has no matching input.
fn scan_medium<F>(endpoints: &[Endpoint], pair_with: F) -> Vec<PortPair>
where
    F: Fn(&Endpoint, &Endpoint) -> Option<Vec<PortPair>>,
{
    let mut pairs = Vec::new();
    for (i, src) in endpoints.iter().enumerate() {
        for dst in &endpoints[i + 1..] {
            if let Some(found) = pair_with(src, dst) {
                pairs.extend(found);
                break;
            }
        }
    }
    pairs
}

/// Medium track: terminals always participate, slots only when they bear
/// the medium.
fn track<F>(endpoints: &[Endpoint], bears: F) -> Vec<&Endpoint>
where
    F: Fn(&Endpoint) -> bool,
{
    let last = endpoints.len() - 1;
    endpoints
        .iter()
        .enumerate()
        .filter(|(i, e)| *i == 0 || *i == last || bears(e))
        .map(|(_, e)| e)
        .collect()
}
