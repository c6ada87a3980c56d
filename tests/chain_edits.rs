// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! End-to-end chain edits against a scripted host.
//!
//! The mock host records every command it receives and echoes the events
//! a real host would emit, so these tests pin down both the command
//! traces (connect-before-disconnect ordering) and the mirrored state.

use async_trait::async_trait;
use modrack::config::{Config, ExternalPolicy, PluginConfig};
use modrack::host::{HostTransport, TransportError};
use modrack::rack::RackService;
use modrack::{Notification, RackError, RackHandle};
use modrack_proto::{AddedPlugin, HardwarePorts, HostEvent, PortGroups};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

const DS1: &str = "http://example.org/plugins/DS1";
const MVERB: &str = "http://example.org/plugins/MVerb";
const REVERB: &str = "http://example.org/plugins/Reverb";
const DELAY: &str = "http://example.org/plugins/Delay";

#[derive(Clone)]
struct MockHost {
    inner: Arc<MockInner>,
}

struct MockInner {
    trace: Mutex<Vec<String>>,
    events: mpsc::UnboundedSender<HostEvent>,
    catalog: HashMap<String, PortGroups>,
    counter: AtomicUsize,
    /// Refuse connects whose source starts with this prefix.
    fail_connects_from: Mutex<Option<String>>,
}

fn mono() -> PortGroups {
    PortGroups {
        audio_ins: vec!["in".to_string()],
        audio_outs: vec!["out".to_string()],
        ..PortGroups::default()
    }
}

impl MockHost {
    fn new(events: mpsc::UnboundedSender<HostEvent>) -> Self {
        let catalog = [DS1, MVERB, REVERB, DELAY]
            .iter()
            .map(|uri| (uri.to_string(), mono()))
            .collect();
        Self {
            inner: Arc::new(MockInner {
                trace: Mutex::new(Vec::new()),
                events,
                catalog,
                counter: AtomicUsize::new(0),
                fail_connects_from: Mutex::new(None),
            }),
        }
    }

    fn record(&self, entry: String) {
        self.inner.trace.lock().unwrap().push(entry);
    }

    fn take_trace(&self) -> Vec<String> {
        std::mem::take(&mut *self.inner.trace.lock().unwrap())
    }

    fn fail_connects_from(&self, prefix: &str) {
        *self.inner.fail_connects_from.lock().unwrap() = Some(prefix.to_string());
    }

    fn echo(&self, event: HostEvent) {
        let _ = self.inner.events.send(event);
    }
}

#[async_trait]
impl HostTransport for MockHost {
    async fn add_plugin(&self, uri: &str) -> Result<AddedPlugin, TransportError> {
        let ports = self
            .inner
            .catalog
            .get(uri)
            .cloned()
            .ok_or_else(|| TransportError::Rejected(format!("unknown uri {uri}")))?;
        let n = self.inner.counter.fetch_add(1, Ordering::SeqCst);
        let stem = uri.rsplit('/').next().unwrap();
        let label = format!("{stem}_{n}");
        self.record(format!("add_plugin {uri} -> {label}"));
        self.echo(HostEvent::Added {
            label: label.clone(),
            uri: uri.to_string(),
            ports: ports.clone(),
        });
        Ok(AddedPlugin { label, ports })
    }

    async fn remove_plugin(&self, label: &str) -> Result<(), TransportError> {
        self.record(format!("remove_plugin {label}"));
        self.echo(HostEvent::Removed {
            label: label.to_string(),
        });
        Ok(())
    }

    async fn connect_ports(&self, src: &str, dst: &str) -> Result<(), TransportError> {
        self.record(format!("connect {src} {dst}"));
        let fail = self.inner.fail_connects_from.lock().unwrap().clone();
        if let Some(prefix) = fail {
            if src.starts_with(&prefix) {
                return Err(TransportError::Rejected(format!("no such port {src}")));
            }
        }
        self.echo(HostEvent::Connected {
            src: src.to_string(),
            dst: dst.to_string(),
        });
        Ok(())
    }

    async fn disconnect_ports(&self, src: &str, dst: &str) -> Result<(), TransportError> {
        self.record(format!("disconnect {src} {dst}"));
        self.echo(HostEvent::Disconnected {
            src: src.to_string(),
            dst: dst.to_string(),
        });
        Ok(())
    }

    async fn set_param(&self, label: &str, symbol: &str, value: f32) -> Result<(), TransportError> {
        self.record(format!("set_param {label} {symbol} {value}"));
        self.echo(HostEvent::ParamSet {
            label: label.to_string(),
            symbol: symbol.to_string(),
            value,
        });
        Ok(())
    }

    async fn set_bypass(&self, label: &str, bypassed: bool) -> Result<(), TransportError> {
        self.record(format!("set_bypass {label} {bypassed}"));
        self.echo(HostEvent::Bypass {
            label: label.to_string(),
            bypassed,
        });
        Ok(())
    }

    async fn list_hardware_ports(&self) -> Result<HardwarePorts, TransportError> {
        self.record("hardware_ports".to_string());
        Ok(HardwarePorts {
            inputs: vec!["capture_1".to_string()],
            outputs: vec!["playback_1".to_string()],
        })
    }

    async fn reset(&self) -> Result<(), TransportError> {
        self.record("reset".to_string());
        Ok(())
    }
}

fn test_config() -> Config {
    let mut config = Config::default();
    config.server.request_timeout_ms = 1000;
    config.server.echo_timeout_ms = 300;
    config.hardware.inputs = vec!["capture_1".to_string()];
    config.hardware.outputs = vec!["playback_1".to_string()];
    config.plugins = ["DS1", "MVerb", "Reverb", "Delay"]
        .iter()
        .map(|name| PluginConfig {
            name: (*name).to_string(),
            uri: format!("http://example.org/plugins/{name}"),
            category: "Test".to_string(),
            inputs: None,
            outputs: None,
            midi_inputs: None,
            midi_outputs: None,
            join_audio_inputs: false,
            join_audio_outputs: false,
            join_midi_inputs: false,
            join_midi_outputs: false,
        })
        .collect();
    config
}

fn start(
    config: Config,
) -> (
    MockHost,
    RackHandle,
    mpsc::UnboundedReceiver<Notification>,
    mpsc::UnboundedSender<HostEvent>,
) {
    let (event_tx, event_rx) = mpsc::unbounded_channel();
    let host = MockHost::new(event_tx.clone());
    let (service, handle, notifications) = RackService::new(&config, host.clone(), event_rx);
    tokio::spawn(service.run());
    (host, handle, notifications, event_tx)
}

async fn labels(handle: &RackHandle) -> Vec<String> {
    handle
        .slots()
        .await
        .unwrap()
        .into_iter()
        .map(|s| s.label)
        .collect()
}

async fn wait_for<F: FnMut() -> bool>(mut cond: F, what: &str) {
    for _ in 0..200 {
        if cond() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("timed out waiting for {what}");
}

#[tokio::test]
async fn test_insert_in_middle_is_make_before_break() {
    let (host, handle, _notifications, _events) = start(test_config());

    let ds1 = handle.request_add_plugin(DS1, None).await.unwrap();
    assert_eq!(ds1, "DS1_0");
    host.take_trace();

    let mverb = handle.request_add_plugin(MVERB, Some(1)).await.unwrap();
    assert_eq!(mverb, "MVerb_1");

    assert_eq!(
        host.take_trace(),
        vec![
            format!("add_plugin {MVERB} -> MVerb_1"),
            "connect DS1_0/out MVerb_1/in".to_string(),
            "connect MVerb_1/out playback_1".to_string(),
            "disconnect DS1_0/out playback_1".to_string(),
        ]
    );
    assert_eq!(labels(&handle).await, vec!["DS1_0", "MVerb_1"]);
}

#[tokio::test]
async fn test_replace_keeps_path_alive() {
    let (host, handle, _notifications, _events) = start(test_config());

    handle.request_add_plugin(DS1, None).await.unwrap();
    host.take_trace();

    let new_label = handle.request_replace("DS1_0", MVERB).await.unwrap();
    assert_eq!(new_label, "MVerb_1");

    assert_eq!(
        host.take_trace(),
        vec![
            format!("add_plugin {MVERB} -> MVerb_1"),
            "connect capture_1 MVerb_1/in".to_string(),
            "connect MVerb_1/out playback_1".to_string(),
            "disconnect capture_1 DS1_0/in".to_string(),
            "disconnect DS1_0/out playback_1".to_string(),
            "remove_plugin DS1_0".to_string(),
        ]
    );
    assert_eq!(labels(&handle).await, vec!["MVerb_1"]);
    let slot = handle.get_slot_by_label("MVerb_1").await.unwrap().unwrap();
    assert_eq!(slot.index, 0);
}

#[tokio::test]
async fn test_extract_bridges_neighbors_first() {
    let (host, handle, _notifications, _events) = start(test_config());

    handle.request_add_plugin(DS1, None).await.unwrap();
    handle.request_add_plugin(REVERB, None).await.unwrap();
    handle.request_add_plugin(DELAY, None).await.unwrap();
    host.take_trace();

    handle.request_remove_plugin("Reverb_1").await.unwrap();

    assert_eq!(
        host.take_trace(),
        vec![
            "connect DS1_0/out Delay_2/in".to_string(),
            "disconnect DS1_0/out Reverb_1/in".to_string(),
            "disconnect Reverb_1/out Delay_2/in".to_string(),
            "remove_plugin Reverb_1".to_string(),
        ]
    );
    assert_eq!(labels(&handle).await, vec!["DS1_0", "Delay_2"]);
}

#[tokio::test]
async fn test_external_add_is_mirrored_once() {
    let (host, handle, mut notifications, events) = start(test_config());

    events
        .send(HostEvent::Added {
            label: "ExtPlug_0".to_string(),
            uri: "urn:ext".to_string(),
            ports: mono(),
        })
        .unwrap();

    let notification = tokio::time::timeout(Duration::from_secs(2), notifications.recv())
        .await
        .expect("notification in time")
        .expect("channel open");
    match notification {
        Notification::SlotAdded(slot) => assert_eq!(slot.label, "ExtPlug_0"),
        other => panic!("unexpected notification: {other:?}"),
    }

    assert_eq!(labels(&handle).await, vec!["ExtPlug_0"]);
    let trace = host.take_trace();
    assert!(trace.contains(&"connect capture_1 ExtPlug_0/in".to_string()));
    assert!(trace.contains(&"connect ExtPlug_0/out playback_1".to_string()));

    // Exactly one SlotAdded for the whole episode.
    tokio::time::sleep(Duration::from_millis(50)).await;
    while let Ok(extra) = notifications.try_recv() {
        assert!(
            !matches!(extra, Notification::SlotAdded(_)),
            "duplicate SlotAdded"
        );
    }
}

#[tokio::test]
async fn test_external_add_reverted_under_enforce() {
    let mut config = test_config();
    config.rack.external_policy = ExternalPolicy::Enforce;
    let (host, handle, _notifications, events) = start(config);

    events
        .send(HostEvent::Added {
            label: "ExtPlug_0".to_string(),
            uri: "urn:ext".to_string(),
            ports: mono(),
        })
        .unwrap();

    wait_for(
        || {
            host.inner
                .trace
                .lock()
                .unwrap()
                .contains(&"remove_plugin ExtPlug_0".to_string())
        },
        "compensating removal",
    )
    .await;
    assert!(labels(&handle).await.is_empty());
}

#[tokio::test]
async fn test_external_remove_restored_under_enforce() {
    let mut config = test_config();
    config.rack.external_policy = ExternalPolicy::Enforce;
    let (_host, handle, _notifications, events) = start(config);

    handle.request_add_plugin(DS1, None).await.unwrap();
    handle.set_param("DS1_0", "dist", 0.7).await.unwrap();

    events
        .send(HostEvent::Removed {
            label: "DS1_0".to_string(),
        })
        .unwrap();

    // A fresh instance of the same plugin takes the slot back.
    let handle2 = handle.clone();
    wait_for_async(
        move || {
            let handle = handle2.clone();
            async move { labels(&handle).await == vec!["DS1_1".to_string()] }
        },
        "restored instance",
    )
    .await;
    let slot = handle.get_slot_by_label("DS1_1").await.unwrap().unwrap();
    let plugin = slot.plugin.unwrap();
    assert_eq!(plugin.uri, DS1);
    assert_eq!(plugin.controls.get("dist"), Some(&0.7));
}

async fn wait_for_async<F, Fut>(mut cond: F, what: &str)
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    for _ in 0..200 {
        if cond().await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("timed out waiting for {what}");
}

#[tokio::test]
async fn test_connect_failure_rolls_back() {
    let (host, handle, _notifications, _events) = start(test_config());

    handle.request_add_plugin(DS1, None).await.unwrap();
    host.take_trace();
    host.fail_connects_from("MVerb");

    let err = handle.request_add_plugin(MVERB, Some(1)).await.unwrap_err();
    assert!(matches!(err, RackError::RoutingConflict(_)));

    let trace = host.take_trace();
    // The partial new edge was rolled back and the old path never broke.
    assert!(trace.contains(&"disconnect DS1_0/out MVerb_1/in".to_string()));
    assert!(!trace.contains(&"disconnect DS1_0/out playback_1".to_string()));
    assert!(trace.contains(&"remove_plugin MVerb_1".to_string()));
    assert_eq!(labels(&handle).await, vec!["DS1_0"]);
}

#[tokio::test]
async fn test_move_connects_before_disconnecting() {
    let (host, handle, _notifications, _events) = start(test_config());

    handle.request_add_plugin(DS1, None).await.unwrap();
    handle.request_add_plugin(REVERB, None).await.unwrap();
    host.take_trace();

    handle.move_slot(0, 1).await.unwrap();
    assert_eq!(labels(&handle).await, vec!["Reverb_1", "DS1_0"]);

    let trace = host.take_trace();
    let last_connect = trace
        .iter()
        .rposition(|e| e.starts_with("connect"))
        .unwrap();
    let first_disconnect = trace
        .iter()
        .position(|e| e.starts_with("disconnect"))
        .unwrap();
    assert!(last_connect < first_disconnect, "trace: {trace:?}");
}

#[tokio::test]
async fn test_clear_routes_terminals_directly() {
    let (host, handle, _notifications, _events) = start(test_config());

    handle.request_add_plugin(DS1, None).await.unwrap();
    handle.request_add_plugin(REVERB, None).await.unwrap();
    host.take_trace();

    handle.clear().await.unwrap();

    assert!(labels(&handle).await.is_empty());
    assert_eq!(
        host.take_trace(),
        vec![
            "remove_plugin DS1_0".to_string(),
            "remove_plugin Reverb_1".to_string(),
            "connect capture_1 playback_1".to_string(),
        ]
    );
}

#[tokio::test]
async fn test_preset_round_trip() {
    let (_host, handle, _notifications, _events) = start(test_config());

    handle.request_add_plugin(DS1, None).await.unwrap();
    handle.request_add_plugin(MVERB, None).await.unwrap();
    handle.set_param("DS1_0", "dist", 0.7).await.unwrap();
    handle.set_bypass("MVerb_1", true).await.unwrap();

    let preset = handle.save_preset().await.unwrap();
    handle.clear().await.unwrap();
    assert!(labels(&handle).await.is_empty());

    handle.load_preset(preset).await.unwrap();

    let slots = handle.slots().await.unwrap();
    let plugins: Vec<_> = slots.iter().map(|s| s.plugin.as_ref().unwrap()).collect();
    assert_eq!(
        plugins.iter().map(|p| p.uri.as_str()).collect::<Vec<_>>(),
        vec![DS1, MVERB]
    );
    assert_eq!(plugins[0].controls.get("dist"), Some(&0.7));
    assert!(!plugins[0].bypassed);
    assert!(plugins[1].bypassed);
}

#[tokio::test]
async fn test_intent_validation() {
    let (host, handle, _notifications, _events) = start(test_config());
    handle.request_add_plugin(DS1, None).await.unwrap();
    host.take_trace();

    let err = handle.request_add_plugin("urn:nope", None).await.unwrap_err();
    assert!(matches!(err, RackError::UnsupportedPlugin(_)));

    let err = handle.request_remove_plugin("Ghost_9").await.unwrap_err();
    assert!(matches!(err, RackError::SlotNotFound(_)));

    // Neither rejected intent reached the host.
    assert!(host.take_trace().is_empty());
}

#[tokio::test]
async fn test_slots_limit_is_enforced() {
    let mut config = test_config();
    config.rack.slots_limit = Some(1);
    let (_host, handle, _notifications, _events) = start(config);

    handle.request_add_plugin(DS1, None).await.unwrap();
    let err = handle.request_add_plugin(MVERB, None).await.unwrap_err();
    assert!(matches!(err, RackError::SlotLimitReached(1)));
}

#[tokio::test]
async fn test_host_bulk_load_defers_routing() {
    let (host, handle, _notifications, events) = start(test_config());
    wait_for(
        || {
            host.inner
                .trace
                .lock()
                .unwrap()
                .contains(&"connect capture_1 playback_1".to_string())
        },
        "bootstrap",
    )
    .await;
    host.take_trace();

    events.send(HostEvent::LoadingStart).unwrap();
    events
        .send(HostEvent::Added {
            label: "ExtA_0".to_string(),
            uri: "urn:ext-a".to_string(),
            ports: mono(),
        })
        .unwrap();
    events
        .send(HostEvent::Added {
            label: "ExtB_1".to_string(),
            uri: "urn:ext-b".to_string(),
            ports: mono(),
        })
        .unwrap();
    events.send(HostEvent::LoadingEnd).unwrap();

    let handle2 = handle.clone();
    wait_for_async(
        move || {
            let handle = handle2.clone();
            async move { labels(&handle).await.len() == 2 }
        },
        "bulk load adoption",
    )
    .await;

    let trace = host.take_trace();
    // No connects for the first slot alone; one pass wired the whole
    // chain after loading_end.
    assert!(trace.contains(&"connect ExtA_0/out ExtB_1/in".to_string()));
    assert!(!trace.contains(&"connect ExtA_0/out playback_1".to_string()));
}
