// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! The orchestrator: accepts user intents, drives the host, reconciles
//! its event stream, and keeps the chain wired make-before-break.

use crate::config::{Config, ExternalPolicy};
use crate::host::{HostTransport, TransportError};
use crate::plugin::{Plugin, PluginCatalog};
use crate::preset::{Preset, PresetSlot};
use crate::rack::dispatcher::{Dispatcher, EchoPredicate, QueueItem};
use crate::rack::slots::{Slot, SlotRegistry, Terminal};
use crate::rack::{Intent, Notification, RackError, RackHandle, SlotSnapshot};
use crate::routing::{self, Endpoint, PortPair, RoutingMode};
use modrack_proto::{HardwarePorts, HostEvent, PortGroups};
use std::future::Future;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tracing::{debug, info, warn};

/// Where the chain is in its edit cycle. Processing is run-to-completion,
/// so anything but `Idle` at the start of an edit is a bug.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ChainState {
    Idle,
    Editing,
    Reconciling,
}

/// Wrap a transport call with the per-request timeout.
async fn call<V, F>(wait: Duration, fut: F) -> Result<V, RackError>
where
    F: Future<Output = Result<V, TransportError>>,
{
    match timeout(wait, fut).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(err)) => Err(RackError::Transport(err.to_string())),
        Err(_) => Err(RackError::Timeout),
    }
}

/// The chain orchestrator. Owns the slot registry and the terminal
/// sentinels; every mutation of either happens here, one queue item at a
/// time.
pub struct RackService<T: HostTransport> {
    transport: T,
    dispatcher: Dispatcher,
    registry: SlotRegistry,
    input_terminal: Terminal,
    output_terminal: Terminal,
    catalog: PluginCatalog,
    routing_mode: RoutingMode,
    external_policy: ExternalPolicy,
    slots_limit: Option<usize>,
    request_timeout: Duration,
    echo_grace: Duration,
    /// Config-pinned hardware ports ignore discovery and host updates.
    inputs_pinned: bool,
    outputs_pinned: bool,
    /// Edges this client has commanded, in chain order.
    commanded: Vec<PortPair>,
    notify_tx: mpsc::UnboundedSender<Notification>,
    state: ChainState,
    /// Bulk load in progress: skip per-edit routing, one pass at the end.
    loading: bool,
}

impl<T: HostTransport> RackService<T> {
    /// Build the service plus its intent handle and notification stream.
    pub fn new(
        config: &Config,
        transport: T,
        events: mpsc::UnboundedReceiver<HostEvent>,
    ) -> (Self, RackHandle, mpsc::UnboundedReceiver<Notification>) {
        let (intent_tx, intent_rx) = mpsc::unbounded_channel();
        let (notify_tx, notify_rx) = mpsc::unbounded_channel();
        let (input_terminal, output_terminal) = Terminal::from_config(&config.hardware);
        let service = Self {
            transport,
            dispatcher: Dispatcher::new(intent_rx, events),
            registry: SlotRegistry::new(),
            input_terminal,
            output_terminal,
            catalog: PluginCatalog::new(&config.plugins),
            routing_mode: config.rack.routing_mode,
            external_policy: config.rack.external_policy,
            slots_limit: config.rack.slots_limit,
            request_timeout: config.server.request_timeout(),
            echo_grace: config.server.echo_timeout(),
            inputs_pinned: !config.hardware.inputs.is_empty(),
            outputs_pinned: !config.hardware.outputs.is_empty(),
            commanded: Vec::new(),
            notify_tx,
            state: ChainState::Idle,
            loading: false,
        };
        (service, RackHandle::new(intent_tx), notify_rx)
    }

    /// Drive the chain until both the handle and the event stream drop.
    pub async fn run(mut self) {
        if let Err(err) = self.bootstrap().await {
            warn!(%err, "bootstrap failed");
            self.emit_error(err);
        }
        while let Some(item) = self.dispatcher.next_item().await {
            match item {
                QueueItem::Intent(intent) => self.handle_intent(intent).await,
                QueueItem::Event(event) => self.reconcile(event).await,
            }
        }
        info!("rack service stopped");
    }

    /// Startup: discover hardware ports, reset the host, route the
    /// terminal pair.
    async fn bootstrap(&mut self) -> Result<(), RackError> {
        match call(self.request_timeout, self.transport.list_hardware_ports()).await {
            Ok(ports) => self.apply_hardware(ports),
            Err(err) => warn!(%err, "hardware discovery failed, using configured ports"),
        }
        call(self.request_timeout, self.transport.reset()).await?;
        self.sync_connections(None).await?;
        self.dispatcher.settle(self.echo_grace).await;
        info!("chain converged, terminals routed");
        Ok(())
    }

    fn apply_hardware(&mut self, ports: HardwarePorts) {
        if self.inputs_pinned {
            debug!("configured hardware inputs override {:?}", ports.inputs);
        } else {
            self.input_terminal.audio_ports = ports.inputs;
        }
        if self.outputs_pinned {
            debug!("configured hardware outputs override {:?}", ports.outputs);
        } else {
            self.output_terminal.audio_ports = ports.outputs;
        }
    }

    // =====================================================================
    // Intents
    // =====================================================================

    async fn handle_intent(&mut self, intent: Intent) {
        match intent {
            Intent::AddPlugin {
                uri,
                position,
                reply,
            } => {
                let _ = reply.send(self.request_add(&uri, position).await);
            }
            Intent::RemovePlugin { label, reply } => {
                let _ = reply.send(self.request_remove(&label).await);
            }
            Intent::Replace { label, uri, reply } => {
                let _ = reply.send(self.request_replace(&label, &uri).await);
            }
            Intent::MoveSlot { from, to, reply } => {
                let _ = reply.send(self.request_move(from, to).await);
            }
            Intent::Clear { reply } => {
                let _ = reply.send(self.request_clear().await);
            }
            Intent::SetParam {
                label,
                symbol,
                value,
                reply,
            } => {
                let _ = reply.send(self.request_set_param(&label, &symbol, value).await);
            }
            Intent::SetBypass {
                label,
                bypassed,
                reply,
            } => {
                let _ = reply.send(self.request_set_bypass(&label, bypassed).await);
            }
            Intent::SavePreset { reply } => {
                let _ = reply.send(Ok(self.snapshot_preset()));
            }
            Intent::LoadPreset { preset, reply } => {
                let _ = reply.send(self.load_preset(preset).await);
            }
            Intent::Snapshot { reply } => {
                let _ = reply.send(self.registry.iter().map(SlotSnapshot::of).collect());
            }
        }
    }

    fn begin_edit(&mut self) -> Result<(), RackError> {
        if self.state != ChainState::Idle {
            let err = RackError::InvariantViolation(format!(
                "edit started in {:?} state",
                self.state
            ));
            self.emit_error(err.clone());
            return Err(err);
        }
        self.state = ChainState::Editing;
        Ok(())
    }

    async fn request_add(
        &mut self,
        uri: &str,
        position: Option<usize>,
    ) -> Result<String, RackError> {
        if !self.catalog.contains(uri) {
            return Err(RackError::UnsupportedPlugin(uri.to_string()));
        }
        if let Some(limit) = self.slots_limit {
            if self.registry.len() >= limit {
                return Err(RackError::SlotLimitReached(limit));
            }
        }
        self.begin_edit()?;
        let result = self.insert_plugin(uri, position).await;
        self.state = ChainState::Idle;
        result
    }

    async fn insert_plugin(
        &mut self,
        uri: &str,
        position: Option<usize>,
    ) -> Result<String, RackError> {
        let added = call(self.request_timeout, self.transport.add_plugin(uri)).await?;
        if self.registry.get_by_label(&added.label).is_some() {
            let err = RackError::DuplicateLabel(added.label.clone());
            self.emit_error(err.clone());
            return Err(err);
        }
        let label = added.label.clone();
        let ports = self.await_add_echo(&label, added.ports).await?;
        let plugin = self
            .catalog
            .instantiate(uri, &ports)
            .unwrap_or_else(|| PluginCatalog::adopt(uri, &ports));
        let index = position.unwrap_or(self.registry.len());
        self.registry.insert(index, Slot::new(label.clone(), plugin));

        if !self.loading {
            if let Err(err) = self.sync_connections(None).await {
                self.registry.remove_by_label(&label);
                self.discard_instance(&label).await;
                self.dispatcher.settle(self.echo_grace).await;
                return Err(err);
            }
        }
        self.dispatcher.settle(self.echo_grace).await;
        let snapshot = self.registry.get_by_label(&label).map(SlotSnapshot::of);
        if let Some(snapshot) = snapshot {
            self.notify(Notification::SlotAdded(snapshot));
        }
        info!(%label, %uri, "slot added");
        Ok(label)
    }

    /// Wait for the host's `add` echo; its port payload is authoritative.
    async fn await_add_echo(
        &mut self,
        label: &str,
        fallback: PortGroups,
    ) -> Result<PortGroups, RackError> {
        let wanted = EchoPredicate::Add(label.to_string());
        self.dispatcher.expect(wanted.clone());
        match self.dispatcher.await_echo(&wanted, self.request_timeout).await {
            Ok(HostEvent::Added { ports, .. }) => Ok(ports),
            Ok(_) => Ok(fallback),
            Err(err) => {
                self.discard_instance(label).await;
                self.dispatcher.settle(self.echo_grace).await;
                Err(err)
            }
        }
    }

    /// Best-effort removal of an instance that never made it into the
    /// chain.
    async fn discard_instance(&mut self, label: &str) {
        if call(self.request_timeout, self.transport.remove_plugin(label))
            .await
            .is_ok()
        {
            self.dispatcher.expect(EchoPredicate::Remove(label.to_string()));
        }
    }

    async fn request_remove(&mut self, label: &str) -> Result<(), RackError> {
        if self.registry.get_by_label(label).is_none() {
            return Err(RackError::SlotNotFound(label.to_string()));
        }
        self.begin_edit()?;
        let result = self.extract_slot(label).await;
        self.state = ChainState::Idle;
        result
    }

    async fn extract_slot(&mut self, label: &str) -> Result<(), RackError> {
        // Bridge the neighbors before the target's edges go away.
        if let Err(err) = self.sync_connections(Some(label)).await {
            self.dispatcher.settle(self.echo_grace).await;
            return Err(err);
        }
        if let Err(err) = call(self.request_timeout, self.transport.remove_plugin(label)).await {
            // Removal refused; put the target back into the path.
            let _ = self.sync_connections(None).await;
            self.dispatcher.settle(self.echo_grace).await;
            return Err(err);
        }
        self.await_remove_echo(label).await;
        self.drop_slot(label);
        self.dispatcher.settle(self.echo_grace).await;
        self.notify(Notification::SlotRemoved {
            label: label.to_string(),
        });
        info!(%label, "slot removed");
        Ok(())
    }

    /// The host acknowledged removal; its echo finalizes the slot's
    /// destruction. A missing echo is logged, not fatal.
    async fn await_remove_echo(&mut self, label: &str) {
        let wanted = EchoPredicate::Remove(label.to_string());
        self.dispatcher.expect(wanted.clone());
        if let Err(err) = self.dispatcher.await_echo(&wanted, self.request_timeout).await {
            warn!(%label, %err, "remove acknowledged but echo never arrived");
        }
    }

    /// Drop a slot from the registry and forget edges that died with its
    /// instance.
    fn drop_slot(&mut self, label: &str) -> Option<Slot> {
        let prefix = format!("{label}/");
        self.commanded
            .retain(|(src, dst)| !src.starts_with(&prefix) && !dst.starts_with(&prefix));
        self.registry.remove_by_label(label)
    }

    async fn request_replace(&mut self, label: &str, uri: &str) -> Result<String, RackError> {
        let Some(old_index) = self.registry.position_of(label) else {
            return Err(RackError::SlotNotFound(label.to_string()));
        };
        if !self.catalog.contains(uri) {
            return Err(RackError::UnsupportedPlugin(uri.to_string()));
        }
        self.begin_edit()?;
        let result = self.swap_slot(label, uri, old_index).await;
        self.state = ChainState::Idle;
        result
    }

    async fn swap_slot(
        &mut self,
        old_label: &str,
        uri: &str,
        old_index: usize,
    ) -> Result<String, RackError> {
        let added = call(self.request_timeout, self.transport.add_plugin(uri)).await?;
        if self.registry.get_by_label(&added.label).is_some() {
            let err = RackError::DuplicateLabel(added.label.clone());
            self.emit_error(err.clone());
            return Err(err);
        }
        let new_label = added.label.clone();
        let ports = self.await_add_echo(&new_label, added.ports).await?;
        let plugin = self
            .catalog
            .instantiate(uri, &ports)
            .unwrap_or_else(|| PluginCatalog::adopt(uri, &ports));
        // The registry carries both briefly; the new slot takes over the
        // index once the old is destroyed.
        self.registry
            .insert(old_index + 1, Slot::new(new_label.clone(), plugin));

        if let Err(err) = self.sync_connections(Some(old_label)).await {
            self.registry.remove_by_label(&new_label);
            self.discard_instance(&new_label).await;
            self.dispatcher.settle(self.echo_grace).await;
            return Err(err);
        }
        match call(self.request_timeout, self.transport.remove_plugin(old_label)).await {
            Ok(()) => self.await_remove_echo(old_label).await,
            Err(err) => {
                warn!(label = %old_label, %err, "old instance removal failed, new path is live")
            }
        }
        self.drop_slot(old_label);
        self.dispatcher.settle(self.echo_grace).await;
        let snapshot = self.registry.get_by_label(&new_label).map(SlotSnapshot::of);
        if let Some(snapshot) = snapshot {
            self.notify(Notification::SlotAdded(snapshot));
        }
        self.notify(Notification::SlotRemoved {
            label: old_label.to_string(),
        });
        info!(old = %old_label, new = %new_label, "slot replaced");
        Ok(new_label)
    }

    async fn request_move(&mut self, from: usize, to: usize) -> Result<(), RackError> {
        if from >= self.registry.len() || to >= self.registry.len() {
            return Err(RackError::SlotNotFound(format!("index {}", from.max(to))));
        }
        if from == to {
            return Ok(());
        }
        self.begin_edit()?;
        self.registry.move_slot(from, to);
        let result = self.sync_connections(None).await;
        if result.is_err() {
            // Partial connects already rolled back; restore the order.
            self.registry.move_slot(to, from);
        }
        self.dispatcher.settle(self.echo_grace).await;
        self.state = ChainState::Idle;
        result
    }

    async fn request_clear(&mut self) -> Result<(), RackError> {
        self.begin_edit()?;
        let labels: Vec<String> = self.registry.iter().map(|s| s.label.clone()).collect();
        for label in &labels {
            if let Err(err) = call(self.request_timeout, self.transport.remove_plugin(label)).await
            {
                warn!(%label, %err, "remove during clear failed, slot kept");
                continue;
            }
            self.await_remove_echo(label).await;
            self.drop_slot(label);
            self.notify(Notification::SlotRemoved {
                label: label.clone(),
            });
        }
        let result = self.sync_connections(None).await;
        self.dispatcher.settle(self.echo_grace).await;
        self.state = ChainState::Idle;
        result
    }

    async fn request_set_param(
        &mut self,
        label: &str,
        symbol: &str,
        value: f32,
    ) -> Result<(), RackError> {
        if self.registry.get_by_label(label).is_none() {
            return Err(RackError::SlotNotFound(label.to_string()));
        }
        call(
            self.request_timeout,
            self.transport.set_param(label, symbol, value),
        )
        .await?;
        if let Some(plugin) = self
            .registry
            .get_by_label_mut(label)
            .and_then(|s| s.plugin.as_mut())
        {
            plugin.controls.insert(symbol.to_string(), value);
        }
        Ok(())
    }

    async fn request_set_bypass(&mut self, label: &str, bypassed: bool) -> Result<(), RackError> {
        if self.registry.get_by_label(label).is_none() {
            return Err(RackError::SlotNotFound(label.to_string()));
        }
        call(
            self.request_timeout,
            self.transport.set_bypass(label, bypassed),
        )
        .await?;
        if let Some(plugin) = self
            .registry
            .get_by_label_mut(label)
            .and_then(|s| s.plugin.as_mut())
        {
            plugin.bypassed = bypassed;
        }
        Ok(())
    }

    fn snapshot_preset(&self) -> Preset {
        let slots = self
            .registry
            .iter()
            .filter_map(|slot| {
                let plugin = slot.plugin.as_ref()?;
                Some(PresetSlot {
                    index: slot.index,
                    uri: plugin.uri.clone(),
                    controls: plugin.controls.clone(),
                    bypassed: plugin.bypassed,
                })
            })
            .collect();
        Preset { slots }
    }

    /// Rebuild the chain from a preset. One routing pass at the end; no
    /// make-before-break guarantee during the bulk load.
    async fn load_preset(&mut self, preset: Preset) -> Result<(), RackError> {
        self.request_clear().await?;
        self.loading = true;
        let mut entries = preset.slots;
        entries.sort_by_key(|s| s.index);
        for entry in &entries {
            if let Err(err) = self.restore_preset_slot(entry).await {
                warn!(uri = %entry.uri, %err, "failed to restore preset slot");
            }
        }
        self.loading = false;
        let result = self.sync_connections(None).await;
        self.dispatcher.settle(self.echo_grace).await;
        result
    }

    async fn restore_preset_slot(&mut self, entry: &PresetSlot) -> Result<(), RackError> {
        let label = self.request_add(&entry.uri, None).await?;
        for (symbol, value) in &entry.controls {
            self.request_set_param(&label, symbol, *value).await?;
        }
        if entry.bypassed {
            self.request_set_bypass(&label, true).await?;
        }
        Ok(())
    }

    // =====================================================================
    // Routing
    // =====================================================================

    /// The effective chain as routing endpoints, terminals included.
    fn chain_endpoints(&self, exclude: Option<&str>) -> Vec<Endpoint> {
        let mut endpoints = vec![self.input_terminal.endpoint()];
        for slot in self.registry.iter() {
            if exclude == Some(slot.label.as_str()) {
                continue;
            }
            if let Some(endpoint) = slot.endpoint() {
                endpoints.push(endpoint);
            }
        }
        endpoints.push(self.output_terminal.endpoint());
        endpoints
    }

    /// Diff the desired connection set against the commanded edges and
    /// realize it make-before-break: every connect is issued and
    /// acknowledged before the first disconnect. A failed connect rolls
    /// the new edges back and leaves the old path intact.
    async fn sync_connections(&mut self, exclude: Option<&str>) -> Result<(), RackError> {
        if self.loading {
            return Ok(());
        }
        let desired =
            routing::chain_connections(self.routing_mode, &self.chain_endpoints(exclude));
        let to_connect: Vec<PortPair> = desired
            .iter()
            .filter(|pair| !self.commanded.contains(pair))
            .cloned()
            .collect();
        let to_disconnect: Vec<PortPair> = self
            .commanded
            .iter()
            .filter(|pair| !desired.contains(pair))
            .cloned()
            .collect();
        if to_connect.is_empty() && to_disconnect.is_empty() {
            return Ok(());
        }
        debug!(
            connects = to_connect.len(),
            disconnects = to_disconnect.len(),
            "syncing graph"
        );

        let mut made: Vec<PortPair> = Vec::new();
        for (src, dst) in &to_connect {
            match call(
                self.request_timeout,
                self.transport.connect_ports(src, dst),
            )
            .await
            {
                Ok(()) => {
                    self.dispatcher
                        .expect(EchoPredicate::Connect(src.clone(), dst.clone()));
                    self.commanded.push((src.clone(), dst.clone()));
                    made.push((src.clone(), dst.clone()));
                }
                Err(err) => {
                    warn!(%src, %dst, %err, "connect failed, rolling back");
                    self.rollback_connections(&made).await;
                    return Err(RackError::RoutingConflict(format!(
                        "{src} -> {dst}: {err}"
                    )));
                }
            }
        }
        for (src, dst) in &to_disconnect {
            match call(
                self.request_timeout,
                self.transport.disconnect_ports(src, dst),
            )
            .await
            {
                Ok(()) => {
                    self.dispatcher
                        .expect(EchoPredicate::Disconnect(src.clone(), dst.clone()));
                    self.commanded.retain(|p| p.0 != *src || p.1 != *dst);
                }
                Err(err) => {
                    // The new path is already live; keep the stale edge
                    // for retry on the next pass.
                    warn!(%src, %dst, %err, "disconnect failed, edge kept");
                }
            }
        }
        Ok(())
    }

    async fn rollback_connections(&mut self, made: &[PortPair]) {
        for (src, dst) in made {
            if call(
                self.request_timeout,
                self.transport.disconnect_ports(src, dst),
            )
            .await
            .is_ok()
            {
                self.dispatcher
                    .expect(EchoPredicate::Disconnect(src.clone(), dst.clone()));
            }
            self.commanded.retain(|p| p.0 != *src || p.1 != *dst);
        }
    }

    // =====================================================================
    // Reconciliation
    // =====================================================================

    /// An event with no matching local edit: adjust the mirror to what
    /// the host says.
    async fn reconcile(&mut self, event: HostEvent) {
        match event {
            HostEvent::Added { label, uri, ports } => {
                self.reconcile_added(label, uri, ports).await;
            }
            HostEvent::Removed { label } => self.reconcile_removed(label).await,
            HostEvent::RemovedAll => self.reconcile_removed_all().await,
            HostEvent::Connected { src, dst } => {
                let pair = (src, dst);
                if !self.commanded.contains(&pair) {
                    debug!(src = %pair.0, dst = %pair.1, "external edge recorded");
                    self.commanded.push(pair);
                }
            }
            HostEvent::Disconnected { src, dst } => {
                self.commanded.retain(|p| p.0 != src || p.1 != dst);
            }
            HostEvent::ParamSet {
                label,
                symbol,
                value,
            } => {
                if let Some(plugin) = self
                    .registry
                    .get_by_label_mut(&label)
                    .and_then(|s| s.plugin.as_mut())
                {
                    plugin.controls.insert(symbol.clone(), value);
                    self.notify(Notification::ParamChanged {
                        label,
                        symbol,
                        value,
                    });
                } else {
                    debug!(%label, "param change for unknown label ignored");
                }
            }
            HostEvent::Bypass { label, bypassed } => {
                if let Some(plugin) = self
                    .registry
                    .get_by_label_mut(&label)
                    .and_then(|s| s.plugin.as_mut())
                {
                    plugin.bypassed = bypassed;
                    self.notify(Notification::BypassChanged { label, bypassed });
                } else {
                    debug!(%label, "bypass change for unknown label ignored");
                }
            }
            HostEvent::Hardware(ports) => {
                info!("hardware port set replaced by host");
                self.apply_hardware(ports);
                if let Err(err) = self.sync_connections(None).await {
                    self.emit_error(err);
                }
                self.dispatcher.settle(self.echo_grace).await;
            }
            HostEvent::LoadingStart => {
                info!("host bulk load started");
                self.loading = true;
            }
            HostEvent::LoadingEnd => {
                info!("host bulk load finished");
                self.loading = false;
                if let Err(err) = self.sync_connections(None).await {
                    self.emit_error(err);
                }
                self.dispatcher.settle(self.echo_grace).await;
            }
            HostEvent::Ping => {}
        }
    }

    async fn reconcile_added(&mut self, label: String, uri: String, ports: PortGroups) {
        if self.registry.get_by_label(&label).is_some() {
            self.emit_error(RackError::InvariantViolation(format!(
                "duplicate add event for label {label}"
            )));
            return;
        }
        match self.external_policy {
            ExternalPolicy::Mirror => {
                self.state = ChainState::Reconciling;
                info!(%label, %uri, "adopting externally added plugin");
                let plugin = self
                    .catalog
                    .instantiate(&uri, &ports)
                    .unwrap_or_else(|| PluginCatalog::adopt(&uri, &ports));
                self.registry.append(Slot::new(label.clone(), plugin));
                if let Err(err) = self.sync_connections(None).await {
                    self.emit_error(err);
                }
                self.dispatcher.settle(self.echo_grace).await;
                self.state = ChainState::Idle;
                let snapshot = self.registry.get_by_label(&label).map(SlotSnapshot::of);
                if let Some(snapshot) = snapshot {
                    self.notify(Notification::SlotAdded(snapshot));
                }
            }
            ExternalPolicy::Enforce => {
                self.state = ChainState::Reconciling;
                warn!(%label, %uri, "reverting external add");
                let wanted = EchoPredicate::Remove(label.clone());
                self.dispatcher.expect(wanted.clone());
                match call(self.request_timeout, self.transport.remove_plugin(&label)).await {
                    Ok(()) => {
                        let _ = self
                            .dispatcher
                            .await_echo(&wanted, self.request_timeout)
                            .await;
                    }
                    Err(err) => self.emit_error(err),
                }
                self.dispatcher.settle(self.echo_grace).await;
                self.state = ChainState::Idle;
            }
        }
    }

    async fn reconcile_removed(&mut self, label: String) {
        if self.registry.get_by_label(&label).is_none() {
            debug!(%label, "remove event for unknown label ignored");
            return;
        }
        self.state = ChainState::Reconciling;
        match self.external_policy {
            ExternalPolicy::Mirror => {
                info!(%label, "mirroring external removal");
                self.drop_slot(&label);
                if let Err(err) = self.sync_connections(None).await {
                    self.emit_error(err);
                }
                self.dispatcher.settle(self.echo_grace).await;
                self.notify(Notification::SlotRemoved { label });
            }
            ExternalPolicy::Enforce => {
                warn!(%label, "reverting external removal");
                let Some(slot) = self.drop_slot(&label) else {
                    self.state = ChainState::Idle;
                    return;
                };
                self.notify(Notification::SlotRemoved {
                    label: label.clone(),
                });
                let index = slot.index;
                if let Some(plugin) = slot.plugin {
                    match self.restore_instance(&plugin, index).await {
                        Ok(new_label) => {
                            info!(old = %label, new = %new_label, "instance restored")
                        }
                        Err(err) => self.emit_error(err),
                    }
                }
            }
        }
        self.state = ChainState::Idle;
    }

    /// Re-create a removed instance with its controls and bypass state.
    async fn restore_instance(
        &mut self,
        plugin: &Plugin,
        index: usize,
    ) -> Result<String, RackError> {
        let added = call(self.request_timeout, self.transport.add_plugin(&plugin.uri)).await?;
        let label = added.label.clone();
        let ports = self.await_add_echo(&label, added.ports).await?;
        let mut restored = self
            .catalog
            .instantiate(&plugin.uri, &ports)
            .unwrap_or_else(|| PluginCatalog::adopt(&plugin.uri, &ports));
        restored.controls = plugin.controls.clone();
        restored.bypassed = plugin.bypassed;
        self.registry.insert(index, Slot::new(label.clone(), restored));
        for (symbol, value) in &plugin.controls {
            let _ = call(
                self.request_timeout,
                self.transport.set_param(&label, symbol, *value),
            )
            .await;
        }
        if plugin.bypassed {
            let _ = call(self.request_timeout, self.transport.set_bypass(&label, true)).await;
        }
        self.sync_connections(None).await?;
        self.dispatcher.settle(self.echo_grace).await;
        let snapshot = self.registry.get_by_label(&label).map(SlotSnapshot::of);
        if let Some(snapshot) = snapshot {
            self.notify(Notification::SlotAdded(snapshot));
        }
        Ok(label)
    }

    async fn reconcile_removed_all(&mut self) {
        info!("host removed every instance");
        let slots = self.registry.clear();
        for slot in &slots {
            let prefix = format!("{}/", slot.label);
            self.commanded
                .retain(|(src, dst)| !src.starts_with(&prefix) && !dst.starts_with(&prefix));
        }
        for slot in slots {
            self.notify(Notification::SlotRemoved { label: slot.label });
        }
        if let Err(err) = self.sync_connections(None).await {
            self.emit_error(err);
        }
        self.dispatcher.settle(self.echo_grace).await;
    }

    // =====================================================================
    // Notifications
    // =====================================================================

    fn notify(&self, notification: Notification) {
        if self.notify_tx.send(notification).is_err() {
            debug!("notification receiver dropped");
        }
    }

    fn emit_error(&self, err: RackError) {
        warn!(%err, "asynchronous failure");
        self.notify(Notification::Error(err));
    }
}
