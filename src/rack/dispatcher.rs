// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Single serialized timeline for host events and user intents, with the
//! structural-suppression scope used during self-initiated edits.

use crate::rack::{Intent, RackError};
use modrack_proto::HostEvent;
use std::collections::VecDeque;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{timeout, Instant};
use tracing::{debug, warn};

/// An event the host is expected to echo back for the current edit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum EchoPredicate {
    Add(String),
    Remove(String),
    Connect(String, String),
    Disconnect(String, String),
}

impl EchoPredicate {
    fn matches(&self, event: &HostEvent) -> bool {
        match (self, event) {
            (Self::Add(label), HostEvent::Added { label: l, .. }) => label == l,
            (Self::Remove(label), HostEvent::Removed { label: l }) => label == l,
            (Self::Connect(s, d), HostEvent::Connected { src, dst }) => s == src && d == dst,
            (Self::Disconnect(s, d), HostEvent::Disconnected { src, dst }) => {
                s == src && d == dst
            }
            _ => false,
        }
    }
}

/// One item drawn from the timeline.
pub(crate) enum QueueItem {
    Intent(Intent),
    Event(HostEvent),
}

/// Owns the intent and event queues plus the suppression scope. Events
/// matching a scope predicate are absorbed as confirmations; everything
/// else reaches the orchestrator as an external change, in order.
pub(crate) struct Dispatcher {
    intent_rx: mpsc::UnboundedReceiver<Intent>,
    event_rx: mpsc::UnboundedReceiver<HostEvent>,
    backlog: VecDeque<HostEvent>,
    scope: Vec<EchoPredicate>,
    intents_closed: bool,
    events_closed: bool,
}

impl Dispatcher {
    pub fn new(
        intent_rx: mpsc::UnboundedReceiver<Intent>,
        event_rx: mpsc::UnboundedReceiver<HostEvent>,
    ) -> Self {
        Self {
            intent_rx,
            event_rx,
            backlog: VecDeque::new(),
            scope: Vec::new(),
            intents_closed: false,
            events_closed: false,
        }
    }

    /// Next item on the timeline. Events deferred during an edit drain
    /// before anything new; otherwise host events win over intents so the
    /// mirror reflects the host before the next edit starts.
    pub async fn next_item(&mut self) -> Option<QueueItem> {
        if let Some(event) = self.backlog.pop_front() {
            return Some(QueueItem::Event(event));
        }
        loop {
            tokio::select! {
                biased;
                event = self.event_rx.recv(), if !self.events_closed => match event {
                    Some(event) => return Some(QueueItem::Event(event)),
                    None => self.events_closed = true,
                },
                intent = self.intent_rx.recv(), if !self.intents_closed => match intent {
                    Some(intent) => return Some(QueueItem::Intent(intent)),
                    None => self.intents_closed = true,
                },
                else => return None,
            }
        }
    }

    /// Install an echo predicate in the current edit's scope.
    pub fn expect(&mut self, predicate: EchoPredicate) {
        self.scope.push(predicate);
    }

    /// Wait for one specific echo, absorbing other in-scope echoes on the
    /// way and deferring external events to the backlog.
    pub async fn await_echo(
        &mut self,
        wanted: &EchoPredicate,
        wait: Duration,
    ) -> Result<HostEvent, RackError> {
        let deadline = Instant::now() + wait;
        loop {
            let remaining = deadline
                .checked_duration_since(Instant::now())
                .ok_or(RackError::Timeout)?;
            let event = match timeout(remaining, self.event_rx.recv()).await {
                Ok(Some(event)) => event,
                Ok(None) => {
                    self.events_closed = true;
                    return Err(RackError::Transport("event stream closed".to_string()));
                }
                Err(_) => return Err(RackError::Timeout),
            };
            if wanted.matches(&event) {
                self.retire(wanted);
                debug!(?event, "absorbed awaited echo");
                return Ok(event);
            }
            if self.absorb_if_in_scope(&event) {
                continue;
            }
            self.backlog.push_back(event);
        }
    }

    /// Drain the scope at the end of an edit: wait up to `grace` for the
    /// remaining echoes, then log whatever the host never sent.
    pub async fn settle(&mut self, grace: Duration) {
        let deadline = Instant::now() + grace;
        while !self.scope.is_empty() && !self.events_closed {
            let Some(remaining) = deadline.checked_duration_since(Instant::now()) else {
                break;
            };
            match timeout(remaining, self.event_rx.recv()).await {
                Ok(Some(event)) => {
                    if !self.absorb_if_in_scope(&event) {
                        self.backlog.push_back(event);
                    }
                }
                Ok(None) => self.events_closed = true,
                Err(_) => break,
            }
        }
        for predicate in self.scope.drain(..) {
            warn!(?predicate, "edit finished without echo from host");
        }
    }

    fn absorb_if_in_scope(&mut self, event: &HostEvent) -> bool {
        if let Some(index) = self.scope.iter().position(|p| p.matches(event)) {
            debug!(?event, "absorbed self-echo");
            self.scope.remove(index);
            true
        } else {
            false
        }
    }

    fn retire(&mut self, predicate: &EchoPredicate) {
        if let Some(index) = self.scope.iter().position(|p| p == predicate) {
            self.scope.remove(index);
        }
    }
}
