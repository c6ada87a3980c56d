// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! modrack - reactive chain client for an external audio plugin host.
//!
//! The host owns the graph; this client sends requests, mirrors the
//! host's event stream, and keeps a linear chain of plugins wired
//! make-before-break so the signal path never drops during an edit.

pub mod config;
pub mod host;
pub mod plugin;
pub mod preset;
pub mod rack;
pub mod routing;

pub use config::{Config, ExternalPolicy};
pub use preset::Preset;
pub use rack::{Notification, RackError, RackHandle, RackService, SlotSnapshot};
pub use routing::RoutingMode;
