// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! modrack supervisor - headless chain client.
//!
//! Connects to the plugin host, mirrors its graph, and keeps the chain
//! wired. GUIs and scripts drive the same core through [`RackHandle`].

use modrack::host::{feed, RestTransport};
use modrack::rack::RackService;
use modrack::Config;
use std::path::PathBuf;
use tracing::{error, info, warn};

fn config_path() -> PathBuf {
    if let Some(arg) = std::env::args().nth(1) {
        return PathBuf::from(arg);
    }
    directories::ProjectDirs::from("org", "modrack", "modrack")
        .map(|dirs| dirs.config_dir().join("modrack.toml"))
        .unwrap_or_else(|| PathBuf::from("modrack.toml"))
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("modrack=debug".parse().unwrap()),
        )
        .init();

    info!("modrack starting...");

    let config = Config::load(config_path())?;
    info!(
        "host at {}, {} whitelisted plugins",
        config.server.url,
        config.plugins.len()
    );

    let transport = RestTransport::new(&config.server.url, config.server.request_timeout())?;
    let events = match feed::connect(&config.server.events_addr).await {
        Ok(events) => events,
        Err(err) => {
            error!(%err, addr = %config.server.events_addr, "event stream unreachable");
            return Err(err.into());
        }
    };

    let (service, handle, mut notifications) = RackService::new(&config, transport, events);
    tokio::spawn(service.run());

    // Keep the handle alive for the whole session; scripts and GUIs would
    // clone it from here.
    let _handle = handle;

    tokio::spawn(async move {
        while let Some(notification) = notifications.recv().await {
            info!(?notification, "chain update");
        }
    });

    info!("modrack ready");

    let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;
    let mut sigint = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::interrupt())?;

    tokio::select! {
        _ = sigterm.recv() => {
            info!("received SIGTERM, shutting down...");
        }
        _ = sigint.recv() => {
            info!("received SIGINT, shutting down...");
        }
    }

    warn!("modrack stopped");
    Ok(())
}
