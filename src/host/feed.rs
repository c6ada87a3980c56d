// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Event stream feed: turns the host's newline-delimited event text into
//! parsed events on a channel.

use modrack_proto::HostEvent;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Spawn the reader for a connected event stream. Keepalive pings are
/// answered in place; unknown lines are logged, never dropped silently.
pub fn spawn_feed<S>(stream: S) -> mpsc::UnboundedReceiver<HostEvent>
where
    S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
{
    let (tx, rx) = mpsc::unbounded_channel();
    tokio::spawn(async move {
        let (read_half, mut write_half) = tokio::io::split(stream);
        let mut lines = BufReader::new(read_half).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => {
                    let line = line.trim();
                    if line.is_empty() {
                        continue;
                    }
                    match HostEvent::parse(line) {
                        Some(HostEvent::Ping) => {
                            debug!("ping from host");
                            if write_half.write_all(b"pong\n").await.is_err() {
                                break;
                            }
                        }
                        Some(event) => {
                            if tx.send(event).is_err() {
                                break;
                            }
                        }
                        None => warn!(line, "unrecognized message from host"),
                    }
                }
                Ok(None) => break,
                Err(err) => {
                    warn!(%err, "event stream read failed");
                    break;
                }
            }
        }
        info!("host event stream closed");
    });
    rx
}

/// Connect to the host's event stream over TCP.
pub async fn connect(addr: &str) -> std::io::Result<mpsc::UnboundedReceiver<HostEvent>> {
    let stream = TcpStream::connect(addr).await?;
    info!(addr, "connected to host event stream");
    Ok(spawn_feed(stream))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_feed_parses_and_skips_unknown() {
        let (client, mut server) = tokio::io::duplex(1024);
        let mut rx = spawn_feed(client);

        server
            .write_all(b"remove /graph/DS1_0\nstats 0.1 2\nconnect a b\n")
            .await
            .unwrap();
        drop(server);

        assert_eq!(
            rx.recv().await,
            Some(HostEvent::Removed {
                label: "DS1_0".into()
            })
        );
        assert_eq!(
            rx.recv().await,
            Some(HostEvent::Connected {
                src: "a".into(),
                dst: "b".into()
            })
        );
        assert_eq!(rx.recv().await, None);
    }

    #[tokio::test]
    async fn test_feed_answers_ping() {
        let (client, server) = tokio::io::duplex(1024);
        let mut rx = spawn_feed(client);
        let (server_read, mut server_write) = tokio::io::split(server);

        server_write.write_all(b"ping\nloading_end\n").await.unwrap();
        assert_eq!(rx.recv().await, Some(HostEvent::LoadingEnd));

        let mut lines = BufReader::new(server_read).lines();
        assert_eq!(lines.next_line().await.unwrap(), Some("pong".to_string()));
    }
}
