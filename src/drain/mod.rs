// SPDX-License-Identifier: Apache-2.0

//! Line delivery to a syslog collector over UDP or TCP.

pub mod packet;
pub mod transport;

use crate::drain::packet::Packet;
use crate::drain::transport::{TcpTransport, Transport, UdpTransport};
use async_trait::async_trait;
use chrono::Local;
use serde::Deserialize;
use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::io;
use thiserror::Error;
use tokio::sync::Mutex;

#[derive(Debug, Error)]
pub enum DrainError {
    #[error("failed to connect to {addr}: {source}")]
    Connect { addr: String, source: io::Error },

    #[error("send failed: {0}")]
    Send(#[from] io::Error),
}

/// Sink for tailed lines. Every call delivers one complete packet; a
/// returned error means that one line was lost, nothing more.
#[async_trait]
pub trait Drain: Send + Sync {
    async fn drain(&self, line: &str, tag: &str) -> Result<(), DrainError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    Udp,
    Tcp,
}

/// Syslog sink with one connection per tag, dialed lazily on the first
/// line for that tag and reused afterwards. UDP collapses to a single
/// shared socket since datagrams need no per-tag session.
pub struct SyslogDrainer {
    hostname: String,
    address: String,
    dialer: Dialer,
    conns: Mutex<HashMap<String, Box<dyn Transport>>>,
}

enum Dialer {
    Udp(UdpTransport),
    Tcp,
}

impl SyslogDrainer {
    /// Builds the drainer and verifies the destination is reachable, so a
    /// bad address fails startup rather than the first drained line.
    pub async fn connect(
        transport: TransportKind,
        address: &str,
        hostname: &str,
    ) -> Result<SyslogDrainer, DrainError> {
        let dialer = match transport {
            TransportKind::Udp => {
                let socket = UdpTransport::connect(address)
                    .await
                    .map_err(|source| DrainError::Connect {
                        addr: address.to_string(),
                        source,
                    })?;
                Dialer::Udp(socket)
            }
            TransportKind::Tcp => {
                // Probe connection, dropped immediately. Per-tag streams
                // are dialed on demand.
                TcpTransport::connect(address)
                    .await
                    .map_err(|source| DrainError::Connect {
                        addr: address.to_string(),
                        source,
                    })?;
                Dialer::Tcp
            }
        };

        Ok(SyslogDrainer {
            hostname: hostname.to_string(),
            address: address.to_string(),
            dialer,
            conns: Mutex::new(HashMap::new()),
        })
    }

    async fn dial(&self) -> io::Result<Box<dyn Transport>> {
        match &self.dialer {
            Dialer::Udp(socket) => Ok(Box::new(socket.clone())),
            Dialer::Tcp => Ok(Box::new(TcpTransport::connect(&self.address).await?)),
        }
    }
}

#[async_trait]
impl Drain for SyslogDrainer {
    async fn drain(&self, line: &str, tag: &str) -> Result<(), DrainError> {
        let packet = Packet {
            hostname: &self.hostname,
            tag,
            time: Local::now(),
            message: line,
        }
        .generate();

        // The pool lock is held across the send so two callers sharing a
        // tag can never interleave bytes on one stream.
        let mut conns = self.conns.lock().await;

        let conn = match conns.entry(tag.to_string()) {
            Entry::Occupied(entry) => entry.into_mut(),
            Entry::Vacant(entry) => {
                let conn = self.dial().await.map_err(|source| DrainError::Connect {
                    addr: self.address.clone(),
                    source,
                })?;
                entry.insert(conn)
            }
        };

        if let Err(source) = conn.send(packet.as_bytes()).await {
            // Drop the broken connection so the next call dials fresh.
            conns.remove(tag);
            return Err(DrainError::Send(source));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::io::{AsyncBufReadExt, BufReader};
    use tokio::net::{TcpListener, UdpSocket};
    use tokio::sync::mpsc;
    use tokio::time::timeout;

    #[tokio::test]
    async fn udp_delivers_formatted_packets() {
        let server = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let addr = server.local_addr().unwrap().to_string();

        let drainer = SyslogDrainer::connect(TransportKind::Udp, &addr, "web-1")
            .await
            .unwrap();
        drainer.drain("hello syslog", "payments").await.unwrap();

        let mut buf = [0u8; 1024];
        let n = timeout(Duration::from_secs(1), server.recv(&mut buf))
            .await
            .unwrap()
            .unwrap();

        let packet = std::str::from_utf8(&buf[..n]).unwrap();
        assert!(packet.starts_with("<14>1 "), "bad packet: {}", packet);
        assert!(packet.contains(" web-1 payments - - - hello syslog"));
        assert!(!packet.ends_with('\n'));
    }

    #[tokio::test]
    async fn tcp_reuses_one_connection_per_tag() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();

        let (lines_tx, mut lines_rx) = mpsc::unbounded_channel();
        tokio::spawn(async move {
            let mut next_id = 0u32;
            loop {
                let (stream, _) = listener.accept().await.unwrap();
                let conn_id = next_id;
                next_id += 1;

                let lines_tx = lines_tx.clone();
                tokio::spawn(async move {
                    let mut lines = BufReader::new(stream).lines();
                    while let Ok(Some(line)) = lines.next_line().await {
                        let _ = lines_tx.send((conn_id, line));
                    }
                });
            }
        });

        let drainer = SyslogDrainer::connect(TransportKind::Tcp, &addr, "web-1")
            .await
            .unwrap();

        drainer.drain("one", "api").await.unwrap();
        drainer.drain("two", "api").await.unwrap();
        drainer.drain("three", "worker").await.unwrap();

        let mut received = Vec::new();
        for _ in 0..3 {
            let (conn_id, line) = timeout(Duration::from_secs(1), lines_rx.recv())
                .await
                .unwrap()
                .unwrap();
            received.push((conn_id, line));
        }

        let conn_of = |message: &str| {
            received
                .iter()
                .find(|(_, line)| line.ends_with(&format!("- - - {}", message)))
                .map(|(conn_id, _)| *conn_id)
                .unwrap()
        };

        assert_eq!(conn_of("one"), conn_of("two"));
        assert_ne!(conn_of("one"), conn_of("three"));
    }

    #[tokio::test]
    async fn tcp_connect_fails_when_destination_is_unreachable() {
        // Bind and drop to get a port with nothing listening on it.
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        drop(listener);

        let result = SyslogDrainer::connect(TransportKind::Tcp, &addr, "web-1").await;
        assert!(matches!(result, Err(DrainError::Connect { .. })));
    }
}
