//! Broadcast event listener, independent of [`crate::session`].
//!
//! Binds a UDP port with `SO_REUSEADDR` so several processes on the same
//! host can observe the same broadcasts, decodes fixed 20-byte packets, and
//! fans them out to subscribers. Retains no history.

// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::net::{SocketAddr, SocketAddrV4};

use anyhow::{Context, Result};
use socket2::{Domain, Socket, Type};
use tokio::{net::UdpSocket, sync::broadcast};
use tracing::{debug, trace, warn};
use zerocopy::{BigEndian, FromBytes, Immutable, KnownLayout, U32};

/// Default publish listener port. By convention the register-access port
/// used for Session is this value minus one.
pub const DEFAULT_PUBLISH_PORT: u16 = 30001;

const PACKET_LEN: usize = 20;
const SUPPORTED_VERSION: u8 = 1;

#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, KnownLayout, Immutable)]
struct RawPublishPacket {
    version: u8,
    cmd: u8,
    reserved: [u8; 2],
    event: U32<BigEndian>,
    time_low: U32<BigEndian>,
    time_high: U32<BigEndian>,
    // Trailing padding observed in captured traffic; not individually named
    // by the protocol but required to reach the fixed 20-byte packet size.
    trailing_reserved: U32<BigEndian>,
}

/// One decoded publish broadcast.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishEvent {
    pub source: SocketAddr,
    pub cmd: u8,
    pub event: u32,
    pub timestamp: u64,
}

impl PublishEvent {
    fn decode(buf: &[u8], source: SocketAddr) -> Option<Self> {
        if buf.len() != PACKET_LEN {
            return None;
        }
        let raw = RawPublishPacket::read_from_bytes(buf).ok()?;
        if raw.version != SUPPORTED_VERSION {
            return None;
        }
        let timestamp = ((raw.time_high.get() as u64) << 32) | raw.time_low.get() as u64;
        Some(Self {
            source,
            cmd: raw.cmd,
            event: raw.event.get(),
            timestamp,
        })
    }
}

/// Listens for publish broadcasts on a background task and fans decoded
/// events out to any number of subscribers via `subscribe()`.
pub struct PublishListener {
    tx: broadcast::Sender<PublishEvent>,
    local_addr: SocketAddr,
}

impl PublishListener {
    /// Binds `port` with address reuse and spawns the decode loop.
    pub async fn bind(port: u16) -> Result<Self> {
        let socket = bind_reuseaddr(port).context("failed to bind publish listener socket")?;
        let local_addr = socket.local_addr()?;
        let (tx, _rx) = broadcast::channel(256);
        let tx_task = tx.clone();

        tokio::spawn(async move {
            let mut buf = [0u8; 1500];
            loop {
                let (n, from) = match socket.recv_from(&mut buf).await {
                    Ok(v) => v,
                    Err(e) => {
                        warn!("publish listener recv error: {e}");
                        continue;
                    },
                };
                match PublishEvent::decode(&buf[..n], from) {
                    Some(event) => {
                        trace!(?event, "publish event decoded");
                        // No subscribers is not an error; just drop it.
                        let _ = tx_task.send(event);
                    },
                    None => debug!(len = n, "dropped malformed publish packet"),
                }
            }
        });

        Ok(Self { tx, local_addr })
    }

    /// Subscribes to future publish events. Past events are never replayed.
    pub fn subscribe(&self) -> broadcast::Receiver<PublishEvent> {
        self.tx.subscribe()
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }
}

fn bind_reuseaddr(port: u16) -> Result<UdpSocket> {
    let addr = SocketAddrV4::new(std::net::Ipv4Addr::UNSPECIFIED, port);
    let socket = Socket::new(Domain::IPV4, Type::DGRAM, None)?;
    socket.set_reuse_address(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    let std_socket: std::net::UdpSocket = socket.into();
    Ok(UdpSocket::from_std(std_socket)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_bytes(cmd: u8, event: u32, time_high: u32, time_low: u32) -> Vec<u8> {
        let mut buf = Vec::with_capacity(PACKET_LEN);
        buf.push(1); // version
        buf.push(cmd);
        buf.extend_from_slice(&[0, 0]); // reserved
        buf.extend_from_slice(&event.to_be_bytes());
        buf.extend_from_slice(&time_low.to_be_bytes());
        buf.extend_from_slice(&time_high.to_be_bytes());
        buf.extend_from_slice(&[0, 0, 0, 0]); // trailing reserved
        buf
    }

    #[test]
    fn decodes_a_well_formed_packet() {
        let bytes = sample_bytes(7, 42, 5, 1);
        let source: SocketAddr = "127.0.0.1:9999".parse().expect("valid addr");
        let event = PublishEvent::decode(&bytes, source).expect("decodes");
        assert_eq!(event.cmd, 7);
        assert_eq!(event.event, 42);
        assert_eq!(event.timestamp, (5u64 << 32) | 1);
    }

    #[test]
    fn rejects_wrong_length() {
        let mut bytes = sample_bytes(7, 42, 5, 1);
        bytes.pop();
        let source: SocketAddr = "127.0.0.1:9999".parse().expect("valid addr");
        assert!(PublishEvent::decode(&bytes, source).is_none());
    }

    #[test]
    fn rejects_wrong_version() {
        let mut bytes = sample_bytes(7, 42, 5, 1);
        bytes[0] = 2;
        let source: SocketAddr = "127.0.0.1:9999".parse().expect("valid addr");
        assert!(PublishEvent::decode(&bytes, source).is_none());
    }

    #[tokio::test]
    async fn end_to_end_delivers_decoded_events() {
        let listener = PublishListener::bind(0).await.expect("bind");
        let mut rx = listener.subscribe();

        let sender = UdpSocket::bind("127.0.0.1:0").await.expect("bind sender");
        let bytes: [u8; 20] = [
            0x01, 0x07, 0x00, 0x00, 0x00, 0x00, 0x00, 0x2A, 0x00, 0x00, 0x00, 0x01, 0x00, 0x00,
            0x00, 0x05, 0x00, 0x00, 0x00, 0x00,
        ];
        sender
            .send_to(&bytes, listener.local_addr())
            .await
            .expect("send packet");

        let event = rx.recv().await.expect("event delivered");
        assert_eq!(event.cmd, 7);
        assert_eq!(event.event, 42);
        assert_eq!(event.timestamp, (5u64 << 32) | 1);
    }

    #[tokio::test]
    async fn a_nineteen_byte_datagram_produces_nothing() {
        let listener = PublishListener::bind(0).await.expect("bind");
        let mut rx = listener.subscribe();

        let sender = UdpSocket::bind("127.0.0.1:0").await.expect("bind sender");
        sender
            .send_to(&[0u8; 19], listener.local_addr())
            .await
            .expect("send short packet");

        // Nothing else will ever arrive on this channel for this test, so a
        // short timeout distinguishes "correctly dropped" from "hung".
        let outcome = tokio::time::timeout(std::time::Duration::from_millis(200), rx.recv()).await;
        assert!(outcome.is_err(), "no event should have been published");
    }
}
