//! UDP I/O seam: a bound, connected socket, a single-shot timer, and the
//! monotonic clock Session reasons about. Performs no protocol
//! interpretation.

// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::net::SocketAddr;

use tokio::net::UdpSocket;
use tokio::time::Instant;

use crate::error::GeminiError;

/// Datagram size negotiated before a CNX-ACK narrows it down.
pub const INITIAL_MAX_DATAGRAM: usize = 128;

/// UDP endpoint bound to one peer, plus the single-shot timer Session arms
/// for handshake retries, transaction deadlines, and head retransmits.
#[derive(Debug)]
pub struct Transport {
    socket: UdpSocket,
    max_datagram: usize,
    timer_deadline: Option<Instant>,
}

impl Transport {
    /// Binds an ephemeral local UDP port and connects it to `peer`, so that
    /// `send`/`recv` below never need to re-specify the destination.
    pub async fn connect(peer: SocketAddr) -> std::io::Result<Self> {
        let local: SocketAddr = if peer.is_ipv6() {
            "[::]:0".parse().expect("valid local ipv6 bind addr")
        } else {
            "0.0.0.0:0".parse().expect("valid local ipv4 bind addr")
        };
        let socket = UdpSocket::bind(local).await?;
        socket.connect(peer).await?;
        Ok(Self {
            socket,
            max_datagram: INITIAL_MAX_DATAGRAM,
            timer_deadline: None,
        })
    }

    pub fn set_max_datagram(&mut self, bytes: usize) {
        self.max_datagram = bytes;
    }

    pub fn max_datagram(&self) -> usize {
        self.max_datagram
    }

    /// Rejects datagrams strictly larger than the negotiated max; a
    /// datagram exactly at the limit is valid.
    pub async fn send_datagram(&self, bytes: &[u8]) -> Result<(), GeminiError> {
        if bytes.len() > self.max_datagram {
            return Err(GeminiError::Oversize {
                len: bytes.len(),
                max: self.max_datagram,
            });
        }
        self.socket
            .send(bytes)
            .await
            .map_err(|e| GeminiError::Malformed(format!("send failed: {e}")))?;
        Ok(())
    }

    pub async fn recv_datagram(&self, buf: &mut [u8]) -> std::io::Result<usize> {
        self.socket.recv(buf).await
    }

    pub fn arm_timer(&mut self, after: std::time::Duration) {
        self.timer_deadline = Some(Instant::now() + after);
    }

    pub fn arm_timer_at(&mut self, deadline: Instant) {
        self.timer_deadline = Some(deadline);
    }

    pub fn cancel_timer(&mut self) {
        self.timer_deadline = None;
    }

    pub fn timer_deadline(&self) -> Option<Instant> {
        self.timer_deadline
    }

    pub fn now() -> Instant {
        Instant::now()
    }
}
