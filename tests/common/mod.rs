// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Shared fixtures for the end-to-end scenario tests. Each test drives a
//! real `tokio::net::UdpSocket` as a hand-scripted fake FPGA peer against a
//! live [`SessionHandle`] over loopback, rather than mocking the transport.

use std::{net::SocketAddr, time::Duration};

use gemini_proto::{
    session::{PeerConfig, SessionHandle, SessionLimits},
    wire::{GeminiHeader, Opcode},
};
use tokio::net::UdpSocket;

pub async fn fake_peer() -> (UdpSocket, SocketAddr) {
    let socket = UdpSocket::bind("127.0.0.1:0").await.expect("bind fake peer socket");
    let addr = socket.local_addr().expect("fake peer socket has a local addr");
    (socket, addr)
}

pub async fn session_to(addr: SocketAddr, timeout_ms: u64, max_retries: u32) -> SessionHandle {
    let cfg = PeerConfig {
        peer_addr: addr,
        timeout: Duration::from_millis(timeout_ms),
        max_retries,
    };
    SessionHandle::new(cfg, SessionLimits::default())
        .await
        .expect("session handle binds its transport")
}

/// Builds a CNX-ACK reply: 16-byte header followed by the little-endian
/// `{maxPayloadWords, pipelineDepth, connectionId}` triple.
pub fn cnx_ack_bytes(server_seq: u8, max_payload_words: u32, pipeline_depth: u32, connection_id: u32) -> Vec<u8> {
    let hdr = GeminiHeader::new(Opcode::Ack, 0, server_seq);
    let mut out = hdr.to_bytes().to_vec();
    out.extend_from_slice(&max_payload_words.to_le_bytes());
    out.extend_from_slice(&pipeline_depth.to_le_bytes());
    out.extend_from_slice(&connection_id.to_le_bytes());
    out
}

/// Builds an ACK/NACKP reply to a register-access request: just the header,
/// with `num_regs` set for read responses.
pub fn response_bytes(opcode: Opcode, server_seq: u8, num_regs: u16) -> Vec<u8> {
    GeminiHeader::new(opcode, 0, server_seq)
        .with_base_and_count(0, num_regs)
        .to_bytes()
        .to_vec()
}

/// Parses the 16-byte header prefix of a datagram received from the client.
pub fn parse_header(buf: &[u8]) -> GeminiHeader {
    GeminiHeader::from_bytes(buf).expect("client datagram has a valid header")
}
