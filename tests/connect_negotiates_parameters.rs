// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

mod common;

use common::{cnx_ack_bytes, fake_peer, parse_header, response_bytes, session_to};
use gemini_proto::{
    session::CnxResult,
    wire::Opcode,
};

/// A well-formed CNX-ACK yields `cnx_result(OK)`, negotiates
/// `maxPayloadWords`/`pipelineDepth`, and the next client sequence is 2.
#[tokio::test]
async fn connect_ok_negotiates_parameters_and_advances_sequence() {
    let (peer, peer_addr) = fake_peer().await;
    let session = session_to(peer_addr, 200, 3).await;

    let connect_fut = session.connect();
    tokio::pin!(connect_fut);

    let mut buf = [0u8; 64];
    let (n, client_addr) = peer.recv_from(&mut buf).await.expect("recv CNX");
    let hdr = parse_header(&buf[..n]);
    assert_eq!(hdr.opcode, Opcode::Cnx as u8);
    assert_eq!(hdr.client_seq, 1);

    let reply = cnx_ack_bytes(1, 1984, 8, 0x1122_3344);
    peer.send_to(&reply, client_addr).await.expect("send CNX-ACK");

    let result = connect_fut.await.expect("connect resolves");
    assert_eq!(result, CnxResult::Ok);

    // Next send should carry client_seq == 2, proving the handshake's
    // client_seq=1 was adopted rather than continuing from some stale value.
    let mut channel = session.open_channel().await.expect("open_channel");
    channel
        .rw(0x10, 1, None, gemini_proto::wire::opcode::RequestKind::ReadInc)
        .await
        .expect("submit read");

    let (n, client_addr) = peer.recv_from(&mut buf).await.expect("recv read request");
    let hdr = parse_header(&buf[..n]);
    assert_eq!(hdr.client_seq, 2);
    assert_eq!(hdr.opcode, Opcode::ReadInc as u8);
    assert_eq!(hdr.base_addr, 0x10);

    // Ack it so the background actor task doesn't leave a timer running
    // past the end of the test.
    let reply = response_bytes(Opcode::Ack, 2, 1);
    peer.send_to(&reply, client_addr).await.expect("send ack");
    let result = channel.recv().await.expect("delivery");
    assert!(result.is_ack);
}
