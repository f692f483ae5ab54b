// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

mod common;

use common::{cnx_ack_bytes, fake_peer, parse_header, response_bytes, session_to};
use gemini_proto::{session::CnxResult, wire::opcode::RequestKind};

/// An advertised `maxPayloadWords` of 1990 is substituted with 1984 (the
/// known-bad FPGA value), which is then what bounds transaction splitting.
#[tokio::test]
async fn advertised_1990_words_is_negotiated_as_1984() {
    let (peer, peer_addr) = fake_peer().await;
    let session = session_to(peer_addr, 200, 3).await;

    let connect_fut = session.connect();
    tokio::pin!(connect_fut);

    let mut buf = [0u8; 64];
    let (_n, client_addr) = peer.recv_from(&mut buf).await.expect("recv CNX");
    let reply = cnx_ack_bytes(1, 1990, 8, 0);
    peer.send_to(&reply, client_addr).await.expect("send CNX-ACK");
    assert_eq!(connect_fut.await.expect("connect resolves"), CnxResult::Ok);

    let mut channel = session.open_channel().await.expect("open_channel");
    channel
        .rw(0, 3000, None, RequestKind::ReadInc)
        .await
        .expect("submit read");

    let (n, client_addr) = peer.recv_from(&mut buf).await.expect("recv first chunk");
    let hdr = parse_header(&buf[..n]);
    assert_eq!(hdr.num_regs.get(), 1984, "first chunk must be capped at 1984, not 1990");

    let reply = response_bytes(gemini_proto::wire::Opcode::Ack, hdr.client_seq, 1984);
    peer.send_to(&reply, client_addr).await.expect("ack first chunk");

    let (n, client_addr) = peer.recv_from(&mut buf).await.expect("recv second chunk");
    let hdr = parse_header(&buf[..n]);
    assert_eq!(hdr.num_regs.get(), 3000 - 1984);
    let reply = response_bytes(gemini_proto::wire::Opcode::Ack, hdr.client_seq, 3000 - 1984);
    peer.send_to(&reply, client_addr).await.expect("ack second chunk");

    channel.recv().await.expect("first chunk delivered");
    channel.recv().await.expect("second chunk delivered");
}
