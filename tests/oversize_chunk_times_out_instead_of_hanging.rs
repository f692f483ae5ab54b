// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

mod common;

use bytes::Bytes;
use common::{cnx_ack_bytes, fake_peer, session_to};
use gemini_proto::wire::opcode::RequestKind;
use tokio::time::Duration;

/// A negotiated `maxPayloadWords` so small that even a one-word write chunk
/// (16-byte header + 4-byte payload) exceeds the negotiated datagram limit
/// (`maxPayloadWords * 4`) must still surface a `timed_out` result to the
/// caller, rather than leaving the queue stuck with no timer ever armed.
#[tokio::test]
async fn write_chunk_that_can_never_be_sent_delivers_timed_out() {
    let (peer, peer_addr) = fake_peer().await;
    let session = session_to(peer_addr, 100, 3).await;

    let connect_fut = session.connect();
    tokio::pin!(connect_fut);
    let mut buf = [0u8; 64];
    let (_n, client_addr) = peer.recv_from(&mut buf).await.expect("recv CNX");
    // maxPayloadWords=1 negotiates a 4-byte datagram limit; a one-word write
    // (16-byte header + 4-byte payload = 20 bytes) can never fit.
    peer.send_to(&cnx_ack_bytes(1, 1, 1, 0), client_addr)
        .await
        .expect("send CNX-ACK");
    connect_fut.await.expect("connect resolves");

    let mut channel = session.open_channel().await.expect("open_channel");
    channel
        .rw(0x40, 1, Some(Bytes::from_static(&[1, 2, 3, 4])), RequestKind::WriteInc)
        .await
        .expect("submit write");

    let result = tokio::time::timeout(Duration::from_millis(500), channel.recv())
        .await
        .expect("an oversize chunk must be resolved instead of hanging forever")
        .expect("delivery");
    assert!(result.timed_out);
    assert!(!result.is_ack);
    assert_eq!(result.base, 0x40);

    // The peer never received anything beyond the CNX it already replied
    // to: the chunk was rejected locally before ever reaching the wire.
    let nothing_sent = tokio::time::timeout(Duration::from_millis(50), peer.recv_from(&mut buf)).await;
    assert!(nothing_sent.is_err());
}
