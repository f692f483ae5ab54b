//! A single request/response exchange, and the splitting of a caller's
//! `rw()` call into chunks of at most `maxPayloadWords` registers (spec
//! §4.2.4).

// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use bytes::Bytes;
use tokio::time::Instant;

use crate::wire::opcode::RequestKind;

/// One outstanding (or completed-but-not-yet-retired) register-access
/// exchange. Transactions live in Session's FIFO queue; the head is always
/// the oldest unacknowledged one.
#[derive(Debug, Clone)]
pub struct Transaction {
    pub kind: RequestKind,
    pub base: u32,
    pub count: u16,
    /// Write payload, little-endian packed registers. `None` for reads.
    pub payload: Option<Bytes>,
    pub send_count: u32,
    pub deadline: Option<Instant>,
    pub client_seq: u8,
    pub channel_id: u32,
}

impl Transaction {
    fn new(kind: RequestKind, base: u32, count: u16, payload: Option<Bytes>, channel_id: u32) -> Self {
        Self {
            kind,
            base,
            count,
            payload,
            send_count: 0,
            deadline: None,
            client_seq: 0,
            channel_id,
        }
    }
}

/// Splits a request of `count` registers into transactions of at most
/// `max_payload_words` each, preserving order and incrementing `base` by
/// each chunk's word count. All produced transactions share `channel_id`.
pub fn split_request(
    channel_id: u32,
    base: u32,
    count: u32,
    payload: Option<Bytes>,
    kind: RequestKind,
    max_payload_words: u32,
) -> Vec<Transaction> {
    let chunk_words = max_payload_words.max(1).min(u16::MAX as u32);
    let mut out = Vec::with_capacity(count.div_ceil(chunk_words).max(1) as usize);
    let mut remaining = count;
    let mut cur_base = base;
    let mut offset = 0usize;

    while remaining > 0 {
        let chunk = remaining.min(chunk_words);
        let chunk_payload = if kind.is_write() {
            let byte_len = chunk as usize * 4;
            payload.as_ref().map(|p| p.slice(offset..offset + byte_len))
        } else {
            None
        };
        out.push(Transaction::new(kind, cur_base, chunk as u16, chunk_payload, channel_id));
        cur_base = cur_base.wrapping_add(chunk);
        offset += chunk as usize * 4;
        remaining -= chunk;
    }

    if out.is_empty() {
        // A zero-register request still produces one (empty) transaction so
        // the caller observes exactly one reply.
        out.push(Transaction::new(kind, base, 0, None, channel_id));
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_into_chunks_preserving_order_and_base() {
        let txs = split_request(0, 0x10, 5, None, RequestKind::ReadInc, 2);
        assert_eq!(txs.len(), 3);
        assert_eq!((txs[0].base, txs[0].count), (0x10, 2));
        assert_eq!((txs[1].base, txs[1].count), (0x12, 2));
        assert_eq!((txs[2].base, txs[2].count), (0x14, 1));
        for t in &txs {
            assert_eq!(t.channel_id, 0);
            assert_eq!(t.send_count, 0);
        }
    }

    #[test]
    fn fits_in_one_chunk_when_under_the_limit() {
        let txs = split_request(3, 0, 1, None, RequestKind::ReadInc, 1984);
        assert_eq!(txs.len(), 1);
        assert_eq!(txs[0].count, 1);
    }

    #[test]
    fn write_payload_is_sliced_per_chunk() {
        let payload = Bytes::from(vec![0u8; 5 * 4]);
        let txs = split_request(0, 0, 5, Some(payload), RequestKind::WriteInc, 2);
        assert_eq!(txs.len(), 3);
        assert_eq!(txs[0].payload.as_ref().expect("write chunk has payload").len(), 8);
        assert_eq!(txs[1].payload.as_ref().expect("write chunk has payload").len(), 8);
        assert_eq!(txs[2].payload.as_ref().expect("write chunk has payload").len(), 4);
    }
}
