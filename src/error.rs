//! Protocol-level error types.

// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use thiserror::Error;

/// Errors the Gemini engine can surface. Loss-like conditions
/// ([`GeminiError::SequenceLoss`], [`GeminiError::Malformed`]) are recovered
/// from internally and rarely propagate; the rest are terminal and end up in
/// a [`crate::session::CnxResult`] or a channel's
/// [`crate::channel::ChannelResult`].
#[derive(Debug, Error)]
pub enum GeminiError {
    #[error("no CNX-ACK received within {retries} retries")]
    ConnectTimeout { retries: u32 },

    #[error("peer temporarily rejected the connect request (NACKT)")]
    ConnectRejectTemp,

    #[error("peer permanently rejected the connect request (NACKP)")]
    ConnectRejectPerm,

    #[error("outbound datagram of {len} bytes exceeds negotiated max of {max} bytes")]
    Oversize { len: usize, max: usize },

    #[error("malformed datagram: {0}")]
    Malformed(String),

    #[error(
        "sequence loss: head client_seq={head_seq}, datagram server_seq={received_seq}"
    )]
    SequenceLoss { head_seq: u8, received_seq: u8 },

    #[error("transaction exceeded {retries} retries and the session failed")]
    TransactionTimeout { retries: u32 },

    #[error("read count mismatch: requested {requested} registers, got {got}")]
    ReadCountMismatch { requested: u16, got: u16 },
}
