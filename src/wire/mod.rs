//! On-wire layout of Gemini datagrams.
//!
//! Every datagram is preceded by a fixed 16-byte header (see [`header`]).
//! `num_regs` travels big-endian; `base_addr` is the raw machine word and is
//! deliberately **not** byte-swapped (this asymmetry is a protocol property,
//! not a bug — see the CNX-ACK payload below for the mirror case).

// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

pub mod header;
pub mod opcode;

pub use header::{CnxAckPayload, GeminiHeader, HEADER_LEN};
pub use opcode::Opcode;
