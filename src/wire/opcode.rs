//! The Gemini command byte (offset 1 of the header).

// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use thiserror::Error;

/// All opcodes defined by the Gemini wire protocol.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Opcode {
    Cnx = 0x01,
    ReadFifo = 0x02,
    ReadInc = 0x03,
    WriteFifo = 0x04,
    WriteInc = 0x05,
    Ack = 0x10,
    /// Transient NACK: evidence of a lost datagram, triggers retry-of-head.
    NackT = 0x20,
    /// Permanent NACK: request-level failure.
    NackP = 0x40,
    Pub = 0x80,
}

/// Returned when a header's opcode byte does not match a known value.
#[derive(Debug, Error)]
#[error("unknown Gemini opcode: 0x{0:02x}")]
pub struct UnknownOpcode(pub u8);

impl TryFrom<u8> for Opcode {
    type Error = UnknownOpcode;

    fn try_from(byte: u8) -> Result<Self, Self::Error> {
        Ok(match byte {
            0x01 => Self::Cnx,
            0x02 => Self::ReadFifo,
            0x03 => Self::ReadInc,
            0x04 => Self::WriteFifo,
            0x05 => Self::WriteInc,
            0x10 => Self::Ack,
            0x20 => Self::NackT,
            0x40 => Self::NackP,
            0x80 => Self::Pub,
            other => return Err(UnknownOpcode(other)),
        })
    }
}

/// The kind of register-access request a caller may submit. Distinct from
/// [`Opcode`]: every [`RequestKind`] maps 1:1 onto a single request opcode,
/// whereas `Opcode` also covers the connect and response opcodes that never
/// originate from a caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestKind {
    ReadInc,
    ReadFifo,
    WriteInc,
    WriteFifo,
}

impl RequestKind {
    /// Re-derives the wire opcode purely from the request kind, rather than
    /// defaulting to some other opcode and relying on an overwrite branch to
    /// run.
    pub fn opcode(self) -> Opcode {
        match self {
            RequestKind::ReadInc => Opcode::ReadInc,
            RequestKind::ReadFifo => Opcode::ReadFifo,
            RequestKind::WriteInc => Opcode::WriteInc,
            RequestKind::WriteFifo => Opcode::WriteFifo,
        }
    }

    pub fn is_write(self) -> bool {
        matches!(self, RequestKind::WriteInc | RequestKind::WriteFifo)
    }
}
