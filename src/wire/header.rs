//! The fixed 16-byte Gemini header.
//!
//! Mixed endianness is a protocol property, not an oversight: `num_regs`
//! travels big-endian while `base_addr` is the raw machine word, unconverted.
//! The CNX-ACK payload that follows a `CNX` reply is little-endian and lives
//! in [`CnxAckPayload`].

// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use anyhow::{Result, bail};
use zerocopy::{
    BigEndian, FromBytes, Immutable, IntoBytes, KnownLayout, LittleEndian, U16, U32,
};

use crate::wire::opcode::Opcode;

/// Wire protocol version understood by this engine.
pub const VERSION: u8 = 1;

/// Size in bytes of the fixed Gemini header.
pub const HEADER_LEN: usize = 16;

/// The 16-byte header that precedes every Gemini datagram.
///
/// `base_addr` is intentionally a plain `u32`, not a byte-swapped wrapper:
/// the wire protocol writes it as the raw machine word, unlike `num_regs`
/// which is forced big-endian. Reproducing this asymmetry is required for
/// interoperability with the FPGA peer.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, FromBytes, IntoBytes, KnownLayout, Immutable)]
pub struct GeminiHeader {
    pub version: u8,
    pub opcode: u8,
    pub client_seq: u8,
    pub server_seq: u8,
    pub base_addr: u32,
    pub num_regs: U16<BigEndian>,
    pub fail_code: u8,
    reserved: u8,
    reserved_tail: [u8; 4],
}

impl GeminiHeader {
    pub fn new(opcode: Opcode, client_seq: u8, server_seq: u8) -> Self {
        Self {
            version: VERSION,
            opcode: opcode as u8,
            client_seq,
            server_seq,
            base_addr: 0,
            num_regs: U16::new(0),
            fail_code: 0,
            reserved: 0,
            reserved_tail: [0; 4],
        }
    }

    pub fn with_base_and_count(mut self, base_addr: u32, num_regs: u16) -> Self {
        self.base_addr = base_addr;
        self.num_regs.set(num_regs);
        self
    }

    /// Parses the opcode byte, returning an error for unrecognized values
    /// (malformed datagrams are dropped silently by the caller).
    pub fn decoded_opcode(&self) -> Result<Opcode, super::opcode::UnknownOpcode> {
        Opcode::try_from(self.opcode)
    }

    pub fn to_bytes(&self) -> [u8; HEADER_LEN] {
        let mut buf = [0u8; HEADER_LEN];
        buf.copy_from_slice(self.as_bytes());
        buf
    }

    pub fn from_bytes(buf: &[u8]) -> Result<Self> {
        if buf.len() < HEADER_LEN {
            bail!("datagram shorter than header: {} bytes", buf.len());
        }
        let hdr = Self::read_from_bytes(&buf[..HEADER_LEN])
            .map_err(|e| anyhow::anyhow!("malformed header: {e}"))?;
        Ok(hdr)
    }
}

/// Payload of a `CNX` `ACK` reply: `{maxPayloadWords, pipelineDepth,
/// connectionId}`, all little-endian, unlike the header.
#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable)]
pub struct CnxAckPayload {
    pub max_payload_words: U32<LittleEndian>,
    pub pipeline_depth: U32<LittleEndian>,
    pub connection_id: U32<LittleEndian>,
}

impl CnxAckPayload {
    pub const WIRE_LEN: usize = 12;

    pub fn from_bytes(buf: &[u8]) -> Result<Self> {
        if buf.len() < Self::WIRE_LEN {
            bail!(
                "CNX-ACK payload too short: have {}, need {}",
                buf.len(),
                Self::WIRE_LEN
            );
        }
        let payload = Self::read_from_bytes(&buf[..Self::WIRE_LEN])
            .map_err(|e| anyhow::anyhow!("malformed CNX-ACK payload: {e}"))?;
        Ok(payload)
    }

    /// FPGAs used to advertise 1990 words of payload, but only ever handled
    /// 1985 words before the MAC failed; substitute 1984 when we see it.
    pub fn negotiated_max_payload_words(&self) -> u32 {
        let advertised = self.max_payload_words.get();
        if advertised == 1990 { 1984 } else { advertised }
    }
}
