//! Pipelined, sequence-numbered, retry-driven request/response engine for
//! the Gemini register-access protocol, plus its companion publish-packet
//! listener.

// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

/// Configuration, CLI path resolution, and logging.
pub mod cfg;
/// Channel multiplexer: caller-facing handles onto a single [`session`].
pub mod channel;
/// Protocol-level error types.
pub mod error;
/// Broadcast event listener independent of the register-access session.
pub mod publish;
/// The request/response engine: state machine, transactions, retries.
pub mod session;
/// Low-level UDP I/O: socket, timer, monotonic clock.
pub mod transport;
/// Wire format: the 16-byte header and opcodes.
pub mod wire;
