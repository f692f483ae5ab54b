//! The request/response engine: connect handshake, pipelined transaction
//! queue, sequence tracking, and retry-of-head.
//!
//! The state machine runs as a single `tokio` task (see [`SessionActor`])
//! that owns all mutable state and processes exactly one event at a time —
//! an inbound datagram, a timer fire, or a caller command — so no two
//! events are ever handled concurrently and no mutex is needed around the
//! state.

// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

pub mod trace;
pub mod transaction;

use std::{collections::VecDeque, net::SocketAddr, time::Duration};

use anyhow::{Context, Result, anyhow};
use bytes::{Bytes, BytesMut};
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::{
    channel::RwChannel,
    session::{trace::PacketTrace, transaction::Transaction},
    transport::{INITIAL_MAX_DATAGRAM, Transport},
    wire::{
        header::{CnxAckPayload, GeminiHeader, VERSION},
        opcode::{Opcode, RequestKind},
        HEADER_LEN,
    },
};

/// Remote peer parameters, supplied once at construction and never mutated.
#[derive(Debug, Clone)]
pub struct PeerConfig {
    pub peer_addr: SocketAddr,
    pub timeout: Duration,
    pub max_retries: u32,
}

/// Sizes of the two bounded buffers Session keeps internally; overridable so
/// tests can shrink the trace ring (8 entries × 64 bytes by default).
#[derive(Debug, Clone, Copy)]
pub struct SessionLimits {
    pub trace_capacity: usize,
    pub trace_entry_bytes: usize,
}

impl Default for SessionLimits {
    fn default() -> Self {
        Self {
            trace_capacity: 8,
            trace_entry_bytes: 64,
        }
    }
}

/// Outcome of a connect handshake, delivered to the caller of
/// [`SessionHandle::connect`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CnxResult {
    Ok,
    FailTemp,
    FailPerm,
    Timeout,
}

/// Result delivered to a channel for each retired (or abandoned)
/// transaction.
#[derive(Debug, Clone)]
pub struct ChannelResult {
    pub timed_out: bool,
    pub base: u32,
    pub count: u16,
    pub payload: Bytes,
    pub kind: RequestKind,
    pub is_ack: bool,
    pub fail_code: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Disconnected,
    Connecting,
    Connected,
    Failed,
}

/// Commands a [`SessionHandle`] or [`RwChannel`] sends to the actor task.
/// Kept crate-private: callers only ever see [`SessionHandle`]/[`RwChannel`].
pub(crate) enum Command {
    Connect {
        reply: oneshot::Sender<CnxResult>,
    },
    OpenChannel {
        sink: mpsc::Sender<ChannelResult>,
        reply: oneshot::Sender<u32>,
    },
    Dispose {
        channel: u32,
    },
    Rw {
        channel: u32,
        base: u32,
        count: u32,
        payload: Option<Bytes>,
        kind: RequestKind,
    },
}

/// Caller-facing handle onto a Session actor task. Cloning is not
/// supported on purpose: the engine assumes one owner per connection.
pub struct SessionHandle {
    cmd_tx: mpsc::Sender<Command>,
    cancel: CancellationToken,
}

impl SessionHandle {
    /// Binds the UDP transport and spawns the actor task in `Disconnected`
    /// state. Call [`Self::connect`] to run the handshake.
    pub async fn new(cfg: PeerConfig, limits: SessionLimits) -> Result<Self> {
        let transport = Transport::connect(cfg.peer_addr)
            .await
            .context("failed to bind/connect the Gemini UDP transport")?;
        let (cmd_tx, cancel) = spawn(cfg, transport, limits);
        Ok(Self { cmd_tx, cancel })
    }

    /// Runs the connect handshake to completion.
    pub async fn connect(&self) -> Result<CnxResult> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.cmd_tx
            .send(Command::Connect { reply: reply_tx })
            .await
            .map_err(|_| anyhow!("session actor task is gone"))?;
        reply_rx
            .await
            .map_err(|_| anyhow!("session actor dropped the connect reply"))
    }

    /// Opens a new multiplexer channel.
    pub async fn open_channel(&self) -> Result<RwChannel> {
        let (result_tx, result_rx) = mpsc::channel(32);
        let (reply_tx, reply_rx) = oneshot::channel();
        self.cmd_tx
            .send(Command::OpenChannel {
                sink: result_tx,
                reply: reply_tx,
            })
            .await
            .map_err(|_| anyhow!("session actor task is gone"))?;
        let id = reply_rx
            .await
            .map_err(|_| anyhow!("session actor dropped the open-channel reply"))?;
        Ok(RwChannel::new(id, self.cmd_tx.clone(), result_rx))
    }
}

impl Drop for SessionHandle {
    /// Best-effort cancel: the actor task drains no further commands and
    /// drops all per-channel senders, which unblocks any channel's `recv`
    /// with `None`.
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

fn spawn(
    cfg: PeerConfig,
    transport: Transport,
    limits: SessionLimits,
) -> (mpsc::Sender<Command>, CancellationToken) {
    let (cmd_tx, cmd_rx) = mpsc::channel(64);
    let cancel = CancellationToken::new();
    let actor = SessionActor {
        cfg,
        transport,
        state: State::Disconnected,
        client_seq: 0,
        connect_retries: 0,
        max_payload_words: (INITIAL_MAX_DATAGRAM / 4) as u32,
        pipeline_depth: 1,
        in_transit: 0,
        waiting_for_retry: false,
        queue: VecDeque::new(),
        channels: Vec::new(),
        trace: PacketTrace::new(limits.trace_capacity, limits.trace_entry_bytes),
        pending_connect: None,
    };
    let task_cancel = cancel.clone();
    tokio::spawn(async move { actor.run(cmd_rx, task_cancel).await });
    (cmd_tx, cancel)
}

struct SessionActor {
    cfg: PeerConfig,
    transport: Transport,
    state: State,
    client_seq: u8,
    connect_retries: u32,
    max_payload_words: u32,
    pipeline_depth: u32,
    in_transit: u32,
    waiting_for_retry: bool,
    queue: VecDeque<Transaction>,
    channels: Vec<Option<mpsc::Sender<ChannelResult>>>,
    trace: PacketTrace,
    pending_connect: Option<oneshot::Sender<CnxResult>>,
}

impl SessionActor {
    async fn run(mut self, mut cmd_rx: mpsc::Receiver<Command>, cancel: CancellationToken) {
        let mut buf = vec![0u8; 65536];
        loop {
            let deadline = self.transport.timer_deadline();
            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!("session actor cancelled");
                    break;
                }
                cmd = cmd_rx.recv() => {
                    match cmd {
                        Some(cmd) => self.handle_command(cmd).await,
                        None => break,
                    }
                }
                _ = Self::sleep_until_opt(deadline) => {
                    self.transport.cancel_timer();
                    self.on_timer_fire().await;
                }
                recv_result = self.transport.recv_datagram(&mut buf) => {
                    match recv_result {
                        Ok(n) => self.on_datagram(&buf[..n]).await,
                        Err(e) => warn!("udp recv error: {e}"),
                    }
                }
            }
        }
    }

    async fn sleep_until_opt(deadline: Option<tokio::time::Instant>) {
        match deadline {
            Some(d) => tokio::time::sleep_until(d).await,
            None => std::future::pending().await,
        }
    }

    async fn handle_command(&mut self, cmd: Command) {
        match cmd {
            Command::Connect { reply } => self.handle_connect(reply).await,
            Command::OpenChannel { sink, reply } => {
                let id = self.open_channel(sink);
                let _ = reply.send(id);
            },
            Command::Dispose { channel } => {
                if let Some(slot) = self.channels.get_mut(channel as usize) {
                    *slot = None;
                }
            },
            Command::Rw {
                channel,
                base,
                count,
                payload,
                kind,
            } => self.handle_rw(channel, base, count, payload, kind).await,
        }
    }

    fn open_channel(&mut self, sink: mpsc::Sender<ChannelResult>) -> u32 {
        for (i, slot) in self.channels.iter().enumerate() {
            if slot.is_none() && !self.queue.iter().any(|t| t.channel_id == i as u32) {
                self.channels[i] = Some(sink);
                return i as u32;
            }
        }
        self.channels.push(Some(sink));
        (self.channels.len() - 1) as u32
    }

    async fn handle_rw(
        &mut self,
        channel: u32,
        base: u32,
        count: u32,
        payload: Option<Bytes>,
        kind: RequestKind,
    ) {
        if self.state != State::Connected {
            self.deliver(channel, ChannelResult {
                timed_out: true,
                base,
                count: count.min(u16::MAX as u32) as u16,
                payload: Bytes::new(),
                kind,
                is_ack: false,
                fail_code: 0,
            })
            .await;
            return;
        }
        let txs = transaction::split_request(
            channel,
            base,
            count,
            payload,
            kind,
            self.max_payload_words,
        );
        self.queue.extend(txs);
        self.pump().await;
    }

    async fn deliver(&self, channel: u32, result: ChannelResult) {
        if let Some(Some(sink)) = self.channels.get(channel as usize) {
            let _ = sink.clone().send(result).await;
        }
    }

    // ---- Connect handshake ----

    async fn handle_connect(&mut self, reply: oneshot::Sender<CnxResult>) {
        self.client_seq = 1;
        self.connect_retries = 0;
        self.pending_connect = Some(reply);
        self.state = State::Connecting;
        self.send_cnx().await;
    }

    async fn send_cnx(&mut self) {
        let hdr = GeminiHeader::new(Opcode::Cnx, 1, 0);
        if let Err(e) = self.transport.send_datagram(&hdr.to_bytes()).await {
            error!("failed to send CNX: {e}");
        }
        self.transport.arm_timer(self.cfg.timeout);
    }

    fn resolve_connect(&mut self, result: CnxResult) {
        if let Some(reply) = self.pending_connect.take() {
            let _ = reply.send(result);
        }
    }

    async fn on_timer_fire(&mut self) {
        match self.state {
            State::Connecting => self.retry_connect().await,
            State::Connected => self.retry_of_head().await,
            State::Disconnected | State::Failed => {},
        }
    }

    async fn retry_connect(&mut self) {
        if self.connect_retries < self.cfg.max_retries {
            self.connect_retries += 1;
            self.send_cnx().await;
        } else {
            self.state = State::Disconnected;
            self.resolve_connect(CnxResult::Timeout);
        }
    }

    // ---- Inbound datagram dispatch ----

    async fn on_datagram(&mut self, buf: &[u8]) {
        self.trace.record(buf);
        match self.state {
            State::Connecting => self.handle_connecting_datagram(buf).await,
            State::Connected => self.handle_connected_datagram(buf).await,
            State::Disconnected | State::Failed => {},
        }
    }

    async fn handle_connecting_datagram(&mut self, buf: &[u8]) {
        let Ok(hdr) = GeminiHeader::from_bytes(buf) else { return };
        if hdr.version != VERSION {
            return;
        }
        let Ok(opcode) = hdr.decoded_opcode() else { return };
        match opcode {
            Opcode::Ack if hdr.server_seq == 1 => {
                let Ok(payload) = CnxAckPayload::from_bytes(&buf[HEADER_LEN..]) else {
                    return;
                };
                self.max_payload_words = payload.negotiated_max_payload_words();
                self.pipeline_depth = payload.pipeline_depth.get().max(1);
                self.transport
                    .set_max_datagram((self.max_payload_words as usize) * 4);
                self.client_seq = 1;
                self.in_transit = 0;
                self.waiting_for_retry = false;
                self.transport.cancel_timer();
                self.state = State::Connected;
                self.resolve_connect(CnxResult::Ok);
            },
            Opcode::NackT => {
                self.transport.cancel_timer();
                self.state = State::Disconnected;
                self.resolve_connect(CnxResult::FailTemp);
            },
            Opcode::NackP => {
                self.transport.cancel_timer();
                self.state = State::Disconnected;
                self.resolve_connect(CnxResult::FailPerm);
            },
            _ => {}, // ignore, remain armed
        }
    }

    async fn handle_connected_datagram(&mut self, buf: &[u8]) {
        let Ok(hdr) = GeminiHeader::from_bytes(buf) else { return };
        if hdr.version != VERSION {
            return;
        }
        let Ok(opcode) = hdr.decoded_opcode() else { return };
        if !matches!(opcode, Opcode::Ack | Opcode::NackT | Opcode::NackP) {
            return;
        }

        let Some(head_seq) = self.queue.front().map(|t| t.client_seq) else { return };

        if matches!(opcode, Opcode::NackT) || hdr.server_seq != head_seq {
            if !self.waiting_for_retry {
                self.retry_of_head().await;
            }
            return;
        }

        // Matched response: opcode is ACK or NACKP and server_seq == head's.
        self.transport.cancel_timer();
        if self.waiting_for_retry {
            self.waiting_for_retry = false;
            self.in_transit = 0;
        } else {
            self.in_transit = self.in_transit.saturating_sub(1);
        }

        let head = self.queue.pop_front().expect("front checked above");
        if !head.kind.is_write() && hdr.num_regs.get() != head.count {
            warn!(
                requested = head.count,
                got = hdr.num_regs.get(),
                "read count mismatch"
            );
        }

        self.rearm_head_timer();
        self.pump().await;

        let payload = if head.kind.is_write() {
            Bytes::new()
        } else {
            Bytes::copy_from_slice(&buf[HEADER_LEN..])
        };
        self.deliver(head.channel_id, ChannelResult {
            timed_out: false,
            base: head.base,
            count: head.count,
            payload,
            kind: head.kind,
            is_ack: matches!(opcode, Opcode::Ack),
            fail_code: hdr.fail_code,
        })
        .await;
    }

    // ---- Pump / retry ----

    async fn pump(&mut self) {
        if self.waiting_for_retry || self.state != State::Connected {
            return;
        }
        let timeout = self.cfg.timeout;
        let mut stuck = Vec::new();
        let len = self.queue.len();
        for i in 0..len {
            if self.in_transit >= self.pipeline_depth {
                break;
            }
            if self.queue[i].send_count >= 1 {
                continue;
            }
            if self.transmit_at(i, timeout).await {
                self.in_transit += 1;
            } else {
                // Never sent even once: it can never be retried later either
                // (same chunk, same limit), so it would otherwise sit in the
                // queue forever with no timer armed for it.
                stuck.push(i);
            }
        }
        // Remove back-to-front so earlier indices in `stuck` stay valid.
        for i in stuck.into_iter().rev() {
            let t = self.queue.remove(i).expect("index came from this queue");
            self.deliver(t.channel_id, Self::local_send_failure_result(&t)).await;
        }
        self.rearm_head_timer();
    }

    async fn retry_of_head(&mut self) {
        let Some(send_count) = self.queue.front().map(|t| t.send_count) else { return };
        if send_count as u64 > self.cfg.max_retries as u64 {
            self.fail_session().await;
            return;
        }
        for t in self.queue.iter_mut().skip(1) {
            t.send_count = 0;
        }
        self.client_seq = self.client_seq.wrapping_sub(1);
        let timeout = self.cfg.timeout;
        if !self.transmit_at(0, timeout).await {
            let t = self.queue.pop_front().expect("front checked above");
            self.deliver(t.channel_id, Self::local_send_failure_result(&t)).await;
            self.pump().await;
            return;
        }
        self.waiting_for_retry = true;
        self.rearm_head_timer();
    }

    async fn fail_session(&mut self) {
        self.state = State::Failed;
        self.transport.cancel_timer();
        error!("gemini session failed: head exceeded max retries");
        while let Some(t) = self.queue.pop_front() {
            self.deliver(t.channel_id, Self::local_send_failure_result(&t)).await;
        }
    }

    /// Result delivered for a transaction that never retires normally: a
    /// session-level failure, or a datagram that could never be sent in the
    /// first place.
    fn local_send_failure_result(t: &Transaction) -> ChannelResult {
        ChannelResult {
            timed_out: true,
            base: t.base,
            count: t.count,
            payload: Bytes::new(),
            kind: t.kind,
            is_ack: false,
            fail_code: 0,
        }
    }

    fn rearm_head_timer(&mut self) {
        if let Some(head) = self.queue.front() {
            if head.send_count >= 1 {
                if let Some(deadline) = head.deadline {
                    self.transport.arm_timer_at(deadline);
                }
            }
        }
    }

    /// Transmits the transaction at queue index `i`, assigning it the next
    /// client sequence number. Returns `false` (and reclaims the sequence
    /// number) if the send failed locally, e.g. [`crate::error::GeminiError::Oversize`].
    async fn transmit_at(&mut self, i: usize, timeout: Duration) -> bool {
        self.client_seq = self.client_seq.wrapping_add(1);
        let seq = self.client_seq;
        let (kind, base, count, payload) = {
            let t = &self.queue[i];
            (t.kind, t.base, t.count, t.payload.clone())
        };
        let hdr = GeminiHeader::new(kind.opcode(), seq, 0).with_base_and_count(base, count);
        let mut datagram =
            BytesMut::with_capacity(HEADER_LEN + payload.as_ref().map_or(0, Bytes::len));
        datagram.extend_from_slice(&hdr.to_bytes());
        if let Some(p) = &payload {
            datagram.extend_from_slice(p);
        }

        if let Err(e) = self.transport.send_datagram(&datagram).await {
            error!("{e}");
            self.client_seq = self.client_seq.wrapping_sub(1);
            return false;
        }

        let t = &mut self.queue[i];
        t.client_seq = seq;
        t.send_count += 1;
        t.deadline = Some(tokio::time::Instant::now() + timeout);
        true
    }
}
