//! Caller-facing channels: lightweight, independently disposable handles
//! that multiplex onto a single [`crate::session::SessionHandle`] (spec
//! §4.3).

// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use anyhow::{Result, anyhow};
use bytes::Bytes;
use tokio::sync::mpsc;

use crate::{
    session::{ChannelResult, Command},
    wire::opcode::RequestKind,
};

/// A routing handle onto a Session. Disposing before a reply arrives is
/// legal; the Session silently drops the eventual result.
pub struct RwChannel {
    id: u32,
    cmd_tx: mpsc::Sender<Command>,
    result_rx: mpsc::Receiver<ChannelResult>,
    disposed: bool,
}

impl RwChannel {
    pub(crate) fn new(
        id: u32,
        cmd_tx: mpsc::Sender<Command>,
        result_rx: mpsc::Receiver<ChannelResult>,
    ) -> Self {
        Self {
            id,
            cmd_tx,
            result_rx,
            disposed: false,
        }
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    /// Submits a register-access request. If the Session is not connected,
    /// the eventual [`ChannelResult`] is delivered immediately with
    /// `timed_out: true`.
    pub async fn rw(
        &self,
        base: u32,
        count: u32,
        payload: Option<Bytes>,
        kind: RequestKind,
    ) -> Result<()> {
        self.cmd_tx
            .send(Command::Rw {
                channel: self.id,
                base,
                count,
                payload,
                kind,
            })
            .await
            .map_err(|_| anyhow!("session actor task is gone"))
    }

    /// Waits for the next result delivered on this channel. Returns `None`
    /// once the Session has been dropped.
    pub async fn recv(&mut self) -> Option<ChannelResult> {
        self.result_rx.recv().await
    }

    /// Relinquishes the channel; its index is reused once no queued
    /// transaction still references it.
    pub async fn dispose(mut self) {
        self.dispose_inner().await;
    }

    async fn dispose_inner(&mut self) {
        if self.disposed {
            return;
        }
        self.disposed = true;
        let _ = self.cmd_tx.send(Command::Dispose { channel: self.id }).await;
    }
}

impl Drop for RwChannel {
    fn drop(&mut self) {
        if self.disposed {
            return;
        }
        self.disposed = true;
        // Best-effort: try_send so Drop never blocks. If the queue is full
        // the dispose is lost, but the slot would only leak until the
        // Session itself is torn down.
        let _ = self.cmd_tx.try_send(Command::Dispose { channel: self.id });
    }
}
