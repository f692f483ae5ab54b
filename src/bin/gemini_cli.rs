//! Smoke-test binary: connects a Session to a configured FPGA peer, opens
//! one channel, reads a handful of registers, and logs the result.

// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use anyhow::{Context, Result, bail};
use gemini_proto::{
    cfg::{cli::resolve_config_path, config::Config, logger::init_logger},
    session::SessionHandle,
    wire::opcode::RequestKind,
};
use tokio::time::{Duration, timeout};
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    let _logger_guard = init_logger("config.yaml")?;

    let cfg = resolve_config_path("config.yaml")
        .and_then(Config::load_from_file)
        .context("failed to resolve or load config")?;

    let session = SessionHandle::new(cfg.to_peer_config()?, cfg.to_session_limits())
        .await
        .context("failed to bind the Gemini UDP transport")?;

    let cnx_result = timeout(Duration::from_secs(5), session.connect())
        .await
        .context("connect timed out at the CLI level")??;
    info!(?cnx_result, "connect handshake finished");

    let mut channel = session.open_channel().await.context("open_channel failed")?;
    channel
        .rw(0, 4, None, RequestKind::ReadInc)
        .await
        .context("submitting read failed")?;

    match channel.recv().await {
        Some(result) if result.timed_out => bail!("read timed out"),
        Some(result) => {
            info!(
                base = result.base,
                count = result.count,
                is_ack = result.is_ack,
                fail_code = result.fail_code,
                "read completed"
            );
        },
        None => bail!("session dropped before delivering a result"),
    }

    channel.dispose().await;
    Ok(())
}
