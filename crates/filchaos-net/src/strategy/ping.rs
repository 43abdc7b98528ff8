//! Ping-protocol attacks.

use super::{AttackContext, AttackOutcome, random_bytes, tally};
use crate::io;
use filchaos_core::constants::*;
use filchaos_core::{Attack, FuzzError};
use libp2p::futures::future::join_all;
use rand::Rng;
use rand::rngs::StdRng;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

pub(super) async fn random_payload(cx: &AttackContext<'_>, rng: &mut StdRng) -> Result<AttackOutcome, FuzzError> {
    let size = rng.gen_range(RANDOM_PAYLOAD_SIZE);
    let payload = random_bytes(rng, size);

    let mut stream = cx.open(PING_PROTOCOL).await?;
    if let Err(e) = cx.write(&mut stream, &payload).await {
        debug!(attack = %Attack::RandomPayload, size, error = %e, "write failed");
        cx.close_quietly(&mut stream).await;
        return Err(e);
    }

    let mut reply = [0u8; REPLY_BUFFER_SIZE];
    match cx.read_reply(&mut stream, &mut reply).await {
        Ok(0) => debug!(attack = %Attack::RandomPayload, size, "stream closed without reply"),
        Ok(n) => debug!(attack = %Attack::RandomPayload, size, reply = n, "reply received"),
        Err(e) => debug!(attack = %Attack::RandomPayload, size, error = %e, "no reply"),
    }
    cx.close_quietly(&mut stream).await;
    Ok(AttackOutcome::single())
}

/// One 5 MiB write; no reply is read.
pub(super) async fn oversized_payload(cx: &AttackContext<'_>, rng: &mut StdRng) -> Result<AttackOutcome, FuzzError> {
    let payload = random_bytes(rng, OVERSIZED_PAYLOAD_SIZE);
    let mut stream = cx.open(PING_PROTOCOL).await?;
    let written = cx
        .write_within(&mut stream, &payload, cx.config.oversized_write_timeout)
        .await;
    cx.close_quietly(&mut stream).await;
    written.map(|()| AttackOutcome::single())
}

pub(super) async fn empty_payload(cx: &AttackContext<'_>) -> Result<AttackOutcome, FuzzError> {
    let mut stream = cx.open(PING_PROTOCOL).await?;
    cx.write(&mut stream, &[]).await?;
    cx.close(&mut stream).await?;
    Ok(AttackOutcome::single())
}

/// Open 20-40 streams at once and hold them idle.
pub(super) async fn multiple_streams(cx: &AttackContext<'_>, rng: &mut StdRng) -> Result<AttackOutcome, FuzzError> {
    let count = rng.gen_range(MULTIPLE_STREAMS_COUNT);
    let opened = join_all((0..count).map(|_| cx.open(PING_PROTOCOL))).await;

    let mut streams = Vec::with_capacity(count);
    let mut first_err = None;
    for r in opened {
        match r {
            Ok(s) => streams.push(s),
            Err(e) => {
                first_err.get_or_insert(e);
            }
        }
    }
    debug!(attack = %Attack::MultipleStreams, requested = count, opened = streams.len(), "holding streams");
    if let (true, Some(e)) = (streams.is_empty(), first_err) {
        return Err(e);
    }

    let held = cx.pause(cx.config.stream_hold).await;
    join_all(streams.iter_mut().map(|s| cx.close_quietly(s))).await;
    held?;

    Ok(AttackOutcome {
        attempts: count,
        delivered: streams.len(),
    })
}

/// Send the first half of a 1 KiB frame, wait, then close.
pub(super) async fn incomplete_write(cx: &AttackContext<'_>, rng: &mut StdRng) -> Result<AttackOutcome, FuzzError> {
    let payload = random_bytes(rng, INCOMPLETE_PAYLOAD_SIZE);
    let mut stream = cx.open(PING_PROTOCOL).await?;

    let mut result = cx.write(&mut stream, &payload[..INCOMPLETE_PAYLOAD_SIZE / 2]).await;
    if result.is_ok() {
        result = cx.pause(cx.config.incomplete_write_pause).await;
    }
    cx.close_quietly(&mut stream).await;
    result.map(|()| AttackOutcome::single())
}

/// Many short-lived streams launched a few milliseconds apart.
pub(super) async fn barrage(cx: &AttackContext<'_>, rng: &mut StdRng) -> Result<AttackOutcome, FuzzError> {
    let count = rng.gen_range(BARRAGE_COUNT);
    let payloads: Vec<Vec<u8>> = (0..count)
        .map(|_| {
            let size = rng.gen_range(BARRAGE_PAYLOAD_SIZE);
            random_bytes(rng, size)
        })
        .collect();

    let results = join_all(payloads.iter().enumerate().map(|(i, payload)| async move {
        cx.pause(Duration::from_millis(BARRAGE_STAGGER_MS * i as u64)).await?;
        let mut stream = cx.open(PING_PROTOCOL).await?;
        let written = cx.write(&mut stream, payload).await;
        cx.close_quietly(&mut stream).await;
        written
    }))
    .await;

    let outcome = tally(count, results)?;
    debug!(attack = %Attack::PingBarrage, sent = outcome.delivered, count, "barrage finished");
    Ok(outcome)
}

/// Bytes that no ping implementation should accept as a payload.
pub(super) fn malformed_bytes(rng: &mut StdRng) -> (&'static str, Vec<u8>) {
    match rng.gen_range(0..4) {
        0 => ("truncated length prefix", vec![0xFF; 4]),
        1 => (
            "invalid utf-8",
            vec![0xC0, 0xAF, 0xE0, 0x80, 0xBF, 0xF0, 0x28, 0x8C, 0x28],
        ),
        2 => {
            let size = rng.gen_range(MALFORMED_GARBAGE_SIZE);
            let mut garbage = random_bytes(rng, size);
            for _ in 0..size / 10 {
                let at = rng.gen_range(0..size);
                garbage[at] = rng.gen_range(0..32u8);
            }
            ("binary garbage", garbage)
        }
        _ => (
            "foreign format",
            br#"{"invalid": "json format for ping protocol"}"#.to_vec(),
        ),
    }
}

pub(super) async fn malformed_payload(cx: &AttackContext<'_>, rng: &mut StdRng) -> Result<AttackOutcome, FuzzError> {
    let (shape, payload) = malformed_bytes(rng);
    let mut stream = cx.open(PING_PROTOCOL).await?;
    if let Err(e) = cx.write(&mut stream, &payload).await {
        cx.close_quietly(&mut stream).await;
        return Err(e);
    }

    let mut reply = [0u8; REPLY_BUFFER_SIZE];
    match cx.read_reply(&mut stream, &mut reply).await {
        Ok(n) if n > 0 => debug!(attack = %Attack::MalformedPayload, shape, reply = n, "target answered malformed payload"),
        _ => debug!(attack = %Attack::MalformedPayload, shape, size = payload.len(), "no reply"),
    }
    cx.close_quietly(&mut stream).await;
    Ok(AttackOutcome::single())
}

/// Drop and redial the connection 5-14 times, sending one byte after each
/// redial. A failed redial ends the execution.
pub(super) async fn connect_disconnect(cx: &AttackContext<'_>, rng: &mut StdRng) -> Result<AttackOutcome, FuzzError> {
    let cycles = rng.gen_range(CONNECT_CYCLES);
    let mut delivered = 0;

    for iteration in 0..cycles {
        if let Err(e) = io::guarded("disconnect", cx.config.io_timeout, cx.cancel, cx.link.disconnect()).await {
            debug!(attack = %Attack::ConnectDisconnect, iteration, error = %e, "disconnect failed");
        }
        cx.pause(Duration::from_millis(rng.gen_range(CONNECT_PAUSE_MS))).await?;
        io::guarded("dial", cx.config.dial_timeout, cx.cancel, cx.link.reconnect())
            .await
            .inspect_err(|e| debug!(attack = %Attack::ConnectDisconnect, iteration, error = %e, "redial failed"))?;

        if let Ok(mut stream) = cx.open(PING_PROTOCOL).await {
            if cx.write(&mut stream, &[0x01]).await.is_ok() {
                delivered += 1;
            }
            cx.close_quietly(&mut stream).await;
        }
    }

    debug!(attack = %Attack::ConnectDisconnect, cycles, "cycles completed");
    Ok(AttackOutcome {
        attempts: cycles,
        delivered,
    })
}

/// Several writes of very different sizes on one stream.
pub(super) async fn variable_payload(cx: &AttackContext<'_>, rng: &mut StdRng) -> Result<AttackOutcome, FuzzError> {
    let writes = rng.gen_range(VARIABLE_WRITES);
    let mut stream = cx.open(PING_PROTOCOL).await?;
    let mut results = Vec::with_capacity(writes);

    for iteration in 0..writes {
        let size = VARIABLE_PAYLOAD_SIZES[rng.gen_range(0..VARIABLE_PAYLOAD_SIZES.len())];
        let payload = random_bytes(rng, size);
        let written = cx.write(&mut stream, &payload).await;
        let failed = written.is_err();
        if let Err(e) = &written {
            debug!(attack = %Attack::VariablePayload, iteration, size, error = %e, "write failed");
        }
        results.push(written);
        if failed || cx.pause(Duration::from_millis(VARIABLE_PAUSE_MS)).await.is_err() {
            break;
        }
    }

    cx.close_quietly(&mut stream).await;
    tally(writes, results)
}

/// One byte at a time with a 50-150ms gap, capped by `slow_write_budget`.
pub(super) async fn slow_write(cx: &AttackContext<'_>, rng: &mut StdRng) -> Result<AttackOutcome, FuzzError> {
    let payload = random_bytes(rng, SLOW_WRITE_TOTAL);
    let mut stream = cx.open(PING_PROTOCOL).await?;
    let started = Instant::now();
    let mut sent = 0;
    let mut result = Ok(());

    for byte in payload.chunks(1) {
        if started.elapsed() >= cx.config.slow_write_budget {
            debug!(attack = %Attack::SlowWrite, sent, "time budget spent");
            break;
        }
        if let Err(e) = cx.write(&mut stream, byte).await {
            debug!(attack = %Attack::SlowWrite, sent, error = %e, "slow write interrupted");
            result = Err(e);
            break;
        }
        sent += 1;
        if sent % 1024 == 0 {
            debug!(attack = %Attack::SlowWrite, sent, total = SLOW_WRITE_TOTAL, "slow write progress");
        }
        if let Err(e) = cx.pause(Duration::from_millis(rng.gen_range(SLOW_WRITE_DELAY_MS))).await {
            result = Err(e);
            break;
        }
    }

    cx.close_quietly(&mut stream).await;
    result.map(|()| AttackOutcome {
        attempts: SLOW_WRITE_TOTAL,
        delivered: sent,
    })
}
