//! Attack strategies: one procedure per catalog entry.
//!
//! [`execute`] is an exhaustive match over [`Attack`], so every catalog entry
//! has exactly one procedure. Each procedure drives a [`PeerLink`] through
//! the helpers on [`AttackContext`], which attach a deadline and the
//! session's cancellation token to every open, read, write and close.

#[cfg(test)]
mod fake;
mod identify;
mod ping;
mod pubsub;

use crate::io::{self, BoxedStream};
use crate::peer::PeerLink;
use crate::target::TargetPeer;
use filchaos_core::constants::{
    BARRAGE_COUNT, BARRAGE_STAGGER_MS, CONNECT_CYCLES, CONNECT_PAUSE_MS, SLOW_WRITE_DELAY_MS,
    SPAM_PAUSE_MS, SPAM_SENDS, VARIABLE_PAUSE_MS, VARIABLE_WRITES,
};
use filchaos_core::{Attack, ChaosConfig, FuzzError};
use libp2p::StreamProtocol;
use rand::Rng;
use rand::rngs::StdRng;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Everything one execution needs besides its random source.
#[derive(Clone, Copy)]
pub struct AttackContext<'a> {
    pub link: &'a dyn PeerLink,
    pub target: &'a TargetPeer,
    pub config: &'a ChaosConfig,
    pub cancel: &'a CancellationToken,
}

impl AttackContext<'_> {
    /// Open a stream within `io_timeout`.
    pub async fn open(&self, protocol: &'static str) -> Result<BoxedStream, FuzzError> {
        io::guarded(
            "open",
            self.config.io_timeout,
            self.cancel,
            self.link.open_stream(StreamProtocol::new(protocol)),
        )
        .await
    }

    pub async fn write(&self, stream: &mut BoxedStream, data: &[u8]) -> Result<(), FuzzError> {
        io::write_all(stream, data, self.config.io_timeout, self.cancel).await
    }

    pub async fn write_within(
        &self,
        stream: &mut BoxedStream,
        data: &[u8],
        after: Duration,
    ) -> Result<(), FuzzError> {
        io::write_all(stream, data, after, self.cancel).await
    }

    /// One best-effort reply read bounded by `reply_timeout`.
    pub async fn read_reply(&self, stream: &mut BoxedStream, buf: &mut [u8]) -> Result<usize, FuzzError> {
        io::read_some(stream, buf, self.config.reply_timeout, self.cancel).await
    }

    pub async fn close(&self, stream: &mut BoxedStream) -> Result<(), FuzzError> {
        io::close(stream, self.config.io_timeout, self.cancel).await
    }

    pub async fn pause(&self, dur: Duration) -> Result<(), FuzzError> {
        io::pause(self.cancel, dur).await
    }

    /// Close `stream`, logging instead of returning a failure.
    pub async fn close_quietly(&self, stream: &mut BoxedStream) {
        if let Err(e) = self.close(stream).await {
            debug!(peer = %self.target.peer_id(), error = %e, "stream close failed");
        }
    }
}

fn random_bytes(rng: &mut StdRng, len: usize) -> Vec<u8> {
    let mut buf = vec![0u8; len];
    rng.fill(&mut buf[..]);
    buf
}

/// Fold per-send results into an outcome: an execution that delivered
/// nothing reports its first error, anything else counts as delivered.
fn tally(attempts: usize, results: impl IntoIterator<Item = Result<(), FuzzError>>) -> Result<AttackOutcome, FuzzError> {
    let mut delivered = 0;
    let mut first_err = None;
    for r in results {
        match r {
            Ok(()) => delivered += 1,
            Err(e) => {
                first_err.get_or_insert(e);
            }
        }
    }
    match first_err {
        Some(e) if delivered == 0 => Err(e),
        _ => Ok(AttackOutcome { attempts, delivered }),
    }
}

/// How much of one execution got through.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AttackOutcome {
    /// Streams, writes or cycles attempted.
    pub attempts: usize,
    /// How many of those completed without error.
    pub delivered: usize,
}

impl AttackOutcome {
    pub fn single() -> Self {
        Self {
            attempts: 1,
            delivered: 1,
        }
    }
}

/// Run one execution of `attack` over `cx.link`.
pub async fn execute(
    attack: Attack,
    cx: &AttackContext<'_>,
    rng: &mut StdRng,
) -> Result<AttackOutcome, FuzzError> {
    match attack {
        Attack::RandomPayload => ping::random_payload(cx, rng).await,
        Attack::OversizedPayload => ping::oversized_payload(cx, rng).await,
        Attack::EmptyPayload => ping::empty_payload(cx).await,
        Attack::MultipleStreams => ping::multiple_streams(cx, rng).await,
        Attack::IncompleteWrite => ping::incomplete_write(cx, rng).await,
        Attack::PingBarrage => ping::barrage(cx, rng).await,
        Attack::MalformedPayload => ping::malformed_payload(cx, rng).await,
        Attack::ConnectDisconnect => ping::connect_disconnect(cx, rng).await,
        Attack::VariablePayload => ping::variable_payload(cx, rng).await,
        Attack::SlowWrite => ping::slow_write(cx, rng).await,
        Attack::FuzzedAddressPush => identify::fuzzed_address_push(cx, rng).await,
        Attack::IHaveSpam => pubsub::ihave_spam(cx, rng).await,
        Attack::IWantSpam => pubsub::iwant_spam(cx, rng).await,
        Attack::GraftPruneSpam => pubsub::graft_prune_spam(cx, rng).await,
        Attack::MalformedControlMessage => pubsub::malformed_control(cx, rng).await,
        Attack::TopicFlood => pubsub::topic_flood(cx, rng).await,
    }
}

/// Upper bound on how long one execution of `attack` can take once
/// connected, derived from the deadlines in `config`.
pub fn worst_case(attack: Attack, config: &ChaosConfig) -> Duration {
    let io = config.io_timeout;
    let ms = Duration::from_millis;
    // open + write + close
    let one_shot = io * 3;
    let spam = (one_shot + ms(SPAM_PAUSE_MS.end)) * *SPAM_SENDS.end() as u32;

    match attack {
        Attack::RandomPayload => one_shot + config.reply_timeout,
        Attack::OversizedPayload => io * 2 + config.oversized_write_timeout,
        Attack::EmptyPayload => one_shot,
        Attack::MultipleStreams => io * 2 + config.stream_hold,
        Attack::IncompleteWrite => one_shot + config.incomplete_write_pause,
        Attack::PingBarrage => ms(BARRAGE_STAGGER_MS) * BARRAGE_COUNT.end as u32 + one_shot,
        Attack::MalformedPayload => one_shot + config.reply_timeout,
        Attack::ConnectDisconnect => {
            (io + ms(CONNECT_PAUSE_MS.end) + config.dial_timeout + one_shot) * CONNECT_CYCLES.end as u32
        }
        Attack::VariablePayload => {
            io * 2 + (io + ms(VARIABLE_PAUSE_MS)) * VARIABLE_WRITES.end as u32
        }
        Attack::SlowWrite => {
            io * 3 + config.slow_write_budget + ms(SLOW_WRITE_DELAY_MS.end)
        }
        Attack::FuzzedAddressPush => one_shot,
        Attack::IHaveSpam
        | Attack::IWantSpam
        | Attack::GraftPruneSpam
        | Attack::MalformedControlMessage
        | Attack::TopicFlood => spam,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn worst_case_grows_with_deadlines() {
        let local = ChaosConfig::local();
        let default = ChaosConfig::default();
        for attack in Attack::ALL {
            assert!(worst_case(attack, &local) <= worst_case(attack, &default), "{attack}");
            assert!(worst_case(attack, &local) > Duration::ZERO);
        }
    }

    #[test]
    fn tally_reports_error_only_when_nothing_landed() {
        let err = FuzzError::Write("reset".into());
        assert_eq!(tally(2, [Err(err.clone()), Err(FuzzError::Cancelled)]), Err(err.clone()));
        assert_eq!(
            tally(3, [Err(err), Ok(()), Ok(())]),
            Ok(AttackOutcome { attempts: 3, delivered: 2 })
        );
        assert_eq!(tally(0, []), Ok(AttackOutcome::default()));
    }

    #[test]
    fn slow_write_bound_tracks_budget() {
        let mut cfg = ChaosConfig::local();
        let before = worst_case(Attack::SlowWrite, &cfg);
        cfg.slow_write_budget += Duration::from_secs(10);
        assert_eq!(worst_case(Attack::SlowWrite, &cfg), before + Duration::from_secs(10));
    }
}
