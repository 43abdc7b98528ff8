//! End-to-end runs against a real libp2p peer on 127.0.0.1.
//!
//! Each test spawns a [`LoopbackTarget`] (TCP + Noise + Yamux) and attacks
//! it with fresh ephemeral peers, then inspects what the target recorded.

use filchaos_core::constants::{
    FORGED_BATCH_SIZE, GOSSIPSUB_V11_PROTOCOL, IDENTIFY_PUSH_PROTOCOL, OVERSIZED_PAYLOAD_SIZE,
    PING_PROTOCOL, PUBSUB_PROTOCOLS, SPAM_SENDS, TOPIC_FLOOD_TOPICS,
};
use filchaos_core::wire::read_uvarint;
use filchaos_core::{Attack, AttackPlan, ChaosConfig, FuzzError};
use filchaos_net::strategy::worst_case;
use filchaos_net::{EphemeralPeerFactory, TargetPeer, run_once, run_strategy};
use filchaos_tests::helpers::*;
use rand::SeedableRng;
use rand::rngs::StdRng;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

const ONE_MIB: usize = 1024 * 1024;

async fn attack_once(target: &TargetPeer, attack: Attack, config: &ChaosConfig) -> (Result<(), FuzzError>, Duration) {
    let mut rng = StdRng::seed_from_u64(11);
    let started = Instant::now();
    let result = run_once(&EphemeralPeerFactory, target, attack, config, &CancellationToken::new(), &mut rng)
        .await
        .map(|_| ());
    (result, started.elapsed())
}

/// Run one pub-sub attack to completion and return how many sends landed.
async fn spam_once(target: &TargetPeer, attack: Attack, seed: u64) -> usize {
    let mut rng = StdRng::seed_from_u64(seed);
    let outcome = run_once(&EphemeralPeerFactory, target, attack, &ChaosConfig::local(), &CancellationToken::new(), &mut rng)
        .await
        .unwrap();
    assert_eq!(outcome.delivered, outcome.attempts, "{attack}: {outcome:?}");
    outcome.delivered
}

/// Top-level protobuf fields of `data` as (field, varint value or length, body).
fn fields(mut data: &[u8]) -> Vec<(u32, u64, &[u8])> {
    let mut out = Vec::new();
    while !data.is_empty() {
        let (key, used) = read_uvarint(data).expect("field key");
        data = &data[used..];
        let field = (key >> 3) as u32;
        match key & 7 {
            0 => {
                let (value, used) = read_uvarint(data).expect("varint value");
                out.push((field, value, &data[..0]));
                data = &data[used..];
            }
            2 => {
                let (len, used) = read_uvarint(data).expect("length");
                let end = used + len as usize;
                out.push((field, len, &data[used..end]));
                data = &data[end..];
            }
            other => panic!("unexpected wire type {other}"),
        }
    }
    out
}

/// Which fields one RPC carries; control sub-messages show up as 100 + field.
fn rpc_shape(body: &[u8]) -> Vec<u32> {
    let mut shape = std::collections::BTreeSet::new();
    for (field, _, value) in fields(body) {
        if field == 3 {
            shape.extend(fields(value).into_iter().map(|(sub, _, _)| 100 + sub));
        } else {
            shape.insert(field);
        }
    }
    shape.into_iter().collect()
}

/// The single RPC body carried by each stream.
fn single_bodies(streams: &[ReceivedStream]) -> Vec<Vec<u8>> {
    streams
        .iter()
        .map(|s| {
            let mut bodies = frames(&s.bytes);
            assert_eq!(bodies.len(), 1, "one RPC per stream");
            bodies.remove(0)
        })
        .collect()
}

/// Split a buffer of uvarint-delimited frames into bodies.
fn frames(mut data: &[u8]) -> Vec<Vec<u8>> {
    let mut out = Vec::new();
    while !data.is_empty() {
        let (len, used) = read_uvarint(data).expect("length prefix");
        let end = used + len as usize;
        out.push(data[used..end].to_vec());
        data = &data[end..];
    }
    out
}

// ---------------------------------------------------------------------------
// Ping family
// ---------------------------------------------------------------------------

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn empty_payload_reaches_the_target_as_a_zero_length_frame() {
    let node = LoopbackTarget::spawn(TargetOptions::default()).await;
    let (result, _) = attack_once(node.target(), Attack::EmptyPayload, &ChaosConfig::local()).await;
    assert_eq!(result, Ok(()));

    let seen = node.wait_for(PING_PROTOCOL, 1, Duration::from_secs(2)).await;
    assert_eq!(seen.len(), 1);
    assert!(seen[0].bytes.is_empty());
    assert_eq!(node.connections(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn run_strategy_keeps_attacking_until_cancelled() {
    let node = LoopbackTarget::spawn(TargetOptions::default()).await;
    let plan = AttackPlan::new(
        Attack::EmptyPayload,
        2,
        Duration::from_millis(100),
        Duration::from_millis(200),
    );
    let cancel = CancellationToken::new();
    let stopper = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(900)).await;
        stopper.cancel();
    });

    let summary = run_strategy(cancel, node.target().raw(), plan, ChaosConfig::local())
        .await
        .unwrap();

    assert!(summary.ticks >= 3, "{summary:?}");
    assert!(summary.succeeded >= 2, "{summary:?}");
    let seen = node.wait_for(PING_PROTOCOL, summary.succeeded as usize, Duration::from_secs(2)).await;
    assert!(seen.iter().all(|s| s.bytes.is_empty()));
    // One fresh identity per execution.
    let peers: std::collections::HashSet<_> = seen.iter().map(|s| s.from).collect();
    assert_eq!(peers.len(), seen.len());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn random_payload_reads_the_echo() {
    let node = LoopbackTarget::spawn(TargetOptions {
        echo_ping: true,
        ..TargetOptions::default()
    })
    .await;
    let (result, _) = attack_once(node.target(), Attack::RandomPayload, &ChaosConfig::local()).await;
    assert_eq!(result, Ok(()));

    let seen = node.wait_for(PING_PROTOCOL, 1, Duration::from_secs(2)).await;
    assert_eq!(seen.len(), 1);
    assert!((1..=1024).contains(&seen[0].bytes.len()));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn incomplete_write_delivers_exactly_half() {
    let node = LoopbackTarget::spawn(TargetOptions::default()).await;
    let (result, _) = attack_once(node.target(), Attack::IncompleteWrite, &ChaosConfig::local()).await;
    assert_eq!(result, Ok(()));
    let seen = node.wait_for(PING_PROTOCOL, 1, Duration::from_secs(2)).await;
    assert_eq!(seen[0].bytes.len(), 512);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn multiple_streams_are_all_opened_on_one_connection() {
    let node = LoopbackTarget::spawn(TargetOptions::default()).await;
    let (result, _) = attack_once(node.target(), Attack::MultipleStreams, &ChaosConfig::local()).await;
    assert_eq!(result, Ok(()));

    let seen = node.wait_for(PING_PROTOCOL, 20, Duration::from_secs(3)).await;
    assert!((20..=40).contains(&seen.len()), "{} streams", seen.len());
    assert!(seen.iter().all(|s| s.bytes.is_empty()));
    assert_eq!(node.connections(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn connect_disconnect_redials_from_the_same_identity() {
    let node = LoopbackTarget::spawn(TargetOptions::default()).await;
    let (result, _) = attack_once(node.target(), Attack::ConnectDisconnect, &ChaosConfig::local()).await;
    assert_eq!(result, Ok(()));
    // Initial dial plus one redial per cycle.
    assert!(node.connections() >= 6, "{} connections", node.connections());
}

// ---------------------------------------------------------------------------
// Oversized push against a target that drops greedy peers
// ---------------------------------------------------------------------------

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn oversized_payload_errors_instead_of_hanging() {
    let node = LoopbackTarget::spawn(TargetOptions {
        close_after: Some(ONE_MIB),
        ..TargetOptions::default()
    })
    .await;
    let config = ChaosConfig::local();

    let (result, elapsed) = attack_once(node.target(), Attack::OversizedPayload, &config).await;

    let cap = worst_case(Attack::OversizedPayload, &config) + config.io_timeout;
    assert!(result.is_err(), "a 5 MiB write cannot complete past a 1 MiB cut-off");
    assert!(!result.unwrap_err().is_fatal());
    assert!(elapsed <= cap + config.teardown_timeout, "took {elapsed:?}");

    let seen = node.wait_for(PING_PROTOCOL, 1, Duration::from_secs(2)).await;
    assert!(seen[0].bytes.len() < OVERSIZED_PAYLOAD_SIZE);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn random_payload_returns_against_the_same_target() {
    let node = LoopbackTarget::spawn(TargetOptions {
        close_after: Some(ONE_MIB),
        ..TargetOptions::default()
    })
    .await;
    let config = ChaosConfig::local();
    let (_, elapsed) = attack_once(node.target(), Attack::RandomPayload, &config).await;
    let cap = worst_case(Attack::RandomPayload, &config) + config.io_timeout;
    assert!(elapsed <= cap + config.teardown_timeout, "took {elapsed:?}");
}

// ---------------------------------------------------------------------------
// Identify and pub-sub families
// ---------------------------------------------------------------------------

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn identify_push_carries_one_delimited_message() {
    let node = LoopbackTarget::spawn(TargetOptions::default()).await;
    let (result, _) = attack_once(node.target(), Attack::FuzzedAddressPush, &ChaosConfig::local()).await;
    assert_eq!(result, Ok(()));

    let seen = node.wait_for(IDENTIFY_PUSH_PROTOCOL, 1, Duration::from_secs(2)).await;
    let bodies = frames(&seen[0].bytes);
    assert_eq!(bodies.len(), 1);
    // observedAddr is field 4, length-delimited.
    assert_eq!(bodies[0][0], (4 << 3) | 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn ihave_spam_opens_a_stream_per_send() {
    let node = LoopbackTarget::spawn(TargetOptions::default()).await;
    let (result, _) = attack_once(node.target(), Attack::IHaveSpam, &ChaosConfig::local()).await;
    assert_eq!(result, Ok(()));

    let seen = node.wait_for(GOSSIPSUB_V11_PROTOCOL, 5, Duration::from_secs(3)).await;
    assert!((5..=20).contains(&seen.len()), "{} sends", seen.len());
    // Every send delivered a full frame before closing or resetting.
    for stream in &seen {
        let bodies = frames(&stream.bytes);
        assert_eq!(bodies.len(), 1);
        // control is field 3 of the RPC.
        assert_eq!(bodies[0][0], (3 << 3) | 2);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn malformed_control_targets_every_pubsub_protocol_over_time() {
    let node = LoopbackTarget::spawn(TargetOptions::default()).await;
    for _ in 0..4 {
        let mut rng = StdRng::from_entropy();
        let result = run_once(
            &EphemeralPeerFactory,
            node.target(),
            Attack::MalformedControlMessage,
            &ChaosConfig::local(),
            &CancellationToken::new(),
            &mut rng,
        )
        .await;
        assert!(result.is_ok(), "{result:?}");
    }
    tokio::time::sleep(Duration::from_millis(200)).await;
    let used = PUBSUB_PROTOCOLS
        .iter()
        .filter(|p| !node.received_on(p).is_empty())
        .count();
    assert!(used >= 2, "only {used} pub-sub protocols were attacked");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn unreachable_target_is_a_routine_failure() {
    let config = ChaosConfig {
        dial_timeout: Duration::from_millis(500),
        ..ChaosConfig::local()
    };
    let target: TargetPeer = unroutable_target().parse().unwrap();
    let (result, elapsed) = attack_once(&target, Attack::EmptyPayload, &config).await;
    let err = result.unwrap_err();
    assert!(!err.is_fatal(), "{err}");
    assert!(elapsed < config.dial_timeout + config.teardown_timeout + Duration::from_millis(200));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn graft_prune_spam_alternates_graft_and_prune() {
    let node = LoopbackTarget::spawn(TargetOptions::default()).await;
    let sent = spam_once(node.target(), Attack::GraftPruneSpam, 5).await;
    assert!(SPAM_SENDS.contains(&sent));

    let seen = node.wait_for(GOSSIPSUB_V11_PROTOCOL, sent, Duration::from_secs(3)).await;
    let shapes: Vec<_> = single_bodies(&seen).iter().map(|b| rpc_shape(b)).collect();
    let grafts = shapes.iter().filter(|s| **s == [103]).count();
    let prunes = shapes.iter().filter(|s| **s == [104]).count();
    assert_eq!(grafts + prunes, sent, "{shapes:?}");
    assert_eq!(grafts, sent.div_ceil(2));
    assert_eq!(prunes, sent / 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn topic_flood_alternates_subscribe_and_unsubscribe_bursts() {
    let node = LoopbackTarget::spawn(TargetOptions::default()).await;
    let sent = spam_once(node.target(), Attack::TopicFlood, 6).await;

    let seen = node.wait_for(GOSSIPSUB_V11_PROTOCOL, sent, Duration::from_secs(5)).await;
    let mut subscribes = 0;
    let mut unsubscribes = 0;
    for body in single_bodies(&seen) {
        let subs: Vec<_> = fields(&body).into_iter().filter(|(f, _, _)| *f == 1).collect();
        assert!(TOPIC_FLOOD_TOPICS.contains(&subs.len()), "{} topics", subs.len());
        // SubOpts.subscribe is field 1, a varint bool.
        let flag = fields(subs[0].2)[0];
        assert_eq!(flag.0, 1);
        match rpc_shape(&body).as_slice() {
            [1, 101] => {
                assert_eq!(flag.1, 1);
                subscribes += 1;
            }
            [1] => {
                assert_eq!(flag.1, 0);
                unsubscribes += 1;
            }
            other => panic!("unexpected flood shape {other:?}"),
        }
    }
    assert_eq!(subscribes, sent.div_ceil(2));
    assert_eq!(unsubscribes, sent / 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn iwant_spam_requests_a_forged_batch_per_send() {
    let node = LoopbackTarget::spawn(TargetOptions::default()).await;
    let sent = spam_once(node.target(), Attack::IWantSpam, 7).await;

    let seen = node.wait_for(GOSSIPSUB_V11_PROTOCOL, sent, Duration::from_secs(3)).await;
    assert_eq!(seen.len(), sent);
    for body in single_bodies(&seen) {
        assert_eq!(rpc_shape(&body), [102]);
        let control = fields(&body)[0].2;
        let iwant = fields(control)[0].2;
        assert!(FORGED_BATCH_SIZE.contains(&fields(iwant).len()));
    }
}
