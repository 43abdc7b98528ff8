//! Protocol identifiers and attack shape constants.

use std::ops::{Range, RangeInclusive};

/// libp2p ping protocol.
pub const PING_PROTOCOL: &str = "/ipfs/ping/1.0.0";

/// libp2p identify push protocol.
pub const IDENTIFY_PUSH_PROTOCOL: &str = "/ipfs/id/push/1.0.0";

/// Gossipsub v1.1 stream protocol.
pub const GOSSIPSUB_V11_PROTOCOL: &str = "/meshsub/1.1.0";

/// Gossipsub v1.0 stream protocol.
pub const GOSSIPSUB_V10_PROTOCOL: &str = "/meshsub/1.0.0";

/// Legacy floodsub stream protocol.
pub const FLOODSUB_PROTOCOL: &str = "/floodsub/1.0.0";

/// Every pub-sub stream protocol a malformed envelope may be sent on.
pub const PUBSUB_PROTOCOLS: [&str; 3] = [
    GOSSIPSUB_V11_PROTOCOL,
    GOSSIPSUB_V10_PROTOCOL,
    FLOODSUB_PROTOCOL,
];

/// Topic advertised in forged control frames unless configured otherwise.
pub const DEFAULT_GOSSIP_TOPIC: &str = "/fil/blocks/fuzz";

/// Concurrency range a chaos session draws from when it starts.
pub const SESSION_CONCURRENCY: RangeInclusive<usize> = 2..=6;

/// Upper bound accepted for an explicit attack plan.
pub const MAX_PLAN_CONCURRENCY: usize = 64;

// ---------------------------------------------------------------------------
// Ping family shapes
// ---------------------------------------------------------------------------

/// RandomPayload size range in bytes.
pub const RANDOM_PAYLOAD_SIZE: RangeInclusive<usize> = 1..=1024;

/// Buffer size used for bounded best-effort reply reads.
pub const REPLY_BUFFER_SIZE: usize = 1024;

/// OversizedPayload buffer size (5 MiB).
pub const OVERSIZED_PAYLOAD_SIZE: usize = 5 * 1024 * 1024;

/// MultipleStreams stream count range.
pub const MULTIPLE_STREAMS_COUNT: RangeInclusive<usize> = 20..=40;

/// IncompleteWrite logical frame size; only the first half is sent.
pub const INCOMPLETE_PAYLOAD_SIZE: usize = 1024;

/// PingBarrage stream count range.
pub const BARRAGE_COUNT: Range<usize> = 10..50;

/// PingBarrage per-stream payload size range.
pub const BARRAGE_PAYLOAD_SIZE: RangeInclusive<usize> = 1..=4096;

/// Stagger between PingBarrage stream launches, in milliseconds.
pub const BARRAGE_STAGGER_MS: u64 = 5;

/// ConnectDisconnect cycle count range.
pub const CONNECT_CYCLES: Range<usize> = 5..15;

/// ConnectDisconnect pause range between disconnect and redial, in milliseconds.
pub const CONNECT_PAUSE_MS: Range<u64> = 10..40;

/// VariablePayload candidate write sizes.
pub const VARIABLE_PAYLOAD_SIZES: [usize; 7] = [0, 1, 16, 128, 4096, 64 * 1024, 1024 * 1024];

/// VariablePayload write count range.
pub const VARIABLE_WRITES: Range<usize> = 5..10;

/// Pause between VariablePayload writes, in milliseconds.
pub const VARIABLE_PAUSE_MS: u64 = 10;

/// SlowWrite total size before the time budget is considered.
pub const SLOW_WRITE_TOTAL: usize = 8 * 1024;

/// SlowWrite per-byte delay range, in milliseconds.
pub const SLOW_WRITE_DELAY_MS: Range<u64> = 50..150;

/// MalformedPayload random-garbage size range.
pub const MALFORMED_GARBAGE_SIZE: Range<usize> = 100..1100;

// ---------------------------------------------------------------------------
// Pub-sub family shapes
// ---------------------------------------------------------------------------

/// Number of fabricated content identifiers in one forged control frame.
pub const FORGED_BATCH_SIZE: RangeInclusive<usize> = 20..=50;

/// Size of the random payload hashed into each fabricated content identifier.
pub const FORGED_PAYLOAD_LEN: usize = 32;

/// Sends per pub-sub spam execution.
pub const SPAM_SENDS: RangeInclusive<usize> = 5..=20;

/// Jitter between pub-sub sends, in milliseconds.
pub const SPAM_PAUSE_MS: Range<u64> = 10..50;

/// Share of identify pushes whose observed address comes from the
/// zone-identifier corpus rather than the mutation generator.
pub const ZONE_CORPUS_PROBABILITY: f64 = 0.25;

/// Probability that a pub-sub send abandons its stream instead of closing it.
pub const SPAM_RESET_PROBABILITY: f64 = 0.2;

/// Number of fabricated topics in one TopicFlood burst.
pub const TOPIC_FLOOD_TOPICS: RangeInclusive<usize> = 50..=200;

/// PRUNE backoff range, in seconds.
pub const PRUNE_BACKOFF_SECS: Range<u64> = 0..1000;

/// Largest envelope the forging helpers will frame.
pub const MAX_ENVELOPE_SIZE: usize = 4 * 1024 * 1024;
