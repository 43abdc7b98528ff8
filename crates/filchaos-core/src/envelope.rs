//! Raw envelopes for the identify-push and gossipsub wire formats.
//!
//! Builders return the unframed protobuf body; callers frame it with
//! [`wire::delimit`]. [`Malformation::forge`] is the exception: it controls the
//! framing itself, so it returns the bytes exactly as they go on the wire.
//!
//! Field numbers follow the gossipsub `rpc.proto`:
//!
//! ```text
//! RPC            { subscriptions = 1; publish = 2; control = 3 }
//! SubOpts        { subscribe = 1; topicid = 2 }
//! ControlMessage { ihave = 1; iwant = 2; graft = 3; prune = 4 }
//! ControlIHave   { topicID = 1; messageIDs = 2 }
//! ControlIWant   { messageIDs = 1 }
//! ControlGraft   { topicID = 1 }
//! ControlPrune   { topicID = 1; peers = 2; backoff = 3 }
//! PeerInfo       { peerID = 1; signedPeerRecord = 2 }
//! ```

use crate::error::FuzzError;
use crate::frames::ForgedControlFrame;
use crate::wire::{self, ProtoWriter, WIRE_LEN, WIRE_VARINT};
use rand::Rng;

const IDENTIFY_OBSERVED_ADDR: u32 = 4;

const RPC_SUBSCRIPTIONS: u32 = 1;
const RPC_CONTROL: u32 = 3;

const SUBOPTS_SUBSCRIBE: u32 = 1;
const SUBOPTS_TOPIC: u32 = 2;

const CONTROL_IHAVE: u32 = 1;
const CONTROL_IWANT: u32 = 2;
const CONTROL_GRAFT: u32 = 3;
const CONTROL_PRUNE: u32 = 4;

const IHAVE_TOPIC: u32 = 1;
const IHAVE_MESSAGE_IDS: u32 = 2;
const IWANT_MESSAGE_IDS: u32 = 1;
const GRAFT_TOPIC: u32 = 1;
const PRUNE_TOPIC: u32 = 1;
const PRUNE_PEERS: u32 = 2;
const PRUNE_BACKOFF: u32 = 3;
const PEER_INFO_ID: u32 = 1;

/// Identify message carrying only an observed address.
///
/// The address is written as its UTF-8 text, not as binary multiaddr, so a
/// mutated string reaches the target's decoder unchanged.
pub fn identify_push_message(observed_addr: &str) -> Vec<u8> {
    let mut w = ProtoWriter::new();
    w.bytes_field(IDENTIFY_OBSERVED_ADDR, observed_addr.as_bytes());
    w.into_bytes()
}

fn ihave_control(frame: &ForgedControlFrame) -> ProtoWriter {
    let mut ihave = ProtoWriter::new();
    ihave.bytes_field(IHAVE_TOPIC, frame.topic().as_bytes());
    for id in frame.message_ids() {
        ihave.bytes_field(IHAVE_MESSAGE_IDS, id.as_bytes());
    }
    ihave
}

fn graft_control(topic: &str) -> ProtoWriter {
    let mut graft = ProtoWriter::new();
    graft.bytes_field(GRAFT_TOPIC, topic.as_bytes());
    graft
}

fn prune_control(topic: &str, backoff_secs: u64, peers: &[Vec<u8>]) -> ProtoWriter {
    let mut prune = ProtoWriter::new();
    prune.bytes_field(PRUNE_TOPIC, topic.as_bytes());
    for peer in peers {
        let mut info = ProtoWriter::new();
        info.bytes_field(PEER_INFO_ID, peer);
        prune.message_field(PRUNE_PEERS, &info);
    }
    prune.varint_field(PRUNE_BACKOFF, backoff_secs);
    prune
}

fn rpc_with_control(control: &ProtoWriter) -> Vec<u8> {
    let mut rpc = ProtoWriter::new();
    rpc.message_field(RPC_CONTROL, control);
    rpc.into_bytes()
}

/// RPC advertising every identifier in `frame` via one IHAVE.
pub fn ihave_envelope(frame: &ForgedControlFrame) -> Vec<u8> {
    let mut control = ProtoWriter::new();
    control.message_field(CONTROL_IHAVE, &ihave_control(frame));
    rpc_with_control(&control)
}

/// RPC requesting every identifier in `frame` via one IWANT.
pub fn iwant_envelope(frame: &ForgedControlFrame) -> Vec<u8> {
    let mut iwant = ProtoWriter::new();
    for id in frame.message_ids() {
        iwant.bytes_field(IWANT_MESSAGE_IDS, id.as_bytes());
    }
    let mut control = ProtoWriter::new();
    control.message_field(CONTROL_IWANT, &iwant);
    rpc_with_control(&control)
}

pub fn graft_envelope(topic: &str) -> Vec<u8> {
    let mut control = ProtoWriter::new();
    control.message_field(CONTROL_GRAFT, &graft_control(topic));
    rpc_with_control(&control)
}

/// RPC pruning `topic` with the given backoff and peer-exchange entries.
pub fn prune_envelope(topic: &str, backoff_secs: u64, peers: &[Vec<u8>]) -> Vec<u8> {
    let mut control = ProtoWriter::new();
    control.message_field(CONTROL_PRUNE, &prune_control(topic, backoff_secs, peers));
    rpc_with_control(&control)
}

/// RPC subscribing to (or unsubscribing from) every topic, optionally
/// carrying one IHAVE per topic in the same envelope.
pub fn subscription_envelope(
    topics: &[String],
    subscribe: bool,
    ihaves: Option<&[ForgedControlFrame]>,
) -> Vec<u8> {
    let mut rpc = ProtoWriter::new();
    for topic in topics {
        let mut sub = ProtoWriter::new();
        sub.bool_field(SUBOPTS_SUBSCRIBE, subscribe)
            .bytes_field(SUBOPTS_TOPIC, topic.as_bytes());
        rpc.message_field(RPC_SUBSCRIPTIONS, &sub);
    }
    if let Some(frames) = ihaves.filter(|f| !f.is_empty()) {
        let mut control = ProtoWriter::new();
        for frame in frames {
            control.message_field(CONTROL_IHAVE, &ihave_control(frame));
        }
        rpc.message_field(RPC_CONTROL, &control);
    }
    rpc.into_bytes()
}

/// GRAFT, PRUNE and IHAVE for the same topic in a single control message.
pub fn contradictory_envelope(frame: &ForgedControlFrame) -> Vec<u8> {
    let mut control = ProtoWriter::new();
    control
        .message_field(CONTROL_GRAFT, &graft_control(frame.topic()))
        .message_field(CONTROL_PRUNE, &prune_control(frame.topic(), 0, &[]))
        .message_field(CONTROL_IHAVE, &ihave_control(frame));
    rpc_with_control(&control)
}

/// A fabricated topic name of the form `/fil/fuzz/<8 hex chars>`.
pub fn fabricated_topic<R: Rng + ?Sized>(rng: &mut R) -> String {
    let tag: [u8; 4] = rng.r#gen();
    format!("/fil/fuzz/{}", hex::encode(tag))
}

/// Peer identifiers shaped like sha2-256 multihashes over random bytes.
pub fn fabricated_peer_ids<R: Rng + ?Sized>(rng: &mut R, count: usize) -> Vec<Vec<u8>> {
    (0..count)
        .map(|_| {
            let digest: [u8; 32] = rng.r#gen();
            let mut id = Vec::with_capacity(34);
            id.extend_from_slice(&[0x12, 0x20]);
            id.extend_from_slice(&digest);
            id
        })
        .collect()
}

/// Ways of breaking a gossipsub control envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Malformation {
    /// A valid IHAVE RPC with no length prefix at all.
    Unprefixed,
    /// A length prefix claiming more bytes than follow.
    LengthOverclaim,
    /// The control field encoded with the varint wire type.
    WrongWireType,
    /// An IHAVE whose length runs past the end of its parent.
    NestedOverflow,
    /// GRAFT, PRUNE and IHAVE for the same topic at once.
    Contradictory,
    /// A 4-byte big-endian prefix in place of the uvarint one.
    MsgioPrefix,
}

impl Malformation {
    pub const ALL: [Malformation; 6] = [
        Malformation::Unprefixed,
        Malformation::LengthOverclaim,
        Malformation::WrongWireType,
        Malformation::NestedOverflow,
        Malformation::Contradictory,
        Malformation::MsgioPrefix,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Malformation::Unprefixed => "unprefixed",
            Malformation::LengthOverclaim => "length-overclaim",
            Malformation::WrongWireType => "wrong-wire-type",
            Malformation::NestedOverflow => "nested-overflow",
            Malformation::Contradictory => "contradictory",
            Malformation::MsgioPrefix => "msgio-prefix",
        }
    }

    /// Build the wire bytes for this malformation around `frame`.
    pub fn forge<R: Rng + ?Sized>(
        self,
        rng: &mut R,
        frame: &ForgedControlFrame,
    ) -> Result<Vec<u8>, FuzzError> {
        match self {
            Malformation::Unprefixed => Ok(ihave_envelope(frame)),
            Malformation::LengthOverclaim => {
                let body = ihave_envelope(frame);
                let claimed = body.len() as u64 + rng.gen_range(1..=1u64 << 20);
                wire::delimit_with_claim(&body, claimed)
            }
            Malformation::WrongWireType => {
                let mut control = ProtoWriter::new();
                control.message_field(CONTROL_IHAVE, &ihave_control(frame));
                let mut rpc = ProtoWriter::new();
                rpc.key(RPC_CONTROL, WIRE_VARINT).raw(control.as_bytes());
                wire::delimit(rpc.as_bytes())
            }
            Malformation::NestedOverflow => {
                let ihave = ihave_control(frame);
                let overflow = rng.gen_range(1..=u64::from(u32::MAX));
                let mut control = ProtoWriter::new();
                control
                    .key(CONTROL_IHAVE, WIRE_LEN)
                    .varint(ihave.len() as u64 + overflow)
                    .raw(ihave.as_bytes());
                wire::delimit(&rpc_with_control(&control))
            }
            Malformation::Contradictory => wire::delimit(&contradictory_envelope(frame)),
            Malformation::MsgioPrefix => wire::msgio_delimit(&ihave_envelope(frame)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frames::generate_forged_control_frame;
    use crate::wire::read_uvarint;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    fn frame(n: usize) -> ForgedControlFrame {
        let mut rng = StdRng::seed_from_u64(11);
        generate_forged_control_frame(&mut rng, "/fil/blocks/fuzz", n)
    }

    /// Walk top-level fields, returning (field, wire type, payload) for LEN fields.
    fn len_fields(mut data: &[u8]) -> Vec<(u32, Vec<u8>)> {
        let mut out = Vec::new();
        while !data.is_empty() {
            let (key, n) = read_uvarint(data).unwrap();
            data = &data[n..];
            assert_eq!(key & 0x07, u64::from(WIRE_LEN));
            let (len, n) = read_uvarint(data).unwrap();
            data = &data[n..];
            let len = len as usize;
            out.push(((key >> 3) as u32, data[..len].to_vec()));
            data = &data[len..];
        }
        out
    }

    #[test]
    fn identify_push_carries_address_in_field_four() {
        let msg = identify_push_message("/ip4/1.2.3.4/tcp/1");
        let fields = len_fields(&msg);
        assert_eq!(fields, vec![(4, b"/ip4/1.2.3.4/tcp/1".to_vec())]);
    }

    #[test]
    fn ihave_envelope_structure() {
        let f = frame(3);
        let rpc = len_fields(&ihave_envelope(&f));
        assert_eq!(rpc.len(), 1);
        assert_eq!(rpc[0].0, RPC_CONTROL);

        let control = len_fields(&rpc[0].1);
        assert_eq!(control.len(), 1);
        assert_eq!(control[0].0, CONTROL_IHAVE);

        let ihave = len_fields(&control[0].1);
        assert_eq!(ihave[0], (IHAVE_TOPIC, b"/fil/blocks/fuzz".to_vec()));
        let ids: Vec<_> = ihave[1..].iter().map(|(_, v)| String::from_utf8(v.clone()).unwrap()).collect();
        let expected: Vec<_> = f.message_ids().collect();
        assert_eq!(ids, expected);
    }

    #[test]
    fn iwant_lists_every_id() {
        let f = frame(4);
        let rpc = len_fields(&iwant_envelope(&f));
        let control = len_fields(&rpc[0].1);
        assert_eq!(control[0].0, CONTROL_IWANT);
        assert_eq!(len_fields(&control[0].1).len(), 4);
    }

    #[test]
    fn prune_has_backoff_after_peers() {
        let mut rng = StdRng::seed_from_u64(2);
        let peers = fabricated_peer_ids(&mut rng, 2);
        let body = prune_envelope("t", 300, &peers);
        // backoff varint: key (3 << 3 | 0) = 0x18, 300 = [0xAC, 0x02]
        assert!(body.ends_with(&[0x18, 0xAC, 0x02]));
        assert!(peers.iter().all(|p| p.len() == 34 && p[..2] == [0x12, 0x20]));
    }

    #[test]
    fn subscription_envelope_counts_topics() {
        let topics = vec!["/a".to_string(), "/b".to_string()];
        let rpc = len_fields(&subscription_envelope(&topics, false, None));
        assert_eq!(rpc.len(), 2);
        assert!(rpc.iter().all(|(field, _)| *field == RPC_SUBSCRIPTIONS));
        // subscribe=false is encoded explicitly
        assert_eq!(&rpc[0].1[..2], &[0x08, 0x00]);
    }

    #[test]
    fn subscription_envelope_attaches_ihaves() {
        let topics = vec!["/a".to_string()];
        let frames = vec![frame(2)];
        let rpc = len_fields(&subscription_envelope(&topics, true, Some(&frames)));
        assert_eq!(rpc.last().unwrap().0, RPC_CONTROL);
    }

    #[test]
    fn fabricated_topic_shape() {
        let mut rng = StdRng::seed_from_u64(5);
        let t = fabricated_topic(&mut rng);
        assert!(t.starts_with("/fil/fuzz/"));
        assert_eq!(t.len(), "/fil/fuzz/".len() + 8);
    }

    #[test]
    fn length_overclaim_lies() {
        let mut rng = StdRng::seed_from_u64(9);
        let f = frame(2);
        let bytes = Malformation::LengthOverclaim.forge(&mut rng, &f).unwrap();
        let (claimed, n) = read_uvarint(&bytes).unwrap();
        assert!(claimed as usize > bytes.len() - n);
    }

    #[test]
    fn msgio_prefix_is_four_bytes() {
        let mut rng = StdRng::seed_from_u64(9);
        let f = frame(2);
        let bytes = Malformation::MsgioPrefix.forge(&mut rng, &f).unwrap();
        let len = u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as usize;
        assert_eq!(len, bytes.len() - 4);
    }

    #[test]
    fn wrong_wire_type_uses_varint_key() {
        let mut rng = StdRng::seed_from_u64(9);
        let bytes = Malformation::WrongWireType.forge(&mut rng, &frame(1)).unwrap();
        let (_, n) = read_uvarint(&bytes).unwrap();
        assert_eq!(bytes[n], (RPC_CONTROL as u8) << 3);
    }

    #[test]
    fn nested_overflow_exceeds_parent() {
        let mut rng = StdRng::seed_from_u64(9);
        let bytes = Malformation::NestedOverflow.forge(&mut rng, &frame(1)).unwrap();
        let (_, n) = read_uvarint(&bytes).unwrap();
        let rpc = len_fields(&bytes[n..]);
        let control = &rpc[0].1;
        let (_, k) = read_uvarint(control).unwrap();
        let (inner_len, m) = read_uvarint(&control[k..]).unwrap();
        assert!(inner_len as usize > control.len() - k - m);
    }

    #[test]
    fn every_malformation_forges() {
        let mut rng = StdRng::seed_from_u64(1);
        let f = frame(20);
        for m in Malformation::ALL {
            let bytes = m.forge(&mut rng, &f).unwrap();
            assert!(!bytes.is_empty(), "{}", m.name());
        }
    }
}
