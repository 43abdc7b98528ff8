//! Fabricated content identifiers and forged control frames.
//!
//! A [`ContentId`] is a CIDv1 (raw codec, sha2-256 multihash) computed over a
//! random payload, so it looks like a real block reference that the target has
//! never seen. A [`ForgedControlFrame`] bundles a batch of pairwise-distinct
//! identifiers with the topic they are advertised under. Frames live only for
//! the duration of one send.

use crate::constants::FORGED_PAYLOAD_LEN;
use rand::Rng;
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use std::fmt;

/// CID version byte.
pub const CID_VERSION: u8 = 0x01;
/// Multicodec for raw binary.
pub const RAW_CODEC: u8 = 0x55;
/// Multihash code for sha2-256.
pub const SHA2_256_CODE: u8 = 0x12;
/// sha2-256 digest length.
pub const DIGEST_LEN: usize = 32;
/// Encoded length of a [`ContentId`].
pub const CONTENT_ID_LEN: usize = 4 + DIGEST_LEN;

/// A CIDv1 over sha2-256, stored in its binary form.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContentId([u8; CONTENT_ID_LEN]);

impl ContentId {
    /// Hash `payload` and wrap the digest as a raw-codec CIDv1.
    pub fn for_payload(payload: &[u8]) -> Self {
        let digest = Sha256::digest(payload);
        let mut bytes = [0u8; CONTENT_ID_LEN];
        bytes[..4].copy_from_slice(&[CID_VERSION, RAW_CODEC, SHA2_256_CODE, DIGEST_LEN as u8]);
        bytes[4..].copy_from_slice(&digest);
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn digest(&self) -> &[u8] {
        &self.0[4..]
    }
}

/// Multibase base58btc (`z` prefix) string form.
impl fmt::Display for ContentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "z{}", bs58::encode(&self.0).into_string())
    }
}

impl fmt::Debug for ContentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ContentId({self})")
    }
}

/// A topic plus a batch of pairwise-distinct fabricated content identifiers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForgedControlFrame {
    topic: String,
    ids: Vec<ContentId>,
}

impl ForgedControlFrame {
    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn ids(&self) -> &[ContentId] {
        &self.ids
    }

    pub fn batch_size(&self) -> usize {
        self.ids.len()
    }

    /// Message identifiers as they go on the wire: the CID string form.
    pub fn message_ids(&self) -> impl Iterator<Item = String> + '_ {
        self.ids.iter().map(|id| id.to_string())
    }
}

/// Draw `batch_size` random payloads, hash each into a [`ContentId`], and
/// return exactly `batch_size` distinct identifiers.
///
/// A collision is re-drawn rather than dropped, so the batch is always full.
pub fn generate_forged_control_frame<R: Rng + ?Sized>(
    rng: &mut R,
    topic: &str,
    batch_size: usize,
) -> ForgedControlFrame {
    let mut seen = HashSet::with_capacity(batch_size);
    let mut ids = Vec::with_capacity(batch_size);
    while ids.len() < batch_size {
        let mut payload = [0u8; FORGED_PAYLOAD_LEN];
        rng.fill(&mut payload[..]);
        let id = ContentId::for_payload(&payload);
        if seen.insert(id) {
            ids.push(id);
        }
    }
    ForgedControlFrame {
        topic: topic.to_string(),
        ids,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    /// Replays the same block of bytes a fixed number of times, then random.
    struct RepeatingRng {
        repeats_left: usize,
        inner: StdRng,
    }

    impl rand::RngCore for RepeatingRng {
        fn next_u32(&mut self) -> u32 {
            self.inner.next_u32()
        }
        fn next_u64(&mut self) -> u64 {
            self.inner.next_u64()
        }
        fn fill_bytes(&mut self, dest: &mut [u8]) {
            if self.repeats_left > 0 {
                self.repeats_left -= 1;
                dest.fill(0xAB);
            } else {
                self.inner.fill_bytes(dest);
            }
        }
        fn try_fill_bytes(&mut self, dest: &mut [u8]) -> Result<(), rand::Error> {
            self.fill_bytes(dest);
            Ok(())
        }
    }

    #[test]
    fn content_id_layout() {
        let id = ContentId::for_payload(b"hello");
        assert_eq!(&id.as_bytes()[..4], &[0x01, 0x55, 0x12, 0x20]);
        assert_eq!(id.digest(), Sha256::digest(b"hello").as_slice());
    }

    #[test]
    fn content_id_string_is_base58btc_multibase() {
        let id = ContentId::for_payload(b"hello");
        let s = id.to_string();
        assert!(s.starts_with('z'));
        let decoded = bs58::decode(&s[1..]).into_vec().unwrap();
        assert_eq!(decoded, id.as_bytes());
    }

    #[test]
    fn collisions_are_redrawn() {
        let mut rng = RepeatingRng {
            repeats_left: 5,
            inner: StdRng::seed_from_u64(1),
        };
        let frame = generate_forged_control_frame(&mut rng, "/fil/blocks/fuzz", 10);
        assert_eq!(frame.batch_size(), 10);
        let unique: HashSet<_> = frame.ids().iter().collect();
        assert_eq!(unique.len(), 10);
    }

    #[test]
    fn zero_batch_is_empty() {
        let mut rng = StdRng::seed_from_u64(0);
        let frame = generate_forged_control_frame(&mut rng, "t", 0);
        assert_eq!(frame.batch_size(), 0);
        assert_eq!(frame.topic(), "t");
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(256))]

        #[test]
        fn frame_has_exactly_n_distinct_ids(seed in any::<u64>(), n in 0usize..120) {
            let mut rng = StdRng::seed_from_u64(seed);
            let frame = generate_forged_control_frame(&mut rng, "/fil/msgs/fuzz", n);
            prop_assert_eq!(frame.batch_size(), n);
            let unique: HashSet<String> = frame.message_ids().collect();
            prop_assert_eq!(unique.len(), n);
        }
    }
}
