//! Multiaddr generation and mutation.
//!
//! [`generate_address`] returns a well-formed multiaddr roughly 30% of the
//! time and a mutated one otherwise. Mutations come from five stateless
//! [`MutationOperator`]s over a fixed corpus of base components and special
//! characters. All functions take the random source as a parameter, so a
//! seeded RNG reproduces the same sequence and concurrent callers never share
//! state.
//!
//! Callers must treat every output as untrusted bytes: the mutated branch is
//! designed not to parse.

use rand::Rng;
use std::ops::{Range, RangeInclusive};

/// Address fragments the concatenation and injection operators draw from.
pub const BASE_COMPONENTS: [&str; 9] = [
    "/ip4/127.0.0.1",
    "/ip6/::1",
    "/ip6zone/eth0",
    "/tcp/1234",
    "/udp/1234",
    "/dns4/localhost",
    "/dns6/localhost",
    "/dnsaddr/localhost",
    "/p2p/QmYyQSo1c1Ym7orWxLYvCrM2EmxFTANf8wXmmE7DWjhx5N",
];

/// Fixed set of known-good multiaddrs.
pub const KNOWN_GOOD_ADDRESSES: [&str; 5] = [
    "/ip4/127.0.0.1/tcp/1234",
    "/ip4/127.0.0.1/udp/1234/quic",
    "/ip6/::1/tcp/1234",
    "/dns4/bootstrap.libp2p.io/tcp/443/wss",
    "/dnsaddr/bootstrap.libp2p.io/p2p/QmNnooDu7bfjPFoTZYxMNLWUQJyrVwtbZg5gBMjTezGAJN",
];

/// Separator fragments and control characters spliced into components.
pub const SPECIAL_CHARS: [&str; 16] = [
    "/../", "//", "\\", "\0", "\n", "\t", "\r", "!", "@", "#", "$", "%", "^", "&", "*", "?",
];

/// Zone-identifier multiaddrs that crash or confuse multiaddr parsers: bare
/// and hex zone values, truncated stacks, percent-encoded and control
/// characters, integer boundaries and stray separators.
pub const ZONE_CORPUS: [&str; 74] = [
    "/ip6zone/0",
    "/ip6zone/1",
    "/ip6zone/255",
    "/ip6zone/0xffff",
    "/ip6zone/abc123",
    "/ip6zone/0/tcp/1234",
    "/ip6zone/0/udp/5678/quic",
    "/ip6zone/0/ip4/127.0.0.1/tcp/1234",
    "/ip6zone/",
    "/ip6zone",
    "/ip6zone/0/",
    "/ip6zone/0/tcp/",
    "/ip6zone/0/tcp",
    "/ip6zone/0/udp/",
    "/ip6zone/0/ip4/",
    "/ip6zone/0/ip4/127.0.0.1/",
    "/ip6zone/0/ip4/127.0.0.1",
    "/ip6zone/0x",
    "/ip6zone/0x1",
    "/ip6zone/0x1234567890abcdef",
    "/ip6zone/0xffffffffffffffff",
    "/ip6zone/0x0000000000000000",
    "/ip6zone/0xdeadbeef",
    "/ip6zone/0xbadcafe",
    "/ip6zone/0%20",
    "/ip6zone/0%2f",
    "/ip6zone/0%3a",
    "/ip6zone/0%00",
    "/ip6zone/0%ff",
    "/ip6zone/0%0a",
    "/ip6zone/0%0d",
    "/ip6zone/0%09",
    "/ip6zone/0\u{0}",
    "/ip6zone/0\u{1}",
    "/ip6zone/0\u{7f}",
    "/ip6zone/0\u{80}",
    "/ip6zone/0\u{ff}",
    "/ip6zone/0\u{100}",
    "/ip6zone/0\u{2000}",
    "/ip6zone/0\u{2028}",
    "/ip6zone/0\u{2029}",
    "/ip6zone/0XFFFF",
    "/ip6zone/0Xffff",
    "/ip6zone/0xFFFF",
    "/ip6zone/0XfFfF",
    "/ip6zone/0x0",
    "/ip6zone/0x00",
    "/ip6zone/0x000",
    "/ip6zone/0x7fffffff",
    "/ip6zone/0x80000000",
    "/ip6zone/0xffffffff",
    "/ip6zone/0x100000000",
    "/ip6zone/0x7fffffffffffffff",
    "/ip6zone/0x8000000000000000",
    "/ip6zone/0//",
    "/ip6zone/0///",
    "/ip6zone/0////",
    "/ip6zone/0/tcp//",
    "/ip6zone/0/tcp///",
    "/ip6zone/0/ip4//",
    "/ip6zone/0/ip4///",
    "/ip6zone/0/tcp/1234/",
    "/ip6zone/0/tcp/1234//",
    "/ip6zone/0/tcp/1234///",
    "/ip6zone/0/udp/5678/quic/",
    "/ip6zone/0/udp/5678/quic//",
    "/ip6zone/0/udp//",
    "/ip6zone/0/udp",
    "/ip6zone/-1",
    "/ip6zone/0/ip6zone/0",
    "/ip6zone/0/ip6/::1/tcp/1234",
    "/ip6zone/0/p2p/",
    "/ip6zone/0/dns4/",
    "/ip6zone/%",
];

/// Oversized zone values: `fill` repeated `times` after `/ip6zone/`.
pub const ZONE_OVERSIZE_FILLS: [(&str, usize); 4] = [("0", 1000), ("a", 1000), ("0x", 500), ("deadbeef", 100)];

/// Protocol names the length-explosion operator attaches an oversized value to.
pub const OVERSIZE_PROTOCOLS: [&str; 6] = ["ip4", "ip6", "tcp", "udp", "dns4", "dns6"];

/// Length of the oversized value produced by [`MutationOperator::LengthExplosion`].
pub const OVERSIZED_VALUE_LEN: Range<usize> = 100..2100;

/// Octet range for [`MutationOperator::InvalidOctet`]; at least one octet lands above 255.
pub const INVALID_OCTET_RANGE: Range<u16> = 0..512;

/// Port range for [`MutationOperator::InvalidPort`], entirely above `u16::MAX`.
pub const INVALID_PORT_RANGE: RangeInclusive<u32> = 65_536..=135_535;

const WELL_FORMED_PROBABILITY: f64 = 0.3;
const KNOWN_GOOD_PROBABILITY: f64 = 0.2;
const TCP_PROBABILITY: f64 = 0.7;

/// A stateless string transform producing a structurally broken address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MutationOperator {
    /// 1-4 base components glued together with no separator validation.
    Concatenate,
    /// One base component with a special character spliced in.
    InjectSpecialChar,
    /// A protocol followed by one character repeated 100-2099 times.
    LengthExplosion,
    /// An IPv4 literal with at least one octet above 255.
    InvalidOctet,
    /// A TCP port above 65535.
    InvalidPort,
}

impl MutationOperator {
    pub const ALL: [MutationOperator; 5] = [
        MutationOperator::Concatenate,
        MutationOperator::InjectSpecialChar,
        MutationOperator::LengthExplosion,
        MutationOperator::InvalidOctet,
        MutationOperator::InvalidPort,
    ];

    /// Produce one mutated address.
    pub fn apply<R: Rng + ?Sized>(self, rng: &mut R) -> String {
        match self {
            MutationOperator::Concatenate => {
                let n = rng.gen_range(1..=4);
                (0..n).map(|_| pick(rng, &BASE_COMPONENTS)).collect()
            }
            MutationOperator::InjectSpecialChar => {
                let component = pick(rng, &BASE_COMPONENTS);
                let special = pick(rng, &SPECIAL_CHARS);
                // Components are ASCII, so any byte offset is a char boundary.
                let pos = rng.gen_range(0..component.len());
                format!("{}{}{}", &component[..pos], special, &component[pos..])
            }
            MutationOperator::LengthExplosion => {
                let proto = pick(rng, &OVERSIZE_PROTOCOLS);
                let ch = char::from(b'a' + rng.gen_range(0..26u8));
                let len = rng.gen_range(OVERSIZED_VALUE_LEN);
                format!("/{proto}/{}", ch.to_string().repeat(len))
            }
            MutationOperator::InvalidOctet => {
                let mut octets = [0u16; 4];
                for o in &mut octets {
                    *o = rng.gen_range(INVALID_OCTET_RANGE);
                }
                if octets.iter().all(|o| *o <= 255) {
                    let i = rng.gen_range(0..octets.len());
                    octets[i] = rng.gen_range(256..INVALID_OCTET_RANGE.end);
                }
                format!("/ip4/{}.{}.{}.{}", octets[0], octets[1], octets[2], octets[3])
            }
            MutationOperator::InvalidPort => {
                format!("/tcp/{}", rng.gen_range(INVALID_PORT_RANGE))
            }
        }
    }
}

/// Where a generated address came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AddressOrigin {
    /// Taken verbatim from [`KNOWN_GOOD_ADDRESSES`].
    KnownGood,
    /// Synthesized IPv4/IPv6 + transport address with in-range values.
    Synthesized,
    /// Produced by a mutation operator.
    Mutated(MutationOperator),
    /// Taken from the zone-identifier corpus (index into [`zone_corpus`]).
    ZoneCorpus(usize),
}

impl AddressOrigin {
    pub fn is_well_formed(self) -> bool {
        matches!(self, AddressOrigin::KnownGood | AddressOrigin::Synthesized)
    }
}

/// A generated address along with the branch that produced it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedAddress {
    pub text: String,
    pub origin: AddressOrigin,
}

/// Generate one address: well-formed with probability 0.3, mutated otherwise.
pub fn generate_address<R: Rng + ?Sized>(rng: &mut R) -> String {
    generate_tagged_address(rng).text
}

/// Like [`generate_address`], but reports which branch produced the output.
pub fn generate_tagged_address<R: Rng + ?Sized>(rng: &mut R) -> GeneratedAddress {
    if rng.gen_bool(WELL_FORMED_PROBABILITY) {
        return well_formed_address(rng);
    }
    let op = MutationOperator::ALL[rng.gen_range(0..MutationOperator::ALL.len())];
    GeneratedAddress {
        text: op.apply(rng),
        origin: AddressOrigin::Mutated(op),
    }
}

/// A structurally valid address: 20% known-good, 80% synthesized.
pub fn well_formed_address<R: Rng + ?Sized>(rng: &mut R) -> GeneratedAddress {
    if rng.gen_bool(KNOWN_GOOD_PROBABILITY) {
        return GeneratedAddress {
            text: pick(rng, &KNOWN_GOOD_ADDRESSES).to_string(),
            origin: AddressOrigin::KnownGood,
        };
    }

    let mut text = if rng.gen_bool(0.5) {
        let o: [u8; 4] = rng.r#gen();
        format!("/ip4/{}.{}.{}.{}", o[0], o[1], o[2], o[3])
    } else {
        let g: [u16; 8] = rng.r#gen();
        format!(
            "/ip6/{:x}:{:x}:{:x}:{:x}:{:x}:{:x}:{:x}:{:x}",
            g[0], g[1], g[2], g[3], g[4], g[5], g[6], g[7]
        )
    };

    let port: u16 = rng.gen_range(1..=u16::MAX);
    if rng.gen_bool(TCP_PROBABILITY) {
        text.push_str(&format!("/tcp/{port}"));
    } else {
        text.push_str(&format!("/udp/{port}"));
        if rng.gen_bool(0.5) {
            text.push_str("/quic");
        }
    }

    GeneratedAddress {
        text,
        origin: AddressOrigin::Synthesized,
    }
}

/// Number of entries [`zone_corpus`] yields.
pub const ZONE_CORPUS_LEN: usize = ZONE_CORPUS.len() + ZONE_OVERSIZE_FILLS.len();

/// Every zone-identifier address, fixed entries first, oversized ones last.
pub fn zone_corpus() -> impl Iterator<Item = String> {
    ZONE_CORPUS.iter().map(|s| s.to_string()).chain(
        ZONE_OVERSIZE_FILLS
            .iter()
            .map(|(fill, times)| format!("/ip6zone/{}", fill.repeat(*times))),
    )
}

/// One zone-identifier address, drawn uniformly from [`zone_corpus`].
pub fn zone_corpus_address<R: Rng + ?Sized>(rng: &mut R) -> GeneratedAddress {
    let index = rng.gen_range(0..ZONE_CORPUS_LEN);
    let text = match ZONE_CORPUS.get(index) {
        Some(fixed) => fixed.to_string(),
        None => {
            let (fill, times) = ZONE_OVERSIZE_FILLS[index - ZONE_CORPUS.len()];
            format!("/ip6zone/{}", fill.repeat(times))
        }
    };
    GeneratedAddress {
        text,
        origin: AddressOrigin::ZoneCorpus(index),
    }
}

fn pick<R: Rng + ?Sized>(rng: &mut R, items: &[&'static str]) -> &'static str {
    items[rng.gen_range(0..items.len())]
}
