//! The closed attack catalog.
//!
//! Every attack the engine knows about is a variant of [`Attack`]. Dispatch
//! to a strategy is an exhaustive `match`, so adding an entry here fails to
//! compile until a strategy exists for it.

use crate::error::ParseAttackError;
use std::fmt;
use std::str::FromStr;

/// Wire protocol an attack is aimed at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AttackFamily {
    Ping,
    Identify,
    PubSub,
}

impl fmt::Display for AttackFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            AttackFamily::Ping => "ping",
            AttackFamily::Identify => "identify",
            AttackFamily::PubSub => "pubsub",
        })
    }
}

/// One payload-delivery procedure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Attack {
    /// 1-1024 random bytes, then one bounded reply read.
    RandomPayload,
    /// A single 5 MiB write.
    OversizedPayload,
    /// A zero-length write.
    EmptyPayload,
    /// 20-40 idle streams held open together.
    MultipleStreams,
    /// Half of a 1 KiB frame, then abandon it.
    IncompleteWrite,
    /// Many short-lived streams in quick succession.
    PingBarrage,
    /// Bytes that are not a ping payload at all.
    MalformedPayload,
    /// Repeated disconnect/redial cycles.
    ConnectDisconnect,
    /// A sequence of writes of wildly different sizes on one stream.
    VariablePayload,
    /// One byte at a time with long pauses.
    SlowWrite,
    /// Identify push carrying a fuzzed observed address.
    FuzzedAddressPush,
    /// Forged IHAVE envelopes advertising fabricated content.
    IHaveSpam,
    /// Forged IWANT envelopes requesting fabricated content.
    IWantSpam,
    /// Alternating forged GRAFT and PRUNE envelopes.
    GraftPruneSpam,
    /// Structurally broken control envelopes.
    MalformedControlMessage,
    /// Subscribe/unsubscribe bursts over many fabricated topics.
    TopicFlood,
}

impl Attack {
    /// Every catalog entry.
    pub const ALL: [Attack; 16] = [
        Attack::RandomPayload,
        Attack::OversizedPayload,
        Attack::EmptyPayload,
        Attack::MultipleStreams,
        Attack::IncompleteWrite,
        Attack::PingBarrage,
        Attack::MalformedPayload,
        Attack::ConnectDisconnect,
        Attack::VariablePayload,
        Attack::SlowWrite,
        Attack::FuzzedAddressPush,
        Attack::IHaveSpam,
        Attack::IWantSpam,
        Attack::GraftPruneSpam,
        Attack::MalformedControlMessage,
        Attack::TopicFlood,
    ];

    /// The ping family, in catalog order.
    pub const PING: [Attack; 10] = [
        Attack::RandomPayload,
        Attack::OversizedPayload,
        Attack::EmptyPayload,
        Attack::MultipleStreams,
        Attack::IncompleteWrite,
        Attack::PingBarrage,
        Attack::MalformedPayload,
        Attack::ConnectDisconnect,
        Attack::VariablePayload,
        Attack::SlowWrite,
    ];

    /// The pub-sub family, in catalog order.
    pub const PUBSUB: [Attack; 5] = [
        Attack::IHaveSpam,
        Attack::IWantSpam,
        Attack::GraftPruneSpam,
        Attack::MalformedControlMessage,
        Attack::TopicFlood,
    ];

    pub fn family(self) -> AttackFamily {
        match self {
            Attack::RandomPayload
            | Attack::OversizedPayload
            | Attack::EmptyPayload
            | Attack::MultipleStreams
            | Attack::IncompleteWrite
            | Attack::PingBarrage
            | Attack::MalformedPayload
            | Attack::ConnectDisconnect
            | Attack::VariablePayload
            | Attack::SlowWrite => AttackFamily::Ping,
            Attack::FuzzedAddressPush => AttackFamily::Identify,
            Attack::IHaveSpam
            | Attack::IWantSpam
            | Attack::GraftPruneSpam
            | Attack::MalformedControlMessage
            | Attack::TopicFlood => AttackFamily::PubSub,
        }
    }

    /// Stable identifier used on the command line and in logs.
    pub fn name(self) -> &'static str {
        match self {
            Attack::RandomPayload => "random",
            Attack::OversizedPayload => "oversized",
            Attack::EmptyPayload => "empty",
            Attack::MultipleStreams => "multiple",
            Attack::IncompleteWrite => "incomplete",
            Attack::PingBarrage => "barrage",
            Attack::MalformedPayload => "malformed",
            Attack::ConnectDisconnect => "connectdisconnect",
            Attack::VariablePayload => "variable",
            Attack::SlowWrite => "slow",
            Attack::FuzzedAddressPush => "identify-push",
            Attack::IHaveSpam => "ihave",
            Attack::IWantSpam => "iwant",
            Attack::GraftPruneSpam => "graft-prune",
            Attack::MalformedControlMessage => "malformed-control",
            Attack::TopicFlood => "topic-flood",
        }
    }

    /// All identifiers accepted by [`Attack::from_str`].
    pub fn names() -> impl Iterator<Item = &'static str> {
        Self::ALL.iter().map(|a| a.name())
    }
}

impl fmt::Display for Attack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Attack {
    type Err = ParseAttackError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|a| a.name() == wanted)
            .ok_or_else(|| ParseAttackError(s.to_string()))
    }
}
