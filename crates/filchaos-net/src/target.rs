//! Target address resolution.

use filchaos_core::FuzzError;
use libp2p::multiaddr::Protocol;
use libp2p::{Multiaddr, PeerId};
use std::fmt;
use std::str::FromStr;

/// A resolved dial target: the peer identity plus its transport address.
///
/// Built once when a session is constructed and never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetPeer {
    raw: String,
    peer_id: PeerId,
    addrs: Vec<Multiaddr>,
}

impl TargetPeer {
    /// Parse `/…/p2p/<peer-id>` into a peer id and a dialable address.
    pub fn parse(raw: &str) -> Result<Self, FuzzError> {
        let trimmed = raw.trim();
        let mut addr: Multiaddr = trimmed
            .parse()
            .map_err(|e| FuzzError::TargetResolution(format!("{trimmed}: {e}")))?;

        let peer_id = match addr.pop() {
            Some(Protocol::P2p(peer_id)) => peer_id,
            _ => {
                return Err(FuzzError::TargetResolution(format!(
                    "{trimmed}: missing trailing /p2p/<peer-id>"
                )));
            }
        };
        if addr.is_empty() {
            return Err(FuzzError::TargetResolution(format!(
                "{trimmed}: no transport address before /p2p"
            )));
        }

        Ok(Self {
            raw: trimmed.to_string(),
            peer_id,
            addrs: vec![addr],
        })
    }

    /// Build a target from parts already known to the caller.
    pub fn from_parts(peer_id: PeerId, addr: Multiaddr) -> Self {
        let raw = addr.clone().with(Protocol::P2p(peer_id)).to_string();
        Self {
            raw,
            peer_id,
            addrs: vec![addr],
        }
    }

    pub fn raw(&self) -> &str {
        &self.raw
    }

    pub fn peer_id(&self) -> PeerId {
        self.peer_id
    }

    /// Transport addresses with the `/p2p` suffix stripped.
    pub fn addrs(&self) -> &[Multiaddr] {
        &self.addrs
    }
}

impl FromStr for TargetPeer {
    type Err = FuzzError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for TargetPeer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}
