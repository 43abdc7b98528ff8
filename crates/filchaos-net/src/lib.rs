//! # filchaos-net: the libp2p-facing half of the chaos engine.
//!
//! [`EphemeralPeerFactory`] builds a throwaway identity and swarm per attack
//! execution, [`strategy::execute`] drives one catalog entry over the
//! resulting [`PeerLink`], and the [`Scheduler`] fans executions out on a
//! randomized timer. [`Chaos`] wraps the scheduler in a start/stop session.
//!
//! Every suspension point is bounded by a deadline from
//! [`filchaos_core::ChaosConfig`] or by the session's cancellation token.

pub mod chaos;
pub mod io;
pub mod peer;
pub mod scheduler;
pub mod strategy;
pub mod target;

pub use chaos::{Chaos, SessionMode};
pub use io::{AttackStream, BoxedStream};
pub use peer::{Connector, EphemeralPeer, EphemeralPeerFactory, PeerLink};
pub use scheduler::{RunSummary, Scheduler, run_once, run_strategy};
pub use strategy::{AttackContext, AttackOutcome};
pub use target::TargetPeer;
