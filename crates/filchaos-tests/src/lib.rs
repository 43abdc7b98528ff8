//! Integration test suite for the filchaos engine.
//!
//! `helpers` provides a real loopback libp2p target that records what it
//! receives, plus in-process links and connectors that stall, count or
//! record, so the engine's deadline and concurrency guarantees can be
//! checked without a Filecoin node.

pub mod helpers;
