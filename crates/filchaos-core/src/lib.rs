//! # filchaos-core
//! Pure building blocks for the wire-protocol chaos engine.
//!
//! Nothing in this crate performs I/O. It holds the closed [`catalog::Attack`]
//! namespace, the address [`mutation`] library, content-identifier and
//! control-frame forging ([`frames`], [`envelope`], [`wire`]), the error
//! taxonomy, engine configuration, and the [`traits::AssertionSink`] hook.

pub mod catalog;
pub mod config;
pub mod constants;
pub mod envelope;
pub mod error;
pub mod frames;
pub mod mutation;
pub mod traits;
pub mod wire;

pub use catalog::{Attack, AttackFamily};
pub use config::{AttackPlan, ChaosConfig};
pub use error::{ConfigError, FuzzError, ParseAttackError};
pub use frames::{ContentId, ForgedControlFrame, generate_forged_control_frame};
pub use mutation::{AddressOrigin, GeneratedAddress, MutationOperator, generate_address};
pub use traits::{AssertionSink, LogSink};
