//! Identify-push attack.

use super::{AttackContext, AttackOutcome};
use filchaos_core::constants::{IDENTIFY_PUSH_PROTOCOL, ZONE_CORPUS_PROBABILITY};
use filchaos_core::envelope::identify_push_message;
use filchaos_core::mutation::{GeneratedAddress, generate_tagged_address, zone_corpus_address};
use filchaos_core::{Attack, FuzzError, wire};
use rand::Rng;
use rand::rngs::StdRng;
use tracing::debug;

/// The observed address one push advertises: a zone-identifier corpus entry
/// a quarter of the time, a generated address otherwise.
fn pushed_address(rng: &mut StdRng) -> GeneratedAddress {
    if rng.gen_bool(ZONE_CORPUS_PROBABILITY) {
        zone_corpus_address(rng)
    } else {
        generate_tagged_address(rng)
    }
}

/// Push one identify message whose observed address is a generated (and
/// usually broken) multiaddr, then half-close. Push is one-way, so nothing
/// is read back. A failed write drops the stream unclosed, resetting it.
pub(super) async fn fuzzed_address_push(cx: &AttackContext<'_>, rng: &mut StdRng) -> Result<AttackOutcome, FuzzError> {
    let addr = pushed_address(rng);
    let frame = wire::delimit(&identify_push_message(&addr.text))?;
    debug!(
        attack = %Attack::FuzzedAddressPush,
        origin = ?addr.origin,
        len = addr.text.len(),
        "pushing observed address"
    );

    let mut stream = cx.open(IDENTIFY_PUSH_PROTOCOL).await?;
    if let Err(e) = cx.write(&mut stream, &frame).await {
        drop(stream);
        return Err(e);
    }
    cx.close_quietly(&mut stream).await;
    Ok(AttackOutcome::single())
}
