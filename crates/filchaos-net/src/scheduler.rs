//! The chaos scheduling loop.
//!
//! A [`Scheduler`] sleeps for the plan's interval, then launches up to
//! `concurrency` independent executions without waiting for them. Each
//! execution holds a semaphore permit for its whole lifetime, so the number
//! in flight never exceeds `concurrency` no matter how fast ticks fire; a
//! tick that finds no free permit records the launch as skipped.
//!
//! The loop exits when its cancellation token fires, then waits up to
//! `stop_grace` for in-flight executions to drain.

use crate::peer::{Connector, EphemeralPeerFactory, PeerLink};
use crate::strategy::{self, AttackContext, AttackOutcome};
use crate::target::TargetPeer;
use filchaos_core::{Attack, AttackPlan, AssertionSink, ChaosConfig, FuzzError, LogSink};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

/// Counts reported when a scheduling loop exits.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub ticks: u64,
    pub launched: u64,
    pub succeeded: u64,
    pub failed: u64,
    /// Launches dropped because every permit was still held.
    pub skipped: u64,
    /// Highest number of executions observed in flight at once.
    pub peak_in_flight: usize,
}

/// Shared between the loop and its executions.
#[derive(Default)]
struct Counters {
    in_flight: AtomicUsize,
    peak: AtomicUsize,
    succeeded: AtomicU64,
    failed: AtomicU64,
}

/// Seed from `seed` when given, from the OS otherwise.
pub(crate) fn session_rng(seed: Option<u64>) -> StdRng {
    match seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    }
}

/// Connect, run one attack, tear down.
///
/// The strategy already bounds every operation; the outer timeout is a
/// backstop so that a strategy bug cannot wedge a worker.
pub async fn run_once<C: Connector>(
    connector: &C,
    target: &TargetPeer,
    attack: Attack,
    config: &ChaosConfig,
    cancel: &CancellationToken,
    rng: &mut StdRng,
) -> Result<AttackOutcome, FuzzError> {
    let link = connector.connect(target, config, cancel).await?;
    let cx = AttackContext {
        link: &link,
        target,
        config,
        cancel,
    };

    let cap = strategy::worst_case(attack, config) + config.io_timeout;
    let result = match tokio::time::timeout(cap, strategy::execute(attack, &cx, rng)).await {
        Ok(result) => result,
        Err(_) => Err(FuzzError::Timeout {
            op: "execution",
            after: cap,
        }),
    };

    link.teardown().await;
    result
}

/// Runs one [`AttackPlan`] against one target until cancelled.
pub struct Scheduler<C: Connector = EphemeralPeerFactory> {
    connector: Arc<C>,
    target: Arc<TargetPeer>,
    plan: AttackPlan,
    config: Arc<ChaosConfig>,
    sink: Arc<dyn AssertionSink>,
}

impl<C: Connector> Scheduler<C> {
    /// Validate `plan` and `config`; both errors are fatal.
    pub fn new(
        connector: Arc<C>,
        target: TargetPeer,
        plan: AttackPlan,
        config: ChaosConfig,
    ) -> Result<Self, FuzzError> {
        plan.validate()?;
        config.validate()?;
        Ok(Self {
            connector,
            target: Arc::new(target),
            plan,
            config: Arc::new(config),
            sink: Arc::new(LogSink),
        })
    }

    pub fn with_sink(mut self, sink: Arc<dyn AssertionSink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn plan(&self) -> &AttackPlan {
        &self.plan
    }

    /// Drive the loop until `cancel` fires and return what happened.
    pub async fn run(self, cancel: CancellationToken) -> RunSummary {
        let Self {
            connector,
            target,
            plan,
            config,
            sink,
        } = self;

        let mut rng = session_rng(config.seed);
        let permits = Arc::new(Semaphore::new(plan.concurrency));
        let tracker = TaskTracker::new();
        let counters = Arc::new(Counters::default());
        let mut summary = RunSummary::default();
        let mut interval = plan.min_interval;

        info!(
            attack = %plan.attack,
            peer = %target.peer_id(),
            concurrency = plan.concurrency,
            min_interval = ?plan.min_interval,
            max_interval = ?plan.max_interval,
            "chaos loop started"
        );

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(interval) => {}
            }

            summary.ticks += 1;
            if summary.ticks == 1 {
                sink.reachable(
                    "chaos loop fired its first tick",
                    &json!({ "attack": plan.attack.name(), "concurrency": plan.concurrency }),
                );
            }

            for _ in 0..plan.concurrency {
                let Ok(permit) = Arc::clone(&permits).try_acquire_owned() else {
                    summary.skipped += 1;
                    continue;
                };
                summary.launched += 1;
                let iteration = summary.launched;
                let exec_rng = StdRng::seed_from_u64(rng.r#gen());

                let connector = Arc::clone(&connector);
                let target = Arc::clone(&target);
                let config = Arc::clone(&config);
                let counters = Arc::clone(&counters);
                let sink = Arc::clone(&sink);
                let cancel = cancel.clone();
                let attack = plan.attack;

                tracker.spawn(async move {
                    let _permit = permit;
                    let mut rng = exec_rng;
                    let now = counters.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                    counters.peak.fetch_max(now, Ordering::SeqCst);

                    let result =
                        run_once(connector.as_ref(), &target, attack, &config, &cancel, &mut rng).await;

                    counters.in_flight.fetch_sub(1, Ordering::SeqCst);
                    match &result {
                        Ok(outcome) => {
                            counters.succeeded.fetch_add(1, Ordering::Relaxed);
                            debug!(
                                %attack,
                                peer = %target.peer_id(),
                                iteration,
                                attempts = outcome.attempts,
                                delivered = outcome.delivered,
                                "execution finished"
                            );
                        }
                        Err(e) => {
                            counters.failed.fetch_add(1, Ordering::Relaxed);
                            debug!(
                                %attack,
                                peer = %target.peer_id(),
                                iteration,
                                kind = e.kind(),
                                error = %e,
                                "execution failed"
                            );
                        }
                    }
                    sink.sometimes(
                        result.is_ok(),
                        "chaos execution completed",
                        &json!({ "attack": attack.name(), "iteration": iteration }),
                    );
                });
            }

            if plan.is_jittered() {
                interval = rng.gen_range(plan.min_interval..plan.max_interval);
            }
        }

        tracker.close();
        if tokio::time::timeout(config.stop_grace, tracker.wait()).await.is_err() {
            warn!(
                in_flight = counters.in_flight.load(Ordering::SeqCst),
                grace = ?config.stop_grace,
                "in-flight executions outlived the stop grace period"
            );
        }

        summary.succeeded = counters.succeeded.load(Ordering::Relaxed);
        summary.failed = counters.failed.load(Ordering::Relaxed);
        summary.peak_in_flight = counters.peak.load(Ordering::SeqCst);

        sink.always(
            summary.peak_in_flight <= plan.concurrency,
            "in-flight executions never exceed concurrency",
            &json!({ "peak": summary.peak_in_flight, "concurrency": plan.concurrency }),
        );
        info!(
            attack = %plan.attack,
            ticks = summary.ticks,
            launched = summary.launched,
            succeeded = summary.succeeded,
            failed = summary.failed,
            skipped = summary.skipped,
            "chaos loop stopped"
        );
        summary
    }
}

/// Run one attack on a schedule against `target` with fresh ephemeral
/// peers, until `cancel` fires.
///
/// Fails only if the target does not resolve or the plan is invalid.
pub async fn run_strategy(
    cancel: CancellationToken,
    target: &str,
    plan: AttackPlan,
    config: ChaosConfig,
) -> Result<RunSummary, FuzzError> {
    let target = TargetPeer::parse(target)?;
    let scheduler = Scheduler::new(Arc::new(EphemeralPeerFactory), target, plan, config)?;
    Ok(scheduler.run(cancel).await)
}
