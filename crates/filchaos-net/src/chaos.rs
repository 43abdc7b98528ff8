//! Start/stop chaos sessions against one target.

use crate::peer::{Connector, EphemeralPeerFactory};
use crate::scheduler::{RunSummary, Scheduler, session_rng};
use crate::target::TargetPeer;
use filchaos_core::constants::SESSION_CONCURRENCY;
use filchaos_core::{Attack, AttackPlan, AssertionSink, ChaosConfig, FuzzError, LogSink};
use libp2p::futures::FutureExt;
use rand::Rng;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Which family a session attacks with, chosen once per [`Chaos::start`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionMode {
    Identify,
    Ping,
}

impl fmt::Display for SessionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SessionMode::Identify => "identify",
            SessionMode::Ping => "ping",
        })
    }
}

/// A running scheduling loop.
struct Session {
    mode: SessionMode,
    plan: AttackPlan,
    cancel: CancellationToken,
    handle: JoinHandle<RunSummary>,
}

/// A chaos session: `Idle -> Running -> Idle` via [`start`](Chaos::start)
/// and [`stop`](Chaos::stop).
///
/// `start` picks identify or ping mode 50/50, a ping attack uniformly from
/// the ping family, and a concurrency in 2..=6. Those choices hold until the
/// session is stopped.
pub struct Chaos<C: Connector = EphemeralPeerFactory> {
    target: TargetPeer,
    config: ChaosConfig,
    connector: Arc<C>,
    sink: Arc<dyn AssertionSink>,
    parent: CancellationToken,
    running: Arc<AtomicBool>,
    session: Option<Session>,
}

impl Chaos<EphemeralPeerFactory> {
    /// Resolve `target`; an unparseable target is a fatal error.
    pub fn new(target: &str) -> Result<Self, FuzzError> {
        Self::with_connector(target, ChaosConfig::default(), Arc::new(EphemeralPeerFactory))
    }
}

impl<C: Connector> Chaos<C> {
    pub fn with_connector(target: &str, config: ChaosConfig, connector: Arc<C>) -> Result<Self, FuzzError> {
        let target = TargetPeer::parse(target)?;
        config.validate()?;
        Ok(Self {
            target,
            config,
            connector,
            sink: Arc::new(LogSink),
            parent: CancellationToken::new(),
            running: Arc::new(AtomicBool::new(false)),
            session: None,
        })
    }

    pub fn with_sink(mut self, sink: Arc<dyn AssertionSink>) -> Self {
        self.sink = sink;
        self
    }

    /// Tie the session to an enclosing cancellation scope; cancelling
    /// `parent` stops the loop as [`stop`](Chaos::stop) would.
    pub fn with_cancellation(mut self, parent: CancellationToken) -> Self {
        self.parent = parent;
        self
    }

    pub fn target(&self) -> &TargetPeer {
        &self.target
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn mode(&self) -> Option<SessionMode> {
        self.session.as_ref().map(|s| s.mode)
    }

    pub fn plan(&self) -> Option<&AttackPlan> {
        self.session.as_ref().map(|s| &s.plan)
    }

    /// Pick the session's mode, attack and concurrency, and spawn the loop.
    ///
    /// Calling `start` on a running session does nothing. A session whose
    /// loop already ended is cleared first; if it ended because the
    /// enclosing scope was cancelled, `start` returns
    /// [`FuzzError::Cancelled`] instead of spawning a loop that would exit
    /// at once.
    pub fn start(&mut self, min_interval: Duration, max_interval: Duration) -> Result<(), FuzzError> {
        if let Some(ended) = self.session.take_if(|s| s.handle.is_finished()) {
            self.running.store(false, Ordering::SeqCst);
            match ended.handle.now_or_never() {
                Some(Ok(summary)) => self.log_stopped(ended.mode, &ended.plan, &summary),
                Some(Err(e)) => warn!(error = %e, "chaos loop task failed"),
                None => {}
            }
        }
        if self.session.is_some() {
            warn!(peer = %self.target.peer_id(), "chaos session already started");
            return Ok(());
        }
        if self.parent.is_cancelled() {
            warn!(peer = %self.target.peer_id(), "enclosing scope cancelled, not starting chaos session");
            return Err(FuzzError::Cancelled);
        }

        let mut rng = session_rng(self.config.seed);
        let mode = if rng.gen_bool(0.5) {
            SessionMode::Identify
        } else {
            SessionMode::Ping
        };
        let attack = match mode {
            SessionMode::Identify => Attack::FuzzedAddressPush,
            SessionMode::Ping => Attack::PING[rng.gen_range(0..Attack::PING.len())],
        };
        let concurrency = rng.gen_range(SESSION_CONCURRENCY);
        let plan = AttackPlan::new(attack, concurrency, min_interval, max_interval);

        let config = ChaosConfig {
            seed: self.config.seed.map(|_| rng.r#gen()),
            ..self.config.clone()
        };
        let scheduler = Scheduler::new(Arc::clone(&self.connector), self.target.clone(), plan, config)?
            .with_sink(Arc::clone(&self.sink));

        let cancel = self.parent.child_token();
        let running = Arc::clone(&self.running);
        running.store(true, Ordering::SeqCst);
        let loop_cancel = cancel.clone();
        let handle = tokio::spawn(async move {
            let summary = scheduler.run(loop_cancel).await;
            running.store(false, Ordering::SeqCst);
            summary
        });

        info!(
            peer = %self.target.peer_id(),
            %mode,
            %attack,
            concurrency,
            "chaos session started"
        );
        self.session = Some(Session {
            mode,
            plan,
            cancel,
            handle,
        });
        Ok(())
    }

    /// Cancel the loop and wait, bounded, for it to drain.
    ///
    /// Returns `None` if the session was not running or its loop had to be
    /// aborted. Safe to call any number of times.
    pub async fn stop(&mut self) -> Option<RunSummary> {
        let Session {
            mode,
            plan,
            cancel,
            mut handle,
        } = self.session.take()?;
        cancel.cancel();

        // The loop itself waits up to stop_grace for executions, so allow
        // that plus the same again for the loop to notice cancellation.
        let bound = self.config.stop_grace * 2;
        let summary = match tokio::time::timeout(bound, &mut handle).await {
            Ok(Ok(summary)) => Some(summary),
            Ok(Err(e)) => {
                warn!(error = %e, "chaos loop task failed");
                None
            }
            Err(_) => {
                warn!(bound = ?bound, "chaos loop did not stop in time, aborting");
                handle.abort();
                None
            }
        };
        self.running.store(false, Ordering::SeqCst);

        if let Some(s) = &summary {
            self.log_stopped(mode, &plan, s);
        }
        summary
    }

    fn log_stopped(&self, mode: SessionMode, plan: &AttackPlan, summary: &RunSummary) {
        info!(
            peer = %self.target.peer_id(),
            %mode,
            attack = %plan.attack,
            ticks = summary.ticks,
            launched = summary.launched,
            succeeded = summary.succeeded,
            failed = summary.failed,
            "chaos session stopped"
        );
    }
}

impl<C: Connector> Drop for Chaos<C> {
    fn drop(&mut self) {
        if let Some(session) = self.session.take() {
            session.cancel.cancel();
            session.handle.abort();
        }
    }
}
