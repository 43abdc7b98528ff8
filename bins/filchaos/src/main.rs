//! filchaos: adversarial libp2p wire-protocol fuzzer for Filecoin nodes.
//!
//! `chaos` runs a randomized session against one target; `ping-attack` and
//! `pubsub-attack` drive a single catalog entry on a schedule; `attacks`
//! lists the catalog. Each run prints its summary as JSON on exit.

mod config;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::{Args, Parser, Subcommand, ValueEnum};
use filchaos_core::{Attack, AttackFamily, AttackPlan, ChaosConfig};
use filchaos_net::{Chaos, EphemeralPeerFactory, RunSummary, run_strategy};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Adversarial libp2p wire-protocol fuzzer.
#[derive(Parser, Debug)]
#[command(name = "filchaos", version, about = "Send malformed and abusive libp2p traffic at a Filecoin node")]
struct Cli {
    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    /// Log output format
    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    #[command(flatten)]
    tuning: Tuning,

    #[command(subcommand)]
    command: Commands,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
enum LogFormat {
    /// Human-readable lines
    Text,
    /// One JSON object per event, for collecting runs
    Json,
}

/// Engine settings; flags win over `FILCHAOS_*` variables.
#[derive(Args, Debug)]
struct Tuning {
    /// Use short deadlines suited to loopback and devnet targets
    #[arg(long, global = true)]
    local: bool,

    /// Dial timeout in milliseconds
    #[arg(long, global = true)]
    dial_timeout_ms: Option<u64>,

    /// Per-operation stream I/O timeout in milliseconds
    #[arg(long, global = true)]
    io_timeout_ms: Option<u64>,

    /// Topic advertised in forged gossip frames
    #[arg(long, global = true)]
    gossip_topic: Option<String>,

    /// Seed for a reproducible run
    #[arg(long, global = true)]
    seed: Option<u64>,
}

impl Tuning {
    fn into_config(self) -> Result<ChaosConfig> {
        let base = if self.local {
            ChaosConfig::local()
        } else {
            ChaosConfig::default()
        };
        let mut config = config::from_env(base)?;

        if let Some(ms) = self.dial_timeout_ms {
            config.dial_timeout = Duration::from_millis(ms);
        }
        if let Some(ms) = self.io_timeout_ms {
            config.io_timeout = Duration::from_millis(ms);
        }
        if let Some(topic) = self.gossip_topic {
            config.gossip_topic = topic;
        }
        if self.seed.is_some() {
            config.seed = self.seed;
        }

        config.validate().context("invalid engine configuration")?;
        Ok(config)
    }
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Randomized chaos session: identify or ping mode, picked at start.
    Chaos(ChaosArgs),
    /// Run one ping-family (or identify) attack on a schedule.
    PingAttack(StrategyArgs),
    /// Run one pub-sub attack on a schedule.
    PubsubAttack(StrategyArgs),
    /// List attack identifiers and their families.
    Attacks,
}

#[derive(Args, Debug)]
struct Schedule {
    /// Target multiaddr, ending in /p2p/<peer-id>
    #[arg(short, long)]
    target: String,

    /// Shortest pause between ticks, in milliseconds
    #[arg(long, default_value_t = 1000)]
    min_interval_ms: u64,

    /// Longest pause between ticks, in milliseconds
    #[arg(long, default_value_t = 3000)]
    max_interval_ms: u64,

    /// Stop after this many seconds (runs until Ctrl+C when omitted)
    #[arg(long)]
    duration_secs: Option<u64>,
}

impl Schedule {
    fn intervals(&self) -> Result<(Duration, Duration)> {
        if self.max_interval_ms < self.min_interval_ms {
            bail!(
                "--max-interval-ms ({}) is below --min-interval-ms ({})",
                self.max_interval_ms,
                self.min_interval_ms
            );
        }
        Ok((
            Duration::from_millis(self.min_interval_ms),
            Duration::from_millis(self.max_interval_ms),
        ))
    }

    fn duration(&self) -> Option<Duration> {
        self.duration_secs.map(Duration::from_secs)
    }
}

#[derive(Args, Debug)]
struct ChaosArgs {
    #[command(flatten)]
    schedule: Schedule,
}

#[derive(Args, Debug)]
struct StrategyArgs {
    #[command(flatten)]
    schedule: Schedule,

    /// Attack identifier (see `filchaos attacks`)
    #[arg(short, long)]
    attack: Attack,

    /// Executions launched per tick
    #[arg(short, long, default_value_t = 4)]
    concurrency: usize,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(&cli.log_level, cli.log_format);

    match cli.command {
        Commands::Attacks => {
            list_attacks();
            Ok(())
        }
        Commands::Chaos(args) => {
            let config = cli.tuning.into_config()?;
            chaos(args, config).await
        }
        Commands::PingAttack(args) => {
            let config = cli.tuning.into_config()?;
            strategy(args, &[AttackFamily::Ping, AttackFamily::Identify], config).await
        }
        Commands::PubsubAttack(args) => {
            let config = cli.tuning.into_config()?;
            strategy(args, &[AttackFamily::PubSub], config).await
        }
    }
}

fn list_attacks() {
    for attack in Attack::ALL {
        println!("{:<20} {}", attack.name(), attack.family());
    }
}

/// A token cancelled by Ctrl+C or, when given, after `duration`.
fn shutdown_token(duration: Option<Duration>) -> CancellationToken {
    let cancel = CancellationToken::new();

    let on_signal = cancel.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("received Ctrl+C, shutting down"),
            Err(e) => warn!(error = %e, "failed to install Ctrl+C handler"),
        }
        on_signal.cancel();
    });

    if let Some(duration) = duration {
        let on_timer = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(duration).await;
            info!(?duration, "run duration elapsed");
            on_timer.cancel();
        });
    }

    cancel
}

async fn chaos(args: ChaosArgs, config: ChaosConfig) -> Result<()> {
    let (min, max) = args.schedule.intervals()?;
    let cancel = shutdown_token(args.schedule.duration());

    let mut session = Chaos::with_connector(&args.schedule.target, config, Arc::new(EphemeralPeerFactory))
        .context("cannot build chaos session")?
        .with_cancellation(cancel.clone());
    session.start(min, max).context("cannot start chaos session")?;
    info!(
        peer = %session.target().peer_id(),
        mode = ?session.mode(),
        "filchaos v{} running (Ctrl+C to stop)",
        env!("CARGO_PKG_VERSION")
    );

    cancel.cancelled().await;
    match session.stop().await {
        Some(summary) => print_summary(&summary),
        None => bail!("chaos loop did not stop cleanly"),
    }
}

async fn strategy(args: StrategyArgs, families: &[AttackFamily], config: ChaosConfig) -> Result<()> {
    let family = args.attack.family();
    if !families.contains(&family) {
        bail!("attack {} belongs to the {family} family, which this command does not run", args.attack);
    }

    let (min, max) = args.schedule.intervals()?;
    let plan = AttackPlan::new(args.attack, args.concurrency, min, max);
    let cancel = shutdown_token(args.schedule.duration());

    info!(
        attack = %args.attack,
        peer = args.schedule.target.as_str(),
        concurrency = args.concurrency,
        "filchaos v{} running (Ctrl+C to stop)",
        env!("CARGO_PKG_VERSION")
    );
    let summary = run_strategy(cancel, &args.schedule.target, plan, config)
        .await
        .with_context(|| format!("cannot run {} against {}", args.attack, args.schedule.target))?;
    print_summary(&summary)
}

fn print_summary(summary: &RunSummary) -> Result<()> {
    let json = serde_json::to_string_pretty(summary).context("serializing run summary")?;
    println!("{json}");
    Ok(())
}

/// Crates whose events follow `--log-level`.
const LOG_CRATES: [&str; 3] = ["filchaos", "filchaos_core", "filchaos_net"];

/// Filter used when `RUST_LOG` is unset: `level` for our crates, `warn` for
/// everything else, so libp2p's per-connection chatter stays out of the
/// stream of attack outcomes.
fn default_filter(level: &str) -> String {
    let mut directives = vec!["warn".to_string()];
    directives.extend(LOG_CRATES.iter().map(|krate| format!("{krate}={level}")));
    directives.join(",")
}

fn init_logging(level: &str, format: LogFormat) {
    use tracing_subscriber::filter::EnvFilter;
    use tracing_subscriber::fmt;
    use tracing_subscriber::prelude::*;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter(level)));
    let registry = tracing_subscriber::registry().with(filter);

    match format {
        LogFormat::Json => registry.with(fmt::layer().json().with_current_span(false)).init(),
        LogFormat::Text => registry.with(fmt::layer().with_target(false).compact()).init(),
    }
}
