//! Random number pipeline - a generator node feeding a rate logger
//!
//! Usage:
//!   random_pipeline --duration-secs 5
//!   random_pipeline --config config/engine.toml --report-interval-ms 250

use anyhow::{Context, Result};
use async_trait::async_trait;
use clap::Parser;
use node_dispatch::{
    Behavior, DispatchError, Engine, EngineConfig, Message, MessageType, Node, NodeContext,
    Scope, Service, Value,
};
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

const GENERATOR: &str = "Random Numbers";
const LOGGER: &str = "Random Logger";
const RANDOM: &str = "Random";
const STATS_SERVICE: &str = "stats";

#[derive(Parser, Debug)]
#[command(name = "random_pipeline")]
#[command(about = "Generate random numbers and report the rate they are consumed at")]
#[command(version)]
struct Args {
    /// How long the generator runs before killing itself
    #[arg(short, long, default_value_t = 5)]
    duration_secs: u64,

    /// How often the logger reports its rate
    #[arg(short, long, default_value_t = 1000)]
    report_interval_ms: u64,

    /// Override the configured mailbox capacity
    #[arg(short, long)]
    mailbox_capacity: Option<usize>,

    /// Path to an engine configuration file
    #[arg(short, long)]
    config: Option<String>,

    /// Log level (trace, debug, info, warn, error); RUST_LOG takes precedence
    #[arg(short, long, default_value = "info")]
    log_level: String,
}

/// Emits random values to its children from the moment it starts until its
/// run time is up or `finish` fires, then stops its children and kills itself
struct RandomGenerator {
    run_for: Duration,
    rng: StdRng,
    finish: CancellationToken,
}

#[async_trait]
impl Behavior for RandomGenerator {
    async fn handle(
        &mut self,
        ctx: &mut NodeContext,
        msg: Arc<Message>,
    ) -> node_dispatch::Result<()> {
        match msg.kind() {
            MessageType::Start => {
                info!(node = %ctx.name(), run_for_ms = self.run_for.as_millis(), "Starting");
                // Children must be running before the readings arrive
                ctx.forward(&msg).await;

                let deadline = tokio::time::sleep(self.run_for);
                tokio::pin!(deadline);
                let mut sent: u64 = 0;

                loop {
                    let reading = Message::new(RANDOM).with_value("value", self.rng.gen::<f64>());
                    tokio::select! {
                        biased;

                        _ = ctx.cancelled() => return Err(DispatchError::Cancelled),
                        _ = &mut deadline => break,
                        _ = self.finish.cancelled() => break,
                        _ = ctx.dispatch(reading) => sent += 1,
                    }
                }

                // Killing itself discards any later STOP, so pass one on now
                ctx.dispatch(Message::stop()).await;
                ctx.kill();
                info!(node = %ctx.name(), sent, "Exiting");
                Ok(())
            }
            MessageType::Stop => {
                info!(node = %ctx.name(), "Stopped before producing");
                Ok(())
            }
            MessageType::Custom(_) => Err(DispatchError::unknown_message_type(msg.kind())),
        }
    }
}

/// Counts readings and reports the per-second rate every interval
struct RandomLogger {
    interval: Duration,
    window_start: Instant,
    count: u64,
    total: u64,
}

impl RandomLogger {
    fn new(interval: Duration) -> Self {
        Self {
            interval,
            window_start: Instant::now(),
            count: 0,
            total: 0,
        }
    }

    fn report(&mut self, ctx: &NodeContext) {
        let elapsed = self.window_start.elapsed();
        let rate = self.count as f64 / elapsed.as_secs_f64();
        info!(node = %ctx.name(), rate_per_sec = rate as u64, "Readings");

        let report = Message::new("Rate")
            .with_value("node", ctx.name())
            .with_value("rate", rate)
            .with_value("count", self.count as i64);
        if ctx.send_to(STATS_SERVICE, &report) == 0 {
            warn!(node = %ctx.name(), "No stats service registered");
        }

        self.count = 0;
        self.window_start = Instant::now();
    }
}

#[async_trait]
impl Behavior for RandomLogger {
    async fn handle(
        &mut self,
        ctx: &mut NodeContext,
        msg: Arc<Message>,
    ) -> node_dispatch::Result<()> {
        match msg.kind() {
            MessageType::Start => {
                self.window_start = Instant::now();
                info!(node = %ctx.name(), "Starting");
            }
            MessageType::Stop => {
                info!(node = %ctx.name(), total = self.total, "Exiting");
            }
            MessageType::Custom(tag) if tag == RANDOM => {
                if msg.value("value").and_then(Value::as_float).is_none() {
                    return Err(DispatchError::handler("reading without a value"));
                }
                self.count += 1;
                self.total += 1;
                if self.window_start.elapsed() >= self.interval {
                    self.report(ctx);
                }
            }
            MessageType::Custom(_) => {
                return Err(DispatchError::unknown_message_type(msg.kind()));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Default, Clone, Copy)]
struct RateSummary {
    reports: u64,
    peak: f64,
    sum: f64,
}

/// Collects the rate reports published by the logger
#[derive(Debug, Default)]
struct RateStats {
    summary: Mutex<RateSummary>,
}

impl RateStats {
    fn summary(&self) -> RateSummary {
        *self.summary.lock()
    }
}

impl Service for RateStats {
    fn name(&self) -> &str {
        STATS_SERVICE
    }

    fn process(&self, msg: &Message) {
        let Some(rate) = msg.value("rate").and_then(Value::as_float) else {
            return;
        };
        let mut summary = self.summary.lock();
        summary.reports += 1;
        summary.sum += rate;
        summary.peak = summary.peak.max(rate);
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(&args);

    let mut config = match &args.config {
        Some(path) => EngineConfig::from_file(path)
            .with_context(|| format!("Failed to load configuration from {}", path))?,
        None => EngineConfig::default(),
    };
    if let Some(capacity) = args.mailbox_capacity {
        config = config.with_mailbox_capacity(capacity);
    }

    let stats = Arc::new(RateStats::default());
    let finish = CancellationToken::new();
    let scope = Scope::new().with_shared_service(stats.clone());

    let pipeline = Node::new(
        GENERATOR,
        RandomGenerator {
            run_for: Duration::from_secs(args.duration_secs),
            rng: StdRng::from_entropy(),
            finish: finish.clone(),
        },
    )
    .with_child(Node::new(
        LOGGER,
        RandomLogger::new(Duration::from_millis(args.report_interval_ms)),
    ));

    let engine = Engine::new(config, scope, vec![pipeline])?;
    let generator = engine
        .find(GENERATOR)
        .context("generator node was not spawned")?;
    info!(engine_id = %engine.id(), nodes = engine.nodes().len(), "Starting pipeline");

    let started = Instant::now();
    engine.start().await;

    tokio::select! {
        _ = generator.killed() => info!("Generator finished"),
        signal = tokio::signal::ctrl_c() => {
            signal.context("Failed to listen for CTRL+C")?;
            info!("Received shutdown signal");
            finish.cancel();
            generator.killed().await;
        }
    }

    engine.shutdown().await;

    let summary = stats.summary();
    let engine_stats = engine.stats();
    info!(
        reports = summary.reports,
        peak_rate = summary.peak as u64,
        messages_handled = engine_stats.messages_handled,
        mailbox_full_events = engine_stats.mailbox_full_events,
        "Pipeline stopped"
    );
    if summary.reports > 0 {
        println!("Average rate: {:.0}/s", summary.sum / summary.reports as f64);
    }
    println!("Elapsed: {:?}", started.elapsed());
    println!("\nExiting...");

    Ok(())
}

fn init_logging(args: &Args) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}
