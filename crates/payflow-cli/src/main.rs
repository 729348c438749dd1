//! payflow CLI
//!
//! Usage:
//!   payflow demo     - run a workload through the in-memory pipeline and print its status
//!   payflow config   - print the configuration resolved from `PAYFLOW_*` variables

use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use miette::{IntoDiagnostic, Result};
use rust_decimal::Decimal;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use payflow_core::app::{Service, ServiceBuilder, StatusReport};
use payflow_core::config::PayflowConfig;
use payflow_core::domain::{Currency, NewPayment, PaymentId, ProcessingInstruction};
use payflow_core::impls::{InMemoryBroker, InMemoryRecordStore};
use payflow_core::ports::Connection;
use payflow_core::typed;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create payments, deliver their instructions (with duplicates) and wait
    /// until every payment is settled.
    Demo(DemoArgs),

    /// Print the resolved configuration as JSON.
    Config,
}

#[derive(clap::Args)]
struct DemoArgs {
    /// Payments to create
    #[arg(long, default_value_t = 10)]
    payments: usize,

    /// Consumer loops (overrides PAYFLOW_WORKERS)
    #[arg(long)]
    workers: Option<usize>,

    /// Extra copies of each instruction to publish
    #[arg(long, default_value_t = 1)]
    redeliveries: usize,

    /// Instructions for payments that never exist; they end up dead-lettered
    #[arg(long, default_value_t = 0)]
    unknown: usize,

    /// Deliveries before dead-lettering, 0 = unbounded (overrides PAYFLOW_MAX_ATTEMPTS)
    #[arg(long)]
    max_attempts: Option<u32>,

    /// Redelivery delay in ms (overrides PAYFLOW_RETRY_BASE_DELAY_MS)
    #[arg(long)]
    retry_delay_ms: Option<u64>,

    /// Give up waiting after this many seconds
    #[arg(long, default_value_t = 60)]
    timeout_secs: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging();

    let config = PayflowConfig::from_env().into_diagnostic()?;
    match cli.command {
        Command::Config => {
            println!("{}", serde_json::to_string_pretty(&config).into_diagnostic()?);
            Ok(())
        }
        Command::Demo(args) => {
            let report = run_demo(config, args).await?;
            println!("{}", serde_json::to_string_pretty(&report).into_diagnostic()?);
            Ok(())
        }
    }
}

/// Initialize logging with tracing
fn init_logging() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

async fn run_demo(mut config: PayflowConfig, args: DemoArgs) -> Result<StatusReport> {
    if let Some(workers) = args.workers {
        config.workers = workers;
    }
    if let Some(max_attempts) = args.max_attempts {
        config.max_attempts = max_attempts;
    }
    if let Some(delay) = args.retry_delay_ms {
        config.retry_base_delay_ms = delay;
        config.retry_max_delay_ms = config.retry_max_delay_ms.max(delay);
    }
    if args.unknown > 0 && config.max_attempts == 0 {
        warn!("unbounded retries: unknown instructions will never leave the queue");
    }

    let broker = Arc::new(InMemoryBroker::new());
    let service = ServiceBuilder::new(config)
        .store(Arc::new(InMemoryRecordStore::new()))
        .connection(broker.clone())
        .build()
        .into_diagnostic()?;

    let workers = service.start_processor().await.into_diagnostic()?;
    let publisher = service.start_publisher();
    info!(workers = workers.len(), "pipeline started");

    submit_workload(&service, broker.as_ref(), &args).await?;

    let finished = tokio::select! {
        r = wait_until_settled(&service) => r.map(|_| true),
        _ = tokio::time::sleep(Duration::from_secs(args.timeout_secs)) => Ok(false),
        r = tokio::signal::ctrl_c() => r.into_diagnostic().map(|_| false),
    }?;
    if !finished {
        warn!("stopped before the pipeline drained");
    }

    workers.shutdown_and_join().await;
    publisher.shutdown_and_join().await;
    service.status().await.into_diagnostic()
}

async fn submit_workload(
    service: &Service,
    broker: &dyn Connection,
    args: &DemoArgs,
) -> Result<()> {
    let intake = service.intake();
    let queue = service.topology().queue_name();
    let channel = broker.open_channel().await.into_diagnostic()?;
    service
        .topology()
        .declare(channel.as_ref())
        .await
        .into_diagnostic()?;

    for i in 0..args.payments {
        let currency = if i % 2 == 0 { Currency::Usd } else { Currency::Etb };
        let amount = Decimal::new(((i as i64) + 1) * 1_000, 2);
        let payment = intake
            .submit(NewPayment::new(amount, currency, format!("demo-{i:04}")))
            .await
            .into_diagnostic()?;

        for _ in 0..args.redeliveries {
            typed::publish(channel.as_ref(), queue, &ProcessingInstruction::new(payment.id))
                .await
                .into_diagnostic()?;
        }
    }

    for _ in 0..args.unknown {
        typed::publish(
            channel.as_ref(),
            queue,
            &ProcessingInstruction::new(PaymentId::generate()),
        )
        .await
        .into_diagnostic()?;
    }
    Ok(())
}

async fn wait_until_settled(service: &Service) -> Result<()> {
    loop {
        let report = service.status().await.into_diagnostic()?;
        if report.is_settled() {
            return Ok(());
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}
