use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};

use civitai_dl_adapter_sim::{ClassProfile, RandomOperations, ScriptedMetrics};
use civitai_dl_adapter_system::{ApiProbe, SystemMetrics};
use civitai_dl_application::{ControlPlane, ExecutionGateway};
use civitai_dl_domain::{
    ControlConfig, OperationClass, OperationRequest, StatusReport, SystemSample,
};
use civitai_dl_ports::{Clock, ManualClock, PortSet, SystemClock};

use crate::config::load_config;
use crate::format::{render_batch, render_health, render_status};

#[derive(Parser, Debug)]
#[command(name = "civitai-dl", about = "Adaptive concurrency control for bulk downloads")]
pub struct Cli {
    /// Path to the YAML control config.
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Print the final status report as JSON.
    #[arg(long, global = true)]
    json: bool,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Sample the live system once and print the assessment.
    Probe(LiveArgs),
    /// Watch the live system until Ctrl-C.
    Monitor(LiveArgs),
    /// Drive simulated batches through the control loop.
    Simulate(SimulateArgs),
}

#[derive(Args, Debug)]
struct LiveArgs {
    #[arg(long, env = "CIVITAI_DL_API_URL", default_value = "https://civitai.com")]
    api_url: String,
    /// Directory whose filesystem is checked for free space.
    #[arg(long, default_value = ".")]
    output_dir: PathBuf,
}

#[derive(Args, Debug)]
struct SimulateArgs {
    #[arg(long, default_value_t = 10)]
    batches: usize,
    /// Requests per class per batch.
    #[arg(long, default_value_t = 20)]
    batch_size: usize,
    #[arg(long, default_value_t = 0.02)]
    failure_rate: f64,
    #[arg(long, default_value_t = 0.01)]
    timeout_rate: f64,
    #[arg(long, default_value_t = 42)]
    seed: u64,
    /// Upper bound of simulated per-request latency.
    #[arg(long, default_value_t = 20)]
    max_latency_ms: u64,
    /// Simulated seconds between batches.
    #[arg(long, default_value_t = 30)]
    tick_secs: u64,
    #[arg(long, default_value_t = 1024.0)]
    memory_mb: f64,
    #[arg(long, default_value_t = 20.0)]
    cpu_percent: f64,
    #[arg(long, default_value_t = 100.0)]
    disk_free_gb: f64,
}

pub async fn run() -> Result<()> {
    dotenv::dotenv().ok();
    crate::logging::init_tracing();

    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref())?;

    let report = match cli.command {
        Command::Probe(args) => {
            let gateway = live_gateway(config, &args)?;
            let check = gateway.health_check().await;
            print!("{}", render_health(&check));
            gateway.status_report()
        }
        Command::Monitor(args) => {
            let gateway = live_gateway(config, &args)?;
            tracing::info!(api = %args.api_url, "monitoring, Ctrl-C to stop");
            tokio::select! {
                _ = gateway.run_health_loop() => {}
                result = tokio::signal::ctrl_c() => {
                    result.context("failed to listen for Ctrl-C")?;
                }
            }
            gateway.status_report()
        }
        Command::Simulate(args) => simulate(config, &args).await?,
    };

    print_status(&report, cli.json)
}

fn live_gateway(
    config: ControlConfig,
    args: &LiveArgs,
) -> Result<ExecutionGateway> {
    let probe = ApiProbe::new(&args.api_url)?;
    let metrics = SystemMetrics::new(args.output_dir.clone(), probe);
    let ports = PortSet::empty().with_metrics(Arc::new(metrics));
    ExecutionGateway::new(config, ports)
}

async fn simulate(
    config: ControlConfig,
    args: &SimulateArgs,
) -> Result<StatusReport> {
    let clock = Arc::new(ManualClock::new(SystemClock.now_millis()));
    let control = Arc::new(ControlPlane::new(config, clock.clone())?);

    let operations = RandomOperations::new(args.seed)
        .with_all_profiles(ClassProfile {
            failure_rate: args.failure_rate,
            timeout_rate: args.timeout_rate,
        })
        .with_latency(0..args.max_latency_ms.max(1));
    let metrics = ScriptedMetrics::fixed(SystemSample {
        memory_used_mb: args.memory_mb,
        cpu_percent: args.cpu_percent,
        disk_free_gb: args.disk_free_gb,
        network_latency_ms: 150.0,
        api_reachable: true,
    });
    let ports = PortSet::empty()
        .with_operations(Arc::new(operations))
        .with_metrics(Arc::new(metrics))
        .with_clock(clock.clone());
    let gateway = ExecutionGateway::with_control(control, ports);

    for batch in 0..args.batches {
        let check = gateway.health_check().await;
        if check.level_change.is_some() || !check.alerts.is_empty() {
            print!("{}", render_health(&check));
        }
        for class in OperationClass::ALL {
            let requests = (0..args.batch_size)
                .map(|i| OperationRequest::new(class, format!("sim-{batch}-{i}")))
                .collect();
            let report = gateway.run_batch(class, requests).await?;
            println!("batch {batch:>3} {}", render_batch(&report));
        }
        clock.advance(Duration::from_secs(args.tick_secs));
        gateway.control().poll();
    }

    Ok(gateway.status_report())
}

fn print_status(report: &StatusReport, json: bool) -> Result<()> {
    if json {
        let text =
            serde_json::to_string_pretty(report).context("failed to serialize status report")?;
        println!("{text}");
    } else {
        print!("{}", render_status(report));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn simulate_defaults_parse() {
        let cli = Cli::try_parse_from(["civitai-dl", "simulate", "--batches", "3"]).unwrap();
        match cli.command {
            Command::Simulate(args) => {
                assert_eq!(args.batches, 3);
                assert_eq!(args.batch_size, 20);
                assert_eq!(args.seed, 42);
            }
            other => panic!("unexpected command {other:?}"),
        }
        assert!(!cli.json);
    }

    #[test]
    fn global_flags_follow_subcommand() {
        let cli = Cli::try_parse_from([
            "civitai-dl",
            "probe",
            "--json",
            "--config",
            "/tmp/control.yaml",
            "--output-dir",
            "/data",
        ])
        .unwrap();
        assert!(cli.json);
        assert_eq!(cli.config, Some(PathBuf::from("/tmp/control.yaml")));
        match cli.command {
            Command::Probe(args) => assert_eq!(args.output_dir, PathBuf::from("/data")),
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[tokio::test]
    async fn simulation_under_memory_pressure_falls_back() {
        let args = SimulateArgs {
            batches: 2,
            batch_size: 5,
            failure_rate: 0.0,
            timeout_rate: 0.0,
            seed: 1,
            max_latency_ms: 1,
            tick_secs: 30,
            memory_mb: 4200.0,
            cpu_percent: 20.0,
            disk_free_gb: 100.0,
        };
        let report = simulate(ControlConfig::default(), &args)
            .await
            .unwrap();
        assert!(report.fallback.level > civitai_dl_domain::FallbackLevel::Normal);
        assert!(report.policy.aggregates.count > 0);
    }
}
