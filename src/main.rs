// Demo driver for the admission gate.
// Not a deployable sidecar: a worked example of wiring one endpoint through
// record_called/record_*/test and watching it lock and recover.

use clap::Parser;
use endpoint_breaker::{AdmissionGate, BreakerConfig};
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Drive a single endpoint through a scripted sequence of outcomes and
/// report the admission decision after each one.
#[derive(Parser, Debug)]
#[command(name = "endpoint-breaker-demo")]
struct Cli {
    /// Service name for the demo endpoint.
    #[arg(long, default_value = "demo-service")]
    service: String,

    /// Endpoint name for the demo endpoint.
    #[arg(long, default_value = "demo-endpoint")]
    endpoint: String,

    /// Number of calls to simulate.
    #[arg(long, default_value_t = 20)]
    calls: u32,

    /// Fraction of simulated calls that fail with a system error, in [0, 1].
    #[arg(long, default_value_t = 0.0)]
    failure_rate: f64,

    #[arg(long, default_value = "info")]
    log_level: String,

    /// Print the final lock snapshot as JSON instead of plain text.
    #[arg(long)]
    json: bool,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level)),
        )
        .init();

    let mut gate = AdmissionGate::new(BreakerConfig::default())?;
    gate.on_lock(|ctx| info!(endpoint = %ctx.endpoint, "locked"));
    gate.on_unlock(|ctx| info!(endpoint = %ctx.endpoint, "unlocked"));

    for i in 0..cli.calls {
        let admitted = gate.test(&cli.service, &cli.endpoint);
        gate.record_called(&cli.service, &cli.endpoint);
        if !admitted {
            println!("call {i}: denied");
            continue;
        }
        let fails = (i as f64 / cli.calls.max(1) as f64) < cli.failure_rate;
        if fails {
            gate.record_sys_exc(&cli.service, &cli.endpoint);
            println!("call {i}: admitted, failed");
        } else {
            gate.record_ok(&cli.service, &cli.endpoint);
            println!("call {i}: admitted, ok");
        }
    }

    if let Some(status) = gate.lock_status(&cli.service, &cli.endpoint) {
        if cli.json {
            println!("{}", serde_json::to_string_pretty(&status)?);
        } else {
            println!("final lock state: {:?}", status.status);
        }
    }

    Ok(())
}
