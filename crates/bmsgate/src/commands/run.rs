//! `bmsgate run`: drive a config against simulated devices.

use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use tabled::Tabled;
use tokio_util::sync::CancellationToken;
use tracing::info;

use bmsgate_core::{Clock, HealthCheck, SystemClock};

use crate::cli::{GlobalOpts, RunArgs};
use crate::error::CliError;
use crate::output;
use crate::sim::{Gateway, SimOptions};

const SHUTDOWN_LIMIT: Duration = Duration::from_secs(5);

// ── Table row ───────────────────────────────────────────────────────

#[derive(Tabled)]
struct HealthRow {
    #[tabled(rename = "Check")]
    id: String,
    #[tabled(rename = "Normality")]
    normality: String,
    #[tabled(rename = "Reliability")]
    reliability: String,
    #[tabled(rename = "Faults")]
    faults: String,
    #[tabled(rename = "Since")]
    since: String,
}

fn health_row(check: &HealthCheck, color: bool) -> HealthRow {
    let faults = if check.faults.is_empty() {
        "-".to_owned()
    } else {
        check
            .faults
            .iter()
            .map(|fault| format!("{} ({})", fault.code, fault.severity))
            .collect::<Vec<_>>()
            .join("\n")
    };
    HealthRow {
        id: check.id.clone(),
        normality: output::normality_label(check.normality, color),
        reliability: check.reliability.state.to_string(),
        faults,
        since: check
            .normality_change_time
            .map_or_else(|| "-".into(), |t| t.format("%H:%M:%S").to_string()),
    }
}

pub async fn handle(args: RunArgs, global: &GlobalOpts) -> Result<(), CliError> {
    let config = bmsgate_config::load_config(global.config.as_deref())?;
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let gateway = Gateway::build(
        &config,
        &SimOptions {
            fail_every: args.fail_every,
            device: args.device,
        },
        &clock,
    )?;
    info!(
        gateway = %config.name,
        devices = gateway.device_count(),
        traits = gateway.router().len(),
        checks = gateway.registry().len(),
        "starting simulated run"
    );

    let cancel = CancellationToken::new();
    let mut events = gateway.events(&cancel);
    gateway.start(&cancel)?;

    let stream_changes = !args.no_changes && !global.quiet;
    let deadline = tokio::time::sleep(Duration::from_secs(args.duration));
    let interrupt = tokio::signal::ctrl_c();
    tokio::pin!(deadline, interrupt);

    loop {
        tokio::select! {
            biased;
            () = &mut deadline => break,
            _ = &mut interrupt => {
                info!("interrupted, shutting down");
                break;
            }
            Some(event) = events.next() => {
                if stream_changes {
                    output::print_output(&output::render_json(&event, true)?, false);
                }
            }
        }
    }

    cancel.cancel();
    gateway.wait_idle(SHUTDOWN_LIMIT).await;

    let statuses = gateway.health();
    let color = output::should_color(global.color);
    let out = output::render_list(
        global.output,
        &statuses,
        |check| health_row(check, color),
        |check| format!("{}\t{}", check.id, check.normality),
    )?;
    output::print_output(&out, global.quiet);

    gateway.shutdown();
    Ok(())
}
