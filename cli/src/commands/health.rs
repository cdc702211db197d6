use std::net::IpAddr;
use std::sync::Arc;

use colored::*;
use sever_core::engine::Engine;
use sever_core::health::HealthStatus;

use crate::terminal::print;

pub async fn health(engine: Arc<Engine>, target: IpAddr) -> anyhow::Result<()> {
    // The monitor needs the device in the table first.
    engine.list_devices().await;

    let report = engine.health_report(target).await?;

    let status = match report.status {
        HealthStatus::Healthy => format!("{}", report.status).green().bold(),
        HealthStatus::Degraded => format!("{}", report.status).yellow().bold(),
        HealthStatus::Poor => format!("{}", report.status).red(),
        HealthStatus::Disconnected => format!("{}", report.status).red().bold(),
    };
    println!("{target}: score {:.0}/100, {status}", report.score);

    for warning in &report.warnings {
        println!(" {} {}", "!".yellow().bold(), warning);
    }
    for recommendation in &report.recommendations {
        println!(" {} {}", "·".bright_black(), recommendation);
    }
    if report.warnings.is_empty() {
        print::status("no warnings");
    }
    Ok(())
}
