use std::sync::Arc;
use std::time::{Duration, Instant};

use colored::*;
use indicatif::{ProgressBar, ProgressStyle};
use sever_core::engine::Engine;

use crate::terminal::print;

pub async fn scan(engine: Arc<Engine>) -> anyhow::Result<()> {
    let spinner = ProgressBar::new_spinner();
    spinner.set_style(ProgressStyle::with_template("{spinner} {msg}")?);
    spinner.set_message("sweeping local segments...");
    spinner.enable_steady_tick(Duration::from_millis(80));

    let started = Instant::now();
    let report = engine.rescan(None).await;
    spinner.finish_and_clear();

    if report.partial {
        print::status("scan deadline hit: results are partial");
    }

    let devices = engine.list_devices().await;
    if devices.is_empty() {
        print::status("no devices found");
        return Ok(());
    }

    for (idx, device) in devices.iter().enumerate() {
        print::device_tree(idx, device);
        if idx + 1 != devices.len() {
            println!();
        }
    }

    print::separator();
    let count = format!("{} device(s)", devices.len()).bold().green();
    let elapsed = format!("{:.2}s", started.elapsed().as_secs_f64()).bold().yellow();
    println!("Discovery complete: {count} in {elapsed}");
    Ok(())
}
