use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use colored::*;
use sever_core::disrupt::methods::DisruptMethod;
use sever_core::engine::Engine;
use tracing::info;

use crate::terminal::print;

/// Starts a session against `target` and holds it until Ctrl-C (or the
/// requested duration). Shutdown always runs, so every worker is joined
/// and every rule released before the process exits.
pub async fn disrupt(
    engine: Arc<Engine>,
    target: IpAddr,
    methods: Vec<String>,
    duration: Option<u64>,
) -> anyhow::Result<()> {
    let methods = parse_methods(methods)?;
    let duration = duration.map(Duration::from_secs);

    print::status(format!("scanning for {target}..."));
    engine.list_devices().await;
    engine.start_monitoring(Duration::from_secs(5));

    let status = engine.start_disruption(target, methods, duration).await?;

    for method in &status.active_methods {
        println!(" {} {method}", "▶".green().bold());
    }
    for (method, why) in &status.excluded {
        println!(" {} {method}: {why}", "✗".red());
    }

    print::separator();
    match duration {
        Some(d) => print::status(format!(
            "disrupting {target} for {}s (Ctrl-C to stop early)",
            d.as_secs()
        )),
        None => print::status(format!("disrupting {target} until Ctrl-C")),
    }

    wait_for_end(&engine, target).await;

    engine.shutdown().await;
    print::status(format!("released {target}"));
    Ok(())
}

/// Ctrl-C, session end (auto-stop or timed stop), whichever first.
async fn wait_for_end(engine: &Arc<Engine>, target: IpAddr) {
    use sever_core::disrupt::SessionState;

    let poll = async {
        loop {
            tokio::time::sleep(Duration::from_millis(500)).await;
            if engine.disruption_status(target).state == SessionState::Idle {
                info!("session ended");
                break;
            }
        }
    };

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            println!();
            info!("interrupted, stopping");
        }
        _ = poll => {}
    }
}

pub async fn release(engine: Arc<Engine>, target: IpAddr) -> anyhow::Result<()> {
    engine.scrub_rules(target);
    print::status(format!("recomputed and removed any stale rules for {target}"));
    Ok(())
}

fn parse_methods(raw: Vec<String>) -> anyhow::Result<Option<Vec<DisruptMethod>>> {
    if raw.is_empty() {
        return Ok(None);
    }
    let methods = raw
        .iter()
        .map(|name| name.parse::<DisruptMethod>().map_err(anyhow::Error::msg))
        .collect::<anyhow::Result<Vec<DisruptMethod>>>()?;
    Ok(Some(methods))
}

// ╔════════════════════════════════════════════╗
// ║ ████████╗███████╗███████╗████████╗███████╗ ║
// ║ ╚══██╔══╝██╔════╝██╔════╝╚══██╔══╝██╔════╝ ║
// ║    ██║   █████╗  ███████╗   ██║   ███████╗ ║
// ║    ██║   ██╔══╝  ╚════██║   ██║   ╚════██║ ║
// ║    ██║   ███████╗███████║   ██║   ███████║ ║
// ║    ╚═╝   ╚══════╝╚══════╝   ╚═╝   ╚══════╝ ║
// ╚════════════════════════════════════════════╝
