mod commands;
mod terminal;

use std::sync::Arc;

use commands::{CommandLine, Commands, disrupt, health, interfaces, scan};
use sever_common::config::Config;
use sever_common::privilege;
use sever_core::engine::Engine;
use sever_core::inject::PnetInjectorFactory;
use sever_core::rules::LinuxCommandBackend;
use sever_core::scanner::probe::ConnectProbe;
use terminal::{logging, print};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let commands = CommandLine::parse_args();
    logging::init();

    let cfg = Config {
        no_dns: commands.no_dns,
        ..Config::default()
    };

    match commands.command {
        Commands::Interfaces => {
            print::header("local interfaces");
            interfaces::interfaces()
        }
        Commands::Scan { timeout } => {
            print::header("device discovery");
            scan::scan(build_engine(cfg, timeout)).await
        }
        Commands::Health { target } => {
            print::header("target health");
            health::health(build_engine(cfg, None), target).await
        }
        Commands::Disrupt {
            target,
            methods,
            duration,
        } => {
            print::header("disruption");
            disrupt::disrupt(build_engine(cfg, None), target, methods, duration).await
        }
        Commands::Release { target } => {
            print::header("rule cleanup");
            disrupt::release(build_engine(cfg, None), target).await
        }
    }
}

fn build_engine(mut cfg: Config, timeout: Option<u64>) -> Arc<Engine> {
    if let Some(millis) = timeout {
        cfg.probe_timeout = std::time::Duration::from_millis(millis);
    }
    let privileged = privilege::has_elevated_privileges();
    if !privileged {
        print::status("running unprivileged: raw-packet and rule methods are unavailable");
    }

    Engine::new(
        cfg,
        privileged,
        Arc::new(PnetInjectorFactory),
        Box::new(LinuxCommandBackend::new()),
        Arc::new(ConnectProbe::default()),
    )
}
