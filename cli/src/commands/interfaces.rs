use colored::*;

use sever_common::network::interface;

use crate::terminal::print;

pub fn interfaces() -> anyhow::Result<()> {
    let interfaces = interface::list_interfaces();
    if interfaces.is_empty() {
        print::status("no usable interfaces found");
        return Ok(());
    }

    for intf in &interfaces {
        let subnet = match intf.network {
            Some((network, prefix)) => format!("{network}/{prefix}"),
            None => "no derivable subnet".to_string(),
        };
        let gateway = interface::default_gateway(intf)
            .map(|gw| gw.to_string())
            .unwrap_or_else(|| "unknown".to_string());

        println!(
            "{} {} {}",
            intf.name.bright_green().bold(),
            format!("[{}]", intf.kind).bright_black(),
            intf.addr
        );
        println!(" {} subnet{} {subnet}", "├─".bright_black(), ":".bright_black());
        println!(" {} gateway{} {gateway}", "└─".bright_black(), ":".bright_black());
    }
    Ok(())
}
