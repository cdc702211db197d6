use colored::*;

use sever_common::network::device::Device;

pub const TOTAL_WIDTH: usize = 64;

pub fn header(msg: &str) {
    let formatted = format!("⟦ {} ⟧", msg);
    let msg_len = formatted.chars().count();

    let dash_count = TOTAL_WIDTH.saturating_sub(msg_len);
    let left = dash_count / 2;
    let right = dash_count - left;

    let line = format!(
        "{}{}{}",
        "─".repeat(left),
        formatted.to_uppercase().bright_green(),
        "─".repeat(right)
    )
    .bright_black();

    println!("{line}");
}

pub fn status<T: AsRef<str>>(msg: T) {
    println!("{} {}", ">".bright_black(), msg.as_ref());
}

pub fn separator() {
    println!("{}", "═".repeat(TOTAL_WIDTH).bright_black());
}

/// One device as a small tree, the way scan results are listed.
pub fn device_tree(idx: usize, device: &Device) {
    let name = device.hostname.as_deref().unwrap_or("No hostname");
    let marker = if device.protected {
        " (protected)".yellow()
    } else if device.blocked {
        " (blocked)".red().bold()
    } else {
        "".normal()
    };
    println!(
        "{} {}{}",
        format!("[{idx}]").bright_black(),
        name.bright_green(),
        marker
    );

    let mut details: Vec<(&str, String)> = vec![("addr", device.addr.to_string())];
    if let Some(mac) = device.mac {
        details.push(("mac", mac.to_string()));
    }
    if let Some(vendor) = &device.vendor {
        details.push(("vendor", vendor.clone()));
    }
    details.push(("type", device.device_type.to_string()));
    details.push(("iface", device.interface.clone()));
    if !device.open_ports.is_empty() {
        let ports: Vec<String> = device.open_ports.iter().map(u16::to_string).collect();
        details.push(("ports", ports.join(", ")));
    }

    for (i, (key, value)) in details.iter().enumerate() {
        let branch = if i + 1 == details.len() { "└─" } else { "├─" };
        println!(
            " {} {}{} {}",
            branch.bright_black(),
            key,
            ":".bright_black(),
            value
        );
    }
}
